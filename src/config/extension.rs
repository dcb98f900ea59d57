//! Extension definitions as declared in the YAML configuration.

use serde::{Deserialize, Serialize};

use crate::config::helpers::{is_empty, lenient_string};

/// Rule governing whether an image is fetched before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
    /// Decide from the tag class and the local image state.
    #[default]
    AutoDetect,
}

impl PullPolicy {
    pub const VALID: &'static [&'static str] = &["Always", "IfNotPresent", "Never", "AutoDetect"];

    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
            PullPolicy::AutoDetect => "AutoDetect",
        }
    }
}

impl std::fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PullPolicy {
    type Err = String;

    /// Case-insensitive; `if-not-present` and `if_not_present` are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "always" => Ok(PullPolicy::Always),
            "ifnotpresent" => Ok(PullPolicy::IfNotPresent),
            "never" => Ok(PullPolicy::Never),
            "autodetect" | "auto" => Ok(PullPolicy::AutoDetect),
            _ => Err(format!(
                "'{}' is not a pull policy (expected one of {})",
                s,
                Self::VALID.join(", ")
            )),
        }
    }
}

/// `name=value` pair. Names must match `^[A-Z][A-Z0-9_]*$`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path; relative paths resolve against the repository root.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Published port. Kept signed so out-of-range values reach validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(default)]
    pub host: i64,
    #[serde(default)]
    pub container: i64,
}

/// A container image plus the metadata needed to run it as a CLI plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extension {
    pub name: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub version: String,
    pub image: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub image_pull_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_local: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_remove_children: Option<bool>,
    #[serde(skip_serializing_if = "is_empty")]
    pub repo_url: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub docs_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(skip_serializing_if = "is_empty")]
    pub working_dir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    #[serde(skip_serializing_if = "is_empty")]
    pub network_mode: String,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub metadata_schema_version: String,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub memory_limit: String,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub cpu_limit: String,
}

impl Extension {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// The declared pull policy, if one is set and recognised.
    pub fn declared_pull_policy(&self) -> Option<PullPolicy> {
        if self.image_pull_policy.is_empty() {
            None
        } else {
            self.image_pull_policy.parse().ok()
        }
    }

    pub fn auto_remove_children(&self) -> bool {
        self.auto_remove_children.unwrap_or(false)
    }

    pub fn privileged(&self) -> bool {
        self.privileged.unwrap_or(false)
    }
}
