//! Registry, defaults and environment sections of the configuration.

use serde::{Deserialize, Serialize};

use crate::config::extension::EnvVar;
use crate::config::helpers::{is_empty, lenient_string};

/// `registry.authentication`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuthentication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Host variable holding the registry username.
    #[serde(skip_serializing_if = "is_empty")]
    pub username_env: String,
    /// Host variable holding the registry token.
    #[serde(skip_serializing_if = "is_empty")]
    pub token_env: String,
}

/// `registry`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Default registry host, e.g. `ghcr.io`.
    #[serde(skip_serializing_if = "is_empty")]
    pub default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<RegistryAuthentication>,
    /// Request timeout in seconds.
    pub timeout: u64,
    pub retry_attempts: u32,
    /// TTL of the registry tag cache, in seconds.
    pub ghcr_cache_seconds: u64,
}

/// `defaults`: values applied to every extension unless it sets its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    #[serde(skip_serializing_if = "is_empty")]
    pub registry: String,
    #[serde(skip_serializing_if = "is_empty")]
    pub pull_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_after: Option<bool>,
    /// Run timeout in seconds.
    pub timeout: u64,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub memory_limit: String,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub cpu_limit: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
}

/// Maps a host environment variable (`env`) into containers as `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMapping {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub env: String,
}

/// `environment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub global: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretMapping>,
}

impl Environment {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.secrets.is_empty()
    }
}
