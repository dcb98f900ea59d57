//! Layered YAML configuration.
//!
//! A base file is discovered in the repository (see [`loader`]), override
//! files are merged on top of it with [`merge::merge_configs`], and the fully
//! merged result is validated once with [`validate::validate_config`].
//! The outcome is a [`ConfigStore`] that is handed to the components that
//! need it; there is no process-global configuration.

mod extension;
pub(crate) mod helpers;
pub mod loader;
pub mod merge;
mod settings;
pub mod validate;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use extension::{EnvVar, Extension, PortMapping, PullPolicy, VolumeMount};
pub use loader::{ConfigStore, load_config, merge_config_file};
pub use merge::{merge_configs, merge_extension};
pub use settings::{Defaults, Environment, RegistryAuthentication, RegistrySettings, SecretMapping};
pub use validate::validate_config;

use helpers::{is_empty, lenient_string};

/// Registry used when neither `registry.default` nor `defaults.registry` is set.
pub const DEFAULT_REGISTRY: &str = "ghcr.io";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Defaults>,
    #[serde(skip_serializing_if = "Environment::is_empty")]
    pub environment: Environment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<Extension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_local: Option<bool>,
}

impl Config {
    /// Look up an extension by its unique name.
    pub fn find_extension(&self, name: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.name == name)
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name.as_str()).collect()
    }

    /// Registry host used for authentication and tag lookups.
    pub fn registry_host(&self) -> &str {
        self.registry
            .as_ref()
            .map(|r| r.default.as_str())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.defaults
                    .as_ref()
                    .map(|d| d.registry.as_str())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or(DEFAULT_REGISTRY)
    }

    /// TTL for the registry tag cache.
    pub fn cache_ttl_seconds(&self) -> u64 {
        self.registry
            .as_ref()
            .map(|r| r.ghcr_cache_seconds)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_CACHE_TTL_SECS)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(
            self.registry
                .as_ref()
                .map(|r| r.timeout)
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_REGISTRY_TIMEOUT_SECS),
        )
    }

    pub fn retry_attempts(&self) -> u32 {
        self.registry
            .as_ref()
            .map(|r| r.retry_attempts)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS)
    }

    /// Whether every pull must authenticate (`registry.authentication.required`).
    pub fn auth_required(&self) -> bool {
        self.registry
            .as_ref()
            .and_then(|r| r.authentication.as_ref())
            .and_then(|a| a.required)
            .unwrap_or(false)
    }

    /// Extension policy, then `defaults.pull_policy`, then AutoDetect.
    pub fn effective_pull_policy(&self, ext: &Extension) -> PullPolicy {
        ext.declared_pull_policy()
            .or_else(|| {
                self.defaults
                    .as_ref()
                    .filter(|d| !d.pull_policy.is_empty())
                    .and_then(|d| d.pull_policy.parse().ok())
            })
            .unwrap_or_default()
    }

    /// Extension flag wins over the top-level `load_local`.
    pub fn effective_load_local(&self, ext: &Extension) -> bool {
        ext.load_local.or(self.load_local).unwrap_or(false)
    }

    pub fn effective_memory_limit<'a>(&'a self, ext: &'a Extension) -> Option<&'a str> {
        non_empty(&ext.memory_limit)
            .or_else(|| self.defaults.as_ref().and_then(|d| non_empty(&d.memory_limit)))
    }

    pub fn effective_cpu_limit<'a>(&'a self, ext: &'a Extension) -> Option<&'a str> {
        non_empty(&ext.cpu_limit)
            .or_else(|| self.defaults.as_ref().and_then(|d| non_empty(&d.cpu_limit)))
    }

    /// Global variables from `defaults.environment` then `environment.global`.
    pub fn global_env(&self) -> Vec<&EnvVar> {
        self.defaults
            .iter()
            .flat_map(|d| d.environment.iter())
            .chain(self.environment.global.iter())
            .collect()
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() { None } else { Some(s.trim()) }
}

/// Parse a memory limit such as `512MB` or `1.5gb` into bytes (1024-based).
pub fn parse_memory_limit(limit: &str) -> Option<i64> {
    let caps = validate::MEMORY_LIMIT_RE.captures(limit.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier: f64 = match caps.get(2)?.as_str().to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * multiplier).round() as i64)
}

/// Parse a CPU limit such as `1.5` into Docker NanoCPUs.
pub fn parse_cpu_limit(limit: &str) -> Option<i64> {
    let cpus: f64 = limit.trim().parse().ok()?;
    if cpus > 0.0 && cpus.is_finite() {
        Some((cpus * 1_000_000_000.0).round() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_yml::from_str(
            r#"
version: 1
registry:
  default: ghcr.io
  ghcr_cache_seconds: 600
defaults:
  pull_policy: IfNotPresent
  memory_limit: 512MB
  environment:
    - name: DEFAULT_ONE
      value: a
environment:
  global:
    - name: GLOBAL_ONE
      value: b
extensions:
  - name: pwsh
    image: ghcr.io/org/pwsh:v1.0.0
  - name: go
    image: ghcr.io/org/go:latest
    image_pull_policy: Always
    load_local: false
    memory_limit: 2GB
load_local: true
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_effective_values() {
        let config = sample();
        let pwsh = config.find_extension("pwsh").unwrap();
        let go = config.find_extension("go").unwrap();

        assert_eq!(config.version, "1");
        assert_eq!(config.cache_ttl_seconds(), 600);
        assert_eq!(config.effective_pull_policy(pwsh), PullPolicy::IfNotPresent);
        assert_eq!(config.effective_pull_policy(go), PullPolicy::Always);
        assert!(config.effective_load_local(pwsh));
        assert!(!config.effective_load_local(go));
        assert_eq!(config.effective_memory_limit(pwsh), Some("512MB"));
        assert_eq!(config.effective_memory_limit(go), Some("2GB"));
        assert_eq!(config.effective_cpu_limit(go), None);

        let names: Vec<&str> = config.global_env().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["DEFAULT_ONE", "GLOBAL_ONE"]);
    }

    #[test]
    fn test_fallback_defaults() {
        let config = Config::default();
        assert_eq!(config.registry_host(), DEFAULT_REGISTRY);
        assert_eq!(config.cache_ttl_seconds(), 300);
        assert_eq!(config.retry_attempts(), 3);
        assert!(!config.auth_required());
        let ext = Extension::new("x", "alpine");
        assert_eq!(config.effective_pull_policy(&ext), PullPolicy::AutoDetect);
        assert!(!config.effective_load_local(&ext));
    }

    #[test]
    fn test_parse_limits() {
        assert_eq!(parse_memory_limit("512MB"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1.5gb"), Some(1_610_612_736));
        assert_eq!(parse_memory_limit("100 B"), Some(100));
        assert_eq!(parse_memory_limit("12XB"), None);
        assert_eq!(parse_cpu_limit("1.5"), Some(1_500_000_000));
        assert_eq!(parse_cpu_limit("0"), None);
        assert_eq!(parse_cpu_limit("-1"), None);
    }
}
