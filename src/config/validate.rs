//! Aggregate validation of a fully merged configuration.
//!
//! Every rule runs and every violation is reported; validation never stops at
//! the first problem. Override files are not validated on their own since a
//! partial layer is only meaningful once merged.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Config, EnvVar, Extension, PortMapping, PullPolicy};
use crate::error::{ConfigError, ValidationIssue};

/// Docker image reference: optional registry (`localhost`, a dotted host or
/// `host:port`), lowercase path components, optional tag, optional digest.
pub(crate) static IMAGE_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?:localhost(?::[0-9]+)?",
        r"|[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+(?::[0-9]+)?",
        r"|[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?:[0-9]+)/)?",
        r"[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*",
        r"(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*",
        r"(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?",
        r"(?:@sha256:[a-f0-9]{64})?$",
    ))
    .expect("image reference pattern is valid")
});

static ENV_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("env name pattern is valid"));

pub(crate) static MEMORY_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9]+(?:\.[0-9]+)?)\s*(B|KB|MB|GB)$").expect("memory pattern is valid")
});

static CPU_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(?:\.[0-9]+)?$").expect("cpu pattern is valid"));

static REGISTRY_HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]{1,5})?$",
    )
    .expect("registry host pattern is valid")
});

const NETWORK_MODES: &[&str] = &["bridge", "host", "none", "default"];

/// Validate `config`, returning a single aggregated `ValidationError`.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_config_file(config, None)
}

/// Same as [`validate_config`], attributing failures to `file`.
pub fn validate_config_file(config: &Config, file: Option<&Path>) -> Result<(), ConfigError> {
    let issues = collect_issues(config);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::validation(file, issues))
    }
}

/// Run every rule and return all violations.
pub fn collect_issues(config: &Config) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if let Some(registry) = &config.registry {
        if !registry.default.is_empty() && !is_valid_registry_host(&registry.default) {
            issues.push(ValidationIssue::new(
                "registry.default",
                format!("'{}' is not a valid registry hostname", registry.default),
            ));
        }
        if let Some(auth) = &registry.authentication {
            for (field, name) in [
                ("registry.authentication.username_env", &auth.username_env),
                ("registry.authentication.token_env", &auth.token_env),
            ] {
                if !name.is_empty() && !ENV_NAME_RE.is_match(name) {
                    issues.push(ValidationIssue::new(
                        field,
                        format!("'{}' is not a valid environment variable name", name),
                    ));
                }
            }
        }
    }

    if let Some(defaults) = &config.defaults {
        if !defaults.registry.is_empty() && !is_valid_registry_host(&defaults.registry) {
            issues.push(ValidationIssue::new(
                "defaults.registry",
                format!("'{}' is not a valid registry hostname", defaults.registry),
            ));
        }
        check_pull_policy(&mut issues, "defaults.pull_policy", &defaults.pull_policy);
        check_memory_limit(&mut issues, "defaults.memory_limit", &defaults.memory_limit);
        check_cpu_limit(&mut issues, "defaults.cpu_limit", &defaults.cpu_limit);
        check_env_vars(&mut issues, "defaults.environment", &defaults.environment);
    }

    check_env_vars(&mut issues, "environment.global", &config.environment.global);
    let mut secret_names = HashSet::new();
    for (i, secret) in config.environment.secrets.iter().enumerate() {
        let field = format!("environment.secrets[{}]", i);
        check_env_name(&mut issues, &format!("{}.name", field), &secret.name);
        if !secret.name.is_empty() && !secret_names.insert(secret.name.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{}.name", field),
                format!("duplicate secret name '{}'", secret.name),
            ));
        }
        if secret.env.is_empty() {
            issues.push(ValidationIssue::new(
                format!("{}.env", field),
                "host environment variable is required",
            ));
        }
    }

    let mut names = HashSet::new();
    for (i, ext) in config.extensions.iter().enumerate() {
        let label = if ext.name.is_empty() {
            format!("extensions[{}]", i)
        } else {
            format!("extensions[{}]", ext.name)
        };
        if !ext.name.is_empty() && !names.insert(ext.name.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{}.name", label),
                format!("duplicate extension name '{}'", ext.name),
            ));
        }
        validate_extension(&mut issues, &label, ext);
    }

    issues
}

fn validate_extension(issues: &mut Vec<ValidationIssue>, label: &str, ext: &Extension) {
    if ext.name.trim().is_empty() {
        issues.push(ValidationIssue::new(format!("{}.name", label), "is required"));
    }

    if ext.image.trim().is_empty() {
        issues.push(ValidationIssue::new(format!("{}.image", label), "is required"));
    } else if !is_valid_image_reference(&ext.image) {
        issues.push(ValidationIssue::new(
            format!("{}.image", label),
            format!("'{}' is not a valid image reference", ext.image),
        ));
    }

    check_pull_policy(
        issues,
        &format!("{}.image_pull_policy", label),
        &ext.image_pull_policy,
    );

    if !ext.network_mode.is_empty() && !is_valid_network_mode(&ext.network_mode) {
        issues.push(ValidationIssue::new(
            format!("{}.network_mode", label),
            format!(
                "'{}' is not a network mode (expected {} or container:<name>)",
                ext.network_mode,
                NETWORK_MODES.join(", ")
            ),
        ));
    }

    for (field, value) in [("repo_url", &ext.repo_url), ("docs_url", &ext.docs_url)] {
        if !value.is_empty() && !is_valid_url(value) {
            issues.push(ValidationIssue::new(
                format!("{}.{}", label, field),
                format!("'{}' is not a valid http(s) URL", value),
            ));
        }
    }

    check_env_vars(issues, &format!("{}.env", label), &ext.env);
    check_memory_limit(issues, &format!("{}.memory_limit", label), &ext.memory_limit);
    check_cpu_limit(issues, &format!("{}.cpu_limit", label), &ext.cpu_limit);

    for (i, port) in ext.ports.iter().enumerate() {
        check_port(issues, &format!("{}.ports[{}]", label, i), port);
    }

    for (i, volume) in ext.volumes.iter().enumerate() {
        if volume.host.is_empty() || volume.container.is_empty() {
            issues.push(ValidationIssue::new(
                format!("{}.volumes[{}]", label, i),
                "both host and container paths are required",
            ));
        } else if !volume.container.starts_with('/') {
            issues.push(ValidationIssue::new(
                format!("{}.volumes[{}].container", label, i),
                "container path must be absolute",
            ));
        }
    }
}

fn check_pull_policy(issues: &mut Vec<ValidationIssue>, field: &str, value: &str) {
    if !value.is_empty()
        && let Err(message) = value.parse::<PullPolicy>()
    {
        issues.push(ValidationIssue::new(field, message));
    }
}

fn check_env_vars(issues: &mut Vec<ValidationIssue>, scope: &str, vars: &[EnvVar]) {
    let mut seen = HashSet::new();
    for (i, var) in vars.iter().enumerate() {
        let field = format!("{}[{}].name", scope, i);
        check_env_name(issues, &field, &var.name);
        if !var.name.is_empty() && !seen.insert(var.name.as_str()) {
            issues.push(ValidationIssue::new(
                field,
                format!("duplicate variable '{}' in {}", var.name, scope),
            ));
        }
    }
}

fn check_env_name(issues: &mut Vec<ValidationIssue>, field: &str, name: &str) {
    if name.is_empty() {
        issues.push(ValidationIssue::new(field, "is required"));
    } else if !ENV_NAME_RE.is_match(name) {
        issues.push(ValidationIssue::new(
            field,
            format!("'{}' must match ^[A-Z][A-Z0-9_]*$", name),
        ));
    }
}

fn check_memory_limit(issues: &mut Vec<ValidationIssue>, field: &str, value: &str) {
    if !value.is_empty() && !MEMORY_LIMIT_RE.is_match(value.trim()) {
        issues.push(ValidationIssue::new(
            field,
            format!("'{}' must be a number followed by B, KB, MB or GB", value),
        ));
    }
}

fn check_cpu_limit(issues: &mut Vec<ValidationIssue>, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let positive = CPU_LIMIT_RE.is_match(value.trim())
        && value.trim().parse::<f64>().is_ok_and(|v| v > 0.0);
    if !positive {
        issues.push(ValidationIssue::new(
            field,
            format!("'{}' must be a positive decimal number", value),
        ));
    }
}

fn check_port(issues: &mut Vec<ValidationIssue>, field: &str, port: &PortMapping) {
    for (side, value) in [("host", port.host), ("container", port.container)] {
        if !(1..=65535).contains(&value) {
            issues.push(ValidationIssue::new(
                format!("{}.{}", field, side),
                format!("{} is outside the port range 1-65535", value),
            ));
        }
    }
}

pub fn is_valid_image_reference(image: &str) -> bool {
    image.len() <= 255 && IMAGE_REFERENCE_RE.is_match(image)
}

pub fn is_valid_registry_host(host: &str) -> bool {
    REGISTRY_HOST_RE.is_match(host)
}

fn is_valid_network_mode(mode: &str) -> bool {
    NETWORK_MODES.contains(&mode)
        || mode
            .strip_prefix("container:")
            .is_some_and(|name| !name.is_empty())
}

fn is_valid_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
