//! Container environment construction.
//!
//! Layers are applied in order; a later layer overwrites an earlier one:
//!
//! 1. repository root variables
//! 2. terminal geometry
//! 3. CI defaults, or inherited/synthesized color variables
//! 4. global variables from the config
//! 5. mapped secrets
//! 6. GitHub credentials present on the host
//! 7. extension variables

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{Config, Extension};
use crate::terminal::TerminalSize;

/// Repository mount point inside every container.
pub const CONTAINER_REPO_ROOT: &str = "/var/task";

/// Variables whose presence marks a CI run.
pub const CI_ENV_VARS: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TF_BUILD",
    "TEAMCITY_VERSION",
    "BITBUCKET_BUILD_NUMBER",
    "DRONE",
    "APPVEYOR",
    "CODEBUILD_BUILD_ID",
];

pub const COLOR_ENV_VARS: &[&str] = &[
    "TERM",
    "COLORTERM",
    "CLICOLOR",
    "CLICOLOR_FORCE",
    "NO_COLOR",
    "FORCE_COLOR",
    "COLOR",
];

const GITHUB_ENV_VARS: &[&str] = &["GITHUB_TOKEN", "GITHUB_USERNAME"];

/// Whether the environment seen through `lookup` is a CI run.
pub fn detect_ci(lookup: &dyn Fn(&str) -> Option<String>) -> bool {
    CI_ENV_VARS.iter().any(|name| match lookup(name) {
        Some(v) if *name == "CI" || *name == "CONTINUOUS_INTEGRATION" => {
            crate::session::is_truthy(&v)
        }
        Some(v) => !v.is_empty(),
        None => false,
    })
}

/// CI detection against the process environment.
pub fn is_ci() -> bool {
    detect_ci(&|name| std::env::var(name).ok())
}

/// Inputs for one container's environment.
pub struct EnvContext<'a> {
    pub config: &'a Config,
    pub extension: &'a Extension,
    pub repo_root: &'a Path,
    pub terminal: TerminalSize,
}

/// Ordered environment being assembled.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContainerEnv {
    vars: BTreeMap<String, String>,
}

impl ContainerEnv {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `NAME=value` strings for the Docker API.
    pub fn to_docker(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Build the environment from the process environment.
pub fn build_env(ctx: &EnvContext<'_>) -> ContainerEnv {
    build_env_with(ctx, &|name| std::env::var(name).ok())
}

/// Build the environment reading host variables through `lookup`.
pub fn build_env_with(ctx: &EnvContext<'_>, lookup: &dyn Fn(&str) -> Option<String>) -> ContainerEnv {
    let mut env = ContainerEnv::default();

    env.set("R2R_CONTAINER_REPOROOT", CONTAINER_REPO_ROOT);
    env.set("R2R_HOST_REPOROOT", ctx.repo_root.to_string_lossy());
    env.set("R2R_EXTENSION", &ctx.extension.name);

    env.set("COLUMNS", ctx.terminal.columns.to_string());
    env.set("LINES", ctx.terminal.lines.to_string());
    env.set("R2R_TERMINAL_SIZE_SOURCE", ctx.terminal.source.as_str());

    if detect_ci(lookup) {
        env.set("NO_COLOR", "1");
        env.set("TERM", "dumb");
        env.set("FORCE_COLOR", "0");
        env.set("CI", "true");
    } else {
        let mut inherited = false;
        for name in COLOR_ENV_VARS {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                env.set(*name, value);
                inherited = true;
            }
        }
        if !inherited {
            env.set("TERM", "xterm-256color");
            env.set("COLORTERM", "truecolor");
        }
    }

    for var in ctx.config.global_env() {
        env.set(&var.name, &var.value);
    }

    for secret in &ctx.config.environment.secrets {
        let source = if secret.env.is_empty() { &secret.name } else { &secret.env };
        if let Some(value) = lookup(source) {
            env.set(&secret.name, value);
        }
    }

    for name in GITHUB_ENV_VARS {
        if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
            env.set(*name, value);
        }
    }

    for var in &ctx.extension.env {
        env.set(&var.name, &var.value);
    }

    env
}
