//! Registry credential resolution.
//!
//! Order: `GITHUB_TOKEN`/`GITHUB_USERNAME` (or the names configured under
//! `registry.authentication`), then the GitHub CLI. A token without a
//! username gets the `github-actions` user, which GHCR accepts for tokens.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::config::Config;
use crate::registry::BasicCredentials;

pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const DEFAULT_USERNAME_ENV: &str = "GITHUB_USERNAME";
/// Username paired with a token when none is known.
pub const FALLBACK_USERNAME: &str = "github-actions";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(
        "No registry credentials found. Set GITHUB_TOKEN (and optionally GITHUB_USERNAME) \
         or run `gh auth login`."
    )]
    NoCredentials,

    #[error("GitHub CLI failed: {0}")]
    GhCli(String),
}

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    GhCli,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub token: SecretString,
    pub source: CredentialSource,
}

impl Credentials {
    /// Credentials in the form the Docker daemon expects for a pull.
    pub fn docker_credentials(&self, server: &str) -> bollard::auth::DockerCredentials {
        bollard::auth::DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.token.expose_secret().to_string()),
            serveraddress: Some(server.to_string()),
            ..Default::default()
        }
    }

    pub fn basic(&self) -> BasicCredentials {
        BasicCredentials {
            username: self.username.clone(),
            password: self.token.clone(),
        }
    }
}

/// The subset of the GitHub CLI used for credential lookup.
#[async_trait]
pub trait GhCli: Send + Sync {
    /// Output of `gh auth token`, trimmed; `None` when unavailable.
    async fn auth_token(&self) -> Option<String>;
    /// Combined output of `gh auth status`.
    async fn auth_status(&self) -> Option<String>;
}

/// Runs the real `gh` binary.
pub struct SystemGhCli;

impl SystemGhCli {
    async fn run(args: &[&str]) -> Result<std::process::Output, AuthError> {
        tokio::process::Command::new("gh")
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| AuthError::GhCli(e.to_string()))
    }
}

#[async_trait]
impl GhCli for SystemGhCli {
    async fn auth_token(&self) -> Option<String> {
        match Self::run(&["auth", "token"]).await {
            Ok(out) if out.status.success() => {
                let token = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!token.is_empty()).then_some(token)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("{}", e);
                None
            }
        }
    }

    async fn auth_status(&self) -> Option<String> {
        // gh prints status to stderr on older versions.
        let out = Self::run(&["auth", "status"]).await.ok()?;
        let mut text = String::from_utf8_lossy(&out.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        Some(text)
    }
}

pub struct AuthResolver {
    gh: Arc<dyn GhCli>,
    token_env: String,
    username_env: String,
}

impl AuthResolver {
    pub fn new(gh: Arc<dyn GhCli>) -> Self {
        Self {
            gh,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            username_env: DEFAULT_USERNAME_ENV.to_string(),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemGhCli))
    }

    /// System resolver reading the variables named in `registry.authentication`.
    pub fn for_config(config: &Config) -> Self {
        match config.registry.as_ref().and_then(|r| r.authentication.as_ref()) {
            Some(a) => Self::system().with_env_names(&a.token_env, &a.username_env),
            None => Self::system(),
        }
    }

    /// Read the token/username from differently named variables. Empty names
    /// keep the defaults.
    pub fn with_env_names(mut self, token_env: &str, username_env: &str) -> Self {
        if !token_env.is_empty() {
            self.token_env = token_env.to_string();
        }
        if !username_env.is_empty() {
            self.username_env = username_env.to_string();
        }
        self
    }

    pub async fn resolve(&self) -> Result<Credentials, AuthError> {
        self.resolve_from(|name| std::env::var(name).ok()).await
    }

    /// Resolve using `lookup` in place of the process environment.
    pub async fn resolve_from<F>(&self, lookup: F) -> Result<Credentials, AuthError>
    where
        F: Fn(&str) -> Option<String> + Send + Sync,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(&self.token_env) {
            let username =
                non_empty(&self.username_env).unwrap_or_else(|| FALLBACK_USERNAME.to_string());
            tracing::debug!("Using registry credentials from {}", self.token_env);
            return Ok(Credentials {
                username,
                token: SecretString::from(token),
                source: CredentialSource::Environment,
            });
        }

        let Some(token) = self.gh.auth_token().await else {
            return Err(AuthError::NoCredentials);
        };
        let username = match non_empty(&self.username_env) {
            Some(u) => u,
            None => self
                .gh
                .auth_status()
                .await
                .as_deref()
                .and_then(parse_gh_username)
                .unwrap_or_else(|| FALLBACK_USERNAME.to_string()),
        };
        tracing::debug!("Using registry credentials from gh CLI for {}", username);
        Ok(Credentials {
            username,
            token: SecretString::from(token),
            source: CredentialSource::GhCli,
        })
    }
}

/// Extract the account from `gh auth status` output.
///
/// Handles both `... account octocat (keyring)` and the older
/// `Logged in to github.com as octocat (...)`.
pub fn parse_gh_username(status: &str) -> Option<String> {
    for line in status.lines() {
        for marker in [" account ", " as "] {
            if let Some(idx) = line.find(marker) {
                let name = line[idx + marker.len()..]
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .trim_matches(|c: char| c == '(' || c == ')');
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}
