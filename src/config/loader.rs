//! Config discovery, loading and layering.
//!
//! The base file is the first existing, readable candidate of:
//!
//! 1. `R2R_CONFIG_PATH` (absolute, or relative to the repository root)
//! 2. `.r2r/r2r-cli.local.yml`
//! 3. `.r2r/r2r-cli.personal.yml`
//! 4. `.r2r/r2r-cli.dev.yml`
//! 5. `.r2r/r2r-cli.<os-username>.yml`
//! 6. `.r2r/r2r-cli.yml`
//!
//! The repository root is the nearest ancestor directory containing `.git`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::validate::validate_config_file;
use crate::config::{Config, Extension, merge_configs};
use crate::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "R2R_CONFIG_PATH";
/// Directory (relative to the repository root) holding config files.
pub const CONFIG_DIR: &str = ".r2r";
/// Base name of config files.
pub const CONFIG_NAME: &str = "r2r-cli";

/// A loaded and merged configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config: Config,
    repo_root: PathBuf,
    sources: Vec<PathBuf>,
}

impl ConfigStore {
    /// Discover the repository from the current directory and load its
    /// config, validated on its own.
    ///
    /// An explicit `path` bypasses discovery.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let store = Self::discover(path)?;
        store.validate()?;
        Ok(store)
    }

    /// Load with every input explicit (used by `load` and by tests),
    /// validated on its own.
    pub fn load_from(
        repo_root: PathBuf,
        path: Option<&Path>,
        env_path: Option<&str>,
        username: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let store = Self::discover_from(repo_root, path, env_path, username)?;
        store.validate()?;
        Ok(store)
    }

    /// Discover and parse the base file without validating it, so override
    /// layers can still complete it. Call [`ConfigStore::validate`] once the
    /// last layer is merged.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::io(Path::new("."), e))?;
        let repo_root = find_repository_root(&cwd)?;
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty());
        Self::discover_from(repo_root, path, env_path.as_deref(), current_username().as_deref())
    }

    /// [`ConfigStore::discover`] with every input explicit.
    pub fn discover_from(
        repo_root: PathBuf,
        path: Option<&Path>,
        env_path: Option<&str>,
        username: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::file_not_found(p));
                }
                p.to_path_buf()
            }
            None => discover_config_file(&repo_root, env_path, username)?,
        };

        let config = read_config_file(&file)?;

        tracing::debug!("Loaded configuration from {}", file.display());

        Ok(Self {
            config,
            repo_root,
            sources: vec![file],
        })
    }

    /// Wrap an in-memory configuration, validating it.
    pub fn from_config(config: Config, repo_root: PathBuf) -> Result<Self, ConfigError> {
        validate_config_file(&config, None)?;
        Ok(Self {
            config,
            repo_root,
            sources: Vec::new(),
        })
    }

    /// Merge an override file on top of the current configuration.
    ///
    /// Neither the override nor the result is validated here; layers may be
    /// partial. A file that fails to read or parse leaves the store unchanged.
    pub fn merge_config_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let overlay = read_config_file(path)?;
        self.config = merge_configs(&self.config, &overlay);
        self.sources.push(path.to_path_buf());

        tracing::debug!("Merged configuration override {}", path.display());
        Ok(())
    }

    /// Validate the merged configuration, reporting the last merged file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_config_file(&self.config, self.sources.last().map(PathBuf::as_path))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Files merged into this store, base first.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn find_extension(&self, name: &str) -> Option<&Extension> {
        self.config.find_extension(name)
    }

    /// Snapshot of the configuration for sharing with long-lived components.
    pub fn shared(&self) -> Arc<Config> {
        Arc::new(self.config.clone())
    }
}

/// Load the base configuration, merge `overrides` on top in order and
/// validate the result once.
pub fn load_config(path: Option<&Path>, overrides: &[PathBuf]) -> Result<ConfigStore, ConfigError> {
    let mut store = ConfigStore::discover(path)?;
    for layer in overrides {
        store.merge_config_file(layer)?;
    }
    store.validate()?;
    Ok(store)
}

/// Merge an override file into `store`; validate with [`ConfigStore::validate`].
pub fn merge_config_file(store: &mut ConfigStore, path: &Path) -> Result<(), ConfigError> {
    store.merge_config_file(path)
}

/// Walk up from `start` to the nearest directory containing `.git`.
pub fn find_repository_root(start: &Path) -> Result<PathBuf, ConfigError> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| ConfigError::repository_not_found(start))
}

/// Candidate base files in priority order (excluding `R2R_CONFIG_PATH`).
pub fn candidate_files(repo_root: &Path, username: Option<&str>) -> Vec<PathBuf> {
    let dir = repo_root.join(CONFIG_DIR);
    let mut names = vec![
        format!("{}.local.yml", CONFIG_NAME),
        format!("{}.personal.yml", CONFIG_NAME),
        format!("{}.dev.yml", CONFIG_NAME),
    ];
    if let Some(user) = username.filter(|u| !u.is_empty()) {
        names.push(format!("{}.{}.yml", CONFIG_NAME, user));
    }
    names.push(format!("{}.yml", CONFIG_NAME));
    names.into_iter().map(|n| dir.join(n)).collect()
}

/// Pick the base configuration file.
///
/// An explicit `env_path` that does not exist is an error; it never falls
/// through to the other candidates.
pub fn discover_config_file(
    repo_root: &Path,
    env_path: Option<&str>,
    username: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    if let Some(raw) = env_path {
        let path = Path::new(raw);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            repo_root.join(path)
        };
        if !resolved.is_file() {
            return Err(ConfigError::file_not_found(&resolved));
        }
        return Ok(resolved);
    }

    let candidates = candidate_files(repo_root, username);
    candidates
        .iter()
        .find(|p| is_readable_file(p))
        .cloned()
        .ok_or_else(|| ConfigError::no_candidates(&repo_root.join(CONFIG_DIR), &candidates))
}

/// Read and parse one file without validating it.
pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    parse_config(&text, path)
}

/// Two-phase parse: YAML syntax first, then the typed schema.
pub(crate) fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let value: serde_yml::Value =
        serde_yml::from_str(text).map_err(|e| ConfigError::yaml_parse(path, e))?;
    if value.is_null() {
        return Ok(Config::default());
    }
    serde_yml::from_value(value).map_err(|e| ConfigError::yaml_unmarshal(path, e))
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

fn current_username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}
