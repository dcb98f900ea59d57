//! Structured configuration errors.
//!
//! Config failures carry a kind, the file involved, the underlying cause and a
//! human suggestion, and render as multi-line text for the terminal.
//! Validation failures aggregate every issue found in one error.

use std::path::{Path, PathBuf};

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of a configuration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    RepositoryNotFound,
    ConfigFileNotFound,
    ConfigFilePermission,
    YamlParse,
    YamlUnmarshal,
    Validation,
}

impl ConfigErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigErrorKind::RepositoryNotFound => "RepositoryNotFound",
            ConfigErrorKind::ConfigFileNotFound => "ConfigFileNotFound",
            ConfigErrorKind::ConfigFilePermission => "ConfigFilePermission",
            ConfigErrorKind::YamlParse => "YAMLParseError",
            ConfigErrorKind::YamlUnmarshal => "YAMLUnmarshalError",
            ConfigErrorKind::Validation => "ValidationError",
        }
    }
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One violation found while validating a merged configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, e.g. `extensions[pwsh].image`.
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error raised while locating, reading, parsing or validating configuration.
#[derive(Debug, thiserror::Error)]
#[error("{}", render(self))]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    pub file: Option<PathBuf>,
    #[source]
    pub cause: Option<Cause>,
    pub suggestion: Option<String>,
    /// Populated only for `ConfigErrorKind::Validation`.
    pub issues: Vec<ValidationIssue>,
}

impl ConfigError {
    fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            cause: None,
            suggestion: None,
            issues: Vec::new(),
        }
    }

    fn with_file(mut self, file: &Path) -> Self {
        self.file = Some(file.to_path_buf());
        self
    }

    fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn repository_not_found(start: &Path) -> Self {
        Self::new(
            ConfigErrorKind::RepositoryNotFound,
            format!(
                "no git repository found at or above {}",
                start.display()
            ),
        )
        .with_suggestion("Run r2r from inside a git repository (a directory tree containing .git).")
    }

    pub fn file_not_found(path: &Path) -> Self {
        Self::new(ConfigErrorKind::ConfigFileNotFound, "configuration file not found")
            .with_file(path)
            .with_suggestion(
                "Create .r2r/r2r-cli.yml in the repository root, or point R2R_CONFIG_PATH at an existing file.",
            )
    }

    pub fn no_candidates(dir: &Path, tried: &[PathBuf]) -> Self {
        let names: Vec<String> = tried
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        Self::new(
            ConfigErrorKind::ConfigFileNotFound,
            format!("no readable configuration file (tried {})", names.join(", ")),
        )
        .with_file(dir)
        .with_suggestion(
            "Create .r2r/r2r-cli.yml in the repository root, or point R2R_CONFIG_PATH at an existing file.",
        )
    }

    pub fn permission(path: &Path, cause: std::io::Error) -> Self {
        Self::new(
            ConfigErrorKind::ConfigFilePermission,
            "configuration file is not readable",
        )
        .with_file(path)
        .with_cause(cause)
        .with_suggestion("Check the file permissions, e.g. chmod 644 on the configuration file.")
    }

    pub fn io(path: &Path, cause: std::io::Error) -> Self {
        match cause.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path).with_cause(cause),
            std::io::ErrorKind::PermissionDenied => Self::permission(path, cause),
            _ => Self::new(
                ConfigErrorKind::ConfigFileNotFound,
                "configuration file could not be read",
            )
            .with_file(path)
            .with_cause(cause),
        }
    }

    pub fn yaml_parse(path: &Path, cause: serde_yml::Error) -> Self {
        let suggestion = yaml_suggestion(&cause.to_string());
        Self::new(ConfigErrorKind::YamlParse, "invalid YAML syntax")
            .with_file(path)
            .with_cause(cause)
            .with_suggestion(suggestion)
    }

    pub fn yaml_unmarshal(path: &Path, cause: serde_yml::Error) -> Self {
        let suggestion = yaml_suggestion(&cause.to_string());
        Self::new(
            ConfigErrorKind::YamlUnmarshal,
            "YAML does not match the configuration schema",
        )
        .with_file(path)
        .with_cause(cause)
        .with_suggestion(suggestion)
    }

    pub fn validation(file: Option<&Path>, issues: Vec<ValidationIssue>) -> Self {
        let mut err = Self::new(
            ConfigErrorKind::Validation,
            format!("configuration has {} validation error(s)", issues.len()),
        )
        .with_suggestion("Fix the listed fields and run `r2r validate` again.");
        err.file = file.map(Path::to_path_buf);
        err.issues = issues;
        err
    }

    pub fn is_kind(&self, kind: ConfigErrorKind) -> bool {
        self.kind == kind
    }
}

/// Multi-line terminal rendering of a [`ConfigError`].
fn render(err: &ConfigError) -> String {
    let mut text = format!("{}: {}", err.kind, err.message);
    if let Some(file) = &err.file {
        text.push_str(&format!("\n  file: {}", file.display()));
    }
    if let Some(cause) = &err.cause {
        text.push_str(&format!("\n  cause: {}", cause));
    }
    for issue in &err.issues {
        text.push_str(&format!("\n  - {}", issue));
    }
    if let Some(suggestion) = &err.suggestion {
        text.push_str(&format!("\n  suggestion: {}", suggestion));
    }
    text
}

/// Pick a hint for a YAML error message.
pub(crate) fn yaml_suggestion(message: &str) -> String {
    let lower = message.to_ascii_lowercase();
    if lower.contains("mapping values are not allowed")
        || lower.contains("did not find expected")
        || lower.contains("indent")
    {
        "Check indentation: nested keys must line up and be indented with spaces.".to_string()
    } else if lower.contains("cannot start any token")
        || lower.contains("invalid character")
        || lower.contains("control character")
        || lower.contains("tab")
    {
        "Remove invalid characters (tabs are not allowed); quote values containing ':', '#', '@' or '`'."
            .to_string()
    } else if lower.contains("expected a map")
        || lower.contains("expected struct")
        || lower.contains("expected a sequence")
        || lower.contains("invalid type")
        || lower.contains("mapping")
    {
        "Check the structure: a field has the wrong shape (list vs. mapping vs. scalar).".to_string()
    } else {
        "Check the YAML syntax with a linter such as yamllint.".to_string()
    }
}
