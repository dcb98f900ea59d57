//! Error types for container operations.

use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthError;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    /// The daemon could not be reached.
    #[error("Docker not available: {reason}\n  {hint}")]
    DockerNotAvailable {
        reason: String,
        /// Platform-specific remedy.
        hint: String,
    },

    #[error("Image '{image}' is not present locally and the pull policy is Never")]
    ImageNotPresent { image: String },

    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Registry authentication required to pull '{image}': {source}")]
    AuthRequired {
        image: String,
        #[source]
        source: AuthError,
    },

    #[error("Failed to inspect image '{image}': {reason}")]
    ImageInspectFailed { image: String, reason: String },

    #[error("Failed to create container '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to start container '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Failed to attach to container '{name}': {reason}")]
    AttachFailed { name: String, reason: String },

    #[error("Failed waiting for container '{name}': {reason}")]
    WaitFailed { name: String, reason: String },

    #[error("Failed to stop container '{name}': {reason}")]
    StopFailed { name: String, reason: String },

    #[error("Failed to list containers: {reason}")]
    ListFailed { reason: String },

    #[error("Failed to remove container '{name}': {reason}")]
    RemoveFailed { name: String, reason: String },

    #[error("Metadata command for '{extension}' timed out after {timeout:?}")]
    MetadataTimeout { extension: String, timeout: Duration },

    #[error("{}", metadata_failure(.extension, .code, .stderr))]
    MetadataFailed {
        extension: String,
        code: i64,
        stderr: String,
    },

    #[error("Extension '{0}' not found in configuration")]
    ExtensionNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn metadata_failure(extension: &str, code: &i64, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("Metadata command for '{}' failed with exit code {}", extension, code)
    } else {
        format!(
            "Metadata command for '{}' failed with exit code {}: {}",
            extension, code, stderr
        )
    }
}

impl ContainerError {
    /// True when the failure is the daemon being unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::DockerNotAvailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_failure_message() {
        let err = ContainerError::MetadataFailed {
            extension: "go".to_string(),
            code: 127,
            stderr: "sh: extension-meta: not found\n".to_string(),
        };
        insta::assert_snapshot!(
            err.to_string(),
            @"Metadata command for 'go' failed with exit code 127: sh: extension-meta: not found"
        );

        let err = ContainerError::MetadataFailed {
            extension: "go".to_string(),
            code: 2,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Metadata command for 'go' failed with exit code 2");
    }

    #[test]
    fn test_connectivity_classification() {
        let err = ContainerError::DockerNotAvailable {
            reason: "connection refused".to_string(),
            hint: "Start Docker Desktop".to_string(),
        };
        assert!(err.is_connectivity());
        assert!(err.to_string().contains("Start Docker Desktop"));
        assert!(!ContainerError::ExtensionNotFound("x".to_string()).is_connectivity());
    }
}
