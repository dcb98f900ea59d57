//! Container registry lookups: reference parsing, tag listing and the
//! session cache that keeps them cheap.

pub mod cache;
pub mod client;
pub mod reference;
pub mod tags;

pub use cache::{CachedTags, RegistryCache};
pub use client::{BasicCredentials, ImageTags, RegistryClient};
pub use reference::{ImageReference, TagClass, has_latest_tag, split_image_reference};
pub use tags::{PinSuggester, TagResolver, latest_semver_tag, pin_suggestion};

use thiserror::Error;

/// Errors talking to a container registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The request never produced a response.
    #[error("Registry request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The registry answered with a non-success status.
    #[error("Registry returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The body could not be decoded.
    #[error("Invalid registry response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

impl RegistryError {
    /// True for 401/403 responses.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_classification() {
        let err = RegistryError::Status {
            url: "https://ghcr.io/token".to_string(),
            status: 401,
        };
        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "Registry returned HTTP 401 for https://ghcr.io/token");

        let err = RegistryError::Status {
            url: "x".to_string(),
            status: 500,
        };
        assert!(!err.is_unauthorized());
    }
}
