//! Policy on unpinned extension images.
//!
//! `latest`, `main`, `master` and implicit tags make runs irreproducible. In
//! CI every such extension is reported in one fatal error together with a
//! suggested pin; on a workstation a single warning is shown per session.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::registry::{PinSuggester, has_latest_tag};
use crate::session::{SessionMarker, testing_mode};

/// How long one unpinned-image warning silences the next.
pub const WARNING_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinViolation {
    pub extension: String,
    pub image: String,
    /// Pinned reference to use instead, when the registry could tell.
    pub suggestion: Option<String>,
}

impl fmt::Display for PinViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.extension, self.image)?;
        if let Some(pin) = &self.suggestion {
            write!(f, " (use {})", pin)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PinningError {
    #[error("{}", render_unpinned(.violations))]
    UnpinnedImages { violations: Vec<PinViolation> },
}

fn render_unpinned(violations: &[PinViolation]) -> String {
    let mut out = format!(
        "{} extension image(s) use unpinned tags, which is not allowed in CI:",
        violations.len()
    );
    for v in violations {
        out.push_str(&format!("\n  - {}", v));
    }
    out
}

/// Extensions whose image tag is dynamic, with pin suggestions.
pub async fn collect_unpinned(config: &Config, suggester: &dyn PinSuggester) -> Vec<PinViolation> {
    let mut violations = Vec::new();
    for ext in config.extensions.iter().filter(|e| has_latest_tag(&e.image)) {
        violations.push(PinViolation {
            extension: ext.name.clone(),
            image: ext.image.clone(),
            suggestion: suggester.suggest_pin(&ext.name, &ext.image).await,
        });
    }
    violations
}

/// Enforce pinning: fatal in CI, otherwise a once-per-session warning.
pub async fn check_image_pinning(
    config: &Config,
    ci: bool,
    suggester: &dyn PinSuggester,
) -> Result<(), PinningError> {
    let marker = SessionMarker::for_session("unpinned-warning", WARNING_WINDOW);
    check_image_pinning_with(config, ci, suggester, &marker, testing_mode()).await
}

pub async fn check_image_pinning_with(
    config: &Config,
    ci: bool,
    suggester: &dyn PinSuggester,
    marker: &SessionMarker,
    always_warn: bool,
) -> Result<(), PinningError> {
    if !config.extensions.iter().any(|e| has_latest_tag(&e.image)) {
        return Ok(());
    }
    if !ci && !always_warn && marker.is_fresh() {
        return Ok(());
    }

    let violations = collect_unpinned(config, suggester).await;
    if ci {
        return Err(PinningError::UnpinnedImages { violations });
    }

    if always_warn || marker.claim() {
        for v in &violations {
            tracing::warn!("Extension image is not pinned: {}", v);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Extension;
    use async_trait::async_trait;

    struct FixedPins;

    #[async_trait]
    impl PinSuggester for FixedPins {
        async fn suggest_pin(&self, _extension: &str, image: &str) -> Option<String> {
            image
                .starts_with("ghcr.io/org/")
                .then(|| "ghcr.io/org/go:v1.4.0".to_string())
        }
    }

    fn config() -> Config {
        Config {
            extensions: vec![
                Extension::new("go", "ghcr.io/org/go"),
                Extension::new("pwsh", "docker.io/acme/pwsh:main"),
                Extension::new("lint", "ghcr.io/org/lint:v2.0.0"),
            ],
            ..Default::default()
        }
    }

    fn marker(dir: &tempfile::TempDir) -> SessionMarker {
        SessionMarker::new(dir.path().join("unpinned.marker"), WARNING_WINDOW)
    }

    #[tokio::test]
    async fn test_ci_is_fatal_with_every_violation() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_image_pinning_with(&config(), true, &FixedPins, &marker(&dir), false)
            .await
            .unwrap_err();

        let PinningError::UnpinnedImages { violations } = &err;
        assert_eq!(violations.len(), 2);
        insta::assert_snapshot!(err.to_string(), @r"
        2 extension image(s) use unpinned tags, which is not allowed in CI:
          - go: ghcr.io/org/go (use ghcr.io/org/go:v1.4.0)
          - pwsh: docker.io/acme/pwsh:main
        ");
    }

    #[tokio::test]
    async fn test_local_warns_once_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let marker = marker(&dir);
        assert!(check_image_pinning_with(&config(), false, &FixedPins, &marker, false)
            .await
            .is_ok());
        assert!(marker.is_fresh());
        assert!(check_image_pinning_with(&config(), false, &FixedPins, &marker, false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_testing_mode_bypasses_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = marker(&dir);
        check_image_pinning_with(&config(), false, &FixedPins, &marker, true)
            .await
            .unwrap();
        assert!(!marker.is_fresh());
    }

    #[tokio::test]
    async fn test_pinned_config_passes_in_ci() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            extensions: vec![Extension::new("lint", "ghcr.io/org/lint:v2.0.0")],
            ..Default::default()
        };
        check_image_pinning_with(&config, true, &FixedPins, &marker(&dir), false)
            .await
            .unwrap();
    }
}
