//! Pull-policy resolution.
//!
//! AutoDetect trades reproducibility against staleness: dynamic tags
//! (`latest`, `main`, `master`, none) are pulled every time, pinned tags are
//! pulled once and then trusted. With `load_local`, a local image that has no
//! registry digests (built here, never pushed) is used as-is.

use crate::config::PullPolicy;
use crate::container::error::{ContainerError, Result};
use crate::registry::{ImageReference, TagClass};

/// What the daemon knows about an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LocalImage {
    pub exists: bool,
    /// The image carries at least one `RepoDigests` entry.
    pub has_repo_digests: bool,
}

impl LocalImage {
    pub const ABSENT: LocalImage = LocalImage {
        exists: false,
        has_repo_digests: false,
    };

    /// Present locally and never pushed to or pulled from a registry.
    pub fn is_local_build(&self) -> bool {
        self.exists && !self.has_repo_digests
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAction {
    UseLocal,
    Pull,
}

/// Outcome of resolving a pull policy for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullDecision {
    /// The concrete policy applied (never `AutoDetect`).
    pub policy: PullPolicy,
    pub action: ImageAction,
    pub reason: &'static str,
}

impl PullDecision {
    fn new(policy: PullPolicy, action: ImageAction, reason: &'static str) -> Self {
        Self {
            policy,
            action,
            reason,
        }
    }

    pub fn needs_pull(&self) -> bool {
        self.action == ImageAction::Pull
    }
}

/// Decide whether `image` must be pulled.
///
/// Deterministic in `(policy, tag class, local, load_local)`.
pub fn resolve_pull(
    policy: PullPolicy,
    image: &str,
    local: LocalImage,
    load_local: bool,
) -> Result<PullDecision> {
    use ImageAction::{Pull, UseLocal};

    let decision = match policy {
        PullPolicy::Always => PullDecision::new(PullPolicy::Always, Pull, "policy Always"),
        PullPolicy::IfNotPresent if local.exists => {
            PullDecision::new(PullPolicy::IfNotPresent, UseLocal, "present locally")
        }
        PullPolicy::IfNotPresent => {
            PullDecision::new(PullPolicy::IfNotPresent, Pull, "not present locally")
        }
        PullPolicy::Never if local.exists => {
            PullDecision::new(PullPolicy::Never, UseLocal, "policy Never")
        }
        PullPolicy::Never => {
            return Err(ContainerError::ImageNotPresent {
                image: image.to_string(),
            });
        }
        PullPolicy::AutoDetect => auto_detect(ImageReference::parse(image).tag_class(), local, load_local),
    };
    Ok(decision)
}

/// How a pull authenticates against its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullAuth {
    /// Not the configured registry; no credentials are sent.
    Anonymous,
    /// Use credentials when they resolve, else pull anonymously.
    Optional,
    /// Fail the pull when no credential resolves.
    Required,
}

/// Decide how to authenticate a pull of `image`.
///
/// Only images hosted on `configured_registry` are authenticated. For those,
/// credentials are mandatory under policy `Always` or when the configuration
/// requires authentication.
pub fn pull_auth(image: &str, configured_registry: &str, always: bool, auth_required: bool) -> PullAuth {
    let reference = ImageReference::parse(image);
    let registry = reference.registry.as_deref().unwrap_or("docker.io");
    if registry != configured_registry {
        PullAuth::Anonymous
    } else if always || auth_required {
        PullAuth::Required
    } else {
        PullAuth::Optional
    }
}

fn auto_detect(class: TagClass, local: LocalImage, load_local: bool) -> PullDecision {
    use ImageAction::{Pull, UseLocal};

    if load_local && local.is_local_build() {
        return PullDecision::new(PullPolicy::Never, UseLocal, "local build (load_local)");
    }
    match class {
        TagClass::Dynamic => PullDecision::new(PullPolicy::Always, Pull, "dynamic tag"),
        TagClass::Pinned if local.exists => {
            PullDecision::new(PullPolicy::IfNotPresent, UseLocal, "pinned tag cached")
        }
        TagClass::Pinned => {
            PullDecision::new(PullPolicy::IfNotPresent, Pull, "pinned tag not present")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILT: LocalImage = LocalImage {
        exists: true,
        has_repo_digests: false,
    };
    const PULLED: LocalImage = LocalImage {
        exists: true,
        has_repo_digests: true,
    };

    fn auto(image: &str, local: LocalImage, load_local: bool) -> PullDecision {
        resolve_pull(PullPolicy::AutoDetect, image, local, load_local).unwrap()
    }

    #[test]
    fn test_dynamic_tag_pulls_unless_local_build_opted_in() {
        let d = auto("ghcr.io/org/x:latest", PULLED, true);
        assert_eq!((d.policy, d.action), (PullPolicy::Always, ImageAction::Pull));

        let d = auto("ghcr.io/org/x", BUILT, false);
        assert_eq!(d.action, ImageAction::Pull);

        let d = auto("ghcr.io/org/x:main", BUILT, true);
        assert_eq!(d.action, ImageAction::UseLocal);

        let d = auto("ghcr.io/org/x:latest", LocalImage::ABSENT, true);
        assert_eq!(d.action, ImageAction::Pull);
    }

    #[test]
    fn test_pinned_tag_cached_forever() {
        let d = auto("ghcr.io/org/x:v1.2.3", PULLED, false);
        assert_eq!((d.policy, d.action), (PullPolicy::IfNotPresent, ImageAction::UseLocal));

        let d = auto("ghcr.io/org/x:v1.2.3", LocalImage::ABSENT, false);
        assert_eq!((d.policy, d.action), (PullPolicy::IfNotPresent, ImageAction::Pull));

        let d = auto("ghcr.io/org/x:v1.2.3", BUILT, true);
        assert_eq!(d.reason, "local build (load_local)");
    }

    #[test]
    fn test_explicit_policies_bypass_auto_detect() {
        let d = resolve_pull(PullPolicy::Always, "x:v1", PULLED, true).unwrap();
        assert!(d.needs_pull());

        let d = resolve_pull(PullPolicy::IfNotPresent, "x:latest", PULLED, false).unwrap();
        assert!(!d.needs_pull());

        let d = resolve_pull(PullPolicy::Never, "x:latest", BUILT, false).unwrap();
        assert_eq!(d.action, ImageAction::UseLocal);

        let err = resolve_pull(PullPolicy::Never, "x:latest", LocalImage::ABSENT, false).unwrap_err();
        assert!(matches!(err, ContainerError::ImageNotPresent { .. }));
    }

    #[test]
    fn test_auto_detect_table() {
        use ImageAction::{Pull, UseLocal};
        use PullPolicy::{Always, IfNotPresent, Never};

        // (local, load_local, expected for dynamic tags, expected for pinned tags)
        let table = [
            (LocalImage::ABSENT, false, (Always, Pull), (IfNotPresent, Pull)),
            (LocalImage::ABSENT, true, (Always, Pull), (IfNotPresent, Pull)),
            (BUILT, false, (Always, Pull), (IfNotPresent, UseLocal)),
            (BUILT, true, (Never, UseLocal), (Never, UseLocal)),
            (PULLED, false, (Always, Pull), (IfNotPresent, UseLocal)),
            (PULLED, true, (Always, Pull), (IfNotPresent, UseLocal)),
        ];
        let dynamic = ["org/x", "org/x:latest", "org/x:main"];
        let pinned = ["org/x:v2", "org/x@sha256:00"];

        for (local, load_local, want_dynamic, want_pinned) in table {
            for image in dynamic {
                let d = auto(image, local, load_local);
                assert_eq!((d.policy, d.action), want_dynamic, "{image} {local:?} {load_local}");
            }
            for image in pinned {
                let d = auto(image, local, load_local);
                assert_eq!((d.policy, d.action), want_pinned, "{image} {local:?} {load_local}");
            }
        }
    }

    #[test]
    fn test_pull_auth_rules() {
        use PullAuth::{Anonymous, Optional, Required};

        let cases = [
            // (image, always, auth_required, expected)
            ("ghcr.io/org/x:v1", false, false, Optional),
            ("ghcr.io/org/x:v1", true, false, Required),
            ("ghcr.io/org/x:v1", false, true, Required),
            ("docker.io/library/alpine:3", true, true, Anonymous),
            ("alpine:3", true, false, Anonymous),
            ("ghcr.io:443/org/x:v1", true, false, Anonymous),
        ];
        for (image, always, auth_required, expected) in cases {
            assert_eq!(
                pull_auth(image, "ghcr.io", always, auth_required),
                expected,
                "{image} always={always} required={auth_required}"
            );
        }
    }
}
