//! Session-scoped state in the temp directory.
//!
//! A session is the shell that invoked the CLI, identified by our parent
//! process id. Cache files and warning markers are keyed on it so two
//! terminals never share them.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Identifier for the invoking shell session.
pub fn session_id() -> String {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id().to_string()
    }
    #[cfg(not(unix))]
    {
        std::process::id().to_string()
    }
}

/// Path of a session-scoped file in the temp directory.
pub fn session_file(stem: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("r2r-{}-{}.{}", stem, session_id(), extension))
}

/// Whether `R2R_TESTING` is set to a truthy value.
pub fn testing_mode() -> bool {
    std::env::var("R2R_TESTING")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

pub(crate) fn is_truthy(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !v.eq_ignore_ascii_case("0") && !v.eq_ignore_ascii_case("false")
}

/// A marker file that stays "fresh" for a fixed window after it is touched.
#[derive(Debug, Clone)]
pub struct SessionMarker {
    path: PathBuf,
    validity: Duration,
}

impl SessionMarker {
    pub fn new(path: PathBuf, validity: Duration) -> Self {
        Self { path, validity }
    }

    /// Marker for the current session with the given name.
    pub fn for_session(name: &str, validity: Duration) -> Self {
        Self::new(session_file(name, "marker"), validity)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// True if the marker exists and was touched within the validity window.
    pub fn is_fresh(&self) -> bool {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age <= self.validity)
            .unwrap_or(true)
    }

    /// Create or refresh the marker.
    pub fn touch(&self) -> std::io::Result<()> {
        std::fs::write(&self.path, chrono::Utc::now().to_rfc3339())
    }

    /// Returns true exactly once per validity window; refreshes the marker
    /// when it does.
    pub fn claim(&self) -> bool {
        if self.is_fresh() {
            return false;
        }
        if let Err(e) = self.touch() {
            tracing::debug!("Could not write session marker {}: {}", self.path.display(), e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_file_is_scoped() {
        let path = session_file("registry-cache", "json");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("r2r-registry-cache-"));
        assert!(name.ends_with(".json"));
        assert!(name.contains(&session_id()));
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("FALSE"));
    }

    #[test]
    fn test_marker_claimed_once_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SessionMarker::new(dir.path().join("warn.marker"), Duration::from_secs(3600));

        assert!(!marker.is_fresh());
        assert!(marker.claim());
        assert!(marker.is_fresh());
        assert!(!marker.claim());
    }

    #[test]
    fn test_marker_expires_with_zero_window() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SessionMarker::new(dir.path().join("warn.marker"), Duration::ZERO);
        marker.touch().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!marker.is_fresh());
    }
}
