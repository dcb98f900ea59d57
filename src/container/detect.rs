//! Guidance for a Docker daemon r2r cannot reach.
//!
//! A missing `docker` binary gets an install hint, an installed one a hint to
//! start the daemon or point `R2R_DOCKER_HOST` at one that runs.

use std::ffi::OsStr;

/// Why the daemon could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unreachable {
    /// No `docker` executable on `PATH`.
    NotInstalled,
    NotRunning,
}

impl Unreachable {
    /// Classify from the current `PATH`.
    pub fn diagnose() -> Self {
        match std::env::var_os("PATH") {
            Some(path) if docker_on_path(&path) => Unreachable::NotRunning,
            _ => Unreachable::NotInstalled,
        }
    }

    /// Remedy for `os` (as in `std::env::consts::OS`).
    pub fn hint(self, os: &str) -> &'static str {
        match (self, os) {
            (Unreachable::NotInstalled, "macos") => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/mac-install/"
            }
            (Unreachable::NotInstalled, "windows") => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/windows-install/"
            }
            (Unreachable::NotInstalled, _) => {
                "Install Docker Engine: https://docs.docker.com/engine/install/"
            }
            (Unreachable::NotRunning, "macos") => {
                "Start Docker Desktop (open -a Docker) or set R2R_DOCKER_HOST to a running daemon"
            }
            (Unreachable::NotRunning, "windows") => {
                "Start Docker Desktop or set R2R_DOCKER_HOST to a running daemon"
            }
            (Unreachable::NotRunning, _) => {
                "Start the daemon (sudo systemctl start docker) or set R2R_DOCKER_HOST to a running one"
            }
        }
    }
}

/// Hint attached to connection failures on this host.
pub fn unreachable_hint() -> &'static str {
    Unreachable::diagnose().hint(std::env::consts::OS)
}

fn docker_on_path(path: &OsStr) -> bool {
    let name = if cfg!(windows) { "docker.exe" } else { "docker" };
    std::env::split_paths(path).any(|dir| dir.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_per_platform() {
        assert!(Unreachable::NotInstalled.hint("macos").contains("Docker Desktop"));
        assert!(Unreachable::NotInstalled.hint("linux").contains("Docker Engine"));
        assert!(Unreachable::NotRunning.hint("linux").contains("systemctl"));
        for os in ["macos", "windows", "linux"] {
            assert!(Unreachable::NotRunning.hint(os).contains("R2R_DOCKER_HOST"));
        }
    }

    #[test]
    fn test_docker_on_path() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let name = if cfg!(windows) { "docker.exe" } else { "docker" };
        std::fs::write(bin.path().join(name), b"").unwrap();

        let path = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        assert!(docker_on_path(&path));

        let path = std::env::join_paths([empty.path()]).unwrap();
        assert!(!docker_on_path(&path));
    }
}
