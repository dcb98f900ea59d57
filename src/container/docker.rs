//! Docker daemon connection.

use std::path::PathBuf;

use bollard::{API_DEFAULT_VERSION, Docker};

use crate::container::detect::unreachable_hint;
use crate::container::error::{ContainerError, Result};

/// Overrides the daemon address (`unix://`, `tcp://`, `http://` or a socket path).
pub const DOCKER_HOST_ENV: &str = "R2R_DOCKER_HOST";

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Connect and ping the Docker daemon.
///
/// Tries `R2R_DOCKER_HOST` when set (and only that), otherwise bollard's
/// local defaults (which honour `DOCKER_HOST`), then the Docker Desktop
/// socket under the home directory, then the rootless socket.
pub async fn connect_docker() -> Result<Docker> {
    if let Some(host) = std::env::var(DOCKER_HOST_ENV).ok().filter(|h| !h.is_empty()) {
        let docker = connect_to(&host).map_err(|e| unavailable(&host, &e))?;
        docker.ping().await.map_err(|e| unavailable(&host, &e))?;
        tracing::debug!("Connected to Docker at {}", host);
        return Ok(docker);
    }

    let mut last_error = None;
    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => last_error = Some(e),
        },
        Err(e) => last_error = Some(e),
    }

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy().to_string();
        match Docker::connect_with_unix(&path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker at {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = Some(e),
            },
            Err(e) => last_error = Some(e),
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no Docker socket found".to_string());
    Err(ContainerError::DockerNotAvailable {
        reason,
        hint: unreachable_hint().to_string(),
    })
}

fn connect_to(host: &str) -> std::result::Result<Docker, bollard::errors::Error> {
    if let Some(path) = host.strip_prefix("unix://") {
        Docker::connect_with_unix(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    } else if host.starts_with("tcp://") || host.starts_with("http://") {
        Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    } else {
        Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    }
}

fn unavailable(host: &str, error: &bollard::errors::Error) -> ContainerError {
    ContainerError::DockerNotAvailable {
        reason: format!("{} ({})", error, host),
        hint: unreachable_hint().to_string(),
    }
}

/// Host path of the daemon socket, for the passthrough mount.
pub fn host_socket_path() -> String {
    let from_env = std::env::var(DOCKER_HOST_ENV)
        .ok()
        .or_else(|| std::env::var("DOCKER_HOST").ok());
    socket_path_from(from_env.as_deref())
}

pub(crate) fn socket_path_from(host: Option<&str>) -> String {
    match host {
        Some(h) if h.starts_with("unix://") => h.trim_start_matches("unix://").to_string(),
        Some(h) if h.starts_with('/') => h.to_string(),
        _ => "/var/run/docker.sock".to_string(),
    }
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
        sockets.push(home.join(".docker/desktop/docker.sock"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(meta) = std::fs::metadata("/proc/self") {
            sockets.push(PathBuf::from(format!("/run/user/{}/docker.sock", meta.uid())));
        }
    }
    sockets
}

/// True for a 404 from the daemon.
pub(crate) fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

/// True for a 304 (already stopped / already started).
pub(crate) fn is_not_modified(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_from_host() {
        assert_eq!(socket_path_from(None), "/var/run/docker.sock");
        assert_eq!(socket_path_from(Some("unix:///tmp/d.sock")), "/tmp/d.sock");
        assert_eq!(socket_path_from(Some("/custom.sock")), "/custom.sock");
        assert_eq!(socket_path_from(Some("tcp://10.0.0.1:2375")), "/var/run/docker.sock");
    }

    #[test]
    fn test_not_found_classification() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image".to_string(),
        };
        assert!(is_not_found(&err));
        assert!(!is_not_modified(&err));
    }
}
