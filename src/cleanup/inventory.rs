//! Container listing and removal behind a trait so the cleanup logic can be
//! exercised without a daemon.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{ListContainersOptions, RemoveContainerOptions, StopContainerOptions};

use crate::container::docker::{is_not_found, is_not_modified};
use crate::container::error::{ContainerError, Result};

/// The parts of a container the cleanup sweeps look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    /// Names without the leading `/`.
    pub names: Vec<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// `running`, `exited`, `dead`, ...
    pub state: String,
}

impl ContainerRecord {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Whether this record is `own_id`, allowing for short (12 char) ids.
    pub fn is_same_container(&self, own_id: &str) -> bool {
        !own_id.is_empty() && (self.id.starts_with(own_id) || own_id.starts_with(&self.id))
    }
}

#[async_trait]
pub trait ContainerInventory: Send + Sync {
    /// Running containers, or every container when `all` is set.
    async fn list(&self, all: bool) -> Result<Vec<ContainerRecord>>;
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Inventory backed by the Docker daemon.
pub struct DockerInventory {
    docker: Docker,
}

impl DockerInventory {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerInventory for DockerInventory {
    async fn list(&self, all: bool) -> Result<Vec<ContainerRecord>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::ListFailed {
                reason: e.to_string(),
            })?;

        Ok(summaries
            .into_iter()
            .map(|s| ContainerRecord {
                id: s.id.unwrap_or_default(),
                names: s
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                image: s.image.unwrap_or_default(),
                labels: s.labels.unwrap_or_default(),
                state: s.state.unwrap_or_default(),
            })
            .collect())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) || is_not_modified(&e) => Ok(()),
            Err(e) => Err(ContainerError::StopFailed {
                name: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(ContainerError::RemoveFailed {
                name: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
