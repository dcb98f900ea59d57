//! Reconciliation of containers spawned by extensions.
//!
//! Extensions get the Docker socket, so they can start containers of their
//! own. A snapshot of running ids taken before the run is diffed against the
//! set afterwards; new containers that are not the extension's image are
//! children. They are removed when the extension opts in with
//! `auto_remove_children`, and reported otherwise.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cleanup::inventory::{ContainerInventory, ContainerRecord};
use crate::cleanup::introspect::RuntimeIntrospection;
use crate::container::config::{CONTAINER_NAME_PREFIX, MANAGED_LABEL};
use crate::container::error::Result;
use crate::registry::ImageReference;

/// Grace period before a stopped container is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Running container ids at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    ids: HashSet<String>,
}

impl Snapshot {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Containers stopped and/or removed.
    pub removed: Vec<String>,
    /// Children left running because removal was not requested.
    pub orphaned: Vec<String>,
    /// `(id, error)` for containers that could not be cleaned up.
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.failed.is_empty()
    }
}

pub struct CleanupService {
    inventory: Arc<dyn ContainerInventory>,
    introspection: Arc<dyn RuntimeIntrospection>,
}

impl CleanupService {
    pub fn new(
        inventory: Arc<dyn ContainerInventory>,
        introspection: Arc<dyn RuntimeIntrospection>,
    ) -> Self {
        Self {
            inventory,
            introspection,
        }
    }

    /// Record the running containers before an extension starts.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let ids = self
            .inventory
            .list(false)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        Ok(Snapshot { ids })
    }

    /// Handle containers that appeared since `before`.
    pub async fn reconcile(
        &self,
        before: &Snapshot,
        extension: &str,
        own_image: &str,
        auto_remove_children: bool,
    ) -> Result<CleanupReport> {
        let own_id = self.introspection.own_container_id().unwrap_or_default();
        let children: Vec<ContainerRecord> = self
            .inventory
            .list(false)
            .await?
            .into_iter()
            .filter(|c| !before.contains(&c.id))
            .filter(|c| !same_image(&c.image, own_image))
            .filter(|c| !c.is_same_container(&own_id))
            .collect();

        let mut report = CleanupReport::default();
        for child in children {
            let label = display_name(&child);
            if !auto_remove_children {
                tracing::warn!(
                    "Extension '{}' left container {} ({}) running; set auto_remove_children to clean it up",
                    extension,
                    label,
                    child.image
                );
                report.orphaned.push(child.id);
                continue;
            }
            match self.stop_and_remove(&child.id).await {
                Ok(()) => {
                    tracing::info!("Removed child container {} of '{}'", label, extension);
                    report.removed.push(child.id);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove child container {}: {}", label, e);
                    report.failed.push((child.id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Stop every running managed container except the one we run in.
    pub async fn stop_managed(&self) -> Result<CleanupReport> {
        let own_id = self.introspection.own_container_id().unwrap_or_default();
        let mut report = CleanupReport::default();
        for container in self.inventory.list(false).await? {
            if container.is_same_container(&own_id) || !is_managed(&container) {
                continue;
            }
            match self.inventory.stop(&container.id, STOP_GRACE).await {
                Ok(()) => {
                    tracing::info!("Stopped managed container {}", display_name(&container));
                    report.removed.push(container.id);
                }
                Err(e) => report.failed.push((container.id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Remove exited or dead containers carrying the management label.
    pub async fn remove_stopped(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for container in self.inventory.list(true).await? {
            let stopped = matches!(container.state.as_str(), "exited" | "dead");
            if !stopped || container.label(MANAGED_LABEL) != Some("true") {
                continue;
            }
            match self.inventory.remove(&container.id).await {
                Ok(()) => report.removed.push(container.id),
                Err(e) => report.failed.push((container.id, e.to_string())),
            }
        }
        Ok(report)
    }

    async fn stop_and_remove(&self, id: &str) -> Result<()> {
        self.inventory.stop(id, STOP_GRACE).await?;
        self.inventory.remove(id).await
    }
}

/// Managed by name prefix or label.
fn is_managed(container: &ContainerRecord) -> bool {
    container.label(MANAGED_LABEL) == Some("true")
        || container
            .names
            .iter()
            .any(|n| n.starts_with(CONTAINER_NAME_PREFIX))
}

/// Docker reports `image` as the reference used at create time, so compare
/// with an implicit `latest` filled in.
fn same_image(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (a, b) = (ImageReference::parse(a), ImageReference::parse(b));
    a.base() == b.base() && a.tag_or_latest() == b.tag_or_latest() && a.digest == b.digest
}

fn display_name(container: &ContainerRecord) -> String {
    container
        .names
        .first()
        .cloned()
        .unwrap_or_else(|| container.id.chars().take(12).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::error::ContainerError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeInventory {
        containers: Mutex<Vec<ContainerRecord>>,
        stopped: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
        fail_stop: Vec<String>,
    }

    impl FakeInventory {
        fn with(containers: Vec<ContainerRecord>) -> Self {
            Self {
                containers: Mutex::new(containers),
                ..Default::default()
            }
        }

        fn add(&self, record: ContainerRecord) {
            self.containers.lock().unwrap().push(record);
        }
    }

    #[async_trait]
    impl ContainerInventory for FakeInventory {
        async fn list(&self, all: bool) -> Result<Vec<ContainerRecord>> {
            Ok(self
                .containers
                .lock()
                .unwrap()
                .iter()
                .filter(|c| all || c.state == "running")
                .cloned()
                .collect())
        }

        async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
            if self.fail_stop.iter().any(|f| f == id) {
                return Err(ContainerError::StopFailed {
                    name: id.to_string(),
                    reason: "boom".to_string(),
                });
            }
            self.stopped.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn remove(&self, id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    struct Own(Option<&'static str>);

    impl RuntimeIntrospection for Own {
        fn own_container_id(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn record(id: &str, name: &str, image: &str, state: &str, managed: bool) -> ContainerRecord {
        let mut labels = HashMap::new();
        if managed {
            labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        }
        ContainerRecord {
            id: id.to_string(),
            names: vec![name.to_string()],
            image: image.to_string(),
            labels,
            state: state.to_string(),
        }
    }

    fn service(inv: Arc<FakeInventory>, own: Option<&'static str>) -> CleanupService {
        CleanupService::new(inv, Arc::new(Own(own)))
    }

    #[tokio::test]
    async fn test_children_removed_when_requested() {
        let inv = Arc::new(FakeInventory::with(vec![record(
            "pre", "db", "postgres:16", "running", false,
        )]));
        let svc = service(inv.clone(), None);
        let before = svc.snapshot().await.unwrap();

        inv.add(record("ext", "r2r-go-1", "ghcr.io/org/go", "running", true));
        inv.add(record("child", "sidecar", "redis:7", "running", false));

        let report = svc
            .reconcile(&before, "go", "ghcr.io/org/go:latest", true)
            .await
            .unwrap();
        assert_eq!(report.removed, vec!["child".to_string()]);
        assert_eq!(*inv.stopped.lock().unwrap(), vec!["child".to_string()]);
        assert_eq!(*inv.removed.lock().unwrap(), vec!["child".to_string()]);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_children_only_reported_by_default() {
        let inv = Arc::new(FakeInventory::default());
        let svc = service(inv.clone(), None);
        let before = svc.snapshot().await.unwrap();
        inv.add(record("child", "sidecar", "redis:7", "running", false));

        let report = svc.reconcile(&before, "go", "ghcr.io/org/go:v1", false).await.unwrap();
        assert_eq!(report.orphaned, vec!["child".to_string()]);
        assert!(inv.stopped.lock().unwrap().is_empty());
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_failed_child_is_recorded() {
        let inv = Arc::new(FakeInventory {
            fail_stop: vec!["child".to_string()],
            ..Default::default()
        });
        let svc = service(inv.clone(), None);
        let before = svc.snapshot().await.unwrap();
        inv.add(record("child", "sidecar", "redis:7", "running", false));

        let report = svc.reconcile(&before, "go", "x:v1", true).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(inv.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_managed_skips_own_container() {
        let inv = Arc::new(FakeInventory::with(vec![
            record("aaaaaaaaaaaa1111", "r2r-go-1", "x", "running", false),
            record("bbbbbbbbbbbb2222", "other", "y", "running", true),
            record("cccccccccccc3333", "unrelated", "z", "running", false),
            record("dddddddddddd4444", "r2r-self", "x", "running", true),
        ]));
        let svc = service(inv.clone(), Some("dddddddddddd"));
        let report = svc.stop_managed().await.unwrap();
        assert_eq!(
            report.removed,
            vec!["aaaaaaaaaaaa1111".to_string(), "bbbbbbbbbbbb2222".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remove_stopped_labeled_only() {
        let inv = Arc::new(FakeInventory::with(vec![
            record("a", "r2r-go-1", "x", "exited", true),
            record("b", "r2r-go-2", "x", "dead", true),
            record("c", "r2r-go-3", "x", "running", true),
            record("d", "manual", "x", "exited", false),
        ]));
        let svc = service(inv.clone(), None);
        let report = svc.remove_stopped().await.unwrap();
        assert_eq!(report.removed, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_same_image_implicit_latest() {
        assert!(same_image("ghcr.io/org/go", "ghcr.io/org/go:latest"));
        assert!(!same_image("ghcr.io/org/go:v1", "ghcr.io/org/go:v2"));
    }
}
