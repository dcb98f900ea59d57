//! Cleanup of orphaned and child containers.

pub mod inventory;
pub mod introspect;
pub mod service;

pub use inventory::{ContainerInventory, ContainerRecord, DockerInventory};
pub use introspect::{HostIntrospection, RuntimeIntrospection, detect_container_id};
pub use service::{CleanupReport, CleanupService, STOP_GRACE, Snapshot};
