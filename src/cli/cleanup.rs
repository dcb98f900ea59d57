//! `r2r cleanup`: sweep managed containers.

use std::sync::Arc;

use crate::cleanup::{CleanupReport, CleanupService, DockerInventory, HostIntrospection};
use crate::container::connect_docker;

pub async fn run_cleanup_command(remove_stopped: bool) -> anyhow::Result<i32> {
    let docker = connect_docker().await?;
    let service = CleanupService::new(
        Arc::new(DockerInventory::new(docker)),
        Arc::new(HostIntrospection),
    );

    let stopped = service.stop_managed().await?;
    print_report("Stopped", &stopped);
    let mut clean = stopped.is_clean();

    if remove_stopped {
        let removed = service.remove_stopped().await?;
        print_report("Removed", &removed);
        clean &= removed.is_clean();
    }

    Ok(if clean { 0 } else { 1 })
}

fn print_report(verb: &str, report: &CleanupReport) {
    if report.removed.is_empty() && report.failed.is_empty() {
        println!("{}: nothing to do", verb);
        return;
    }
    for id in &report.removed {
        println!("{} {}", verb, short_id(id));
    }
    for (id, error) in &report.failed {
        eprintln!("Failed on {}: {}", short_id(id), error);
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
