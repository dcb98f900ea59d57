//! Running an extension's introspection command and capturing its output.
//!
//! The container runs without TTY or stdin. Once started, three outcomes
//! race: the daemon wait fails, the process exits, or the overall deadline
//! passes. A non-zero exit keeps draining output briefly so the error can
//! carry stderr; a clean exit reads the rest of stdout under its own bound.

use std::future::Future;
use std::io;
use std::time::Duration;

use bollard::container::AttachContainerResults;
use tokio::task::JoinHandle;

use crate::container::error::{ContainerError, Result};
use crate::container::host::ContainerHost;
use crate::container::io::{SharedBuffer, pump_output};

/// Command every extension image answers with its metadata document.
pub const METADATA_COMMAND: &[&str] = &["extension-meta"];

#[derive(Debug, Clone, Copy)]
pub struct MetadataTimeouts {
    /// Whole call, from start to exit.
    pub overall: Duration,
    /// Output drain after a non-zero exit.
    pub failure_drain: Duration,
    /// Output read after a clean exit.
    pub output_read: Duration,
}

impl Default for MetadataTimeouts {
    fn default() -> Self {
        Self {
            overall: Duration::from_secs(60),
            failure_drain: Duration::from_secs(1),
            output_read: Duration::from_secs(5),
        }
    }
}

impl ContainerHost {
    /// Run the metadata command of extension `name` and return its stdout.
    pub async fn execute_metadata_command(&self, name: &str) -> Result<String> {
        self.execute_metadata_command_with(name, MetadataTimeouts::default())
            .await
    }

    pub async fn execute_metadata_command_with(
        &self,
        name: &str,
        timeouts: MetadataTimeouts,
    ) -> Result<String> {
        let ext = self.extension(name)?;
        self.ensure_image_exists(
            &ext.image,
            self.config().effective_pull_policy(&ext),
            self.config().effective_load_local(&ext),
        )
        .await?;

        let mut launch = self.resolve_extension(&ext, &[]).await?;
        launch.tty = false;
        launch.stdin = false;
        launch.cmd = Some(METADATA_COMMAND.iter().map(|s| s.to_string()).collect());

        let id = self.create_container(&launch).await?;
        let attached = match self.attach_to_container(&id, false).await {
            Ok(a) => a,
            Err(e) => {
                let _ = self.remove_container(&id).await;
                return Err(e);
            }
        };
        let wait = tokio::spawn(self.wait_for_container(&id, launch.auto_remove));

        if let Err(e) = self.start_container(&id, false).await {
            wait.abort();
            let _ = self.remove_container(&id).await;
            return Err(e);
        }

        let AttachContainerResults { output, .. } = attached;
        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let pump = tokio::spawn(pump_output(output, stdout.clone(), stderr.clone()));

        let wait = async move {
            wait.await.map_err(|e| ContainerError::WaitFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?
        };

        let result = await_metadata(&ext.name, wait, pump, &stdout, &stderr, &timeouts).await;
        if let Err(ContainerError::MetadataTimeout { .. }) = &result {
            tracing::warn!("Metadata command for '{}' timed out, stopping container", ext.name);
            if let Err(e) = self.stop_container(&id, Duration::ZERO).await {
                tracing::debug!("Stop after timeout failed: {}", e);
            }
            let _ = self.remove_container(&id).await;
        }
        result
    }
}

/// Resolve the metadata race given the wait future and the output pump.
pub(crate) async fn await_metadata<W>(
    extension: &str,
    wait: W,
    mut pump: JoinHandle<io::Result<()>>,
    stdout: &SharedBuffer,
    stderr: &SharedBuffer,
    timeouts: &MetadataTimeouts,
) -> Result<String>
where
    W: Future<Output = Result<i64>>,
{
    let code = match tokio::time::timeout(timeouts.overall, wait).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            pump.abort();
            return Err(e);
        }
        Err(_) => {
            pump.abort();
            return Err(ContainerError::MetadataTimeout {
                extension: extension.to_string(),
                timeout: timeouts.overall,
            });
        }
    };

    if code != 0 {
        if tokio::time::timeout(timeouts.failure_drain, &mut pump).await.is_err() {
            pump.abort();
        }
        let mut captured = stderr.take_string();
        if captured.trim().is_empty() {
            captured = stdout.take_string();
        }
        return Err(ContainerError::MetadataFailed {
            extension: extension.to_string(),
            code,
            stderr: captured,
        });
    }

    match tokio::time::timeout(timeouts.output_read, &mut pump).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(ContainerError::Io(e)),
        Ok(Err(e)) => tracing::debug!("Metadata output task failed: {}", e),
        Err(_) => {
            pump.abort();
            tracing::warn!(
                "Output of '{}' still open {:?} after exit; using what was read",
                extension,
                timeouts.output_read
            );
        }
    }
    Ok(stdout.take_string())
}
