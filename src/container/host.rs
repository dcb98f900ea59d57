//! Container lifecycle for extension runs.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, CreateContainerOptions,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::auth::AuthResolver;
use crate::cleanup::{CleanupService, DockerInventory, HostIntrospection, Snapshot};
use crate::config::{Config, ConfigStore, Extension, PullPolicy};
use crate::container::config::{ExtensionConfig, HostContext, create_container_config};
use crate::container::docker::{connect_docker, host_socket_path, is_not_found, is_not_modified};
use crate::container::env::{EnvContext, build_env};
use crate::container::error::{ContainerError, Result};
use crate::container::io::{RawModeGuard, forward_stdin, pump_output};
use crate::container::policy::{LocalImage, PullAuth, PullDecision, pull_auth, resolve_pull};
use crate::registry::ImageReference;
use crate::session::testing_mode;
use crate::terminal::{TerminalSize, is_interactive};

/// How long output may keep draining after the container exits.
pub const OUTPUT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs extension containers against one Docker daemon and configuration.
pub struct ContainerHost {
    docker: Docker,
    config: Arc<Config>,
    repo_root: PathBuf,
    auth: AuthResolver,
    cleanup: CleanupService,
}

impl ContainerHost {
    /// Connect to Docker and bind to the loaded configuration.
    pub async fn connect(store: &ConfigStore) -> Result<Self> {
        let docker = connect_docker().await?;
        Ok(Self::new(docker, store.shared(), store.repo_root().to_path_buf()))
    }

    pub fn new(docker: Docker, config: Arc<Config>, repo_root: PathBuf) -> Self {
        let auth = AuthResolver::for_config(&config);
        let cleanup = CleanupService::new(
            Arc::new(DockerInventory::new(docker.clone())),
            Arc::new(HostIntrospection),
        );
        Self {
            docker,
            config,
            repo_root,
            auth,
            cleanup,
        }
    }

    /// Replace the credential resolver.
    pub fn with_auth(mut self, auth: AuthResolver) -> Self {
        self.auth = auth;
        self
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn cleanup(&self) -> &CleanupService {
        &self.cleanup
    }

    pub(crate) fn extension(&self, name: &str) -> Result<Extension> {
        self.config
            .find_extension(name)
            .cloned()
            .ok_or_else(|| ContainerError::ExtensionNotFound(name.to_string()))
    }

    /// What the daemon knows about `image`.
    pub async fn local_image(&self, image: &str) -> Result<LocalImage> {
        match self.docker.inspect_image(image).await {
            Ok(info) => Ok(LocalImage {
                exists: true,
                has_repo_digests: info.repo_digests.is_some_and(|d| !d.is_empty()),
            }),
            Err(e) if is_not_found(&e) => Ok(LocalImage::ABSENT),
            Err(e) => Err(ContainerError::ImageInspectFailed {
                image: image.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn image_has_entrypoint(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(info) => Ok(info
                .config
                .and_then(|c| c.entrypoint)
                .is_some_and(|e| !e.is_empty())),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ContainerError::ImageInspectFailed {
                image: image.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Make `image` available locally according to `policy`.
    pub async fn ensure_image_exists(
        &self,
        image: &str,
        policy: PullPolicy,
        load_local: bool,
    ) -> Result<PullDecision> {
        let local = self.local_image(image).await?;
        let decision = resolve_pull(policy, image, local, load_local)?;
        tracing::debug!(
            "Image {}: policy {} resolved to {} ({})",
            image,
            policy,
            decision.policy,
            decision.reason
        );
        if decision.needs_pull() {
            self.pull_image(image, decision.policy == PullPolicy::Always)
                .await?;
        }
        Ok(decision)
    }

    /// Pull `image`, authenticating against the configured registry.
    async fn pull_image(&self, image: &str, always: bool) -> Result<()> {
        let reference = ImageReference::parse(image);
        let registry = reference.registry.as_deref().unwrap_or("docker.io");

        let mode = pull_auth(
            image,
            self.config.registry_host(),
            always,
            self.config.auth_required(),
        );
        let credentials = match mode {
            PullAuth::Anonymous => None,
            PullAuth::Optional | PullAuth::Required => match self.auth.resolve().await {
                Ok(creds) => Some(creds.docker_credentials(registry)),
                Err(source) if mode == PullAuth::Required => {
                    return Err(ContainerError::AuthRequired {
                        image: image.to_string(),
                        source,
                    });
                }
                Err(e) => {
                    tracing::debug!("Pulling {} anonymously: {}", image, e);
                    None
                }
            },
        };

        let options = match &reference.digest {
            Some(_) => CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            },
            None => CreateImageOptions {
                from_image: reference.base(),
                tag: reference.tag_or_latest().to_string(),
                ..Default::default()
            },
        };

        tracing::info!("Pulling image: {}", image);

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(ContainerError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    /// Resolve runtime parameters for `ext` invoked with `args`.
    pub async fn resolve_extension(&self, ext: &Extension, args: &[String]) -> Result<ExtensionConfig> {
        let env = build_env(&EnvContext {
            config: &self.config,
            extension: ext,
            repo_root: &self.repo_root,
            terminal: TerminalSize::detect(),
        });
        let socket = host_socket_path();
        let host = HostContext {
            repo_root: &self.repo_root,
            docker_socket: &socket,
            image_has_entrypoint: self.image_has_entrypoint(&ext.image).await?,
            testing: testing_mode(),
        };
        Ok(ExtensionConfig::resolve(&self.config, ext, args, &env, host))
    }

    pub async fn create_container(&self, launch: &ExtensionConfig) -> Result<String> {
        let options = CreateContainerOptions {
            name: launch.name.clone(),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), create_container_config(launch))
            .await
            .map_err(|e| ContainerError::CreateFailed {
                name: launch.name.clone(),
                reason: e.to_string(),
            })?;
        for warning in &response.warnings {
            tracing::warn!("Docker: {}", warning);
        }
        tracing::debug!("Created container {} ({})", launch.name, response.id);
        Ok(response.id)
    }

    /// Start the container; with a TTY, size it to the host terminal.
    pub async fn start_container(&self, id: &str, tty: bool) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::StartFailed {
                name: id.to_string(),
                reason: e.to_string(),
            })?;

        if tty {
            let size = TerminalSize::detect();
            let options = ResizeContainerTtyOptions {
                width: size.columns,
                height: size.lines,
            };
            if let Err(e) = self.docker.resize_container_tty(id, options).await {
                tracing::debug!("Could not resize container TTY: {}", e);
            }
        }
        Ok(())
    }

    pub async fn attach_to_container(&self, id: &str, stdin: bool) -> Result<AttachContainerResults> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(stdin),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        self.docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| ContainerError::AttachFailed {
                name: id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Exit code of the container.
    ///
    /// The returned future owns its handles so it can be spawned before the
    /// container starts. Auto-removed containers are waited on until removal.
    pub fn wait_for_container(
        &self,
        id: &str,
        auto_remove: bool,
    ) -> impl Future<Output = Result<i64>> + Send + 'static {
        let docker = self.docker.clone();
        let id = id.to_string();
        async move {
            let condition = if auto_remove { "removed" } else { "not-running" };
            let mut stream = docker.wait_container(&id, Some(WaitContainerOptions { condition }));
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(e)) => Err(ContainerError::WaitFailed {
                    name: id,
                    reason: e.to_string(),
                }),
                None => Err(ContainerError::WaitFailed {
                    name: id,
                    reason: "wait stream ended without a status".to_string(),
                }),
            }
        }
    }

    /// Stop with a grace period; already stopped or removed is success.
    pub async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
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

    pub async fn remove_container(&self, id: &str) -> Result<()> {
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

    /// Run extension `name` with `args`, streaming its output, and return
    /// its exit code. Child containers it started are reconciled afterwards.
    pub async fn run_extension(&self, name: &str, args: &[String]) -> Result<i64> {
        let ext = self.extension(name)?;

        let before = match self.cleanup.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Child container tracking disabled: {}", e);
                None
            }
        };

        self.ensure_image_exists(
            &ext.image,
            self.config.effective_pull_policy(&ext),
            self.config.effective_load_local(&ext),
        )
        .await?;

        let launch = self.resolve_extension(&ext, args).await?;
        let id = self.create_container(&launch).await?;

        let attached = match self.attach_to_container(&id, launch.stdin).await {
            Ok(a) => a,
            Err(e) => {
                let _ = self.remove_container(&id).await;
                return Err(e);
            }
        };
        let wait = tokio::spawn(self.wait_for_container(&id, launch.auto_remove));

        let _raw = (launch.stdin && launch.tty && is_interactive()).then(RawModeGuard::enable);

        if let Err(e) = self.start_container(&id, launch.tty).await {
            wait.abort();
            let _ = self.remove_container(&id).await;
            return Err(e);
        }
        tracing::info!("Started {} for extension '{}'", launch.name, ext.name);

        let AttachContainerResults { output, input } = attached;
        let stdin_task = launch.stdin.then(|| tokio::spawn(forward_stdin(input)));
        let pump = tokio::spawn(pump_output(output, std::io::stdout(), std::io::stderr()));

        let waited = match wait.await {
            Ok(result) => result,
            Err(e) => Err(ContainerError::WaitFailed {
                name: launch.name.clone(),
                reason: e.to_string(),
            }),
        };

        settle_run(&self.cleanup, before.as_ref(), &ext, waited, pump, stdin_task).await
    }
}

/// Finish a run once its container has exited or the wait failed: drain
/// output for a bounded time, stop forwarding stdin and reconcile child
/// containers. Returns the exit code or the wait error.
pub(crate) async fn settle_run(
    cleanup: &CleanupService,
    before: Option<&Snapshot>,
    ext: &Extension,
    waited: Result<i64>,
    mut pump: JoinHandle<io::Result<()>>,
    stdin_task: Option<JoinHandle<io::Result<u64>>>,
) -> Result<i64> {
    match tokio::time::timeout(OUTPUT_READ_TIMEOUT, &mut pump).await {
        Ok(Ok(Err(e))) => tracing::debug!("Output copy failed: {}", e),
        Ok(_) => {}
        Err(_) => {
            tracing::debug!("Output still open {:?} after exit", OUTPUT_READ_TIMEOUT);
            pump.abort();
        }
    }
    if let Some(task) = stdin_task {
        task.abort();
    }

    match &waited {
        Ok(code) => tracing::debug!("Extension '{}' exited with code {}", ext.name, code),
        Err(e) => tracing::warn!("Lost track of extension '{}': {}", ext.name, e),
    }

    if let Some(before) = before {
        if let Err(e) = cleanup
            .reconcile(before, &ext.name, &ext.image, ext.auto_remove_children())
            .await
        {
            tracing::warn!("Child container cleanup failed: {}", e);
        }
    }

    waited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::{ContainerInventory, ContainerRecord, RuntimeIntrospection};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// One pre-existing container; a child appears once the run starts.
    struct Inventory {
        running: Mutex<Vec<ContainerRecord>>,
        removed: Mutex<Vec<String>>,
    }

    impl Inventory {
        fn new() -> Self {
            Self {
                running: Mutex::new(vec![record("pre", "postgres:16")]),
                removed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerInventory for Inventory {
        async fn list(&self, _all: bool) -> Result<Vec<ContainerRecord>> {
            Ok(self.running.lock().unwrap().clone())
        }

        async fn stop(&self, _id: &str, _grace: Duration) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    struct NotInContainer;

    impl RuntimeIntrospection for NotInContainer {
        fn own_container_id(&self) -> Option<String> {
            None
        }
    }

    fn record(id: &str, image: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            names: vec![id.to_string()],
            image: image.to_string(),
            labels: Default::default(),
            state: "running".to_string(),
        }
    }

    async fn run_until_exit(waited: Result<i64>) -> (Result<i64>, Arc<Inventory>, bool) {
        let inventory = Arc::new(Inventory::new());
        let cleanup = CleanupService::new(inventory.clone(), Arc::new(NotInContainer));
        let before = cleanup.snapshot().await.unwrap();
        inventory.running.lock().unwrap().push(record("child", "redis:7"));

        let mut ext = Extension::new("go", "ghcr.io/org/go:v1.22.0");
        ext.auto_remove_children = Some(true);

        let pump = tokio::spawn(async { Ok(()) });
        let stdin: JoinHandle<io::Result<u64>> = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok(0)
        });
        let stdin_abort = stdin.abort_handle();

        let result = settle_run(&cleanup, Some(&before), &ext, waited, pump, Some(stdin)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        (result, inventory, stdin_abort.is_finished())
    }

    #[tokio::test]
    async fn test_settle_returns_exit_code_and_reconciles() {
        let (result, inventory, stdin_done) = run_until_exit(Ok(3)).await;
        assert_eq!(result.unwrap(), 3);
        assert!(stdin_done);
        assert_eq!(*inventory.removed.lock().unwrap(), vec!["child".to_string()]);
    }

    #[tokio::test]
    async fn test_settle_after_wait_failure_still_cleans_up() {
        let failure = Err(ContainerError::WaitFailed {
            name: "r2r-go".to_string(),
            reason: "connection reset".to_string(),
        });
        let (result, inventory, stdin_done) = run_until_exit(failure).await;

        assert!(matches!(result, Err(ContainerError::WaitFailed { .. })));
        assert!(stdin_done);
        assert_eq!(*inventory.removed.lock().unwrap(), vec!["child".to_string()]);
    }
}
