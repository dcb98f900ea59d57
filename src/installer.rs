//! Provisioning extension images ahead of use.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use crate::config::{Config, Extension, PullPolicy};
use crate::container::{ContainerError, ContainerHost, PullDecision};

/// Extensions provisioned at the same time.
pub const INSTALL_CONCURRENCY: usize = 4;

/// Something that can make an image available locally.
#[async_trait]
pub trait ImageProvisioner: Send + Sync {
    async fn ensure_image(
        &self,
        image: &str,
        policy: PullPolicy,
        load_local: bool,
    ) -> Result<PullDecision, ContainerError>;
}

#[async_trait]
impl ImageProvisioner for ContainerHost {
    async fn ensure_image(
        &self,
        image: &str,
        policy: PullPolicy,
        load_local: bool,
    ) -> Result<PullDecision, ContainerError> {
        self.ensure_image_exists(image, policy, load_local).await
    }
}

#[derive(Debug, Default)]
pub struct InstallSummary {
    pub installed: Vec<String>,
    /// `(extension, error)` pairs.
    pub failed: Vec<(String, String)>,
}

impl InstallSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Installer {
    config: Arc<Config>,
    provisioner: Arc<dyn ImageProvisioner>,
}

impl Installer {
    pub fn new(config: Arc<Config>, provisioner: Arc<dyn ImageProvisioner>) -> Self {
        Self {
            config,
            provisioner,
        }
    }

    /// Ensure the image of extension `name` is present.
    pub async fn ensure_image(&self, name: &str) -> Result<PullDecision, ContainerError> {
        let ext = self
            .config
            .find_extension(name)
            .ok_or_else(|| ContainerError::ExtensionNotFound(name.to_string()))?;
        self.provision(ext).await
    }

    /// Provision every configured extension, a few at a time.
    pub async fn install_all(&self) -> InstallSummary {
        let summary = Mutex::new(InstallSummary::default());

        futures::stream::iter(self.config.extensions.iter())
            .map(|ext| async move { (ext.name.clone(), self.provision(ext).await) })
            .buffer_unordered(INSTALL_CONCURRENCY)
            .for_each(|(name, result)| {
                let mut summary = match summary.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match result {
                    Ok(decision) => {
                        tracing::info!("Installed {} ({})", name, decision.reason);
                        summary.installed.push(name);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to install {}: {}", name, e);
                        summary.failed.push((name, e.to_string()));
                    }
                }
                futures::future::ready(())
            })
            .await;

        let mut summary = summary.into_inner().unwrap_or_else(|p| p.into_inner());
        summary.installed.sort();
        summary.failed.sort();
        summary
    }

    async fn provision(&self, ext: &Extension) -> Result<PullDecision, ContainerError> {
        self.provisioner
            .ensure_image(
                &ext.image,
                self.config.effective_pull_policy(ext),
                self.config.effective_load_local(ext),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ImageAction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProvisioner {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<(String, PullPolicy)>>,
    }

    #[async_trait]
    impl ImageProvisioner for FakeProvisioner {
        async fn ensure_image(
            &self,
            image: &str,
            policy: PullPolicy,
            _load_local: bool,
        ) -> Result<PullDecision, ContainerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((image.to_string(), policy));

            if image.contains("missing") {
                return Err(ContainerError::ImageNotPresent {
                    image: image.to_string(),
                });
            }
            Ok(PullDecision {
                policy: PullPolicy::IfNotPresent,
                action: ImageAction::Pull,
                reason: "test",
            })
        }
    }

    fn config(images: &[(&str, &str)]) -> Arc<Config> {
        Arc::new(Config {
            extensions: images
                .iter()
                .map(|&(name, image)| Extension::new(name, image))
                .collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_install_all_aggregates() {
        let fake = Arc::new(FakeProvisioner::default());
        let installer = Installer::new(
            config(&[
                ("a", "ghcr.io/org/a:v1"),
                ("b", "ghcr.io/org/missing:v1"),
                ("c", "ghcr.io/org/c:v1"),
            ]),
            fake.clone(),
        );
        let summary = installer.install_all().await;
        assert_eq!(summary.installed, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "b");
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_install_all_is_bounded() {
        let fake = Arc::new(FakeProvisioner::default());
        let images: Vec<(String, String)> = (0..10)
            .map(|i| (format!("e{i}"), format!("ghcr.io/org/e{i}:v1")))
            .collect();
        let refs: Vec<(&str, &str)> = images.iter().map(|(n, i)| (n.as_str(), i.as_str())).collect();
        let summary = Installer::new(config(&refs), fake.clone()).install_all().await;

        assert_eq!(summary.installed.len(), 10);
        assert!(fake.peak.load(Ordering::SeqCst) <= INSTALL_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_ensure_image_uses_effective_policy() {
        let fake = Arc::new(FakeProvisioner::default());
        let installer = Installer::new(config(&[("a", "ghcr.io/org/a:latest")]), fake.clone());
        installer.ensure_image("a").await.unwrap();
        assert_eq!(
            fake.seen.lock().unwrap()[0],
            ("ghcr.io/org/a:latest".to_string(), PullPolicy::AutoDetect)
        );

        let err = installer.ensure_image("nope").await.unwrap_err();
        assert!(matches!(err, ContainerError::ExtensionNotFound(_)));
    }
}
