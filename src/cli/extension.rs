//! Extension commands: run, install, metadata, validate, list.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthResolver;
use crate::cli::load_store;
use crate::config::{Config, ConfigStore};
use crate::container::{ContainerHost, is_ci};
use crate::installer::Installer;
use crate::pinning::check_image_pinning;
use crate::registry::{RegistryCache, RegistryClient, TagResolver, has_latest_tag};

/// Run an extension and return its exit code.
pub async fn run_extension_command(
    overrides: &[PathBuf],
    extension: &str,
    args: &[String],
) -> anyhow::Result<i32> {
    let store = load_store(overrides)?;
    if store.find_extension(extension).is_none() {
        anyhow::bail!(
            "Extension '{}' not found. Configured extensions: {}",
            extension,
            store.config().extension_names().join(", ")
        );
    }

    enforce_pinning(store.config()).await?;

    let host = ContainerHost::connect(&store).await?;
    let code = host.run_extension(extension, args).await?;
    Ok(i32::try_from(code).unwrap_or(1))
}

pub async fn run_install_command(overrides: &[PathBuf], extension: Option<&str>) -> anyhow::Result<i32> {
    let store = load_store(overrides)?;
    enforce_pinning(store.config()).await?;

    let host = ContainerHost::connect(&store).await?;
    let installer = Installer::new(store.shared(), Arc::new(host));

    if let Some(name) = extension {
        let decision = installer.ensure_image(name).await?;
        println!("{}: ready ({})", name, decision.reason);
        return Ok(0);
    }

    let summary = installer.install_all().await;
    for name in &summary.installed {
        println!("  ✓ {}", name);
    }
    for (name, error) in &summary.failed {
        println!("  ✗ {}: {}", name, error);
    }
    println!(
        "{} installed, {} failed",
        summary.installed.len(),
        summary.failed.len()
    );
    Ok(if summary.is_success() { 0 } else { 1 })
}

pub async fn run_metadata_command(overrides: &[PathBuf], extension: &str) -> anyhow::Result<i32> {
    let store = load_store(overrides)?;
    let host = ContainerHost::connect(&store).await?;
    let output = host.execute_metadata_command(extension).await?;
    print!("{}", output);
    Ok(0)
}

pub fn run_validate_command(overrides: &[PathBuf]) -> anyhow::Result<i32> {
    let store = load_store(overrides)?;
    println!("Configuration is valid.");
    print_sources(&store);
    println!("  {} extension(s)", store.config().extensions.len());
    Ok(0)
}

pub fn run_list_command(overrides: &[PathBuf]) -> anyhow::Result<i32> {
    let store = load_store(overrides)?;
    let config = store.config();
    if config.extensions.is_empty() {
        println!("No extensions configured.");
        return Ok(0);
    }

    let width = config
        .extensions
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    for ext in &config.extensions {
        let pin = if has_latest_tag(&ext.image) { "  (unpinned)" } else { "" };
        println!(
            "{:width$}  {}  [{}]{}",
            ext.name,
            ext.image,
            config.effective_pull_policy(ext),
            pin,
            width = width
        );
    }
    Ok(0)
}

fn print_sources(store: &ConfigStore) {
    for path in store.sources() {
        println!("  {}", path.display());
    }
}

/// Fail in CI on unpinned images; warn once per session elsewhere.
async fn enforce_pinning(config: &Config) -> anyhow::Result<()> {
    if !config.extensions.iter().any(|e| has_latest_tag(&e.image)) {
        return Ok(());
    }

    let credentials = AuthResolver::for_config(config).resolve().await.ok().map(|c| c.basic());
    let client = RegistryClient::new(
        config.registry_host(),
        config.registry_timeout(),
        config.retry_attempts(),
    )
    .with_credentials(credentials);
    let resolver = TagResolver::new(client, RegistryCache::default_path(), config.cache_ttl_seconds());

    check_image_pinning(config, is_ci(), &resolver).await?;
    Ok(())
}
