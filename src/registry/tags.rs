//! Cached tag resolution and pin suggestions.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::registry::cache::{CachedTags, RegistryCache};
use crate::registry::client::RegistryClient;
use crate::registry::reference::ImageReference;
use crate::registry::RegistryError;

/// Produces a pinned replacement for an unpinned image reference.
#[async_trait]
pub trait PinSuggester: Send + Sync {
    async fn suggest_pin(&self, extension: &str, image: &str) -> Option<String>;
}

/// Registry lookups backed by the session cache.
pub struct TagResolver {
    client: RegistryClient,
    cache: Mutex<RegistryCache>,
    cache_path: PathBuf,
    ttl_seconds: u64,
}

impl TagResolver {
    /// Create a resolver over the cache stored at `cache_path`.
    pub fn new(client: RegistryClient, cache_path: PathBuf, ttl_seconds: u64) -> Self {
        Self {
            client,
            cache: Mutex::new(RegistryCache::load(&cache_path)),
            cache_path,
            ttl_seconds,
        }
    }

    /// Tags for `extension`, served from cache while fresh.
    pub async fn lookup(&self, extension: &str, image: &str) -> Result<CachedTags, RegistryError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.fresh_entry(extension, self.ttl_seconds) {
                tracing::debug!("Registry cache hit for {}", extension);
                return Ok(entry.clone());
            }
        }

        let fetched = self.client.fetch_tags(image).await?;

        let mut cache = self.cache.lock().await;
        cache.set_extension(extension, &fetched.latest_sha, fetched.tags);
        if let Err(e) = cache.save(&self.cache_path) {
            tracing::debug!("Could not save registry cache {}: {}", self.cache_path.display(), e);
        }
        cache
            .get(extension)
            .cloned()
            .ok_or_else(|| RegistryError::InvalidResponse {
                url: image.to_string(),
                reason: "cache entry missing after update".to_string(),
            })
    }
}

#[async_trait]
impl PinSuggester for TagResolver {
    async fn suggest_pin(&self, extension: &str, image: &str) -> Option<String> {
        match self.lookup(extension, image).await {
            Ok(entry) => pin_suggestion(image, &entry),
            Err(e) => {
                tracing::debug!("Tag lookup for {} failed: {}", image, e);
                None
            }
        }
    }
}

/// Highest semantic-version tag, else the `latest` digest.
pub fn pin_suggestion(image: &str, entry: &CachedTags) -> Option<String> {
    let base = ImageReference::parse(image).base();
    if let Some(tag) = latest_semver_tag(&entry.tags) {
        return Some(format!("{}:{}", base, tag));
    }
    if !entry.latest_sha.is_empty() {
        return Some(format!("{}@{}", base, entry.latest_sha));
    }
    None
}

/// Pick the highest `[v]MAJOR.MINOR.PATCH` tag; pre-release tags are ignored.
pub fn latest_semver_tag(tags: &[String]) -> Option<&str> {
    tags.iter()
        .filter_map(|t| parse_semver(t).map(|v| (v, t.as_str())))
        .max_by_key(|(v, _)| *v)
        .map(|(_, t)| t)
}

fn parse_semver(tag: &str) -> Option<(u64, u64, u64)> {
    let mut parts = tag.strip_prefix('v').unwrap_or(tag).split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
