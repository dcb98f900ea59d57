//! Session-scoped disk cache of registry tags per extension.
//!
//! Staleness is relative to the last update (`ttl_seconds` after
//! `updated_at`), not an absolute expiry. A cache that is missing, corrupt or
//! written by another format version is replaced by an empty one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Bump when the on-disk format changes.
pub const CACHE_VERSION: u32 = 1;

/// Cached tag information for one extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTags {
    pub name: String,
    #[serde(default)]
    pub latest_sha: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryCache {
    pub version: u32,
    #[serde(default)]
    pub extensions: BTreeMap<String, CachedTags>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            extensions: BTreeMap::new(),
            updated_at: None,
        }
    }
}

impl RegistryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache file for the current shell session.
    pub fn default_path() -> PathBuf {
        crate::session::session_file("registry-cache", "json")
    }

    /// Load from `path`, falling back to an empty cache on any problem.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Self::new(),
        };
        match serde_json::from_str::<RegistryCache>(&text) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                tracing::debug!(
                    "Discarding registry cache {} (version {} != {})",
                    path.display(),
                    cache.version,
                    CACHE_VERSION
                );
                Self::new()
            }
            Err(e) => {
                tracing::debug!("Discarding corrupt registry cache {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Write atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }

    /// True when never updated or older than `ttl_seconds`.
    pub fn is_expired(&self, ttl_seconds: u64) -> bool {
        self.is_expired_at(ttl_seconds, Utc::now())
    }

    pub fn is_expired_at(&self, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
        is_stale(self.updated_at, ttl_seconds, now)
    }

    pub fn get(&self, name: &str) -> Option<&CachedTags> {
        self.extensions.get(name)
    }

    /// Entry for `name` if it was refreshed within `ttl_seconds`.
    pub fn fresh_entry(&self, name: &str, ttl_seconds: u64) -> Option<&CachedTags> {
        self.extensions
            .get(name)
            .filter(|e| !is_stale(e.updated_at, ttl_seconds, Utc::now()))
    }

    /// Record tags for `name`, refreshing the entry and cache timestamps.
    pub fn set_extension(&mut self, name: &str, latest_sha: &str, tags: Vec<String>) {
        self.set_extension_at(name, latest_sha, tags, Utc::now());
    }

    pub fn set_extension_at(
        &mut self,
        name: &str,
        latest_sha: &str,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) {
        self.extensions.insert(
            name.to_string(),
            CachedTags {
                name: name.to_string(),
                latest_sha: latest_sha.to_string(),
                tags,
                updated_at: Some(now),
            },
        );
        self.updated_at = Some(now);
    }
}

/// Zero timestamps (absent, or Go's `0001-01-01`) are always stale.
fn is_stale(updated_at: Option<DateTime<Utc>>, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
    match updated_at {
        None => true,
        Some(ts) if ts.year() <= 1 => true,
        Some(ts) => {
            let age = now.signed_duration_since(ts);
            age.num_milliseconds() > (ttl_seconds as i64).saturating_mul(1000)
        }
    }
}
