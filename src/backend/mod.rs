//! Backend abstraction — capability trait, ordered chain, cache-as-backend,
//! and the config-driven factory (§4.7).

pub mod archive;
pub mod replay;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::Result;

/// A response from any backend in the chain, already normalized to a
/// single shape regardless of source.
#[derive(Debug, Clone)]
pub struct WaybackResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub content: Vec<u8>,
    pub content_type: String,
    pub archived_url: String,
    pub timestamp: String,
    /// `false` for backends whose content is already clean (pywb, cache).
    pub needs_transform: bool,
    /// `false` for backends whose content should not be re-written back to
    /// the cache (pywb, cache itself).
    pub cacheable: bool,
}

impl WaybackResponse {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307 | 308)
    }
}

/// A single source of archived content.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> String;

    /// `true` for backends that hit the live internet (the archive.org
    /// client); used to build a live-only chain for the prefetch crawler.
    fn is_live(&self) -> bool;

    async fn fetch(&self, url: &str) -> Result<Option<WaybackResponse>>;

    /// Update the replay target date/tolerance in place. Default no-op for
    /// backends with no notion of a target date (the cache).
    fn update_date_config(&self, _target_date: &str, _date_tolerance_days: u32) {}
}

/// Tries backends in order; the first hit wins. Cheap to clone — each
/// backend is held behind an `Arc`.
#[derive(Clone)]
pub struct BackendChain {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendChain {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    pub fn name(&self) -> String {
        self.backends
            .iter()
            .map(|b| b.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn is_live(&self) -> bool {
        self.backends.iter().any(|b| b.is_live())
    }

    pub async fn fetch(&self, url: &str) -> Result<Option<WaybackResponse>> {
        for backend in &self.backends {
            match backend.fetch(url).await {
                Ok(Some(response)) => {
                    tracing::debug!(target: "backend", "HIT {}: {url}", backend.name());
                    return Ok(Some(response));
                }
                Ok(None) => {
                    tracing::debug!(target: "backend", "MISS {}: {url}", backend.name());
                }
                Err(e) => {
                    tracing::warn!(target: "backend", "{} errored for {url}: {e}", backend.name());
                }
            }
        }
        Ok(None)
    }

    pub fn update_date_config(&self, target_date: &str, date_tolerance_days: u32) {
        for backend in &self.backends {
            backend.update_date_config(target_date, date_tolerance_days);
        }
    }

    /// A new chain containing only the `is_live` backends, for the prefetch
    /// crawler (which must never serve stale cache hits while discovering
    /// new pages).
    pub fn live_only(&self) -> BackendChain {
        BackendChain::new(
            self.backends
                .iter()
                .filter(|b| b.is_live())
                .cloned()
                .collect(),
        )
    }
}

/// Read-only cache lookup as a backend in the chain.
pub struct CacheBackend {
    cache: Arc<Cache>,
}

impl CacheBackend {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Backend for CacheBackend {
    fn name(&self) -> String {
        "cache".to_string()
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn fetch(&self, url: &str) -> Result<Option<WaybackResponse>> {
        let cached = self.cache.get(url).await?;
        Ok(cached.map(|c| WaybackResponse {
            status_code: c.status_code,
            headers: c.headers,
            content: c.content,
            content_type: c.content_type,
            archived_url: c.archived_url,
            timestamp: c.timestamp,
            needs_transform: false,
            cacheable: false,
        }))
    }
}

/// Build a `BackendChain` from config. An empty `backends.chain` means the
/// default: `cache -> archive`.
pub fn build_backend(config: &Config, cache: Arc<Cache>) -> BackendChain {
    let chain_cfg = &config.backends.chain;

    if chain_cfg.is_empty() {
        return default_chain(config, cache);
    }

    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
    for entry in chain_cfg {
        match entry.kind.as_str() {
            "cache" => backends.push(Arc::new(CacheBackend::new(cache.clone()))),
            "archive" => backends.push(Arc::new(archive::ArchiveClient::new(
                entry.base_url.clone().unwrap_or_else(|| config.wayback.base_url.clone()),
                config.wayback.target_date.clone(),
                config.wayback.date_tolerance_days,
                config.wayback.geocities_fix,
            ))),
            "replay" => backends.push(Arc::new(replay::ReplayClient::new(
                entry
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:8080".to_string()),
                entry.collection.clone().unwrap_or_else(|| "web".to_string()),
                config.wayback.target_date.clone(),
                config.wayback.date_tolerance_days,
            ))),
            other => tracing::warn!(target: "backend", "unknown backend type {other:?}, skipping"),
        }
    }

    if backends.is_empty() {
        tracing::warn!(target: "backend", "empty chain after config, using default (cache -> archive)");
        return default_chain(config, cache);
    }

    BackendChain::new(backends)
}

fn default_chain(config: &Config, cache: Arc<Cache>) -> BackendChain {
    BackendChain::new(vec![
        Arc::new(CacheBackend::new(cache)),
        Arc::new(archive::ArchiveClient::new(
            config.wayback.base_url.clone(),
            config.wayback.target_date.clone(),
            config.wayback.date_tolerance_days,
            config.wayback.geocities_fix,
        )),
    ])
}
