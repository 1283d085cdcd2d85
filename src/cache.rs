//! Two-tier (curated + hot) cache over a shared Redis store (§3, §4.2).

use base64::Engine;
use deadpool_redis::{redis::AsyncCommands, Pool};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::urlkey;

/// A response stored in the cache, bytes-exact on round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub content: Vec<u8>,
    pub content_type: String,
    pub archived_url: String,
    pub timestamp: String,
}

/// JSON-serializable wire envelope: body is base64 for the string-valued
/// store, everything else as-is. Implementations may pick a different
/// envelope as long as it round-trips losslessly (§4.2).
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    status_code: u16,
    headers: HashMap<String, String>,
    content: String,
    content_type: String,
    archived_url: String,
    timestamp: String,
}

impl From<&CachedResponse> for Envelope {
    fn from(r: &CachedResponse) -> Self {
        Envelope {
            status_code: r.status_code,
            headers: r.headers.clone(),
            content: base64::engine::general_purpose::STANDARD.encode(&r.content),
            content_type: r.content_type.clone(),
            archived_url: r.archived_url.clone(),
            timestamp: r.timestamp.clone(),
        }
    }
}

impl TryFrom<Envelope> for CachedResponse {
    type Error = Error;

    fn try_from(e: Envelope) -> Result<Self> {
        let content = base64::engine::general_purpose::STANDARD
            .decode(e.content)
            .map_err(|err| Error::Store(format!("bad base64 envelope: {err}")))?;
        Ok(CachedResponse {
            status_code: e.status_code,
            headers: e.headers,
            content,
            content_type: e.content_type,
            archived_url: e.archived_url,
            timestamp: e.timestamp,
        })
    }
}

/// Which tier(s) an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Curated,
    Both,
}

/// Crawl state `{state, progress}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlStatus {
    pub state: String,
    pub progress: CrawlProgress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlProgress {
    #[serde(default)]
    pub fetched: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub current_url: String,
}

const VIEWS_KEY: &str = "views:urls";
const CRAWL_SEEDS_KEY: &str = "crawl:seeds";
const CRAWL_STATUS_KEY: &str = "crawl:status";
const CRAWL_LOG_KEY: &str = "crawl:log";
const CRAWL_LOG_MAX: isize = 200;

/// The two-tier cache, holding the pool and prefix/TTL configuration.
#[derive(Clone)]
pub struct Cache {
    pool: Pool,
    hot_ttl: u64,
    curated_prefix: String,
    hot_prefix: String,
    allowlist_key: String,
}

impl Cache {
    pub fn new(pool: Pool, config: &CacheConfig) -> Self {
        Self {
            pool,
            hot_ttl: config.hot_ttl_seconds,
            curated_prefix: config.curated_prefix.clone(),
            hot_prefix: config.hot_prefix.clone(),
            allowlist_key: config.allowlist_key.clone(),
        }
    }

    fn curated_key(&self, url: &str) -> String {
        format!("{}{}", self.curated_prefix, urlkey::key(url))
    }

    fn hot_key(&self, url: &str) -> String {
        format!("{}{}", self.hot_prefix, urlkey::key(url))
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    fn encode(resp: &CachedResponse) -> Result<String> {
        Ok(serde_json::to_string(&Envelope::from(resp))?)
    }

    fn decode(data: String) -> Result<CachedResponse> {
        let envelope: Envelope = serde_json::from_str(&data)?;
        envelope.try_into()
    }

    /// Tries `curated:` then `hot:`.
    pub async fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let mut conn = self.conn().await?;

        let curated: Option<String> = conn.get(self.curated_key(url)).await?;
        if let Some(data) = curated {
            tracing::debug!(target: "cache", "HIT (curated): {url}");
            return Ok(Some(Self::decode(data)?));
        }

        let hot: Option<String> = conn.get(self.hot_key(url)).await?;
        if let Some(data) = hot {
            tracing::debug!(target: "cache", "HIT (hot): {url}");
            return Ok(Some(Self::decode(data)?));
        }

        tracing::debug!(target: "cache", "MISS: {url}");
        Ok(None)
    }

    /// Write `hot:<key>` with the configured TTL.
    pub async fn set_hot(&self, url: &str, response: &CachedResponse) -> Result<()> {
        let mut conn = self.conn().await?;
        let data = Self::encode(response)?;
        conn.set_ex::<_, _, ()>(self.hot_key(url), data, self.hot_ttl)
            .await?;
        tracing::debug!(target: "cache", "SET (hot, ttl={}s): {url}", self.hot_ttl);
        Ok(())
    }

    /// Write `curated:<key>` with no expiry.
    pub async fn set_curated(&self, url: &str, response: &CachedResponse) -> Result<()> {
        let mut conn = self.conn().await?;
        let data = Self::encode(response)?;
        conn.set::<_, _, ()>(self.curated_key(url), data).await?;
        tracing::debug!(target: "cache", "SET (curated): {url}");
        Ok(())
    }

    /// Idempotent delete from one or both tiers.
    pub async fn delete(&self, url: &str, tier: Tier) -> Result<()> {
        let mut conn = self.conn().await?;
        if matches!(tier, Tier::Hot | Tier::Both) {
            conn.del::<_, ()>(self.hot_key(url)).await?;
        }
        if matches!(tier, Tier::Curated | Tier::Both) {
            conn.del::<_, ()>(self.curated_key(url)).await?;
        }
        Ok(())
    }

    /// Scan and delete every `hot:*` entry, iterating the cursor to
    /// completion before returning (no partial-scan observability).
    pub async fn clear_hot(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", self.hot_prefix);
        let keys = self.scan_keys(&mut conn, &pattern).await?;
        let deleted = keys.len() as u64;
        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        tracing::info!(target: "cache", "cleared {deleted} hot entries");
        Ok(deleted)
    }

    async fn scan_keys(
        &self,
        conn: &mut deadpool_redis::Connection,
        pattern: &str,
    ) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = deadpool_redis::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(conn)
                .await?;
            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(found)
    }

    // -- Allowlist -----------------------------------------------------

    pub async fn is_allowed(&self, url: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.sismember(&self.allowlist_key, url).await?)
    }

    pub async fn add_to_allowlist(&self, url: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(&self.allowlist_key, url).await?;
        Ok(())
    }

    pub async fn remove_from_allowlist(&self, url: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(&self.allowlist_key, url).await?;
        Ok(())
    }

    pub async fn get_allowlist(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(&self.allowlist_key).await?)
    }

    pub async fn clear_allowlist(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(&self.allowlist_key).await?;
        Ok(())
    }

    // -- View counter ----------------------------------------------------

    /// Fire-and-forget increment; callers should spawn this and ignore the
    /// result on the serving path.
    pub async fn track_view(&self, host: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.zincr::<_, _, _, ()>(VIEWS_KEY, host, 1).await?;
        Ok(())
    }

    pub async fn most_viewed(&self, count: isize) -> Result<Vec<(String, i64)>> {
        let mut conn = self.conn().await?;
        let results: Vec<(String, i64)> = conn
            .zrevrange_withscores(VIEWS_KEY, 0, count.saturating_sub(1))
            .await?;
        Ok(results)
    }

    // -- Crawl seeds -------------------------------------------------------

    pub async fn add_seed(&self, url: &str, depth: u32) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(CRAWL_SEEDS_KEY, url, depth.to_string())
            .await?;
        Ok(())
    }

    pub async fn remove_seed(&self, url: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.hdel::<_, _, ()>(CRAWL_SEEDS_KEY, url).await?;
        Ok(())
    }

    pub async fn get_seeds(&self) -> Result<Vec<(String, u32)>> {
        let mut conn = self.conn().await?;
        let data: HashMap<String, String> = conn.hgetall(CRAWL_SEEDS_KEY).await?;
        Ok(data
            .into_iter()
            .filter_map(|(url, depth)| depth.parse::<u32>().ok().map(|d| (url, d)))
            .collect())
    }

    pub async fn clear_seeds(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(CRAWL_SEEDS_KEY).await?;
        Ok(())
    }

    // -- Crawl status --------------------------------------------------

    pub async fn set_crawl_status(&self, state: &str, progress: &CrawlProgress) -> Result<()> {
        let mut conn = self.conn().await?;
        let progress_json = serde_json::to_string(progress)?;
        let _: () = deadpool_redis::redis::pipe()
            .hset(CRAWL_STATUS_KEY, "state", state)
            .hset(CRAWL_STATUS_KEY, "progress", progress_json)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Update only `progress`, leaving `state` untouched.
    pub async fn set_crawl_progress(&self, progress: &CrawlProgress) -> Result<()> {
        let mut conn = self.conn().await?;
        let progress_json = serde_json::to_string(progress)?;
        conn.hset::<_, _, _, ()>(CRAWL_STATUS_KEY, "progress", progress_json)
            .await?;
        Ok(())
    }

    pub async fn get_crawl_status(&self) -> Result<CrawlStatus> {
        let mut conn = self.conn().await?;
        let data: HashMap<String, String> = conn.hgetall(CRAWL_STATUS_KEY).await?;
        if data.is_empty() {
            return Ok(CrawlStatus {
                state: "idle".to_string(),
                progress: CrawlProgress::default(),
            });
        }
        let state = data.get("state").cloned().unwrap_or_else(|| "idle".to_string());
        let progress = data
            .get("progress")
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or_default();
        Ok(CrawlStatus { state, progress })
    }

    // -- Crawl log -------------------------------------------------------

    pub async fn append_crawl_log(&self, line: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = deadpool_redis::redis::pipe()
            .lpush(CRAWL_LOG_KEY, line)
            .ltrim(CRAWL_LOG_KEY, 0, CRAWL_LOG_MAX - 1)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_crawl_log(&self, count: isize) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(CRAWL_LOG_KEY, 0, count.saturating_sub(1)).await?)
    }

    pub async fn clear_crawl_log(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(CRAWL_LOG_KEY).await?;
        Ok(())
    }

    // -- Stats (admin dashboard only, §4.2 supplemented) ------------------

    pub async fn stats(&self) -> Result<CacheStats> {
        let mut conn = self.conn().await?;
        let curated_pattern = format!("{}*", self.curated_prefix);
        let hot_pattern = format!("{}*", self.hot_prefix);
        let curated_count = self.scan_keys(&mut conn, &curated_pattern).await?.len();
        let hot_count = self.scan_keys(&mut conn, &hot_pattern).await?.len();
        let allowlist_count: usize = conn.scard(&self.allowlist_key).await?;
        Ok(CacheStats {
            curated_count,
            hot_count,
            allowlist_count,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub curated_count: usize,
    pub hot_count: usize,
    pub allowlist_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CachedResponse {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        CachedResponse {
            status_code: 200,
            headers,
            content: b"<html>hi</html>".to_vec(),
            content_type: "text/html".to_string(),
            archived_url: "http://example.com/".to_string(),
            timestamp: "20010101000000".to_string(),
        }
    }

    #[test]
    fn envelope_round_trips_bytes_exact() {
        let r = sample();
        let envelope = Envelope::from(&r);
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        let back: CachedResponse = decoded.try_into().unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn envelope_base64_is_lossless_for_binary_content() {
        let mut r = sample();
        r.content = vec![0u8, 1, 2, 255, 254, 253, 0, 0];
        let envelope = Envelope::from(&r);
        let back: CachedResponse = envelope.try_into().unwrap();
        assert_eq!(back.content, r.content);
    }
}
