//! Replay-instance (pywb) HTTP client (§4.6).

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::{Backend, WaybackResponse};
use crate::error::Result;

const MAX_REDIRECTS: u32 = 10;

static SEGMENT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[a-z_]*/(.*)$").unwrap());

/// Client for fetching pages from a pywb replay instance.
pub struct ReplayClient {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    target_date: RwLock<String>,
    date_tolerance_days: RwLock<u32>,
}

impl ReplayClient {
    pub fn new(base_url: String, collection: String, target_date: String, date_tolerance_days: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("WaybackProxy/0.1.0")
            .build()
            .expect("replay http client builds");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            target_date: RwLock::new(target_date),
            date_tolerance_days: RwLock::new(date_tolerance_days),
        }
    }

    fn target_date(&self) -> String {
        self.target_date.read().unwrap().clone()
    }

    fn build_url(&self, url: &str) -> String {
        format!("{}/{}/{}id_/{}", self.base_url, self.collection, self.target_date(), url)
    }

    fn base_host(&self) -> Option<String> {
        Url::parse(&self.base_url).ok().and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    fn extract_timestamp(&self, pywb_url: &str) -> String {
        let prefix = format!("/{}/", self.collection);
        if let Some(idx) = pywb_url.find(&prefix) {
            let rest = &pywb_url[idx + prefix.len()..];
            if let Some(caps) = Regex::new(r"^(\d+)").unwrap().captures(rest) {
                if let Some(m) = caps.get(1) {
                    return m.as_str().chars().take(14).collect();
                }
            }
        }
        self.target_date()
    }

    fn extract_original_url(&self, redirect_url: &str) -> Option<String> {
        let prefix = format!("{}/{}/", self.base_url, self.collection);
        let rest = redirect_url.strip_prefix(&prefix)?;
        SEGMENT_PREFIX.captures(rest).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl Backend for ReplayClient {
    fn name(&self) -> String {
        format!("pywb({}/{})", self.base_url, self.collection)
    }

    fn is_live(&self) -> bool {
        false
    }

    fn update_date_config(&self, target_date: &str, date_tolerance_days: u32) {
        *self.target_date.write().unwrap() = target_date.to_string();
        *self.date_tolerance_days.write().unwrap() = date_tolerance_days;
    }

    async fn fetch(&self, url: &str) -> Result<Option<WaybackResponse>> {
        let mut pywb_url = self.build_url(url);
        let base_host = self.base_host();
        let mut redirect_count = 0;

        while redirect_count < MAX_REDIRECTS {
            let response = match self.client.get(&pywb_url).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "backend", "pywb failed to fetch {url}: {e}");
                    return Ok(None);
                }
            };

            let status = response.status().as_u16();
            let response_url = response.url().to_string();
            let headers = super::archive::headers_to_map(response.headers());

            if matches!(status, 301 | 302 | 303 | 307 | 308) {
                let location = headers.get("location").cloned().unwrap_or_default();
                if location.is_empty() {
                    break;
                }

                let resolved = if location.starts_with('/') {
                    format!("{}{}", self.base_url, location)
                } else {
                    location
                };

                let redirect_host = Url::parse(&resolved).ok().and_then(|u| u.host_str().map(|s| s.to_string()));
                if redirect_host == base_host {
                    pywb_url = resolved;
                    redirect_count += 1;
                    continue;
                }

                if let Some(archived_url) = self.extract_original_url(&resolved) {
                    tracing::info!(target: "backend", "pywb redirect {url} -> {archived_url}");
                    return Ok(Some(WaybackResponse {
                        status_code: status,
                        headers: [("location".to_string(), archived_url)].into_iter().collect(),
                        content: Vec::new(),
                        content_type: "text/html".to_string(),
                        archived_url: url.to_string(),
                        timestamp: self.target_date(),
                        needs_transform: false,
                        cacheable: false,
                    }));
                }
                break;
            }

            if status == 404 {
                return Ok(None);
            }

            let content = response.bytes().await?.to_vec();

            if status >= 400 && content.is_empty() {
                tracing::info!(target: "backend", "pywb {status} for {url}");
                return Ok(None);
            }

            let content_type = headers
                .get("content-type")
                .cloned()
                .unwrap_or_else(|| "text/html".to_string());
            let timestamp = self.extract_timestamp(&response_url);

            return Ok(Some(WaybackResponse {
                status_code: status,
                headers,
                content,
                content_type,
                archived_url: url.to_string(),
                timestamp,
                needs_transform: false,
                cacheable: false,
            }));
        }

        tracing::warn!(target: "backend", "pywb too many redirects for {url}");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ReplayClient {
        ReplayClient::new(
            "http://localhost:8080".to_string(),
            "web".to_string(),
            "20010101".to_string(),
            365,
        )
    }

    #[test]
    fn build_url_uses_id_modifier() {
        let c = client();
        assert_eq!(
            c.build_url("http://example.com/"),
            "http://localhost:8080/web/20010101id_/http://example.com/"
        );
    }

    #[test]
    fn extract_timestamp_reads_collection_segment() {
        let c = client();
        let ts = c.extract_timestamp("http://localhost:8080/web/20050615123456id_/http://example.com/");
        assert_eq!(ts, "20050615123456");
    }

    #[test]
    fn extract_original_url_strips_pywb_prefix() {
        let c = client();
        let extracted =
            c.extract_original_url("http://localhost:8080/web/20010101id_/http://example.com/page");
        assert_eq!(extracted.as_deref(), Some("http://example.com/page"));
    }

    #[test]
    fn name_includes_base_url_and_collection() {
        let c = client();
        assert_eq!(c.name(), "pywb(http://localhost:8080/web)");
    }
}
