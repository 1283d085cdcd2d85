//! Archive (web.archive.org) HTTP client: redirect following, GeoCities
//! rerouting, JavaScript re-fetch bypass, and Wayback special-page
//! detection (§4.5).

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;

use super::{Backend, WaybackResponse};
use crate::error::Result;

const MAX_REDIRECTS: u32 = 10;
const GEOCITIES_HOSTS: &[&str] = &["www.geocities.com", "geocities.com"];
const OOCITIES_HOST: &str = "www.oocities.org";

static PLAYBACK_IFRAME: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r#"<iframe id="playback" src="((?:(?:https?:)?//web\.archive\.org)?/web/[^"]+)""#)
        .unwrap()
});
static REDIRECT_IMPATIENT: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(
        r#"<p class="impatient"><a href="(?:(?:https?:)?//web\.archive\.org)?/web/([^/]+)/([^"]+)">Impatient\?</a></p>"#,
    )
    .unwrap()
});
static REDIRECT_CODE: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r#"<p class="code shift red">Got an HTTP ([0-9]+)"#).unwrap());
static WAYBACK_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:(?:https?:)?//web\.archive\.org)?/web/([^/]+/)(.+)").unwrap());
static PORT_80: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^/]*//[^/:]+):80/").unwrap());
static JS_BYPASS_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https?://web\.archive\.org/web/[0-9]+)([^/]*)(/.+)").unwrap());

enum PageOutcome {
    Normal,
    Excluded,
    Iframe(String),
    Redirect(WaybackResponse),
}

/// Client for fetching pages from the Wayback Machine.
pub struct ArchiveClient {
    client: reqwest::Client,
    base_url: String,
    target_date: RwLock<String>,
    date_tolerance_days: RwLock<u32>,
    geocities_fix: bool,
}

impl ArchiveClient {
    pub fn new(base_url: String, target_date: String, date_tolerance_days: u32, geocities_fix: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("WaybackProxy/0.1.0")
            .build()
            .expect("archive http client builds");

        Self {
            client,
            base_url,
            target_date: RwLock::new(target_date),
            date_tolerance_days: RwLock::new(date_tolerance_days),
            geocities_fix,
        }
    }

    fn target_date(&self) -> String {
        self.target_date.read().unwrap().clone()
    }

    fn build_wayback_url(&self, url: &str, modifier: &str) -> String {
        format!("{}/web/{}{}/{}", self.base_url, self.target_date(), modifier, url)
    }

    fn apply_geocities_fix(&self, url: &str) -> String {
        if !self.geocities_fix {
            return url.to_string();
        }
        for host in GEOCITIES_HOSTS {
            let marker = format!("://{host}");
            if url.contains(&marker) {
                let rerouted = url.replacen(&marker, &format!("://{OOCITIES_HOST}"), 1);
                tracing::debug!(target: "backend", "rerouted to {rerouted}");
                return rerouted;
            }
        }
        url.to_string()
    }

    fn extract_timestamp(url: &str, fallback: &str) -> String {
        if let Some(idx) = url.find("/web/") {
            let rest = &url[idx + 5..];
            let ts_part = rest.split('/').next().unwrap_or("");
            let digits: String = ts_part.chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return digits.chars().take(14).collect();
            }
        }
        fallback.to_string()
    }

    fn extract_archived_url(candidate: &str) -> Option<String> {
        WAYBACK_REDIRECT
            .captures(candidate)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_string())
    }

    /// Detect and handle Wayback Machine special pages (exclusion notices,
    /// playback iframes, the "Impatient?" interstitial redirect page).
    fn handle_wayback_page(content: &[u8], original_url: &str, base_url: &str) -> PageOutcome {
        let is_wayback_page = contains_subslice(content, b"<title>Wayback Machine</title>")
            || (contains_subslice(content, b"<title></title>")
                && contains_subslice(content, b"Wayback Machine"));
        if !is_wayback_page {
            return PageOutcome::Normal;
        }

        if contains_subslice(content, b"This URL has been excluded from the Wayback Machine") {
            return PageOutcome::Excluded;
        }

        if let Some(m) = PLAYBACK_IFRAME.captures(content) {
            let raw = m.get(1).map(|g| g.as_bytes()).unwrap_or_default();
            let mut iframe_url = String::from_utf8_lossy(raw).into_owned();
            if iframe_url.starts_with('/') {
                iframe_url = format!("{base_url}{iframe_url}");
            }
            return PageOutcome::Iframe(iframe_url);
        }

        if let Some(m) = REDIRECT_IMPATIENT.captures(content) {
            let date_code = String::from_utf8_lossy(m.get(1).map(|g| g.as_bytes()).unwrap_or_default())
                .into_owned();
            let mut archived_url =
                String::from_utf8_lossy(m.get(2).map(|g| g.as_bytes()).unwrap_or_default()).into_owned();

            if !archived_url.contains("://") && !archived_url.starts_with('/') {
                archived_url = format!("http://{archived_url}");
            } else if let Some(rest) = archived_url.strip_prefix("https://") {
                archived_url = format!("http://{rest}");
            }

            let redirect_code = REDIRECT_CODE
                .captures(content)
                .and_then(|c| c.get(1))
                .and_then(|g| std::str::from_utf8(g.as_bytes()).ok())
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(302);

            tracing::info!(target: "backend", "wayback redirect page: {original_url} -> {archived_url}");
            return PageOutcome::Redirect(WaybackResponse {
                status_code: redirect_code,
                headers: [("location".to_string(), archived_url)].into_iter().collect(),
                content: Vec::new(),
                content_type: "text/html".to_string(),
                archived_url: original_url.to_string(),
                timestamp: date_code.trim_end_matches('/').to_string(),
                needs_transform: true,
                cacheable: true,
            });
        }

        PageOutcome::Normal
    }

    /// Fetch raw content (images, scripts) using the `id_` modifier for
    /// unmodified bytes.
    pub async fn fetch_raw(&self, url: &str) -> Result<Option<WaybackResponse>> {
        let wayback_url = self.build_wayback_url(url, "id_");
        let response = self.client.get(&wayback_url).send().await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let status_code = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let content = response.bytes().await?.to_vec();

        Ok(Some(WaybackResponse {
            status_code,
            headers,
            content,
            content_type,
            archived_url: url.to_string(),
            timestamp: self.target_date(),
            needs_transform: true,
            cacheable: true,
        }))
    }
}

#[async_trait]
impl Backend for ArchiveClient {
    fn name(&self) -> String {
        "archive".to_string()
    }

    fn is_live(&self) -> bool {
        true
    }

    fn update_date_config(&self, target_date: &str, date_tolerance_days: u32) {
        *self.target_date.write().unwrap() = target_date.to_string();
        *self.date_tolerance_days.write().unwrap() = date_tolerance_days;
    }

    async fn fetch(&self, url: &str) -> Result<Option<WaybackResponse>> {
        let fetch_url = self.apply_geocities_fix(url);
        let mut wayback_url = self.build_wayback_url(&fetch_url, "if_");
        let mut redirect_count = 0;

        while redirect_count < MAX_REDIRECTS {
            let response = match self.client.get(&wayback_url).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "backend", "failed to fetch {url}: {e}");
                    return Ok(None);
                }
            };

            let status = response.status().as_u16();
            let response_url = response.url().to_string();
            let headers = headers_to_map(response.headers());

            if matches!(status, 301 | 302 | 303 | 307 | 308) {
                let location = headers.get("location").cloned().unwrap_or_default();
                if location.is_empty() {
                    break;
                }

                if let Some(archived_dest_raw) = Self::extract_archived_url(&location) {
                    let archived_dest = PORT_80.replace(&archived_dest_raw, "$1/").into_owned();
                    if archived_dest != fetch_url && archived_dest != url {
                        tracing::info!(target: "backend", "redirect {url} -> {archived_dest}");
                        return Ok(Some(WaybackResponse {
                            status_code: status,
                            headers: [("location".to_string(), archived_dest)].into_iter().collect(),
                            content: Vec::new(),
                            content_type: "text/html".to_string(),
                            archived_url: url.to_string(),
                            timestamp: Self::extract_timestamp(&location, &self.target_date()),
                            needs_transform: true,
                            cacheable: true,
                        }));
                    }
                }

                wayback_url = if location.starts_with('/') {
                    format!("{}{}", self.base_url, location)
                } else {
                    location
                };
                redirect_count += 1;
                continue;
            }

            if status >= 400 && !headers.contains_key("link") {
                tracing::info!(target: "backend", "{status} for {url}");
                return Ok(None);
            }

            let content_type = headers
                .get("content-type")
                .cloned()
                .unwrap_or_else(|| "text/html".to_string());
            let guessed_type = headers
                .get("x-archive-guessed-content-type")
                .cloned()
                .unwrap_or_else(|| content_type.clone());

            if guessed_type.contains("javascript") {
                if let Some(caps) = JS_BYPASS_URL.captures(&response_url) {
                    let modifier = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                    if modifier != "im_" {
                        let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                        let suffix = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                        wayback_url = format!("{prefix}im_{suffix}");
                        tracing::debug!(target: "backend", "js-bypass re-fetch with im_ modifier: {url}");
                        redirect_count += 1;
                        continue;
                    }
                }
            }

            let content = response.bytes().await?.to_vec();

            if guessed_type.contains("text/html") {
                match Self::handle_wayback_page(&content, url, &self.base_url) {
                    PageOutcome::Excluded => {
                        tracing::info!(target: "backend", "url excluded: {url}");
                        return Ok(None);
                    }
                    PageOutcome::Iframe(iframe_url) => {
                        wayback_url = iframe_url;
                        redirect_count += 1;
                        tracing::debug!(target: "backend", "extracting content from iframe: {url}");
                        continue;
                    }
                    PageOutcome::Redirect(resp) => return Ok(Some(resp)),
                    PageOutcome::Normal => {}
                }
            }

            let timestamp = Self::extract_timestamp(&response_url, &self.target_date());

            return Ok(Some(WaybackResponse {
                status_code: status,
                headers,
                content,
                content_type,
                archived_url: url.to_string(),
                timestamp,
                needs_transform: true,
                cacheable: true,
            }));
        }

        tracing::warn!(target: "backend", "too many redirects for {url}");
        Ok(None)
    }
}

pub(crate) fn headers_to_map(headers: &reqwest::header::HeaderMap) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
        .collect()
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_extraction_keeps_digits_only() {
        let ts = ArchiveClient::extract_timestamp(
            "https://web.archive.org/web/20010615123456if_/http://example.com/",
            "20010101",
        );
        assert_eq!(ts, "20010615123456");
    }

    #[test]
    fn timestamp_extraction_falls_back_without_web_segment() {
        let ts = ArchiveClient::extract_timestamp("http://example.com/", "20010101");
        assert_eq!(ts, "20010101");
    }

    #[test]
    fn archived_url_is_extracted_from_redirect_location() {
        let extracted =
            ArchiveClient::extract_archived_url("/web/20010101000000/http://example.com/page");
        assert_eq!(extracted.as_deref(), Some("http://example.com/page"));
    }

    #[test]
    fn geocities_hosts_reroute_to_oocities() {
        let client = ArchiveClient::new(
            "https://web.archive.org".to_string(),
            "20010101".to_string(),
            365,
            true,
        );
        let fixed = client.apply_geocities_fix("http://www.geocities.com/foo/bar");
        assert_eq!(fixed, "http://www.oocities.org/foo/bar");
    }

    #[test]
    fn geocities_fix_disabled_is_a_noop() {
        let client = ArchiveClient::new(
            "https://web.archive.org".to_string(),
            "20010101".to_string(),
            365,
            false,
        );
        let fixed = client.apply_geocities_fix("http://www.geocities.com/foo/bar");
        assert_eq!(fixed, "http://www.geocities.com/foo/bar");
    }

    #[test]
    fn excluded_page_is_detected() {
        let content =
            b"<html><title>Wayback Machine</title>This URL has been excluded from the Wayback Machine</html>";
        match ArchiveClient::handle_wayback_page(content, "http://example.com/", "https://web.archive.org") {
            PageOutcome::Excluded => {}
            _ => panic!("expected Excluded"),
        }
    }

    #[test]
    fn ordinary_html_is_not_mistaken_for_special_page() {
        let content = b"<html><title>My Page</title><body>hi</body></html>";
        match ArchiveClient::handle_wayback_page(content, "http://example.com/", "https://web.archive.org") {
            PageOutcome::Normal => {}
            _ => panic!("expected Normal"),
        }
    }
}
