//! Admin interface — `/_admin/*` dispatch and the crawl/cache dashboard
//! (§4.8 supplement).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::cache::Cache;
use crate::error::{Error, Result};

/// Outcome of handling an admin request.
pub enum AdminResponse {
    /// Render `(status, content_type, body)` directly.
    Render(u16, String, Vec<u8>),
    /// 303 redirect to `location`.
    Redirect(String),
    /// Tell the caller to launch the crawler, then redirect to `/_admin/`.
    StartCrawl,
    /// Tell the caller to clear hot cache and launch the crawler.
    Recrawl,
}

/// Handles `/_admin/*` HTTP requests.
pub struct AdminHandler {
    cache: Arc<Cache>,
}

impl AdminHandler {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }

    pub async fn handle(&self, method: &str, path: &str, body: &[u8]) -> Result<AdminResponse> {
        if method == "GET" && (path == "/_admin/" || path == "/_admin") {
            return self.dashboard().await;
        }

        if method == "POST" {
            let form = parse_form(body);
            match path {
                "/_admin/crawl/add" => return self.add_seed(&form).await,
                "/_admin/crawl/remove" => return self.remove_seed(&form).await,
                "/_admin/crawl/start" => return Ok(AdminResponse::StartCrawl),
                "/_admin/crawl/stop" => return self.stop_crawl().await,
                "/_admin/crawl/clear-log" => return self.clear_log().await,
                "/_admin/cache/clear-hot" => return self.clear_hot().await,
                "/_admin/cache/delete" => return self.delete_url(&form).await,
                "/_admin/crawl/recrawl" => return Ok(AdminResponse::Recrawl),
                _ => {}
            }
        }

        Err(Error::NotFound(path.to_string()))
    }

    async fn dashboard(&self) -> Result<AdminResponse> {
        let seeds = self.cache.get_seeds().await?;
        let status = self.cache.get_crawl_status().await?;
        let log_lines = self.cache.get_crawl_log(100).await?;
        let stats = self.cache.stats().await?;

        let mut seed_rows = String::new();
        for (url, depth) in &seeds {
            let esc_url = html_escape(url);
            let _ = write!(
                seed_rows,
                r#"<tr><td style="padding:4px 8px">{esc_url}</td><td style="padding:4px 8px;text-align:center">{depth}</td><td style="padding:4px 8px"><form method="POST" action="/_admin/crawl/remove" style="margin:0"><input type="hidden" name="url" value="{esc_url}"><input type="submit" value="Remove" style="background:#802020;color:#fff;border:1px solid #a04040;padding:2px 8px;cursor:pointer"></form></td></tr>"#
            );
        }
        if seeds.is_empty() {
            seed_rows = r#"<tr><td colspan="3" style="padding:8px;color:#888">No seeds configured.</td></tr>"#.to_string();
        }

        let mut progress_html = String::new();
        let cur = html_escape(&status.progress.current_url);
        let _ = write!(
            progress_html,
            "<p>Fetched: {} / {} &nbsp; Errors: {}</p>",
            status.progress.fetched, status.progress.total, status.progress.errors
        );
        if !cur.is_empty() {
            let _ = write!(progress_html, "<p>Current: <code>{cur}</code></p>");
        }

        let state_color = match status.state.as_str() {
            "idle" => "#888",
            "running" => "#4a4",
            "stopping" => "#c84",
            _ => "#888",
        };

        let log_html = if log_lines.is_empty() {
            "(empty)".to_string()
        } else {
            html_escape(&log_lines.join("\n"))
        };

        let crawl_buttons = if status.state == "running" {
            r#"<form method="POST" action="/_admin/crawl/stop" style="display:inline"><input type="submit" value="Stop Crawl" style="background:#804020;color:#fff;border:1px solid #a06040;padding:4px 12px;cursor:pointer;margin-right:8px"></form>"#.to_string()
        } else {
            r#"<form method="POST" action="/_admin/crawl/start" style="display:inline"><input type="submit" value="Start Crawl" style="background:#206040;color:#fff;border:1px solid #40a060;padding:4px 12px;cursor:pointer;margin-right:8px"></form><form method="POST" action="/_admin/crawl/recrawl" style="display:inline"><input type="submit" value="Recrawl (force)" style="background:#604020;color:#fff;border:1px solid #906030;padding:4px 12px;cursor:pointer;margin-right:8px"></form>"#.to_string()
        };

        let page = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<noscript><meta http-equiv="refresh" content="5"></noscript>
<title>Wayback Proxy Admin</title>
<style>
body {{ background:#0e0e1a; color:#e0e0e0; font-family:monospace; margin:20px; }}
h1 {{ color:#c0c0ff; }}
h2 {{ color:#a0a0d0; margin-top:24px; }}
table {{ border-collapse:collapse; }}
table th, table td {{ border:1px solid #404060; }}
th {{ background:#1a1a2e; padding:4px 8px; }}
input[type=text] {{ background:#12122a; color:#e0e0e0; border:1px solid #505070; padding:4px 8px; font-family:monospace; width:400px; }}
pre {{ background:#0a0a16; border:1px solid #303050; padding:8px; max-height:300px; overflow-y:auto; font-size:12px; white-space:pre-wrap; }}
a {{ color:#8080ff; }}
</style>
</head>
<body>
<h1 style="display:inline">Wayback Proxy Admin</h1>

<h2>Crawl Seeds</h2>
<table>
<tr><th>URL</th><th>Depth</th><th></th></tr>
<tbody id="seedRows">{seed_rows}</tbody>
</table>

<form method="POST" action="/_admin/crawl/add" style="margin-top:8px">
<input type="text" name="url" placeholder="http://example.com  or  http://example.com|3">
<input type="submit" value="Add Seed" style="background:#203060;color:#fff;border:1px solid #406090;padding:4px 12px;cursor:pointer">
</form>

<h2>Crawl Status</h2>
<div id="crawlStatus">
<p>State: <strong style="color:{state_color}">{state}</strong></p>
{progress_html}
{crawl_buttons}
</div>

<h2>Crawl Log</h2>
<form method="POST" action="/_admin/crawl/clear-log" style="margin-bottom:4px">
<input type="submit" value="Clear Log" style="background:#333;color:#ccc;border:1px solid #555;padding:2px 8px;cursor:pointer">
</form>
<pre id="crawlLog">{log_html}</pre>

<h2>Cache</h2>
<div id="cacheStatus">
<p>Curated: <strong>{curated_n}</strong> &nbsp; Hot: <strong>{hot_n}</strong> &nbsp; Allowlist: <strong>{allowlist_n}</strong></p>
</div>
<form method="POST" action="/_admin/cache/delete" style="margin-top:8px">
<input type="text" name="url" placeholder="http://example.com/page.html">
<input type="submit" value="Delete from Cache" style="background:#802020;color:#fff;border:1px solid #a04040;padding:4px 12px;cursor:pointer">
</form>
<form method="POST" action="/_admin/cache/clear-hot" style="margin-top:8px;display:inline">
<input type="submit" value="Clear All Hot Cache" style="background:#802020;color:#fff;border:1px solid #a04040;padding:4px 12px;cursor:pointer" onclick="return confirm('Clear all hot cache entries?')">
</form>
</body>
</html>"#,
            state = status.state,
            curated_n = stats.curated_count,
            hot_n = stats.hot_count,
            allowlist_n = stats.allowlist_count,
        );

        Ok(AdminResponse::Render(200, "text/html; charset=utf-8".to_string(), page.into_bytes()))
    }

    async fn add_seed(&self, form: &HashMap<String, String>) -> Result<AdminResponse> {
        let raw = form.get("url").map(|s| s.trim()).unwrap_or("");
        if raw.is_empty() {
            return Ok(AdminResponse::Redirect("/_admin/".to_string()));
        }

        let (url, depth) = match raw.rsplit_once('|') {
            Some((url, depth_str)) => (url, depth_str.parse::<i64>().unwrap_or(1).max(0) as u32),
            None => (raw, 1),
        };

        let url = url.trim();
        if !url.is_empty() {
            self.cache.add_seed(url, depth).await?;
        }
        Ok(AdminResponse::Redirect("/_admin/".to_string()))
    }

    async fn remove_seed(&self, form: &HashMap<String, String>) -> Result<AdminResponse> {
        if let Some(url) = form.get("url").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            self.cache.remove_seed(url).await?;
        }
        Ok(AdminResponse::Redirect("/_admin/".to_string()))
    }

    async fn stop_crawl(&self) -> Result<AdminResponse> {
        let status = self.cache.get_crawl_status().await?;
        if status.state == "running" {
            self.cache.set_crawl_status("stopping", &status.progress).await?;
        }
        Ok(AdminResponse::Redirect("/_admin/".to_string()))
    }

    async fn clear_log(&self) -> Result<AdminResponse> {
        self.cache.clear_crawl_log().await?;
        Ok(AdminResponse::Redirect("/_admin/".to_string()))
    }

    async fn clear_hot(&self) -> Result<AdminResponse> {
        self.cache.clear_hot().await?;
        Ok(AdminResponse::Redirect("/_admin/".to_string()))
    }

    async fn delete_url(&self, form: &HashMap<String, String>) -> Result<AdminResponse> {
        if let Some(url) = form.get("url").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            self.cache.delete(url, crate::cache::Tier::Both).await?;
        }
        Ok(AdminResponse::Redirect("/_admin/".to_string()))
    }
}

/// Parse an `application/x-www-form-urlencoded` body into a flat map, the
/// last value winning for repeated keys.
fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    let mut form = HashMap::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        form.insert(url_decode(key), url_decode(value));
    }
    form
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_form_decodes_percent_and_plus() {
        let form = parse_form(b"url=http%3A%2F%2Fexample.com%2Fa+b&depth=3");
        assert_eq!(form.get("url").unwrap(), "http://example.com/a b");
        assert_eq!(form.get("depth").unwrap(), "3");
    }

    #[test]
    fn html_escape_covers_basic_entities() {
        assert_eq!(html_escape(r#"<a href="x">&"#), "&lt;a href=&quot;x&quot;&gt;&amp;");
    }
}
