//! The proxy request pipeline: raw HTTP/1.x parsing over a TCP stream,
//! dispatch to admin/landing-page/backend-chain handling, and the
//! throttled response writer (§4.8).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::admin::{AdminHandler, AdminResponse};
use crate::backend::BackendChain;
use crate::cache::{Cache, CachedResponse};
use crate::config::Config;
use crate::crawler::Crawler;
use crate::templates::{self, Templates};
use crate::throttle;
use crate::transform::ContentTransformer;

/// Everything a connection handler needs, shared across every client
/// connection on the listener.
pub struct App {
    pub config: Arc<ArcSwap<Config>>,
    pub cache: Arc<Cache>,
    pub backend: BackendChain,
    pub transformer: ContentTransformer,
    pub templates: Arc<Templates>,
    pub admin: Option<Arc<AdminHandler>>,
    pub crawler: Option<Arc<Crawler>>,
    crawl_running: AtomicBool,
}

impl App {
    pub fn new(
        config: Arc<ArcSwap<Config>>,
        cache: Arc<Cache>,
        backend: BackendChain,
        transformer: ContentTransformer,
        templates: Arc<Templates>,
        admin: Option<Arc<AdminHandler>>,
        crawler: Option<Arc<Crawler>>,
    ) -> Self {
        Self {
            config,
            cache,
            backend,
            transformer,
            templates,
            admin,
            crawler,
            crawl_running: AtomicBool::new(false),
        }
    }

    fn config(&self) -> arc_swap::Guard<Arc<Config>> {
        self.config.load()
    }

}

/// Launch the crawler as a background task, unless one is already running.
fn start_crawl(app: &Arc<App>) {
    if app.crawl_running.swap(true, Ordering::SeqCst) {
        return;
    }
    let app = app.clone();
    tokio::spawn(async move {
        if let Some(crawler) = &app.crawler {
            if let Err(e) = crawler.run().await {
                tracing::error!(target: "crawler", "unhandled error: {e}");
            }
        }
        app.crawl_running.store(false, Ordering::SeqCst);
    });
}

/// Handle one client connection end to end: parse the request, dispatch,
/// write the response, close.
pub async fn handle_connection(app: Arc<App>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = serve(app, stream).await {
        tracing::debug!(target: "proxy", "connection error ({peer:?}): {e}");
    }
}

async fn serve(app: Arc<App>, stream: TcpStream) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    let request_line = request_line.trim();
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return send_error(&app, &mut write_half, 400, "Bad Request", "").await;
    };
    let method = method.to_ascii_uppercase();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    if method == "CONNECT" {
        return send_error(&app, &mut write_half, 501, "CONNECT not implemented yet", "").await;
    }

    if app.admin.is_some() && target.starts_with("/_admin") {
        return handle_admin(&app, &mut reader, &mut write_half, &method, target, &headers).await;
    }

    if is_landing_page_request(&app.config(), target, &headers) {
        return send_landing_page(&app, &mut write_half).await;
    }

    let url = match resolve_target_url(target, &headers) {
        Some(u) => u,
        None => return send_error(&app, &mut write_half, 400, "Host header required", "").await,
    };

    tracing::info!(target: "proxy", "{method} {url}");

    let config = app.config();
    let speed = effective_speed(&config, &headers);

    if config.access.is_allowlist() && !app.cache.is_allowed(&url).await.unwrap_or(false) {
        tracing::info!(target: "proxy", "BLOCKED (not in allowlist): {url}");
        drop(config);
        return send_error(
            &app,
            &mut write_half,
            403,
            "Forbidden",
            &url,
        )
        .await;
    }
    drop(config);

    let response = match app.backend.fetch(&url).await {
        Ok(Some(r)) => r,
        Ok(None) | Err(_) => return send_error(&app, &mut write_half, 404, "Not Found", &url).await,
    };

    if response.is_redirect() {
        let location = response.headers.get("location").cloned().unwrap_or_default();
        if !location.is_empty() {
            return send_redirect(&mut write_half, response.status_code, &location).await;
        }
    }

    let content = if response.needs_transform {
        app.transformer.transform(&response.content, &response.content_type)
    } else {
        response.content.clone()
    };

    let cached_response = CachedResponse {
        status_code: response.status_code,
        headers: response.headers.clone(),
        content,
        content_type: response.content_type.clone(),
        archived_url: response.archived_url.clone(),
        timestamp: response.timestamp.clone(),
    };

    if response.cacheable {
        if let Err(e) = app.cache.set_hot(&url, &cached_response).await {
            tracing::warn!(target: "cache", "failed to store hot entry for {url}: {e}");
        }
    }

    send_response(&app, &mut write_half, &cached_response, &speed).await?;

    if cached_response.content_type.contains("text/html") {
        let cache = app.cache.clone();
        let host = url::Url::parse(&url).ok().and_then(|u| u.host_str().map(|h| h.to_string())).unwrap_or(url);
        tokio::spawn(async move {
            let _ = cache.track_view(&host).await;
        });
    }

    Ok(())
}

async fn handle_admin<R>(
    app: &Arc<App>,
    reader: &mut BufReader<R>,
    writer: &mut (impl AsyncWriteExt + Unpin),
    method: &str,
    target: &str,
    headers: &HashMap<String, String>,
) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let admin = app.admin.as_ref().expect("admin checked by caller");

    if !check_admin_auth(&app.config(), headers) {
        writer.write_all(b"HTTP/1.1 401 Unauthorized\r\n").await?;
        writer
            .write_all(b"WWW-Authenticate: Basic realm=\"Wayback Proxy Admin\"\r\n")
            .await?;
        writer.write_all(b"Content-Length: 0\r\n").await?;
        writer.write_all(b"Connection: close\r\n\r\n").await?;
        return writer.flush().await;
    }

    let body = if method == "POST" {
        read_body(reader, headers).await?
    } else {
        Vec::new()
    };

    match admin.handle(method, target, &body).await {
        Ok(AdminResponse::StartCrawl) => {
            start_crawl(app);
            send_admin_redirect(writer, "/_admin/").await
        }
        Ok(AdminResponse::Recrawl) => {
            let _ = app.cache.clear_hot().await;
            start_crawl(app);
            send_admin_redirect(writer, "/_admin/").await
        }
        Ok(AdminResponse::Redirect(location)) => send_admin_redirect(writer, &location).await,
        Ok(AdminResponse::Render(status, content_type, body)) => {
            write_status_line(writer, status).await?;
            writer.write_all(format!("Content-Type: {content_type}\r\n").as_bytes()).await?;
            writer.write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes()).await?;
            writer.write_all(b"Connection: close\r\n\r\n").await?;
            writer.write_all(&body).await?;
            writer.flush().await
        }
        Err(e) => {
            write_status_line(writer, e.status_code()).await?;
            writer.write_all(b"Content-Type: text/html; charset=utf-8\r\n").await?;
            writer.write_all(b"Content-Length: 0\r\n").await?;
            writer.write_all(b"Connection: close\r\n\r\n").await?;
            writer.flush().await
        }
    }
}

async fn read_body<R>(reader: &mut BufReader<R>, headers: &HashMap<String, String>) -> std::io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let len = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut body = vec![0u8; len];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body).await?;
    Ok(body)
}

async fn send_admin_redirect(writer: &mut (impl AsyncWriteExt + Unpin), location: &str) -> std::io::Result<()> {
    writer.write_all(b"HTTP/1.1 303 See Other\r\n").await?;
    writer.write_all(format!("Location: {location}\r\n").as_bytes()).await?;
    writer.write_all(b"Content-Length: 0\r\n").await?;
    writer.write_all(b"Connection: close\r\n\r\n").await?;
    writer.flush().await
}

async fn write_status_line(writer: &mut (impl AsyncWriteExt + Unpin), code: u16) -> std::io::Result<()> {
    let reason = templates::reason_phrase(code);
    writer.write_all(format!("HTTP/1.1 {code} {reason}\r\n").as_bytes()).await
}

fn check_admin_auth(config: &Config, headers: &HashMap<String, String>) -> bool {
    if config.admin.password.is_empty() {
        return true;
    }
    let Some(auth) = headers.get("authorization") else { return false };
    let Some(encoded) = auth.strip_prefix("Basic ") else { return false };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else { return false };
    let decoded = String::from_utf8_lossy(&decoded);
    match decoded.split_once(':') {
        Some((_, pw)) => pw == config.admin.password,
        None => false,
    }
}

fn is_landing_page_request(config: &Config, target: &str, headers: &HashMap<String, String>) -> bool {
    if !config.landing_page.enabled {
        return false;
    }

    let host_header = headers.get("host").cloned().unwrap_or_default();
    let host_name = host_header.split(':').next().unwrap_or("").to_string();
    let proxy_host = &config.proxy.host;

    let mut local_names = vec!["localhost".to_string(), "127.0.0.1".to_string(), proxy_host.clone()];
    if proxy_host == "0.0.0.0" {
        local_names.push("0.0.0.0".to_string());
    }

    if target == "/" && local_names.contains(&host_name) {
        return true;
    }

    if target.starts_with("http") {
        if let Ok(parsed) = url::Url::parse(target) {
            let target_host = parsed.host_str().unwrap_or("").to_string();
            if local_names.contains(&target_host) && matches!(parsed.path(), "/" | "") {
                return true;
            }
        }
    }

    false
}

fn resolve_target_url(target: &str, headers: &HashMap<String, String>) -> Option<String> {
    if let Some(rest) = target.strip_prefix('/') {
        let host = headers.get("host")?;
        Some(format!("http://{host}/{rest}"))
    } else {
        Some(target.to_string())
    }
}

fn effective_speed(config: &Config, headers: &HashMap<String, String>) -> String {
    if config.throttle.allow_user_override {
        if let Some(cookie_header) = headers.get("cookie") {
            let cookie_name = &config.throttle.cookie_name;
            for part in cookie_header.split(';') {
                let part = part.trim();
                if let Some(value) = part.strip_prefix(&format!("{cookie_name}=")) {
                    if throttle::speed_tiers().iter().any(|(name, _)| *name == value) {
                        return value.to_string();
                    }
                }
            }
        }
    }
    config.throttle.default_speed.clone()
}

async fn send_response(
    app: &App,
    writer: &mut (impl AsyncWriteExt + Unpin),
    response: &CachedResponse,
    speed: &str,
) -> std::io::Result<()> {
    let config = app.config();
    let mut content = response.content.clone();

    if config.header_bar.enabled && app.templates.has_header_bar() && response.content_type.contains("text/html") {
        let bar_html = app.templates.render_header_bar(
            &config.header_bar,
            config.throttle.allow_user_override,
            &config.throttle.cookie_name,
            &response.archived_url,
            &response.timestamp,
            speed,
        );
        content = app.transformer.inject_header_bar(&content, &bar_html);
    }

    write_status_line(writer, response.status_code).await?;
    writer.write_all(format!("Content-Type: {}\r\n", response.content_type).as_bytes()).await?;
    writer.write_all(format!("Content-Length: {}\r\n", content.len()).as_bytes()).await?;
    writer.write_all(b"Connection: close\r\n").await?;
    writer.write_all(format!("X-Wayback-Timestamp: {}\r\n", response.timestamp).as_bytes()).await?;
    writer.write_all(format!("X-Wayback-URL: {}\r\n", response.archived_url).as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;

    throttle::write_throttled(writer, &content, speed).await
}

async fn send_landing_page(app: &App, writer: &mut (impl AsyncWriteExt + Unpin)) -> std::io::Result<()> {
    let config = app.config();
    let count = config.landing_page.most_viewed_count as isize;
    let most_viewed = app.cache.most_viewed(count).await.unwrap_or_default();

    let most_viewed_html = if most_viewed.is_empty() {
        r#"<p class="empty">No pages viewed yet.</p>"#.to_string()
    } else {
        let items: String = most_viewed
            .iter()
            .map(|(domain, views)| format!(r#"<li>{domain} <span class="count">({views} views)</span></li>"#))
            .collect::<Vec<_>>()
            .join("\n");
        format!("<ol>\n{items}\n</ol>")
    };

    let body = app.templates.render_landing_page(&config, &most_viewed_html);

    writer.write_all(b"HTTP/1.1 200 OK\r\n").await?;
    writer.write_all(b"Content-Type: text/html; charset=utf-8\r\n").await?;
    writer.write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes()).await?;
    writer.write_all(b"Connection: close\r\n\r\n").await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

async fn send_redirect(writer: &mut (impl AsyncWriteExt + Unpin), code: u16, location: &str) -> std::io::Result<()> {
    let reason = templates::reason_phrase(code);
    let body = format!(r#"<html><body><p>Redirecting to <a href="{location}">{location}</a></p></body></html>"#);

    writer.write_all(format!("HTTP/1.1 {code} {reason}\r\n").as_bytes()).await?;
    writer.write_all(format!("Location: {location}\r\n").as_bytes()).await?;
    writer.write_all(b"Content-Type: text/html\r\n").await?;
    writer.write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes()).await?;
    writer.write_all(b"Connection: close\r\n\r\n").await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await
}

async fn send_error(
    app: &App,
    writer: &mut (impl AsyncWriteExt + Unpin),
    code: u16,
    message: &str,
    url: &str,
) -> std::io::Result<()> {
    let config = app.config();
    let body = app.templates.render_error_page(code, message, url, &config.wayback.target_date);
    let reason = templates::reason_phrase(code);

    writer.write_all(format!("HTTP/1.1 {code} {reason}\r\n").as_bytes()).await?;
    writer.write_all(b"Content-Type: text/html; charset=utf-8\r\n").await?;
    writer.write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes()).await?;
    writer.write_all(b"Connection: close\r\n\r\n").await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_target_url_uses_host_header_for_relative_targets() {
        let mut headers = HashMap::new();
        headers.insert("host".to_string(), "example.com".to_string());
        let url = resolve_target_url("/page", &headers).unwrap();
        assert_eq!(url, "http://example.com/page");
    }

    #[test]
    fn resolve_target_url_is_none_without_host_header() {
        let headers = HashMap::new();
        assert!(resolve_target_url("/page", &headers).is_none());
    }

    #[test]
    fn resolve_target_url_passes_through_absolute_targets() {
        let headers = HashMap::new();
        let url = resolve_target_url("http://example.com/page", &headers).unwrap();
        assert_eq!(url, "http://example.com/page");
    }

    #[test]
    fn effective_speed_falls_back_to_default_without_override() {
        let config = Config::default();
        let headers = HashMap::new();
        assert_eq!(effective_speed(&config, &headers), "none");
    }

    #[test]
    fn effective_speed_reads_cookie_when_override_allowed() {
        let mut config = Config::default();
        config.throttle.allow_user_override = true;
        let mut headers = HashMap::new();
        headers.insert("cookie".to_string(), "other=1; wayback_speed=56k".to_string());
        assert_eq!(effective_speed(&config, &headers), "56k");
    }

    #[test]
    fn landing_page_matches_root_request_to_local_host() {
        let config = Config::default();
        let mut headers = HashMap::new();
        headers.insert("host".to_string(), "localhost:8888".to_string());
        assert!(is_landing_page_request(&config, "/", &headers));
    }

    #[test]
    fn landing_page_does_not_match_other_paths() {
        let config = Config::default();
        let mut headers = HashMap::new();
        headers.insert("host".to_string(), "localhost:8888".to_string());
        assert!(!is_landing_page_request(&config, "/page", &headers));
    }
}
