//! BFS prefetch crawler — spiders seed URLs via the live backend chain and
//! stores results in the curated cache (§4.9).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use crate::backend::BackendChain;
use crate::cache::{Cache, CachedResponse, CrawlProgress};
use crate::config::CrawlerConfig;
use crate::error::Result;
use crate::linkextract;
use crate::transform::ContentTransformer;
use crate::urlkey;

/// A queued crawl item: `(url, level, max_depth, seed_domain)`.
type WorkItem = (String, u32, u32, String);

/// BFS crawler that fetches from the live backend chain and stores in the
/// curated cache.
pub struct Crawler {
    cache: Arc<Cache>,
    backend: BackendChain,
    transformer: ContentTransformer,
    concurrency: usize,
    same_domain_only: bool,
    max_urls: usize,
}

impl Crawler {
    pub fn new(
        cache: Arc<Cache>,
        backend: BackendChain,
        transformer: ContentTransformer,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            cache,
            backend,
            transformer,
            concurrency: config.concurrency.max(1),
            same_domain_only: config.same_domain_only,
            max_urls: config.max_urls,
        }
    }

    /// Main crawl loop: read seeds, BFS, store in curated cache.
    pub async fn run(&self) -> Result<()> {
        let seeds = self.cache.get_seeds().await?;
        if seeds.is_empty() {
            self.log("No seeds configured, nothing to crawl.").await;
            return Ok(());
        }

        self.cache
            .set_crawl_status("running", &CrawlProgress::default())
            .await?;
        self.log(&format!("Crawl started with {} seed(s)", seeds.len())).await;

        let fetched = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let total_queued = Arc::new(AtomicUsize::new(0));
        let mut visited: HashSet<String> = HashSet::new();
        let progress_lock = Arc::new(Mutex::new(()));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut queue: VecDeque<WorkItem> = VecDeque::new();
        for (seed_url, depth) in seeds {
            let seed_domain = domain_of(&seed_url);
            queue.push_back((seed_url, 0, depth, seed_domain));
            total_queued.fetch_add(1, Ordering::SeqCst);
        }

        loop {
            if queue.is_empty() {
                break;
            }
            if self.should_stop().await {
                self.log("Crawl stopped by user.").await;
                break;
            }

            let mut batch: Vec<WorkItem> = Vec::new();
            let mut hit_cap = false;
            while let Some((url, level, max_depth, seed_domain)) = queue.pop_front() {
                if batch.len() >= self.concurrency * 2 {
                    queue.push_front((url, level, max_depth, seed_domain));
                    break;
                }

                let normalized = urlkey::normalize(&url);
                if visited.contains(&normalized) {
                    continue;
                }
                visited.insert(normalized.clone());

                if self.max_urls > 0 && visited.len() > self.max_urls {
                    self.log(&format!("Reached max_urls limit ({}), stopping.", self.max_urls))
                        .await;
                    queue.clear();
                    hit_cap = true;
                    break;
                }

                match self.cache.get(&normalized).await? {
                    Some(existing) => {
                        if level < max_depth && existing.content_type.contains("text/html") {
                            let children = linkextract_children(
                                &existing.content,
                                &normalized,
                                &seed_domain,
                                level,
                                max_depth,
                                self.same_domain_only,
                            );
                            for child in children {
                                if !visited.contains(&urlkey::normalize(&child.0)) {
                                    queue.push_back(child);
                                    total_queued.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                        }
                    }
                    None => batch.push((normalized, level, max_depth, seed_domain)),
                }
            }

            if hit_cap && batch.is_empty() {
                break;
            }
            if batch.is_empty() {
                continue;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for (url, level, max_depth, seed_domain) in batch {
                let cache = self.cache.clone();
                let semaphore = semaphore.clone();
                let progress_lock = progress_lock.clone();
                let fetched = fetched.clone();
                let errors = errors.clone();
                let total_queued = total_queued.clone();
                let transformer = self.transformer.clone();
                let same_domain_only = self.same_domain_only;
                let backend = self.backend.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;

                    if is_stopping(&cache).await {
                        return None;
                    }

                    update_progress(&cache, &progress_lock, &fetched, &errors, &total_queued, &url).await;

                    let response = match backend.fetch(&url).await {
                        Ok(Some(r)) => r,
                        Ok(None) => {
                            errors.fetch_add(1, Ordering::SeqCst);
                            log_line(&cache, &format!("MISS  {url}")).await;
                            return None;
                        }
                        Err(e) => {
                            errors.fetch_add(1, Ordering::SeqCst);
                            log_line(&cache, &format!("ERR   {url}: {e}")).await;
                            return None;
                        }
                    };

                    if response.is_redirect() {
                        let location = response.headers.get("location").cloned().unwrap_or_default();
                        log_line(&cache, &format!("REDIR {url} -> {location}")).await;
                        return None;
                    }

                    let transformed = if response.needs_transform {
                        transformer.transform(&response.content, &response.content_type)
                    } else {
                        response.content.clone()
                    };

                    let cached = CachedResponse {
                        status_code: response.status_code,
                        headers: response.headers.clone(),
                        content: transformed.clone(),
                        content_type: response.content_type.clone(),
                        archived_url: response.archived_url.clone(),
                        timestamp: response.timestamp.clone(),
                    };
                    if let Err(e) = cache.set_curated(&url, &cached).await {
                        errors.fetch_add(1, Ordering::SeqCst);
                        log_line(&cache, &format!("ERR   {url}: {e}")).await;
                        return None;
                    }
                    fetched.fetch_add(1, Ordering::SeqCst);
                    log_line(&cache, &format!("OK    {url}")).await;

                    if level < max_depth && response.content_type.contains("text/html") {
                        return Some(linkextract_children(
                            &transformed,
                            &url,
                            &seed_domain,
                            level,
                            max_depth,
                            same_domain_only,
                        ));
                    }

                    None
                }));
            }

            for handle in handles {
                if let Ok(Some(children)) = handle.await {
                    for child in children {
                        if !visited.contains(&urlkey::normalize(&child.0)) {
                            queue.push_back(child);
                            total_queued.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
        }

        let final_progress = CrawlProgress {
            fetched: fetched.load(Ordering::SeqCst) as u64,
            total: total_queued.load(Ordering::SeqCst) as u64,
            errors: errors.load(Ordering::SeqCst) as u64,
            current_url: String::new(),
        };
        self.cache.set_crawl_status("idle", &final_progress).await?;
        self.log(&format!(
            "Crawl finished: {} fetched, {} errors, {} total URLs seen.",
            final_progress.fetched, final_progress.errors, final_progress.total
        ))
        .await;

        Ok(())
    }

    async fn should_stop(&self) -> bool {
        match self.cache.get_crawl_status().await {
            Ok(status) => status.state == "stopping",
            Err(_) => false,
        }
    }

    async fn log(&self, message: &str) {
        log_line(&self.cache, message).await;
    }
}

async fn is_stopping(cache: &Cache) -> bool {
    matches!(cache.get_crawl_status().await, Ok(status) if status.state == "stopping")
}

async fn update_progress(
    cache: &Cache,
    lock: &Mutex<()>,
    fetched: &AtomicUsize,
    errors: &AtomicUsize,
    total_queued: &AtomicUsize,
    current_url: &str,
) {
    let _guard = lock.lock().await;
    let progress = CrawlProgress {
        fetched: fetched.load(Ordering::SeqCst) as u64,
        total: total_queued.load(Ordering::SeqCst) as u64,
        errors: errors.load(Ordering::SeqCst) as u64,
        current_url: current_url.to_string(),
    };
    let _ = cache.set_crawl_progress(&progress).await;
}

async fn log_line(cache: &Cache, message: &str) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    let line = format!("[{ts}] {message}");
    tracing::info!(target: "crawler", "{message}");
    let _ = cache.append_crawl_log(&line).await;
}

#[allow(clippy::too_many_arguments)]
fn linkextract_children(
    content: &[u8],
    base_url: &str,
    seed_domain: &str,
    current_level: u32,
    max_depth: u32,
    same_domain_only: bool,
) -> Vec<WorkItem> {
    let html = String::from_utf8_lossy(content);
    let next_level = current_level + 1;
    let mut children = Vec::new();

    for href in linkextract::extract_hrefs(&html) {
        if let Some(link) = linkextract::resolve_url(&href, base_url) {
            if same_domain_only && domain_of(&link) != seed_domain {
                continue;
            }
            children.push((link, next_level, max_depth, seed_domain.to_string()));
        }
    }

    for asset in linkextract::extract_asset_urls(&html) {
        if let Some(link) = linkextract::resolve_url(&asset, base_url) {
            children.push((link, next_level, max_depth, seed_domain.to_string()));
        }
    }

    children
}

fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_of_lowercases_host() {
        assert_eq!(domain_of("http://Example.COM/page"), "example.com");
    }

    #[test]
    fn domain_of_is_empty_for_unparseable_url() {
        assert_eq!(domain_of("not a url"), "");
    }

    #[test]
    fn same_domain_only_filters_cross_domain_anchors_but_keeps_assets() {
        let html = concat!(
            r#"<a href="http://a.test/p1">same</a>"#,
            r#"<a href="http://b.test/">cross</a>"#,
            r#"<img src="http://b.test/logo.gif">"#,
        );
        let children = linkextract_children(html.as_bytes(), "http://a.test/", "a.test", 0, 1, true);
        let urls: Vec<&str> = children.iter().map(|(u, ..)| u.as_str()).collect();
        assert!(urls.contains(&"http://a.test/p1"));
        assert!(!urls.contains(&"http://b.test/"));
        assert!(urls.contains(&"http://b.test/logo.gif"));
    }

    #[test]
    fn same_domain_only_false_keeps_cross_domain_anchors() {
        let html = r#"<a href="http://b.test/">cross</a>"#;
        let children = linkextract_children(html.as_bytes(), "http://a.test/", "a.test", 0, 1, false);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "http://b.test/");
    }

    #[test]
    fn children_are_enqueued_at_next_level() {
        let html = r#"<a href="/p1">link</a>"#;
        let children = linkextract_children(html.as_bytes(), "http://a.test/", "a.test", 2, 5, true);
        assert_eq!(children[0].1, 3);
        assert_eq!(children[0].2, 5);
    }
}
