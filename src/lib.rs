//! Wayback Proxy: a forward HTTP proxy that transparently replays archived
//! web pages from the Wayback Machine (or a local pywb instance), with a
//! two-tier cache, bandwidth throttling, content rewriting, and a BFS
//! prefetch crawler.

pub mod admin;
pub mod backend;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod linkextract;
pub mod observability;
pub mod pipeline;
pub mod redis_pool;
pub mod reload;
pub mod templates;
pub mod throttle;
pub mod transform;
pub mod urlkey;

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::signal;

use crate::admin::AdminHandler;
use crate::cache::Cache;
use crate::config::Config;
use crate::crawler::Crawler;
use crate::error::Result;
use crate::pipeline::App;
use crate::templates::Templates;
use crate::transform::ContentTransformer;

/// Owns the listener and the shared [`App`] state, and runs the proxy's
/// accept loop until shutdown.
pub struct Proxy {
    app: Arc<App>,
    config: Arc<ArcSwap<Config>>,
    config_path: Option<PathBuf>,
    redis_url: String,
}

impl Proxy {
    /// Wire up the cache, backend chain, transformer, admin handler, and
    /// crawler from `config`, mirroring how the original assembles its
    /// proxy server from its config object.
    pub async fn build(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let redis_url = config.cache.redis_url.clone();
        let pool = redis_pool::create_pool(&config.cache).await?;
        let cache = Arc::new(Cache::new(pool, &config.cache));

        let backend = backend::build_backend(&config, cache.clone());
        let transformer = ContentTransformer::new(&config.transform);
        let templates = Arc::new(Templates::load(&config));

        let admin = if config.admin.enabled {
            Some(Arc::new(AdminHandler::new(cache.clone())))
        } else {
            None
        };

        let crawler = if config.admin.enabled {
            let live_backend = backend.live_only();
            Some(Arc::new(Crawler::new(
                cache.clone(),
                live_backend,
                transformer.clone(),
                &config.crawler,
            )))
        } else {
            None
        };

        let shared_config = Arc::new(ArcSwap::from_pointee(config));
        let app = Arc::new(App::new(shared_config.clone(), cache, backend, transformer, templates, admin, crawler));

        Ok(Self {
            app,
            config: shared_config,
            config_path,
            redis_url,
        })
    }

    /// Bind the listener and serve connections until a shutdown signal
    /// arrives, spawning the config-reload listener alongside it when a
    /// config file was actually used.
    pub async fn run(self) -> Result<()> {
        let (host, port) = {
            let cfg = self.config.load();
            (cfg.proxy.host.clone(), cfg.proxy.port)
        };
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(target: "proxy", "listening on {addr}");

        if let Some(path) = self.config_path.clone() {
            let shared = self.config.clone();
            let backend = self.app.backend.clone();
            let redis_url = self.redis_url.clone();
            tokio::spawn(async move {
                reload::listen(redis_url, path, shared, backend).await;
            });
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(target: "proxy", "accept failed: {e}");
                            continue;
                        }
                    };
                    tracing::debug!(target: "proxy", "accepted connection from {peer}");
                    let app = self.app.clone();
                    tokio::spawn(async move {
                        pipeline::handle_connection(app, stream).await;
                    });
                }
                _ = shutdown_signal() => {
                    tracing::info!(target: "proxy", "shutdown signal received, draining connections");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!(target: "proxy", "received SIGINT");
        },
        _ = terminate => {
            tracing::info!(target: "proxy", "received SIGTERM");
        },
    }
}
