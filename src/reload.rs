//! Config hot-reload listener: subscribes to a Redis pub/sub channel and
//! re-reads the on-disk config file when signaled (§4.10).

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::StreamExt;

use crate::backend::BackendChain;
use crate::config::Config;

const RELOAD_CHANNEL: &str = "wayback:config_reload";

/// Subscribe to [`RELOAD_CHANNEL`] and hot-swap `shared` in place whenever a
/// message arrives. Runs until the connection drops or the task is
/// cancelled; errors are logged and the loop keeps listening.
pub async fn listen(redis_url: String, config_path: PathBuf, shared: Arc<ArcSwap<Config>>, backend: BackendChain) {
    let client = match redis::Client::open(redis_url.as_str()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(target: "proxy", "config reload listener could not open redis client: {e}");
            return;
        }
    };

    let conn = match client.get_async_connection().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(target: "proxy", "config reload listener could not connect to redis: {e}");
            return;
        }
    };

    let mut pubsub = conn.into_pubsub();
    if let Err(e) = pubsub.subscribe(RELOAD_CHANNEL).await {
        tracing::error!(target: "proxy", "config reload listener could not subscribe: {e}");
        return;
    }
    tracing::info!(target: "proxy", "subscribed to {RELOAD_CHANNEL}");

    let mut messages = pubsub.on_message();
    while let Some(_msg) = messages.next().await {
        tracing::info!(target: "proxy", "config reload signal received");
        apply_reload(&config_path, &shared, &backend);
    }
}

fn apply_reload(config_path: &PathBuf, shared: &Arc<ArcSwap<Config>>, backend: &BackendChain) {
    let path_str = config_path.to_string_lossy();
    let fresh = match Config::load_from(&path_str) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(target: "proxy", "config reload failed: {e}");
            return;
        }
    };

    let current = shared.load();
    let old_date = current.wayback.target_date.clone();
    let next = current.apply_reloadable(&fresh);

    if old_date != next.wayback.target_date {
        tracing::info!(target: "proxy", "reloaded target_date: {old_date} -> {}", next.wayback.target_date);
    }
    backend.update_date_config(&next.wayback.target_date, next.wayback.date_tolerance_days);

    shared.store(Arc::new(next));
    tracing::info!(target: "proxy", "config reloaded successfully");
}
