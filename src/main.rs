use std::path::PathBuf;

use wayback_proxy::config::Config;
use wayback_proxy::error::Result;
use wayback_proxy::observability;
use wayback_proxy::Proxy;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    observability::init_tracing(&config)?;

    tracing::info!(
        target: "proxy",
        "starting wayback-proxy: target_date={} backends={:?} admin={}",
        config.wayback.target_date,
        config.backends.chain.iter().map(|b| b.kind.clone()).collect::<Vec<_>>(),
        config.admin.enabled,
    );

    let config_path = first_existing_config_path();
    let proxy = Proxy::build(config, config_path).await?;
    proxy.run().await
}

/// Mirrors `Config::find_config_paths` so the reload listener watches the
/// same file `Config::load` actually read from.
fn first_existing_config_path() -> Option<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("wayback-proxy");
    let candidates = [
        Some(PathBuf::from("config.toml")),
        xdg_dirs.find_config_file("config.toml"),
        Some(PathBuf::from("/etc/wayback-proxy/config.toml")),
    ];
    candidates.into_iter().flatten().find(|p| p.exists())
}
