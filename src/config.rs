//! Configuration management using Figment.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: `WAYBACK_`)
//! 2. Current working directory: `./config.toml`
//! 3. XDG config directory: `~/.config/wayback-proxy/config.toml`
//! 4. System directory: `/etc/wayback-proxy/config.toml`
//! 5. Default values
//!
//! Section names and fields mirror the original Python implementation's
//! dataclass-per-section layout one-to-one.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub wayback: WaybackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub landing_page: LandingPageConfig,
    #[serde(default)]
    pub header_bar: HeaderBarConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Proxy server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Custom error page template directory. Empty means no override.
    #[serde(default)]
    pub error_pages_dir: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            error_pages_dir: String::new(),
        }
    }
}

/// Archive (Wayback Machine) source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaybackConfig {
    /// Target replay date, `YYYYMMDD`.
    #[serde(default = "default_target_date")]
    pub target_date: String,
    #[serde(default = "default_date_tolerance")]
    pub date_tolerance_days: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub geocities_fix: bool,
}

impl Default for WaybackConfig {
    fn default() -> Self {
        Self {
            target_date: default_target_date(),
            date_tolerance_days: default_date_tolerance(),
            base_url: default_base_url(),
            geocities_fix: true,
        }
    }
}

/// Two-tier cache / store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_hot_ttl")]
    pub hot_ttl_seconds: u64,
    #[serde(default = "default_curated_prefix")]
    pub curated_prefix: String,
    #[serde(default = "default_hot_prefix")]
    pub hot_prefix: String,
    #[serde(default = "default_allowlist_key")]
    pub allowlist_key: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            hot_ttl_seconds: default_hot_ttl(),
            curated_prefix: default_curated_prefix(),
            hot_prefix: default_hot_prefix(),
            allowlist_key: default_allowlist_key(),
            max_connections: default_max_connections(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Content transformation toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_true")]
    pub remove_wayback_toolbar: bool,
    #[serde(default = "default_true")]
    pub remove_wayback_scripts: bool,
    #[serde(default = "default_true")]
    pub fix_base_tags: bool,
    #[serde(default = "default_true")]
    pub fix_asset_urls: bool,
    #[serde(default = "default_true")]
    pub normalize_links: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            remove_wayback_toolbar: true,
            remove_wayback_scripts: true,
            fix_base_tags: true,
            fix_asset_urls: true,
            normalize_links: true,
        }
    }
}

/// Access control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// `open` | `allowlist`
    #[serde(default = "default_access_mode")]
    pub mode: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            mode: default_access_mode(),
        }
    }
}

impl AccessConfig {
    pub fn is_allowlist(&self) -> bool {
        self.mode == "allowlist"
    }
}

/// Bandwidth throttling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_speed")]
    pub default_speed: String,
    #[serde(default = "default_false")]
    pub allow_user_override: bool,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_speed: default_speed(),
            allow_user_override: false,
            cookie_name: default_cookie_name(),
        }
    }
}

/// Landing page configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandingPageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Custom landing page template directory. Empty means no override.
    #[serde(default)]
    pub template_dir: String,
    #[serde(default = "default_most_viewed_count")]
    pub most_viewed_count: usize,
}

impl Default for LandingPageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template_dir: String::new(),
            most_viewed_count: default_most_viewed_count(),
        }
    }
}

/// Header bar overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderBarConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,
    /// `top` | `bottom`
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default)]
    pub custom_text: String,
    #[serde(default)]
    pub custom_css: String,
    #[serde(default = "default_true")]
    pub show_speed_selector: bool,
}

impl Default for HeaderBarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            position: default_position(),
            custom_text: String::new(),
            custom_css: String::new(),
            show_speed_selector: true,
        }
    }
}

/// Admin interface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,
    /// Empty = no auth required.
    #[serde(default)]
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            password: String::new(),
        }
    }
}

/// Prefetch crawler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub same_domain_only: bool,
    /// 0 = unlimited.
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            same_domain_only: true,
            max_urls: default_max_urls(),
        }
    }
}

/// A single entry in a configured backend chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    /// `cache` | `archive` | `replay`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
}

/// Backend chain configuration. Empty means the default `cache -> archive`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub chain: Vec<BackendEntry>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_false")]
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions ---------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8888
}
fn default_target_date() -> String {
    "20010101".to_string()
}
fn default_date_tolerance() -> u32 {
    365
}
fn default_base_url() -> String {
    "https://web.archive.org".to_string()
}
fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}
fn default_hot_ttl() -> u64 {
    604_800
}
fn default_curated_prefix() -> String {
    "curated:".to_string()
}
fn default_hot_prefix() -> String {
    "hot:".to_string()
}
fn default_allowlist_key() -> String {
    "allowlist:urls".to_string()
}
fn default_max_connections() -> usize {
    20
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay() -> u64 {
    2
}
fn default_access_mode() -> String {
    "open".to_string()
}
fn default_speed() -> String {
    "none".to_string()
}
fn default_cookie_name() -> String {
    "wayback_speed".to_string()
}
fn default_most_viewed_count() -> usize {
    10
}
fn default_position() -> String {
    "top".to_string()
}
fn default_concurrency() -> usize {
    3
}
fn default_max_urls() -> usize {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            wayback: WaybackConfig::default(),
            cache: CacheConfig::default(),
            transform: TransformConfig::default(),
            access: AccessConfig::default(),
            throttle: ThrottleConfig::default(),
            landing_page: LandingPageConfig::default(),
            header_bar: HeaderBarConfig::default(),
            admin: AdminConfig::default(),
            crawler: CrawlerConfig::default(),
            backends: BackendsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from all sources: defaults, `./config.toml`, XDG
    /// config dir, `/etc/wayback-proxy/config.toml`, then `WAYBACK_` env vars.
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!(target: "config", "loading configuration from {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("WAYBACK_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load from a specific file, bypassing XDG discovery. Useful for tests.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WAYBACK_").split("_"))
            .extract()?;
        Ok(config)
    }

    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("wayback-proxy");
        if let Ok(path) = xdg_dirs.place_config_file(Path::new("config.toml")) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/wayback-proxy/config.toml"));
        paths
    }

    /// Build a new `Config` by copying only the hot-swappable fields from
    /// `fresh` (a config just reloaded from disk/env) onto a clone of `self`.
    /// Host/port and the store URL are intentionally left untouched — those
    /// require a restart.
    pub fn apply_reloadable(&self, fresh: &Config) -> Config {
        let mut next = self.clone();
        next.wayback.target_date = fresh.wayback.target_date.clone();
        next.wayback.date_tolerance_days = fresh.wayback.date_tolerance_days;
        next.throttle.default_speed = fresh.throttle.default_speed.clone();
        next.throttle.allow_user_override = fresh.throttle.allow_user_override;
        next.header_bar = fresh.header_bar.clone();
        next.landing_page.enabled = fresh.landing_page.enabled;
        next.access.mode = fresh.access.mode.clone();
        next.admin.password = fresh.admin.password.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_original_defaults() {
        let config = Config::default();
        assert_eq!(config.proxy.port, 8888);
        assert_eq!(config.wayback.target_date, "20010101");
        assert_eq!(config.cache.hot_ttl_seconds, 604_800);
        assert_eq!(config.access.mode, "open");
        assert_eq!(config.throttle.default_speed, "none");
        assert!(config.backends.chain.is_empty());
    }

    #[test]
    fn load_from_reads_a_toml_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[wayback]\ntarget_date = \"20050615\"\n\n[proxy]\nport = 9090\n",
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.wayback.target_date, "20050615");
        assert_eq!(config.proxy.port, 9090);
        assert_eq!(config.cache.hot_ttl_seconds, 604_800);
    }

    #[test]
    fn apply_reloadable_leaves_host_and_store_untouched() {
        let base = Config::default();
        let mut fresh = Config::default();
        fresh.wayback.target_date = "20050615".to_string();
        fresh.proxy.port = 9999;
        fresh.cache.redis_url = "redis://other:6379".to_string();

        let applied = base.apply_reloadable(&fresh);
        assert_eq!(applied.wayback.target_date, "20050615");
        assert_eq!(applied.proxy.port, 8888);
        assert_eq!(applied.cache.redis_url, "redis://localhost:6379/0");
    }
}
