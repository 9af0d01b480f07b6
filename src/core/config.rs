use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub portals: PortalsConfig,
    pub sniper: SniperConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token used to deliver alerts (and as the service
    /// credential fallback for marketplace auth).
    pub bot_token: String,
    /// Target chat: @channelname or a numeric chat id.
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Paged `nfts/search` sorted by ascending price.
    Search,
    /// `market/actions` restricted to fresh listing events.
    Activity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalsConfig {
    pub base_url: String,
    /// Endpoint of the web-view auth bridge that exchanges a credential
    /// for a `tma <init-data>` bearer token.
    pub auth_bridge_url: String,
    /// Optional user session string; primary credential when it looks valid.
    pub session_string: Option<String>,
    pub feed_mode: FeedMode,
    /// Collection/model/backdrop name filters; empty means no filter.
    pub collections: Vec<String>,
    pub models: Vec<String>,
    pub backdrops: Vec<String>,
    pub min_price: u64,
    pub max_price: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SniperConfig {
    pub min_drop_percent: f64,
    pub freshness_window_secs: u64,
    pub batch_size: usize,
    pub max_records: usize,
    pub check_interval_min_secs: u64,
    pub check_interval_max_secs: u64,
    pub retention_multiplier: u32,
    pub seen_db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub health_port: u16,
    pub log_level: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN is required")?;
        let channel = env::var("CHANNEL").context("CHANNEL is required")?;

        let session_string = env::var("SESSION_STRING")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let feed_mode = match env::var("FEED_MODE")
            .unwrap_or_else(|_| "search".to_string())
            .to_lowercase()
            .as_str()
        {
            "search" => FeedMode::Search,
            "activity" => FeedMode::Activity,
            other => bail!("FEED_MODE must be 'search' or 'activity', got '{}'", other),
        };

        let check_min = env_or("CHECK_MIN", 60u64);
        let check_max = env_or("CHECK_MAX", 120u64);
        if check_max < check_min {
            bail!("CHECK_MAX ({}) must be >= CHECK_MIN ({})", check_max, check_min);
        }

        Ok(Config {
            telegram: TelegramConfig { bot_token, channel },
            portals: PortalsConfig {
                base_url: env::var("PORTALS_BASE_URL")
                    .unwrap_or_else(|_| "https://portals-market.com".to_string()),
                auth_bridge_url: env::var("AUTH_BRIDGE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8787/auth".to_string()),
                session_string,
                feed_mode,
                collections: env_list("FILTER_COLLECTIONS"),
                models: env_list("FILTER_MODELS"),
                backdrops: env_list("FILTER_BACKDROPS"),
                min_price: env_or("MIN_PRICE", 0u64),
                max_price: env_or("MAX_PRICE", 100_000u64),
            },
            sniper: SniperConfig {
                min_drop_percent: env_or("MIN_DROP_PERCENT", 10.0f64),
                freshness_window_secs: env_or("FRESH_SEC", 60u64),
                batch_size: env_or("BATCH_SIZE", 200usize),
                max_records: env_or("MAX_GIFTS", 5000usize),
                check_interval_min_secs: check_min,
                check_interval_max_secs: check_max,
                retention_multiplier: env_or("RETENTION_MULTIPLIER", 10u32),
                seen_db_path: env::var("SEEN_DB_PATH")
                    .unwrap_or_else(|_| "data/seen.db".to_string()),
            },
            monitoring: MonitoringConfig {
                health_port: env_or("HEALTH_PORT", 3000u16),
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        })
    }
}
