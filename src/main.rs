use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use portals_sniper::alert::{AlertDispatcher, TelegramChannel};
use portals_sniper::api::{ActivityFeed, ListingSource, PortalsClient, SearchFeed};
use portals_sniper::auth::{CredentialChain, WebAppAuth};
use portals_sniper::core::{self, Config, FeedMode, HealthChecker};
use portals_sniper::dedup::{SeenDatabase, SeenStore};
use portals_sniper::scanner::FilterConfig;
use portals_sniper::supervisor::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    core::logging::init_logging(&config.monitoring.log_level);

    tracing::info!("🎁 Portals drop sniper starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Watching drops >= {}% within {}s, feed mode {:?}",
        config.sniper.min_drop_percent,
        config.sniper.freshness_window_secs,
        config.portals.feed_mode
    );

    // Initialize health checker
    let health_checker = Arc::new(HealthChecker::new());

    // Start health check endpoint
    let health_clone = health_checker.clone();
    let health_port = config.monitoring.health_port;
    tokio::spawn(async move { start_health_server(health_clone, health_port).await });

    tracing::info!("✅ Health endpoint running on port {}", health_port);

    // Marketplace client and the configured acquisition mode
    let client = Arc::new(PortalsClient::new(&config.portals)?);
    let source: Arc<dyn ListingSource> = match config.portals.feed_mode {
        FeedMode::Search => Arc::new(SearchFeed::new(client)),
        FeedMode::Activity => Arc::new(ActivityFeed::new(client)),
    };

    let auth = Arc::new(WebAppAuth::new(&config.portals)?);
    let credentials = CredentialChain::from_secrets(
        config.portals.session_string.as_deref(),
        &config.telegram.bot_token,
    );

    let notifier = Arc::new(TelegramChannel::new(&config.telegram)?);
    let dispatcher = AlertDispatcher::new(notifier);

    // Restore the seen-store snapshot; persistence failures downgrade to
    // in-memory operation instead of refusing to start
    let mut store = SeenStore::with_window(
        config.sniper.freshness_window_secs,
        config.sniper.retention_multiplier,
    );
    let database = match SeenDatabase::new(&config.sniper.seen_db_path).await {
        Ok(db) => {
            match db.load().await {
                Ok(records) => {
                    tracing::info!("restored {} seen records", records.len());
                    store.restore(records);
                }
                Err(e) => tracing::warn!("could not load seen records: {:#}", e),
            }
            health_checker.update_component("store", true).await;
            Some(db)
        }
        Err(e) => {
            tracing::error!(
                "seen database unavailable ({:#}); continuing with in-memory state only",
                e
            );
            None
        }
    };

    let mut supervisor = Supervisor::new(
        source,
        auth,
        dispatcher,
        store,
        database,
        credentials,
        FilterConfig {
            min_drop_percent: config.sniper.min_drop_percent,
            freshness_window_secs: config.sniper.freshness_window_secs as i64,
        },
        SupervisorConfig {
            batch_size: config.sniper.batch_size,
            max_records: config.sniper.max_records,
            check_interval_secs: (
                config.sniper.check_interval_min_secs,
                config.sniper.check_interval_max_secs,
            ),
            auth_backoff: Duration::from_secs(30),
            cycle_backoff: Duration::from_secs(30),
            fallback_delay: Duration::from_secs(5),
        },
        health_checker,
    );

    supervisor.run().await
}

async fn start_health_server(health_checker: Arc<HealthChecker>, port: u16) {
    use warp::Filter;

    let health = warp::path("health")
        .and(warp::any().map(move || health_checker.clone()))
        .and_then(|checker: Arc<HealthChecker>| async move {
            let status = checker.get_status().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&status))
        });

    warp::serve(health).run(([0, 0, 0, 0], port)).await;
}
