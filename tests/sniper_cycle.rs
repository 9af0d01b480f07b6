use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portals_sniper::alert::{AlertDispatcher, DispatcherConfig, Notifier};
use portals_sniper::api::source::{ListingSource, SourceError};
use portals_sniper::api::types::RawListing;
use portals_sniper::auth::{
    AuthError, AuthProvider, AuthToken, Credential, CredentialChain, CredentialKind,
};
use portals_sniper::core::HealthChecker;
use portals_sniper::dedup::{SeenDatabase, SeenStore};
use portals_sniper::scanner::{filter_fresh_listings, FilterConfig};
use portals_sniper::supervisor::{AuthAttempt, Supervisor, SupervisorConfig};

fn listing(id: &str, price: &str, floor: &str, listed_at: i64) -> RawListing {
    serde_json::from_value(json!({
        "id": id,
        "name": format!("Gift {}", id.to_uppercase()),
        "price": price,
        "floor_price": floor,
        "listed_at": listed_at,
        "backdrop": "Midnight Blue",
        "photo_url": format!("https://example.com/{}.png", id),
    }))
    .unwrap()
}

/// Serves fixed pages by offset; past the last page it returns empty.
struct StaticFeed {
    pages: Vec<Vec<RawListing>>,
}

#[async_trait]
impl ListingSource for StaticFeed {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        _token: &AuthToken,
    ) -> Result<Vec<RawListing>, SourceError> {
        let index = offset / limit.max(1);
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }
}

struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Rejects user sessions, accepts the service credential.
struct UserSessionExpiredAuth;

#[async_trait]
impl AuthProvider for UserSessionExpiredAuth {
    async fn authenticate(&self, credential: &Credential) -> Result<AuthToken, AuthError> {
        match credential.kind {
            CredentialKind::User => Err(AuthError::Unauthorized),
            CredentialKind::Service => Ok(AuthToken::new("tma service-init-data")),
        }
    }
}

struct AlwaysUnauthorizedAuth;

#[async_trait]
impl AuthProvider for AlwaysUnauthorizedAuth {
    async fn authenticate(&self, _credential: &Credential) -> Result<AuthToken, AuthError> {
        Err(AuthError::Unauthorized)
    }
}

fn plausible_session() -> String {
    format!("BA{}", "x".repeat(120))
}

fn quick_config() -> SupervisorConfig {
    SupervisorConfig {
        batch_size: 2,
        max_records: 4,
        check_interval_secs: (1, 1),
        auth_backoff: Duration::from_millis(10),
        cycle_backoff: Duration::from_millis(10),
        fallback_delay: Duration::from_millis(10),
    }
}

fn filter_config() -> FilterConfig {
    FilterConfig {
        min_drop_percent: 10.0,
        freshness_window_secs: 60,
    }
}

fn build_supervisor(
    source: Arc<dyn ListingSource>,
    auth: Arc<dyn AuthProvider>,
    notifier: Arc<RecordingNotifier>,
    credentials: CredentialChain,
    database: Option<SeenDatabase>,
) -> Supervisor {
    Supervisor::new(
        source,
        auth,
        AlertDispatcher::with_config(
            notifier,
            DispatcherConfig {
                pace_min_ms: 0,
                pace_max_ms: 0,
            },
        ),
        SeenStore::with_window(60, 10),
        database,
        credentials,
        filter_config(),
        quick_config(),
        Arc::new(HealthChecker::new()),
    )
}

#[tokio::test]
async fn full_cycle_alerts_once_and_suppresses_repeats() {
    let now = Utc::now().timestamp();
    let source = Arc::new(StaticFeed {
        pages: vec![vec![
            listing("a", "90", "100", now - 10),
            listing("b", "95", "100", now - 10),
        ]],
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let database = SeenDatabase::new("sqlite::memory:").await.unwrap();

    let mut supervisor = build_supervisor(
        source,
        Arc::new(UserSessionExpiredAuth),
        notifier.clone(),
        CredentialChain::from_secrets(None, "123:bot"),
        Some(database),
    );

    let token = AuthToken::new("tma test");
    let report = supervisor.run_cycle(&token).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.sent, 1);

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("<b>Gift A</b>"));
    assert!(messages[0].contains("💸 Drop: 10.0%"));

    let now = Utc::now();
    assert!(supervisor.store().contains("a", now));
    assert!(!supervisor.store().contains("b", now));

    // same feed again: nothing new to say
    let report = supervisor.run_cycle(&token).await.unwrap();
    assert_eq!(report.accepted, 0);
    assert_eq!(notifier.messages().len(), 1);
}

#[tokio::test]
async fn persisted_snapshot_suppresses_after_restart() {
    let now = Utc::now();
    let batch = vec![listing("a", "80", "100", now.timestamp() - 10)];
    let database = SeenDatabase::new("sqlite::memory:").await.unwrap();

    // first process lifetime: alert and persist
    let mut store = SeenStore::with_window(60, 10);
    let accepted = filter_fresh_listings(&batch, &mut store, &filter_config(), now);
    assert_eq!(accepted.len(), 1);
    database
        .persist(&store.records(), store.horizon(now))
        .await
        .unwrap();

    // second process lifetime: restore and re-run the same batch
    let mut restored = SeenStore::with_window(60, 10);
    restored.restore(database.load().await.unwrap());
    let accepted = filter_fresh_listings(&batch, &mut restored, &filter_config(), now);
    assert!(accepted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_user_session_falls_back_to_service_credential() {
    let notifier = Arc::new(RecordingNotifier::new());
    let session = plausible_session();
    let mut supervisor = build_supervisor(
        Arc::new(StaticFeed { pages: vec![] }),
        Arc::new(UserSessionExpiredAuth),
        notifier,
        CredentialChain::from_secrets(Some(&session), "123:bot"),
        None,
    );

    assert!(matches!(
        supervisor.try_authenticate().await,
        AuthAttempt::SwitchedCredential
    ));
    assert!(matches!(
        supervisor.try_authenticate().await,
        AuthAttempt::Authenticated(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn no_fallback_reaches_fatal() {
    let notifier = Arc::new(RecordingNotifier::new());
    let mut supervisor = build_supervisor(
        Arc::new(StaticFeed { pages: vec![] }),
        Arc::new(AlwaysUnauthorizedAuth),
        notifier,
        CredentialChain::from_secrets(None, "123:bot"),
        None,
    );

    assert!(supervisor.run().await.is_err());
}
