use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::AlertDispatcher;
use crate::api::source::{ListingSource, SourceError};
use crate::api::types::RawListing;
use crate::auth::{AuthError, AuthProvider, AuthToken, CredentialChain};
use crate::core::HealthChecker;
use crate::dedup::{SeenDatabase, SeenStore};
use crate::scanner::{filter_fresh_listings, FilterConfig};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Page size for the paginated fetch.
    pub batch_size: usize,
    /// Overall cap on records pulled per cycle.
    pub max_records: usize,
    /// Bounds for the randomized sleep between successful cycles.
    pub check_interval_secs: (u64, u64),
    /// Fixed wait after a transient auth failure.
    pub auth_backoff: Duration,
    /// Fixed wait after a failed poll cycle, before re-authenticating.
    pub cycle_backoff: Duration,
    /// Short wait after switching to the fallback credential.
    pub fallback_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_records: 5000,
            check_interval_secs: (60, 120),
            auth_backoff: Duration::from_secs(30),
            cycle_backoff: Duration::from_secs(30),
            fallback_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Authenticating,
    Polling,
    Sleeping,
    /// Terminal: no usable credential remains.
    Fatal,
}

/// Outcome of a single authentication attempt.
#[derive(Debug)]
pub enum AuthAttempt {
    Authenticated(AuthToken),
    /// Credential rejected, fallback activated; try again shortly.
    SwitchedCredential,
    /// Transient failure; retry after the auth backoff.
    RetryLater,
    /// Credential rejected and nothing left to fall back to.
    Exhausted,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub fetched: usize,
    pub accepted: usize,
    pub sent: usize,
}

/// Owns the authenticate -> fetch -> filter -> dispatch -> persist loop
/// and keeps it alive across auth failures, transient network failures
/// and malformed data. The only exit is the Fatal state.
pub struct Supervisor {
    source: Arc<dyn ListingSource>,
    auth: Arc<dyn AuthProvider>,
    dispatcher: AlertDispatcher,
    store: SeenStore,
    database: Option<SeenDatabase>,
    credentials: CredentialChain,
    filter: FilterConfig,
    config: SupervisorConfig,
    health: Arc<HealthChecker>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn ListingSource>,
        auth: Arc<dyn AuthProvider>,
        dispatcher: AlertDispatcher,
        store: SeenStore,
        database: Option<SeenDatabase>,
        credentials: CredentialChain,
        filter: FilterConfig,
        config: SupervisorConfig,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            source,
            auth,
            dispatcher,
            store,
            database,
            credentials,
            filter,
            config,
            health,
        }
    }

    pub fn store(&self) -> &SeenStore {
        &self.store
    }

    /// Drive the state machine until the Fatal state. Returns an error
    /// only from Fatal; every recoverable failure loops back into
    /// Authenticating or Polling with a backoff.
    pub async fn run(&mut self) -> Result<()> {
        let mut state = SupervisorState::Disconnected;
        let mut token: Option<AuthToken> = None;

        loop {
            state = match state {
                SupervisorState::Disconnected => SupervisorState::Authenticating,

                SupervisorState::Authenticating => match self.try_authenticate().await {
                    AuthAttempt::Authenticated(fresh) => {
                        token = Some(fresh);
                        SupervisorState::Polling
                    }
                    AuthAttempt::SwitchedCredential => {
                        tokio::time::sleep(self.config.fallback_delay).await;
                        SupervisorState::Authenticating
                    }
                    AuthAttempt::RetryLater => {
                        tokio::time::sleep(self.config.auth_backoff).await;
                        SupervisorState::Authenticating
                    }
                    AuthAttempt::Exhausted => SupervisorState::Fatal,
                },

                SupervisorState::Polling => match token.clone() {
                    None => SupervisorState::Authenticating,
                    Some(active) => match self.run_cycle(&active).await {
                        Ok(report) => {
                            tracing::info!(
                                "cycle done: {} fetched, {} accepted, {} sent",
                                report.fetched,
                                report.accepted,
                                report.sent
                            );
                            self.health.update_component("marketplace_api", true).await;
                            SupervisorState::Sleeping
                        }
                        Err(e) => {
                            // the session may have silently expired, so go
                            // back through authentication rather than
                            // retrying the fetch blind
                            tracing::error!(
                                "cycle failed: {:#}; re-authenticating in {:?}",
                                e,
                                self.config.cycle_backoff
                            );
                            self.health.update_component("marketplace_api", false).await;
                            token = None;
                            tokio::time::sleep(self.config.cycle_backoff).await;
                            SupervisorState::Authenticating
                        }
                    },
                },

                SupervisorState::Sleeping => {
                    let (min, max) = self.config.check_interval_secs;
                    let secs = {
                        let mut rng = rand::thread_rng();
                        rng.gen_range(min..=max)
                    };
                    tracing::info!("next check in {} sec", secs);
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    SupervisorState::Polling
                }

                SupervisorState::Fatal => {
                    self.health.update_component("auth", false).await;
                    return Err(anyhow!("no usable credential remains; shutting down"));
                }
            };
        }
    }

    /// One authentication attempt with the currently active credential.
    pub async fn try_authenticate(&mut self) -> AuthAttempt {
        let kind = self.credentials.active().kind;
        let result = self.auth.authenticate(self.credentials.active()).await;

        match result {
            Ok(token) => {
                tracing::info!("authenticated with {:?} credential", kind);
                self.health.update_component("auth", true).await;
                AuthAttempt::Authenticated(token)
            }
            Err(AuthError::Unauthorized) => {
                self.health.update_component("auth", false).await;
                if self.credentials.downgrade() {
                    tracing::warn!(
                        "{:?} credential rejected; switching to the fallback credential",
                        kind
                    );
                    AuthAttempt::SwitchedCredential
                } else {
                    tracing::error!("{:?} credential rejected and no fallback remains", kind);
                    AuthAttempt::Exhausted
                }
            }
            Err(AuthError::Transient(e)) => {
                tracing::warn!("authentication failed: {:#}; will retry", e);
                AuthAttempt::RetryLater
            }
        }
    }

    /// Exactly one fetch -> filter -> dispatch -> persist cycle.
    pub async fn run_cycle(&mut self, token: &AuthToken) -> Result<CycleReport> {
        self.source.prepare(token).await;

        let batch = self.fetch_batch(token).await?;
        let now = Utc::now();

        let accepted = filter_fresh_listings(&batch, &mut self.store, &self.filter, now);
        let sent = self.dispatcher.dispatch(&accepted).await;
        if !accepted.is_empty() {
            self.health.update_component("telegram", sent > 0).await;
        }

        self.store.prune(now);
        self.persist(now).await;

        Ok(CycleReport {
            fetched: batch.len(),
            accepted: accepted.len(),
            sent,
        })
    }

    /// Offset-paginated fetch, stopping at the first empty page or at the
    /// per-cycle record cap, whichever comes first.
    async fn fetch_batch(&self, token: &AuthToken) -> Result<Vec<RawListing>> {
        let mut listings = Vec::new();
        let mut offset = 0;

        while offset < self.config.max_records {
            let limit = self.config.batch_size.min(self.config.max_records - offset);
            let page = self
                .source
                .fetch_page(offset, limit, token)
                .await
                .map_err(|e| match e {
                    SourceError::Unauthorized => anyhow!("marketplace session expired"),
                    SourceError::Transient(e) => e,
                })?;
            if page.is_empty() {
                break;
            }
            listings.extend(page);
            offset += limit;
        }

        tracing::info!("pulled {} listings", listings.len());
        Ok(listings)
    }

    /// Snapshot the store to disk. Failure keeps the process alive on
    /// in-memory state; duplicate alerts after a later crash are the
    /// accepted trade-off.
    async fn persist(&self, now: DateTime<Utc>) {
        let Some(database) = &self.database else {
            return;
        };
        let snapshot = self.store.records();
        match database.persist(&snapshot, self.store.horizon(now)).await {
            Ok(()) => {
                tracing::debug!("persisted {} seen records", snapshot.len());
                self.health.update_component("store", true).await;
            }
            Err(e) => {
                tracing::error!("failed to persist seen store: {:#}", e);
                self.health.update_component("store", false).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertDispatcher, DispatcherConfig, MockNotifier};
    use crate::api::source::MockListingSource;
    use crate::auth::{Credential, CredentialKind, MockAuthProvider};
    use mockall::Sequence;
    use serde_json::json;

    fn plausible_session() -> String {
        format!("BA{}", "x".repeat(120))
    }

    fn chain_with_fallback() -> CredentialChain {
        CredentialChain::from_secrets(Some(&plausible_session()), "123:bot")
    }

    fn chain_service_only() -> CredentialChain {
        CredentialChain::from_secrets(None, "123:bot")
    }

    fn raw(id: &str, price: &str, floor: &str, listed_at: i64) -> RawListing {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "price": price,
            "floor_price": floor,
            "listed_at": listed_at,
        }))
        .unwrap()
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

    fn build(
        source: MockListingSource,
        auth: MockAuthProvider,
        notifier: MockNotifier,
        credentials: CredentialChain,
    ) -> Supervisor {
        Supervisor::new(
            Arc::new(source),
            Arc::new(auth),
            AlertDispatcher::with_config(
                Arc::new(notifier),
                DispatcherConfig {
                    pace_min_ms: 0,
                    pace_max_ms: 0,
                },
            ),
            SeenStore::with_window(60, 10),
            None,
            credentials,
            FilterConfig {
                min_drop_percent: 10.0,
                freshness_window_secs: 60,
            },
            quick_config(),
            Arc::new(HealthChecker::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_primary_falls_back_to_service_credential() {
        let mut auth = MockAuthProvider::new();
        let mut seq = Sequence::new();
        auth.expect_authenticate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|c: &Credential| c.kind == CredentialKind::User)
            .returning(|_| Err(AuthError::Unauthorized));
        auth.expect_authenticate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|c: &Credential| c.kind == CredentialKind::Service)
            .returning(|_| Ok(AuthToken::new("tma fallback")));

        let mut supervisor = build(
            MockListingSource::new(),
            auth,
            MockNotifier::new(),
            chain_with_fallback(),
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
    async fn unauthorized_without_fallback_is_fatal() {
        let mut auth = MockAuthProvider::new();
        auth.expect_authenticate()
            .returning(|_| Err(AuthError::Unauthorized));

        let mut supervisor = build(
            MockListingSource::new(),
            auth,
            MockNotifier::new(),
            chain_service_only(),
        );

        // run() only ever returns out of the Fatal state
        let outcome = supervisor.run().await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_auth_failure_asks_for_retry() {
        let mut auth = MockAuthProvider::new();
        auth.expect_authenticate()
            .returning(|_| Err(AuthError::Transient(anyhow!("bridge timeout"))));

        let mut supervisor = build(
            MockListingSource::new(),
            auth,
            MockNotifier::new(),
            chain_service_only(),
        );

        assert!(matches!(
            supervisor.try_authenticate().await,
            AuthAttempt::RetryLater
        ));
        // the credential is still usable afterwards
        assert!(matches!(
            supervisor.try_authenticate().await,
            AuthAttempt::RetryLater
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_filters_dispatches_and_suppresses_repeats() {
        let now = Utc::now().timestamp();

        let mut source = MockListingSource::new();
        source.expect_prepare().returning(|_| ());
        source.expect_fetch_page().returning(move |offset, _, _| {
            if offset == 0 {
                Ok(vec![
                    raw("a", "90", "100", now - 10),
                    raw("b", "95", "100", now - 10),
                ])
            } else {
                Ok(vec![])
            }
        });

        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(1)
            .withf(|text: &str| text.contains("<b>a</b>"))
            .returning(|_| Ok(()));

        let mut supervisor = build(
            source,
            MockAuthProvider::new(),
            notifier,
            chain_service_only(),
        );

        let token = AuthToken::new("tma test");
        let report = supervisor.run_cycle(&token).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.sent, 1);

        // the same batch again: "a" is now suppressed, "b" still below
        // threshold, so nothing is dispatched
        let report = supervisor.run_cycle(&token).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pagination_stops_at_the_record_cap() {
        let now = Utc::now().timestamp();

        let mut source = MockListingSource::new();
        source.expect_prepare().returning(|_| ());
        // every page is full; only the cap stops the loop
        source.expect_fetch_page().returning(move |offset, limit, _| {
            Ok((0..limit)
                .map(|i| raw(&format!("{}-{}", offset, i), "100", "100", now - 10))
                .collect())
        });

        let mut supervisor = build(
            source,
            MockAuthProvider::new(),
            MockNotifier::new(),
            chain_service_only(),
        );

        let report = supervisor.run_cycle(&AuthToken::new("tma test")).await.unwrap();
        assert_eq!(report.fetched, 4);
        assert_eq!(report.accepted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_fails_the_cycle() {
        let mut source = MockListingSource::new();
        source.expect_prepare().returning(|_| ());
        source
            .expect_fetch_page()
            .returning(|_, _, _| Err(SourceError::Unauthorized));

        let mut supervisor = build(
            source,
            MockAuthProvider::new(),
            MockNotifier::new(),
            chain_service_only(),
        );

        assert!(supervisor
            .run_cycle(&AuthToken::new("tma test"))
            .await
            .is_err());
    }
}
