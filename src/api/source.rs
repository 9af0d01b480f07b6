use async_trait::async_trait;
use thiserror::Error;

use super::types::RawListing;
use crate::auth::AuthToken;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The marketplace rejected the bearer token. The supervisor reacts by
    /// dropping the session and re-authenticating.
    #[error("marketplace rejected the auth token")]
    Unauthorized,
    #[error("transient marketplace failure: {0}")]
    Transient(anyhow::Error),
}

/// The single capability every data-acquisition variant is unified behind:
/// fetch up to `limit` listing records at `offset`, or fewer/empty at end
/// of data. The filter/store/dispatcher core never learns how records
/// actually arrive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        token: &AuthToken,
    ) -> Result<Vec<RawListing>, SourceError>;

    /// Cycle-start hook: session warm-up, floor summaries. Failures here
    /// must not abort the cycle.
    async fn prepare(&self, _token: &AuthToken) {}
}
