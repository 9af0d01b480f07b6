use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::source::{ListingSource, SourceError};
use super::types::{ActivityResponse, FloorsResponse, RawListing, SearchResponse, SortOrder};
use crate::auth::AuthToken;
use crate::core::config::PortalsConfig;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36 Edg/137.0.0.0";

/// HTTP client for the Portals marketplace API. Holds the filter options
/// so every page request carries the same query shape.
pub struct PortalsClient {
    http: Client,
    base_url: String,
    collections: Vec<String>,
    models: Vec<String>,
    backdrops: Vec<String>,
    min_price: u64,
    max_price: u64,
}

impl PortalsClient {
    pub fn new(config: &PortalsConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            collections: config.collections.clone(),
            models: config.models.clone(),
            backdrops: config.backdrops.clone(),
            min_price: config.min_price,
            max_price: config.max_price,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &AuthToken,
    ) -> Result<T, SourceError> {
        let response = self
            .http
            .get(url)
            .header("Authorization", token.as_header())
            .header("Accept", "application/json, text/plain, */*")
            .header("Origin", &self.base_url)
            .header("Referer", format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| SourceError::Transient(anyhow!(e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(SourceError::Transient(anyhow!(
                    "marketplace returned {}: {}",
                    status,
                    body
                )))
            }
            _ => response
                .json::<T>()
                .await
                .map_err(|e| SourceError::Transient(anyhow!(e))),
        }
    }

    /// Query fragment shared by the search and activity endpoints:
    /// price bounds plus collection/model/backdrop filters.
    fn filter_query(&self) -> String {
        let mut query = String::new();
        if self.max_price < 100_000 {
            query.push_str(&format!(
                "&min_price={}&max_price={}",
                self.min_price, self.max_price
            ));
        }
        if !self.collections.is_empty() {
            query.push_str(&format!(
                "&filter_by_collections={}",
                join_filter(&self.collections)
            ));
        }
        if !self.models.is_empty() {
            query.push_str(&format!("&filter_by_models={}", join_filter(&self.models)));
        }
        if !self.backdrops.is_empty() {
            query.push_str(&format!(
                "&filter_by_backdrops={}",
                join_filter(&self.backdrops)
            ));
        }
        query
    }

    pub async fn search_page(
        &self,
        offset: usize,
        limit: usize,
        sort: SortOrder,
        token: &AuthToken,
    ) -> Result<Vec<RawListing>, SourceError> {
        let url = format!(
            "{}/api/nfts/search?offset={}&limit={}&sort_by={}{}&status=listed",
            self.base_url,
            offset,
            limit,
            sort.as_query(),
            self.filter_query()
        );
        let response: SearchResponse = self.get_json(&url, token).await?;
        Ok(response.results)
    }

    pub async fn activity_page(
        &self,
        offset: usize,
        limit: usize,
        token: &AuthToken,
    ) -> Result<Vec<RawListing>, SourceError> {
        let url = format!(
            "{}/api/market/actions/?offset={}&limit={}&sort_by={}&action_types=listing{}",
            self.base_url,
            offset,
            limit,
            SortOrder::Latest.as_query(),
            self.filter_query()
        );
        let response: ActivityResponse = self.get_json(&url, token).await?;
        Ok(response
            .actions
            .into_iter()
            .filter_map(|action| action.into_listing())
            .collect())
    }

    pub async fn collection_floors(
        &self,
        token: &AuthToken,
    ) -> Result<HashMap<String, Value>, SourceError> {
        let url = format!("{}/api/collections/floors", self.base_url);
        let response: FloorsResponse = self.get_json(&url, token).await?;
        Ok(response.floor_prices)
    }

    /// Best-effort page load before the first authenticated call of a
    /// cycle. The market fronts its API with a browser check; hitting the
    /// root first keeps the session warm. Failures are tolerated.
    pub async fn warm_up(&self) {
        match self.http.get(&self.base_url).send().await {
            Ok(_) => tracing::debug!("warm-up request completed"),
            Err(e) => tracing::debug!("warm-up request failed: {}", e),
        }
    }

    async fn log_floor_summary(&self, token: &AuthToken) {
        if self.collections.is_empty() {
            return;
        }
        match self.collection_floors(token).await {
            Ok(floors) => {
                for name in &self.collections {
                    if let Some(floor) = floors.get(&to_short_name(name)) {
                        tracing::debug!("floor for {}: {}", name, floor);
                    }
                }
            }
            Err(e) => tracing::debug!("floor lookup failed: {}", e),
        }
    }
}

/// Paged `nfts/search` sorted by ascending price, so pagination walks the
/// book deterministically from the cheapest listings up.
pub struct SearchFeed {
    client: Arc<PortalsClient>,
}

impl SearchFeed {
    pub fn new(client: Arc<PortalsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListingSource for SearchFeed {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        token: &AuthToken,
    ) -> Result<Vec<RawListing>, SourceError> {
        self.client
            .search_page(offset, limit, SortOrder::PriceAsc, token)
            .await
    }

    async fn prepare(&self, token: &AuthToken) {
        self.client.warm_up().await;
        self.client.log_floor_summary(token).await;
    }
}

/// `market/actions` restricted to listing events, newest first. Same
/// record shape as search after unwrapping the action envelope.
pub struct ActivityFeed {
    client: Arc<PortalsClient>,
}

impl ActivityFeed {
    pub fn new(client: Arc<PortalsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListingSource for ActivityFeed {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        token: &AuthToken,
    ) -> Result<Vec<RawListing>, SourceError> {
        self.client.activity_page(offset, limit, token).await
    }

    async fn prepare(&self, token: &AuthToken) {
        self.client.warm_up().await;
        self.client.log_floor_summary(token).await;
    }
}

/// Capitalize each word the way the marketplace expects collection names
/// ("plush pepe" -> "Plush Pepe").
fn cap_words(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comma-join filter values as the API wants them: each value capitalized
/// and URL-encoded, separated by an encoded comma.
fn join_filter(names: &[String]) -> String {
    names
        .iter()
        .map(|name| urlencoding::encode(&cap_words(name)).into_owned())
        .collect::<Vec<_>>()
        .join("%2C")
}

/// Collection key used by the floors endpoint: lowercase, no spaces,
/// apostrophes or hyphens.
pub(crate) fn to_short_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '\'' | '’' | '-'))
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: PortalsConfig) -> PortalsClient {
        PortalsClient::new(&config).unwrap()
    }

    fn base_config() -> PortalsConfig {
        PortalsConfig {
            base_url: "https://portals-market.com".to_string(),
            auth_bridge_url: "http://127.0.0.1:8787/auth".to_string(),
            session_string: None,
            feed_mode: crate::core::FeedMode::Search,
            collections: vec![],
            models: vec![],
            backdrops: vec![],
            min_price: 0,
            max_price: 100_000,
        }
    }

    #[test]
    fn filter_query_empty_by_default() {
        assert_eq!(client(base_config()).filter_query(), "");
    }

    #[test]
    fn filter_query_includes_price_bounds_when_capped() {
        let mut config = base_config();
        config.min_price = 5;
        config.max_price = 500;
        assert_eq!(
            client(config).filter_query(),
            "&min_price=5&max_price=500"
        );
    }

    #[test]
    fn filter_query_encodes_collection_names() {
        let mut config = base_config();
        config.collections = vec!["plush pepe".to_string(), "durov's cap".to_string()];
        assert_eq!(
            client(config).filter_query(),
            "&filter_by_collections=Plush%20Pepe%2CDurov%27s%20Cap"
        );
    }

    #[test]
    fn short_name_strips_decoration() {
        assert_eq!(to_short_name("Durov's Cap"), "durovscap");
        assert_eq!(to_short_name("B-Day Candle"), "bdaycandle");
    }

    #[test]
    fn cap_words_capitalizes_each_word() {
        assert_eq!(cap_words("plush pepe"), "Plush Pepe");
        assert_eq!(cap_words("Homemade Cake"), "Homemade Cake");
    }
}
