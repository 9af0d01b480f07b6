use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One listing exactly as the feed returns it. Nothing here is trusted:
/// prices and timestamps arrive as numbers or decorated strings depending
/// on the endpoint, and any field can be absent. The filter owns all
/// parsing; this type only carries the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawListing {
    pub id: Option<String>,
    pub token_id: Option<String>,
    pub name: Option<String>,
    pub price: Option<Value>,
    pub floor_price: Option<Value>,
    pub listed_at: Option<Value>,
    pub backdrop: Option<String>,
    pub photo_url: Option<String>,
}

/// A listing that cleared the freshness and drop checks. Immutable once
/// produced; consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedListing {
    pub id: String,
    pub name: Option<String>,
    pub price: f64,
    pub floor_price: f64,
    /// Percent below floor, rounded to one decimal place.
    pub drop_percent: f64,
    pub backdrop: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    PriceAsc,
    PriceDesc,
    Latest,
}

impl SortOrder {
    /// Value for the marketplace's `sort_by` query parameter.
    pub fn as_query(&self) -> &'static str {
        match self {
            SortOrder::PriceAsc => "price+asc",
            SortOrder::PriceDesc => "price+desc",
            SortOrder::Latest => "listed_at+desc",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<RawListing>,
}

/// One entry of the `market/actions` feed. Listing events embed the nft
/// payload; price and timestamp may live on the action instead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketAction {
    pub nft: Option<RawListing>,
    pub amount: Option<Value>,
    pub created_at: Option<Value>,
}

impl MarketAction {
    pub fn into_listing(self) -> Option<RawListing> {
        let mut listing = self.nft?;
        if listing.price.is_none() {
            listing.price = self.amount;
        }
        if listing.listed_at.is_none() {
            listing.listed_at = self.created_at;
        }
        Some(listing)
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityResponse {
    #[serde(default)]
    pub actions: Vec<MarketAction>,
}

#[derive(Debug, Deserialize)]
pub struct FloorsResponse {
    #[serde(rename = "floorPrices", default)]
    pub floor_prices: std::collections::HashMap<String, Value>,
}
