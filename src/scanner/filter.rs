use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::api::types::{AcceptedListing, RawListing};
use crate::dedup::SeenStore;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Alert threshold: percent below floor.
    pub min_drop_percent: f64,
    /// Maximum listing age, in seconds, to be eligible.
    pub freshness_window_secs: i64,
}

/// Select the listings worth alerting on: new to the store, listed within
/// the freshness window, and priced at least `min_drop_percent` below
/// floor. Batch order is preserved.
///
/// Each record runs through a short-circuit pipeline; a record failing any
/// step is skipped silently — malformed feed entries are expected noise,
/// not errors. Identifiers are marked seen only on acceptance, so a fresh
/// listing that has not dropped far enough yet stays a candidate for the
/// next cycle.
pub fn filter_fresh_listings(
    batch: &[RawListing],
    store: &mut SeenStore,
    config: &FilterConfig,
    now: DateTime<Utc>,
) -> Vec<AcceptedListing> {
    let now_ts = now.timestamp();
    let mut accepted = Vec::new();

    for listing in batch {
        let Some(id) = resolve_id(listing) else {
            continue;
        };
        if store.contains(id, now) {
            continue;
        }
        let Some(listed_ts) = listing.listed_at.as_ref().and_then(parse_listed_at) else {
            continue;
        };
        // Negative age (a future listed_at) passes: any parseable
        // timestamp not older than the window counts as fresh.
        if now_ts - listed_ts > config.freshness_window_secs {
            continue;
        }
        let Some(price) = listing.price.as_ref().and_then(parse_amount) else {
            continue;
        };
        let Some(floor) = listing.floor_price.as_ref().and_then(parse_amount) else {
            continue;
        };

        let drop_percent = if floor > 0.0 {
            (floor - price) / floor * 100.0
        } else {
            0.0
        };
        if drop_percent < config.min_drop_percent {
            continue;
        }

        accepted.push(AcceptedListing {
            id: id.to_string(),
            name: listing.name.clone(),
            price,
            floor_price: floor,
            drop_percent: round_to_tenth(drop_percent),
            backdrop: listing.backdrop.clone(),
            photo_url: listing.photo_url.clone(),
        });
        store.mark(id, now);
    }

    tracing::info!("{} listings -> {} fresh drops", batch.len(), accepted.len());
    accepted
}

fn resolve_id(listing: &RawListing) -> Option<&str> {
    listing
        .id
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| listing.token_id.as_deref().filter(|s| !s.is_empty()))
}

/// Parse a `listed_at` value into epoch seconds. Numbers are taken as-is.
/// Strings get the sub-second fraction cut at the first `.`, then a
/// `YYYY-MM-DDTHH:MM:SS` parse; failing that, a bare numeric parse of the
/// whole string.
pub(crate) fn parse_listed_at(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            let whole = match trimmed.split_once('.') {
                Some((head, _)) => head,
                None => trimmed,
            };
            if let Ok(dt) = NaiveDateTime::parse_from_str(whole, "%Y-%m-%dT%H:%M:%S") {
                return Some(dt.and_utc().timestamp());
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f as i64)
        }
        _ => None,
    }
}

/// Parse a price-like value. The feed decorates approximate prices with a
/// leading `~` and sometimes uses thousands separators.
pub(crate) fn parse_amount(value: &Value) -> Option<f64> {
    let text = match value {
        Value::Number(n) => return n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s,
        _ => return None,
    };
    let cleaned = text
        .trim()
        .trim_start_matches('~')
        .trim()
        .replace([',', '_'], "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
