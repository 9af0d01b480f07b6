pub mod telegram;

pub use telegram::TelegramChannel;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::api::types::AcceptedListing;

/// Outbound delivery capability: one rendered message in, ok or error out.
/// Per-call failure is the caller's problem to isolate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Fixed alert template: name, price, floor, drop, backdrop and a link.
pub fn render_alert(listing: &AcceptedListing) -> String {
    format!(
        "🎁 <b>{}</b>\n\
         💰 Price: {} TON\n\
         🏷 Floor: {} TON\n\
         💸 Drop: {:.1}%\n\
         🌑 BG: {}\n\
         🔗 <a href='{}'>Open</a>",
        listing.name.as_deref().unwrap_or("Unknown"),
        format_amount(listing.price),
        format_amount(listing.floor_price),
        listing.drop_percent,
        listing.backdrop.as_deref().unwrap_or("-"),
        listing.photo_url.as_deref().unwrap_or(""),
    )
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Bounds for the random delay between successive sends. Pacing only,
    /// not a correctness requirement.
    pub pace_min_ms: u64,
    pub pace_max_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pace_min_ms: 500,
            pace_max_ms: 1300,
        }
    }
}

/// Renders and delivers one message per accepted listing, in batch order.
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(notifier, DispatcherConfig::default())
    }

    pub fn with_config(notifier: Arc<dyn Notifier>, config: DispatcherConfig) -> Self {
        Self { notifier, config }
    }

    /// Returns the number of messages delivered. A failed send is logged
    /// and skipped; the rest of the batch still goes out.
    pub async fn dispatch(&self, batch: &[AcceptedListing]) -> usize {
        let mut sent = 0;

        for (index, listing) in batch.iter().enumerate() {
            let message = render_alert(listing);
            match self.notifier.send(&message).await {
                Ok(()) => {
                    sent += 1;
                    tracing::info!(
                        "sent alert: {} @ {} TON (-{:.1}%)",
                        listing.name.as_deref().unwrap_or(&listing.id),
                        format_amount(listing.price),
                        listing.drop_percent
                    );
                }
                Err(e) => {
                    tracing::error!("failed to send alert for {}: {:#}", listing.id, e);
                }
            }

            if index + 1 < batch.len() {
                let delay_ms = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(self.config.pace_min_ms..=self.config.pace_max_ms)
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        sent
    }
}
