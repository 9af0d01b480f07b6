use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;
use crate::core::config::TelegramConfig;

/// Delivers alerts to a Telegram channel through the Bot API.
pub struct TelegramChannel {
    http: Client,
    api_url: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            api_url: format!(
                "https://api.telegram.org/bot{}/sendMessage",
                config.bot_token
            ),
            chat_id: config.channel.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.api_url)
            .json(&SendMessageRequest {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: false,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: SendMessageResponse = response.json().await?;
        if !body.ok {
            bail!(
                "telegram rejected the message: {}",
                body.description.unwrap_or_default()
            );
        }
        Ok(())
    }
}
