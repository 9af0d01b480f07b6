use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AuthError, AuthProvider, AuthToken, Credential, CredentialKind};
use crate::core::config::PortalsConfig;

/// Exchanges a Telegram credential for a `tma <init-data>` bearer token
/// through the web-view auth bridge. The bridge performs the actual
/// Telegram app-view handshake; this side only speaks HTTP to it.
pub struct WebAppAuth {
    http: Client,
    bridge_url: String,
}

#[derive(Serialize)]
struct AuthBridgeRequest<'a> {
    kind: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct AuthBridgeResponse {
    token: String,
}

impl WebAppAuth {
    pub fn new(config: &PortalsConfig) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            bridge_url: config.auth_bridge_url.clone(),
        })
    }
}

#[async_trait]
impl AuthProvider for WebAppAuth {
    async fn authenticate(&self, credential: &Credential) -> Result<AuthToken, AuthError> {
        let kind = match credential.kind {
            CredentialKind::User => "user",
            CredentialKind::Service => "service",
        };

        let response = self
            .http
            .post(&self.bridge_url)
            .json(&AuthBridgeRequest {
                kind,
                secret: credential.secret(),
            })
            .send()
            .await
            .map_err(|e| AuthError::Transient(anyhow!(e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::Unauthorized),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(AuthError::Transient(anyhow!(
                    "auth bridge returned {}: {}",
                    status,
                    body
                )))
            }
            _ => {
                let body: AuthBridgeResponse = response
                    .json()
                    .await
                    .map_err(|e| AuthError::Transient(anyhow!(e)))?;
                if body.token.is_empty() {
                    return Err(AuthError::Transient(anyhow!("auth bridge returned an empty token")));
                }
                Ok(AuthToken::new(body.token))
            }
        }
    }
}
