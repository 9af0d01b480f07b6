pub mod webapp;

pub use webapp::WebAppAuth;

use async_trait::async_trait;
use thiserror::Error;

/// Which kind of secret backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// A full user session string.
    User,
    /// A bot token; fewer marketplace privileges but it cannot expire the
    /// way a user session does.
    Service,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub kind: CredentialKind,
    secret: String,
}

impl Credential {
    /// Accept a session string only when it is shaped like a real one;
    /// Telegram session exports are long and start with BA/CA/DA.
    pub fn user_session(secret: &str) -> Option<Self> {
        let secret = secret.trim();
        let plausible = secret.len() > 100
            && ["BA", "CA", "DA"].iter().any(|p| secret.starts_with(p));
        plausible.then(|| Self {
            kind: CredentialKind::User,
            secret: secret.to_string(),
        })
    }

    pub fn service(secret: &str) -> Self {
        Self {
            kind: CredentialKind::Service,
            secret: secret.trim().to_string(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

/// Opaque bearer token for the marketplace API (`tma <init-data>`).
#[derive(Debug, Clone)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Value of the Authorization header.
    pub fn as_header(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The credential itself was rejected. Triggers the fallback switch;
    /// fatal when no fallback remains.
    #[error("credential rejected")]
    Unauthorized,
    #[error("transient auth failure: {0}")]
    Transient(anyhow::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> Result<AuthToken, AuthError>;
}

/// The active credential plus the one-shot downgrade rule: a rejected user
/// session falls back to the service credential exactly once per process;
/// after that there is nothing left to try.
#[derive(Debug)]
pub struct CredentialChain {
    active: Credential,
    fallback: Option<Credential>,
}

impl CredentialChain {
    /// Primary is the user session when one is configured and plausible,
    /// with the service credential as fallback; otherwise the service
    /// credential alone.
    pub fn from_secrets(session_string: Option<&str>, service_secret: &str) -> Self {
        let user = session_string.and_then(Credential::user_session);
        let service = Credential::service(service_secret);
        match user {
            Some(user) => Self {
                active: user,
                fallback: Some(service),
            },
            None => Self {
                active: service,
                fallback: None,
            },
        }
    }

    pub fn active(&self) -> &Credential {
        &self.active
    }

    /// Switch to the fallback credential. Returns false when none remains.
    pub fn downgrade(&mut self) -> bool {
        match self.fallback.take() {
            Some(fallback) => {
                self.active = fallback;
                true
            }
            None => false,
        }
    }
}
