//! Gateway session lifecycle: token acquisition, expiry, silent renewal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::TimeProvider;
use crate::error::PaymentError;
use crate::model::{Credentials, Session};

/// Default safety margin before token expiry.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Exchanges credentials for a token at the gateway.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn request_token(&self, credentials: &Credentials) -> Result<Session, PaymentError>;
}

/// Supplies credentials for silent renewal.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

/// Fixed credentials, used to remember the last successful login.
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

/// Owns the gateway token for one orchestrator instance.
///
/// Refreshes are single-flight: callers that find the session expired queue
/// on `refresh` and re-check once they hold it, so only the first one talks
/// to the token endpoint.
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn TimeProvider>,
    buffer: chrono::Duration,
    session: RwLock<Option<Session>>,
    renewal: RwLock<Option<Arc<dyn CredentialProvider>>>,
    refresh: Mutex<()>,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            authenticator,
            clock,
            buffer: chrono::Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS),
            session: RwLock::new(None),
            renewal: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn with_expiry_buffer(mut self, buffer: chrono::Duration) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_credential_provider(self, provider: Arc<dyn CredentialProvider>) -> Self {
        *self.renewal.write() = Some(provider);
        self
    }

    /// Requests a fresh token and remembers `credentials` for renewal.
    pub async fn authenticate(&self, credentials: Credentials) -> Result<Session, PaymentError> {
        let _guard = self.refresh.lock().await;
        self.authenticate_locked(credentials).await
    }

    async fn authenticate_locked(&self, credentials: Credentials) -> Result<Session, PaymentError> {
        let session = self.authenticator.request_token(&credentials).await?;
        info!(
            consumer_key = %credentials.consumer_key,
            expires_at = %session.expires_at,
            "Gateway session established"
        );
        *self.session.write() = Some(session.clone());
        *self.renewal.write() = Some(Arc::new(StaticCredentials::new(credentials)));
        Ok(session)
    }

    /// True when there is no session or `now >= expires_at - buffer`.
    pub fn is_expired(&self) -> bool {
        match self.session.read().as_ref() {
            Some(session) => !session.is_valid_at(self.clock.now(), self.buffer),
            None => true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.is_expired()
    }

    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.session.read().as_ref().map(|s| s.expires_at)
    }

    /// Renews an expired session with the known credentials.
    ///
    /// Never attempts anonymous renewal: with nothing to renew with it fails
    /// with [`PaymentError::NoCredentials`] before any network call.
    pub async fn ensure_valid(&self) -> Result<(), PaymentError> {
        if !self.is_expired() {
            return Ok(());
        }

        let _guard = self.refresh.lock().await;
        if !self.is_expired() {
            // Someone else refreshed while we waited.
            return Ok(());
        }

        let provider = self.renewal.read().clone();
        let credentials = match provider.and_then(|p| p.credentials()) {
            Some(c) => c,
            None => {
                warn!("Session expired with no credentials to renew");
                return Err(PaymentError::NoCredentials);
            }
        };

        info!(consumer_key = %credentials.consumer_key, "Renewing gateway session");
        self.authenticate_locked(credentials).await.map(|_| ())
    }

    /// Makes `credentials` the renewal source without a network call.
    /// A session minted for other credentials is discarded.
    pub fn adopt_credentials(&self, credentials: Credentials) {
        {
            let mut session = self.session.write();
            if session
                .as_ref()
                .is_some_and(|s| s.credentials != credentials)
            {
                info!("Credentials changed, dropping current session");
                *session = None;
            }
        }
        *self.renewal.write() = Some(Arc::new(StaticCredentials::new(credentials)));
    }

    /// Current token for a bearer header. Fails fast, never calls the network.
    pub fn bearer_token(&self) -> Result<String, PaymentError> {
        let session = self.session.read();
        let session = session.as_ref().ok_or_else(|| {
            PaymentError::SessionUnavailable(
                "No authentication token available. Call authenticate() first.".to_string(),
            )
        })?;
        if !session.is_valid_at(self.clock.now(), self.buffer) {
            return Err(PaymentError::SessionUnavailable(
                "Authentication token has expired. Please re-authenticate.".to_string(),
            ));
        }
        Ok(session.token.clone())
    }
}
