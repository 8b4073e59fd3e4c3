use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{PaymentError, Service};
use crate::http::JsonClient;
use crate::metrics;
use crate::model::{AccessToken, Credentials, ErrorDetail, Session};
use crate::session::{Authenticator, SessionManager};

pub const REQUEST_TOKEN: &str = "api/Auth/RequestToken";

/// How an outbound gateway call is authorized.
#[derive(Clone, Copy)]
pub enum Authorization<'a> {
    Anonymous,
    /// Bearer token taken from the session; fails fast when none is valid.
    Session(&'a SessionManager),
}

/// Every call to the payment gateway goes through here.
#[derive(Clone)]
pub struct GatewayExecutor {
    http: JsonClient,
}

impl GatewayExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PaymentError> {
        Ok(Self {
            http: JsonClient::new(Service::Gateway, base_url, timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url().as_str()
    }

    pub async fn execute<B, T>(
        &self,
        endpoint: &str,
        method: Method,
        query: &[(&str, &str)],
        body: Option<&B>,
        auth: Authorization<'_>,
    ) -> Result<T, PaymentError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let token = match auth {
            Authorization::Anonymous => None,
            Authorization::Session(session) => Some(session.bearer_token()?),
        };
        self.http
            .send(method, endpoint, query, body, token.as_deref())
            .await
    }
}

/// Talks to the token endpoint on behalf of the [`SessionManager`].
pub struct GatewayAuthenticator {
    executor: GatewayExecutor,
}

impl GatewayAuthenticator {
    pub fn new(executor: GatewayExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Authenticator for GatewayAuthenticator {
    async fn request_token(&self, credentials: &Credentials) -> Result<Session, PaymentError> {
        metrics::inc_token_requests();

        let reply: AccessToken = self
            .executor
            .execute(
                REQUEST_TOKEN,
                Method::POST,
                &[],
                Some(credentials),
                Authorization::Anonymous,
            )
            .await
            .map_err(into_auth_error)?;

        let status = reply.status.as_deref().and_then(|s| s.parse::<u16>().ok());
        if let Some(message) = reply.error.as_ref().and_then(ErrorDetail::message) {
            return Err(PaymentError::Auth {
                message,
                status,
                payload: serde_json::to_value(&reply.error).ok(),
            });
        }

        match (reply.token, reply.expiry_date) {
            (Some(token), Some(expires_at)) if !token.is_empty() => Ok(Session {
                token,
                expires_at,
                credentials: credentials.clone(),
            }),
            _ => Err(PaymentError::Auth {
                message: reply
                    .message
                    .unwrap_or_else(|| "token response missing token or expiryDate".to_string()),
                status,
                payload: None,
            }),
        }
    }
}

/// Token endpoint failures surface as auth errors; timeouts stay distinguishable.
fn into_auth_error(err: PaymentError) -> PaymentError {
    match err {
        PaymentError::Gateway {
            message,
            status,
            payload,
        } => PaymentError::Auth {
            message,
            status,
            payload,
        },
        PaymentError::InvalidResponse {
            message, payload, ..
        } => PaymentError::Auth {
            message,
            status: None,
            payload,
        },
        other => other,
    }
}
