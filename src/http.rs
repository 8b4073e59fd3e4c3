use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::error::{PaymentError, Service};
use crate::metrics;

const PARSE_FAILURE_MESSAGE: &str = "Failed to parse error response";

/// JSON-over-HTTP client bound to one remote service.
///
/// Every call carries `Content-Type: application/json` and
/// `Cache-Control: no-cache`, is bounded by a fixed deadline, and fails with a
/// normalized [`PaymentError`] for the owning [`Service`].
#[derive(Clone)]
pub struct JsonClient {
    service: Service,
    base_url: Url,
    timeout: Duration,
    client: Client,
}

impl JsonClient {
    pub fn new(service: Service, base_url: &str, timeout: Duration) -> Result<Self, PaymentError> {
        let base_url = parse_base_url(base_url)?;
        let client = Client::builder()
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            service,
            base_url,
            timeout,
            client,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn headers(&self, bearer: Option<&str>) -> Result<HeaderMap, PaymentError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| PaymentError::SessionUnavailable("Malformed bearer token".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Sends one request and decodes the 2xx body as `T`.
    ///
    /// Expiry of the deadline drops the in-flight request and yields
    /// [`PaymentError::Timeout`].
    pub async fn send<B, T>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<T, PaymentError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|e| PaymentError::Configuration(format!("bad endpoint {}: {}", endpoint, e)))?;
        if !query.is_empty() {
            let encoded = serde_urlencoded::to_string(query)
                .map_err(|e| PaymentError::Configuration(format!("bad query: {}", e)))?;
            url.set_query(Some(&encoded));
        }

        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(self.headers(bearer)?);
        if let Some(b) = body {
            request = request.json(b);
        }

        debug!(service = %self.service, %method, endpoint, "Outbound request");
        let started = Instant::now();

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let result = tokio::time::timeout(self.timeout, exchange).await;
        metrics::observe_request_latency(self.service, started.elapsed().as_secs_f64());

        let (status, text) = match result {
            Err(_elapsed) => return Err(self.timed_out(endpoint)),
            Ok(Err(e)) if e.is_timeout() => return Err(self.timed_out(endpoint)),
            Ok(Err(e)) => {
                metrics::inc_request(self.service, "network_error");
                warn!(service = %self.service, endpoint, error = %e, "Request failed");
                return Err(PaymentError::remote(self.service, e.to_string(), None, None));
            }
            Ok(Ok(pair)) => pair,
        };

        if !status.is_success() {
            metrics::inc_request(self.service, "http_error");
            let err = normalize_error(self.service, status, &text);
            warn!(
                service = %self.service,
                endpoint,
                status = status.as_u16(),
                error = %err,
                "Request rejected"
            );
            return Err(err);
        }

        metrics::inc_request(self.service, "ok");
        serde_json::from_str::<T>(&text).map_err(|e| PaymentError::InvalidResponse {
            service: self.service,
            message: e.to_string(),
            payload: serde_json::from_str::<Value>(&text).ok(),
        })
    }

    fn timed_out(&self, endpoint: &str) -> PaymentError {
        metrics::inc_timeout(self.service);
        warn!(
            service = %self.service,
            endpoint,
            timeout_ms = self.timeout.as_millis() as u64,
            "Request timeout"
        );
        PaymentError::Timeout {
            service: self.service,
            endpoint: endpoint.to_string(),
        }
    }
}

/// Base URLs are joined with relative endpoints, so they must end in `/`.
fn parse_base_url(raw: &str) -> Result<Url, PaymentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::Configuration("base URL is empty".to_string()));
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash)
        .map_err(|e| PaymentError::Configuration(format!("invalid base URL {}: {}", raw, e)))
}

/// Builds the service error for a non-2xx response.
///
/// The message is taken from the JSON body when it has one, else the status
/// reason; an unparseable body is kept as a raw string payload.
pub fn normalize_error(service: Service, status: StatusCode, body: &str) -> PaymentError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = match parsed.as_ref() {
        Some(value) => extract_message(value)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        None => PARSE_FAILURE_MESSAGE.to_string(),
    };
    let payload = parsed.or_else(|| {
        if body.is_empty() {
            None
        } else {
            Some(Value::String(body.to_string()))
        }
    });
    PaymentError::remote(service, message, Some(status.as_u16()), payload)
}

fn extract_message(value: &Value) -> Option<String> {
    let candidates = [
        value.get("message"),
        value.get("error").and_then(|e| e.get("message")),
        value.get("error").filter(|e| e.is_string()),
        value.get("title"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
