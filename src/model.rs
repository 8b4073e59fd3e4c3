use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{PaymentError, Service};

// --- Credentials & Session ---

/// Consumer key/secret pair issued by the gateway.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(alias = "consumerKey")]
    pub consumer_key: String,
    #[serde(alias = "consumerSecret")]
    pub consumer_secret: String,
}

impl Credentials {
    /// Validates that neither half is blank.
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let consumer_key = consumer_key.into();
        let consumer_secret = consumer_secret.into();
        if consumer_key.trim().is_empty() {
            return Err(PaymentError::Configuration(
                "consumer_key is not set".to_string(),
            ));
        }
        if consumer_secret.trim().is_empty() {
            return Err(PaymentError::Configuration(
                "consumer_secret is not set".to_string(),
            ));
        }
        Ok(Self {
            consumer_key,
            consumer_secret,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

/// Body of `api/Auth/RequestToken`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "expiryDate", alias = "expiry_date")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// An authenticated gateway session.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub credentials: Credentials,
}

impl Session {
    /// Usable iff `now < expires_at - buffer`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> bool {
        now < self.expires_at - buffer
    }
}

// --- Errors carried inside 2xx bodies ---

/// The gateway reports failures either as a bare string or as a structured object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    Structured {
        #[serde(default)]
        error_type: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl ErrorDetail {
    /// None when the object is present but carries nothing.
    pub fn message(&self) -> Option<String> {
        match self {
            ErrorDetail::Message(m) if !m.trim().is_empty() => Some(m.clone()),
            ErrorDetail::Message(_) => None,
            ErrorDetail::Structured {
                error_type,
                code,
                message,
            } => message
                .clone()
                .or_else(|| code.clone())
                .or_else(|| error_type.clone())
                .filter(|m| !m.trim().is_empty()),
        }
    }
}

// --- IPN ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum IpnNotificationType {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpnRegistrationRequest {
    pub url: String,
    #[serde(rename = "ipnNotificationType", alias = "ipn_notification_type")]
    pub ipn_notification_type: IpnNotificationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpnRegistration {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ipn_id: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing)]
    pub error: Option<ErrorDetail>,
}

// --- Orders ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingAddress {
    #[serde(default, alias = "emailAddress")]
    pub email_address: Option<String>,
    #[serde(default, alias = "phoneNumber")]
    pub phone_number: Option<String>,
    #[serde(default, alias = "countryCode")]
    pub country_code: Option<String>,
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "middleName", skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub line_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, alias = "postalCode", skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, alias = "zipCode", skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
}

/// Body of `api/Transactions/SubmitOrderRequest`. `id` becomes the merchant reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub id: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub description: String,
    #[serde(alias = "callbackUrl")]
    pub callback_url: String,
    #[serde(default, alias = "redirectMode", skip_serializing_if = "Option::is_none")]
    pub redirect_mode: Option<String>,
    #[serde(default, alias = "cancellationUrl", skip_serializing_if = "Option::is_none")]
    pub cancellation_url: Option<String>,
    #[serde(default, alias = "notificationId", skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, alias = "billingAddress")]
    pub billing_address: BillingAddress,
}

/// Raw `SubmitOrderRequest` response before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponseBody {
    #[serde(default, alias = "orderTrackingId")]
    pub order_tracking_id: Option<String>,
    #[serde(default, alias = "merchantReference")]
    pub merchant_reference: Option<String>,
    #[serde(default, alias = "redirectUrl")]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Accepted order: every field the caller relies on is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_tracking_id: String,
    pub merchant_reference: String,
    pub redirect_url: String,
    pub status: Option<String>,
}

impl OrderResponseBody {
    /// Tags the body as accepted or failed.
    pub fn into_result(self) -> Result<OrderResponse, PaymentError> {
        let status = self.status.as_deref().and_then(|s| s.parse::<u16>().ok());
        if let Some(message) = self.error.as_ref().and_then(ErrorDetail::message) {
            let payload = serde_json::to_value(&self.error).ok();
            return Err(PaymentError::Gateway {
                message,
                status,
                payload,
            });
        }

        let tracking_id = self.order_tracking_id.filter(|s| !s.is_empty());
        let redirect_url = self.redirect_url.filter(|s| !s.is_empty());
        match (tracking_id, redirect_url) {
            (Some(order_tracking_id), Some(redirect_url)) => Ok(OrderResponse {
                order_tracking_id,
                merchant_reference: self.merchant_reference.unwrap_or_default(),
                redirect_url,
                status: self.status,
            }),
            (None, _) => Err(PaymentError::InvalidResponse {
                service: Service::Gateway,
                message: "order response has no order_tracking_id".to_string(),
                payload: None,
            }),
            (Some(_), None) => Err(PaymentError::Gateway {
                message: "Gateway returned no redirect URL".to_string(),
                status,
                payload: None,
            }),
        }
    }
}

/// Gateway transaction status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "Option<i64>", into = "i64")]
pub enum PaymentStatusCode {
    #[default]
    Invalid,
    Completed,
    Failed,
    Reversed,
}

impl PaymentStatusCode {
    /// The gateway never moves a transaction out of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Reversed)
    }
}

impl TryFrom<Option<i64>> for PaymentStatusCode {
    type Error = String;

    fn try_from(value: Option<i64>) -> Result<Self, Self::Error> {
        match value {
            None | Some(0) => Ok(Self::Invalid),
            Some(1) => Ok(Self::Completed),
            Some(2) => Ok(Self::Failed),
            Some(3) => Ok(Self::Reversed),
            Some(other) => Err(format!("unknown status_code {}", other)),
        }
    }
}

impl From<PaymentStatusCode> for i64 {
    fn from(code: PaymentStatusCode) -> Self {
        match code {
            PaymentStatusCode::Invalid => 0,
            PaymentStatusCode::Completed => 1,
            PaymentStatusCode::Failed => 2,
            PaymentStatusCode::Reversed => 3,
        }
    }
}

impl fmt::Display for PaymentStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "INVALID",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Reversed => "REVERSED",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by `api/Transactions/GetTransactionStatus`. Never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    #[serde(default, alias = "orderTrackingId", deserialize_with = "null_as_default")]
    pub order_tracking_id: String,
    #[serde(default, alias = "statusCode")]
    pub status_code: PaymentStatusCode,
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(default, alias = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(default, alias = "paymentAccount")]
    pub payment_account: Option<String>,
    #[serde(default, alias = "confirmationCode")]
    pub confirmation_code: Option<String>,
    #[serde(default, alias = "createdDate")]
    pub created_date: Option<String>,
    #[serde(default, alias = "paymentStatusDescription")]
    pub payment_status_description: Option<String>,
    #[serde(default, alias = "paymentStatusCode")]
    pub payment_status_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "callBackUrl")]
    pub call_back_url: Option<String>,
    #[serde(default, alias = "merchantReference")]
    pub merchant_reference: Option<String>,
    #[serde(default, alias = "accountNumber")]
    pub account_number: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub status: Option<String>,
}

impl OrderStatus {
    /// A body with an error and no tracking id is a failed lookup, not a status.
    pub fn into_result(self) -> Result<OrderStatus, PaymentError> {
        if self.order_tracking_id.is_empty() {
            let message = self
                .error
                .as_ref()
                .and_then(ErrorDetail::message)
                .unwrap_or_else(|| "status response has no order_tracking_id".to_string());
            return Err(PaymentError::Gateway {
                message,
                status: self.status.as_deref().and_then(|s| s.parse().ok()),
                payload: serde_json::to_value(&self.error).ok(),
            });
        }
        Ok(self)
    }
}

/// Failed lookups come back with explicit nulls in place of missing fields.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// --- Ledger ---

/// Order record kept by the internal ledger, correlated to the gateway by `merchant_reference`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    /// The ledger names the order reference `orderTrackingId`.
    #[serde(rename = "orderTrackingId", alias = "merchantReference")]
    pub merchant_reference: String,
    pub user_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub subscription_type: String,
    pub subscription_type_id: String,
    #[serde(alias = "createdDate")]
    pub payment_created_date: String,
    #[serde(default)]
    pub plan_duration: u32,
    #[serde(default)]
    pub plan_description: String,
}

/// Raw `post_order_details.php` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerResponse {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAck {
    pub success: bool,
    pub message: String,
}

impl From<LedgerResponse> for LedgerAck {
    fn from(resp: LedgerResponse) -> Self {
        Self {
            success: !resp.error,
            message: resp.message,
        }
    }
}
