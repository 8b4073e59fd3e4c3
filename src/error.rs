use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Remote collaborator a request was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Gateway,
    Ledger,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Gateway => "gateway",
            Service::Ledger => "ledger",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        status: Option<u16>,
        payload: Option<Value>,
    },

    #[error("Token expired and no stored credentials to re-authenticate")]
    NoCredentials,

    #[error("{0}")]
    SessionUnavailable(String),

    #[error("Request timeout ({service} {endpoint})")]
    Timeout { service: Service, endpoint: String },

    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        status: Option<u16>,
        payload: Option<Value>,
    },

    #[error("Ledger error: {message}")]
    Ledger {
        message: String,
        status: Option<u16>,
        payload: Option<Value>,
    },

    #[error("Invalid {service} response: {message}")]
    InvalidResponse {
        service: Service,
        message: String,
        payload: Option<Value>,
    },

    #[error("Order id {0} has already been submitted")]
    DuplicateOrderId(String),
}

impl PaymentError {
    /// Builds the service-specific error for a failed call.
    pub fn remote(
        service: Service,
        message: impl Into<String>,
        status: Option<u16>,
        payload: Option<Value>,
    ) -> Self {
        let message = message.into();
        match service {
            Service::Gateway => PaymentError::Gateway {
                message,
                status,
                payload,
            },
            Service::Ledger => PaymentError::Ledger {
                message,
                status,
                payload,
            },
        }
    }

    /// A timed-out call may still have been applied server-side.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PaymentError::Timeout { .. })
    }

    /// Upstream HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            PaymentError::Auth { status, .. }
            | PaymentError::Gateway { status, .. }
            | PaymentError::Ledger { status, .. } => *status,
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            PaymentError::Auth { payload, .. }
            | PaymentError::Gateway { payload, .. }
            | PaymentError::Ledger { payload, .. }
            | PaymentError::InvalidResponse { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    pub fn service(&self) -> Option<Service> {
        match self {
            PaymentError::Auth { .. }
            | PaymentError::NoCredentials
            | PaymentError::SessionUnavailable(_)
            | PaymentError::Gateway { .. }
            | PaymentError::DuplicateOrderId(_) => Some(Service::Gateway),
            PaymentError::Ledger { .. } => Some(Service::Ledger),
            PaymentError::Timeout { service, .. }
            | PaymentError::InvalidResponse { service, .. } => Some(*service),
            PaymentError::Configuration(_) => None,
        }
    }

    /// Status code the HTTP surface answers with for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::Auth { .. }
            | PaymentError::NoCredentials
            | PaymentError::SessionUnavailable(_) => 401,
            PaymentError::Timeout { .. } => 504,
            PaymentError::DuplicateOrderId(_) => 409,
            PaymentError::Gateway { .. }
            | PaymentError::Ledger { .. }
            | PaymentError::InvalidResponse { .. } => 502,
        }
    }
}
