use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{PaymentError, Service};
use crate::http::JsonClient;
use crate::model::{LedgerAck, LedgerRecord, LedgerResponse};

pub const POST_ORDER_DETAILS: &str = "post_order_details.php";

#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Record an order in the ledger. `Ok` with `success == false` means the
    /// ledger answered but refused the record.
    async fn post_order(&self, record: &LedgerRecord) -> Result<LedgerAck, PaymentError>;
}

/// HTTP client for the internal ledger service. Unauthenticated.
#[derive(Clone)]
pub struct LedgerWriter {
    http: JsonClient,
}

impl LedgerWriter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PaymentError> {
        Ok(Self {
            http: JsonClient::new(Service::Ledger, base_url, timeout)?,
        })
    }
}

#[async_trait]
impl LedgerSink for LedgerWriter {
    async fn post_order(&self, record: &LedgerRecord) -> Result<LedgerAck, PaymentError> {
        let reply: LedgerResponse = self
            .http
            .send(Method::POST, POST_ORDER_DETAILS, &[], Some(record), None)
            .await?;

        let ack = LedgerAck::from(reply);
        if ack.success {
            info!(merchant_reference = %record.merchant_reference, "Ledger record stored");
        } else {
            warn!(
                merchant_reference = %record.merchant_reference,
                message = %ack.message,
                "Ledger refused record"
            );
        }
        Ok(ack)
    }
}
