use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PaymentError;
use crate::gateway::adapter::OrderGateway;
use crate::gateway::executor::{Authorization, GatewayExecutor};
use crate::model::{
    IpnRegistration, IpnRegistrationRequest, OrderRequest, OrderResponse, OrderResponseBody,
    OrderStatus,
};
use crate::session::SessionManager;

pub const REGISTER_IPN: &str = "api/URLSetup/RegisterIPN";
pub const SUBMIT_ORDER: &str = "api/Transactions/SubmitOrderRequest";
pub const TRANSACTION_STATUS: &str = "api/Transactions/GetTransactionStatus";

/// Order operations against the gateway.
///
/// Each call ensures a valid session, then delegates to the executor. There is
/// no retry beyond the silent renewal inside [`SessionManager::ensure_valid`].
pub struct OrderOrchestrator {
    executor: GatewayExecutor,
    session: Arc<SessionManager>,
    /// Every id sent to the gateway. Held for the life of the process; a
    /// restart is what clears it.
    submitted: DashSet<String>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl OrderOrchestrator {
    pub fn new(executor: GatewayExecutor, session: Arc<SessionManager>) -> Self {
        Self {
            executor,
            session,
            submitted: DashSet::new(),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 24,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_poll_attempts = max_attempts.max(1);
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// One-time registration of the IPN callback URL.
    pub async fn register_ipn(
        &self,
        spec: &IpnRegistrationRequest,
    ) -> Result<IpnRegistration, PaymentError> {
        self.session.ensure_valid().await?;

        let reply: IpnRegistration = self
            .executor
            .execute(
                REGISTER_IPN,
                Method::POST,
                &[],
                Some(spec),
                Authorization::Session(&self.session),
            )
            .await?;

        if let Some(message) = reply.error.as_ref().and_then(|e| e.message()) {
            return Err(PaymentError::Gateway {
                message,
                status: reply.status.as_deref().and_then(|s| s.parse().ok()),
                payload: serde_json::to_value(&reply.error).ok(),
            });
        }

        info!(url = %spec.url, ipn_id = ?reply.ipn_id, "IPN registered");
        Ok(reply)
    }

    /// Polls until the transaction reaches a terminal status or the attempt
    /// budget is spent, returning the last snapshot either way.
    pub async fn await_final_status(&self, tracking_id: &str) -> Result<OrderStatus, PaymentError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let status = self.get_order_status(tracking_id).await?;
            if status.status_code.is_terminal() || attempt >= self.max_poll_attempts {
                return Ok(status);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl OrderGateway for OrderOrchestrator {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResponse, PaymentError> {
        if request.id.trim().is_empty() {
            return Err(PaymentError::Configuration(
                "order id must be set before submission".to_string(),
            ));
        }
        if self.was_submitted(&request.id) {
            return Err(PaymentError::DuplicateOrderId(request.id.clone()));
        }

        self.session.ensure_valid().await?;

        // Claimed only once a call is about to go out; the gateway may have seen
        // it even if the call fails, so it is never released.
        if !self.submitted.insert(request.id.clone()) {
            return Err(PaymentError::DuplicateOrderId(request.id.clone()));
        }

        let body: OrderResponseBody = self
            .executor
            .execute(
                SUBMIT_ORDER,
                Method::POST,
                &[],
                Some(request),
                Authorization::Session(&self.session),
            )
            .await?;

        match body.into_result() {
            Ok(resp) => {
                info!(
                    merchant_reference = %request.id,
                    order_tracking_id = %resp.order_tracking_id,
                    "Order accepted by gateway"
                );
                Ok(resp)
            }
            Err(e) => {
                warn!(merchant_reference = %request.id, error = %e, "Order rejected by gateway");
                Err(e)
            }
        }
    }

    async fn get_order_status(&self, tracking_id: &str) -> Result<OrderStatus, PaymentError> {
        self.session.ensure_valid().await?;

        let status: OrderStatus = self
            .executor
            .execute::<(), _>(
                TRANSACTION_STATUS,
                Method::GET,
                &[("orderTrackingId", tracking_id)],
                None,
                Authorization::Session(&self.session),
            )
            .await?;

        status.into_result()
    }

    fn was_submitted(&self, order_id: &str) -> bool {
        self.submitted.contains(order_id)
    }
}
