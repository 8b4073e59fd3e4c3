//! Dual-write coordination of one purchase across the ledger and the gateway.
//!
//! Overall success requires both writes. A gateway failure after a
//! successful ledger write leaves the ledger record in place; no compensating
//! action is taken.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::RuntimeContext;
use crate::error::{PaymentError, Service};
use crate::gateway::adapter::OrderGateway;
use crate::ledger::LedgerSink;
use crate::metrics;
use crate::model::{LedgerAck, LedgerRecord, OrderRequest, OrderResponse};
use crate::purchase_fsm::{PurchaseFsm, PurchaseState, PurchaseTransition};

/// Order in which the two writes are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Ledger write first; the gateway is only called once the ledger accepted.
    #[default]
    LedgerFirst,
    /// Both calls at once; the outcome waits for both.
    Concurrent,
}

/// Plan metadata stored alongside the ledger record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_type: String,
    pub subscription_type_id: String,
    #[serde(default)]
    pub plan_duration: u32,
    #[serde(default)]
    pub plan_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub order: OrderRequest,
    pub user_id: String,
    pub subscription: Subscription,
}

impl PurchaseRequest {
    /// The ledger record always shares the order's id, amount and currency.
    pub fn ledger_record(&self, created: DateTime<Utc>) -> LedgerRecord {
        LedgerRecord {
            merchant_reference: self.order.id.clone(),
            user_id: self.user_id.clone(),
            amount: self.order.amount,
            currency: self.order.currency.clone(),
            subscription_type: self.subscription.subscription_type.clone(),
            subscription_type_id: self.subscription.subscription_type_id.clone(),
            payment_created_date: created.to_rfc3339(),
            plan_duration: self.subscription.plan_duration,
            plan_description: self.subscription.plan_description.clone(),
        }
    }
}

#[derive(Debug)]
pub enum PurchaseOutcome {
    Succeeded {
        merchant_reference: String,
        order: OrderResponse,
        ledger: LedgerAck,
    },
    LedgerFailed {
        merchant_reference: String,
        error: PaymentError,
        /// Set when a concurrent gateway submission went through anyway.
        gateway: Option<OrderResponse>,
    },
    GatewayFailed {
        merchant_reference: String,
        error: PaymentError,
        ledger: LedgerAck,
    },
}

impl PurchaseOutcome {
    pub fn state(&self) -> PurchaseState {
        match self {
            Self::Succeeded { .. } => PurchaseState::Succeeded,
            Self::LedgerFailed { .. } => PurchaseState::LedgerFailed,
            Self::GatewayFailed { .. } => PurchaseState::GatewayFailed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn merchant_reference(&self) -> &str {
        match self {
            Self::Succeeded {
                merchant_reference, ..
            }
            | Self::LedgerFailed {
                merchant_reference, ..
            }
            | Self::GatewayFailed {
                merchant_reference, ..
            } => merchant_reference,
        }
    }

    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            Self::Succeeded { order, .. } => Some(&order.redirect_url),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PaymentError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::LedgerFailed { error, .. } | Self::GatewayFailed { error, .. } => Some(error),
        }
    }

    pub fn report(&self) -> PurchaseReport {
        let (order_tracking_id, redirect_url) = match self {
            Self::Succeeded { order, .. } => (
                Some(order.order_tracking_id.clone()),
                Some(order.redirect_url.clone()),
            ),
            _ => (None, None),
        };
        let failed_at = match self {
            Self::Succeeded { .. } => None,
            Self::LedgerFailed { .. } => Some(Service::Ledger.as_str()),
            Self::GatewayFailed { .. } => Some(Service::Gateway.as_str()),
        };
        PurchaseReport {
            success: self.is_success(),
            merchant_reference: self.merchant_reference().to_string(),
            order_tracking_id,
            redirect_url,
            error: self.error().map(|e| e.to_string()),
            failed_at,
            timed_out: self.error().is_some_and(PaymentError::is_timeout),
            attempt_id: None,
            transitions: Vec::new(),
            total_latency_ms: None,
        }
    }
}

/// A finished purchase attempt: the outcome plus the state machine that
/// tracked it.
#[derive(Debug)]
pub struct PurchaseAttempt {
    pub outcome: PurchaseOutcome,
    pub fsm: PurchaseFsm,
}

impl PurchaseAttempt {
    pub fn attempt_id(&self) -> &str {
        &self.fsm.attempt_id
    }

    /// State recorded by the state machine.
    pub fn state(&self) -> PurchaseState {
        self.fsm.state
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn merchant_reference(&self) -> &str {
        self.outcome.merchant_reference()
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.outcome.redirect_url()
    }

    pub fn error(&self) -> Option<&PaymentError> {
        self.outcome.error()
    }

    /// Outcome report with the attempt's transition history.
    pub fn report(&self) -> PurchaseReport {
        PurchaseReport {
            attempt_id: Some(self.fsm.attempt_id.clone()),
            transitions: self.fsm.transitions.clone(),
            total_latency_ms: self.fsm.total_latency_ms(),
            ..self.outcome.report()
        }
    }
}

/// Caller-facing summary of a purchase attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReport {
    pub success: bool,
    pub merchant_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_tracking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<&'static str>,
    /// The failing call timed out; it may still have been applied remotely.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<PurchaseTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<i64>,
}

pub struct DualWriteCoordinator {
    gateway: Arc<dyn OrderGateway>,
    ledger: Arc<dyn LedgerSink>,
    ctx: RuntimeContext,
    policy: DispatchPolicy,
    /// Merchant references seen by `purchase`. Held for the life of the
    /// process, like the gateway's own submitted set.
    attempted: DashSet<String>,
}

impl DualWriteCoordinator {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        ledger: Arc<dyn LedgerSink>,
        ctx: RuntimeContext,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            gateway,
            ledger,
            ctx,
            policy,
            attempted: DashSet::new(),
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Runs one purchase attempt to a terminal state.
    ///
    /// An empty `order.id` is filled from the id generator. `Err` is returned
    /// only when the attempt is refused before anything is dispatched, which
    /// includes an id the gateway has already been sent.
    pub async fn purchase(
        &self,
        mut request: PurchaseRequest,
    ) -> Result<PurchaseAttempt, PaymentError> {
        if request.order.id.trim().is_empty() {
            request.order.id = self.ctx.order_ids.next_order_id();
        }
        let merchant_reference = request.order.id.clone();
        if self.gateway.was_submitted(&merchant_reference)
            || !self.attempted.insert(merchant_reference.clone())
        {
            warn!(
                merchant_reference = %merchant_reference,
                "Purchase refused: order id already used"
            );
            return Err(PaymentError::DuplicateOrderId(merchant_reference));
        }

        let record = request.ledger_record(self.ctx.clock.now());
        let mut fsm = PurchaseFsm::new(Uuid::new_v4().to_string(), merchant_reference.clone());
        self.advance(&mut fsm, PurchaseState::InFlight, Some(format!("{:?}", self.policy)));

        let outcome = match self.policy {
            DispatchPolicy::LedgerFirst => {
                self.ledger_first(&request.order, &record, merchant_reference)
                    .await
            }
            DispatchPolicy::Concurrent => {
                self.concurrent(&request.order, &record, merchant_reference)
                    .await
            }
        };

        self.advance(&mut fsm, outcome.state(), outcome.error().map(|e| e.to_string()));
        metrics::inc_purchase_outcome(outcome.state().as_label());

        match &outcome {
            PurchaseOutcome::Succeeded { order, .. } => info!(
                attempt_id = %fsm.attempt_id,
                merchant_reference = %outcome.merchant_reference(),
                order_tracking_id = %order.order_tracking_id,
                latency_ms = ?fsm.total_latency_ms(),
                "Purchase succeeded"
            ),
            PurchaseOutcome::LedgerFailed { gateway, error, .. } => warn!(
                attempt_id = %fsm.attempt_id,
                merchant_reference = %outcome.merchant_reference(),
                error = %error,
                orphaned_gateway_order = ?gateway.as_ref().map(|g| &g.order_tracking_id),
                "Purchase failed at ledger"
            ),
            PurchaseOutcome::GatewayFailed { error, .. } => warn!(
                attempt_id = %fsm.attempt_id,
                merchant_reference = %outcome.merchant_reference(),
                error = %error,
                "Purchase failed at gateway; ledger record left in place"
            ),
        }

        Ok(PurchaseAttempt { outcome, fsm })
    }

    /// Records a transition stamped with the context clock.
    fn advance(&self, fsm: &mut PurchaseFsm, next: PurchaseState, reason: Option<String>) {
        let now = self.ctx.clock.now().timestamp_millis();
        if let Err(refused) = fsm.transition(next, now, reason) {
            warn!(
                attempt_id = %fsm.attempt_id,
                state = %fsm.state,
                refused = %refused,
                "Purchase history left incomplete"
            );
        }
    }

    async fn ledger_first(
        &self,
        order: &OrderRequest,
        record: &LedgerRecord,
        merchant_reference: String,
    ) -> PurchaseOutcome {
        let ledger = match accepted(self.ledger.post_order(record).await) {
            Ok(ack) => ack,
            Err(error) => {
                return PurchaseOutcome::LedgerFailed {
                    merchant_reference,
                    error,
                    gateway: None,
                };
            }
        };

        match self.gateway.submit_order(order).await {
            Ok(order) => PurchaseOutcome::Succeeded {
                merchant_reference,
                order,
                ledger,
            },
            Err(error) => PurchaseOutcome::GatewayFailed {
                merchant_reference,
                error,
                ledger,
            },
        }
    }

    async fn concurrent(
        &self,
        order: &OrderRequest,
        record: &LedgerRecord,
        merchant_reference: String,
    ) -> PurchaseOutcome {
        let (ledger, gateway) = futures::future::join(
            self.ledger.post_order(record),
            self.gateway.submit_order(order),
        )
        .await;

        match (accepted(ledger), gateway) {
            (Err(error), gateway) => PurchaseOutcome::LedgerFailed {
                merchant_reference,
                error,
                gateway: gateway.ok(),
            },
            (Ok(ledger), Ok(order)) => PurchaseOutcome::Succeeded {
                merchant_reference,
                order,
                ledger,
            },
            (Ok(ledger), Err(error)) => PurchaseOutcome::GatewayFailed {
                merchant_reference,
                error,
                ledger,
            },
        }
    }
}

/// A refused ledger write counts as a ledger failure.
fn accepted(result: Result<LedgerAck, PaymentError>) -> Result<LedgerAck, PaymentError> {
    let ack = result?;
    if ack.success {
        Ok(ack)
    } else {
        Err(PaymentError::Ledger {
            message: ack.message,
            status: None,
            payload: None,
        })
    }
}
