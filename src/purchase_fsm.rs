//! Purchase Attempt FSM
//!
//! One logical purchase (ledger write + gateway order) moves through:
//! ```text
//!   Init → InFlight → Succeeded
//!                   → LedgerFailed
//!                   → GatewayFailed
//!
//!   Terminal states: Succeeded, LedgerFailed, GatewayFailed
//! ```
//! No terminal state can be left; a retry is a new attempt with a new order id.
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseState {
    /// Request validated, nothing dispatched yet
    Init,
    /// Ledger write and/or gateway submission outstanding
    InFlight,
    /// Both sides accepted (terminal)
    Succeeded,
    /// Ledger write failed or was refused (terminal)
    LedgerFailed,
    /// Gateway submission failed after the ledger accepted (terminal)
    GatewayFailed,
}

impl PurchaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::LedgerFailed | Self::GatewayFailed
        )
    }

    pub fn valid_transitions(&self) -> &'static [PurchaseState] {
        use PurchaseState::*;
        match self {
            Init => &[InFlight],
            InFlight => &[Succeeded, LedgerFailed, GatewayFailed],
            Succeeded | LedgerFailed | GatewayFailed => &[],
        }
    }

    pub fn can_transition_to(&self, next: &PurchaseState) -> bool {
        self.valid_transitions().contains(next)
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::LedgerFailed => "ledger_failed",
            Self::GatewayFailed => "gateway_failed",
        }
    }
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseTransition {
    pub from: PurchaseState,
    pub to: PurchaseState,
    pub timestamp_ms: i64,
    pub reason: Option<String>,
}

/// Tracks one attempt with transition enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseFsm {
    pub attempt_id: String,
    pub merchant_reference: String,
    pub state: PurchaseState,
    pub transitions: Vec<PurchaseTransition>,
}

impl PurchaseFsm {
    pub fn new(attempt_id: String, merchant_reference: String) -> Self {
        Self {
            attempt_id,
            merchant_reference,
            state: PurchaseState::Init,
            transitions: Vec::new(),
        }
    }

    pub fn transition(
        &mut self,
        next: PurchaseState,
        timestamp_ms: i64,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.state.can_transition_to(&next) {
            let msg = format!(
                "Illegal purchase transition for {}: {} → {} (reason: {:?})",
                self.merchant_reference, self.state, next, reason
            );
            error!("{}", msg);
            return Err(msg);
        }

        info!(
            attempt_id = %self.attempt_id,
            merchant_reference = %self.merchant_reference,
            from = %self.state,
            to = %next,
            "Purchase transition"
        );

        self.transitions.push(PurchaseTransition {
            from: self.state,
            to: next,
            timestamp_ms,
            reason,
        });
        self.state = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn total_latency_ms(&self) -> Option<i64> {
        if self.transitions.len() < 2 {
            return None;
        }
        let first = self.transitions.first()?.timestamp_ms;
        let last = self.transitions.last()?.timestamp_ms;
        Some(last - first)
    }
}
