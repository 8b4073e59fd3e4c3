use async_trait::async_trait;

use crate::error::PaymentError;
use crate::model::{OrderRequest, OrderResponse, OrderStatus};

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a new order; the session is renewed first if needed.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResponse, PaymentError>;

    /// Fetch the live status of a submitted order.
    async fn get_order_status(&self, tracking_id: &str) -> Result<OrderStatus, PaymentError>;

    /// True if `order_id` has already gone out through this gateway.
    fn was_submitted(&self, order_id: &str) -> bool;
}
