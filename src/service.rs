use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::context::RuntimeContext;
use crate::coordinator::{DualWriteCoordinator, PurchaseAttempt, PurchaseRequest};
use crate::error::PaymentError;
use crate::gateway::{GatewayAuthenticator, GatewayExecutor, OrderGateway, OrderOrchestrator};
use crate::ledger::{LedgerSink, LedgerWriter};
use crate::model::{
    Credentials, IpnRegistration, IpnRegistrationRequest, LedgerAck, LedgerRecord, OrderRequest,
    OrderResponse, OrderStatus, Session,
};
use crate::session::SessionManager;

/// Entry point for callers: one explicitly constructed instance per process
/// or tenant scope, owning its own session.
pub struct PaymentService {
    ctx: RuntimeContext,
    session: Arc<SessionManager>,
    orders: Arc<OrderOrchestrator>,
    ledger: Arc<LedgerWriter>,
    coordinator: DualWriteCoordinator,
    default_credentials: Option<Credentials>,
}

impl PaymentService {
    pub fn from_settings(settings: &Settings) -> Result<Self, PaymentError> {
        Self::with_context(settings, RuntimeContext::new_system())
    }

    pub fn with_context(settings: &Settings, ctx: RuntimeContext) -> Result<Self, PaymentError> {
        let gateway = &settings.gateway;
        let executor = GatewayExecutor::new(&gateway.base_url, gateway.timeout())?;

        let session = Arc::new(
            SessionManager::new(
                Arc::new(GatewayAuthenticator::new(executor.clone())),
                ctx.clock.clone(),
            )
            .with_expiry_buffer(gateway.expiry_buffer()),
        );

        let orders = Arc::new(
            OrderOrchestrator::new(executor, session.clone()).with_polling(
                settings.checkout.poll_interval(),
                settings.checkout.max_poll_attempts,
            ),
        );
        let ledger = Arc::new(LedgerWriter::new(
            &settings.ledger.base_url,
            settings.ledger.timeout(),
        )?);

        let coordinator = DualWriteCoordinator::new(
            orders.clone(),
            ledger.clone(),
            ctx.clone(),
            settings.checkout.dispatch,
        );

        // Missing credentials are reported when a call needs them, not here.
        let default_credentials = gateway.credentials().ok();
        if let Some(creds) = &default_credentials {
            session.adopt_credentials(creds.clone());
        }

        info!(
            gateway = %gateway.base_url,
            ledger = %settings.ledger.base_url,
            dispatch = ?settings.checkout.dispatch,
            "Payment service configured"
        );

        Ok(Self {
            ctx,
            session,
            orders,
            ledger,
            coordinator,
            default_credentials,
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn orders(&self) -> &Arc<OrderOrchestrator> {
        &self.orders
    }

    /// Credentials from configuration, or a configuration error.
    pub fn configured_credentials(&self) -> Result<Credentials, PaymentError> {
        self.default_credentials.clone().ok_or_else(|| {
            PaymentError::Configuration("gateway consumer key/secret are not configured".into())
        })
    }

    pub async fn authenticate(&self, credentials: Credentials) -> Result<Session, PaymentError> {
        self.session.authenticate(credentials).await
    }

    pub fn new_order_id(&self) -> String {
        self.ctx.order_ids.next_order_id()
    }

    pub async fn submit_order(
        &self,
        mut request: OrderRequest,
        credentials: Credentials,
    ) -> Result<OrderResponse, PaymentError> {
        self.session.adopt_credentials(credentials);
        if request.id.trim().is_empty() {
            request.id = self.new_order_id();
        }
        self.orders.submit_order(&request).await
    }

    pub async fn get_order_status(
        &self,
        tracking_id: &str,
        credentials: Credentials,
    ) -> Result<OrderStatus, PaymentError> {
        self.session.adopt_credentials(credentials);
        self.orders.get_order_status(tracking_id).await
    }

    pub async fn await_final_status(
        &self,
        tracking_id: &str,
        credentials: Credentials,
    ) -> Result<OrderStatus, PaymentError> {
        self.session.adopt_credentials(credentials);
        self.orders.await_final_status(tracking_id).await
    }

    pub async fn register_ipn(
        &self,
        spec: &IpnRegistrationRequest,
        credentials: Credentials,
    ) -> Result<IpnRegistration, PaymentError> {
        self.session.adopt_credentials(credentials);
        self.orders.register_ipn(spec).await
    }

    pub async fn post_ledger_order(&self, record: &LedgerRecord) -> Result<LedgerAck, PaymentError> {
        self.ledger.post_order(record).await
    }

    pub async fn purchase(
        &self,
        request: PurchaseRequest,
        credentials: Credentials,
    ) -> Result<PurchaseAttempt, PaymentError> {
        self.session.adopt_credentials(credentials);
        self.coordinator.purchase(request).await
    }
}
