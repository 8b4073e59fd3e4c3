//! In-process stand-in for the payment gateway and the ledger service.
//!
//! Serves both under one actix-web listener on an ephemeral port:
//! `/v3/...` mimics the gateway, `/ledger/...` the ledger.

#![allow(dead_code)]

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use payment_orchestrator_rs::config::{CheckoutConfig, GatewayConfig, LedgerConfig, Settings};
use payment_orchestrator_rs::coordinator::DispatchPolicy;

pub const KEY: &str = "k";
pub const SECRET: &str = "s";

/// Behaviour switches, flipped by tests before driving the client.
#[derive(Debug, Clone, Default)]
pub struct Knobs {
    pub token_delay: Duration,
    pub submit_delay: Duration,
    pub ledger_delay: Duration,
    pub reject_orders: bool,
    pub omit_redirect: bool,
    pub ledger_refuses: bool,
    pub ledger_crashes: bool,
    /// Status polls answered with INVALID before COMPLETED.
    pub pending_polls: usize,
    pub token_lifetime_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub body: Value,
    pub polls: usize,
}

#[derive(Default)]
pub struct FakeState {
    pub knobs: Mutex<Knobs>,
    pub token_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub ledger_calls: AtomicUsize,
    pub issued_tokens: Mutex<HashSet<String>>,
    pub orders: Mutex<HashMap<String, StoredOrder>>,
    pub ledger_records: Mutex<Vec<Value>>,
    pub ipn_registrations: Mutex<Vec<Value>>,
}

impl FakeState {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn authorized(&self, req: &HttpRequest) -> bool {
        req.headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| self.issued_tokens.lock().contains(token))
    }
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({
        "error": {
            "error_type": "api_error",
            "code": "invalid_token",
            "message": "Invalid Access Token"
        }
    }))
}

#[derive(Deserialize)]
struct TokenBody {
    consumer_key: String,
    consumer_secret: String,
}

async fn request_token(state: web::Data<FakeState>, body: web::Json<TokenBody>) -> HttpResponse {
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let knobs = state.knobs.lock().clone();
    if !knobs.token_delay.is_zero() {
        tokio::time::sleep(knobs.token_delay).await;
    }

    if body.consumer_key != KEY || body.consumer_secret != SECRET {
        // The gateway answers bad credentials with a 200 and an error object.
        return HttpResponse::Ok().json(json!({
            "token": null,
            "expiryDate": null,
            "error": {
                "error_type": "api_error",
                "code": "invalid_consumer_key_or_secret_provided",
                "message": "Invalid consumer key or secret"
            },
            "status": "500",
            "message": null
        }));
    }

    let lifetime = if knobs.token_lifetime_minutes == 0 {
        60
    } else {
        knobs.token_lifetime_minutes
    };
    let token = format!("tok-{}", n);
    state.issued_tokens.lock().insert(token.clone());
    HttpResponse::Ok().json(json!({
        "token": token,
        "expiryDate": (Utc::now() + ChronoDuration::minutes(lifetime)).to_rfc3339(),
        "error": null,
        "status": "200",
        "message": "Request processed successfully"
    }))
}

async fn register_ipn(
    state: web::Data<FakeState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> HttpResponse {
    if !state.authorized(&req) {
        return unauthorized();
    }
    let body = body.into_inner();
    state.ipn_registrations.lock().push(body.clone());
    HttpResponse::Ok().json(json!({
        "url": body["url"],
        "created_date": "2024-06-01T10:00:00.000Z",
        "ipn_id": "ipn-1",
        "error": null,
        "status": "200"
    }))
}

async fn submit_order(
    state: web::Data<FakeState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> HttpResponse {
    let n = state.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !state.authorized(&req) {
        return unauthorized();
    }
    let knobs = state.knobs.lock().clone();
    if !knobs.submit_delay.is_zero() {
        tokio::time::sleep(knobs.submit_delay).await;
    }
    if knobs.reject_orders {
        return HttpResponse::BadRequest().json(json!({
            "error": {
                "error_type": "api_error",
                "code": "invalid_amount",
                "message": "Invalid amount"
            },
            "status": "400"
        }));
    }

    let body = body.into_inner();
    let tracking_id = format!("T{}", n);
    let merchant_reference = body["id"].as_str().unwrap_or_default().to_string();
    state.orders.lock().insert(
        tracking_id.clone(),
        StoredOrder {
            body,
            polls: 0,
        },
    );

    let redirect = if knobs.omit_redirect {
        Value::Null
    } else {
        json!(format!("https://pay.example/{}", tracking_id))
    };
    HttpResponse::Ok().json(json!({
        "order_tracking_id": tracking_id,
        "merchant_reference": merchant_reference,
        "redirect_url": redirect,
        "error": null,
        "status": "200"
    }))
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(rename = "orderTrackingId")]
    order_tracking_id: String,
}

async fn transaction_status(
    state: web::Data<FakeState>,
    req: HttpRequest,
    query: web::Query<StatusQuery>,
) -> HttpResponse {
    state.status_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&req) {
        return unauthorized();
    }
    let pending_polls = state.knobs.lock().pending_polls;

    let mut orders = state.orders.lock();
    let Some(order) = orders.get_mut(&query.order_tracking_id) else {
        return HttpResponse::Ok().json(json!({
            "order_tracking_id": null,
            "status_code": null,
            "error": {
                "error_type": "api_error",
                "code": "payment_details_not_found",
                "message": "Pesapal transaction not found"
            },
            "status": "500"
        }));
    };

    order.polls += 1;
    let status_code = if order.polls > pending_polls { 1 } else { 0 };
    HttpResponse::Ok().json(json!({
        "payment_method": "MpesaKE",
        "amount": order.body["amount"],
        "created_date": "2024-06-01T10:00:05.000",
        "confirmation_code": "QK12345",
        "order_tracking_id": query.order_tracking_id,
        "payment_status_description": if status_code == 1 { "Completed" } else { "INVALID" },
        "description": null,
        "message": "Request processed successfully",
        "payment_account": "2547xxx",
        "call_back_url": order.body["callback_url"],
        "status_code": status_code,
        "merchant_reference": order.body["id"],
        "account_number": null,
        "payment_status_code": "",
        "currency": order.body["currency"],
        "error": {"error_type": null, "code": null, "message": null},
        "status": "200"
    }))
}

async fn post_ledger(state: web::Data<FakeState>, body: web::Json<Value>) -> HttpResponse {
    state.ledger_calls.fetch_add(1, Ordering::SeqCst);
    let knobs = state.knobs.lock().clone();
    if !knobs.ledger_delay.is_zero() {
        tokio::time::sleep(knobs.ledger_delay).await;
    }
    if knobs.ledger_crashes {
        return HttpResponse::InternalServerError()
            .content_type("text/html")
            .body("<html><body>Fatal error</body></html>");
    }
    if knobs.ledger_refuses {
        return HttpResponse::Ok().json(json!({"error": true, "message": "Duplicate entry"}));
    }
    state.ledger_records.lock().push(body.into_inner());
    HttpResponse::Ok().json(json!({"error": false, "message": "Order details saved"}))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v3/api")
            .route("/Auth/RequestToken", web::post().to(request_token))
            .route("/URLSetup/RegisterIPN", web::post().to(register_ipn))
            .route(
                "/Transactions/SubmitOrderRequest",
                web::post().to(submit_order),
            )
            .route(
                "/Transactions/GetTransactionStatus",
                web::get().to(transaction_status),
            ),
    )
    .route("/ledger/post_order_details.php", web::post().to(post_ledger));
}

pub struct FakeBackend {
    pub state: Arc<FakeState>,
    pub base: String,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let data = web::Data::from(state.clone());

        let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
            .workers(1)
            .bind(("127.0.0.1", 0))
            .expect("bind fake backend");
        let port = server.addrs()[0].port();
        tokio::spawn(server.run());

        Self {
            state,
            base: format!("http://127.0.0.1:{}", port),
        }
    }

    pub fn set(&self, f: impl FnOnce(&mut Knobs)) {
        f(&mut self.state.knobs.lock());
    }

    pub fn gateway_url(&self) -> String {
        format!("{}/v3/", self.base)
    }

    pub fn ledger_url(&self) -> String {
        format!("{}/ledger/", self.base)
    }

    pub fn settings(&self, dispatch: DispatchPolicy) -> Settings {
        Settings {
            gateway: GatewayConfig {
                base_url: self.gateway_url(),
                consumer_key: Some(KEY.into()),
                consumer_secret: Some(SECRET.into()),
                timeout_ms: 2_000,
                ..GatewayConfig::default()
            },
            ledger: LedgerConfig {
                base_url: self.ledger_url(),
                timeout_ms: 2_000,
            },
            checkout: CheckoutConfig {
                dispatch,
                poll_interval_ms: 20,
                max_poll_attempts: 10,
            },
            ..Settings::default()
        }
    }
}
