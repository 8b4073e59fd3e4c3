use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::coordinator::PurchaseRequest;
use crate::error::PaymentError;
use crate::metrics;
use crate::model::{IpnRegistrationRequest, OrderRequest, OrderStatus};
use crate::service::PaymentService;

pub type AppState = web::Data<Arc<PaymentService>>;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    authenticated: bool,
}

/// Uniform failure body: `{success: false, error}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderBody {
    #[serde(alias = "order_details")]
    pub order_details: OrderRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitOrderReply {
    pub success: bool,
    pub order_tracking_id: String,
    pub merchant_reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    #[serde(alias = "tracking_id", alias = "orderTrackingId")]
    pub tracking_id: String,
    #[serde(default, alias = "merchant_reference")]
    pub merchant_reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub success: bool,
    pub order_status_response: OrderStatus,
}

fn failure(err: &PaymentError) -> HttpResponse {
    error!(error = %err, status = ?err.status(), "Payment API error");
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(FailureResponse {
        success: false,
        error: err.to_string(),
    })
}

pub async fn health_check(data: AppState) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        authenticated: data.session().is_authenticated(),
    })
}

pub async fn metrics_text() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

pub async fn submit_payment(data: AppState, body: web::Json<SubmitOrderBody>) -> HttpResponse {
    let credentials = match data.configured_credentials() {
        Ok(c) => c,
        Err(e) => return failure(&e),
    };

    match data
        .submit_order(body.into_inner().order_details, credentials)
        .await
    {
        Ok(resp) => HttpResponse::Ok().json(SubmitOrderReply {
            success: true,
            order_tracking_id: resp.order_tracking_id,
            merchant_reference: resp.merchant_reference,
            redirect_url: resp.redirect_url,
        }),
        Err(e) => failure(&e),
    }
}

pub async fn payment_status(data: AppState, body: web::Json<StatusBody>) -> HttpResponse {
    let credentials = match data.configured_credentials() {
        Ok(c) => c,
        Err(e) => return failure(&e),
    };
    let body = body.into_inner();

    match data.get_order_status(&body.tracking_id, credentials).await {
        Ok(status) => {
            if let (Some(expected), Some(actual)) =
                (&body.merchant_reference, &status.merchant_reference)
            {
                if expected != actual {
                    warn!(
                        tracking_id = %body.tracking_id,
                        expected = %expected,
                        actual = %actual,
                        "Merchant reference mismatch on status lookup"
                    );
                }
            }
            HttpResponse::Ok().json(StatusReply {
                success: true,
                order_status_response: status,
            })
        }
        Err(e) => failure(&e),
    }
}

pub async fn purchase(data: AppState, body: web::Json<PurchaseRequest>) -> HttpResponse {
    let credentials = match data.configured_credentials() {
        Ok(c) => c,
        Err(e) => return failure(&e),
    };

    match data.purchase(body.into_inner(), credentials).await {
        Ok(outcome) => {
            let status = match outcome.error() {
                None => StatusCode::OK,
                Some(e) => StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            };
            HttpResponse::build(status).json(outcome.report())
        }
        Err(e) => failure(&e),
    }
}

pub async fn register_ipn(
    data: AppState,
    body: web::Json<IpnRegistrationRequest>,
) -> HttpResponse {
    let credentials = match data.configured_credentials() {
        Ok(c) => c,
        Err(e) => return failure(&e),
    };

    match data.register_ipn(&body, credentials).await {
        Ok(reg) => HttpResponse::Ok().json(reg),
        Err(e) => failure(&e),
    }
}

/// Unreadable request bodies get the same failure shape as everything else.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    warn!(error = %err, "Rejected request body");
    let resp = HttpResponse::BadRequest().json(FailureResponse {
        success: false,
        error: err.to_string(),
    });
    InternalError::from_response(err, resp).into()
}

// Define scope configuration
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error));
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/metrics").route(web::get().to(metrics_text)))
        .service(
            web::scope("/api")
                .service(web::resource("/payments").route(web::post().to(submit_payment)))
                .service(web::resource("/payment_status").route(web::post().to(payment_status)))
                .service(web::resource("/purchase").route(web::post().to(purchase)))
                .service(web::resource("/ipn").route(web::post().to(register_ipn))),
        );
}
