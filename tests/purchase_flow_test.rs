mod common;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use common::{FakeBackend, FakeState, KEY, SECRET};
use payment_orchestrator_rs::api;
use payment_orchestrator_rs::coordinator::{
    DispatchPolicy, PurchaseOutcome, PurchaseRequest, Subscription,
};
use payment_orchestrator_rs::model::{Credentials, OrderRequest};
use payment_orchestrator_rs::purchase_fsm::PurchaseState;
use payment_orchestrator_rs::service::PaymentService;
use payment_orchestrator_rs::{PaymentError, Service};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_test::assert_ok;

fn creds() -> Credentials {
    Credentials::new(KEY, SECRET).unwrap()
}

fn purchase_request(id: &str) -> PurchaseRequest {
    PurchaseRequest {
        order: OrderRequest {
            id: id.into(),
            currency: "UGX".into(),
            amount: dec!(500),
            description: "Artist circle monthly".into(),
            callback_url: "https://app.example/callback".into(),
            ..OrderRequest::default()
        },
        user_id: "user-42".into(),
        subscription: Subscription {
            subscription_type: "artist_circle".into(),
            subscription_type_id: "7".into(),
            plan_duration: 30,
            plan_description: "Monthly".into(),
        },
    }
}

fn service(backend: &FakeBackend, policy: DispatchPolicy) -> PaymentService {
    PaymentService::from_settings(&backend.settings(policy)).unwrap()
}

#[tokio::test]
async fn test_purchase_writes_ledger_then_gateway() {
    let backend = FakeBackend::start().await;
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    let outcome = assert_ok!(service.purchase(purchase_request("ORD-P1"), creds()).await);

    assert_eq!(outcome.state(), PurchaseState::Succeeded);
    assert_eq!(outcome.redirect_url(), Some("https://pay.example/T1"));

    let records = backend.state.ledger_records.lock().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["orderTrackingId"], "ORD-P1");
    assert_eq!(records[0]["userId"], "user-42");
    assert_eq!(records[0]["amount"], 500.0);
    assert_eq!(records[0]["currency"], "UGX");
    assert_eq!(records[0]["planDuration"], 30);

    let orders = backend.state.orders.lock();
    assert_eq!(orders["T1"].body["id"], "ORD-P1");
}

#[tokio::test]
async fn test_purchase_generates_merchant_reference() {
    let backend = FakeBackend::start().await;
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    let outcome = service
        .purchase(purchase_request(""), creds())
        .await
        .unwrap();

    let reference = outcome.merchant_reference().to_string();
    assert!(reference.starts_with("ORD"));
    let records = backend.state.ledger_records.lock().clone();
    assert_eq!(records[0]["orderTrackingId"], Value::from(reference.clone()));
    assert_eq!(backend.state.orders.lock()["T1"].body["id"], Value::from(reference));
}

#[tokio::test]
async fn test_gateway_failure_keeps_ledger_record() {
    let backend = FakeBackend::start().await;
    backend.set(|k| k.reject_orders = true);
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    let attempt = service
        .purchase(purchase_request("ORD-P2"), creds())
        .await
        .unwrap();

    match &attempt.outcome {
        PurchaseOutcome::GatewayFailed { error, ledger, .. } => {
            assert!(ledger.success);
            assert!(matches!(error, PaymentError::Gateway { status: Some(400), .. }));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(backend.state.ledger_records.lock().len(), 1);
    assert_eq!(attempt.report().failed_at, Some("gateway"));
}

#[tokio::test]
async fn test_ledger_refusal_skips_gateway() {
    let backend = FakeBackend::start().await;
    backend.set(|k| k.ledger_refuses = true);
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    let attempt = service
        .purchase(purchase_request("ORD-P3"), creds())
        .await
        .unwrap();

    match &attempt.outcome {
        PurchaseOutcome::LedgerFailed { error, gateway, .. } => {
            assert_eq!(error.to_string(), "Ledger error: Duplicate entry");
            assert!(gateway.is_none());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(FakeState::count(&backend.state.submit_calls), 0);
    assert_eq!(FakeState::count(&backend.state.token_calls), 0);
}

#[tokio::test]
async fn test_ledger_server_error_is_normalized() {
    let backend = FakeBackend::start().await;
    backend.set(|k| k.ledger_crashes = true);
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    let outcome = service
        .purchase(purchase_request("ORD-P4"), creds())
        .await
        .unwrap();

    let error = outcome.error().expect("ledger failure");
    assert_eq!(error.service(), Some(Service::Ledger));
    assert_eq!(error.status(), Some(500));
    assert_eq!(error.to_string(), "Ledger error: Failed to parse error response");
    assert_eq!(
        error.payload(),
        Some(&Value::from("<html><body>Fatal error</body></html>"))
    );
}

#[tokio::test]
async fn test_concurrent_dispatch_surfaces_orphaned_gateway_order() {
    let backend = FakeBackend::start().await;
    backend.set(|k| k.ledger_refuses = true);
    let service = service(&backend, DispatchPolicy::Concurrent);

    let attempt = service
        .purchase(purchase_request("ORD-P5"), creds())
        .await
        .unwrap();

    match &attempt.outcome {
        PurchaseOutcome::LedgerFailed { gateway, .. } => {
            let orphan = gateway.as_ref().expect("gateway order created");
            assert_eq!(orphan.order_tracking_id, "T1");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!attempt.is_success());
    assert_eq!(FakeState::count(&backend.state.submit_calls), 1);
}

#[tokio::test]
async fn test_concurrent_dispatch_success() {
    let backend = FakeBackend::start().await;
    let service = service(&backend, DispatchPolicy::Concurrent);

    let outcome = service
        .purchase(purchase_request("ORD-P6"), creds())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(backend.state.ledger_records.lock().len(), 1);
    assert_eq!(FakeState::count(&backend.state.submit_calls), 1);
}

#[tokio::test]
async fn test_purchase_reference_is_single_use() {
    let backend = FakeBackend::start().await;
    backend.set(|k| k.ledger_refuses = true);
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    let first = service
        .purchase(purchase_request("ORD-P7"), creds())
        .await
        .unwrap();
    assert!(!first.is_success());

    let err = service
        .purchase(purchase_request("ORD-P7"), creds())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::DuplicateOrderId(_)));
    assert_eq!(FakeState::count(&backend.state.ledger_calls), 1);
}

#[tokio::test]
async fn test_purchase_refuses_id_already_sent_to_gateway() {
    let backend = FakeBackend::start().await;
    let service = service(&backend, DispatchPolicy::LedgerFirst);

    service
        .submit_order(purchase_request("ORD-PX").order, creds())
        .await
        .unwrap();

    let err = service
        .purchase(purchase_request("ORD-PX"), creds())
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::DuplicateOrderId(ref id) if id == "ORD-PX"));
    assert_eq!(FakeState::count(&backend.state.ledger_calls), 0);
    assert!(backend.state.ledger_records.lock().is_empty());
    assert_eq!(FakeState::count(&backend.state.submit_calls), 1);
}

#[actix_web::test]
async fn test_purchase_route_reports_outcome() {
    let backend = FakeBackend::start().await;
    backend.set(|k| k.reject_orders = true);
    let service = Arc::new(service(&backend, DispatchPolicy::LedgerFirst));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(service))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/purchase")
        .set_json(json!({
            "order": {
                "id": "ORD-P8",
                "currency": "UGX",
                "amount": 500,
                "description": "Monthly",
                "callback_url": "https://app.example/callback"
            },
            "userId": "user-42",
            "subscription": {
                "subscriptionType": "artist_circle",
                "subscriptionTypeId": "7"
            }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["merchant_reference"], "ORD-P8");
    assert_eq!(body["failed_at"], "gateway");
    assert_eq!(body["error"], "Gateway error: Invalid amount");
    assert!(body["attempt_id"].is_string());
    assert_eq!(body["transitions"][0]["to"], "IN_FLIGHT");
    assert_eq!(body["transitions"][1]["to"], "GATEWAY_FAILED");
}

#[actix_web::test]
async fn test_payments_route_returns_redirect() {
    let backend = FakeBackend::start().await;
    let service = Arc::new(service(&backend, DispatchPolicy::LedgerFirst));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(service))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/payments")
        .set_json(json!({
            "orderDetails": {
                "id": "ORD-P9",
                "currency": "UGX",
                "amount": 500,
                "description": "Monthly",
                "callbackUrl": "https://app.example/callback"
            }
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["order_tracking_id"], "T1");
    assert_eq!(body["redirect_url"], "https://pay.example/T1");
}
