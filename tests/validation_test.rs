// End-to-end validation behavior: every request below must be rejected (or
// answered) before the service touches the vendor API or the database, so
// these tests run against a router wired to a lazily-connecting client.
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use mpesa_payment_api::app;
use mpesa_payment_api::config::AppConfig;
use mpesa_payment_api::services::mpesa_service::MpesaService;
use mpesa_payment_api::state::AppState;
use mpesa_payment_api::store::TransactionStore;

fn test_config() -> AppConfig {
    AppConfig {
        mpesa_consumer_key: "key".into(),
        mpesa_consumer_secret: "secret".into(),
        mpesa_short_code: "174379".into(),
        mpesa_passkey: "passkey".into(),
        mpesa_callback_url: "https://example.com/api/payments/callback".into(),
        mpesa_result_url: "https://example.com/api/payments/result".into(),
        mpesa_timeout_url: "https://example.com/api/payments/timeout".into(),
        mpesa_initiator_name: "testapi".into(),
        mpesa_security_credential: "credential".into(),
        mpesa_environment: "sandbox".into(),
        database_url: "mongodb://127.0.0.1:27017/mpesa_test".into(),
        port: 3001,
        frontend_url: None,
    }
}

async fn test_app() -> Router {
    // The MongoDB client connects lazily; none of the paths exercised here
    // issue a query.
    let client = mongodb::Client::with_uri_str("mongodb://127.0.0.1:27017/mpesa_test")
        .await
        .unwrap();
    let store = TransactionStore::new(client.database("mpesa_test"));
    let state = AppState::new(store, Arc::new(MpesaService::new(test_config())));
    app(state, None)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

#[tokio::test]
async fn health_check_reports_ok() {
    let app = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "OK");
    assert_eq!(body["environment"], "sandbox");
}

#[tokio::test]
async fn initiate_rejects_amount_below_one() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/initiate",
        json!({ "phoneNumber": "0712345678", "amount": 0.5, "accountReference": "INV1" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Amount must be at least 1 KSH");
}

#[tokio::test]
async fn initiate_rejects_missing_fields() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/initiate",
        json!({ "amount": 100 }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "Phone number, amount, and account reference are required"
    );
}

#[tokio::test]
async fn initiate_rejects_malformed_phone_number() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/initiate",
        json!({ "phoneNumber": "12345", "amount": 100, "accountReference": "INV1" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("Invalid phone number format"));
}

#[tokio::test]
async fn b2c_rejects_unknown_command_id() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/b2c",
        json!({
            "phoneNumber": "0712345678",
            "amount": 100,
            "commandId": "InstantPayment",
            "remarks": "test payout"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("Invalid command ID"));
}

#[tokio::test]
async fn b2b_rejects_unknown_command_id() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/b2b",
        json!({
            "partyB": "600000",
            "amount": 100,
            "commandId": "BusinessSomething",
            "accountReference": "ACC1",
            "remarks": "test transfer"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid command ID");
}

#[tokio::test]
async fn b2b_rejects_missing_fields() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/b2b",
        json!({ "partyB": "600000", "amount": 100 }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "All fields are required");
}

#[tokio::test]
async fn qr_rejects_unknown_trx_code() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/qrcode",
        json!({ "merchantName": "TEST SUPERMARKET", "refNo": "INV-001", "trxCode": "XX" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid transaction code. Use: BG, WA, PB, or SM");
}

#[tokio::test]
async fn balance_rejects_missing_fields() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/balance",
        json!({ "partyA": "600000" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Party A, identifier type, and remarks are required"
    );
}

#[tokio::test]
async fn reversal_rejects_non_positive_amount() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/transaction-reversal",
        json!({ "transactionId": "NLJ7RT61SV", "amount": 0, "receiverParty": "174379" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Amount must be greater than 0");
}

#[tokio::test]
async fn transaction_status_rejects_missing_fields() {
    let (status, body) = post_json(
        test_app().await,
        "/api/payments/transaction-status",
        json!({ "transactionId": "NLJ7RT61SV" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Transaction ID, Party A, identifier type, and remarks are required"
    );
}
