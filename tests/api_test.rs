mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{callback, harness, GOOD_SIGNATURE};
use paybridge_backend::api;
use paybridge_backend::database::models::PaymentStatus;
use paybridge_backend::database::store::EntityStore;

const ADMIN_TOKEN: &str = "s3cret-admin";

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn payment_body(user: &str, provider: &str) -> Value {
    json!({
        "user_id": user,
        "provider": provider,
        "amount": "50",
        "currency": "usd",
        "description": "Conference ticket",
        "email": "buyer@example.com",
    })
}

fn webhook(provider: &str, signature: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("/webhooks/{provider}"))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("cardnet-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn health_reports_store_and_providers() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, headers, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body["status"], "Healthy");
}

#[tokio::test]
async fn payment_initiation_then_signed_webhook_completes_it() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-200", "stripe")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["provider"], "cardnet");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["action"]["type"], "redirect");
    let payment_ref = body["payment_ref"].as_str().unwrap().to_string();
    let order_ref = body["order_ref"].as_str().unwrap().to_string();

    let provider_ref = format!("fake_{payment_ref}");
    let (status, _, body) = send(
        &app,
        webhook("cardnet", Some(GOOD_SIGNATURE), callback(&provider_ref, "succeeded")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri(format!("/payments/{payment_ref}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert!(body.get("gateway_response").is_none());

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri(format!("/orders/{order_ref}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "payment_confirmed");
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_unauthorized() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(
        &app,
        webhook("cardnet", Some("forged"), callback("fake_x", "succeeded")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn webhook_for_unconfigured_provider_is_rejected() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(&app, webhook("venmo", None, b"{}".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    // M-Pesa keeps its own acknowledgement envelope even on rejection
    let (status, _, body) = send(&app, webhook("mpesa", None, b"{}".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ResultCode"], 1);
}

#[tokio::test]
async fn mobile_money_without_phone_stores_nothing() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-201", "mpesa")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(h.store.find_user_by_external_id("tg-201").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_provider_name_is_a_bad_request() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-202", "venmo")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UNSUPPORTED_PROVIDER");
}

#[tokio::test]
async fn sixth_payment_attempt_in_window_is_rate_limited() {
    let h = harness();
    let app = api::router(h.app_state(None));

    for _ in 0..5 {
        let (status, _, _) = send(
            &app,
            json_request(Method::POST, "/payments", payment_body("tg-203", "cardnet")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, headers, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-203", "cardnet")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMIT_ERROR");
    assert_eq!(body["retryable"], true);
    let retry_after: u64 = headers
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 300);

    // Other users keep their own window
    let (status, _, _) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-204", "cardnet")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn admin_routes_require_bearer_token() {
    let h = harness();
    let app = api::router(h.app_state(Some(ADMIN_TOKEN)));

    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/admin/refund",
            json!({"payment_ref": "PAY-missing"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");

    let mut request = json_request(
        Method::POST,
        "/admin/refund",
        json!({"payment_ref": "PAY-missing"}),
    );
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "PAYMENT_NOT_FOUND");
}

#[tokio::test]
async fn admin_refund_and_fulfilment_flow() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (_, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-205", "cardnet")),
    )
    .await;
    let payment_ref = body["payment_ref"].as_str().unwrap().to_string();
    let order_ref = body["order_ref"].as_str().unwrap().to_string();

    // Not yet settled
    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/admin/refund",
            json!({"payment_ref": payment_ref}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NOT_REFUNDABLE");

    send(
        &app,
        webhook(
            "cardnet",
            Some(GOOD_SIGNATURE),
            callback(&format!("fake_{payment_ref}"), "succeeded"),
        ),
    )
    .await;

    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/admin/refund",
            json!({"payment_ref": payment_ref, "amount": "80"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "AMOUNT_EXCEEDS_ORIGINAL");

    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/admin/refund",
            json!({"payment_ref": payment_ref, "amount": "20"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_ref"], order_ref);
    assert!(body["refund_reference"].as_str().unwrap().starts_with("re_"));

    let payment = h.store.find_payment(&payment_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);

    // A cancelled order cannot be shipped
    let (status, _, body) = send(
        &app,
        json_request(
            Method::PATCH,
            &format!("/admin/orders/{order_ref}/status"),
            json!({"status": "processing"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_STATUS_TRANSITION");
}

#[tokio::test]
async fn receipt_regeneration_needs_a_completed_payment() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (_, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-206", "cardnet")),
    )
    .await;
    let payment_ref = body["payment_ref"].as_str().unwrap().to_string();

    let (status, _, _) = send(
        &app,
        json_request(
            Method::POST,
            "/admin/receipt",
            json!({"payment_ref": payment_ref}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(
        &app,
        webhook(
            "cardnet",
            Some(GOOD_SIGNATURE),
            callback(&format!("fake_{payment_ref}"), "succeeded"),
        ),
    )
    .await;

    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/admin/receipt",
            json!({"payment_ref": payment_ref}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["receipt_path"].as_str().unwrap().ends_with(".json"));
    assert_eq!(body["email_sent"], false);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri("/orders/ORD-missing")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ORDER_NOT_FOUND");
    assert!(body["request_id"].is_string());
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn card_return_confirms_then_repeat_is_a_replay() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (_, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-207", "cardnet")),
    )
    .await;
    let payment_ref = body["payment_ref"].as_str().unwrap().to_string();
    let uri = format!("/payments/cardnet/return?payment_intent=fake_{payment_ref}");

    let (status, _, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "applied");
    assert_eq!(body["payment"]["status"], "completed");

    let (status, _, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "replayed");
    assert_eq!(
        h.provider
            .confirm_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn paypal_cancel_leaves_payment_pending_until_return() {
    let h = harness();
    let app = api::router(h.app_state(None));

    let (status, _, body) = send(
        &app,
        json_request(Method::POST, "/payments", payment_body("tg-208", "paypal")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["provider"], "paypal");
    let payment_ref = body["payment_ref"].as_str().unwrap().to_string();
    let provider_ref = format!("fake_{payment_ref}");

    let (status, _, body) = send(
        &app,
        get(&format!("/payments/paypal/cancel?paymentId={provider_ref}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ignored");
    let payment = h.store.find_payment(&payment_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    let return_uri = format!("/payments/paypal/return?paymentId={provider_ref}&PayerID=PAYER1");
    let (status, _, body) = send(&app, get(&return_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "applied");

    let (_, _, body) = send(&app, get(&return_uri)).await;
    assert_eq!(body["result"], "replayed");
    assert_eq!(
        h.paypal
            .confirm_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    let payment = h.store.find_payment(&payment_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.gateway_response.unwrap()["payer_id"], "PAYER1");

    let (status, _, body) = send(
        &app,
        get("/payments/paypal/return?paymentId=fake_unknown&PayerID=PAYER1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "unknown_transaction");

    let (_, _, body) = send(&app, get("/payments/paypal/cancel?paymentId=fake_unknown")).await;
    assert_eq!(body["result"], "unknown_transaction");
}

#[tokio::test]
async fn support_tickets_are_rate_limited_and_closed_by_admin() {
    let h = harness();
    let app = api::router(h.app_state(None));
    let ticket = |subject: &str| {
        json_request(
            Method::POST,
            "/support/tickets",
            json!({
                "user_id": "tg-209",
                "subject": subject,
                "description": "Paid but the order is still pending",
                "priority": "high",
            }),
        )
    };

    let (status, _, body) = send(&app, ticket("Payment stuck")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["ticket_ref"].as_str().unwrap().starts_with("TKT-"));
    assert_eq!(body["status"], "open");
    assert_eq!(body["priority"], "high");
    let ticket_ref = body["ticket_ref"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let (status, _, _) = send(&app, ticket("Follow up")).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, headers, body) = send(&app, ticket("Fourth")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMIT_ERROR");
    assert!(headers.contains_key(header::RETRY_AFTER));

    let (status, _, body) = send(&app, get(&format!("/support/tickets/{ticket_ref}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subject"], "Payment stuck");

    let (status, _, body) = send(&app, get("/support/tickets/TKT-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "TICKET_NOT_FOUND");

    let status_uri = format!("/admin/support/tickets/{ticket_ref}/status");
    let (status, _, body) = send(
        &app,
        json_request(Method::PATCH, &status_uri, json!({"status": "closed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (status, _, body) = send(
        &app,
        json_request(Method::PATCH, &status_uri, json!({"status": "open"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_STATUS_TRANSITION");
}
