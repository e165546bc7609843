use super::*;
use crate::database::memory::InMemoryEntityStore;
use crate::database::models::{
    generate_order_ref, generate_payment_ref, InitiationRecord, NewOrder, NewPayment,
    OrderStatus, PaymentStatus,
};
use crate::database::store::EntityStore;
use crate::payments::providers::{CardnetConfig, CardnetProvider, MpesaConfig, MpesaProvider};
use crate::payments::registry::ProviderRegistry;
use crate::payments::utils::hmac_sha256_hex;
use crate::services::payment_orchestrator::OrchestratorConfig;
use bigdecimal::BigDecimal;

const SECRET: &str = "whsec_test";

struct Fixture {
    processor: WebhookProcessor,
    store: Arc<InMemoryEntityStore>,
    payment_ref: String,
    order_ref: String,
}

async fn fixture(provider: ProviderName, provider_ref: &str) -> Fixture {
    let store = Arc::new(InMemoryEntityStore::new());
    let user = store.get_or_create_user("tg-77").await.unwrap();
    let order = store
        .insert_order(NewOrder {
            order_ref: generate_order_ref(),
            user_id: user.id,
            amount: BigDecimal::from(50),
            currency: "USD".to_string(),
            description: None,
        })
        .await
        .unwrap();
    let payment = store
        .insert_payment(NewPayment {
            payment_ref: generate_payment_ref(),
            order_id: order.id,
            user_id: user.id,
            amount: BigDecimal::from(50),
            currency: "USD".to_string(),
            provider,
        })
        .await
        .unwrap();
    store
        .record_initiation(
            &payment.payment_ref,
            InitiationRecord::Accepted {
                provider_reference: provider_ref.to_string(),
                response: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

    let registry = ProviderRegistry::new()
        .with_provider(Arc::new(
            CardnetProvider::new(CardnetConfig {
                webhook_secret: Some(SECRET.to_string()),
                ..CardnetConfig::default()
            })
            .unwrap(),
        ))
        .with_provider(Arc::new(MpesaProvider::new(MpesaConfig::default()).unwrap()));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        registry,
        OrchestratorConfig::default(),
    ));

    Fixture {
        processor: WebhookProcessor::new(orchestrator),
        store,
        payment_ref: payment.payment_ref,
        order_ref: order.order_ref,
    }
}

fn sign(payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    format!("t={},v1={}", timestamp, hmac_sha256_hex(&signed, SECRET).unwrap())
}

#[tokio::test]
async fn signed_card_success_completes_payment_and_order() {
    let f = fixture(ProviderName::Cardnet, "pi_1").await;
    let payload = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    let receipt = f
        .processor
        .process_callback("cardnet", Some(&sign(payload)), payload)
        .await
        .unwrap();
    assert_eq!(receipt.result, "applied");

    let payment = f.store.find_payment(&f.payment_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    let order = f.store.find_order(&f.order_ref).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PaymentConfirmed);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_any_write() {
    let f = fixture(ProviderName::Cardnet, "pi_2").await;
    let payload = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_2"}}}"#;

    let err = f
        .processor
        .process_callback("cardnet", Some("t=1,v1=deadbeef"), payload)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::InvalidSignature(_)));

    let payment = f.store.find_payment(&f.payment_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn duplicate_and_out_of_order_deliveries_are_absorbed() {
    let f = fixture(ProviderName::Mpesa, "ws_CO_1").await;
    let success = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_CO_1","ResultCode":0,"ResultDesc":"ok"}}}"#;
    let failure = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_CO_1","ResultCode":1032,"ResultDesc":"Request cancelled by user"}}}"#;

    let first = f.processor.process_callback("mpesa", None, success).await.unwrap();
    let second = f.processor.process_callback("mpesa", None, success).await.unwrap();
    let late = f.processor.process_callback("mpesa", None, failure).await.unwrap();

    assert_eq!(first.result, "applied");
    assert_eq!(second.result, "replayed");
    assert_eq!(late.result, "ignored");

    let payment = f.store.find_payment(&f.payment_ref).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn unknown_transaction_is_acknowledged() {
    let f = fixture(ProviderName::Mpesa, "ws_CO_1").await;
    let payload = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_CO_other","ResultCode":0}}}"#;
    let receipt = f.processor.process_callback("mpesa", None, payload).await.unwrap();
    assert_eq!(receipt.result, "unknown_transaction");
}

#[tokio::test]
async fn malformed_payload_and_unknown_provider() {
    let f = fixture(ProviderName::Mpesa, "ws_CO_1").await;

    let err = f
        .processor
        .process_callback("mpesa", None, b"{not json")
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::MalformedPayload(_)));

    let err = f
        .processor
        .process_callback("venmo", None, b"{}")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown provider: venmo");

    // known name, but not registered here
    let err = f
        .processor
        .process_callback("bitpay", None, b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::UnknownProvider(_)));
}

#[test]
fn error_status_codes() {
    use crate::error::AppError;

    let unauthorized: AppError = WebhookProcessorError::InvalidSignature("x".to_string()).into();
    assert_eq!(unauthorized.status_code(), 401);
    let malformed: AppError = WebhookProcessorError::MalformedPayload("x".to_string()).into();
    assert_eq!(malformed.status_code(), 400);
    let storage: AppError = WebhookProcessorError::ProcessingError("down".to_string()).into();
    assert_eq!(storage.status_code(), 500);
}
