//! Payment gateway adapter against a mocked provider: checkout registration
//! and the independent callback verification (signature plus provider fetch).

use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use vastra_api::errors::ServiceError;
use vastra_api::services::payments::{
    sign_callback, CheckoutCustomer, PaymentCallback, RazorpayGateway,
};

const KEY_SECRET: &str = "gateway_test_secret";

fn gateway(provider: &MockServer, verify_remote: bool) -> RazorpayGateway {
    RazorpayGateway::new("rzp_test_key", KEY_SECRET, &provider.uri(), verify_remote)
}

fn customer() -> CheckoutCustomer {
    CheckoutCustomer {
        name: "Meera Iyer".to_string(),
        email: "meera@example.com".to_string(),
        phone: "+91-9000000001".to_string(),
    }
}

fn signed_callback(provider_order_id: &str, payment_id: &str) -> PaymentCallback {
    PaymentCallback {
        razorpay_order_id: provider_order_id.to_string(),
        razorpay_payment_id: payment_id.to_string(),
        razorpay_signature: sign_callback(KEY_SECRET, provider_order_id, payment_id),
    }
}

async fn mount_payment_fetch(
    provider: &MockServer,
    payment_id: &str,
    order_id: &str,
    status: &str,
    amount_paise: i64,
) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/payments/{payment_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": payment_id,
            "order_id": order_id,
            "status": status,
            "amount": amount_paise,
            "currency": "INR",
        })))
        .mount(provider)
        .await;
}

#[tokio::test]
async fn create_checkout_registers_the_charge_in_paise() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_gw_1",
            "amount": 209900,
            "currency": "INR",
            "status": "created",
        })))
        .expect(1)
        .mount(&provider)
        .await;

    let order = gateway(&provider, false)
        .create_checkout(dec!(2099), "INR", "VAS-TEST0001", &customer())
        .await
        .expect("provider order created");

    assert_eq!(order.provider_order_id, "order_gw_1");
    assert_eq!(order.amount_paise, 209900);
    assert_eq!(order.currency, "INR");
}

#[tokio::test]
async fn provider_error_surfaces_as_external_service_error() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&provider)
        .await;

    let err = gateway(&provider, false)
        .create_checkout(dec!(2099), "INR", "VAS-TEST0002", &customer())
        .await
        .expect_err("provider failure must propagate");
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn captured_payment_with_matching_amount_verifies() {
    let provider = MockServer::start().await;
    mount_payment_fetch(&provider, "pay_ok", "order_ok", "captured", 209900).await;

    let verified = gateway(&provider, true)
        .verify_callback(&signed_callback("order_ok", "pay_ok"), dec!(2099))
        .await
        .expect("verification passes");
    assert_eq!(verified.payment_id, "pay_ok");
    assert_eq!(verified.provider_order_id, "order_ok");
}

#[tokio::test]
async fn uncaptured_payment_is_rejected() {
    let provider = MockServer::start().await;
    mount_payment_fetch(&provider, "pay_auth", "order_auth", "authorized", 209900).await;

    let err = gateway(&provider, true)
        .verify_callback(&signed_callback("order_auth", "pay_auth"), dec!(2099))
        .await
        .expect_err("uncaptured payment must fail");
    assert!(matches!(err, ServiceError::PaymentVerificationFailed(_)));
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let provider = MockServer::start().await;
    // Provider says 100 paise; we expected 2099 rupees.
    mount_payment_fetch(&provider, "pay_small", "order_small", "captured", 100).await;

    let err = gateway(&provider, true)
        .verify_callback(&signed_callback("order_small", "pay_small"), dec!(2099))
        .await
        .expect_err("amount mismatch must fail");
    assert!(matches!(err, ServiceError::PaymentVerificationFailed(_)));
}

#[tokio::test]
async fn payment_for_a_different_provider_order_is_rejected() {
    let provider = MockServer::start().await;
    mount_payment_fetch(&provider, "pay_swap", "order_other", "captured", 209900).await;

    let err = gateway(&provider, true)
        .verify_callback(&signed_callback("order_swap", "pay_swap"), dec!(2099))
        .await
        .expect_err("order reference mismatch must fail");
    assert!(matches!(err, ServiceError::PaymentVerificationFailed(_)));
}

#[tokio::test]
async fn unknown_payment_is_rejected() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/pay_missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&provider)
        .await;

    let err = gateway(&provider, true)
        .verify_callback(&signed_callback("order_missing", "pay_missing"), dec!(2099))
        .await
        .expect_err("unknown payment must fail");
    assert!(matches!(err, ServiceError::PaymentVerificationFailed(_)));
}

#[tokio::test]
async fn bad_signature_short_circuits_without_touching_the_provider() {
    let provider = MockServer::start().await;
    // No GET stub mounted: reaching the provider would 404 loudly. The
    // signature check must reject first.
    let callback = PaymentCallback {
        razorpay_order_id: "order_sig".to_string(),
        razorpay_payment_id: "pay_sig".to_string(),
        razorpay_signature: sign_callback("wrong_secret", "order_sig", "pay_sig"),
    };

    let err = gateway(&provider, true)
        .verify_callback(&callback, dec!(2099))
        .await
        .expect_err("bad signature must fail");
    assert!(matches!(err, ServiceError::PaymentVerificationFailed(_)));
    assert!(provider.received_requests().await.unwrap_or_default().is_empty());
}
