//! End-to-end checkout: staging, payment callback verification, order
//! assembly, idempotent replays, and the stock ledger.

mod common;

use std::str::FromStr;

use axum::http::{Method, StatusCode};
use common::{read_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// Money fields serialize as JSON strings (or bare numbers after a SQLite
/// round-trip); compare them numerically.
fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a money value: {other:?}"),
    }
}

/// Seeds a two-line cart (2 x 500 + 1 x 1000) with an address and stages
/// checkout. Returns the shopper and the staged provider order id.
async fn stage_standard_checkout(app: &TestApp) -> (Uuid, String) {
    let user_id = Uuid::new_v4();
    let kurta = app.seed_product("Cotton Kurta", "KUR-001", dec!(500), 10).await;
    let saree = app.seed_product("Silk Saree", "SAR-001", dec!(1000), 10).await;
    app.seed_address(user_id).await;

    for (product, qty) in [(&kurta, 2), (&saree, 1)] {
        let response = app
            .request_as(
                user_id,
                "customer",
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product.id, "size": "M", "quantity": qty })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .request_as(
            user_id,
            "customer",
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "email": "meera@example.com" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    let data = &body["data"];

    assert_eq!(money(&data["subtotal"]), dec!(2000));
    assert_eq!(money(&data["shipping_cost"]), dec!(99));
    assert_eq!(money(&data["total_amount"]), dec!(2099));

    let provider_order_id = data["provider_order_id"]
        .as_str()
        .expect("provider order id")
        .to_string();
    (user_id, provider_order_id)
}

#[tokio::test]
async fn verified_callback_creates_a_confirmed_order() {
    let app = TestApp::new().await;
    let (user_id, provider_order_id) = stage_standard_checkout(&app).await;

    let payment_id = "pay_flow_1";
    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(json!({
                "razorpay_order_id": provider_order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": app.sign(&provider_order_id, payment_id),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["isValid"], true);
    let order_id = body["order_id"].as_str().expect("order id").to_string();

    // The customer view shows the nested order with snapshot prices.
    let response = app
        .request_as(user_id, "customer", Method::GET, "/api/v1/orders", None)
        .await;
    let body = read_json(response).await;
    let orders = body["data"].as_array().expect("orders array");
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order["id"].as_str(), Some(order_id.as_str()));
    assert_eq!(order["status"], "confirmed");
    assert_eq!(order["payment_status"], "paid");
    assert_eq!(money(&order["total_amount"]), dec!(2099));
    assert_eq!(order["payment_id"], payment_id);
    assert_eq!(order["country"], "India");
    assert_eq!(order["items"].as_array().map(Vec::len), Some(2));

    // The staging slot is consumed and the cart is cleared.
    assert!(!app.state.services.staging.is_staged(user_id));
    let response = app
        .request_as(user_id, "customer", Method::GET, "/api/v1/cart", None)
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn replayed_callback_is_a_no_op() {
    let app = TestApp::new().await;
    let (_user_id, provider_order_id) = stage_standard_checkout(&app).await;

    let payment_id = "pay_replay_1";
    let callback = json!({
        "razorpay_order_id": provider_order_id,
        "razorpay_payment_id": payment_id,
        "razorpay_signature": app.sign(&provider_order_id, payment_id),
    });

    let first = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(callback.clone()),
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = read_json(first).await;

    // Network retry delivers the same verified callback again.
    let second = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(callback),
        )
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = read_json(second).await;
    assert_eq!(first_body["order_id"], second_body["order_id"]);

    // Exactly one order exists for the payment id.
    let admin = Uuid::new_v4();
    let response = app
        .request_as(admin, "admin", Method::GET, "/api/v1/admin/orders", None)
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn invalid_signature_creates_no_order_and_discards_staging() {
    let app = TestApp::new().await;
    let (user_id, provider_order_id) = stage_standard_checkout(&app).await;

    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(json!({
                "razorpay_order_id": provider_order_id,
                "razorpay_payment_id": "pay_forged",
                "razorpay_signature": "deadbeefdeadbeefdeadbeefdeadbeef",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = read_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["isValid"], false);

    // No order, and the slot is gone so the draft cannot be replayed.
    assert!(!app.state.services.staging.is_staged(user_id));
    let response = app
        .request_as(user_id, "customer", Method::GET, "/api/v1/orders", None)
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));

    // A later genuine-looking callback finds nothing to confirm.
    let payment_id = "pay_late";
    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(json!({
                "razorpay_order_id": provider_order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": app.sign(&provider_order_id, payment_id),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn cancelled_checkout_creates_nothing_and_touches_no_stock() {
    let app = TestApp::new().await;
    let (user_id, provider_order_id) = stage_standard_checkout(&app).await;

    let response = app
        .request_as(
            user_id,
            "customer",
            Method::POST,
            "/api/v1/checkout/cancel",
            Some(json!({ "outcome": "cancelled" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["discarded"], true);
    assert!(!app.state.services.staging.is_staged(user_id));

    // A callback for the abandoned checkout confirms nothing.
    let payment_id = "pay_after_cancel";
    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(json!({
                "razorpay_order_id": provider_order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": app.sign(&provider_order_id, payment_id),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    app.drain_outbox().await;
    let response = app
        .request_as(user_id, "customer", Method::GET, "/api/v1/orders", None)
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn outbox_decrements_stock_and_notifies_after_commit() {
    let app = TestApp::new().await;
    let (user_id, provider_order_id) = stage_standard_checkout(&app).await;

    let payment_id = "pay_outbox_1";
    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(json!({
                "razorpay_order_id": provider_order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": app.sign(&provider_order_id, payment_id),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let executed = app.drain_outbox().await;
    assert!(executed >= 3, "two stock decrements and one notification");

    // 2 of 10 kurtas and 1 of 10 sarees sold.
    let mut remaining: Vec<i32> = Vec::new();
    for sku in ["KUR-001", "SAR-001"] {
        let product = find_product_by_sku(&app, sku).await;
        remaining.push(product.stock_quantity);
        assert!(!product.oversold);
    }
    remaining.sort_unstable();
    assert_eq!(remaining, vec![8, 9]);

    let response = app
        .request_as(user_id, "customer", Method::GET, "/api/v1/notifications", None)
        .await;
    let body = read_json(response).await;
    let notifications = body["data"].as_array().expect("notifications array");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["kind"], "order_confirmed");
}

#[tokio::test]
async fn oversell_clamps_at_zero_and_flags_the_product() {
    let app = TestApp::new().await;
    let product = app.seed_product("Lehenga", "LEH-001", dec!(4500), 3).await;

    // Concurrent checkout raced this one to the stock; the decrement would
    // go negative and must clamp instead.
    let outcome = app
        .state
        .services
        .inventory
        .decrement(product.id, 5)
        .await
        .expect("clamped decrement still succeeds");
    assert_eq!(outcome.remaining, 0);
    assert!(outcome.oversold);

    let stored = find_product_by_sku(&app, "LEH-001").await;
    assert_eq!(stored.stock_quantity, 0);
    assert!(stored.oversold);

    // Stock never goes below zero, no matter how often it is hit.
    let outcome = app
        .state
        .services
        .inventory
        .decrement(product.id, 1)
        .await
        .expect("decrement on empty stock clamps");
    assert_eq!(outcome.remaining, 0);
    assert!(outcome.oversold);
}

#[tokio::test]
async fn empty_cart_cannot_stage_checkout() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.seed_address(user_id).await;

    let response = app
        .request_as(
            user_id,
            "customer",
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "email": "meera@example.com" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn subtotal_at_threshold_ships_free() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product = app
        .seed_product("Bridal Lehenga", "LEH-002", dec!(2500), 5)
        .await;
    app.seed_address(user_id).await;

    let response = app
        .request_as(
            user_id,
            "customer",
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "size": "L", "quantity": 1 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .request_as(
            user_id,
            "customer",
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "email": "meera@example.com" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(money(&body["data"]["shipping_cost"]), Decimal::ZERO);
    assert_eq!(money(&body["data"]["total_amount"]), dec!(2500));
}

#[tokio::test]
async fn restaged_checkout_replaces_the_dangling_slot() {
    let app = TestApp::new().await;
    let (user_id, first_provider_order) = stage_standard_checkout(&app).await;

    // The shopper backs out of the widget and starts checkout again. The
    // cart is unchanged, so staging succeeds with a fresh provider order.
    let response = app
        .request_as(
            user_id,
            "customer",
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "email": "meera@example.com" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    let second_provider_order = body["data"]["provider_order_id"]
        .as_str()
        .expect("provider order id")
        .to_string();
    assert_ne!(first_provider_order, second_provider_order);

    // The superseded provider order can no longer confirm anything.
    let payment_id = "pay_stale_slot";
    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/razorpay/callback",
            Some(json!({
                "razorpay_order_id": first_provider_order,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": app.sign(&first_provider_order, payment_id),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

async fn find_product_by_sku(app: &TestApp, sku: &str) -> vastra_api::entities::product::Model {
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
    use vastra_api::entities::product;

    product::Entity::find()
        .filter(product::Column::Sku.eq(sku))
        .one(&*app.state.db)
        .await
        .expect("product query")
        .expect("product exists")
}
