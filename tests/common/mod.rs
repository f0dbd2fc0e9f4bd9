use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use vastra_api::{
    config::AppConfig,
    db,
    entities::{address, product},
    events::{self, outbox::OutboxWorker, EventSender},
    handlers::AppServices,
    services::checkout::CheckoutSettings,
    services::payments::{sign_callback, RazorpayGateway},
    AppState,
};

pub const TEST_KEY_ID: &str = "rzp_test_key";
pub const TEST_KEY_SECRET: &str = "test_key_secret_for_integration";

/// Helper harness: the full application state over an in-memory SQLite
/// database, with a wiremock server standing in for the payment provider.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    // Kept alive for the lifetime of the app; dropping it stops the mock.
    #[allow(dead_code)]
    pub provider: MockServer,
    outbox: Arc<OutboxWorker>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Signature-only payment verification; the provider mock still serves
    /// checkout order registration.
    pub async fn new() -> Self {
        Self::with_remote_verification(false).await
    }

    pub async fn with_remote_verification(verify_remote: bool) -> Self {
        let provider = MockServer::start().await;
        mount_provider_order_stub(&provider).await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.razorpay_key_id = TEST_KEY_ID.to_string();
        cfg.razorpay_key_secret = TEST_KEY_SECRET.to_string();
        cfg.razorpay_base_url = provider.uri();
        cfg.razorpay_verify_remote = verify_remote;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(RazorpayGateway::from_config(&cfg));
        let settings = CheckoutSettings::from_config(&cfg);
        let services =
            AppServices::new(db_arc.clone(), event_sender.clone(), gateway, settings);

        let outbox = Arc::new(OutboxWorker::new(
            db_arc.clone(),
            services.inventory.clone(),
            services.notifications.clone(),
            cfg.outbox_batch_size,
        ));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", vastra_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            provider,
            outbox,
            _event_task: event_task,
        }
    }

    /// Send a request with explicit identity headers.
    pub async fn request_as(
        &self,
        user_id: Uuid,
        role: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", user_id.to_string())
            .header("x-user-role", role);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a request with no identity headers (e.g. provider callbacks).
    pub async fn request_anonymous(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Runs the outbox worker to completion, the way the background loop
    /// eventually would.
    #[allow(dead_code)]
    pub async fn drain_outbox(&self) -> usize {
        let mut total = 0;
        loop {
            let executed = self
                .outbox
                .drain_once()
                .await
                .expect("outbox drain failed");
            if executed == 0 {
                break;
            }
            total += executed;
        }
        total
    }

    /// Signs a callback the way the real provider would.
    pub fn sign(&self, provider_order_id: &str, payment_id: &str) -> String {
        sign_callback(TEST_KEY_SECRET, provider_order_id, payment_id)
    }

    pub async fn seed_product(
        &self,
        name: &str,
        sku: &str,
        price: Decimal,
        stock: i32,
    ) -> product::Model {
        let active = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            price: Set(price),
            stock_quantity: Set(stock),
            oversold: Set(false),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        active
            .insert(&*self.state.db)
            .await
            .expect("seed product for tests")
    }

    pub async fn seed_address(&self, user_id: Uuid) -> address::Model {
        let active = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            recipient_name: Set("Meera Iyer".to_string()),
            phone: Set("+91-9000000001".to_string()),
            line1: Set("14 Gandhi Road".to_string()),
            line2: Set(None),
            city: Set("Chennai".to_string()),
            state: Set("Tamil Nadu".to_string()),
            postal_code: Set("600001".to_string()),
            country: Set("India".to_string()),
            is_default: Set(true),
            created_at: Set(Utc::now()),
        };
        active
            .insert(&*self.state.db)
            .await
            .expect("seed address for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Stubs the provider's order registration endpoint, echoing the requested
/// amount and currency back the way Razorpay does.
async fn mount_provider_order_stub(provider: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(|request: &wiremock::Request| {
            let body: Value = request.body_json().expect("provider order body is json");
            ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("order_wm_{}", Uuid::new_v4().simple()),
                "amount": body["amount"],
                "currency": body["currency"],
                "status": "created",
            }))
        })
        .mount(provider)
        .await;
}

/// Reads a JSON response body.
pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body is not valid json")
}
