pub mod carts;
pub mod checkout;
pub mod notifications;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::carts::CartService,
    services::checkout::{CheckoutService, CheckoutSettings, StagingStore},
    services::inventory::InventoryService,
    services::notifications::NotificationService,
    services::order_status::OrderStatusService,
    services::orders::OrderService,
    services::payments::RazorpayGateway,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Caller identity injected by the upstream gateway. Authentication itself is
/// delegated; this service only reads the forwarded headers.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "Administrator role required".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("Missing x-user-id header".to_string())
            })?;
        let user_id = Uuid::parse_str(user_id).map_err(|_| {
            ServiceError::Unauthorized("x-user-id header is not a valid UUID".to_string())
        })?;

        let role = match parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
        {
            Some(raw) if raw.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Customer,
        };

        Ok(Identity { user_id, role })
    }
}

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub inventory: Arc<InventoryService>,
    pub notifications: Arc<NotificationService>,
    pub staging: Arc<StagingStore>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<RazorpayGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        let staging = Arc::new(StagingStore::new());
        let inventory = Arc::new(InventoryService::new(db.clone(), event_sender.clone()));
        let notifications = Arc::new(NotificationService::new(db.clone()));
        let carts = Arc::new(CartService::new(db.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            carts.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            staging.clone(),
            gateway,
            orders.clone(),
            event_sender.clone(),
            settings,
        ));
        let order_status = Arc::new(OrderStatusService::new(
            db,
            event_sender,
            notifications.clone(),
        ));

        Self {
            carts,
            checkout,
            orders,
            order_status,
            inventory,
            notifications,
            staging,
        }
    }
}
