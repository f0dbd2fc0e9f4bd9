use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vastra API",
        version = "0.1.0",
        description = r#"
# Vastra Order Fulfillment API

The order-fulfillment core of the Vastra ethnic-wear storefront: cart
management, checkout staging, payment verification, order assembly, and the
tracked order lifecycle.

## Identity

Authentication is handled by the upstream gateway, which injects the caller's
identity into every request:

- `x-user-id`: the caller's UUID (required)
- `x-user-role`: `admin` unlocks the back-office surface; anything else is a
  customer

## Checkout flow

1. `POST /checkout` stages the pending order and registers the charge with
   the payment provider.
2. The client opens the hosted payment widget with the returned
   `provider_order_id` and `key_id`.
3. On success the widget's callback is posted to
   `POST /payments/razorpay/callback`, which verifies the payment
   independently before any order is created.
4. On dismissal or failure the client posts `POST /checkout/cancel` to
   discard the staged order.
        "#,
        contact(
            name = "Vastra Engineering",
            email = "engineering@vastra.example"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopper cart lines"),
        (name = "Checkout", description = "Checkout staging and cancellation"),
        (name = "Payments", description = "Payment provider callbacks"),
        (name = "Orders", description = "Customer order list and lifecycle"),
        (name = "Admin", description = "Back-office order management"),
        (name = "Notifications", description = "Account notification bell"),
    ),
    paths(
        crate::handlers::carts::list_cart,
        crate::handlers::carts::add_cart_item,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,

        crate::handlers::checkout::stage_checkout,
        crate::handlers::checkout::abort_checkout,

        crate::handlers::payment_webhooks::razorpay_callback,

        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::admin_list_orders,
        crate::handlers::orders::admin_update_order_status,
        crate::handlers::orders::admin_delete_order,

        crate::handlers::notifications::list_notifications,
        crate::handlers::notifications::mark_notification_read,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,

            crate::services::carts::CartLineView,
            crate::services::carts::AddCartItemRequest,
            crate::services::carts::UpdateCartItemRequest,

            crate::services::checkout::StageCheckoutRequest,
            crate::services::checkout::StagedCheckout,
            crate::services::checkout::AbortCheckoutRequest,
            crate::services::checkout::AbortOutcome,
            crate::services::checkout::PendingLine,
            crate::services::checkout::AddressSnapshot,
            crate::services::checkout::PaymentCallbackResponse,

            crate::services::payments::PaymentCallback,
            crate::services::payments::PaymentOutcome,
            crate::services::payments::CheckoutCustomer,
            crate::services::payments::ProviderOrder,

            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::queries::order_rows::OrderWithItems,
            crate::queries::order_rows::OrderItemView,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,

            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_includes_core_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).expect("spec serializes");
        assert!(json.contains("Vastra API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/payments/razorpay/callback"));
        assert!(json.contains("/api/v1/admin/orders"));
    }
}
