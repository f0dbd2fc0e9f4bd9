use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{Model as OrderModel, OrderStatus},
    errors::ServiceError,
    handlers::Identity,
    queries::order_rows::OrderWithItems,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

// ---- Customer surface ----

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "The shopper's orders with nested line items, newest first",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<OrderWithItems>> {
    let orders = state.services.orders.list_for_user(identity.user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get one of my orders",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Not found (or not yours)", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderWithItems> {
    let order = if identity.is_admin() {
        state.services.orders.get_any(id).await?
    } else {
        state.services.orders.get_for_user(identity.user_id, id).await?
    };
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel my order",
    description = "Allowed only while the order is pending or confirmed",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Not found (or not yours)", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderModel> {
    let order = state
        .services
        .order_status
        .cancel_for_user(identity.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Delete my order",
    description = "Allowed only once the order is cancelled or delivered",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 400, description = "Order is not terminal", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found (or not yours)", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .order_status
        .delete_for_user(identity.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Admin surface ----

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    description = "Every order in the store, same nested shape as the customer list",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
    ),
    tag = "Admin"
)]
pub async fn admin_list_orders(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<OrderWithItems>> {
    identity.require_admin()?;
    let orders = state.services.orders.list_all().await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    summary = "Advance order status",
    description = "Moves the order along the allowed transition graph, appending \
                   a tracking event and notifying the buyer",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status advanced", body = ApiResponse<serde_json::Value>),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
    ),
    tag = "Admin"
)]
pub async fn admin_update_order_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderModel> {
    identity.require_admin()?;
    let order = state
        .services
        .order_status
        .advance(id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/orders/{id}",
    summary = "Delete an order",
    description = "Allowed only once the order is cancelled or delivered",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 400, description = "Order is not terminal", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Admin"
)]
pub async fn admin_delete_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    identity.require_admin()?;
    state.services.order_status.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
