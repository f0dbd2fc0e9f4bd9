use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    entities::cart_item::Model as CartItemModel,
    errors::ServiceError,
    handlers::Identity,
    services::carts::{AddCartItemRequest, CartLineView, UpdateCartItemRequest},
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "List cart",
    description = "The shopper's current cart lines with live product details",
    responses(
        (status = 200, description = "Cart retrieved", body = ApiResponse<Vec<CartLineView>>),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn list_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<CartLineView>> {
    let lines = state.services.carts.list(identity.user_id).await?;
    Ok(Json(ApiResponse::success(lines)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add cart line",
    request_body = AddCartItemRequest,
    responses(
        (status = 201, description = "Line added or merged", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Invalid quantity or inactive product", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<AddCartItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CartItemModel>>), ServiceError> {
    let line = state.services.carts.add_item(identity.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(line))))
}

#[utoipa::path(
    patch,
    path = "/api/v1/cart/items/{id}",
    summary = "Change line quantity",
    params(("id" = Uuid, Path, description = "Cart line id")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Line updated", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Line not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> ApiResult<CartItemModel> {
    let line = state
        .services
        .carts
        .update_item(identity.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(line)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{id}",
    summary = "Remove cart line",
    params(("id" = Uuid, Path, description = "Cart line id")),
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "Line not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.carts.remove_item(identity.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
