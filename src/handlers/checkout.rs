use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::{
    errors::ServiceError,
    handlers::Identity,
    services::checkout::{AbortCheckoutRequest, AbortOutcome, StageCheckoutRequest, StagedCheckout},
    services::payments::PaymentOutcome,
    ApiResponse, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Stage checkout",
    description = "Price the cart, snapshot the shipping address, register the \
                   charge with the payment provider, and hold the pending order \
                   until the payment callback arrives",
    request_body = StageCheckoutRequest,
    responses(
        (status = 201, description = "Checkout staged; open the payment widget", body = ApiResponse<StagedCheckout>),
        (status = 400, description = "Empty cart, missing address, or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unreachable", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn stage_checkout(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<StageCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StagedCheckout>>), ServiceError> {
    let staged = state
        .services
        .checkout
        .stage_checkout(identity.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(staged))))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout/cancel",
    summary = "Abort checkout",
    description = "Discard the staged pending order after the shopper dismissed \
                   the payment widget or the provider reported failure. No order \
                   is created and no stock is touched",
    request_body = AbortCheckoutRequest,
    responses(
        (status = 200, description = "Slot discarded (or nothing was staged)", body = ApiResponse<serde_json::Value>),
    ),
    tag = "Checkout"
)]
pub async fn abort_checkout(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<AbortCheckoutRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let outcome = match request.outcome {
        AbortOutcome::Cancelled => PaymentOutcome::Cancelled,
        AbortOutcome::Failed => PaymentOutcome::Failure {
            reason: request
                .reason
                .unwrap_or_else(|| "payment failed".to_string()),
        },
    };
    let discarded = state
        .services
        .checkout
        .abort_checkout(identity.user_id, outcome)
        .await?;
    Ok(Json(ApiResponse::success(json!({ "discarded": discarded }))))
}
