use axum::{extract::State, http::StatusCode, response::Json};

use crate::{
    errors::ServiceError,
    services::checkout::PaymentCallbackResponse,
    services::payments::PaymentCallback,
    AppState,
};

/// The provider's success callback. The payload is untrusted until the
/// signature and (when enabled) the provider-side payment fetch both pass;
/// only then is the staged order handed to the assembler.
#[utoipa::path(
    post,
    path = "/api/v1/payments/razorpay/callback",
    summary = "Razorpay payment callback",
    request_body = PaymentCallback,
    responses(
        (status = 200, description = "Payment verified; order confirmed", body = PaymentCallbackResponse),
        (status = 402, description = "Verification rejected; no order created", body = PaymentCallbackResponse),
        (status = 500, description = "Payment received but order rows could not be written", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unreachable; retry the callback", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn razorpay_callback(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<(StatusCode, Json<PaymentCallbackResponse>), ServiceError> {
    let response = state.services.checkout.complete_payment(callback).await?;
    let status = if response.is_valid {
        StatusCode::OK
    } else {
        StatusCode::PAYMENT_REQUIRED
    };
    Ok((status, Json(response)))
}
