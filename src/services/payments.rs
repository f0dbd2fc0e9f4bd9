use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{config::AppConfig, errors::ServiceError, metrics};

type HmacSha256 = Hmac<Sha256>;

/// Terminal outcome of a payment attempt. Cancellation is the shopper
/// dismissing the widget: a distinct outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PaymentOutcome {
    Success { payment_id: String },
    Failure { reason: String },
    Cancelled,
}

/// Customer details forwarded to the hosted checkout widget.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutCustomer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// A charge registered with the provider ahead of the hosted widget opening.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderOrder {
    pub provider_order_id: String,
    pub amount_paise: i64,
    pub currency: String,
}

/// The callback the provider's widget posts after a successful payment.
/// Untrusted until [`RazorpayGateway::verify_callback`] passes.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PaymentCallback {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

/// A callback that has passed independent verification.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payment_id: String,
    pub provider_order_id: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPaymentResponse {
    id: String,
    order_id: String,
    status: String,
    amount: i64,
}

/// Adapter for the Razorpay checkout flow: outbound order registration and
/// inbound callback verification.
#[derive(Clone)]
pub struct RazorpayGateway {
    http: Client,
    key_id: String,
    key_secret: String,
    base_url: String,
    verify_remote: bool,
}

impl RazorpayGateway {
    pub fn new(key_id: &str, key_secret: &str, base_url: &str, verify_remote: bool) -> Self {
        Self {
            http: Client::new(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            verify_remote,
        }
    }

    /// Public key id the client hands to the hosted widget.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            http: Client::new(),
            key_id: cfg.razorpay_key_id.clone(),
            key_secret: cfg.razorpay_key_secret.clone(),
            base_url: cfg.razorpay_base_url.trim_end_matches('/').to_string(),
            verify_remote: cfg.razorpay_verify_remote,
        }
    }

    /// Registers the prospective charge with the provider so the hosted
    /// widget can collect payment against it.
    #[instrument(skip(self, customer), fields(receipt = %receipt))]
    pub async fn create_checkout(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
        customer: &CheckoutCustomer,
    ) -> Result<ProviderOrder, ServiceError> {
        let amount_paise = to_paise(amount)?;
        let body = serde_json::json!({
            "amount": amount_paise,
            "currency": currency,
            "receipt": receipt,
            "notes": {
                "customer_name": customer.name,
                "customer_email": customer.email,
                "customer_phone": customer.phone,
            },
        });

        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("provider unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::ExternalServiceError(format!(
                "provider order creation failed with status {status}"
            )));
        }

        let provider: RazorpayOrderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("malformed provider response: {e}")))?;

        info!(provider_order_id = %provider.id, amount_paise = provider.amount, "provider order created");
        Ok(ProviderOrder {
            provider_order_id: provider.id,
            amount_paise: provider.amount,
            currency: provider.currency,
        })
    }

    /// Independently re-verifies a success callback before any trust is
    /// extended: a signature check against the key secret, then (when remote
    /// verification is on) a provider-side fetch of the payment requiring a
    /// captured status, the expected order reference, and the expected amount.
    #[instrument(skip(self, callback), fields(provider_order_id = %callback.razorpay_order_id))]
    pub async fn verify_callback(
        &self,
        callback: &PaymentCallback,
        expected_amount: Decimal,
    ) -> Result<VerifiedPayment, ServiceError> {
        if !self.signature_matches(callback) {
            metrics::PAYMENT_VERIFICATION_FAILURES.inc();
            warn!(
                provider_order_id = %callback.razorpay_order_id,
                "callback signature mismatch"
            );
            return Err(ServiceError::PaymentVerificationFailed(
                "callback signature mismatch".to_string(),
            ));
        }

        if self.verify_remote {
            self.verify_with_provider(callback, expected_amount).await?;
        }

        info!(payment_id = %callback.razorpay_payment_id, "payment verified");
        Ok(VerifiedPayment {
            payment_id: callback.razorpay_payment_id.clone(),
            provider_order_id: callback.razorpay_order_id.clone(),
        })
    }

    /// HMAC-SHA256 over `"{order_id}|{payment_id}"`, compared in constant
    /// time via the Mac verifier.
    fn signature_matches(&self, callback: &PaymentCallback) -> bool {
        let Ok(expected) = hex::decode(&callback.razorpay_signature) else {
            return false;
        };
        let mut mac = match HmacSha256::new_from_slice(self.key_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(
            format!(
                "{}|{}",
                callback.razorpay_order_id, callback.razorpay_payment_id
            )
            .as_bytes(),
        );
        mac.verify_slice(&expected).is_ok()
    }

    async fn verify_with_provider(
        &self,
        callback: &PaymentCallback,
        expected_amount: Decimal,
    ) -> Result<(), ServiceError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/payments/{}",
                self.base_url, callback.razorpay_payment_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("provider unreachable: {e}")))?;

        if !response.status().is_success() {
            metrics::PAYMENT_VERIFICATION_FAILURES.inc();
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "provider returned status {} for payment lookup",
                response.status()
            )));
        }

        let payment: RazorpayPaymentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("malformed provider response: {e}")))?;

        if payment.status != "captured" {
            metrics::PAYMENT_VERIFICATION_FAILURES.inc();
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "payment {} is '{}', expected 'captured'",
                payment.id, payment.status
            )));
        }
        if payment.order_id != callback.razorpay_order_id {
            metrics::PAYMENT_VERIFICATION_FAILURES.inc();
            return Err(ServiceError::PaymentVerificationFailed(
                "payment belongs to a different provider order".to_string(),
            ));
        }
        let expected_paise = to_paise(expected_amount)?;
        if payment.amount != expected_paise {
            metrics::PAYMENT_VERIFICATION_FAILURES.inc();
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "payment amount {} does not match expected {}",
                payment.amount, expected_paise
            )));
        }
        Ok(())
    }
}

/// Converts a rupee amount to integer paise, the provider's wire unit.
pub fn to_paise(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {amount} out of range")))
}

/// Computes the callback signature for a given secret. Shared with tests and
/// local tooling that have to forge valid callbacks.
pub fn sign_callback(key_secret: &str, provider_order_id: &str, payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(format!("{provider_order_id}|{payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
