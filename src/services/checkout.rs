//! Checkout staging: the short-lived pending order held between "proceed to
//! payment" and the provider callback.
//!
//! A [`PendingOrder`] never has a database identity. It lives in the
//! [`StagingStore`] under its shopper's id, is consumed atomically exactly
//! once when a callback arrives, and is discarded on every terminal outcome
//! so a stale draft can never be replayed into a second order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    entities::address::{self, Entity as AddressEntity, Model as AddressModel},
    entities::cart_item::{self, Entity as CartItemEntity},
    entities::product::Entity as ProductEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderService,
    services::payments::{
        CheckoutCustomer, PaymentCallback, PaymentOutcome, RazorpayGateway,
    },
};

/// One priced line of a pending order. `unit_price` is the snapshot that will
/// be copied onto the order line; it is never re-read after staging.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub size: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl PendingLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Shipping address copied out of the address book at staging time. Later
/// edits or deletions of the book entry never alter a staged or placed order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressSnapshot {
    pub recipient_name: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl From<&AddressModel> for AddressSnapshot {
    fn from(model: &AddressModel) -> Self {
        Self {
            recipient_name: model.recipient_name.clone(),
            phone: model.phone.clone(),
            line1: model.line1.clone(),
            line2: model.line2.clone(),
            city: model.city.clone(),
            state: model.state.clone(),
            postal_code: model.postal_code.clone(),
            country: model.country.clone(),
        }
    }
}

/// The transient draft of a prospective order. Exists only between payment
/// initiation and the terminal callback; owned by the staging store.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub user_id: Uuid,
    pub order_number: String,
    pub provider_order_id: String,
    pub address: AddressSnapshot,
    pub lines: Vec<PendingLine>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    pub staged_at: DateTime<Utc>,
}

/// Keyed staging slots, one per shopper. `consume` is a single atomic removal,
/// so a replayed success callback finds the slot already empty.
#[derive(Default)]
pub struct StagingStore {
    slots: DashMap<Uuid, PendingOrder>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a pending order, returning the previous slot if one was still
    /// dangling (a restarted checkout replaces its predecessor).
    pub fn stage(&self, pending: PendingOrder) -> Option<PendingOrder> {
        self.slots.insert(pending.user_id, pending)
    }

    /// Atomically takes the shopper's slot, leaving it empty.
    pub fn consume(&self, user_id: Uuid) -> Option<PendingOrder> {
        self.slots.remove(&user_id).map(|(_, pending)| pending)
    }

    /// Atomically takes the slot whose staged checkout matches a provider
    /// order id. Payment callbacks carry the provider reference, not the
    /// shopper id.
    pub fn consume_by_provider_order(&self, provider_order_id: &str) -> Option<PendingOrder> {
        let user_id = self
            .slots
            .iter()
            .find(|entry| entry.value().provider_order_id == provider_order_id)
            .map(|entry| *entry.key())?;
        self.slots
            .remove_if(&user_id, |_, pending| {
                pending.provider_order_id == provider_order_id
            })
            .map(|(_, pending)| pending)
    }

    /// Discards a slot on a terminal outcome. Same removal as `consume`; the
    /// separate name records intent at call sites.
    pub fn discard(&self, user_id: Uuid) -> Option<PendingOrder> {
        self.consume(user_id)
    }

    pub fn is_staged(&self, user_id: Uuid) -> bool {
        self.slots.contains_key(&user_id)
    }
}

/// Pricing knobs for staging, lifted out of [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub flat_shipping_fee: Decimal,
    pub free_shipping_threshold: Decimal,
}

impl CheckoutSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            flat_shipping_fee: Decimal::from(cfg.flat_shipping_fee_rupees),
            free_shipping_threshold: Decimal::from(cfg.free_shipping_threshold_rupees),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StageCheckoutRequest {
    /// Address book entry to ship to; the shopper's default address when
    /// omitted.
    pub address_id: Option<Uuid>,
    #[validate(email(message = "A valid email is required for the payment receipt"))]
    pub email: String,
    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

/// What the client needs to open the hosted payment widget.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StagedCheckout {
    pub order_number: String,
    pub provider_order_id: String,
    pub key_id: String,
    pub currency: String,
    pub lines: Vec<PendingLine>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

/// Response to the provider callback. `is_valid` is false whenever the
/// integrity check rejected the payload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentCallbackResponse {
    pub success: bool,
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

impl PaymentCallbackResponse {
    fn confirmed(order_id: Uuid) -> Self {
        Self {
            success: true,
            is_valid: true,
            order_id: Some(order_id),
        }
    }

    fn rejected() -> Self {
        Self {
            success: false,
            is_valid: false,
            order_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct AbortCheckoutRequest {
    /// `cancelled` when the shopper dismissed the widget, `failed` when the
    /// provider reported an error.
    #[serde(default)]
    pub outcome: AbortOutcome,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AbortOutcome {
    #[default]
    Cancelled,
    Failed,
}

/// Orchestrates staging, the provider round-trips, and handoff to the order
/// assembler once a callback has been verified.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    staging: Arc<StagingStore>,
    gateway: Arc<RazorpayGateway>,
    orders: Arc<OrderService>,
    event_sender: EventSender,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        staging: Arc<StagingStore>,
        gateway: Arc<RazorpayGateway>,
        orders: Arc<OrderService>,
        event_sender: EventSender,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            staging,
            gateway,
            orders,
            event_sender,
            settings,
        }
    }

    /// Prices the cart, snapshots the shipping address, registers the charge
    /// with the provider, and parks the result in the staging slot.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn stage_checkout(
        &self,
        user_id: Uuid,
        request: StageCheckoutRequest,
    ) -> Result<StagedCheckout, ServiceError> {
        request.validate()?;

        let lines = self.price_cart(user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cart is empty; nothing to check out".to_string(),
            ));
        }

        let address = self.resolve_address(user_id, request.address_id).await?;
        let totals = Totals::compute(&lines, &self.settings, Decimal::ZERO, Decimal::ZERO);
        let order_number = generate_order_number();

        let customer = CheckoutCustomer {
            name: address.recipient_name.clone(),
            email: request.email,
            phone: address.phone.clone(),
        };
        let provider = self
            .gateway
            .create_checkout(
                totals.total_amount,
                &self.settings.currency,
                &order_number,
                &customer,
            )
            .await?;

        let pending = PendingOrder {
            user_id,
            order_number: order_number.clone(),
            provider_order_id: provider.provider_order_id.clone(),
            address,
            lines: lines.clone(),
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            tax_amount: totals.tax_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            currency: self.settings.currency.clone(),
            notes: request.notes,
            staged_at: Utc::now(),
        };

        if let Some(previous) = self.staging.stage(pending) {
            warn!(
                user_id = %user_id,
                replaced_provider_order = %previous.provider_order_id,
                "restarted checkout replaced a dangling staging slot"
            );
            self.event_sender
                .send_best_effort(Event::CheckoutAborted {
                    user_id,
                    outcome: "replaced".to_string(),
                })
                .await;
        }
        self.event_sender
            .send_best_effort(Event::CheckoutStaged {
                user_id,
                total_amount: totals.total_amount,
            })
            .await;

        info!(
            user_id = %user_id,
            order_number = %order_number,
            total = %totals.total_amount,
            "checkout staged"
        );
        Ok(StagedCheckout {
            order_number,
            provider_order_id: provider.provider_order_id,
            key_id: self.gateway.key_id().to_string(),
            currency: self.settings.currency.clone(),
            lines,
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            tax_amount: totals.tax_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
        })
    }

    /// Discards the staging slot after the shopper dismissed the widget or
    /// the provider reported failure. Creates no order and touches no stock.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn abort_checkout(
        &self,
        user_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<bool, ServiceError> {
        let discarded = self.staging.discard(user_id);
        let label = match &outcome {
            PaymentOutcome::Cancelled => "cancelled".to_string(),
            PaymentOutcome::Failure { reason } => format!("failed: {reason}"),
            PaymentOutcome::Success { .. } => {
                return Err(ServiceError::InvalidOperation(
                    "A successful payment cannot abort checkout".to_string(),
                ))
            }
        };

        match discarded {
            Some(pending) => {
                info!(
                    user_id = %user_id,
                    provider_order_id = %pending.provider_order_id,
                    outcome = %label,
                    "staged checkout discarded"
                );
                self.event_sender
                    .send_best_effort(Event::CheckoutAborted {
                        user_id,
                        outcome: label,
                    })
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handles the provider's success callback end to end: consume the slot,
    /// independently verify the payment, and only then hand off to the order
    /// assembler. A replayed callback is answered with the existing order.
    #[instrument(skip(self, callback), fields(provider_order_id = %callback.razorpay_order_id))]
    pub async fn complete_payment(
        &self,
        callback: PaymentCallback,
    ) -> Result<PaymentCallbackResponse, ServiceError> {
        let Some(pending) = self
            .staging
            .consume_by_provider_order(&callback.razorpay_order_id)
        else {
            return self.answer_replay(&callback).await;
        };

        match self
            .gateway
            .verify_callback(&callback, pending.total_amount)
            .await
        {
            Ok(verified) => {
                self.event_sender
                    .send_best_effort(Event::PaymentVerified {
                        payment_id: verified.payment_id.clone(),
                    })
                    .await;
                let order = self.orders.place_order(pending, verified).await?;
                Ok(PaymentCallbackResponse::confirmed(order.id))
            }
            Err(ServiceError::PaymentVerificationFailed(reason)) => {
                // The slot stays discarded: a rejected callback is terminal.
                warn!(
                    provider_order_id = %callback.razorpay_order_id,
                    reason = %reason,
                    "payment callback rejected; staged checkout discarded"
                );
                self.event_sender
                    .send_best_effort(Event::PaymentRejected {
                        provider_order_id: callback.razorpay_order_id.clone(),
                        reason,
                    })
                    .await;
                Ok(PaymentCallbackResponse::rejected())
            }
            Err(err) => {
                // Indeterminate (provider unreachable): restore the slot so
                // the callback can be retried without losing the draft.
                self.staging.stage(pending);
                Err(err)
            }
        }
    }

    async fn answer_replay(
        &self,
        callback: &PaymentCallback,
    ) -> Result<PaymentCallbackResponse, ServiceError> {
        if let Some(existing) = self
            .orders
            .find_by_payment_id(&callback.razorpay_payment_id)
            .await?
        {
            match self
                .gateway
                .verify_callback(callback, existing.total_amount)
                .await
            {
                Ok(_) => {
                    info!(
                        order_id = %existing.id,
                        payment_id = %callback.razorpay_payment_id,
                        "replayed callback acknowledged with existing order"
                    );
                    return Ok(PaymentCallbackResponse::confirmed(existing.id));
                }
                Err(ServiceError::PaymentVerificationFailed(_)) => {
                    return Ok(PaymentCallbackResponse::rejected())
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            provider_order_id = %callback.razorpay_order_id,
            "callback matches no staged checkout and no existing order"
        );
        Ok(PaymentCallbackResponse::rejected())
    }

    async fn price_cart(&self, user_id: Uuid) -> Result<Vec<PendingLine>, ServiceError> {
        let cart = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(cart.len());
        for (item, product) in cart {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart line {} references missing product {}",
                    item.id, item.product_id
                ))
            })?;
            if !product.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "Product '{}' is no longer available",
                    product.name
                )));
            }
            if product.stock_quantity < item.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Only {} of '{}' left in stock",
                    product.stock_quantity, product.name
                )));
            }
            lines.push(PendingLine {
                product_id: product.id,
                product_name: product.name,
                sku: product.sku,
                size: item.size,
                quantity: item.quantity,
                unit_price: product.price,
            });
        }
        Ok(lines)
    }

    async fn resolve_address(
        &self,
        user_id: Uuid,
        address_id: Option<Uuid>,
    ) -> Result<AddressSnapshot, ServiceError> {
        let model = match address_id {
            Some(id) => AddressEntity::find_by_id(id)
                .filter(address::Column::UserId.eq(user_id))
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", id)))?,
            None => AddressEntity::find()
                .filter(address::Column::UserId.eq(user_id))
                .order_by_desc(address::Column::IsDefault)
                .order_by_desc(address::Column::CreatedAt)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "No shipping address on file; add one before checkout".to_string(),
                    )
                })?,
        };
        Ok(AddressSnapshot::from(&model))
    }
}

/// Computed money breakdown for a set of staged lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

impl Totals {
    /// `total = subtotal + shipping + tax - discount`, with shipping waived
    /// at or above the free-shipping threshold.
    pub fn compute(
        lines: &[PendingLine],
        settings: &CheckoutSettings,
        tax_amount: Decimal,
        discount_amount: Decimal,
    ) -> Self {
        let subtotal: Decimal = lines.iter().map(PendingLine::line_total).sum();
        let shipping_cost = if subtotal >= settings.free_shipping_threshold {
            Decimal::ZERO
        } else {
            settings.flat_shipping_fee
        };
        Self {
            subtotal,
            shipping_cost,
            tax_amount,
            discount_amount,
            total_amount: subtotal + shipping_cost + tax_amount - discount_amount,
        }
    }
}

/// Human-readable order reference, e.g. `VAS-4F2A91C3`.
pub fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("VAS-{suffix:08X}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> CheckoutSettings {
        CheckoutSettings {
            currency: "INR".to_string(),
            flat_shipping_fee: dec!(99),
            free_shipping_threshold: dec!(2500),
        }
    }

    fn line(quantity: i32, unit_price: Decimal) -> PendingLine {
        PendingLine {
            product_id: Uuid::new_v4(),
            product_name: "Silk Saree".to_string(),
            sku: "SAR-001".to_string(),
            size: "M".to_string(),
            quantity,
            unit_price,
        }
    }

    fn pending(user_id: Uuid, provider_order_id: &str) -> PendingOrder {
        let lines = vec![line(2, dec!(500)), line(1, dec!(1000))];
        let totals = Totals::compute(&lines, &settings(), Decimal::ZERO, Decimal::ZERO);
        PendingOrder {
            user_id,
            order_number: generate_order_number(),
            provider_order_id: provider_order_id.to_string(),
            address: AddressSnapshot {
                recipient_name: "Meera Iyer".to_string(),
                phone: "+91-9000000001".to_string(),
                line1: "14 Gandhi Road".to_string(),
                line2: None,
                city: "Chennai".to_string(),
                state: "Tamil Nadu".to_string(),
                postal_code: "600001".to_string(),
                country: "India".to_string(),
            },
            lines,
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            tax_amount: totals.tax_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            currency: "INR".to_string(),
            notes: None,
            staged_at: Utc::now(),
        }
    }

    #[test]
    fn totals_add_flat_shipping_below_threshold() {
        // 2 x 500 + 1 x 1000 = 2000, below the 2500 threshold.
        let lines = vec![line(2, dec!(500)), line(1, dec!(1000))];
        let totals = Totals::compute(&lines, &settings(), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(totals.subtotal, dec!(2000));
        assert_eq!(totals.shipping_cost, dec!(99));
        assert_eq!(totals.total_amount, dec!(2099));
    }

    #[test]
    fn totals_waive_shipping_at_threshold() {
        let lines = vec![line(1, dec!(2500))];
        let totals = Totals::compute(&lines, &settings(), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(totals.shipping_cost, Decimal::ZERO);
        assert_eq!(totals.total_amount, dec!(2500));
    }

    #[test]
    fn totals_respect_tax_and_discount() {
        let lines = vec![line(1, dec!(1000))];
        let totals = Totals::compute(&lines, &settings(), dec!(50), dec!(100));
        assert_eq!(totals.total_amount, dec!(1000) + dec!(99) + dec!(50) - dec!(100));
    }

    #[test]
    fn consume_is_exactly_once() {
        let store = StagingStore::new();
        let user_id = Uuid::new_v4();
        store.stage(pending(user_id, "order_rzp_1"));

        assert!(store.consume(user_id).is_some());
        assert!(store.consume(user_id).is_none());
    }

    #[test]
    fn consume_by_provider_order_finds_the_right_slot() {
        let store = StagingStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.stage(pending(alice, "order_rzp_a"));
        store.stage(pending(bob, "order_rzp_b"));

        let taken = store
            .consume_by_provider_order("order_rzp_b")
            .expect("slot should exist");
        assert_eq!(taken.user_id, bob);
        assert!(store.is_staged(alice));
        assert!(store.consume_by_provider_order("order_rzp_b").is_none());
    }

    #[test]
    fn restaging_replaces_the_previous_slot() {
        let store = StagingStore::new();
        let user_id = Uuid::new_v4();
        store.stage(pending(user_id, "order_rzp_old"));
        let previous = store.stage(pending(user_id, "order_rzp_new"));

        assert_eq!(
            previous.expect("old slot returned").provider_order_id,
            "order_rzp_old"
        );
        assert!(store.consume_by_provider_order("order_rzp_old").is_none());
        assert!(store.consume_by_provider_order("order_rzp_new").is_some());
    }

    #[test]
    fn order_numbers_have_the_published_shape() {
        let number = generate_order_number();
        assert!(number.starts_with("VAS-"));
        assert_eq!(number.len(), 12);
        assert!(number[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
