//! The order assembler: turns a consumed pending order plus a verified
//! payment into persisted order rows, exactly once per payment id.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    entities::order_item,
    entities::order_tracking,
    errors::ServiceError,
    events::{outbox, Event, EventSender},
    metrics,
    queries::order_rows::{self, OrderWithItems},
    services::carts::CartService,
    services::checkout::PendingOrder,
    services::payments::VerifiedPayment,
};

/// Persists orders and serves the nested read model for both the customer
/// and admin surfaces.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    carts: Arc<CartService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        carts: Arc<CartService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            carts,
        }
    }

    /// Commits a verified payment into an order.
    ///
    /// The header, its line items, and the initial tracking event are written
    /// in one transaction together with the outbox jobs for the best-effort
    /// side effects (stock decrement, buyer notification). If the rows cannot
    /// be written after the payment was verified, the caller gets a
    /// distinguishable reconciliation error rather than a generic failure.
    /// Repeated invocation with the same payment id returns the existing
    /// order unchanged.
    #[instrument(
        skip(self, pending, payment),
        fields(user_id = %pending.user_id, payment_id = %payment.payment_id)
    )]
    pub async fn place_order(
        &self,
        pending: PendingOrder,
        payment: VerifiedPayment,
    ) -> Result<OrderWithItems, ServiceError> {
        if let Some(existing) = self.find_by_payment_id(&payment.payment_id).await? {
            info!(
                order_id = %existing.id,
                "payment already has an order; replay is a no-op"
            );
            return self.fetch_required(existing.id).await;
        }

        let computed = pending.subtotal + pending.shipping_cost + pending.tax_amount
            - pending.discount_amount;
        if computed != pending.total_amount {
            return Err(ServiceError::InternalError(format!(
                "staged totals are inconsistent: computed {computed}, staged {}",
                pending.total_amount
            )));
        }

        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;
        match persist_order(&txn, order_id, &pending, &payment).await {
            Ok(()) => {
                if let Err(e) = txn.commit().await {
                    return self.recover_or_flag(e.into(), &payment).await;
                }
            }
            Err(e) => return self.recover_or_flag(e, &payment).await,
        }

        metrics::ORDER_PLACEMENTS.inc();
        info!(
            order_id = %order_id,
            order_number = %pending.order_number,
            total = %pending.total_amount,
            "order placed"
        );
        self.event_sender
            .send_best_effort(Event::OrderPlaced(order_id))
            .await;

        // Cart cleanup is best-effort: the order is payment-complete with or
        // without it.
        if let Err(e) = self.carts.clear(pending.user_id).await {
            warn!(user_id = %pending.user_id, error = %e, "cart cleanup failed after order placement");
        }

        self.fetch_required(order_id).await
    }

    #[instrument(skip(self))]
    pub async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        let existing = OrderEntity::find()
            .filter(order::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?;
        Ok(existing)
    }

    /// A single order for its owner. Another shopper's order id answers Not
    /// Found rather than Forbidden, so ids do not leak.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = order_rows::fetch_order(&self.db, order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(order)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_any(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        order_rows::fetch_order(&self.db, order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderWithItems>, ServiceError> {
        order_rows::fetch_orders_for_user(&self.db, user_id).await
    }

    /// Every order, for the admin dashboard. Same fold as the customer list.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<OrderWithItems>, ServiceError> {
        order_rows::fetch_all_orders(&self.db).await
    }

    async fn fetch_required(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        order_rows::fetch_order(&self.db, order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "order {order_id} vanished between write and read"
                ))
            })
    }

    /// The transaction failed after the payment was verified. A concurrent
    /// replay may have won the unique-payment-id race, in which case its
    /// order is the answer; otherwise the payment is flagged for manual
    /// reconciliation.
    async fn recover_or_flag(
        &self,
        err: ServiceError,
        payment: &VerifiedPayment,
    ) -> Result<OrderWithItems, ServiceError> {
        if let Ok(Some(existing)) = self.find_by_payment_id(&payment.payment_id).await {
            warn!(
                order_id = %existing.id,
                payment_id = %payment.payment_id,
                "concurrent placement won the payment-id race; returning its order"
            );
            return self.fetch_required(existing.id).await;
        }

        metrics::ORDER_PLACEMENT_FAILURES.inc();
        error!(
            error = %err,
            payment_id = %payment.payment_id,
            "order rows could not be written after verified payment"
        );
        self.event_sender
            .send_best_effort(Event::ReconciliationFlagged {
                payment_id: payment.payment_id.clone(),
            })
            .await;
        Err(ServiceError::ReconciliationRequired {
            payment_id: payment.payment_id.clone(),
        })
    }
}

async fn persist_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    pending: &PendingOrder,
    payment: &VerifiedPayment,
) -> Result<(), ServiceError> {
    let now = Utc::now();

    let header = order::ActiveModel {
        id: Set(order_id),
        order_number: Set(pending.order_number.clone()),
        user_id: Set(pending.user_id),
        status: Set(OrderStatus::Confirmed),
        payment_status: Set(PaymentStatus::Paid),
        total_amount: Set(pending.total_amount),
        shipping_cost: Set(pending.shipping_cost),
        tax_amount: Set(pending.tax_amount),
        discount_amount: Set(pending.discount_amount),
        currency: Set(pending.currency.clone()),
        recipient_name: Set(pending.address.recipient_name.clone()),
        phone: Set(pending.address.phone.clone()),
        address_line1: Set(pending.address.line1.clone()),
        address_line2: Set(pending.address.line2.clone()),
        city: Set(pending.address.city.clone()),
        state: Set(pending.address.state.clone()),
        postal_code: Set(pending.address.postal_code.clone()),
        country: Set(pending.address.country.clone()),
        notes: Set(pending.notes.clone()),
        payment_id: Set(payment.payment_id.clone()),
        created_at: Set(now),
        updated_at: Set(None),
    };
    header.insert(txn).await?;

    for line in &pending.lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name.clone()),
            sku: Set(line.sku.clone()),
            size: Set(line.size.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            created_at: Set(now),
        };
        item.insert(txn).await?;

        outbox::enqueue_stock_decrement(txn, order_id, line.product_id, line.quantity).await?;
    }

    let tracking = order_tracking::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(OrderStatus::Confirmed.to_string()),
        message: Set("Order Confirmed".to_string()),
        created_at: Set(now),
    };
    tracking.insert(txn).await?;

    outbox::enqueue_notification(
        txn,
        pending.user_id,
        "order_confirmed",
        "Order confirmed",
        &format!(
            "Your order {} has been confirmed and paid. We'll let you know when it ships.",
            pending.order_number
        ),
    )
    .await?;

    Ok(())
}
