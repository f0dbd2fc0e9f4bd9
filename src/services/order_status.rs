//! Order status lifecycle: an explicit transition table, one tracking event
//! per accepted transition, and deletion rules for terminal orders.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::order_tracking::{self, Entity as OrderTrackingEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::notifications::NotificationService,
};

/// The allowed transition graph:
/// `pending -> confirmed -> processing -> shipped -> delivered`, with
/// `cancelled` reachable from `pending` or `confirmed` only. Everything else,
/// including repeating the current status, is rejected.
pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, Processing)
            | (Processing, Shipped)
            | (Shipped, Delivered)
            | (Pending, Cancelled)
            | (Confirmed, Cancelled)
    )
}

/// Deletion is permitted only once an order can no longer move.
pub fn is_terminal(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Cancelled | OrderStatus::Delivered)
}

fn tracking_message(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "Order Pending",
        OrderStatus::Confirmed => "Order Confirmed",
        OrderStatus::Processing => "Order Processing",
        OrderStatus::Shipped => "Order Shipped",
        OrderStatus::Delivered => "Order Delivered",
        OrderStatus::Cancelled => "Order Cancelled",
    }
}

fn notification_body(status: OrderStatus, order_number: &str) -> (String, String) {
    let title = format!("Order {}", status);
    let message = match status {
        OrderStatus::Processing => format!("Your order {order_number} is being prepared."),
        OrderStatus::Shipped => format!("Your order {order_number} is on its way."),
        OrderStatus::Delivered => format!("Your order {order_number} has been delivered."),
        OrderStatus::Cancelled => format!("Your order {order_number} has been cancelled."),
        _ => format!("Your order {order_number} is now {status}."),
    };
    (title, message)
}

/// Advances orders along the transition table. Every accepted transition
/// appends exactly one tracking event in the same transaction, then emits
/// exactly one best-effort notification.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    notifications: Arc<NotificationService>,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifications,
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn advance(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let old_status = current.status;

        if !transition_allowed(old_status, new_status) {
            return Err(ServiceError::InvalidStatusTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        let order_number = current.order_number.clone();
        let user_id = current.user_id;

        let mut active: order::ActiveModel = current.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        let tracking = order_tracking::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(new_status.to_string()),
            message: Set(tracking_message(new_status).to_string()),
            created_at: Set(Utc::now()),
        };
        tracking.insert(&txn).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status,
            "order status advanced"
        );

        let (title, message) = notification_body(new_status, &order_number);
        self.notifications
            .create_best_effort(user_id, "order_status", &title, &message)
            .await;
        self.event_sender
            .send_best_effort(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Customer-triggered cancellation: same table, plus an ownership check.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn cancel_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        self.require_owned(user_id, order_id).await?;
        self.advance(order_id, OrderStatus::Cancelled).await
    }

    /// Removes a terminal order with its line items and tracking trail in one
    /// transaction.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !is_terminal(current.status) {
            return Err(ServiceError::InvalidOperation(format!(
                "Only cancelled or delivered orders can be deleted; order is '{}'",
                current.status
            )));
        }

        OrderTrackingEntity::delete_many()
            .filter(order_tracking::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        OrderEntity::delete_by_id(order_id).exec(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, "order deleted");
        self.event_sender
            .send_best_effort(Event::OrderDeleted(order_id))
            .await;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn delete_for_user(&self, user_id: Uuid, order_id: Uuid) -> Result<(), ServiceError> {
        self.require_owned(user_id, order_id).await?;
        self.delete_order(order_id).await
    }

    async fn require_owned(&self, user_id: Uuid, order_id: Uuid) -> Result<(), ServiceError> {
        OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use OrderStatus::*;

    #[test_case(Pending, Confirmed => true; "pending to confirmed")]
    #[test_case(Confirmed, Processing => true; "confirmed to processing")]
    #[test_case(Processing, Shipped => true; "processing to shipped")]
    #[test_case(Shipped, Delivered => true; "shipped to delivered")]
    #[test_case(Pending, Cancelled => true; "pending can cancel")]
    #[test_case(Confirmed, Cancelled => true; "confirmed can cancel")]
    #[test_case(Processing, Cancelled => false; "processing cannot cancel")]
    #[test_case(Shipped, Cancelled => false; "shipped cannot cancel")]
    #[test_case(Delivered, Cancelled => false; "delivered cannot cancel")]
    #[test_case(Delivered, Shipped => false; "no going backwards")]
    #[test_case(Pending, Shipped => false; "no skipping ahead")]
    #[test_case(Confirmed, Confirmed => false; "repeating is rejected")]
    #[test_case(Cancelled, Confirmed => false; "cancelled is final")]
    fn transition_table(from: OrderStatus, to: OrderStatus) -> bool {
        transition_allowed(from, to)
    }

    #[test]
    fn only_cancelled_and_delivered_are_terminal() {
        assert!(is_terminal(Cancelled));
        assert!(is_terminal(Delivered));
        for status in [Pending, Confirmed, Processing, Shipped] {
            assert!(!is_terminal(status));
        }
    }

    #[test]
    fn every_status_has_a_tracking_message() {
        for status in [Pending, Confirmed, Processing, Shipped, Delivered, Cancelled] {
            assert!(!tracking_message(status).is_empty());
        }
    }
}
