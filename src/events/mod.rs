use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

pub mod outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging delivery failure instead of surfacing it.
    /// Event emission is observability, never control flow.
    pub async fn send_best_effort(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event delivery failed");
        }
    }
}

// The events that can occur in the fulfillment workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Checkout events
    CheckoutStaged {
        user_id: Uuid,
        total_amount: Decimal,
    },
    CheckoutAborted {
        user_id: Uuid,
        outcome: String,
    },

    // Payment events
    PaymentVerified {
        payment_id: String,
    },
    PaymentRejected {
        provider_order_id: String,
        reason: String,
    },

    // Order events
    OrderPlaced(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderDeleted(Uuid),

    /// Payment captured but the order rows could not be written.
    ReconciliationFlagged {
        payment_id: String,
    },

    // Inventory events
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
        remaining: i32,
    },
    StockClamped {
        product_id: Uuid,
        requested: i32,
    },
}

/// Receiver loop for the in-process event bus. Spawned once at startup.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ReconciliationFlagged { payment_id } => {
                warn!(payment_id = %payment_id, "order flagged for manual reconciliation");
            }
            Event::StockClamped {
                product_id,
                requested,
            } => {
                warn!(
                    product_id = %product_id,
                    requested = requested,
                    "stock decrement clamped at zero; product oversold"
                );
            }
            Event::PaymentRejected {
                provider_order_id,
                reason,
            } => {
                warn!(
                    provider_order_id = %provider_order_id,
                    reason = %reason,
                    "payment callback rejected"
                );
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }

    info!("Event processing loop stopped");
}
