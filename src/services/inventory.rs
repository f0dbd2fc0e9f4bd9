use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
};

/// Outcome of one stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub remaining: i32,
    pub oversold: bool,
}

/// The stock ledger. All mutation goes through a conditional update so the
/// quantity can never go negative, regardless of how many checkouts race on
/// the same product.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Decrements available stock for a product by `quantity`.
    ///
    /// The guarded update only succeeds while enough stock remains. When the
    /// guard fails the quantity is clamped at zero and the product is flagged
    /// oversold for manual reconciliation; the order itself is already
    /// payment-complete, so this never surfaces as a caller error.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn decrement(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<StockDecrement, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Decrement quantity must be positive".to_string(),
            ));
        }

        let db = &*self.db;

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            // Not enough stock (or no such product): clamp and flag.
            let clamped = ProductEntity::update_many()
                .col_expr(product::Column::StockQuantity, Expr::value(0))
                .col_expr(product::Column::Oversold, Expr::value(true))
                .filter(product::Column::Id.eq(product_id))
                .exec(db)
                .await?;

            if clamped.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Product {} not found",
                    product_id
                )));
            }

            warn!(
                product_id = %product_id,
                requested = quantity,
                "stock decrement clamped at zero; flagged oversold"
            );
            metrics::STOCK_CLAMPS.inc();
            self.event_sender
                .send_best_effort(Event::StockClamped {
                    product_id,
                    requested: quantity,
                })
                .await;

            return Ok(StockDecrement {
                remaining: 0,
                oversold: true,
            });
        }

        let remaining = self
            .get_product(product_id)
            .await?
            .map(|p| p.stock_quantity)
            .unwrap_or(0);

        info!(
            product_id = %product_id,
            quantity = quantity,
            remaining = remaining,
            "stock decremented"
        );
        self.event_sender
            .send_best_effort(Event::StockDecremented {
                product_id,
                quantity,
                remaining,
            })
            .await;

        Ok(StockDecrement {
            remaining,
            oversold: false,
        })
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<ProductModel>, ServiceError> {
        let product = ProductEntity::find_by_id(product_id).one(&*self.db).await?;
        Ok(product)
    }
}
