use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::cart_item::{self, Entity as CartItemEntity, Model as CartItemModel},
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 16, message = "Size is required"))]
    pub size: String,
    #[validate(range(min = 1, max = 50, message = "Quantity must be between 1 and 50"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 50, message = "Quantity must be between 1 and 50"))]
    pub quantity: i32,
}

/// One cart line joined with the live product it points at. Prices here are
/// informational; the purchase-time snapshot is taken at checkout staging.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub size: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub in_stock: bool,
}

/// Shopper cart operations. Lines stay mutable until checkout staging begins;
/// the order assembler clears them once an order is confirmed.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %user_id, product_id = %request.product_id))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        request: AddCartItemRequest,
    ) -> Result<CartItemModel, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let product = ProductEntity::find_by_id(request.product_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;
        if !product.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Product '{}' is no longer available",
                product.name
            )));
        }

        // Same product and size collapses into one line.
        let existing = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(request.product_id))
            .filter(cart_item::Column::Size.eq(request.size.clone()))
            .one(db)
            .await?;

        let saved = match existing {
            Some(line) => {
                let merged = line.quantity + request.quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(merged);
                active.update(db).await?
            }
            None => {
                let active = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(request.product_id),
                    size: Set(request.size),
                    quantity: Set(request.quantity),
                    created_at: Set(Utc::now()),
                    updated_at: Set(None),
                };
                active.insert(db).await?
            }
        };

        info!(cart_item_id = %saved.id, quantity = saved.quantity, "cart line saved");
        Ok(saved)
    }

    #[instrument(skip(self, request), fields(user_id = %user_id, cart_item_id = %item_id))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        request: UpdateCartItemRequest,
    ) -> Result<CartItemModel, ServiceError> {
        request.validate()?;

        let line = self.find_owned(user_id, item_id).await?;
        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(request.quantity);
        let updated = active.update(&*self.db).await?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(user_id = %user_id, cart_item_id = %item_id))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let line = self.find_owned(user_id, item_id).await?;
        CartItemEntity::delete_by_id(line.id).exec(&*self.db).await?;
        Ok(())
    }

    /// Lists the shopper's cart, oldest line first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<CartLineView>, ServiceError> {
        let lines = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(lines.len());
        for (line, product) in lines {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart line {} references missing product {}",
                    line.id, line.product_id
                ))
            })?;
            views.push(CartLineView {
                id: line.id,
                product_id: product.id,
                product_name: product.name,
                sku: product.sku,
                size: line.size,
                quantity: line.quantity,
                unit_price: product.price,
                line_total: product.price * Decimal::from(line.quantity),
                in_stock: product.is_active && product.stock_quantity >= line.quantity,
            });
        }
        Ok(views)
    }

    /// Removes every line for the shopper. Used by the order assembler after
    /// a confirmed order; failure there is logged, never propagated.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn find_owned(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        CartItemEntity::find_by_id(item_id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds_are_enforced() {
        let too_many = AddCartItemRequest {
            product_id: Uuid::new_v4(),
            size: "M".to_string(),
            quantity: 51,
        };
        assert!(too_many.validate().is_err());

        let none = UpdateCartItemRequest { quantity: 0 };
        assert!(none.validate().is_err());
    }

    #[test]
    fn size_must_be_present() {
        let request = AddCartItemRequest {
            product_id: Uuid::new_v4(),
            size: String::new(),
            quantity: 1,
        };
        assert!(request.validate().is_err());
    }
}
