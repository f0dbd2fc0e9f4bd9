//! Flat-row to nested-order read model.
//!
//! Both the customer order list and the admin dashboard read orders through
//! the same LEFT JOIN projection (one row per order/item pair, item columns
//! null for orders with no lines) and the same [`group_orders`] fold.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Select,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
    entities::order_item,
    errors::ServiceError,
};

/// One row of the denormalized projection: an order header joined to at most
/// one line item. Header fields are optional because the projection is an
/// external view that may carry nulls; [`group_orders`] substitutes sentinels
/// so downstream code never branches on missing values.
#[derive(Debug, Clone, FromQueryResult)]
pub struct OrderRow {
    pub order_id: Uuid,
    pub order_number: Option<String>,
    pub user_id: Uuid,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub total_amount: Option<Decimal>,
    pub shipping_cost: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub recipient_name: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,

    // Line-item columns; null when the order has no items (left-join artifact)
    pub order_item_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub product_name: Option<String>,
    pub sku: Option<String>,
    pub size: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub size: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub shipping_cost: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub currency: String,
    pub recipient_name: String,
    pub phone: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub notes: String,
    pub payment_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

/// Folds flat rows into nested orders, keyed by `order_id`.
///
/// Rows for one order do not have to be contiguous; first-seen order of
/// `order_id` values is preserved. A pure function: the same rows always
/// produce structurally equal output.
pub fn group_orders(rows: Vec<OrderRow>) -> Vec<OrderWithItems> {
    let mut orders: Vec<OrderWithItems> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        let slot = match index.get(&row.order_id) {
            Some(&i) => i,
            None => {
                orders.push(materialize_header(&row));
                index.insert(row.order_id, orders.len() - 1);
                orders.len() - 1
            }
        };

        if let Some(item_id) = row.order_item_id {
            orders[slot].items.push(OrderItemView {
                id: item_id,
                product_id: row.product_id.unwrap_or_else(Uuid::nil),
                product_name: row.product_name.unwrap_or_default(),
                sku: row.sku.unwrap_or_default(),
                size: row.size.unwrap_or_default(),
                quantity: row.quantity.unwrap_or(0),
                unit_price: row.unit_price.unwrap_or(Decimal::ZERO),
            });
        }
    }

    orders
}

// Sentinel defaults: empty string for free text, `pending` for statuses,
// `INR` for currency, `India` for country.
fn materialize_header(row: &OrderRow) -> OrderWithItems {
    OrderWithItems {
        id: row.order_id,
        order_number: row.order_number.clone().unwrap_or_default(),
        user_id: row.user_id,
        status: row
            .status
            .as_ref()
            .and_then(|s| OrderStatus::try_from_value(s).ok())
            .unwrap_or(OrderStatus::Pending),
        payment_status: row
            .payment_status
            .as_ref()
            .and_then(|s| PaymentStatus::try_from_value(s).ok())
            .unwrap_or(PaymentStatus::Pending),
        total_amount: row.total_amount.unwrap_or(Decimal::ZERO),
        shipping_cost: row.shipping_cost.unwrap_or(Decimal::ZERO),
        tax_amount: row.tax_amount.unwrap_or(Decimal::ZERO),
        discount_amount: row.discount_amount.unwrap_or(Decimal::ZERO),
        currency: row.currency.clone().unwrap_or_else(|| "INR".to_string()),
        recipient_name: row.recipient_name.clone().unwrap_or_default(),
        phone: row.phone.clone().unwrap_or_default(),
        address_line1: row.address_line1.clone().unwrap_or_default(),
        address_line2: row.address_line2.clone().unwrap_or_default(),
        city: row.city.clone().unwrap_or_default(),
        state: row.state.clone().unwrap_or_default(),
        postal_code: row.postal_code.clone().unwrap_or_default(),
        country: row.country.clone().unwrap_or_else(|| "India".to_string()),
        notes: row.notes.clone().unwrap_or_default(),
        payment_id: row.payment_id.clone().unwrap_or_default(),
        created_at: row.created_at,
        items: Vec::new(),
    }
}

fn flat_rows_query() -> Select<OrderEntity> {
    OrderEntity::find()
        .select_only()
        .column_as(order::Column::Id, "order_id")
        .column(order::Column::OrderNumber)
        .column(order::Column::UserId)
        .column(order::Column::Status)
        .column(order::Column::PaymentStatus)
        .column(order::Column::TotalAmount)
        .column(order::Column::ShippingCost)
        .column(order::Column::TaxAmount)
        .column(order::Column::DiscountAmount)
        .column(order::Column::Currency)
        .column(order::Column::RecipientName)
        .column(order::Column::Phone)
        .column(order::Column::AddressLine1)
        .column(order::Column::AddressLine2)
        .column(order::Column::City)
        .column(order::Column::State)
        .column(order::Column::PostalCode)
        .column(order::Column::Country)
        .column(order::Column::Notes)
        .column(order::Column::PaymentId)
        .column(order::Column::CreatedAt)
        .column_as(order_item::Column::Id, "order_item_id")
        .column_as(order_item::Column::ProductId, "product_id")
        .column_as(order_item::Column::ProductName, "product_name")
        .column_as(order_item::Column::Sku, "sku")
        .column_as(order_item::Column::Size, "size")
        .column_as(order_item::Column::Quantity, "quantity")
        .column_as(order_item::Column::UnitPrice, "unit_price")
        .join(JoinType::LeftJoin, order::Relation::OrderItem.def())
        .order_by_desc(order::Column::CreatedAt)
        .order_by_asc(order::Column::Id)
        .order_by_asc(order_item::Column::CreatedAt)
}

/// Orders for one shopper, newest first.
pub async fn fetch_orders_for_user(
    db: &DatabaseConnection,
    user_id: Uuid,
) -> Result<Vec<OrderWithItems>, ServiceError> {
    let rows = flat_rows_query()
        .filter(order::Column::UserId.eq(user_id))
        .into_model::<OrderRow>()
        .all(db)
        .await?;
    Ok(group_orders(rows))
}

/// All orders, newest first. The admin dashboard uses the same fold as the
/// customer view; the surfaces differ only by filtering.
pub async fn fetch_all_orders(db: &DatabaseConnection) -> Result<Vec<OrderWithItems>, ServiceError> {
    let rows = flat_rows_query().into_model::<OrderRow>().all(db).await?;
    Ok(group_orders(rows))
}

/// A single order with its items.
pub async fn fetch_order(
    db: &DatabaseConnection,
    order_id: Uuid,
) -> Result<Option<OrderWithItems>, ServiceError> {
    let rows = flat_rows_query()
        .filter(order::Column::Id.eq(order_id))
        .into_model::<OrderRow>()
        .all(db)
        .await?;
    Ok(group_orders(rows).into_iter().next())
}
