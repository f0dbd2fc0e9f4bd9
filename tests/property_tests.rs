//! Property-based tests for the order read-model fold and checkout totals.
//!
//! These use proptest to verify invariants across a wide range of inputs,
//! catching edge cases that example-based tests miss.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use vastra_api::queries::order_rows::{group_orders, OrderRow};
use vastra_api::services::checkout::{CheckoutSettings, PendingLine, Totals};

fn bare_row(order_id: Uuid) -> OrderRow {
    OrderRow {
        order_id,
        order_number: Some(format!("VAS-{}", &order_id.simple().to_string()[..8])),
        user_id: Uuid::new_v4(),
        status: Some("confirmed".to_string()),
        payment_status: Some("paid".to_string()),
        total_amount: Some(Decimal::from(100)),
        shipping_cost: Some(Decimal::ZERO),
        tax_amount: Some(Decimal::ZERO),
        discount_amount: Some(Decimal::ZERO),
        currency: Some("INR".to_string()),
        recipient_name: Some("Meera Iyer".to_string()),
        phone: Some("+91-9000000001".to_string()),
        address_line1: Some("14 Gandhi Road".to_string()),
        address_line2: None,
        city: Some("Chennai".to_string()),
        state: Some("Tamil Nadu".to_string()),
        postal_code: Some("600001".to_string()),
        country: Some("India".to_string()),
        notes: None,
        payment_id: Some(format!("pay_{}", order_id.simple())),
        created_at: Utc::now(),
        order_item_id: None,
        product_id: None,
        product_name: None,
        sku: None,
        size: None,
        quantity: None,
        unit_price: None,
    }
}

fn item_row(order_id: Uuid, price: i64, quantity: i32) -> OrderRow {
    let mut row = bare_row(order_id);
    row.order_item_id = Some(Uuid::new_v4());
    row.product_id = Some(Uuid::new_v4());
    row.product_name = Some("Silk Saree".to_string());
    row.sku = Some("SAR-001".to_string());
    row.size = Some("M".to_string());
    row.quantity = Some(quantity);
    row.unit_price = Some(Decimal::from(price));
    row
}

/// A handful of orders, each with zero to three item rows, in an arbitrary
/// interleaving. Zero-item orders appear as a single left-join row with null
/// item columns.
fn rows_strategy() -> impl Strategy<Value = Vec<OrderRow>> {
    proptest::collection::vec((0usize..4, 1i64..5_000, 1i32..10), 1..6)
        .prop_map(|specs| {
            specs
                .into_iter()
                .flat_map(|(n_items, price, quantity)| {
                    let order_id = Uuid::new_v4();
                    if n_items == 0 {
                        vec![bare_row(order_id)]
                    } else {
                        (0..n_items)
                            .map(|_| item_row(order_id, price, quantity))
                            .collect()
                    }
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn grouping_the_same_rows_twice_is_identical(rows in rows_strategy()) {
        let first = group_orders(rows.clone());
        let second = group_orders(rows);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn every_item_row_lands_in_its_order(rows in rows_strategy()) {
        let mut expected: HashMap<Uuid, usize> = HashMap::new();
        for row in &rows {
            if row.order_item_id.is_some() {
                *expected.entry(row.order_id).or_default() += 1;
            }
        }

        let grouped = group_orders(rows);
        for order in &grouped {
            let want = expected.get(&order.id).copied().unwrap_or(0);
            prop_assert_eq!(order.items.len(), want, "order {} item count", order.id);
        }

        let total_expected: usize = expected.values().sum();
        let total_grouped: usize = grouped.iter().map(|o| o.items.len()).sum();
        prop_assert_eq!(total_grouped, total_expected);
    }

    #[test]
    fn each_order_appears_exactly_once(rows in rows_strategy()) {
        let distinct: HashSet<Uuid> = rows.iter().map(|r| r.order_id).collect();
        let grouped = group_orders(rows);

        prop_assert_eq!(grouped.len(), distinct.len());
        let ids: HashSet<Uuid> = grouped.iter().map(|o| o.id).collect();
        prop_assert_eq!(ids, distinct);
    }

    #[test]
    fn first_seen_order_of_ids_is_preserved(rows in rows_strategy()) {
        let mut expected = Vec::new();
        for row in &rows {
            if !expected.contains(&row.order_id) {
                expected.push(row.order_id);
            }
        }

        let grouped = group_orders(rows);
        let actual: Vec<Uuid> = grouped.iter().map(|o| o.id).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn null_header_fields_never_surface_as_nulls(order_count in 1usize..5) {
        let rows: Vec<OrderRow> = (0..order_count)
            .map(|_| {
                let mut row = bare_row(Uuid::new_v4());
                row.order_number = None;
                row.status = None;
                row.payment_status = None;
                row.country = None;
                row.currency = None;
                row.notes = None;
                row
            })
            .collect();

        for order in group_orders(rows) {
            prop_assert!(order.items.is_empty());
            prop_assert_eq!(&order.country, "India");
            prop_assert_eq!(&order.currency, "INR");
            prop_assert_eq!(order.status.to_string(), "pending");
        }
    }
}

fn settings() -> CheckoutSettings {
    CheckoutSettings {
        currency: "INR".to_string(),
        flat_shipping_fee: Decimal::from(99),
        free_shipping_threshold: Decimal::from(2500),
    }
}

fn pending_line(price: i64, quantity: i32) -> PendingLine {
    PendingLine {
        product_id: Uuid::new_v4(),
        product_name: "Kurta".to_string(),
        sku: "KUR-001".to_string(),
        size: "M".to_string(),
        quantity,
        unit_price: Decimal::from(price),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn total_is_subtotal_plus_shipping_plus_tax_minus_discount(
        specs in proptest::collection::vec((1i64..5_000, 1i32..10), 1..6),
        tax in 0i64..500,
        discount in 0i64..500,
    ) {
        let lines: Vec<PendingLine> = specs
            .into_iter()
            .map(|(price, quantity)| pending_line(price, quantity))
            .collect();
        let settings = settings();
        let totals = Totals::compute(
            &lines,
            &settings,
            Decimal::from(tax),
            Decimal::from(discount),
        );

        let subtotal: Decimal = lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();
        prop_assert_eq!(totals.subtotal, subtotal);
        prop_assert_eq!(
            totals.total_amount,
            totals.subtotal + totals.shipping_cost + totals.tax_amount - totals.discount_amount
        );
    }

    #[test]
    fn shipping_is_waived_exactly_at_the_threshold(
        price in 1i64..10_000,
        quantity in 1i32..4,
    ) {
        let lines = vec![pending_line(price, quantity)];
        let settings = settings();
        let totals = Totals::compute(&lines, &settings, Decimal::ZERO, Decimal::ZERO);

        if totals.subtotal >= settings.free_shipping_threshold {
            prop_assert_eq!(totals.shipping_cost, Decimal::ZERO);
        } else {
            prop_assert_eq!(totals.shipping_cost, settings.flat_shipping_fee);
        }
    }
}
