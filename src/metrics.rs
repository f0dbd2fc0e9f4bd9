use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    pub static ref ORDER_PLACEMENTS: IntCounter = register_int_counter!(
        "vastra_order_placements_total",
        "Total number of orders assembled from verified payments"
    )
    .expect("metric can be created");
    pub static ref ORDER_PLACEMENT_FAILURES: IntCounter = register_int_counter!(
        "vastra_order_placement_failures_total",
        "Total number of failed order assemblies"
    )
    .expect("metric can be created");
    pub static ref PAYMENT_VERIFICATION_FAILURES: IntCounter = register_int_counter!(
        "vastra_payment_verification_failures_total",
        "Total number of rejected payment callbacks"
    )
    .expect("metric can be created");
    pub static ref STOCK_CLAMPS: IntCounter = register_int_counter!(
        "vastra_stock_clamps_total",
        "Total number of stock decrements clamped at zero"
    )
    .expect("metric can be created");
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
