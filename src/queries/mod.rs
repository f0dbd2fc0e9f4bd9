pub mod order_rows;
