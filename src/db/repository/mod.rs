//! Repository layer: entity-scoped database operations.
//!
//! All public functions are re-exported here.

mod administration;
mod barcode;
mod order;

pub use administration::*;
pub use barcode::*;
pub use order::{discontinue_order, get_active_orders, get_order, insert_order, update_order_schedule};
