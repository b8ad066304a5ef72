//! Orders domain module.
//!
//! Converts a cart into an immutable order snapshot with a payment intent, and
//! owns the order status lifecycle. Pure domain logic (no IO, no HTTP, no
//! storage).

pub mod order;
pub mod payment;

pub use order::{
    AdvanceStatus, Order, OrderCommand, OrderEvent, OrderId, OrderItem, OrderPlaced, OrderStatus,
    OrderStatusChanged, PlaceOrder,
};
pub use payment::{Currency, PaymentIntent, PaymentMethod, PaymentStatus};
