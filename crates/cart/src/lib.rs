//! Cart aggregator domain module.
//!
//! Business rules for per-user carts: validated line items, last-write-wins
//! merge on `(product, color)`, derived totals and the pre-save price check.
//! Pure domain logic (no IO, no HTTP, no storage).

pub mod cart;
pub mod item;

pub use cart::{
    Cart, CartCommand, CartEmptied, CartEvent, CartId, CartOpened, EmptyCart, ItemsMerged,
    MergeItems, ProductRemoved, RemoveProduct,
};
pub use item::{CartItem, Color, LineKey, MAX_COLOR_LEN, MAX_QUANTITY, Quantity, RequestedItem};
