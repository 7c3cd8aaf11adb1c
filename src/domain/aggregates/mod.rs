//! Aggregates module
pub mod book;
pub mod cart;
pub mod order;

pub use book::{Book, BookError, Sale};
pub use cart::{CartError, CartLine, LineState};
pub use order::{NewOrder, Order, OrderError, OrderStatus};
