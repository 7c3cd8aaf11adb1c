//! Bookstore domain: value objects, aggregates, pricing rules and events.

pub mod aggregates;
pub mod claim_code;
pub mod discount;
pub mod events;
pub mod value_objects;
