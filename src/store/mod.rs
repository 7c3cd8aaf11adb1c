//! Storage seams
//!
//! Every method is one transaction. Multi-row writes (placing an order,
//! order transitions with their side effects) are all-or-nothing; rows are
//! never left half-written.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::aggregates::{Book, CartLine, LineState, NewOrder, Order, Sale};
use crate::domain::events::{Delivery, EmailMessage};
use crate::domain::value_objects::{ClaimCode, Quantity};
use crate::{Banner, ContactSubmission, NewContact, Notification, Review, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Unique constraints the services react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    OrderPerBook,
    ClaimCode,
    ActiveCartLine,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderPerBook => write!(f, "order for this book"),
            Self::ClaimCode => write!(f, "claim code"),
            Self::ActiveCartLine => write!(f, "active cart line"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {0}")]
    Duplicate(Constraint),

    /// A conditional write found the row in a different state than expected.
    #[error("{0} was modified concurrently")]
    Stale(&'static str),

    /// A value does not fit the column it is written to.
    #[error("{0} out of range")]
    OutOfRange(&'static str),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Side effect recorded in the same transaction as the write that causes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Email(EmailMessage),
    /// Persists a notification for the user and queues its real-time push.
    Notify { user_id: i64, message: String },
}

/// A delivery waiting in (or taken from) the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: i64,
    pub delivery: Delivery,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Result of a committed write together with the deliveries it queued.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub outbox: Vec<OutboxEvent>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn user(&self, id: i64) -> StoreResult<Option<User>>;

    async fn book(&self, id: i64) -> StoreResult<Option<Book>>;

    async fn books(&self) -> StoreResult<Vec<Book>>;

    /// Replaces the sale of a book. `None` when the book does not exist.
    async fn save_sale(&self, book_id: i64, sale: Option<Sale>) -> StoreResult<Option<Book>>;

    /// Clears up to `limit` sales that ended before `now` and returns the
    /// affected book ids. Safe to run concurrently with itself.
    async fn clear_expired_sales(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<i64>>;

    async fn reviews(&self, book_id: i64) -> StoreResult<Vec<Review>>;

    async fn active_banners(&self, now: DateTime<Utc>) -> StoreResult<Vec<Banner>>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn active_line(&self, user_id: i64, book_id: i64) -> StoreResult<Option<CartLine>>;

    async fn active_lines(&self, user_id: i64) -> StoreResult<Vec<CartLine>>;

    /// Adds to the active line, creating one when there is none.
    async fn add_to_line(
        &self,
        user_id: i64,
        book_id: i64,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> StoreResult<CartLine>;

    async fn set_line_quantity(
        &self,
        user_id: i64,
        book_id: i64,
        quantity: Quantity,
    ) -> StoreResult<Option<CartLine>>;

    /// Moves the newest line in state `from` to state `to`.
    async fn move_line(
        &self,
        user_id: i64,
        book_id: i64,
        from: LineState,
        to: LineState,
    ) -> StoreResult<Option<CartLine>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn order(&self, id: i64) -> StoreResult<Option<Order>>;

    async fn order_by_claim_code(&self, code: &str) -> StoreResult<Option<Order>>;

    async fn orders(&self) -> StoreResult<Vec<Order>>;

    async fn user_orders(&self, user_id: i64) -> StoreResult<Vec<Order>>;

    /// Orders of the user with the purchased flag set.
    async fn purchased_count(&self, user_id: i64) -> StoreResult<u64>;

    async fn claim_code_taken(&self, code: &ClaimCode) -> StoreResult<bool>;

    /// Consumes the cart line named by `order.cart_line_id`, inserts the order
    /// and records `effects`. The line must still be active with the same
    /// quantity, otherwise [`StoreError::Stale`].
    async fn place_order(&self, order: NewOrder, effects: Vec<SideEffect>) -> StoreResult<Committed<Order>>;

    /// Writes `after` if the stored row still matches `before`.
    async fn save_order(
        &self,
        before: &Order,
        after: &Order,
        effects: Vec<SideEffect>,
    ) -> StoreResult<Committed<()>>;

    /// Deletes a pending order if the stored row still matches `before`.
    async fn delete_order(&self, before: &Order) -> StoreResult<()>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims undelivered events created before `created_before` with fewer
    /// than `max_attempts` attempts, oldest first. A claimed row is skipped by
    /// other claimers until `claim_until` passes or its attempt is recorded.
    async fn claim_deliveries(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        max_attempts: u32,
        limit: u32,
    ) -> StoreResult<Vec<OutboxEvent>>;

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    async fn record_failure(&self, id: i64, error: &str) -> StoreResult<()>;

    /// Deletes events delivered before `delivered_before`; returns how many.
    async fn prune_delivered(&self, delivered_before: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn notifications(&self, user_id: i64) -> StoreResult<Vec<Notification>>;

    async fn mark_read(&self, id: i64, user_id: i64) -> StoreResult<Option<Notification>>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn save_contact(&self, contact: NewContact, at: DateTime<Utc>) -> StoreResult<ContactSubmission>;
}

/// Everything the services need from storage.
pub trait Store: CatalogStore + CartStore + OrderStore + OutboxStore + InboxStore + ContactStore {}

impl<T> Store for T where T: CatalogStore + CartStore + OrderStore + OutboxStore + InboxStore + ContactStore {}

pub type SharedStore = Arc<dyn Store>;
