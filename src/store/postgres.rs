//! PostgreSQL storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};

use super::{
    CartStore, CatalogStore, Committed, Constraint, ContactStore, InboxStore, OrderStore, OutboxEvent,
    OutboxStore, SideEffect, StoreError, StoreResult,
};
use crate::domain::aggregates::{Book, CartLine, LineState, NewOrder, Order, Sale};
use crate::domain::events::{Delivery, PushMessage};
use crate::domain::value_objects::{ClaimCode, DiscountRate, Money, Quantity};
use crate::{Banner, ContactSubmission, NewContact, Notification, Review, User};

const ORDER_COLUMNS: &str =
    "id, user_id, book_id, quantity, date_added, claim_code, discount_percentage, is_purchased, is_cancelled";
const BOOK_COLUMNS: &str = "id, title, author, isbn, price, publication_year, description, category, image_path, \
     is_on_sale, discount_percentage, sale_start_date, sale_end_date";
const CART_COLUMNS: &str = "id, user_id, book_id, quantity, date_added, is_removed";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct BookRow {
    id: i64,
    title: String,
    author: String,
    isbn: String,
    price: Decimal,
    publication_year: i32,
    description: String,
    category: String,
    image_path: Option<String>,
    is_on_sale: bool,
    discount_percentage: Decimal,
    sale_start_date: Option<DateTime<Utc>>,
    sale_end_date: Option<DateTime<Utc>>,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        let sale = match (row.is_on_sale, row.sale_start_date, row.sale_end_date) {
            (true, Some(start), Some(end)) => match Sale::new(row.discount_percentage, start, end) {
                Ok(sale) => Some(sale),
                Err(e) => {
                    tracing::warn!(book_id = row.id, error = %e, "Ignoring invalid sale stored on book");
                    None
                }
            },
            _ => None,
        };
        Book {
            id: row.id,
            title: row.title,
            author: row.author,
            isbn: row.isbn,
            price: Money::new(row.price),
            publication_year: row.publication_year,
            description: row.description,
            category: row.category,
            image_path: row.image_path,
            sale,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: i64,
    user_id: i64,
    book_id: i64,
    quantity: i32,
    date_added: DateTime<Utc>,
    is_removed: bool,
}

impl TryFrom<CartRow> for CartLine {
    type Error = StoreError;

    fn try_from(row: CartRow) -> StoreResult<Self> {
        Ok(CartLine {
            id: row.id,
            user_id: row.user_id,
            book_id: row.book_id,
            quantity: quantity(row.quantity, "carts")?,
            date_added: row.date_added,
            state: LineState::from_removed_flag(row.is_removed),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    book_id: i64,
    quantity: i32,
    date_added: DateTime<Utc>,
    claim_code: String,
    discount_percentage: Decimal,
    is_purchased: bool,
    is_cancelled: bool,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> StoreResult<Self> {
        let claim_code = ClaimCode::new(row.claim_code)
            .map_err(|e| StoreError::Corrupt(format!("orders.claim_code of {}: {e}", row.id)))?;
        let discount = DiscountRate::new(row.discount_percentage)
            .map_err(|e| StoreError::Corrupt(format!("orders.discount_percentage of {}: {e}", row.id)))?;
        Ok(Order::restore(
            row.id,
            row.user_id,
            row.book_id,
            quantity(row.quantity, "orders")?,
            row.date_added,
            claim_code,
            discount,
            row.is_purchased,
            row.is_cancelled,
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    payload: serde_json::Value,
    attempts: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> StoreResult<Self> {
        Ok(OutboxEvent {
            id: row.id,
            delivery: serde_json::from_value(row.payload)?,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            created_at: row.created_at,
        })
    }
}

fn quantity(value: i32, table: &str) -> StoreResult<Quantity> {
    u32::try_from(value)
        .map(Quantity::new)
        .map_err(|_| StoreError::Corrupt(format!("{table}.quantity is negative: {value}")))
}

/// Maps unique violations on known constraints to [`StoreError::Duplicate`].
fn map_unique(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let constraint = match db.constraint() {
                Some("orders_user_book") => Some(Constraint::OrderPerBook),
                Some("orders_claim_code") => Some(Constraint::ClaimCode),
                Some("carts_active_line") => Some(Constraint::ActiveCartLine),
                _ => None,
            };
            if let Some(constraint) = constraint {
                return StoreError::Duplicate(constraint);
            }
        }
    }
    StoreError::Database(e)
}

fn to_i32(q: Quantity) -> StoreResult<i32> {
    i32::try_from(q.value()).map_err(|_| StoreError::OutOfRange("quantity"))
}

/// Maps `numeric_value_out_of_range` (an INTEGER column overflowing) to
/// [`StoreError::OutOfRange`].
fn map_out_of_range(e: sqlx::Error, what: &'static str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22003") => StoreError::OutOfRange(what),
        _ => StoreError::Database(e),
    }
}

async fn apply_effects(conn: &mut PgConnection, effects: Vec<SideEffect>) -> StoreResult<Vec<OutboxEvent>> {
    let mut queued = Vec::with_capacity(effects.len());
    for effect in effects {
        let delivery = match effect {
            SideEffect::Email(message) => Delivery::Email(message),
            SideEffect::Notify { user_id, message } => {
                let notification = sqlx::query_as::<_, Notification>(
                    "INSERT INTO notifications (user_id, message, timestamp, is_read) VALUES ($1, $2, NOW(), FALSE) \
                     RETURNING id, user_id, message, timestamp, is_read",
                )
                .bind(user_id)
                .bind(&message)
                .fetch_one(&mut *conn)
                .await?;
                Delivery::Push(PushMessage { user_id, notification_id: notification.id, message })
            }
        };
        let row = sqlx::query_as::<_, OutboxRow>(
            "INSERT INTO outbox_events (channel, payload, attempts, created_at) VALUES ($1, $2, 0, NOW()) \
             RETURNING id, payload, attempts, created_at",
        )
        .bind(delivery.channel())
        .bind(serde_json::to_value(&delivery)?)
        .fetch_one(&mut *conn)
        .await?;
        queued.push(OutboxEvent::try_from(row)?);
    }
    Ok(queued)
}

// =============================================================================
// Catalog
// =============================================================================

#[async_trait]
impl CatalogStore for PgStore {
    async fn user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT id, user_name, email, profile_picture FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn book(&self, id: i64) -> StoreResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Book::from))
    }

    async fn books(&self) -> StoreResult<Vec<Book>> {
        let rows = sqlx::query_as::<_, BookRow>(&format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Book::from).collect())
    }

    async fn save_sale(&self, book_id: i64, sale: Option<Sale>) -> StoreResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            "UPDATE books SET is_on_sale = $2, discount_percentage = $3, sale_start_date = $4, sale_end_date = $5 \
             WHERE id = $1 RETURNING {BOOK_COLUMNS}"
        ))
        .bind(book_id)
        .bind(sale.is_some())
        .bind(sale.map_or(Decimal::ZERO, |s| s.discount().as_percent()))
        .bind(sale.map(|s| s.starts_at()))
        .bind(sale.map(|s| s.ends_at()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Book::from))
    }

    async fn clear_expired_sales(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<i64>> {
        // SKIP LOCKED lets two sweepers share the work instead of blocking.
        let ids: Vec<(i64,)> = sqlx::query_as(
            "UPDATE books SET is_on_sale = FALSE, discount_percentage = 0, sale_start_date = NULL, sale_end_date = NULL \
             WHERE id IN (SELECT id FROM books WHERE is_on_sale AND sale_end_date < $1 \
                          ORDER BY sale_end_date LIMIT $2 FOR UPDATE SKIP LOCKED) \
             RETURNING id",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn reviews(&self, book_id: i64) -> StoreResult<Vec<Review>> {
        Ok(sqlx::query_as::<_, Review>(
            "SELECT r.id, r.user_id, r.book_id, r.rating, r.comment, r.date_posted, \
                    u.user_name AS user_name, u.email AS user_email \
             FROM reviews r LEFT JOIN users u ON u.id = r.user_id \
             WHERE r.book_id = $1 ORDER BY r.date_posted DESC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn active_banners(&self, now: DateTime<Utc>) -> StoreResult<Vec<Banner>> {
        Ok(sqlx::query_as::<_, Banner>(
            "SELECT id, message, start_time, end_time, is_active, is_deleted FROM banners \
             WHERE is_active AND NOT is_deleted AND start_time <= $1 AND end_time >= $1 ORDER BY start_time",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }
}

// =============================================================================
// Cart
// =============================================================================

#[async_trait]
impl CartStore for PgStore {
    async fn active_line(&self, user_id: i64, book_id: i64) -> StoreResult<Option<CartLine>> {
        sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1 AND book_id = $2 AND NOT is_removed"
        ))
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?
        .map(CartLine::try_from)
        .transpose()
    }

    async fn active_lines(&self, user_id: i64) -> StoreResult<Vec<CartLine>> {
        sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1 AND NOT is_removed ORDER BY date_added"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CartLine::try_from)
        .collect()
    }

    async fn add_to_line(
        &self,
        user_id: i64,
        book_id: i64,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> StoreResult<CartLine> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            "INSERT INTO carts (user_id, book_id, quantity, date_added, is_removed) VALUES ($1, $2, $3, $4, FALSE) \
             ON CONFLICT (user_id, book_id) WHERE NOT is_removed \
             DO UPDATE SET quantity = carts.quantity + EXCLUDED.quantity \
             RETURNING {CART_COLUMNS}"
        ))
        .bind(user_id)
        .bind(book_id)
        .bind(to_i32(quantity)?)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_out_of_range(e, "cart quantity"))?;
        CartLine::try_from(row)
    }

    async fn set_line_quantity(
        &self,
        user_id: i64,
        book_id: i64,
        quantity: Quantity,
    ) -> StoreResult<Option<CartLine>> {
        sqlx::query_as::<_, CartRow>(&format!(
            "UPDATE carts SET quantity = $3 WHERE user_id = $1 AND book_id = $2 AND NOT is_removed \
             RETURNING {CART_COLUMNS}"
        ))
        .bind(user_id)
        .bind(book_id)
        .bind(to_i32(quantity)?)
        .fetch_optional(&self.pool)
        .await?
        .map(CartLine::try_from)
        .transpose()
    }

    async fn move_line(
        &self,
        user_id: i64,
        book_id: i64,
        from: LineState,
        to: LineState,
    ) -> StoreResult<Option<CartLine>> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            "UPDATE carts SET is_removed = $4 \
             WHERE id = (SELECT id FROM carts WHERE user_id = $1 AND book_id = $2 AND is_removed = $3 \
                         ORDER BY date_added DESC, id DESC LIMIT 1) \
             RETURNING {CART_COLUMNS}"
        ))
        .bind(user_id)
        .bind(book_id)
        .bind(from.is_removed())
        .bind(to.is_removed())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique)?;
        row.map(CartLine::try_from).transpose()
    }
}

// =============================================================================
// Orders
// =============================================================================

#[async_trait]
impl OrderStore for PgStore {
    async fn order(&self, id: i64) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn order_by_claim_code(&self, code: &str) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE claim_code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn orders(&self) -> StoreResult<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY date_added DESC, id DESC"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn user_orders(&self, user_id: i64) -> StoreResult<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY date_added DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    async fn purchased_count(&self, user_id: i64) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1 AND is_purchased")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn claim_code_taken(&self, code: &ClaimCode) -> StoreResult<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM orders WHERE claim_code = $1)")
            .bind(code.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn place_order(&self, order: NewOrder, effects: Vec<SideEffect>) -> StoreResult<Committed<Order>> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            "UPDATE carts SET is_removed = TRUE \
             WHERE id = $1 AND user_id = $2 AND book_id = $3 AND quantity = $4 AND NOT is_removed",
        )
        .bind(order.cart_line_id)
        .bind(order.user_id)
        .bind(order.book_id)
        .bind(to_i32(order.quantity)?)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if consumed == 0 {
            return Err(StoreError::Stale("cart line"));
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (user_id, book_id, quantity, date_added, claim_code, discount_percentage, is_purchased, is_cancelled) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, FALSE) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.user_id)
        .bind(order.book_id)
        .bind(to_i32(order.quantity)?)
        .bind(order.date_added)
        .bind(order.claim_code.as_str())
        .bind(order.discount.fraction())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;
        let created = Order::try_from(row)?;

        let outbox = apply_effects(&mut tx, effects).await?;
        tx.commit().await?;

        Ok(Committed { value: created, outbox })
    }

    async fn save_order(
        &self,
        before: &Order,
        after: &Order,
        effects: Vec<SideEffect>,
    ) -> StoreResult<Committed<()>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders SET quantity = $2, claim_code = $3, is_purchased = $4, is_cancelled = $5 \
             WHERE id = $1 AND quantity = $6 AND claim_code = $7 AND is_purchased = $8 AND is_cancelled = $9",
        )
        .bind(before.id())
        .bind(to_i32(after.quantity())?)
        .bind(after.claim_code().as_str())
        .bind(after.is_purchased())
        .bind(after.is_cancelled())
        .bind(to_i32(before.quantity())?)
        .bind(before.claim_code().as_str())
        .bind(before.is_purchased())
        .bind(before.is_cancelled())
        .execute(&mut *tx)
        .await
        .map_err(map_unique)?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::Stale("order"));
        }

        let outbox = apply_effects(&mut tx, effects).await?;
        tx.commit().await?;

        Ok(Committed { value: (), outbox })
    }

    async fn delete_order(&self, before: &Order) -> StoreResult<()> {
        let deleted = sqlx::query(
            "DELETE FROM orders WHERE id = $1 AND quantity = $2 AND NOT is_purchased AND NOT is_cancelled",
        )
        .bind(before.id())
        .bind(to_i32(before.quantity())?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if deleted == 0 {
            return Err(StoreError::Stale("order"));
        }
        Ok(())
    }
}

// =============================================================================
// Outbox, notifications, contact
// =============================================================================

#[async_trait]
impl OutboxStore for PgStore {
    async fn claim_deliveries(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        max_attempts: u32,
        limit: u32,
    ) -> StoreResult<Vec<OutboxEvent>> {
        // SKIP LOCKED keeps concurrent dispatchers off each other's rows; the
        // lease keeps them off rows another dispatcher is still delivering.
        let mut events = sqlx::query_as::<_, OutboxRow>(
            "UPDATE outbox_events SET claimed_until = $3 \
             WHERE id IN (SELECT id FROM outbox_events \
                          WHERE delivered_at IS NULL AND attempts < $4 AND created_at < $2 \
                            AND (claimed_until IS NULL OR claimed_until <= $1) \
                          ORDER BY created_at, id LIMIT $5 FOR UPDATE SKIP LOCKED) \
             RETURNING id, payload, attempts, created_at",
        )
        .bind(now)
        .bind(created_before)
        .bind(claim_until)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(OutboxEvent::try_from)
        .collect::<StoreResult<Vec<_>>>()?;
        // RETURNING does not keep the subquery order.
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE outbox_events \
             SET delivered_at = $2, attempts = attempts + 1, last_error = NULL, claimed_until = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE outbox_events SET attempts = attempts + 1, last_error = $2, claimed_until = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_delivered(&self, delivered_before: DateTime<Utc>) -> StoreResult<u64> {
        let pruned = sqlx::query("DELETE FROM outbox_events WHERE delivered_at IS NOT NULL AND delivered_at < $1")
            .bind(delivered_before)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(pruned)
    }
}

#[async_trait]
impl InboxStore for PgStore {
    async fn notifications(&self, user_id: i64) -> StoreResult<Vec<Notification>> {
        Ok(sqlx::query_as::<_, Notification>(
            "SELECT id, user_id, message, timestamp, is_read FROM notifications \
             WHERE user_id = $1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn mark_read(&self, id: i64, user_id: i64) -> StoreResult<Option<Notification>> {
        Ok(sqlx::query_as::<_, Notification>(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2 \
             RETURNING id, user_id, message, timestamp, is_read",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl ContactStore for PgStore {
    async fn save_contact(&self, contact: NewContact, at: DateTime<Utc>) -> StoreResult<ContactSubmission> {
        Ok(sqlx::query_as::<_, ContactSubmission>(
            "INSERT INTO contacts (name, email, subject, message, submitted_at) VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, name, email, subject, message, submitted_at",
        )
        .bind(contact.name)
        .bind(contact.email)
        .bind(contact.subject)
        .bind(contact.message)
        .bind(at)
        .fetch_one(&self.pool)
        .await?)
    }
}
