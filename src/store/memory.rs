//! In-memory storage
//!
//! One mutex guards the whole state, so every trait method runs as a single
//! transaction. Uniqueness and conditional writes behave like the Postgres
//! schema. Used by tests and by the binary when no database is configured.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    CartStore, CatalogStore, Committed, Constraint, ContactStore, InboxStore, OrderStore, OutboxEvent,
    OutboxStore, SideEffect, StoreError, StoreResult,
};
use crate::domain::aggregates::{Book, CartLine, LineState, NewOrder, Order, Sale};
use crate::domain::events::{Delivery, PushMessage};
use crate::domain::value_objects::{ClaimCode, Quantity};
use crate::{Banner, ContactSubmission, NewContact, Notification, Review, User};

#[derive(Debug, Clone)]
struct OutboxRecord {
    event: OutboxEvent,
    delivered_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    claimed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    users: BTreeMap<i64, User>,
    books: BTreeMap<i64, Book>,
    carts: BTreeMap<i64, CartLine>,
    orders: BTreeMap<i64, Order>,
    reviews: Vec<Review>,
    banners: Vec<Banner>,
    notifications: BTreeMap<i64, Notification>,
    contacts: Vec<ContactSubmission>,
    outbox: BTreeMap<i64, OutboxRecord>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn same_order_row(stored: &Order, expected: &Order) -> bool {
        stored.quantity() == expected.quantity()
            && stored.claim_code() == expected.claim_code()
            && stored.is_purchased() == expected.is_purchased()
            && stored.is_cancelled() == expected.is_cancelled()
    }

    /// Builds the notifications and outbox rows for `effects`; nothing is
    /// stored until [`State::commit_effects`].
    fn stage_effects(
        &mut self,
        effects: Vec<SideEffect>,
        now: DateTime<Utc>,
    ) -> (Vec<Notification>, Vec<OutboxEvent>) {
        let mut notifications = Vec::new();
        let mut outbox = Vec::with_capacity(effects.len());
        for effect in effects {
            let delivery = match effect {
                SideEffect::Email(message) => Delivery::Email(message),
                SideEffect::Notify { user_id, message } => {
                    let id = self.next_id();
                    notifications.push(Notification { id, user_id, message: message.clone(), timestamp: now, is_read: false });
                    Delivery::Push(PushMessage { user_id, notification_id: id, message })
                }
            };
            let id = self.next_id();
            outbox.push(OutboxEvent { id, delivery, attempts: 0, created_at: now });
        }
        (notifications, outbox)
    }

    fn commit_effects(&mut self, notifications: Vec<Notification>, outbox: &[OutboxEvent]) {
        for n in notifications {
            self.notifications.insert(n.id, n);
        }
        for event in outbox {
            let record =
                OutboxRecord { event: event.clone(), delivered_at: None, last_error: None, claimed_until: None };
            self.outbox.insert(event.id, record);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write fails as if the database were down.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    pub async fn insert_user(&self, user_name: &str, email: &str) -> User {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let user = User { id, user_name: user_name.into(), email: email.into(), profile_picture: None };
        state.users.insert(id, user.clone());
        user
    }

    /// Stores `book` under a fresh id and returns it.
    pub async fn insert_book(&self, mut book: Book) -> Book {
        let mut state = self.state.lock().await;
        book.id = state.next_id();
        state.books.insert(book.id, book.clone());
        book
    }

    pub async fn insert_review(&self, mut review: Review) -> Review {
        let mut state = self.state.lock().await;
        review.id = state.next_id();
        state.reviews.push(review.clone());
        review
    }

    pub async fn insert_banner(&self, mut banner: Banner) -> Banner {
        let mut state = self.state.lock().await;
        banner.id = state.next_id();
        state.banners.push(banner.clone());
        banner
    }

    /// Marks an order purchased directly, bypassing the lifecycle.
    pub async fn force_purchased(&self, order_id: i64) -> bool {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get(&order_id) else { return false };
        let mut order = order.clone();
        if order.approve().is_err() {
            return false;
        }
        order.take_events();
        state.orders.insert(order_id, order);
        true
    }

    pub async fn cart_lines(&self, user_id: i64) -> Vec<CartLine> {
        let state = self.state.lock().await;
        state.carts.values().filter(|l| l.user_id == user_id).cloned().collect()
    }

    pub async fn outbox(&self) -> Vec<(OutboxEvent, Option<DateTime<Utc>>, Option<String>)> {
        let state = self.state.lock().await;
        state
            .outbox
            .values()
            .map(|r| (r.event.clone(), r.delivered_at, r.last_error.clone()))
            .collect()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn book(&self, id: i64) -> StoreResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn books(&self) -> StoreResult<Vec<Book>> {
        Ok(self.state.lock().await.books.values().cloned().collect())
    }

    async fn save_sale(&self, book_id: i64, sale: Option<Sale>) -> StoreResult<Option<Book>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let Some(book) = state.books.get_mut(&book_id) else { return Ok(None) };
        match sale {
            Some(sale) => book.start_sale(sale),
            None => {
                book.clear_sale();
            }
        }
        Ok(Some(book.clone()))
    }

    async fn clear_expired_sales(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<i64>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let mut expired: Vec<&mut Book> = state.books.values_mut().filter(|b| b.sale_expired(now)).collect();
        expired.sort_by_key(|b| b.sale.map(|s| s.ends_at()));
        Ok(expired
            .into_iter()
            .take(limit as usize)
            .filter_map(|book| book.clear_sale().then_some(book.id))
            .collect())
    }

    async fn reviews(&self, book_id: i64) -> StoreResult<Vec<Review>> {
        let state = self.state.lock().await;
        let mut reviews: Vec<Review> = state
            .reviews
            .iter()
            .filter(|r| r.book_id == book_id)
            .map(|r| {
                let user = state.users.get(&r.user_id);
                Review {
                    user_name: user.map(|u| u.user_name.clone()),
                    user_email: user.map(|u| u.email.clone()),
                    ..r.clone()
                }
            })
            .collect();
        reviews.sort_by(|a, b| b.date_posted.cmp(&a.date_posted));
        Ok(reviews)
    }

    async fn active_banners(&self, now: DateTime<Utc>) -> StoreResult<Vec<Banner>> {
        let state = self.state.lock().await;
        let mut banners: Vec<Banner> = state.banners.iter().filter(|b| b.is_visible_at(now)).cloned().collect();
        banners.sort_by_key(|b| b.start_time);
        Ok(banners)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn active_line(&self, user_id: i64, book_id: i64) -> StoreResult<Option<CartLine>> {
        let state = self.state.lock().await;
        Ok(state
            .carts
            .values()
            .find(|l| l.user_id == user_id && l.book_id == book_id && l.is_active())
            .cloned())
    }

    async fn active_lines(&self, user_id: i64) -> StoreResult<Vec<CartLine>> {
        let state = self.state.lock().await;
        let mut lines: Vec<CartLine> =
            state.carts.values().filter(|l| l.user_id == user_id && l.is_active()).cloned().collect();
        lines.sort_by_key(|l| l.date_added);
        Ok(lines)
    }

    async fn add_to_line(
        &self,
        user_id: i64,
        book_id: i64,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> StoreResult<CartLine> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(line) =
            state.carts.values_mut().find(|l| l.user_id == user_id && l.book_id == book_id && l.is_active())
        {
            line.quantity =
                line.quantity.checked_add(quantity.value()).ok_or(StoreError::OutOfRange("cart quantity"))?;
            return Ok(line.clone());
        }
        let id = state.next_id();
        let line = CartLine { id, user_id, book_id, quantity, date_added: now, state: LineState::Active };
        state.carts.insert(id, line.clone());
        Ok(line)
    }

    async fn set_line_quantity(
        &self,
        user_id: i64,
        book_id: i64,
        quantity: Quantity,
    ) -> StoreResult<Option<CartLine>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        Ok(state
            .carts
            .values_mut()
            .find(|l| l.user_id == user_id && l.book_id == book_id && l.is_active())
            .map(|line| {
                line.quantity = quantity;
                line.clone()
            }))
    }

    async fn move_line(
        &self,
        user_id: i64,
        book_id: i64,
        from: LineState,
        to: LineState,
    ) -> StoreResult<Option<CartLine>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let target = state
            .carts
            .values()
            .filter(|l| l.user_id == user_id && l.book_id == book_id && l.state == from)
            .max_by_key(|l| (l.date_added, l.id))
            .map(|l| l.id);
        let Some(id) = target else { return Ok(None) };
        if to == LineState::Active
            && state.carts.values().any(|l| l.id != id && l.user_id == user_id && l.book_id == book_id && l.is_active())
        {
            return Err(StoreError::Duplicate(Constraint::ActiveCartLine));
        }
        Ok(state.carts.get_mut(&id).map(|line| {
            line.state = to;
            line.clone()
        }))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn order(&self, id: i64) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_claim_code(&self, code: &str) -> StoreResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.claim_code().as_str() == code).cloned())
    }

    async fn orders(&self) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| (b.date_added(), b.id()).cmp(&(a.date_added(), a.id())));
        Ok(orders)
    }

    async fn user_orders(&self, user_id: i64) -> StoreResult<Vec<Order>> {
        Ok(self.orders().await?.into_iter().filter(|o| o.user_id() == user_id).collect())
    }

    async fn purchased_count(&self, user_id: i64) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state.orders.values().filter(|o| o.user_id() == user_id && o.is_purchased()).count() as u64)
    }

    async fn claim_code_taken(&self, code: &ClaimCode) -> StoreResult<bool> {
        let state = self.state.lock().await;
        Ok(state.orders.values().any(|o| o.claim_code() == code))
    }

    async fn place_order(&self, order: NewOrder, effects: Vec<SideEffect>) -> StoreResult<Committed<Order>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        let line_matches = state.carts.get(&order.cart_line_id).is_some_and(|l| {
            l.is_active() && l.user_id == order.user_id && l.book_id == order.book_id && l.quantity == order.quantity
        });
        if !line_matches {
            return Err(StoreError::Stale("cart line"));
        }
        if state.orders.values().any(|o| o.user_id() == order.user_id && o.book_id() == order.book_id) {
            return Err(StoreError::Duplicate(Constraint::OrderPerBook));
        }
        if state.orders.values().any(|o| o.claim_code() == &order.claim_code) {
            return Err(StoreError::Duplicate(Constraint::ClaimCode));
        }

        let (now, line_id) = (order.date_added, order.cart_line_id);
        let id = state.next_id();
        let created = Order::from_new(id, order);
        let (notifications, outbox) = state.stage_effects(effects, now);

        if let Some(line) = state.carts.get_mut(&line_id) {
            line.state = LineState::Removed;
        }
        state.orders.insert(id, created.clone());
        state.commit_effects(notifications, &outbox);

        Ok(Committed { value: created, outbox })
    }

    async fn save_order(
        &self,
        before: &Order,
        after: &Order,
        effects: Vec<SideEffect>,
    ) -> StoreResult<Committed<()>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        let current = state.orders.get(&before.id()).ok_or(StoreError::Stale("order"))?;
        if !State::same_order_row(current, before) {
            return Err(StoreError::Stale("order"));
        }
        if after.claim_code() != before.claim_code()
            && state.orders.values().any(|o| o.id() != before.id() && o.claim_code() == after.claim_code())
        {
            return Err(StoreError::Duplicate(Constraint::ClaimCode));
        }

        let (notifications, outbox) = state.stage_effects(effects, Utc::now());
        let mut stored = after.clone();
        stored.take_events();
        state.orders.insert(before.id(), stored);
        state.commit_effects(notifications, &outbox);

        Ok(Committed { value: (), outbox })
    }

    async fn delete_order(&self, before: &Order) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let removable = state
            .orders
            .get(&before.id())
            .is_some_and(|o| o.quantity() == before.quantity() && !o.is_purchased() && !o.is_cancelled());
        if !removable {
            return Err(StoreError::Stale("order"));
        }
        state.orders.remove(&before.id());
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn claim_deliveries(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        claim_until: DateTime<Utc>,
        max_attempts: u32,
        limit: u32,
    ) -> StoreResult<Vec<OutboxEvent>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let mut due: Vec<&mut OutboxRecord> = state
            .outbox
            .values_mut()
            .filter(|r| {
                r.delivered_at.is_none()
                    && r.event.attempts < max_attempts
                    && r.event.created_at < created_before
                    && r.claimed_until.map_or(true, |until| until <= now)
            })
            .collect();
        due.sort_by_key(|r| (r.event.created_at, r.event.id));
        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|r| {
                r.claimed_until = Some(claim_until);
                r.event.clone()
            })
            .collect())
    }

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(record) = state.outbox.get_mut(&id) {
            record.event.attempts += 1;
            record.delivered_at = Some(at);
            record.last_error = None;
            record.claimed_until = None;
        }
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(record) = state.outbox.get_mut(&id) {
            record.event.attempts += 1;
            record.last_error = Some(error.to_string());
            record.claimed_until = None;
        }
        Ok(())
    }

    async fn prune_delivered(&self, delivered_before: DateTime<Utc>) -> StoreResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let before = state.outbox.len();
        state.outbox.retain(|_, r| r.delivered_at.map_or(true, |at| at >= delivered_before));
        Ok((before - state.outbox.len()) as u64)
    }
}

#[async_trait]
impl InboxStore for MemoryStore {
    async fn notifications(&self, user_id: i64) -> StoreResult<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut list: Vec<Notification> =
            state.notifications.values().filter(|n| n.user_id == user_id).cloned().collect();
        list.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(list)
    }

    async fn mark_read(&self, id: i64, user_id: i64) -> StoreResult<Option<Notification>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        Ok(state.notifications.get_mut(&id).filter(|n| n.user_id == user_id).map(|n| {
            n.is_read = true;
            n.clone()
        }))
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn save_contact(&self, contact: NewContact, at: DateTime<Utc>) -> StoreResult<ContactSubmission> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let submission = ContactSubmission {
            id: state.next_id(),
            name: contact.name,
            email: contact.email,
            subject: contact.subject,
            message: contact.message,
            submitted_at: at,
        };
        state.contacts.push(submission.clone());
        Ok(submission)
    }
}
