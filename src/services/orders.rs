//! Order lifecycle
//!
//! Turns an active cart line into an order, freezes its discount and claim
//! code, and runs the staff and customer transitions. Every write is a single
//! store transaction that also queues its emails and notifications; those are
//! attempted right after commit and only ever soften the returned message.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::aggregates::{Book, NewOrder, Order, OrderError, OrderStatus};
use crate::domain::claim_code::{self, MAX_CLAIM_CODE_ATTEMPTS};
use crate::domain::discount::{self, DiscountBreakdown, DiscountInputs};
use crate::domain::events::{EmailMessage, OrderEvent};
use crate::domain::value_objects::{ClaimCode, DiscountRate, Money, Quantity};
use crate::store::{CartStore, CatalogStore, Constraint, OrderStore, SharedStore, SideEffect, StoreError};
use crate::workers::{DispatchReport, OutboxDispatcher};
use crate::{BookstoreError, Result, User};

const ORDER_NOT_FOUND: &str = "Order not found";
const CONCURRENT_CHANGE: &str = "The order was changed by another request; please try again.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub message: String,
    pub order_id: i64,
    pub claim_code: String,
    /// Applied discount as a percentage.
    pub discount_percentage: Decimal,
    pub discount: DiscountBreakdown,
    pub total_orders: usize,
    pub current_order_book_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub image_path: Option<String>,
    pub list_price: Option<Money>,
    pub quantity: u32,
    pub date_added: DateTime<Utc>,
    pub claim_code: String,
    pub discount_percentage: Decimal,
    pub unit_price: Option<Money>,
    pub total: Option<Money>,
    pub status: OrderStatus,
    pub is_purchased: bool,
    pub is_cancelled: bool,
}

impl OrderView {
    fn new(order: &Order, book: Option<&Book>) -> Self {
        Self {
            id: order.id(),
            user_id: order.user_id(),
            book_id: order.book_id(),
            title: book.map(|b| b.title.clone()),
            author: book.map(|b| b.author.clone()),
            image_path: book.and_then(|b| b.image_path.clone()),
            list_price: book.map(|b| b.price),
            quantity: order.quantity().value(),
            date_added: order.date_added(),
            claim_code: order.claim_code().to_string(),
            discount_percentage: order.discount().as_percent(),
            unit_price: book.map(|b| order.unit_price(b.price)),
            total: book.map(|b| order.total(b.price)),
            status: order.status(),
            is_purchased: order.is_purchased(),
            is_cancelled: order.is_cancelled(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersWithDiscount {
    pub orders: Vec<OrderView>,
    pub purchased_count: u64,
    /// Discount the next order would earn from the purchase tier alone.
    pub next_discount_percentage: Decimal,
    pub orders_until_next_discount: u64,
    pub next_reward_percentage: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub message: String,
    pub order: OrderView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub message: String,
    pub quantity: u32,
    pub is_cancelled: bool,
}

/// Source of fresh claim codes for new orders.
pub type ClaimCodeSource = Arc<dyn Fn() -> ClaimCode + Send + Sync>;

pub struct OrderLifecycle {
    store: SharedStore,
    dispatcher: Arc<OutboxDispatcher>,
    claim_codes: ClaimCodeSource,
}

impl OrderLifecycle {
    pub fn new(store: SharedStore, dispatcher: Arc<OutboxDispatcher>) -> Self {
        Self { store, dispatcher, claim_codes: Arc::new(claim_code::generate) }
    }

    pub fn with_claim_codes(mut self, source: impl Fn() -> ClaimCode + Send + Sync + 'static) -> Self {
        self.claim_codes = Arc::new(source);
        self
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Places an order for the caller's active cart line of `book_id`.
    pub async fn add_to_order(&self, user_id: i64, book_id: i64) -> Result<PlacedOrder> {
        if book_id <= 0 {
            return Err(BookstoreError::validation("Invalid book ID."));
        }
        let book = self.store.book(book_id).await?.ok_or_else(|| BookstoreError::not_found("Book not found"))?;
        let user = self.store.user(user_id).await?.ok_or_else(|| BookstoreError::not_found("User not found"))?;

        let existing = self.store.user_orders(user_id).await?;
        if existing.iter().any(|o| o.book_id() == book_id) {
            return Err(BookstoreError::rejected("This book is already in your orders."));
        }
        let line = self
            .store
            .active_line(user_id, book_id)
            .await?
            .ok_or_else(|| BookstoreError::rejected("This book is not in your cart."))?;

        let now = Utc::now();
        let purchases_before = self.store.purchased_count(user_id).await?;
        let breakdown = discount::compute(DiscountInputs {
            purchases_before,
            quantity: line.quantity.value(),
            sale: book.sale_discount(now),
        });

        let mut attempt = 0;
        let committed = loop {
            attempt += 1;
            let code = (self.claim_codes)();
            let order = NewOrder {
                user_id,
                book_id,
                cart_line_id: line.id,
                quantity: line.quantity,
                claim_code: code.clone(),
                discount: breakdown.applied,
                date_added: now,
            };
            let email = placed_email(&user, &book, line.quantity, breakdown.applied, &code);

            match self.store.place_order(order, vec![SideEffect::Email(email)]).await {
                Ok(committed) => break committed,
                Err(StoreError::Duplicate(Constraint::ClaimCode)) if attempt < MAX_CLAIM_CODE_ATTEMPTS => {
                    warn!(attempt, "Generated claim code collided, regenerating");
                }
                Err(StoreError::Duplicate(Constraint::ClaimCode)) => {
                    error!(user_id, book_id, attempts = attempt, "No unused claim code found");
                    return Err(BookstoreError::conflict("Could not allocate a claim code; please try again."));
                }
                Err(StoreError::Duplicate(Constraint::OrderPerBook)) => {
                    return Err(BookstoreError::rejected("This book is already in your orders."));
                }
                Err(StoreError::Stale(_)) => {
                    return Err(BookstoreError::conflict("Your cart changed while placing the order; please try again."));
                }
                Err(e) => {
                    error!(user_id, book_id, error = %e, "Failed to place order");
                    return Err(e.into());
                }
            }
        };

        let order = committed.value;
        log_event(&OrderEvent::Placed { order_id: order.id(), user_id });
        info!(
            order_id = order.id(),
            user_id,
            book_id,
            quantity = order.quantity().value(),
            discount = %breakdown.applied,
            source = ?breakdown.source,
            "Order placed"
        );

        let report = self.dispatcher.dispatch_now(&committed.outbox).await;
        let message = if report.email_failed {
            "Order placed successfully, but the confirmation email could not be sent.".to_string()
        } else {
            "Order placed successfully. A confirmation email has been sent.".to_string()
        };

        Ok(PlacedOrder {
            message,
            order_id: order.id(),
            claim_code: order.claim_code().to_string(),
            discount_percentage: breakdown.applied.as_percent(),
            discount: breakdown,
            total_orders: existing.len() + 1,
            current_order_book_count: order.quantity().value(),
        })
    }

    /// Staff redeem a claim code at the counter.
    pub async fn approve(&self, claim_code: &str) -> Result<TransitionOutcome> {
        let claim_code = claim_code.trim();
        if claim_code.is_empty() {
            return Err(BookstoreError::validation("Claim code is required."));
        }
        let mut order = self
            .store
            .order_by_claim_code(claim_code)
            .await?
            .ok_or_else(|| BookstoreError::not_found("No order matches this claim code."))?;
        let before = order.clone();

        order.approve().map_err(|e| match e {
            OrderError::AlreadyPurchased => BookstoreError::rejected("Order has already been purchased."),
            OrderError::Cancelled | OrderError::AlreadyCancelled => {
                BookstoreError::rejected("Order has been cancelled and cannot be approved.")
            }
            OrderError::NotOwner => BookstoreError::not_found(ORDER_NOT_FOUND),
        })?;

        let book = self.store.book(order.book_id()).await?;
        let user = self.store.user(order.user_id()).await?;
        let title = book.as_ref().map_or("your book", |b| b.title.as_str());

        let mut effects = vec![SideEffect::Notify {
            user_id: order.user_id(),
            message: format!("Your order for \"{title}\" has been approved. Enjoy your reading!"),
        }];
        match (&user, &book) {
            (Some(user), Some(book)) => effects.push(SideEffect::Email(approved_email(user, book, &order))),
            _ => warn!(order_id = order.id(), "Skipping approval email, user or book missing"),
        }

        let committed = self.store.save_order(&before, &order, effects).await.map_err(conflict_on_stale)?;
        for event in order.take_events() {
            log_event(&event);
        }

        let report = self.dispatcher.dispatch_now(&committed.outbox).await;
        Ok(TransitionOutcome {
            message: softened("Order approved successfully.", report),
            order: OrderView::new(&order, book.as_ref()),
        })
    }

    /// Gives back one copy; the order is cancelled when none are left.
    pub async fn cancel(&self, order_id: i64, user_id: i64) -> Result<CancelOutcome> {
        let mut order = self.owned_order(order_id, user_id).await?;
        let before = order.clone();

        let remaining = order.cancel_one().map_err(|e| match e {
            OrderError::AlreadyPurchased => BookstoreError::conflict("Purchased orders cannot be cancelled."),
            _ => BookstoreError::conflict("Order is already cancelled."),
        })?;

        self.store.save_order(&before, &order, vec![]).await.map_err(conflict_on_stale)?;
        for event in order.take_events() {
            log_event(&event);
        }

        let message = if order.is_cancelled() {
            "Order cancelled.".to_string()
        } else {
            format!("One copy cancelled; {remaining} remaining.")
        };
        Ok(CancelOutcome { message, quantity: remaining.value(), is_cancelled: order.is_cancelled() })
    }

    /// Deletes a pending order.
    pub async fn remove(&self, order_id: i64, user_id: i64) -> Result<()> {
        let mut order = self.owned_order(order_id, user_id).await?;

        order.remove().map_err(|e| match e {
            OrderError::AlreadyPurchased => BookstoreError::conflict("Purchased orders cannot be removed."),
            _ => BookstoreError::conflict("Cancelled orders cannot be removed."),
        })?;

        self.store.delete_order(&order).await.map_err(conflict_on_stale)?;
        for event in order.take_events() {
            log_event(&event);
        }
        Ok(())
    }

    /// Staff replace the claim code of an order.
    pub async fn update_claim_code(&self, order_id: i64, new_code: &str) -> Result<TransitionOutcome> {
        let code = ClaimCode::new(new_code).map_err(|e| BookstoreError::validation(e.to_string()))?;
        let mut order =
            self.store.order(order_id).await?.ok_or_else(|| BookstoreError::not_found(ORDER_NOT_FOUND))?;
        let book = self.store.book(order.book_id()).await?;

        if order.claim_code() == &code {
            return Ok(TransitionOutcome {
                message: "Claim code unchanged.".into(),
                order: OrderView::new(&order, book.as_ref()),
            });
        }
        if self.store.claim_code_taken(&code).await? {
            return Err(BookstoreError::conflict("Claim code is already used by another order."));
        }

        let before = order.clone();
        order.replace_claim_code(code);
        self.store.save_order(&before, &order, vec![]).await.map_err(|e| match e {
            StoreError::Duplicate(Constraint::ClaimCode) => {
                BookstoreError::conflict("Claim code is already used by another order.")
            }
            other => conflict_on_stale(other),
        })?;
        for event in order.take_events() {
            log_event(&event);
        }

        Ok(TransitionOutcome {
            message: "Claim code updated successfully.".into(),
            order: OrderView::new(&order, book.as_ref()),
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// An order of the caller; staff may read any order.
    pub async fn get_order(&self, order_id: i64, user_id: i64, is_staff: bool) -> Result<OrderView> {
        let order = if is_staff {
            self.store.order(order_id).await?.ok_or_else(|| BookstoreError::not_found(ORDER_NOT_FOUND))?
        } else {
            self.owned_order(order_id, user_id).await?
        };
        let book = self.store.book(order.book_id()).await?;
        Ok(OrderView::new(&order, book.as_ref()))
    }

    pub async fn user_orders(&self, user_id: i64) -> Result<Vec<OrderView>> {
        let orders = self.store.user_orders(user_id).await?;
        self.project(&orders).await
    }

    pub async fn all_orders(&self) -> Result<Vec<OrderView>> {
        let orders = self.store.orders().await?;
        self.project(&orders).await
    }

    /// The caller's orders with a preview of the purchase-tier discount ahead.
    pub async fn orders_with_discount(&self, user_id: i64) -> Result<OrdersWithDiscount> {
        let orders = self.user_orders(user_id).await?;
        let purchased_count = self.store.purchased_count(user_id).await?;
        let next = discount::compute(DiscountInputs {
            purchases_before: purchased_count,
            quantity: 1,
            sale: DiscountRate::ZERO,
        });
        let reward = discount::next_reward(purchased_count);
        Ok(OrdersWithDiscount {
            orders,
            purchased_count,
            next_discount_percentage: next.applied.as_percent(),
            orders_until_next_discount: reward.purchases_until,
            next_reward_percentage: reward.rate.as_percent(),
        })
    }

    async fn owned_order(&self, order_id: i64, user_id: i64) -> Result<Order> {
        let order =
            self.store.order(order_id).await?.ok_or_else(|| BookstoreError::not_found(ORDER_NOT_FOUND))?;
        order.ensure_owned_by(user_id).map_err(|_| BookstoreError::not_found(ORDER_NOT_FOUND))?;
        Ok(order)
    }

    async fn project(&self, orders: &[Order]) -> Result<Vec<OrderView>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let books: HashMap<i64, Book> = self.store.books().await?.into_iter().map(|b| (b.id, b)).collect();
        Ok(orders.iter().map(|o| OrderView::new(o, books.get(&o.book_id()))).collect())
    }
}

fn conflict_on_stale(e: StoreError) -> BookstoreError {
    match e {
        StoreError::Stale(_) => BookstoreError::conflict(CONCURRENT_CHANGE),
        other => {
            tracing::error!(error = %other, "Order write failed");
            other.into()
        }
    }
}

fn softened(base: &str, report: DispatchReport) -> String {
    match (report.push_failed, report.email_failed) {
        (false, false) => base.to_string(),
        (true, false) => format!("{base} The notification could not be delivered right now."),
        (false, true) => format!("{base} The confirmation email could not be sent right now."),
        (true, true) => format!("{base} The notification and confirmation email could not be delivered right now."),
    }
}

fn log_event(event: &OrderEvent) {
    info!(event = event.name(), order_id = event.order_id(), "Order event");
}

// =============================================================================
// Emails
// =============================================================================

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn placed_email(user: &User, book: &Book, quantity: Quantity, rate: DiscountRate, code: &ClaimCode) -> EmailMessage {
    let unit = book.price.discounted(rate).rounded();
    let total = unit.multiply(quantity.value()).rounded();
    let html_body = format!(
        "<h2>Thank you for your order, {name}!</h2>\
         <p>Your order has been placed and is ready to be collected in store.</p>\
         <table>\
         <tr><td>Book</td><td>{title}</td></tr>\
         <tr><td>Author</td><td>{author}</td></tr>\
         <tr><td>Quantity</td><td>{quantity}</td></tr>\
         <tr><td>List price</td><td>{list}</td></tr>\
         <tr><td>Discount</td><td>{rate}</td></tr>\
         <tr><td>Unit price after discount</td><td>{unit}</td></tr>\
         <tr><td>Total</td><td>{total}</td></tr>\
         </table>\
         <p>Show this claim code at the counter: <strong>{code}</strong></p>",
        name = escape_html(&user.user_name),
        title = escape_html(&book.title),
        author = escape_html(&book.author),
        list = book.price,
    );
    EmailMessage { to: user.email.clone(), subject: "Your Book Haven order".into(), html_body }
}

fn approved_email(user: &User, book: &Book, order: &Order) -> EmailMessage {
    let html_body = format!(
        "<h2>Order collected</h2>\
         <p>Hi {name}, your order for <em>{title}</em> ({quantity} x {unit}, total {total}) has been approved.</p>\
         <p>Claim code: <strong>{code}</strong></p>",
        name = escape_html(&user.user_name),
        title = escape_html(&book.title),
        quantity = order.quantity(),
        unit = order.unit_price(book.price),
        total = order.total(book.price),
        code = order.claim_code(),
    );
    EmailMessage { to: user.email.clone(), subject: "Your Book Haven order has been approved".into(), html_body }
}
