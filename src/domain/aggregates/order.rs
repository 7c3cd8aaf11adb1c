//! Order Aggregate
//!
//! ```text
//! Pending --approve--> Purchased
//! Pending --cancel---> Pending(quantity - 1) ... --> Cancelled   (quantity hits 0)
//! Pending --remove---> deleted
//! ```
//!
//! Purchased and Cancelled are terminal. The discount rate is frozen when the
//! order is placed and never recomputed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{ClaimCode, DiscountRate, Money, Quantity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Purchased,
    Cancelled,
}

/// Everything needed to insert a new order; the id comes from storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: i64,
    pub book_id: i64,
    /// The active cart line this order consumes.
    pub cart_line_id: i64,
    pub quantity: Quantity,
    pub claim_code: ClaimCode,
    pub discount: DiscountRate,
    pub date_added: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Order {
    id: i64,
    user_id: i64,
    book_id: i64,
    quantity: Quantity,
    date_added: DateTime<Utc>,
    claim_code: ClaimCode,
    discount: DiscountRate,
    is_purchased: bool,
    is_cancelled: bool,
    #[serde(skip)]
    events: Vec<OrderEvent>,
}

impl Order {
    /// Rebuilds an order from its persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: i64, user_id: i64, book_id: i64, quantity: Quantity, date_added: DateTime<Utc>,
        claim_code: ClaimCode, discount: DiscountRate, is_purchased: bool, is_cancelled: bool,
    ) -> Self {
        Self { id, user_id, book_id, quantity, date_added, claim_code, discount, is_purchased, is_cancelled, events: vec![] }
    }

    pub fn from_new(id: i64, new: NewOrder) -> Self {
        Self::restore(id, new.user_id, new.book_id, new.quantity, new.date_added, new.claim_code, new.discount, false, false)
    }

    pub fn id(&self) -> i64 { self.id }
    pub fn user_id(&self) -> i64 { self.user_id }
    pub fn book_id(&self) -> i64 { self.book_id }
    pub fn quantity(&self) -> Quantity { self.quantity }
    pub fn date_added(&self) -> DateTime<Utc> { self.date_added }
    pub fn claim_code(&self) -> &ClaimCode { &self.claim_code }
    pub fn discount(&self) -> DiscountRate { self.discount }
    pub fn is_purchased(&self) -> bool { self.is_purchased }
    pub fn is_cancelled(&self) -> bool { self.is_cancelled }

    pub fn status(&self) -> OrderStatus {
        if self.is_cancelled {
            OrderStatus::Cancelled
        } else if self.is_purchased {
            OrderStatus::Purchased
        } else {
            OrderStatus::Pending
        }
    }

    pub fn unit_price(&self, list_price: Money) -> Money { list_price.discounted(self.discount).rounded() }
    pub fn total(&self, list_price: Money) -> Money { self.unit_price(list_price).multiply(self.quantity.value()).rounded() }

    pub fn ensure_owned_by(&self, user_id: i64) -> Result<(), OrderError> {
        if self.user_id != user_id { return Err(OrderError::NotOwner); }
        Ok(())
    }

    pub fn approve(&mut self) -> Result<(), OrderError> {
        match self.status() {
            OrderStatus::Purchased => return Err(OrderError::AlreadyPurchased),
            OrderStatus::Cancelled => return Err(OrderError::Cancelled),
            OrderStatus::Pending => {}
        }
        self.is_purchased = true;
        self.raise_event(OrderEvent::Approved { order_id: self.id, user_id: self.user_id });
        Ok(())
    }

    /// Gives back one copy. Returns the remaining quantity; the order becomes
    /// cancelled when none are left.
    pub fn cancel_one(&mut self) -> Result<Quantity, OrderError> {
        match self.status() {
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            OrderStatus::Purchased => return Err(OrderError::AlreadyPurchased),
            OrderStatus::Pending => {}
        }
        self.quantity = self.quantity.subtract(1).ok_or(OrderError::AlreadyCancelled)?;
        if self.quantity.is_zero() {
            self.is_cancelled = true;
            self.raise_event(OrderEvent::Cancelled { order_id: self.id, user_id: self.user_id });
        } else {
            self.raise_event(OrderEvent::QuantityReduced { order_id: self.id, remaining: self.quantity.value() });
        }
        Ok(self.quantity)
    }

    pub fn ensure_removable(&self) -> Result<(), OrderError> {
        match self.status() {
            OrderStatus::Cancelled => Err(OrderError::Cancelled),
            OrderStatus::Purchased => Err(OrderError::AlreadyPurchased),
            OrderStatus::Pending => Ok(()),
        }
    }

    /// Checks the order may be deleted and records the removal.
    pub fn remove(&mut self) -> Result<(), OrderError> {
        self.ensure_removable()?;
        self.raise_event(OrderEvent::Removed { order_id: self.id });
        Ok(())
    }

    /// Staff correction; allowed in every state.
    pub fn replace_claim_code(&mut self, code: ClaimCode) {
        if self.claim_code == code { return; }
        self.claim_code = code;
        self.raise_event(OrderEvent::ClaimCodeChanged { order_id: self.id });
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NotOwner, AlreadyPurchased, AlreadyCancelled, Cancelled }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner => write!(f, "Order does not belong to this user"),
            Self::AlreadyPurchased => write!(f, "Order has already been purchased"),
            Self::AlreadyCancelled => write!(f, "Order is already cancelled"),
            Self::Cancelled => write!(f, "Order has been cancelled"),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn pending(id: i64, user_id: i64, quantity: u32) -> Order {
        Order::restore(
            id, user_id, 1, Quantity::new(quantity), Utc::now(),
            ClaimCode::new("ABCDEF123456").unwrap(), DiscountRate::ZERO, false, false,
        )
    }
}
