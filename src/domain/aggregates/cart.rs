//! Cart lines
//!
//! A line is never deleted: removing it flips it to [`LineState::Removed`] so the
//! history survives, and restoring flips it back. Placing an order consumes the
//! active line the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Quantity, MAX_QUANTITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    Active,
    Removed,
}

impl LineState {
    pub fn from_removed_flag(is_removed: bool) -> Self {
        if is_removed { Self::Removed } else { Self::Active }
    }

    pub fn is_removed(self) -> bool { self == Self::Removed }

    /// Checks that a line in this state may move to `to`.
    pub fn transition(self, to: LineState) -> Result<LineState, CartError> {
        match (self, to) {
            (Self::Active, Self::Removed) | (Self::Removed, Self::Active) => Ok(to),
            (Self::Active, Self::Active) => Err(CartError::AlreadyActive),
            (Self::Removed, Self::Removed) => Err(CartError::NotInCart),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub quantity: Quantity,
    pub date_added: DateTime<Utc>,
    pub state: LineState,
}

impl CartLine {
    pub fn is_active(&self) -> bool { self.state == LineState::Active }
}

/// Quantities a customer may put in the cart.
pub fn validate_quantity(quantity: i64) -> Result<Quantity, CartError> {
    if quantity < 1 { return Err(CartError::InvalidQuantity); }
    match u32::try_from(quantity) {
        Ok(q) if q <= MAX_QUANTITY => Ok(Quantity::new(q)),
        _ => Err(CartError::TooMany),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { InvalidQuantity, TooMany, NotInCart, AlreadyActive }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuantity => write!(f, "Quantity must be at least 1."),
            Self::TooMany => write!(f, "Quantity may not exceed {MAX_QUANTITY}."),
            Self::NotInCart => write!(f, "Book not in cart"),
            Self::AlreadyActive => write!(f, "Book is already in cart"),
        }
    }
}
