//! Cart service

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::cart::validate_quantity;
use crate::domain::aggregates::{CartError, CartLine, LineState};
use crate::domain::value_objects::Money;
use crate::services::catalog::BookView;
use crate::store::{CartStore, CatalogStore, Constraint, SharedStore, StoreError};
use crate::{BookstoreError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub id: i64,
    pub book_id: i64,
    pub quantity: u32,
    pub date_added: DateTime<Utc>,
    pub book: Option<BookView>,
    pub line_total: Option<Money>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartChange {
    pub message: String,
    pub item: CartLine,
}

pub struct CartService {
    store: SharedStore,
}

impl CartService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn add(&self, user_id: i64, book_id: i64, quantity: i64) -> Result<CartChange> {
        let quantity = validate_quantity(quantity).map_err(cart_error)?;
        if self.store.book(book_id).await?.is_none() {
            return Err(BookstoreError::not_found("Book not found"));
        }
        let line = match self.store.add_to_line(user_id, book_id, quantity, Utc::now()).await {
            Ok(line) => line,
            Err(StoreError::OutOfRange(_)) => return Err(cart_error(CartError::TooMany)),
            Err(e) => return Err(e.into()),
        };
        let message = if line.quantity == quantity { "Book added to cart" } else { "Quantity updated in cart" };
        Ok(CartChange { message: message.into(), item: line })
    }

    pub async fn set_quantity(&self, user_id: i64, book_id: i64, quantity: i64) -> Result<CartChange> {
        let quantity = validate_quantity(quantity).map_err(cart_error)?;
        let line = self
            .store
            .set_line_quantity(user_id, book_id, quantity)
            .await?
            .ok_or_else(|| cart_error(CartError::NotInCart))?;
        Ok(CartChange { message: "Quantity updated".into(), item: line })
    }

    pub async fn remove(&self, user_id: i64, book_id: i64) -> Result<CartChange> {
        let line = self.transition(user_id, book_id, LineState::Active, LineState::Removed).await?;
        Ok(CartChange { message: "Book marked as removed from cart".into(), item: line })
    }

    pub async fn restore(&self, user_id: i64, book_id: i64) -> Result<CartChange> {
        let line = self.transition(user_id, book_id, LineState::Removed, LineState::Active).await?;
        Ok(CartChange { message: "Book restored to cart".into(), item: line })
    }

    pub async fn items(&self, user_id: i64) -> Result<Vec<CartItemView>> {
        let lines = self.store.active_lines(user_id).await?;
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let books: HashMap<i64, BookView> =
            self.store.books().await?.iter().map(|b| (b.id, BookView::at(b, now))).collect();
        Ok(lines
            .into_iter()
            .map(|line| {
                let book = books.get(&line.book_id).cloned();
                CartItemView {
                    id: line.id,
                    book_id: line.book_id,
                    quantity: line.quantity.value(),
                    date_added: line.date_added,
                    line_total: book.as_ref().map(|b| b.current_price.multiply(line.quantity.value()).rounded()),
                    book,
                }
            })
            .collect())
    }

    async fn transition(&self, user_id: i64, book_id: i64, from: LineState, to: LineState) -> Result<CartLine> {
        from.transition(to).map_err(cart_error)?;
        match self.store.move_line(user_id, book_id, from, to).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) if to == LineState::Active => {
                Err(BookstoreError::not_found("Removed book not found in cart"))
            }
            Ok(None) => Err(cart_error(CartError::NotInCart)),
            Err(StoreError::Duplicate(Constraint::ActiveCartLine)) => Err(cart_error(CartError::AlreadyActive)),
            Err(e) => Err(e.into()),
        }
    }
}

fn cart_error(e: CartError) -> BookstoreError {
    match e {
        CartError::InvalidQuantity | CartError::TooMany => BookstoreError::validation(e.to_string()),
        CartError::NotInCart => BookstoreError::not_found(e.to_string()),
        CartError::AlreadyActive => BookstoreError::conflict(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use testresult::TestResult;

    use super::*;
    use crate::domain::aggregates::book::fixtures::book;
    use crate::domain::value_objects::MAX_QUANTITY;
    use crate::store::MemoryStore;

    async fn setup() -> (MemoryStore, CartService, i64) {
        let store = MemoryStore::new();
        let b = store.insert_book(book(0, 15)).await;
        let service = CartService::new(Arc::new(store.clone()));
        (store, service, b.id)
    }

    #[tokio::test]
    async fn re_adding_increments_the_active_line() -> TestResult {
        let (_, service, book_id) = setup().await;

        service.add(1, book_id, 2).await?;
        let change = service.add(1, book_id, 3).await?;

        assert_eq!(change.item.quantity.value(), 5);
        assert_eq!(change.message, "Quantity updated in cart");
        let items = service.items(1).await?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].line_total.map(|m| m.amount()), Some(Decimal::new(75, 0)));
        Ok(())
    }

    #[tokio::test]
    async fn quantity_must_be_positive() {
        let (_, service, book_id) = setup().await;
        assert!(matches!(service.add(1, book_id, 0).await, Err(BookstoreError::Validation(_))));
        assert!(matches!(service.set_quantity(1, book_id, -1).await, Err(BookstoreError::Validation(_))));
        assert!(matches!(service.add(1, 999, 1).await, Err(BookstoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn quantity_never_exceeds_the_column_range() -> TestResult {
        let (store, service, book_id) = setup().await;
        let max = i64::from(MAX_QUANTITY);

        assert!(matches!(service.add(1, book_id, max + 1).await, Err(BookstoreError::Validation(_))));
        assert!(matches!(service.set_quantity(1, book_id, max + 1).await, Err(BookstoreError::Validation(_))));

        service.add(1, book_id, max).await?;
        let overflow = service.add(1, book_id, 1).await;
        assert!(matches!(overflow, Err(BookstoreError::Validation(ref m)) if m.contains("may not exceed")));
        assert_eq!(store.cart_lines(1).await[0].quantity.value(), MAX_QUANTITY);
        Ok(())
    }

    #[tokio::test]
    async fn remove_and_restore_keep_history() -> TestResult {
        let (store, service, book_id) = setup().await;
        service.add(1, book_id, 1).await?;

        service.remove(1, book_id).await?;
        assert!(service.items(1).await?.is_empty());
        assert!(matches!(service.remove(1, book_id).await, Err(BookstoreError::NotFound(_))));

        service.restore(1, book_id).await?;
        assert_eq!(service.items(1).await?.len(), 1);
        assert_eq!(store.cart_lines(1).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn restore_conflicts_with_newer_active_line() -> TestResult {
        let (_, service, book_id) = setup().await;
        service.add(1, book_id, 1).await?;
        service.remove(1, book_id).await?;
        service.add(1, book_id, 2).await?;

        assert!(matches!(service.restore(1, book_id).await, Err(BookstoreError::Conflict(_))));
        Ok(())
    }
}
