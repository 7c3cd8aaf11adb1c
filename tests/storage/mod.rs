//! Shared storage integration tests.
//!
//! Tests the store traits against every implementation. Each implementation
//! file seeds users and books its own way and runs the shared contract.

pub mod store_contract_tests;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use bookhaven::domain::aggregates::{Book, Sale};
use bookhaven::domain::value_objects::Money;

/// Rows the store traits read but never create.
#[async_trait]
pub trait Seed {
    async fn seed_user(&self, email: &str) -> i64;

    async fn seed_book(&self, book: Book) -> i64;
}

/// Suffix that keeps rows of one run apart from another on a shared database.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

pub fn book(sale: Option<Sale>) -> Book {
    Book {
        id: 0,
        title: "A Wizard of Earthsea".into(),
        author: "Ursula K. Le Guin".into(),
        isbn: unique("isbn"),
        price: Money::new(Decimal::new(20, 0)),
        publication_year: 1968,
        description: String::new(),
        category: "Fantasy".into(),
        image_path: None,
        sale,
    }
}
