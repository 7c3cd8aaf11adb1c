//! Catalog reads, sale administration, reviews and banners
//!
//! Sale state is computed on read against the clock. An expired sale is
//! reported as over even before the sweeper has cleared it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{Book, BookError, Sale};
use crate::domain::value_objects::Money;
use crate::store::{CatalogStore, SharedStore};
use crate::{Banner, BookstoreError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub price: Money,
    pub publication_year: i32,
    pub description: String,
    pub category: String,
    pub image_path: Option<String>,
    /// A sale is scheduled or running.
    pub is_on_sale: bool,
    /// The sale window contains the current time.
    pub sale_active: bool,
    pub discount_percentage: Decimal,
    pub sale_start_date: Option<DateTime<Utc>>,
    pub sale_end_date: Option<DateTime<Utc>>,
    pub current_price: Money,
}

impl BookView {
    pub fn at(book: &Book, now: DateTime<Utc>) -> Self {
        let sale = book.sale.filter(|s| !s.is_expired_at(now));
        Self {
            id: book.id,
            title: book.title.clone(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
            price: book.price,
            publication_year: book.publication_year,
            description: book.description.clone(),
            category: book.category.clone(),
            image_path: book.image_path.clone(),
            is_on_sale: sale.is_some(),
            sale_active: book.is_on_sale(now),
            discount_percentage: sale.map_or(Decimal::ZERO, |s| s.discount().as_percent()),
            sale_start_date: sale.map(|s| s.starts_at()),
            sale_end_date: sale.map(|s| s.ends_at()),
            current_price: book.current_price(now),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    pub discount_percentage: Option<Decimal>,
    pub sale_start_date: Option<DateTime<Utc>>,
    pub sale_end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewView {
    pub id: i64,
    pub user_id: i64,
    pub rating: i16,
    pub comment: String,
    pub date_posted: DateTime<Utc>,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub book_id: i64,
    pub reviews: Vec<ReviewView>,
    pub review_count: usize,
    pub average_rating: Decimal,
}

pub struct CatalogService {
    store: SharedStore,
}

impl CatalogService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn list_books(&self) -> Result<Vec<BookView>> {
        let now = Utc::now();
        Ok(self.store.books().await?.iter().map(|b| BookView::at(b, now)).collect())
    }

    pub async fn get_book(&self, id: i64) -> Result<BookView> {
        let book = self.find(id).await?;
        Ok(BookView::at(&book, Utc::now()))
    }

    pub async fn set_sale(&self, book_id: i64, request: SaleRequest) -> Result<BookView> {
        let (Some(percent), Some(start), Some(end)) =
            (request.discount_percentage, request.sale_start_date, request.sale_end_date)
        else {
            return Err(BookstoreError::validation(
                "Discount percentage, sale start date and sale end date are required.",
            ));
        };
        let sale = Sale::new(percent, start, end).map_err(|e: BookError| BookstoreError::validation(e.to_string()))?;

        let book = self
            .store
            .save_sale(self.checked_id(book_id)?, Some(sale))
            .await?
            .ok_or_else(|| BookstoreError::not_found("Book not found"))?;
        tracing::info!(book_id, discount = %sale.discount(), ends_at = %sale.ends_at(), "Sale scheduled");
        Ok(BookView::at(&book, Utc::now()))
    }

    /// Ends a sale early. Clearing a book without a sale is a no-op.
    pub async fn clear_sale(&self, book_id: i64) -> Result<BookView> {
        let book = self
            .store
            .save_sale(self.checked_id(book_id)?, None)
            .await?
            .ok_or_else(|| BookstoreError::not_found("Book not found"))?;
        Ok(BookView::at(&book, Utc::now()))
    }

    pub async fn reviews(&self, book_id: i64) -> Result<ReviewSummary> {
        self.find(book_id).await?;
        let reviews = self.store.reviews(book_id).await?;

        let review_count = reviews.len();
        let average_rating = if review_count == 0 {
            Decimal::ZERO
        } else {
            let sum: i64 = reviews.iter().map(|r| i64::from(r.rating)).sum();
            (Decimal::from(sum) / Decimal::from(review_count as u64)).round_dp(1)
        };

        let reviews = reviews
            .into_iter()
            .map(|r| ReviewView {
                id: r.id,
                user_id: r.user_id,
                rating: r.rating,
                comment: r.comment,
                date_posted: r.date_posted,
                user_name: r.user_name.or(r.user_email).unwrap_or_else(|| "Anonymous".into()),
            })
            .collect();

        Ok(ReviewSummary { book_id, reviews, review_count, average_rating })
    }

    pub async fn active_banners(&self) -> Result<Vec<Banner>> {
        Ok(self.store.active_banners(Utc::now()).await?)
    }

    fn checked_id(&self, id: i64) -> Result<i64> {
        if id <= 0 {
            return Err(BookstoreError::validation("Invalid book ID."));
        }
        Ok(id)
    }

    async fn find(&self, id: i64) -> Result<Book> {
        self.store
            .book(self.checked_id(id)?)
            .await?
            .ok_or_else(|| BookstoreError::not_found("Book not found"))
    }
}
