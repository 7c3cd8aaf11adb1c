//! Book Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{DiscountRate, Money};

/// Time-boxed sale. Constructed only through [`Sale::new`], so a book on sale
/// always carries a valid window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    discount: DiscountRate,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

const SALE_PERCENT_SCALE: u32 = 2;

impl Sale {
    pub fn new(percent: Decimal, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<Self, BookError> {
        if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED { return Err(BookError::InvalidSaleDiscount); }
        // books.discount_percentage is NUMERIC(5, 2).
        if percent.normalize().scale() > SALE_PERCENT_SCALE { return Err(BookError::SaleDiscountPrecision); }
        if ends_at <= starts_at { return Err(BookError::InvalidSaleWindow); }
        let discount = DiscountRate::from_percent(percent).map_err(|_| BookError::InvalidSaleDiscount)?;
        Ok(Self { discount, starts_at, ends_at })
    }

    pub fn discount(&self) -> DiscountRate { self.discount }
    pub fn starts_at(&self) -> DateTime<Utc> { self.starts_at }
    pub fn ends_at(&self) -> DateTime<Utc> { self.ends_at }
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool { self.starts_at <= now && now <= self.ends_at }
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.ends_at < now }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub price: Money,
    pub publication_year: i32,
    pub description: String,
    pub category: String,
    pub image_path: Option<String>,
    pub sale: Option<Sale>,
}

impl Book {
    /// Sale discount if the sale window contains `now`, zero otherwise.
    pub fn sale_discount(&self, now: DateTime<Utc>) -> DiscountRate {
        match self.sale {
            Some(sale) if sale.is_active_at(now) => sale.discount(),
            _ => DiscountRate::ZERO,
        }
    }

    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool { !self.sale_discount(now).is_zero() }

    pub fn current_price(&self, now: DateTime<Utc>) -> Money {
        self.price.discounted(self.sale_discount(now)).rounded()
    }

    pub fn start_sale(&mut self, sale: Sale) { self.sale = Some(sale); }

    /// Clears the sale. Returns whether anything changed, so repeated calls are harmless.
    pub fn clear_sale(&mut self) -> bool { self.sale.take().is_some() }

    pub fn sale_expired(&self, now: DateTime<Utc>) -> bool {
        self.sale.is_some_and(|sale| sale.is_expired_at(now))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum BookError { InvalidSaleDiscount, SaleDiscountPrecision, InvalidSaleWindow }
impl std::error::Error for BookError {}
impl std::fmt::Display for BookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSaleDiscount => write!(f, "Sale discount must be greater than 0 and at most 100 percent"),
            Self::SaleDiscountPrecision => write!(f, "Sale discount may have at most two decimal places"),
            Self::InvalidSaleWindow => write!(f, "Sale end date must be after its start date"),
        }
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_sale_window_validation() {
        let now = Utc::now();
        assert_eq!(Sale::new(Decimal::new(20, 0), now, now), Err(BookError::InvalidSaleWindow));
        assert_eq!(Sale::new(Decimal::ZERO, now, now + Duration::days(1)), Err(BookError::InvalidSaleDiscount));
        assert_eq!(Sale::new(Decimal::new(101, 0), now, now + Duration::days(1)), Err(BookError::InvalidSaleDiscount));
    }

    #[test]
    fn test_sale_discount_fits_two_decimals() {
        let now = Utc::now();
        let end = now + Duration::days(1);
        assert_eq!(Sale::new(Decimal::new(12345, 3), now, end), Err(BookError::SaleDiscountPrecision));
        assert_eq!(Sale::new(Decimal::new(1250, 2), now, end).unwrap().discount().as_percent(), Decimal::new(125, 1));
        // Trailing zeros do not count as precision.
        assert!(Sale::new(Decimal::new(15000, 3), now, end).is_ok());
    }

    #[test]
    fn test_current_price_is_time_gated() {
        let now = Utc::now();
        let mut book = fixtures::book(1, 40);
        book.start_sale(Sale::new(Decimal::new(25, 0), now + Duration::days(1), now + Duration::days(2)).unwrap());
        assert_eq!(book.current_price(now).amount(), Decimal::new(40, 0));
        assert_eq!(book.current_price(now + Duration::hours(36)).amount(), Decimal::new(30, 0));
        assert!(!book.is_on_sale(now + Duration::days(3)));
        assert!(book.sale_expired(now + Duration::days(3)));
    }

    #[test]
    fn test_clear_sale_is_idempotent() {
        let now = Utc::now();
        let mut book = fixtures::book(1, 10);
        book.start_sale(Sale::new(Decimal::new(10, 0), now - Duration::days(2), now - Duration::days(1)).unwrap());
        assert!(book.clear_sale());
        assert!(!book.clear_sale());
        assert!(book.sale.is_none());
    }
}
