//! Value Objects for the bookstore

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum length of a claim code, generated or staff supplied.
pub const CLAIM_CODE_MIN_LEN: usize = 12;
const CLAIM_CODE_MAX_LEN: usize = 64;

/// Claim code value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimCode(String);

impl ClaimCode {
    pub fn new(value: impl Into<String>) -> Result<Self, ClaimCodeError> {
        let value = value.into().trim().to_string();
        let len = value.chars().count();
        if len < CLAIM_CODE_MIN_LEN { return Err(ClaimCodeError::TooShort); }
        if len > CLAIM_CODE_MAX_LEN { return Err(ClaimCodeError::TooLong); }
        Ok(Self(value))
    }
    /// Twelve hex digits always satisfy the length rule.
    pub(crate) fn from_generated(value: String) -> Self { Self(value) }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_inner(self) -> String { self.0 }
}

impl fmt::Display for ClaimCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ClaimCodeError { TooShort, TooLong }
impl std::error::Error for ClaimCodeError {}
impl fmt::Display for ClaimCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "Claim code must be at least {CLAIM_CODE_MIN_LEN} characters long"),
            Self::TooLong => write!(f, "Claim code must be at most {CLAIM_CODE_MAX_LEN} characters long"),
        }
    }
}

/// Money value object, always rounded to cents when presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0 * Decimal::from(qty)) }
    pub fn discounted(&self, rate: DiscountRate) -> Money { Money(self.0 * (Decimal::ONE - rate.fraction())) }
    pub fn rounded(&self) -> Money { Money(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)) }
}

impl Default for Money { fn default() -> Self { Self::zero() } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "${:.2}", self.rounded().0) }
}

/// Discount stored as a fraction in [0, 1]; callers see it as a percentage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountRate(Decimal);

impl DiscountRate {
    pub const ZERO: DiscountRate = DiscountRate(Decimal::ZERO);

    pub fn new(fraction: Decimal) -> Result<Self, DiscountRateError> {
        if fraction < Decimal::ZERO || fraction > Decimal::ONE { return Err(DiscountRateError::OutOfRange); }
        Ok(Self(fraction))
    }

    /// `percent` in [0, 100].
    pub fn from_percent(percent: Decimal) -> Result<Self, DiscountRateError> {
        Self::new(percent / Decimal::ONE_HUNDRED)
    }

    /// Whole percentages known to be in range.
    pub fn percent(percent: u32) -> Self {
        Self(Decimal::from(percent.min(100)) / Decimal::ONE_HUNDRED)
    }

    pub fn fraction(&self) -> Decimal { self.0 }
    pub fn as_percent(&self) -> Decimal { (self.0 * Decimal::ONE_HUNDRED).normalize() }
    pub fn is_zero(&self) -> bool { self.0.is_zero() }

    /// Sum of two rates, capped at 100%.
    pub fn saturating_add(self, other: DiscountRate) -> DiscountRate {
        DiscountRate((self.0 + other.0).min(Decimal::ONE))
    }
}

impl fmt::Display for DiscountRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}%", self.as_percent()) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum DiscountRateError { OutOfRange }
impl std::error::Error for DiscountRateError {}
impl fmt::Display for DiscountRateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Discount must be between 0 and 100 percent") }
}

/// Largest quantity a cart line or order may hold; matches the INTEGER columns.
pub const MAX_QUANTITY: u32 = i32::MAX as u32;

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    /// `None` when the sum would exceed [`MAX_QUANTITY`].
    pub fn checked_add(&self, other: u32) -> Option<Self> {
        self.0.checked_add(other).filter(|sum| *sum <= MAX_QUANTITY).map(Self)
    }
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 { None } else { Some(Self(self.0 - other)) }
    }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_code_length() {
        assert_eq!(ClaimCode::new("SHORT"), Err(ClaimCodeError::TooShort));
        assert_eq!(ClaimCode::new("  ABCDEFGHIJKL  ").unwrap().as_str(), "ABCDEFGHIJKL");
        assert_eq!(ClaimCode::new("X".repeat(65)), Err(ClaimCodeError::TooLong));
    }

    #[test]
    fn test_money_discount() {
        let price = Money::new(Decimal::new(20, 0));
        let rate = DiscountRate::percent(10);
        assert_eq!(price.discounted(rate).multiply(6).rounded().amount(), Decimal::new(108, 0));
        assert_eq!(price.to_string(), "$20.00");
    }

    #[test]
    fn test_discount_rate_bounds() {
        assert!(DiscountRate::new(Decimal::new(11, 1)).is_err());
        assert!(DiscountRate::new(Decimal::new(-1, 2)).is_err());
        assert_eq!(DiscountRate::from_percent(Decimal::new(25, 0)).unwrap().fraction(), Decimal::new(25, 2));
        assert_eq!(DiscountRate::percent(5).as_percent(), Decimal::new(5, 0));
        assert_eq!(DiscountRate::percent(70).saturating_add(DiscountRate::percent(50)).fraction(), Decimal::ONE);
    }

    #[test]
    fn test_quantity_subtract() {
        let q = Quantity::new(1);
        assert!(q.subtract(1).unwrap().is_zero());
        assert!(q.subtract(2).is_none());
    }

    #[test]
    fn test_quantity_add_is_capped() {
        assert_eq!(Quantity::new(2).checked_add(3), Some(Quantity::new(5)));
        assert_eq!(Quantity::new(MAX_QUANTITY - 1).checked_add(1), Some(Quantity::new(MAX_QUANTITY)));
        assert_eq!(Quantity::new(MAX_QUANTITY).checked_add(1), None);
        assert_eq!(Quantity::new(u32::MAX).checked_add(1), None);
    }
}
