//! Discount policy
//!
//! Three independent components feed the rate frozen onto an order:
//!
//! - purchase tier: every fifth successful purchase, starting with the fifth,
//!   alternating 5% and 10% per cycle
//! - quantity tier: 5% from 5 copies, 10% from 10 copies
//! - sale: the book's own time-boxed discount
//!
//! The purchase and quantity tiers stack; their sum competes against the sale
//! discount and the larger one wins.

use serde::Serialize;

use crate::domain::value_objects::DiscountRate;

/// First purchase position that can earn a purchase-tier discount.
pub const PURCHASE_TIER_START: u64 = 5;
/// Distance between two rewarded purchases.
pub const PURCHASE_TIER_EVERY: u64 = 5;

const QUANTITY_TIER_LOW: u32 = 5;
const QUANTITY_TIER_HIGH: u32 = 10;

/// Discount earned by the purchase that follows `purchases_before` successful ones.
pub fn purchase_tier(purchases_before: u64) -> DiscountRate {
    let position = purchases_before.saturating_add(1);
    if position < PURCHASE_TIER_START {
        return DiscountRate::ZERO;
    }
    let offset = position - PURCHASE_TIER_START;
    if offset % PURCHASE_TIER_EVERY != 0 {
        return DiscountRate::ZERO;
    }
    if (offset / PURCHASE_TIER_EVERY) % 2 == 0 {
        DiscountRate::percent(5)
    } else {
        DiscountRate::percent(10)
    }
}

pub fn quantity_tier(quantity: u32) -> DiscountRate {
    if quantity >= QUANTITY_TIER_HIGH {
        DiscountRate::percent(10)
    } else if quantity >= QUANTITY_TIER_LOW {
        DiscountRate::percent(5)
    } else {
        DiscountRate::ZERO
    }
}

/// Which component produced the applied rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountSource {
    None,
    Tiers,
    Sale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscountInputs {
    /// Orders of this user already approved when the new order is placed.
    pub purchases_before: u64,
    pub quantity: u32,
    /// Sale discount of the book, already gated on the sale window.
    pub sale: DiscountRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DiscountBreakdown {
    pub purchase_tier: DiscountRate,
    pub quantity_tier: DiscountRate,
    pub sale: DiscountRate,
    pub applied: DiscountRate,
    pub source: DiscountSource,
}

pub fn compute(inputs: DiscountInputs) -> DiscountBreakdown {
    let purchase = purchase_tier(inputs.purchases_before);
    let quantity = quantity_tier(inputs.quantity);
    let tiers = purchase.saturating_add(quantity);

    let (applied, source) = if tiers.is_zero() && inputs.sale.is_zero() {
        (DiscountRate::ZERO, DiscountSource::None)
    } else if tiers >= inputs.sale {
        (tiers, DiscountSource::Tiers)
    } else {
        (inputs.sale, DiscountSource::Sale)
    };

    DiscountBreakdown { purchase_tier: purchase, quantity_tier: quantity, sale: inputs.sale, applied, source }
}

/// The next purchase that earns a purchase-tier discount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextReward {
    /// Purchases still needed, counting the rewarded one.
    pub purchases_until: u64,
    pub rate: DiscountRate,
}

pub fn next_reward(purchases_before: u64) -> NextReward {
    let next = purchases_before.saturating_add(1);
    let position = if next <= PURCHASE_TIER_START {
        PURCHASE_TIER_START
    } else {
        let offset = next - PURCHASE_TIER_START;
        PURCHASE_TIER_START + offset.div_ceil(PURCHASE_TIER_EVERY) * PURCHASE_TIER_EVERY
    };
    NextReward {
        purchases_until: position - purchases_before,
        rate: purchase_tier(position - 1),
    }
}
