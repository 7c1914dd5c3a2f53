//! Price breakdown of a resolved cart.
//!
//! [`summarize`] is a pure function: it takes lines whose unit prices were already
//! resolved against the catalog and produces the full [`PricingSummary`]. Nothing here
//! is cached or persisted; callers recompute on every request.

use super::cart::{LineTarget, Quantity};
use super::catalog::Tier;
use super::money::Money;
use crate::config::PricingPolicy;
use chrono::{Days, NaiveDate};
use serde::Serialize;

/// A cart line with its unit prices resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedLine {
    pub target: LineTarget,
    pub name: String,
    pub tier: Option<Tier>,
    pub quantity: Quantity,
    /// Unit price before the bundle discount.
    pub unit_before: Money,
    /// Unit price actually charged (the discounted price for bundles).
    pub unit_after: Money,
}

impl PricedLine {
    pub fn subtotal_before(&self) -> Money {
        self.unit_before * self.quantity.get()
    }

    pub fn subtotal_after(&self) -> Money {
        self.unit_after * self.quantity.get()
    }

    /// Bundle saving on this line, never negative.
    pub fn bundle_discount(&self) -> Money {
        if self.target.is_bundle() {
            (self.subtotal_before() - self.subtotal_after()).clamp_zero()
        } else {
            Money::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingSummary {
    pub lines: Vec<PricedLine>,
    pub total_before_discount: Money,
    pub bundle_discount_total: Money,
    pub first_time_discount_applied: bool,
    pub first_time_discount_total: Money,
    /// Total after bundle and first-time discounts, before delivery.
    pub cart_total: Money,
    pub free_delivery: bool,
    pub delivery_fee: Money,
    pub grand_total: Money,
    pub estimated_delivery: NaiveDate,
}

impl PricingSummary {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn discount_total(&self) -> Money {
        self.bundle_discount_total + self.first_time_discount_total
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity.get()).sum()
    }
}

pub fn summarize(
    lines: Vec<PricedLine>,
    first_time_buyer: bool,
    policy: &PricingPolicy,
    today: NaiveDate,
) -> PricingSummary {
    let mut total_before_discount = Money::ZERO;
    let mut running_total = Money::ZERO;
    let mut bundle_discount_total = Money::ZERO;

    for line in &lines {
        total_before_discount += line.subtotal_before();
        running_total += line.subtotal_after();
        bundle_discount_total += line.bundle_discount();
    }

    let first_time_discount_total = if first_time_buyer {
        running_total.apply_rate(policy.first_time_discount_rate)
    } else {
        Money::ZERO
    };
    let cart_total = (running_total - first_time_discount_total).quantize();

    // Threshold is checked against the pre-discount subtotal.
    let free_delivery =
        first_time_buyer || total_before_discount >= policy.free_delivery_threshold;
    let delivery_fee = if free_delivery {
        Money::ZERO
    } else {
        policy.delivery_fee
    };

    let grand_total = (cart_total + delivery_fee).quantize();
    let estimated_delivery = today
        .checked_add_days(Days::new(policy.delivery_days))
        .unwrap_or(today);

    tracing::debug!(
        items = lines.len(),
        subtotal = %total_before_discount,
        bundle_discount = %bundle_discount_total,
        first_time_discount = %first_time_discount_total,
        delivery = %delivery_fee,
        grand_total = %grand_total,
        "Cart priced"
    );

    PricingSummary {
        lines,
        total_before_discount: total_before_discount.quantize(),
        bundle_discount_total: bundle_discount_total.quantize(),
        first_time_discount_applied: first_time_buyer,
        first_time_discount_total,
        cart_total,
        free_delivery,
        delivery_fee,
        grand_total,
        estimated_delivery,
    }
}
