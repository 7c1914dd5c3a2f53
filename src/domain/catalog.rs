use super::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Standard,
    Pro,
    Special,
}

/// A sellable product as seen by the cart. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// External code; the session cart keys product lines by it.
    pub code: String,
    pub name: String,
    pub price: Money,
    pub tier: Tier,
    /// Free-form product type name (e.g. "Dash Cam").
    pub kind: String,
}

/// A fixed, discounted grouping of products priced independently of its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub name: String,
    /// Discounted sticker price.
    pub price: Money,
    /// Sum of component prices; zero when it was never computed.
    pub subtotal_price: Money,
    pub discount_percentage: Decimal,
}

impl Bundle {
    /// Price the customer would pay for the components separately.
    pub fn list_price(&self) -> Money {
        if self.subtotal_price.is_zero() {
            self.price
        } else {
            self.subtotal_price
        }
    }
}
