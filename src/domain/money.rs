use crate::error::CommerceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// Decimal places carried by every stored or billed amount.
pub const MONEY_SCALE: u32 = 2;

/// A monetary value in the store's single currency.
///
/// Wraps `rust_decimal::Decimal` so that every step of price arithmetic stays exact.
/// Amounts are quantized to [`MONEY_SCALE`] places with midpoint-away-from-zero
/// rounding whenever a rate is applied or a total is finalized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Validates a catalog or captured price. Prices may be zero but never negative,
    /// and never finer than one minor unit.
    pub fn price(amount: Decimal) -> Result<Self, CommerceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            Err(CommerceError::validation("Price must not be negative"))
        } else if amount.normalize().scale() > MONEY_SCALE {
            Err(CommerceError::validation(format!(
                "Price {amount} has more than {MONEY_SCALE} decimal places"
            )))
        } else {
            Ok(Self(amount))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn quantize(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Multiplies by a fractional rate (e.g. `0.10`) and quantizes the result.
    pub fn apply_rate(self, rate: Decimal) -> Self {
        Self(self.0 * rate).quantize()
    }

    /// Negative values collapse to zero.
    pub fn clamp_zero(self) -> Self {
        if self.0 < Decimal::ZERO {
            Self::ZERO
        } else {
            self
        }
    }

    /// Exact conversion to integer minor units (pence) used to bill the gateway.
    pub fn to_minor_units(self) -> Result<i64, CommerceError> {
        if self.0 < Decimal::ZERO {
            return Err(CommerceError::validation(
                "Cannot bill a negative amount",
            ));
        }
        (self.quantize().0 * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| CommerceError::validation("Amount out of range for minor units"))
    }

    pub fn from_minor_units(units: i64) -> Self {
        Self(Decimal::new(units, MONEY_SCALE))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.quantize().0)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul<u32> for Money {
    type Output = Self;
    fn mul(self, rhs: u32) -> Self::Output {
        Self(self.0 * Decimal::from(rhs))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}
