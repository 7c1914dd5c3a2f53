//! Runtime settings. Every struct has a `Default` holding the shop's standard values;
//! the binary overrides them from flags and `STOREFRONT_*` environment variables.

use crate::domain::money::Money;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Parameters of the price breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Rate taken off a first-time buyer's post-bundle total.
    pub first_time_discount_rate: Decimal,
    /// Pre-discount subtotal at which delivery becomes free.
    pub free_delivery_threshold: Money,
    pub delivery_fee: Money,
    /// Days added to today for the estimated delivery date.
    pub delivery_days: u64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            first_time_discount_rate: dec!(0.10),
            free_delivery_threshold: Money::new(dec!(40.00)),
            delivery_fee: Money::new(dec!(4.99)),
            delivery_days: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    /// Lower-case ISO currency code sent to the gateway.
    pub currency: String,
    /// Maximum characters of gateway error text kept on an order.
    pub last_error_limit: usize,
    pub success_url: String,
    pub cancel_url: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "gbp".to_string(),
            last_error_limit: 500,
            success_url: "/checkout/success?session_id={CHECKOUT_SESSION_ID}".to_string(),
            cancel_url: "/checkout/cancel".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Shop inbox copied on every confirmation.
    pub admin_email: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_email: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub secret: String,
    /// Maximum age of a signed timestamp.
    pub tolerance: Duration,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            tolerance: Duration::from_secs(300),
        }
    }
}
