use super::cart::CartStore;
use crate::config::PricingPolicy;
use crate::domain::cart::{LineItem, LineTarget};
use crate::domain::identity::Identity;
use crate::domain::ports::{SharedCatalog, SharedCustomerStore};
use crate::domain::pricing::{PricedLine, PricingSummary, summarize};
use crate::error::Result;
use chrono::{NaiveDate, Utc};

/// Prices carts against the live catalog.
///
/// Nothing is cached: every call re-reads catalog prices and the customer's
/// first-time-buyer flag.
#[derive(Clone)]
pub struct PricingEngine {
    catalog: SharedCatalog,
    customers: SharedCustomerStore,
    policy: PricingPolicy,
}

impl PricingEngine {
    pub fn new(
        catalog: SharedCatalog,
        customers: SharedCustomerStore,
        policy: PricingPolicy,
    ) -> Self {
        Self {
            catalog,
            customers,
            policy,
        }
    }

    /// Prices the cart for `identity`, looking up first-time eligibility.
    pub async fn price(&self, cart: &dyn CartStore, identity: Identity) -> Result<PricingSummary> {
        let first_time_buyer = self.is_first_time_buyer(identity).await?;
        self.price_cart(cart, first_time_buyer, Utc::now().date_naive())
            .await
    }

    pub async fn price_cart(
        &self,
        cart: &dyn CartStore,
        first_time_buyer: bool,
        today: NaiveDate,
    ) -> Result<PricingSummary> {
        let lines = self.resolve_lines(cart.lines().await?).await?;
        Ok(summarize(lines, first_time_buyer, &self.policy, today))
    }

    /// Only authenticated customers can claim the first-time discount.
    pub async fn is_first_time_buyer(&self, identity: Identity) -> Result<bool> {
        let Some(user) = identity.user_id() else {
            return Ok(false);
        };
        Ok(self
            .customers
            .get(user)
            .await?
            .is_some_and(|customer| customer.first_time_buyer))
    }

    /// Resolves unit prices. Lines whose product or bundle left the catalog are
    /// skipped.
    async fn resolve_lines(&self, items: Vec<LineItem>) -> Result<Vec<PricedLine>> {
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            match item.target {
                LineTarget::Product(id) => {
                    let Some(product) = self.catalog.product(id).await? else {
                        tracing::debug!(product_id = %id, "Skipping cart line for missing product");
                        continue;
                    };
                    priced.push(PricedLine {
                        target: item.target,
                        name: product.name,
                        tier: Some(product.tier),
                        quantity: item.quantity,
                        unit_before: product.price,
                        unit_after: product.price,
                    });
                }
                LineTarget::Bundle(id) => {
                    let Some(bundle) = self.catalog.bundle(id).await? else {
                        tracing::debug!(bundle_id = %id, "Skipping cart line for missing bundle");
                        continue;
                    };
                    priced.push(PricedLine {
                        target: item.target,
                        unit_before: bundle.list_price(),
                        unit_after: item.captured_price.unwrap_or(bundle.price),
                        name: bundle.name,
                        tier: None,
                        quantity: item.quantity,
                    });
                }
            }
        }
        Ok(priced)
    }
}
