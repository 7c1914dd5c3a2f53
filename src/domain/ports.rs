use super::cart::{Cart, CartId, Quantity};
use super::catalog::{Bundle, BundleId, Product, ProductId};
use super::gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, IntentRequest, IntentUpdate,
    PaymentIntent,
};
use super::identity::{Customer, UserId};
use super::notification::OrderConfirmation;
use super::order::{GatewayRef, Order, OrderDraft, OrderId, StatusUpdate, Transition};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Read-only catalog lookups. Absence is `None`, never an error.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;
    async fn product_by_code(&self, code: &str) -> Result<Option<Product>>;
    async fn bundle(&self, id: BundleId) -> Result<Option<Bundle>>;
}

/// Relational storage of persistent carts: one active cart per customer, one row per
/// product.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find_active(&self, owner: UserId) -> Result<Option<Cart>>;
    /// Returns the customer's active cart, creating it on first use.
    async fn get_or_create(&self, owner: UserId) -> Result<Cart>;
    /// Adds to the product's row, inserting it when missing.
    async fn merge_row(&self, cart: CartId, product: ProductId, quantity: Quantity) -> Result<()>;
    /// Merges several rows at once. Either every row is merged or none is.
    async fn merge_rows(&self, cart: CartId, rows: &[(ProductId, Quantity)]) -> Result<()>;
    /// Returns `false` when the cart has no row for the product.
    async fn set_quantity(&self, cart: CartId, product: ProductId, quantity: Quantity)
    -> Result<bool>;
    async fn remove_row(&self, cart: CartId, product: ProductId) -> Result<bool>;
    /// Deletes every row; the cart itself stays.
    async fn clear(&self, cart: CartId) -> Result<()>;
}

/// Per-session key/value storage. One instance is one browser session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn store(&self, customer: Customer) -> Result<()>;
    async fn get(&self, user: UserId) -> Result<Option<Customer>>;
    /// Clears the first-time-buyer flag. Returns `true` if it was set.
    async fn consume_first_time_discount(&self, user: UserId) -> Result<bool>;
}

/// Order persistence. Every method is atomic: an order is written together with
/// its lines or not at all.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, draft: OrderDraft) -> Result<Order>;
    /// Replaces the snapshot of an order that is still refreshable. `None` when the
    /// order is missing or has already moved on.
    async fn refresh_pending(&self, id: OrderId, draft: OrderDraft) -> Result<Option<Order>>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn find_by_ref(&self, reference: &GatewayRef) -> Result<Option<Order>>;
    /// Links a gateway object. Fails with `Conflict` if another order holds it.
    async fn attach_ref(&self, id: OrderId, reference: GatewayRef) -> Result<Order>;
    /// Applies a status update under the order's row lock. `None` when the order is
    /// missing.
    async fn apply_update(
        &self,
        id: OrderId,
        update: &StatusUpdate,
        error_limit: usize,
    ) -> Result<Option<(Order, Transition)>>;
}

/// Remote payment processor. Retries and timeouts are the implementation's concern.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &IntentRequest,
    ) -> std::result::Result<PaymentIntent, GatewayError>;
    async fn retrieve_payment_intent(
        &self,
        id: &str,
    ) -> std::result::Result<PaymentIntent, GatewayError>;
    async fn update_payment_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
    ) -> std::result::Result<PaymentIntent, GatewayError>;
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> std::result::Result<CheckoutSession, GatewayError>;
    async fn retrieve_checkout_session(
        &self,
        id: &str,
    ) -> std::result::Result<CheckoutSession, GatewayError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(&self, confirmation: OrderConfirmation) -> Result<()>;
}

pub type SharedCatalog = Arc<dyn Catalog>;
pub type SharedCartRepository = Arc<dyn CartRepository>;
pub type SharedSession = Arc<dyn SessionStore>;
pub type SharedCustomerStore = Arc<dyn CustomerStore>;
pub type SharedOrderStore = Arc<dyn OrderStore>;
pub type SharedGateway = Arc<dyn PaymentGateway>;
pub type SharedNotifier = Arc<dyn Notifier>;
