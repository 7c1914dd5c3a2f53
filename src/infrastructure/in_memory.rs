use crate::domain::cart::{Cart, CartId, Quantity};
use crate::domain::catalog::{Bundle, BundleId, Product, ProductId};
use crate::domain::identity::{Customer, UserId};
use crate::domain::notification::OrderConfirmation;
use crate::domain::order::{GatewayRef, Order, OrderDraft, OrderId, StatusUpdate, Transition};
use crate::domain::ports::{
    CartRepository, Catalog, CustomerStore, Notifier, OrderStore, SessionStore,
};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

/// A read-mostly catalog held in memory.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    bundles: Arc<RwLock<HashMap<BundleId, Bundle>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(products: Vec<Product>, bundles: Vec<Bundle>) -> Self {
        Self {
            products: Arc::new(RwLock::new(
                products.into_iter().map(|p| (p.id, p)).collect(),
            )),
            bundles: Arc::new(RwLock::new(
                bundles.into_iter().map(|b| (b.id, b)).collect(),
            )),
        }
    }

    pub async fn insert_product(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn remove_product(&self, id: ProductId) {
        self.products.write().await.remove(&id);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn product_by_code(&self, code: &str) -> Result<Option<Product>> {
        Ok(self
            .products
            .read()
            .await
            .values()
            .find(|product| product.code == code)
            .cloned())
    }

    async fn bundle(&self, id: BundleId) -> Result<Option<Bundle>> {
        Ok(self.bundles.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
struct CartTable {
    by_owner: HashMap<UserId, CartId>,
    carts: HashMap<CartId, Cart>,
    next_id: u64,
}

impl CartTable {
    fn cart_mut(&mut self, id: CartId) -> Result<&mut Cart> {
        self.carts
            .get_mut(&id)
            .ok_or_else(|| CommerceError::not_found(format!("Cart {id}")))
    }
}

/// Persistent carts kept in memory. One active cart per owner.
#[derive(Default, Clone)]
pub struct InMemoryCartRepository {
    table: Arc<RwLock<CartTable>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn find_active(&self, owner: UserId) -> Result<Option<Cart>> {
        let table = self.table.read().await;
        Ok(table
            .by_owner
            .get(&owner)
            .and_then(|id| table.carts.get(id))
            .cloned())
    }

    async fn get_or_create(&self, owner: UserId) -> Result<Cart> {
        let mut table = self.table.write().await;
        if let Some(cart) = table.by_owner.get(&owner).and_then(|id| table.carts.get(id)) {
            return Ok(cart.clone());
        }
        table.next_id += 1;
        let cart = Cart::new(CartId(table.next_id), owner);
        table.by_owner.insert(owner, cart.id);
        table.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn merge_row(&self, cart: CartId, product: ProductId, quantity: Quantity) -> Result<()> {
        let mut table = self.table.write().await;
        table.cart_mut(cart)?.merge(product, quantity)
    }

    async fn merge_rows(&self, cart: CartId, rows: &[(ProductId, Quantity)]) -> Result<()> {
        let mut table = self.table.write().await;
        let stored = table.cart_mut(cart)?;
        let mut merged = stored.clone();
        for (product, quantity) in rows {
            merged.merge(*product, *quantity)?;
        }
        *stored = merged;
        Ok(())
    }

    async fn set_quantity(
        &self,
        cart: CartId,
        product: ProductId,
        quantity: Quantity,
    ) -> Result<bool> {
        let mut table = self.table.write().await;
        Ok(table.cart_mut(cart)?.set_quantity(product, quantity))
    }

    async fn remove_row(&self, cart: CartId, product: ProductId) -> Result<bool> {
        let mut table = self.table.write().await;
        Ok(table.cart_mut(cart)?.remove(product))
    }

    async fn clear(&self, cart: CartId) -> Result<()> {
        let mut table = self.table.write().await;
        table.cart_mut(cart)?.rows.clear();
        Ok(())
    }
}

/// One browser session's key/value map.
#[derive(Default, Clone)]
pub struct InMemorySession {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySession {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCustomerStore {
    customers: Arc<RwLock<HashMap<UserId, Customer>>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn store(&self, customer: Customer) -> Result<()> {
        self.customers
            .write()
            .await
            .insert(customer.user_id, customer);
        Ok(())
    }

    async fn get(&self, user: UserId) -> Result<Option<Customer>> {
        Ok(self.customers.read().await.get(&user).cloned())
    }

    async fn consume_first_time_discount(&self, user: UserId) -> Result<bool> {
        Ok(self
            .customers
            .write()
            .await
            .get_mut(&user)
            .is_some_and(Customer::consume_first_time_discount))
    }
}

type OrderRow = Arc<Mutex<Order>>;

#[derive(Default)]
struct OrderTable {
    rows: HashMap<OrderId, OrderRow>,
    intents: HashMap<String, OrderId>,
    sessions: HashMap<String, OrderId>,
    next_id: u64,
}

impl OrderTable {
    fn index(&mut self, reference: &GatewayRef) -> &mut HashMap<String, OrderId> {
        match reference {
            GatewayRef::PaymentIntent(_) => &mut self.intents,
            GatewayRef::CheckoutSession(_) => &mut self.sessions,
        }
    }

    fn owner_of(&self, reference: &GatewayRef) -> Option<OrderId> {
        match reference {
            GatewayRef::PaymentIntent(id) => self.intents.get(id).copied(),
            GatewayRef::CheckoutSession(id) => self.sessions.get(id).copied(),
        }
    }
}

/// Orders held in memory, each behind its own row lock.
///
/// Locks are always taken row first, then table, and the table lock is never held
/// while waiting for a row.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, id: OrderId) -> Option<OrderRow> {
        self.table.read().await.rows.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Order> {
        let rows: Vec<OrderRow> = self.table.read().await.rows.values().cloned().collect();
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(row.lock().await.clone());
        }
        orders.sort_by_key(|order| order.id);
        orders
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, draft: OrderDraft) -> Result<Order> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let order = Order::new(OrderId(table.next_id), draft, Utc::now());
        table
            .rows
            .insert(order.id, Arc::new(Mutex::new(order.clone())));
        Ok(order)
    }

    async fn refresh_pending(&self, id: OrderId, draft: OrderDraft) -> Result<Option<Order>> {
        let Some(row) = self.row(id).await else {
            return Ok(None);
        };
        let mut order = row.lock().await;
        if !order.is_refreshable() {
            return Ok(None);
        }
        order.refresh(draft);
        Ok(Some(order.clone()))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let Some(row) = self.row(id).await else {
            return Ok(None);
        };
        let order = row.lock().await;
        Ok(Some(order.clone()))
    }

    async fn find_by_ref(&self, reference: &GatewayRef) -> Result<Option<Order>> {
        let id = self.table.read().await.owner_of(reference);
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn attach_ref(&self, id: OrderId, reference: GatewayRef) -> Result<Order> {
        let row = self
            .row(id)
            .await
            .ok_or_else(|| CommerceError::not_found(format!("Order {id}")))?;
        let mut order = row.lock().await;
        let mut table = self.table.write().await;

        if let Some(other) = table.owner_of(&reference)
            && other != id
        {
            return Err(CommerceError::Conflict(format!(
                "{} already belongs to order {other}",
                reference.id()
            )));
        }
        table
            .index(&reference)
            .insert(reference.id().to_string(), id);
        order.attach(reference);
        Ok(order.clone())
    }

    async fn apply_update(
        &self,
        id: OrderId,
        update: &StatusUpdate,
        error_limit: usize,
    ) -> Result<Option<(Order, Transition)>> {
        let Some(row) = self.row(id).await else {
            return Ok(None);
        };
        let mut order = row.lock().await;

        let mut next = order.clone();
        let transition = next.apply(update, error_limit);
        if !transition.is_changed() {
            return Ok(Some((order.clone(), transition)));
        }

        let learned = next.refs_learned_since(&order);
        if !learned.is_empty() {
            let mut table = self.table.write().await;
            for reference in learned {
                match table.owner_of(&reference) {
                    Some(other) if other != id => {
                        tracing::warn!(order_id = %id, other_order = %other, reference = reference.id(), "Gateway identifier owned by another order, not linking");
                        next.revert_ref(&reference, &order);
                    }
                    _ => {
                        table.index(&reference).insert(reference.id().to_string(), id);
                    }
                }
            }
        }

        *order = next;
        Ok(Some((order.clone(), transition)))
    }
}

/// Collects confirmations instead of sending them.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<OrderConfirmation>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail until switched off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OrderConfirmation> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(&self, confirmation: OrderConfirmation) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CommerceError::NotificationError(format!(
                "mail transport down for order {}",
                confirmation.order_id
            )));
        }
        self.sent.lock().await.push(confirmation);
        Ok(())
    }
}
