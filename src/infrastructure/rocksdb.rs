use crate::domain::cart::{Cart, CartId, Quantity};
use crate::domain::catalog::ProductId;
use crate::domain::identity::{Customer, UserId};
use crate::domain::order::{GatewayRef, Order, OrderDraft, OrderId, StatusUpdate, Transition};
use crate::domain::ports::{CartRepository, CustomerStore, OrderStore};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for orders, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for persistent carts, keyed by cart id.
pub const CF_CARTS: &str = "carts";
/// Column Family for customers, keyed by user id.
pub const CF_CUSTOMERS: &str = "customers";
/// Column Family mapping gateway identifiers and cart owners to ids.
pub const CF_INDEX: &str = "index";
/// Column Family for id counters.
pub const CF_META: &str = "meta";

const NEXT_ORDER_ID: &str = "next_order_id";
const NEXT_CART_ID: &str = "next_cart_id";

/// A persistent store implementation using RocksDB.
///
/// Stores orders (with their lines), carts and customers as JSON in separate Column
/// Families. Every mutation is a read-modify-write under one writer lock, committed
/// as a single `WriteBatch`, so an order and its gateway index entries change
/// together.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

fn ref_key(reference: &GatewayRef) -> String {
    match reference {
        GatewayRef::PaymentIntent(id) => format!("pi:{id}"),
        GatewayRef::CheckoutSession(id) => format!("cs:{id}"),
    }
}

fn owner_key(owner: UserId) -> String {
    format!("cart_owner:{owner}")
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CommerceError::StorageError("Malformed id in index".into()))?;
    Ok(u64::from_be_bytes(raw))
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every column family the store uses exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ORDERS, CF_CARTS, CF_CUSTOMERS, CF_INDEX, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            CommerceError::StorageError(format!("{name} column family not found").into())
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn get_index(&self, key: &str) -> Result<Option<u64>> {
        match self.db.get_pinned_cf(self.cf(CF_INDEX)?, key)? {
            Some(bytes) => Ok(Some(decode_id(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reserves the next id of `counter`, recording the bump in `batch`.
    fn next_id(&self, batch: &mut WriteBatch, counter: &str) -> Result<u64> {
        let current = match self.db.get_pinned_cf(self.cf(CF_META)?, counter)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 0,
        };
        let next = current + 1;
        batch.put_cf(self.cf(CF_META)?, counter, next.to_be_bytes());
        Ok(next)
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, id.0.to_be_bytes())
    }

    fn load_cart(&self, id: CartId) -> Result<Cart> {
        self.get_json(CF_CARTS, id.0.to_be_bytes())?
            .ok_or_else(|| CommerceError::not_found(format!("Cart {id}")))
    }

    fn save_cart(&self, cart: &Cart) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_CARTS, cart.id.0.to_be_bytes(), cart)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn create(&self, draft: OrderDraft) -> Result<Order> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();
        let id = OrderId(self.next_id(&mut batch, NEXT_ORDER_ID)?);
        let order = Order::new(id, draft, Utc::now());
        self.put_json(&mut batch, CF_ORDERS, id.0.to_be_bytes(), &order)?;
        self.db.write(batch)?;
        Ok(order)
    }

    async fn refresh_pending(&self, id: OrderId, draft: OrderDraft) -> Result<Option<Order>> {
        let _guard = self.writer.lock().await;
        let Some(mut order) = self.load_order(id)? else {
            return Ok(None);
        };
        if !order.is_refreshable() {
            return Ok(None);
        }
        order.refresh(draft);
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ORDERS, id.0.to_be_bytes(), &order)?;
        self.db.write(batch)?;
        Ok(Some(order))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.load_order(id)
    }

    async fn find_by_ref(&self, reference: &GatewayRef) -> Result<Option<Order>> {
        match self.get_index(&ref_key(reference))? {
            Some(id) => self.load_order(OrderId(id)),
            None => Ok(None),
        }
    }

    async fn attach_ref(&self, id: OrderId, reference: GatewayRef) -> Result<Order> {
        let _guard = self.writer.lock().await;
        let mut order = self
            .load_order(id)?
            .ok_or_else(|| CommerceError::not_found(format!("Order {id}")))?;

        let key = ref_key(&reference);
        if let Some(other) = self.get_index(&key)?
            && other != id.0
        {
            return Err(CommerceError::Conflict(format!(
                "{} already belongs to order {other}",
                reference.id()
            )));
        }

        order.attach(reference);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_INDEX)?, key, id.0.to_be_bytes());
        self.put_json(&mut batch, CF_ORDERS, id.0.to_be_bytes(), &order)?;
        self.db.write(batch)?;
        Ok(order)
    }

    async fn apply_update(
        &self,
        id: OrderId,
        update: &StatusUpdate,
        error_limit: usize,
    ) -> Result<Option<(Order, Transition)>> {
        let _guard = self.writer.lock().await;
        let Some(order) = self.load_order(id)? else {
            return Ok(None);
        };

        let mut next = order.clone();
        let transition = next.apply(update, error_limit);
        if !transition.is_changed() {
            return Ok(Some((order, transition)));
        }

        let mut batch = WriteBatch::default();
        for reference in next.refs_learned_since(&order) {
            let key = ref_key(&reference);
            match self.get_index(&key)? {
                Some(other) if other != id.0 => {
                    tracing::warn!(order_id = %id, other_order = other, reference = reference.id(), "Gateway identifier owned by another order, not linking");
                    next.revert_ref(&reference, &order);
                }
                _ => batch.put_cf(self.cf(CF_INDEX)?, key, id.0.to_be_bytes()),
            }
        }
        self.put_json(&mut batch, CF_ORDERS, id.0.to_be_bytes(), &next)?;
        self.db.write(batch)?;
        Ok(Some((next, transition)))
    }
}

#[async_trait]
impl CartRepository for RocksDBStore {
    async fn find_active(&self, owner: UserId) -> Result<Option<Cart>> {
        match self.get_index(&owner_key(owner))? {
            Some(id) => self.load_cart(CartId(id)).map(Some),
            None => Ok(None),
        }
    }

    async fn get_or_create(&self, owner: UserId) -> Result<Cart> {
        let _guard = self.writer.lock().await;
        if let Some(id) = self.get_index(&owner_key(owner))? {
            return self.load_cart(CartId(id));
        }

        let mut batch = WriteBatch::default();
        let cart = Cart::new(CartId(self.next_id(&mut batch, NEXT_CART_ID)?), owner);
        batch.put_cf(self.cf(CF_INDEX)?, owner_key(owner), cart.id.0.to_be_bytes());
        self.put_json(&mut batch, CF_CARTS, cart.id.0.to_be_bytes(), &cart)?;
        self.db.write(batch)?;
        Ok(cart)
    }

    async fn merge_row(&self, cart: CartId, product: ProductId, quantity: Quantity) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut stored = self.load_cart(cart)?;
        stored.merge(product, quantity)?;
        self.save_cart(&stored)
    }

    async fn merge_rows(&self, cart: CartId, rows: &[(ProductId, Quantity)]) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut stored = self.load_cart(cart)?;
        for (product, quantity) in rows {
            stored.merge(*product, *quantity)?;
        }
        self.save_cart(&stored)
    }

    async fn set_quantity(
        &self,
        cart: CartId,
        product: ProductId,
        quantity: Quantity,
    ) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut stored = self.load_cart(cart)?;
        if !stored.set_quantity(product, quantity) {
            return Ok(false);
        }
        self.save_cart(&stored)?;
        Ok(true)
    }

    async fn remove_row(&self, cart: CartId, product: ProductId) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut stored = self.load_cart(cart)?;
        if !stored.remove(product) {
            return Ok(false);
        }
        self.save_cart(&stored)?;
        Ok(true)
    }

    async fn clear(&self, cart: CartId) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut stored = self.load_cart(cart)?;
        stored.rows.clear();
        self.save_cart(&stored)
    }
}

#[async_trait]
impl CustomerStore for RocksDBStore {
    async fn store(&self, customer: Customer) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();
        self.put_json(
            &mut batch,
            CF_CUSTOMERS,
            customer.user_id.0.to_be_bytes(),
            &customer,
        )?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, user: UserId) -> Result<Option<Customer>> {
        self.get_json(CF_CUSTOMERS, user.0.to_be_bytes())
    }

    async fn consume_first_time_discount(&self, user: UserId) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let Some(mut customer) = self.get_json::<Customer>(CF_CUSTOMERS, user.0.to_be_bytes())?
        else {
            return Ok(false);
        };
        if !customer.consume_first_time_discount() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_CUSTOMERS, user.0.to_be_bytes(), &customer)?;
        self.db.write(batch)?;
        Ok(true)
    }
}
