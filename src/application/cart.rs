//! Cart storage behind a single trait.
//!
//! Authenticated customers get a [`PersistentCartStore`]: product rows live in the
//! cart repository, while bundle lines stay in the session map. Anonymous visitors
//! get a [`SessionCartStore`] that keeps everything in the session under the `cart`
//! key. Both yield the same [`LineItem`]s, so pricing does not care which one it got.

use crate::domain::cart::{CartMode, LineItem, LineKey, LineTarget, Quantity, SessionCart};
use crate::domain::catalog::{Bundle, Product};
use crate::domain::identity::{Identity, UserId};
use crate::domain::money::Money;
use crate::domain::ports::{SharedCartRepository, SharedCatalog, SharedSession};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;

/// Session key holding the ephemeral cart map.
pub const CART_SESSION_KEY: &str = "cart";

#[async_trait]
pub trait CartStore: Send + Sync {
    fn mode(&self) -> CartMode;

    async fn lines(&self) -> Result<Vec<LineItem>>;

    /// Merges `quantity` into the line addressed by `key`. `price` is the unit price
    /// the customer saw, captured for bundle lines.
    async fn add(&self, key: &LineKey, quantity: Quantity, price: Option<Money>) -> Result<()>;

    /// Returns `false` when the cart holds no such line.
    async fn update(&self, key: &LineKey, quantity: Quantity) -> Result<bool>;

    async fn remove(&self, key: &LineKey) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn item_count(&self) -> Result<u32> {
        Ok(self
            .lines()
            .await?
            .iter()
            .map(|line| line.quantity.get())
            .sum())
    }
}

pub type CartStoreBox = Box<dyn CartStore>;

async fn load_session_cart(session: &SharedSession) -> Result<SessionCart> {
    Ok(session
        .get(CART_SESSION_KEY)
        .await?
        .map(SessionCart::from_session_value)
        .unwrap_or_default())
}

async fn save_session_cart(session: &SharedSession, cart: &SessionCart) -> Result<()> {
    if cart.is_empty() {
        session.remove(CART_SESSION_KEY).await
    } else {
        session
            .set(CART_SESSION_KEY, serde_json::to_value(cart)?)
            .await
    }
}

async fn require_product(catalog: &SharedCatalog, code: &str) -> Result<Product> {
    catalog
        .product_by_code(code)
        .await?
        .ok_or_else(|| CommerceError::not_found(format!("Product '{code}'")))
}

async fn require_bundle(catalog: &SharedCatalog, key: &LineKey) -> Result<Bundle> {
    let LineKey::Bundle(id) = key else {
        return Err(CommerceError::validation(format!("'{key}' is not a bundle key")));
    };
    catalog
        .bundle(*id)
        .await?
        .ok_or_else(|| CommerceError::not_found(format!("Bundle {id}")))
}

async fn add_bundle_to_session(
    catalog: &SharedCatalog,
    session: &SharedSession,
    key: &LineKey,
    quantity: Quantity,
    price: Option<Money>,
) -> Result<()> {
    let bundle = require_bundle(catalog, key).await?;
    let price = match price {
        Some(price) => Money::price(price.value())?,
        None => bundle.price,
    };
    let mut cart = load_session_cart(session).await?;
    cart.add(key, None, &bundle.name, quantity, Some(price))?;
    save_session_cart(session, &cart).await
}

async fn update_session_line(
    session: &SharedSession,
    key: &LineKey,
    quantity: Quantity,
) -> Result<bool> {
    let mut cart = load_session_cart(session).await?;
    if !cart.set_quantity(key, quantity) {
        return Ok(false);
    }
    save_session_cart(session, &cart).await?;
    Ok(true)
}

async fn remove_session_line(session: &SharedSession, key: &LineKey) -> Result<bool> {
    let mut cart = load_session_cart(session).await?;
    if !cart.remove(key) {
        return Ok(false);
    }
    save_session_cart(session, &cart).await?;
    Ok(true)
}

/// Cart of an authenticated customer.
pub struct PersistentCartStore {
    owner: UserId,
    carts: SharedCartRepository,
    session: SharedSession,
    catalog: SharedCatalog,
}

impl PersistentCartStore {
    pub fn new(
        owner: UserId,
        carts: SharedCartRepository,
        session: SharedSession,
        catalog: SharedCatalog,
    ) -> Self {
        Self {
            owner,
            carts,
            session,
            catalog,
        }
    }
}

#[async_trait]
impl CartStore for PersistentCartStore {
    fn mode(&self) -> CartMode {
        CartMode::Persistent
    }

    async fn lines(&self) -> Result<Vec<LineItem>> {
        let mut lines: Vec<LineItem> = match self.carts.find_active(self.owner).await? {
            Some(cart) => cart
                .rows
                .iter()
                .map(|row| LineItem {
                    target: LineTarget::Product(row.product),
                    quantity: row.quantity,
                    captured_price: None,
                })
                .collect(),
            None => Vec::new(),
        };
        lines.extend(load_session_cart(&self.session).await?.bundle_lines());
        Ok(lines)
    }

    async fn add(&self, key: &LineKey, quantity: Quantity, price: Option<Money>) -> Result<()> {
        match key {
            LineKey::Product(code) => {
                let product = require_product(&self.catalog, code).await?;
                let cart = self.carts.get_or_create(self.owner).await?;
                self.carts.merge_row(cart.id, product.id, quantity).await?;
                tracing::debug!(user_id = %self.owner, product_id = %product.id, quantity = quantity.get(), "Cart row merged");
                Ok(())
            }
            LineKey::Bundle(_) => {
                add_bundle_to_session(&self.catalog, &self.session, key, quantity, price).await
            }
        }
    }

    async fn update(&self, key: &LineKey, quantity: Quantity) -> Result<bool> {
        match key {
            LineKey::Product(code) => {
                let Some(product) = self.catalog.product_by_code(code).await? else {
                    return Ok(false);
                };
                let Some(cart) = self.carts.find_active(self.owner).await? else {
                    return Ok(false);
                };
                self.carts.set_quantity(cart.id, product.id, quantity).await
            }
            LineKey::Bundle(_) => update_session_line(&self.session, key, quantity).await,
        }
    }

    async fn remove(&self, key: &LineKey) -> Result<bool> {
        match key {
            LineKey::Product(code) => {
                let Some(product) = self.catalog.product_by_code(code).await? else {
                    return Ok(false);
                };
                let Some(cart) = self.carts.find_active(self.owner).await? else {
                    return Ok(false);
                };
                self.carts.remove_row(cart.id, product.id).await
            }
            LineKey::Bundle(_) => remove_session_line(&self.session, key).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        if let Some(cart) = self.carts.find_active(self.owner).await? {
            self.carts.clear(cart.id).await?;
        }
        // Bundles of an authenticated cart live in the session too.
        self.session.remove(CART_SESSION_KEY).await
    }
}

/// Cart of an anonymous visitor, kept entirely in the session.
pub struct SessionCartStore {
    session: SharedSession,
    catalog: SharedCatalog,
}

impl SessionCartStore {
    pub fn new(session: SharedSession, catalog: SharedCatalog) -> Self {
        Self { session, catalog }
    }
}

#[async_trait]
impl CartStore for SessionCartStore {
    fn mode(&self) -> CartMode {
        CartMode::Ephemeral
    }

    async fn lines(&self) -> Result<Vec<LineItem>> {
        Ok(load_session_cart(&self.session).await?.lines())
    }

    async fn add(&self, key: &LineKey, quantity: Quantity, price: Option<Money>) -> Result<()> {
        match key {
            LineKey::Product(code) => {
                let product = require_product(&self.catalog, code).await?;
                let mut cart = load_session_cart(&self.session).await?;
                cart.add(key, Some(product.id), &product.name, quantity, Some(product.price))?;
                save_session_cart(&self.session, &cart).await
            }
            LineKey::Bundle(_) => {
                add_bundle_to_session(&self.catalog, &self.session, key, quantity, price).await
            }
        }
    }

    async fn update(&self, key: &LineKey, quantity: Quantity) -> Result<bool> {
        update_session_line(&self.session, key, quantity).await
    }

    async fn remove(&self, key: &LineKey) -> Result<bool> {
        remove_session_line(&self.session, key).await
    }

    async fn clear(&self) -> Result<()> {
        self.session.remove(CART_SESSION_KEY).await
    }
}

/// Picks the cart store for an identity and runs the boundary-level cart operations.
#[derive(Clone)]
pub struct CartService {
    catalog: SharedCatalog,
    carts: SharedCartRepository,
}

impl CartService {
    pub fn new(catalog: SharedCatalog, carts: SharedCartRepository) -> Self {
        Self { catalog, carts }
    }

    pub fn resolve(&self, identity: Identity, session: SharedSession) -> (CartStoreBox, CartMode) {
        let store: CartStoreBox = match identity {
            Identity::Authenticated(owner) => Box::new(PersistentCartStore::new(
                owner,
                self.carts.clone(),
                session,
                self.catalog.clone(),
            )),
            Identity::Anonymous => Box::new(SessionCartStore::new(session, self.catalog.clone())),
        };
        let mode = store.mode();
        (store, mode)
    }

    /// Moves the session's product lines into the customer's persistent cart,
    /// adding quantities onto existing rows. Bundle lines stay in the session.
    pub async fn merge_on_login(&self, owner: UserId, session: SharedSession) -> Result<()> {
        let mut session_cart = load_session_cart(&session).await?;
        let products = session_cart.take_products();
        if products.is_empty() {
            return Ok(());
        }

        let cart = self.carts.get_or_create(owner).await?;
        self.carts.merge_rows(cart.id, &products).await?;
        save_session_cart(&session, &session_cart).await?;

        tracing::info!(user_id = %owner, cart_id = %cart.id, merged = products.len(), "Session cart merged on login");
        Ok(())
    }

    /// Adds a line addressed by its raw session key. Input is validated before the
    /// stored cart is touched.
    pub async fn add_item(
        &self,
        identity: Identity,
        session: SharedSession,
        raw_key: &str,
        quantity: i64,
        price: Option<Money>,
    ) -> Result<()> {
        let key: LineKey = raw_key.parse()?;
        let quantity = Quantity::new(quantity)?;
        let (store, _) = self.resolve(identity, session);
        store.add(&key, quantity, price).await
    }

    pub async fn update_item(
        &self,
        identity: Identity,
        session: SharedSession,
        raw_key: &str,
        quantity: i64,
    ) -> Result<bool> {
        let key: LineKey = raw_key.parse()?;
        let quantity = Quantity::new(quantity)?;
        let (store, _) = self.resolve(identity, session);
        let found = store.update(&key, quantity).await?;
        if !found {
            tracing::debug!(key = %key, "Cart line not found for update");
        }
        Ok(found)
    }

    pub async fn remove_item(
        &self,
        identity: Identity,
        session: SharedSession,
        raw_key: &str,
    ) -> Result<bool> {
        let key: LineKey = raw_key.parse()?;
        let (store, _) = self.resolve(identity, session);
        store.remove(&key).await
    }
}
