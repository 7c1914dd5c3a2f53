use super::catalog::{BundleId, ProductId};
use super::identity::UserId;
use super::money::Money;
use crate::error::CommerceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const BUNDLE_KEY_PREFIX: &str = "bundle_";

/// A line quantity. Always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Self = Self(1);

    pub fn new(value: i64) -> Result<Self, CommerceError> {
        if value < 1 {
            return Err(CommerceError::validation("Quantity must be at least 1"));
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| CommerceError::validation("Quantity is too large"))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, CommerceError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| CommerceError::validation("Quantity is too large"))
    }
}

impl TryFrom<i64> for Quantity {
    type Error = CommerceError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

/// Addresses a cart line in mutation requests.
///
/// Session carts store this as a string (`bundle_<id>` or the product code); the
/// enum keeps the prefix parsing in one place.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineKey {
    Product(String),
    Bundle(BundleId),
}

impl FromStr for LineKey {
    type Err = CommerceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if key.is_empty() {
            return Err(CommerceError::validation("Cart key must not be empty"));
        }
        match key.strip_prefix(BUNDLE_KEY_PREFIX) {
            Some(id) => id
                .parse::<u64>()
                .map(|id| LineKey::Bundle(BundleId(id)))
                .map_err(|_| CommerceError::validation(format!("Malformed bundle key '{key}'"))),
            None => Ok(LineKey::Product(key.to_string())),
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKey::Product(code) => write!(f, "{code}"),
            LineKey::Bundle(id) => write!(f, "{BUNDLE_KEY_PREFIX}{id}"),
        }
    }
}

/// What a line refers to. Exactly one of product or bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum LineTarget {
    Product(ProductId),
    Bundle(BundleId),
}

impl LineTarget {
    pub fn is_bundle(&self) -> bool {
        matches!(self, LineTarget::Bundle(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub target: LineTarget,
    pub quantity: Quantity,
    /// Unit price shown when the line was added, if one was captured.
    pub captured_price: Option<Money>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartMode {
    Persistent,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub u64);

impl fmt::Display for CartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persistent cart owned by an authenticated customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub owner: UserId,
    pub is_active: bool,
    pub rows: Vec<CartRow>,
}

impl Cart {
    pub fn new(id: CartId, owner: UserId) -> Self {
        Self {
            id,
            owner,
            is_active: true,
            rows: Vec::new(),
        }
    }

    /// Adds to an existing row for the product or inserts a new one.
    pub fn merge(&mut self, product: ProductId, quantity: Quantity) -> Result<(), CommerceError> {
        match self.rows.iter_mut().find(|row| row.product == product) {
            Some(row) => row.quantity = row.quantity.checked_add(quantity)?,
            None => self.rows.push(CartRow { product, quantity }),
        }
        Ok(())
    }

    pub fn set_quantity(&mut self, product: ProductId, quantity: Quantity) -> bool {
        match self.rows.iter_mut().find(|row| row.product == product) {
            Some(row) => {
                row.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, product: ProductId) -> bool {
        let before = self.rows.len();
        self.rows.retain(|row| row.product != product);
        self.rows.len() != before
    }
}

/// One product row of a persistent cart; (cart, product) is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRow {
    pub product: ProductId,
    pub quantity: Quantity,
}

/// One entry of the session cart map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub name: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Money>,
}

/// The ephemeral cart kept in the session under the `cart` key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCart {
    entries: BTreeMap<String, SessionEntry>,
}

impl SessionCart {
    /// Loads the map stored in the session, dropping entries that do not parse.
    /// A value that is not a map at all gives an empty cart.
    pub fn from_session_value(value: serde_json::Value) -> Self {
        let entries = match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .filter_map(|(key, entry)| {
                    serde_json::from_value::<SessionEntry>(entry)
                        .ok()
                        .map(|entry| (key, entry))
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &LineKey) -> bool {
        self.entries.contains_key(&key.to_string())
    }

    /// Lines that can be priced. Malformed keys, zero quantities and product entries
    /// without an id are stale session data and are skipped.
    pub fn lines(&self) -> Vec<LineItem> {
        self.entries
            .iter()
            .filter_map(|(raw, entry)| {
                let key = raw.parse::<LineKey>().ok()?;
                let quantity = Quantity::new(i64::from(entry.quantity)).ok()?;
                let target = match key {
                    LineKey::Bundle(id) => LineTarget::Bundle(id),
                    LineKey::Product(_) => LineTarget::Product(entry.product_id?),
                };
                Some(LineItem {
                    target,
                    quantity,
                    captured_price: entry.price,
                })
            })
            .collect()
    }

    /// Merges by key: adds to the quantity of an existing entry or inserts a new one.
    /// A newly captured price replaces the previous one.
    pub fn add(
        &mut self,
        key: &LineKey,
        product_id: Option<ProductId>,
        name: &str,
        quantity: Quantity,
        price: Option<Money>,
    ) -> Result<(), CommerceError> {
        let raw = key.to_string();
        match self.entries.get_mut(&raw) {
            Some(entry) => {
                entry.quantity = entry
                    .quantity
                    .checked_add(quantity.get())
                    .ok_or_else(|| CommerceError::validation("Quantity is too large"))?;
                if price.is_some() {
                    entry.price = price;
                }
            }
            None => {
                self.entries.insert(
                    raw,
                    SessionEntry {
                        product_id,
                        name: name.to_string(),
                        quantity: quantity.get(),
                        price,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn set_quantity(&mut self, key: &LineKey, quantity: Quantity) -> bool {
        match self.entries.get_mut(&key.to_string()) {
            Some(entry) => {
                entry.quantity = quantity.get();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &LineKey) -> bool {
        self.entries.remove(&key.to_string()).is_some()
    }

    /// Removes and returns every product entry, leaving bundle entries in place.
    pub fn take_products(&mut self) -> Vec<(ProductId, Quantity)> {
        let mut taken = Vec::new();
        self.entries.retain(|raw, entry| {
            if matches!(raw.parse::<LineKey>(), Ok(LineKey::Bundle(_))) {
                return true;
            }
            if let (Some(id), Ok(quantity)) =
                (entry.product_id, Quantity::new(i64::from(entry.quantity)))
            {
                taken.push((id, quantity));
            }
            false
        });
        taken
    }

    /// Bundle lines only.
    pub fn bundle_lines(&self) -> Vec<LineItem> {
        self.lines()
            .into_iter()
            .filter(|line| line.target.is_bundle())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
