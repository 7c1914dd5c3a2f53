use crate::domain::catalog::{Bundle, BundleId, Product, ProductId, Tier};
use crate::domain::money::Money;
use crate::error::{CommerceError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Product,
    Bundle,
}

/// One row of a catalog export.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRecord {
    pub kind: EntryKind,
    pub id: u64,
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub subtotal_price: Option<Decimal>,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub product_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    Product(Product),
    Bundle(Bundle),
}

impl TryFrom<CatalogRecord> for CatalogEntry {
    type Error = CommerceError;

    fn try_from(record: CatalogRecord) -> Result<Self> {
        let price = Money::price(record.price)?;
        match record.kind {
            EntryKind::Product => {
                let code = record
                    .code
                    .filter(|code| !code.is_empty())
                    .ok_or_else(|| {
                        CommerceError::validation(format!("Product {} has no code", record.id))
                    })?;
                Ok(CatalogEntry::Product(Product {
                    id: ProductId(record.id),
                    code,
                    name: record.name,
                    price,
                    tier: record.tier.unwrap_or_default(),
                    kind: record.product_type.unwrap_or_default(),
                }))
            }
            EntryKind::Bundle => Ok(CatalogEntry::Bundle(Bundle {
                id: BundleId(record.id),
                name: record.name,
                price,
                subtotal_price: Money::price(record.subtotal_price.unwrap_or_default())?,
                discount_percentage: record.discount_percentage.unwrap_or_default(),
            })),
        }
    }
}

/// Reads catalog entries from a CSV source.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn entries(self) -> impl Iterator<Item = Result<CatalogEntry>> {
        self.reader
            .into_deserialize::<CatalogRecord>()
            .map(|result| {
                let record = result?;
                CatalogEntry::try_from(record)
            })
    }

    /// Reads the whole source, split into products and bundles.
    pub fn load(self) -> Result<(Vec<Product>, Vec<Bundle>)> {
        let mut products = Vec::new();
        let mut bundles = Vec::new();
        for entry in self.entries() {
            match entry? {
                CatalogEntry::Product(product) => products.push(product),
                CatalogEntry::Bundle(bundle) => bundles.push(bundle),
            }
        }
        Ok((products, bundles))
    }
}
