use crate::error::{CommerceError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One line to put into a cart: a product code or `bundle_<id>`, a quantity and an
/// optional captured unit price.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CartRecord {
    pub key: String,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Reads cart lines from a CSV source. Keys and quantities are validated when the
/// line is added to a cart, not here.
pub struct CartReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CartReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn records(self) -> impl Iterator<Item = Result<CartRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(CommerceError::from))
    }
}
