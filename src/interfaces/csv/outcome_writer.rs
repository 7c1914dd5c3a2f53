use crate::domain::order::Order;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Result of replaying one gateway event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub event_id: String,
    pub order_id: Option<u64>,
    pub payment_status: String,
    pub is_paid: bool,
}

impl OutcomeRecord {
    pub fn matched(event_id: Option<&str>, order: &Order) -> Self {
        Self {
            event_id: event_id.unwrap_or_default().to_string(),
            order_id: Some(order.id.0),
            payment_status: order.payment_status.as_str().to_string(),
            is_paid: order.is_paid,
        }
    }

    /// The event named no known order, or was of a type that is not reconciled.
    pub fn unmatched(event_id: Option<&str>) -> Self {
        Self {
            event_id: event_id.unwrap_or_default().to_string(),
            order_id: None,
            payment_status: String::new(),
            is_paid: false,
        }
    }
}

pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, record: &OutcomeRecord) -> Result<()> {
        self.writer.serialize(record)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
