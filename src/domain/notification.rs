use super::money::Money;
use super::order::{Order, OrderId};
use serde::Serialize;

/// Payment confirmation handed to the notifier once per paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConfirmation {
    pub order_id: OrderId,
    /// Customer address; `None` when no address could be found.
    pub recipient: Option<String>,
    /// Shop inbox that receives a copy.
    pub admin_copy: Option<String>,
    pub subject: String,
    pub total_price: Money,
    pub shipping: String,
    pub lines: Vec<String>,
}

impl OrderConfirmation {
    pub fn for_order(order: &Order, recipient: Option<String>, admin_copy: Option<String>) -> Self {
        Self {
            order_id: order.id,
            recipient,
            admin_copy,
            subject: format!("Your Order #{} Confirmation", order.id),
            total_price: order.total_price,
            shipping: order.shipping.formatted(),
            lines: order
                .lines
                .iter()
                .map(|line| {
                    format!("{} x {} @ {}", line.quantity.get(), line.name, line.unit_price)
                })
                .collect(),
        }
    }
}
