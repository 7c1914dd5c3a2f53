use crate::domain::notification::OrderConfirmation;
use crate::domain::ports::Notifier;
use crate::error::Result;
use async_trait::async_trait;

/// Writes confirmations to the log instead of a mail transport.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_order_confirmation(&self, confirmation: OrderConfirmation) -> Result<()> {
        tracing::info!(
            order_id = %confirmation.order_id,
            recipient = ?confirmation.recipient,
            admin_copy = ?confirmation.admin_copy,
            subject = %confirmation.subject,
            total = %confirmation.total_price,
            lines = confirmation.lines.len(),
            "Order confirmation queued"
        );
        Ok(())
    }
}
