use crate::config::NotificationSettings;
use crate::domain::gateway::GatewayEvent;
use crate::domain::notification::OrderConfirmation;
use crate::domain::order::{GatewayRef, Order, Transition};
use crate::domain::ports::{SharedCustomerStore, SharedNotifier, SharedOrderStore};
use crate::error::Result;
use chrono::Utc;

/// Advances order payment status from gateway events.
///
/// `ReconciliationEngine` is safe to call any number of times with the same event,
/// in any order and from concurrent tasks: the status change runs under the order's
/// row lock in the store, and side effects only fire on the transition that the
/// store reports as the first entry into `succeeded`.
#[derive(Clone)]
pub struct ReconciliationEngine {
    orders: SharedOrderStore,
    customers: SharedCustomerStore,
    notifier: SharedNotifier,
    notifications: NotificationSettings,
    error_limit: usize,
}

impl ReconciliationEngine {
    pub fn new(
        orders: SharedOrderStore,
        customers: SharedCustomerStore,
        notifier: SharedNotifier,
        notifications: NotificationSettings,
        error_limit: usize,
    ) -> Self {
        Self {
            orders,
            customers,
            notifier,
            notifications,
            error_limit,
        }
    }

    /// Folds one gateway event into its order.
    ///
    /// Returns `None` when no order matches the event. Events whose status is not
    /// understood leave the order untouched and return it as is.
    pub async fn reconcile(&self, event: &GatewayEvent) -> Result<Option<Order>> {
        let Some(order) = self.resolve_order(event).await? else {
            tracing::warn!(
                event = ?event.event_id,
                session_id = ?event.identifiers.session_id,
                payment_intent_id = ?event.identifiers.payment_intent_id,
                "No order found for gateway event"
            );
            return Ok(None);
        };

        let Some(status) = event.target_status() else {
            tracing::warn!(
                order_id = %order.id,
                native_status = %event.native_status,
                kind = ?event.object_kind,
                "Ignoring unknown gateway status"
            );
            return Ok(Some(order));
        };

        let update = event.status_update(status, Utc::now());
        let Some((order, transition)) = self
            .orders
            .apply_update(order.id, &update, self.error_limit)
            .await?
        else {
            return Ok(None);
        };

        match transition {
            Transition::Paid => {
                tracing::info!(order_id = %order.id, event = ?update.event_tag, total = %order.total_price, "Order paid");
                self.after_payment(&order, event).await;
            }
            Transition::Failed => {
                tracing::info!(order_id = %order.id, status = %order.payment_status, error = %order.last_error, "Order payment failed");
            }
            Transition::Progressed => {
                tracing::info!(order_id = %order.id, status = %order.payment_status, "Order payment status updated");
            }
            Transition::Unchanged => {
                tracing::debug!(order_id = %order.id, status = %order.payment_status, target = %status, "Gateway event left order unchanged");
            }
        }

        Ok(Some(order))
    }

    async fn resolve_order(&self, event: &GatewayEvent) -> Result<Option<Order>> {
        if let Some(id) = event.order_id {
            if let Some(order) = self.orders.get(id).await? {
                return Ok(Some(order));
            }
            tracing::warn!(order_id = %id, "Order from event metadata not found, trying gateway identifiers");
        }

        if let Some(session_id) = &event.identifiers.session_id
            && let Some(order) = self
                .orders
                .find_by_ref(&GatewayRef::CheckoutSession(session_id.clone()))
                .await?
        {
            return Ok(Some(order));
        }

        if let Some(intent_id) = &event.identifiers.payment_intent_id {
            return self
                .orders
                .find_by_ref(&GatewayRef::PaymentIntent(intent_id.clone()))
                .await;
        }

        Ok(None)
    }

    /// Side effects of the first successful payment. Failures here are logged and
    /// never undo the payment.
    async fn after_payment(&self, order: &Order, event: &GatewayEvent) {
        self.send_confirmation(order, event).await;

        if let Some(owner) = order.owner {
            match self.customers.consume_first_time_discount(owner).await {
                Ok(true) => tracing::info!(user_id = %owner, "First-time discount consumed"),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(user_id = %owner, error = %e, "Failed to clear first-time buyer flag")
                }
            }
        }
    }

    async fn send_confirmation(&self, order: &Order, event: &GatewayEvent) {
        if !self.notifications.enabled {
            tracing::info!(order_id = %order.id, "Order confirmations disabled, skipping");
            return;
        }

        let recipient = self.recipient(order, event).await;
        let admin_copy = self.notifications.admin_email.clone();
        if recipient.is_none() {
            tracing::warn!(order_id = %order.id, "No customer email for order confirmation");
            if admin_copy.is_none() {
                return;
            }
        }

        let confirmation = OrderConfirmation::for_order(order, recipient, admin_copy);
        if let Err(e) = self.notifier.send_order_confirmation(confirmation).await {
            tracing::error!(order_id = %order.id, error = %e, "Failed to send order confirmation");
        }
    }

    /// Event email first, then the order's contact email, then the owner's account.
    async fn recipient(&self, order: &Order, event: &GatewayEvent) -> Option<String> {
        let non_empty = |email: &str| {
            let email = email.trim();
            (!email.is_empty()).then(|| email.to_string())
        };

        if let Some(email) = event.customer_email.as_deref().and_then(non_empty) {
            return Some(email);
        }
        if let Some(email) = non_empty(&order.contact_email) {
            return Some(email);
        }
        let owner = order.owner?;
        match self.customers.get(owner).await {
            Ok(customer) => customer
                .and_then(|customer| customer.email)
                .as_deref()
                .and_then(non_empty),
            Err(e) => {
                tracing::error!(user_id = %owner, error = %e, "Failed to load customer email");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cart::{LineTarget, Quantity};
    use crate::domain::catalog::BundleId;
    use crate::domain::gateway::{EventIdentifiers, ObjectKind};
    use crate::domain::identity::{Customer, UserId};
    use crate::domain::money::Money;
    use crate::domain::order::{OrderDraft, OrderLine, PaymentStatus, ShippingSnapshot};
    use crate::domain::ports::{CustomerStore, OrderStore};
    use crate::infrastructure::in_memory::{
        InMemoryCustomerStore, InMemoryOrderStore, RecordingNotifier,
    };
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        orders: Arc<InMemoryOrderStore>,
        customers: Arc<InMemoryCustomerStore>,
        notifier: Arc<RecordingNotifier>,
        engine: ReconciliationEngine,
    }

    fn fixture(notifications: NotificationSettings) -> Fixture {
        let orders = Arc::new(InMemoryOrderStore::new());
        let customers = Arc::new(InMemoryCustomerStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = ReconciliationEngine::new(
            orders.clone(),
            customers.clone(),
            notifier.clone(),
            notifications,
            500,
        );
        Fixture {
            orders,
            customers,
            notifier,
            engine,
        }
    }

    fn draft(owner: Option<UserId>, email: &str) -> OrderDraft {
        OrderDraft {
            owner,
            total_amount: Money::new(dec!(21.47)),
            discount_total: Money::new(dec!(2.15)),
            delivery_fee: Money::new(dec!(4.99)),
            total_price: Money::new(dec!(24.31)),
            is_first_order: false,
            shipping: ShippingSnapshot::default(),
            contact_email: email.to_string(),
            lines: vec![OrderLine {
                target: LineTarget::Bundle(BundleId(1)),
                name: "Starter Kit".to_string(),
                quantity: Quantity::ONE,
                unit_price: Money::new(dec!(19.32)),
            }],
        }
    }

    fn intent_event(intent: &str, status: &str) -> GatewayEvent {
        GatewayEvent {
            event_id: Some(format!("evt_{status}")),
            object_kind: ObjectKind::PaymentIntent,
            native_status: status.to_string(),
            identifiers: EventIdentifiers {
                session_id: None,
                payment_intent_id: Some(intent.to_string()),
            },
            order_id: None,
            customer_email: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_recipient_falls_back_to_account_email() {
        let f = fixture(NotificationSettings::default());
        let user = UserId(3);
        f.customers
            .store(Customer::new(user, Some("account@example.com".to_string())))
            .await
            .unwrap();
        let order = f.orders.create(draft(Some(user), "")).await.unwrap();
        f.orders
            .attach_ref(order.id, GatewayRef::PaymentIntent("pi_1".to_string()))
            .await
            .unwrap();

        f.engine
            .reconcile(&intent_event("pi_1", "succeeded"))
            .await
            .unwrap();

        let sent = f.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient.as_deref(), Some("account@example.com"));
    }

    #[tokio::test]
    async fn test_metadata_order_id_wins_over_identifiers() {
        let f = fixture(NotificationSettings::default());
        let first = f.orders.create(draft(None, "a@example.com")).await.unwrap();
        let second = f.orders.create(draft(None, "b@example.com")).await.unwrap();
        f.orders
            .attach_ref(first.id, GatewayRef::PaymentIntent("pi_first".to_string()))
            .await
            .unwrap();

        let mut event = intent_event("pi_other", "processing");
        event.order_id = Some(second.id);
        let order = f.engine.reconcile(&event).await.unwrap().unwrap();

        assert_eq!(order.id, second.id);
        assert_eq!(order.payment_status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn test_unknown_status_leaves_order_unchanged() {
        let f = fixture(NotificationSettings::default());
        let order = f.orders.create(draft(None, "a@example.com")).await.unwrap();
        f.orders
            .attach_ref(order.id, GatewayRef::PaymentIntent("pi_1".to_string()))
            .await
            .unwrap();

        let result = f
            .engine
            .reconcile(&intent_event("pi_1", "refunded"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.payment_status, PaymentStatus::Pending);
        assert!(result.latest_event.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_event_is_dropped() {
        let f = fixture(NotificationSettings::default());
        let result = f
            .engine
            .reconcile(&intent_event("pi_missing", "succeeded"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(f.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_confirmations_still_mark_paid() {
        let f = fixture(NotificationSettings {
            enabled: false,
            admin_email: None,
        });
        let order = f.orders.create(draft(None, "a@example.com")).await.unwrap();
        let mut event = intent_event("pi_1", "succeeded");
        event.order_id = Some(order.id);

        let order = f.engine.reconcile(&event).await.unwrap().unwrap();

        assert!(order.is_paid);
        assert!(f.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_admin_copy_is_attached() {
        let f = fixture(NotificationSettings {
            enabled: true,
            admin_email: Some("shop@example.com".to_string()),
        });
        let order = f.orders.create(draft(None, "")).await.unwrap();
        let mut event = intent_event("pi_1", "succeeded");
        event.order_id = Some(order.id);

        f.engine.reconcile(&event).await.unwrap();

        let sent = f.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, None);
        assert_eq!(sent[0].admin_copy.as_deref(), Some("shop@example.com"));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_payment() {
        let f = fixture(NotificationSettings::default());
        f.notifier.set_failing(true);
        let order = f.orders.create(draft(None, "a@example.com")).await.unwrap();
        let mut event = intent_event("pi_1", "succeeded");
        event.order_id = Some(order.id);

        let order = f.engine.reconcile(&event).await.unwrap().unwrap();
        assert!(order.is_paid);
        assert!(f.orders.get(order.id).await.unwrap().unwrap().is_paid);
    }
}
