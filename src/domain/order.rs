use super::cart::{LineTarget, Quantity};
use super::identity::UserId;
use super::money::Money;
use super::pricing::PricingSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::RequiresAction => "requires_action",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    /// No event moves an order out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Canceled)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Canceled)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipping address captured on the order at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingSnapshot {
    pub name: String,
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub postcode: String,
    /// ISO-2 country code.
    pub country: String,
    pub phone: String,
}

impl Default for ShippingSnapshot {
    fn default() -> Self {
        Self {
            name: String::new(),
            line1: String::new(),
            line2: String::new(),
            city: String::new(),
            postcode: String::new(),
            country: "GB".to_string(),
            phone: String::new(),
        }
    }
}

impl ShippingSnapshot {
    /// Trims every field and upper-cases the country code.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.name,
            &mut self.line1,
            &mut self.line2,
            &mut self.city,
            &mut self.postcode,
            &mut self.phone,
        ] {
            *field = field.trim().to_string();
        }
        self.country = self.country.trim().to_uppercase();
        if self.country.is_empty() {
            self.country = "GB".to_string();
        }
        self
    }

    pub fn has_address(&self) -> bool {
        !self.line1.is_empty()
    }

    pub fn formatted(&self) -> String {
        let city_line = format!("{} {}", self.city, self.postcode);
        [
            self.name.as_str(),
            self.line1.as_str(),
            self.line2.as_str(),
            city_line.trim(),
            self.country.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Frozen copy of a cart line at order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub target: LineTarget,
    pub name: String,
    pub quantity: Quantity,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn subtotal(&self) -> Money {
        self.unit_price * self.quantity.get()
    }
}

/// Everything needed to write or refresh a pending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub owner: Option<UserId>,
    pub total_amount: Money,
    pub discount_total: Money,
    pub delivery_fee: Money,
    pub total_price: Money,
    pub is_first_order: bool,
    pub shipping: ShippingSnapshot,
    pub contact_email: String,
    pub lines: Vec<OrderLine>,
}

impl OrderDraft {
    /// Copies the monetary fields verbatim from the summary; nothing is recomputed.
    pub fn from_summary(
        owner: Option<UserId>,
        summary: &PricingSummary,
        shipping: ShippingSnapshot,
        contact_email: String,
    ) -> Self {
        let lines = summary
            .lines
            .iter()
            .map(|line| OrderLine {
                target: line.target,
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_after,
            })
            .collect();

        Self {
            owner,
            total_amount: summary.total_before_discount,
            discount_total: summary.discount_total(),
            delivery_fee: summary.delivery_fee,
            total_price: summary.grand_total,
            is_first_order: summary.first_time_discount_applied,
            shipping: shipping.normalized(),
            contact_email,
            lines,
        }
    }
}

/// Gateway object an order is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GatewayRef {
    PaymentIntent(String),
    CheckoutSession(String),
}

impl GatewayRef {
    pub fn id(&self) -> &str {
        match self {
            GatewayRef::PaymentIntent(id) | GatewayRef::CheckoutSession(id) => id,
        }
    }
}

/// A status observation to fold into an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PaymentStatus,
    pub event_tag: Option<String>,
    pub payment_intent_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub error_message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// What applying a [`StatusUpdate`] did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// First entry into `succeeded`.
    Paid,
    /// Entry into `failed` or `canceled`.
    Failed,
    /// Moved between non-terminal statuses.
    Progressed,
}

impl Transition {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Pre-discount subtotal.
    pub total_amount: Money,
    pub discount_total: Money,
    pub delivery_fee: Money,
    /// Grand total billed to the gateway.
    pub total_price: Money,
    pub is_first_order: bool,
    pub shipping: ShippingSnapshot,
    pub contact_email: String,
    pub payment_status: PaymentStatus,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_intent_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub latest_event: String,
    pub last_error: String,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn new(id: OrderId, draft: OrderDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: draft.owner,
            created_at,
            total_amount: draft.total_amount,
            discount_total: draft.discount_total,
            delivery_fee: draft.delivery_fee,
            total_price: draft.total_price,
            is_first_order: draft.is_first_order,
            shipping: draft.shipping,
            contact_email: draft.contact_email,
            payment_status: PaymentStatus::Pending,
            is_paid: false,
            paid_at: None,
            payment_intent_id: None,
            checkout_session_id: None,
            latest_event: String::new(),
            last_error: String::new(),
            lines: draft.lines,
        }
    }

    /// A pending checkout may still be re-priced and have its lines replaced.
    pub fn is_refreshable(&self) -> bool {
        !self.is_paid && !self.payment_status.is_terminal()
    }

    /// Replaces the monetary snapshot, shipping and lines with a newer draft.
    pub fn refresh(&mut self, draft: OrderDraft) {
        self.owner = draft.owner;
        self.total_amount = draft.total_amount;
        self.discount_total = draft.discount_total;
        self.delivery_fee = draft.delivery_fee;
        self.total_price = draft.total_price;
        self.is_first_order = draft.is_first_order;
        self.shipping = draft.shipping;
        self.contact_email = draft.contact_email;
        self.lines = draft.lines;
    }

    pub fn attach(&mut self, reference: GatewayRef) {
        match reference {
            GatewayRef::PaymentIntent(id) => self.payment_intent_id = Some(id),
            GatewayRef::CheckoutSession(id) => self.checkout_session_id = Some(id),
        }
    }

    /// Gateway identifiers held now that `previous` did not hold.
    pub fn refs_learned_since(&self, previous: &Order) -> Vec<GatewayRef> {
        let mut learned = Vec::new();
        if let Some(pi) = &self.payment_intent_id
            && previous.payment_intent_id.as_ref() != Some(pi)
        {
            learned.push(GatewayRef::PaymentIntent(pi.clone()));
        }
        if let Some(cs) = &self.checkout_session_id
            && previous.checkout_session_id.as_ref() != Some(cs)
        {
            learned.push(GatewayRef::CheckoutSession(cs.clone()));
        }
        learned
    }

    /// Puts back `previous`'s identifier of the same kind as `reference`.
    pub fn revert_ref(&mut self, reference: &GatewayRef, previous: &Order) {
        match reference {
            GatewayRef::PaymentIntent(_) => {
                self.payment_intent_id = previous.payment_intent_id.clone()
            }
            GatewayRef::CheckoutSession(_) => {
                self.checkout_session_id = previous.checkout_session_id.clone()
            }
        }
    }

    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }

    /// Folds a gateway observation into the order.
    ///
    /// Terminal statuses never change and `is_paid` is only ever set here, on the
    /// first entry into `succeeded`.
    pub fn apply(&mut self, update: &StatusUpdate, error_limit: usize) -> Transition {
        if self.is_paid || self.payment_status.is_terminal() {
            return Transition::Unchanged;
        }

        match update.status {
            PaymentStatus::Succeeded => {
                self.payment_status = PaymentStatus::Succeeded;
                self.is_paid = true;
                self.paid_at = Some(update.observed_at);
                if let Some(pi) = &update.payment_intent_id {
                    self.payment_intent_id = Some(pi.clone());
                }
                if self.checkout_session_id.is_none() {
                    self.checkout_session_id = update.checkout_session_id.clone();
                }
                self.last_error.clear();
                self.record_event(update);
                Transition::Paid
            }
            status if status.is_failure() => {
                if self.payment_status == status {
                    return Transition::Unchanged;
                }
                self.payment_status = status;
                let message = update
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Payment {status}"));
                self.last_error = bounded(&message, error_limit);
                self.record_event(update);
                Transition::Failed
            }
            status => {
                if self.payment_status == status {
                    return Transition::Unchanged;
                }
                self.payment_status = status;
                self.record_event(update);
                Transition::Progressed
            }
        }
    }

    fn record_event(&mut self, update: &StatusUpdate) {
        if let Some(tag) = &update.event_tag {
            self.latest_event = bounded(tag, 64);
        }
    }
}

fn bounded(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::ProductId;
    use rust_decimal_macros::dec;

    fn pending_order() -> Order {
        let draft = OrderDraft {
            owner: Some(UserId(1)),
            total_amount: Money::new(dec!(21.47)),
            discount_total: Money::new(dec!(2.15)),
            delivery_fee: Money::new(dec!(4.99)),
            total_price: Money::new(dec!(24.31)),
            is_first_order: false,
            shipping: ShippingSnapshot::default(),
            contact_email: "buyer@example.com".to_string(),
            lines: vec![OrderLine {
                target: LineTarget::Product(ProductId(1)),
                name: "Dash Cam".to_string(),
                quantity: Quantity::ONE,
                unit_price: Money::new(dec!(19.32)),
            }],
        };
        Order::new(OrderId(1), draft, Utc::now())
    }

    fn update(status: PaymentStatus) -> StatusUpdate {
        StatusUpdate {
            status,
            event_tag: Some("evt_1".to_string()),
            payment_intent_id: Some("pi_1".to_string()),
            checkout_session_id: None,
            error_message: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_success_marks_paid() {
        let mut order = pending_order();
        order.last_error = "card declined".to_string();

        let transition = order.apply(&update(PaymentStatus::Succeeded), 500);

        assert_eq!(transition, Transition::Paid);
        assert!(order.is_paid);
        assert!(order.paid_at.is_some());
        assert_eq!(order.payment_intent_id.as_deref(), Some("pi_1"));
        assert!(order.last_error.is_empty());
        assert_eq!(order.latest_event, "evt_1");
    }

    #[test]
    fn test_success_is_idempotent() {
        let mut order = pending_order();
        order.apply(&update(PaymentStatus::Succeeded), 500);
        let snapshot = order.clone();

        let transition = order.apply(&update(PaymentStatus::Succeeded), 500);

        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(order, snapshot);
    }

    #[test]
    fn test_terminal_status_never_regresses() {
        let mut order = pending_order();
        order.apply(&update(PaymentStatus::Succeeded), 500);

        assert_eq!(
            order.apply(&update(PaymentStatus::Processing), 500),
            Transition::Unchanged
        );
        assert_eq!(
            order.apply(&update(PaymentStatus::Failed), 500),
            Transition::Unchanged
        );
        assert_eq!(order.payment_status, PaymentStatus::Succeeded);

        let mut canceled = pending_order();
        canceled.apply(&update(PaymentStatus::Canceled), 500);
        assert_eq!(
            canceled.apply(&update(PaymentStatus::Succeeded), 500),
            Transition::Unchanged
        );
        assert!(!canceled.is_paid);
    }

    #[test]
    fn test_failed_can_be_retried() {
        let mut order = pending_order();
        let mut failed = update(PaymentStatus::Failed);
        failed.error_message = Some("Your card was declined.".to_string());

        assert_eq!(order.apply(&failed, 500), Transition::Failed);
        assert_eq!(order.last_error, "Your card was declined.");
        assert_eq!(
            order.apply(&update(PaymentStatus::Processing), 500),
            Transition::Progressed
        );
        assert_eq!(
            order.apply(&update(PaymentStatus::Succeeded), 500),
            Transition::Paid
        );
    }

    #[test]
    fn test_error_message_is_bounded() {
        let mut order = pending_order();
        let mut failed = update(PaymentStatus::Failed);
        failed.error_message = Some("é".repeat(1000));

        order.apply(&failed, 10);
        assert_eq!(order.last_error.chars().count(), 10);
    }

    #[test]
    fn test_learned_refs_and_revert() {
        let previous = pending_order();
        let mut order = previous.clone();
        let mut update = update(PaymentStatus::Succeeded);
        update.checkout_session_id = Some("cs_1".to_string());
        order.apply(&update, 500);

        let learned = order.refs_learned_since(&previous);
        assert_eq!(
            learned,
            vec![
                GatewayRef::PaymentIntent("pi_1".to_string()),
                GatewayRef::CheckoutSession("cs_1".to_string())
            ]
        );

        order.revert_ref(&learned[0], &previous);
        assert_eq!(order.payment_intent_id, None);
        assert_eq!(order.refs_learned_since(&previous).len(), 1);
    }

    #[test]
    fn test_refresh_replaces_snapshot() {
        let mut order = pending_order();
        let mut draft = OrderDraft {
            owner: None,
            total_amount: Money::new(dec!(10.00)),
            discount_total: Money::ZERO,
            delivery_fee: Money::new(dec!(4.99)),
            total_price: Money::new(dec!(14.99)),
            is_first_order: false,
            shipping: ShippingSnapshot::default(),
            contact_email: String::new(),
            lines: Vec::new(),
        };
        draft.lines.push(OrderLine {
            target: LineTarget::Product(ProductId(2)),
            name: "Mount".to_string(),
            quantity: Quantity::ONE,
            unit_price: Money::new(dec!(10.00)),
        });

        assert!(order.is_refreshable());
        order.refresh(draft);
        assert_eq!(order.total_price, Money::new(dec!(14.99)));
        assert_eq!(order.lines_total(), Money::new(dec!(10.00)));
    }

    #[test]
    fn test_shipping_normalization() {
        let shipping = ShippingSnapshot {
            name: " Ada ".to_string(),
            line1: "1 High St".to_string(),
            city: "Leeds".to_string(),
            postcode: "LS1 1AA".to_string(),
            country: "gb".to_string(),
            ..ShippingSnapshot::default()
        }
        .normalized();

        assert_eq!(shipping.country, "GB");
        assert!(shipping.has_address());
        assert_eq!(shipping.formatted(), "Ada, 1 High St, Leeds LS1 1AA, GB");
    }
}
