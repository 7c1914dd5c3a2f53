//! Payment gateway contract: requests sent to the gateway, objects it returns and the
//! normalized events it delivers back.

use super::order::{OrderId, PaymentStatus, ShippingSnapshot, StatusUpdate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway request rejected: {0}")]
    Rejected(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("unknown gateway object: {0}")]
    UnknownObject(String),
}

/// Intent statuses in which the amount can still be changed.
pub const ACTIVE_INTENT_STATUSES: [&str; 4] = [
    "requires_payment_method",
    "requires_confirmation",
    "requires_action",
    "processing",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    #[serde(rename = "checkout.session")]
    CheckoutSession,
    #[serde(rename = "payment_intent")]
    PaymentIntent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventIdentifiers {
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
}

/// A gateway notification reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub event_id: Option<String>,
    pub object_kind: ObjectKind,
    /// Status in the gateway's own vocabulary for `object_kind`.
    pub native_status: String,
    pub identifiers: EventIdentifiers,
    pub order_id: Option<OrderId>,
    pub customer_email: Option<String>,
    pub error_message: Option<String>,
}

impl GatewayEvent {
    pub fn target_status(&self) -> Option<PaymentStatus> {
        normalize(self.object_kind, &self.native_status)
    }

    pub fn status_update(&self, status: PaymentStatus, observed_at: DateTime<Utc>) -> StatusUpdate {
        StatusUpdate {
            status,
            event_tag: self
                .event_id
                .clone()
                .or_else(|| Some(format!("{}:{}", self.kind_label(), self.native_status))),
            payment_intent_id: self.identifiers.payment_intent_id.clone(),
            checkout_session_id: self.identifiers.session_id.clone(),
            error_message: self.error_message.clone(),
            observed_at,
        }
    }

    fn kind_label(&self) -> &'static str {
        match self.object_kind {
            ObjectKind::CheckoutSession => "checkout.session",
            ObjectKind::PaymentIntent => "payment_intent",
        }
    }
}

/// Maps a native status onto the shared payment status. Unknown values give `None`.
pub fn normalize(kind: ObjectKind, native_status: &str) -> Option<PaymentStatus> {
    let status = match (kind, native_status) {
        (ObjectKind::PaymentIntent, "succeeded") => PaymentStatus::Succeeded,
        (ObjectKind::PaymentIntent, "processing") => PaymentStatus::Processing,
        (ObjectKind::PaymentIntent, "requires_action") => PaymentStatus::RequiresAction,
        (ObjectKind::PaymentIntent, "requires_payment_method" | "requires_confirmation") => {
            PaymentStatus::Pending
        }
        (ObjectKind::PaymentIntent, "payment_failed") => PaymentStatus::Failed,
        (ObjectKind::PaymentIntent, "canceled") => PaymentStatus::Canceled,
        (
            ObjectKind::CheckoutSession,
            "paid" | "complete" | "no_payment_required" | "async_payment_succeeded",
        ) => PaymentStatus::Succeeded,
        (ObjectKind::CheckoutSession, "unpaid" | "processing") => PaymentStatus::Processing,
        (ObjectKind::CheckoutSession, "async_payment_failed") => PaymentStatus::Failed,
        (ObjectKind::CheckoutSession, "expired") => PaymentStatus::Canceled,
        (ObjectKind::CheckoutSession, "open") => PaymentStatus::Pending,
        _ => return None,
    };
    Some(status)
}

/// Parameters for creating or updating a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub shipping: Option<ShippingSnapshot>,
    pub idempotency_key: Option<String>,
}

/// Partial modification of an existing intent. `None` leaves the field as is;
/// metadata keys are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentUpdate {
    pub amount_minor: Option<i64>,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub shipping: Option<ShippingSnapshot>,
}

impl From<&IntentRequest> for IntentUpdate {
    fn from(request: &IntentRequest) -> Self {
        Self {
            amount_minor: Some(request.amount_minor),
            receipt_email: request.receipt_email.clone(),
            metadata: request.metadata.clone(),
            shipping: request.shipping.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub status: String,
    pub amount_minor: i64,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl PaymentIntent {
    pub fn is_active(&self) -> bool {
        ACTIVE_INTENT_STATUSES.contains(&self.status.as_str())
    }

    /// Reports this intent as an event, for polling fallbacks.
    pub fn as_event(&self, order_id: Option<OrderId>) -> GatewayEvent {
        GatewayEvent {
            event_id: None,
            object_kind: ObjectKind::PaymentIntent,
            native_status: self.status.clone(),
            identifiers: EventIdentifiers {
                session_id: None,
                payment_intent_id: Some(self.id.clone()),
            },
            order_id,
            customer_email: self
                .receipt_email
                .clone()
                .or_else(|| self.metadata.get("customer_email").cloned()),
            error_message: None,
        }
    }
}

/// One line of a hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub currency: String,
    pub line_items: Vec<GatewayLineItem>,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
    pub idempotency_key: String,
}

impl CheckoutSessionRequest {
    pub fn amount_minor(&self) -> i64 {
        self.line_items
            .iter()
            .map(|item| item.unit_amount_minor * i64::from(item.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    /// `open`, `complete` or `expired`.
    pub status: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSession {
    /// Reports this session as an event, for polling fallbacks.
    pub fn as_event(&self, order_id: Option<OrderId>) -> GatewayEvent {
        let native_status = if self.status == "complete" {
            self.payment_status.clone()
        } else {
            self.status.clone()
        };
        GatewayEvent {
            event_id: None,
            object_kind: ObjectKind::CheckoutSession,
            native_status,
            identifiers: EventIdentifiers {
                session_id: Some(self.id.clone()),
                payment_intent_id: self.payment_intent.clone(),
            },
            order_id,
            customer_email: self.customer_email.clone(),
            error_message: None,
        }
    }
}

/// `prefix_<user|guest>[_order][_suffix]`, shared by intents and hosted sessions.
pub fn make_idempotency_key(
    prefix: &str,
    user: &str,
    order_id: Option<OrderId>,
    suffix: Option<&str>,
) -> String {
    let mut parts = vec![prefix.to_string(), user.to_string()];
    if let Some(id) = order_id {
        parts.push(id.to_string());
    }
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        parts.push(suffix.to_string());
    }
    parts.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabularies_map_to_same_target() {
        assert_eq!(
            normalize(ObjectKind::PaymentIntent, "succeeded"),
            Some(PaymentStatus::Succeeded)
        );
        assert_eq!(
            normalize(ObjectKind::CheckoutSession, "paid"),
            Some(PaymentStatus::Succeeded)
        );
        assert_eq!(
            normalize(ObjectKind::PaymentIntent, "payment_failed"),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            normalize(ObjectKind::CheckoutSession, "async_payment_failed"),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            normalize(ObjectKind::CheckoutSession, "expired"),
            Some(PaymentStatus::Canceled)
        );
        assert_eq!(normalize(ObjectKind::CheckoutSession, "succeeded"), None);
        assert_eq!(normalize(ObjectKind::PaymentIntent, "refunded"), None);
    }

    #[test]
    fn test_idempotency_keys() {
        assert_eq!(
            make_idempotency_key("checkout", "guest", Some(OrderId(12)), None),
            "checkout_guest_12"
        );
        assert_eq!(
            make_idempotency_key("checkout", "7", None, Some("retry")),
            "checkout_7_retry"
        );
    }

    #[test]
    fn test_completed_session_reports_payment_status() {
        let session = CheckoutSession {
            id: "cs_1".to_string(),
            url: "https://pay.example/cs_1".to_string(),
            status: "complete".to_string(),
            payment_status: "unpaid".to_string(),
            payment_intent: Some("pi_1".to_string()),
            customer_email: None,
            metadata: BTreeMap::new(),
        };
        let event = session.as_event(None);
        assert_eq!(event.target_status(), Some(PaymentStatus::Processing));
        assert_eq!(event.identifiers.payment_intent_id.as_deref(), Some("pi_1"));
    }
}
