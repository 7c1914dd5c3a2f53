//! Inbound gateway webhooks: signature verification, envelope parsing and the
//! status-code contract with the gateway's retry logic.

use crate::application::reconcile::ReconciliationEngine;
use crate::config::WebhookSettings;
use crate::domain::gateway::{EventIdentifiers, GatewayEvent, ObjectKind};
use crate::domain::order::OrderId;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("webhook signing secret is not configured")]
    MissingSecret,
}

/// Checks `t=<unix>,v1=<hex>` signature headers.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl WebhookVerifier {
    /// Fails on a blank secret, which would let anyone produce a valid signature.
    pub fn new(settings: &WebhookSettings) -> Result<Self, WebhookError> {
        if settings.secret.trim().is_empty() {
            return Err(WebhookError::MissingSecret);
        }
        Ok(Self {
            secret: settings.secret.clone(),
            tolerance: settings.tolerance,
        })
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::SignatureMismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Produces a header for `payload`, as the gateway would.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let signature = hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={signature}"))
    }

    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(WebhookError::MissingSignature);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| WebhookError::MalformedHeader)?,
                    )
                }
                Some(("v1", value)) => signatures.push(value),
                Some(_) => {}
                None => return Err(WebhookError::MalformedHeader),
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }

        let age = now.timestamp().abs_diff(timestamp);
        if age > self.tolerance.as_secs() {
            return Err(WebhookError::StaleTimestamp);
        }

        let matched = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            self.mac(timestamp, payload)
                .is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
        });
        if matched {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PaymentErrorObject {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    receipt_email: Option<String>,
    #[serde(default)]
    last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
}

fn metadata_order_id(metadata: &BTreeMap<String, String>) -> Option<OrderId> {
    metadata
        .get("order_id")
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(OrderId)
}

fn invalid(err: serde_json::Error) -> WebhookError {
    WebhookError::InvalidPayload(err.to_string())
}

/// Parses a webhook envelope. Event types the shop does not handle give `None`.
pub fn parse_event(payload: &[u8]) -> Result<Option<GatewayEvent>, WebhookError> {
    let envelope: Envelope = serde_json::from_slice(payload).map_err(invalid)?;

    if let Some(native_status) = envelope.kind.strip_prefix("payment_intent.") {
        if !matches!(
            native_status,
            "succeeded" | "canceled" | "payment_failed" | "processing"
        ) {
            return Ok(None);
        }
        let intent: IntentObject =
            serde_json::from_value(envelope.data.object).map_err(invalid)?;
        return Ok(Some(GatewayEvent {
            event_id: envelope.id,
            object_kind: ObjectKind::PaymentIntent,
            native_status: native_status.to_string(),
            order_id: metadata_order_id(&intent.metadata),
            customer_email: intent
                .receipt_email
                .or_else(|| intent.metadata.get("customer_email").cloned()),
            error_message: intent.last_payment_error.and_then(|error| error.message),
            identifiers: EventIdentifiers {
                session_id: None,
                payment_intent_id: Some(intent.id),
            },
        }));
    }

    if let Some(event) = envelope.kind.strip_prefix("checkout.session.") {
        if !matches!(
            event,
            "completed" | "async_payment_succeeded" | "async_payment_failed" | "expired"
        ) {
            return Ok(None);
        }
        let session: SessionObject =
            serde_json::from_value(envelope.data.object).map_err(invalid)?;
        let native_status = match event {
            "completed" => session
                .payment_status
                .clone()
                .unwrap_or_else(|| "complete".to_string()),
            other => other.to_string(),
        };
        return Ok(Some(GatewayEvent {
            event_id: envelope.id,
            object_kind: ObjectKind::CheckoutSession,
            native_status,
            order_id: metadata_order_id(&session.metadata),
            customer_email: session
                .customer_details
                .and_then(|details| details.email)
                .or(session.customer_email),
            error_message: None,
            identifiers: EventIdentifiers {
                session_id: Some(session.id),
                payment_intent_id: session.payment_intent,
            },
        }));
    }

    Ok(None)
}

/// Status code and body returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Verifies, parses and reconciles one webhook delivery.
///
/// 400 tells the gateway the request is bad and must not be retried, 500 asks it
/// to retry later, 200 acknowledges, including event types the shop ignores.
pub struct WebhookHandler {
    verifier: WebhookVerifier,
    engine: ReconciliationEngine,
}

impl WebhookHandler {
    pub fn new(verifier: WebhookVerifier, engine: ReconciliationEngine) -> Self {
        Self { verifier, engine }
    }

    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> WebhookResponse {
        self.handle_at(payload, signature, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> WebhookResponse {
        let verified = signature
            .ok_or(WebhookError::MissingSignature)
            .and_then(|header| self.verifier.verify(payload, header, now));
        if let Err(e) = verified {
            tracing::warn!(error = %e, "Rejected webhook signature");
            return WebhookResponse::new(400, "invalid signature");
        }

        let event = match parse_event(payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!("Ignoring unhandled webhook event type");
                return WebhookResponse::new(200, "ignored");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected webhook payload");
                return WebhookResponse::new(400, "invalid payload");
            }
        };

        match self.engine.reconcile(&event).await {
            Ok(_) => WebhookResponse::new(200, "ok"),
            Err(e) => {
                tracing::error!(event = ?event.event_id, error = %e, "Webhook processing failed");
                WebhookResponse::new(500, "processing error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::PaymentStatus;
    use serde_json::json;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(&WebhookSettings {
            secret: "whsec_test".to_string(),
            tolerance: Duration::from_secs(300),
        })
        .unwrap()
    }

    #[test]
    fn test_blank_secret_is_rejected() {
        assert_eq!(
            WebhookVerifier::new(&WebhookSettings::default()).err(),
            Some(WebhookError::MissingSecret)
        );
        let blank = WebhookSettings {
            secret: "  ".to_string(),
            ..WebhookSettings::default()
        };
        assert!(WebhookVerifier::new(&blank).is_err());
    }

    #[test]
    fn test_signature_round_trip() {
        let verifier = verifier();
        let now = Utc::now();
        let header = verifier.sign(b"{}", now.timestamp()).unwrap();
        assert!(verifier.verify(b"{}", &header, now).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let verifier = verifier();
        let now = Utc::now();
        let header = verifier.sign(b"{\"a\":1}", now.timestamp()).unwrap();
        assert_eq!(
            verifier.verify(b"{\"a\":2}", &header, now),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_signature_rejects_stale_timestamp() {
        let verifier = verifier();
        let now = Utc::now();
        let header = verifier.sign(b"{}", now.timestamp() - 301).unwrap();
        assert_eq!(
            verifier.verify(b"{}", &header, now),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn test_signature_rejects_garbage() {
        let verifier = verifier();
        let now = Utc::now();
        assert_eq!(
            verifier.verify(b"{}", "garbage", now),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verifier.verify(b"{}", "", now),
            Err(WebhookError::MissingSignature)
        );
        assert_eq!(
            verifier.verify(b"{}", &format!("t={},v1=zz", now.timestamp()), now),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_parse_payment_failed_intent() {
        let payload = json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "data": {"object": {
                "id": "pi_1",
                "status": "requires_payment_method",
                "metadata": {"order_id": "12", "user_id": "guest"},
                "last_payment_error": {"message": "Your card was declined."}
            }}
        });
        let event = parse_event(payload.to_string().as_bytes()).unwrap().unwrap();

        assert_eq!(event.order_id, Some(OrderId(12)));
        assert_eq!(event.target_status(), Some(PaymentStatus::Failed));
        assert_eq!(event.error_message.as_deref(), Some("Your card was declined."));
    }

    #[test]
    fn test_parse_completed_session_uses_payment_status() {
        let payload = json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_1",
                "payment_status": "paid",
                "payment_intent": "pi_7",
                "customer_details": {"email": "buyer@example.com"},
                "metadata": {}
            }}
        });
        let event = parse_event(payload.to_string().as_bytes()).unwrap().unwrap();

        assert_eq!(event.target_status(), Some(PaymentStatus::Succeeded));
        assert_eq!(event.identifiers.session_id.as_deref(), Some("cs_1"));
        assert_eq!(event.identifiers.payment_intent_id.as_deref(), Some("pi_7"));
        assert_eq!(event.customer_email.as_deref(), Some("buyer@example.com"));
        assert_eq!(event.order_id, None);
    }

    #[test]
    fn test_unhandled_types_are_ignored() {
        let payload = json!({"id": "evt_3", "type": "charge.refunded", "data": {"object": {}}});
        assert_eq!(parse_event(payload.to_string().as_bytes()).unwrap(), None);
        assert!(matches!(
            parse_event(b"not json"),
            Err(WebhookError::InvalidPayload(_))
        ));
    }
}
