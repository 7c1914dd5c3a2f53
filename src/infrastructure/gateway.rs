use crate::domain::gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, IntentRequest, IntentUpdate,
    PaymentIntent,
};
use crate::domain::ports::PaymentGateway;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Default)]
struct SandboxState {
    intents: HashMap<String, PaymentIntent>,
    sessions: HashMap<String, CheckoutSession>,
    /// Idempotency key to the id of the object it created.
    idempotency: HashMap<String, String>,
    next_id: u64,
    fail_next: Option<GatewayError>,
}

impl SandboxState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_sandbox_{}", self.next_id)
    }

    fn take_failure(&mut self) -> GatewayResult<()> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// An in-process payment gateway.
///
/// Behaves like the remote processor for everything the checkout flow relies on:
/// idempotency keys return the object they first created, intents move through the
/// native status vocabulary and hosted sessions can be completed. Tests drive
/// payments with [`SandboxGateway::set_intent_status`] and
/// [`SandboxGateway::complete_session`], and inject outages with
/// [`SandboxGateway::fail_next`].
#[derive(Default, Clone)]
pub struct SandboxGateway {
    state: Arc<Mutex<SandboxState>>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call, whatever it is, fails with `err`.
    pub async fn fail_next(&self, err: GatewayError) {
        self.state.lock().await.fail_next = Some(err);
    }

    pub async fn set_intent_status(&self, id: &str, status: &str) -> GatewayResult<PaymentIntent> {
        let mut state = self.state.lock().await;
        let intent = state
            .intents
            .get_mut(id)
            .ok_or_else(|| GatewayError::UnknownObject(id.to_string()))?;
        intent.status = status.to_string();
        Ok(intent.clone())
    }

    /// Completes a hosted session, attaching a payment intent to it.
    pub async fn complete_session(
        &self,
        id: &str,
        payment_status: &str,
    ) -> GatewayResult<CheckoutSession> {
        let mut state = self.state.lock().await;
        let intent_id = state.next_id("pi");
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| GatewayError::UnknownObject(id.to_string()))?;
        session.status = "complete".to_string();
        session.payment_status = payment_status.to_string();
        session.payment_intent.get_or_insert(intent_id);
        Ok(session.clone())
    }

    pub async fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.state.lock().await.intents.get(id).cloned()
    }

    pub async fn session(&self, id: &str) -> Option<CheckoutSession> {
        self.state.lock().await.sessions.get(id).cloned()
    }

    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_payment_intent(&self, request: &IntentRequest) -> GatewayResult<PaymentIntent> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        if request.amount_minor <= 0 {
            return Err(GatewayError::Rejected(
                "amount must be a positive integer".to_string(),
            ));
        }

        if let Some(key) = &request.idempotency_key
            && let Some(existing) = state
                .idempotency
                .get(key)
                .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        let id = state.next_id("pi");
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret"),
            id: id.clone(),
            status: "requires_payment_method".to_string(),
            amount_minor: request.amount_minor,
            receipt_email: request.receipt_email.clone(),
            metadata: request.metadata.clone(),
        };
        if let Some(key) = &request.idempotency_key {
            state.idempotency.insert(key.clone(), id.clone());
        }
        state.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> GatewayResult<PaymentIntent> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state
            .intents
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownObject(id.to_string()))
    }

    async fn update_payment_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
    ) -> GatewayResult<PaymentIntent> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let intent = state
            .intents
            .get_mut(id)
            .ok_or_else(|| GatewayError::UnknownObject(id.to_string()))?;
        if matches!(intent.status.as_str(), "succeeded" | "canceled") {
            return Err(GatewayError::Rejected(format!(
                "payment intent {id} is {}",
                intent.status
            )));
        }

        if let Some(amount) = update.amount_minor {
            intent.amount_minor = amount;
        }
        if let Some(email) = &update.receipt_email {
            intent.receipt_email = Some(email.clone());
        }
        intent.metadata.extend(update.metadata.clone());
        Ok(intent.clone())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> GatewayResult<CheckoutSession> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        if request.line_items.is_empty() {
            return Err(GatewayError::Rejected("line_items must not be empty".to_string()));
        }

        if let Some(existing) = state
            .idempotency
            .get(&request.idempotency_key)
            .and_then(|id| state.sessions.get(id))
        {
            return Ok(existing.clone());
        }

        let id = state.next_id("cs");
        let session = CheckoutSession {
            url: format!("https://checkout.sandbox.invalid/pay/{id}"),
            id: id.clone(),
            status: "open".to_string(),
            payment_status: "unpaid".to_string(),
            payment_intent: None,
            customer_email: request.customer_email.clone(),
            metadata: request.metadata.clone(),
        };
        state
            .idempotency
            .insert(request.idempotency_key.clone(), id.clone());
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, id: &str) -> GatewayResult<CheckoutSession> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownObject(id.to_string()))
    }
}
