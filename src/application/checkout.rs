//! Turning a priced cart into a pending order and a gateway payment object.

use super::cart::CartService;
use super::pricing::PricingEngine;
use super::reconcile::ReconciliationEngine;
use crate::config::CheckoutSettings;
use crate::domain::gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayLineItem, IntentRequest,
    IntentUpdate, PaymentIntent, make_idempotency_key,
};
use crate::domain::identity::Identity;
use crate::domain::order::{GatewayRef, Order, OrderDraft, OrderId, ShippingSnapshot};
use crate::domain::ports::{SharedCustomerStore, SharedGateway, SharedOrderStore, SharedSession};
use crate::domain::pricing::PricingSummary;
use crate::error::{CommerceError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Session key anchoring the pending order of the current checkout.
pub const PENDING_ORDER_KEY: &str = "pending_order_id";

const DELIVERY_LINE_NAME: &str = "Delivery Fee";

/// Customer input collected by the checkout form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub shipping: ShippingSnapshot,
    /// Receipt address typed by a guest. Authenticated customers fall back to their
    /// account email.
    pub email: Option<String>,
}

/// What the payment form needs to confirm an intent client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentHandle {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub order_id: OrderId,
}

/// A hosted checkout page the customer is redirected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostedCheckout {
    pub order_id: OrderId,
    pub session_id: String,
    pub url: String,
}

pub struct CheckoutService {
    carts: CartService,
    pricing: PricingEngine,
    orders: SharedOrderStore,
    customers: SharedCustomerStore,
    gateway: SharedGateway,
    reconciler: ReconciliationEngine,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        carts: CartService,
        pricing: PricingEngine,
        orders: SharedOrderStore,
        customers: SharedCustomerStore,
        gateway: SharedGateway,
        reconciler: ReconciliationEngine,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            carts,
            pricing,
            orders,
            customers,
            gateway,
            reconciler,
            settings,
        }
    }

    /// Persists `summary` as a pending order.
    ///
    /// A pending order already anchored in this session is refreshed in place
    /// instead of creating a new one, as long as it has not reached a terminal status
    /// and is either a guest order or already owned by this identity. A guest who logs
    /// in mid-checkout keeps their order, which then moves to the account.
    pub async fn create_pending_order(
        &self,
        identity: Identity,
        session: &SharedSession,
        summary: &PricingSummary,
        request: &CheckoutRequest,
    ) -> Result<Order> {
        if summary.is_empty() {
            return Err(CommerceError::validation("Your cart is empty"));
        }

        let contact_email = self.contact_email(identity, request).await?;
        let draft = OrderDraft::from_summary(
            identity.user_id(),
            summary,
            request.shipping.clone(),
            contact_email,
        );

        if let Some(id) = pending_order_id(session).await?
            && let Some(existing) = self.orders.get(id).await?
            && (existing.owner.is_none() || existing.owner == identity.user_id())
            && let Some(order) = self.orders.refresh_pending(id, draft.clone()).await?
        {
            tracing::info!(order_id = %order.id, total = %order.total_price, "Pending order refreshed");
            return Ok(order);
        }

        let order = self.orders.create(draft).await?;
        session
            .set(PENDING_ORDER_KEY, serde_json::to_value(order.id)?)
            .await?;
        tracing::info!(order_id = %order.id, user = %identity.label(), total = %order.total_price, "Pending order created");
        Ok(order)
    }

    /// Prices the cart, creates or refreshes the pending order and returns a payment
    /// intent billed at the order's grand total.
    pub async fn start_payment_intent(
        &self,
        identity: Identity,
        session: SharedSession,
        request: CheckoutRequest,
    ) -> Result<IntentHandle> {
        let (cart, _) = self.carts.resolve(identity, session.clone());
        let summary = self.pricing.price(cart.as_ref(), identity).await?;
        let order = self
            .create_pending_order(identity, &session, &summary, &request)
            .await?;

        let intent_request = self.intent_request(identity, &order)?;
        let intent = match order.payment_intent_id.clone() {
            Some(existing) => self.reuse_intent(&order, &existing, intent_request).await?,
            None => self.create_intent(&order, intent_request, None).await?,
        };

        Ok(IntentHandle {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            order_id: order.id,
        })
    }

    /// Overwrites the receipt email of an intent, echoing it in metadata.
    pub async fn update_receipt_email(
        &self,
        payment_intent_id: &str,
        email: &str,
    ) -> Result<PaymentIntent> {
        let (intent_id, email) = (payment_intent_id.trim(), email.trim());
        if intent_id.is_empty() || email.is_empty() {
            return Err(CommerceError::validation(
                "Missing payment intent id or email",
            ));
        }

        let update = IntentUpdate {
            receipt_email: Some(email.to_string()),
            metadata: BTreeMap::from([("customer_email".to_string(), email.to_string())]),
            ..IntentUpdate::default()
        };
        let intent = self.gateway.update_payment_intent(intent_id, &update).await?;
        tracing::info!(payment_intent_id = %intent.id, "Receipt email updated");
        Ok(intent)
    }

    /// Creates a fresh order and a hosted checkout session for it, then clears the
    /// cart.
    pub async fn start_hosted_checkout(
        &self,
        identity: Identity,
        session: SharedSession,
        request: CheckoutRequest,
    ) -> Result<HostedCheckout> {
        let (cart, _) = self.carts.resolve(identity, session.clone());
        let summary = self.pricing.price(cart.as_ref(), identity).await?;
        if summary.is_empty() {
            return Err(CommerceError::validation("Your cart is empty"));
        }

        let contact_email = self.contact_email(identity, &request).await?;
        let draft = OrderDraft::from_summary(
            identity.user_id(),
            &summary,
            request.shipping,
            contact_email,
        );
        let order = self.orders.create(draft).await?;

        let session_request = CheckoutSessionRequest {
            currency: self.settings.currency.clone(),
            line_items: hosted_line_items(order.id, &summary)?,
            customer_email: non_empty(&order.contact_email),
            metadata: gateway_metadata(identity, order.id),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            idempotency_key: make_idempotency_key(
                "checkout",
                &identity.label(),
                Some(order.id),
                None,
            ),
        };

        let hosted: CheckoutSession = match self.gateway.create_checkout_session(&session_request).await {
            Ok(hosted) => hosted,
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "Checkout session creation failed, order stays pending");
                return Err(e.into());
            }
        };

        let order = self
            .orders
            .attach_ref(order.id, GatewayRef::CheckoutSession(hosted.id.clone()))
            .await?;
        cart.clear().await?;

        tracing::info!(order_id = %order.id, session_id = %hosted.id, amount = session_request.amount_minor(), "Hosted checkout started");
        Ok(HostedCheckout {
            order_id: order.id,
            session_id: hosted.id,
            url: hosted.url,
        })
    }

    /// Handles the customer's return from the payment page.
    ///
    /// An order that is not yet paid is refreshed from the gateway and run through
    /// reconciliation, racing any webhook that may still be in flight. The cart is
    /// cleared only once the order is paid.
    pub async fn confirm_return(
        &self,
        identity: Identity,
        session: SharedSession,
        reference: GatewayRef,
    ) -> Result<Order> {
        let order = self
            .orders
            .find_by_ref(&reference)
            .await?
            .ok_or_else(|| CommerceError::not_found(format!("Order for {reference:?}")))?;

        let order = if order.is_paid {
            order
        } else {
            self.poll_gateway(order, &reference).await?
        };

        if order.is_paid {
            let (cart, _) = self.carts.resolve(identity, session.clone());
            cart.clear().await?;
            session.remove(PENDING_ORDER_KEY).await?;
            tracing::info!(order_id = %order.id, "Checkout completed, cart cleared");
        }
        Ok(order)
    }

    async fn poll_gateway(&self, order: Order, reference: &GatewayRef) -> Result<Order> {
        let event = match reference {
            GatewayRef::PaymentIntent(id) => self
                .gateway
                .retrieve_payment_intent(id)
                .await
                .map(|intent| intent.as_event(Some(order.id))),
            GatewayRef::CheckoutSession(id) => self
                .gateway
                .retrieve_checkout_session(id)
                .await
                .map(|hosted| hosted.as_event(Some(order.id))),
        };

        match event {
            Ok(event) => Ok(self.reconciler.reconcile(&event).await?.unwrap_or(order)),
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Could not refresh payment state from gateway");
                Ok(order)
            }
        }
    }

    async fn contact_email(&self, identity: Identity, request: &CheckoutRequest) -> Result<String> {
        if let Some(email) = request.email.as_deref().and_then(non_empty) {
            return Ok(email);
        }
        let Some(user) = identity.user_id() else {
            return Ok(String::new());
        };
        Ok(self
            .customers
            .get(user)
            .await?
            .and_then(|customer| customer.email)
            .unwrap_or_default())
    }

    fn intent_request(&self, identity: Identity, order: &Order) -> Result<IntentRequest> {
        Ok(IntentRequest {
            amount_minor: order.total_price.to_minor_units()?,
            currency: self.settings.currency.clone(),
            receipt_email: non_empty(&order.contact_email),
            metadata: gateway_metadata(identity, order.id),
            shipping: order
                .shipping
                .has_address()
                .then(|| order.shipping.clone()),
            idempotency_key: Some(format!("order-{}-create-v1", order.id)),
        })
    }

    async fn reuse_intent(
        &self,
        order: &Order,
        existing: &str,
        request: IntentRequest,
    ) -> Result<PaymentIntent> {
        let current = match self.gateway.retrieve_payment_intent(existing).await {
            Ok(intent) => intent,
            Err(GatewayError::UnknownObject(_)) => {
                tracing::warn!(order_id = %order.id, payment_intent_id = %existing, "Stored payment intent unknown to gateway");
                return self.create_intent(order, request, Some(existing)).await;
            }
            Err(e) => return Err(e.into()),
        };

        if current.is_active() {
            let intent = self
                .gateway
                .update_payment_intent(&current.id, &IntentUpdate::from(&request))
                .await?;
            tracing::info!(order_id = %order.id, payment_intent_id = %intent.id, amount = intent.amount_minor, "Payment intent updated");
            Ok(intent)
        } else if matches!(current.status.as_str(), "canceled" | "succeeded") {
            self.create_intent(order, request, Some(existing)).await
        } else {
            Ok(current)
        }
    }

    /// Creates an intent and links it to the order. `replacing` names the intent a
    /// fresh one supersedes; it gets its own idempotency key.
    async fn create_intent(
        &self,
        order: &Order,
        mut request: IntentRequest,
        replacing: Option<&str>,
    ) -> Result<PaymentIntent> {
        if let Some(previous) = replacing {
            request.idempotency_key = Some(format!("order-{}-replace-{previous}", order.id));
        }

        let intent = match self.gateway.create_payment_intent(&request).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "Payment intent creation failed, order stays pending");
                return Err(e.into());
            }
        };

        self.orders
            .attach_ref(order.id, GatewayRef::PaymentIntent(intent.id.clone()))
            .await?;
        tracing::info!(order_id = %order.id, payment_intent_id = %intent.id, amount = intent.amount_minor, "Payment intent created");
        Ok(intent)
    }
}

async fn pending_order_id(session: &SharedSession) -> Result<Option<OrderId>> {
    Ok(session
        .get(PENDING_ORDER_KEY)
        .await?
        .and_then(|value| serde_json::from_value(value).ok()))
}

fn gateway_metadata(identity: Identity, order_id: OrderId) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("order_id".to_string(), order_id.to_string()),
        ("user_id".to_string(), identity.label()),
    ])
}

fn non_empty(email: &str) -> Option<String> {
    let email = email.trim();
    (!email.is_empty()).then(|| email.to_string())
}

/// Gateway lines for a hosted page, summing to the grand total in minor units.
///
/// The first-time discount is not a per-line price, so when it applies the goods are
/// billed as a single line at the discounted cart total. The same collapse happens
/// when per-line minor units would not add up to the cart total.
fn hosted_line_items(order_id: OrderId, summary: &PricingSummary) -> Result<Vec<GatewayLineItem>> {
    let cart_minor = summary.cart_total.to_minor_units()?;
    let itemized = summary
        .lines
        .iter()
        .map(|line| {
            Ok(GatewayLineItem {
                name: line.name.clone(),
                unit_amount_minor: line.unit_after.to_minor_units()?,
                quantity: line.quantity.get(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let itemized_minor: i64 = itemized
        .iter()
        .map(|item| item.unit_amount_minor * i64::from(item.quantity))
        .sum();

    let exact = itemized_minor == cart_minor;
    let mut items = if summary.first_time_discount_total.is_zero() && exact {
        itemized
    } else {
        vec![GatewayLineItem {
            name: format!("Order #{order_id}"),
            unit_amount_minor: cart_minor,
            quantity: 1,
        }]
    };

    if !summary.delivery_fee.is_zero() {
        items.push(GatewayLineItem {
            name: DELIVERY_LINE_NAME.to_string(),
            unit_amount_minor: summary.delivery_fee.to_minor_units()?,
            quantity: 1,
        });
    }
    Ok(items)
}
