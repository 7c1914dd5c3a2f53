#![allow(dead_code)]

use rust_decimal_macros::dec;
use std::sync::Arc;
use storefront::application::cart::CartService;
use storefront::application::checkout::CheckoutService;
use storefront::application::pricing::PricingEngine;
use storefront::application::reconcile::ReconciliationEngine;
use storefront::config::{CheckoutSettings, NotificationSettings, PricingPolicy};
use storefront::domain::catalog::{Bundle, BundleId, Product, ProductId, Tier};
use storefront::domain::gateway::{EventIdentifiers, GatewayEvent, ObjectKind};
use storefront::domain::identity::{Customer, UserId};
use storefront::domain::money::Money;
use storefront::domain::order::{OrderId, ShippingSnapshot};
use storefront::domain::ports::{CustomerStore, SharedSession};
use storefront::infrastructure::gateway::SandboxGateway;
use storefront::infrastructure::in_memory::{
    InMemoryCartRepository, InMemoryCatalog, InMemoryCustomerStore, InMemoryOrderStore,
    InMemorySession, RecordingNotifier,
};

pub const CAMERA_CODE: &str = "CAM-01";
pub const KIT_KEY: &str = "bundle_1";

pub fn camera() -> Product {
    Product {
        id: ProductId(1),
        code: CAMERA_CODE.to_string(),
        name: "Dash Cam".to_string(),
        price: Money::new(dec!(10.00)),
        tier: Tier::Standard,
        kind: "Dash Cam".to_string(),
    }
}

pub fn starter_kit() -> Bundle {
    Bundle {
        id: BundleId(1),
        name: "Starter Kit".to_string(),
        price: Money::new(dec!(19.32)),
        subtotal_price: Money::new(dec!(21.47)),
        discount_percentage: dec!(10),
    }
}

pub fn shipping() -> ShippingSnapshot {
    ShippingSnapshot {
        name: "Ada Buyer".to_string(),
        line1: "1 High Street".to_string(),
        city: "London".to_string(),
        postcode: "N1 1AA".to_string(),
        ..ShippingSnapshot::default()
    }
}

pub fn session() -> SharedSession {
    Arc::new(InMemorySession::new())
}

pub fn intent_event(
    event_id: &str,
    status: &str,
    order_id: Option<OrderId>,
    payment_intent_id: &str,
) -> GatewayEvent {
    GatewayEvent {
        event_id: Some(event_id.to_string()),
        object_kind: ObjectKind::PaymentIntent,
        native_status: status.to_string(),
        identifiers: EventIdentifiers {
            session_id: None,
            payment_intent_id: Some(payment_intent_id.to_string()),
        },
        order_id,
        customer_email: None,
        error_message: None,
    }
}

/// Every service wired to in-memory adapters and the sandbox gateway.
pub struct Shop {
    pub catalog: Arc<InMemoryCatalog>,
    pub customers: Arc<InMemoryCustomerStore>,
    pub orders: Arc<InMemoryOrderStore>,
    pub gateway: Arc<SandboxGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub carts: CartService,
    pub pricing: PricingEngine,
    pub reconciler: ReconciliationEngine,
    pub checkout: CheckoutService,
}

impl Shop {
    pub fn new() -> Self {
        Self::with_notifications(NotificationSettings::default())
    }

    pub fn with_notifications(notifications: NotificationSettings) -> Self {
        let catalog = Arc::new(InMemoryCatalog::with_entries(
            vec![camera()],
            vec![starter_kit()],
        ));
        let customers = Arc::new(InMemoryCustomerStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(SandboxGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let settings = CheckoutSettings::default();

        let carts = CartService::new(catalog.clone(), Arc::new(InMemoryCartRepository::new()));
        let pricing = PricingEngine::new(
            catalog.clone(),
            customers.clone(),
            PricingPolicy::default(),
        );
        let reconciler = ReconciliationEngine::new(
            orders.clone(),
            customers.clone(),
            notifier.clone(),
            notifications,
            settings.last_error_limit,
        );
        let checkout = CheckoutService::new(
            carts.clone(),
            pricing.clone(),
            orders.clone(),
            customers.clone(),
            gateway.clone(),
            reconciler.clone(),
            settings,
        );

        Self {
            catalog,
            customers,
            orders,
            gateway,
            notifier,
            carts,
            pricing,
            reconciler,
            checkout,
        }
    }

    pub async fn register(&self, id: u64, email: &str) -> UserId {
        let user = UserId(id);
        self.customers
            .store(Customer::new(user, Some(email.to_string())))
            .await
            .unwrap();
        user
    }
}
