use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use storefront::domain::identity::{Customer, UserId};
use storefront::domain::money::Money;
use storefront::domain::order::{OrderDraft, ShippingSnapshot};
use storefront::domain::ports::{SharedCustomerStore, SharedOrderStore, SharedSession};
use storefront::infrastructure::in_memory::{
    InMemoryCustomerStore, InMemoryOrderStore, InMemorySession,
};

#[tokio::test]
async fn test_stores_as_trait_objects() {
    let customers: SharedCustomerStore = Arc::new(InMemoryCustomerStore::new());
    let orders: SharedOrderStore = Arc::new(InMemoryOrderStore::new());
    let session: SharedSession = Arc::new(InMemorySession::new());

    let draft = OrderDraft {
        owner: Some(UserId(1)),
        total_amount: Money::new(dec!(10.00)),
        discount_total: Money::ZERO,
        delivery_fee: Money::new(dec!(4.99)),
        total_price: Money::new(dec!(14.99)),
        is_first_order: false,
        shipping: ShippingSnapshot::default(),
        contact_email: String::new(),
        lines: Vec::new(),
    };

    // Verify Send + Sync by spawning tasks
    let customer_handle = tokio::spawn({
        let customers = customers.clone();
        async move {
            customers
                .store(Customer::new(UserId(1), Some("a@example.com".to_string())))
                .await
                .unwrap();
            customers.get(UserId(1)).await.unwrap().unwrap()
        }
    });

    let order_handle = tokio::spawn({
        let orders = orders.clone();
        async move {
            let order = orders.create(draft).await.unwrap();
            orders.get(order.id).await.unwrap().unwrap()
        }
    });

    let session_handle = tokio::spawn({
        let session = session.clone();
        async move {
            session.set("pending_order_id", json!(1)).await.unwrap();
            session.get("pending_order_id").await.unwrap()
        }
    });

    let customer = customer_handle.await.unwrap();
    assert_eq!(customer.user_id, UserId(1));
    assert!(customer.first_time_buyer);

    let order = order_handle.await.unwrap();
    assert_eq!(order.total_price, Money::new(dec!(14.99)));

    assert_eq!(session_handle.await.unwrap(), Some(json!(1)));
    assert!(customers.consume_first_time_discount(UserId(1)).await.unwrap());
    assert!(!customers.consume_first_time_discount(UserId(1)).await.unwrap());
}
