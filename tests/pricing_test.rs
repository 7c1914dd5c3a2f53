mod common;

use common::{CAMERA_CODE, KIT_KEY, Shop, session};
use rust_decimal_macros::dec;
use storefront::domain::identity::Identity;
use storefront::domain::money::Money;

#[tokio::test]
async fn test_single_bundle_pays_delivery() {
    let shop = Shop::new();
    let session = session();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), KIT_KEY, 1, None)
        .await
        .unwrap();

    let (cart, _) = shop.carts.resolve(Identity::Anonymous, session);
    let summary = shop
        .pricing
        .price(cart.as_ref(), Identity::Anonymous)
        .await
        .unwrap();

    assert_eq!(summary.total_before_discount, Money::new(dec!(21.47)));
    assert_eq!(summary.bundle_discount_total, Money::new(dec!(2.15)));
    assert_eq!(summary.cart_total, Money::new(dec!(19.32)));
    assert_eq!(summary.delivery_fee, Money::new(dec!(4.99)));
    assert_eq!(summary.grand_total, Money::new(dec!(24.31)));
    assert_eq!(summary.grand_total.to_minor_units().unwrap(), 2431);
}

#[tokio::test]
async fn test_threshold_uses_pre_discount_subtotal() {
    let shop = Shop::new();
    let session = session();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), KIT_KEY, 1, None)
        .await
        .unwrap();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), CAMERA_CODE, 2, None)
        .await
        .unwrap();

    let (cart, _) = shop.carts.resolve(Identity::Anonymous, session);
    let summary = shop
        .pricing
        .price(cart.as_ref(), Identity::Anonymous)
        .await
        .unwrap();

    assert_eq!(summary.total_before_discount, Money::new(dec!(41.47)));
    assert_eq!(summary.bundle_discount_total, Money::new(dec!(2.15)));
    assert_eq!(summary.cart_total, Money::new(dec!(39.32)));
    assert!(summary.free_delivery);
    assert_eq!(summary.delivery_fee, Money::ZERO);
    assert_eq!(summary.grand_total, Money::new(dec!(39.32)));
}

#[tokio::test]
async fn test_first_time_buyer_discount() {
    let shop = Shop::new();
    let user = shop.register(7, "first@example.com").await;
    let identity = Identity::Authenticated(user);
    let session = session();
    shop.carts
        .add_item(identity, session.clone(), KIT_KEY, 1, None)
        .await
        .unwrap();
    shop.carts
        .add_item(identity, session.clone(), CAMERA_CODE, 2, None)
        .await
        .unwrap();

    let (cart, _) = shop.carts.resolve(identity, session);
    let summary = shop.pricing.price(cart.as_ref(), identity).await.unwrap();

    assert!(summary.first_time_discount_applied);
    assert_eq!(summary.first_time_discount_total, Money::new(dec!(3.93)));
    assert_eq!(summary.cart_total, Money::new(dec!(35.39)));
    assert_eq!(summary.grand_total, Money::new(dec!(35.39)));
    assert_eq!(summary.discount_total(), Money::new(dec!(6.08)));
}

#[tokio::test]
async fn test_guests_never_get_first_time_discount() {
    let shop = Shop::new();
    let session = session();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), CAMERA_CODE, 1, None)
        .await
        .unwrap();

    let (cart, _) = shop.carts.resolve(Identity::Anonymous, session);
    let summary = shop
        .pricing
        .price(cart.as_ref(), Identity::Anonymous)
        .await
        .unwrap();

    assert!(!summary.first_time_discount_applied);
    assert_eq!(summary.grand_total, Money::new(dec!(14.99)));
}

#[tokio::test]
async fn test_products_leaving_catalog_are_skipped() {
    let shop = Shop::new();
    let session = session();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), KIT_KEY, 1, None)
        .await
        .unwrap();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), CAMERA_CODE, 2, None)
        .await
        .unwrap();
    shop.catalog.remove_product(common::camera().id).await;

    let (cart, _) = shop.carts.resolve(Identity::Anonymous, session);
    let summary = shop
        .pricing
        .price(cart.as_ref(), Identity::Anonymous)
        .await
        .unwrap();

    assert_eq!(summary.lines.len(), 1);
    assert_eq!(summary.grand_total, Money::new(dec!(24.31)));
}

#[tokio::test]
async fn test_prices_follow_catalog_changes() {
    let shop = Shop::new();
    let session = session();
    shop.carts
        .add_item(Identity::Anonymous, session.clone(), CAMERA_CODE, 1, None)
        .await
        .unwrap();

    let mut camera = common::camera();
    camera.price = Money::new(dec!(12.50));
    shop.catalog.insert_product(camera).await;

    let (cart, _) = shop.carts.resolve(Identity::Anonymous, session);
    let summary = shop
        .pricing
        .price(cart.as_ref(), Identity::Anonymous)
        .await
        .unwrap();

    assert_eq!(summary.cart_total, Money::new(dec!(12.50)));
}
