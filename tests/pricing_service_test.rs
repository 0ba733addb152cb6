mod common;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use common::{coupon_input, ordinary_day, TestApp};
use coupon_pricing_api::{
    entities::{coupon::DiscountType, user::UserRole},
    errors::ServiceError,
    services::commerce::{
        CartItemRequest, CartPriceRequest, DiscountKind, PriceRequest, ShippingAddress,
    },
};
use rust_decimal_macros::dec;
use sea_orm::Set;
use uuid::Uuid;

fn price_request(product_id: Uuid, quantity: u32) -> PriceRequest {
    PriceRequest {
        product_id,
        quantity,
        coupon_code: None,
        shipping_address: None,
    }
}

fn ship_to(country: &str) -> Option<ShippingAddress> {
    Some(ShippingAddress {
        country: country.to_string(),
        ..Default::default()
    })
}

#[tokio::test]
async fn quantity_tier_applies_to_whole_subtotal() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1000), dec!(0.5)).await;

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&price_request(product.id, 25), None, ordinary_day())
        .await
        .unwrap();

    assert_eq!(result.base_price, dec!(25000));
    assert_eq!(result.discount_amount, dec!(2500));
    assert_eq!(result.discount_percentage, dec!(10));
    assert_eq!(result.tax_rate, dec!(0.10));
    assert_eq!(result.tax_amount, dec!(2250));
    // 12.5 kg falls in the 10-20 kg domestic tier
    assert_eq!(result.shipping_cost, dec!(9000));
    assert_eq!(result.final_price, dec!(33750));
    assert_eq!(result.currency, "KRW");
    assert_eq!(result.applied_discounts.len(), 1);
    assert_eq!(result.applied_discounts[0].kind, DiscountKind::Quantity);
    assert_eq!(result.breakdown.total, result.final_price);
}

#[tokio::test]
async fn domestic_orders_over_threshold_ship_free() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(60000), dec!(2)).await;

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&price_request(product.id, 1), None, ordinary_day())
        .await
        .unwrap();

    assert_eq!(result.shipping_cost, dec!(0));
    assert_eq!(result.tax_amount, dec!(6000));
    assert_eq!(result.final_price, dec!(66000));
}

#[tokio::test]
async fn coupon_discount_is_taken_before_tax() {
    let app = TestApp::new().await;
    app.seed_coupon(coupon_input("SAVE10", DiscountType::Percent, dec!(10)))
        .await;
    let product = app.seed_product(dec!(10000), dec!(1)).await;

    let mut request = price_request(product.id, 1);
    request.coupon_code = Some("save10".into());

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&request, None, ordinary_day())
        .await
        .unwrap();

    assert_eq!(result.discount_amount, dec!(1000));
    assert_eq!(result.breakdown.taxable_amount, dec!(9000));
    assert_eq!(result.tax_amount, dec!(900));
    assert_eq!(result.shipping_cost, dec!(3000));
    assert_eq!(result.final_price, dec!(12900));
    assert_eq!(result.coupon_code.as_deref(), Some("SAVE10"));
    assert!(result.coupon_message.is_none());
    assert!(result
        .applied_discounts
        .iter()
        .any(|d| d.kind == DiscountKind::Coupon && d.amount == dec!(1000)));
}

#[tokio::test]
async fn rejected_coupon_prices_without_discount() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(10000), dec!(1)).await;

    let mut request = price_request(product.id, 1);
    request.coupon_code = Some("MISSING".into());

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&request, None, ordinary_day())
        .await
        .unwrap();

    assert_eq!(result.discount_amount, dec!(0));
    assert!(result.coupon_code.is_none());
    assert_eq!(result.coupon_message.as_deref(), Some("Invalid coupon code"));
}

#[tokio::test]
async fn product_restricted_coupon_is_not_filtered_when_pricing() {
    let app = TestApp::new().await;
    let mut input = coupon_input("ONLYSHOES", DiscountType::FixedCart, dec!(500));
    input.product_ids = vec![Uuid::new_v4()];
    app.seed_coupon(input).await;
    let product = app.seed_product(dec!(10000), dec!(1)).await;

    let mut request = price_request(product.id, 1);
    request.coupon_code = Some("ONLYSHOES".into());

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&request, None, ordinary_day())
        .await
        .unwrap();
    assert_eq!(result.discount_amount, dec!(500));
}

#[tokio::test]
async fn seasonal_discount_follows_quantity_and_coupon() {
    let app = TestApp::new().await;
    app.seed_coupon(coupon_input("FLAT1000", DiscountType::FixedCart, dec!(1000)))
        .await;
    let product = app.seed_product(dec!(1000), dec!(0.1)).await;

    let mut request = price_request(product.id, 20);
    request.coupon_code = Some("FLAT1000".into());
    // Pepero Day in Seoul
    let pepero = Utc.with_ymd_and_hms(2025, 11, 5, 3, 0, 0).unwrap();

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&request, None, pepero)
        .await
        .unwrap();

    // 20000 - 2000 (10%) - 1000 = 17000, then 11% seasonal = 1870
    let seasonal = result
        .applied_discounts
        .iter()
        .find(|d| d.kind == DiscountKind::Seasonal)
        .expect("seasonal line");
    assert_eq!(seasonal.label, "Pepero Day");
    assert_eq!(seasonal.amount, dec!(1870));
    assert_eq!(result.discount_amount, dec!(4870));
    assert_eq!(result.breakdown.taxable_amount, dec!(15130));
    assert_eq!(result.tax_amount, dec!(1513));
}

#[tokio::test]
async fn role_selects_unit_price() {
    let app = TestApp::new().await;
    let product = app
        .seed_product_with(dec!(10000), dec!(1), |p| {
            p.wholesale_price = Set(Some(dec!(7000)));
            p.sale_price = Set(Some(dec!(9000)));
        })
        .await;
    let business = app.seed_user(UserRole::Business).await;
    let customer = app.seed_user(UserRole::Customer).await;
    let pricing = &app.state.services.pricing;
    let request = price_request(product.id, 1);

    let wholesale = pricing
        .calculate_price_at(&request, Some(business.id), ordinary_day())
        .await
        .unwrap();
    assert_eq!(wholesale.unit_price, dec!(7000));

    let member = pricing
        .calculate_price_at(&request, Some(customer.id), ordinary_day())
        .await
        .unwrap();
    assert_eq!(member.unit_price, dec!(9000));

    let guest = pricing
        .calculate_price_at(&request, Some(Uuid::new_v4()), ordinary_day())
        .await
        .unwrap();
    assert_eq!(guest.unit_price, dec!(10000));
}

#[tokio::test]
async fn international_orders_use_zone_rates_and_local_tax() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(100000), dec!(1)).await;

    let mut request = price_request(product.id, 1);
    request.shipping_address = ship_to("us");

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&request, None, ordinary_day())
        .await
        .unwrap();

    assert_eq!(result.tax_rate, dec!(0.0875));
    assert_eq!(result.tax_amount, dec!(8750));
    // No free shipping abroad, whatever the subtotal
    assert_eq!(result.shipping_cost, dec!(25000));
    assert_eq!(result.final_price, dec!(133750));
}

#[tokio::test]
async fn digital_products_skip_shipping() {
    let app = TestApp::new().await;
    let product = app
        .seed_product_with(dec!(5000), dec!(0), |p| {
            p.requires_shipping = Set(false);
        })
        .await;

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&price_request(product.id, 1), None, ordinary_day())
        .await
        .unwrap();
    assert_eq!(result.shipping_cost, dec!(0));
    assert_eq!(result.final_price, dec!(5500));
}

#[tokio::test]
async fn unknown_or_inactive_products_are_errors() {
    let app = TestApp::new().await;
    let pricing = &app.state.services.pricing;

    let missing = pricing
        .calculate_price_at(&price_request(Uuid::new_v4(), 1), None, ordinary_day())
        .await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));

    let retired = app
        .seed_product_with(dec!(1000), dec!(1), |p| {
            p.is_active = Set(false);
        })
        .await;
    let inactive = pricing
        .calculate_price_at(&price_request(retired.id, 1), None, ordinary_day())
        .await;
    assert_matches!(inactive, Err(ServiceError::BadRequest(_)));
}

#[tokio::test]
async fn oversized_line_total_is_rejected() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(dec!(1_000_000_000_000_000), dec!(1))
        .await;

    let result = app
        .state
        .services
        .pricing
        .calculate_price_at(&price_request(product.id, 2), None, ordinary_day())
        .await;
    assert_matches!(result, Err(ServiceError::BadRequest(msg)) if msg == "Order amount is too large");
}

#[tokio::test]
async fn cart_consolidates_shipping_and_applies_coupon_once() {
    let app = TestApp::new().await;
    app.seed_coupon(coupon_input("CART3000", DiscountType::FixedCart, dec!(3000)))
        .await;
    let a = app.seed_product(dec!(10000), dec!(1)).await;
    let b = app.seed_product(dec!(5000), dec!(0.5)).await;

    let request = CartPriceRequest {
        items: vec![
            CartItemRequest {
                product_id: a.id,
                quantity: 2,
            },
            CartItemRequest {
                product_id: b.id,
                quantity: 1,
            },
        ],
        coupon_code: Some("CART3000".into()),
        shipping_address: None,
    };

    let cart = app
        .state
        .services
        .pricing
        .calculate_cart_total_at(&request, None, ordinary_day())
        .await
        .unwrap();

    assert_eq!(cart.items.len(), 2);
    assert_eq!(cart.subtotal, dec!(25000));
    assert_eq!(cart.item_discounts, dec!(0));
    assert_eq!(cart.coupon_discount, dec!(3000));
    // Tax is summed per line before the coupon
    assert_eq!(cart.tax_amount, dec!(2500));
    // Combined 2.5 kg parcel (3500) beats the dearest line (4000)
    assert_eq!(cart.shipping_cost, dec!(3500));
    assert_eq!(cart.total, dec!(28000));
    assert_eq!(cart.coupon_code.as_deref(), Some("CART3000"));
    assert!(cart.items.iter().all(|i| i.coupon_code.is_none()));
}

#[tokio::test]
async fn cart_free_shipping_uses_aggregate_subtotal() {
    let app = TestApp::new().await;
    let a = app.seed_product(dec!(30000), dec!(3)).await;
    let b = app.seed_product(dec!(30000), dec!(3)).await;

    let request = CartPriceRequest {
        items: vec![
            CartItemRequest {
                product_id: a.id,
                quantity: 1,
            },
            CartItemRequest {
                product_id: b.id,
                quantity: 1,
            },
        ],
        coupon_code: None,
        shipping_address: ship_to("KR"),
    };

    let cart = app
        .state
        .services
        .pricing
        .calculate_cart_total_at(&request, None, ordinary_day())
        .await
        .unwrap();
    assert_eq!(cart.shipping_cost, dec!(0));
    assert_eq!(cart.total, dec!(66000));
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let request = CartPriceRequest {
        items: Vec::new(),
        coupon_code: None,
        shipping_address: None,
    };
    let err = app
        .state
        .services
        .pricing
        .calculate_cart_total_at(&request, None, ordinary_day())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::BadRequest(msg) if msg == "Cart is empty");
}
