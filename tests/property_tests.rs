//! Property-based tests for discount and pricing invariants.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use coupon_pricing_api::{
    entities::coupon::{self, CouponStatus, DiscountType, IdList},
    money::{percent_of, round_money},
    services::{
        commerce::pricing_rules::{
            combined_shipping, domestic_shipping, item_shipping, quantity_discount_percent,
            seasonal_promotion,
        },
        coupon_validation::{evaluate, CouponContext, CouponRejection},
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn coupon(discount_type: DiscountType, value: Decimal, cap: Option<Decimal>) -> coupon::Model {
    let now = Utc::now();
    coupon::Model {
        id: Uuid::new_v4(),
        code: "PROP".to_string(),
        name: None,
        description: None,
        discount_type,
        discount_value: value,
        max_discount_amount: cap,
        min_order_amount: None,
        valid_from: None,
        valid_until: None,
        status: CouponStatus::Active,
        usage_limit_per_coupon: 0,
        usage_limit_per_customer: 0,
        used_count: 0,
        product_ids: IdList::default(),
        category_ids: IdList::default(),
        customer_ids: IdList::default(),
        exclude_product_ids: IdList::default(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

// Strategies for generating test data
fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

fn discount_type_strategy() -> impl Strategy<Value = DiscountType> {
    prop_oneof![
        Just(DiscountType::Percent),
        Just(DiscountType::Percentage),
        Just(DiscountType::FixedCart),
        Just(DiscountType::FixedProduct),
    ]
}

fn weight_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..50_000).prop_map(|grams| Decimal::new(grams, 3))
}

// Property: a granted discount is bounded by the subtotal and the cap
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn discount_never_exceeds_subtotal_or_cap(
        discount_type in discount_type_strategy(),
        percent in 0i64..=100,
        fixed in money_strategy(),
        cap in proptest::option::of(money_strategy()),
        subtotal in money_strategy(),
        product_total in proptest::option::of(money_strategy()),
    ) {
        let value = if discount_type.is_percentage() { Decimal::from(percent) } else { fixed };
        let c = coupon(discount_type, value, cap);
        let discount = c.calculate_discount(subtotal, product_total);

        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= subtotal);
        if let Some(cap) = cap {
            prop_assert!(discount <= cap);
        }
    }

    #[test]
    fn discount_has_at_most_two_decimals(
        percent in 0i64..=100,
        subtotal in money_strategy(),
    ) {
        let c = coupon(DiscountType::Percent, Decimal::from(percent), None);
        let discount = c.calculate_discount(subtotal, None);
        prop_assert_eq!(discount, round_money(discount));
    }

    #[test]
    fn validation_is_read_only_and_repeatable(
        subtotal in money_strategy(),
        minimum in proptest::option::of(money_strategy()),
    ) {
        let mut c = coupon(DiscountType::Percent, Decimal::from(10), None);
        c.min_order_amount = minimum;
        let snapshot = c.clone();
        let ctx = CouponContext::new(subtotal, Utc::now());

        let first = evaluate(&c, &ctx);
        let second = evaluate(&c, &ctx);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&c, &snapshot);

        match minimum {
            Some(min) if subtotal < min => {
                prop_assert_eq!(first, Err(CouponRejection::BelowMinimumOrder { minimum: min }))
            }
            _ => prop_assert!(first.is_ok()),
        }
    }

    #[test]
    fn usage_cap_gate_matches_counter(limit in 0i32..50, used in 0i32..60) {
        let mut c = coupon(DiscountType::FixedCart, Decimal::from(100), None);
        c.usage_limit_per_coupon = limit;
        c.used_count = used;
        let result = evaluate(&c, &CouponContext::new(Decimal::from(1000), Utc::now()));

        if limit > 0 && used >= limit {
            prop_assert_eq!(result, Err(CouponRejection::UsageLimitReached));
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn window_bounds_are_inclusive(offset_secs in -100_000i64..100_000) {
        let anchor = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut c = coupon(DiscountType::Percent, Decimal::from(5), None);
        c.valid_from = Some(anchor);
        c.valid_until = Some(anchor + Duration::seconds(50_000));

        let now = anchor + Duration::seconds(offset_secs);
        let result = evaluate(&c, &CouponContext::new(Decimal::from(1000), now));
        if (0..=50_000).contains(&offset_secs) {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
        }
    }
}

// Property: pricing tables behave monotonically
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn quantity_rate_never_decreases(q in 1u32..500) {
        prop_assert!(quantity_discount_percent(q) <= quantity_discount_percent(q + 1));
    }

    #[test]
    fn percent_of_is_bounded(amount in money_strategy(), percent in 0i64..=100) {
        let part = percent_of(amount, Decimal::from(percent));
        prop_assert!(part >= Decimal::ZERO);
        prop_assert!(part <= round_money(amount));
    }

    #[test]
    fn heavier_parcels_never_ship_cheaper(w in weight_strategy(), extra in weight_strategy()) {
        prop_assert!(domestic_shipping(w) <= domestic_shipping(w + extra));
        prop_assert!(item_shipping("US", w) <= item_shipping("US", w + extra));
    }

    #[test]
    fn consolidated_domestic_parcel_is_cheaper(w in weight_strategy()) {
        prop_assert!(combined_shipping("KR", w) < domestic_shipping(w));
    }

    #[test]
    fn at_most_one_seasonal_promotion(day in 0u32..365) {
        let date = NaiveDate::from_yo_opt(2025, day + 1).unwrap();
        if let Some(promo) = seasonal_promotion(date) {
            prop_assert!(promo.percent > Decimal::ZERO && promo.percent <= Decimal::from(20));
        }
    }
}
