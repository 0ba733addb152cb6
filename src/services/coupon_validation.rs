//! Redemption gates for coupons.
//!
//! A coupon is checked against an order context by a fixed sequence of
//! gates. The first failing gate decides the message the customer sees, so
//! the order of [`GATES`] is part of the API contract.

use crate::entities::coupon::{self, CouponStatus, CustomerEligibility};
use crate::money::format_money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order facts a coupon is checked against.
#[derive(Debug, Clone)]
pub struct CouponContext<'a> {
    /// Buyer, when known. The per-customer gate is skipped without one.
    pub customer_id: Option<Uuid>,
    /// Redemptions by this customer already in the usage ledger.
    pub prior_customer_usage: u64,
    pub subtotal: Decimal,
    /// Product-level total for `fixed_product` coupons.
    pub product_total: Option<Decimal>,
    /// Products in the cart; empty skips the product gate.
    pub product_ids: &'a [Uuid],
    /// Categories in the cart; empty skips the category gate.
    pub category_ids: &'a [Uuid],
    pub now: DateTime<Utc>,
}

impl<'a> CouponContext<'a> {
    pub fn new(subtotal: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            customer_id: None,
            prior_customer_usage: 0,
            subtotal,
            product_total: None,
            product_ids: &[],
            category_ids: &[],
            now,
        }
    }
}

/// Reason a coupon cannot be redeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponRejection {
    UnknownCode,
    NotActive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    BelowMinimumOrder { minimum: Decimal },
    CustomerNotAllowed,
    CustomerLimitReached,
    ProductsNotEligible,
    ProductExcluded,
    CategoriesNotEligible,
}

impl CouponRejection {
    /// Customer-facing message.
    pub fn user_message(&self) -> String {
        match self {
            CouponRejection::UnknownCode => "Invalid coupon code".to_string(),
            CouponRejection::NotActive => "Coupon is not active".to_string(),
            CouponRejection::NotYetValid => "Coupon is not yet valid".to_string(),
            CouponRejection::Expired => "Coupon has expired".to_string(),
            CouponRejection::UsageLimitReached => "Coupon usage limit reached".to_string(),
            CouponRejection::BelowMinimumOrder { minimum } => {
                format!("Minimum order amount of {} required", format_money(*minimum))
            }
            CouponRejection::CustomerNotAllowed => {
                "This coupon is not available for your account".to_string()
            }
            CouponRejection::CustomerLimitReached => {
                "You have reached the usage limit for this coupon".to_string()
            }
            CouponRejection::ProductsNotEligible => {
                "Coupon is not applicable to the products in your cart".to_string()
            }
            CouponRejection::ProductExcluded => {
                "Coupon cannot be used with some products in your cart".to_string()
            }
            CouponRejection::CategoriesNotEligible => {
                "Coupon is not applicable to the categories in your cart".to_string()
            }
        }
    }

    /// Short label used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            CouponRejection::UnknownCode => "unknown_code",
            CouponRejection::NotActive => "not_active",
            CouponRejection::NotYetValid => "not_yet_valid",
            CouponRejection::Expired => "expired",
            CouponRejection::UsageLimitReached => "usage_limit",
            CouponRejection::BelowMinimumOrder { .. } => "minimum_order",
            CouponRejection::CustomerNotAllowed => "customer_not_allowed",
            CouponRejection::CustomerLimitReached => "customer_limit",
            CouponRejection::ProductsNotEligible => "products",
            CouponRejection::ProductExcluded => "excluded_product",
            CouponRejection::CategoriesNotEligible => "categories",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

/// Message returned alongside a successful validation.
pub fn success_message(discount: Decimal) -> String {
    format!(
        "Coupon applied successfully. You save {}",
        format_money(discount)
    )
}

type Gate = fn(&coupon::Model, &CouponContext<'_>) -> Result<(), CouponRejection>;

/// Evaluated left to right; the first failure wins.
pub const GATES: [Gate; 7] = [
    status_gate,
    window_gate,
    usage_gate,
    minimum_order_gate,
    customer_gate,
    product_gate,
    category_gate,
];

fn status_gate(coupon: &coupon::Model, _: &CouponContext<'_>) -> Result<(), CouponRejection> {
    match coupon.status {
        _ if coupon.deleted_at.is_some() => Err(CouponRejection::UnknownCode),
        CouponStatus::Active => Ok(()),
        CouponStatus::Expired => Err(CouponRejection::Expired),
        CouponStatus::Inactive => Err(CouponRejection::NotActive),
    }
}

fn window_gate(coupon: &coupon::Model, ctx: &CouponContext<'_>) -> Result<(), CouponRejection> {
    if !coupon.has_started(ctx.now) {
        return Err(CouponRejection::NotYetValid);
    }
    if coupon.has_ended(ctx.now) {
        return Err(CouponRejection::Expired);
    }
    Ok(())
}

fn usage_gate(coupon: &coupon::Model, _: &CouponContext<'_>) -> Result<(), CouponRejection> {
    if coupon.is_usage_exhausted() {
        return Err(CouponRejection::UsageLimitReached);
    }
    Ok(())
}

fn minimum_order_gate(
    coupon: &coupon::Model,
    ctx: &CouponContext<'_>,
) -> Result<(), CouponRejection> {
    match coupon.min_order_amount {
        Some(minimum) if ctx.subtotal < minimum => {
            Err(CouponRejection::BelowMinimumOrder { minimum })
        }
        _ => Ok(()),
    }
}

fn customer_gate(coupon: &coupon::Model, ctx: &CouponContext<'_>) -> Result<(), CouponRejection> {
    let Some(customer_id) = ctx.customer_id else {
        return Ok(());
    };
    match coupon.customer_eligibility(customer_id, ctx.prior_customer_usage) {
        CustomerEligibility::Eligible => Ok(()),
        CustomerEligibility::NotAllowed => Err(CouponRejection::CustomerNotAllowed),
        CustomerEligibility::LimitReached => Err(CouponRejection::CustomerLimitReached),
    }
}

fn product_gate(coupon: &coupon::Model, ctx: &CouponContext<'_>) -> Result<(), CouponRejection> {
    if ctx.product_ids.is_empty() {
        return Ok(());
    }
    if !coupon.product_ids.is_empty() && !coupon.product_ids.intersects(ctx.product_ids) {
        return Err(CouponRejection::ProductsNotEligible);
    }
    if coupon.exclude_product_ids.intersects(ctx.product_ids) {
        return Err(CouponRejection::ProductExcluded);
    }
    Ok(())
}

fn category_gate(coupon: &coupon::Model, ctx: &CouponContext<'_>) -> Result<(), CouponRejection> {
    if ctx.category_ids.is_empty() || coupon.category_ids.is_empty() {
        return Ok(());
    }
    if !coupon.category_ids.intersects(ctx.category_ids) {
        return Err(CouponRejection::CategoriesNotEligible);
    }
    Ok(())
}

/// Runs every gate and returns the discount the coupon grants.
pub fn evaluate(coupon: &coupon::Model, ctx: &CouponContext<'_>) -> Result<Decimal, CouponRejection> {
    for gate in GATES {
        gate(coupon, ctx)?;
    }
    Ok(coupon.calculate_discount(ctx.subtotal, ctx.product_total))
}
