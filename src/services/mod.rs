// Coupon administration and redemption
pub mod coupon_validation;
pub mod coupons;

// Order pricing
pub mod commerce;

pub use commerce::PricingService;
pub use coupons::CouponService;
