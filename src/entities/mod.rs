pub mod coupon;
pub mod coupon_usage;
pub mod product;
pub mod user;
