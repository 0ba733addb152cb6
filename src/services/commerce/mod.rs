/// Commerce services module - order pricing
pub mod pricing_rules;
pub mod pricing_service;

// Re-export services for convenience
pub use pricing_service::{
    AppliedDiscount, CartItemRequest, CartPriceRequest, CartPricingResult, DiscountKind,
    PriceBreakdown, PriceRequest, PricingResult, PricingService, ShippingAddress,
};
