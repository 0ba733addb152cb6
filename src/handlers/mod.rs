pub mod common;
pub mod coupons;
pub mod pricing;

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{CouponService, PricingService},
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<CouponService>,
    pub pricing: Arc<PricingService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, config: Arc<AppConfig>) -> Self {
        let coupons = Arc::new(CouponService::new(db_pool.clone(), config.clone()));
        let pricing = Arc::new(PricingService::new(db_pool, config));

        Self { coupons, pricing }
    }
}
