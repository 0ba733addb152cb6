#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use coupon_pricing_api::{
    config::AppConfig,
    db,
    entities::{
        coupon::{self, DiscountType},
        product,
        user::{self, UserRole},
    },
    services::coupons::CreateCouponInput,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection: every sqlite memory connection is its own database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), Arc::new(cfg));
        let router = coupon_pricing_api::app_router(state.clone());

        Self { router, state }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    /// Send a JSON request, optionally as a signed-in customer.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        customer: Option<Uuid>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = customer {
            builder = builder.header("x-customer-id", id.to_string());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), None).await
    }

    pub async fn seed_product(&self, retail_price: Decimal, weight_kg: Decimal) -> product::Model {
        self.seed_product_with(retail_price, weight_kg, |_| {}).await
    }

    pub async fn seed_product_with(
        &self,
        retail_price: Decimal,
        weight_kg: Decimal,
        tweak: impl FnOnce(&mut product::ActiveModel),
    ) -> product::Model {
        let id = Uuid::new_v4();
        let mut model = product::ActiveModel {
            id: Set(id),
            name: Set(format!("Product {}", &id.to_string()[..8])),
            sku: Set(format!("SKU-{}", id.simple())),
            category_id: Set(None),
            retail_price: Set(retail_price),
            sale_price: Set(None),
            wholesale_price: Set(None),
            affiliate_price: Set(None),
            weight_kg: Set(weight_kg),
            ..Default::default()
        };
        tweak(&mut model);
        model.insert(self.db()).await.expect("seed product")
    }

    pub async fn seed_user(&self, role: UserRole) -> user::Model {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            email: Set(format!("{}@example.com", id.simple())),
            name: Set("Test User".to_string()),
            role: Set(role),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db())
        .await
        .expect("seed user")
    }

    pub async fn seed_coupon(&self, input: CreateCouponInput) -> coupon::Model {
        self.state
            .services
            .coupons
            .create_coupon(input)
            .await
            .expect("seed coupon")
    }
}

/// Unrestricted, always-valid coupon input.
pub fn coupon_input(code: &str, discount_type: DiscountType, value: Decimal) -> CreateCouponInput {
    CreateCouponInput {
        code: code.to_string(),
        name: Some(format!("{} coupon", code)),
        description: None,
        discount_type,
        discount_value: value,
        max_discount_amount: None,
        min_order_amount: None,
        valid_from: None,
        valid_until: None,
        status: None,
        usage_limit_per_coupon: None,
        usage_limit_per_customer: None,
        product_ids: Vec::new(),
        category_ids: Vec::new(),
        customer_ids: Vec::new(),
        exclude_product_ids: Vec::new(),
    }
}

/// A day outside every seasonal promotion window.
pub fn ordinary_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 15, 3, 0, 0).unwrap()
}

pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
