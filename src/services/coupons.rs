use crate::{
    config::AppConfig,
    entities::{
        coupon::{self, normalize_code, CouponState, CouponStatus, DiscountType, IdList},
        coupon_usage,
    },
    errors::ServiceError,
    money::{round_money, validate_amount},
    services::coupon_validation::{self, CouponContext, CouponRejection},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MIN_CODE_LEN: usize = 3;
const MAX_CODE_LEN: usize = 50;
const CODE_GENERATION_ATTEMPTS: usize = 10;

/// Length rule applied to the code as it will be stored, surrounding
/// whitespace excluded.
fn validate_code(code: &str) -> Result<(), ValidationError> {
    let len = code.trim().chars().count();
    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
        let mut err = ValidationError::new("length");
        err.message = Some(
            format!("must be between {} and {} characters", MIN_CODE_LEN, MAX_CODE_LEN).into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Random code of `len` characters drawn from `A-Z0-9`.
pub fn generate_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Input for creating a coupon
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponInput {
    #[validate(custom = "validate_code")]
    pub code: String,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(custom = "validate_amount")]
    pub discount_value: Decimal,
    #[validate(custom = "validate_amount")]
    pub max_discount_amount: Option<Decimal>,
    #[validate(custom = "validate_amount")]
    pub min_order_amount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub status: Option<CouponStatus>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub usage_limit_per_coupon: Option<i32>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub usage_limit_per_customer: Option<i32>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    #[serde(default)]
    pub customer_ids: Vec<Uuid>,
    #[serde(default)]
    pub exclude_product_ids: Vec<Uuid>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCouponInput {
    #[validate(custom = "validate_code")]
    pub code: Option<String>,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[validate(custom = "validate_amount")]
    pub discount_value: Option<Decimal>,
    #[validate(custom = "validate_amount")]
    pub max_discount_amount: Option<Decimal>,
    #[validate(custom = "validate_amount")]
    pub min_order_amount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub status: Option<CouponStatus>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub usage_limit_per_coupon: Option<i32>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub usage_limit_per_customer: Option<i32>,
    pub product_ids: Option<Vec<Uuid>>,
    pub category_ids: Option<Vec<Uuid>>,
    pub customer_ids: Option<Vec<Uuid>>,
    pub exclude_product_ids: Option<Vec<Uuid>>,
}

/// Everything but the code; shared by every coupon in a bulk run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CouponTemplate {
    #[validate(length(max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(custom = "validate_amount")]
    pub discount_value: Decimal,
    #[validate(custom = "validate_amount")]
    pub max_discount_amount: Option<Decimal>,
    #[validate(custom = "validate_amount")]
    pub min_order_amount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub usage_limit_per_coupon: Option<i32>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub usage_limit_per_customer: Option<i32>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    #[serde(default)]
    pub customer_ids: Vec<Uuid>,
    #[serde(default)]
    pub exclude_product_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkGenerateInput {
    #[validate]
    pub template: CouponTemplate,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub count: u32,
    #[validate(length(max = 20, message = "must be at most 20 characters"))]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCouponsQuery {
    pub status: Option<CouponStatus>,
    /// `true`: redeemable right now by status and window.
    pub active: Option<bool>,
    pub state: Option<CouponState>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Body of a validation preview or a redemption.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub code: String,
    #[validate(custom = "validate_amount")]
    pub subtotal: Decimal,
    #[validate(custom = "validate_amount")]
    pub product_total: Option<Decimal>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub code: String,
    pub order_id: Uuid,
    #[validate(custom = "validate_amount")]
    pub subtotal: Decimal,
    #[validate(custom = "validate_amount")]
    pub product_total: Option<Decimal>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

/// Result of a validation preview. Rejections are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
}

impl CouponValidation {
    fn rejected(rejection: &CouponRejection) -> Self {
        Self {
            valid: false,
            message: rejection.user_message(),
            discount: None,
            coupon_id: None,
            code: None,
            discount_type: None,
        }
    }

    fn accepted(coupon: &coupon::Model, discount: Decimal) -> Self {
        Self {
            valid: true,
            message: coupon_validation::success_message(discount),
            discount: Some(discount),
            coupon_id: Some(coupon.id),
            code: Some(coupon.code.clone()),
            discount_type: Some(coupon.discount_type),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub usage_id: Uuid,
    pub coupon_id: Uuid,
    pub code: String,
    pub order_id: Uuid,
    pub discount: Decimal,
    pub message: String,
}

/// Coupon as presented by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponView {
    pub id: Uuid,
    pub code: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub status: CouponStatus,
    pub state: CouponState,
    pub usage_limit_per_coupon: i32,
    pub usage_limit_per_customer: i32,
    pub used_count: i32,
    pub remaining_uses: Option<i32>,
    pub product_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
    pub customer_ids: Vec<Uuid>,
    pub exclude_product_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponView {
    pub fn from_model(model: coupon::Model, now: DateTime<Utc>) -> Self {
        let state = model.display_state(now);
        let remaining_uses = model.remaining_uses();
        Self {
            id: model.id,
            code: model.code,
            name: model.name,
            description: model.description,
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            max_discount_amount: model.max_discount_amount,
            min_order_amount: model.min_order_amount,
            valid_from: model.valid_from,
            valid_until: model.valid_until,
            status: model.status,
            state,
            usage_limit_per_coupon: model.usage_limit_per_coupon,
            usage_limit_per_customer: model.usage_limit_per_customer,
            used_count: model.used_count,
            remaining_uses,
            product_ids: model.product_ids.0,
            category_ids: model.category_ids.0,
            customer_ids: model.customer_ids.0,
            exclude_product_ids: model.exclude_product_ids.0,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageView {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Uuid,
    pub order_subtotal: Decimal,
    pub discount_amount: Decimal,
    pub used_at: DateTime<Utc>,
}

impl From<coupon_usage::Model> for UsageView {
    fn from(model: coupon_usage::Model) -> Self {
        Self {
            id: model.id,
            coupon_id: model.coupon_id,
            customer_id: model.customer_id,
            order_id: model.order_id,
            order_subtotal: model.order_subtotal,
            discount_amount: model.discount_amount,
            used_at: model.used_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponStatistics {
    pub coupon_id: Uuid,
    pub code: String,
    pub used_count: i32,
    pub usage_limit: i32,
    pub remaining_uses: Option<i32>,
    /// Percentage of the global cap consumed
    pub usage_rate: Option<Decimal>,
    pub total_discount: Decimal,
    pub unique_customers: u64,
    pub average_discount: Decimal,
    pub first_used_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Order facts used when checking a coupon.
#[derive(Debug, Clone, Copy)]
pub struct CouponOrder<'a> {
    pub subtotal: Decimal,
    pub product_total: Option<Decimal>,
    pub product_ids: &'a [Uuid],
    pub category_ids: &'a [Uuid],
}

impl CouponOrder<'static> {
    /// Subtotal only; product and category gates are not applied.
    pub fn subtotal_only(subtotal: Decimal) -> Self {
        Self {
            subtotal,
            product_total: None,
            product_ids: &[],
            category_ids: &[],
        }
    }
}

/// Accepted coupon with its discount, or the reason it was refused.
pub type CouponOutcome = Result<(coupon::Model, Decimal), CouponRejection>;

/// Coupon administration and redemption.
///
/// Validation never writes. [`CouponService::apply_coupon`] is the only path
/// that records a redemption, and it does so in a single transaction with a
/// conditional counter increment so the global cap holds under concurrency.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    fn not_found() -> ServiceError {
        ServiceError::NotFound("Coupon not found".to_string())
    }

    /// Cross-field rules the derive cannot express.
    fn check_shape(
        discount_type: DiscountType,
        discount_value: Decimal,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError> {
        if discount_type.is_percentage() && discount_value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "Percentage discount cannot exceed 100".to_string(),
            ));
        }
        if let (Some(from), Some(until)) = (valid_from, valid_until) {
            if until <= from {
                return Err(ServiceError::ValidationError(
                    "validUntil must be after validFrom".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// True if any row, soft-deleted or not, already holds `code`.
    async fn code_taken<C: ConnectionTrait>(conn: &C, code: &str) -> Result<bool, ServiceError> {
        let count = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .count(conn)
            .await?;
        Ok(count > 0)
    }

    async fn find_live<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find_by_id(id)
            .filter(coupon::Column::DeletedAt.is_null())
            .one(conn)
            .await?)
    }

    /// Looks up a live coupon by code, case-insensitively.
    pub async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .filter(coupon::Column::DeletedAt.is_null())
            .one(conn)
            .await?)
    }

    /// Creates a coupon. Codes are stored upper-cased and must be unique.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        Self::check_shape(
            input.discount_type,
            input.discount_value,
            input.valid_from,
            input.valid_until,
        )?;

        let code = normalize_code(&input.code);
        if Self::code_taken(&*self.db, &code).await? {
            return Err(ServiceError::BadRequest(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let coupon = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            name: Set(input.name),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            max_discount_amount: Set(input.max_discount_amount),
            min_order_amount: Set(input.min_order_amount),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            status: Set(input.status.unwrap_or(CouponStatus::Active)),
            usage_limit_per_coupon: Set(input.usage_limit_per_coupon.unwrap_or(0)),
            usage_limit_per_customer: Set(input.usage_limit_per_customer.unwrap_or(0)),
            used_count: Set(0),
            product_ids: Set(IdList(input.product_ids)),
            category_ids: Set(IdList(input.category_ids)),
            customer_ids: Set(IdList(input.customer_ids)),
            exclude_product_ids: Set(IdList(input.exclude_product_ids)),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };

        let coupon = coupon.insert(&*self.db).await.map_err(|err| {
            ServiceError::on_unique_violation(err, format!("Coupon code {} already exists", code))
        })?;
        info!(coupon_id = %coupon.id, "Created coupon {}", coupon.code);
        Ok(coupon)
    }

    #[instrument(skip(self))]
    pub async fn get_coupon(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        Self::find_live(&*self.db, id)
            .await?
            .ok_or_else(Self::not_found)
    }

    #[instrument(skip(self))]
    pub async fn get_coupon_by_code(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        Self::find_by_code(&*self.db, code)
            .await?
            .ok_or_else(Self::not_found)
    }

    /// Lists live coupons, newest first. Returns the page and the total count.
    #[instrument(skip(self))]
    pub async fn list_coupons(
        &self,
        query: &ListCouponsQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let limit = self.config.page_size(query.limit);
        let page = self.config.page_number(query.page, limit);

        let mut select = coupon::Entity::find().filter(coupon::Column::DeletedAt.is_null());

        if let Some(status) = query.status {
            select = select.filter(coupon::Column::Status.eq(status));
        }
        if let Some(active) = query.active {
            let redeemable = redeemable_condition(now);
            select = if active {
                select.filter(redeemable)
            } else {
                select.filter(redeemable.not())
            };
        }
        if let Some(state) = query.state {
            select = select.filter(state_condition(state, now));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            select = select.filter(
                Condition::any()
                    .add(coupon::Column::Code.contains(normalize_code(search)))
                    .add(coupon::Column::Name.contains(search)),
            );
        }

        let paginator = select
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page - 1).await?;

        Ok((coupons, total))
    }

    /// Applies a partial update. The merged coupon is re-checked as a whole.
    #[instrument(skip(self, input))]
    pub async fn update_coupon(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        let existing = Self::find_live(&*self.db, id)
            .await?
            .ok_or_else(Self::not_found)?;

        let discount_type = input.discount_type.unwrap_or(existing.discount_type);
        let discount_value = input.discount_value.unwrap_or(existing.discount_value);
        let valid_from = input.valid_from.or(existing.valid_from);
        let valid_until = input.valid_until.or(existing.valid_until);
        Self::check_shape(discount_type, discount_value, valid_from, valid_until)?;

        let mut active: coupon::ActiveModel = existing.clone().into();
        let code = input
            .code
            .as_deref()
            .map(normalize_code)
            .unwrap_or_else(|| existing.code.clone());

        if code != existing.code {
            if Self::code_taken(&*self.db, &code).await? {
                return Err(ServiceError::BadRequest(format!(
                    "Coupon code {} already exists",
                    code
                )));
            }
            active.code = Set(code.clone());
        }
        if input.name.is_some() {
            active.name = Set(input.name);
        }
        if input.description.is_some() {
            active.description = Set(input.description);
        }
        active.discount_type = Set(discount_type);
        active.discount_value = Set(discount_value);
        if input.max_discount_amount.is_some() {
            active.max_discount_amount = Set(input.max_discount_amount);
        }
        if input.min_order_amount.is_some() {
            active.min_order_amount = Set(input.min_order_amount);
        }
        active.valid_from = Set(valid_from);
        active.valid_until = Set(valid_until);
        if let Some(status) = input.status {
            active.status = Set(status);
        }
        if let Some(limit) = input.usage_limit_per_coupon {
            active.usage_limit_per_coupon = Set(limit);
        }
        if let Some(limit) = input.usage_limit_per_customer {
            active.usage_limit_per_customer = Set(limit);
        }
        if let Some(ids) = input.product_ids {
            active.product_ids = Set(IdList(ids));
        }
        if let Some(ids) = input.category_ids {
            active.category_ids = Set(IdList(ids));
        }
        if let Some(ids) = input.customer_ids {
            active.customer_ids = Set(IdList(ids));
        }
        if let Some(ids) = input.exclude_product_ids {
            active.exclude_product_ids = Set(IdList(ids));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await.map_err(|err| {
            ServiceError::on_unique_violation(err, format!("Coupon code {} already exists", code))
        })?;
        info!(coupon_id = %id, "Updated coupon {}", updated.code);
        Ok(updated)
    }

    /// Soft delete: the coupon disappears from every lookup, its usage
    /// history stays.
    #[instrument(skip(self))]
    pub async fn delete_coupon(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = Self::find_live(&*self.db, id)
            .await?
            .ok_or_else(Self::not_found)?;

        let now = Utc::now();
        let mut active: coupon::ActiveModel = existing.into();
        active.status = Set(CouponStatus::Inactive);
        active.deleted_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&*self.db).await?;

        info!(coupon_id = %id, "Deleted coupon");
        Ok(())
    }

    /// Copies a coupon under `<CODE>_COPY` (then `_COPY2`, `_COPY3`, ...)
    /// with a fresh usage counter.
    #[instrument(skip(self))]
    pub async fn duplicate_coupon(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        let source = Self::find_live(&*self.db, id)
            .await?
            .ok_or_else(Self::not_found)?;

        let base = format!("{}_COPY", source.code);
        let mut code = base.clone();
        let mut suffix = 2;
        while Self::code_taken(&*self.db, &code).await? {
            code = format!("{}{}", base, suffix);
            suffix += 1;
        }
        if code.len() > MAX_CODE_LEN {
            return Err(ServiceError::BadRequest(format!(
                "Duplicated code {} exceeds {} characters",
                code, MAX_CODE_LEN
            )));
        }

        let now = Utc::now();
        let copy = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            name: Set(source.name.map(|n| format!("{} (copy)", n))),
            description: Set(source.description),
            discount_type: Set(source.discount_type),
            discount_value: Set(source.discount_value),
            max_discount_amount: Set(source.max_discount_amount),
            min_order_amount: Set(source.min_order_amount),
            valid_from: Set(source.valid_from),
            valid_until: Set(source.valid_until),
            status: Set(CouponStatus::Active),
            usage_limit_per_coupon: Set(source.usage_limit_per_coupon),
            usage_limit_per_customer: Set(source.usage_limit_per_customer),
            used_count: Set(0),
            product_ids: Set(source.product_ids),
            category_ids: Set(source.category_ids),
            customer_ids: Set(source.customer_ids),
            exclude_product_ids: Set(source.exclude_product_ids),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };

        let copy = copy.insert(&*self.db).await?;
        info!(source_id = %id, coupon_id = %copy.id, "Duplicated coupon as {}", copy.code);
        Ok(copy)
    }

    /// Runs the gate chain for `code` on `conn`.
    ///
    /// The outer error is infrastructure, the inner one a business refusal.
    pub async fn check_coupon<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        customer_id: Option<Uuid>,
        order: CouponOrder<'_>,
        now: DateTime<Utc>,
    ) -> Result<CouponOutcome, ServiceError> {
        let Some(coupon) = Self::find_by_code(conn, code).await? else {
            return Ok(Err(CouponRejection::UnknownCode));
        };
        Self::check_loaded(conn, coupon, customer_id, order, now).await
    }

    async fn check_loaded<C: ConnectionTrait>(
        conn: &C,
        coupon: coupon::Model,
        customer_id: Option<Uuid>,
        order: CouponOrder<'_>,
        now: DateTime<Utc>,
    ) -> Result<CouponOutcome, ServiceError> {
        let prior_customer_usage = match customer_id {
            Some(customer_id) => {
                coupon_usage::Entity::find()
                    .filter(coupon_usage::Column::CouponId.eq(coupon.id))
                    .filter(coupon_usage::Column::CustomerId.eq(customer_id))
                    .count(conn)
                    .await?
            }
            None => 0,
        };

        let ctx = CouponContext {
            customer_id,
            prior_customer_usage,
            subtotal: order.subtotal,
            product_total: order.product_total,
            product_ids: order.product_ids,
            category_ids: order.category_ids,
            now,
        };

        Ok(coupon_validation::evaluate(&coupon, &ctx).map(|discount| (coupon, discount)))
    }

    /// Takes one use of `code` if the global cap allows it.
    ///
    /// This is the first write of the redemption transaction, so concurrent
    /// redemptions of the same coupon queue on the row (or database) lock
    /// here and each sees the count left by the previous one.
    async fn claim_use<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let claimed = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .filter(coupon::Column::DeletedAt.is_null())
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimitPerCoupon.eq(0))
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimitPerCoupon)),
                    ),
            )
            .exec(conn)
            .await?;
        Ok(claimed.rows_affected > 0)
    }

    /// Previews a coupon against an order without recording anything.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn validate_coupon(
        &self,
        request: &ValidateCouponRequest,
        customer_id: Option<Uuid>,
    ) -> Result<CouponValidation, ServiceError> {
        request.validate()?;
        let order = CouponOrder {
            subtotal: request.subtotal,
            product_total: request.product_total,
            product_ids: &request.product_ids,
            category_ids: &request.category_ids,
        };

        let outcome =
            Self::check_coupon(&*self.db, &request.code, customer_id, order, Utc::now()).await?;

        Ok(match outcome {
            Ok((coupon, discount)) => CouponValidation::accepted(&coupon, discount),
            Err(rejection) => {
                counter!("coupons.validation.rejected", 1, "reason" => rejection.kind());
                CouponValidation::rejected(&rejection)
            }
        })
    }

    /// Redeems a coupon for an order.
    ///
    /// Claims a use with a conditional increment of `used_count`, runs the
    /// gates inside the same transaction and appends the usage row. Any
    /// refusal rolls the claim back. Calling this twice for the same order
    /// records two redemptions.
    #[instrument(skip(self, request), fields(code = %request.code, order_id = %request.order_id))]
    pub async fn apply_coupon(
        &self,
        request: &ApplyCouponRequest,
        customer_id: Uuid,
    ) -> Result<AppliedCoupon, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let order = CouponOrder {
            subtotal: request.subtotal,
            product_total: request.product_total,
            product_ids: &request.product_ids,
            category_ids: &request.category_ids,
        };

        let txn = self.db.begin().await?;

        let claimed = Self::claim_use(&txn, &request.code, now).await?;
        let outcome = match Self::find_by_code(&txn, &request.code).await? {
            Some(mut coupon) => {
                // Judge the redemption against the count before this claim
                if claimed {
                    coupon.used_count -= 1;
                }
                Self::check_loaded(&txn, coupon, Some(customer_id), order, now).await?
            }
            None => Err(CouponRejection::UnknownCode),
        };

        let (coupon, discount) = match outcome {
            Ok(accepted) if claimed => accepted,
            refused => {
                txn.rollback().await?;
                let rejection = refused.err().unwrap_or(CouponRejection::UsageLimitReached);
                counter!("coupons.apply.rejected", 1, "reason" => rejection.kind());
                warn!(reason = rejection.kind(), "Coupon redemption rejected");
                return Err(ServiceError::CouponRejected(rejection.user_message()));
            }
        };

        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            customer_id: Set(customer_id),
            order_id: Set(request.order_id),
            order_subtotal: Set(request.subtotal),
            discount_amount: Set(discount),
            used_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        counter!("coupons.apply.succeeded", 1);
        info!(coupon_id = %coupon.id, usage_id = %usage.id, %discount, "Coupon redeemed");

        Ok(AppliedCoupon {
            usage_id: usage.id,
            coupon_id: coupon.id,
            code: coupon.code,
            order_id: request.order_id,
            discount,
            message: coupon_validation::success_message(discount),
        })
    }

    /// Creates `count` coupons from a template with random, unique codes.
    #[instrument(skip(self, input), fields(count = input.count))]
    pub async fn bulk_generate(
        &self,
        input: BulkGenerateInput,
    ) -> Result<Vec<coupon::Model>, ServiceError> {
        input.validate()?;
        if input.count > self.config.coupon_bulk_max_count {
            return Err(ServiceError::ValidationError(format!(
                "count must be at most {}",
                self.config.coupon_bulk_max_count
            )));
        }

        let template = input.template;
        Self::check_shape(
            template.discount_type,
            template.discount_value,
            template.valid_from,
            template.valid_until,
        )?;

        let prefix = input
            .prefix
            .as_deref()
            .map(normalize_code)
            .unwrap_or_default();
        if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ServiceError::ValidationError(
                "prefix may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        let code_len = self.config.coupon_code_length;

        let txn = self.db.begin().await?;
        let mut issued: HashSet<String> = HashSet::new();
        let mut created = Vec::with_capacity(input.count as usize);
        let now = Utc::now();

        for _ in 0..input.count {
            let mut code = None;
            for _ in 0..CODE_GENERATION_ATTEMPTS {
                let candidate = format!("{}{}", prefix, generate_code(code_len));
                if !issued.contains(&candidate) && !Self::code_taken(&txn, &candidate).await? {
                    code = Some(candidate);
                    break;
                }
            }
            let Some(code) = code else {
                txn.rollback().await?;
                return Err(ServiceError::InternalError(
                    "Could not generate a unique coupon code".to_string(),
                ));
            };
            issued.insert(code.clone());

            let coupon = coupon::ActiveModel {
                id: Set(Uuid::new_v4()),
                code: Set(code),
                name: Set(template.name.clone()),
                description: Set(template.description.clone()),
                discount_type: Set(template.discount_type),
                discount_value: Set(template.discount_value),
                max_discount_amount: Set(template.max_discount_amount),
                min_order_amount: Set(template.min_order_amount),
                valid_from: Set(template.valid_from),
                valid_until: Set(template.valid_until),
                status: Set(CouponStatus::Active),
                usage_limit_per_coupon: Set(template.usage_limit_per_coupon.unwrap_or(0)),
                usage_limit_per_customer: Set(template.usage_limit_per_customer.unwrap_or(0)),
                used_count: Set(0),
                product_ids: Set(IdList(template.product_ids.clone())),
                category_ids: Set(IdList(template.category_ids.clone())),
                customer_ids: Set(IdList(template.customer_ids.clone())),
                exclude_product_ids: Set(IdList(template.exclude_product_ids.clone())),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
            }
            .insert(&txn)
            .await?;
            created.push(coupon);
        }

        txn.commit().await?;
        info!("Generated {} coupons", created.len());
        Ok(created)
    }

    /// Redemptions of a coupon, newest first.
    #[instrument(skip(self))]
    pub async fn list_usage(
        &self,
        id: Uuid,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<(Vec<coupon_usage::Model>, u64), ServiceError> {
        // Existence check so unknown ids are 404 rather than an empty page
        self.get_coupon(id).await?;

        let limit = self.config.page_size(limit);
        let page = self.config.page_number(page, limit);
        let paginator = coupon_usage::Entity::find()
            .filter(coupon_usage::Column::CouponId.eq(id))
            .order_by_desc(coupon_usage::Column::UsedAt)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page - 1).await?;
        Ok((rows, total))
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self, id: Uuid) -> Result<CouponStatistics, ServiceError> {
        let coupon = self.get_coupon(id).await?;

        let usages = coupon_usage::Entity::find()
            .filter(coupon_usage::Column::CouponId.eq(id))
            .order_by_asc(coupon_usage::Column::UsedAt)
            .all(&*self.db)
            .await?;

        let total_discount = round_money(usages.iter().map(|u| u.discount_amount).sum());
        let unique_customers = usages
            .iter()
            .map(|u| u.customer_id)
            .collect::<HashSet<_>>()
            .len() as u64;
        let average_discount = if usages.is_empty() {
            Decimal::ZERO
        } else {
            round_money(total_discount / Decimal::from(usages.len() as u64))
        };
        let usage_rate = (coupon.usage_limit_per_coupon > 0).then(|| {
            round_money(
                Decimal::from(coupon.used_count) * Decimal::ONE_HUNDRED
                    / Decimal::from(coupon.usage_limit_per_coupon),
            )
        });

        Ok(CouponStatistics {
            coupon_id: coupon.id,
            remaining_uses: coupon.remaining_uses(),
            code: coupon.code,
            used_count: coupon.used_count,
            usage_limit: coupon.usage_limit_per_coupon,
            usage_rate,
            total_discount,
            unique_customers,
            average_discount,
            first_used_at: usages.first().map(|u| u.used_at),
            last_used_at: usages.last().map(|u| u.used_at),
        })
    }

    /// Marks active coupons whose window closed before `now` as expired.
    /// Returns how many were transitioned.
    #[instrument(skip(self))]
    pub async fn expire_stale_coupons(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = coupon::Entity::update_many()
            .col_expr(coupon::Column::Status, Expr::value(CouponStatus::Expired))
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Status.eq(CouponStatus::Active))
            .filter(coupon::Column::DeletedAt.is_null())
            .filter(coupon::Column::ValidUntil.lt(now))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!("Expired {} coupons", result.rows_affected);
            counter!("coupons.expired", result.rows_affected);
        }
        Ok(result.rows_affected)
    }
}

/// Status active and `now` inside the validity window.
fn redeemable_condition(now: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(coupon::Column::Status.eq(CouponStatus::Active))
        .add(started_condition(now))
        .add(not_ended_condition(now))
}

fn started_condition(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(coupon::Column::ValidFrom.is_null())
        .add(coupon::Column::ValidFrom.lte(now))
}

fn not_ended_condition(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(coupon::Column::ValidUntil.is_null())
        .add(coupon::Column::ValidUntil.gte(now))
}

fn exhausted_condition() -> Condition {
    Condition::all()
        .add(coupon::Column::UsageLimitPerCoupon.gt(0))
        .add(
            Expr::col(coupon::Column::UsedCount)
                .gte(Expr::col(coupon::Column::UsageLimitPerCoupon)),
        )
}

/// SQL form of [`coupon::Model::display_state`].
fn state_condition(state: CouponState, now: DateTime<Utc>) -> Condition {
    let open = Condition::all()
        .add(coupon::Column::Status.ne(CouponStatus::Expired))
        .add(not_ended_condition(now));

    match state {
        CouponState::Expired => Condition::any()
            .add(coupon::Column::Status.eq(CouponStatus::Expired))
            .add(coupon::Column::ValidUntil.lt(now)),
        CouponState::Inactive => open.add(coupon::Column::Status.eq(CouponStatus::Inactive)),
        CouponState::Exhausted => open
            .add(coupon::Column::Status.eq(CouponStatus::Active))
            .add(exhausted_condition()),
        CouponState::Scheduled => open
            .add(coupon::Column::Status.eq(CouponStatus::Active))
            .add(exhausted_condition().not())
            .add(started_condition(now).not()),
        CouponState::Active => open
            .add(coupon::Column::Status.eq(CouponStatus::Active))
            .add(exhausted_condition().not())
            .add(started_condition(now)),
    }
}
