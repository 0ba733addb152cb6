use crate::money::{percent_of, round_money};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// How the discount value of a coupon is interpreted.
///
/// `percent` and `percentage` are synonyms kept for older clients.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "percent")]
    Percent,
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed_cart")]
    FixedCart,
    #[sea_orm(string_value = "fixed_product")]
    FixedProduct,
}

impl DiscountType {
    pub fn is_percentage(&self) -> bool {
        matches!(self, DiscountType::Percent | DiscountType::Percentage)
    }
}

/// Administrative status of a coupon
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
    #[sea_orm(string_value = "expired")]
    Expired,
}

/// Derived lifecycle state shown in admin listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CouponState {
    Active,
    Inactive,
    Expired,
    Exhausted,
    Scheduled,
}

/// Id list stored as a JSON array column. Empty means "no restriction".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct IdList(pub Vec<Uuid>);

impl IdList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.0.contains(id)
    }

    /// True when at least one of `ids` is in the list.
    pub fn intersects(&self, ids: &[Uuid]) -> bool {
        ids.iter().any(|id| self.0.contains(id))
    }
}

impl From<Vec<Uuid>> for IdList {
    fn from(ids: Vec<Uuid>) -> Self {
        IdList(ids)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub status: CouponStatus,
    /// 0 = unlimited
    pub usage_limit_per_coupon: i32,
    /// 0 = unlimited
    pub usage_limit_per_customer: i32,
    pub used_count: i32,
    #[sea_orm(column_type = "Json")]
    pub product_ids: IdList,
    #[sea_orm(column_type = "Json")]
    pub category_ids: IdList,
    #[sea_orm(column_type = "Json")]
    pub customer_ids: IdList,
    #[sea_orm(column_type = "Json")]
    pub exclude_product_ids: IdList,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    Usages,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Outcome of the per-customer eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerEligibility {
    Eligible,
    /// The coupon has a customer allow-list and this customer is not on it.
    NotAllowed,
    /// The customer already redeemed the coupon the permitted number of times.
    LimitReached,
}

/// Trim and upper-case a coupon code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl Model {
    pub fn is_active(&self) -> bool {
        self.status == CouponStatus::Active && self.deleted_at.is_none()
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| now >= from)
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(false, |until| now > until)
    }

    pub fn is_usage_exhausted(&self) -> bool {
        self.usage_limit_per_coupon > 0 && self.used_count >= self.usage_limit_per_coupon
    }

    /// Active, inside its validity window and under the global usage cap.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.has_started(now) && !self.has_ended(now) && !self.is_usage_exhausted()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Checks the customer allow-list and the per-customer cap against
    /// `prior_usage`, the customer's redemption count from the usage ledger.
    pub fn customer_eligibility(&self, customer_id: Uuid, prior_usage: u64) -> CustomerEligibility {
        if !self.customer_ids.is_empty() && !self.customer_ids.contains(&customer_id) {
            return CustomerEligibility::NotAllowed;
        }
        if self.usage_limit_per_customer > 0 && prior_usage >= self.usage_limit_per_customer as u64 {
            return CustomerEligibility::LimitReached;
        }
        CustomerEligibility::Eligible
    }

    pub fn can_be_used_by_customer(&self, customer_id: Uuid, prior_usage: u64) -> bool {
        self.customer_eligibility(customer_id, prior_usage) == CustomerEligibility::Eligible
    }

    /// Discount granted on `subtotal`.
    ///
    /// `fixed_product` coupons only yield a discount when a product-level
    /// total is supplied; otherwise the result is zero. The amount is capped
    /// by `max_discount_amount`, then by `subtotal`, and never negative.
    pub fn calculate_discount(&self, subtotal: Decimal, product_total: Option<Decimal>) -> Decimal {
        let mut discount = match self.discount_type {
            DiscountType::Percent | DiscountType::Percentage => {
                percent_of(subtotal, self.discount_value)
            }
            DiscountType::FixedCart => round_money(self.discount_value),
            DiscountType::FixedProduct => match product_total {
                Some(_) => round_money(self.discount_value),
                None => Decimal::ZERO,
            },
        };
        if let Some(cap) = self.max_discount_amount {
            discount = discount.min(cap);
        }
        discount.min(subtotal).max(Decimal::ZERO)
    }

    pub fn remaining_uses(&self) -> Option<i32> {
        (self.usage_limit_per_coupon > 0)
            .then(|| (self.usage_limit_per_coupon - self.used_count).max(0))
    }

    pub fn display_state(&self, now: DateTime<Utc>) -> CouponState {
        if self.status == CouponStatus::Expired || self.has_ended(now) {
            CouponState::Expired
        } else if !self.is_active() {
            CouponState::Inactive
        } else if self.is_usage_exhausted() {
            CouponState::Exhausted
        } else if !self.has_started(now) {
            CouponState::Scheduled
        } else {
            CouponState::Active
        }
    }
}
