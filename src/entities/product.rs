use super::user::UserRole;
use crate::money::validate_amount;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Catalog product as seen by the pricing calculator
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Product name
    #[validate(length(
        min = 1,
        max = 255,
        message = "Product name must be between 1 and 255 characters"
    ))]
    pub name: String,

    /// SKU (Stock Keeping Unit)
    #[validate(length(
        min = 1,
        max = 100,
        message = "SKU must be between 1 and 100 characters"
    ))]
    pub sku: String,

    /// Category used by category-restricted coupons
    pub category_id: Option<Uuid>,

    /// List price charged to guests and regular customers
    #[validate(custom = "validate_amount")]
    pub retail_price: Decimal,

    /// Promotional price for logged-in regular customers
    pub sale_price: Option<Decimal>,

    /// Price for business and vendor accounts
    pub wholesale_price: Option<Decimal>,

    /// Price for affiliate accounts
    pub affiliate_price: Option<Decimal>,

    /// Shipping weight in kilograms
    #[validate(custom = "validate_amount")]
    pub weight_kg: Decimal,

    /// Digital goods skip shipping entirely
    pub requires_shipping: bool,

    /// Is the product active
    pub is_active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Model {
    /// Unit price for a buyer with the given role. Guests pay retail.
    pub fn unit_price_for(&self, role: Option<UserRole>) -> Decimal {
        match role {
            None => self.retail_price,
            Some(UserRole::Business | UserRole::Vendor) => {
                self.wholesale_price.unwrap_or(self.retail_price)
            }
            Some(UserRole::Affiliate) => self.affiliate_price.unwrap_or(self.retail_price),
            Some(_) => self.sale_price.unwrap_or(self.retail_price),
        }
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.is_active {
                active_model.is_active = Set(true);
            }

            if let ActiveValue::NotSet = active_model.requires_shipping {
                active_model.requires_shipping = Set(true);
            }

            active_model.created_at = Set(now);
            active_model.updated_at = Set(now);

            let model: Model = active_model.clone().try_into().map_err(|_| {
                DbErr::Custom("Failed to convert ActiveModel to Model for validation".to_string())
            })?;

            if let Err(err) = model.validate() {
                return Err(DbErr::Custom(format!("Validation error: {}", err)));
            }
        } else {
            active_model.updated_at = Set(now);
        }

        Ok(active_model)
    }
}
