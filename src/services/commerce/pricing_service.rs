use super::pricing_rules::{self, korea_date, quantity_discount_percent, seasonal_promotion};
use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        product,
        user::{self, UserRole},
    },
    errors::ServiceError,
    money::{percent_of, round_money, MAX_AMOUNT},
    services::coupons::{CouponOrder, CouponService},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(equal = 2, message = "must be a 2-letter ISO country code"))]
    pub country: String,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

/// Price one product line.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100000, message = "must be between 1 and 100000"))]
    pub quantity: u32,
    pub coupon_code: Option<String>,
    #[validate]
    pub shipping_address: Option<ShippingAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100000, message = "must be between 1 and 100000"))]
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartPriceRequest {
    #[validate]
    pub items: Vec<CartItemRequest>,
    pub coupon_code: Option<String>,
    #[validate]
    pub shipping_address: Option<ShippingAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Quantity,
    Coupon,
    Seasonal,
}

/// One discount line, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedDiscount {
    pub kind: DiscountKind,
    pub label: String,
    /// Percentage, when the discount is rate based
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub taxable_amount: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

/// Priced product line. `base_price`/`discount_amount`/... and `breakdown`
/// carry the same numbers under two naming schemes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub base_price: Decimal,
    pub discount_amount: Decimal,
    pub discount_percentage: Decimal,
    pub tax_amount: Decimal,
    pub tax_rate: Decimal,
    pub shipping_cost: Decimal,
    pub final_price: Decimal,
    pub currency: String,
    pub applied_discounts: Vec<AppliedDiscount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    /// Why a supplied coupon was not applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_message: Option<String>,
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartPricingResult {
    pub items: Vec<PricingResult>,
    pub subtotal: Decimal,
    pub item_discounts: Decimal,
    pub coupon_discount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub applied_discounts: Vec<AppliedDiscount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_message: Option<String>,
    pub breakdown: PriceBreakdown,
}

/// Coupon discount already resolved for a line or cart.
#[derive(Debug, Clone, Default)]
struct CouponLine {
    code: Option<String>,
    amount: Decimal,
    message: Option<String>,
}

/// Line result plus what the cart needs for consolidated shipping.
struct LineQuote {
    result: PricingResult,
    shipping_weight: Option<Decimal>,
}

/// Settings the calculator reads from [`AppConfig`].
#[derive(Debug, Clone)]
struct PricingSettings {
    currency: String,
    default_country: String,
    default_tax_rate: Decimal,
    free_shipping_threshold: Decimal,
}

impl From<&AppConfig> for PricingSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.default_currency.clone(),
            default_country: cfg.default_country.clone(),
            default_tax_rate: cfg.default_tax_rate_decimal(),
            free_shipping_threshold: Decimal::from(cfg.free_shipping_threshold),
        }
    }
}

/// Order pricing: role-based unit price, quantity tier, one coupon,
/// seasonal promotion, jurisdiction tax and weight-based shipping.
///
/// Coupons are checked here on the subtotal alone; product and category
/// restrictions are only enforced by the coupon endpoints.
#[derive(Debug, Clone)]
pub struct PricingService {
    db_pool: Arc<DbPool>,
    settings: PricingSettings,
}

impl PricingService {
    pub fn new(db_pool: Arc<DbPool>, config: Arc<AppConfig>) -> Self {
        Self {
            db_pool,
            settings: PricingSettings::from(config.as_ref()),
        }
    }

    async fn load_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if !product.is_active {
            return Err(ServiceError::BadRequest(format!(
                "Product {} is not available",
                product_id
            )));
        }
        Ok(product)
    }

    /// Role of a known user; unknown ids price as guests.
    async fn load_role(&self, user_id: Option<Uuid>) -> Result<Option<UserRole>, ServiceError> {
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await?;
        if user.is_none() {
            debug!(%user_id, "Unknown user, pricing as guest");
        }
        Ok(user.map(|u| u.role))
    }

    fn country(&self, address: Option<&ShippingAddress>) -> String {
        address
            .map(|a| a.country.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.settings.default_country.clone())
    }

    async fn resolve_coupon(
        &self,
        code: Option<&str>,
        user_id: Option<Uuid>,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CouponLine, ServiceError> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(CouponLine::default());
        };

        let outcome = CouponService::check_coupon(
            &*self.db_pool,
            code,
            user_id,
            CouponOrder::subtotal_only(amount),
            now,
        )
        .await?;

        Ok(match outcome {
            Ok((coupon, discount)) => CouponLine {
                code: Some(coupon.code),
                amount: discount.min(amount),
                message: None,
            },
            Err(rejection) => CouponLine {
                code: None,
                amount: Decimal::ZERO,
                message: Some(rejection.user_message()),
            },
        })
    }

    /// Prices a single product line at the current time.
    pub async fn calculate_price(
        &self,
        request: &PriceRequest,
        user_id: Option<Uuid>,
    ) -> Result<PricingResult, ServiceError> {
        self.calculate_price_at(request, user_id, Utc::now()).await
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn calculate_price_at(
        &self,
        request: &PriceRequest,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<PricingResult, ServiceError> {
        let product = self.load_product(request.product_id).await?;
        let role = self.load_role(user_id).await?;
        let country = self.country(request.shipping_address.as_ref());

        let line = LineAmount::new(product.unit_price_for(role), request.quantity)?;
        let quantity_discount = percent_of(line.subtotal, quantity_discount_percent(line.quantity));

        let coupon = self
            .resolve_coupon(
                request.coupon_code.as_deref(),
                user_id,
                line.subtotal - quantity_discount,
                now,
            )
            .await?;

        Ok(self
            .quote_line(&product, line, &coupon, &country, now)
            .result)
    }

    /// Seasonal, tax and shipping for a line whose coupon is already known.
    fn quote_line(
        &self,
        product: &product::Model,
        line: LineAmount,
        coupon: &CouponLine,
        country: &str,
        now: DateTime<Utc>,
    ) -> LineQuote {
        let LineAmount {
            unit_price,
            quantity,
            subtotal,
        } = line;
        let mut applied = Vec::new();

        let quantity_rate = quantity_discount_percent(quantity);
        let quantity_discount = percent_of(subtotal, quantity_rate);
        if quantity_discount > Decimal::ZERO {
            applied.push(AppliedDiscount {
                kind: DiscountKind::Quantity,
                label: format!("Volume discount ({}+ units)", quantity_tier_floor(quantity)),
                rate: Some(quantity_rate),
                amount: quantity_discount,
            });
        }

        let coupon_discount = coupon.amount;
        if let (Some(code), true) = (&coupon.code, coupon_discount > Decimal::ZERO) {
            applied.push(AppliedDiscount {
                kind: DiscountKind::Coupon,
                label: format!("Coupon {}", code),
                rate: None,
                amount: coupon_discount,
            });
        }

        let after_coupon = (subtotal - quantity_discount - coupon_discount).max(Decimal::ZERO);
        let seasonal_discount = match seasonal_promotion(korea_date(now)) {
            Some(promo) => {
                let amount = percent_of(after_coupon, promo.percent);
                if amount > Decimal::ZERO {
                    applied.push(AppliedDiscount {
                        kind: DiscountKind::Seasonal,
                        label: promo.name.to_string(),
                        rate: Some(promo.percent),
                        amount,
                    });
                }
                amount
            }
            None => Decimal::ZERO,
        };

        let total_discount = quantity_discount + coupon_discount + seasonal_discount;
        let taxable_amount = (subtotal - total_discount).max(Decimal::ZERO);
        let tax_rate = pricing_rules::tax_rate(country, self.settings.default_tax_rate);
        let tax = round_money(taxable_amount * tax_rate);

        let shipping_weight = product
            .requires_shipping
            .then(|| product.weight_kg.saturating_mul(Decimal::from(quantity)));
        let shipping = match shipping_weight {
            None => Decimal::ZERO,
            Some(_)
                if pricing_rules::qualifies_for_free_shipping(
                    country,
                    subtotal,
                    self.settings.free_shipping_threshold,
                ) =>
            {
                Decimal::ZERO
            }
            Some(weight) => pricing_rules::item_shipping(country, weight),
        };

        let total = taxable_amount + tax + shipping;

        LineQuote {
            result: PricingResult {
                product_id: product.id,
                quantity,
                unit_price,
                base_price: subtotal,
                discount_amount: total_discount,
                discount_percentage: discount_percentage(total_discount, subtotal),
                tax_amount: tax,
                tax_rate,
                shipping_cost: shipping,
                final_price: total,
                currency: self.settings.currency.clone(),
                applied_discounts: applied,
                coupon_code: coupon.code.clone(),
                coupon_message: coupon.message.clone(),
                breakdown: PriceBreakdown {
                    subtotal,
                    discount: total_discount,
                    taxable_amount,
                    tax,
                    shipping,
                    total,
                },
            },
            shipping_weight,
        }
    }

    pub async fn calculate_cart_total(
        &self,
        request: &CartPriceRequest,
        user_id: Option<Uuid>,
    ) -> Result<CartPricingResult, ServiceError> {
        self.calculate_cart_total_at(request, user_id, Utc::now()).await
    }

    /// Prices every line without a coupon, then applies the cart coupon once
    /// and ships the cart as one parcel.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn calculate_cart_total_at(
        &self,
        request: &CartPriceRequest,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CartPricingResult, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::BadRequest("Cart is empty".to_string()));
        }

        let role = self.load_role(user_id).await?;
        let country = self.country(request.shipping_address.as_ref());
        let no_coupon = CouponLine::default();

        let mut quotes = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = self.load_product(item.product_id).await?;
            let line = LineAmount::new(product.unit_price_for(role), item.quantity)?;
            quotes.push(self.quote_line(&product, line, &no_coupon, &country, now));
        }

        let subtotal: Decimal = quotes.iter().map(|q| q.result.base_price).sum();
        let item_discounts: Decimal = quotes.iter().map(|q| q.result.discount_amount).sum();
        let tax: Decimal = quotes.iter().map(|q| q.result.tax_amount).sum();
        let after_items = (subtotal - item_discounts).max(Decimal::ZERO);

        let coupon = self
            .resolve_coupon(request.coupon_code.as_deref(), user_id, after_items, now)
            .await?;
        let coupon_discount = coupon.amount.min(after_items);

        let shipping = self.cart_shipping(&quotes, &country, subtotal);

        let discount = item_discounts + coupon_discount;
        let taxable_amount = subtotal - discount;
        let total = taxable_amount + tax + shipping;

        let mut applied_discounts = Vec::new();
        if let (Some(code), true) = (&coupon.code, coupon_discount > Decimal::ZERO) {
            applied_discounts.push(AppliedDiscount {
                kind: DiscountKind::Coupon,
                label: format!("Coupon {}", code),
                rate: None,
                amount: coupon_discount,
            });
        }

        Ok(CartPricingResult {
            items: quotes.into_iter().map(|q| q.result).collect(),
            subtotal,
            item_discounts,
            coupon_discount,
            discount_amount: discount,
            tax_amount: tax,
            shipping_cost: shipping,
            total,
            currency: self.settings.currency.clone(),
            applied_discounts,
            coupon_code: coupon.code,
            coupon_message: coupon.message,
            breakdown: PriceBreakdown {
                subtotal,
                discount,
                taxable_amount,
                tax,
                shipping,
                total,
            },
        })
    }

    /// Consolidated parcel price, never above the dearest single line.
    fn cart_shipping(&self, quotes: &[LineQuote], country: &str, subtotal: Decimal) -> Decimal {
        let weights: Vec<Decimal> = quotes.iter().filter_map(|q| q.shipping_weight).collect();
        if weights.is_empty()
            || pricing_rules::qualifies_for_free_shipping(
                country,
                subtotal,
                self.settings.free_shipping_threshold,
            )
        {
            return Decimal::ZERO;
        }

        let total_weight: Decimal = weights.iter().copied().sum();
        let combined = pricing_rules::combined_shipping(country, total_weight);
        let max_individual = quotes
            .iter()
            .map(|q| q.result.shipping_cost)
            .max()
            .unwrap_or(Decimal::ZERO);

        combined.min(max_individual)
    }
}

#[derive(Debug, Clone, Copy)]
struct LineAmount {
    unit_price: Decimal,
    quantity: u32,
    subtotal: Decimal,
}

impl LineAmount {
    /// `unit_price * quantity`, rejected when it exceeds [`MAX_AMOUNT`].
    fn new(unit_price: Decimal, quantity: u32) -> Result<Self, ServiceError> {
        let subtotal = unit_price
            .checked_mul(Decimal::from(quantity))
            .map(round_money)
            .filter(|amount| *amount <= MAX_AMOUNT)
            .ok_or_else(|| ServiceError::BadRequest("Order amount is too large".to_string()))?;
        Ok(Self {
            unit_price,
            quantity,
            subtotal,
        })
    }
}

fn quantity_tier_floor(quantity: u32) -> u32 {
    match quantity {
        q if q >= 100 => 100,
        q if q >= 50 => 50,
        q if q >= 20 => 20,
        _ => 10,
    }
}

fn discount_percentage(discount: Decimal, subtotal: Decimal) -> Decimal {
    if subtotal.is_zero() {
        Decimal::ZERO
    } else {
        round_money(discount * Decimal::ONE_HUNDRED / subtotal)
    }
}
