//! Rate tables used by the pricing calculator.
//!
//! Everything here is pure; the service layer supplies products, dates and
//! destinations.

use crate::money::round_money;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Country whose orders use the domestic shipping table.
pub const DOMESTIC_COUNTRY: &str = "KR";

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Single rate picked by order quantity, applied to the whole subtotal.
pub fn quantity_discount_percent(quantity: u32) -> Decimal {
    match quantity {
        q if q >= 100 => dec!(20),
        q if q >= 50 => dec!(15),
        q if q >= 20 => dec!(10),
        q if q >= 10 => dec!(5),
        _ => Decimal::ZERO,
    }
}

/// Calendar promotion active on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalPromotion {
    pub name: &'static str,
    pub percent: Decimal,
}

struct SeasonalWindow {
    name: &'static str,
    percent: Decimal,
    start: (u32, u32),
    end: (u32, u32),
}

impl SeasonalWindow {
    fn contains(&self, month: u32, day: u32) -> bool {
        let md = (month, day);
        md >= self.start && md <= self.end
    }
}

/// Checked in order; the first window containing the date applies.
const SEASONAL_WINDOWS: [SeasonalWindow; 7] = [
    SeasonalWindow {
        name: "Pepero Day",
        percent: dec!(11),
        start: (11, 1),
        end: (11, 11),
    },
    SeasonalWindow {
        name: "Hangul Day",
        percent: dec!(10),
        start: (10, 10),
        end: (10, 10),
    },
    SeasonalWindow {
        name: "Family Month",
        percent: dec!(15),
        start: (5, 1),
        end: (5, 7),
    },
    SeasonalWindow {
        name: "Chuseok",
        percent: dec!(10),
        start: (9, 20),
        end: (9, 30),
    },
    // Lunar New Year wraps the month boundary, so it is split in two
    SeasonalWindow {
        name: "Lunar New Year",
        percent: dec!(10),
        start: (1, 20),
        end: (1, 31),
    },
    SeasonalWindow {
        name: "Lunar New Year",
        percent: dec!(10),
        start: (2, 1),
        end: (2, 10),
    },
    SeasonalWindow {
        name: "Year-end Sale",
        percent: dec!(20),
        start: (12, 20),
        end: (12, 31),
    },
];

pub fn seasonal_promotion(date: NaiveDate) -> Option<SeasonalPromotion> {
    SEASONAL_WINDOWS
        .iter()
        .find(|w| w.contains(date.month(), date.day()))
        .map(|w| SeasonalPromotion {
            name: w.name,
            percent: w.percent,
        })
}

/// Calendar date in Korea Standard Time.
pub fn korea_date(now: DateTime<Utc>) -> NaiveDate {
    match FixedOffset::east_opt(KST_OFFSET_SECS) {
        Some(kst) => now.with_timezone(&kst).date_naive(),
        None => now.date_naive(),
    }
}

/// Tax rate (fraction) for an ISO country code.
pub fn tax_rate(country: &str, default_rate: Decimal) -> Decimal {
    match country.trim().to_ascii_uppercase().as_str() {
        "KR" => dec!(0.10),
        "US" => dec!(0.0875),
        "JP" => dec!(0.10),
        "CN" => dec!(0.13),
        _ => default_rate,
    }
}

pub fn is_domestic(country: &str) -> bool {
    country.trim().eq_ignore_ascii_case(DOMESTIC_COUNTRY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShippingZone {
    Domestic,
    Asia,
    NorthAmerica,
    Europe,
    RestOfWorld,
}

impl ShippingZone {
    pub fn for_country(country: &str) -> Self {
        match country.trim().to_ascii_uppercase().as_str() {
            DOMESTIC_COUNTRY => ShippingZone::Domestic,
            "JP" | "CN" | "TW" | "HK" | "MO" | "SG" | "TH" | "VN" | "MY" | "PH" | "ID"
            | "MN" => ShippingZone::Asia,
            "US" | "CA" => ShippingZone::NorthAmerica,
            "GB" | "DE" | "FR" | "IT" | "ES" | "NL" | "BE" | "SE" | "CH" | "AT" | "DK" | "FI"
            | "NO" | "PL" | "IE" | "PT" => ShippingZone::Europe,
            _ => ShippingZone::RestOfWorld,
        }
    }

    /// First-kilogram price and price per additional started kilogram.
    fn international_rates(&self) -> (Decimal, Decimal) {
        match self {
            ShippingZone::Domestic | ShippingZone::Asia => (dec!(15000), dec!(5000)),
            ShippingZone::NorthAmerica => (dec!(25000), dec!(8000)),
            ShippingZone::Europe => (dec!(28000), dec!(9000)),
            ShippingZone::RestOfWorld => (dec!(35000), dec!(10000)),
        }
    }
}

/// Kilograms started beyond `threshold`.
fn started_kg_over(weight_kg: Decimal, threshold: Decimal) -> Decimal {
    (weight_kg - threshold).max(Decimal::ZERO).ceil()
}

fn tiered_rate(weight_kg: Decimal, tiers: &[(Decimal, Decimal); 4], per_kg_over: Decimal) -> Decimal {
    for (max_weight, price) in tiers {
        if weight_kg <= *max_weight {
            return *price;
        }
    }
    let (heaviest, top_price) = tiers[3];
    top_price + per_kg_over * started_kg_over(weight_kg, heaviest)
}

/// Per-parcel domestic rate by weight.
pub fn domestic_shipping(weight_kg: Decimal) -> Decimal {
    tiered_rate(
        weight_kg,
        &[
            (dec!(1), dec!(3000)),
            (dec!(5), dec!(4000)),
            (dec!(10), dec!(6000)),
            (dec!(20), dec!(9000)),
        ],
        dec!(1000),
    )
}

pub fn international_shipping(zone: ShippingZone, weight_kg: Decimal) -> Decimal {
    let (base, per_kg) = zone.international_rates();
    base + per_kg * started_kg_over(weight_kg, Decimal::ONE)
}

/// Shipping for one product line.
pub fn item_shipping(country: &str, weight_kg: Decimal) -> Decimal {
    match ShippingZone::for_country(country) {
        ShippingZone::Domestic => domestic_shipping(weight_kg),
        zone => international_shipping(zone, weight_kg),
    }
}

/// Shipping for a whole cart sent as one consolidated parcel.
pub fn combined_shipping(country: &str, total_weight_kg: Decimal) -> Decimal {
    match ShippingZone::for_country(country) {
        ShippingZone::Domestic => tiered_rate(
            total_weight_kg,
            &[
                (dec!(1), dec!(2500)),
                (dec!(5), dec!(3500)),
                (dec!(10), dec!(5500)),
                (dec!(20), dec!(8000)),
            ],
            dec!(800),
        ),
        zone => round_money(international_shipping(zone, total_weight_kg) * dec!(0.9)),
    }
}

/// Domestic orders at or above the threshold ship for free.
pub fn qualifies_for_free_shipping(country: &str, subtotal: Decimal, threshold: Decimal) -> bool {
    is_domestic(country) && subtotal >= threshold
}
