// 💰 Asset Entity
//
// "Asset value is a VALUE (can change), Asset UUID is IDENTITY (never changes)"
//
// Cash assets seed the projection's cash pool; everything else compounds at
// its own growth rate (or the assumption default when unset).

use super::{default_version, empty_metadata, impl_record_basics, new_id, Record};
use crate::error::{Checks, FieldError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ASSET CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    /// Bank deposits, fixed deposits, money market
    Cash,

    /// Stocks, bonds, funds, brokerage accounts
    Investment,

    /// Real estate at market value
    Property,

    /// Private retirement schemes (SRS, pensions). CPF is tracked on the profile.
    Retirement,

    /// Cars and other depreciating vehicles
    Vehicle,

    Other,
}

impl AssetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCategory::Cash => "cash",
            AssetCategory::Investment => "investment",
            AssetCategory::Property => "property",
            AssetCategory::Retirement => "retirement",
            AssetCategory::Vehicle => "vehicle",
            AssetCategory::Other => "other",
        }
    }

    pub fn all() -> [AssetCategory; 6] {
        [
            AssetCategory::Cash,
            AssetCategory::Investment,
            AssetCategory::Property,
            AssetCategory::Retirement,
            AssetCategory::Vehicle,
            AssetCategory::Other,
        ]
    }

    pub fn is_liquid(&self) -> bool {
        matches!(self, AssetCategory::Cash | AssetCategory::Investment)
    }
}

// ============================================================================
// ASSET ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Stable identity (UUID) - never changes
    #[serde(default = "new_id")]
    pub id: String,

    pub name: String,
    pub category: AssetCategory,

    /// Current market value
    pub value: f64,

    /// Annual growth as a fraction (0.05 = 5%). None = use the projection default.
    #[serde(default)]
    pub growth_rate: Option<f64>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

impl Asset {
    pub fn new(name: &str, category: AssetCategory, value: f64) -> Self {
        let now = Utc::now();
        Asset {
            id: new_id(),
            name: name.to_string(),
            category,
            value,
            growth_rate: None,
            notes: None,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: empty_metadata(),
        }
    }

    pub fn with_growth(mut self, rate: f64) -> Self {
        self.growth_rate = Some(rate);
        self
    }

    /// Growth rate to apply, falling back to `default_rate`.
    /// Cash is handled by the projection's cash pool and never uses the default.
    pub fn effective_growth(&self, default_rate: f64) -> f64 {
        self.growth_rate.unwrap_or(default_rate)
    }

    /// Value after `years` of annual compounding
    pub fn value_after_years(&self, years: f64, default_rate: f64) -> f64 {
        self.value * (1.0 + self.effective_growth(default_rate)).powf(years)
    }
}

impl Record for Asset {
    const KIND: &'static str = "asset";

    impl_record_basics!();

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.non_empty(&self.name, "name").amount(self.value, "value");
        if let Some(rate) = self.growth_rate {
            checks.rate(rate, "growth_rate");
        }
        checks.finish()
    }

    fn idempotency_key(&self) -> String {
        format!("{}|{}|{}", self.name.to_lowercase(), self.category.as_str(), self.value)
    }
}
