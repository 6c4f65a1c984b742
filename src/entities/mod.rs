// Entity Models
//
// Each record has:
// - Stable identity (UUID) that never changes across edits
// - A version counter bumped by the store on every update
// - Extensible metadata for fields the schema doesn't know about yet

pub mod asset;
pub mod liability;
pub mod income;
pub mod expense;
pub mod scenario;
pub mod profile;

pub use asset::{Asset, AssetCategory};
pub use liability::{Liability, LiabilityKind};
pub use income::{Income, IncomeKind};
pub use expense::{Expense, ExpenseCategory};
pub use scenario::{PropertyScenario, ScenarioEvaluation};
pub use profile::{CpfBalances, Profile};

use crate::error::FieldError;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Anything the store can persist as a versioned JSON record
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// Kind tag stored alongside the body ("asset", "income", ...)
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);
    fn touch(&mut self, at: DateTime<Utc>);
    fn validate(&self) -> Result<(), Vec<FieldError>>;

    /// Fields that identify a duplicate on import
    fn idempotency_key(&self) -> String;
}

macro_rules! impl_record_basics {
    () => {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }

        fn touch(&mut self, at: chrono::DateTime<chrono::Utc>) {
            self.updated_at = at;
        }
    };
}
pub(crate) use impl_record_basics;

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn default_version() -> i64 {
    1
}

pub(crate) fn empty_metadata() -> serde_json::Value {
    serde_json::json!({})
}

// ============================================================================
// RECORD KIND
// ============================================================================

/// The record collections a user can add to or remove from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Asset,
    Liability,
    Income,
    Expense,
    Scenario,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Asset => Asset::KIND,
            RecordKind::Liability => Liability::KIND,
            RecordKind::Income => Income::KIND,
            RecordKind::Expense => Expense::KIND,
            RecordKind::Scenario => PropertyScenario::KIND,
        }
    }

    pub fn parse(text: &str) -> Option<RecordKind> {
        match text.trim().to_lowercase().as_str() {
            "asset" | "assets" => Some(RecordKind::Asset),
            "liability" | "liabilities" | "loan" | "debt" => Some(RecordKind::Liability),
            "income" | "incomes" => Some(RecordKind::Income),
            "expense" | "expenses" => Some(RecordKind::Expense),
            "scenario" | "scenarios" | "property" => Some(RecordKind::Scenario),
            _ => None,
        }
    }
}

// ============================================================================
// FREQUENCY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Annual,
    OneOff,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annual => "annual",
            Frequency::OneOff => "one_off",
        }
    }

    /// Yearly equivalent of an amount paid at this frequency (one-offs count once)
    pub fn annualized(&self, amount: f64) -> f64 {
        match self {
            Frequency::Monthly => amount * 12.0,
            Frequency::Quarterly => amount * 4.0,
            Frequency::Annual | Frequency::OneOff => amount,
        }
    }

    /// Monthly equivalent, used for affordability ratios
    pub fn monthly(&self, amount: f64) -> f64 {
        match self {
            Frequency::OneOff => 0.0,
            other => other.annualized(amount) / 12.0,
        }
    }

    /// Whether a payment falls due `months_since_start` months after the first one
    pub fn occurs_at(&self, months_since_start: u32) -> bool {
        match self {
            Frequency::Monthly => true,
            Frequency::Quarterly => months_since_start % 3 == 0,
            Frequency::Annual => months_since_start % 12 == 0,
            Frequency::OneOff => months_since_start == 0,
        }
    }

    pub fn parse(text: &str) -> Option<Frequency> {
        match text.trim().to_lowercase().as_str() {
            "monthly" | "month" | "a month" | "per month" | "every month" | "pm" | "/mo" | "mo" => {
                Some(Frequency::Monthly)
            }
            "quarterly" | "quarter" | "a quarter" | "per quarter" => Some(Frequency::Quarterly),
            "annual" | "annually" | "yearly" | "year" | "a year" | "per year" | "per annum"
            | "p.a." | "pa" => Some(Frequency::Annual),
            "once" | "one_off" | "one-off" | "one off" | "one time" | "one-time" => {
                Some(Frequency::OneOff)
            }
            _ => None,
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Monthly
    }
}

// ============================================================================
// DATE HELPERS
// ============================================================================

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// Whole calendar months from `from` to `to` (negative if `to` is earlier)
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

/// Month `offset` months after `start` (day pinned to the 1st)
pub fn add_months(start: NaiveDate, offset: u32) -> NaiveDate {
    let total = start.year() * 12 + start.month0() as i32 + offset as i32;
    NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)
        .unwrap_or(start)
}

/// Shared active-window check for dated cash flows
pub(crate) fn active_in(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    month: NaiveDate,
) -> bool {
    let month = month_start(month);
    let started = start.map_or(true, |s| month_start(s) <= month);
    let not_ended = end.map_or(true, |e| month <= month_start(e));
    started && not_ended
}
