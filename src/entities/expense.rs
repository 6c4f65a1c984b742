// 🧾 Expense Entity - dated, recurring outflows, optionally inflation-linked

use super::{active_in, default_version, empty_metadata, impl_record_basics, new_id, Frequency, Record};
use crate::error::{Checks, FieldError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Housing,
    Food,
    Transport,
    Utilities,
    Insurance,
    Healthcare,
    Education,
    Entertainment,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Housing => "housing",
            ExpenseCategory::Food => "food",
            ExpenseCategory::Transport => "transport",
            ExpenseCategory::Utilities => "utilities",
            ExpenseCategory::Insurance => "insurance",
            ExpenseCategory::Healthcare => "healthcare",
            ExpenseCategory::Education => "education",
            ExpenseCategory::Entertainment => "entertainment",
            ExpenseCategory::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    #[serde(default = "new_id")]
    pub id: String,

    pub name: String,
    pub category: ExpenseCategory,
    pub amount: f64,

    #[serde(default)]
    pub frequency: Frequency,

    /// Grows with the projection's inflation assumption
    #[serde(default = "default_inflation_linked")]
    pub inflation_linked: bool,

    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn default_inflation_linked() -> bool {
    true
}

impl Expense {
    pub fn new(name: &str, category: ExpenseCategory, amount: f64, frequency: Frequency) -> Self {
        let now = Utc::now();
        Expense {
            id: new_id(),
            name: name.to_string(),
            category,
            amount,
            frequency,
            inflation_linked: true,
            start_date: None,
            end_date: None,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: empty_metadata(),
        }
    }

    pub fn annual_amount(&self) -> f64 {
        self.frequency.annualized(self.amount)
    }

    pub fn monthly_amount(&self) -> f64 {
        self.frequency.monthly(self.amount)
    }

    pub fn is_active(&self, month: NaiveDate) -> bool {
        active_in(self.start_date, self.end_date, month)
    }
}

impl Record for Expense {
    const KIND: &'static str = "expense";

    impl_record_basics!();

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.non_empty(&self.name, "name").amount(self.amount, "amount");
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            checks.require(end >= start, "end_date", "End date is before start date");
        }
        checks.finish()
    }

    fn idempotency_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.name.to_lowercase(),
            self.category.as_str(),
            self.amount,
            self.frequency.as_str()
        )
    }
}
