// 💵 Income Entity - dated, recurring inflows

use super::{active_in, default_version, empty_metadata, impl_record_basics, new_id, Frequency, Record};
use crate::error::{Checks, FieldError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeKind {
    Salary,
    Bonus,
    Rental,
    Dividend,
    Business,
    Other,
}

impl IncomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeKind::Salary => "salary",
            IncomeKind::Bonus => "bonus",
            IncomeKind::Rental => "rental",
            IncomeKind::Dividend => "dividend",
            IncomeKind::Business => "business",
            IncomeKind::Other => "other",
        }
    }

    /// Employment income is the only kind CPF can apply to
    pub fn is_employment(&self) -> bool {
        matches!(self, IncomeKind::Salary | IncomeKind::Bonus)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Income {
    #[serde(default = "new_id")]
    pub id: String,

    pub name: String,
    pub kind: IncomeKind,

    /// Gross amount per payment
    pub amount: f64,

    #[serde(default)]
    pub frequency: Frequency,

    /// Annual raise as a fraction. None = projection default for salaries, 0 otherwise.
    #[serde(default)]
    pub growth_rate: Option<f64>,

    /// Subject to CPF contributions (salary = ordinary wage, bonus = additional wage)
    #[serde(default)]
    pub cpf_applicable: bool,

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

impl Income {
    pub fn new(name: &str, kind: IncomeKind, amount: f64, frequency: Frequency) -> Self {
        let now = Utc::now();
        Income {
            id: new_id(),
            name: name.to_string(),
            kind,
            amount,
            frequency,
            growth_rate: None,
            cpf_applicable: false,
            start_date: None,
            end_date: None,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: empty_metadata(),
        }
    }

    pub fn with_cpf(mut self) -> Self {
        self.cpf_applicable = true;
        self
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

    /// CPF only ever applies to employment income
    pub fn attracts_cpf(&self) -> bool {
        self.cpf_applicable && self.kind.is_employment()
    }
}

impl Record for Income {
    const KIND: &'static str = "income";

    impl_record_basics!();

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.non_empty(&self.name, "name").amount(self.amount, "amount");
        if let Some(rate) = self.growth_rate {
            checks.rate(rate, "growth_rate");
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            checks.require(end >= start, "end_date", "End date is before start date");
        }
        checks.require(
            !self.cpf_applicable || self.kind.is_employment(),
            "cpf_applicable",
            "CPF only applies to salary or bonus income",
        );
        checks.finish()
    }

    fn idempotency_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.name.to_lowercase(),
            self.kind.as_str(),
            self.amount,
            self.frequency.as_str()
        )
    }
}
