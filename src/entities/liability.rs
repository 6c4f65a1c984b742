// 🏦 Liability Entity - loans and credit lines that amortize monthly

use super::{default_version, empty_metadata, impl_record_basics, new_id, Record};
use crate::error::{Checks, FieldError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for payoff simulations (100 years)
const MAX_PAYOFF_MONTHS: u32 = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiabilityKind {
    Mortgage,
    CarLoan,
    StudentLoan,
    CreditCard,
    PersonalLoan,
    Other,
}

impl LiabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiabilityKind::Mortgage => "mortgage",
            LiabilityKind::CarLoan => "car_loan",
            LiabilityKind::StudentLoan => "student_loan",
            LiabilityKind::CreditCard => "credit_card",
            LiabilityKind::PersonalLoan => "personal_loan",
            LiabilityKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liability {
    #[serde(default = "new_id")]
    pub id: String,

    pub name: String,
    pub kind: LiabilityKind,

    /// Outstanding principal
    pub balance: f64,

    /// Annual interest rate as a fraction
    #[serde(default)]
    pub interest_rate: f64,

    /// Scheduled monthly repayment
    #[serde(default)]
    pub monthly_payment: f64,

    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

/// One month of amortization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmortizationStep {
    pub interest: f64,
    pub payment: f64,
    pub balance: f64,
}

impl Liability {
    pub fn new(
        name: &str,
        kind: LiabilityKind,
        balance: f64,
        interest_rate: f64,
        monthly_payment: f64,
    ) -> Self {
        let now = Utc::now();
        Liability {
            id: new_id(),
            name: name.to_string(),
            kind,
            balance,
            interest_rate,
            monthly_payment,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: empty_metadata(),
        }
    }

    pub fn monthly_rate(&self) -> f64 {
        self.interest_rate / 12.0
    }

    /// Apply one month: accrue interest, then pay at most what is owed
    pub fn amortize(balance: f64, monthly_rate: f64, scheduled_payment: f64) -> AmortizationStep {
        if balance <= 0.0 {
            return AmortizationStep { interest: 0.0, payment: 0.0, balance: 0.0 };
        }
        let interest = balance * monthly_rate;
        let owed = balance + interest;
        let payment = scheduled_payment.max(0.0).min(owed);
        AmortizationStep {
            interest,
            payment,
            balance: owed - payment,
        }
    }

    /// Whether the scheduled payment fails to cover the first month's interest
    pub fn is_negatively_amortizing(&self) -> bool {
        self.balance > 0.0 && self.monthly_payment <= self.balance * self.monthly_rate()
    }

    /// Months until the balance reaches zero, None if it never does
    pub fn months_to_payoff(&self) -> Option<u32> {
        if self.balance <= 0.0 {
            return Some(0);
        }
        if self.is_negatively_amortizing() {
            return None;
        }
        let mut balance = self.balance;
        for month in 1..=MAX_PAYOFF_MONTHS {
            balance = Self::amortize(balance, self.monthly_rate(), self.monthly_payment).balance;
            if balance <= 1e-6 {
                return Some(month);
            }
        }
        None
    }

    /// Interest paid over the life of the loan at the scheduled payment
    pub fn total_interest(&self) -> Option<f64> {
        let months = self.months_to_payoff()?;
        let mut balance = self.balance;
        let mut interest = 0.0;
        for _ in 0..months {
            let step = Self::amortize(balance, self.monthly_rate(), self.monthly_payment);
            interest += step.interest;
            balance = step.balance;
        }
        Some(interest)
    }
}

impl Record for Liability {
    const KIND: &'static str = "liability";

    impl_record_basics!();

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .non_empty(&self.name, "name")
            .amount(self.balance, "balance")
            .rate(self.interest_rate, "interest_rate")
            .require(self.interest_rate >= 0.0, "interest_rate", "Interest rate cannot be negative")
            .amount(self.monthly_payment, "monthly_payment")
            .finish()
    }

    fn idempotency_key(&self) -> String {
        format!("{}|{}|{}", self.name.to_lowercase(), self.kind.as_str(), self.balance)
    }
}
