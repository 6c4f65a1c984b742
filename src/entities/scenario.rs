// 🏠 Property Scenario - a what-if home purchase layered onto the projection
//
// Stamp duty and financing limits follow Singapore residential rules:
// - Buyer's Stamp Duty (BSD) tiers from 15 Feb 2023
// - Minimum 5% cash down payment for bank loans
// - TDSR 55%, MSR 30% of gross monthly income

use super::{default_version, empty_metadata, impl_record_basics, new_id, Record};
use crate::error::{Checks, FieldError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// (tier width, rate). The last tier is unbounded.
const BSD_TIERS: [(f64, f64); 6] = [
    (180_000.0, 0.01),
    (180_000.0, 0.02),
    (640_000.0, 0.03),
    (500_000.0, 0.04),
    (1_500_000.0, 0.05),
    (f64::INFINITY, 0.06),
];

pub const MIN_CASH_DOWN_PAYMENT: f64 = 0.05;
pub const TDSR_LIMIT: f64 = 0.55;
pub const MSR_LIMIT: f64 = 0.30;
pub const MAX_TENURE_YEARS: u32 = 35;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyScenario {
    #[serde(default = "new_id")]
    pub id: String,

    pub name: String,
    pub purchase_price: f64,

    /// Total down payment (cash + CPF OA)
    pub down_payment: f64,

    pub loan_tenure_years: u32,

    /// Annual mortgage rate as a fraction
    pub interest_rate: f64,

    pub purchase_date: NaiveDate,

    /// Annual appreciation as a fraction
    #[serde(default)]
    pub appreciation_rate: f64,

    /// Fund the down payment and installments from CPF OA where allowed
    #[serde(default)]
    pub use_cpf_oa: bool,

    #[serde(default = "default_include")]
    pub include_in_projection: bool,

    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn default_include() -> bool {
    true
}

/// Affordability figures for one scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioEvaluation {
    pub loan_amount: f64,
    pub monthly_installment: f64,
    pub total_interest: f64,
    pub buyer_stamp_duty: f64,
    pub minimum_cash_down_payment: f64,
    pub upfront_cash_required: f64,
    pub tdsr: Option<f64>,
    pub msr: Option<f64>,
    pub within_tdsr: bool,
    pub within_msr: bool,
}

impl PropertyScenario {
    pub fn new(
        name: &str,
        purchase_price: f64,
        down_payment: f64,
        loan_tenure_years: u32,
        interest_rate: f64,
        purchase_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        PropertyScenario {
            id: new_id(),
            name: name.to_string(),
            purchase_price,
            down_payment,
            loan_tenure_years,
            interest_rate,
            purchase_date,
            appreciation_rate: 0.0,
            use_cpf_oa: false,
            include_in_projection: true,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: empty_metadata(),
        }
    }

    pub fn loan_amount(&self) -> f64 {
        (self.purchase_price - self.down_payment).max(0.0)
    }

    pub fn tenure_months(&self) -> u32 {
        self.loan_tenure_years * 12
    }

    /// Standard annuity installment; straight-line when the rate is zero
    pub fn monthly_installment(&self) -> f64 {
        annuity_payment(self.loan_amount(), self.interest_rate / 12.0, self.tenure_months())
    }

    pub fn total_interest(&self) -> f64 {
        (self.monthly_installment() * self.tenure_months() as f64 - self.loan_amount()).max(0.0)
    }

    pub fn buyer_stamp_duty(&self) -> f64 {
        buyer_stamp_duty(self.purchase_price)
    }

    pub fn minimum_cash_down_payment(&self) -> f64 {
        self.purchase_price * MIN_CASH_DOWN_PAYMENT
    }

    /// Split the down payment into (cash, CPF OA) given the OA balance at purchase
    pub fn down_payment_split(&self, oa_available: f64) -> (f64, f64) {
        if !self.use_cpf_oa {
            return (self.down_payment, 0.0);
        }
        let cash_floor = self.minimum_cash_down_payment().min(self.down_payment);
        let from_cpf = (self.down_payment - cash_floor).min(oa_available.max(0.0));
        (self.down_payment - from_cpf, from_cpf)
    }

    pub fn evaluate(&self, gross_monthly_income: f64, other_monthly_debt: f64) -> ScenarioEvaluation {
        let installment = self.monthly_installment();
        let (tdsr, msr) = if gross_monthly_income > 0.0 {
            (
                Some((installment + other_monthly_debt) / gross_monthly_income),
                Some(installment / gross_monthly_income),
            )
        } else {
            (None, None)
        };
        let bsd = self.buyer_stamp_duty();
        ScenarioEvaluation {
            loan_amount: self.loan_amount(),
            monthly_installment: installment,
            total_interest: self.total_interest(),
            buyer_stamp_duty: bsd,
            minimum_cash_down_payment: self.minimum_cash_down_payment(),
            upfront_cash_required: self.minimum_cash_down_payment().min(self.down_payment) + bsd,
            tdsr,
            msr,
            within_tdsr: tdsr.map_or(false, |r| r <= TDSR_LIMIT),
            within_msr: msr.map_or(false, |r| r <= MSR_LIMIT),
        }
    }
}

pub fn annuity_payment(principal: f64, monthly_rate: f64, months: u32) -> f64 {
    if principal <= 0.0 || months == 0 {
        return 0.0;
    }
    if monthly_rate.abs() < 1e-12 {
        return principal / months as f64;
    }
    principal * monthly_rate / (1.0 - (1.0 + monthly_rate).powi(-(months as i32)))
}

pub fn buyer_stamp_duty(price: f64) -> f64 {
    let mut remaining = price.max(0.0);
    let mut duty = 0.0;
    for (width, rate) in BSD_TIERS {
        if remaining <= 0.0 {
            break;
        }
        let slice = remaining.min(width);
        duty += slice * rate;
        remaining -= slice;
    }
    duty
}

impl Record for PropertyScenario {
    const KIND: &'static str = "scenario";

    impl_record_basics!();

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .non_empty(&self.name, "name")
            .amount(self.purchase_price, "purchase_price")
            .require(self.purchase_price > 0.0, "purchase_price", "Purchase price must be positive")
            .amount(self.down_payment, "down_payment")
            .require(
                self.down_payment <= self.purchase_price,
                "down_payment",
                "Down payment exceeds purchase price",
            )
            .require(
                (1..=MAX_TENURE_YEARS).contains(&self.loan_tenure_years),
                "loan_tenure_years",
                "Tenure must be between 1 and 35 years",
            )
            .rate(self.interest_rate, "interest_rate")
            .require(self.interest_rate >= 0.0, "interest_rate", "Interest rate cannot be negative")
            .rate(self.appreciation_rate, "appreciation_rate")
            .finish()
    }

    fn idempotency_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.name.to_lowercase(),
            self.purchase_price,
            self.purchase_date
        )
    }
}
