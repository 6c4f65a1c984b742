// 📈 Net-Worth Projection Engine
//
// Deterministic month-by-month simulation of a financial snapshot:
// - assets compound at their own growth rate
// - cash absorbs every income, expense and loan payment
// - CPF-applicable wages split into take-home pay and OA/SA/MA credits
// - liabilities amortize monthly
// - property scenarios buy in at their purchase month
//
// One point is emitted at the start and one at the end of every projection year.
// Every point satisfies: net_worth = cash + assets + cpf.total() - liabilities

use crate::cpf::{CpfCalculator, CpfInput, CpfInterestRates};
use crate::entities::{
    add_months, month_start, months_between, Asset, AssetCategory, CpfBalances, Expense, Income,
    IncomeKind, Liability, Profile, PropertyScenario,
};
use crate::error::{Checks, FinanceError, Result};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_YEARS: u32 = 100;

// ============================================================================
// INPUTS
// ============================================================================

/// Everything the engine needs, as loaded from the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub liabilities: Vec<Liability>,
    #[serde(default)]
    pub incomes: Vec<Income>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub scenarios: Vec<PropertyScenario>,
}

impl FinancialSnapshot {
    pub fn total_assets(&self) -> f64 {
        self.assets.iter().map(|a| a.value).sum()
    }

    pub fn total_liabilities(&self) -> f64 {
        self.liabilities.iter().map(|l| l.balance).sum()
    }

    /// Today's net worth including CPF balances
    pub fn net_worth(&self) -> f64 {
        self.total_assets() + self.profile.cpf.total() - self.total_liabilities()
    }

    pub fn monthly_income(&self) -> f64 {
        self.incomes.iter().map(|i| i.monthly_amount()).sum()
    }

    pub fn monthly_expenses(&self) -> f64 {
        self.expenses.iter().map(|e| e.monthly_amount()).sum()
    }

    pub fn monthly_debt_payments(&self) -> f64 {
        self.liabilities.iter().map(|l| l.monthly_payment).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assumptions {
    pub years: u32,
    /// First month of the projection. None = current month.
    pub start_date: Option<NaiveDate>,
    pub inflation_rate: f64,
    pub default_asset_growth: f64,
    pub cash_return_rate: f64,
    pub default_income_growth: f64,
    pub include_scenarios: bool,
    /// CPF account interest. None = the rates of the CPF schedule in use.
    pub cpf_interest: Option<CpfInterestRates>,
}

impl Default for Assumptions {
    fn default() -> Self {
        Assumptions {
            years: 30,
            start_date: None,
            inflation_rate: 0.025,
            default_asset_growth: 0.04,
            cash_return_rate: 0.005,
            default_income_growth: 0.03,
            include_scenarios: true,
            cpf_interest: None,
        }
    }
}

impl Assumptions {
    pub fn validate(&self) -> Result<()> {
        let mut checks = Checks::new();
        checks
            .require(
                (1..=MAX_YEARS).contains(&self.years),
                "years",
                "Projection must cover 1 to 100 years",
            )
            .rate(self.inflation_rate, "inflation_rate")
            .rate(self.default_asset_growth, "default_asset_growth")
            .rate(self.cash_return_rate, "cash_return_rate")
            .rate(self.default_income_growth, "default_income_growth");
        if let Some(rates) = &self.cpf_interest {
            checks
                .rate(rates.oa, "cpf_interest.oa")
                .rate(rates.sa, "cpf_interest.sa")
                .rate(rates.ma, "cpf_interest.ma");
        }
        checks.finish().map_err(FinanceError::Validation)
    }

    /// These assumptions with the fields present in `overrides` replaced
    pub fn with_overrides(&self, overrides: &serde_json::Value) -> Result<Assumptions> {
        let mut merged = serde_json::to_value(self)?;
        match (&mut merged, overrides) {
            (serde_json::Value::Object(base), serde_json::Value::Object(fields)) => {
                for (key, value) in fields {
                    base.insert(key.clone(), value.clone());
                }
            }
            (_, serde_json::Value::Null) => {}
            _ => return Err(FinanceError::invalid("assumptions", "Expected a JSON object")),
        }
        let assumptions: Assumptions = serde_json::from_value(merged)
            .map_err(|e| FinanceError::invalid("assumptions", e.to_string()))?;
        assumptions.validate()?;
        Ok(assumptions)
    }
}

// ============================================================================
// OUTPUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetWorthPoint {
    pub year: u32,
    pub date: NaiveDate,
    pub age: Option<u32>,
    pub cash: f64,
    /// Non-cash assets, including purchased scenario properties
    pub assets: f64,
    pub cpf: CpfBalances,
    pub liabilities: f64,
    pub net_worth: f64,
    /// Gross income received during the year ending at this point
    pub income: f64,
    /// Expenses paid during the year ending at this point
    pub expenses: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionSummary {
    pub years: u32,
    pub starting_net_worth: f64,
    pub final_net_worth: f64,
    pub peak_net_worth: f64,
    pub peak_date: NaiveDate,
    pub first_negative_cash: Option<NaiveDate>,
    pub total_cpf_contributions: f64,
    pub total_interest_paid: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub points: Vec<NetWorthPoint>,
    pub summary: ProjectionSummary,
    pub warnings: Vec<String>,
}

// ============================================================================
// SIMULATION STATE
// ============================================================================

struct Holding {
    value: f64,
    monthly_growth: f64,
}

struct Loan {
    name: String,
    balance: f64,
    monthly_rate: f64,
    payment: f64,
    paid_from_oa: bool,
}

struct Simulation<'a> {
    snapshot: &'a FinancialSnapshot,
    assumptions: &'a Assumptions,
    calculator: &'a CpfCalculator,
    interest: CpfInterestRates,
    start: NaiveDate,
    cash: f64,
    holdings: Vec<Holding>,
    loans: Vec<Loan>,
    cpf: CpfBalances,
    accrued_interest: CpfBalances,
    year_income: f64,
    year_expenses: f64,
    total_cpf_contributions: f64,
    total_interest_paid: f64,
    first_negative_cash: Option<NaiveDate>,
    warnings: Vec<String>,
}

fn monthly_factor(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0)
}

impl<'a> Simulation<'a> {
    fn new(
        snapshot: &'a FinancialSnapshot,
        assumptions: &'a Assumptions,
        calculator: &'a CpfCalculator,
        start: NaiveDate,
    ) -> Self {
        let mut cash = 0.0;
        let mut holdings = Vec::new();
        for asset in &snapshot.assets {
            if asset.category == AssetCategory::Cash {
                cash += asset.value;
            } else {
                holdings.push(Holding {
                    value: asset.value,
                    monthly_growth: monthly_factor(asset.effective_growth(assumptions.default_asset_growth)),
                });
            }
        }

        let mut warnings = Vec::new();
        let loans = snapshot
            .liabilities
            .iter()
            .map(|l| {
                if l.is_negatively_amortizing() {
                    warnings.push(format!(
                        "{}: payment of {:.2} does not cover monthly interest; balance will grow",
                        l.name, l.monthly_payment
                    ));
                }
                Loan {
                    name: l.name.clone(),
                    balance: l.balance,
                    monthly_rate: l.monthly_rate(),
                    payment: l.monthly_payment,
                    paid_from_oa: false,
                }
            })
            .collect();

        Simulation {
            snapshot,
            assumptions,
            calculator,
            interest: assumptions
                .cpf_interest
                .unwrap_or(calculator.schedule().interest),
            start,
            cash,
            holdings,
            loans,
            cpf: snapshot.profile.cpf,
            accrued_interest: CpfBalances::default(),
            year_income: 0.0,
            year_expenses: 0.0,
            total_cpf_contributions: 0.0,
            total_interest_paid: 0.0,
            first_negative_cash: None,
            warnings,
        }
    }

    fn point(&self, year: u32, date: NaiveDate) -> NetWorthPoint {
        let assets: f64 = self.holdings.iter().map(|h| h.value).sum();
        let liabilities: f64 = self.loans.iter().map(|l| l.balance).sum();
        NetWorthPoint {
            year,
            date,
            age: self.snapshot.profile.age_on(date),
            cash: self.cash,
            assets,
            cpf: self.cpf,
            liabilities,
            net_worth: self.cash + assets + self.cpf.total() - liabilities,
            income: self.year_income,
            expenses: self.year_expenses,
        }
    }

    fn step(&mut self, month: u32, date: NaiveDate, last_month: bool) -> Result<()> {
        if self.assumptions.include_scenarios {
            self.buy_properties(month, date);
        }
        self.receive_income(month, date)?;
        self.pay_expenses(month, date);
        self.service_loans();
        self.grow();
        self.accrue_cpf_interest(date.month() == 12 || last_month);

        if self.cash < 0.0 && self.first_negative_cash.is_none() {
            self.first_negative_cash = Some(date);
        }
        Ok(())
    }

    fn buy_properties(&mut self, month: u32, date: NaiveDate) {
        for scenario in &self.snapshot.scenarios {
            if !scenario.include_in_projection {
                continue;
            }
            let purchase = month_start(scenario.purchase_date);
            let due = purchase == date || (month == 0 && purchase < date);
            if !due {
                continue;
            }
            if purchase < date {
                self.warnings.push(format!(
                    "{}: purchase date {} is before the projection start; bought in the first month",
                    scenario.name, scenario.purchase_date
                ));
            }

            let (cash_part, cpf_part) = scenario.down_payment_split(self.cpf.oa);
            self.cash -= cash_part + scenario.buyer_stamp_duty();
            self.cpf.oa -= cpf_part;
            self.holdings.push(Holding {
                value: scenario.purchase_price,
                monthly_growth: monthly_factor(scenario.appreciation_rate),
            });
            if scenario.loan_amount() > 0.0 {
                self.loans.push(Loan {
                    name: format!("{} mortgage", scenario.name),
                    balance: scenario.loan_amount(),
                    monthly_rate: scenario.interest_rate / 12.0,
                    payment: scenario.monthly_installment(),
                    paid_from_oa: scenario.use_cpf_oa,
                });
            }
            tracing::debug!(scenario = %scenario.name, %date, cash_part, cpf_part, "scenario purchase");
        }
    }

    fn receive_income(&mut self, month: u32, date: NaiveDate) -> Result<()> {
        let years_elapsed = (month / 12) as i32;
        let mut ordinary_wage = 0.0;
        let mut additional_wage = 0.0;

        for income in &self.snapshot.incomes {
            if !income.is_active(date) {
                continue;
            }
            let anchor = month_start(income.start_date.unwrap_or(self.start));
            let since = months_between(anchor, date);
            if since < 0 || !income.frequency.occurs_at(since as u32) {
                continue;
            }
            let growth = income.growth_rate.unwrap_or(if income.kind.is_employment() {
                self.assumptions.default_income_growth
            } else {
                0.0
            });
            let amount = income.amount * (1.0 + growth).powi(years_elapsed);
            self.year_income += amount;

            if income.attracts_cpf() {
                match income.kind {
                    IncomeKind::Salary => ordinary_wage += amount,
                    _ => additional_wage += amount,
                }
            } else {
                self.cash += amount;
            }
        }

        if ordinary_wage + additional_wage > 0.0 {
            let age = self.snapshot.profile.age_on(date).ok_or_else(|| {
                FinanceError::invalid("profile.birth_date", "Required for CPF contributions")
            })?;
            let capped = ordinary_wage.min(self.calculator.schedule().ordinary_wage_ceiling);
            let contribution = self.calculator.calculate(&CpfInput {
                ordinary_wage,
                additional_wage,
                age,
                annual_ordinary_wages: Some(capped * 12.0),
            })?;
            self.cash += contribution.take_home;
            self.cpf.oa += contribution.allocation.oa;
            self.cpf.sa += contribution.allocation.sa;
            self.cpf.ma += contribution.allocation.ma;
            self.total_cpf_contributions += contribution.total;
        }
        Ok(())
    }

    fn pay_expenses(&mut self, month: u32, date: NaiveDate) {
        let inflation = (1.0 + self.assumptions.inflation_rate).powi((month / 12) as i32);
        for expense in &self.snapshot.expenses {
            if !expense.is_active(date) {
                continue;
            }
            let anchor = month_start(expense.start_date.unwrap_or(self.start));
            let since = months_between(anchor, date);
            if since < 0 || !expense.frequency.occurs_at(since as u32) {
                continue;
            }
            let amount = if expense.inflation_linked {
                expense.amount * inflation
            } else {
                expense.amount
            };
            self.cash -= amount;
            self.year_expenses += amount;
        }
    }

    fn service_loans(&mut self) {
        for loan in &mut self.loans {
            let step = Liability::amortize(loan.balance, loan.monthly_rate, loan.payment);
            self.total_interest_paid += step.interest;
            loan.balance = step.balance;

            let from_oa = if loan.paid_from_oa {
                step.payment.min(self.cpf.oa.max(0.0))
            } else {
                0.0
            };
            self.cpf.oa -= from_oa;
            self.cash -= step.payment - from_oa;

            if loan.balance == 0.0 && step.payment > 0.0 {
                tracing::trace!(loan = %loan.name, "loan repaid");
            }
        }
    }

    fn grow(&mut self) {
        for holding in &mut self.holdings {
            holding.value *= holding.monthly_growth;
        }
        if self.cash > 0.0 {
            self.cash *= monthly_factor(self.assumptions.cash_return_rate);
        }
    }

    /// CPF computes interest monthly and credits it once a year
    fn accrue_cpf_interest(&mut self, credit: bool) {
        let rates = self.interest;
        self.accrued_interest.oa += self.cpf.oa.max(0.0) * rates.oa / 12.0;
        self.accrued_interest.sa += self.cpf.sa.max(0.0) * rates.sa / 12.0;
        self.accrued_interest.ma += self.cpf.ma.max(0.0) * rates.ma / 12.0;
        if credit {
            self.cpf.oa += self.accrued_interest.oa;
            self.cpf.sa += self.accrued_interest.sa;
            self.cpf.ma += self.accrued_interest.ma;
            self.accrued_interest = CpfBalances::default();
        }
    }
}

// ============================================================================
// ENTRY POINT
// ============================================================================

/// Project net worth forward under `assumptions`, with CPF wages run through `calculator`
pub fn compute_net_worth(
    snapshot: &FinancialSnapshot,
    assumptions: &Assumptions,
    calculator: &CpfCalculator,
) -> Result<Projection> {
    assumptions.validate()?;

    let needs_age = snapshot.incomes.iter().any(|i| i.attracts_cpf());
    if needs_age && snapshot.profile.birth_date.is_none() {
        return Err(FinanceError::invalid(
            "profile.birth_date",
            "Required for CPF contributions",
        ));
    }

    let start = month_start(assumptions.start_date.unwrap_or_else(|| Utc::now().date_naive()));
    let months = assumptions.years * 12;
    tracing::debug!(
        %start,
        years = assumptions.years,
        assets = snapshot.assets.len(),
        liabilities = snapshot.liabilities.len(),
        incomes = snapshot.incomes.len(),
        expenses = snapshot.expenses.len(),
        scenarios = snapshot.scenarios.len(),
        "computing net worth projection"
    );

    let mut sim = Simulation::new(snapshot, assumptions, calculator, start);
    let mut points = vec![sim.point(0, start)];

    for month in 0..months {
        let date = add_months(start, month);
        sim.step(month, date, month + 1 == months)?;

        if (month + 1) % 12 == 0 {
            let year = (month + 1) / 12;
            points.push(sim.point(year, add_months(start, month + 1)));
            sim.year_income = 0.0;
            sim.year_expenses = 0.0;
        }
    }

    let first = &points[0];
    let last = &points[points.len() - 1];
    let peak = points
        .iter()
        .fold(first, |best, p| if p.net_worth > best.net_worth { p } else { best });

    let summary = ProjectionSummary {
        years: assumptions.years,
        starting_net_worth: first.net_worth,
        final_net_worth: last.net_worth,
        peak_net_worth: peak.net_worth,
        peak_date: peak.date,
        first_negative_cash: sim.first_negative_cash,
        total_cpf_contributions: sim.total_cpf_contributions,
        total_interest_paid: sim.total_interest_paid,
    };

    Ok(Projection {
        points,
        summary,
        warnings: sim.warnings,
    })
}
