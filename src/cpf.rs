// 🇸🇬 CPF Contribution Calculator
//
// Singapore Citizens and 3rd-year SPRs, private-sector employees.
// Rates are data: the 2025 schedule ships as the default and other rate years
// can be loaded from JSON with the same shape.
//
// Rounding follows the CPF Board convention:
// - total contribution rounded to the nearest dollar (50 cents rounds up)
// - employee share rounded down to the dollar
// - employer share = total - employee

use crate::entities::CpfBalances;
use crate::error::{FinanceError, Result};
use anyhow::Context as AnyhowContext;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Wages at or below this attract no contribution
const NIL_CONTRIBUTION_WAGE: f64 = 50.0;
/// Between $50 and this, only the employer contributes
const EMPLOYER_ONLY_WAGE: f64 = 500.0;
/// Between $500 and this, the employee share is phased in
const GRADUATED_WAGE: f64 = 750.0;

const EPSILON: f64 = 1e-9;

// ============================================================================
// SCHEDULE
// ============================================================================

/// Contribution rates for one age band. `max_age` is inclusive; None = no upper bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionBand {
    pub max_age: Option<u32>,
    pub total_rate: f64,
    pub employee_rate: f64,
    /// Multiplier on (wages - 500) for employee share in the $500-$750 band
    pub graduated_factor: f64,
}

impl ContributionBand {
    pub fn employer_rate(&self) -> f64 {
        self.total_rate - self.employee_rate
    }
}

/// Allocation of the contribution, as a percentage of wages, into each account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationBand {
    pub max_age: Option<u32>,
    pub oa: f64,
    pub sa: f64,
    pub ma: f64,
}

impl AllocationBand {
    pub fn total(&self) -> f64 {
        self.oa + self.sa + self.ma
    }
}

/// Annual interest paid on each CPF account
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpfInterestRates {
    pub oa: f64,
    pub sa: f64,
    pub ma: f64,
}

impl Default for CpfInterestRates {
    fn default() -> Self {
        CpfInterestRates {
            oa: 0.025,
            sa: 0.04,
            ma: 0.04,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpfSchedule {
    pub year: u16,
    pub ordinary_wage_ceiling: f64,
    pub annual_salary_ceiling: f64,
    pub contribution_bands: Vec<ContributionBand>,
    pub allocation_bands: Vec<AllocationBand>,
    #[serde(default)]
    pub interest: CpfInterestRates,
}

impl Default for CpfSchedule {
    /// Rates effective 1 January 2025
    fn default() -> Self {
        let band = |max_age, total_rate, employee_rate, graduated_factor| ContributionBand {
            max_age,
            total_rate,
            employee_rate,
            graduated_factor,
        };
        let alloc = |max_age, oa, sa, ma| AllocationBand { max_age, oa, sa, ma };

        CpfSchedule {
            year: 2025,
            ordinary_wage_ceiling: 7_400.0,
            annual_salary_ceiling: 102_000.0,
            contribution_bands: vec![
                band(Some(55), 0.37, 0.20, 0.6),
                band(Some(60), 0.325, 0.17, 0.51),
                band(Some(65), 0.235, 0.115, 0.345),
                band(Some(70), 0.165, 0.075, 0.225),
                band(None, 0.125, 0.05, 0.15),
            ],
            allocation_bands: vec![
                alloc(Some(35), 0.23, 0.06, 0.08),
                alloc(Some(45), 0.21, 0.07, 0.09),
                alloc(Some(50), 0.19, 0.08, 0.10),
                alloc(Some(55), 0.15, 0.115, 0.105),
                alloc(Some(60), 0.12, 0.10, 0.105),
                alloc(Some(65), 0.035, 0.11, 0.09),
                alloc(Some(70), 0.01, 0.05, 0.105),
                alloc(None, 0.01, 0.01, 0.105),
            ],
            interest: CpfInterestRates::default(),
        }
    }
}

impl CpfSchedule {
    /// Load a rate schedule from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read CPF schedule: {:?}", path.as_ref()))?;
        let schedule: CpfSchedule =
            serde_json::from_str(&content).context("Failed to parse CPF schedule JSON")?;
        schedule.check().context("Invalid CPF schedule")?;
        Ok(schedule)
    }

    /// Bands must be ordered by age and end with an open band
    fn check(&self) -> Result<()> {
        fn ordered(ages: &[Option<u32>]) -> bool {
            let bounded: Vec<u32> = ages.iter().flatten().copied().collect();
            ages.last().map_or(false, |last| last.is_none())
                && ages[..ages.len() - 1].iter().all(|a| a.is_some())
                && bounded.windows(2).all(|w| w[0] < w[1])
        }
        let contribution_ages: Vec<Option<u32>> =
            self.contribution_bands.iter().map(|b| b.max_age).collect();
        let allocation_ages: Vec<Option<u32>> =
            self.allocation_bands.iter().map(|b| b.max_age).collect();
        if !ordered(&contribution_ages) {
            return Err(FinanceError::invalid("contribution_bands", "Bands out of order"));
        }
        if !ordered(&allocation_ages) {
            return Err(FinanceError::invalid("allocation_bands", "Bands out of order"));
        }
        if self.contribution_bands.iter().any(|b| b.employee_rate > b.total_rate) {
            return Err(FinanceError::invalid("contribution_bands", "Employee rate exceeds total"));
        }
        Ok(())
    }

    pub fn contribution_band(&self, age: u32) -> &ContributionBand {
        band_for(&self.contribution_bands, age, |b| b.max_age)
    }

    pub fn allocation_band(&self, age: u32) -> &AllocationBand {
        band_for(&self.allocation_bands, age, |b| b.max_age)
    }
}

fn band_for<T>(bands: &[T], age: u32, max_age: impl Fn(&T) -> Option<u32>) -> &T {
    bands
        .iter()
        .find(|b| max_age(b).map_or(true, |max| age <= max))
        .unwrap_or_else(|| &bands[bands.len() - 1])
}

// ============================================================================
// CALCULATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpfInput {
    /// Monthly salary for the month
    pub ordinary_wage: f64,
    /// Bonuses and other non-regular wages paid in the month
    #[serde(default)]
    pub additional_wage: f64,
    pub age: u32,
    /// Ordinary wages subject to CPF for the whole calendar year.
    /// None assumes this month's capped wage repeats for 12 months.
    #[serde(default)]
    pub annual_ordinary_wages: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpfContribution {
    pub employee: f64,
    pub employer: f64,
    pub total: f64,
    pub allocation: CpfBalances,
    pub take_home: f64,
    pub capped_ordinary_wage: f64,
    pub capped_additional_wage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnualCpfSummary {
    pub age: u32,
    pub gross_wages: f64,
    pub employee: f64,
    pub employer: f64,
    pub total: f64,
    pub allocation: CpfBalances,
    pub take_home: f64,
    pub months: Vec<CpfContribution>,
}

fn round_to_dollar(amount: f64) -> f64 {
    (amount + 0.5 + EPSILON).floor()
}

fn floor_to_dollar(amount: f64) -> f64 {
    (amount + EPSILON).floor()
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default)]
pub struct CpfCalculator {
    schedule: CpfSchedule,
}

impl CpfCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule(schedule: CpfSchedule) -> Self {
        CpfCalculator { schedule }
    }

    pub fn schedule(&self) -> &CpfSchedule {
        &self.schedule
    }

    /// Contribution for a single month of wages
    pub fn calculate(&self, input: &CpfInput) -> Result<CpfContribution> {
        for (field, value) in [
            ("ordinary_wage", input.ordinary_wage),
            ("additional_wage", input.additional_wage),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FinanceError::invalid(field, "Must be a finite, non-negative amount"));
            }
        }

        let gross = input.ordinary_wage + input.additional_wage;
        let capped_ow = input.ordinary_wage.min(self.schedule.ordinary_wage_ceiling);
        let year_ow = input
            .annual_ordinary_wages
            .unwrap_or(capped_ow * 12.0)
            .max(0.0);
        let aw_ceiling = (self.schedule.annual_salary_ceiling - year_ow).max(0.0);
        let capped_aw = input.additional_wage.min(aw_ceiling);
        let wages = capped_ow + capped_aw;

        let band = self.schedule.contribution_band(input.age);
        let (total, employee) = if gross <= NIL_CONTRIBUTION_WAGE {
            (0.0, 0.0)
        } else if gross <= EMPLOYER_ONLY_WAGE {
            (round_to_dollar(band.employer_rate() * wages), 0.0)
        } else if gross <= GRADUATED_WAGE {
            let employee = band.graduated_factor * (wages - EMPLOYER_ONLY_WAGE);
            (
                round_to_dollar(band.employer_rate() * wages + employee),
                floor_to_dollar(employee),
            )
        } else {
            (
                round_to_dollar(band.total_rate * wages),
                floor_to_dollar(band.employee_rate * wages),
            )
        };

        Ok(CpfContribution {
            employee,
            employer: total - employee,
            total,
            allocation: self.allocate(total, input.age),
            take_home: gross - employee,
            capped_ordinary_wage: capped_ow,
            capped_additional_wage: capped_aw,
        })
    }

    /// Split a total contribution across OA/SA/MA; MA absorbs the rounding remainder
    pub fn allocate(&self, total: f64, age: u32) -> CpfBalances {
        let band = self.schedule.allocation_band(age);
        if total <= 0.0 || band.total() <= 0.0 {
            return CpfBalances::default();
        }
        let oa = round_cents(total * band.oa / band.total());
        let sa = round_cents(total * band.sa / band.total());
        CpfBalances {
            oa,
            sa,
            ma: round_cents(total - oa - sa),
        }
    }

    /// Twelve months of salary with the bonus paid in December
    pub fn annual_summary(
        &self,
        monthly_salary: f64,
        annual_bonus: f64,
        age: u32,
    ) -> Result<AnnualCpfSummary> {
        let annual_ow = monthly_salary.min(self.schedule.ordinary_wage_ceiling) * 12.0;
        let mut summary = AnnualCpfSummary {
            age,
            ..AnnualCpfSummary::default()
        };

        for month in 1..=12u32 {
            let contribution = self.calculate(&CpfInput {
                ordinary_wage: monthly_salary,
                additional_wage: if month == 12 { annual_bonus } else { 0.0 },
                age,
                annual_ordinary_wages: Some(annual_ow),
            })?;
            summary.gross_wages += monthly_salary + if month == 12 { annual_bonus } else { 0.0 };
            summary.employee += contribution.employee;
            summary.employer += contribution.employer;
            summary.total += contribution.total;
            summary.allocation.oa += contribution.allocation.oa;
            summary.allocation.sa += contribution.allocation.sa;
            summary.allocation.ma += contribution.allocation.ma;
            summary.take_home += contribution.take_home;
            summary.months.push(contribution);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monthly(ow: f64, age: u32) -> CpfContribution {
        CpfCalculator::new()
            .calculate(&CpfInput {
                ordinary_wage: ow,
                additional_wage: 0.0,
                age,
                annual_ordinary_wages: None,
            })
            .unwrap()
    }

    #[test]
    fn test_full_rate_under_55() {
        let c = monthly(6_000.0, 30);
        assert_eq!(c.total, 2_220.0);
        assert_eq!(c.employee, 1_200.0);
        assert_eq!(c.employer, 1_020.0);
        assert_eq!(c.take_home, 4_800.0);
        assert_eq!(c.allocation.oa, 1_380.0);
        assert_eq!(c.allocation.sa, 360.0);
        assert_eq!(c.allocation.ma, 480.0);
    }

    #[test]
    fn test_ordinary_wage_ceiling() {
        let c = monthly(10_000.0, 30);
        assert_eq!(c.capped_ordinary_wage, 7_400.0);
        assert_eq!(c.total, 2_738.0);
        assert_eq!(c.employee, 1_480.0);
        assert_eq!(c.take_home, 8_520.0);
    }

    #[test]
    fn test_low_wage_bands() {
        assert_eq!(monthly(40.0, 30).total, 0.0);

        let employer_only = monthly(300.0, 30);
        assert_eq!(employer_only.employee, 0.0);
        assert_eq!(employer_only.total, 51.0);

        let graduated = monthly(600.0, 30);
        assert_eq!(graduated.employee, 60.0);
        assert_eq!(graduated.employer, 102.0);
        assert_eq!(graduated.total, 162.0);
    }

    #[test]
    fn test_older_age_band() {
        let c = monthly(5_000.0, 58);
        assert_eq!(c.total, 1_625.0);
        assert_eq!(c.employee, 850.0);
        assert_eq!(c.employer, 775.0);

        let senior = monthly(5_000.0, 72);
        assert_eq!(senior.total, 625.0);
        assert_eq!(senior.employee, 250.0);
    }

    #[test]
    fn test_band_boundaries_are_inclusive() {
        let schedule = CpfSchedule::default();
        assert_eq!(schedule.contribution_band(55).total_rate, 0.37);
        assert_eq!(schedule.contribution_band(56).total_rate, 0.325);
        assert_eq!(schedule.allocation_band(35).oa, 0.23);
        assert_eq!(schedule.allocation_band(36).oa, 0.21);
        assert_eq!(schedule.contribution_band(99).total_rate, 0.125);
    }

    #[test]
    fn test_rounding_rules() {
        // 0.37 * 1234.56 = 456.7872 -> 457; employee 0.2 * 1234.56 = 246.91 -> 246
        let c = monthly(1_234.56, 30);
        assert_eq!(c.total, 457.0);
        assert_eq!(c.employee, 246.0);
        assert_eq!(c.employer, 211.0);
        let alloc = c.allocation;
        assert!((alloc.oa + alloc.sa + alloc.ma - c.total).abs() < 1e-9);
    }

    #[test]
    fn test_additional_wage_ceiling() {
        let calc = CpfCalculator::new();
        let c = calc
            .calculate(&CpfInput {
                ordinary_wage: 7_400.0,
                additional_wage: 20_000.0,
                age: 40,
                annual_ordinary_wages: Some(88_800.0),
            })
            .unwrap();
        assert_eq!(c.capped_additional_wage, 13_200.0);
        assert_eq!(c.total, 7_622.0);
        assert_eq!(c.employee, 4_120.0);
    }

    #[test]
    fn test_annual_summary() {
        let summary = CpfCalculator::new().annual_summary(6_000.0, 12_000.0, 30).unwrap();
        assert_eq!(summary.months.len(), 12);
        assert_eq!(summary.gross_wages, 84_000.0);
        assert_eq!(summary.employee, 1_200.0 * 12.0 + 2_400.0);
        assert_eq!(summary.total, 2_220.0 * 12.0 + 4_440.0);
        assert!((summary.allocation.total() - summary.total).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_negative_wage() {
        let result = CpfCalculator::new().calculate(&CpfInput {
            ordinary_wage: -1.0,
            additional_wage: 0.0,
            age: 30,
            annual_ordinary_wages: None,
        });
        assert!(matches!(result, Err(FinanceError::Validation(_))));
    }

    #[test]
    fn test_schedule_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpf.json");
        let mut schedule = CpfSchedule::default();
        schedule.year = 2026;
        schedule.ordinary_wage_ceiling = 8_000.0;
        fs::write(&path, serde_json::to_string(&schedule).unwrap()).unwrap();

        let loaded = CpfSchedule::from_file(&path).unwrap();
        assert_eq!(loaded.year, 2026);
        assert_eq!(CpfCalculator::with_schedule(loaded).schedule().ordinary_wage_ceiling, 8_000.0);
    }

    #[test]
    fn test_schedule_rejects_unordered_bands() {
        let mut schedule = CpfSchedule::default();
        schedule.contribution_bands.swap(0, 1);
        assert!(schedule.check().is_err());
    }
}
