// Demo data for development. Only seeds an empty store.

use crate::db::{count_records, insert_record, save_profile};
use crate::entities::{
    Asset, AssetCategory, CpfBalances, Expense, ExpenseCategory, Frequency, Income, IncomeKind,
    Liability, LiabilityKind, Profile, PropertyScenario,
};
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::Connection;

const ACTOR: &str = "dev_seed";

/// Insert a sample household. Returns false when the store already has records.
pub fn seed_demo_data(conn: &Connection) -> Result<bool> {
    if count_records(conn)? > 0 {
        tracing::debug!("store not empty, skipping demo seed");
        return Ok(false);
    }

    let mut profile = Profile {
        name: "Demo User".to_string(),
        birth_date: NaiveDate::from_ymd_opt(1993, 4, 12),
        cpf: CpfBalances {
            oa: 62_000.0,
            sa: 31_000.0,
            ma: 28_000.0,
        },
        ..Profile::default()
    };
    save_profile(conn, &mut profile, ACTOR)?;

    insert_record(conn, &Asset::new("DBS Multiplier", AssetCategory::Cash, 38_000.0), ACTOR)?;
    insert_record(
        conn,
        &Asset::new("IBKR portfolio", AssetCategory::Investment, 54_000.0).with_growth(0.06),
        ACTOR,
    )?;
    insert_record(
        conn,
        &Asset::new("Toyota Corolla", AssetCategory::Vehicle, 70_000.0).with_growth(-0.10),
        ACTOR,
    )?;

    insert_record(
        conn,
        &Liability::new("Car loan", LiabilityKind::CarLoan, 41_000.0, 0.0278, 980.0),
        ACTOR,
    )?;

    insert_record(
        conn,
        &Income::new("Salary", IncomeKind::Salary, 7_200.0, Frequency::Monthly).with_cpf(),
        ACTOR,
    )?;
    let mut bonus = Income::new("Year-end bonus", IncomeKind::Bonus, 14_400.0, Frequency::Annual).with_cpf();
    bonus.start_date = NaiveDate::from_ymd_opt(2024, 12, 1);
    insert_record(conn, &bonus, ACTOR)?;

    insert_record(conn, &Expense::new("Rent", ExpenseCategory::Housing, 2_400.0, Frequency::Monthly), ACTOR)?;
    insert_record(conn, &Expense::new("Food", ExpenseCategory::Food, 900.0, Frequency::Monthly), ACTOR)?;
    insert_record(
        conn,
        &Expense::new("Insurance premiums", ExpenseCategory::Insurance, 1_800.0, Frequency::Annual),
        ACTOR,
    )?;

    let mut condo = PropertyScenario::new(
        "2-bed resale condo",
        1_150_000.0,
        287_500.0,
        30,
        0.031,
        NaiveDate::from_ymd_opt(2028, 6, 1).unwrap_or_default(),
    );
    condo.appreciation_rate = 0.02;
    condo.use_cpf_oa = true;
    condo.include_in_projection = false;
    insert_record(conn, &condo, ACTOR)?;

    tracing::info!("seeded demo data");
    Ok(true)
}
