// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use finplan::entities::{Asset, Expense, Income, Liability, PropertyScenario, RecordKind};
use finplan::format::{money, percent};
use finplan::{
    compute_net_worth, count_records, demo, import_rows, list_records, load_csv, load_snapshot,
    logging, open_database, CpfInput, Settings,
};

#[derive(Parser)]
#[command(name = "finplan", version, about = "Personal finance planner: balance sheet, CPF and net worth projection")]
struct Cli {
    /// TOML settings file (defaults to ./finplan.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and schema
    Init,
    /// Import records from a CSV file
    Import { csv: PathBuf },
    /// Load a demo household into an empty database
    Seed,
    /// CPF contributions for a monthly salary
    Cpf {
        #[arg(long)]
        salary: f64,
        #[arg(long)]
        age: u32,
        /// Annual bonus, paid in December
        #[arg(long, default_value_t = 0.0)]
        bonus: f64,
    },
    /// Project net worth from the stored records
    Project {
        #[arg(long)]
        years: Option<u32>,
    },
    /// List stored records of one kind
    List { kind: String },
    /// Interactive terminal dashboard
    Tui,
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Tui) {
        Command::Init => run_init(&settings),
        Command::Import { csv } => run_import(&settings, &csv),
        Command::Seed => run_seed(&settings),
        Command::Cpf { salary, age, bonus } => run_cpf(&settings, salary, age, bonus),
        Command::Project { years } => run_project(&settings, years),
        Command::List { kind } => run_list(&settings, &kind),
        Command::Tui => run_ui_mode(&settings),
    }
}

fn open(settings: &Settings) -> Result<Connection> {
    let conn = open_database(&settings.database_path)?;
    if settings.dev_data && demo::seed_demo_data(&conn)? {
        tracing::info!("seeded demo data into {:?}", settings.database_path);
    }
    Ok(conn)
}

fn run_init(settings: &Settings) -> Result<()> {
    println!("🔧 Setting up database...");
    let conn = open_database(&settings.database_path)?;
    println!("✓ Database ready at {:?} (WAL mode)", settings.database_path);
    println!("✓ {} records stored", count_records(&conn)?);
    Ok(())
}

fn run_import(settings: &Settings, csv_path: &Path) -> Result<()> {
    println!("🗄️  Data Import - CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading CSV...");
    let rows = load_csv(csv_path)?;
    println!("✓ Loaded {} rows from {:?}", rows.len(), csv_path);

    println!("\n💾 Inserting records...");
    let conn = open_database(&settings.database_path)?;
    let report = import_rows(&conn, &rows).context("Import failed")?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Inserted:   {}", report.inserted);
    println!("✓ Duplicates: {}", report.duplicates);
    if !report.rejected.is_empty() {
        println!("⚠️  Rejected:   {}", report.rejected.len());
        for reason in &report.rejected {
            println!("   - {}", reason);
        }
    }
    Ok(())
}

fn run_seed(settings: &Settings) -> Result<()> {
    let conn = open_database(&settings.database_path)?;
    if demo::seed_demo_data(&conn)? {
        println!("🌱 Demo household loaded ({} records)", count_records(&conn)?);
    } else {
        println!("ℹ️  Database already has records, nothing seeded");
    }
    Ok(())
}

fn run_cpf(settings: &Settings, salary: f64, age: u32, bonus: f64) -> Result<()> {
    let calculator = settings.cpf_calculator()?;
    let month = calculator.calculate(&CpfInput {
        ordinary_wage: salary,
        additional_wage: 0.0,
        age,
        annual_ordinary_wages: None,
    })?;
    let year = calculator.annual_summary(salary, bonus, age)?;

    println!("🧮 CPF for {} a month at age {}", money(salary), age);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Employee:   {:>14}", money(month.employee));
    println!("  Employer:   {:>14}", money(month.employer));
    println!("  Total:      {:>14}", money(month.total));
    println!("  Take-home:  {:>14}", money(month.take_home));
    println!(
        "  OA / SA / MA: {} / {} / {}",
        money(month.allocation.oa),
        money(month.allocation.sa),
        money(month.allocation.ma)
    );

    println!("\n📅 Full year (bonus {})", money(bonus));
    println!("  Gross wages: {:>14}", money(year.gross_wages));
    println!("  Employee:    {:>14}", money(year.employee));
    println!("  Employer:    {:>14}", money(year.employer));
    println!("  Take-home:   {:>14}", money(year.take_home));
    Ok(())
}

fn run_project(settings: &Settings, years: Option<u32>) -> Result<()> {
    let conn = open(settings)?;
    let snapshot = load_snapshot(&conn)?;

    let mut assumptions = settings.assumptions.clone();
    if let Some(years) = years {
        assumptions.years = years;
    }
    let projection = compute_net_worth(&snapshot, &assumptions, &settings.cpf_calculator()?)?;

    println!("📈 Net worth projection over {} years", assumptions.years);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "{:>4}  {:>10}  {:>4}  {:>16}  {:>16}  {:>16}  {:>16}",
        "Year", "Date", "Age", "Cash", "CPF", "Liabilities", "Net worth"
    );
    for point in &projection.points {
        println!(
            "{:>4}  {:>10}  {:>4}  {:>16}  {:>16}  {:>16}  {:>16}",
            point.year,
            point.date.format("%Y-%m"),
            point.age.map(|a| a.to_string()).unwrap_or_default(),
            money(point.cash),
            money(point.cpf.total()),
            money(point.liabilities),
            money(point.net_worth),
        );
    }

    let summary = &projection.summary;
    println!("\n✓ Start: {}  Final: {}", money(summary.starting_net_worth), money(summary.final_net_worth));
    println!("✓ Peak:  {} in {}", money(summary.peak_net_worth), summary.peak_date.format("%b %Y"));
    if let Some(date) = summary.first_negative_cash {
        println!("⚠️  Cash first goes negative in {}", date.format("%b %Y"));
    }
    for warning in &projection.warnings {
        println!("⚠️  {}", warning);
    }
    Ok(())
}

fn run_list(settings: &Settings, kind: &str) -> Result<()> {
    let Some(kind) = RecordKind::parse(kind) else {
        bail!("Unknown record kind '{}' (asset, liability, income, expense, scenario)", kind);
    };
    let conn = open(settings)?;

    match kind {
        RecordKind::Asset => {
            for a in list_records::<Asset>(&conn)? {
                println!("{:<28} {:<12} {:>16}", a.name, a.category.as_str(), money(a.value));
            }
        }
        RecordKind::Liability => {
            for l in list_records::<Liability>(&conn)? {
                println!(
                    "{:<28} {:<12} {:>16} @ {:<6} {:>12}/mo",
                    l.name,
                    l.kind.as_str(),
                    money(l.balance),
                    percent(l.interest_rate),
                    money(l.monthly_payment)
                );
            }
        }
        RecordKind::Income => {
            for i in list_records::<Income>(&conn)? {
                println!(
                    "{:<28} {:<10} {:>14} {:<10}{}",
                    i.name,
                    i.kind.as_str(),
                    money(i.amount),
                    i.frequency.as_str(),
                    if i.attracts_cpf() { " (CPF)" } else { "" }
                );
            }
        }
        RecordKind::Expense => {
            for e in list_records::<Expense>(&conn)? {
                println!(
                    "{:<28} {:<14} {:>14} {}",
                    e.name,
                    e.category.as_str(),
                    money(e.amount),
                    e.frequency.as_str()
                );
            }
        }
        RecordKind::Scenario => {
            for s in list_records::<PropertyScenario>(&conn)? {
                println!(
                    "{:<28} {:>16} down {:>14} {} yrs @ {} from {}",
                    s.name,
                    money(s.purchase_price),
                    money(s.down_payment),
                    s.loan_tenure_years,
                    percent(s.interest_rate),
                    s.purchase_date
                );
            }
        }
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(settings: &Settings) -> Result<()> {
    println!("🖥️  Loading finplan dashboard...\n");

    let conn = open(settings)?;
    let snapshot = load_snapshot(&conn)?;
    let calculator = settings.cpf_calculator()?;
    let projection = compute_net_worth(&snapshot, &settings.assumptions, &calculator)?;

    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(snapshot, projection, &calculator);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_settings: &Settings) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin finplan-server --features server");
    std::process::exit(1);
}
