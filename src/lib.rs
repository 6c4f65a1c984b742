// Personal Finance Planner - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod entities;
pub mod db;
pub mod rules;
pub mod cpf;          // Singapore CPF contributions and allocation
pub mod projection;   // Month-by-month net worth engine
pub mod format;
pub mod intent;       // Natural language → FinancialIntent
pub mod actions;      // Pending actions awaiting confirmation
pub mod llm;
pub mod assistant;
pub mod config;
pub mod logging;
pub mod demo;

// Re-export commonly used types
pub use error::{FieldError, FinanceError, Result};
pub use entities::{
    Asset, AssetCategory,
    Liability, LiabilityKind,
    Income, IncomeKind,
    Expense, ExpenseCategory,
    PropertyScenario, ScenarioEvaluation,
    Profile, CpfBalances,
    Frequency, Record, RecordKind,
};
pub use db::{
    Event, HistoryEntry, ImportReport, ImportRow,
    open_database, setup_database, load_csv, import_rows,
    insert_record, get_record, list_records, find_record_by_name,
    update_record, patch_record, delete_record, record_history, count_records,
    load_profile, save_profile, load_snapshot,
    insert_event, get_events_for_entity,
};
pub use cpf::{AnnualCpfSummary, CpfCalculator, CpfContribution, CpfInput, CpfSchedule};
pub use projection::{
    compute_net_worth, Assumptions, FinancialSnapshot, NetWorthPoint, Projection,
    ProjectionSummary,
};
pub use rules::CategoryRules;
pub use intent::{FinancialIntent, IntentParser, RawExtraction};
pub use actions::{ActionSettings, ActionStatus, PendingAction};
pub use llm::{ChatMessage, LlmProvider, LlmSettings};
pub use assistant::{Assistant, ChatReply, ChatRequest};
pub use config::Settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
