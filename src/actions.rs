// ✅ Pending Actions - assistant proposals wait here for the user's say-so
//
// Lifecycle: Pending → Confirmed | Rejected | Expired
// Only a pending action inside its TTL can be confirmed. Confirmation applies
// the intent to the store in a single transaction.

use crate::db::{
    delete_record, find_record_by_name, insert_event, insert_record, update_record, Event,
};
use crate::entities::{Asset, Expense, Income, Liability, PropertyScenario, Record, RecordKind};
use crate::error::{FinanceError, Result};
use crate::intent::FinancialIntent;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const ACTOR: &str = "assistant";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionSettings {
    /// Minutes a proposal stays confirmable
    pub ttl_minutes: i64,
}

impl Default for ActionSettings {
    fn default() -> Self {
        ActionSettings { ttl_minutes: 30 }
    }
}

impl ActionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::minutes(self.ttl_minutes.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Confirmed => "confirmed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Expired => "expired",
        }
    }

    pub fn parse(text: &str) -> Option<ActionStatus> {
        match text {
            "pending" => Some(ActionStatus::Pending),
            "confirmed" => Some(ActionStatus::Confirmed),
            "rejected" => Some(ActionStatus::Rejected),
            "expired" => Some(ActionStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub intent: FinancialIntent,
    pub summary: String,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// What confirming did, e.g. `{"kind": "asset", "id": "..."}`
    pub result: Option<serde_json::Value>,
}

impl PendingAction {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

// ============================================================================
// QUEUE OPERATIONS
// ============================================================================

/// Queue a mutating intent. Read-only intents are answered directly and never queued.
pub fn propose(conn: &Connection, intent: FinancialIntent) -> Result<PendingAction> {
    if !intent.is_mutation() {
        return Err(FinanceError::InvalidState(
            "read-only requests are answered directly".to_string(),
        ));
    }

    let action = PendingAction {
        id: uuid::Uuid::new_v4().to_string(),
        summary: intent.describe(),
        intent,
        status: ActionStatus::Pending,
        created_at: Utc::now(),
        resolved_at: None,
        result: None,
    };

    conn.execute(
        "INSERT INTO pending_actions (id, intent, summary, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            action.id,
            serde_json::to_string(&action.intent)?,
            action.summary,
            action.status.as_str(),
            action.created_at.to_rfc3339(),
        ],
    )?;

    insert_event(
        conn,
        &Event::new(
            "action_proposed",
            "action",
            &action.id,
            serde_json::json!({ "summary": action.summary }),
            ACTOR,
        ),
    )?;
    tracing::info!(id = %action.id, summary = %action.summary, "action proposed");
    Ok(action)
}

type ActionRow = (String, String, String, String, String, Option<String>, Option<String>);

fn from_row(row: ActionRow) -> Result<PendingAction> {
    let (id, intent, summary, status, created_at, resolved_at, result) = row;
    let status = ActionStatus::parse(&status)
        .ok_or_else(|| FinanceError::InvalidState(format!("unknown action status '{}'", status)))?;
    Ok(PendingAction {
        id,
        intent: serde_json::from_str(&intent)?,
        summary,
        status,
        created_at: parse_time(&created_at),
        resolved_at: resolved_at.as_deref().map(parse_time),
        result: result.as_deref().map(|r| serde_json::from_str(r)).transpose()?,
    })
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

const SELECT_ACTION: &str =
    "SELECT id, intent, summary, status, created_at, resolved_at, result FROM pending_actions";

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<ActionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

pub fn get_action(conn: &Connection, id: &str) -> Result<PendingAction> {
    let row = conn
        .query_row(&format!("{} WHERE id = ?1", SELECT_ACTION), [id], read_row)
        .optional()?;
    match row {
        Some(row) => from_row(row),
        None => Err(FinanceError::not_found("action", id)),
    }
}

/// Pending actions, oldest first
pub fn list_pending(conn: &Connection) -> Result<Vec<PendingAction>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE status = ?1 ORDER BY created_at",
        SELECT_ACTION
    ))?;
    let rows = stmt
        .query_map([ActionStatus::Pending.as_str()], read_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(from_row).collect()
}

fn resolve(
    conn: &Connection,
    action: &mut PendingAction,
    status: ActionStatus,
    now: DateTime<Utc>,
    result: Option<serde_json::Value>,
) -> Result<()> {
    let result_json = result.as_ref().map(|r| serde_json::to_string(r)).transpose()?;
    conn.execute(
        "UPDATE pending_actions SET status = ?1, resolved_at = ?2, result = ?3 WHERE id = ?4",
        params![status.as_str(), now.to_rfc3339(), result_json, action.id],
    )?;
    insert_event(
        conn,
        &Event::new(
            &format!("action_{}", status.as_str()),
            "action",
            &action.id,
            result.clone().unwrap_or(serde_json::Value::Null),
            ACTOR,
        ),
    )?;

    action.status = status;
    action.resolved_at = Some(now);
    action.result = result;
    tracing::info!(id = %action.id, status = status.as_str(), "action resolved");
    Ok(())
}

fn ensure_pending(action: &PendingAction) -> Result<()> {
    if action.status != ActionStatus::Pending {
        return Err(FinanceError::InvalidState(format!(
            "action {} is already {}",
            action.id,
            action.status.as_str()
        )));
    }
    Ok(())
}

/// Apply a pending action. Expired actions are marked as such and refused.
pub fn confirm(conn: &Connection, id: &str, now: DateTime<Utc>, ttl: Duration) -> Result<PendingAction> {
    let mut action = get_action(conn, id)?;
    ensure_pending(&action)?;

    if action.is_expired(now, ttl) {
        resolve(conn, &mut action, ActionStatus::Expired, now, None)?;
        return Err(FinanceError::InvalidState(format!(
            "action {} expired; ask again to get a fresh proposal",
            id
        )));
    }

    // Any failure drops the transaction, which rolls back and leaves the action pending
    let tx = conn.unchecked_transaction()?;
    let outcome = apply_intent(&tx, &action.intent)?;
    resolve(&tx, &mut action, ActionStatus::Confirmed, now, Some(outcome))?;
    tx.commit()?;

    Ok(action)
}

pub fn reject(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<PendingAction> {
    let mut action = get_action(conn, id)?;
    ensure_pending(&action)?;
    resolve(conn, &mut action, ActionStatus::Rejected, now, None)?;
    Ok(action)
}

/// Mark every pending action older than `ttl` as expired. Returns how many were swept.
pub fn expire_stale(conn: &Connection, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
    let mut swept = 0;
    for mut action in list_pending(conn)? {
        if action.is_expired(now, ttl) {
            resolve(conn, &mut action, ActionStatus::Expired, now, None)?;
            swept += 1;
        }
    }
    if swept > 0 {
        tracing::debug!(swept, "expired stale actions");
    }
    Ok(swept)
}

// ============================================================================
// APPLYING INTENTS
// ============================================================================

fn created<T: Record>(record: &T) -> serde_json::Value {
    serde_json::json!({ "kind": T::KIND, "id": record.id(), "name": record.name() })
}

fn insert<T: Record>(conn: &Connection, record: T) -> Result<serde_json::Value> {
    insert_record(conn, &record, ACTOR)?;
    Ok(created(&record))
}

fn locate(conn: &Connection, kind: RecordKind, name: &str) -> Result<Option<String>> {
    fn id_of<T: Record>(conn: &Connection, name: &str) -> Result<Option<String>> {
        Ok(find_record_by_name::<T>(conn, name)?.map(|r| r.id().to_string()))
    }
    match kind {
        RecordKind::Asset => id_of::<Asset>(conn, name),
        RecordKind::Liability => id_of::<Liability>(conn, name),
        RecordKind::Income => id_of::<Income>(conn, name),
        RecordKind::Expense => id_of::<Expense>(conn, name),
        RecordKind::Scenario => id_of::<PropertyScenario>(conn, name),
    }
}

fn delete_kind(conn: &Connection, kind: RecordKind, id: &str) -> Result<()> {
    match kind {
        RecordKind::Asset => delete_record::<Asset>(conn, id, ACTOR),
        RecordKind::Liability => delete_record::<Liability>(conn, id, ACTOR),
        RecordKind::Income => delete_record::<Income>(conn, id, ACTOR),
        RecordKind::Expense => delete_record::<Expense>(conn, id, ACTOR),
        RecordKind::Scenario => delete_record::<PropertyScenario>(conn, id, ACTOR),
    }
}

fn apply_intent(conn: &Connection, intent: &FinancialIntent) -> Result<serde_json::Value> {
    match intent {
        FinancialIntent::AddAsset { name, category, value } => {
            insert(conn, Asset::new(name, *category, *value))
        }
        FinancialIntent::AddLiability {
            name,
            kind,
            balance,
            interest_rate,
            monthly_payment,
        } => insert(
            conn,
            Liability::new(name, *kind, *balance, *interest_rate, *monthly_payment),
        ),
        FinancialIntent::AddIncome {
            name,
            kind,
            amount,
            frequency,
            cpf_applicable,
        } => {
            let mut income = Income::new(name, *kind, *amount, *frequency);
            income.cpf_applicable = *cpf_applicable;
            insert(conn, income)
        }
        FinancialIntent::AddExpense {
            name,
            category,
            amount,
            frequency,
        } => insert(conn, Expense::new(name, *category, *amount, *frequency)),
        FinancialIntent::UpdateAssetValue { name, value } => {
            let mut asset = find_record_by_name::<Asset>(conn, name)?
                .ok_or_else(|| FinanceError::not_found(Asset::KIND, name))?;
            let previous = asset.value;
            asset.value = *value;
            update_record(conn, &mut asset, ACTOR)?;
            Ok(serde_json::json!({
                "kind": Asset::KIND,
                "id": asset.id,
                "previous_value": previous,
                "value": asset.value,
            }))
        }
        FinancialIntent::RemoveRecord { kind, name } => {
            let candidates = match kind {
                Some(kind) => vec![*kind],
                None => vec![
                    RecordKind::Asset,
                    RecordKind::Liability,
                    RecordKind::Income,
                    RecordKind::Expense,
                    RecordKind::Scenario,
                ],
            };

            let mut found = Vec::new();
            for kind in candidates {
                if let Some(id) = locate(conn, kind, name)? {
                    found.push((kind, id));
                }
            }

            match found.as_slice() {
                [] => Err(FinanceError::not_found(
                    kind.map_or("record", |k| k.as_str()),
                    name,
                )),
                [(kind, id)] => {
                    delete_kind(conn, *kind, id)?;
                    Ok(serde_json::json!({ "kind": kind.as_str(), "id": id, "removed": true }))
                }
                _ => Err(FinanceError::Conflict(format!(
                    "'{}' matches more than one record; say which kind to remove",
                    name
                ))),
            }
        }
        FinancialIntent::CalculateCpf { .. } | FinancialIntent::ProjectNetWorth { .. } => Err(
            FinanceError::InvalidState("read-only requests have nothing to apply".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, list_records, setup_database};
    use crate::entities::{AssetCategory, ExpenseCategory, Frequency, IncomeKind, LiabilityKind};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn add_asset(name: &str, value: f64) -> FinancialIntent {
        FinancialIntent::AddAsset {
            name: name.to_string(),
            category: AssetCategory::Cash,
            value,
        }
    }

    fn ttl() -> Duration {
        ActionSettings::default().ttl()
    }

    #[test]
    fn test_confirm_applies_intent() {
        let conn = setup();
        let action = propose(&conn, add_asset("DBS savings", 20_000.0)).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(list_pending(&conn).unwrap().len(), 1);
        assert!(list_records::<Asset>(&conn).unwrap().is_empty());

        let confirmed = confirm(&conn, &action.id, Utc::now(), ttl()).unwrap();
        assert_eq!(confirmed.status, ActionStatus::Confirmed);
        assert!(confirmed.resolved_at.is_some());

        let assets = list_records::<Asset>(&conn).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].value, 20_000.0);
        assert_eq!(
            confirmed.result.unwrap()["id"].as_str(),
            Some(assets[0].id.as_str())
        );
        assert!(list_pending(&conn).unwrap().is_empty());

        let stored = get_action(&conn, &action.id).unwrap();
        assert_eq!(stored.status, ActionStatus::Confirmed);

        let events = get_events_for_entity(&conn, "action", &action.id).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_confirm_twice_is_invalid_state() {
        let conn = setup();
        let action = propose(&conn, add_asset("Cash", 100.0)).unwrap();
        confirm(&conn, &action.id, Utc::now(), ttl()).unwrap();

        let err = confirm(&conn, &action.id, Utc::now(), ttl()).unwrap_err();
        assert!(matches!(err, FinanceError::InvalidState(_)));
        assert_eq!(list_records::<Asset>(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_action_cannot_be_confirmed() {
        let conn = setup();
        let action = propose(&conn, add_asset("Cash", 100.0)).unwrap();

        let rejected = reject(&conn, &action.id, Utc::now()).unwrap();
        assert_eq!(rejected.status, ActionStatus::Rejected);

        assert!(matches!(
            confirm(&conn, &action.id, Utc::now(), ttl()),
            Err(FinanceError::InvalidState(_))
        ));
        assert!(matches!(
            reject(&conn, &action.id, Utc::now()),
            Err(FinanceError::InvalidState(_))
        ));
        assert!(list_records::<Asset>(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_expired_action_is_marked_and_refused() {
        let conn = setup();
        let action = propose(&conn, add_asset("Cash", 100.0)).unwrap();
        let later = action.created_at + ttl() + Duration::minutes(1);

        let err = confirm(&conn, &action.id, later, ttl()).unwrap_err();
        assert!(matches!(err, FinanceError::InvalidState(_)));
        assert_eq!(get_action(&conn, &action.id).unwrap().status, ActionStatus::Expired);
        assert!(list_records::<Asset>(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_expire_stale_sweeps_old_actions() {
        let conn = setup();
        propose(&conn, add_asset("A", 1.0)).unwrap();
        propose(&conn, add_asset("B", 2.0)).unwrap();

        assert_eq!(expire_stale(&conn, Utc::now(), ttl()).unwrap(), 0);
        let later = Utc::now() + ttl() + Duration::minutes(5);
        assert_eq!(expire_stale(&conn, later, ttl()).unwrap(), 2);
        assert!(list_pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_failed_apply_rolls_back_and_stays_pending() {
        let conn = setup();
        let action = propose(
            &conn,
            FinancialIntent::UpdateAssetValue {
                name: "Missing".to_string(),
                value: 5.0,
            },
        )
        .unwrap();

        let err = confirm(&conn, &action.id, Utc::now(), ttl()).unwrap_err();
        assert!(matches!(err, FinanceError::NotFound { .. }));
        assert_eq!(get_action(&conn, &action.id).unwrap().status, ActionStatus::Pending);
    }

    #[test]
    fn test_update_asset_value_by_name() {
        let conn = setup();
        insert_record(&conn, &Asset::new("DBS savings", AssetCategory::Cash, 20_000.0), "test").unwrap();

        let action = propose(
            &conn,
            FinancialIntent::UpdateAssetValue {
                name: "dbs SAVINGS".to_string(),
                value: 45_000.0,
            },
        )
        .unwrap();
        let confirmed = confirm(&conn, &action.id, Utc::now(), ttl()).unwrap();
        assert_eq!(confirmed.result.unwrap()["previous_value"], 20_000.0);

        let assets = list_records::<Asset>(&conn).unwrap();
        assert_eq!(assets[0].value, 45_000.0);
        assert_eq!(assets[0].version, 2);
    }

    #[test]
    fn test_add_each_kind() {
        let conn = setup();
        let intents = vec![
            FinancialIntent::AddLiability {
                name: "Car loan".to_string(),
                kind: LiabilityKind::CarLoan,
                balance: 30_000.0,
                interest_rate: 0.025,
                monthly_payment: 650.0,
            },
            FinancialIntent::AddIncome {
                name: "Salary".to_string(),
                kind: IncomeKind::Salary,
                amount: 6_500.0,
                frequency: Frequency::Monthly,
                cpf_applicable: true,
            },
            FinancialIntent::AddExpense {
                name: "Groceries".to_string(),
                category: ExpenseCategory::Food,
                amount: 600.0,
                frequency: Frequency::Monthly,
            },
        ];
        for intent in intents {
            let action = propose(&conn, intent).unwrap();
            confirm(&conn, &action.id, Utc::now(), ttl()).unwrap();
        }

        assert_eq!(list_records::<Liability>(&conn).unwrap()[0].monthly_payment, 650.0);
        assert!(list_records::<Income>(&conn).unwrap()[0].attracts_cpf());
        assert_eq!(list_records::<Expense>(&conn).unwrap()[0].category, ExpenseCategory::Food);
    }

    #[test]
    fn test_remove_by_name_across_kinds() {
        let conn = setup();
        insert_record(
            &conn,
            &Liability::new("Car loan", LiabilityKind::CarLoan, 30_000.0, 0.025, 650.0),
            "test",
        )
        .unwrap();

        let action = propose(
            &conn,
            FinancialIntent::RemoveRecord {
                kind: None,
                name: "car loan".to_string(),
            },
        )
        .unwrap();
        let confirmed = confirm(&conn, &action.id, Utc::now(), ttl()).unwrap();
        assert_eq!(confirmed.result.unwrap()["kind"], "liability");
        assert!(list_records::<Liability>(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_remove_ambiguous_name_is_conflict() {
        let conn = setup();
        insert_record(&conn, &Asset::new("Car", AssetCategory::Vehicle, 50_000.0), "test").unwrap();
        insert_record(
            &conn,
            &Expense::new("Car", ExpenseCategory::Transport, 400.0, Frequency::Monthly),
            "test",
        )
        .unwrap();

        let ambiguous = propose(
            &conn,
            FinancialIntent::RemoveRecord {
                kind: None,
                name: "Car".to_string(),
            },
        )
        .unwrap();
        assert!(matches!(
            confirm(&conn, &ambiguous.id, Utc::now(), ttl()),
            Err(FinanceError::Conflict(_))
        ));

        let specific = propose(
            &conn,
            FinancialIntent::RemoveRecord {
                kind: Some(RecordKind::Expense),
                name: "Car".to_string(),
            },
        )
        .unwrap();
        confirm(&conn, &specific.id, Utc::now(), ttl()).unwrap();
        assert!(list_records::<Expense>(&conn).unwrap().is_empty());
        assert_eq!(list_records::<Asset>(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_read_only_intents_are_not_queued() {
        let conn = setup();
        let err = propose(&conn, FinancialIntent::ProjectNetWorth { years: 10 }).unwrap_err();
        assert!(matches!(err, FinanceError::InvalidState(_)));
        assert!(list_pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_action_is_not_found() {
        let conn = setup();
        assert!(matches!(
            confirm(&conn, "nope", Utc::now(), ttl()),
            Err(FinanceError::NotFound { .. })
        ));
    }
}
