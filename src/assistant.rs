// 💬 Assistant - one chat turn
//
// 1. Parse the message into an intent
// 2. Mutations are queued as pending actions and wait for confirmation
// 3. CPF and projection requests are answered straight from the calculators
// 4. Anything else goes to the LLM with a summary of the balance sheet
//
// The store is shared behind a std Mutex; it is never held across an await.

use crate::actions::{propose, PendingAction};
use crate::cpf::{CpfCalculator, CpfInput};
use crate::db::{load_profile, load_snapshot};
use crate::error::{FieldError, FinanceError, Result};
use crate::format::money;
use crate::intent::{FinancialIntent, IntentExtractor, IntentParser, LlmExtractor, RuleExtractor};
use crate::llm::{ChatMessage, LlmProvider};
use crate::projection::{compute_net_worth, Assumptions, FinancialSnapshot};
use crate::rules::CategoryRules;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Prior turns sent to the LLM
const MAX_HISTORY: usize = 20;

const HELP_TEXT: &str = "I can keep track of your finances and run the numbers. Try:\n\
- \"I have $20,000 in my DBS savings account\"\n\
- \"I earn $6,500 a month\"\n\
- \"I spend $600 a month on groceries\"\n\
- \"My car loan is $30k at 2.5%, paying $650 a month\"\n\
- \"Calculate my CPF on $6,000 salary at age 30\"\n\
- \"Project my net worth over 20 years\"";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub intent: Option<FinancialIntent>,
    pub pending_action: Option<PendingAction>,
    /// Calculator output behind the reply (CPF breakdown, projection, missing fields)
    pub data: Option<serde_json::Value>,
}

impl ChatReply {
    fn text(reply: impl Into<String>) -> Self {
        ChatReply {
            reply: reply.into(),
            ..ChatReply::default()
        }
    }
}

pub struct Assistant {
    provider: Option<Arc<dyn LlmProvider>>,
    parser: IntentParser,
    cpf: CpfCalculator,
    assumptions: Assumptions,
}

fn with_db<T>(db: &Mutex<Connection>, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let conn = db
        .lock()
        .map_err(|_| FinanceError::InvalidState("database lock poisoned".to_string()))?;
    f(&conn)
}

impl Assistant {
    /// With a provider, intents are extracted by the LLM (rules as fallback);
    /// without one, the rule extractor does everything.
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        rules: CategoryRules,
        cpf: CpfCalculator,
        assumptions: Assumptions,
    ) -> std::result::Result<Self, regex::Error> {
        let extractor: Box<dyn IntentExtractor> = match &provider {
            Some(provider) => Box::new(LlmExtractor::new(provider.clone(), RuleExtractor::new()?)),
            None => Box::new(RuleExtractor::new()?),
        };
        Ok(Assistant {
            provider,
            parser: IntentParser::new(extractor, rules),
            cpf,
            assumptions,
        })
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.model())
    }

    pub fn cpf(&self) -> &CpfCalculator {
        &self.cpf
    }

    pub async fn handle(&self, db: &Mutex<Connection>, request: ChatRequest) -> Result<ChatReply> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(FinanceError::invalid("message", "Message is empty"));
        }

        let intent = match self.parser.parse(message).await {
            Ok(intent) => intent,
            Err(FinanceError::Validation(errors)) => return Ok(clarify(None, errors)),
            Err(e) => return Err(e),
        };

        let outcome = match intent {
            Some(intent) if intent.is_mutation() => self.propose(db, intent),
            Some(FinancialIntent::CalculateCpf { monthly_salary, age }) => {
                self.answer_cpf(db, monthly_salary, age)
            }
            Some(FinancialIntent::ProjectNetWorth { years }) => self.answer_projection(db, years),
            Some(_) | None => return self.converse(db, message, &request.history).await,
        };

        match outcome {
            Err(FinanceError::Validation(errors)) => Ok(clarify(None, errors)),
            other => other,
        }
    }

    fn propose(&self, db: &Mutex<Connection>, intent: FinancialIntent) -> Result<ChatReply> {
        let action = with_db(db, |conn| propose(conn, intent.clone()))?;
        Ok(ChatReply {
            reply: format!("{}. Shall I go ahead? Confirm or reject to continue.", action.summary),
            intent: Some(intent),
            pending_action: Some(action),
            data: None,
        })
    }

    fn answer_cpf(&self, db: &Mutex<Connection>, monthly_salary: f64, age: Option<u32>) -> Result<ChatReply> {
        let intent = FinancialIntent::CalculateCpf { monthly_salary, age };

        let age = match age {
            Some(age) => Some(age),
            None => with_db(db, load_profile)?.age_on(Utc::now().date_naive()),
        };
        let Some(age) = age else {
            return Ok(clarify(
                Some(intent),
                vec![FieldError::new("age", "How old are you? CPF rates depend on age")],
            ));
        };

        let contribution = self.cpf.calculate(&CpfInput {
            ordinary_wage: monthly_salary,
            additional_wage: 0.0,
            age,
            annual_ordinary_wages: None,
        })?;

        let reply = format!(
            "On a monthly salary of {} at age {}, you contribute {} and your employer adds {} ({} in total). \
             Take-home pay is {}. The {} is split OA {}, SA {}, MA {}.",
            money(monthly_salary),
            age,
            money(contribution.employee),
            money(contribution.employer),
            money(contribution.total),
            money(contribution.take_home),
            money(contribution.total),
            money(contribution.allocation.oa),
            money(contribution.allocation.sa),
            money(contribution.allocation.ma),
        );

        Ok(ChatReply {
            reply,
            intent: Some(intent),
            pending_action: None,
            data: Some(serde_json::to_value(contribution)?),
        })
    }

    fn answer_projection(&self, db: &Mutex<Connection>, years: u32) -> Result<ChatReply> {
        let snapshot = with_db(db, load_snapshot)?;
        let assumptions = Assumptions {
            years,
            ..self.assumptions.clone()
        };
        let projection = compute_net_worth(&snapshot, &assumptions, &self.cpf)?;
        let summary = &projection.summary;

        let mut reply = format!(
            "Over {} years your net worth goes from {} to {}, peaking at {} in {}.",
            years,
            money(summary.starting_net_worth),
            money(summary.final_net_worth),
            money(summary.peak_net_worth),
            summary.peak_date.format("%b %Y"),
        );
        if let Some(date) = summary.first_negative_cash {
            reply.push_str(&format!(" Cash first runs negative in {}.", date.format("%b %Y")));
        }
        for warning in &projection.warnings {
            reply.push_str(&format!("\nNote: {}", warning));
        }

        Ok(ChatReply {
            reply,
            intent: Some(FinancialIntent::ProjectNetWorth { years }),
            pending_action: None,
            data: Some(serde_json::to_value(&projection)?),
        })
    }

    async fn converse(
        &self,
        db: &Mutex<Connection>,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<ChatReply> {
        let Some(provider) = &self.provider else {
            return Ok(ChatReply::text(HELP_TEXT));
        };

        let snapshot = with_db(db, load_snapshot)?;
        let mut messages = vec![ChatMessage::system(system_prompt(&snapshot))];
        let skip = history.len().saturating_sub(MAX_HISTORY);
        messages.extend(
            history[skip..]
                .iter()
                .filter(|m| m.role != crate::llm::Role::System)
                .cloned(),
        );
        messages.push(ChatMessage::user(message));

        let reply = provider.complete(&messages).await?;
        tracing::debug!(model = provider.model(), turns = messages.len(), "llm reply");
        Ok(ChatReply::text(reply.trim()))
    }
}

fn clarify(intent: Option<FinancialIntent>, errors: Vec<FieldError>) -> ChatReply {
    let details = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    ChatReply {
        reply: format!("I need a bit more detail: {}.", details),
        intent,
        pending_action: None,
        data: serde_json::to_value(&errors).ok(),
    }
}

/// Balance sheet in a few lines, for grounding the LLM
pub fn balance_sheet_summary(snapshot: &FinancialSnapshot) -> String {
    let cpf = snapshot.profile.cpf;
    format!(
        "Assets: {} across {} records. Liabilities: {} across {} records. \
         CPF: OA {}, SA {}, MA {}. Net worth: {}.\n\
         Monthly income {}, monthly expenses {}, monthly debt payments {}.",
        money(snapshot.total_assets()),
        snapshot.assets.len(),
        money(snapshot.total_liabilities()),
        snapshot.liabilities.len(),
        money(cpf.oa),
        money(cpf.sa),
        money(cpf.ma),
        money(snapshot.net_worth()),
        money(snapshot.monthly_income()),
        money(snapshot.monthly_expenses()),
        money(snapshot.monthly_debt_payments()),
    )
}

fn system_prompt(snapshot: &FinancialSnapshot) -> String {
    format!(
        "You are a personal finance assistant for someone living in Singapore. \
         Answer briefly and concretely, in Singapore dollars. You cannot change the user's records yourself; \
         when they want to add, update or remove something, ask them to say it plainly, e.g. \
         \"I earn $6,500 a month\".\n\nCurrent balance sheet:\n{}",
        balance_sheet_summary(snapshot)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::list_pending;
    use crate::db::{insert_record, save_profile, setup_database};
    use crate::entities::{Asset, AssetCategory, Profile};
    use crate::llm::mock::MockProvider;
    use crate::llm::Role;
    use chrono::NaiveDate;

    fn db() -> Mutex<Connection> {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        Mutex::new(conn)
    }

    fn offline() -> Assistant {
        Assistant::new(None, CategoryRules::default(), CpfCalculator::new(), Assumptions::default()).unwrap()
    }

    fn ask(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let err = offline().handle(&db(), ask("   ")).await.unwrap_err();
        assert!(matches!(err, FinanceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mutation_is_queued_not_applied() {
        let db = db();
        let reply = offline()
            .handle(&db, ask("I have $20,000 in my DBS savings account"))
            .await
            .unwrap();

        let action = reply.pending_action.unwrap();
        assert!(reply.reply.contains("Shall I go ahead"));
        assert!(matches!(reply.intent, Some(FinancialIntent::AddAsset { .. })));

        let conn = db.lock().unwrap();
        assert_eq!(list_pending(&conn).unwrap()[0].id, action.id);
        assert!(crate::db::list_records::<Asset>(&conn).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cpf_answer_uses_explicit_age() {
        let reply = offline()
            .handle(&db(), ask("calculate my CPF on $6,000 salary at age 30"))
            .await
            .unwrap();

        assert!(reply.pending_action.is_none());
        let data = reply.data.unwrap();
        assert_eq!(data["employee"], 1_200.0);
        assert_eq!(data["total"], 2_220.0);
        assert!(reply.reply.contains("$1,200.00"));
    }

    #[tokio::test]
    async fn test_cpf_answer_falls_back_to_profile_age() {
        let db = db();
        {
            let conn = db.lock().unwrap();
            let mut profile = Profile {
                birth_date: NaiveDate::from_ymd_opt(1960, 1, 1),
                ..Profile::default()
            };
            save_profile(&conn, &mut profile, "test").unwrap();
        }

        // Past 60, so the lower contribution band applies
        let reply = offline()
            .handle(&db, ask("what's my CPF on $5,000"))
            .await
            .unwrap();
        let data = reply.data.unwrap();
        assert!(data["total"].as_f64().unwrap() < 5_000.0 * 0.37);
    }

    #[tokio::test]
    async fn test_cpf_without_any_age_asks_for_it() {
        let reply = offline()
            .handle(&db(), ask("what's my CPF on $5,000"))
            .await
            .unwrap();
        assert!(reply.reply.contains("How old are you"));
        assert!(reply.pending_action.is_none());
    }

    #[tokio::test]
    async fn test_projection_answer() {
        let db = db();
        {
            let conn = db.lock().unwrap();
            insert_record(&conn, &Asset::new("Savings", AssetCategory::Cash, 10_000.0), "test").unwrap();
        }
        let reply = offline()
            .handle(&db, ask("project my net worth over 5 years"))
            .await
            .unwrap();

        assert_eq!(reply.intent, Some(FinancialIntent::ProjectNetWorth { years: 5 }));
        assert!(reply.reply.starts_with("Over 5 years"));
        assert_eq!(reply.data.unwrap()["points"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_missing_details_get_a_clarifying_reply() {
        let reply = offline()
            .handle(&db(), ask("I pay $980 a month for my car loan"))
            .await
            .unwrap();
        assert!(reply.reply.starts_with("I need a bit more detail"));
        assert!(reply.pending_action.is_none());
    }

    #[tokio::test]
    async fn test_offline_small_talk_gets_help() {
        let reply = offline().handle(&db(), ask("hello")).await.unwrap();
        assert_eq!(reply.reply, HELP_TEXT);
    }

    #[tokio::test]
    async fn test_conversation_goes_to_provider_with_balance_sheet() {
        let db = db();
        {
            let conn = db.lock().unwrap();
            insert_record(&conn, &Asset::new("Savings", AssetCategory::Cash, 12_345.0), "test").unwrap();
        }

        let provider = Arc::new(MockProvider::new(vec![
            Ok(r#"{"action": "none"}"#.to_string()),
            Ok("  An ETF is a basket of securities.  ".to_string()),
        ]));
        let assistant = Assistant::new(
            Some(provider.clone() as Arc<dyn LlmProvider>),
            CategoryRules::default(),
            CpfCalculator::new(),
            Assumptions::default(),
        )
        .unwrap();
        assert!(assistant.has_provider());

        let request = ChatRequest {
            message: "what is an ETF?".to_string(),
            history: vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("Hello! How can I help?"),
            ],
        };
        let reply = assistant.handle(&db, request).await.unwrap();
        assert_eq!(reply.reply, "An ETF is a basket of securities.");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let chat = &requests[1];
        assert_eq!(chat[0].role, Role::System);
        assert!(chat[0].content.contains("$12,345.00"));
        assert_eq!(chat.len(), 4);
        assert_eq!(chat[3], ChatMessage::user("what is an ETF?"));
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_as_llm_error() {
        let provider = Arc::new(MockProvider::new(vec![
            Ok(r#"{"action": "none"}"#.to_string()),
            Err(FinanceError::Llm("503".to_string())),
        ]));
        let assistant = Assistant::new(
            Some(provider as Arc<dyn LlmProvider>),
            CategoryRules::default(),
            CpfCalculator::new(),
            Assumptions::default(),
        )
        .unwrap();

        let err = assistant.handle(&db(), ask("tell me a joke")).await.unwrap_err();
        assert!(matches!(err, FinanceError::Llm(_)));
    }
}
