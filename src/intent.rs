// 🧠 Intent Parser - chat message → structured financial action
//
// Two stages:
// 1. Extraction: the message becomes a loose RawExtraction (regex rules or the LLM)
// 2. Normalization: RawExtraction becomes a typed FinancialIntent, or a
//    Validation error naming every field that is missing or unreadable

use crate::entities::{
    AssetCategory, ExpenseCategory, Frequency, IncomeKind, LiabilityKind, RecordKind,
};
use crate::error::{FieldError, FinanceError, Result};
use crate::format::{money, percent};
use crate::llm::{ChatMessage, LlmProvider};
use crate::projection::MAX_YEARS;
use crate::rules::CategoryRules;
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

const DEFAULT_PROJECTION_YEARS: u32 = 30;

// ============================================================================
// INTENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinancialIntent {
    AddAsset {
        name: String,
        category: AssetCategory,
        value: f64,
    },
    AddLiability {
        name: String,
        kind: LiabilityKind,
        balance: f64,
        interest_rate: f64,
        monthly_payment: f64,
    },
    AddIncome {
        name: String,
        kind: IncomeKind,
        amount: f64,
        frequency: Frequency,
        cpf_applicable: bool,
    },
    AddExpense {
        name: String,
        category: ExpenseCategory,
        amount: f64,
        frequency: Frequency,
    },
    UpdateAssetValue {
        name: String,
        value: f64,
    },
    /// `kind` is None when the user only named the record
    RemoveRecord {
        kind: Option<RecordKind>,
        name: String,
    },
    CalculateCpf {
        monthly_salary: f64,
        age: Option<u32>,
    },
    ProjectNetWorth {
        years: u32,
    },
}

impl FinancialIntent {
    /// Mutations wait for confirmation; everything else is answered directly
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            FinancialIntent::CalculateCpf { .. } | FinancialIntent::ProjectNetWorth { .. }
        )
    }

    /// Confirmation sentence shown to the user
    pub fn describe(&self) -> String {
        match self {
            FinancialIntent::AddAsset { name, category, value } => {
                format!("Add asset \"{}\" ({}) worth {}", name, category.as_str(), money(*value))
            }
            FinancialIntent::AddLiability {
                name,
                kind,
                balance,
                interest_rate,
                monthly_payment,
            } => format!(
                "Add liability \"{}\" ({}) with a balance of {} at {}, paying {} a month",
                name,
                kind.as_str(),
                money(*balance),
                percent(*interest_rate),
                money(*monthly_payment)
            ),
            FinancialIntent::AddIncome {
                name,
                kind,
                amount,
                frequency,
                cpf_applicable,
            } => format!(
                "Add income \"{}\" ({}) of {} {}{}",
                name,
                kind.as_str(),
                money(*amount),
                frequency_phrase(*frequency),
                if *cpf_applicable { ", subject to CPF" } else { "" }
            ),
            FinancialIntent::AddExpense {
                name,
                category,
                amount,
                frequency,
            } => format!(
                "Add expense \"{}\" ({}) of {} {}",
                name,
                category.as_str(),
                money(*amount),
                frequency_phrase(*frequency)
            ),
            FinancialIntent::UpdateAssetValue { name, value } => {
                format!("Update asset \"{}\" to {}", name, money(*value))
            }
            FinancialIntent::RemoveRecord { kind, name } => format!(
                "Remove {} \"{}\"",
                kind.map_or("record", |k| k.as_str()),
                name
            ),
            FinancialIntent::CalculateCpf { monthly_salary, age } => match age {
                Some(age) => format!(
                    "Calculate CPF on a monthly salary of {} at age {}",
                    money(*monthly_salary),
                    age
                ),
                None => format!("Calculate CPF on a monthly salary of {}", money(*monthly_salary)),
            },
            FinancialIntent::ProjectNetWorth { years } => {
                format!("Project net worth over {} years", years)
            }
        }
    }
}

fn frequency_phrase(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Monthly => "a month",
        Frequency::Quarterly => "a quarter",
        Frequency::Annual => "a year",
        Frequency::OneOff => "once",
    }
}

// ============================================================================
// RAW EXTRACTION
// ============================================================================

/// What an extractor read out of a message, before any typing.
/// Amounts and rates stay as written ("$5k", "3.5%").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExtraction {
    /// add | update | remove | cpf | project | none
    pub action: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub amount: Option<String>,
    pub frequency: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub rate: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub payment: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub age: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub years: Option<String>,
    pub cpf: Option<bool>,
}

impl RawExtraction {
    fn action(action: &str) -> Self {
        RawExtraction {
            action: Some(action.to_string()),
            ..RawExtraction::default()
        }
    }
}

/// Accepts `"5000"`, `5000` or `null`
fn loose_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// VALUE PARSING
// ============================================================================

/// "$5k" → 5000, "1.2m" → 1_200_000, "5,000.50" → 5000.5
pub fn parse_amount(text: &str) -> Option<f64> {
    let mut s: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();

    for prefix in ["sgd", "s$", "$"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start().to_string();
        }
    }
    let s = s.trim_end_matches("dollars").trim_end_matches("sgd").trim();

    let multipliers = [
        ("million", 1_000_000.0),
        ("mil", 1_000_000.0),
        ("thousand", 1_000.0),
        ("k", 1_000.0),
        ("m", 1_000_000.0),
    ];
    let (number, multiplier) = multipliers
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(*suffix).map(|rest| (rest.trim(), *mult)))
        .unwrap_or((s, 1.0));

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier * 100.0).round() / 100.0)
}

/// "3.5%" → 0.035, "0.035" → 0.035, a bare "4" or "1" reads as percent
pub fn parse_rate(text: &str) -> Option<f64> {
    let lower = text.trim().to_lowercase();
    let lower = lower
        .trim_end_matches("p.a.")
        .trim_end_matches("per annum")
        .trim();

    let (number, explicit_percent) = match lower.strip_suffix('%') {
        Some(rest) => (rest, true),
        None => match lower.strip_suffix("percent") {
            Some(rest) => (rest, true),
            None => (lower, false),
        },
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if explicit_percent || value.abs() >= 1.0 {
        Some(value / 100.0)
    } else {
        Some(value)
    }
}

/// Frequency words, including "every month", "each year", "per annum"
pub fn parse_frequency(text: &str) -> Option<Frequency> {
    let lower = text.trim().to_lowercase();
    if let Some(found) = Frequency::parse(&lower) {
        return Some(found);
    }
    let unit = ["every ", "each ", "per ", "a ", "an "]
        .iter()
        .find_map(|p| lower.strip_prefix(*p))
        .unwrap_or(lower.as_str())
        .trim();
    match unit {
        "annum" => Some(Frequency::Annual),
        other => Frequency::parse(other),
    }
}

fn tidy_name(text: &str) -> String {
    let trimmed = text
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == '!' || c == '?' || c == ',')
        .trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Type a raw extraction. `Ok(None)` means the message asked for nothing actionable.
pub fn normalize(raw: &RawExtraction, rules: &CategoryRules) -> Result<Option<FinancialIntent>> {
    let action = raw
        .action
        .as_deref()
        .map(|a| a.trim().to_lowercase())
        .unwrap_or_default();
    // "add_asset" style actions carry their kind
    let kind_text = raw
        .kind
        .clone()
        .or_else(|| action.split_once('_').map(|(_, k)| k.to_string()));

    let mut errors = Vec::new();
    let intent = match action.split('_').next().unwrap_or("") {
        "" | "none" | "chat" | "question" => return Ok(None),
        "add" | "create" => normalize_add(raw, kind_text.as_deref(), rules, &mut errors),
        "update" | "set" => {
            let name = required_name(raw, &mut errors);
            let value = required_amount(raw.amount.as_deref(), "amount", &mut errors);
            FinancialIntent::UpdateAssetValue { name, value }
        }
        "remove" | "delete" => FinancialIntent::RemoveRecord {
            kind: kind_text.as_deref().and_then(RecordKind::parse),
            name: required_name(raw, &mut errors),
        },
        "cpf" | "calculate" => {
            let monthly_salary = required_amount(raw.amount.as_deref(), "amount", &mut errors);
            let age = match raw.age.as_deref() {
                None => None,
                Some(text) => match text.trim().parse::<u32>() {
                    Ok(age) => Some(age),
                    Err(_) => {
                        errors.push(FieldError::new("age", format!("Could not read an age from \"{}\"", text)));
                        None
                    }
                },
            };
            FinancialIntent::CalculateCpf { monthly_salary, age }
        }
        "project" | "projection" | "forecast" => {
            let years = match raw.years.as_deref() {
                None => DEFAULT_PROJECTION_YEARS,
                Some(text) => match text.trim().parse::<u32>() {
                    Ok(years) if (1..=MAX_YEARS).contains(&years) => years,
                    _ => {
                        errors.push(FieldError::new(
                            "years",
                            format!("Projection length must be 1 to {} years", MAX_YEARS),
                        ));
                        DEFAULT_PROJECTION_YEARS
                    }
                },
            };
            FinancialIntent::ProjectNetWorth { years }
        }
        other => {
            tracing::debug!(action = other, "unrecognized intent action");
            return Ok(None);
        }
    };

    if errors.is_empty() {
        Ok(Some(intent))
    } else {
        Err(FinanceError::Validation(errors))
    }
}

fn normalize_add(
    raw: &RawExtraction,
    kind_text: Option<&str>,
    rules: &CategoryRules,
    errors: &mut Vec<FieldError>,
) -> FinancialIntent {
    let category = raw.category.as_deref();
    let frequency = optional_frequency(raw.frequency.as_deref(), errors);

    match kind_text.and_then(RecordKind::parse) {
        Some(RecordKind::Asset) => {
            let name = required_name(raw, errors);
            FinancialIntent::AddAsset {
                category: resolve(rules, RecordKind::Asset, category, &name).unwrap_or(AssetCategory::Other),
                value: required_amount(raw.amount.as_deref(), "amount", errors),
                name,
            }
        }
        Some(RecordKind::Liability) => {
            let name = required_name(raw, errors);
            FinancialIntent::AddLiability {
                kind: resolve(rules, RecordKind::Liability, category, &name).unwrap_or(LiabilityKind::Other),
                balance: required_amount(raw.amount.as_deref(), "amount", errors),
                interest_rate: optional_rate(raw.rate.as_deref(), errors),
                monthly_payment: match raw.payment.as_deref() {
                    None => 0.0,
                    Some(text) => required_amount(Some(text), "payment", errors),
                },
                name,
            }
        }
        Some(RecordKind::Income) => {
            let named = raw.name.as_deref().map(tidy_name).filter(|n| !n.is_empty());
            let (name, kind) = match named {
                Some(name) => {
                    let kind = resolve(rules, RecordKind::Income, category, &name).unwrap_or(IncomeKind::Other);
                    (name, kind)
                }
                None => {
                    let kind = resolve(rules, RecordKind::Income, category, "").unwrap_or(IncomeKind::Salary);
                    (tidy_name(kind.as_str()), kind)
                }
            };
            FinancialIntent::AddIncome {
                amount: required_amount(raw.amount.as_deref(), "amount", errors),
                frequency,
                cpf_applicable: kind.is_employment() && raw.cpf.unwrap_or(true),
                kind,
                name,
            }
        }
        Some(RecordKind::Expense) => {
            let name = required_name(raw, errors);
            FinancialIntent::AddExpense {
                category: resolve(rules, RecordKind::Expense, category, &name).unwrap_or(ExpenseCategory::Other),
                amount: required_amount(raw.amount.as_deref(), "amount", errors),
                frequency,
                name,
            }
        }
        Some(RecordKind::Scenario) => {
            errors.push(FieldError::new(
                "kind",
                "Property scenarios are set up with the scenario planner, not in chat",
            ));
            FinancialIntent::AddAsset {
                name: String::new(),
                category: AssetCategory::Other,
                value: 0.0,
            }
        }
        None => {
            errors.push(FieldError::new(
                "kind",
                "Say whether this is an asset, liability, income or expense",
            ));
            FinancialIntent::AddAsset {
                name: String::new(),
                category: AssetCategory::Other,
                value: 0.0,
            }
        }
    }
}

/// Exact enum tag first ("car_loan"), then the category rules over the text
fn resolve<T: DeserializeOwned>(
    rules: &CategoryRules,
    kind: RecordKind,
    category: Option<&str>,
    name: &str,
) -> Option<T> {
    let from_tag = |tag: &str| {
        let tag = tag.trim().to_lowercase().replace(|c: char| c == ' ' || c == '-', "_");
        serde_json::from_value::<T>(serde_json::Value::String(tag)).ok()
    };

    if let Some(found) = category.and_then(|c| from_tag(c)) {
        return Some(found);
    }
    let text = match category {
        Some(c) => format!("{} {}", c, name),
        None => name.to_string(),
    };
    rules.classify(kind, &text).and_then(|m| from_tag(&m.category))
}

fn required_name(raw: &RawExtraction, errors: &mut Vec<FieldError>) -> String {
    let name = raw.name.as_deref().map(tidy_name).unwrap_or_default();
    if name.is_empty() {
        errors.push(FieldError::new("name", "Missing a name for the record"));
    }
    name
}

fn required_amount(text: Option<&str>, field: &str, errors: &mut Vec<FieldError>) -> f64 {
    match text {
        None => {
            errors.push(FieldError::new(field, "Missing amount"));
            0.0
        }
        Some(text) => parse_amount(text).unwrap_or_else(|| {
            errors.push(FieldError::new(field, format!("Could not read an amount from \"{}\"", text)));
            0.0
        }),
    }
}

fn optional_rate(text: Option<&str>, errors: &mut Vec<FieldError>) -> f64 {
    match text {
        None => 0.0,
        Some(text) => parse_rate(text).unwrap_or_else(|| {
            errors.push(FieldError::new("rate", format!("Could not read a rate from \"{}\"", text)));
            0.0
        }),
    }
}

fn optional_frequency(text: Option<&str>, errors: &mut Vec<FieldError>) -> Frequency {
    match text {
        None => Frequency::Monthly,
        Some(text) => parse_frequency(text).unwrap_or_else(|| {
            errors.push(FieldError::new("frequency", format!("Unknown frequency \"{}\"", text)));
            Frequency::Monthly
        }),
    }
}

// ============================================================================
// EXTRACTORS
// ============================================================================

#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, message: &str) -> Result<RawExtraction>;
}

// Pattern fragments spliced into the rule regexes
const AMOUNT: &str = r"(?:s?\$|sgd\s?)?\d[\d,]*(?:\.\d+)?(?:\s?(?:k|m|mil|million|thousand)\b)?";
const FREQ: &str = r"((?:a|per|every|each)\s+(?:month|year|quarter|annum)|monthly|annually|yearly|quarterly|p\.a\.)";

/// Leading words dropped from a matched liability name
const FILLER: &[&str] = &[
    "i", "have", "has", "had", "a", "an", "my", "the", "owe", "on", "took", "out", "got", "of",
    "for", "also", "still", "and",
];

fn build(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let expanded = pattern.replace("{AMOUNT}", AMOUNT).replace("{FREQ}", FREQ);
    Regex::new(&format!("(?i){}", expanded))
}

fn group(caps: &Captures, index: usize) -> Option<String> {
    caps.get(index)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Regex extraction over common phrasings. Works offline and is the
/// fallback when the LLM is unavailable.
pub struct RuleExtractor {
    amount: Regex,
    age: Regex,
    years: Regex,
    rate: Regex,
    cpf: Regex,
    projection: Regex,
    remove: Regex,
    update: Regex,
    worth_now: Regex,
    explicit_add: Regex,
    liability_keyword: Regex,
    liability_name: Regex,
    payment: Regex,
    expense: Regex,
    income: Regex,
    asset_held_in: Regex,
    asset_worth: Regex,
    possessive: Regex,
    income_words: Regex,
}

impl RuleExtractor {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        Ok(RuleExtractor {
            amount: build(r"({AMOUNT})")?,
            age: build(r"\b(?:age|aged|am)\s+(\d{1,3})\b|\b(\d{1,3})\s*(?:years?\s+old|yo|y/o)\b")?,
            years: build(r"\b(\d{1,3})\s*(?:years?|yrs?)\b")?,
            rate: build(r"\d+(?:\.\d+)?\s*%")?,
            cpf: build(r"\bcpf\b")?,
            projection: build(
                r"\b(?:project|projection|forecast|simulate)\b|\bnet\s*worth\b.*\b(?:in|over|after)\s+\d{1,3}\s*(?:years?|yrs?)\b",
            )?,
            remove: build(
                r"^\s*(?:please\s+)?(?:remove|delete|drop)\s+(?:(?:my|the)\s+)?(?:(asset|liability|income|expense|scenario)\s+)?(.+?)\s*[.!]?\s*$",
            )?,
            update: build(r"\b(?:update|set|change)\s+(?:(?:my|the)\s+)?(.+?)\s+(?:value\s+)?(?:to|=)\s+({AMOUNT})")?,
            worth_now: build(r"\bmy\s+(.+?)\s+is\s+now\s+(?:worth\s+)?({AMOUNT})")?,
            explicit_add: build(
                r"\badd\s+(?:an?\s+|my\s+)?(asset|liability|income|expense)\s*:?\s+(.+?)\s+(?:worth|of|for|at|=|:)?\s*({AMOUNT})\s*(?:{FREQ})?\s*[.!]?\s*$",
            )?,
            liability_keyword: build(r"\b(?:loan|mortgage|debt|owe|credit\s+card)\b")?,
            liability_name: build(r"\b((?:[a-z]+\s+){0,3}(?:loan|mortgage|credit\s+card|debt))\b")?,
            payment: build(
                r"\b(?:paying|pay|payments?\s+of|instal+ments?\s+of|repaying|repayments?\s+of)\s+(?:about\s+)?({AMOUNT})",
            )?,
            expense: build(
                r"\bi\s+(?:spend|pay)\s+(?:about\s+|around\s+)?({AMOUNT})\s*(?:{FREQ})?\s+(?:on|for)\s+(?:my\s+|the\s+)?(.+?)(?:\s+{FREQ})?\s*[.!]?\s*$",
            )?,
            income: build(
                r"\bi\s+(?:earn|make|get\s+paid|receive|take\s+home)\s+(?:about\s+|around\s+)?({AMOUNT})\s*(?:{FREQ})?(?:\s+(?:from|as|in|at|through)\s+(?:my\s+|a\s+|an\s+|the\s+)?(.+?))?(?:\s+{FREQ})?\s*[.!]?\s*$",
            )?,
            asset_held_in: build(
                r"\bi\s+have\s+(?:about\s+|around\s+)?({AMOUNT})\s+(?:in|at|with|invested\s+in)\s+(?:my\s+|an?\s+|the\s+)?(.+?)\s*[.!]?\s*$",
            )?,
            asset_worth: build(
                r"\b(?:add|i\s+have|i\s+own|record)\s+(?:an?\s+|my\s+|the\s+|some\s+)?(.+?)\s+(?:worth|valued\s+at|of|with|at|=|:)\s+(?:about\s+|around\s+)?({AMOUNT})\s*[.!]?\s*$",
            )?,
            possessive: build(
                r"\bmy\s+(.+?)\s+(?:is|are|costs?|pays?|comes\s+to)\s+(?:about\s+|around\s+)?({AMOUNT})\s*(?:{FREQ})?",
            )?,
            income_words: build(r"\b(?:salary|income|bonus|wages?|pay|dividends?|rental|allowance|commission)\b")?,
        })
    }

    /// Synchronous core, shared with the LLM fallback path
    pub fn extract_text(&self, message: &str) -> RawExtraction {
        let text = message.trim();

        if let Some(caps) = self.remove.captures(text) {
            return self.removal(&caps);
        }
        if self.cpf.is_match(text) {
            if let Some(raw) = self.cpf_request(text) {
                return raw;
            }
        }
        if self.projection.is_match(text) {
            return RawExtraction {
                years: self.years.captures(text).and_then(|c| group(&c, 1)),
                ..RawExtraction::action("project")
            };
        }
        if let Some(caps) = self.update.captures(text).or_else(|| self.worth_now.captures(text)) {
            return RawExtraction {
                kind: Some("asset".to_string()),
                name: group(&caps, 1),
                amount: group(&caps, 2),
                ..RawExtraction::action("update")
            };
        }
        if let Some(caps) = self.explicit_add.captures(text) {
            let kind = group(&caps, 1).unwrap_or_default().to_lowercase();
            if kind == "liability" {
                return self.liability(text, group(&caps, 2));
            }
            return RawExtraction {
                kind: Some(kind),
                name: group(&caps, 2),
                amount: group(&caps, 3),
                frequency: group(&caps, 4),
                ..RawExtraction::action("add")
            };
        }
        if self.liability_keyword.is_match(text) {
            return self.liability(text, None);
        }
        if let Some(caps) = self.expense.captures(text) {
            return RawExtraction {
                kind: Some("expense".to_string()),
                amount: group(&caps, 1),
                frequency: group(&caps, 2).or_else(|| group(&caps, 4)),
                name: group(&caps, 3),
                ..RawExtraction::action("add")
            };
        }
        if let Some(caps) = self.income.captures(text) {
            return RawExtraction {
                kind: Some("income".to_string()),
                amount: group(&caps, 1),
                frequency: group(&caps, 2).or_else(|| group(&caps, 4)),
                name: group(&caps, 3),
                ..RawExtraction::action("add")
            };
        }
        if let Some(caps) = self.asset_held_in.captures(text) {
            return RawExtraction {
                kind: Some("asset".to_string()),
                amount: group(&caps, 1),
                name: group(&caps, 2),
                ..RawExtraction::action("add")
            };
        }
        if let Some(caps) = self.asset_worth.captures(text) {
            return RawExtraction {
                kind: Some("asset".to_string()),
                name: group(&caps, 1),
                amount: group(&caps, 2),
                ..RawExtraction::action("add")
            };
        }
        if let Some(caps) = self.possessive.captures(text) {
            let name = group(&caps, 1).unwrap_or_default();
            let frequency = group(&caps, 3);
            let kind = if self.income_words.is_match(&name) {
                "income"
            } else if frequency.is_some() {
                "expense"
            } else {
                "asset"
            };
            return RawExtraction {
                kind: Some(kind.to_string()),
                name: Some(name),
                amount: group(&caps, 2),
                frequency,
                ..RawExtraction::action("add")
            };
        }

        RawExtraction::action("none")
    }

    fn removal(&self, caps: &Captures) -> RawExtraction {
        let mut kind = group(caps, 1);
        let mut name = group(caps, 2).unwrap_or_default();
        // "remove the Netflix expense"
        if kind.is_none() {
            if let Some((head, tail)) = name.rsplit_once(' ') {
                let tail = tail.to_lowercase();
                if ["asset", "liability", "income", "expense", "scenario"].contains(&tail.as_str()) {
                    kind = Some(tail);
                    name = head.trim().to_string();
                }
            }
        }
        RawExtraction {
            kind,
            name: Some(name),
            ..RawExtraction::action("remove")
        }
    }

    fn cpf_request(&self, text: &str) -> Option<RawExtraction> {
        let age = self
            .age
            .captures(text)
            .and_then(|c| group(&c, 1).or_else(|| group(&c, 2)));
        // Drop the age phrase so "age 30" isn't read as the salary
        let without_age = self.age.replace_all(text, " ");
        let amount = self.amount.captures(&without_age).and_then(|c| group(&c, 1))?;
        Some(RawExtraction {
            amount: Some(amount),
            age,
            ..RawExtraction::action("cpf")
        })
    }

    fn liability(&self, text: &str, name: Option<String>) -> RawExtraction {
        let rate = self.rate.find(text).map(|m| m.as_str().to_string());
        let payment = self.payment.captures(text).and_then(|c| group(&c, 1));

        // Balance is the first amount that isn't the rate or the payment
        let rest = self.rate.replace_all(text, " ");
        let rest = self.payment.replace_all(&rest, " ");
        let balance = self.amount.captures(&rest).and_then(|c| group(&c, 1));

        let name = name.or_else(|| {
            self.liability_name
                .captures(text)
                .and_then(|c| group(&c, 1))
                .map(|n| strip_filler(&n))
        });

        RawExtraction {
            kind: Some("liability".to_string()),
            name,
            amount: balance,
            rate,
            payment,
            ..RawExtraction::action("add")
        }
    }
}

fn strip_filler(phrase: &str) -> String {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let skip = words
        .iter()
        .take(words.len().saturating_sub(1))
        .take_while(|w| FILLER.contains(&w.to_lowercase().as_str()))
        .count();
    words[skip..].join(" ")
}

#[async_trait]
impl IntentExtractor for RuleExtractor {
    async fn extract(&self, message: &str) -> Result<RawExtraction> {
        Ok(self.extract_text(message))
    }
}

const EXTRACTION_PROMPT: &str = "You turn personal-finance chat messages into JSON. \
Reply with exactly one JSON object and nothing else, using these keys: \
action (add | update | remove | cpf | project | none), \
kind (asset | liability | income | expense), name, category, amount, \
frequency (monthly | quarterly | annual | once), rate, payment, age, years, cpf (true or false). \
Use null for anything the message does not say. Copy amounts and rates as written, e.g. \"$5k\" or \"3.5%\". \
Questions and small talk are action none.";

/// Asks the provider for strict JSON; any provider or parse failure falls
/// back to the rule extractor
pub struct LlmExtractor {
    provider: Arc<dyn LlmProvider>,
    fallback: RuleExtractor,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, fallback: RuleExtractor) -> Self {
        LlmExtractor { provider, fallback }
    }
}

#[async_trait]
impl IntentExtractor for LlmExtractor {
    async fn extract(&self, message: &str) -> Result<RawExtraction> {
        let messages = [ChatMessage::system(EXTRACTION_PROMPT), ChatMessage::user(message)];

        let parsed = match self.provider.complete(&messages).await {
            Ok(reply) => parse_extraction(&reply),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(raw) => Ok(raw),
            Err(e) => {
                tracing::warn!(error = %e, model = self.provider.model(), "llm extraction failed, using rules");
                Ok(self.fallback.extract_text(message))
            }
        }
    }
}

/// Pull the JSON object out of a reply, tolerating ```json fences and chatter
pub fn parse_extraction(reply: &str) -> Result<RawExtraction> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if end > start => &reply[start..=end],
        _ => return Err(FinanceError::Llm("reply contained no JSON object".to_string())),
    };
    serde_json::from_str(body).map_err(|e| FinanceError::Llm(format!("unparseable extraction: {}", e)))
}

// ============================================================================
// PARSER
// ============================================================================

/// Extraction followed by normalization
pub struct IntentParser {
    extractor: Box<dyn IntentExtractor>,
    rules: CategoryRules,
}

impl IntentParser {
    pub fn new(extractor: Box<dyn IntentExtractor>, rules: CategoryRules) -> Self {
        IntentParser { extractor, rules }
    }

    pub async fn parse(&self, message: &str) -> Result<Option<FinancialIntent>> {
        let raw = self.extractor.extract(message).await?;
        tracing::debug!(?raw, "extracted intent");
        normalize(&raw, &self.rules)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockProvider;

    fn parse(message: &str) -> Result<Option<FinancialIntent>> {
        let extractor = RuleExtractor::new().unwrap();
        normalize(&extractor.extract_text(message), &CategoryRules::default())
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$5k"), Some(5_000.0));
        assert_eq!(parse_amount("1.2m"), Some(1_200_000.0));
        assert_eq!(parse_amount("5,000.50"), Some(5_000.5));
        assert_eq!(parse_amount("S$ 800"), Some(800.0));
        assert_eq!(parse_amount("2 million"), Some(2_000_000.0));
        assert_eq!(parse_amount("lots"), None);
        assert_eq!(parse_amount("-5"), None);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("3.5%"), Some(0.035));
        assert_eq!(parse_rate("0.035"), Some(0.035));
        assert_eq!(parse_rate("4"), Some(0.04));
        assert_eq!(parse_rate("1"), Some(0.01));
        assert_eq!(parse_rate("1.0"), Some(0.01));
        assert_eq!(parse_rate("0.5"), Some(0.5));
        assert_eq!(parse_rate("2.75% p.a."), Some(0.0275));
        assert_eq!(parse_rate("high"), None);
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency("a month"), Some(Frequency::Monthly));
        assert_eq!(parse_frequency("every quarter"), Some(Frequency::Quarterly));
        assert_eq!(parse_frequency("per annum"), Some(Frequency::Annual));
        assert_eq!(parse_frequency("each year"), Some(Frequency::Annual));
        assert_eq!(parse_frequency("once"), Some(Frequency::OneOff));
        assert_eq!(parse_frequency("fortnightly"), None);
    }

    #[test]
    fn test_asset_phrasings() {
        assert_eq!(
            parse("I have a condo worth $1.2m").unwrap(),
            Some(FinancialIntent::AddAsset {
                name: "Condo".to_string(),
                category: AssetCategory::Property,
                value: 1_200_000.0,
            })
        );
        assert_eq!(
            parse("I have $20,000 in my DBS savings account").unwrap(),
            Some(FinancialIntent::AddAsset {
                name: "DBS savings account".to_string(),
                category: AssetCategory::Cash,
                value: 20_000.0,
            })
        );
    }

    #[test]
    fn test_income_phrasing() {
        assert_eq!(
            parse("I earn $6,500 a month").unwrap(),
            Some(FinancialIntent::AddIncome {
                name: "Salary".to_string(),
                kind: IncomeKind::Salary,
                amount: 6_500.0,
                frequency: Frequency::Monthly,
                cpf_applicable: true,
            })
        );

        match parse("I receive $1,200 in dividends annually").unwrap() {
            Some(FinancialIntent::AddIncome { kind, frequency, cpf_applicable, .. }) => {
                assert_eq!(kind, IncomeKind::Dividend);
                assert_eq!(frequency, Frequency::Annual);
                assert!(!cpf_applicable);
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_expense_phrasings() {
        assert_eq!(
            parse("I spend $600 a month on groceries").unwrap(),
            Some(FinancialIntent::AddExpense {
                name: "Groceries".to_string(),
                category: ExpenseCategory::Food,
                amount: 600.0,
                frequency: Frequency::Monthly,
            })
        );

        match parse("I spend 200 on transport monthly").unwrap() {
            Some(FinancialIntent::AddExpense { name, category, frequency, .. }) => {
                assert_eq!(name, "Transport");
                assert_eq!(category, ExpenseCategory::Transport);
                assert_eq!(frequency, Frequency::Monthly);
            }
            other => panic!("unexpected intent: {:?}", other),
        }

        match parse("add expense Netflix 20 a month").unwrap() {
            Some(FinancialIntent::AddExpense { name, category, amount, .. }) => {
                assert_eq!(name, "Netflix");
                assert_eq!(category, ExpenseCategory::Entertainment);
                assert_eq!(amount, 20.0);
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_liability_phrasing() {
        assert_eq!(
            parse("My car loan is $30k at 2.5%, paying $650 a month").unwrap(),
            Some(FinancialIntent::AddLiability {
                name: "Car loan".to_string(),
                kind: LiabilityKind::CarLoan,
                balance: 30_000.0,
                interest_rate: 0.025,
                monthly_payment: 650.0,
            })
        );

        match parse("I owe $5,000 on my credit card").unwrap() {
            Some(FinancialIntent::AddLiability { name, kind, balance, .. }) => {
                assert_eq!(name, "Credit card");
                assert_eq!(kind, LiabilityKind::CreditCard);
                assert_eq!(balance, 5_000.0);
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_liability_without_balance_is_a_validation_error() {
        match parse("I pay $980 a month for my car loan") {
            Err(FinanceError::Validation(errors)) => assert_eq!(errors[0].field, "amount"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_update_and_remove() {
        assert_eq!(
            parse("update my DBS savings to $45,000").unwrap(),
            Some(FinancialIntent::UpdateAssetValue {
                name: "DBS savings".to_string(),
                value: 45_000.0,
            })
        );
        assert_eq!(
            parse("remove my car loan").unwrap(),
            Some(FinancialIntent::RemoveRecord {
                kind: None,
                name: "Car loan".to_string(),
            })
        );
        assert_eq!(
            parse("delete the Netflix expense").unwrap(),
            Some(FinancialIntent::RemoveRecord {
                kind: Some(RecordKind::Expense),
                name: "Netflix".to_string(),
            })
        );
    }

    #[test]
    fn test_read_only_requests() {
        let cpf = parse("calculate my CPF on $6,000 salary at age 30").unwrap().unwrap();
        assert_eq!(
            cpf,
            FinancialIntent::CalculateCpf {
                monthly_salary: 6_000.0,
                age: Some(30),
            }
        );
        assert!(!cpf.is_mutation());

        assert_eq!(
            parse("project my net worth over 20 years").unwrap(),
            Some(FinancialIntent::ProjectNetWorth { years: 20 })
        );
        assert_eq!(
            parse("can you forecast my finances").unwrap(),
            Some(FinancialIntent::ProjectNetWorth { years: 30 })
        );
    }

    #[test]
    fn test_small_talk_is_not_an_intent() {
        assert_eq!(parse("hello there").unwrap(), None);
        assert_eq!(parse("what is an ETF?").unwrap(), None);
    }

    #[test]
    fn test_normalize_reports_every_missing_field() {
        let raw = RawExtraction {
            kind: Some("expense".to_string()),
            frequency: Some("fortnightly".to_string()),
            ..RawExtraction::action("add")
        };
        match normalize(&raw, &CategoryRules::default()) {
            Err(FinanceError::Validation(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"frequency"));
                assert!(fields.contains(&"name"));
                assert!(fields.contains(&"amount"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_accepts_tagged_actions_and_categories() {
        let raw = RawExtraction {
            name: Some("mortgage with OCBC".to_string()),
            category: Some("mortgage".to_string()),
            amount: Some("480000".to_string()),
            rate: Some("0.026".to_string()),
            payment: Some("$2,100".to_string()),
            ..RawExtraction::action("add_liability")
        };
        match normalize(&raw, &CategoryRules::default()).unwrap() {
            Some(FinancialIntent::AddLiability { kind, interest_rate, monthly_payment, .. }) => {
                assert_eq!(kind, LiabilityKind::Mortgage);
                assert_eq!(interest_rate, 0.026);
                assert_eq!(monthly_payment, 2_100.0);
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_numeric_rate_of_one_is_one_percent() {
        let raw = parse_extraction(
            r#"{"action": "add", "kind": "liability", "name": "Car loan", "amount": 20000, "rate": 1}"#,
        )
        .unwrap();
        match normalize(&raw, &CategoryRules::default()).unwrap() {
            Some(FinancialIntent::AddLiability { kind, balance, interest_rate, .. }) => {
                assert_eq!(kind, LiabilityKind::CarLoan);
                assert_eq!(balance, 20_000.0);
                assert_eq!(interest_rate, 0.01);
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_projection_years_are_bounded() {
        let raw = RawExtraction {
            years: Some("500".to_string()),
            ..RawExtraction::action("project")
        };
        assert!(matches!(
            normalize(&raw, &CategoryRules::default()),
            Err(FinanceError::Validation(_))
        ));
    }

    #[test]
    fn test_describe() {
        let intent = FinancialIntent::AddLiability {
            name: "Car loan".to_string(),
            kind: LiabilityKind::CarLoan,
            balance: 30_000.0,
            interest_rate: 0.025,
            monthly_payment: 650.0,
        };
        assert_eq!(
            intent.describe(),
            "Add liability \"Car loan\" (car_loan) with a balance of $30,000.00 at 2.5%, paying $650.00 a month"
        );
        assert!(intent.is_mutation());
    }

    #[test]
    fn test_parse_extraction_tolerates_fences() {
        let reply = "```json\n{\"action\": \"add\", \"kind\": \"asset\", \"name\": \"Gold\", \"amount\": 5000}\n```";
        let raw = parse_extraction(reply).unwrap();
        assert_eq!(raw.amount.as_deref(), Some("5000"));
        assert!(parse_extraction("no json here").is_err());
    }

    #[tokio::test]
    async fn test_llm_extractor_uses_provider_json() {
        let provider = Arc::new(MockProvider::new(vec![Ok(
            r#"{"action": "add", "kind": "asset", "name": "Gold bars", "amount": "$5k", "rate": null}"#.to_string(),
        )]));
        let parser = IntentParser::new(
            Box::new(LlmExtractor::new(provider.clone(), RuleExtractor::new().unwrap())),
            CategoryRules::default(),
        );

        let intent = parser.parse("I bought some gold").await.unwrap();
        assert_eq!(
            intent,
            Some(FinancialIntent::AddAsset {
                name: "Gold bars".to_string(),
                category: AssetCategory::Other,
                value: 5_000.0,
            })
        );
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0][0].content, EXTRACTION_PROMPT);
    }

    #[tokio::test]
    async fn test_llm_extractor_falls_back_to_rules() {
        let provider = Arc::new(MockProvider::new(vec![
            Err(FinanceError::Llm("timeout".to_string())),
            Ok("Sure! Happy to help.".to_string()),
        ]));
        let extractor = LlmExtractor::new(provider, RuleExtractor::new().unwrap());

        let raw = extractor.extract("I earn $6,500 a month").await.unwrap();
        assert_eq!(raw.kind.as_deref(), Some("income"));

        let raw = extractor.extract("I spend $600 a month on groceries").await.unwrap();
        assert_eq!(raw.kind.as_deref(), Some("expense"));
    }
}
