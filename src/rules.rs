// 🏷️ Category Rules - Rules as Data
// Pattern matching that maps free-text names ("my DBS savings", "HDB loan")
// to the category enum of each record kind

use crate::entities::RecordKind;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Rule ID for tracking
    pub id: String,

    /// Record kind the rule applies to
    pub kind: RecordKind,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Category tag, in the serialized form of the kind's enum ("cash", "car_loan", ...)
    pub category: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Priority (higher = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    0
}

impl CategoryRule {
    fn new(id: &str, kind: RecordKind, pattern: &str, category: &str, priority: i32) -> Self {
        CategoryRule {
            id: id.to_string(),
            kind,
            pattern: pattern.to_string(),
            category: category.to_string(),
            confidence: if pattern.contains('*') { 0.8 } else { 0.9 },
            priority,
        }
    }

    /// Case-insensitive substring match. `*` joins pieces that must appear
    /// in order anywhere in the text: "bank loan for*flat" matches
    /// "my bank loan for the flat".
    pub fn matches(&self, text: &str) -> bool {
        let pattern_lower = self.pattern.to_lowercase();
        let text_lower = text.to_lowercase();

        let mut rest = text_lower.as_str();
        for part in pattern_lower.split('*').filter(|p| !p.is_empty()) {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
        true
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatch {
    pub category: String,
    pub confidence: f64,
    pub rule_id: String,
}

// ============================================================================
// RULE SET
// ============================================================================

pub struct CategoryRules {
    rules: Vec<CategoryRule>,
}

impl CategoryRules {
    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<CategoryRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(CategoryRules::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        // Sort by priority (higher first); stable so file order breaks ties
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        CategoryRules { rules }
    }

    pub fn add_rule(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// First matching rule for this kind, highest priority first
    pub fn classify(&self, kind: RecordKind, text: &str) -> Option<CategoryMatch> {
        self.rules
            .iter()
            .filter(|rule| rule.kind == kind)
            .find(|rule| rule.matches(text))
            .map(|rule| CategoryMatch {
                category: rule.category.clone(),
                confidence: rule.confidence,
                rule_id: rule.id.clone(),
            })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for CategoryRules {
    /// Built-in vocabulary for Singapore personal finance
    fn default() -> Self {
        use RecordKind::*;

        let table: &[(RecordKind, &str, &[&str], i32)] = &[
            (Asset, "cash", &["saving", "bank", "fixed deposit", "cash", "emergency fund", "current account"], 10),
            (Asset, "investment", &["stock", "share", "etf", "bond", "fund", "crypto", "brokerage", "portfolio", "invest", "t-bill", "ssb"], 10),
            (Asset, "property", &["hdb", "condo", "flat", "house", "property", "apartment", "landed"], 10),
            (Asset, "retirement", &["srs", "pension", "retirement", "annuity"], 10),
            (Asset, "vehicle", &["car", "motorbike", "motorcycle", "vehicle"], 5),
            (Liability, "mortgage", &["mortgage", "home loan", "housing loan", "hdb loan", "bank loan for*flat"], 20),
            (Liability, "car_loan", &["car loan", "auto loan", "vehicle loan", "car financing"], 20),
            (Liability, "student_loan", &["student", "study loan", "tuition loan", "education loan"], 20),
            (Liability, "credit_card", &["credit card", "card"], 10),
            (Liability, "personal_loan", &["personal loan", "renovation loan", "loan"], 5),
            (Income, "bonus", &["bonus", "13th month", "aws"], 20),
            (Income, "rental", &["rent"], 15),
            (Income, "dividend", &["dividend", "coupon", "interest"], 15),
            (Income, "business", &["business", "freelance", "side hustle", "consulting"], 15),
            (Income, "salary", &["salary", "wage", "pay", "job", "work"], 10),
            (Expense, "insurance", &["insurance", "premium"], 20),
            (Expense, "housing", &["rent", "housing", "conservancy", "mortgage", "renovation"], 15),
            (Expense, "food", &["food", "grocer", "dining", "restaurant", "meal", "hawker", "coffee"], 10),
            (Expense, "transport", &["transport", "grab", "taxi", "mrt", "bus", "petrol", "fuel", "parking", "erp"], 10),
            (Expense, "utilities", &["electric", "water", "utilit", "phone", "mobile", "internet", "broadband"], 10),
            (Expense, "healthcare", &["medical", "doctor", "clinic", "health", "dental", "hospital"], 10),
            (Expense, "education", &["school", "tuition", "course", "education", "childcare", "preschool"], 10),
            (Expense, "entertainment", &["movie", "netflix", "spotify", "travel", "holiday", "entertainment", "hobby", "gym"], 5),
        ];

        let mut rules = Vec::new();
        for (kind, category, patterns, priority) in table {
            for (i, pattern) in patterns.iter().enumerate() {
                rules.push(CategoryRule::new(
                    &format!("{}.{}.{}", kind.as_str(), category, i),
                    *kind,
                    pattern,
                    category,
                    *priority,
                ));
            }
        }
        CategoryRules::from_rules(rules)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_pattern_match() {
        let rule = CategoryRule::new("t1", RecordKind::Asset, "hdb", "property", 0);
        assert!(rule.matches("My HDB flat"));
        assert!(!rule.matches("Condo"));
    }

    #[test]
    fn test_wildcard_pattern_match() {
        let rule = CategoryRule::new("t2", RecordKind::Liability, "bank loan for*flat", "mortgage", 0);
        assert!(rule.matches("bank loan for my flat"));
        assert!(rule.matches("My bank loan for the flat in Punggol"));
        assert!(!rule.matches("bank loan for a car"));
        assert!(!rule.matches("flat bought with a bank loan for cash"));

        let middle = CategoryRule::new("t3", RecordKind::Expense, "*net*", "utilities", 0);
        assert!(middle.matches("Internet bill"));

        let rules = CategoryRules::default();
        let found = rules
            .classify(RecordKind::Liability, "my bank loan for the flat")
            .unwrap();
        assert_eq!(found.category, "mortgage");
    }

    #[test]
    fn test_default_rules_prefer_specific_matches() {
        let rules = CategoryRules::default();
        let car_loan = rules.classify(RecordKind::Liability, "Car loan with DBS").unwrap();
        assert_eq!(car_loan.category, "car_loan");

        let card = rules.classify(RecordKind::Liability, "Citi credit card").unwrap();
        assert_eq!(card.category, "credit_card");

        let bonus = rules.classify(RecordKind::Income, "year end bonus pay").unwrap();
        assert_eq!(bonus.category, "bonus");

        let rent_in = rules.classify(RecordKind::Income, "Room rental").unwrap();
        assert_eq!(rent_in.category, "rental");

        let rent_out = rules.classify(RecordKind::Expense, "Room rent").unwrap();
        assert_eq!(rent_out.category, "housing");
    }

    #[test]
    fn test_rules_are_scoped_by_kind() {
        let rules = CategoryRules::default();
        assert_eq!(rules.classify(RecordKind::Asset, "Savings account").unwrap().category, "cash");
        assert!(rules.classify(RecordKind::Scenario, "Savings account").is_none());
        assert!(rules.classify(RecordKind::Asset, "zzz").is_none());
    }

    #[test]
    fn test_add_rule_respects_priority() {
        let mut rules = CategoryRules::from_rules(vec![]);
        rules.add_rule(CategoryRule::new("low", RecordKind::Expense, "gym", "entertainment", 1));
        rules.add_rule(CategoryRule::new("high", RecordKind::Expense, "gym", "healthcare", 9));
        assert_eq!(rules.rule_count(), 2);
        assert_eq!(rules.classify(RecordKind::Expense, "gym membership").unwrap().rule_id, "high");
    }

    #[test]
    fn test_rules_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(
            &path,
            r#"[{"id": "r1", "kind": "asset", "pattern": "gold", "category": "other", "confidence": 0.7}]"#,
        )
        .unwrap();
        let rules = CategoryRules::from_file(&path).unwrap();
        let found = rules.classify(RecordKind::Asset, "Gold bars").unwrap();
        assert_eq!(found.category, "other");
        assert_eq!(found.confidence, 0.7);
    }
}
