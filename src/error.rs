// Domain errors shared by the store, calculators and the assistant.
// Binaries wrap these in anyhow at their edges.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single failed field check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum FinanceError {
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("llm provider error: {0}")]
    Llm(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FinanceError {
    /// Shorthand for a one-field validation failure
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        FinanceError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        FinanceError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, FinanceError>;

/// Collects field errors and turns them into a `Validation` error if any were pushed
#[derive(Debug, Default)]
pub struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    pub fn non_empty(&mut self, value: &str, field: &str) -> &mut Self {
        self.require(!value.trim().is_empty(), field, "Required field is empty")
    }

    pub fn amount(&mut self, value: f64, field: &str) -> &mut Self {
        self.require(
            value.is_finite() && value >= 0.0,
            field,
            "Must be a finite, non-negative amount",
        )
    }

    /// Annual rates are fractions: 0.035 means 3.5%
    pub fn rate(&mut self, value: f64, field: &str) -> &mut Self {
        self.require(
            value.is_finite() && value > -1.0 && value <= 1.0,
            field,
            "Rate must be a fraction in (-1, 1]",
        )
    }

    pub fn finish(&mut self) -> std::result::Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_fields() {
        let err = FinanceError::Validation(vec![
            FieldError::new("name", "Required field is empty"),
            FieldError::new("value", "Must be a finite, non-negative amount"),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("validation failed"));
        assert!(message.contains("name: Required field is empty"));
        assert!(message.contains("value: Must be"));
    }

    #[test]
    fn test_checks_collects_all_failures() {
        let result = Checks::new()
            .non_empty("  ", "name")
            .amount(-1.0, "value")
            .rate(2.0, "growth_rate")
            .amount(10.0, "ok")
            .finish();

        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field, "name");
        assert_eq!(errors[2].field, "growth_rate");
    }

    #[test]
    fn test_checks_passes_clean_input() {
        assert!(Checks::new().non_empty("Savings", "name").amount(0.0, "value").finish().is_ok());
        assert!(Checks::new().amount(f64::NAN, "value").finish().is_err());
    }
}
