// 👤 Profile - the single person the plan belongs to

use super::{default_version, empty_metadata, Record};
use crate::error::{Checks, FieldError};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const PROFILE_ID: &str = "default";

/// CPF account balances (Ordinary, Special/Retirement, MediSave)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpfBalances {
    #[serde(default)]
    pub oa: f64,
    #[serde(default)]
    pub sa: f64,
    #[serde(default)]
    pub ma: f64,
}

impl CpfBalances {
    pub fn total(&self) -> f64 {
        self.oa + self.sa + self.ma
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "profile_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub birth_date: Option<NaiveDate>,

    #[serde(default)]
    pub cpf: CpfBalances,

    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn profile_id() -> String {
    PROFILE_ID.to_string()
}

impl Default for Profile {
    fn default() -> Self {
        let now = Utc::now();
        Profile {
            id: profile_id(),
            name: String::new(),
            birth_date: None,
            cpf: CpfBalances::default(),
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: empty_metadata(),
        }
    }
}

impl Profile {
    /// Age in completed years on `on`
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        let birth = self.birth_date?;
        if on < birth {
            return Some(0);
        }
        let mut age = on.year() - birth.year();
        if (on.month(), on.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age.max(0) as u32)
    }
}

impl Record for Profile {
    const KIND: &'static str = "profile";

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let today = Utc::now().date_naive();
        Checks::new()
            .amount(self.cpf.oa, "cpf.oa")
            .amount(self.cpf.sa, "cpf.sa")
            .amount(self.cpf.ma, "cpf.ma")
            .require(
                self.birth_date.map_or(true, |b| b <= today),
                "birth_date",
                "Birth date is in the future",
            )
            .finish()
    }

    fn idempotency_key(&self) -> String {
        PROFILE_ID.to_string()
    }
}
