// ⚙️ Settings - TOML file, then FINPLAN_* environment overrides

use crate::actions::ActionSettings;
use crate::assistant::Assistant;
use crate::cpf::{CpfCalculator, CpfSchedule};
use crate::llm::{provider_from_settings, LlmSettings};
use crate::projection::Assumptions;
use crate::rules::CategoryRules;
use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Picked up from the working directory when no --config is given
pub const DEFAULT_CONFIG_FILE: &str = "finplan.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Listen address for the HTTP server
    pub bind: String,
    /// Seed demo records into an empty store on startup
    pub dev_data: bool,
    /// Category rules JSON; built-in vocabulary when unset
    pub rules_path: Option<PathBuf>,
    /// CPF rate schedule JSON; the built-in 2025 schedule when unset
    pub cpf_schedule_path: Option<PathBuf>,
    pub llm: LlmSettings,
    pub assumptions: Assumptions,
    pub actions: ActionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: PathBuf::from("finplan.db"),
            bind: "127.0.0.1:3000".to_string(),
            dev_data: false,
            rules_path: None,
            cpf_schedule_path: None,
            llm: LlmSettings::default(),
            assumptions: Assumptions::default(),
            actions: ActionSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Explicit file, else `finplan.toml` if present, else defaults. Env vars win.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Settings::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Settings::from_file(DEFAULT_CONFIG_FILE)?,
            None => Settings::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings
            .assumptions
            .validate()
            .context("Invalid [assumptions] in config")?;
        Ok(settings)
    }

    /// Apply FINPLAN_* overrides from `lookup` (the process env outside tests)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FINPLAN_DB") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("FINPLAN_BIND") {
            self.bind = bind;
        }
        if let Some(url) = lookup("FINPLAN_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("FINPLAN_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("FINPLAN_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(flag) = lookup("FINPLAN_DEV_DATA") {
            self.dev_data = parse_flag(&flag)
                .with_context(|| format!("FINPLAN_DEV_DATA must be true or false, got '{}'", flag))?;
        }
        Ok(())
    }

    pub fn category_rules(&self) -> Result<CategoryRules> {
        match &self.rules_path {
            Some(path) => CategoryRules::from_file(path),
            None => Ok(CategoryRules::default()),
        }
    }

    pub fn cpf_calculator(&self) -> Result<CpfCalculator> {
        match &self.cpf_schedule_path {
            Some(path) => Ok(CpfCalculator::with_schedule(CpfSchedule::from_file(path)?)),
            None => Ok(CpfCalculator::new()),
        }
    }

    /// Assistant wired to the configured provider (offline when no API key is set)
    pub fn build_assistant(&self) -> Result<Assistant> {
        Assistant::new(
            provider_from_settings(&self.llm),
            self.category_rules()?,
            self.cpf_calculator()?,
            self.assumptions.clone(),
        )
        .context("Failed to build intent patterns")
    }
}

fn parse_flag(text: &str) -> Result<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("unrecognized flag value '{}'", other),
    }
}
