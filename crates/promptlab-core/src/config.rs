use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cost::PriceTable;
use crate::engine::runner::{DEFAULT_CALL_TIMEOUT, DEFAULT_CONCURRENCY};
use crate::engine::{RunSettings, Runner};
use crate::errors::ConfigError;
use crate::judge::JudgeSettings;
use crate::providers::llm::ProviderRouter;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_DB_PATH: &str = ".promptlab/results.db";

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub judge: JudgeSettings,
    /// Built-in prices when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PriceTable>,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            engine: EngineConfig::default(),
            judge: JudgeSettings::default(),
            pricing: None,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub call_timeout_secs: u64,
    pub run_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            run_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            concurrency: self.concurrency,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<LabConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: LabConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse YAML in {}", path.display()))?;
    if cfg.version != SUPPORTED_CONFIG_VERSION {
        anyhow::bail!(
            "unsupported config version {} (supported: {})",
            cfg.version,
            SUPPORTED_CONFIG_VERSION
        );
    }
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

fn env_number<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        _ => Ok(None),
    }
}

impl LabConfig {
    /// Applies `PROMPTLAB_*` environment variables on top of the file values.
    pub fn from_env_overrides(mut self) -> anyhow::Result<Self> {
        if let Some(n) = env_number("PROMPTLAB_CONCURRENCY")? {
            self.engine.concurrency = n;
        }
        if let Some(n) = env_number("PROMPTLAB_CALL_TIMEOUT_SECS")? {
            self.engine.call_timeout_secs = n;
        }
        if let Some(n) = env_number("PROMPTLAB_RUN_TIMEOUT_SECS")? {
            self.engine.run_timeout_secs = Some(n);
        }
        if let Ok(model) = std::env::var("PROMPTLAB_JUDGE_MODEL") {
            if !model.trim().is_empty() {
                self.judge.model = model.trim().to_string();
            }
        }
        if let Ok(db) = std::env::var("PROMPTLAB_DB") {
            if !db.trim().is_empty() {
                self.store.path = PathBuf::from(db.trim());
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.settings().validate()?;
        if self.judge.model.trim().is_empty() {
            return Err(ConfigError::InvalidSettings("judge model must be set".into()));
        }
        if self.judge.max_tokens == 0 {
            return Err(ConfigError::InvalidSettings(
                "judge max_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn price_table(&self) -> PriceTable {
        self.pricing.clone().unwrap_or_else(PriceTable::builtin)
    }

    pub fn runner(&self, router: ProviderRouter) -> Runner {
        Runner::new(router)
            .with_settings(self.engine.settings())
            .with_judge(self.judge.clone())
            .with_prices(self.price_table())
    }
}
