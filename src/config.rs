//! Configuration management.
//!
//! Settings load from `leadsource.toml` (or an explicit `--config` path),
//! with environment variable overrides applied on top. Every section has
//! serde defaults so a missing file means a fully default setup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analytics::{AnalyticsConfig, AnalyticsEngine};
use crate::evaluate::EvaluationGate;
use crate::heal::QueryHealer;
use crate::llm::{LlmClient, LlmConfig, ModelPromoter};
use crate::repository::DbContext;
use crate::scheduler::SchedulerConfig;
use crate::search::{HttpListingsProvider, SearchConfig};
use crate::sourcing::SourcingService;
use crate::validate::{LinkValidator, ValidationConfig};

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "leadsource.db";

/// Config file looked for in the working directory when none is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "leadsource.toml";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leadsource")
}

fn default_database_filename() -> String {
    DEFAULT_DATABASE_FILENAME.to_string()
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Database filename inside the data directory.
    #[serde(default = "default_database_filename")]
    pub database_filename: String,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_filename: default_database_filename(),
            search: SearchConfig::default(),
            validation: ValidationConfig::default(),
            llm: LlmConfig::default(),
            scheduler: SchedulerConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings: explicit path, else `./leadsource.toml`, else defaults.
    /// Environment overrides are applied last.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match config_path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("cannot read config {}: {}", path.display(), e)
                })?;
                toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
                if default_path.exists() {
                    let text = fs::read_to_string(default_path)?;
                    toml::from_str(&text).map_err(|e| {
                        anyhow::anyhow!("invalid config {}: {}", default_path.display(), e)
                    })?
                } else {
                    Settings::default()
                }
            }
        };
        Ok(settings.with_env_overrides())
    }

    /// Apply environment variable overrides.
    ///
    /// `LEADSOURCE_DATA_DIR` relocates the data directory; search and LLM
    /// sections apply their own (`SEARCH_*`, `LLM_*`, provider API keys).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("LEADSOURCE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        self.search = self.search.with_env_overrides();
        self.llm = self.llm.with_env_overrides();
        self
    }

    /// Settings rooted at a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::new(&self.db_path())
    }

    /// Assemble the sourcing service from these settings.
    pub fn create_service(&self, ctx: DbContext) -> SourcingService {
        let client = Arc::new(LlmClient::new(self.llm.clone()));
        let promoter = Arc::new(ModelPromoter::new(client, self.llm.tiers.clone()));
        let gate = EvaluationGate::new(promoter.clone());
        let healer = QueryHealer::new(promoter, AnalyticsEngine::new(self.analytics.clone()));
        let provider = Arc::new(HttpListingsProvider::new(self.search.clone()));
        let validator = LinkValidator::new(&self.validation);
        SourcingService::new(ctx, provider, validator, gate, healer, self.search.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.database_filename, DEFAULT_DATABASE_FILENAME);
        assert_eq!(settings.scheduler.tick_secs, 30);
        assert_eq!(settings.analytics.exhaustion_min_runs, 3);
    }

    #[test]
    fn sections_parse_from_toml() {
        let settings: Settings = toml::from_str(
            r#"
            data_dir = "/tmp/leads"

            [search]
            endpoint = "https://listings.internal"
            max_results = 40

            [scheduler]
            tick_secs = 10

            [analytics]
            exhaustion_duplicate_rate = 0.9
            exhaustion_min_runs = 5

            [llm]
            provider = "ollama"
            endpoint = "http://llm.internal:11434"

            [[llm.tiers]]
            model = "big-model"
            first_token_timeout_ms = 6000

            [[llm.tiers]]
            model = "small-model"
            first_token_timeout_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/tmp/leads"));
        assert_eq!(settings.search.max_results, 40);
        assert_eq!(settings.scheduler.tick_secs, 10);
        assert_eq!(settings.analytics.exhaustion_min_runs, 5);
        assert_eq!(settings.llm.tiers.len(), 2);
        assert_eq!(settings.llm.tiers[0].model, "big-model");
        assert_eq!(settings.db_path(), PathBuf::from("/tmp/leads/leadsource.db"));
    }
}
