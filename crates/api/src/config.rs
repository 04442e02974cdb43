use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use extract::ExtractorConfig;
use llm::LlmConfig;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_VAR: &str = "INDEXER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log_format: LogFormat,
    pub llm: LlmConfig,
    pub extractor: ExtractorConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    /// Read `.env`, then the JSON config file, then the environment
    /// overrides. A missing config file means defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = env::var(CONFIG_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("INDEXER_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("INDEXER_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(home) = lookup("INDEXER_CTAKES_HOME") {
            self.extractor.install_dir = PathBuf::from(home);
        }
        if let Some(bind) = lookup("INDEXER_BIND") {
            self.server.bind = bind;
        }
    }
}
