//! `agentd.yaml` configuration.
//!
//! Every section is optional; `Config::default()` gives a local Ollama
//! provider, DuckDuckGo search, a plan depth limit of 8 and a gateway on
//! `127.0.0.1:9090`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AgentdError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderSpec,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Language-model provider: local Ollama, generic HTTP, etc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    /// Provider type ("ollama" or "http").
    #[serde(rename = "type")]
    pub kind: String,

    /// Arbitrary provider config (endpoint, stream, timeout_secs, headers, auth).
    #[serde(default)]
    pub config: HashMap<String, JsonValue>,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            kind: "ollama".to_string(),
            config: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            timeout_secs: 5,
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Deepest nesting level at which a `plan://` instruction still runs.
    pub max_plan_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_plan_depth: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9090".to_string(),
            workers: 4,
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let cfg = Self::from_yaml_str(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        Ok(cfg)
    }

    /// `path` if given, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml_str(raw: &str) -> crate::error::Result<Self> {
        // An empty document deserializes as unit; treat it as "all defaults".
        let cfg: Config = if raw.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.provider.kind.trim().is_empty() {
            return Err(AgentdError::Config("provider.type must not be empty".into()));
        }
        if self.search.timeout_secs == 0 {
            return Err(AgentdError::Config(
                "search.timeout_secs must be a positive integer".into(),
            ));
        }
        if self.search.max_results == 0 {
            return Err(AgentdError::Config("search.max_results must be >= 1".into()));
        }
        if self.server.workers == 0 {
            return Err(AgentdError::Config("server.workers must be >= 1".into()));
        }
        Ok(())
    }
}
