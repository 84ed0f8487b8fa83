use std::collections::HashMap;
use std::env;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProviderSpec;
use crate::error::{AgentdError, Result};

/// A minimal blocking language-model interface.
pub trait Provider: Send + Sync {
    fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Factory: build a provider implementation from a `ProviderSpec`.
pub fn build_provider(spec: &ProviderSpec) -> Result<Box<dyn Provider>> {
    let kind = spec.kind.trim().to_lowercase();
    match kind.as_str() {
        "ollama" => Ok(Box::new(OllamaProvider::from_spec(spec)?)),
        "http" => Ok(Box::new(HttpProvider::from_spec(spec)?)),
        other => Err(AgentdError::Config(format!(
            "unsupported provider kind '{other}' (supported: ollama, http)"
        ))),
    }
}

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One object of Ollama's `/api/generate` reply (the whole reply when not streaming).
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
}

/// Ollama over its local HTTP API (`POST <endpoint>/api/generate`).
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    pub endpoint: String,
    pub stream: bool,
    pub timeout_secs: u64,
}

impl OllamaProvider {
    pub fn from_spec(spec: &ProviderSpec) -> Result<Self> {
        let cfg = &spec.config;

        let endpoint = match env::var("AGENTD_OLLAMA_URL") {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => cfg_str(cfg, "endpoint")
                .unwrap_or(DEFAULT_OLLAMA_ENDPOINT)
                .to_string(),
        };
        let stream = cfg.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
        let timeout_secs = match timeout_override()? {
            Some(secs) => secs,
            None => cfg_u64(cfg, "timeout_secs").unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            endpoint,
            stream,
            timeout_secs,
        })
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

impl Provider for OllamaProvider {
    fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let resp = client
            .post(self.url())
            .json(&GenerateRequest {
                model,
                prompt,
                stream: self.stream,
            })
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = truncate(resp.text().unwrap_or_default().trim(), 200);
            return Err(AgentdError::Status {
                service: "ollama",
                status,
                body,
            });
        }

        if !self.stream {
            let chunk: GenerateChunk = resp
                .json()
                .map_err(|e| AgentdError::Decode(e.to_string()))?;
            return Ok(chunk.response);
        }

        // Streaming replies are newline-delimited JSON objects; unparsable
        // lines are ignored.
        let mut out = String::new();
        for line in BufReader::new(resp).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(chunk) = serde_json::from_str::<GenerateChunk>(&line) {
                out.push_str(&chunk.response);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    endpoint: String,
    auth: Option<HttpAuth>,
    headers: HashMap<String, String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
struct HttpAuth {
    env: String,
}

impl HttpProvider {
    pub fn from_spec(spec: &ProviderSpec) -> Result<Self> {
        let cfg = &spec.config;

        let endpoint = cfg_str(cfg, "endpoint")
            .map(|s| s.to_string())
            .ok_or_else(|| AgentdError::Config("http provider requires config.endpoint".into()))?;

        let timeout_secs = match timeout_override()? {
            Some(secs) => Some(secs),
            None => cfg_u64(cfg, "timeout_secs"),
        };

        let mut headers = HashMap::new();
        if let Some(h) = cfg.get("headers") {
            let obj = h.as_object().ok_or_else(|| {
                AgentdError::Config(
                    "http provider config.headers must be an object of string values".into(),
                )
            })?;
            for (k, v) in obj {
                let v = v.as_str().ok_or_else(|| {
                    AgentdError::Config("http provider config.headers values must be strings".into())
                })?;
                headers.insert(k.clone(), v.to_string());
            }
        }

        let auth = if let Some(auth_val) = cfg.get("auth") {
            let obj = auth_val.as_object().ok_or_else(|| {
                AgentdError::Config("http provider config.auth must be an object".into())
            })?;
            let auth_type = obj.get("type").and_then(|v| v.as_str()).ok_or_else(|| {
                AgentdError::Config("http provider config.auth.type is required".into())
            })?;
            if auth_type != "bearer" {
                return Err(AgentdError::Config(format!(
                    "http provider auth.type must be 'bearer' (got '{auth_type}')"
                )));
            }
            let env_key = obj.get("env").and_then(|v| v.as_str()).ok_or_else(|| {
                AgentdError::Config("http provider config.auth.env is required".into())
            })?;
            Some(HttpAuth {
                env: env_key.to_string(),
            })
        } else {
            None
        };

        Ok(Self {
            endpoint,
            auth,
            headers,
            timeout_secs,
        })
    }
}

impl Provider for HttpProvider {
    fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let mut client_builder = Client::builder();
        if let Some(secs) = self.timeout_secs {
            client_builder = client_builder.timeout(Duration::from_secs(secs));
        }
        let client = client_builder.build()?;

        let mut req = client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");

        for (k, v) in self.headers.iter() {
            req = req.header(k, v);
        }

        if let Some(auth) = &self.auth {
            let token = env::var(&auth.env).map_err(|_| {
                AgentdError::Config(format!("missing required auth env var '{}'", auth.env))
            })?;
            req = req.bearer_auth(token);
        }

        let body = serde_json::json!({ "model": model, "prompt": prompt });
        let resp = req.json(&body).send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().unwrap_or_default();
            return Err(AgentdError::Status {
                service: "http provider",
                status,
                body: truncate(text.trim(), 200),
            });
        }

        let json: Value = resp
            .json()
            .map_err(|e| AgentdError::Decode(e.to_string()))?;
        let out = json
            .get("output")
            .and_then(|v| v.as_str())
            .ok_or(AgentdError::MissingField("http provider", "output"))?;

        Ok(out.to_string())
    }
}

/// `AGENTD_TIMEOUT_SECS`, if set, overrides any configured provider timeout.
fn timeout_override() -> Result<Option<u64>> {
    let Ok(raw) = env::var("AGENTD_TIMEOUT_SECS") else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(secs)),
        _ => Err(AgentdError::Config(format!(
            "invalid AGENTD_TIMEOUT_SECS: '{raw}' (must be a positive integer)"
        ))),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub(crate) fn cfg_str<'a>(cfg: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    cfg.get(key).and_then(|v| v.as_str())
}

pub(crate) fn cfg_u64(cfg: &HashMap<String, Value>, key: &str) -> Option<u64> {
    cfg.get(key).and_then(|v| {
        if let Some(u) = v.as_u64() {
            Some(u)
        } else if let Some(s) = v.as_str() {
            s.parse::<u64>().ok()
        } else {
            None
        }
    })
}
