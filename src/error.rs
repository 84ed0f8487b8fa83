//! Typed failures for collaborators (providers, search) and configuration.
//!
//! Dispatch itself never fails: these errors are rendered into output text
//! (`[error: ...]`) at the collaborator boundary and flow on as data.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentdError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("send request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("decode response: {0}")]
    Decode(String),

    #[error("{0} response missing '{1}' field")]
    MissingField(&'static str, &'static str),
}

pub type Result<T> = std::result::Result<T, AgentdError>;

/// Render a collaborator failure the way it appears in dispatch output.
pub fn as_output(err: &AgentdError) -> String {
    format!("[error: {err}]")
}
