//! Instruction strings and the executor capability the scheduler calls back into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compiler::PLAN_SCHEME;
use crate::trace::Trace;

pub const LLM_SCHEME: &str = "llm://";
pub const TOOL_SCHEME: &str = "tool://";
pub const SEARCH_PREFIX: &str = "search:";
pub const MEMORY_SUFFIX: &str = ".memory";

/// Request metadata carried unchanged through nested dispatches.
pub type Metadata = BTreeMap<String, String>;

/// A parsed instruction. Parsing never fails; anything unrecognised is `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    LanguageModel(LlmCall),
    Tool(ToolCall),
    Plan(String),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCall {
    /// Model segment as written, including any `.memory` suffix.
    pub raw_model: String,
    /// Model name sent to the provider.
    pub model: String,
    pub use_memory: bool,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Search(String),
    Named(String),
}

impl Instruction {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(LLM_SCHEME) {
            return Instruction::LanguageModel(LlmCall::parse(rest));
        }
        if let Some(rest) = raw.strip_prefix(TOOL_SCHEME) {
            return Instruction::Tool(match rest.strip_prefix(SEARCH_PREFIX) {
                Some(query) => ToolCall::Search(query.to_string()),
                None => ToolCall::Named(rest.to_string()),
            });
        }
        if raw.starts_with(PLAN_SCHEME) {
            return Instruction::Plan(raw.to_string());
        }
        Instruction::Unknown(raw.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::LanguageModel(_) => "llm",
            Instruction::Tool(_) => "tool",
            Instruction::Plan(_) => "plan",
            Instruction::Unknown(_) => "unknown",
        }
    }
}

impl LlmCall {
    /// Parse the part after `llm://`: `model[.memory][:prompt]`.
    fn parse(rest: &str) -> Self {
        let (raw_model, prompt) = match rest.split_once(':') {
            Some((m, p)) => (m, p),
            None => (rest, ""),
        };
        let use_memory = raw_model.contains(MEMORY_SUFFIX);
        let model = if use_memory {
            raw_model.split('.').next().unwrap_or_default()
        } else {
            raw_model
        };
        Self {
            raw_model: raw_model.to_string(),
            model: model.to_string(),
            use_memory,
            prompt: prompt.to_string(),
        }
    }
}

/// Output plus trace; every dispatch produces one, failures included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatched {
    pub output: String,
    pub trace: Trace,
}

impl Dispatched {
    pub fn new(output: impl Into<String>, trace: Trace) -> Self {
        Self {
            output: output.into(),
            trace,
        }
    }
}

/// Anything that can run an instruction string. The dispatcher is the real
/// implementation; the scheduler only sees this trait.
///
/// `depth` counts nested plan levels: a top-level call is depth 0 and every
/// plan node is dispatched one level deeper than its plan.
pub trait InstructionExecutor {
    fn execute(&self, session_id: &str, instruction: &str, meta: &Metadata, depth: usize)
        -> Dispatched;
}
