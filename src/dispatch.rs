//! Single entry point: `(session, instruction, metadata) -> (output, trace)`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::compiler;
use crate::config::Config;
use crate::context::LlmContext;
use crate::instruction::{Dispatched, Instruction, InstructionExecutor, LlmCall, Metadata, ToolCall};
use crate::memory::{InMemorySessionStore, SessionStore};
use crate::provider::{self, Provider};
use crate::scheduler;
use crate::tools::{BuiltinTools, ToolInvoker};
use crate::trace::Trace;

pub const UNSUPPORTED: &str = "Unsupported instruction";
pub const DEPTH_EXCEEDED: &str = "Plan depth limit exceeded";

/// Routes instructions by scheme. Cheap to share: everything it owns sits
/// behind an `Arc`, and each call allocates its own scheduler state.
#[derive(Clone)]
pub struct Dispatcher {
    llm: LlmContext,
    memory: Arc<dyn SessionStore>,
    tools: Arc<dyn ToolInvoker>,
    max_plan_depth: usize,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn Provider>,
        memory: Arc<dyn SessionStore>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            llm: LlmContext::new(provider, Arc::clone(&memory)),
            memory,
            tools,
            max_plan_depth: crate::config::DispatchConfig::default().max_plan_depth,
        }
    }

    /// Build the production wiring from config: configured provider,
    /// in-process session memory, built-in tools.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let provider = provider::build_provider(&cfg.provider)
            .with_context(|| format!("failed to build provider '{}'", cfg.provider.kind))?;
        let dispatcher = Self::new(
            Arc::from(provider),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(BuiltinTools::new(cfg.search.clone())),
        )
        .with_max_plan_depth(cfg.dispatch.max_plan_depth);
        Ok(dispatcher)
    }

    pub fn with_max_plan_depth(mut self, depth: usize) -> Self {
        self.max_plan_depth = depth;
        self
    }

    /// Top-level dispatch (depth 0).
    pub fn dispatch(&self, session_id: &str, instruction: &str, meta: &Metadata) -> Dispatched {
        self.dispatch_at(session_id, instruction, meta, 0)
    }

    fn dispatch_at(
        &self,
        session_id: &str,
        instruction: &str,
        meta: &Metadata,
        depth: usize,
    ) -> Dispatched {
        let parsed = Instruction::parse(instruction);
        debug!(kind = parsed.kind(), depth, "dispatching instruction");

        let mut trace = Trace::new();
        trace.record("type", parsed.kind());

        let output = match parsed {
            Instruction::LanguageModel(call) => self.run_llm(session_id, call, &mut trace),
            Instruction::Tool(ToolCall::Search(query)) => {
                trace.record("tool", "web_search");
                let out = self.tools.web_search(&query);
                trace.record("query", query);
                out
            }
            Instruction::Tool(ToolCall::Named(name)) => {
                let out = self.tools.invoke(&name);
                trace.record("tool", name);
                out
            }
            Instruction::Plan(plan) => self.run_plan(session_id, &plan, meta, depth, &mut trace),
            Instruction::Unknown(raw) => {
                trace.record("error", raw);
                UNSUPPORTED.to_string()
            }
        };

        Dispatched::new(output, trace)
    }

    fn run_llm(&self, session_id: &str, call: LlmCall, trace: &mut Trace) -> String {
        trace.record("raw_model", call.raw_model.as_str());
        if call.model.is_empty() {
            trace.record("error", "missing model");
            return UNSUPPORTED.to_string();
        }

        let mut prompt = call.prompt;
        if call.use_memory {
            trace.record("context", "memory");
            let memory = self.memory.fetch(session_id).unwrap_or_default();
            prompt = format!("{memory}\n{prompt}");
        }
        trace.record("model", call.model.as_str());

        self.llm.query(session_id, &call.model, &prompt)
    }

    fn run_plan(
        &self,
        session_id: &str,
        plan: &str,
        meta: &Metadata,
        depth: usize,
        trace: &mut Trace,
    ) -> String {
        if depth > self.max_plan_depth {
            warn!(depth, max = self.max_plan_depth, "refusing to run nested plan");
            trace.record(
                "error",
                format!("plan depth limit exceeded ({})", self.max_plan_depth),
            );
            return DEPTH_EXCEEDED.to_string();
        }

        let dag = compiler::compile_dag(plan);
        let run = scheduler::execute_plan(&dag, self, session_id, meta, depth);
        // The plan's own keys win over node ids that reuse them.
        for key in trace.merge_missing(run.trace) {
            warn!(key = %key, "plan node id collides with a dispatch trace key; node entry dropped");
        }
        run.output
    }
}

impl InstructionExecutor for Dispatcher {
    fn execute(
        &self,
        session_id: &str,
        instruction: &str,
        meta: &Metadata,
        depth: usize,
    ) -> Dispatched {
        self.dispatch_at(session_id, instruction, meta, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as AgentdResult;

    struct Upper;

    impl Provider for Upper {
        fn complete(&self, _model: &str, prompt: &str) -> AgentdResult<String> {
            Ok(prompt.to_uppercase())
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(Upper),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(BuiltinTools::default()),
        )
    }

    #[test]
    fn unknown_scheme_is_a_soft_failure() {
        let out = dispatcher().dispatch("s", "foo://bar", &Metadata::new());
        assert_eq!(out.output, UNSUPPORTED);
        assert_eq!(out.trace.get("type"), Some("unknown"));
        assert_eq!(out.trace.get("error"), Some("foo://bar"));
    }

    #[test]
    fn missing_model_is_reported() {
        let out = dispatcher().dispatch("s", "llm://:hi", &Metadata::new());
        assert_eq!(out.output, UNSUPPORTED);
        assert_eq!(out.trace.get("type"), Some("llm"));
        assert_eq!(out.trace.get("raw_model"), Some(""));
        assert_eq!(out.trace.get("error"), Some("missing model"));
        assert!(!out.trace.contains_key("model"));
    }

    #[test]
    fn named_tool_uses_placeholder() {
        let out = dispatcher().dispatch("", "tool://calc", &Metadata::new());
        assert_eq!(out.output, "[Tool: calc executed]");
        assert_eq!(out.trace.get("tool"), Some("calc"));
    }

    #[test]
    fn node_named_like_a_trace_key_keeps_plan_type() {
        let out = dispatcher().dispatch("", "plan://type=tool://x", &Metadata::new());
        assert_eq!(out.output, "[Tool: x executed]");
        assert_eq!(out.trace.get("type"), Some("plan"));
        assert_eq!(out.trace.get("type.tool"), Some("x"));
    }

    #[test]
    fn plan_trace_is_merged_without_namespace() {
        let out = dispatcher().dispatch("", "plan://A=tool://x;B=llm://m:hey;B<-A", &Metadata::new());
        assert_eq!(out.output, "HEY");
        assert_eq!(out.trace.get("type"), Some("plan"));
        assert_eq!(out.trace.get("A"), Some("tool://x => [Tool: x executed]"));
        assert_eq!(out.trace.get("B.model"), Some("m"));
    }
}
