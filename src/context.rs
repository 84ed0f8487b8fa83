use std::sync::Arc;

use tracing::warn;

use crate::error;
use crate::memory::SessionStore;
use crate::provider::Provider;

/// Language-model collaborator: one provider plus the session log it feeds.
#[derive(Clone)]
pub struct LlmContext {
    provider: Arc<dyn Provider>,
    memory: Arc<dyn SessionStore>,
}

impl LlmContext {
    pub fn new(provider: Arc<dyn Provider>, memory: Arc<dyn SessionStore>) -> Self {
        Self { provider, memory }
    }

    /// Query `model` and remember the exchange under `session_id`.
    ///
    /// Provider failures come back as `[error: ...]` text and are not
    /// remembered. An empty session id means "do not remember".
    pub fn query(&self, session_id: &str, model: &str, prompt: &str) -> String {
        match self.provider.complete(model, prompt) {
            Ok(output) => {
                if !session_id.is_empty() {
                    self.memory.append(session_id, &format!("{prompt}\n{output}"));
                }
                output
            }
            Err(err) => {
                warn!(model, error = %err, "language model query failed");
                error::as_output(&err)
            }
        }
    }
}
