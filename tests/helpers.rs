#![allow(dead_code)]

use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use agentd::dispatch::Dispatcher;
use agentd::error::{AgentdError, Result};
use agentd::memory::InMemorySessionStore;
use agentd::provider::Provider;
use agentd::tools::ToolInvoker;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> MutexGuard<'static, ()> {
    match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(g) => g,
        // A test that panicked while holding the lock must not wedge the rest.
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// RAII guard for test-only env var mutation.
///
/// Mutations through this guard are serialized with a global lock; anything
/// else touching the environment is not.
#[must_use]
pub struct EnvVarGuard {
    key: String,
    old: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvVarGuard {
    pub fn set<K: Into<String>, V: AsRef<OsStr>>(key: K, value: V) -> Self {
        let key = key.into();
        let lock = env_lock();
        let old = env::var_os(&key);

        // Env mutation is unsafe on recent toolchains; ENV_LOCK keeps it serialized.
        unsafe {
            env::set_var(&key, value);
        }

        Self {
            key,
            old,
            _lock: lock,
        }
    }

    pub fn unset<K: Into<String>>(key: K) -> Self {
        let key = key.into();
        let lock = env_lock();
        let old = env::var_os(&key);

        unsafe {
            env::remove_var(&key);
        }

        Self {
            key,
            old,
            _lock: lock,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        unsafe {
            match &self.old {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }
}

pub fn unique_test_temp_dir(prefix: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = env::temp_dir().join(format!("agentd-{prefix}-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Provider with canned replies per model; records every call.
///
/// Unknown models echo `"<model>: <prompt>"`. Model `"broken"` fails.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: BTreeMap<String, String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, model: &str, text: &str) -> Self {
        self.replies.insert(model.to_string(), text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Provider for ScriptedProvider {
    fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        if model == "broken" {
            return Err(AgentdError::Status {
                service: "scripted",
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self
            .replies
            .get(model)
            .cloned()
            .unwrap_or_else(|| format!("{model}: {prompt}")))
    }
}

/// Tools that never touch the network.
#[derive(Default)]
pub struct FakeTools {
    searches: Mutex<Vec<String>>,
}

impl FakeTools {
    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }
}

impl ToolInvoker for FakeTools {
    fn invoke(&self, name: &str) -> String {
        format!("[Tool: {name} executed]")
    }

    fn web_search(&self, query: &str) -> String {
        self.searches.lock().unwrap().push(query.to_string());
        format!("- Result for {query} (https://example.test/{})", query.replace(' ', "+"))
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub provider: Arc<ScriptedProvider>,
    pub memory: Arc<InMemorySessionStore>,
    pub tools: Arc<FakeTools>,
}

pub fn harness(provider: ScriptedProvider) -> Harness {
    harness_with_memory(provider, InMemorySessionStore::new())
}

pub fn harness_with_memory(provider: ScriptedProvider, memory: InMemorySessionStore) -> Harness {
    let provider = Arc::new(provider);
    let memory = Arc::new(memory);
    let tools = Arc::new(FakeTools::default());
    let dispatcher = Dispatcher::new(provider.clone(), memory.clone(), tools.clone());
    Harness {
        dispatcher,
        provider,
        memory,
        tools,
    }
}
