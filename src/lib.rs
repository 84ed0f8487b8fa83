//! `agentd` instruction router and plan runtime.
//!
//! An instruction is a URI-like string (`llm://`, `tool://`, `plan://`).
//! The dispatcher routes it to a language model, a tool, or the plan
//! compiler + scheduler, and returns the output text together with a flat,
//! dot-namespaced trace of everything that ran.
//!
//! Invariants:
//! - dispatch never fails; problems become output text and trace entries
//! - plan execution is deterministic: ties break on lexicographic node id
//! - nested plans stop at a configurable depth
//! - per-session memory appends are serialized per session

pub mod compiler;
pub mod condition;
pub mod config;
pub mod context;
pub mod dag;
pub mod dispatch;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod mermaid;
pub mod provider;
pub mod scheduler;
pub mod server;
pub mod tools;
pub mod trace;
