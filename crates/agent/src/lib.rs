//! Agent runtime for the travel and weather assistant.
//!
//! Every user message runs through the same loop:
//! 1. **Guardrails** (`guardrails`) - moderation, then the per-session chat limit
//! 2. **Routing** (`router`, `llm`) - sticky intent, keywords, optional LLM classifier
//! 3. **Slot filling** (`extractor`, `validators`, `ask_policy`) - extract, validate, ask
//! 4. **Tools** (`tools`, `weather`) - allowlisted, rate limited, bounded by a timeout
//! 5. **Reply** (`stream`) - word-sized chunks followed by a turn summary
//!
//! `AgentRuntime` (see `runtime`) wires these together, serializes turns per
//! session, and persists state through a `parley_db::SessionStore`.
//!
//! The LLM only ever labels intent. Slot values, policy outcomes and tool
//! arguments are decided by deterministic code.

pub mod ask_policy;
pub mod dispatcher;
pub mod extractor;
pub mod guardrails;
pub mod llm;
pub mod router;
pub mod runtime;
pub mod session_lock;
pub mod stream;
pub mod tools;
pub mod validators;
pub mod weather;

pub use llm::{Classification, IntentClassifier, LlmClient, LlmIntentClassifier};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, RuntimeBuildError, GENERIC_FAILURE};
pub use stream::{CollectedTurn, TurnChunk, TurnStatus, TurnStream, TurnSummary};
pub use tools::{Tool, ToolError, ToolRegistry};
pub use weather::{WeatherQuery, WeatherReport};
