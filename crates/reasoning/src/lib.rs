//! # Drift Reasoning
//!
//! Turns a behavioral unit plus its retrieved specification chunks into a
//! [`ReasoningTrace`](drift_protocol::ReasoningTrace) by consulting a
//! [`ReasoningOracle`].
//!
//! ```text
//! BehavioralUnit + RetrievalResult
//!        │
//!        ▼
//! StructuredPrompt ──> ReasoningOracle ──> raw text ──> parse_response
//!        ▲                  │ outage / timeout              │ malformed
//!        │                  └── retry with backoff          ▼
//!        └──────────────────────────────────────── strict prompt, once
//! ```
//!
//! Oracles:
//! - [`HeuristicOracle`]: deterministic rules over requirement sentences
//! - [`HttpOracle`]: a JSON-over-HTTP model endpoint
//! - [`ScriptedOracle`]: canned replies for tests and dry runs
//!
//! ## Example
//!
//! ```no_run
//! use drift_reasoning::{HeuristicOracle, ReasoningEngine, RetryPolicy};
//! use std::sync::Arc;
//!
//! let engine = ReasoningEngine::new(Arc::new(HeuristicOracle::new()), RetryPolicy::default());
//! assert_eq!(engine.oracle_name(), "heuristic");
//! ```

mod engine;
mod error;
mod heuristic;
mod http;
mod oracle;
mod prompt;
mod response;

pub use engine::{ReasoningEngine, RetryPolicy};
pub use error::{OracleError, Result};
pub use heuristic::HeuristicOracle;
pub use http::HttpOracle;
pub use oracle::{ReasoningOracle, ScriptedOracle, ScriptedReply};
pub use prompt::{
    PromptCall, PromptChunk, PromptEffect, PromptUnit, StructuredPrompt, PROMPT_SCHEMA_VERSION,
};
pub use response::{parse_response, response_schema, OracleResponse};
