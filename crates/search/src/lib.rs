//! # Drift Search
//!
//! Retrieves the specification chunks relevant to a behavioral unit.
//!
//! ```text
//! BehavioralUnit ──> UnitQuery (symbol, effect targets, guards, callees)
//!                        │
//!     pinned IndexView ──┼──> dense cosine (top k × pool)
//!     (one per run)      ├──> lexical coverage + identifier bonus
//!                        ├──> ScoreFusion (adaptive weights), forced-split discount
//!                        ├──> ClauseGraph neighbours of the top hits
//!                        ├──> relevance threshold, near-duplicate collapse
//!                        └──> RetrievalResult (scores in [0, 1], non-increasing)
//! ```
//!
//! Ties are broken by ingestion recency (newest first), then by chunk id, so
//! two runs over the same snapshot rank identically.

mod error;
mod fusion;
mod graph;
mod query;
mod retriever;

pub use error::{Result, SearchError};
pub use fusion::ScoreFusion;
pub use graph::{ClauseGraph, ClauseLink};
pub use query::UnitQuery;
pub use retriever::{RetrievalRun, Retriever, RetrieverConfig};
