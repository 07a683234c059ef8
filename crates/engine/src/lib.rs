//! # Drift Engine
//!
//! Orchestrates the pipeline over one persistent index and calibration store:
//!
//! ```text
//! ingest:  repo@ref ──> spec documents ──> SpecChunker ──> MemoryIndex (per fork)
//!
//! verify:  code_path ──> BehaviorExtractor ──> units ─┐
//!                                                     ▼
//!          pinned snapshot ──> Retriever ──> StructuredPrompt ──> ReasoningEngine
//!                                       (UnitLimiter workers, cancellable)
//!                                                     │ traces ──> TraceJournal
//!                                                     ▼
//!                            Comparator + CalibrationStore ──> Report
//!
//! review:  Report finding ──> ReviewDesk ──> calibration bucket ──> disk
//! ```
//!
//! Per-unit failures degrade to unevaluated entries; only run-level problems
//! (no source, empty index for the fork, bad config) are errors.

mod cancel;
mod config;
mod engine;
mod error;
mod git;
mod journal;
mod limits;
mod scanner;

pub use cancel::CancellationToken;
pub use config::{parse_policy, EngineConfig, MAX_CONCURRENCY};
pub use engine::{
    Analysis, DriftEngine, IngestConflict, IngestOutcome, IngestSource, VerifyOptions,
};
pub use error::{EngineError, Result};
pub use git::{git_head, list_files_at, read_file_at};
pub use journal::{JournalEntry, TraceJournal};
pub use limits::{ConcurrencySnapshot, UnitLimiter, UnitPermit};
pub use scanner::{FileScanner, ScanTarget};
