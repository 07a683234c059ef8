//! # Drift Behavior
//!
//! Extracts a language-agnostic behavioral model from source code.
//!
//! ## Architecture
//!
//! ```text
//! Source Code
//!     │
//!     ├──> Language Detection (from extension)
//!     │
//!     ├──> Frontend::parse (tree-sitter AST → statement IR)
//!     │      one frontend per language, shared IR shape
//!     │
//!     ├──> Frontend::lower_to_cfg
//!     │      ├─> basic blocks of ordered ops
//!     │      └─> branch / back / break / return / exception edges
//!     │
//!     ├──> Frontend::dataflow
//!     │      ├─> reaching definitions (worklist)
//!     │      └─> use-def chains, local aliases of state
//!     │
//!     └──> Reduction
//!            ├─> ordered Effect sequence (source order)
//!            ├─> guards and asserts → preconditions
//!            ├─> pure loops collapsed, dead code tagged unreachable
//!            └─> BehavioralUnit[]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use drift_behavior::{BehaviorExtractor, Language};
//! use drift_protocol::Fork;
//!
//! let code = r#"
//! class Account:
//!     def withdraw(self, value):
//!         if self.balance < value:
//!             raise ValueError("insufficient balance")
//!         self.balance -= value
//! "#;
//!
//! let units = BehaviorExtractor::new()
//!     .extract(code, Language::Python, "account.py", &Fork::default())
//!     .unwrap();
//! assert_eq!(units[0].id, "account.py::Account.withdraw");
//! ```

mod cfg;
mod dataflow;
mod error;
mod extractor;
mod frontends;
mod ir;
mod language;
mod reduce;

pub use cfg::{BasicBlock, ControlFlowGraph, EdgeKind, ExitKind, FlowEdge, Op, OpKind, Place};
pub use dataflow::{DataflowFacts, DefSite};
pub use error::{ExtractionError, Result};
pub use extractor::BehaviorExtractor;
pub use frontends::{frontend_for, Frontend, LoweringRules};
pub use ir::{Expr, FunctionIr, Guard, ModuleIr, Stmt};
pub use language::Language;
