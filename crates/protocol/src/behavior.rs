use crate::fork::Fork;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of analyzed code unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// Plain function: reads, calls, or nothing observable
    Function,
    /// Mutates protocol state
    StateTransition,
    /// Only inspects state and rejects (raises, asserts, returns early)
    InvariantCheck,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Function => "function",
            UnitKind::StateTransition => "state-transition",
            UnitKind::InvariantCheck => "invariant-check",
        }
    }
}

/// Where a unit lives in the analyzed source tree.
///
/// Ordering is by path, then line, then symbol, which is the tie-break order
/// the report uses.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct SourceLocation {
    pub path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub symbol: String,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.path, self.line_start, self.symbol)
    }
}

/// What an effect touches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "name", rename_all = "kebab-case")]
pub enum EffectTarget {
    /// Protocol or object state reachable from the receiver or a state handle
    StateVariable(String),
    /// Memory owned by the caller: parameters, buffers, locals passed in
    Memory(String),
    /// A callee outside the unit
    ExternalCall(String),
}

impl EffectTarget {
    pub fn name(&self) -> &str {
        match self {
            EffectTarget::StateVariable(name)
            | EffectTarget::Memory(name)
            | EffectTarget::ExternalCall(name) => name,
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, EffectTarget::StateVariable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Read,
    Write,
    Call,
    Branch,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Call => "call",
            Operation::Branch => "branch",
        }
    }
}

/// A boolean condition rendered from source, whitespace-normalized.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct Condition(String);

impl Condition {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(crate::normalize_text(text.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `not (C)`, folding a double negation.
    pub fn negated(&self) -> Self {
        if let Some(inner) = self
            .0
            .strip_prefix("not (")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            if balanced(inner) {
                return Self(inner.to_string());
            }
        }
        Self(format!("not ({})", self.0))
    }
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The atomic semantic fact extracted from code.
///
/// For reads, writes and calls `condition` is the path condition under which
/// the effect happens. For branches it is the tested predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Effect {
    pub target: EffectTarget,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// 1-based source line
    pub line: usize,
    #[serde(default)]
    pub unreachable: bool,
}

impl Effect {
    pub fn new(target: EffectTarget, operation: Operation, line: usize) -> Self {
        Self {
            target,
            operation,
            condition: None,
            line,
            unreachable: false,
        }
    }

    pub fn with_condition(mut self, condition: Option<Condition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn unreachable(mut self, unreachable: bool) -> Self {
        self.unreachable = unreachable;
        self
    }

    pub fn is_state_write(&self) -> bool {
        self.operation == Operation::Write && self.target.is_state()
    }
}

/// A call to something outside the unit.
///
/// `opaque` callees could not be resolved to a definition or import and are
/// kept so that unknown dependencies stay visible in the audit trail.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct ExternalCallRef {
    pub callee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    pub opaque: bool,
}

impl ExternalCallRef {
    pub fn resolved(callee: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            callee: callee.into(),
            resolved: Some(target.into()),
            opaque: false,
        }
    }

    pub fn opaque(callee: impl Into<String>) -> Self {
        Self {
            callee: callee.into(),
            resolved: None,
            opaque: true,
        }
    }
}

/// Normalized, order-preserving behavior of one code unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BehavioralUnit {
    /// `path::Qualified.name`
    pub id: String,
    pub source_location: SourceLocation,
    pub kind: UnitKind,
    pub language: String,
    pub fork: Fork,
    /// Execution order
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub preconditions: BTreeSet<Condition>,
    #[serde(default)]
    pub calls: BTreeSet<ExternalCallRef>,
}

impl BehavioralUnit {
    /// State variables written by the unit, in first-write order.
    pub fn state_writes(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.effects
            .iter()
            .filter(|effect| effect.is_state_write())
            .map(|effect| effect.target.name())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    pub fn has_side_effects(&self) -> bool {
        self.effects.iter().any(|effect| {
            matches!(effect.operation, Operation::Write | Operation::Call)
        })
    }

    /// True when every write or call of the unit sits in dead code.
    pub fn side_effects_unreachable(&self) -> bool {
        let mut side_effects = self
            .effects
            .iter()
            .filter(|effect| matches!(effect.operation, Operation::Write | Operation::Call))
            .peekable();
        side_effects.peek().is_some() && side_effects.all(|effect| effect.unreachable)
    }
}
