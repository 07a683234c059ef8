//! Reduction of CFG + dataflow facts into an ordered effect sequence.

use crate::cfg::{ControlFlowGraph, ExitKind, Op, OpKind, Place};
use crate::dataflow::DataflowFacts;
use crate::frontends::LoweringRules;
use crate::ir::{FunctionIr, ModuleIr};
use crate::language::Language;
use drift_protocol::{
    BehavioralUnit, Condition, Effect, EffectTarget, ExternalCallRef, Fork, Operation,
    SourceLocation, UnitKind,
};
use std::collections::{BTreeSet, HashSet};

/// File-level facts shared by every unit of one source file
pub(crate) struct UnitContext<'a> {
    pub path: &'a str,
    pub language: Language,
    pub fork: &'a Fork,
    pub module: &'a ModuleIr,
    pub rules: &'static LoweringRules,
}

enum PlaceClass {
    State(String),
    Memory(String),
    Local,
}

/// What one op contributes: target, operation, and the call it resolves to
type Produced = (EffectTarget, Operation, Option<ExternalCallRef>);

/// An effect plus the op it came from, kept until collapsing is done.
struct Pending<'c> {
    op: &'c Op,
    effect: Effect,
}

pub(crate) fn reduce(
    ctx: &UnitContext<'_>,
    function: &FunctionIr,
    cfg: &ControlFlowGraph,
    facts: &DataflowFacts,
) -> BehavioralUnit {
    let owner = function
        .receiver
        .as_ref()
        .and_then(|_| function.qualified.rsplit_once('.'))
        .map(|(owner, _)| owner);
    let reducer = Reducer {
        ctx,
        cfg,
        facts,
        owner,
    };

    let ops = cfg.ops_in_order();
    let mut pending = Vec::new();
    let mut calls = BTreeSet::new();
    let mut preconditions = BTreeSet::new();
    let mut raises = false;
    // Loops that can leave the function or fail a check are observable.
    let mut exiting_loops = HashSet::new();

    for &(op, reachable) in &ops {
        match &op.kind {
            OpKind::Exit { kind, .. } => {
                raises |= reachable && *kind == ExitKind::Raise;
                exiting_loops.extend(op.loops.iter().copied());
            }
            OpKind::Branch {
                condition,
                guard_exit,
                assertion,
                ..
            } => {
                if *guard_exit || *assertion {
                    exiting_loops.extend(op.loops.iter().copied());
                }
                if reachable && op.is_top_level() {
                    if *guard_exit {
                        preconditions.insert(condition.negated());
                    } else if *assertion {
                        preconditions.insert(condition.clone());
                    }
                }
            }
            _ => {}
        }

        let condition = match &op.kind {
            OpKind::Branch { condition, .. } => Some(condition.clone()),
            _ => path_condition(op),
        };
        for (target, operation, call) in reducer.effects_of(op) {
            if let Some(call) = call {
                calls.insert(call);
            }
            pending.push(Pending {
                op,
                effect: Effect::new(target, operation, op.line)
                    .with_condition(condition.clone())
                    .unreachable(!reachable),
            });
        }
    }

    let effects = dedup_reads(collapse(pending, &exiting_loops));
    let kind = unit_kind(&effects, &preconditions, raises);

    BehavioralUnit {
        id: format!("{}::{}", ctx.path, function.qualified),
        source_location: SourceLocation {
            path: ctx.path.to_string(),
            line_start: function.line_start,
            line_end: function.line_end,
            symbol: function.qualified.clone(),
        },
        kind,
        language: ctx.language.as_str().to_string(),
        fork: ctx.fork.clone(),
        effects,
        preconditions,
        calls,
    }
}

struct Reducer<'a> {
    ctx: &'a UnitContext<'a>,
    cfg: &'a ControlFlowGraph,
    facts: &'a DataflowFacts,
    owner: Option<&'a str>,
}

impl Reducer<'_> {
    fn classify(&self, seq: usize, place: &Place) -> PlaceClass {
        let resolved = self.facts.resolve_alias(seq, place);
        if resolved.is_bare() {
            return PlaceClass::Local;
        }
        let root = resolved.root.as_str();
        if self.ctx.rules.is_state_root(root) {
            return PlaceClass::State(resolved.render());
        }
        if self.cfg.is_param(root) {
            return PlaceClass::Memory(resolved.render());
        }
        if self.facts.is_tracked(root)
            || self.ctx.module.imports.contains_key(root)
            || self.ctx.rules.is_builtin(root)
        {
            return PlaceClass::Local;
        }
        // Module-level globals
        PlaceClass::State(resolved.render())
    }

    fn effects_of(&self, op: &Op) -> Vec<Produced> {
        match &op.kind {
            OpKind::Call {
                callee,
                receiver: Some(receiver),
                method,
                mutating,
            } => self.method_call(op.seq, callee, receiver, method.as_deref(), *mutating),
            _ => self.effect_of(op).into_iter().collect(),
        }
    }

    fn effect_of(&self, op: &Op) -> Option<Produced> {
        match &op.kind {
            OpKind::Read { place } => match self.classify(op.seq, place) {
                PlaceClass::State(name) => {
                    Some((EffectTarget::StateVariable(name), Operation::Read, None))
                }
                PlaceClass::Memory(name) => Some((EffectTarget::Memory(name), Operation::Read, None)),
                PlaceClass::Local => None,
            },
            OpKind::Write { place } => match self.classify(op.seq, place) {
                PlaceClass::State(name) => {
                    Some((EffectTarget::StateVariable(name), Operation::Write, None))
                }
                PlaceClass::Memory(name) => {
                    Some((EffectTarget::Memory(name), Operation::Write, None))
                }
                PlaceClass::Local => None,
            },
            OpKind::Call {
                receiver: Some(_), ..
            } => None,
            OpKind::Call {
                callee,
                receiver: None,
                ..
            } => self.free_call(callee).map(|call| {
                (
                    EffectTarget::ExternalCall(callee.clone()),
                    Operation::Call,
                    Some(call),
                )
            }),
            OpKind::Branch {
                condition, uses, ..
            } => Some((self.branch_target(op.seq, condition, uses), Operation::Branch, None)),
            OpKind::Define { .. } | OpKind::Exit { .. } => None,
        }
    }

    fn method_call(
        &self,
        seq: usize,
        callee: &str,
        receiver: &Place,
        method: Option<&str>,
        mutating: bool,
    ) -> Vec<Produced> {
        let external = |call: ExternalCallRef| -> Produced {
            (
                EffectTarget::ExternalCall(callee.to_string()),
                Operation::Call,
                Some(call),
            )
        };

        // `self.helper()`
        if receiver.is_bare() && self.ctx.rules.is_state_root(&receiver.root) {
            let sibling = self
                .owner
                .zip(method)
                .map(|(owner, method)| format!("{owner}.{method}"))
                .filter(|qualified| self.ctx.module.definitions.contains(qualified));
            return vec![match sibling {
                Some(qualified) => external(ExternalCallRef::resolved(callee, qualified)),
                None => external(ExternalCallRef::opaque(callee)),
            }];
        }

        let target = match self.classify(seq, receiver) {
            PlaceClass::State(name) => EffectTarget::StateVariable(name),
            PlaceClass::Memory(name) => EffectTarget::Memory(name),
            PlaceClass::Local => {
                let root = receiver.root.as_str();
                if let Some(import) = self.ctx.module.imports.get(root) {
                    let rest = &callee[root.len().min(callee.len())..];
                    return vec![external(ExternalCallRef::resolved(
                        callee,
                        format!("{import}{rest}"),
                    ))];
                }
                if self.ctx.rules.is_builtin(root) || self.facts.is_tracked(root) {
                    return Vec::new();
                }
                return vec![external(ExternalCallRef::opaque(callee))];
            }
        };

        if mutating {
            return vec![(target, Operation::Write, None)];
        }
        let inspects = method.is_none_or(|method| self.ctx.rules.is_accessor(method));
        if inspects {
            return vec![(target, Operation::Read, None)];
        }
        // `self.client.send(x)`: the handle is read, the method runs elsewhere.
        vec![
            (target, Operation::Read, None),
            external(ExternalCallRef::opaque(callee)),
        ]
    }

    fn free_call(&self, callee: &str) -> Option<ExternalCallRef> {
        let dotted = callee.replace("::", ".");
        if let (Some(owner), Some(method)) = (self.owner, dotted.strip_prefix("Self.")) {
            let qualified = format!("{owner}.{method}");
            if self.ctx.module.definitions.contains(&qualified) {
                return Some(ExternalCallRef::resolved(callee, qualified));
            }
        }
        if self.ctx.module.definitions.contains(&dotted) {
            return Some(ExternalCallRef::resolved(callee, dotted));
        }
        if self.ctx.rules.is_builtin(callee) {
            return None;
        }

        let root_len = callee.find(['.', ':']).unwrap_or(callee.len());
        let root = &callee[..root_len];
        if let Some(import) = self.ctx.module.imports.get(root) {
            return Some(ExternalCallRef::resolved(
                callee,
                format!("{import}{}", &callee[root_len..]),
            ));
        }
        // Locally bound closures are part of the unit.
        if self.facts.is_tracked(root) && !self.cfg.is_param(root) {
            return None;
        }
        Some(ExternalCallRef::opaque(callee))
    }

    /// The state a predicate depends on, directly or through locals; the
    /// first tested operand otherwise.
    fn branch_target(&self, seq: usize, condition: &Condition, uses: &[Place]) -> EffectTarget {
        for place in uses {
            if let PlaceClass::State(name) = self.classify(seq, place) {
                return EffectTarget::StateVariable(name);
            }
            if place.is_bare() && self.facts.is_tracked(&place.root) {
                let state = self
                    .facts
                    .sources(seq, &place.root)
                    .into_iter()
                    .find_map(|source| match self.classify(seq, &source) {
                        PlaceClass::State(name) => Some(name),
                        _ => None,
                    });
                if let Some(name) = state {
                    return EffectTarget::StateVariable(name);
                }
            }
        }
        let operand = uses
            .first()
            .map(|place| self.facts.resolve_alias(seq, place).render())
            .unwrap_or_else(|| condition.as_str().to_string());
        EffectTarget::Memory(operand)
    }
}

fn path_condition(op: &Op) -> Option<Condition> {
    if op.path.is_empty() {
        return None;
    }
    let joined: Vec<&str> = op.path.iter().map(Condition::as_str).collect();
    Some(Condition::new(joined.join(" and ")))
}

/// Drop control structures that guard nothing observable: loops without
/// writes, calls or exits lose their branches, and plain `if`s whose arms
/// hold no effects disappear.
fn collapse(pending: Vec<Pending<'_>>, exiting_loops: &HashSet<usize>) -> Vec<Effect> {
    let mut effectful_loops = exiting_loops.clone();
    let mut guarded = HashSet::new();
    for item in &pending {
        if matches!(item.effect.operation, Operation::Write | Operation::Call) {
            effectful_loops.extend(item.op.loops.iter().copied());
        }
        if item.effect.operation != Operation::Branch {
            for condition in &item.op.path {
                guarded.insert(condition.clone());
                guarded.insert(condition.negated());
            }
        }
    }

    pending
        .into_iter()
        .filter(|item| {
            let OpKind::Branch {
                condition,
                guard_exit,
                assertion,
                loop_header,
                ..
            } = &item.op.kind
            else {
                return true;
            };
            let in_pure_loop = item
                .op
                .loops
                .iter()
                .chain(loop_header.iter())
                .any(|id| !effectful_loops.contains(id));
            if in_pure_loop {
                return false;
            }
            *guard_exit || *assertion || loop_header.is_some() || guarded.contains(condition)
        })
        .map(|item| item.effect)
        .collect()
}

fn dedup_reads(effects: Vec<Effect>) -> Vec<Effect> {
    let mut out: Vec<Effect> = Vec::with_capacity(effects.len());
    for effect in effects {
        let repeated = out.last().is_some_and(|last| {
            effect.operation == Operation::Read
                && last.operation == Operation::Read
                && last.target == effect.target
                && last.condition == effect.condition
                && last.unreachable == effect.unreachable
        });
        if !repeated {
            out.push(effect);
        }
    }
    out
}

fn unit_kind(effects: &[Effect], preconditions: &BTreeSet<Condition>, raises: bool) -> UnitKind {
    if effects.iter().any(Effect::is_state_write) {
        return UnitKind::StateTransition;
    }
    let side_effects = effects
        .iter()
        .any(|effect| matches!(effect.operation, Operation::Write | Operation::Call));
    if !side_effects && (!preconditions.is_empty() || raises) {
        return UnitKind::InvariantCheck;
    }
    UnitKind::Function
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontends::{Frontend, PythonFrontend};
    use pretty_assertions::assert_eq;

    fn reduce_python(code: &str) -> Vec<BehavioralUnit> {
        let frontend = PythonFrontend;
        let module = frontend.parse(code).expect("parse");
        let fork = Fork::default();
        let ctx = UnitContext {
            path: "m.py",
            language: Language::Python,
            fork: &fork,
            module: &module,
            rules: frontend.rules(),
        };
        module
            .functions
            .iter()
            .map(|function| {
                let cfg = frontend.lower_to_cfg(function);
                let facts = frontend.dataflow(&cfg);
                reduce(&ctx, function, &cfg, &facts)
            })
            .collect()
    }

    fn rendered(unit: &BehavioralUnit) -> Vec<String> {
        unit.effects
            .iter()
            .map(|e| format!("{} {}", e.operation.as_str(), e.target.name()))
            .collect()
    }

    #[test]
    fn guard_becomes_precondition_and_write_is_ordered() {
        let units = reduce_python(
            r#"
class Account:
    def withdraw(self, value):
        if self.balance < value:
            raise ValueError("low")
        self.balance -= value
        self.nonce += 1
"#,
        );
        let unit = &units[0];
        assert_eq!(unit.kind, UnitKind::StateTransition);
        assert_eq!(
            rendered(unit),
            vec![
                "read self.balance",
                "branch self.balance",
                "read self.balance",
                "write self.balance",
                "read self.nonce",
                "write self.nonce",
            ]
        );
        let preconditions: Vec<_> = unit.preconditions.iter().map(Condition::as_str).collect();
        assert_eq!(preconditions, vec!["not (self.balance < value)"]);
    }

    #[test]
    fn pure_loops_collapse() {
        let units = reduce_python(
            r#"
def total(self, items):
    acc = 0
    for item in items:
        acc = acc + item
    return acc
"#,
        );
        assert!(units[0]
            .effects
            .iter()
            .all(|e| e.operation != Operation::Branch));
        assert_eq!(units[0].kind, UnitKind::Function);
    }

    #[test]
    fn unresolved_calls_stay_opaque() {
        let units = reduce_python(
            r#"
from crypto import verify

def check(sig):
    verify(sig)
    mystery(sig)
    len(sig)
"#,
        );
        let calls: Vec<_> = units[0].calls.iter().cloned().collect();
        assert_eq!(
            calls,
            vec![
                ExternalCallRef::opaque("mystery"),
                ExternalCallRef::resolved("verify", "crypto.verify"),
            ]
        );
    }

    #[test]
    fn assertion_only_function_is_invariant_check() {
        let units = reduce_python(
            r#"
def validate(self):
    assert self.supply >= 0
"#,
        );
        assert_eq!(units[0].kind, UnitKind::InvariantCheck);
        assert!(units[0]
            .preconditions
            .contains(&Condition::new("self.supply >= 0")));
    }

    #[test]
    fn dead_writes_are_tagged_unreachable() {
        let units = reduce_python(
            r#"
def f(self):
    return
    self.x = 1
"#,
        );
        let write = units[0]
            .effects
            .iter()
            .find(|e| e.operation == Operation::Write)
            .map(|e| e.unreachable);
        assert_eq!(write, Some(true));
        assert!(units[0].side_effects_unreachable());
    }

    #[test]
    fn aliased_state_writes_resolve_to_state() {
        let units = reduce_python(
            r#"
def credit(self, who, amount):
    book = self.balances
    book[who] = amount
"#,
        );
        assert!(units[0]
            .effects
            .iter()
            .any(|e| e.is_state_write() && e.target.name() == "self.balances"));
    }
}
