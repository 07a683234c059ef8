use crate::cfg::{ControlFlowGraph, OpKind, Place};
use petgraph::graph::NodeIndex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

const MAX_ALIAS_DEPTH: usize = 8;

/// Where a variable got its current value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefSite {
    /// Bound on entry as a parameter
    Param(String),
    /// Defined by the op with this sequence number
    Op(usize),
}

#[derive(Debug, Clone)]
struct Definition {
    uses: Vec<Place>,
    alias_of: Option<Place>,
}

type Env = BTreeMap<String, BTreeSet<DefSite>>;

/// Reaching definitions and use-def chains for one function.
#[derive(Debug, Clone, Default)]
pub struct DataflowFacts {
    use_def: BTreeMap<(usize, String), BTreeSet<DefSite>>,
    defs: BTreeMap<usize, Definition>,
    tracked: BTreeSet<String>,
}

impl DataflowFacts {
    /// Worklist reaching-definitions over feasible edges, then one pass per
    /// block to attach the reaching set to every use.
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let mut tracked: BTreeSet<String> = cfg.locals.iter().cloned().collect();
        tracked.extend(cfg.params.iter().cloned());

        let mut defs = BTreeMap::new();
        for node in cfg.graph.node_indices() {
            for op in &cfg.graph[node].ops {
                if let OpKind::Define { uses, alias_of, .. } = &op.kind {
                    defs.insert(
                        op.seq,
                        Definition {
                            uses: uses.clone(),
                            alias_of: alias_of.clone(),
                        },
                    );
                }
            }
        }

        let entry_env: Env = cfg
            .params
            .iter()
            .map(|param| (param.clone(), BTreeSet::from([DefSite::Param(param.clone())])))
            .collect();

        let mut in_env: HashMap<NodeIndex, Env> = HashMap::new();
        let mut out_env: HashMap<NodeIndex, Env> = HashMap::new();
        let mut queue: VecDeque<NodeIndex> = cfg.graph.node_indices().collect();
        let mut queued: HashSet<NodeIndex> = queue.iter().copied().collect();

        while let Some(node) = queue.pop_front() {
            queued.remove(&node);

            let mut incoming = if node == cfg.entry {
                entry_env.clone()
            } else {
                Env::new()
            };
            for pred in cfg.predecessors(node) {
                if let Some(env) = out_env.get(&pred) {
                    merge(&mut incoming, env);
                }
            }

            let mut env = incoming.clone();
            for op in &cfg.graph[node].ops {
                if let OpKind::Define { local, .. } = &op.kind {
                    env.insert(local.clone(), BTreeSet::from([DefSite::Op(op.seq)]));
                }
            }
            in_env.insert(node, incoming);

            if out_env.get(&node) != Some(&env) {
                out_env.insert(node, env);
                for succ in cfg.successors(node) {
                    if queued.insert(succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }

        let mut use_def = BTreeMap::new();
        for node in cfg.graph.node_indices() {
            let mut env = in_env.remove(&node).unwrap_or_default();
            for op in &cfg.graph[node].ops {
                for place in op.uses() {
                    if tracked.contains(&place.root) {
                        let reaching = env.get(&place.root).cloned().unwrap_or_default();
                        use_def.insert((op.seq, place.root.clone()), reaching);
                    }
                }
                if let OpKind::Define { local, .. } = &op.kind {
                    env.insert(local.clone(), BTreeSet::from([DefSite::Op(op.seq)]));
                }
            }
        }

        Self {
            use_def,
            defs,
            tracked,
        }
    }

    /// Definitions of `name` reaching the op `seq`.
    pub fn reaching_defs(&self, seq: usize, name: &str) -> Option<&BTreeSet<DefSite>> {
        self.use_def.get(&(seq, name.to_string()))
    }

    /// Parameters and body-defined names
    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.contains(name)
    }

    /// Follow local aliases: when every definition of the place's root that
    /// reaches `seq` aliases the same place, rebase onto it and repeat.
    pub fn resolve_alias(&self, seq: usize, place: &Place) -> Place {
        let mut current = place.clone();
        let mut at = seq;
        for _ in 0..MAX_ALIAS_DEPTH {
            let Some(reaching) = self.reaching_defs(at, &current.root) else {
                break;
            };
            let mut target: Option<(&Place, usize)> = None;
            for site in reaching {
                let DefSite::Op(def_seq) = site else {
                    return current;
                };
                let Some(alias) = self.defs.get(def_seq).and_then(|def| def.alias_of.as_ref())
                else {
                    return current;
                };
                match target {
                    None => target = Some((alias, *def_seq)),
                    Some((seen, _)) if seen == alias => {}
                    Some(_) => return current,
                }
            }
            match target {
                Some((alias, def_seq)) if alias.root != current.root || !alias.is_bare() => {
                    current = current.rebase(alias);
                    at = def_seq;
                }
                _ => break,
            }
        }
        current
    }

    /// Places outside the function's own variables that flow into `name` at
    /// `seq`, following use-def chains transitively. Parameters count as
    /// sources.
    pub fn sources(&self, seq: usize, name: &str) -> BTreeSet<Place> {
        let mut found = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(seq, name.to_string())];

        while let Some((at, var)) = stack.pop() {
            if !visited.insert((at, var.clone())) {
                continue;
            }
            let Some(reaching) = self.reaching_defs(at, &var) else {
                continue;
            };
            for site in reaching {
                match site {
                    DefSite::Param(param) => {
                        found.insert(Place::local(param.clone()));
                    }
                    DefSite::Op(def_seq) => {
                        let Some(def) = self.defs.get(def_seq) else {
                            continue;
                        };
                        for used in &def.uses {
                            if self.tracked.contains(&used.root) {
                                if !used.is_bare() {
                                    found.insert(self.resolve_alias(*def_seq, used));
                                }
                                stack.push((*def_seq, used.root.clone()));
                            } else {
                                found.insert(used.clone());
                            }
                        }
                    }
                }
            }
        }
        found
    }
}

fn merge(into: &mut Env, from: &Env) {
    for (name, sites) in from {
        into.entry(name.clone())
            .or_default()
            .extend(sites.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::ControlFlowGraph;
    use crate::frontends::PYTHON_RULES;
    use crate::ir::{Expr, FunctionIr, Guard, Stmt};

    fn name(n: &str) -> Expr {
        Expr::name(n)
    }

    fn assign(target: Expr, value: Expr, line: usize) -> Stmt {
        Stmt::Assign {
            target,
            value,
            augmented: false,
            line,
        }
    }

    fn lower(body: Vec<Stmt>) -> ControlFlowGraph {
        let function = FunctionIr {
            name: "f".into(),
            qualified: "f".into(),
            params: vec!["value".into()],
            receiver: Some("self".into()),
            line_start: 1,
            line_end: 9,
            body,
        };
        ControlFlowGraph::lower(&function, &PYTHON_RULES)
    }

    fn write_seq(cfg: &ControlFlowGraph) -> usize {
        cfg.ops_in_order()
            .into_iter()
            .find(|(op, _)| matches!(op.kind, OpKind::Write { .. }))
            .map(|(op, _)| op.seq)
            .unwrap_or(usize::MAX)
    }

    #[test]
    fn both_branch_definitions_reach_the_join() {
        let cfg = lower(vec![
            Stmt::If {
                guard: Guard::new(name("value"), "value"),
                then_branch: vec![assign(name("x"), Expr::Literal, 3)],
                else_branch: vec![assign(name("x"), name("value"), 5)],
                line: 2,
            },
            Stmt::If {
                guard: Guard::new(name("x"), "x"),
                then_branch: vec![Stmt::Raise {
                    value: None,
                    line: 7,
                }],
                else_branch: vec![],
                line: 6,
            },
        ]);
        let facts = DataflowFacts::compute(&cfg);
        let last_branch = cfg
            .ops_in_order()
            .into_iter()
            .filter(|(op, _)| matches!(op.kind, OpKind::Branch { .. }))
            .map(|(op, _)| op.seq)
            .last()
            .unwrap_or(0);
        let defs = facts.reaching_defs(last_branch, "x").cloned().unwrap_or_default();
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().all(|site| matches!(site, DefSite::Op(_))));
    }

    #[test]
    fn alias_of_state_is_resolved_through_locals() {
        let cfg = lower(vec![
            assign(name("accounts"), Expr::attribute(name("self"), "accounts"), 2),
            assign(name("book"), name("accounts"), 3),
            assign(
                Expr::Index {
                    base: Box::new(name("book")),
                    index: Box::new(name("value")),
                },
                Expr::Literal,
                4,
            ),
        ]);
        let facts = DataflowFacts::compute(&cfg);
        let seq = write_seq(&cfg);
        let place = Place {
            root: "book".into(),
            path: vec![],
            indexed: true,
        };
        assert_eq!(facts.resolve_alias(seq, &place).render(), "self.accounts");
    }

    #[test]
    fn conflicting_aliases_stay_local() {
        let cfg = lower(vec![
            Stmt::If {
                guard: Guard::new(name("value"), "value"),
                then_branch: vec![assign(name("t"), Expr::attribute(name("self"), "a"), 3)],
                else_branch: vec![assign(name("t"), Expr::attribute(name("self"), "b"), 5)],
                line: 2,
            },
            assign(Expr::attribute(name("t"), "x"), Expr::Literal, 6),
        ]);
        let facts = DataflowFacts::compute(&cfg);
        let place = Place {
            root: "t".into(),
            path: vec!["x".into()],
            indexed: false,
        };
        assert_eq!(facts.resolve_alias(write_seq(&cfg), &place).render(), "t.x");
    }

    #[test]
    fn sources_follow_chains_to_state_and_params() {
        let cfg = lower(vec![
            assign(name("bal"), Expr::attribute(name("self"), "balance"), 2),
            assign(
                name("left"),
                Expr::Compound(vec![name("bal"), name("value")]),
                3,
            ),
            Stmt::If {
                guard: Guard::new(name("left"), "left < 0"),
                then_branch: vec![Stmt::Raise {
                    value: None,
                    line: 5,
                }],
                else_branch: vec![],
                line: 4,
            },
        ]);
        let facts = DataflowFacts::compute(&cfg);
        let branch_seq = cfg
            .ops_in_order()
            .into_iter()
            .find(|(op, _)| matches!(op.kind, OpKind::Branch { .. }))
            .map(|(op, _)| op.seq)
            .unwrap_or(0);
        let rendered: Vec<String> = facts
            .sources(branch_seq, "left")
            .iter()
            .map(Place::render)
            .collect();
        assert!(rendered.contains(&"self.balance".to_string()), "{rendered:?}");
        assert!(rendered.contains(&"value".to_string()), "{rendered:?}");
    }
}
