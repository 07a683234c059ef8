use crate::frontends::LoweringRules;
use crate::ir::{Expr, FunctionIr, Guard, Stmt};
use drift_protocol::Condition;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// A storage location named by a root variable and an attribute path.
///
/// `self.balances[addr].nonce` is root `self`, path `[balances, nonce]`,
/// indexed. Index expressions are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Place {
    pub root: String,
    pub path: Vec<String>,
    pub indexed: bool,
}

impl Place {
    pub fn local(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path: Vec::new(),
            indexed: false,
        }
    }

    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Name(name) => Some(Self::local(name.clone())),
            Expr::Attribute { base, attr } => {
                let mut place = Self::from_expr(base)?;
                place.path.push(attr.clone());
                Some(place)
            }
            Expr::Index { base, .. } => {
                let mut place = Self::from_expr(base)?;
                place.indexed = true;
                Some(place)
            }
            _ => None,
        }
    }

    /// A plain variable with no attribute or element access
    pub fn is_bare(&self) -> bool {
        self.path.is_empty() && !self.indexed
    }

    pub fn render(&self) -> String {
        let mut out = self.root.clone();
        for segment in &self.path {
            out.push('.');
            out.push_str(segment);
        }
        out
    }

    /// Replace the root with `onto`, keeping this place's path below it.
    pub fn rebase(&self, onto: &Place) -> Place {
        let mut path = onto.path.clone();
        path.extend(self.path.iter().cloned());
        Place {
            root: onto.root.clone(),
            path,
            indexed: onto.indexed || self.indexed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Return,
    Raise,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Local (re)definition
    Define {
        local: String,
        uses: Vec<Place>,
        /// Set when the value is itself a place, e.g. `accounts = self.accounts`
        alias_of: Option<Place>,
    },
    Read {
        place: Place,
    },
    Write {
        place: Place,
    },
    Call {
        callee: String,
        receiver: Option<Place>,
        method: Option<String>,
        mutating: bool,
    },
    Branch {
        condition: Condition,
        uses: Vec<Place>,
        /// `if C: raise/return` with no else branch
        guard_exit: bool,
        /// Condition of an assert-like statement
        assertion: bool,
        loop_header: Option<usize>,
    },
    Exit {
        kind: ExitKind,
        uses: Vec<Place>,
    },
}

/// One operation with its global sequence number (source order)
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub seq: usize,
    pub line: usize,
    pub kind: OpKind,
    /// Enclosing loop ids, outermost first
    pub loops: Vec<usize>,
    /// Path condition at this op
    pub path: Vec<Condition>,
}

impl Op {
    /// Not nested under any branch or loop
    pub fn is_top_level(&self) -> bool {
        self.loops.is_empty() && self.path.is_empty()
    }

    /// Places this op reads through, in order.
    pub fn uses(&self) -> Vec<&Place> {
        match &self.kind {
            OpKind::Define { uses, .. }
            | OpKind::Branch { uses, .. }
            | OpKind::Exit { uses, .. } => uses.iter().collect(),
            OpKind::Read { place } | OpKind::Write { place } => vec![place],
            OpKind::Call { receiver, .. } => receiver.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Next,
    True,
    False,
    Back,
    Break,
    Continue,
    Return,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    pub kind: EdgeKind,
    /// False for branches a constant condition rules out
    pub feasible: bool,
}

/// Control-flow graph of one function
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub graph: DiGraph<BasicBlock, FlowEdge>,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
    pub params: Vec<String>,
    pub receiver: Option<String>,
    /// Names defined inside the body
    pub locals: BTreeSet<String>,
    reachable: HashSet<NodeIndex>,
}

impl ControlFlowGraph {
    /// Lower a function body to a CFG.
    pub fn lower(function: &FunctionIr, rules: &LoweringRules) -> Self {
        let mut lowerer = Lowerer::new(rules);
        let entry = lowerer.new_block();
        if let Some(end) = lowerer.lower_stmts(&function.body, entry) {
            let exit = lowerer.exit;
            lowerer.edge(end, exit, EdgeKind::Return, true);
        }

        let Lowerer {
            graph,
            exit,
            locals,
            ..
        } = lowerer;
        let reachable = feasible_reach(&graph, entry);

        Self {
            graph,
            entry,
            exit,
            params: function.params.clone(),
            receiver: function.receiver.clone(),
            locals,
            reachable,
        }
    }

    pub fn is_reachable(&self, block: NodeIndex) -> bool {
        self.reachable.contains(&block)
    }

    /// Every op with its reachability, in sequence order.
    pub fn ops_in_order(&self) -> Vec<(&Op, bool)> {
        let mut ops: Vec<(&Op, bool)> = self
            .graph
            .node_indices()
            .flat_map(|node| {
                let reachable = self.is_reachable(node);
                self.graph[node].ops.iter().map(move |op| (op, reachable))
            })
            .collect();
        ops.sort_by_key(|(op, _)| op.seq);
        ops
    }

    /// Predecessors along feasible edges
    pub fn predecessors(&self, block: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(block, Direction::Incoming)
            .filter(|edge| edge.weight().feasible)
            .map(|edge| edge.source())
            .collect()
    }

    pub fn successors(&self, block: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(block, Direction::Outgoing)
            .filter(|edge| edge.weight().feasible)
            .map(|edge| edge.target())
            .collect()
    }

    pub fn edge_kinds(&self) -> Vec<EdgeKind> {
        self.graph.edge_weights().map(|edge| edge.kind).collect()
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|param| param == name)
    }
}

fn feasible_reach(graph: &DiGraph<BasicBlock, FlowEdge>, entry: NodeIndex) -> HashSet<NodeIndex> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([entry]);
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node) {
            continue;
        }
        for edge in graph.edges_directed(node, Direction::Outgoing) {
            if edge.weight().feasible {
                queue.push_back(edge.target());
            }
        }
    }
    seen
}

struct LoopFrame {
    header: NodeIndex,
    after: NodeIndex,
}

struct Lowerer<'r> {
    rules: &'r LoweringRules,
    graph: DiGraph<BasicBlock, FlowEdge>,
    exit: NodeIndex,
    seq: usize,
    path: Vec<Condition>,
    loops: Vec<LoopFrame>,
    loop_ids: Vec<usize>,
    next_loop_id: usize,
    handlers: Vec<Vec<NodeIndex>>,
    locals: BTreeSet<String>,
}

impl<'r> Lowerer<'r> {
    fn new(rules: &'r LoweringRules) -> Self {
        let mut graph = DiGraph::new();
        let exit = graph.add_node(BasicBlock::default());
        Self {
            rules,
            graph,
            exit,
            seq: 0,
            path: Vec::new(),
            loops: Vec::new(),
            loop_ids: Vec::new(),
            next_loop_id: 0,
            handlers: Vec::new(),
            locals: BTreeSet::new(),
        }
    }

    fn new_block(&mut self) -> NodeIndex {
        self.graph.add_node(BasicBlock::default())
    }

    fn edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind, feasible: bool) {
        self.graph.add_edge(from, to, FlowEdge { kind, feasible });
    }

    fn emit(&mut self, block: NodeIndex, line: usize, kind: OpKind) {
        let op = Op {
            seq: self.seq,
            line,
            kind,
            loops: self.loop_ids.clone(),
            path: self.path.clone(),
        };
        self.seq += 1;
        self.graph[block].ops.push(op);
    }

    /// Lower a statement list; `None` when control cannot fall out of it.
    fn lower_stmts(&mut self, stmts: &[Stmt], block: NodeIndex) -> Option<NodeIndex> {
        let mut current = Some(block);
        for stmt in stmts {
            // Statements after a return/raise/break still get lowered, into a
            // block nothing jumps to.
            let block = match current {
                Some(block) => block,
                None => self.new_block(),
            };
            current = self.lower_stmt(stmt, block);
        }
        current
    }

    fn lower_stmt(&mut self, stmt: &Stmt, block: NodeIndex) -> Option<NodeIndex> {
        match stmt {
            Stmt::Expr { expr, line } => Some(self.lower_expr(expr, block, *line)),
            Stmt::Assign {
                target,
                value,
                augmented,
                line,
            } => {
                let block = self.lower_expr(value, block, *line);
                Some(self.lower_assign(target, value, *augmented, !*augmented, block, *line))
            }
            Stmt::If {
                guard,
                then_branch,
                else_branch,
                line,
            } => self.lower_if(guard, then_branch, else_branch, block, *line),
            Stmt::Loop {
                guard,
                binding,
                body,
                line,
            } => Some(self.lower_loop(guard.as_ref(), binding, body, block, *line)),
            Stmt::Return { value, line } => {
                let block = self.lower_optional(value.as_ref(), block, *line);
                let uses = value.as_ref().map(places).unwrap_or_default();
                self.emit(
                    block,
                    *line,
                    OpKind::Exit {
                        kind: ExitKind::Return,
                        uses,
                    },
                );
                let exit = self.exit;
                self.edge(block, exit, EdgeKind::Return, true);
                None
            }
            Stmt::Raise { value, line } => {
                let block = self.lower_optional(value.as_ref(), block, *line);
                let uses = value.as_ref().map(places).unwrap_or_default();
                self.emit(
                    block,
                    *line,
                    OpKind::Exit {
                        kind: ExitKind::Raise,
                        uses,
                    },
                );
                self.raise_edges(block);
                None
            }
            Stmt::Assert { guard, line } => {
                let block = self.lower_expr(&guard.expr, block, *line);
                self.emit(
                    block,
                    *line,
                    OpKind::Branch {
                        condition: Condition::new(&guard.text),
                        uses: places(&guard.expr),
                        guard_exit: false,
                        assertion: true,
                        loop_header: None,
                    },
                );
                let can_fail = guard.expr.constant_truth() != Some(true);
                let exit = self.exit;
                self.edge(block, exit, EdgeKind::Exception, can_fail);
                Some(block)
            }
            Stmt::Break { .. } => {
                if let Some(after) = self.loops.last().map(|frame| frame.after) {
                    self.edge(block, after, EdgeKind::Break, true);
                }
                None
            }
            Stmt::Continue { .. } => {
                if let Some(header) = self.loops.last().map(|frame| frame.header) {
                    self.edge(block, header, EdgeKind::Continue, true);
                }
                None
            }
            Stmt::Try {
                body,
                handlers,
                finally,
                line,
            } => self.lower_try(body, handlers, finally, block, *line),
        }
    }

    fn lower_optional(&mut self, expr: Option<&Expr>, block: NodeIndex, line: usize) -> NodeIndex {
        match expr {
            Some(expr) => self.lower_expr(expr, block, line),
            None => block,
        }
    }

    fn raise_edges(&mut self, block: NodeIndex) {
        let targets = self
            .handlers
            .last()
            .cloned()
            .unwrap_or_else(|| vec![self.exit]);
        for target in targets {
            self.edge(block, target, EdgeKind::Exception, true);
        }
    }

    fn lower_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        augmented: bool,
        alias: bool,
        block: NodeIndex,
        line: usize,
    ) -> NodeIndex {
        match target {
            Expr::Name(name) => {
                let mut uses = places(value);
                if augmented {
                    uses.insert(0, Place::local(name.clone()));
                }
                let alias_of = if alias { Place::from_expr(value) } else { None };
                self.locals.insert(name.clone());
                self.emit(
                    block,
                    line,
                    OpKind::Define {
                        local: name.clone(),
                        uses,
                        alias_of,
                    },
                );
                block
            }
            Expr::Compound(parts) => {
                // Destructuring: every part depends on the whole value.
                let mut block = block;
                for part in parts {
                    block = self.lower_assign(part, value, augmented, false, block, line);
                }
                block
            }
            Expr::Attribute { .. } | Expr::Index { .. } => match Place::from_expr(target) {
                Some(place) => {
                    let block = self.lower_index_operands(target, block, line);
                    if augmented {
                        self.emit(block, line, OpKind::Read { place: place.clone() });
                    }
                    self.emit(block, line, OpKind::Write { place });
                    block
                }
                None => self.lower_expr(target, block, line),
            },
            other => self.lower_expr(other, block, line),
        }
    }

    fn lower_if(
        &mut self,
        guard: &Guard,
        then_branch: &[Stmt],
        else_branch: &[Stmt],
        block: NodeIndex,
        line: usize,
    ) -> Option<NodeIndex> {
        let block = self.lower_expr(&guard.expr, block, line);
        let condition = Condition::new(&guard.text);
        let truth = guard.expr.constant_truth();
        let guard_exit = else_branch.is_empty()
            && then_branch.last().is_some_and(Stmt::exits_function);

        self.emit(
            block,
            line,
            OpKind::Branch {
                condition: condition.clone(),
                uses: places(&guard.expr),
                guard_exit,
                assertion: false,
                loop_header: None,
            },
        );

        self.path.push(condition.clone());
        let then_block = self.new_block();
        self.edge(block, then_block, EdgeKind::True, truth != Some(false));
        let then_end = self.lower_stmts(then_branch, then_block);
        self.path.pop();

        self.path.push(condition.negated());
        let else_block = self.new_block();
        self.edge(block, else_block, EdgeKind::False, truth != Some(true));
        let else_end = self.lower_stmts(else_branch, else_block);
        self.path.pop();

        if then_end.is_none() && else_end.is_none() {
            return None;
        }
        let join = self.new_block();
        for end in [then_end, else_end].into_iter().flatten() {
            self.edge(end, join, EdgeKind::Next, true);
        }
        Some(join)
    }

    fn lower_loop(
        &mut self,
        guard: Option<&Guard>,
        binding: &[String],
        body: &[Stmt],
        block: NodeIndex,
        line: usize,
    ) -> NodeIndex {
        let block = match guard {
            Some(guard) if !binding.is_empty() => self.lower_expr(&guard.expr, block, line),
            _ => block,
        };

        let id = self.next_loop_id;
        self.next_loop_id += 1;
        let header = self.new_block();
        self.edge(block, header, EdgeKind::Next, true);
        let after = self.new_block();

        self.loop_ids.push(id);
        self.loops.push(LoopFrame { header, after });

        if let Some(guard) = guard {
            // A `while` condition is re-evaluated on every iteration.
            let header_block = if binding.is_empty() {
                self.lower_expr(&guard.expr, header, line)
            } else {
                header
            };
            let truth = if binding.is_empty() {
                guard.expr.constant_truth()
            } else {
                None
            };
            self.emit(
                header_block,
                line,
                OpKind::Branch {
                    condition: Condition::new(&guard.text),
                    uses: places(&guard.expr),
                    guard_exit: false,
                    assertion: false,
                    loop_header: Some(id),
                },
            );
            self.edge(header_block, after, EdgeKind::False, truth != Some(true));
            self.path.push(Condition::new(&guard.text));
            let body_block = self.new_block();
            self.edge(header_block, body_block, EdgeKind::True, truth != Some(false));
            self.bind_iteration(guard, binding, body_block, line);
            self.finish_loop_body(body, body_block, header);
            self.path.pop();
        } else {
            let body_block = self.new_block();
            self.edge(header, body_block, EdgeKind::Next, true);
            self.finish_loop_body(body, body_block, header);
        }

        self.loops.pop();
        self.loop_ids.pop();
        after
    }

    fn bind_iteration(&mut self, guard: &Guard, binding: &[String], block: NodeIndex, line: usize) {
        let element_of = Place::from_expr(&guard.expr).map(|mut place| {
            place.indexed = true;
            place
        });
        for name in binding {
            self.locals.insert(name.clone());
            self.emit(
                block,
                line,
                OpKind::Define {
                    local: name.clone(),
                    uses: places(&guard.expr),
                    alias_of: element_of.clone(),
                },
            );
        }
    }

    fn finish_loop_body(&mut self, body: &[Stmt], body_block: NodeIndex, header: NodeIndex) {
        if let Some(end) = self.lower_stmts(body, body_block) {
            self.edge(end, header, EdgeKind::Back, true);
        }
    }

    fn lower_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Vec<Stmt>],
        finally: &[Stmt],
        block: NodeIndex,
        line: usize,
    ) -> Option<NodeIndex> {
        let handler_entries: Vec<NodeIndex> = handlers.iter().map(|_| self.new_block()).collect();
        let body_entry = self.new_block();
        self.edge(block, body_entry, EdgeKind::Next, true);

        let first_body_block = body_entry.index();
        if !handler_entries.is_empty() {
            self.handlers.push(handler_entries.clone());
        }
        let body_end = self.lower_stmts(body, body_entry);
        if !handler_entries.is_empty() {
            self.handlers.pop();
        }
        let last_body_block = self.graph.node_count();

        // Any block of the protected body may throw into any handler.
        for index in first_body_block..last_body_block {
            let node = NodeIndex::new(index);
            for &handler in &handler_entries {
                self.edge(node, handler, EdgeKind::Exception, true);
            }
        }

        let mut ends = vec![body_end];
        self.path.push(Condition::new(format!("exception in try at line {line}")));
        for (stmts, &entry) in handlers.iter().zip(&handler_entries) {
            ends.push(self.lower_stmts(stmts, entry));
        }
        self.path.pop();

        let falls_through = ends.iter().any(Option::is_some);
        let join = self.new_block();
        for end in ends.into_iter().flatten() {
            self.edge(end, join, EdgeKind::Next, true);
        }
        let finally_end = self.lower_stmts(finally, join);
        if falls_through {
            finally_end
        } else {
            None
        }
    }

    /// Emit reads and calls of an expression in evaluation order.
    ///
    /// Returns the block evaluation continues in; `?` splits the block.
    fn lower_expr(&mut self, expr: &Expr, block: NodeIndex, line: usize) -> NodeIndex {
        match expr {
            Expr::Name(_) | Expr::Bool(_) | Expr::Literal => block,
            Expr::Attribute { base, .. } | Expr::Index { base, .. } => {
                match Place::from_expr(expr) {
                    Some(place) => {
                        let block = self.lower_index_operands(expr, block, line);
                        self.emit(block, line, OpKind::Read { place });
                        block
                    }
                    None => {
                        let block = self.lower_expr(base, block, line);
                        match expr {
                            Expr::Index { index, .. } => self.lower_expr(index, block, line),
                            _ => block,
                        }
                    }
                }
            }
            Expr::Call { callee, args } => self.lower_call(callee, args, block, line),
            Expr::Not(inner) => self.lower_expr(inner, block, line),
            Expr::Fallible(inner) => {
                let block = self.lower_expr(inner, block, line);
                let exit = self.exit;
                self.edge(block, exit, EdgeKind::Exception, true);
                let next = self.new_block();
                self.edge(block, next, EdgeKind::Next, true);
                next
            }
            Expr::Compound(parts) => parts
                .iter()
                .fold(block, |block, part| self.lower_expr(part, block, line)),
        }
    }

    /// Lower the index expressions inside a place chain without reading the
    /// place itself.
    fn lower_index_operands(&mut self, expr: &Expr, block: NodeIndex, line: usize) -> NodeIndex {
        match expr {
            Expr::Attribute { base, .. } => self.lower_index_operands(base, block, line),
            Expr::Index { base, index } => {
                let block = self.lower_index_operands(base, block, line);
                self.lower_expr(index, block, line)
            }
            _ => block,
        }
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr], block: NodeIndex, line: usize) -> NodeIndex {
        match callee {
            Expr::Attribute { base, attr } => match Place::from_expr(base) {
                Some(receiver) => {
                    let mut block = self.lower_index_operands(base, block, line);
                    for arg in args {
                        block = self.lower_expr(arg, block, line);
                    }
                    let mutating = self.rules.mutating_methods.contains(&attr.as_str());
                    self.emit(
                        block,
                        line,
                        OpKind::Call {
                            callee: format!("{}.{attr}", receiver.render()),
                            receiver: Some(receiver),
                            method: Some(attr.clone()),
                            mutating,
                        },
                    );
                    block
                }
                None => {
                    // Method on a computed value: evaluate it, the call itself
                    // is a value operation.
                    let mut block = self.lower_expr(base, block, line);
                    for arg in args {
                        block = self.lower_expr(arg, block, line);
                    }
                    block
                }
            },
            Expr::Name(name) => {
                let mut block = block;
                for arg in args {
                    block = self.lower_expr(arg, block, line);
                }
                self.emit(
                    block,
                    line,
                    OpKind::Call {
                        callee: name.clone(),
                        receiver: None,
                        method: None,
                        mutating: false,
                    },
                );
                block
            }
            other => {
                let mut block = self.lower_expr(other, block, line);
                for arg in args {
                    block = self.lower_expr(arg, block, line);
                }
                block
            }
        }
    }
}

/// Places an expression reads, left to right.
pub(crate) fn places(expr: &Expr) -> Vec<Place> {
    let mut out = Vec::new();
    collect_places(expr, &mut out);
    out
}

fn collect_places(expr: &Expr, out: &mut Vec<Place>) {
    match expr {
        Expr::Name(name) => out.push(Place::local(name.clone())),
        Expr::Attribute { base, .. } | Expr::Index { base, .. } => match Place::from_expr(expr) {
            Some(place) => {
                collect_index_places(expr, out);
                out.push(place);
            }
            None => {
                collect_places(base, out);
                if let Expr::Index { index, .. } = expr {
                    collect_places(index, out);
                }
            }
        },
        Expr::Call { callee, args } => {
            match callee.as_ref() {
                Expr::Attribute { base, .. } => collect_places(base, out),
                Expr::Name(_) => {}
                other => collect_places(other, out),
            }
            for arg in args {
                collect_places(arg, out);
            }
        }
        Expr::Not(inner) | Expr::Fallible(inner) => collect_places(inner, out),
        Expr::Compound(parts) => {
            for part in parts {
                collect_places(part, out);
            }
        }
        Expr::Bool(_) | Expr::Literal => {}
    }
}

fn collect_index_places(expr: &Expr, out: &mut Vec<Place>) {
    match expr {
        Expr::Attribute { base, .. } => collect_index_places(base, out),
        Expr::Index { base, index } => {
            collect_index_places(base, out);
            collect_places(index, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontends::PYTHON_RULES;

    fn name(n: &str) -> Expr {
        Expr::name(n)
    }

    fn self_attr(attr: &str) -> Expr {
        Expr::attribute(name("self"), attr)
    }

    fn function(body: Vec<Stmt>) -> FunctionIr {
        FunctionIr {
            name: "f".into(),
            qualified: "C.f".into(),
            params: vec!["value".into()],
            receiver: Some("self".into()),
            line_start: 1,
            line_end: 10,
            body,
        }
    }

    #[test]
    fn code_after_return_is_unreachable() {
        let body = vec![
            Stmt::Return {
                value: None,
                line: 2,
            },
            Stmt::Assign {
                target: self_attr("nonce"),
                value: Expr::Literal,
                augmented: false,
                line: 3,
            },
        ];
        let cfg = ControlFlowGraph::lower(&function(body), &PYTHON_RULES);
        let ops = cfg.ops_in_order();
        let write = ops
            .iter()
            .find(|(op, _)| matches!(op.kind, OpKind::Write { .. }))
            .map(|(_, reachable)| *reachable);
        assert_eq!(write, Some(false));
    }

    #[test]
    fn constant_false_branch_is_infeasible() {
        let body = vec![Stmt::If {
            guard: Guard::new(Expr::Bool(false), "False"),
            then_branch: vec![Stmt::Assign {
                target: self_attr("nonce"),
                value: Expr::Literal,
                augmented: false,
                line: 3,
            }],
            else_branch: vec![],
            line: 2,
        }];
        let cfg = ControlFlowGraph::lower(&function(body), &PYTHON_RULES);
        let write = cfg
            .ops_in_order()
            .into_iter()
            .find(|(op, _)| matches!(op.kind, OpKind::Write { .. }))
            .map(|(_, reachable)| reachable);
        assert_eq!(write, Some(false));
        assert!(cfg.edge_kinds().contains(&EdgeKind::True));
    }

    #[test]
    fn loops_get_back_and_break_edges() {
        let body = vec![Stmt::Loop {
            guard: Some(Guard::new(name("running"), "running")),
            binding: vec![],
            body: vec![
                Stmt::If {
                    guard: Guard::new(name("done"), "done"),
                    then_branch: vec![Stmt::Break { line: 4 }],
                    else_branch: vec![],
                    line: 3,
                },
                Stmt::Expr {
                    expr: Expr::Call {
                        callee: Box::new(name("tick")),
                        args: vec![],
                    },
                    line: 5,
                },
            ],
            line: 2,
        }];
        let cfg = ControlFlowGraph::lower(&function(body), &PYTHON_RULES);
        let kinds = cfg.edge_kinds();
        assert!(kinds.contains(&EdgeKind::Back));
        assert!(kinds.contains(&EdgeKind::Break));
        let call = cfg
            .ops_in_order()
            .into_iter()
            .find(|(op, _)| matches!(op.kind, OpKind::Call { .. }))
            .map(|(op, _)| op.loops.clone());
        assert_eq!(call, Some(vec![0]));
    }

    #[test]
    fn try_body_blocks_reach_handlers() {
        let body = vec![Stmt::Try {
            body: vec![Stmt::Raise {
                value: None,
                line: 3,
            }],
            handlers: vec![vec![Stmt::Assign {
                target: self_attr("failed"),
                value: Expr::Bool(true),
                augmented: false,
                line: 5,
            }]],
            finally: vec![],
            line: 2,
        }];
        let cfg = ControlFlowGraph::lower(&function(body), &PYTHON_RULES);
        let write_reachable = cfg
            .ops_in_order()
            .into_iter()
            .find(|(op, _)| matches!(op.kind, OpKind::Write { .. }))
            .map(|(_, reachable)| reachable);
        assert_eq!(write_reachable, Some(true));
        assert!(cfg.edge_kinds().contains(&EdgeKind::Exception));
    }

    #[test]
    fn handler_ops_carry_the_exception_path() {
        let body = vec![Stmt::Try {
            body: vec![Stmt::Assign {
                target: self_attr("a"),
                value: Expr::Literal,
                augmented: false,
                line: 3,
            }],
            handlers: vec![vec![Stmt::Assign {
                target: self_attr("b"),
                value: Expr::Literal,
                augmented: false,
                line: 5,
            }]],
            finally: vec![],
            line: 2,
        }];
        let cfg = ControlFlowGraph::lower(&function(body), &PYTHON_RULES);
        let paths: Vec<(usize, Vec<Condition>)> = cfg
            .ops_in_order()
            .into_iter()
            .filter(|(op, _)| matches!(op.kind, OpKind::Write { .. }))
            .map(|(op, _)| (op.line, op.path.clone()))
            .collect();
        assert_eq!(
            paths,
            vec![
                (3, vec![]),
                (5, vec![Condition::new("exception in try at line 2")]),
            ]
        );
    }

    #[test]
    fn place_rebase_keeps_path_below_alias() {
        let alias = Place {
            root: "self".into(),
            path: vec!["accounts".into()],
            indexed: true,
        };
        let through = Place {
            root: "acct".into(),
            path: vec!["balance".into()],
            indexed: false,
        };
        assert_eq!(through.rebase(&alias).render(), "self.accounts.balance");
    }
}
