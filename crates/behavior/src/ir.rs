//! Language-agnostic statement IR produced by every frontend.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Attribute { base: Box<Expr>, attr: String },
    Index { base: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Bool(bool),
    /// Numbers, strings, null-likes, and anything with no observable places
    Literal,
    Not(Box<Expr>),
    /// Propagates an error to the caller (`expr?`)
    Fallible(Box<Expr>),
    /// Any other expression; sub-expressions evaluate left to right
    Compound(Vec<Expr>),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn attribute(base: Expr, attr: impl Into<String>) -> Self {
        Expr::Attribute {
            base: Box::new(base),
            attr: attr.into(),
        }
    }

    /// Statically known truth value, if any.
    pub fn constant_truth(&self) -> Option<bool> {
        match self {
            Expr::Bool(value) => Some(*value),
            Expr::Not(inner) => inner.constant_truth().map(|value| !value),
            Expr::Compound(parts) if parts.len() == 1 => parts[0].constant_truth(),
            _ => None,
        }
    }

    /// Dotted rendering of a name/attribute/index chain, `None` for other shapes.
    pub fn dotted(&self) -> Option<String> {
        match self {
            Expr::Name(name) => Some(name.clone()),
            Expr::Attribute { base, attr } => base.dotted().map(|base| format!("{base}.{attr}")),
            Expr::Index { base, .. } => base.dotted(),
            _ => None,
        }
    }
}

/// A tested condition: the parsed expression plus its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub expr: Expr,
    pub text: String,
}

impl Guard {
    pub fn new(expr: Expr, text: impl AsRef<str>) -> Self {
        Self {
            expr,
            text: drift_protocol::normalize_text(text.as_ref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr {
        expr: Expr,
        line: usize,
    },
    Assign {
        target: Expr,
        value: Expr,
        augmented: bool,
        line: usize,
    },
    If {
        guard: Guard,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        line: usize,
    },
    /// `while` loops carry their condition; `for` loops carry the iterable
    /// as the guard expression and the per-iteration names in `binding`.
    Loop {
        /// `None` for unconditional loops
        guard: Option<Guard>,
        binding: Vec<String>,
        body: Vec<Stmt>,
        line: usize,
    },
    Return {
        value: Option<Expr>,
        line: usize,
    },
    Raise {
        value: Option<Expr>,
        line: usize,
    },
    Assert {
        guard: Guard,
        line: usize,
    },
    Break {
        line: usize,
    },
    Continue {
        line: usize,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Vec<Stmt>>,
        finally: Vec<Stmt>,
        line: usize,
    },
}

impl Stmt {
    pub fn line(&self) -> usize {
        match self {
            Stmt::Expr { line, .. }
            | Stmt::Assign { line, .. }
            | Stmt::If { line, .. }
            | Stmt::Loop { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::Raise { line, .. }
            | Stmt::Assert { line, .. }
            | Stmt::Break { line }
            | Stmt::Continue { line }
            | Stmt::Try { line, .. } => *line,
        }
    }

    /// Control never falls through this statement.
    pub fn terminates(&self) -> bool {
        matches!(
            self,
            Stmt::Return { .. } | Stmt::Raise { .. } | Stmt::Break { .. } | Stmt::Continue { .. }
        )
    }

    pub fn exits_function(&self) -> bool {
        matches!(self, Stmt::Return { .. } | Stmt::Raise { .. })
    }
}

/// One analyzable function or method
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionIr {
    pub name: String,
    /// `Class.method` or `module.function`
    pub qualified: String,
    pub params: Vec<String>,
    /// `self` / `this` / `cls` when the function is a method
    pub receiver: Option<String>,
    pub line_start: usize,
    pub line_end: usize,
    pub body: Vec<Stmt>,
}

/// Everything a frontend extracts from one source file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleIr {
    pub functions: Vec<FunctionIr>,
    /// Local binding → fully qualified import path
    pub imports: BTreeMap<String, String>,
    /// Qualified names of every function defined in the file
    pub definitions: BTreeSet<String>,
}

impl ModuleIr {
    pub fn add_function(&mut self, function: FunctionIr) {
        self.definitions.insert(function.qualified.clone());
        self.functions.push(function);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_truth_sees_through_negation() {
        assert_eq!(Expr::Bool(false).constant_truth(), Some(false));
        assert_eq!(Expr::Not(Box::new(Expr::Bool(false))).constant_truth(), Some(true));
        assert_eq!(Expr::name("flag").constant_truth(), None);
    }

    #[test]
    fn dotted_renders_attribute_chains() {
        let expr = Expr::Index {
            base: Box::new(Expr::attribute(Expr::name("self"), "balances")),
            index: Box::new(Expr::name("addr")),
        };
        assert_eq!(expr.dotted().as_deref(), Some("self.balances"));
        assert_eq!(Expr::Literal.dotted(), None);
    }
}
