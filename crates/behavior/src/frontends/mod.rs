//! Per-language frontends. Each one turns a tree-sitter AST into the shared
//! statement IR; lowering and dataflow are common to all of them.

mod javascript;
mod python;
mod rust;

use crate::cfg::ControlFlowGraph;
use crate::dataflow::DataflowFacts;
use crate::error::{ExtractionError, Result};
use crate::ir::{Expr, FunctionIr, ModuleIr};
use crate::language::Language;
use regex::Regex;
use std::sync::OnceLock;
use tree_sitter::{Node, Parser, Tree};

pub use javascript::JavaScriptFrontend;
pub use python::PythonFrontend;
pub use rust::RustFrontend;

/// Language facts the shared lowering and reduction need
#[derive(Debug)]
pub struct LoweringRules {
    /// Roots whose attributes are protocol/object state
    pub state_roots: &'static [&'static str],
    /// Methods that mutate their receiver
    pub mutating_methods: &'static [&'static str],
    /// Methods that only inspect their receiver; any other method called on
    /// a state or parameter handle is an external call
    pub accessor_methods: &'static [&'static str],
    /// Callees that are part of the language, not external dependencies
    pub builtins: &'static [&'static str],
}

impl LoweringRules {
    pub fn is_state_root(&self, name: &str) -> bool {
        self.state_roots.contains(&name)
    }

    pub fn is_accessor(&self, method: &str) -> bool {
        self.accessor_methods.contains(&method)
    }

    pub fn is_builtin(&self, callee: &str) -> bool {
        self.builtins.contains(&callee)
            || callee
                .split(['.', ':'])
                .next()
                .is_some_and(|root| self.builtins.contains(&root))
    }
}

/// One implementation per supported language.
///
/// Every frontend produces the same IR, so everything downstream of
/// [`Frontend::parse`] is language-agnostic.
pub trait Frontend: Send + Sync {
    fn language(&self) -> Language;

    fn rules(&self) -> &'static LoweringRules;

    /// Parse source into per-function IR.
    fn parse(&self, source: &str) -> Result<ModuleIr>;

    fn lower_to_cfg(&self, function: &FunctionIr) -> ControlFlowGraph {
        ControlFlowGraph::lower(function, self.rules())
    }

    fn dataflow(&self, cfg: &ControlFlowGraph) -> DataflowFacts {
        DataflowFacts::compute(cfg)
    }
}

pub fn frontend_for(language: Language) -> Result<Box<dyn Frontend>> {
    match language {
        Language::Python => Ok(Box::new(PythonFrontend)),
        Language::Rust => Ok(Box::new(RustFrontend)),
        Language::JavaScript => Ok(Box::new(JavaScriptFrontend::javascript())),
        Language::TypeScript => Ok(Box::new(JavaScriptFrontend::typescript())),
        Language::Unknown => Err(ExtractionError::unsupported_language(language.as_str())),
    }
}

pub static PYTHON_RULES: LoweringRules = LoweringRules {
    state_roots: &["self", "cls", "state"],
    mutating_methods: &[
        "append",
        "extend",
        "insert",
        "pop",
        "remove",
        "clear",
        "update",
        "add",
        "discard",
        "setdefault",
        "popitem",
        "sort",
        "reverse",
    ],
    accessor_methods: &[
        "get", "keys", "values", "items", "copy", "count", "index", "startswith", "endswith",
        "lower", "upper", "strip", "split", "join", "format", "encode", "decode", "hex",
        "to_bytes", "bit_length", "is_integer",
    ],
    builtins: &[
        "len", "print", "range", "int", "str", "float", "bool", "list", "dict", "set", "tuple",
        "min", "max", "sum", "abs", "any", "all", "isinstance", "issubclass", "enumerate", "zip",
        "map", "filter", "sorted", "reversed", "hash", "hex", "bytes", "bytearray", "type",
        "getattr", "hasattr", "iter", "next", "repr", "round", "divmod", "pow", "super", "object",
        "Exception", "ValueError", "TypeError", "KeyError", "IndexError", "AssertionError",
        "RuntimeError", "NotImplementedError",
    ],
};

pub static RUST_RULES: LoweringRules = LoweringRules {
    state_roots: &["self", "state"],
    mutating_methods: &[
        "push",
        "push_back",
        "push_front",
        "pop",
        "pop_back",
        "pop_front",
        "insert",
        "remove",
        "clear",
        "extend",
        "retain",
        "truncate",
        "drain",
        "append",
        "entry",
        "get_mut",
        "set",
        "swap",
        "take",
        "replace",
        "sort",
        "sort_by",
        "sort_unstable",
        "dedup",
    ],
    accessor_methods: &[
        "len", "is_empty", "get", "first", "last", "iter", "keys", "values", "contains",
        "contains_key", "clone", "cloned", "copied", "as_ref", "as_slice", "as_str", "as_bytes",
        "to_vec", "to_string", "to_owned", "unwrap", "unwrap_or", "unwrap_or_default", "expect",
        "ok_or", "ok_or_else", "is_some", "is_none", "is_ok", "is_err", "map", "and_then",
        "checked_add", "checked_sub", "checked_mul", "checked_div", "saturating_add",
        "saturating_sub", "wrapping_add", "wrapping_sub", "overflowing_add", "overflowing_sub",
        "min", "max", "cmp", "eq", "hash", "borrow", "lock", "read",
    ],
    builtins: &[
        "Ok", "Err", "Some", "None", "Box", "Vec", "String", "Default", "HashMap", "HashSet",
        "BTreeMap", "BTreeSet", "Arc", "Rc", "Self", "drop", "std", "core",
    ],
};

pub static JAVASCRIPT_RULES: LoweringRules = LoweringRules {
    state_roots: &["this", "state"],
    mutating_methods: &[
        "push", "pop", "shift", "unshift", "splice", "set", "delete", "add", "clear", "sort",
        "reverse", "fill",
    ],
    accessor_methods: &[
        "get", "has", "includes", "indexOf", "slice", "map", "filter", "find", "some", "every",
        "reduce", "forEach", "keys", "values", "entries", "toString", "toFixed", "concat",
        "join", "startsWith", "endsWith", "at",
    ],
    builtins: &[
        "console", "Math", "JSON", "Object", "Array", "Number", "String", "Boolean", "BigInt",
        "Promise", "Symbol", "Error", "TypeError", "RangeError", "parseInt", "parseFloat",
        "isNaN", "Map", "Set",
    ],
};

pub(crate) fn parse_tree(language: Language, source: &str) -> Result<Tree> {
    let ts_language = language.tree_sitter_language()?;
    let mut parser = Parser::new();
    parser
        .set_language(&ts_language)
        .map_err(|e| ExtractionError::tree_sitter(format!("Failed to set language: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ExtractionError::tree_sitter("Parser returned no tree"))?;

    let root = tree.root_node();
    if root.has_error() {
        let (line, column) = first_error(root).unwrap_or((1, 1));
        return Err(ExtractionError::Syntax { line, column });
    }
    Ok(tree)
}

fn first_error(node: Node) -> Option<(usize, usize)> {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        return Some((pos.row + 1, pos.column + 1));
    }
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error())
        .find_map(first_error)
}

pub(crate) fn text<'s>(node: Node, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

pub(crate) fn line(node: Node) -> usize {
    node.start_position().row + 1
}

pub(crate) fn end_line(node: Node) -> usize {
    node.end_position().row + 1
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub(crate) fn children_by_field<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// First identifier found in a pattern, depth first.
pub(crate) fn first_identifier(node: Node, source: &str) -> Option<String> {
    if node.kind() == "identifier" {
        return Some(text(node, source).to_string());
    }
    named_children(node)
        .into_iter()
        .find_map(|child| first_identifier(child, source))
}

/// Every identifier bound by a pattern (`a, (b, c)` → a, b, c).
pub(crate) fn pattern_names(node: Node, source: &str, out: &mut Vec<String>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            out.push(text(node, source).to_string())
        }
        _ => {
            for child in named_children(node) {
                pattern_names(child, source, out);
            }
        }
    }
}

/// Best-effort places from unparsed text such as macro token trees.
pub(crate) fn expr_from_text(raw: &str) -> Expr {
    static STRINGS: OnceLock<Option<Regex>> = OnceLock::new();
    static PATHS: OnceLock<Option<Regex>> = OnceLock::new();

    let strings = STRINGS.get_or_init(|| Regex::new(r#""(?:\\.|[^"\\])*""#).ok());
    let paths = PATHS.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)((?:\s*\.\s*[A-Za-z_][A-Za-z0-9_]*)*)").ok()
    });

    let cleaned = match strings {
        Some(re) => re.replace_all(raw, "\"\"").into_owned(),
        None => raw.to_string(),
    };
    let Some(paths) = paths else {
        return Expr::Literal;
    };

    let mut parts = Vec::new();
    for capture in paths.captures_iter(&cleaned) {
        let root = &capture[1];
        if is_keyword(root) || root.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        let mut expr = Expr::name(root);
        if let Some(rest) = capture.get(2) {
            for segment in rest.as_str().split('.').map(str::trim).filter(|s| !s.is_empty()) {
                expr = Expr::attribute(expr, segment);
            }
        }
        parts.push(expr);
    }
    Expr::Compound(parts)
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "true" | "false" | "as" | "if" | "else" | "let" | "mut" | "ref" | "return" | "in"
            | "not" | "and" | "or" | "None" | "True" | "False"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_from_text_finds_attribute_paths() {
        let expr = expr_from_text(r#"amount <= self.balance, "balance too low for {}""#);
        let Expr::Compound(parts) = expr else {
            panic!("expected compound");
        };
        let dotted: Vec<_> = parts.iter().filter_map(Expr::dotted).collect();
        assert_eq!(dotted, vec!["amount".to_string(), "self.balance".to_string()]);
    }

    #[test]
    fn builtins_match_on_root() {
        assert!(RUST_RULES.is_builtin("Vec::new"));
        assert!(PYTHON_RULES.is_builtin("len"));
        assert!(!PYTHON_RULES.is_builtin("verify_signature"));
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = parse_tree(Language::Python, "def broken(:\n    pass\n");
        assert!(matches!(err, Err(ExtractionError::Syntax { line: 1, .. })));
    }
}
