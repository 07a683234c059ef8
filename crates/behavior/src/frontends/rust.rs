use super::{
    children_by_field, end_line, expr_from_text, line, named_children, parse_tree, pattern_names,
    text, Frontend, LoweringRules, RUST_RULES,
};
use crate::error::Result;
use crate::ir::{Expr, FunctionIr, Guard, ModuleIr, Stmt};
use crate::language::Language;
use tree_sitter::Node;

/// Rust frontend
pub struct RustFrontend;

impl Frontend for RustFrontend {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn rules(&self) -> &'static LoweringRules {
        &RUST_RULES
    }

    fn parse(&self, source: &str) -> Result<ModuleIr> {
        let tree = parse_tree(Language::Rust, source)?;
        let mut module = ModuleIr::default();
        let walker = Walker { source };
        walker.items(tree.root_node(), "", None, &mut module);
        Ok(module)
    }
}

const ASSERT_MACROS: &[&str] = &[
    "assert",
    "debug_assert",
    "ensure",
    "require",
    "assert_eq",
    "debug_assert_eq",
    "assert_ne",
    "debug_assert_ne",
];

const DIVERGING_MACROS: &[&str] = &["panic", "bail", "unreachable", "unimplemented", "todo"];

struct Walker<'s> {
    source: &'s str,
}

impl<'s> Walker<'s> {
    fn text(&self, node: Node) -> &'s str {
        text(node, self.source)
    }

    fn items(&self, container: Node, prefix: &str, owner: Option<&str>, module: &mut ModuleIr) {
        for item in named_children(container) {
            match item.kind() {
                "function_item" => {
                    if let Some(function) = self.function(item, prefix, owner) {
                        module.add_function(function);
                    }
                }
                "impl_item" => {
                    let Some(ty) = item.child_by_field_name("type") else {
                        continue;
                    };
                    let ty = type_name(self.text(ty));
                    if let Some(body) = item.child_by_field_name("body") {
                        self.items(body, prefix, Some(&ty), module);
                    }
                }
                // Default method bodies
                "trait_item" => {
                    let (Some(name), Some(body)) = (
                        item.child_by_field_name("name"),
                        item.child_by_field_name("body"),
                    ) else {
                        continue;
                    };
                    self.items(body, prefix, Some(self.text(name)), module);
                }
                "mod_item" => {
                    let (Some(name), Some(body)) = (
                        item.child_by_field_name("name"),
                        item.child_by_field_name("body"),
                    ) else {
                        continue;
                    };
                    let nested = format!("{prefix}{}.", self.text(name));
                    self.items(body, &nested, None, module);
                }
                "use_declaration" if owner.is_none() => {
                    if let Some(argument) = item.child_by_field_name("argument") {
                        self.record_use(argument, "", module);
                    }
                }
                _ => {}
            }
        }
    }

    fn record_use(&self, node: Node, base: &str, module: &mut ModuleIr) {
        let join = |path: &str| {
            if base.is_empty() {
                path.to_string()
            } else {
                format!("{base}::{path}")
            }
        };
        match node.kind() {
            "identifier" | "scoped_identifier" => {
                let path = join(self.text(node));
                let local = path.rsplit("::").next().unwrap_or(&path).to_string();
                if local != "self" {
                    module.imports.insert(local, path);
                }
            }
            "use_as_clause" => {
                if let (Some(path), Some(alias)) = (
                    node.child_by_field_name("path"),
                    node.child_by_field_name("alias"),
                ) {
                    module
                        .imports
                        .insert(self.text(alias).to_string(), join(self.text(path)));
                }
            }
            "scoped_use_list" => {
                let nested = node
                    .child_by_field_name("path")
                    .map(|p| join(self.text(p)))
                    .unwrap_or_else(|| base.to_string());
                if let Some(list) = node.child_by_field_name("list") {
                    self.record_use(list, &nested, module);
                }
            }
            "use_list" => {
                for child in named_children(node) {
                    self.record_use(child, base, module);
                }
            }
            _ => {}
        }
    }

    fn function(&self, node: Node, prefix: &str, owner: Option<&str>) -> Option<FunctionIr> {
        let name = self.text(node.child_by_field_name("name")?).to_string();
        // Signatures without a body have no behavior.
        let body = node.child_by_field_name("body")?;
        let qualified = match owner {
            Some(owner) => format!("{prefix}{owner}.{name}"),
            None => format!("{prefix}{name}"),
        };

        let mut params = Vec::new();
        let mut receiver = None;
        if let Some(parameters) = node.child_by_field_name("parameters") {
            for param in named_children(parameters) {
                match param.kind() {
                    "self_parameter" => receiver = Some("self".to_string()),
                    "parameter" => {
                        if let Some(pattern) = param.child_by_field_name("pattern") {
                            pattern_names(pattern, self.source, &mut params);
                        }
                    }
                    _ => {}
                }
            }
        }
        params.retain(|p| p != "_");

        Some(FunctionIr {
            name,
            qualified,
            params,
            receiver,
            line_start: line(node),
            line_end: end_line(node),
            body: self.block(body),
        })
    }

    fn block(&self, node: Node) -> Vec<Stmt> {
        let mut out = Vec::new();
        for child in named_children(node) {
            self.stmt(child, &mut out);
        }
        out
    }

    fn field_block(&self, node: Node, field: &str) -> Vec<Stmt> {
        node.child_by_field_name(field)
            .map(|b| self.block(b))
            .unwrap_or_default()
    }

    fn stmt(&self, node: Node, out: &mut Vec<Stmt>) {
        let line = line(node);
        match node.kind() {
            "expression_statement" => {
                for child in named_children(node) {
                    self.stmt(child, out);
                }
            }
            "let_declaration" => {
                let Some(pattern) = node.child_by_field_name("pattern") else {
                    return;
                };
                let Some(value) = node.child_by_field_name("value") else {
                    return;
                };
                let value_expr = self.expr(value);
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    // `let P = v else { diverge };`
                    let text = format!("not ({} matches {})", self.text(value), self.text(pattern));
                    out.push(Stmt::If {
                        guard: Guard::new(value_expr.clone(), text),
                        then_branch: self.block(alternative),
                        else_branch: Vec::new(),
                        line,
                    });
                }
                out.push(Stmt::Assign {
                    target: self.pattern_target(pattern),
                    value: value_expr,
                    augmented: false,
                    line,
                });
            }
            "assignment_expression" | "compound_assignment_expr" => {
                if let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) {
                    out.push(Stmt::Assign {
                        target: self.expr(left),
                        value: self.expr(right),
                        augmented: node.kind() == "compound_assignment_expr",
                        line,
                    });
                }
            }
            "if_expression" => {
                if let Some(stmt) = self.if_expr(node) {
                    out.push(stmt);
                }
            }
            "match_expression" => out.extend(self.match_expr(node)),
            "while_expression" => {
                let Some(condition) = node.child_by_field_name("condition") else {
                    return;
                };
                out.push(Stmt::Loop {
                    guard: Some(self.condition(condition)),
                    binding: Vec::new(),
                    body: self.field_block(node, "body"),
                    line,
                });
            }
            "loop_expression" => out.push(Stmt::Loop {
                guard: None,
                binding: Vec::new(),
                body: self.field_block(node, "body"),
                line,
            }),
            "for_expression" => {
                let (Some(pattern), Some(value)) = (
                    node.child_by_field_name("pattern"),
                    node.child_by_field_name("value"),
                ) else {
                    return;
                };
                let mut binding = Vec::new();
                pattern_names(pattern, self.source, &mut binding);
                let text = format!("{} in {}", self.text(pattern), self.text(value));
                out.push(Stmt::Loop {
                    guard: Some(Guard::new(self.expr(value), text)),
                    binding,
                    body: self.field_block(node, "body"),
                    line,
                });
            }
            "return_expression" => out.push(Stmt::Return {
                value: named_children(node).first().map(|v| self.expr(*v)),
                line,
            }),
            "break_expression" => out.push(Stmt::Break { line }),
            "continue_expression" => out.push(Stmt::Continue { line }),
            "block" | "unsafe_block" => {
                for child in named_children(node) {
                    self.stmt(child, out);
                }
            }
            "macro_invocation" => out.push(self.macro_stmt(node)),
            "line_comment" | "block_comment" | "attribute_item" | "empty_statement" => {}
            kind if kind.ends_with("_item") || kind == "use_declaration" => {}
            _ => out.push(Stmt::Expr {
                expr: self.expr(node),
                line,
            }),
        }
    }

    fn pattern_target(&self, pattern: Node) -> Expr {
        let mut names = Vec::new();
        pattern_names(pattern, self.source, &mut names);
        names.retain(|n| n != "_");
        match names.len() {
            1 => Expr::name(names.remove(0)),
            _ => Expr::Compound(names.into_iter().map(Expr::name).collect()),
        }
    }

    /// `if let P = v` conditions become `v matches P`.
    fn condition(&self, node: Node) -> Guard {
        match node.kind() {
            "let_condition" => {
                let value = node.child_by_field_name("value");
                let pattern = node.child_by_field_name("pattern");
                let text = format!(
                    "{} matches {}",
                    value.map(|v| self.text(v)).unwrap_or_default(),
                    pattern.map(|p| self.text(p)).unwrap_or_default()
                );
                Guard::new(value.map(|v| self.expr(v)).unwrap_or(Expr::Literal), text)
            }
            _ => Guard::new(self.expr(node), self.text(node)),
        }
    }

    fn if_expr(&self, node: Node) -> Option<Stmt> {
        let condition = node.child_by_field_name("condition")?;
        let else_branch = match node.child_by_field_name("alternative") {
            Some(alternative) => {
                let mut out = Vec::new();
                for child in named_children(alternative) {
                    self.stmt(child, &mut out);
                }
                out
            }
            None => Vec::new(),
        };
        Some(Stmt::If {
            guard: self.condition(condition),
            then_branch: self.field_block(node, "consequence"),
            else_branch,
            line: line(node),
        })
    }

    /// A match lowers to an if-chain over its arms, in order.
    fn match_expr(&self, node: Node) -> Vec<Stmt> {
        let Some(value) = node.child_by_field_name("value") else {
            return Vec::new();
        };
        let scrutinee = self.text(value);
        let mut out = vec![Stmt::Expr {
            expr: self.expr(value),
            line: line(node),
        }];
        let arms: Vec<Node> = node
            .child_by_field_name("body")
            .map(|body| {
                named_children(body)
                    .into_iter()
                    .filter(|arm| arm.kind() == "match_arm")
                    .collect()
            })
            .unwrap_or_default();

        let mut chain: Vec<Stmt> = Vec::new();
        for arm in arms.into_iter().rev() {
            let mut body = Vec::new();
            if let Some(value) = arm.child_by_field_name("value") {
                self.stmt(value, &mut body);
            }
            let pattern = arm.child_by_field_name("pattern");
            let pattern_text = pattern.map(|p| self.text(p)).unwrap_or("_");
            if pattern_text == "_" {
                chain = body;
                continue;
            }
            let text = format!("{scrutinee} matches {pattern_text}");
            chain = vec![Stmt::If {
                guard: Guard::new(Expr::Literal, text),
                then_branch: body,
                else_branch: chain,
                line: line(arm),
            }];
        }
        out.extend(chain);
        out
    }

    fn macro_stmt(&self, node: Node) -> Stmt {
        let line = line(node);
        let name = node
            .child_by_field_name("macro")
            .map(|m| self.text(m))
            .unwrap_or_default();
        let name = name.rsplit("::").next().unwrap_or(name);
        let tokens = named_children(node)
            .into_iter()
            .find(|child| child.kind() == "token_tree")
            .map(|tt| self.text(tt))
            .unwrap_or_default();
        let inner = strip_delimiters(tokens);
        let args = split_top_level(inner);

        if ASSERT_MACROS.contains(&name) {
            let text = match (name.ends_with("_eq"), name.ends_with("_ne"), args.as_slice()) {
                (true, _, [left, right, ..]) => format!("{left} == {right}"),
                (_, true, [left, right, ..]) => format!("{left} != {right}"),
                (_, _, [first, ..]) => first.to_string(),
                _ => inner.to_string(),
            };
            return Stmt::Assert {
                guard: Guard::new(expr_from_text(&text), text),
                line,
            };
        }
        if DIVERGING_MACROS.contains(&name) {
            return Stmt::Raise {
                value: Some(expr_from_text(inner)),
                line,
            };
        }
        Stmt::Expr {
            expr: expr_from_text(inner),
            line,
        }
    }

    fn expr(&self, node: Node) -> Expr {
        match node.kind() {
            "identifier" | "self" | "scoped_identifier" => Expr::name(self.text(node)),
            "field_expression" => {
                let base = node
                    .child_by_field_name("value")
                    .map(|v| self.expr(v))
                    .unwrap_or(Expr::Literal);
                let field = node
                    .child_by_field_name("field")
                    .map(|f| self.text(f))
                    .unwrap_or_default();
                Expr::attribute(base, field)
            }
            "index_expression" => {
                let children = named_children(node);
                let base = children.first().map(|b| self.expr(*b)).unwrap_or(Expr::Literal);
                let index = children.get(1).map(|i| self.expr(*i)).unwrap_or(Expr::Literal);
                Expr::Index {
                    base: Box::new(base),
                    index: Box::new(index),
                }
            }
            "call_expression" => {
                let callee = node
                    .child_by_field_name("function")
                    .map(|f| self.expr(f))
                    .unwrap_or(Expr::Literal);
                let args = node
                    .child_by_field_name("arguments")
                    .map(|a| named_children(a).into_iter().map(|arg| self.expr(arg)).collect())
                    .unwrap_or_default();
                Expr::Call {
                    callee: Box::new(callee),
                    args,
                }
            }
            "generic_function" => node
                .child_by_field_name("function")
                .map(|f| self.expr(f))
                .unwrap_or(Expr::Literal),
            "boolean_literal" => Expr::Bool(self.text(node) == "true"),
            "unary_expression" => {
                let inner = named_children(node)
                    .first()
                    .map(|i| self.expr(*i))
                    .unwrap_or(Expr::Literal);
                if self.text(node).trim_start().starts_with('!') {
                    Expr::Not(Box::new(inner))
                } else {
                    inner
                }
            }
            "reference_expression" | "parenthesized_expression" | "await_expression" => {
                named_children(node)
                    .into_iter()
                    .find(|child| child.kind() != "mutable_specifier")
                    .map(|inner| self.expr(inner))
                    .unwrap_or(Expr::Literal)
            }
            "type_cast_expression" => node
                .child_by_field_name("value")
                .map(|v| self.expr(v))
                .unwrap_or(Expr::Literal),
            "try_expression" => Expr::Fallible(Box::new(
                named_children(node)
                    .first()
                    .map(|i| self.expr(*i))
                    .unwrap_or(Expr::Literal),
            )),
            "macro_invocation" => {
                let tokens = named_children(node)
                    .into_iter()
                    .find(|child| child.kind() == "token_tree")
                    .map(|tt| self.text(tt))
                    .unwrap_or_default();
                expr_from_text(strip_delimiters(tokens))
            }
            "integer_literal" | "float_literal" | "string_literal" | "raw_string_literal"
            | "char_literal" | "closure_expression" | "unit_expression" | "line_comment"
            | "block_comment" | "type_identifier" | "primitive_type" | "generic_type" => {
                Expr::Literal
            }
            "struct_expression" => node
                .child_by_field_name("body")
                .map(|body| {
                    Expr::Compound(
                        named_children(body)
                            .into_iter()
                            .map(|field| match field.child_by_field_name("value") {
                                Some(value) => self.expr(value),
                                None => self.expr(field),
                            })
                            .collect(),
                    )
                })
                .unwrap_or(Expr::Literal),
            "field_initializer" | "shorthand_field_initializer" => Expr::Compound(
                children_by_field(node, "value")
                    .into_iter()
                    .map(|v| self.expr(v))
                    .collect(),
            ),
            _ => Expr::Compound(
                named_children(node)
                    .into_iter()
                    .map(|child| self.expr(child))
                    .collect(),
            ),
        }
    }
}

/// `Foo<T>` and `crate::Foo` both name `Foo`.
fn type_name(raw: &str) -> String {
    let base = raw.split('<').next().unwrap_or(raw).trim();
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn strip_delimiters(tokens: &str) -> &str {
    let trimmed = tokens.trim();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next_back()) {
        (Some('(' | '[' | '{'), Some(')' | ']' | '}')) => &trimmed[1..trimmed.len() - 1],
        _ => trimmed,
    }
}

/// Split macro arguments on commas outside any nesting.
fn split_top_level(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = inner[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}
