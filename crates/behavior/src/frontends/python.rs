use super::{
    children_by_field, end_line, first_identifier, line, named_children, parse_tree,
    pattern_names, text, Frontend, LoweringRules, PYTHON_RULES,
};
use crate::error::Result;
use crate::ir::{Expr, FunctionIr, Guard, ModuleIr, Stmt};
use crate::language::Language;
use tree_sitter::Node;

/// Python frontend
pub struct PythonFrontend;

impl Frontend for PythonFrontend {
    fn language(&self) -> Language {
        Language::Python
    }

    fn rules(&self) -> &'static LoweringRules {
        &PYTHON_RULES
    }

    fn parse(&self, source: &str) -> Result<ModuleIr> {
        let tree = parse_tree(Language::Python, source)?;
        let mut module = ModuleIr::default();
        let walker = Walker { source };
        for node in named_children(tree.root_node()) {
            walker.module_item(node, None, &mut module);
        }
        Ok(module)
    }
}

struct Walker<'s> {
    source: &'s str,
}

impl<'s> Walker<'s> {
    fn text(&self, node: Node) -> &'s str {
        text(node, self.source)
    }

    fn module_item(&self, node: Node, class: Option<&str>, module: &mut ModuleIr) {
        match node.kind() {
            "function_definition" => module.add_function(self.function(node, class)),
            "decorated_definition" => {
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.module_item(definition, class, module);
                }
            }
            "class_definition" => {
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                let qualified = match class {
                    Some(outer) => format!("{outer}.{}", self.text(name)),
                    None => self.text(name).to_string(),
                };
                if let Some(body) = node.child_by_field_name("body") {
                    for child in named_children(body) {
                        self.module_item(child, Some(&qualified), module);
                    }
                }
            }
            "import_statement" if class.is_none() => {
                for child in named_children(node) {
                    self.record_import(child, None, module);
                }
            }
            "import_from_statement" if class.is_none() => {
                let from = node
                    .child_by_field_name("module_name")
                    .map(|m| self.text(m).to_string());
                for child in children_by_field(node, "name") {
                    self.record_import(child, from.as_deref(), module);
                }
            }
            _ => {}
        }
    }

    fn record_import(&self, node: Node, from: Option<&str>, module: &mut ModuleIr) {
        let (name, alias) = match node.kind() {
            "dotted_name" => (self.text(node).to_string(), None),
            "aliased_import" => (
                node.child_by_field_name("name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default(),
                node.child_by_field_name("alias")
                    .map(|n| self.text(n).to_string()),
            ),
            _ => return,
        };
        if name.is_empty() {
            return;
        }
        let (local, qualified) = match (alias, from) {
            (Some(alias), Some(from)) => (alias, format!("{from}.{name}")),
            (Some(alias), None) => (alias, name),
            (None, Some(from)) => (name.clone(), format!("{from}.{name}")),
            // `import a.b` binds `a`
            (None, None) => {
                let root = name.split('.').next().unwrap_or(&name).to_string();
                (root.clone(), root)
            }
        };
        module.imports.insert(local, qualified);
    }

    fn function(&self, node: Node, class: Option<&str>) -> FunctionIr {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let qualified = match class {
            Some(class) => format!("{class}.{name}"),
            None => name.clone(),
        };

        let mut params = node
            .child_by_field_name("parameters")
            .map(|p| self.params(p))
            .unwrap_or_default();
        let receiver = match (class, params.first()) {
            (Some(_), Some(first)) if first == "self" || first == "cls" => {
                Some(params.remove(0))
            }
            _ => None,
        };

        let body = node
            .child_by_field_name("body")
            .map(|b| self.block(b))
            .unwrap_or_default();

        FunctionIr {
            name,
            qualified,
            params,
            receiver,
            line_start: line(node),
            line_end: end_line(node),
            body,
        }
    }

    fn params(&self, node: Node) -> Vec<String> {
        named_children(node)
            .into_iter()
            .filter_map(|param| match param.kind() {
                "identifier" => Some(self.text(param).to_string()),
                "default_parameter" | "typed_default_parameter" => param
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string()),
                "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    first_identifier(param, self.source)
                }
                _ => None,
            })
            .collect()
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

    /// The block of clauses like `except` and `finally`, which carry it as an
    /// unnamed child.
    fn clause_block(&self, node: Node) -> Vec<Stmt> {
        named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "block")
            .last()
            .map(|b| self.block(b))
            .unwrap_or_default()
    }

    fn stmt(&self, node: Node, out: &mut Vec<Stmt>) {
        let line = line(node);
        match node.kind() {
            "expression_statement" => {
                for child in named_children(node) {
                    match child.kind() {
                        "assignment" => self.assignment(child, out),
                        "augmented_assignment" => {
                            if let (Some(left), Some(right)) = (
                                child.child_by_field_name("left"),
                                child.child_by_field_name("right"),
                            ) {
                                out.push(Stmt::Assign {
                                    target: self.target(left),
                                    value: self.expr(right),
                                    augmented: true,
                                    line,
                                });
                            }
                        }
                        _ => out.push(Stmt::Expr {
                            expr: self.expr(child),
                            line,
                        }),
                    }
                }
            }
            "if_statement" => {
                if let Some(stmt) = self.if_stmt(node) {
                    out.push(stmt);
                }
            }
            "for_statement" => {
                let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) else {
                    return;
                };
                let mut binding = Vec::new();
                pattern_names(left, self.source, &mut binding);
                let text = format!("{} in {}", self.text(left), self.text(right));
                out.push(Stmt::Loop {
                    guard: Some(Guard::new(self.expr(right), text)),
                    binding,
                    body: self.field_block(node, "body"),
                    line,
                });
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    out.extend(self.field_block(alternative, "body"));
                }
            }
            "while_statement" => {
                let Some(condition) = node.child_by_field_name("condition") else {
                    return;
                };
                out.push(Stmt::Loop {
                    guard: Some(Guard::new(self.expr(condition), self.text(condition))),
                    binding: Vec::new(),
                    body: self.field_block(node, "body"),
                    line,
                });
            }
            "return_statement" => out.push(Stmt::Return {
                value: named_children(node).first().map(|v| self.expr(*v)),
                line,
            }),
            "raise_statement" => out.push(Stmt::Raise {
                value: named_children(node).first().map(|v| self.expr(*v)),
                line,
            }),
            "assert_statement" => {
                if let Some(condition) = named_children(node).first() {
                    out.push(Stmt::Assert {
                        guard: Guard::new(self.expr(*condition), self.text(*condition)),
                        line,
                    });
                }
            }
            "break_statement" => out.push(Stmt::Break { line }),
            "continue_statement" => out.push(Stmt::Continue { line }),
            "try_statement" => {
                let mut body = self.field_block(node, "body");
                let mut handlers = Vec::new();
                let mut finally = Vec::new();
                for child in named_children(node) {
                    match child.kind() {
                        "except_clause" | "except_group_clause" => {
                            handlers.push(self.clause_block(child))
                        }
                        // Runs only when the body did not raise.
                        "else_clause" => body.extend(self.field_block(child, "body")),
                        "finally_clause" => finally = self.clause_block(child),
                        _ => {}
                    }
                }
                out.push(Stmt::Try {
                    body,
                    handlers,
                    finally,
                    line,
                });
            }
            "with_statement" => {
                for item in named_children(node)
                    .into_iter()
                    .filter(|child| child.kind() == "with_clause")
                    .flat_map(named_children)
                {
                    let value = item.child_by_field_name("value").unwrap_or(item);
                    out.push(Stmt::Expr {
                        expr: self.expr(value),
                        line,
                    });
                }
                out.extend(self.field_block(node, "body"));
            }
            "delete_statement" => {
                for target in named_children(node) {
                    out.push(Stmt::Assign {
                        target: self.target(target),
                        value: Expr::Literal,
                        augmented: false,
                        line,
                    });
                }
            }
            _ => {}
        }
    }

    fn assignment(&self, node: Node, out: &mut Vec<Stmt>) {
        let line = line(node);
        let mut targets = Vec::new();
        let mut current = node;
        // `a = b = value` nests assignments on the right.
        loop {
            let Some(left) = current.child_by_field_name("left") else {
                return;
            };
            targets.push(left);
            match current.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => {
                    let value = self.expr(right);
                    for target in targets {
                        out.push(Stmt::Assign {
                            target: self.target(target),
                            value: value.clone(),
                            augmented: false,
                            line,
                        });
                    }
                    return;
                }
                // Bare annotation: `x: int`
                None => return,
            }
        }
    }

    fn target(&self, node: Node) -> Expr {
        match node.kind() {
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => Expr::Compound(
                named_children(node)
                    .into_iter()
                    .map(|part| self.target(part))
                    .collect(),
            ),
            _ => self.expr(node),
        }
    }

    fn if_stmt(&self, node: Node) -> Option<Stmt> {
        let condition = node.child_by_field_name("condition")?;
        let then_branch = self.field_block(node, "consequence");
        let alternatives = children_by_field(node, "alternative");
        Some(Stmt::If {
            guard: Guard::new(self.expr(condition), self.text(condition)),
            then_branch,
            else_branch: self.elif_chain(&alternatives),
            line: line(node),
        })
    }

    fn elif_chain(&self, alternatives: &[Node]) -> Vec<Stmt> {
        let Some(first) = alternatives.first() else {
            return Vec::new();
        };
        match first.kind() {
            "elif_clause" => {
                let Some(condition) = first.child_by_field_name("condition") else {
                    return Vec::new();
                };
                vec![Stmt::If {
                    guard: Guard::new(self.expr(condition), self.text(condition)),
                    then_branch: self.field_block(*first, "consequence"),
                    else_branch: self.elif_chain(&alternatives[1..]),
                    line: line(*first),
                }]
            }
            "else_clause" => self.field_block(*first, "body"),
            _ => Vec::new(),
        }
    }

    fn expr(&self, node: Node) -> Expr {
        match node.kind() {
            "identifier" => Expr::name(self.text(node)),
            "attribute" => {
                let base = node
                    .child_by_field_name("object")
                    .map(|o| self.expr(o))
                    .unwrap_or(Expr::Literal);
                let attr = node
                    .child_by_field_name("attribute")
                    .map(|a| self.text(a))
                    .unwrap_or_default();
                Expr::attribute(base, attr)
            }
            "subscript" => {
                let base = node
                    .child_by_field_name("value")
                    .map(|v| self.expr(v))
                    .unwrap_or(Expr::Literal);
                let index = children_by_field(node, "subscript")
                    .into_iter()
                    .map(|s| self.expr(s))
                    .collect();
                Expr::Index {
                    base: Box::new(base),
                    index: Box::new(Expr::Compound(index)),
                }
            }
            "call" => {
                let callee = node
                    .child_by_field_name("function")
                    .map(|f| self.expr(f))
                    .unwrap_or(Expr::Literal);
                let args = node
                    .child_by_field_name("arguments")
                    .map(|a| {
                        named_children(a)
                            .into_iter()
                            .map(|arg| self.expr(arg))
                            .collect()
                    })
                    .unwrap_or_default();
                Expr::Call {
                    callee: Box::new(callee),
                    args,
                }
            }
            "keyword_argument" => node
                .child_by_field_name("value")
                .map(|v| self.expr(v))
                .unwrap_or(Expr::Literal),
            "true" => Expr::Bool(true),
            "false" => Expr::Bool(false),
            "none" | "integer" | "float" | "string" | "concatenated_string" | "ellipsis"
            | "lambda" | "comment" => Expr::Literal,
            "not_operator" => Expr::Not(Box::new(
                node.child_by_field_name("argument")
                    .map(|a| self.expr(a))
                    .unwrap_or(Expr::Literal),
            )),
            "parenthesized_expression" | "await" => named_children(node)
                .first()
                .map(|inner| self.expr(*inner))
                .unwrap_or(Expr::Literal),
            _ => Expr::Compound(
                named_children(node)
                    .into_iter()
                    .map(|child| self.expr(child))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(code: &str) -> ModuleIr {
        PythonFrontend.parse(code).expect("parse")
    }

    #[test]
    fn methods_are_qualified_and_receiver_split() {
        let module = parse(
            r#"
class Ledger:
    def credit(self, who, amount=0):
        self.balances[who] += amount
"#,
        );
        let function = &module.functions[0];
        assert_eq!(function.qualified, "Ledger.credit");
        assert_eq!(function.receiver.as_deref(), Some("self"));
        assert_eq!(function.params, vec!["who".to_string(), "amount".to_string()]);
        assert!(matches!(
            function.body[0],
            Stmt::Assign {
                augmented: true,
                ..
            }
        ));
    }

    #[test]
    fn elif_chains_nest_in_else_branches() {
        let module = parse(
            r#"
def classify(x):
    if x > 10:
        return 2
    elif x > 0:
        return 1
    else:
        return 0
"#,
        );
        let Stmt::If { else_branch, .. } = &module.functions[0].body[0] else {
            panic!("expected if");
        };
        assert!(matches!(else_branch.as_slice(), [Stmt::If { .. }]));
    }

    #[test]
    fn imports_bind_local_names() {
        let module = parse(
            r#"
import hashlib
from eth.crypto import keccak as k
from rlp import encode

def f():
    pass
"#,
        );
        assert_eq!(module.imports.get("hashlib").map(String::as_str), Some("hashlib"));
        assert_eq!(module.imports.get("k").map(String::as_str), Some("eth.crypto.keccak"));
        assert_eq!(module.imports.get("encode").map(String::as_str), Some("rlp.encode"));
    }

    #[test]
    fn for_loops_bind_names_and_keep_iterable() {
        let module = parse(
            r#"
def drain(self):
    for key, value in self.pending.items():
        print(key)
"#,
        );
        let Stmt::Loop { guard, binding, .. } = &module.functions[0].body[0] else {
            panic!("expected loop");
        };
        assert_eq!(binding, &vec!["key".to_string(), "value".to_string()]);
        assert_eq!(
            guard.as_ref().map(|g| g.text.as_str()),
            Some("key, value in self.pending.items()")
        );
    }
}
