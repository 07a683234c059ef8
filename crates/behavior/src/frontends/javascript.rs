use super::{
    children_by_field, end_line, line, named_children, parse_tree, pattern_names, text, Frontend,
    LoweringRules, JAVASCRIPT_RULES,
};
use crate::error::Result;
use crate::ir::{Expr, FunctionIr, Guard, ModuleIr, Stmt};
use crate::language::Language;
use tree_sitter::Node;

const ASSERT_CALLS: &[&str] = &["assert", "assert.ok", "console.assert", "invariant", "require"];

/// JavaScript and TypeScript share one frontend; the grammars differ only in
/// node kinds this frontend treats the same way.
pub struct JavaScriptFrontend {
    language: Language,
}

impl JavaScriptFrontend {
    pub fn javascript() -> Self {
        Self {
            language: Language::JavaScript,
        }
    }

    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
        }
    }
}

impl Frontend for JavaScriptFrontend {
    fn language(&self) -> Language {
        self.language
    }

    fn rules(&self) -> &'static LoweringRules {
        &JAVASCRIPT_RULES
    }

    fn parse(&self, source: &str) -> Result<ModuleIr> {
        let tree = parse_tree(self.language, source)?;
        let mut module = ModuleIr::default();
        let walker = Walker { source };
        for node in named_children(tree.root_node()) {
            walker.module_item(node, &mut module);
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

    fn module_item(&self, node: Node, module: &mut ModuleIr) {
        match node.kind() {
            "import_statement" => self.record_import(node, module),
            "export_statement" => {
                for child in named_children(node) {
                    self.module_item(child, module);
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                if let Some(function) = self.function(node, None, None) {
                    module.add_function(function);
                }
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                let Some(class) = node.child_by_field_name("name") else {
                    return;
                };
                let class = self.text(class);
                let Some(body) = node.child_by_field_name("body") else {
                    return;
                };
                for member in named_children(body) {
                    if member.kind() == "method_definition" {
                        if let Some(function) = self.function(member, Some(class), None) {
                            module.add_function(function);
                        }
                    }
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                for declarator in named_children(node) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let (Some(name), Some(value)) = (
                        declarator.child_by_field_name("name"),
                        declarator.child_by_field_name("value"),
                    ) else {
                        continue;
                    };
                    match value.kind() {
                        "arrow_function" | "function_expression" | "function" => {
                            if let Some(function) =
                                self.function(value, None, Some(self.text(name)))
                            {
                                module.add_function(function);
                            }
                        }
                        "call_expression" => self.record_require(name, value, module),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn record_import(&self, node: Node, module: &mut ModuleIr) {
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let from = unquote(self.text(source));
        for clause in named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "import_clause")
        {
            for binding in named_children(clause) {
                match binding.kind() {
                    "identifier" => {
                        module
                            .imports
                            .insert(self.text(binding).to_string(), from.to_string());
                    }
                    "namespace_import" => {
                        if let Some(local) = named_children(binding).first() {
                            module
                                .imports
                                .insert(self.text(*local).to_string(), from.to_string());
                        }
                    }
                    "named_imports" => {
                        for specifier in named_children(binding) {
                            let Some(name) = specifier.child_by_field_name("name") else {
                                continue;
                            };
                            let local = specifier.child_by_field_name("alias").unwrap_or(name);
                            module.imports.insert(
                                self.text(local).to_string(),
                                format!("{from}.{}", self.text(name)),
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// `const x = require("mod")`
    fn record_require(&self, name: Node, call: Node, module: &mut ModuleIr) {
        let is_require = call
            .child_by_field_name("function")
            .is_some_and(|f| self.text(f) == "require");
        if !is_require || name.kind() != "identifier" {
            return;
        }
        let Some(source) = call
            .child_by_field_name("arguments")
            .and_then(|args| named_children(args).into_iter().next())
        else {
            return;
        };
        module
            .imports
            .insert(self.text(name).to_string(), unquote(self.text(source)).to_string());
    }

    fn function(&self, node: Node, class: Option<&str>, binding: Option<&str>) -> Option<FunctionIr> {
        let name = match binding {
            Some(binding) => binding.to_string(),
            None => self.text(node.child_by_field_name("name")?).to_string(),
        };
        let qualified = match class {
            Some(class) => format!("{class}.{name}"),
            None => name.clone(),
        };

        let mut params = Vec::new();
        if let Some(parameters) = node.child_by_field_name("parameters") {
            for param in named_children(parameters) {
                let pattern = param.child_by_field_name("pattern").unwrap_or(param);
                match pattern.kind() {
                    "assignment_pattern" => {
                        if let Some(left) = pattern.child_by_field_name("left") {
                            pattern_names(left, self.source, &mut params);
                        }
                    }
                    _ => pattern_names(pattern, self.source, &mut params),
                }
            }
        } else if let Some(parameter) = node.child_by_field_name("parameter") {
            // `x => ...`
            params.push(self.text(parameter).to_string());
        }

        let body = node.child_by_field_name("body")?;
        let body = if body.kind() == "statement_block" {
            self.block(body)
        } else {
            vec![Stmt::Return {
                value: Some(self.expr(body)),
                line: line(body),
            }]
        };

        Some(FunctionIr {
            name,
            qualified,
            params,
            receiver: class.map(|_| "this".to_string()),
            line_start: line(node),
            line_end: end_line(node),
            body,
        })
    }

    fn block(&self, node: Node) -> Vec<Stmt> {
        let mut out = Vec::new();
        self.stmt(node, &mut out);
        out
    }

    fn field_stmts(&self, node: Node, field: &str) -> Vec<Stmt> {
        node.child_by_field_name(field)
            .map(|b| self.block(b))
            .unwrap_or_default()
    }

    fn stmt(&self, node: Node, out: &mut Vec<Stmt>) {
        let line = line(node);
        match node.kind() {
            "statement_block" | "else_clause" | "finally_clause" => {
                for child in named_children(node) {
                    self.stmt(child, out);
                }
            }
            "expression_statement" => {
                for child in named_children(node) {
                    self.expr_stmt(child, out);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                for declarator in named_children(node) {
                    let Some(name) = declarator.child_by_field_name("name") else {
                        continue;
                    };
                    let Some(value) = declarator.child_by_field_name("value") else {
                        continue;
                    };
                    out.push(Stmt::Assign {
                        target: self.pattern_target(name),
                        value: self.expr(value),
                        augmented: false,
                        line,
                    });
                }
            }
            "if_statement" => {
                let Some(condition) = node.child_by_field_name("condition") else {
                    return;
                };
                out.push(Stmt::If {
                    guard: self.guard(condition),
                    then_branch: self.field_stmts(node, "consequence"),
                    else_branch: self.field_stmts(node, "alternative"),
                    line,
                });
            }
            "for_statement" => {
                if let Some(initializer) = node.child_by_field_name("initializer") {
                    self.stmt(initializer, out);
                }
                let mut body = self.field_stmts(node, "body");
                if let Some(increment) = node.child_by_field_name("increment") {
                    self.expr_stmt(increment, &mut body);
                }
                let guard = node
                    .child_by_field_name("condition")
                    .and_then(|c| match c.kind() {
                        "expression_statement" => named_children(c).into_iter().next(),
                        "empty_statement" => None,
                        _ => Some(c),
                    })
                    .map(|c| self.guard(c));
                out.push(Stmt::Loop {
                    guard,
                    binding: Vec::new(),
                    body,
                    line,
                });
            }
            "for_in_statement" => {
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
                    body: self.field_stmts(node, "body"),
                    line,
                });
            }
            "while_statement" | "do_statement" => {
                let Some(condition) = node.child_by_field_name("condition") else {
                    return;
                };
                out.push(Stmt::Loop {
                    guard: Some(self.guard(condition)),
                    binding: Vec::new(),
                    body: self.field_stmts(node, "body"),
                    line,
                });
            }
            "return_statement" => out.push(Stmt::Return {
                value: named_children(node).first().map(|v| self.expr(*v)),
                line,
            }),
            "throw_statement" => out.push(Stmt::Raise {
                value: named_children(node).first().map(|v| self.expr(*v)),
                line,
            }),
            "break_statement" => out.push(Stmt::Break { line }),
            "continue_statement" => out.push(Stmt::Continue { line }),
            "try_statement" => {
                let handlers = node
                    .child_by_field_name("handler")
                    .map(|handler| vec![self.field_stmts(handler, "body")])
                    .unwrap_or_default();
                out.push(Stmt::Try {
                    body: self.field_stmts(node, "body"),
                    handlers,
                    finally: node
                        .child_by_field_name("finalizer")
                        .map(|f| self.block(f))
                        .unwrap_or_default(),
                    line,
                });
            }
            "switch_statement" => out.extend(self.switch(node)),
            _ => {}
        }
    }

    fn expr_stmt(&self, node: Node, out: &mut Vec<Stmt>) {
        let line = line(node);
        match node.kind() {
            "assignment_expression" | "augmented_assignment_expression" => {
                if let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) {
                    out.push(Stmt::Assign {
                        target: self.pattern_target(left),
                        value: self.expr(right),
                        augmented: node.kind() == "augmented_assignment_expression",
                        line,
                    });
                }
            }
            "update_expression" => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    out.push(Stmt::Assign {
                        target: self.expr(argument),
                        value: Expr::Literal,
                        augmented: true,
                        line,
                    });
                }
            }
            "sequence_expression" => {
                for child in named_children(node) {
                    self.expr_stmt(child, out);
                }
            }
            "call_expression" => match self.assertion(node) {
                Some(guard) => out.push(Stmt::Assert { guard, line }),
                None => out.push(Stmt::Expr {
                    expr: self.expr(node),
                    line,
                }),
            },
            _ => out.push(Stmt::Expr {
                expr: self.expr(node),
                line,
            }),
        }
    }

    fn assertion(&self, call: Node) -> Option<Guard> {
        let callee = self.text(call.child_by_field_name("function")?);
        if !ASSERT_CALLS.contains(&callee) {
            return None;
        }
        let first = named_children(call.child_by_field_name("arguments")?)
            .into_iter()
            .next()?;
        // `require("module")` is an import, not a check.
        if matches!(first.kind(), "string" | "template_string") {
            return None;
        }
        Some(self.guard(first))
    }

    fn guard(&self, node: Node) -> Guard {
        let inner = match node.kind() {
            "parenthesized_expression" => named_children(node).into_iter().next().unwrap_or(node),
            _ => node,
        };
        Guard::new(self.expr(inner), self.text(inner))
    }

    fn switch(&self, node: Node) -> Vec<Stmt> {
        let Some(value) = node.child_by_field_name("value") else {
            return Vec::new();
        };
        let scrutinee = self.guard(value).text;
        let mut out = vec![Stmt::Expr {
            expr: self.expr(value),
            line: line(node),
        }];
        let cases = node
            .child_by_field_name("body")
            .map(named_children)
            .unwrap_or_default();

        let mut chain: Vec<Stmt> = Vec::new();
        for case in cases.into_iter().rev() {
            let mut body = Vec::new();
            for stmt in children_by_field(case, "body") {
                self.stmt(stmt, &mut body);
            }
            // `break` ends the case, not an enclosing loop.
            if matches!(body.last(), Some(Stmt::Break { .. })) {
                body.pop();
            }
            match (case.kind(), case.child_by_field_name("value")) {
                ("switch_case", Some(test)) => {
                    let text = format!("{scrutinee} === {}", self.text(test));
                    chain = vec![Stmt::If {
                        guard: Guard::new(Expr::Literal, text),
                        then_branch: body,
                        else_branch: chain,
                        line: line(case),
                    }];
                }
                ("switch_default", _) => chain = body,
                _ => {}
            }
        }
        out.extend(chain);
        out
    }

    fn pattern_target(&self, node: Node) -> Expr {
        match node.kind() {
            "object_pattern" | "array_pattern" => {
                let mut names = Vec::new();
                pattern_names(node, self.source, &mut names);
                Expr::Compound(names.into_iter().map(Expr::name).collect())
            }
            _ => self.expr(node),
        }
    }

    fn expr(&self, node: Node) -> Expr {
        match node.kind() {
            "identifier" | "this" | "property_identifier" | "shorthand_property_identifier" => {
                Expr::name(self.text(node))
            }
            "member_expression" => {
                let base = node
                    .child_by_field_name("object")
                    .map(|o| self.expr(o))
                    .unwrap_or(Expr::Literal);
                let property = node
                    .child_by_field_name("property")
                    .map(|p| self.text(p))
                    .unwrap_or_default();
                Expr::attribute(base, property)
            }
            "subscript_expression" => Expr::Index {
                base: Box::new(
                    node.child_by_field_name("object")
                        .map(|o| self.expr(o))
                        .unwrap_or(Expr::Literal),
                ),
                index: Box::new(
                    node.child_by_field_name("index")
                        .map(|i| self.expr(i))
                        .unwrap_or(Expr::Literal),
                ),
            },
            "call_expression" | "new_expression" => {
                let callee = node
                    .child_by_field_name("function")
                    .or_else(|| node.child_by_field_name("constructor"))
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
            "true" => Expr::Bool(true),
            "false" => Expr::Bool(false),
            "unary_expression" => {
                let argument = node
                    .child_by_field_name("argument")
                    .map(|a| self.expr(a))
                    .unwrap_or(Expr::Literal);
                let negates = node
                    .child_by_field_name("operator")
                    .is_some_and(|op| self.text(op) == "!");
                if negates {
                    Expr::Not(Box::new(argument))
                } else {
                    argument
                }
            }
            "parenthesized_expression" | "await_expression" | "non_null_expression"
            | "as_expression" | "satisfies_expression" | "spread_element" => named_children(node)
                .first()
                .map(|inner| self.expr(*inner))
                .unwrap_or(Expr::Literal),
            "number" | "string" | "template_string" | "null" | "undefined" | "regex"
            | "arrow_function" | "function_expression" | "function" | "comment" | "type_arguments"
            | "type_annotation" => Expr::Literal,
            "pair" => node
                .child_by_field_name("value")
                .map(|v| self.expr(v))
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

fn unquote(raw: &str) -> &str {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn class_methods_use_this_receiver() {
        let module = JavaScriptFrontend::javascript()
            .parse(
                r#"
import { keccak as hash } from "./crypto";

class Vault {
  deposit(amount) {
    this.total += amount;
  }
}

const fee = (x) => x * 2;
"#,
            )
            .expect("parse");
        let names: Vec<_> = module.functions.iter().map(|f| f.qualified.as_str()).collect();
        assert_eq!(names, vec!["Vault.deposit", "fee"]);
        assert_eq!(module.functions[0].receiver.as_deref(), Some("this"));
        assert_eq!(module.functions[0].params, vec!["amount".to_string()]);
        assert_eq!(
            module.imports.get("hash").map(String::as_str),
            Some("./crypto.keccak")
        );
    }

    #[test]
    fn typescript_parameters_and_asserts() {
        let module = JavaScriptFrontend::typescript()
            .parse(
                r#"
export function burn(ledger: Ledger, amount: number): void {
  assert(amount > 0);
  ledger.supply -= amount;
}
"#,
            )
            .expect("parse");
        let function = &module.functions[0];
        assert_eq!(function.params, vec!["ledger".to_string(), "amount".to_string()]);
        assert!(matches!(
            &function.body[0],
            Stmt::Assert { guard, .. } if guard.text == "amount > 0"
        ));
    }

    #[test]
    fn switch_cases_drop_trailing_break() {
        let module = JavaScriptFrontend::javascript()
            .parse(
                r#"
function route(op) {
  switch (op) {
    case "burn":
      this.burned = true;
      break;
    default:
      return;
  }
}
"#,
            )
            .expect("parse");
        let body = &module.functions[0].body;
        let Some(Stmt::If { then_branch, guard, .. }) = body.get(1) else {
            panic!("expected if chain, got {body:?}");
        };
        assert_eq!(guard.text, r#"op === "burn""#);
        assert_eq!(then_branch.len(), 1);
    }
}
