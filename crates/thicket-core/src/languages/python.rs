//! Python language parser implementation.
//!
//! Handles .py and .pyi files. Python's AST is relatively
//! straightforward with clear function and class boundaries.

use super::{get_text, line_span, Extraction, LanguageParser};
use crate::model::NodeType;
use tree_sitter::{Language, Node, Tree};

pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn name(&self) -> &'static str {
        "python"
    }

    fn grammar(&self) -> Language {
        tree_sitter_python::language()
    }

    fn extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn extract(&self, tree: &Tree, source: &str, out: &mut Extraction) {
        extract_from_node(&tree.root_node(), source, out, None);
    }
}

/// Recursively extracts nodes from the Python AST.
///
/// `class` carries the enclosing class name and node ID.
fn extract_from_node(node: &Node, source: &str, out: &mut Extraction, class: Option<(&str, &str)>) {
    match node.kind() {
        "function_definition" => {
            extract_function(node, source, out, class);
            return;
        }

        "class_definition" => {
            if let Some((name, id)) = extract_class(node, source, out) {
                if let Some(body) = node.child_by_field_name("body") {
                    for i in 0..body.child_count() {
                        if let Some(child) = body.child(i) {
                            extract_from_node(&child, source, out, Some((name.as_str(), id.as_str())));
                        }
                    }
                }
                return;
            }
        }

        "import_statement" => {
            for i in 0..node.named_child_count() {
                if let Some(child) = node.named_child(i) {
                    let module = match child.kind() {
                        "aliased_import" => child.child_by_field_name("name"),
                        _ => Some(child),
                    };
                    if let Some(module) = module {
                        out.import(&get_text(&module, source));
                    }
                }
            }
            return;
        }

        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                out.import(&get_text(&module, source));
            }
            return;
        }

        // Module-level assignments (could be constants)
        "expression_statement" if class.is_none() => {
            if let Some(assign) = find_child_by_kind(node, "assignment") {
                extract_assignment(&assign, source, out);
            }
        }

        _ => {}
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            extract_from_node(&child, source, out, class);
        }
    }
}

/// Extracts a function or method definition.
fn extract_function(node: &Node, source: &str, out: &mut Extraction, class: Option<(&str, &str)>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = get_text(&name_node, source);
    let (start, end) = line_span(node);

    let (node_type, qualified_name) = match class {
        Some((cls, _)) => (NodeType::Method, format!("{}.{}", cls, name)),
        None => (NodeType::Function, name.clone()),
    };

    let mut entity = out
        .node(node_type, &name, &qualified_name)
        .with_lines(start, end)
        .with_signature(build_function_signature(node, source, &name))
        .exported(!name.starts_with('_'))
        .with_doc_comment(extract_docstring(node, source));
    if let Some(decorators) = decorators(node, source) {
        entity = entity.with_property("decorators", decorators);
    }

    let id = out.add(entity, class.map(|(_, id)| id));

    let mut calls = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        collect_calls(&body, source, &mut calls);
    }
    for callee in calls {
        out.call(&id, callee);
    }
}

/// Extracts a class definition. Returns its name and ID.
fn extract_class(node: &Node, source: &str, out: &mut Extraction) -> Option<(String, String)> {
    let name_node = node.child_by_field_name("name")?;
    let name = get_text(&name_node, source);
    let (start, end) = line_span(node);

    let mut entity = out
        .node(NodeType::Class, &name, &name)
        .with_lines(start, end)
        .exported(!name.starts_with('_'))
        .with_doc_comment(extract_docstring(node, source));
    if let Some(bases) = node.child_by_field_name("superclasses") {
        let bases: Vec<String> = (0..bases.named_child_count())
            .filter_map(|i| bases.named_child(i))
            .map(|b| get_text(&b, source))
            .collect();
        if !bases.is_empty() {
            entity = entity.with_property("bases", bases.join(","));
        }
    }
    if let Some(decorators) = decorators(node, source) {
        entity = entity.with_property("decorators", decorators);
    }

    let id = out.add(entity, None);
    Some((name, id))
}

/// Extracts a module-level assignment. UPPERCASE names are constants.
fn extract_assignment(node: &Node, source: &str, out: &mut Extraction) {
    let Some(left) = node.child_by_field_name("left") else {
        return;
    };
    // Only handle simple identifiers, not destructuring
    if left.kind() != "identifier" {
        return;
    }

    let name = get_text(&left, source);
    let node_type = if name.chars().all(|c| c.is_uppercase() || c.is_ascii_digit() || c == '_') {
        NodeType::Constant
    } else {
        NodeType::Variable
    };
    let (start, end) = line_span(node);

    let entity = out
        .node(node_type, &name, &name)
        .with_lines(start, end)
        .exported(!name.starts_with('_'));
    out.add(entity, None);
}

// ============================================================================
// Helper functions
// ============================================================================

/// Finds a child node by its kind.
fn find_child_by_kind<'a>(node: &'a Node, kind: &str) -> Option<Node<'a>> {
    (0..node.child_count())
        .filter_map(|i| node.child(i))
        .find(|child| child.kind() == kind)
}

/// Decorator names from an enclosing `decorated_definition`, comma separated.
fn decorators(node: &Node, source: &str) -> Option<String> {
    let parent = node.parent().filter(|p| p.kind() == "decorated_definition")?;
    let names: Vec<String> = (0..parent.named_child_count())
        .filter_map(|i| parent.named_child(i))
        .filter(|c| c.kind() == "decorator")
        .map(|c| get_text(&c, source).trim_start_matches('@').trim().to_string())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(","))
    }
}

/// Builds a function signature.
fn build_function_signature(node: &Node, source: &str, name: &str) -> String {
    let params = node
        .child_by_field_name("parameters")
        .map(|n| get_text(&n, source))
        .unwrap_or_else(|| "()".to_string());

    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| format!(" -> {}", get_text(&n, source)))
        .unwrap_or_default();

    format!("def {}{}{}", name, params, return_type)
}

/// Extracts docstring from a function or class.
fn extract_docstring(node: &Node, source: &str) -> Option<String> {
    // Docstring is the first statement in the body, if it is a string
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0).filter(|n| n.kind() == "string")?;
    let text = get_text(&string_node, source);
    let doc = text
        .trim_start_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_end_matches("\"\"\"")
        .trim_end_matches("'''")
        .trim_matches('"')
        .trim();
    Some(doc.to_string())
}

/// Recursively collects call targets, not descending into nested definitions.
fn collect_calls(node: &Node, source: &str, refs: &mut Vec<String>) {
    if node.kind() == "call" {
        if let Some(func_node) = node.child_by_field_name("function") {
            refs.push(get_text(&func_node, source));
        }
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if matches!(child.kind(), "function_definition" | "class_definition") {
                continue;
            }
            collect_calls(&child, source, refs);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::languages::TreeSitterParser;
    use crate::model::{EdgeType, NodeType};
    use crate::parser::Parser;

    use super::PythonParser;

    #[test]
    fn test_extracts_classes_and_methods() {
        let source = br#"
import os
from typing import List

MAX_USERS = 10

class UserService(BaseService):
    """Manages users."""

    def validate(self, user):
        return self._check(user)

    def _check(self, user):
        return True

@app.route("/users")
def list_users():
    return []
"#;

        let parser = TreeSitterParser::new(PythonParser);
        let result = parser.parse_file("app/users.py", source).unwrap();

        let class = result.nodes.iter().find(|n| n.name == "UserService").unwrap();
        assert_eq!(class.node_type, NodeType::Class);
        assert_eq!(class.doc_comment.as_deref(), Some("Manages users."));
        assert_eq!(class.property("bases"), Some("BaseService"));

        let validate = result.nodes.iter().find(|n| n.name == "validate").unwrap();
        assert_eq!(validate.node_type, NodeType::Method);
        assert_eq!(validate.qualified_name, "UserService.validate");
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Contains && e.source_id == class.id && e.target_id == validate.id));

        let check = result.nodes.iter().find(|n| n.name == "_check").unwrap();
        assert!(!check.exported);
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Calls && e.source_id == validate.id && e.target_id == check.id));

        let route = result.nodes.iter().find(|n| n.name == "list_users").unwrap();
        assert_eq!(route.property("decorators"), Some("app.route(\"/users\")"));

        let max = result.nodes.iter().find(|n| n.name == "MAX_USERS").unwrap();
        assert_eq!(max.node_type, NodeType::Constant);

        let deps: Vec<_> = result
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Dependency)
            .map(|n| n.name.as_str())
            .collect();
        assert!(deps.contains(&"os"));
        assert!(deps.contains(&"typing"));
    }
}
