//! Rust language parser implementation.
//!
//! Handles .rs files and extracts functions, structs, enums, traits,
//! modules, constants and impl methods.

use super::{get_text, line_span, Extraction, LanguageParser};
use crate::model::NodeType;
use tree_sitter::{Language, Node, Tree};

pub struct RustParser;

impl LanguageParser for RustParser {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn grammar(&self) -> Language {
        tree_sitter_rust::language()
    }

    fn extensions(&self) -> &[&str] {
        &["rs"]
    }

    fn extract(&self, tree: &Tree, source: &str, out: &mut Extraction) {
        extract_from_node(&tree.root_node(), source, out, None);
    }
}

/// Enclosing impl or trait. `parent` is set when the owner was declared in
/// this file, so its methods hang off it rather than off the file.
#[derive(Clone, Copy)]
struct Scope<'a> {
    name: &'a str,
    parent: Option<&'a str>,
}

/// Recursively extracts nodes from the Rust AST.
fn extract_from_node(node: &Node, source: &str, out: &mut Extraction, scope: Option<Scope>) {
    match node.kind() {
        "function_item" => {
            extract_function(node, source, out, scope);
            return;
        }

        "struct_item" => {
            add_named(node, source, out, NodeType::Struct);
        }
        "enum_item" => {
            add_named(node, source, out, NodeType::Enum);
        }
        "mod_item" => {
            add_named(node, source, out, NodeType::Module);
        }
        "const_item" | "static_item" => {
            add_named(node, source, out, NodeType::Constant);
        }
        "type_item" => {
            add_named(node, source, out, NodeType::Type);
        }

        // Traits (Rust's version of interfaces)
        "trait_item" => {
            if let Some((name, id)) = add_named(node, source, out, NodeType::Interface) {
                if let Some(body) = find_child_by_kind(node, "declaration_list") {
                    let scope = Scope {
                        name: &name,
                        parent: Some(&id),
                    };
                    for i in 0..body.child_count() {
                        if let Some(child) = body.child(i) {
                            extract_from_node(&child, source, out, Some(scope));
                        }
                    }
                }
                return;
            }
        }

        "impl_item" => {
            let target = node
                .child_by_field_name("type")
                .map(|n| get_text(&n, source));
            if let (Some(target), Some(body)) = (target, find_child_by_kind(node, "declaration_list")) {
                let scope = Scope {
                    name: &target,
                    parent: None,
                };
                for i in 0..body.child_count() {
                    if let Some(child) = body.child(i) {
                        extract_from_node(&child, source, out, Some(scope));
                    }
                }
            }
            return;
        }

        "use_declaration" => {
            if let Some(arg) = node.child_by_field_name("argument") {
                out.import(&get_text(&arg, source));
            }
            return;
        }

        _ => {}
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            extract_from_node(&child, source, out, scope);
        }
    }
}

/// Adds a simple named item. Returns its name and ID.
fn add_named(node: &Node, source: &str, out: &mut Extraction, node_type: NodeType) -> Option<(String, String)> {
    let name_node = node.child_by_field_name("name")?;
    let name = get_text(&name_node, source);
    let (start, end) = line_span(node);

    let entity = out
        .node(node_type, &name, &name)
        .with_lines(start, end)
        .exported(is_public(node, source))
        .with_doc_comment(doc_comment(node, source));
    let id = out.add(entity, None);
    Some((name, id))
}

/// Extracts a function or method.
fn extract_function(node: &Node, source: &str, out: &mut Extraction, scope: Option<Scope>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = get_text(&name_node, source);
    let (start, end) = line_span(node);

    let (node_type, qualified_name) = match scope {
        Some(s) => (NodeType::Method, format!("{}.{}", s.name, name)),
        None => (NodeType::Function, name.clone()),
    };

    let mut entity = out
        .node(node_type, &name, &qualified_name)
        .with_lines(start, end)
        .with_signature(build_function_signature(node, source, &name))
        .exported(is_public(node, source))
        .with_doc_comment(doc_comment(node, source));
    if let Some(attrs) = attributes(node, source) {
        entity = entity.with_property("attributes", attrs);
    }
    if let Some(s) = scope {
        entity = entity.with_property("receiver", s.name);
    }

    let id = out.add(entity, scope.and_then(|s| s.parent));

    let mut calls = Vec::new();
    collect_calls(node, source, &mut calls);
    for callee in calls {
        out.call(&id, callee);
    }
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

/// `pub` exactly; `pub(crate)` and friends are not exported.
fn is_public(node: &Node, source: &str) -> bool {
    find_child_by_kind(node, "visibility_modifier")
        .map(|v| get_text(&v, source) == "pub")
        .unwrap_or(false)
}

/// Joined `///` lines directly above an item.
fn doc_comment(node: &Node, source: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        match sibling.kind() {
            "line_comment" => {
                let text = get_text(&sibling, source);
                match text.strip_prefix("///") {
                    Some(doc) => lines.push(doc.trim().to_string()),
                    None => break,
                }
            }
            "attribute_item" => {}
            _ => break,
        }
        prev = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

/// Outer attributes such as `#[test]`, comma separated.
fn attributes(node: &Node, source: &str) -> Option<String> {
    let mut attrs = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        match sibling.kind() {
            "attribute_item" => {
                let text = get_text(&sibling, source);
                attrs.push(
                    text.trim_start_matches("#[")
                        .trim_end_matches(']')
                        .to_string(),
                );
            }
            "line_comment" => {}
            _ => break,
        }
        prev = sibling.prev_sibling();
    }
    if attrs.is_empty() {
        None
    } else {
        attrs.reverse();
        Some(attrs.join(","))
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
        .map(|n| get_text(&n, source))
        .unwrap_or_default();

    if return_type.is_empty() {
        format!("fn {}{}", name, params)
    } else {
        format!("fn {}{} -> {}", name, params, return_type)
    }
}

/// Recursively collects function call names.
fn collect_calls(node: &Node, source: &str, refs: &mut Vec<String>) {
    if node.kind() == "call_expression" {
        if let Some(func_node) = node.child_by_field_name("function") {
            refs.push(get_text(&func_node, source));
        }
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_calls(&child, source, refs);
        }
    }
}
