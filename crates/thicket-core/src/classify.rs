//! Post-parse classification.
//!
//! Runs after parsing and before nodes reach the store. It tags nodes with
//! an architectural role and a layer, and may refine a node's type (a
//! `Class` deriving from an ORM base becomes a `DbModel`). Node IDs are
//! never changed so replace-by-file keeps working.

use crate::model::{Node, NodeType, PROP_ARCH_ROLE, PROP_LAYER};
use crate::parser::ParseResult;

/// Enriches parse results. Must be total: classification never fails.
pub trait Classifier: Send + Sync {
    fn classify(&self, result: ParseResult) -> ParseResult;
}

/// Naming and path heuristics shared by all languages.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(&self, mut result: ParseResult) -> ParseResult {
        let test_file = is_test_path(&result.file_path);
        for node in &mut result.nodes {
            classify_node(node, test_file);
        }
        result
    }
}

fn classify_node(node: &mut Node, test_file: bool) {
    let list = |key: &str| -> Vec<String> {
        node.property(key)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    };
    let decorators = list("decorators");
    let attributes = list("attributes");
    let bases = list("bases");

    match node.node_type {
        NodeType::File if test_file => {
            node.node_type = NodeType::TestFile;
            node.properties.insert(PROP_LAYER.into(), "test".into());
            return;
        }
        NodeType::Function | NodeType::Method
            if attributes.iter().any(|a| a == "test" || a.ends_with("::test"))
                || (test_file && node.name.starts_with("test")) =>
        {
            node.node_type = NodeType::TestFunction;
            node.properties.insert(PROP_LAYER.into(), "test".into());
            return;
        }
        NodeType::Class if bases.iter().any(|b| is_model_base(b)) => {
            node.node_type = NodeType::DbModel;
            tag(node, "model", "data");
            return;
        }
        _ => {}
    }

    if decorators.iter().any(|d| is_route_decorator(d)) {
        tag(node, "controller", "api");
        return;
    }

    let name = node.name.as_str();
    if name.ends_with("Controller") || name.ends_with("Handler") {
        tag(node, "controller", "api");
    } else if name.ends_with("Service") {
        tag(node, "service", "service");
    } else if name.ends_with("Repository") || name.ends_with("Repo") || name.ends_with("Dao") {
        tag(node, "repository", "data");
    } else if let Some(layer) = layer_from_package(&node.package) {
        node.properties.insert(PROP_LAYER.into(), layer.into());
    }
}

fn tag(node: &mut Node, role: &str, layer: &str) {
    node.properties.insert(PROP_ARCH_ROLE.into(), role.into());
    node.properties.insert(PROP_LAYER.into(), layer.into());
}

/// `tests/`, `test_*.py`, `*_test.rs` and friends.
pub fn is_test_path(path: &str) -> bool {
    let base = path.rsplit('/').next().unwrap_or(path);
    let stem = base.split('.').next().unwrap_or(base);
    path.split('/').any(|seg| seg == "tests" || seg == "test")
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem == "conftest"
}

fn is_model_base(base: &str) -> bool {
    let last = base.rsplit('.').next().unwrap_or(base);
    matches!(last, "Model" | "Base" | "DeclarativeBase" | "Document")
}

fn is_route_decorator(decorator: &str) -> bool {
    let head = decorator.split('(').next().unwrap_or(decorator);
    [".route", ".get", ".post", ".put", ".delete", ".patch"]
        .iter()
        .any(|suffix| head.ends_with(suffix))
}

fn layer_from_package(package: &str) -> Option<&'static str> {
    package.split('/').rev().find_map(|seg| match seg {
        "api" | "handlers" | "routes" | "controllers" | "views" => Some("api"),
        "models" | "db" | "repository" | "repositories" | "storage" => Some("data"),
        "services" | "service" => Some("service"),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(path: &str, nodes: Vec<Node>) -> ParseResult {
        ParseResult {
            nodes,
            edges: Vec::new(),
            file_path: path.into(),
            language: "python".into(),
        }
    }

    #[test]
    fn test_marks_test_files_and_functions() {
        let file = Node::new(NodeType::File, "test_users.py", "tests/test_users.py", "tests/test_users.py");
        let func = Node::new(NodeType::Function, "test_login", "test_login", "tests/test_users.py");
        let id = func.id.clone();

        let out = DefaultClassifier.classify(result("tests/test_users.py", vec![file, func]));

        assert_eq!(out.nodes[0].node_type, NodeType::TestFile);
        assert_eq!(out.nodes[1].node_type, NodeType::TestFunction);
        assert_eq!(out.nodes[1].id, id);
    }

    #[test]
    fn test_rust_test_attribute() {
        let func = Node::new(NodeType::Function, "it_works", "it_works", "src/lib.rs")
            .with_property("attributes", "test");

        let out = DefaultClassifier.classify(result("src/lib.rs", vec![func]));

        assert_eq!(out.nodes[0].node_type, NodeType::TestFunction);
    }

    #[test]
    fn test_roles_and_layers() {
        let model = Node::new(NodeType::Class, "Order", "Order", "app/models.py")
            .with_property("bases", "db.Model");
        let service = Node::new(NodeType::Class, "OrderService", "OrderService", "app/core.py");
        let route = Node::new(NodeType::Function, "list_orders", "list_orders", "app/core.py")
            .with_property("decorators", "app.get(\"/orders\")");
        let plain = Node::new(NodeType::Function, "helper", "helper", "app/handlers/util.py")
            .with_package("app/handlers");

        let out = DefaultClassifier.classify(result("app/core.py", vec![model, service, route, plain]));

        assert_eq!(out.nodes[0].node_type, NodeType::DbModel);
        assert_eq!(out.nodes[0].property(PROP_ARCH_ROLE), Some("model"));
        assert_eq!(out.nodes[1].property(PROP_ARCH_ROLE), Some("service"));
        assert_eq!(out.nodes[2].property(PROP_LAYER), Some("api"));
        assert_eq!(out.nodes[3].property(PROP_LAYER), Some("api"));
        assert_eq!(out.nodes[3].property(PROP_ARCH_ROLE), None);
    }

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("tests/integration.rs"));
        assert!(is_test_path("pkg/user_test.go"));
        assert!(is_test_path("test_api.py"));
        assert!(!is_test_path("src/contest.rs"));
    }
}
