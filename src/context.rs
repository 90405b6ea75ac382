//! Textual renderings of the forest handed to the text-generation service

use crate::models::{Node, NodeKind, PathItem};

const EMPTY_TEXT: &str = "(Empty)";

/// Serializes the whole forest as an indented outline, two spaces per depth level
///
/// Leaf findings follow their node on `->` lines; actions are rendered as a JSON array.
pub fn format_forest(nodes: &[Node]) -> String {
    format_level(nodes, 0)
}

fn format_level(nodes: &[Node], level: usize) -> String {
    nodes
        .iter()
        .map(|node| format_node(node, level))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_node(node: &Node, level: usize) -> String {
    let indent = "  ".repeat(level);
    let mut out = format!(
        "{}- [{}] {}",
        indent,
        node.kind().tag(),
        non_empty_or_placeholder(node.text())
    );

    if node.kind() == NodeKind::Problem {
        if let Some(title) = node.title().filter(|t| !t.is_empty()) {
            out.push_str(&format!(" (Title: {})", title));
        }
    }
    if !node.root_cause().is_empty() {
        out.push_str(&format!(
            "\n{}  -> IDENTIFIED ROOT CAUSE: {}",
            indent,
            node.root_cause()
        ));
    }
    if !node.solutions_text().is_empty() {
        out.push_str(&format!(
            "\n{}  -> PROPOSED SOLUTIONS: {}",
            indent,
            node.solutions_text()
        ));
    }
    if !node.actions().is_empty() {
        // Serializing a Vec of plain string structs cannot fail
        let actions = serde_json::to_string(node.actions()).unwrap_or_else(|_| "[]".to_string());
        out.push_str(&format!("\n{}  -> ACTIONS: {}", indent, actions));
    }
    if !node.is_leaf() {
        out.push('\n');
        out.push_str(&format_level(node.children(), level + 1));
    }
    out
}

/// Renders a root-to-node chain as `Problem: ... -> Why: ...`
pub fn format_path(path: &[PathItem]) -> String {
    path.iter()
        .map(|item| format!("{}: {}", item.kind.label(), non_empty_or_placeholder(&item.text)))
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn non_empty_or_placeholder(text: &str) -> &str {
    if text.is_empty() {
        EMPTY_TEXT
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::models::{Action, NodeUpdate};
    use crate::tree;
    use pretty_assertions::assert_eq;

    fn forest() -> Vec<Node> {
        let ids = SequentialIds::new("n");
        // n-1 problem, n-2 why
        let root = Node::problem(&ids, "Outage");
        let forest = vec![root];
        let forest = tree::update(&forest, "n-1", &NodeUpdate::text("Site down"));
        let forest = tree::update(
            &forest,
            "n-2",
            &NodeUpdate {
                text: Some("Disk full".to_string()),
                root_cause: Some("No log rotation".to_string()),
                solutions_text: Some("Rotate logs".to_string()),
                actions: Some(vec![Action::new("Add logrotate", "SRE", "Friday")]),
                ..NodeUpdate::default()
            },
        );
        let (_, forest) = tree::insert_child(&forest, "n-2", &ids);
        forest
    }

    #[test]
    fn test_format_forest_layout() {
        let expected = [
            "- [PROBLEM] Site down (Title: Outage)",
            "  - [WHY] Disk full",
            "    -> IDENTIFIED ROOT CAUSE: No log rotation",
            "    -> PROPOSED SOLUTIONS: Rotate logs",
            r#"    -> ACTIONS: [{"description":"Add logrotate","assignee":"SRE","deadline":"Friday"}]"#,
            "    - [WHY] (Empty)",
        ]
        .join("\n");

        assert_eq!(format_forest(&forest()), expected);
    }

    #[test]
    fn test_format_forest_multiple_roots() {
        let ids = SequentialIds::new("n");
        let forest = vec![Node::problem(&ids, ""), Node::problem(&ids, "Second")];
        let expected = [
            "- [PROBLEM] (Empty)",
            "  - [WHY] (Empty)",
            "- [PROBLEM] (Empty) (Title: Second)",
            "  - [WHY] (Empty)",
        ]
        .join("\n");

        assert_eq!(format_forest(&forest), expected);
    }

    #[test]
    fn test_format_forest_is_deterministic() {
        let forest = forest();
        assert_eq!(format_forest(&forest), format_forest(&forest));
    }

    #[test]
    fn test_format_path() {
        let path = tree::path_to(&forest(), "n-3").unwrap();
        assert_eq!(
            format_path(&path),
            "Problem: Site down -> Why: Disk full -> Why: (Empty)"
        );
    }
}
