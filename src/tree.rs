//! Structural algorithms over an ordered forest of analysis nodes
//!
//! Every function reads a borrowed forest and returns a new one; the input is never
//! modified. Traversal is pre-order depth-first across the roots in order, and the
//! first node matching an id is the one acted on.

use crate::ids::IdSupplier;
use crate::models::{Node, NodeKind, NodeUpdate, PathItem, Relation};

/// Returns a forest in which the first node with `target_id` has `updates` applied
///
/// An unknown id yields a forest equal to the input.
pub fn update(nodes: &[Node], target_id: &str, updates: &NodeUpdate) -> Vec<Node> {
    let mut found = false;
    update_inner(nodes, target_id, updates, &mut found)
}

fn update_inner(nodes: &[Node], target_id: &str, updates: &NodeUpdate, found: &mut bool) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if *found || (node.is_leaf() && node.id != target_id) {
            out.push(node.clone());
            continue;
        }
        if node.id == target_id {
            *found = true;
            let mut updated = node.clone();
            updated.apply(updates);
            out.push(updated);
            continue;
        }
        let children = update_inner(&node.children, target_id, updates, found);
        out.push(node.with_children(children));
    }
    out
}

/// Inserts the node produced by `make` relative to `target_id`
///
/// `make` is only called when a target matched. The flag reports whether anything was
/// inserted. Roots have no parent, so a root never matches as a sibling target.
pub fn insert<F>(nodes: &[Node], target_id: &str, relation: Relation, make: F) -> (bool, Vec<Node>)
where
    F: FnOnce() -> Node,
{
    let mut make = Some(make);
    let forest = insert_inner(nodes, target_id, relation, &mut make);
    (make.is_none(), forest)
}

fn insert_inner<F>(
    nodes: &[Node],
    target_id: &str,
    relation: Relation,
    make: &mut Option<F>,
) -> Vec<Node>
where
    F: FnOnce() -> Node,
{
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if make.is_none() {
            out.push(node.clone());
            continue;
        }

        match relation {
            Relation::Child if node.id == target_id => {
                let mut children = node.children.clone();
                if let Some(make) = make.take() {
                    children.push(make());
                }
                out.push(node.with_children(children));
                continue;
            }
            Relation::Sibling => {
                if let Some(pos) = node.children.iter().position(|c| c.id == target_id) {
                    let mut children = node.children.clone();
                    if let Some(make) = make.take() {
                        children.insert(pos + 1, make());
                    }
                    out.push(node.with_children(children));
                    continue;
                }
            }
            Relation::Child => {}
        }

        if node.is_leaf() {
            out.push(node.clone());
        } else {
            let children = insert_inner(&node.children, target_id, relation, make);
            out.push(node.with_children(children));
        }
    }
    out
}

fn insert_why(
    nodes: &[Node],
    target_id: &str,
    relation: Relation,
    ids: &dyn IdSupplier,
) -> (Option<String>, Vec<Node>) {
    let mut new_id = None;
    let (_, forest) = insert(nodes, target_id, relation, || {
        let node = Node::new(NodeKind::Why, ids.new_id());
        new_id = Some(node.id.clone());
        node
    });
    (new_id, forest)
}

/// Appends a fresh empty Why node as the last child of `target_id`
///
/// Returns the new node's id, or `None` (and an unchanged forest) if nothing matched.
pub fn insert_child(nodes: &[Node], target_id: &str, ids: &dyn IdSupplier) -> (Option<String>, Vec<Node>) {
    insert_why(nodes, target_id, Relation::Child, ids)
}

/// Inserts a fresh empty Why node directly after `target_id` among its siblings
pub fn insert_sibling(nodes: &[Node], target_id: &str, ids: &dyn IdSupplier) -> (Option<String>, Vec<Node>) {
    insert_why(nodes, target_id, Relation::Sibling, ids)
}

/// Removes every node with `target_id` together with its subtree
pub fn delete(nodes: &[Node], target_id: &str) -> Vec<Node> {
    nodes
        .iter()
        .filter(|node| node.id != target_id)
        .map(|node| node.with_children(delete(&node.children, target_id)))
        .collect()
}

pub fn find_by_id<'a>(nodes: &'a [Node], target_id: &str) -> Option<&'a Node> {
    for node in nodes {
        if node.id == target_id {
            return Some(node);
        }
        if let Some(found) = find_by_id(&node.children, target_id) {
            return Some(found);
        }
    }
    None
}

/// Chain of nodes from a root down to `target_id`, the node itself last
pub fn path_to(nodes: &[Node], target_id: &str) -> Option<Vec<PathItem>> {
    let mut path = Vec::new();
    if collect_path(nodes, target_id, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn collect_path(nodes: &[Node], target_id: &str, path: &mut Vec<PathItem>) -> bool {
    for node in nodes {
        path.push(PathItem::from(node));
        if node.id == target_id || collect_path(&node.children, target_id, path) {
            return true;
        }
        path.pop();
    }
    false
}

pub fn node_count(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|node| 1 + node_count(&node.children))
        .sum()
}

pub fn contains_id(nodes: &[Node], target_id: &str) -> bool {
    find_by_id(nodes, target_id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use pretty_assertions::assert_eq;

    fn leaf(kind: NodeKind, id: &str, text: &str) -> Node {
        let mut node = Node::new(kind, id.to_string());
        node.text = text.to_string();
        node
    }

    fn branch(kind: NodeKind, id: &str, text: &str, children: Vec<Node>) -> Node {
        leaf(kind, id, text).with_children(children)
    }

    // P1 -> [A -> [C], B]
    fn sample() -> Vec<Node> {
        vec![branch(
            NodeKind::Problem,
            "p1",
            "Line stopped",
            vec![
                branch(
                    NodeKind::Why,
                    "a",
                    "Motor overheated",
                    vec![leaf(NodeKind::Why, "c", "Fan clogged")],
                ),
                leaf(NodeKind::Why, "b", "Operator absent"),
            ],
        )]
    }

    fn child_ids(node: &Node) -> Vec<&str> {
        node.children().iter().map(|n| n.id()).collect()
    }

    #[test]
    fn test_update_rewrites_only_target() {
        let forest = sample();
        let updated = update(&forest, "c", &NodeUpdate::text("Filter missing"));

        assert_eq!(find_by_id(&updated, "c").unwrap().text(), "Filter missing");
        assert_eq!(find_by_id(&updated, "a").unwrap().text(), "Motor overheated");
        assert_eq!(forest[0].children()[0].children()[0].text(), "Fan clogged");
    }

    #[test]
    fn test_update_unknown_id_is_identity() {
        let forest = sample();
        assert_eq!(update(&forest, "zzz", &NodeUpdate::text("x")), forest);
    }

    #[test]
    fn test_insert_child_appends_last() {
        let ids = SequentialIds::new("new");
        let (new_id, forest) = insert_child(&sample(), "a", &ids);

        assert_eq!(new_id.as_deref(), Some("new-1"));
        let a = find_by_id(&forest, "a").unwrap();
        assert_eq!(child_ids(a), vec!["c", "new-1"]);
        assert_eq!(a.children()[1].kind(), NodeKind::Why);
        assert_eq!(a.children()[1].text(), "");
    }

    #[test]
    fn test_insert_sibling_lands_after_target() {
        let ids = SequentialIds::new("new");
        let (new_id, forest) = insert_sibling(&sample(), "a", &ids);

        assert_eq!(new_id.as_deref(), Some("new-1"));
        assert_eq!(child_ids(&forest[0]), vec!["a", "new-1", "b"]);
    }

    #[test]
    fn test_insert_sibling_of_root_does_nothing() {
        let ids = SequentialIds::new("new");
        let forest = sample();
        let (inserted, after) = insert(&forest, "p1", Relation::Sibling, || {
            Node::new(NodeKind::Why, ids.new_id())
        });

        assert!(!inserted);
        assert_eq!(after, forest);
        // The node factory never ran
        assert_eq!(ids.new_id(), "new-1");
    }

    #[test]
    fn test_insert_unknown_target_reports_false() {
        let ids = SequentialIds::new("new");
        let (new_id, forest) = insert_child(&sample(), "zzz", &ids);
        assert_eq!(new_id, None);
        assert_eq!(forest, sample());
    }

    #[test]
    fn test_delete_removes_subtree() {
        let forest = delete(&sample(), "a");
        assert_eq!(child_ids(&forest[0]), vec!["b"]);
        assert!(find_by_id(&forest, "c").is_none());
        assert_eq!(node_count(&forest), 2);
    }

    #[test]
    fn test_delete_root() {
        let mut forest = sample();
        forest.push(leaf(NodeKind::Problem, "p2", "Second"));
        let after = delete(&forest, "p1");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id(), "p2");
    }

    #[test]
    fn test_path_to_builds_chain() {
        let path = path_to(&sample(), "c").unwrap();
        let texts: Vec<&str> = path.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["Line stopped", "Motor overheated", "Fan clogged"]);
        assert_eq!(path[0].kind, NodeKind::Problem);

        assert_eq!(path_to(&sample(), "b").unwrap().len(), 2);
        assert!(path_to(&sample(), "zzz").is_none());
    }

    #[test]
    fn test_node_count_and_contains() {
        let forest = sample();
        assert_eq!(node_count(&forest), 4);
        assert!(contains_id(&forest, "c"));
        assert!(!contains_id(&forest, "d"));
    }
}
