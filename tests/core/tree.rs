use coursewalk::core::error::ManifestError;
use coursewalk::core::tree::{ActivityTree, RawTreeDescriptor};

fn descriptor(activities: serde_json::Value) -> RawTreeDescriptor {
    serde_json::from_value(serde_json::json!({
        "title": "Test Course",
        "activities": activities,
    }))
    .expect("descriptor parses")
}

fn build(activities: serde_json::Value) -> Result<ActivityTree, ManifestError> {
    ActivityTree::build(&descriptor(activities))
}

#[test]
fn builds_a_nested_tree_in_document_order() {
    let tree = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "unit-1", "parent": "root" },
        { "identifier": "lesson-1a", "parent": "unit-1" },
        { "identifier": "lesson-1b", "parent": "unit-1" },
        { "identifier": "unit-2", "parent": "root" },
        { "identifier": "lesson-2a", "parent": "unit-2" },
    ]))
    .expect("valid tree");

    assert_eq!(tree.len(), 6);
    assert_eq!(tree.node(tree.root()).id, "root");
    assert!(!tree.is_leaf(tree.root()));
    assert!(tree.is_leaf(tree.get("lesson-1a").unwrap()));

    let leaves: Vec<&str> = tree
        .pre_order_leaves(tree.root())
        .map(|aid| tree.node(aid).id.as_str())
        .collect();
    assert_eq!(leaves, vec!["lesson-1a", "lesson-1b", "lesson-2a"]);
}

#[test]
fn rejects_empty_descriptor() {
    assert!(matches!(build(serde_json::json!([])), Err(ManifestError::Empty)));
}

#[test]
fn rejects_duplicate_identifiers() {
    let err = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root" },
        { "identifier": "a", "parent": "root" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::DuplicateIdentifier(id) if id == "a"));
}

#[test]
fn rejects_malformed_identifiers() {
    let err = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "has spaces", "parent": "root" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::InvalidIdentifier(_)));
}

#[test]
fn rejects_unknown_parent() {
    let err = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "ghost" },
    ]))
    .unwrap_err();
    assert!(
        matches!(err, ManifestError::UnknownParent { child, parent } if child == "a" && parent == "ghost")
    );
}

#[test]
fn rejects_parent_cycles() {
    // a and b reference each other; neither is reachable from the root.
    let err = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "b" },
        { "identifier": "b", "parent": "a" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::Cycle(_)));
}

#[test]
fn rejects_multiple_roots_and_no_root() {
    let err = build(serde_json::json!([
        { "identifier": "r1" },
        { "identifier": "r2" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::MultipleRoots(_, _)));

    let err = build(serde_json::json!([
        { "identifier": "a", "parent": "b" },
        { "identifier": "b", "parent": "a" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::NoRoot));
}

#[test]
fn rejects_declared_leaf_with_children() {
    let err = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root", "leaf": true },
        { "identifier": "b", "parent": "a" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::LeafWithChildren(id) if id == "a"));
}

#[test]
fn rejects_rollup_rule_with_mismatched_outcome() {
    let err = build(serde_json::json!([
        {
            "identifier": "root",
            "rollup_rules": [
                {
                    "aspect": "completion",
                    "child_condition": { "kind": "satisfied" },
                    "outcome": "passed"
                }
            ]
        },
        { "identifier": "a", "parent": "root" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::InvalidRollupRule(id) if id == "root"));
}

#[test]
fn rejects_limit_conditions_on_clusters() {
    let err = build(serde_json::json!([
        { "identifier": "root" },
        {
            "identifier": "unit-1", "parent": "root",
            "limit_conditions": { "attempt_limit": 2 }
        },
        { "identifier": "lesson-1a", "parent": "unit-1" },
    ]))
    .unwrap_err();
    assert!(matches!(err, ManifestError::ClusterLimitConditions(id) if id == "unit-1"));

    // On a leaf the same declaration is fine.
    build(serde_json::json!([
        { "identifier": "root" },
        {
            "identifier": "lesson-1a", "parent": "root",
            "limit_conditions": { "attempt_limit": 2 }
        },
    ]))
    .expect("leaf limits are valid");
}

#[test]
fn ancestors_and_common_ancestor() {
    let tree = build(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "u1", "parent": "root" },
        { "identifier": "l1", "parent": "u1" },
        { "identifier": "u2", "parent": "root" },
        { "identifier": "l2", "parent": "u2" },
    ]))
    .unwrap();

    let l1 = tree.get("l1").unwrap();
    let l2 = tree.get("l2").unwrap();
    let chain: Vec<&str> = tree
        .ancestors(l1)
        .iter()
        .map(|&a| tree.node(a).id.as_str())
        .collect();
    assert_eq!(chain, vec!["u1", "root"]);

    assert_eq!(tree.node(tree.common_ancestor(l1, l2)).id, "root");
    assert_eq!(tree.node(tree.common_ancestor(l1, l1)).id, "l1");
}

#[test]
fn json_round_trip_preserves_fingerprint_and_index() {
    let tree = build(serde_json::json!([
        { "identifier": "root", "title": "Root" },
        { "identifier": "a", "parent": "root", "launch_data": "content/a.html" },
        { "identifier": "b", "parent": "root" },
    ]))
    .unwrap();

    let json = tree.to_json().expect("serializes");
    let restored = ActivityTree::from_json(&json).expect("deserializes");

    assert_eq!(tree.fingerprint(), restored.fingerprint());
    let a = restored.get("a").expect("index rebuilt");
    assert_eq!(restored.node(a).launch_data.as_deref(), Some("content/a.html"));
}
