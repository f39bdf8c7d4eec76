use std::collections::BTreeSet;

use super::path::{self, FieldPath, PathSegment};
use super::value::Value;

/// Every address whose value differs between `before` and `after`, together
/// with all of its ancestors. A difference at the root itself has no address
/// and is not reported.
pub fn changed_paths(before: &Value, after: &Value) -> BTreeSet<FieldPath> {
    let mut changed = BTreeSet::new();
    let mut trail = Vec::new();
    traverse(Some(before), Some(after), &mut trail, &mut changed);
    changed
}

/// Same as [`changed_paths`] for the subtrees found at `anchor` before and
/// after a write. Reported paths are absolute and include the ancestors of
/// `anchor`.
pub fn changed_paths_at(
    anchor: &FieldPath,
    before: Option<&Value>,
    after: Option<&Value>,
) -> BTreeSet<FieldPath> {
    let mut changed = BTreeSet::new();
    let mut trail = anchor.segments().to_vec();
    traverse(before, after, &mut trail, &mut changed);
    changed
}

fn traverse(
    before: Option<&Value>,
    after: Option<&Value>,
    trail: &mut Vec<PathSegment>,
    changed: &mut BTreeSet<FieldPath>,
) {
    match (before, after) {
        (Some(Value::Array(left)), Some(Value::Array(right))) => {
            for index in 0..left.len().max(right.len()) {
                trail.push(PathSegment::Index(index));
                traverse(left.get(index), right.get(index), trail, changed);
                trail.pop();
            }
        }
        (Some(Value::Object(left)), Some(Value::Object(right))) => {
            let keys = left.keys().chain(right.keys()).collect::<BTreeSet<_>>();
            for key in keys {
                trail.push(PathSegment::from(key.as_str()));
                traverse(left.get(key), right.get(key), trail, changed);
                trail.pop();
            }
        }
        (left, right) => {
            if left == right {
                return;
            }
            collect(trail, changed);
            // A container facing a scalar or nothing still reports its leaves.
            let segments = child_segments(left)
                .into_iter()
                .chain(child_segments(right))
                .collect::<BTreeSet<_>>();
            for segment in segments {
                let before = left.and_then(|node| path::step(node, &segment));
                let after = right.and_then(|node| path::step(node, &segment));
                trail.push(segment);
                traverse(before, after, trail, changed);
                trail.pop();
            }
        }
    }
}

fn child_segments(node: Option<&Value>) -> Vec<PathSegment> {
    match node {
        Some(Value::Array(items)) => (0..items.len()).map(PathSegment::Index).collect(),
        Some(Value::Object(entries)) => entries
            .keys()
            .map(|key| PathSegment::from(key.as_str()))
            .collect(),
        _ => Vec::new(),
    }
}

fn collect(trail: &[PathSegment], changed: &mut BTreeSet<FieldPath>) {
    for len in (1..=trail.len()).rev() {
        let Ok(path) = FieldPath::from_segments(trail[..len].to_vec()) else {
            continue;
        };
        // Ancestors of an already collected path are present too.
        if !changed.insert(path) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::path::read;
    use proptest::prelude::*;

    fn paths(set: &BTreeSet<FieldPath>) -> Vec<String> {
        set.iter().map(ToString::to_string).collect()
    }

    fn tree(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn equal_trees_have_no_changes() {
        let value = tree(serde_json::json!({"a": [1, {"b": null}], "c": "x"}));
        assert!(changed_paths(&value, &value.clone()).is_empty());
    }

    #[test]
    fn leaf_change_reports_every_ancestor() {
        let before = tree(serde_json::json!({"items": [{"name": "a"}, {"name": "b"}]}));
        let after = tree(serde_json::json!({"items": [{"name": "a"}, {"name": "c"}]}));
        assert_eq!(
            paths(&changed_paths(&before, &after)),
            vec!["items", "items.1", "items.1.name"]
        );
    }

    #[test]
    fn length_change_is_a_difference_at_the_array() {
        let before = tree(serde_json::json!({"tags": ["a"]}));
        let after = tree(serde_json::json!({"tags": ["a", "b"]}));
        assert_eq!(paths(&changed_paths(&before, &after)), vec!["tags", "tags.1"]);
    }

    #[test]
    fn added_and_removed_keys_are_changes() {
        let before = tree(serde_json::json!({"a": 1, "b": 2}));
        let after = tree(serde_json::json!({"b": 2, "c": 3}));
        assert_eq!(paths(&changed_paths(&before, &after)), vec!["a", "c"]);
    }

    #[test]
    fn container_kind_change_is_reported_at_that_path() {
        let before = tree(serde_json::json!({"a": {"0": "x"}}));
        let after = tree(serde_json::json!({"a": ["x"]}));
        assert_eq!(paths(&changed_paths(&before, &after)), vec!["a"]);
    }

    #[test]
    fn anchored_diff_reports_absolute_paths() {
        let anchor = FieldPath::parse("profile.tags").expect("path");
        let before = Value::from(serde_json::json!(["a"]));
        let after = Value::from(serde_json::json!(["b"]));
        assert_eq!(
            paths(&changed_paths_at(&anchor, Some(&before), Some(&after))),
            vec!["profile", "profile.tags", "profile.tags.0"]
        );
        assert!(changed_paths_at(&anchor, Some(&before), Some(&before)).is_empty());
    }

    #[test]
    fn containers_replacing_scalars_report_their_leaves() {
        let before = tree(serde_json::json!({"address": null}));
        let after = tree(serde_json::json!({"address": {"street": "x", "lines": ["a"]}}));
        assert_eq!(
            paths(&changed_paths(&before, &after)),
            vec!["address", "address.lines", "address.lines.0", "address.street"]
        );
        assert_eq!(
            paths(&changed_paths(&after, &tree(serde_json::json!({})))),
            vec!["address", "address.lines", "address.lines.0", "address.street"]
        );
    }

    #[test]
    fn anchored_diff_descends_into_new_containers() {
        let anchor = FieldPath::parse("address").expect("path");
        let after = Value::from(serde_json::json!({"street": ""}));
        assert_eq!(
            paths(&changed_paths_at(&anchor, Some(&Value::Null), Some(&after))),
            vec!["address", "address.street"]
        );
        assert_eq!(
            paths(&changed_paths_at(&anchor, None, Some(&after))),
            vec!["address", "address.street"]
        );
    }

    #[test]
    fn null_differs_from_missing() {
        let before = tree(serde_json::json!({"a": null}));
        let after = tree(serde_json::json!({}));
        assert_eq!(paths(&changed_paths(&before, &after)), vec!["a"]);
    }

    fn every_path(node: &Value, trail: &mut Vec<PathSegment>, out: &mut BTreeSet<FieldPath>) {
        for segment in child_segments(Some(node)) {
            let Some(child) = path::step(node, &segment) else {
                continue;
            };
            trail.push(segment);
            out.insert(FieldPath::from_segments(trail.clone()).expect("non-empty trail"));
            every_path(child, trail, out);
            trail.pop();
        }
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (0i64..5).prop_map(Value::from),
            "[ab]{0,2}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[xyz]", inner, 0..3).prop_map(Value::Object),
            ]
        })
    }

    fn arb_form() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[pq]", arb_value(), 0..3).prop_map(Value::Object)
    }

    proptest! {
        #[test]
        fn diffing_a_tree_with_itself_is_empty(value in arb_form()) {
            prop_assert!(changed_paths(&value, &value).is_empty());
        }

        #[test]
        fn reported_paths_are_closed_under_prefixes(before in arb_form(), after in arb_form()) {
            let changed = changed_paths(&before, &after);
            for path in &changed {
                for ancestor in path.ancestors() {
                    prop_assert!(changed.contains(&ancestor));
                }
            }
        }

        #[test]
        fn unreported_paths_read_equal(before in arb_form(), after in arb_form()) {
            let changed = changed_paths(&before, &after);
            let mut everything = BTreeSet::new();
            every_path(&before, &mut Vec::new(), &mut everything);
            every_path(&after, &mut Vec::new(), &mut everything);
            for path in everything {
                if read(&before, &path) != read(&after, &path) {
                    prop_assert!(changed.contains(&path), "missing {}", path);
                }
            }
        }
    }
}
