//! Re-keying of path-keyed maps after structural array edits.
//!
//! After an edit at array path `P`, a key `P.<old><suffix>` becomes
//! `P.<new><suffix>` where `new = op.remap(old)`. Keys whose old index is
//! removed are dropped. Keys outside the subtree of `P`, `P` itself and
//! non-index children of `P` are left alone.

use std::collections::{BTreeMap, BTreeSet};

use super::path::{FieldPath, PathSegment};
use super::value::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrayOp {
    Insert(usize),
    Remove(usize),
    Swap(usize, usize),
    Move { from: usize, to: usize },
}

impl ArrayOp {
    pub fn remap(self, old: usize) -> Option<usize> {
        match self {
            ArrayOp::Insert(at) => Some(if old >= at { old + 1 } else { old }),
            ArrayOp::Remove(at) => match old.cmp(&at) {
                std::cmp::Ordering::Less => Some(old),
                std::cmp::Ordering::Equal => None,
                std::cmp::Ordering::Greater => Some(old - 1),
            },
            ArrayOp::Swap(a, b) => Some(if old == a {
                b
            } else if old == b {
                a
            } else {
                old
            }),
            ArrayOp::Move { from, to } => Some(if old == from {
                to
            } else if from < to && old > from && old <= to {
                old - 1
            } else if from > to && old >= to && old < from {
                old + 1
            } else {
                old
            }),
        }
    }

    /// Checks the indices against an array of `len` elements. Insert accepts
    /// `len` itself (append).
    pub fn fits(self, len: usize) -> bool {
        match self {
            ArrayOp::Insert(at) => at <= len,
            ArrayOp::Remove(at) => at < len,
            ArrayOp::Swap(a, b) => a < len && b < len,
            ArrayOp::Move { from, to } => from < len && to < len,
        }
    }

    /// Applies the structural edit. `inserted` is only used by
    /// [`ArrayOp::Insert`]. Callers check [`ArrayOp::fits`] first.
    pub fn apply(self, items: &mut Vec<Value>, inserted: Option<Value>) -> Option<Value> {
        match self {
            ArrayOp::Insert(at) => {
                items.insert(at, inserted.unwrap_or_default());
                None
            }
            ArrayOp::Remove(at) => Some(items.remove(at)),
            ArrayOp::Swap(a, b) => {
                items.swap(a, b);
                None
            }
            ArrayOp::Move { from, to } => {
                if from != to {
                    let item = items.remove(from);
                    items.insert(to, item);
                }
                None
            }
        }
    }
}

/// Rewrites one key. `None` means the key addressed a removed element.
pub fn shift_path(path: &FieldPath, array: &FieldPath, op: ArrayOp) -> Option<FieldPath> {
    let Some(rest) = path.strip_prefix(array) else {
        return Some(path.clone());
    };
    match rest.first() {
        Some(PathSegment::Index(old)) => op
            .remap(*old)
            .map(|new| path.with_segment_at(array.len(), PathSegment::Index(new))),
        _ => Some(path.clone()),
    }
}

pub fn shift_keys<V>(
    map: BTreeMap<FieldPath, V>,
    array: &FieldPath,
    op: ArrayOp,
) -> BTreeMap<FieldPath, V> {
    map.into_iter()
        .filter_map(|(path, value)| shift_path(&path, array, op).map(|path| (path, value)))
        .collect()
}

pub fn shift_set(set: BTreeSet<FieldPath>, array: &FieldPath, op: ArrayOp) -> BTreeSet<FieldPath> {
    set.into_iter()
        .filter_map(|path| shift_path(&path, array, op))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).expect("valid path")
    }

    fn keyed(entries: &[(&str, i32)]) -> BTreeMap<FieldPath, i32> {
        entries
            .iter()
            .map(|(key, value)| (path(key), *value))
            .collect()
    }

    fn rendered(map: &BTreeMap<FieldPath, i32>) -> Vec<(String, i32)> {
        map.iter().map(|(key, value)| (key.to_string(), *value)).collect()
    }

    #[test]
    fn insert_shifts_tail_up() {
        let map = keyed(&[("tags.0", 0), ("tags.1", 1), ("tags.1.name", 11), ("other", 9)]);
        let shifted = shift_keys(map, &path("tags"), ArrayOp::Insert(1));
        assert_eq!(
            rendered(&shifted),
            vec![
                ("other".to_string(), 9),
                ("tags.0".to_string(), 0),
                ("tags.2".to_string(), 1),
                ("tags.2.name".to_string(), 11),
            ]
        );
    }

    #[test]
    fn remove_drops_the_removed_index_and_shifts_down() {
        let map = keyed(&[("tags.0", 0), ("tags.1", 1), ("tags.2.x", 2), ("tags", 7)]);
        let shifted = shift_keys(map, &path("tags"), ArrayOp::Remove(0));
        assert_eq!(
            rendered(&shifted),
            vec![
                ("tags".to_string(), 7),
                ("tags.0".to_string(), 1),
                ("tags.1.x".to_string(), 2),
            ]
        );
    }

    #[test]
    fn swap_exchanges_two_indices() {
        let map = keyed(&[("list.0", 0), ("list.2", 2), ("list.3", 3)]);
        let shifted = shift_keys(map, &path("list"), ArrayOp::Swap(0, 3));
        assert_eq!(
            rendered(&shifted),
            vec![
                ("list.0".to_string(), 3),
                ("list.2".to_string(), 2),
                ("list.3".to_string(), 0),
            ]
        );
    }

    #[test]
    fn move_forward_and_backward() {
        let map = keyed(&[("l.0", 0), ("l.1", 1), ("l.2", 2), ("l.3", 3)]);
        let forward = shift_keys(map.clone(), &path("l"), ArrayOp::Move { from: 0, to: 2 });
        assert_eq!(
            rendered(&forward),
            vec![
                ("l.0".to_string(), 1),
                ("l.1".to_string(), 2),
                ("l.2".to_string(), 0),
                ("l.3".to_string(), 3),
            ]
        );
        let backward = shift_keys(map.clone(), &path("l"), ArrayOp::Move { from: 3, to: 1 });
        assert_eq!(
            rendered(&backward),
            vec![
                ("l.0".to_string(), 0),
                ("l.1".to_string(), 3),
                ("l.2".to_string(), 1),
                ("l.3".to_string(), 2),
            ]
        );
        let same = shift_keys(map.clone(), &path("l"), ArrayOp::Move { from: 2, to: 2 });
        assert_eq!(same, map);
    }

    #[test]
    fn nested_arrays_only_shift_their_own_level() {
        let map = keyed(&[("a.0.b.1", 1), ("a.1.b.1", 2)]);
        let shifted = shift_keys(map, &path("a.0.b"), ArrayOp::Remove(0));
        assert_eq!(
            rendered(&shifted),
            vec![("a.0.b.0".to_string(), 1), ("a.1.b.1".to_string(), 2)]
        );
    }

    #[test]
    fn remap_agrees_with_structural_edit() {
        let ops = [
            ArrayOp::Insert(2),
            ArrayOp::Remove(1),
            ArrayOp::Swap(0, 3),
            ArrayOp::Move { from: 1, to: 3 },
            ArrayOp::Move { from: 3, to: 0 },
        ];
        for op in ops {
            let original = (0..5).map(|n| Value::from(n as i64)).collect::<Vec<_>>();
            let mut edited = original.clone();
            op.apply(&mut edited, Some(Value::from("new")));
            for (old, item) in original.iter().enumerate() {
                match op.remap(old) {
                    Some(new) => assert_eq!(&edited[new], item, "{op:?} moved {old}"),
                    None => assert!(!edited.contains(item), "{op:?} kept {old}"),
                }
            }
        }
    }

    fn arb_map() -> impl Strategy<Value = BTreeMap<FieldPath, i32>> {
        prop::collection::btree_map(
            (0usize..8, prop::option::of("[xy]")).prop_map(|(index, suffix)| {
                let base = path("items").index(index);
                match suffix {
                    Some(key) => base.child(key.as_str()),
                    None => base,
                }
            }),
            any::<i32>(),
            0..10,
        )
    }

    proptest! {
        #[test]
        fn remove_undoes_insert(map in arb_map(), at in 0usize..8) {
            let array = path("items");
            let inserted = shift_keys(map.clone(), &array, ArrayOp::Insert(at));
            let restored = shift_keys(inserted, &array, ArrayOp::Remove(at));
            prop_assert_eq!(restored, map);
        }

        #[test]
        fn swap_twice_is_identity(map in arb_map(), a in 0usize..8, b in 0usize..8) {
            let array = path("items");
            let once = shift_keys(map.clone(), &array, ArrayOp::Swap(a, b));
            let twice = shift_keys(once, &array, ArrayOp::Swap(a, b));
            prop_assert_eq!(twice, map);
        }

        #[test]
        fn move_back_restores(map in arb_map(), from in 0usize..8, to in 0usize..8) {
            let array = path("items");
            let moved = shift_keys(map.clone(), &array, ArrayOp::Move { from, to });
            let back = shift_keys(moved, &array, ArrayOp::Move { from: to, to: from });
            prop_assert_eq!(back, map);
        }
    }
}
