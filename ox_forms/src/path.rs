//! Dot-path access into the nested value tree.
//!
//! Every value lookup in the engine (conditions, computed fields, validation,
//! templating) goes through these two functions.

use serde_json::{Map, Value};

/// Resolves `path` (e.g. `user.profile.name`) through nested objects.
///
/// Returns `None` when the path is empty, the tree is empty, or any segment is
/// missing or not traversable. Array elements can be addressed by numeric
/// segments (`items.0.name`).
pub fn get<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() || is_empty_tree(tree) {
        return None;
    }

    let mut current = tree;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Like [`get`] but falls back to `default` when nothing resolves.
pub fn get_or<'a>(tree: &'a Value, path: &str, default: &'a Value) -> &'a Value {
    get(tree, path).unwrap_or(default)
}

/// Assigns `value` at `path`, creating intermediate objects as needed.
///
/// A numeric segment under an existing array indexes into it (`items.1.qty`),
/// padding the array with nulls when the index is past the end. Any other
/// intermediate segment holding a scalar is replaced by an empty object. An
/// empty path is a no-op. The same tree is returned for chaining.
pub fn set<'a>(tree: &'a mut Value, path: &str, value: Value) -> &'a mut Value {
    if path.is_empty() {
        return tree;
    }

    let mut keys: Vec<&str> = path.split('.').collect();
    let last = keys.pop().unwrap_or_default();

    let mut target = &mut *tree;
    for key in keys {
        target = slot(target, key);
        if !is_container(target) {
            *target = Value::Object(Map::new());
        }
    }
    *slot(target, last) = value;
    tree
}

/// The child of `target` under `key`, created as null when missing. Arrays
/// are indexed by numeric keys; anything else becomes an object first.
fn slot<'a>(target: &'a mut Value, key: &str) -> &'a mut Value {
    match (target, key.parse::<usize>()) {
        (Value::Array(items), Ok(index)) => {
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[index]
        }
        (target, _) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let Value::Object(map) = target else {
                unreachable!("target was just made an object");
            };
            map.entry(key.to_string()).or_insert(Value::Null)
        }
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn is_empty_tree(tree: &Value) -> bool {
    match tree {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_nested_value() {
        let tree = json!({"user": {"profile": {"name": "John"}}});
        assert_eq!(get(&tree, "user.profile.name"), Some(&json!("John")));
        assert_eq!(get(&tree, "user.profile"), Some(&json!({"name": "John"})));
    }

    #[test]
    fn get_missing_segments_fall_back() {
        let tree = json!({"user": {"name": "John", "tags": null}});
        let fallback = json!("n/a");
        assert_eq!(get(&tree, "user.age"), None);
        assert_eq!(get(&tree, "user.name.first"), None);
        assert_eq!(get(&tree, "user.tags.first"), None);
        assert_eq!(get_or(&tree, "account.id", &fallback), &fallback);
        assert_eq!(get(&tree, ""), None);
        assert_eq!(get(&json!({}), "user"), None);
    }

    #[test]
    fn get_indexes_into_arrays() {
        let tree = json!({"items": [{"qty": 2}, {"qty": 5}]});
        assert_eq!(get(&tree, "items.1.qty"), Some(&json!(5)));
        assert_eq!(get(&tree, "items.x.qty"), None);
    }

    #[test]
    fn set_creates_intermediates() {
        let mut tree = json!({});
        set(&mut tree, "user.profile.name", json!("Jane"));
        assert_eq!(tree, json!({"user": {"profile": {"name": "Jane"}}}));
    }

    #[test]
    fn set_replaces_non_object_intermediates() {
        let mut tree = json!({"user": "flat"});
        set(&mut tree, "user.age", json!(30));
        assert_eq!(tree, json!({"user": {"age": 30}}));
    }

    #[test]
    fn set_with_empty_path_is_noop() {
        let mut tree = json!({"a": 1});
        set(&mut tree, "", json!(2));
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn set_then_get_round_trips() {
        let paths = ["a", "a.b", "x.y.z", "deep.er.than.that"];
        let values = [json!(1), json!("s"), json!([1, 2]), json!({"k": null}), json!(false)];
        for path in paths {
            for value in &values {
                let mut tree = json!({"a": {"c": 3}});
                set(&mut tree, path, value.clone());
                assert_eq!(get(&tree, path), Some(value), "path {path}");
            }
        }
    }

    #[test]
    fn set_keeps_array_rows() {
        let mut tree = json!({"items": [{"qty": 1}, {"qty": 2}]});
        set(&mut tree, "items.1.qty", json!(9));
        assert_eq!(tree, json!({"items": [{"qty": 1}, {"qty": 9}]}));

        set(&mut tree, "items.0", json!({"qty": 4, "sku": "a"}));
        assert_eq!(tree, json!({"items": [{"qty": 4, "sku": "a"}, {"qty": 9}]}));
    }

    #[test]
    fn set_pads_arrays_past_the_end() {
        let mut tree = json!({"rows": [{"a": 1}]});
        set(&mut tree, "rows.2.a", json!(3));
        assert_eq!(tree, json!({"rows": [{"a": 1}, null, {"a": 3}]}));
        assert_eq!(get(&tree, "rows.2.a"), Some(&json!(3)));
    }

    #[test]
    fn set_numeric_segment_without_array_builds_object() {
        let mut tree = json!({});
        set(&mut tree, "items.0.qty", json!(1));
        assert_eq!(tree, json!({"items": {"0": {"qty": 1}}}));

        let mut tree = json!({"items": [1, 2]});
        set(&mut tree, "items.first", json!(1));
        assert_eq!(tree, json!({"items": {"first": 1}}));
    }
}
