//! `diffFields` (spec.md §4.6, §9): "specified purely in terms of path
//! walking". Given two resource documents, returns every leaf field path
//! at which they differ, using deep structural equality — arrays are
//! compared as whole values, not element-wise, so appending to an array
//! produces one changed path (the array's own path), not N.

use serde_json::Value;

/// Walk `prev` and `next` in parallel, recursing into JSON objects and
/// treating every other value (including arrays) as a leaf compared by
/// deep equality.
pub fn diff_fields(prev: &Value, next: &Value) -> Vec<Vec<String>> {
    let mut changes = Vec::new();
    walk(prev, next, &mut Vec::new(), &mut changes);
    changes
}

fn walk(prev: &Value, next: &Value, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    match (prev, next) {
        (Value::Object(prev_map), Value::Object(next_map)) => {
            let mut keys: Vec<&String> = prev_map.keys().chain(next_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(key.clone());
                match (prev_map.get(key), next_map.get(key)) {
                    (Some(p), Some(n)) => walk(p, n, path, out),
                    (Some(_), None) | (None, Some(_)) => out.push(path.clone()),
                    (None, None) => unreachable!("key came from one of the two maps"),
                }
                path.pop();
            }
        }
        _ => {
            if prev != next {
                out.push(path.clone());
            }
        }
    }
}

/// `getNestedValue` (spec.md §9) — reads a value at a dotted field path,
/// used by the UI-facing column projection as well as by tests that want
/// to assert on a specific cell.
pub fn get_nested_value<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_change_at_leaf_is_reported() {
        let prev = json!({ "status": { "replicas": 1 } });
        let next = json!({ "status": { "replicas": 2 } });
        let changes = diff_fields(&prev, &next);
        assert_eq!(changes, vec![vec!["status".to_string(), "replicas".to_string()]]);
    }

    #[test]
    fn identical_documents_have_no_diff() {
        let doc = json!({ "spec": { "replicas": 3 } });
        assert!(diff_fields(&doc, &doc).is_empty());
    }

    #[test]
    fn arrays_are_compared_as_whole_values() {
        let prev = json!({ "spec": { "tags": ["a", "b"] } });
        let next = json!({ "spec": { "tags": ["a", "b", "c"] } });
        let changes = diff_fields(&prev, &next);
        assert_eq!(changes, vec![vec!["spec".to_string(), "tags".to_string()]]);
    }

    #[test]
    fn key_present_only_on_one_side_is_reported() {
        let prev = json!({ "status": {} });
        let next = json!({ "status": { "phase": "Running" } });
        let changes = diff_fields(&prev, &next);
        assert_eq!(changes, vec![vec!["status".to_string(), "phase".to_string()]]);
    }

    #[test]
    fn get_nested_value_walks_dotted_path() {
        let doc = json!({ "status": { "phase": "Running" } });
        let path = vec!["status".to_string(), "phase".to_string()];
        assert_eq!(get_nested_value(&doc, &path), Some(&json!("Running")));
    }
}
