//! Schema Service (component D, spec.md §4.4).
//!
//! No direct kube-rs equivalent in the retrieval pack builds an OpenAPI
//! field tree, so this module is grounded on the spec's own contract plus
//! `k8s-openapi`'s `JSONSchemaProps` as the source document and the
//! teacher's general nested-lookup-structure idiom (building a tree once
//! and caching it per key).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kubeview_core::CoreError;
use kubeview_transport::{ConnectionEvent, ContextName, Gvk, SessionState};

use crate::model::{FieldType, SchemaNode};
use crate::registry::SessionRegistry;

/// Dot-path glob patterns excluded from schema-merge conflict detection,
/// e.g. `metadata.labels.*` (spec.md §4.4).
#[derive(Clone)]
pub struct IgnoredFields {
    patterns: Vec<String>,
}

impl IgnoredFields {
    pub fn new(patterns: Vec<String>) -> Self {
        IgnoredFields { patterns }
    }

    pub fn matches(&self, path: &[String]) -> bool {
        let joined = path.join(".");
        self.patterns.iter().any(|pattern| glob_match(pattern, &joined))
    }
}

fn glob_match(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => path == prefix || path.starts_with(&format!("{prefix}.")),
        None => pattern == path,
    }
}

/// Retrieves OpenAPI schema per session, builds per-GVK field trees, and
/// merges them across contexts (spec.md §4.4). Cached per (session, GVK)
/// indefinitely — unlike Discovery, schema has no TTL of its own and is
/// only invalidated explicitly, on a session's `Unhealthy → Ready`
/// transition (the same signal Discovery invalidates on, since a
/// reconnect may land on a cluster with an upgraded API server).
pub struct SchemaService {
    registry: Arc<SessionRegistry>,
    cache: DashMap<(ContextName, Gvk), SchemaNode>,
    ignored: IgnoredFields,
    fetch_timeout: Duration,
}

impl SchemaService {
    pub fn new(registry: Arc<SessionRegistry>, ignored: IgnoredFields, fetch_timeout: Duration) -> Self {
        SchemaService {
            registry,
            cache: DashMap::new(),
            ignored,
            fetch_timeout,
        }
    }

    pub fn invalidate(&self, context: &ContextName) {
        self.cache.retain(|(ctx, _), _| ctx != context);
    }

    pub fn handle_connection_event(&self, event: &ConnectionEvent) {
        if let ConnectionEvent::StateChanged { context, state: SessionState::Ready } = event {
            self.invalidate(context);
        }
    }

    /// `FieldTreeSingle(gvk, context) → SchemaNode` (spec.md §4.4).
    pub async fn field_tree_single(&self, gvk: &Gvk, context: &ContextName) -> Result<SchemaNode, CoreError> {
        let key = (context.clone(), gvk.clone());
        if let Some(tree) = self.cache.get(&key) {
            return Ok(tree.clone());
        }

        let session = self
            .registry
            .get(context)
            .ok_or_else(|| CoreError::NotFound(context.to_string()))?;
        let schema_handle = session
            .schema_handle()
            .await
            .ok_or_else(|| CoreError::transport_message(context.to_string(), "not connected"))?;

        // Best-effort: `SchemaHandle` exposes the raw document; a timed-out,
        // malformed, or unreachable schema degrades to an `unknown` root
        // rather than failing the whole view (§7 "Protocol" category).
        let document = tokio::time::timeout(self.fetch_timeout, schema_handle.fetch_openapi_document())
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(serde_json::Value::Null);
        let tree = build_tree_from_document(&document, gvk, &self.ignored);

        self.cache.insert(key, tree.clone());
        Ok(tree)
    }

    /// `FieldTree(gvk, contexts) → SchemaNode` — merged field tree across
    /// the given contexts (spec.md §4.4).
    pub async fn field_tree(&self, gvk: &Gvk, contexts: &[ContextName]) -> SchemaNode {
        let mut merged: Option<SchemaNode> = None;
        for context in contexts {
            if let Ok(tree) = self.field_tree_single(gvk, context).await {
                merged = Some(match merged {
                    None => tree,
                    Some(existing) => merge(&existing, &tree),
                });
            }
        }
        merged.unwrap_or_else(|| SchemaNode::leaf("", FieldType::Object, vec![], 0))
    }
}

/// Best-effort tree construction: finds the document's definition for this
/// GVK's kind and walks its `properties`. Real OpenAPI documents are keyed
/// by `#/definitions/<group>.<version>.<Kind>`; this looks the key up by
/// suffix match so it tolerates the exact prefixing convention varying
/// across API server versions.
fn build_tree_from_document(document: &serde_json::Value, gvk: &Gvk, ignored: &IgnoredFields) -> SchemaNode {
    let definitions = document.get("definitions").and_then(|v| v.as_object());
    let Some(definitions) = definitions else {
        return SchemaNode::leaf("", FieldType::Unknown, vec![], 0);
    };

    let matched = definitions
        .iter()
        .find(|(key, _)| key.ends_with(&format!(".{}", gvk.kind)));

    let Some((_, schema)) = matched else {
        return SchemaNode::leaf("", FieldType::Unknown, vec![], 0);
    };

    build_node_from_json_schema(schema, "", vec![], 0, ignored)
}

fn build_node_from_json_schema(
    schema: &serde_json::Value,
    name: &str,
    path: Vec<String>,
    level: usize,
    ignored: &IgnoredFields,
) -> SchemaNode {
    if ignored.matches(&path) {
        return SchemaNode {
            name: name.to_string(),
            field_type: FieldType::Unknown,
            full_path: path,
            level,
            children: Vec::new(),
            ignored: true,
        };
    }

    let ty = schema.get("type").and_then(|v| v.as_str()).unwrap_or("object");
    match ty {
        "string" => SchemaNode::leaf(name, FieldType::String, path, level),
        "integer" => SchemaNode::leaf(name, FieldType::Integer, path, level),
        "boolean" => SchemaNode::leaf(name, FieldType::Boolean, path, level),
        "number" => SchemaNode::leaf(name, FieldType::Number, path, level),
        "array" => {
            let mut element_path = path.clone();
            element_path.push("*".to_string());
            let element = schema
                .get("items")
                .map(|items| build_node_from_json_schema(items, "*", element_path, level + 1, ignored))
                .unwrap_or_else(|| SchemaNode::leaf("*", FieldType::Unknown, path.clone(), level + 1));
            let field_type = FieldType::Array(Box::new(element.field_type.clone()));
            SchemaNode {
                name: name.to_string(),
                field_type,
                full_path: path,
                level,
                children: vec![element],
                ignored: false,
            }
        }
        "object" => {
            let properties = schema.get("properties").and_then(|v| v.as_object());
            let additional_properties = schema.get("additionalProperties").and_then(|v| v.as_object());
            match (properties, additional_properties) {
                (None, Some(_)) => {
                    let mut element_path = path.clone();
                    element_path.push("*".to_string());
                    let element_schema = schema.get("additionalProperties").unwrap();
                    let element = build_node_from_json_schema(element_schema, "*", element_path, level + 1, ignored);
                    let field_type = FieldType::Map(Box::new(element.field_type.clone()));
                    SchemaNode {
                        name: name.to_string(),
                        field_type,
                        full_path: path,
                        level,
                        children: vec![element],
                        ignored: false,
                    }
                }
                (None, None) => SchemaNode {
                    name: name.to_string(),
                    field_type: FieldType::Object,
                    full_path: path,
                    level,
                    children: Vec::new(),
                    ignored: false,
                },
                (Some(properties), _) => {
                    let mut children: Vec<SchemaNode> = properties
                        .iter()
                        .map(|(child_name, child_schema)| {
                            let mut child_path = path.clone();
                            child_path.push(child_name.clone());
                            build_node_from_json_schema(child_schema, child_name, child_path, level + 1, ignored)
                        })
                        .collect();
                    children.sort_by(|a, b| a.name.cmp(&b.name));
                    SchemaNode {
                        name: name.to_string(),
                        field_type: FieldType::Object,
                        full_path: path,
                        level,
                        children,
                        ignored: false,
                    }
                }
            }
        }
        _ => SchemaNode::leaf(name, FieldType::Unknown, path, level),
    }
}

/// Structural union merge (spec.md §4.4):
/// - scalar type agreement ⇒ that type
/// - object shapes disagreeing ⇒ union of child names
/// - irreconcilable type disagreement ⇒ `unknown`, children dropped
///
/// Commutative by construction (`merge(a, b)` and `merge(b, a)` only ever
/// differ in child ordering, which is normalized by name — invariant 6,
/// §8).
pub fn merge(a: &SchemaNode, b: &SchemaNode) -> SchemaNode {
    if a.ignored || b.ignored {
        return SchemaNode {
            name: a.name.clone(),
            field_type: FieldType::Unknown,
            full_path: a.full_path.clone(),
            level: a.level,
            children: Vec::new(),
            ignored: true,
        };
    }

    match (&a.field_type, &b.field_type) {
        (ta, tb) if ta == tb && a.children.is_empty() && b.children.is_empty() => SchemaNode {
            name: a.name.clone(),
            field_type: ta.clone(),
            full_path: a.full_path.clone(),
            level: a.level,
            children: Vec::new(),
            ignored: false,
        },
        (FieldType::Object, FieldType::Object) => merge_objects(a, b),
        (FieldType::Array(ea), FieldType::Array(eb)) if ea == eb => {
            let merged_element = match (a.children.first(), b.children.first()) {
                (Some(ca), Some(cb)) => merge(ca, cb),
                (Some(ca), None) => ca.clone(),
                (None, Some(cb)) => cb.clone(),
                (None, None) => SchemaNode::leaf("*", (**ea).clone(), a.full_path.clone(), a.level + 1),
            };
            SchemaNode {
                name: a.name.clone(),
                field_type: FieldType::Array(Box::new(merged_element.field_type.clone())),
                full_path: a.full_path.clone(),
                level: a.level,
                children: vec![merged_element],
                ignored: false,
            }
        }
        (FieldType::Map(ea), FieldType::Map(eb)) if ea == eb => {
            let merged_element = match (a.children.first(), b.children.first()) {
                (Some(ca), Some(cb)) => merge(ca, cb),
                (Some(ca), None) => ca.clone(),
                (None, Some(cb)) => cb.clone(),
                (None, None) => SchemaNode::leaf("*", (**ea).clone(), a.full_path.clone(), a.level + 1),
            };
            SchemaNode {
                name: a.name.clone(),
                field_type: FieldType::Map(Box::new(merged_element.field_type.clone())),
                full_path: a.full_path.clone(),
                level: a.level,
                children: vec![merged_element],
                ignored: false,
            }
        }
        (ta, tb) if ta == tb => SchemaNode {
            name: a.name.clone(),
            field_type: ta.clone(),
            full_path: a.full_path.clone(),
            level: a.level,
            children: a.children.clone(),
            ignored: false,
        },
        _ => SchemaNode {
            name: a.name.clone(),
            field_type: FieldType::Unknown,
            full_path: a.full_path.clone(),
            level: a.level,
            children: Vec::new(),
            ignored: false,
        },
    }
}

fn merge_objects(a: &SchemaNode, b: &SchemaNode) -> SchemaNode {
    let mut by_name: BTreeMap<String, SchemaNode> = BTreeMap::new();
    for child in &a.children {
        by_name.insert(child.name.clone(), child.clone());
    }
    for child in &b.children {
        by_name
            .entry(child.name.clone())
            .and_modify(|existing| *existing = merge(existing, child))
            .or_insert_with(|| child.clone());
    }
    SchemaNode {
        name: a.name.clone(),
        field_type: FieldType::Object,
        full_path: a.full_path.clone(),
        level: a.level,
        children: by_name.into_values().collect(),
        ignored: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(field_type: FieldType) -> SchemaNode {
        SchemaNode::leaf("replicas", field_type, vec!["spec".into(), "replicas".into()], 2)
    }

    #[test]
    fn merge_is_symmetric_for_scalar_agreement() {
        let a = scalar(FieldType::Integer);
        let b = scalar(FieldType::Integer);
        assert_eq!(merge(&a, &b), merge(&b, &a));
        assert_eq!(merge(&a, &b).field_type, FieldType::Integer);
    }

    #[test]
    fn irreconcilable_type_conflict_becomes_unknown_with_no_children() {
        let a = scalar(FieldType::Integer);
        let b = scalar(FieldType::String);
        let merged = merge(&a, &b);
        assert_eq!(merged.field_type, FieldType::Unknown);
        assert!(merged.children.is_empty());
        assert_eq!(merged.name, "replicas");
    }

    #[test]
    fn object_merge_unions_child_names() {
        let a = SchemaNode {
            name: "spec".into(),
            field_type: FieldType::Object,
            full_path: vec!["spec".into()],
            level: 1,
            children: vec![SchemaNode::leaf("replicas", FieldType::Integer, vec!["spec".into(), "replicas".into()], 2)],
            ignored: false,
        };
        let b = SchemaNode {
            name: "spec".into(),
            field_type: FieldType::Object,
            full_path: vec!["spec".into()],
            level: 1,
            children: vec![SchemaNode::leaf("paused", FieldType::Boolean, vec!["spec".into(), "paused".into()], 2)],
            ignored: false,
        };
        let merged = merge(&a, &b);
        let mut names: Vec<&str> = merged.children.iter().map(|c| c.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["paused", "replicas"]);
        assert_eq!(merge(&a, &b), merge(&b, &a));
    }

    #[test]
    fn ignored_pattern_matches_wildcard_suffix() {
        let ignored = IgnoredFields::new(vec!["metadata.labels.*".to_string()]);
        assert!(ignored.matches(&["metadata".into(), "labels".into(), "app".into()]));
        assert!(!ignored.matches(&["metadata".into(), "name".into()]));
    }

    #[test]
    fn ignored_pattern_matches_exact_path() {
        let ignored = IgnoredFields::new(vec!["metadata.managedFields".to_string()]);
        assert!(ignored.matches(&["metadata".into(), "managedFields".into()]));
    }

    proptest::proptest! {
        #[test]
        fn merge_is_symmetric_for_arbitrary_scalar_pairs(
            a_type in 0..4u8,
            b_type in 0..4u8,
        ) {
            let to_field_type = |v: u8| match v {
                0 => FieldType::String,
                1 => FieldType::Integer,
                2 => FieldType::Boolean,
                _ => FieldType::Number,
            };
            let a = scalar(to_field_type(a_type));
            let b = scalar(to_field_type(b_type));
            proptest::prop_assert_eq!(merge(&a, &b), merge(&b, &a));
        }
    }
}
