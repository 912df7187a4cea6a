//! Shared data model (spec.md §3): the vocabulary every other module in
//! this crate speaks. Resource documents stay untyped (`serde_json::Value`)
//! per the "dynamically typed resource objects" redesign note in §9 — this
//! workspace doesn't know the shape of a `Pod` any more than the UI does.

use std::time::SystemTime;

use kubeview_transport::{ContextName, Gvk};
use serde::{Deserialize, Serialize};

/// `{group, version, kind, contexts, allCount}` (spec.md §3). Invariant:
/// `contexts ⊆ connectedContexts`; `allCount = contexts.len()`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MultiClusterGvk {
    pub gvk: Gvk,
    pub contexts: Vec<ContextName>,
    pub all_count: usize,
}

impl MultiClusterGvk {
    pub fn new(gvk: Gvk, contexts: Vec<ContextName>) -> Self {
        let all_count = contexts.len();
        MultiClusterGvk {
            gvk,
            contexts,
            all_count,
        }
    }
}

/// One node of a field tree (spec.md §3). `type` names are spelled out as
/// an enum rather than a bare string so merge logic (`schema::merge`)
/// gets exhaustiveness checking.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    Number,
    Array(Box<FieldType>),
    Map(Box<FieldType>),
    Object,
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub full_path: Vec<String>,
    pub level: usize,
    pub children: Vec<SchemaNode>,
    /// True if this field is on the ignored-field list (§4.4): rendered
    /// but not expandable or selectable.
    pub ignored: bool,
}

impl SchemaNode {
    pub fn leaf(name: impl Into<String>, field_type: FieldType, full_path: Vec<String>, level: usize) -> Self {
        SchemaNode {
            name: name.into(),
            field_type,
            full_path,
            level,
            children: Vec::new(),
            ignored: false,
        }
    }
}

/// `(context, namespace, name)` — identity key for a resource row
/// (spec.md §3). `namespace` is empty for cluster-scoped resources.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RowId {
    pub context: ContextName,
    pub namespace: String,
    pub name: String,
}

impl RowId {
    pub fn new(context: ContextName, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        RowId {
            context,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// `{_context, object}` (spec.md §3). `object` is the opaque dynamic
/// resource document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceRow {
    #[serde(rename = "_context")]
    pub context: ContextName,
    pub object: serde_json::Value,
}

impl ResourceRow {
    pub fn row_id(&self) -> RowId {
        let namespace = self
            .object
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let name = self
            .object
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        RowId::new(self.context.clone(), namespace, name)
    }
}

/// `{rowId, fieldPath, timestamp}` (spec.md §3). Emitted when a MODIFIED
/// event's previous and next object differ at a specific leaf path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellChange {
    pub row_id: RowId,
    pub field_path: Vec<String>,
    #[serde(with = "timestamp_secs")]
    pub timestamp: SystemTime,
}

mod timestamp_secs {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = ts.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        serializer.serialize_u64(secs)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// `{kind, row, prev?}` (spec.md §3) — the event a Watch Worker emits.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Added(ResourceRow),
    Modified { prev: ResourceRow, next: ResourceRow },
    Deleted(ResourceRow),
}

/// `{id, name, gvk, fields, createdAt}` (spec.md §3). `id` is internally
/// generated and immutable; `name` is user-visible but non-unique.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub name: String,
    pub gvk: Gvk,
    pub fields: Vec<Vec<String>>,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_reads_namespace_and_name_from_metadata() {
        let row = ResourceRow {
            context: ContextName::new("dev"),
            object: serde_json::json!({
                "metadata": { "namespace": "default", "name": "a" }
            }),
        };
        let id = row.row_id();
        assert_eq!(id.namespace, "default");
        assert_eq!(id.name, "a");
    }

    #[test]
    fn row_id_defaults_namespace_to_empty_for_cluster_scoped() {
        let row = ResourceRow {
            context: ContextName::new("dev"),
            object: serde_json::json!({ "metadata": { "name": "node-1" } }),
        };
        let id = row.row_id();
        assert_eq!(id.namespace, "");
    }

    #[test]
    fn multi_cluster_gvk_all_count_matches_contexts_len() {
        let gvk = MultiClusterGvk::new(
            Gvk::new("apps", "v1", "Deployment"),
            vec![ContextName::new("dev"), ContextName::new("prod")],
        );
        assert_eq!(gvk.all_count, 2);
    }
}
