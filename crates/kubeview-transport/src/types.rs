//! Shared domain types: context names and GVKs.
//!
//! These live in the transport crate rather than `kubeview-core` because
//! they're Kubernetes-specific vocabulary; `kubeview-core` stays ignorant of
//! what a cluster even is.

use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a cluster connection profile (spec.md §3: "unique
/// key"). Cheap to clone — backed by `Arc<str>` the way the teacher keys
/// its session registry by `Arc<str>` rather than owned `String`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContextName(Arc<str>);

impl ContextName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        ContextName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextName {
    fn from(s: &str) -> Self {
        ContextName::new(s)
    }
}

impl From<String> for ContextName {
    fn from(s: String) -> Self {
        ContextName::new(s)
    }
}

/// `(group, version, kind)` — Kubernetes' primary resource identifier
/// (spec.md §3). `group` is empty for the core API. Equality is
/// structural; kinds are not assumed stable across versions, so this type
/// does not attempt to normalize or validate its fields beyond storage.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Gvk {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn is_core_group(&self) -> bool {
        self.group.is_empty()
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

impl From<kube::api::GroupVersionKind> for Gvk {
    fn from(gvk: kube::api::GroupVersionKind) -> Self {
        Gvk {
            group: gvk.group,
            version: gvk.version,
            kind: gvk.kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_gvk_has_no_group_segment() {
        let gvk = Gvk::new("", "v1", "Pod");
        assert!(gvk.is_core_group());
        assert_eq!(gvk.to_string(), "v1/Pod");
    }

    #[test]
    fn named_group_gvk_includes_group_segment() {
        let gvk = Gvk::new("apps", "v1", "Deployment");
        assert_eq!(gvk.to_string(), "apps/v1/Deployment");
    }

    #[test]
    fn context_names_compare_by_value() {
        let a = ContextName::new("dev");
        let b = ContextName::new("dev");
        assert_eq!(a, b);
    }
}
