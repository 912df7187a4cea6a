//! The seam between this core and an external kubeconfig parser (§6a).
//!
//! `spec.md` treats "the kubeconfig file parser" as an out-of-scope external
//! collaborator that hands the core an already-parsed list of named
//! contexts with embedded credentials. `ContextProvider` is that boundary
//! made explicit as a trait, so a UI that wants to merge multiple
//! kubeconfig files or support profile switching can supply its own
//! implementation without this crate changing.

use kubeview_core::CoreError;

use crate::types::ContextName;

/// Supplies context names and per-context `kube::Config` to the rest of the
/// system. The core ships [`KubeconfigFileProvider`]; callers may substitute
/// their own.
pub trait ContextProvider: Send + Sync {
    /// Every context name this provider knows about, in no particular
    /// order — callers that need a stable order sort it themselves.
    fn list_context_names(&self) -> Vec<ContextName>;

    /// Build a `kube::Config` for one context. Returns
    /// `CoreError::NotFound` if `name` isn't one of
    /// `list_context_names()`'s entries, and `CoreError::Configuration` if
    /// the context's kubeconfig entry is present but malformed (spec.md
    /// §7: "kubeconfig missing/invalid contexts... surfaced at Connect
    /// time per context").
    fn kube_config(&self, name: &ContextName) -> Result<kube::Config, CoreError>;
}

/// The standard-library answer to `ContextProvider`: reads `~/.kube/config`
/// (or `$KUBECONFIG`) via `kube::config::Kubeconfig::read()`, the de-facto
/// kubeconfig parser in the Rust ecosystem and the one `kube::Client`
/// itself uses transitively. Supports bearer-token auth, mTLS client
/// certs, and exec-plugin credential providers exactly as far as
/// `kube::Config` does, satisfying spec.md §6's "implementer must support
/// at minimum" list without this crate reimplementing any of it.
pub struct KubeconfigFileProvider {
    kubeconfig: kube::config::Kubeconfig,
}

impl KubeconfigFileProvider {
    /// Read the kubeconfig from the default locations
    /// (`$KUBECONFIG` or `~/.kube/config`).
    pub fn from_default_location() -> Result<Self, CoreError> {
        let kubeconfig = kube::config::Kubeconfig::read()
            .map_err(|e| CoreError::Configuration(format!("failed to read kubeconfig: {e}")))?;
        Ok(KubeconfigFileProvider { kubeconfig })
    }

    pub fn from_kubeconfig(kubeconfig: kube::config::Kubeconfig) -> Self {
        KubeconfigFileProvider { kubeconfig }
    }
}

impl ContextProvider for KubeconfigFileProvider {
    fn list_context_names(&self) -> Vec<ContextName> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|ctx| ContextName::new(ctx.name.clone()))
            .collect()
    }

    fn kube_config(&self, name: &ContextName) -> Result<kube::Config, CoreError> {
        let options = kube::config::KubeConfigOptions {
            context: Some(name.as_str().to_string()),
            ..Default::default()
        };
        // `Kubeconfig::read()` is synchronous; building a `Config` from it
        // resolves exec-plugin/auth-provider credentials, which is async
        // because some providers shell out. Callers invoke this from an
        // async context (Cluster Session's Connect), so `futures::executor`
        // is not needed here — see `ClusterSession::connect`.
        futures::executor::block_on(kube::Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &options,
        ))
        .map_err(|e| CoreError::Configuration(format!("context `{name}` invalid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_kubeconfig() -> kube::config::Kubeconfig {
        kube::config::Kubeconfig {
            preferences: None,
            clusters: vec![],
            auth_infos: vec![],
            contexts: vec![],
            current_context: None,
            extensions: None,
            kind: None,
            api_version: None,
        }
    }

    #[test]
    fn unknown_context_is_configuration_error() {
        let provider = KubeconfigFileProvider::from_kubeconfig(empty_kubeconfig());
        let err = provider.kube_config(&ContextName::new("missing")).unwrap_err();
        assert_eq!(err.category(), kubeview_core::ErrorCategory::Configuration);
    }

    #[test]
    fn empty_kubeconfig_lists_no_contexts() {
        let provider = KubeconfigFileProvider::from_kubeconfig(empty_kubeconfig());
        assert!(provider.list_context_names().is_empty());
    }
}
