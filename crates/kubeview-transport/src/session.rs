//! Cluster Session (component A, spec.md §4.1).
//!
//! Shape grounded on `BgObserver` from the b4n reference client: an atomic
//! state word readable without locking, a `CancellationToken` for
//! cooperative shutdown, and a background task owning the actual
//! connection. Unlike `BgObserver` this type does not run a watch itself —
//! that's the Watch Worker's job, one layer up — it only owns the
//! `kube::Client` and the reconnect loop that keeps it alive.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kubeview_core::{BackoffPolicy, CoreError, EventBus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::handle::{ResourceHandle, SchemaHandle};
use crate::provider::ContextProvider;
use crate::types::ContextName;

/// `New → Connecting → Ready ↔ Unhealthy → Closed` (spec.md §4.1).
/// Represented as a `u8` behind an `AtomicU8` so readers (health-check
/// pollers, the UI façade) never contend with the reconnect loop for a
/// lock just to ask "are we Ready?".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SessionState {
    New = 0,
    Connecting = 1,
    Ready = 2,
    Unhealthy = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::New,
            1 => SessionState::Connecting,
            2 => SessionState::Ready,
            3 => SessionState::Unhealthy,
            _ => SessionState::Closed,
        }
    }

    /// Whether `self -> next` is a legal transition. `Closed` is terminal;
    /// everything else can transition to `Closed` explicitly (spec.md
    /// §4.1: "explicit Close from any state → Closed").
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, Connecting) => true,
            (Connecting, Ready) => true,
            (Connecting, Unhealthy) => true,
            (Ready, Unhealthy) => true,
            (Unhealthy, Ready) => true,
            (Unhealthy, Connecting) => true,
            _ => false,
        }
    }
}

/// Connection-state notification published on the Event Bus (§7:
/// "Sessions surface their state via the Event Bus").
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    StateChanged {
        context: ContextName,
        state: SessionState,
    },
    HealthCheckFailed {
        context: ContextName,
        reason: String,
    },
}

struct Inner {
    client: RwLock<Option<kube::Client>>,
    state: AtomicU8,
    cancellation_token: CancellationToken,
}

/// Owns one authenticated connection to one context. Cloning a
/// `ClusterSession` clones the handle, not the connection — every clone
/// shares the same underlying state and reconnect loop, matching how the
/// Session Registry hands out session handles to many callers.
#[derive(Clone)]
pub struct ClusterSession {
    context: ContextName,
    inner: Arc<Inner>,
    events: EventBus<ConnectionEvent>,
    backoff: BackoffPolicy,
}

impl ClusterSession {
    fn new(context: ContextName, events: EventBus<ConnectionEvent>, backoff: BackoffPolicy) -> Self {
        ClusterSession {
            context,
            inner: Arc::new(Inner {
                client: RwLock::new(None),
                state: AtomicU8::new(SessionState::New as u8),
                cancellation_token: CancellationToken::new(),
            }),
            events,
            backoff,
        }
    }

    pub fn context(&self) -> &ContextName {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state();
        if !prev.can_transition_to(next) {
            return;
        }
        self.inner.state.store(next as u8, Ordering::Release);
        self.events.publish(ConnectionEvent::StateChanged {
            context: self.context.clone(),
            state: next,
        });
    }

    /// `Connect(contextName) → Session | Fails<AuthError|Unreachable|NotFound>`
    /// (spec.md §4.1). Builds a `kube::Client` from the provider's
    /// `kube::Config` for this context, spawns the reconnect-on-failure
    /// background loop, and returns once the first connection attempt has
    /// resolved — either into `Ready` or into `Unhealthy` with the loop
    /// already retrying.
    #[instrument(skip(provider, events), fields(context = %context))]
    pub async fn connect(
        context: ContextName,
        provider: Arc<dyn ContextProvider>,
        events: EventBus<ConnectionEvent>,
        backoff: BackoffPolicy,
        connect_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let session = ClusterSession::new(context.clone(), events, backoff);
        session.set_state(SessionState::Connecting);

        match session
            .try_connect_once(provider.as_ref(), connect_timeout)
            .await
        {
            Ok(client) => {
                *session.inner.client.write().await = Some(client);
                session.set_state(SessionState::Ready);
            }
            Err(err) if !err.retryable() => {
                // Auth rejections, unknown contexts, and malformed
                // configuration are non-retryable per §7 — do not spawn
                // the reconnect loop, fail `Connect` outright.
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "initial connect failed, entering reconnect loop");
                session.set_state(SessionState::Unhealthy);
            }
        }

        session.spawn_reconnect_loop(provider, connect_timeout);
        Ok(session)
    }

    async fn try_connect_once(
        &self,
        provider: &dyn ContextProvider,
        connect_timeout: Duration,
    ) -> Result<kube::Client, CoreError> {
        let config = provider.kube_config(&self.context)?;
        let context = self.context.clone();
        tokio::time::timeout(connect_timeout, async move {
            kube::Client::try_from(config)
                .map_err(|e| CoreError::transport(context.to_string(), "failed to build client", e))
        })
        .await
        .map_err(|_| CoreError::transport_message(self.context.to_string(), "connect timed out"))?
    }

    /// Background task that keeps the session alive: whenever the client
    /// is missing or the session is `Unhealthy`, attempt to reconnect on
    /// the shared backoff schedule until `Close()` cancels the token.
    fn spawn_reconnect_loop(&self, provider: Arc<dyn ContextProvider>, connect_timeout: Duration) {
        let session = self.clone();
        let token = self.inner.cancellation_token.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if token.is_cancelled() {
                    return;
                }
                if session.state() == SessionState::Ready {
                    // Healthy — nothing to do until a health check
                    // demotes us back to Unhealthy.
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    }
                }

                let delay = session.backoff.delay_for_attempt(attempt);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match session.try_connect_once(provider.as_ref(), connect_timeout).await {
                    Ok(client) => {
                        *session.inner.client.write().await = Some(client);
                        session.set_state(SessionState::Ready);
                        attempt = 0;
                    }
                    Err(err) => {
                        warn!(error = %err, attempt, "reconnect attempt failed");
                        session.set_state(SessionState::Unhealthy);
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        });
    }

    /// `HealthCheck() → Ok | Unreachable` (spec.md §4.1). Issues a
    /// lightweight API-server call; on failure demotes the session to
    /// `Unhealthy` so the reconnect loop takes over.
    pub async fn health_check(&self) -> Result<(), CoreError> {
        let client = self.inner.client.read().await.clone();
        let Some(client) = client else {
            return Err(CoreError::transport_message(self.context.to_string(), "not connected"));
        };

        match client.apiserver_version().await {
            Ok(_) => {
                if self.state() == SessionState::Unhealthy {
                    self.set_state(SessionState::Ready);
                }
                Ok(())
            }
            Err(e) => {
                let err = CoreError::transport(self.context.to_string(), "health check failed", e);
                self.set_state(SessionState::Unhealthy);
                self.events.publish(ConnectionEvent::HealthCheckFailed {
                    context: self.context.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// `Close()` — scoped acquisition: cancels the reconnect loop and
    /// drops the client handle. Idempotent and terminal (spec.md §4.1).
    pub async fn close(&self) {
        self.inner.cancellation_token.cancel();
        *self.inner.client.write().await = None;
        self.set_state(SessionState::Closed);
    }

    /// Listable/watchable handle keyed by GVK (spec.md §4.1: "a
    /// listable/watchable handle keyed by GVK"). Takes a resolved
    /// `ApiResource`/`Scope` rather than a bare GVK since resolving the
    /// REST plural is the Discovery Service's job, one layer up. Returns
    /// `None` if the session has no live client (not yet connected, or
    /// closed).
    pub async fn resource_handle(
        &self,
        api_resource: kube::api::ApiResource,
        scope: kube::discovery::Scope,
    ) -> Option<ResourceHandle> {
        let client = self.inner.client.read().await.clone()?;
        Some(ResourceHandle::new(client, api_resource, scope))
    }

    /// Schema reader for this cluster (spec.md §4.1: "a schema reader
    /// returning the raw schema document for that cluster").
    pub async fn schema_handle(&self) -> Option<SchemaHandle> {
        let client = self.inner.client.read().await.clone()?;
        Some(SchemaHandle::new(client))
    }

    pub fn client(&self) -> impl std::future::Future<Output = Option<kube::Client>> + '_ {
        async move { self.inner.client.read().await.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        assert!(!SessionState::Closed.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Closed.can_transition_to(SessionState::Connecting));
    }

    #[test]
    fn any_state_can_close() {
        assert!(SessionState::New.can_transition_to(SessionState::Closed));
        assert!(SessionState::Connecting.can_transition_to(SessionState::Closed));
        assert!(SessionState::Ready.can_transition_to(SessionState::Closed));
        assert!(SessionState::Unhealthy.can_transition_to(SessionState::Closed));
    }

    #[test]
    fn ready_and_unhealthy_oscillate() {
        assert!(SessionState::Ready.can_transition_to(SessionState::Unhealthy));
        assert!(SessionState::Unhealthy.can_transition_to(SessionState::Ready));
    }

    #[test]
    fn new_cannot_jump_straight_to_ready() {
        assert!(!SessionState::New.can_transition_to(SessionState::Ready));
    }
}
