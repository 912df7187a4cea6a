//! Session Registry (component B, spec.md §4.2).
//!
//! Grounded on the teacher's `spark_switch::core::session_manager`: a
//! `DashMap` keyed by context name, created on first use, with idempotent
//! remove. `ConnectMany` adds a bounded-parallelism fan-out the teacher's
//! registry doesn't need (it only ever creates sessions one at a time on
//! inbound calls) — built with `tokio::sync::Semaphore`, the same
//! concurrency primitive the spec's §5 calls out for this exact bound.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kubeview_core::{BackoffPolicy, CoreError, EventBus};
use kubeview_transport::{ClusterSession, ConnectionEvent, ContextName, ContextProvider, SessionState};
use tokio::sync::Semaphore;

/// Outcome of one `Connect` attempt inside a `ConnectMany` batch (spec.md
/// §4.2).
#[derive(Clone, Debug)]
pub struct ConnectionResult {
    pub context: ContextName,
    pub ok: bool,
    pub error: Option<String>,
}

/// Process-wide mapping `contextName → Session` (spec.md §4.2).
pub struct SessionRegistry {
    sessions: DashMap<ContextName, ClusterSession>,
    provider: Arc<dyn ContextProvider>,
    events: EventBus<ConnectionEvent>,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    parallelism: usize,
}

impl SessionRegistry {
    pub fn new(
        provider: Arc<dyn ContextProvider>,
        events: EventBus<ConnectionEvent>,
        backoff: BackoffPolicy,
        connect_timeout: Duration,
        parallelism: usize,
    ) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            provider,
            events,
            backoff,
            connect_timeout,
            parallelism: parallelism.max(1),
        }
    }

    /// `ConnectMany([contextName…]) → [ConnectionResult…]` (spec.md §4.2).
    /// Connects in parallel, bounded by `self.parallelism` concurrent
    /// attempts, and never partial-fails the batch: every requested
    /// context gets a result entry, in input order (invariant 1, §8).
    pub async fn connect_many(&self, contexts: Vec<ContextName>) -> Vec<ConnectionResult> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(contexts.len());

        for context in contexts {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let events = self.events.clone();
            let backoff = self.backoff;
            let connect_timeout = self.connect_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let result = ClusterSession::connect(
                    context.clone(),
                    provider,
                    events,
                    backoff,
                    connect_timeout,
                )
                .await;
                (context, result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let (context, outcome) = handle.await.expect("connect task panicked");
            match outcome {
                Ok(session) => {
                    results.push((context.clone(), true, None));
                    self.sessions.insert(context, session);
                }
                Err(err) => {
                    results.push((context, false, Some(err.to_string())));
                }
            }
        }

        results
            .into_iter()
            .map(|(context, ok, error)| ConnectionResult { context, ok, error })
            .collect()
    }

    /// `Get(contextName) → Session?` (spec.md §4.2).
    pub fn get(&self, context: &ContextName) -> Option<ClusterSession> {
        self.sessions.get(context).map(|entry| entry.value().clone())
    }

    /// `ConnectedContexts() → [contextName…]` — only those in `Ready`
    /// (spec.md §4.2).
    pub fn connected_contexts(&self) -> Vec<ContextName> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state() == SessionState::Ready)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// All registered contexts regardless of state, used by the Discovery
    /// Service's failure-exclusion policy (§4.3) which still wants to know
    /// about sessions that exist but aren't `Ready`.
    pub fn all_contexts(&self) -> Vec<ContextName> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// `Disconnect(contextName)` — idempotent (spec.md §4.2).
    pub async fn disconnect(&self, context: &ContextName) -> Result<(), CoreError> {
        if let Some((_, session)) = self.sessions.remove(context) {
            session.close().await;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::NullContextProvider;

    fn make_registry() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(NullContextProvider),
            EventBus::default(),
            BackoffPolicy::default(),
            Duration::from_millis(50),
            8,
        )
    }

    #[tokio::test]
    async fn connect_many_returns_one_result_per_input_in_order() {
        let registry = make_registry();
        let contexts = vec![
            ContextName::new("a"),
            ContextName::new("b"),
            ContextName::new("c"),
        ];
        let results = registry.connect_many(contexts.clone()).await;
        assert_eq!(results.len(), contexts.len());
        for (expected, actual) in contexts.iter().zip(results.iter()) {
            assert_eq!(expected, &actual.context);
        }
    }

    #[tokio::test]
    async fn unknown_context_fails_without_aborting_the_batch() {
        let registry = make_registry();
        let results = registry
            .connect_many(vec![ContextName::new("nonexistent")])
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].ok);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let registry = make_registry();
        registry.disconnect(&ContextName::new("never-connected")).await.unwrap();
        registry.disconnect(&ContextName::new("never-connected")).await.unwrap();
    }
}
