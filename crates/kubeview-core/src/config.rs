//! Process-wide engine configuration.
//!
//! Collects the knobs spec.md pins to specific values (§5 timeouts, §4.1
//! backoff, §4.2 `ConnectMany` parallelism, §4.4 ignored-field globs) into
//! one `serde`-deserializable struct, the way the teacher's switch crate
//! takes a config struct at construction rather than scattering constants
//! across modules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::BackoffPolicy;

/// Default bound on concurrently-in-flight connection attempts for
/// `ConnectMany` (spec.md §4.2: "bounded parallelism, default 8").
pub const DEFAULT_CONNECT_MANY_PARALLELISM: usize = 8;

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_discovery_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_schema_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_discovery_ttl() -> Duration {
    // spec.md §4.3: discovery results are cached and refreshed on a TTL;
    // five minutes balances picking up newly-installed CRDs against
    // hammering the API server's discovery endpoints.
    Duration::from_secs(300)
}

fn default_connect_many_parallelism() -> usize {
    DEFAULT_CONNECT_MANY_PARALLELISM
}

fn default_ignored_schema_fields() -> Vec<String> {
    vec![
        "metadata.labels.*".to_string(),
        "metadata.annotations.*".to_string(),
        "metadata.managedFields".to_string(),
    ]
}

fn default_event_bus_capacity() -> usize {
    256
}

/// Top-level configuration for a running engine instance. Every field has a
/// default matching spec.md's stated values, so `EngineConfig::default()`
/// is a valid, spec-conformant configuration on its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for a single `Connect` attempt (§5: 10s).
    #[serde(with = "humantime_serde_duration", rename = "connect_timeout_secs")]
    pub connect_timeout: Duration,

    /// Timeout for a single discovery run (§5: 15s).
    #[serde(with = "humantime_serde_duration", rename = "discovery_timeout_secs")]
    pub discovery_timeout: Duration,

    /// Timeout for a single schema fetch (§5: 30s).
    #[serde(with = "humantime_serde_duration", rename = "schema_timeout_secs")]
    pub schema_timeout: Duration,

    /// How long a cached discovery result stays valid before a background
    /// refresh is triggered (§4.3).
    #[serde(with = "humantime_serde_duration", rename = "discovery_ttl_secs")]
    pub discovery_ttl: Duration,

    /// Reconnect backoff schedule shared by Cluster Sessions and Watch
    /// Workers (§4.1, §4.5).
    pub reconnect_backoff: BackoffPolicy,

    /// Bound on concurrently-in-flight `Connect` calls inside
    /// `ConnectMany` (§4.2).
    pub connect_many_parallelism: usize,

    /// Dot-path glob patterns excluded from schema-merge conflict
    /// detection (§4.4). Matches against flattened field paths such as
    /// `metadata.labels.app`.
    pub ignored_schema_fields: Vec<String>,

    /// Capacity of the broadcast channel backing the Event Bus.
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            connect_timeout: default_connect_timeout(),
            discovery_timeout: default_discovery_timeout(),
            schema_timeout: default_schema_timeout(),
            discovery_ttl: default_discovery_ttl(),
            reconnect_backoff: BackoffPolicy::default(),
            connect_many_parallelism: default_connect_many_parallelism(),
            ignored_schema_fields: default_ignored_schema_fields(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

/// `serde(with = ...)` helper module for `Duration` fields expressed in
/// the config file as whole seconds. `BackoffPolicy` itself derives
/// `Serialize`/`Deserialize` by field (see `retry.rs`); this module exists
/// only because `Duration`'s own serde impl serializes as `{secs, nanos}`,
/// which is not a format a human is meant to hand-edit in a TOML file.
mod humantime_serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.discovery_timeout, Duration::from_secs(15));
        assert_eq!(cfg.schema_timeout, Duration::from_secs(30));
        assert_eq!(cfg.connect_many_parallelism, 8);
        assert_eq!(cfg.ignored_schema_fields.len(), 3);
    }

    #[test]
    fn roundtrips_through_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize");
        let restored: EngineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.connect_timeout, cfg.connect_timeout);
        assert_eq!(restored.connect_many_parallelism, cfg.connect_many_parallelism);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let restored: EngineConfig =
            serde_json::from_str(r#"{"connect_many_parallelism": 4}"#).expect("deserialize");
        assert_eq!(restored.connect_many_parallelism, 4);
        assert_eq!(restored.connect_timeout, Duration::from_secs(10));
    }
}
