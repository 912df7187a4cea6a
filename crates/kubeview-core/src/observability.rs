//! `tracing` bootstrap.
//!
//! Every long-running component in this workspace (Cluster Session,
//! Discovery Service, Watch Worker, Aggregation Engine) logs through
//! `tracing` spans keyed by context name and GVK rather than ad hoc
//! `println!`, following the teacher's convention in `spark-switch`. This
//! module just wires up a `tracing-subscriber` `fmt` layer with an
//! `EnvFilter` so a host application gets sensible output by calling
//! [`init_tracing`] once at startup; nothing downstream depends on this
//! module directly.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber reading its filter from
/// `KUBEVIEW_LOG` (falling back to `info` if unset or invalid). Safe to
/// call at most once per process; a second call is a no-op and the
/// resulting error is swallowed, since tests in this workspace routinely
/// run in the same process and each only wants best-effort logging.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("KUBEVIEW_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic_on_repeated_calls() {
        init_tracing();
        init_tracing();
    }
}
