//! Logging wiring.
//!
//! `spec.md` §1 keeps "logging configuration" out of scope as a product-level
//! concern, but a running server still needs structured output; this module
//! is the minimal `tracing-subscriber` initialization every binary in this
//! corpus carries, replacing the teacher's hand-rolled `util::log`.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading its filter from
/// `REDCORE_LOG` (falling back to `info`). Safe to call once; subsequent
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env("REDCORE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
