//! Log subscriber setup
//!
//! Server binaries and integration tests call [`init`] once at startup.
//! Filtering is controlled through `RUST_LOG` as usual.

/// Install the global fmt subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
