//! Opt-in logging for tests, benches and demos.

/// Install a `tracing_subscriber::fmt` subscriber filtered by `RUST_LOG`.
///
/// Does nothing when `RUST_LOG` is unset or a global subscriber is already
/// installed, so every test may call it.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
