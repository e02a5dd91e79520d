//! Log setup for hosts that have no subscriber of their own.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs a stderr fmt subscriber filtered by `RUST_LOG`. Returns `false` when a
/// global subscriber is already set, which leaves that one in place.
pub fn init() -> bool {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
