use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber. Verbosity comes from `RUST_LOG`, default `info`.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
