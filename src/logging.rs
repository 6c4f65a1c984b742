// Logging setup shared by both binaries. RUST_LOG overrides the default filter.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "finplan=info";

pub fn init() {
    init_with(DEFAULT_FILTER);
}

/// Safe to call more than once; later calls are ignored
pub fn init_with(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
