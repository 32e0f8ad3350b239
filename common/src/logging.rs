//! `tracing` setup shared by the node binary.

/// Initializes a stderr subscriber whose default level is driven by a
/// `-v` occurrence count (0 = warn, 1 = info, 2 = debug, 3+ = trace),
/// overridable via `RUST_LOG`.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
