use tracing_subscriber::EnvFilter;

/// Initialize structured logging for the whole process.
///
/// The filter comes from `RUST_LOG` (default `info`). Debug builds log
/// human-readable lines; release builds emit JSON for log aggregation.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if cfg!(debug_assertions) {
        builder.with_target(true).compact().init();
    } else {
        builder.json().with_current_span(false).init();
    }
}
