/// Initialize tracing/logging for the application.
///
/// This uses a simple `with_max_level` configuration based on `default_level`.
/// When `json` is set, records are emitted as one JSON object per line, which
/// is what `--log-json` feeds to downstream collectors.
pub fn init(default_level: &str, json: bool) {
    let lvl = match default_level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    // Use try_init so tests and libraries can call this multiple times without panicking
    if json {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_max_level(lvl)
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_max_level(lvl)
            .with_target(false)
            .try_init();
    }
}
