use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    EnvFilter,
    prelude::*,
};

/// Installs the global subscriber. `RUST_LOG` controls filtering and
/// `LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    // Get log level from environment variable or default to info
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_ansi(true))
            .init();
    }
}
