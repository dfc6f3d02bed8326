use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Quieter defaults with focused scan summaries. Override via `RUST_LOG`.
pub const SERVER_LOG_FILTER: &str = "info,scan::summary=info,vigil_core=info,tower_http=warn";

/// Workers report batch progress through frames; logs are for failures.
pub const WORKER_LOG_FILTER: &str = "warn,vigil_core::executor=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// Used whenever stdout carries data (worker frames, `run` payloads).
    Stderr,
}

pub fn init_tracing(default_filter: &str, target: LogTarget) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    match target {
        LogTarget::Stdout => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogTarget::Stderr => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init(),
    }
}
