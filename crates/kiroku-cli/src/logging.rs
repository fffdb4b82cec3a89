use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kiroku_core::config::{AppConfig, LoggingConfig};

/// Install the global subscriber. `RUST_LOG` overrides the configured filter.
///
/// Keep the returned guard alive until exit or buffered file output is lost.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !config.file {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(AppConfig::log_dir(), "kiroku.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Some(guard)
}
