use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt as _,
};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "telescope_controller.log";

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// The returned guard flushes the log file and must be held until exit.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = file_writer
        .clone()
        .filter(|_| config.json)
        .map(|writer| fmt::Layer::new().json().with_writer(writer));
    let text_layer = file_writer
        .filter(|_| !config.json)
        .map(|writer| fmt::Layer::new().with_ansi(false).with_writer(writer));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .with(json_layer)
        .with(text_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global subscriber");
    guard
}
