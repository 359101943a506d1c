use autoquote_core::config::{AppConfig, LogFormat};
use tracing::Level;

/// Installs the global subscriber on stderr so stdout stays a clean JSON
/// envelope. A second call is a no-op.
pub fn init(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
