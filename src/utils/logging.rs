//! Structured logging setup.
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want them printed call [`init_logging`] once.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a global subscriber built from `config`. `RUST_LOG` overrides the level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let writer = match &config.log_file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let layer = if config.json_format {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_target(true).with_writer(writer).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install subscriber: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn json_lines_go_to_the_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.log");
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            json_format: true,
            log_file_path: Some(path.clone()),
        };

        init_logging(&config).unwrap();
        tracing::info!(pid = 4242, "Session ready");

        let written = std::fs::read_to_string(&path).unwrap();
        // other tests may log concurrently once the subscriber is global
        let event = written
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
            .find(|event| event["fields"]["pid"] == 4242)
            .unwrap();
        assert_eq!(event["fields"]["message"], "Session ready");

        // only one global subscriber per process
        assert!(init_logging(&config).is_err());
    }
}
