//! Opt-in log output for applications embedding tasklib.
//!
//! The library only emits `tracing` events. Binaries that have no subscriber of
//! their own can call [`init_logging`] once at startup.

use crate::config::LoggingConfig;
use crate::error::{TasklibError, TasklibResult};

/// Install a global fmt subscriber configured from `config`.
///
/// Fails with [`TasklibError::ConfigError`] if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> TasklibResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .with_ansi(config.colored)
        .with_target(config.include_targets);

    let installed = if config.include_timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    installed.map_err(|e| TasklibError::config(format!("Failed to install log subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_config_error() {
        let config = LoggingConfig {
            include_timestamps: false,
            ..Default::default()
        };
        // The first call may lose to another test's subscriber; the second never wins.
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, TasklibError::ConfigError { .. }));
    }
}
