//! Process-wide structured logging, via `tracing` + `tracing-subscriber`.

use std::fmt;
use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::{LogLevel, LogTarget, LoggingConfig};

/// A live handle to the process's global `tracing` subscriber, allowing the
/// verbosity filter to be reloaded without re-initializing the whole
/// subscriber stack.
pub struct Logger {
    filter: Handle<EnvFilter, Registry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("filter", &self.filter).finish()
    }
}

impl Logger {
    /// Install the global `tracing` subscriber. Must be called at most once
    /// per process.
    ///
    /// ## Panics
    ///
    /// Panics if a global [`tracing`] subscriber has already been set.
    pub fn launch(config: &LoggingConfig) -> Result<&'static Logger, String> {
        let filter = make_env_filter(config)?;
        let (filter, filter_handle) = reload::Layer::new(filter);

        match &config.target {
            LogTarget::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| format!("opening log file {path}: {e}"))?;
                // Never emit ANSI color codes to a file.
                let layer = FmtLayer::new().with_ansi(false).with_writer(file);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            LogTarget::Stdout => {
                let layer = FmtLayer::new()
                    .with_ansi(std::io::stdout().is_terminal())
                    .with_writer(std::io::stdout);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            LogTarget::Stderr => {
                let layer = FmtLayer::new()
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_writer(std::io::stderr);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
        }

        Ok(Box::leak(Box::new(Self { filter: filter_handle })))
    }

    /// Reload the verbosity filter in place, e.g. after a `SIGHUP` config
    /// reload.
    pub fn apply(&self, config: &LoggingConfig) -> Result<(), String> {
        self.filter
            .reload(make_env_filter(config)?)
            .map_err(|_| "could not reload the log filter".to_string())
    }
}

/// Build an [`EnvFilter`] from the configured level plus any extra
/// per-target directives (§6.1 `log_level`/`log_target`).
fn make_env_filter(config: &LoggingConfig) -> Result<EnvFilter, String> {
    let mut filter = EnvFilter::default().add_directive(LevelFilter::from(config.level).into());
    for target in &config.trace_targets {
        filter = filter.add_directive(
            target
                .parse()
                .map_err(|_| format!("invalid trace target: '{target}'"))?,
        );
    }
    Ok(filter)
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_accepts_extra_targets() {
        let config = LoggingConfig {
            level: LogLevel::Info,
            target: LogTarget::Stderr,
            trace_targets: vec!["authority_core::zone=trace".to_string()],
        };
        assert!(make_env_filter(&config).is_ok());
    }

    #[test]
    fn env_filter_rejects_malformed_target() {
        let config = LoggingConfig {
            level: LogLevel::Info,
            target: LogTarget::Stderr,
            trace_targets: vec!["not a directive!!".to_string()],
        };
        assert!(make_env_filter(&config).is_err());
    }
}
