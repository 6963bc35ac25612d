//! Logging setup for egonet.
//!
//! Collection runs are long and mostly asleep, so the log is the only view
//! into what a run is doing. Everything goes through `tracing`; components
//! attach context as fields (`task`, `user`, `query`) rather than through a
//! shared logger object.
//!
//! ```rust
//! use egonet::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!(task = "t1", "collection started");
//! ```

use std::time::Instant;

use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the module path.
    pub target: bool,
    /// Emit span enter/exit events.
    pub spans: bool,
    pub colors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-oriented.
    Pretty,
    /// One line per event.
    Compact,
    /// Everything, including thread and source location.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Errors only.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            timestamps: false,
            target: false,
            spans: false,
            colors: true,
        }
    }

    /// Debug level with module targets.
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            timestamps: true,
            target: true,
            spans: false,
            colors: true,
        }
    }

    /// Everything, including span events.
    #[must_use]
    pub const fn trace() -> Self {
        Self {
            level: LogLevel::Trace,
            format: LogFormat::Full,
            timestamps: true,
            target: true,
            spans: true,
            colors: true,
        }
    }

    /// Preset for a `-q` flag and a `-v` count.
    #[must_use]
    pub const fn from_verbosity(quiet: bool, verbose: u8) -> Self {
        if quiet {
            Self::quiet()
        } else {
            match verbose {
                0 => Self {
                    level: LogLevel::Info,
                    format: LogFormat::Compact,
                    timestamps: true,
                    target: false,
                    spans: false,
                    colors: true,
                },
                1 => Self::verbose(),
                _ => Self::trace(),
            }
        }
    }

    /// Filter directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_directive(&self) -> String {
        format!("egonet={}", self.level.as_filter_str())
    }
}

impl LogLevel {
    const fn as_filter_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warn" | "warning" | "w" => Ok(Self::Warn),
            "info" | "i" => Ok(Self::Info),
            "debug" | "d" => Ok(Self::Debug),
            "trace" | "t" => Ok(Self::Trace),
            "off" | "none" | "quiet" => Ok(Self::Off),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(Self::Pretty),
            "compact" | "c" => Ok(Self::Compact),
            "full" | "f" => Ok(Self::Full),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LogConfig) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.default_directive())
    };

    let span_events = if config.spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Full, _) => base
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .try_init()
        .ok();
}

/// Silence logging in tests.
pub fn init_test_logging() {
    init_logging(&LogConfig {
        level: LogLevel::Off,
        ..LogConfig::default()
    });
}

/// Logs the start and outcome of one collection phase.
///
/// A guard dropped without [`complete`](Self::complete) or
/// [`fail`](Self::fail) is reported as interrupted.
pub struct OperationGuard {
    name: String,
    task: String,
    start: Instant,
    finished: bool,
}

impl OperationGuard {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        let name = name.into();
        let task = task.into();
        tracing::info!(operation = %name, task = %task, "Starting phase");
        Self {
            name,
            task,
            start: Instant::now(),
            finished: false,
        }
    }

    pub fn complete(mut self) {
        self.finished = true;
        tracing::info!(
            operation = %self.name,
            task = %self.task,
            duration_ms = self.start.elapsed().as_millis(),
            "Phase completed"
        );
    }

    /// Complete or fail the phase according to `result`, passing it through.
    pub fn finish<T, E: std::error::Error>(self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.complete(),
            Err(err) => self.fail(err),
        }
        result
    }

    pub fn fail(mut self, error: &dyn std::error::Error) {
        self.finished = true;
        tracing::error!(
            operation = %self.name,
            task = %self.task,
            duration_ms = self.start.elapsed().as_millis(),
            error = %error,
            "Phase failed"
        );
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                operation = %self.name,
                task = %self.task,
                duration_ms = self.start.elapsed().as_millis(),
                "Phase interrupted"
            );
        }
    }
}

/// Log a progress update for a long-running pass.
#[macro_export]
macro_rules! log_progress {
    ($current:expr, $total:expr, $($arg:tt)*) => {{
        let total = ($total).max(1);
        tracing::info!(
            current = $current,
            total = $total,
            percent = ($current as f64 / total as f64 * 100.0) as u32,
            $($arg)*
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("W".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("none".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("c".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Full);
    }

    #[test]
    fn test_verbosity_presets() {
        assert_eq!(LogConfig::from_verbosity(true, 3).level, LogLevel::Error);
        assert_eq!(LogConfig::from_verbosity(false, 0).level, LogLevel::Info);
        assert_eq!(LogConfig::from_verbosity(false, 1).level, LogLevel::Debug);
        assert_eq!(LogConfig::from_verbosity(false, 2).level, LogLevel::Trace);
    }

    #[test]
    fn test_default_directive_targets_crate() {
        assert_eq!(LogConfig::default().default_directive(), "egonet=info");
        assert_eq!(LogConfig::quiet().default_directive(), "egonet=error");
    }

    #[test]
    fn test_operation_guard_lifecycle() {
        init_test_logging();
        OperationGuard::new("friends", "t1").complete();
        let guard = OperationGuard::new("followers", "t1");
        drop(guard);
    }

    #[test]
    fn test_operation_guard_finish_passes_result_through() {
        init_test_logging();
        let ok: Result<u8, crate::error::ApiError> =
            OperationGuard::new("lists", "t1").finish(Ok(3));
        assert_eq!(ok, Ok(3));

        let failed: Result<u8, _> = OperationGuard::new("full graph", "t1")
            .finish(Err(crate::error::ApiError::fatal("bad token")));
        assert!(failed.unwrap_err().is_fatal());
    }

    #[test]
    fn test_log_progress_with_zero_total() {
        init_test_logging();
        log_progress!(0_usize, 0_usize, "nothing to do");
    }
}
