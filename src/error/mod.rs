//! Errors of the perftest harness
//!
//! Measurement code never fails on protocol anomalies, clock skew or a full
//! latency history; listeners log and count those. `AppError` covers what
//! can actually stop a run: configuration, transport set-up, the run
//! deadline and report I/O.

use colored::Colorize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad option, environment variable or .env entry
    #[error("Configuration error: {0}")]
    Config(String),

    /// A writer or reader could not be created, or its peer went away
    #[error("Transport error: {0}")]
    Transport(String),

    /// A message that no peer of this harness would send
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Discovery, acknowledgment or the whole run exceeded its deadline
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Report sink or .env file I/O
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Short tag used in log fields and console output
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Transport(_) => "TRANSPORT",
            Self::Protocol(_) => "PROTOCOL",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) => "IO",
            Self::Parse(_) => "PARSE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a listener may log this and keep measuring
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Protocol(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Parse(_) => 1,
            Self::Transport(_) => 2,
            Self::Timeout(_) => 3,
            Self::Protocol(_) => 4,
            Self::Io(_) => 5,
            Self::Internal(_) => 99,
        }
    }

    /// Troubleshooting lines printed under the error by the binary
    pub fn hints(&self) -> &'static [&'static str] {
        match self {
            Self::Config(_) | Self::Parse(_) => &[
                "Run with --env-help to list the PERFTEST_* variables",
                "Data lengths include the 28-byte overhead and must be at least 32",
                "--scan runs with a single publisher",
                "Use --check-config to validate without running",
            ],
            Self::Timeout(_) => &[
                "Increase the run limit with --timeout",
                "Reduce --num-iter or the number of scanned lengths",
                "Make sure --num-subscribers matches the subscribers started",
            ],
            Self::Transport(_) => &[
                "Check that every publisher and subscriber was created",
                "Retry with --use-read-thread to rule out callback delivery",
            ],
            Self::Io(_) => &["Check that stdout is writable and not closed early by a pipe"],
            Self::Protocol(_) | Self::Internal(_) => &[],
        }
    }

    /// Same variant, message prefixed with `context`
    fn in_context(self, context: &str) -> Self {
        let wrap = |message: String| format!("{}: {}", context, message);
        match self {
            Self::Config(m) => Self::Config(wrap(m)),
            Self::Transport(m) => Self::Transport(wrap(m)),
            Self::Protocol(m) => Self::Protocol(wrap(m)),
            Self::Timeout(m) => Self::Timeout(wrap(m)),
            Self::Io(m) => Self::Io(wrap(m)),
            Self::Parse(m) => Self::Parse(wrap(m)),
            Self::Internal(m) => Self::Internal(wrap(m)),
        }
    }

    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();
        if !use_color {
            return format!("[{}] {}", category, message);
        }
        match self {
            Self::Config(_) | Self::Parse(_) => format!("[{}] {}", category.red().bold(), message.red()),
            Self::Transport(_) | Self::Protocol(_) => {
                format!("[{}] {}", category.yellow().bold(), message.yellow())
            }
            Self::Timeout(_) => format!("[{}] {}", category.blue().bold(), message.blue()),
            Self::Io(_) => format!("[{}] {}", category.cyan().bold(), message.cyan()),
            Self::Internal(_) => format!("[{}] {}", category.bright_red().bold(), message.bright_red()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {}", error))
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::parse(format!("Integer parse error: {}", error))
    }
}

impl From<std::num::ParseFloatError> for AppError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::parse(format!("Float parse error: {}", error))
    }
}

impl From<std::str::ParseBoolError> for AppError {
    fn from(error: std::str::ParseBoolError) -> Self {
        Self::parse(format!("Boolean parse error: {}", error))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::internal(format!("Endpoint task failed: {}", error))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", error))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Prefix an error with what was being attempted, keeping its category
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    fn context(self, message: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().in_context(&f()))
    }

    fn context(self, message: &'static str) -> Result<T> {
        self.with_context(|| message.to_string())
    }
}

/// Prints a failed run's error to stderr for the binary
pub struct ErrorReporter {
    pub use_color: bool,
    pub verbose: bool,
}

impl ErrorReporter {
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    pub fn render(&self, error: &AppError) -> String {
        let mut text = error.format_for_console(self.use_color);
        let hints = error.hints();
        if !hints.is_empty() {
            text.push_str("\n\nTroubleshooting:");
            for hint in hints {
                text.push_str("\n  - ");
                text.push_str(hint);
            }
        }
        if self.verbose && error.is_recoverable() {
            let note = "A listener recovers from this error; the run stopped at the caller.";
            text.push_str("\n\n");
            text.push_str(&if self.use_color { note.green().to_string() } else { note.to_string() });
        }
        text
    }

    pub fn report_error(&self, error: &AppError) {
        eprintln!("{}", self.render(error));
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}
