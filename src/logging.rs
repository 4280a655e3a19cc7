//! Structured diagnostics for publishers and subscribers
//!
//! Entries carry a level, the emitting component, the run id stamped by
//! [`LoggerFactory`] and any number of typed fields. Listener callbacks run
//! on transport threads, so the logger is synchronous and every entry is
//! written to stderr in one locked write. Stdout carries the report only.

use crate::error::{AppError, Result};
use crate::models::Config;
use chrono::{DateTime, Utc};
use colored::{Color, Colorize};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use uuid::Uuid;

/// Severity of a log entry, ordered from most to least chatty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Protocol anomalies, unacknowledged control messages
    Warn,
    /// Report writes or transport sends that failed
    Error,
    /// Threshold only: nothing is written
    Off,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    fn color(self) -> Color {
        match self {
            LogLevel::Trace => Color::White,
            LogLevel::Debug => Color::Cyan,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error | LogLevel::Off => Color::Red,
        }
    }

    /// Threshold implied by the verbosity flags when no level is configured
    pub fn from_verbosity(verbose: bool, debug: bool) -> Self {
        match (debug, verbose) {
            (true, _) => LogLevel::Debug,
            (false, true) => LogLevel::Info,
            (false, false) => LogLevel::Warn,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" => Ok(LogLevel::Off),
            other => Err(AppError::parse(format!(
                "Invalid log level '{}' (expected trace, debug, info, warn, error or off)",
                other
            ))),
        }
    }
}

/// How entries are rendered on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One aligned human-readable line
    Console,
    /// One JSON object per line
    Json,
}

/// A single rendered diagnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Emitting component, e.g. `subscriber-1-throughput`
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

/// Values shared by a logger and every logger derived from it
#[derive(Debug, Default)]
struct Scope {
    run_id: Option<String>,
    fields: BTreeMap<String, Value>,
}

/// Cheap to clone. Clones and [`Logger::named`] children share one scope.
#[derive(Clone)]
pub struct Logger {
    component: String,
    threshold: LogLevel,
    format: LogFormat,
    use_color: bool,
    scope: Arc<RwLock<Scope>>,
}

impl Logger {
    pub fn new(component: &str, threshold: LogLevel, format: LogFormat, use_color: bool) -> Self {
        Self {
            component: component.to_string(),
            threshold,
            format,
            use_color,
            scope: Arc::new(RwLock::new(Scope::default())),
        }
    }

    /// Logger configured from the run settings.
    ///
    /// `debug` switches to JSON lines; `log_level` beats the verbosity flags.
    pub fn with_config(component: &str, config: &Config) -> Self {
        let threshold = config
            .log_level
            .unwrap_or_else(|| LogLevel::from_verbosity(config.verbose, config.debug));
        let format = if config.debug { LogFormat::Json } else { LogFormat::Console };
        Self::new(component, threshold, format, config.enable_color)
    }

    /// A logger that writes nothing, for tests and embedded listeners
    pub fn disabled(component: &str) -> Self {
        Self::new(component, LogLevel::Off, LogFormat::Console, false)
    }

    /// Child logger for a sub-component sharing this logger's scope
    pub fn named(&self, component: &str) -> Self {
        Self {
            component: component.to_string(),
            ..self.clone()
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level >= self.threshold
    }

    fn set_run_id(&self, run_id: &str) {
        self.scope.write().run_id = Some(run_id.to_string());
    }

    /// Attach `key` to every later entry of this logger and its children
    pub fn scope<T: Serialize>(&self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.scope.write().fields.insert(key.to_string(), value);
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) -> EntryBuilder<'_> {
        EntryBuilder {
            logger: self,
            level,
            message: message.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn debug(&self, message: &str) -> EntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> EntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> EntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> EntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    fn entry(&self, level: LogLevel, message: String, mut fields: BTreeMap<String, Value>) -> LogEntry {
        let scope = self.scope.read();
        for (key, value) in &scope.fields {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        LogEntry {
            timestamp: Utc::now(),
            level,
            component: self.component.clone(),
            message,
            run_id: scope.run_id.clone(),
            fields,
        }
    }

    fn render(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Json => serde_json::to_string(entry)
                .unwrap_or_else(|e| format!("{{\"level\":\"error\",\"message\":\"unserializable entry: {}\"}}", e)),
            LogFormat::Console => {
                let level = format!("{:>5}", entry.level.label());
                let level = if self.use_color {
                    level.color(entry.level.color()).to_string()
                } else {
                    level
                };
                let mut line = format!(
                    "{} {} [{}] {}",
                    entry.timestamp.format("%H:%M:%S%.3f"),
                    level,
                    entry.component,
                    entry.message
                );
                if !entry.fields.is_empty() {
                    let fields: Vec<String> = entry.fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    line.push_str(&format!(" {{{}}}", fields.join(" ")));
                }
                line
            }
        }
    }
}

/// Collects fields for one entry; nothing is written until [`EntryBuilder::log`]
pub struct EntryBuilder<'a> {
    logger: &'a Logger,
    level: LogLevel,
    message: String,
    fields: BTreeMap<String, Value>,
}

impl EntryBuilder<'_> {
    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    /// Record the category and exit code of a failure
    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error", error.to_string())
            .field("category", error.category())
            .field("recoverable", error.is_recoverable())
    }

    pub fn log(self) {
        if !self.logger.enabled(self.level) {
            return;
        }
        let entry = self.logger.entry(self.level, self.message, self.fields);
        let line = self.logger.render(&entry);
        // One locked write per entry so listener threads never interleave
        let _ = writeln!(io::stderr().lock(), "{}", line);
    }
}

/// Hands out loggers that share one run id
pub struct LoggerFactory {
    config: Config,
    run_id: String,
}

impl LoggerFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn create_logger(&self, component: &str) -> Logger {
        let logger = Logger::with_config(component, &self.config);
        logger.set_run_id(&self.run_id);
        logger
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn plain(component: &str, threshold: LogLevel) -> Logger {
        Logger::new(component, threshold, LogFormat::Console, false)
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str(" warning ").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("none").unwrap(), LogLevel::Off);

        let err = LogLevel::from_str("loud").unwrap_err();
        assert_eq!(err.category(), "PARSE");
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_threshold_from_config() {
        let quiet = Logger::with_config("app", &Config::default());
        assert_eq!(quiet.threshold, LogLevel::Warn);
        assert_eq!(quiet.format, LogFormat::Console);

        let config = Config {
            debug: true,
            enable_color: false,
            ..Default::default()
        };
        let debug = Logger::with_config("app", &config);
        assert_eq!(debug.threshold, LogLevel::Debug);
        assert_eq!(debug.format, LogFormat::Json);
        assert!(!debug.use_color);

        let config = Config {
            verbose: true,
            log_level: Some(LogLevel::Error),
            ..Default::default()
        };
        assert_eq!(Logger::with_config("app", &config).threshold, LogLevel::Error);
    }

    #[test]
    fn test_enabled() {
        let logger = plain("sub", LogLevel::Warn);
        assert!(!logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::Warn));
        assert!(logger.enabled(LogLevel::Error));
        assert!(!logger.enabled(LogLevel::Off));

        let off = Logger::disabled("sub");
        assert!(!off.enabled(LogLevel::Error));
        off.error("dropped").field("origin", 9).log();
    }

    #[test]
    fn test_children_share_scope() {
        let factory = LoggerFactory::new(Config::default());
        let publisher = factory.create_logger("publisher-0");
        let latency = publisher.named("latency");
        publisher.scope("data_len", 1024);

        assert_eq!(latency.component(), "latency");
        let entry = latency.entry(LogLevel::Info, "summary".into(), BTreeMap::new());
        assert_eq!(entry.run_id.as_deref(), Some(factory.run_id()));
        assert_eq!(entry.fields["data_len"], serde_json::json!(1024));
    }

    #[test]
    fn test_entry_fields_win_over_scope() {
        let logger = plain("pub", LogLevel::Trace);
        logger.scope("data_len", 100);
        let mut fields = BTreeMap::new();
        fields.insert("data_len".to_string(), serde_json::json!(200));
        let entry = logger.entry(LogLevel::Debug, "resize".into(), fields);
        assert_eq!(entry.fields["data_len"], serde_json::json!(200));
    }

    #[test]
    fn test_console_rendering() {
        let logger = plain("subscriber-0", LogLevel::Trace);
        let builder = logger
            .warn("origin out of range")
            .field("origin", 7)
            .error_info(&AppError::protocol("bad origin"));
        let entry = logger.entry(builder.level, builder.message, builder.fields);
        let line = logger.render(&entry);

        assert!(line.contains(" WARN [subscriber-0] origin out of range"));
        assert!(line.contains("category=\"PROTOCOL\""));
        assert!(line.contains("origin=7"));
        assert!(line.contains("recoverable=true"));
    }

    #[test]
    fn test_json_rendering() {
        let logger = Logger::new("publisher-0", LogLevel::Trace, LogFormat::Json, false);
        let entry = logger.entry(LogLevel::Info, "Publisher finished".into(), BTreeMap::new());
        let parsed: Value = serde_json::from_str(&logger.render(&entry)).unwrap();

        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["component"], "publisher-0");
        assert!(parsed.get("fields").is_none());
        assert!(parsed.get("run_id").is_none());

        let back: LogEntry = serde_json::from_value(parsed).unwrap();
        assert_eq!(back.level, LogLevel::Info);
    }
}
