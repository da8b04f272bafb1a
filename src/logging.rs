use chrono::Local;
use log::{LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::sync::OnceLock;

static LOGGER: OnceLock<DiagnosticLogger> = OnceLock::new();

/// Receives every log record that passes the level filter.
pub type LogSink = Box<dyn Fn(&LogMessage) + Send + Sync>;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp: String,
}

/// Logger that writes to stderr and forwards records to the embedder.
pub struct DiagnosticLogger {
    level: LevelFilter,
    sink: Option<LogSink>,
}

impl DiagnosticLogger {
    pub fn new(level: LevelFilter, sink: Option<LogSink>) -> Self {
        Self { level, sink }
    }

    /// Installs the global logger. Fails if a logger is already set.
    ///
    /// The installed instance accepts every level; filtering is left to
    /// [`log::max_level`] so a later [`init`] can change it.
    pub fn init(level: LevelFilter, sink: Option<LogSink>) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| DiagnosticLogger::new(LevelFilter::Trace, sink));
        log::set_logger(logger).map(|()| log::set_max_level(level))
    }

    fn emit_log(&self, record: &Record) {
        if let Some(sink) = &self.sink {
            let log_message = LogMessage {
                level: record.level().to_string(),
                target: record.target().to_string(),
                message: record.args().to_string(),
                timestamp: Local::now().to_rfc3339(),
            };
            sink(&log_message);
        }
    }
}

impl log::Log for DiagnosticLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

/// Installs [`DiagnosticLogger`], falling back to `env_logger` when that fails.
/// Calling it again only changes the level; the first sink stays in place.
pub fn init(level: LevelFilter, sink: Option<LogSink>) {
    if DiagnosticLogger::init(level, sink).is_err() {
        let _ = env_logger::builder().filter_level(level).try_init();
    }
    log::set_max_level(level);
    log::info!("Logging initialized at {}", level);
}
