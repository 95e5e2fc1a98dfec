use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record as LogRecord};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";
const LOG_TARGET: &str = "ingestor";

pub const DEFAULT_FILE_PATH: &str = "data.csv";
pub const DEFAULT_DB_URL: &str = "sqlite://etl.db";
pub const DEFAULT_TABLE_NAME: &str = "transactions";

/// Run logger: appends `timestamp:LEVEL:message` lines to a log file and
/// mirrors every record to the console.
pub struct RunLogger {
    file: Mutex<File>,
    level: LevelFilter,
}

impl RunLogger {
    /// Logger writing to `path` (opened in append mode) and the console.
    ///
    /// # Errors
    /// Returns error if the log file cannot be opened.
    pub fn with_file(path: &Path, level: LevelFilter) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for RunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &LogRecord) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(mut file) = self.file.lock() {
            // A failed log write must not abort the run.
            let _ = writeln!(
                file,
                "{}:{}:{}",
                Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            );
        }
        println!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Collects log lines in memory instead of writing them anywhere.
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl Log for MemoryLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &LogRecord) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

/// Sends one record to an explicitly supplied logger.
pub fn emit(logger: &dyn Log, level: Level, args: fmt::Arguments<'_>) {
    logger.log(
        &LogRecord::builder()
            .args(args)
            .level(level)
            .target(LOG_TARGET)
            .build(),
    );
}

/// Resolved, immutable configuration for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub file_path: PathBuf,
    pub db_url: String,
    pub table_name: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from(DEFAULT_FILE_PATH),
            db_url: DEFAULT_DB_URL.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub table: String,
    pub rows_written: usize,
}
