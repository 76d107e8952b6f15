//! FILENAME: app/cli/src/logging.rs
// PURPOSE: Unified logging for the command-line host.
// FORMAT: seq|level|category|message
//
// Library crates log through the `log` facade with the category as target;
// this logger prints every record on stderr (stdout carries the pivoted rows)
// and optionally mirrors it into a log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;

// ============================================================================
// UNIFIED LOGGING SYSTEM
// ============================================================================

/// Global sequence counter
static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Optional log file handle
static LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(None));

static LOGGER: UnifiedLogger = UnifiedLogger;

/// Get next sequence number
pub fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst) + 1
}

pub fn format_line(seq: u64, level: Level, category: &str, message: &str) -> String {
    format!("{}|{}|{}|{}", seq, level, category, message)
}

/// Maps `-v` occurrences onto a level: warnings by default, then info,
/// debug and trace.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

struct UnifiedLogger;

impl Log for UnifiedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            next_seq(),
            record.level(),
            record.target(),
            &record.args().to_string(),
        );
        if let Ok(mut guard) = LOG_FILE.lock() {
            if let Some(ref mut file) = *guard {
                if let Err(e) = writeln!(file, "{}", line) {
                    eprintln!("[LOG_ERROR] Failed to write: {}", e);
                }
            }
        }
        eprintln!("{}", line);
    }

    fn flush(&self) {
        if let Ok(mut guard) = LOG_FILE.lock() {
            if let Some(ref mut file) = *guard {
                let _ = file.flush();
            }
        }
    }
}

/// Installs the logger. Must be called once, before any other logging.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<(), String> {
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| format!("Failed to create log file {:?}: {}", path, e))?;
        let mut guard = LOG_FILE.lock().map_err(|e| format!("Lock error: {}", e))?;
        *guard = Some(file);
    }
    log::set_logger(&LOGGER).map_err(|e| format!("Logger already installed: {}", e))?;
    log::set_max_level(level_for(verbosity));
    Ok(())
}
