//! Session logger: the `log` backend for the binary.
//!
//! Every record is written to a single file in the OS data directory. The
//! file is **truncated at each launch**, so it only ever holds the most
//! recent session. Warnings and errors are mirrored to stderr (everything
//! is, with `--verbose`).
//!
//! Log location:
//!   Windows:  `%APPDATA%\rasterstack\rasterstack.log`
//!   Linux:    `~/.local/share/rasterstack/rasterstack.log`
//!   macOS:    `~/Library/Application Support/rasterstack/rasterstack.log`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    level: LevelFilter,
    stderr_level: LevelFilter,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(&timestamp(), record.level(), &record.args().to_string());
        write_line(&line);
        if record.level() <= self.stderr_level {
            eprintln!("{}", line);
        }
    }

    fn flush(&self) {
        if let Some(mutex) = LOG_FILE.get()
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Write a line to the session log.  Silently ignores I/O errors so that
/// logging never crashes the application.
fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

fn format_line(ts: &str, level: Level, msg: &str) -> String {
    format!("[{}] [{}] {}", ts, level, msg)
}

/// Install the session logger. Safe to call more than once; only the first
/// call takes effect. `verbose` lowers the level to debug and mirrors every
/// record to stderr.
///
/// Records go to stderr only until [`open_session_file`] is called, so the
/// logger can be up before the settings that decide on the file are read.
pub fn init(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let stderr_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    let logger = LOGGER.get_or_init(|| SessionLogger { level, stderr_level });
    if log::set_logger(logger).is_err() {
        return;
    }
    log::set_max_level(logger.level);
}

/// Create (or truncate) the session log file and install a panic hook that
/// records panics in it. Only the first call opens a file.
pub fn open_session_file() {
    if LOG_FILE.get().is_none() {
        open_log_file(log_file_path());
    }
}

fn open_log_file(path: PathBuf) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    // Truncate any previous session's content
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path);

    match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            let _ = LOG_FILE.set(Mutex::new(f));
        }
        Err(e) => {
            // Not fatal: stderr mirroring still works
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    }

    write_line(&format!("=== rasterstack session started {} ===", human_timestamp()));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    crate::settings::app_data_dir().join("rasterstack.log")
}

/// HH:MM:SS (UTC) within the current day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => clock(d.as_secs()),
        Err(_) => "??:??:??".to_string(),
    }
}

fn clock(secs: u64) -> String {
    let h = (secs % 86400) / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Human-readable date-time for the session header.
fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
