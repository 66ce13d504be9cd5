use std::{
    fs::{self, OpenOptions},
    io::Write,
    panic,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};

use crate::{DESKTOP_LOG_FILE, DESKTOP_LOG_MAX_BYTES, LOG_BACKUP_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DesktopLogCategory {
    Runtime,
    Startup,
}

impl DesktopLogCategory {
    fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Startup => "startup",
        }
    }
}

static DESKTOP_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DESKTOP_LOG_WRITE_LOCK: Mutex<()> = Mutex::new(());
static DESKTOP_LOGGER: DesktopLogger = DesktopLogger;

struct DesktopLogger;

impl Log for DesktopLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_log_line(
            &Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            record.level().as_str(),
            &record.args().to_string(),
        );
        eprintln!("{line}");

        let Some(path) = DESKTOP_LOG_PATH.get() else {
            return;
        };
        let _guard = DESKTOP_LOG_WRITE_LOCK
            .lock()
            .unwrap_or_else(|error| error.into_inner());
        if let Err(error) = write_log_line(path, &line, DESKTOP_LOG_MAX_BYTES, LOG_BACKUP_COUNT) {
            eprintln!("failed to write {}: {error}", path.display());
        }
    }

    fn flush(&self) {}
}

pub(crate) fn resolve_desktop_log_path(log_dir: &Path, file_name: &str) -> PathBuf {
    log_dir.join(file_name)
}

/// Installs the process logger. Lines go to stderr until a log directory is
/// known; `attach_log_dir` adds the file sink.
pub(crate) fn init_logging() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if log::set_logger(&DESKTOP_LOGGER).is_ok() {
        log::set_max_level(level);
    }
    install_panic_hook();
}

pub(crate) fn attach_log_dir(log_dir: &Path) -> PathBuf {
    let path = resolve_desktop_log_path(log_dir, DESKTOP_LOG_FILE);
    if let Err(error) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log directory {}: {error}", log_dir.display());
    }
    DESKTOP_LOG_PATH.get_or_init(|| path).clone()
}

pub(crate) fn append_desktop_log(category: DesktopLogCategory, message: &str) {
    log::info!("[{}] {message}", category.as_str());
}

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        log::error!("uncaught panic {location}: {message}");
        default_hook(info);
    }));
}

fn format_log_line(timestamp: &str, level: &str, message: &str) -> String {
    format!("[{timestamp}] [{level}] {message}")
}

fn write_log_line(
    path: &Path,
    line: &str,
    max_bytes: u64,
    backup_count: usize,
) -> std::io::Result<()> {
    if fs::metadata(path).is_ok_and(|metadata| metadata.len() >= max_bytes) {
        rotate_log_files(path, backup_count)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn rotate_log_files(path: &Path, backup_count: usize) -> std::io::Result<()> {
    if backup_count == 0 {
        return fs::remove_file(path);
    }

    let oldest = backup_path(path, backup_count);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for index in (1..backup_count).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            fs::rename(&from, backup_path(path, index + 1))?;
        }
    }
    fs::rename(path, backup_path(path, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_log_line_has_timestamp_and_level() {
        assert_eq!(
            format_log_line("2024-01-01 00:00:00.000", "INFO", "[server] ready"),
            "[2024-01-01 00:00:00.000] [INFO] [server] ready"
        );
    }

    #[test]
    fn write_log_line_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = resolve_desktop_log_path(dir.path(), DESKTOP_LOG_FILE);

        write_log_line(&path, "first", 1024, 2).expect("write first");
        write_log_line(&path, "second", 1024, 2).expect("write second");

        assert_eq!(fs::read_to_string(&path).expect("read"), "first\nsecond\n");
    }

    #[test]
    fn write_log_line_rotates_when_file_is_full() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("desktop.log");

        write_log_line(&path, "one", 4, 2).expect("write one");
        write_log_line(&path, "two", 4, 2).expect("write two");
        write_log_line(&path, "three", 4, 2).expect("write three");

        assert_eq!(fs::read_to_string(&path).expect("current"), "three\n");
        assert_eq!(
            fs::read_to_string(backup_path(&path, 1)).expect("backup 1"),
            "two\n"
        );
        assert_eq!(
            fs::read_to_string(backup_path(&path, 2)).expect("backup 2"),
            "one\n"
        );
    }

    #[test]
    fn rotate_log_files_drops_oldest_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("desktop.log");
        fs::write(&path, "current").expect("current");
        fs::write(backup_path(&path, 1), "older").expect("backup");

        rotate_log_files(&path, 1).expect("rotate");

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(backup_path(&path, 1)).expect("backup"),
            "current"
        );
    }
}
