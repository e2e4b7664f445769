//! Session log for capture runs.
//!
//! One file per run, truncated when the logger is initialised:
//!   Windows:  `%APPDATA%\PixelTap\pixeltap.log`
//!   Linux:    `~/.local/share/PixelTap/pixeltap.log`
//!   macOS:    `~/Library/Application Support/PixelTap/pixeltap.log`
//! or wherever `--log` points.
//!
//! `log_info!` / `log_warn!` / `log_err!` write plain lines.  `log_frame!`
//! tags a line with the capture it concerns (`[#12 slot 1]`), so a failed or
//! cold map can be traced back to the buffer that produced it.
//!
//! Nothing is written before `init()`; library users and unit tests stay
//! silent.  `set_echo(true)` mirrors every line to stderr.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static ECHO: AtomicBool = AtomicBool::new(false);

/// Which capture, and which transfer buffer, a log line is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTag {
    pub sequence: u64,
    pub slot: usize,
}

pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

pub fn set_echo(on: bool) {
    ECHO.store(on, Ordering::Relaxed);
}

/// Append one raw line.  I/O errors are dropped.
pub fn write_line(line: &str) {
    if ECHO.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// `[HH:MM:SS] [LEVEL] [#seq slot n] message`, the tag only when given.
pub fn format_line(timestamp: &str, level: &str, tag: Option<FrameTag>, msg: &str) -> String {
    match tag {
        Some(t) => format!("[{}] [{}] [#{} slot {}] {}", timestamp, level, t.sequence, t.slot, msg),
        None => format!("[{}] [{}] {}", timestamp, level, msg),
    }
}

pub fn write(level: &str, msg: &str) {
    write_line(&format_line(&timestamp(), level, None, msg));
}

pub fn write_tagged(level: &str, tag: FrameTag, msg: &str) {
    write_line(&format_line(&timestamp(), level, Some(tag), msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*))
    };
}

/// `log_frame!(WARN, sequence, slot, "fmt", args...)`
#[macro_export]
macro_rules! log_frame {
    ($level:ident, $sequence:expr, $slot:expr, $($arg:tt)*) => {
        $crate::logger::write_tagged(
            stringify!($level),
            $crate::logger::FrameTag {
                sequence: $sequence,
                slot: $slot,
            },
            &format!($($arg)*),
        )
    };
}

pub fn init() {
    init_at(&default_log_path());
}

/// Open (truncate) the log at `path` and route panics into it.  Later calls
/// are ignored.
pub fn init_at(path: &Path) {
    if LOG_FILE.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let _ = LOG_PATH.set(path.to_path_buf());
    let _ = LOG_FILE.set(Mutex::new(file));

    write_line(&format!("=== PixelTap capture session {} ===", unix_seconds()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format_line(&timestamp(), "PANIC", None, &info.to_string()));
        prev(info);
    }));
}

fn default_log_path() -> PathBuf {
    data_dir().join("PixelTap").join("pixeltap.log")
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS (UTC).
fn timestamp() -> String {
    let secs = unix_seconds();
    format!("{:02}:{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60, secs % 60)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
