//! Timestamped logging for the runner.
//!
//! Every line is shaped like:
//!     <timestamp> [TAG][thread] message
//!
//! stderr is the canonical sink. An optional append-only file sink mirrors it, and child
//! process output (ffmpeg) can be piped into the same format.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use time::OffsetDateTime;

static LOG_FILE: OnceLock<Mutex<Option<std::fs::File>>> = OnceLock::new();
static RUN_ID: OnceLock<String> = OnceLock::new();

const LINE_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]";

/// Initialize logging. Call once at startup; returns the run id.
pub fn init(log_file: Option<PathBuf>) -> String {
    let rid = RUN_ID
        .get_or_init(|| {
            // Short correlation id: time xor pid
            let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() as u64;
            format!("{:08x}", nanos ^ std::process::id() as u64)
        })
        .clone();

    let sink = LOG_FILE.get_or_init(|| Mutex::new(None));

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => {
                if let Ok(mut guard) = sink.lock() {
                    *guard = Some(f);
                }
            }
            Err(e) => {
                // The macros would try the sink we just failed to open.
                eprintln!(
                    "{} [WARN][{}] failed to open log file {}: {e}",
                    log_timestamp(),
                    log_thread_name(),
                    path.display()
                );
            }
        }
    }

    rid
}

pub fn run_id() -> &'static str {
    RUN_ID.get().map(|s| s.as_str()).unwrap_or("")
}

/// Pipe a child stream into the logger on its own thread.
pub fn spawn_pipe_thread<R: Read + Send + 'static>(thread_name: &str, tag: &str, reader: R, as_warn: bool) {
    let tag = tag.to_string();
    let _ = std::thread::Builder::new().name(thread_name.to_string()).spawn(move || {
        let level = if as_warn { "WARN" } else { "INFO" };
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            log_line(level, &tag, &line);
        }
    });
}

/// Local time when available, UTC otherwise.
pub fn log_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let Ok(fmt) = time::format_description::parse(LINE_FORMAT) else {
        return "<time-format-error>".to_string();
    };
    now.format(&fmt).unwrap_or_else(|_| "<time-format-error>".to_string())
}

pub fn log_thread_name() -> String {
    std::thread::current().name().unwrap_or("main").to_string()
}

/// Write one formatted line to stderr and the file sink.
pub fn log_line(_level: &str, tag: &str, msg: &str) {
    let line = format!("{} [{}][{}] {}", log_timestamp(), tag, log_thread_name(), msg);

    eprintln!("{line}");

    if let Some(m) = LOG_FILE.get() {
        if let Ok(mut guard) = m.lock() {
            if let Some(f) = guard.as_mut() {
                let _ = writeln!(f, "{line}");
                let _ = f.flush();
            }
        }
    }
}

#[macro_export]
macro_rules! logi {
    ($tag:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::logging::log_line("INFO", $tag, &msg);
    }};
}

#[macro_export]
macro_rules! logw {
    ($tag:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::logging::log_line("WARN", $tag, &msg);
    }};
}

#[macro_export]
macro_rules! loge {
    ($tag:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::logging::log_line("ERROR", $tag, &msg);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = log_timestamp();
        // YYYY-MM-DD HH:MM:SS.mmm
        assert_eq!(ts.len(), 23, "{ts}");
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn run_id_is_stable_after_init() {
        let a = init(None);
        let b = init(None);
        assert_eq!(a, b);
        assert_eq!(run_id(), a);
    }
}
