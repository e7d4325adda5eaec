//! Per-run log file
//!
//! One append-only UTF-8 file per run, named `log_YYYYMMDD_HHMMSS.txt`,
//! every line terminated by LF. The engine is single-threaded, so writes
//! are naturally serialized; the mutex only satisfies the type system.
//!
//! Two sink variants: `Plain` writes lines verbatim, `Structured` prefixes
//! each line with a local timestamp. `--no-logs` produces a disabled sink
//! that swallows everything.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::warn;

/// Line formatting variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    /// Lines exactly as given
    Plain,
    /// Lines prefixed with `YYYY-MM-DD HH:MM:SS`
    Structured,
}

/// Run-log sink consumed by the engine
#[derive(Debug)]
pub struct RunLog {
    writer: Option<Mutex<BufWriter<File>>>,
    style: LogStyle,
    path: Option<PathBuf>,
}

impl RunLog {
    /// Create the per-run log file inside `dir`
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be created.
    pub fn create_in(dir: &Path, style: LogStyle) -> io::Result<Self> {
        let name = Local::now().format("log_%Y%m%d_%H%M%S.txt").to_string();
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            writer: Some(Mutex::new(BufWriter::new(file))),
            style,
            path: Some(path),
        })
    }

    /// Sink that discards every line (`--no-logs`)
    pub fn disabled() -> Self {
        Self {
            writer: None,
            style: LogStyle::Plain,
            path: None,
        }
    }

    /// Path of the log file, if one was created
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one line, LF-terminated, flushed immediately
    ///
    /// Failures are reported on the diagnostic channel and otherwise
    /// ignored; a broken log file must not stop a migration.
    pub fn line(&self, text: &str) {
        let Some(writer) = &self.writer else {
            return;
        };
        let rendered = match self.style {
            LogStyle::Plain => format!("{text}\n"),
            LogStyle::Structured => {
                format!("{} {text}\n", Local::now().format("%Y-%m-%d %H:%M:%S"))
            }
        };
        match writer.lock() {
            Ok(mut guard) => {
                if guard
                    .write_all(rendered.as_bytes())
                    .and_then(|()| guard.flush())
                    .is_err()
                {
                    warn!("failed to write run log line");
                }
            }
            Err(_) => warn!("run log writer poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{LogStyle, RunLog};

    #[test]
    fn plain_lines_end_with_lf_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = RunLog::create_in(dir.path(), LogStyle::Plain).expect("create log");
        log.line("first");
        log.line("second");

        let content = fs::read_to_string(log.path().expect("path")).expect("read back");
        assert_eq!(content, "first\nsecond\n");
        assert!(!content.contains('\r'));
    }

    #[test]
    fn structured_lines_carry_a_timestamp_prefix() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = RunLog::create_in(dir.path(), LogStyle::Structured).expect("create log");
        log.line("event");

        let content = fs::read_to_string(log.path().expect("path")).expect("read back");
        let line = content.lines().next().expect("one line");
        // "YYYY-MM-DD HH:MM:SS event"
        assert!(line.ends_with(" event"));
        assert_eq!(line.split(' ').count(), 3);
    }

    #[test]
    fn file_name_follows_the_run_pattern() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = RunLog::create_in(dir.path(), LogStyle::Plain).expect("create log");
        let name = log
            .path()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .expect("file name");
        assert!(name.starts_with("log_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(name.len(), "log_YYYYMMDD_HHMMSS.txt".len());
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let log = RunLog::disabled();
        log.line("dropped");
        assert!(log.path().is_none());
    }
}
