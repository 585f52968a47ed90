// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use slog::Drain;

/// Builds the global logger: async formatting, level-filtered, with the
/// crate version attached to every record. Returns the guard that must be kept
/// alive for the duration of the process -- dropping it tears down the async
/// worker and the `log` crate bridge.
pub struct LoggingGuard {
    _scope_guard: slog_scope::GlobalLoggerGuard,
}

/// Global handle to the file currently backing the logger, if any, so
/// `reopen()` can find it without threading a handle through every caller.
/// Never set when logging to the terminal.
static LOG_FILE: OnceLock<ReopenableFile> = OnceLock::new();

struct ReopenableFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReopenableFile {
    fn open(path: PathBuf) -> io::Result<ReopenableFile> {
        let file = open_append(&path)?;
        Ok(ReopenableFile { path, file: Mutex::new(file) })
    }

    /// Closes the current descriptor and reopens the same path, picking up a
    /// file a log rotator has since renamed out from under the old handle.
    fn reopen(&self) -> io::Result<()> {
        let mut guard = self.file.lock().expect("log file mutex poisoned");
        *guard = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &std::path::Path) -> io::Result<File> { OpenOptions::new().create(true).append(true).open(path) }

/// A `Write` handle over the process-wide reopenable log file, cheap to clone
/// since it only holds a reference into `LOG_FILE`.
#[derive(Clone, Copy)]
struct LogFileWriter;

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let handle = LOG_FILE.get().expect("LogFileWriter used before LOG_FILE is set");
        handle.file.lock().expect("log file mutex poisoned").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let handle = LOG_FILE.get().expect("LogFileWriter used before LOG_FILE is set");
        handle.file.lock().expect("log file mutex poisoned").flush()
    }
}

/// `log_file` mirrors the original's `main.LogFile`: when set, log records go
/// to that file (reopenable on SIGHUP/SIGUSR1 for logrotate-style rotation)
/// instead of the terminal.
pub fn init(level: &str, log_file: Option<&str>) -> LoggingGuard {
    let level = level_from_str(level);

    let logger = match log_file {
        Some(path) => {
            let handle = ReopenableFile::open(PathBuf::from(path)).expect("failed to open log file");
            LOG_FILE.set(handle).ok().expect("logging::init called more than once");
            let decorator = slog_term::PlainDecorator::new(LogFileWriter);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(slog::LevelFilter::new(drain, level).fuse(), slog::o!("version" => env!("CARGO_PKG_VERSION")))
        },
        None => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(slog::LevelFilter::new(drain, level).fuse(), slog::o!("version" => env!("CARGO_PKG_VERSION")))
        },
    };

    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().expect("failed to initialize log bridge");
    log::info!("[core] logging configured");

    LoggingGuard { _scope_guard: scope_guard }
}

/// Re-opens the log file, if logging to one. Wired to SIGHUP/SIGUSR1 by the
/// signal thread; a no-op when logging to the terminal.
pub fn reopen() {
    match LOG_FILE.get() {
        Some(handle) => match handle.reopen() {
            Ok(()) => log::info!("[core] log file reopened"),
            Err(e) => log::error!("[core] failed to reopen log file: {}", e),
        },
        None => log::info!("[core] log reopen requested (logging to terminal, nothing to do)"),
    }
}

fn level_from_str(level: &str) -> slog::Level {
    match level.to_lowercase().as_str() {
        "critical" => slog::Level::Critical,
        "error" => slog::Level::Error,
        "warning" | "warn" => slog::Level::Warning,
        "info" => slog::Level::Info,
        "debug" => slog::Level::Debug,
        "trace" => slog::Level::Trace,
        _ => slog::Level::Info,
    }
}
