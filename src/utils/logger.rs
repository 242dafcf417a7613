/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use flexi_logger::{
    colored_opt_format, writers::LogWriter, Age, Cleanup, Criterion, DeferredNow, FileSpec,
    FlexiLoggerError, Level, Logger, LoggerHandle, Naming, Record,
};

use crate::config::LogConfig;

#[derive(Default)]
struct Counter {
    error: AtomicU64,
    warning: AtomicU64,
}

// A writer calculating log count by level without actually writing log
pub struct LogLevelWriter(Arc<Counter>);

impl LogLevelWriter {
    pub fn new() -> (Self, LogLevelCounter) {
        let c = Arc::new(Counter::default());
        (Self(c.clone()), LogLevelCounter(Arc::downgrade(&c)))
    }
}

impl LogWriter for LogLevelWriter {
    fn write(&self, _: &mut DeferredNow, record: &Record<'_>) -> io::Result<()> {
        match record.level() {
            Level::Error => &self.0.error,
            Level::Warn => &self.0.warning,
            _ => return Ok(()),
        }
        .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Error and warning counts since the last call, reported with the flow
/// counters.
pub struct LogLevelCounter(Weak<Counter>);

impl LogLevelCounter {
    pub fn get_counters(&self) -> Vec<(&'static str, u64)> {
        match self.0.upgrade() {
            Some(counters) => vec![
                ("error", counters.error.swap(0, Ordering::Relaxed)),
                ("warning", counters.warning.swap(0, Ordering::Relaxed)),
            ],
            None => vec![],
        }
    }

    pub fn closed(&self) -> bool {
        self.0.strong_count() == 0
    }
}

pub struct LogWriterAdapter(Vec<Box<dyn LogWriter>>);

impl LogWriterAdapter {
    pub fn new(writers: Vec<Box<dyn LogWriter>>) -> Self {
        Self(writers)
    }
}

impl LogWriter for LogWriterAdapter {
    fn write(&self, now: &mut DeferredNow, record: &Record<'_>) -> io::Result<()> {
        self.0
            .iter()
            .fold(Ok(()), |r, w| r.or(w.write(now, record)))
    }

    fn flush(&self) -> io::Result<()> {
        self.0.iter().fold(Ok(()), |r, w| r.or(w.flush()))
    }
}

fn writable_dir(path: &Path) -> bool {
    if path.exists() {
        path.metadata()
            .ok()
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false)
    } else {
        fs::create_dir_all(path).is_ok()
    }
}

/// Starts the global logger.
///
/// Logs go to `log_file`, rotated daily, when its folder is writable and to
/// stderr otherwise. `duplicate_to_stderr` copies every line to stderr as well.
pub fn init_logger(
    config: &LogConfig,
    duplicate_to_stderr: bool,
) -> Result<(LoggerHandle, LogLevelCounter), FlexiLoggerError> {
    let (log_level_writer, log_level_counter) = LogLevelWriter::new();
    let logger = Logger::try_with_env_or_str(&config.log_level)?.format(colored_opt_format);
    let write_to_file = Path::new(&config.log_file)
        .parent()
        .map(writable_dir)
        .unwrap_or(false);
    let logger = if write_to_file {
        logger
            .log_to_file_and_writer(
                FileSpec::try_from(&config.log_file)?,
                Box::new(LogWriterAdapter::new(vec![Box::new(log_level_writer)])),
            )
            .rotate(
                Criterion::Age(Age::Day),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(config.log_retention_days),
            )
            .create_symlink(&config.log_file)
            .append()
    } else {
        eprintln!(
            "Log file path '{}' access denied, logs will not be written to file",
            &config.log_file
        );
        logger
            .log_to_writer(Box::new(LogWriterAdapter::new(vec![Box::new(
                log_level_writer,
            )])))
            .duplicate_to_stderr(flexi_logger::Duplicate::All)
    };
    let logger = if duplicate_to_stderr && write_to_file {
        logger.duplicate_to_stderr(flexi_logger::Duplicate::All)
    } else {
        logger
    };
    Ok((logger.start()?, log_level_counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(writer: &dyn LogWriter, level: Level) {
        let mut now = DeferredNow::new();
        writer
            .write(
                &mut now,
                &Record::builder()
                    .level(level)
                    .args(format_args!("message"))
                    .build(),
            )
            .unwrap();
    }

    #[test]
    fn level_counter() {
        let (writer, counter) = LogLevelWriter::new();
        let adapter = LogWriterAdapter::new(vec![Box::new(writer)]);
        write(&adapter, Level::Error);
        write(&adapter, Level::Warn);
        write(&adapter, Level::Warn);
        write(&adapter, Level::Info);
        assert_eq!(counter.get_counters(), vec![("error", 1), ("warning", 2)]);
        assert_eq!(counter.get_counters(), vec![("error", 0), ("warning", 0)]);
        assert!(!counter.closed());
        drop(adapter);
        assert!(counter.closed());
        assert!(counter.get_counters().is_empty());
    }

    #[test]
    fn log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        assert!(writable_dir(dir.path()));
        assert!(writable_dir(&nested));
        assert!(nested.exists());
    }
}
