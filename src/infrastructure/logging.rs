//! Daily-rolling file writer for structured logs (spec.md §6 "Persisted state layout").
//!
//! Grounded on the teacher's `ChannelWriterFactory` in `main.rs` (a cloneable
//! `tracing_subscriber::fmt::MakeWriter` wrapping a channel sender); this implementation
//! swaps the channel sink for a file sink that rotates on UTC day change, since this
//! engine has no UI to stream log lines to.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

struct RollingState {
    day: String,
    file: File,
}

/// Cloneable `MakeWriter` that reopens a new file named `<prefix>.<YYYY-MM-DD>.log`
/// whenever the UTC date changes.
#[derive(Clone)]
pub struct RollingFileWriter {
    directory: PathBuf,
    prefix: String,
    state: std::sync::Arc<Mutex<RollingState>>,
}

impl RollingFileWriter {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> io::Result<Self> {
        let directory = directory.into();
        let prefix = prefix.into();
        std::fs::create_dir_all(&directory)?;
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let file = open_for_day(&directory, &prefix, &day)?;
        Ok(Self { directory, prefix, state: std::sync::Arc::new(Mutex::new(RollingState { day, file })) })
    }
}

fn open_for_day(directory: &PathBuf, prefix: &str, day: &str) -> io::Result<File> {
    let path = directory.join(format!("{prefix}.{day}.log"));
    OpenOptions::new().create(true).append(true).open(path)
}

pub struct RollingFileGuard {
    directory: PathBuf,
    prefix: String,
    state: std::sync::Arc<Mutex<RollingState>>,
}

impl io::Write for RollingFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut state = self.state.lock().expect("rolling log mutex poisoned");
        if state.day != today {
            state.file = open_for_day(&self.directory, &self.prefix, &today)?;
            state.day = today;
        }
        state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().expect("rolling log mutex poisoned");
        state.file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RollingFileWriter {
    type Writer = RollingFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RollingFileGuard { directory: self.directory.clone(), prefix: self.prefix.clone(), state: self.state.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writes_land_in_todays_file() {
        let dir = std::env::temp_dir().join(format!("fundarb-log-test-{}", std::process::id()));
        let writer = RollingFileWriter::new(&dir, "engine").unwrap();
        let mut guard = writer.make_writer();
        guard.write_all(b"hello\n").unwrap();
        guard.flush().unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let contents = std::fs::read_to_string(dir.join(format!("engine.{today}.log"))).unwrap();
        assert!(contents.contains("hello"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
