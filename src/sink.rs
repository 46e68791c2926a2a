//! Append-only results log: one `<name>,<requestId>` line per completed
//! scenario.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Destination for result lines.
///
/// Each appended line must be durable once `append` returns. `close` is
/// idempotent; appending after close is an error.
pub trait ResultSink: Send {
    fn append(&mut self, line: &str) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// Results log on disk. The file is truncated on creation.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        debug!("Opened results log {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for FileSink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "results log is closed")
        })?;
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("Closed results log {}", self.path.display());
        }
        Ok(())
    }
}

/// In-memory sink whose contents stay readable through a shared handle
/// after the runner is done with it.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
    closes: Arc<Mutex<usize>>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// How many times `close` actually closed the sink.
    pub fn close_count(&self) -> usize {
        self.closes.lock().map(|c| *c).unwrap_or_default()
    }
}

impl ResultSink for MemorySink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "results log is closed",
            ));
        }
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| io::Error::other("results buffer poisoned"))?;
        lines.push(line.to_string());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            let mut closes = self
                .closes
                .lock()
                .map_err(|_| io::Error::other("results buffer poisoned"))?;
            *closes += 1;
        }
        Ok(())
    }
}
