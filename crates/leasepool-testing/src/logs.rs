//! Capturing formatted log output in tests.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// In-memory sink for `tracing` events, rendered by the `fmt` layer.
///
/// Clones share the same buffer.
///
/// ```rust,ignore
/// let logs = LogCapture::new();
/// let _guard = logs.set_default();
/// tracing::warn!(target: "leasepool", connection_id = 7, "slow connection acquire");
/// assert_eq!(logs.lines_containing("slow connection acquire").len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// An empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events on the current thread into this capture until the
    /// guard is dropped.
    ///
    /// Everything at `DEBUG` and above is kept, without ANSI colors.
    #[must_use = "events are only captured while the guard is alive"]
    pub fn set_default(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Everything captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    /// Captured lines containing `needle`.
    #[must_use]
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.buf.lock().clear();
    }
}

/// Writer handed to the `fmt` layer for each event.
#[derive(Debug)]
pub struct LogWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}
