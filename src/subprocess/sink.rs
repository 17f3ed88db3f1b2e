//! Line sinks: where drained output lines end up.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A cloneable callback that consumes one line of output.
///
/// Calls for one stream are made sequentially and in stream order. The same
/// sink may be shared by both streams, in which case calls from the two
/// streams may interleave in any order.
#[derive(Clone)]
pub struct LineSink {
    callback: Arc<dyn Fn(&str) + Send + Sync>,
}

impl LineSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Forwards lines to `tracing` at info level.
    pub fn log_info() -> Self {
        Self::new(|line| tracing::info!(target: "procstream::output", "{}", line))
    }

    /// Forwards lines to `tracing` at error level.
    pub fn log_error() -> Self {
        Self::new(|line| tracing::error!(target: "procstream::output", "{}", line))
    }

    /// Drops every line.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn deliver(&self, line: &str) {
        (self.callback)(line)
    }
}

impl<F> From<F> for LineSink
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn from(callback: F) -> Self {
        Self::new(callback)
    }
}

impl fmt::Debug for LineSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSink").finish_non_exhaustive()
    }
}

/// Collects lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that appends to this buffer.
    pub fn sink(&self) -> LineSink {
        let lines = Arc::clone(&self.lines);
        LineSink::new(move |line| {
            lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line.to_string())
        })
    }

    /// Snapshot of the lines collected so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
