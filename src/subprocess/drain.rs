//! Line-oriented draining of one child output stream.

use std::fmt::Write as _;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;

use super::error::ProcessError;
use super::launcher::StreamKind;
use super::sink::LineSink;

/// Splits a byte stream into newline-terminated lines.
///
/// Partially read bytes accumulate in `pending`, so `next_line` is cancel
/// safe: dropping the future mid-line loses nothing.
pub struct LineReader<R> {
    reader: R,
    pending: Vec<u8>,
    eof: bool,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Returns the next complete line including its terminator, or `None`
    /// once the underlying read has returned zero bytes.
    ///
    /// A trailing fragment without a newline is never returned; see
    /// [`LineReader::unterminated`].
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        while !self.eof {
            // read_until only stops short of a newline at end of stream
            if self.reader.read_until(b'\n', &mut self.pending).await? == 0 {
                self.eof = true;
            } else if self.pending.ends_with(b"\n") {
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
        }
        Ok(None)
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Bytes read after the last newline.
    pub fn unterminated(&self) -> &[u8] {
        &self.pending
    }
}

/// Decodes bytes as UTF-8, replacing each undecodable byte with a `\xNN`
/// escape instead of failing.
pub fn decode_escaped(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        decoded.push_str(chunk.valid());
        for byte in chunk.invalid() {
            let _ = write!(decoded, "\\x{:02x}", byte);
        }
    }
    decoded
}

/// Decodes a raw line, strips trailing whitespace and applies the prefix.
pub fn format_line(raw: &[u8], prefix: Option<&str>) -> String {
    let decoded = decode_escaped(raw);
    let line = decoded.trim_end();
    match prefix {
        Some(prefix) => format!("{}{}", prefix, line),
        None => line.to_string(),
    }
}

/// The `"[<name>] "` prefix put in front of delivered lines.
pub fn line_prefix(name: &str) -> String {
    format!("[{}] ", name)
}

/// Forwards every complete line of one stream to a sink.
pub struct StreamDrainer<R> {
    kind: StreamKind,
    process_name: String,
    reader: LineReader<R>,
    sink: LineSink,
    prefix: Option<String>,
    delivered: usize,
}

impl<R> StreamDrainer<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        kind: StreamKind,
        reader: R,
        sink: LineSink,
        process_name: &str,
        with_prefix: bool,
    ) -> Self {
        Self {
            kind,
            process_name: process_name.to_string(),
            reader: LineReader::new(reader),
            sink,
            prefix: with_prefix.then(|| line_prefix(process_name)),
            delivered: 0,
        }
    }

    /// Total number of lines handed to the sink so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn is_eof(&self) -> bool {
        self.reader.is_eof()
    }

    /// One drain pass: delivers lines as they arrive until the stream
    /// reaches EOF or `deadline` passes while waiting for the next line.
    /// Returns the number of lines delivered during this pass.
    pub async fn drain_until(&mut self, deadline: Instant) -> Result<usize, ProcessError> {
        let mut count = 0;
        loop {
            let next = match tokio::time::timeout_at(deadline, self.reader.next_line()).await {
                Ok(next) => next.map_err(|e| self.read_error(e))?,
                Err(_) => break,
            };
            match next {
                Some(raw) => {
                    self.deliver(&raw);
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Delivers every remaining line until the stream reaches EOF.
    pub async fn drain_to_end(&mut self) -> Result<usize, ProcessError> {
        let mut count = 0;
        while let Some(raw) = self
            .reader
            .next_line()
            .await
            .map_err(|e| self.read_error(e))?
        {
            self.deliver(&raw);
            count += 1;
        }

        let leftover = self.reader.unterminated().len();
        if leftover > 0 {
            tracing::debug!(
                "[{}] Discarding {} bytes of unterminated {} output",
                self.process_name,
                leftover,
                self.kind
            );
        }
        Ok(count)
    }

    fn deliver(&mut self, raw: &[u8]) {
        let line = format_line(raw, self.prefix.as_deref());
        self.sink.deliver(&line);
        self.delivered += 1;
    }

    fn read_error(&self, source: io::Error) -> ProcessError {
        ProcessError::StreamRead {
            name: self.process_name.clone(),
            stream: self.kind,
            source,
        }
    }
}
