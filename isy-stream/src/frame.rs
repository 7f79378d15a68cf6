//! Frame assembler for the event stream socket.
//!
//! The controller writes HTTP-like frames: a header block terminated by a
//! blank line, followed by a body of exactly `Content-Length` bytes. Socket
//! reads carry no framing guarantees, so bytes are accumulated in a
//! `BytesMut` and bodies are sliced out once complete.
//!
//! The assembler is a two-state machine:
//! - no pending length: search for `\r\n\r\n` and parse the header block
//! - pending length: wait until that many body bytes are buffered
//!
//! # Example
//!
//! ```rust
//! use isy_stream::FrameAssembler;
//!
//! let mut frames = FrameAssembler::new();
//! assert!(frames.feed(b"Content-Length: 5\r\n\r\n").unwrap().is_none());
//! let body = frames.feed(b"HELLO").unwrap().unwrap();
//! assert_eq!(&body[..], b"HELLO");
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::FrameError;

const HEADER_BODY_SEPARATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Accumulates raw socket bytes and yields complete message bodies.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    /// Declared length of the body currently being received.
    content_length: Option<usize>,
}

impl FrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and try to extract one body.
    ///
    /// Returns `Ok(None)` when more data is needed. Further bodies that are
    /// already buffered are returned by subsequent calls to
    /// [`next_frame`](Self::next_frame).
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<Bytes>, FrameError> {
        self.buffer.extend_from_slice(data);
        self.next_frame()
    }

    /// Append bytes and extract every body that is now complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.next_frame()? {
            bodies.push(body);
        }
        Ok(bodies)
    }

    /// Try to extract one body from bytes already buffered.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let length = match self.content_length {
            Some(length) => length,
            None => {
                let Some(position) = find(&self.buffer, HEADER_BODY_SEPARATOR) else {
                    return Ok(None);
                };
                let headers = self.buffer.split_to(position + HEADER_BODY_SEPARATOR.len());
                let length = parse_content_length(&headers[..position])?;
                tracing::trace!(content_length = length, "Parsed frame headers");
                self.content_length = Some(length);
                length
            }
        };

        if self.buffer.len() < length {
            tracing::trace!(
                buffered = self.buffer.len(),
                content_length = length,
                "Frame body not complete yet"
            );
            return Ok(None);
        }

        let body = self.buffer.split_to(length).freeze();
        self.content_length = None;
        Ok(Some(body))
    }

    /// Declared length of the frame in progress, if its headers were parsed
    pub fn pending_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Number of buffered, unconsumed bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard buffered bytes and any half-received frame
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.content_length = None;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Find the content-length header in a header block.
///
/// Lines without a colon (the request/status line) are skipped. Header
/// names are matched case-insensitively; the last occurrence wins.
fn parse_content_length(block: &[u8]) -> Result<usize, FrameError> {
    let mut length = None;

    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..colon]);
        if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        let value = String::from_utf8_lossy(&line[colon + 1..]);
        let value = value.trim();
        length = Some(
            value
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?,
        );
    }

    length.ok_or(FrameError::MissingContentLength)
}
