//! Newline-delimited JSON framing.
//!
//! Every message is exactly one line. Bytes after the last `\n` stay buffered
//! until a later read completes the line.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::message::Message;

/// Default cap on a single buffered line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message {line:?}: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("line exceeds {max} bytes without a terminator ({len} buffered); discarded")]
    LineTooLong { len: usize, max: usize },
}

#[derive(Debug, Error)]
#[error("failed to encode `{kind}` message: {source}")]
pub struct EncodeError {
    pub kind: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Serializes `msg` and appends the line terminator.
pub fn encode(msg: &Message) -> Result<Bytes, EncodeError> {
    let mut out = serde_json::to_vec(msg).map_err(|source| EncodeError {
        kind: msg.kind(),
        source,
    })?;
    out.push(b'\n');
    Ok(Bytes::from(out))
}

/// Splits every complete line off the front of `buf` and parses it.
///
/// Empty lines are dropped. Whatever follows the final terminator remains in
/// `buf`.
pub fn decode(buf: &mut BytesMut) -> Vec<Result<Message, DecodeError>> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = buf.iter().position(|b| *b == b'\n') else {
            break;
        };
        let line = buf.split_to(pos + 1);
        let line = trim_terminator(&line);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        out.push(
            serde_json::from_slice::<Message>(line).map_err(|source| DecodeError::Malformed {
                line: String::from_utf8_lossy(line).into_owned(),
                source,
            }),
        );
    }
    out
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Per-connection read buffer with a bound on unterminated input.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line: max_line.max(1),
        }
    }

    /// Appends a chunk read from the socket and returns every message it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Message, DecodeError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = decode(&mut self.buf);
        if self.buf.len() > self.max_line {
            let len = self.buf.len();
            self.buf.advance(len);
            out.push(Err(DecodeError::LineTooLong {
                len,
                max: self.max_line,
            }));
        }
        out
    }

    /// Bytes of an incomplete line still waiting for their terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}
