//! Newline codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ N bytes: UTF-8 text ][ '\n' ]
//! ```
//!
//! A trailing `'\r'` before the terminator is stripped so that clients
//! sending CRLF line endings are accepted. On encode, line breaks inside the
//! payload are replaced with spaces so one payload is always one line.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::limits::MAX_LINE_LENGTH;

/// Errors that can occur during decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Line too long: {0} bytes (max: {1})")]
    LineTooLong(usize, usize),

    #[error("Line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Frame a payload as exactly one line
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    encode_into(payload, &mut buf);
    buf.freeze()
}

/// Frame a payload directly into a provided buffer
///
/// One trailing terminator (`\n` or `\r\n`) is dropped; any other `\r` or
/// `\n` becomes a space.
pub fn encode_into(payload: &[u8], buf: &mut BytesMut) {
    let body = payload.strip_suffix(b"\n").unwrap_or(payload);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    buf.reserve(body.len() + 1);
    for &b in body {
        match b {
            b'\r' | b'\n' => buf.put_u8(b' '),
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(b'\n');
}

/// Try to decode one line from a buffer
///
/// Returns:
/// - `Ok(Some(line))` if a complete line was decoded (terminator stripped)
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the line exceeds `max_len` or is not UTF-8
pub fn decode(buf: &mut BytesMut, max_len: usize) -> Result<Option<String>, CodecError> {
    let newline = match buf.iter().position(|b| *b == b'\n') {
        Some(pos) => pos,
        None => {
            if buf.len() > max_len {
                return Err(CodecError::LineTooLong(buf.len(), max_len));
            }
            return Ok(None);
        }
    };

    if newline > max_len {
        return Err(CodecError::LineTooLong(newline, max_len));
    }

    // Consume the line including its terminator
    let mut line = buf.split_to(newline + 1);
    line.truncate(newline);
    if line.ends_with(b"\r") {
        line.truncate(newline - 1);
    }

    let text = std::str::from_utf8(&line)?;
    Ok(Some(text.to_string()))
}

/// Decoder state machine for streaming decoding
#[derive(Debug)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
    max_len: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a new line decoder with the default length limit
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_len,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete lines
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        decode(&mut self.buffer, self.max_len)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        assert_eq!(encode(b"examiner/abc"), Bytes::from_static(b"examiner/abc\n"));
        assert_eq!(encode(b"already\n"), Bytes::from_static(b"already\n"));
        assert_eq!(encode(b"crlf\r\n"), Bytes::from_static(b"crlf\n"));
    }

    #[test]
    fn test_encode_flattens_embedded_line_breaks() {
        let framed = encode(b"my answer\nTime expired\r\nSession started");
        assert_eq!(
            framed,
            Bytes::from_static(b"my answer Time expired  Session started\n")
        );

        // Decodes back to a single line
        let mut decoder = LineDecoder::new();
        decoder.extend(&framed);
        assert_eq!(
            decoder.decode_next().unwrap().as_deref(),
            Some("my answer Time expired  Session started")
        );
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_partial_decode() {
        let mut buf = BytesMut::from(&b"user/ab"[..]);
        let result = decode(&mut buf, 64).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn test_line_decoder() {
        let mut decoder = LineDecoder::new();

        // Feed data in chunks
        decoder.extend(b"examiner/");
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(b"abc123\r\nhello");
        let line = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have line");
        assert_eq!(line, "examiner/abc123");

        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.buffer_len(), 5);
    }

    #[test]
    fn test_multiple_lines() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"one\n\ntwo\n");

        assert_eq!(decoder.decode_next().unwrap().as_deref(), Some("one"));
        assert_eq!(decoder.decode_next().unwrap().as_deref(), Some(""));
        assert_eq!(decoder.decode_next().unwrap().as_deref(), Some("two"));
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = LineDecoder::with_max_length(4);
        decoder.extend(b"abcdefgh");
        assert!(matches!(
            decoder.decode_next(),
            Err(CodecError::LineTooLong(8, 4))
        ));

        let mut decoder = LineDecoder::with_max_length(4);
        decoder.extend(b"abcdef\n");
        assert!(matches!(
            decoder.decode_next(),
            Err(CodecError::LineTooLong(6, 4))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut decoder = LineDecoder::new();
        decoder.extend(&[0xff, 0xfe, b'\n']);
        assert!(matches!(decoder.decode_next(), Err(CodecError::InvalidUtf8(_))));
    }
}
