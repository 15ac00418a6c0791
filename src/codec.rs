//! Line framing for NNTP replies.
//!
//! [`ResponseReader`] buffers raw bytes from the transport and splits them into
//! status lines and dot-terminated multi-line bodies. It performs no I/O; the
//! connection feeds it whatever the stream returns until a complete frame is
//! available.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// A parsed status line: three-digit code and the free-form text after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Numeric status code
    pub code: u16,
    /// Human-readable text following the code
    pub message: String,
}

impl StatusLine {
    /// Parse a single status line without its CRLF.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let code = parse_status_code(line).ok_or_else(|| {
            Error::Parse(format!(
                "invalid status line: {:?}",
                String::from_utf8_lossy(line)
            ))
        })?;
        if line.len() > 3 && line[3] != b' ' {
            return Err(Error::Parse(format!(
                "invalid status line: {:?}",
                String::from_utf8_lossy(line)
            )));
        }
        let message = line
            .get(4..)
            .map(|rest| String::from_utf8_lossy(rest).trim_end().to_string())
            .unwrap_or_default();
        Ok(Self { code, message })
    }
}

/// Buffered decoder for the reply side of a connection.
#[derive(Debug, Default)]
pub struct ResponseReader {
    read_buffer: BytesMut,
    /// Offset up to which the buffered body has been searched for the
    /// terminator without a match.
    body_scan: usize,
}

impl ResponseReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self {
            read_buffer: BytesMut::with_capacity(4096),
            body_scan: 0,
        }
    }

    /// Feed received data from the server.
    pub fn feed_bytes(&mut self, data: &[u8]) {
        self.read_buffer.put_slice(data);
    }

    /// Number of bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Discard anything buffered, e.g. after the transport is dropped.
    pub fn clear(&mut self) {
        self.read_buffer.clear();
        self.body_scan = 0;
    }

    /// Try to decode one status line.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn decode_status_line(&mut self) -> Result<Option<StatusLine>> {
        let Some(end_pos) = find_crlf(&self.read_buffer) else {
            return Ok(None);
        };
        let line = self.read_buffer.split_to(end_pos + 2);
        self.body_scan = 0;
        StatusLine::parse(&line[..end_pos]).map(Some)
    }

    /// Try to decode a dot-terminated body that follows a status line.
    ///
    /// The terminator line is removed, dot-stuffed lines are unstuffed and
    /// CRLF line endings are kept. Returns `Ok(None)` if more data is needed.
    ///
    /// Repeated calls while a body arrives only search the newly fed bytes.
    pub fn decode_body(&mut self) -> Result<Option<Bytes>> {
        let Some((body_len, consumed)) = find_body_end(&self.read_buffer, self.body_scan) else {
            // The terminator may start in the last four bytes.
            self.body_scan = self.read_buffer.len().saturating_sub(4);
            return Ok(None);
        };
        let frame = self.read_buffer.split_to(consumed);
        self.body_scan = 0;
        Ok(Some(unstuff(&frame[..body_len])))
    }
}

/// Locate the end of a body that starts at the beginning of `data`, searching
/// for the terminator from offset `from`.
///
/// Returns the body length (including its final CRLF) and the number of bytes
/// to consume including the terminator.
fn find_body_end(data: &[u8], from: usize) -> Option<(usize, usize)> {
    if data.starts_with(b".\r\n") {
        return Some((0, 3));
    }
    let from = from.min(data.len());
    find_terminator(&data[from..]).map(|pos| (from + pos + 2, from + pos + 5))
}

fn unstuff(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len());
    for line in body.split_inclusive(|&b| b == b'\n') {
        out.put_slice(line.strip_prefix(b".").unwrap_or(line));
    }
    out.freeze()
}

/// Find the position of the first CRLF sequence in the buffer.
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Find the position of the multiline terminator "\r\n.\r\n" in the buffer.
fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(5).position(|w| w == b"\r\n.\r\n")
}

/// Parse a 3-digit ASCII status code from bytes.
fn parse_status_code(data: &[u8]) -> Option<u16> {
    if data.len() < 3 {
        return None;
    }
    // Each byte must be an ASCII digit
    if !data[0].is_ascii_digit() || !data[1].is_ascii_digit() || !data[2].is_ascii_digit() {
        return None;
    }
    let code = (data[0] - b'0') as u16 * 100
        + (data[1] - b'0') as u16 * 10
        + (data[2] - b'0') as u16;
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"211 3 1 3 alt.test\r\n");
        let status = reader.decode_status_line().unwrap().unwrap();
        assert_eq!(status.code, 211);
        assert_eq!(status.message, "3 1 3 alt.test");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_status_line_without_text() {
        let status = StatusLine::parse(b"430").unwrap();
        assert_eq!(status.code, 430);
        assert!(status.message.is_empty());
    }

    #[test]
    fn test_partial_status_line() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"223 0 <a@b>");
        assert!(reader.decode_status_line().unwrap().is_none());

        reader.feed_bytes(b"\r\n");
        assert_eq!(reader.decode_status_line().unwrap().unwrap().code, 223);
    }

    #[test]
    fn test_invalid_status_line() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"oops\r\n");
        assert!(matches!(reader.decode_status_line(), Err(Error::Parse(_))));

        assert!(StatusLine::parse(b"2000 too long").is_err());
    }

    #[test]
    fn test_body_keeps_crlf_and_drops_terminator() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"hello\r\n.\r\n");
        let body = reader.decode_body().unwrap().unwrap();
        assert_eq!(body.as_ref(), b"hello\r\n");
    }

    #[test]
    fn test_empty_body() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b".\r\n223 next\r\n");
        let body = reader.decode_body().unwrap().unwrap();
        assert!(body.is_empty());
        assert_eq!(reader.decode_status_line().unwrap().unwrap().code, 223);
    }

    #[test]
    fn test_body_unstuffs_leading_dots() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"line1\r\n..dot\r\n...\r\n.\r\n");
        let body = reader.decode_body().unwrap().unwrap();
        assert_eq!(body.as_ref(), b"line1\r\n.dot\r\n..\r\n");
    }

    #[test]
    fn test_partial_body() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"part one\r\n");
        assert!(reader.decode_body().unwrap().is_none());

        reader.feed_bytes(b"part two\r\n.");
        assert!(reader.decode_body().unwrap().is_none());

        reader.feed_bytes(b"\r\n");
        let body = reader.decode_body().unwrap().unwrap();
        assert_eq!(body.as_ref(), b"part one\r\npart two\r\n");
    }

    #[test]
    fn test_large_body_fed_in_chunks() {
        let line = b"=ybegin line of encoded article data padded out to a typical width\r\n";
        let mut wire = Vec::new();
        while wire.len() < 4 * 1024 * 1024 {
            wire.extend_from_slice(line);
        }
        let body_len = wire.len();
        wire.extend_from_slice(b".\r\n");

        let mut reader = ResponseReader::new();
        let mut decoded = None;
        for chunk in wire.chunks(4096) {
            reader.feed_bytes(chunk);
            if let Some(body) = reader.decode_body().unwrap() {
                decoded = Some(body);
                break;
            }
            // Only the tail that may hold a split terminator is searched again.
            assert_eq!(reader.body_scan, reader.buffered().saturating_sub(4));
        }

        let body = decoded.unwrap();
        assert_eq!(body.len(), body_len);
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.body_scan, 0);
    }

    #[test]
    fn test_terminator_split_across_feeds() {
        let mut reader = ResponseReader::new();
        reader.feed_bytes(b"abc\r");
        assert!(reader.decode_body().unwrap().is_none());
        reader.feed_bytes(b"\n.\r");
        assert!(reader.decode_body().unwrap().is_none());
        reader.feed_bytes(b"\n221 next\r\n");
        assert_eq!(reader.decode_body().unwrap().unwrap().as_ref(), b"abc\r\n");
        assert_eq!(reader.decode_status_line().unwrap().unwrap().code, 221);
    }
}
