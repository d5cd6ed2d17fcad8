//! Streaming RESP parser.
//!
//! Feed raw socket bytes in with [`RespParser::extend`] and pull
//! complete frames out with [`RespParser::parse`]. Data is only
//! consumed from the buffer once a whole frame is available, so partial
//! reads never lose bytes.
//!
//! Lines that do not start with a RESP marker are treated as inline
//! commands: the line is split on ASCII spaces and yielded as a
//! multi-bulk, which is how redis-cli compatibility mode works.

use super::frame::Frame;
use crate::error::ProtocolError;
use crate::{MAX_BULK_SIZE, MAX_INLINE_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

/// Streaming RESP parser with an internal accumulation buffer.
#[derive(Debug, Default)]
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append raw bytes read from the socket.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns true if no unconsumed bytes remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Try to parse one complete frame.
    ///
    /// Returns `Ok(Some(frame))` when a frame was decoded,
    /// `Ok(None)` when more bytes are needed, and `Err` on malformed
    /// input (the caller is expected to report the error and close the
    /// connection).
    pub fn parse(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        if !is_resp_marker(self.buffer[0]) {
            return self.parse_inline();
        }

        match decode(&self.buffer) {
            Ok((frame, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Parse an inline command: one line, split on ASCII spaces.
    fn parse_inline(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let line_end = match find_crlf(&self.buffer, 0) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > MAX_INLINE_SIZE {
                    return Err(ProtocolError::LineTooLong {
                        len: self.buffer.len(),
                        max: MAX_INLINE_SIZE,
                    });
                }
                return Ok(None);
            }
        };

        let line = self.buffer.split_to(line_end).freeze();
        self.buffer.advance(2);

        let tokens: Vec<Frame> = line
            .split(|&b| b == b' ')
            .filter(|t| !t.is_empty())
            .map(|t| Frame::Bulk(Bytes::copy_from_slice(t)))
            .collect();

        if tokens.is_empty() {
            // Blank line between commands; skip it and try again.
            return self.parse();
        }
        Ok(Some(Frame::Array(tokens)))
    }
}

#[inline]
fn is_resp_marker(b: u8) -> bool {
    matches!(b, b'+' | b'-' | b':' | b'$' | b'*')
}

/// Find the position of the next `\r\n` at or after `from`.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(pos) = memchr(b'\r', &buf[search..]) {
        let at = search + pos;
        match buf.get(at + 1) {
            Some(b'\n') => return Some(at),
            Some(_) => search = at + 1,
            None => return None,
        }
    }
    None
}

/// Decode one frame from the front of `buf`, returning it together
/// with the number of bytes consumed. `Err(Incomplete)` means the
/// buffer holds a valid prefix of a frame.
fn decode(buf: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let (line, after_line) = read_line(buf, 1)?;
    match buf[0] {
        b'+' => {
            let s = as_utf8(line)?;
            Ok((Frame::Simple(s.to_string()), after_line))
        }
        b'-' => {
            let s = as_utf8(line)?;
            Ok((Frame::Error(s.to_string()), after_line))
        }
        b':' => {
            let n = parse_i64(line)
                .ok_or_else(|| ProtocolError::InvalidInteger(lossy(line)))?;
            Ok((Frame::Integer(n), after_line))
        }
        b'$' => decode_bulk(buf, line, after_line),
        b'*' => decode_array(buf, line, after_line),
        marker => unreachable!("decode called on non-RESP marker {marker:?}"),
    }
}

fn decode_bulk(
    buf: &[u8],
    header: &[u8],
    body_start: usize,
) -> Result<(Frame, usize), ProtocolError> {
    let len = parse_i64(header)
        .ok_or_else(|| ProtocolError::InvalidBulkHeader(lossy(header)))?;
    if len == -1 {
        return Ok((Frame::Null, body_start));
    }
    if len < -1 {
        return Err(ProtocolError::InvalidBulkHeader(lossy(header)));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ProtocolError::BulkTooLarge {
            len,
            max: MAX_BULK_SIZE,
        });
    }

    let end = body_start + len;
    if buf.len() < end + 2 {
        return Err(ProtocolError::Incomplete);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(ProtocolError::MissingCrlf);
    }
    let data = Bytes::copy_from_slice(&buf[body_start..end]);
    Ok((Frame::Bulk(data), end + 2))
}

fn decode_array(
    buf: &[u8],
    header: &[u8],
    mut cursor: usize,
) -> Result<(Frame, usize), ProtocolError> {
    let len = parse_i64(header)
        .ok_or_else(|| ProtocolError::InvalidArrayHeader(lossy(header)))?;
    if len < 0 {
        return Err(ProtocolError::InvalidArrayHeader(lossy(header)));
    }

    let mut frames = Vec::with_capacity(len.min(64) as usize);
    for _ in 0..len {
        if cursor >= buf.len() {
            return Err(ProtocolError::Incomplete);
        }
        if !is_resp_marker(buf[cursor]) {
            return Err(ProtocolError::InvalidBulkHeader(lossy(
                &buf[cursor..(cursor + 1).min(buf.len())],
            )));
        }
        let (frame, consumed) = decode(&buf[cursor..])?;
        frames.push(frame);
        cursor += consumed;
    }
    Ok((Frame::Array(frames), cursor))
}

/// Read the header line starting at `from` (just past the marker byte).
/// Returns the line contents and the offset of the byte after its CRLF.
fn read_line(buf: &[u8], from: usize) -> Result<(&[u8], usize), ProtocolError> {
    match find_crlf(buf, from) {
        Some(end) => Ok((&buf[from..end], end + 2)),
        None => Err(ProtocolError::Incomplete),
    }
}

fn as_utf8(line: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)
}

fn parse_i64(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse().ok()
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Frame> {
        let mut parser = RespParser::new();
        parser.extend(input);
        let mut frames = Vec::new();
        while let Some(frame) = parser.parse().expect("parse") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn parses_multi_bulk_request() {
        let frames = parse_all(b"*3\r\n$3\r\nset\r\n$2\r\nk1\r\n$2\r\nv1\r\n");
        assert_eq!(
            frames,
            vec![Frame::Array(vec![
                Frame::bulk("set"),
                Frame::bulk("k1"),
                Frame::bulk("v1"),
            ])]
        );
    }

    #[test]
    fn parses_every_reply_shape() {
        let frames = parse_all(b"+OK\r\n-ERR x\r\n:42\r\n$3\r\nfoo\r\n$-1\r\n*0\r\n");
        assert_eq!(
            frames,
            vec![
                Frame::simple("OK"),
                Frame::error("ERR x"),
                Frame::Integer(42),
                Frame::bulk("foo"),
                Frame::Null,
                Frame::empty_array(),
            ]
        );
    }

    #[test]
    fn waits_for_complete_frames() {
        let mut parser = RespParser::new();
        parser.extend(b"*2\r\n$3\r\nget\r\n$3\r\nfo");
        assert!(parser.parse().unwrap().is_none());
        // Nothing was consumed; finishing the frame yields it whole.
        parser.extend(b"o\r\n");
        assert_eq!(
            parser.parse().unwrap(),
            Some(Frame::Array(vec![Frame::bulk("get"), Frame::bulk("foo")]))
        );
        assert!(parser.is_empty());
    }

    #[test]
    fn inline_commands_split_on_spaces() {
        let frames = parse_all(b"set  foo bar\r\n");
        assert_eq!(
            frames,
            vec![Frame::Array(vec![
                Frame::bulk("set"),
                Frame::bulk("foo"),
                Frame::bulk("bar"),
            ])]
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        let mut parser = RespParser::new();
        parser.extend(b"$abc\r\n");
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::InvalidBulkHeader(_))
        ));

        let mut parser = RespParser::new();
        parser.extend(b"$-2\r\n");
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::InvalidBulkHeader(_))
        ));

        let mut parser = RespParser::new();
        parser.extend(b"*-1\r\n");
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::InvalidArrayHeader(_))
        ));
    }

    #[test]
    fn bulk_body_is_binary_safe() {
        let frames = parse_all(b"*1\r\n$4\r\na\r\nb\r\n");
        assert_eq!(
            frames,
            vec![Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"a\r\nb"))])]
        );
    }

    #[test]
    fn round_trips_every_reply_kind() {
        let replies = vec![
            Frame::simple("OK"),
            Frame::error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            Frame::Integer(i64::MIN),
            Frame::bulk("binary \x01\x02"),
            Frame::Null,
            Frame::Array(vec![
                Frame::bulk("a"),
                Frame::Integer(3),
                Frame::Null,
                Frame::Array(vec![Frame::simple("nested")]),
            ]),
        ];
        for reply in replies {
            let wire = reply.to_wire();
            let mut parser = RespParser::new();
            parser.extend(&wire);
            let decoded = parser.parse().unwrap().unwrap();
            assert_eq!(decoded.to_wire(), wire);
            assert_eq!(decoded, reply);
        }
    }
}
