//! RESP frame types.
//!
//! A [`Frame`] is one complete RESP2 message. The five wire shapes are
//! simple string (`+`), error (`-`), integer (`:`), bulk string (`$`)
//! and array (`*`); a null bulk is `$-1\r\n`. Client requests arrive as
//! arrays of bulk strings (multi-bulk); every reply the server produces
//! is also a `Frame`.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A RESP frame representing a complete protocol message.
///
/// Frames are cheap to clone (`Bytes` payloads) and serialize with
/// direct buffer writes.
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string (not binary-safe, no CR/LF allowed)
    Simple(String),

    /// Error message
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Bulk string (binary-safe)
    Bulk(Bytes),

    /// Null bulk string (`$-1\r\n`)
    Null,

    /// Array of frames; may mix shapes
    Array(Vec<Frame>),
}

/// Pre-rendered replies for the hottest responses.
const OK: &[u8] = b"+OK\r\n";
const PONG: &[u8] = b"+PONG\r\n";
const NULL_BULK: &[u8] = b"$-1\r\n";
const EMPTY_ARRAY: &[u8] = b"*0\r\n";

impl Frame {
    /// Create a simple string frame.
    #[inline]
    pub fn simple(s: impl Into<String>) -> Self {
        Self::Simple(s.into())
    }

    /// Create an error frame.
    #[inline]
    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    /// Create a bulk string frame.
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    /// Create an `+OK` reply.
    #[inline]
    pub fn ok() -> Self {
        Self::Simple("OK".to_string())
    }

    /// Create a `+PONG` reply.
    #[inline]
    pub fn pong() -> Self {
        Self::Simple("PONG".to_string())
    }

    /// Create an empty array reply (`*0\r\n`).
    #[inline]
    pub fn empty_array() -> Self {
        Self::Array(Vec::new())
    }

    /// Build a multi-bulk reply from raw byte strings.
    pub fn multi_bulk(items: impl IntoIterator<Item = Bytes>) -> Self {
        Self::Array(items.into_iter().map(Frame::Bulk).collect())
    }

    /// Check if this is an error frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Try to view the frame payload as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Simple(s) => Some(s.as_bytes()),
            Self::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// Try to extract the frame payload as owned `Bytes`.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Bulk(b) => Some(b.clone()),
            Self::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            _ => None,
        }
    }

    /// Serialize the frame into `buf`.
    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            Self::Simple(s) => match s.as_str() {
                "OK" => buf.put_slice(OK),
                "PONG" => buf.put_slice(PONG),
                _ => {
                    buf.put_u8(b'+');
                    buf.put_slice(s.as_bytes());
                    buf.put_slice(b"\r\n");
                }
            },
            Self::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            Self::Integer(n) => {
                buf.put_u8(b':');
                let mut itoa = itoa::Buffer::new();
                buf.put_slice(itoa.format(*n).as_bytes());
                buf.put_slice(b"\r\n");
            }
            Self::Bulk(data) => {
                buf.put_u8(b'$');
                let mut itoa = itoa::Buffer::new();
                buf.put_slice(itoa.format(data.len()).as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            Self::Null => buf.put_slice(NULL_BULK),
            Self::Array(frames) => {
                if frames.is_empty() {
                    buf.put_slice(EMPTY_ARRAY);
                    return;
                }
                buf.put_u8(b'*');
                let mut itoa = itoa::Buffer::new();
                buf.put_slice(itoa.format(frames.len()).as_bytes());
                buf.put_slice(b"\r\n");
                for frame in frames {
                    frame.serialize(buf);
                }
            }
        }
    }

    /// Serialize the frame into a fresh buffer.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_hint());
        self.serialize(&mut buf);
        buf.freeze()
    }

    /// Rough size estimate used to pre-size serialization buffers.
    fn wire_hint(&self) -> usize {
        match self {
            Self::Simple(s) | Self::Error(s) => s.len() + 3,
            Self::Integer(_) => 23,
            Self::Bulk(b) => b.len() + 16,
            Self::Null => 5,
            Self::Array(frames) => 16 + frames.iter().map(Frame::wire_hint).sum::<usize>(),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(s) => write!(f, "Simple({s:?})"),
            Self::Error(s) => write!(f, "Error({s:?})"),
            Self::Integer(n) => write!(f, "Integer({n})"),
            Self::Bulk(b) => write!(f, "Bulk({:?})", String::from_utf8_lossy(b)),
            Self::Null => write!(f, "Null"),
            Self::Array(frames) => f.debug_list().entries(frames.iter()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(frame: &Frame) -> Vec<u8> {
        frame.to_wire().to_vec()
    }

    #[test]
    fn serializes_simple_shapes() {
        assert_eq!(wire(&Frame::ok()), b"+OK\r\n");
        assert_eq!(wire(&Frame::pong()), b"+PONG\r\n");
        assert_eq!(wire(&Frame::error("ERR boom")), b"-ERR boom\r\n");
        assert_eq!(wire(&Frame::Integer(-42)), b":-42\r\n");
        assert_eq!(wire(&Frame::Null), b"$-1\r\n");
    }

    #[test]
    fn serializes_bulk_and_arrays() {
        assert_eq!(wire(&Frame::bulk("bar")), b"$3\r\nbar\r\n");
        assert_eq!(wire(&Frame::bulk("")), b"$0\r\n\r\n");
        assert_eq!(wire(&Frame::empty_array()), b"*0\r\n");

        let reply = Frame::Array(vec![
            Frame::bulk("a"),
            Frame::Null,
            Frame::Integer(7),
        ]);
        assert_eq!(wire(&reply), b"*3\r\n$1\r\na\r\n$-1\r\n:7\r\n");
    }

    #[test]
    fn multi_bulk_builder() {
        let reply = Frame::multi_bulk([Bytes::from_static(b"x"), Bytes::from_static(b"y")]);
        assert_eq!(wire(&reply), b"*2\r\n$1\r\nx\r\n$1\r\ny\r\n");
    }
}
