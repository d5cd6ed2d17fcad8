//! Error types for basalt.
//!
//! Command errors carry their exact RESP wire text in the `Display`
//! implementation: the dispatcher turns any `Error` into an error reply
//! with [`Error::to_resp`], so the strings here are the strings clients
//! see.

use std::io;
use thiserror::Error;

/// Result type alias for basalt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for basalt.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol parsing errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Command execution errors
    #[error("{0}")]
    Command(#[from] CommandError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

/// Protocol-level errors during RESP parsing.
///
/// Any of these (other than `Incomplete`) terminates the connection
/// after the error text has been sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Incomplete frame - need more data
    #[error("incomplete frame, need more data")]
    Incomplete,

    /// Invalid integer line
    #[error("illegal number {0}")]
    InvalidInteger(String),

    /// Invalid bulk string length header
    #[error("illegal bulk string header: {0}")]
    InvalidBulkHeader(String),

    /// Invalid array length header
    #[error("illegal array header: {0}")]
    InvalidArrayHeader(String),

    /// Invalid UTF-8 in a simple string or error line
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// Missing CRLF terminator after a bulk string body
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// Bulk string larger than the configured cap
    #[error("bulk string too large: {len} bytes (max: {max})")]
    BulkTooLarge {
        /// Actual bulk string length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Inline command line longer than the configured cap
    #[error("line too long: {len} bytes (max: {max})")]
    LineTooLong {
        /// Actual line length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },
}

/// Command execution errors, rendered exactly as their RESP reply text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Command name not present in the command table
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Token count does not satisfy the command's arity rule
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity {
        /// Command name that received the wrong arity
        command: String,
    },

    /// Key holds a different value variant than the command expects
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Malformed options or unparseable operand
    #[error("ERR syntax error")]
    Syntax,

    /// A stored value could not be parsed as an integer
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// An increment/decrement operand could not be parsed as an integer
    #[error("ERR number is not an integer or out of range")]
    DeltaNotInteger,

    /// A value could not be parsed as a decimal
    #[error("ERR value is not a valid float")]
    NotFloat,

    /// A hash field value could not be parsed as an integer
    #[error("ERR hash value is not an integer")]
    HashNotInteger,

    /// A hash field value could not be parsed as a decimal
    #[error("ERR hash value is not a float")]
    HashNotFloat,

    /// Integer arithmetic left the i64 range
    #[error("ERR increment or decrement would overflow")]
    Overflow,

    /// Bit offset failed the 0 <= offset < 2^33 check
    #[error("ERR bit offset is not an integer or out of range")]
    BitOffset,

    /// SETBIT value other than 0 or 1
    #[error("ERR bit is not an integer or out of range")]
    BitValue,

    /// BITPOS bit argument other than 0 or 1
    #[error("ERR The bit argument must be 1 or 0.")]
    BitArgument,

    /// LSET on a missing key or out-of-range index
    #[error("ERR index out of range")]
    IndexOutOfRange,

    /// SETRANGE with a negative offset
    #[error("ERR offset is out of range")]
    OffsetOutOfRange,

    /// LTRIM on a missing key
    #[error("ERR no such key")]
    NoSuchKey,

    /// Expire time failed to parse or was not positive
    #[error("ERR invalid expire time")]
    InvalidExpireTime,

    /// Blocking command timeout below zero
    #[error("ERR timeout is negative")]
    TimeoutNegative,

    /// Blocking command timeout failed to parse
    #[error("ERR timeout is not an integer or out of range")]
    TimeoutNotInteger,

    /// KEYS pattern failed to compile
    #[error("ERR pattern is not a valid regex expression")]
    InvalidPattern,

    /// A count argument that must be positive was not
    #[error("ERR value is out of range, must be positive")]
    CountOutOfRange,

    /// Unknown INFO section
    #[error("Invalid section for 'info' command")]
    InvalidSection,

    /// Data command before a successful AUTH
    #[error("NOAUTH Authentication required")]
    AuthRequired,

    /// AUTH while no password is configured
    #[error("ERR Client send AUTH, but no password is set")]
    NoPasswordSet,

    /// AUTH with a password that does not match
    #[error("ERR invalid password")]
    InvalidPassword,

    /// Admission guard: connection arrived past MaxClients
    #[error("ERR max number of clients reached")]
    MaxClients,

    /// Executor panicked; details are in the log, not the reply
    #[error("Err unknown")]
    Unknown,
}

impl Error {
    /// Renders the error as the text of a RESP error reply.
    pub fn to_resp(&self) -> String {
        match self {
            Error::Command(e) => e.to_string(),
            Error::Protocol(e) => format!("ERR protocol error: {e}"),
            Error::Io(e) => format!("ERR I/O error: {e}"),
            Error::Config(e) => format!("ERR configuration error: {e}"),
        }
    }
}
