//! RESP2 protocol implementation: frame types and the streaming parser.

mod frame;
mod parser;

pub use frame::Frame;
pub use parser::RespParser;
