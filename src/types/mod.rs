//! Typed value containers.
//!
//! Every key in the keyspace stores exactly one [`Value`] variant.
//! Commands check the variant before operating; a mismatch surfaces as
//! the WRONGTYPE error. Bitmaps are not a separate variant: bitmap
//! commands operate on `Str` payloads through the [`Bitmap`] view, so
//! `GET`, `STRLEN` and `BITOP` interoperate with `SETBIT`.

mod bitmap;
mod hash;
mod list;
mod set;

pub use bitmap::Bitmap;
pub use hash::Hash;
pub use list::List;
pub use set::Set;

use bytes::Bytes;

/// The payload stored under a key: a closed sum over the supported
/// container types.
#[derive(Debug, Clone)]
pub enum Value {
    /// Raw bytes; also the backing store for bitmaps
    Str(Bytes),
    /// List of byte strings
    List(List),
    /// Field -> bytes mapping
    Hash(Hash),
    /// Set of byte strings
    Set(Set),
}

impl Value {
    /// Wrap raw bytes as a string value.
    #[inline]
    pub fn str(data: impl Into<Bytes>) -> Self {
        Self::Str(data.into())
    }

    /// The variant name as reported by TYPE-style introspection.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(Value::str("x").kind(), "string");
        assert_eq!(Value::List(List::new()).kind(), "list");
        assert_eq!(Value::Hash(Hash::new()).kind(), "hash");
        assert_eq!(Value::Set(Set::new()).kind(), "set");
    }
}
