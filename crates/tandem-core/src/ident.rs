//! Fixed-width ASCII identifiers for modules and parameters.
//!
//! Identifiers travel inside 64-byte command records, so they are stored
//! inline (16 bytes plus a length) and never touch the heap. Comparing two
//! identifiers is a byte comparison, which keeps command dispatch on the
//! audio path allocation-free.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum identifier length in bytes (the width of a command field).
pub const IDENT_LEN: usize = 16;

/// Why an identifier was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentError {
    /// The identifier was empty.
    #[error("identifier is empty")]
    Empty,
    /// The identifier is longer than [`IDENT_LEN`] bytes.
    #[error("identifier is {0} bytes, limit is 16")]
    TooLong(usize),
    /// The identifier contains a byte outside printable, non-space ASCII.
    #[error("identifier contains invalid byte 0x{0:02x}")]
    InvalidByte(u8),
    /// A fixed-width field has non-NUL bytes after its terminator.
    #[error("identifier field has data after its NUL terminator")]
    TrailingData,
}

/// A validated module or parameter identifier.
///
/// Valid identifiers are 1 to 16 bytes of ASCII graphic characters
/// (`0x21..=0x7E`): no spaces, no control characters, no non-ASCII.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident {
    bytes: [u8; IDENT_LEN],
    len: u8,
}

impl Ident {
    /// Validates and stores `s`.
    pub fn new(s: &str) -> Result<Self, IdentError> {
        let raw = s.as_bytes();
        if raw.is_empty() {
            return Err(IdentError::Empty);
        }
        if raw.len() > IDENT_LEN {
            return Err(IdentError::TooLong(raw.len()));
        }
        if let Some(&bad) = raw.iter().find(|b| !b.is_ascii_graphic()) {
            return Err(IdentError::InvalidByte(bad));
        }
        let mut bytes = [0u8; IDENT_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// Decodes a NUL-padded fixed-width field.
    pub fn from_field(field: &[u8; IDENT_LEN]) -> Result<Self, IdentError> {
        let len = field.iter().position(|&b| b == 0).unwrap_or(IDENT_LEN);
        if len == 0 {
            return Err(IdentError::Empty);
        }
        if field[len..].iter().any(|&b| b != 0) {
            return Err(IdentError::TrailingData);
        }
        if let Some(&bad) = field[..len].iter().find(|b| !b.is_ascii_graphic()) {
            return Err(IdentError::InvalidByte(bad));
        }
        Ok(Self {
            bytes: *field,
            len: len as u8,
        })
    }

    /// Returns the NUL-padded field representation.
    #[inline]
    pub fn to_field(&self) -> [u8; IDENT_LEN] {
        self.bytes
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII graphic bytes.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    /// Returns true if this identifier equals `s`.
    #[inline]
    pub fn matches(&self, s: &str) -> bool {
        self.as_str() == s
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ident({:?})", self.as_str())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Ident {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}
