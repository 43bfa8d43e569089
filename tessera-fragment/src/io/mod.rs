//! Binary serialization helpers and the generic-tile codec of the fragment
//! metadata file.

mod generic_tile;
mod serializer;

pub use generic_tile::*;
pub use serializer::*;

use bytes::Bytes;

/// Key material threaded through metadata reads and writes.
///
/// Encryption itself is an external codec concern; the fragment layer only
/// carries the key to the tile I/O boundary.
#[derive(Debug, Clone, Default)]
pub struct EncryptionKey {
    key: Option<Bytes>,
}

impl EncryptionKey {
    /// A key representing an unencrypted array.
    pub fn no_encryption() -> Self {
        Self::default()
    }

    /// Create a key from raw material.
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    /// Whether this key represents an unencrypted array.
    pub fn is_no_encryption(&self) -> bool {
        self.key.is_none()
    }
}
