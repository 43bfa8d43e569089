use bytes::Bytes;
use tessera_error::{tessera_err, TesseraResult};

use crate::io::{Deserializer, EncryptionKey, Serializer};
use crate::{Uri, Vfs};

/// Serialized size of a generic tile header with an empty filter pipeline.
pub const GENERIC_TILE_HEADER_SIZE: u64 = 8 + 8 + 4 + 4 + 4;

/// Version of the filter pipeline serialization carried in the header.
const FILTER_PIPELINE_VERSION: u32 = 1;

/// Reader/writer for the *generic tiles* that make up a fragment metadata
/// file.
///
/// Each generic tile is a self-framed section: a fixed header carrying the
/// persisted and original payload sizes, the format version that wrote it,
/// and a filter pipeline, followed by the payload bytes. Compression and
/// encryption codecs are external concerns; the pipeline written here is
/// empty, so persisted and original sizes always match.
pub struct GenericTileIo<'a> {
    vfs: &'a Vfs,
    uri: Uri,
}

impl<'a> GenericTileIo<'a> {
    /// Create an accessor for the given metadata file.
    pub fn new(vfs: &'a Vfs, uri: Uri) -> Self {
        Self { vfs, uri }
    }

    /// Append one generic tile holding `payload`, returning the total bytes
    /// written (header included).
    pub fn write_generic(
        &self,
        payload: &[u8],
        version: u32,
        encryption_key: &EncryptionKey,
    ) -> TesseraResult<u64> {
        ensure_no_encryption(encryption_key)?;

        let mut header = Serializer::new();
        header.write(payload.len() as u64);
        header.write(payload.len() as u64);
        header.write(version);
        header.write(FILTER_PIPELINE_VERSION);
        header.write(0u32); // empty filter pipeline

        self.vfs.append(&self.uri, &header.into_vec())?;
        self.vfs.append(&self.uri, payload)?;
        Ok(GENERIC_TILE_HEADER_SIZE + payload.len() as u64)
    }

    /// Read the payload of the generic tile starting at `offset`.
    pub fn read_generic(
        &self,
        offset: u64,
        encryption_key: &EncryptionKey,
    ) -> TesseraResult<Bytes> {
        ensure_no_encryption(encryption_key)?;

        let file_size = self.vfs.file_size(&self.uri)?;
        if offset + GENERIC_TILE_HEADER_SIZE > file_size {
            return Err(tessera_err!(
                Corrupt: "generic tile header at {} exceeds file of {} bytes in {}",
                offset,
                file_size,
                self.uri
            ));
        }

        let header_bytes = self.vfs.read(&self.uri, offset, GENERIC_TILE_HEADER_SIZE)?;
        let mut header = Deserializer::new(&header_bytes);
        let persisted_size = header.read::<u64>()?;
        let original_size = header.read::<u64>()?;
        let _min_version = header.read::<u32>()?;
        let _filter_pipeline_version = header.read::<u32>()?;
        let num_filters = header.read::<u32>()?;

        if num_filters != 0 || persisted_size != original_size {
            return Err(tessera_err!(
                Corrupt: "generic tile at {} in {} carries a filter pipeline the core cannot decode",
                offset,
                self.uri
            ));
        }
        if offset + GENERIC_TILE_HEADER_SIZE + persisted_size > file_size {
            return Err(tessera_err!(
                Corrupt: "generic tile payload of {} bytes at {} exceeds file of {} bytes in {}",
                persisted_size,
                offset,
                file_size,
                self.uri
            ));
        }

        self.vfs
            .read(&self.uri, offset + GENERIC_TILE_HEADER_SIZE, persisted_size)
    }
}

fn ensure_no_encryption(key: &EncryptionKey) -> TesseraResult<()> {
    if !key.is_no_encryption() {
        return Err(tessera_err!(
            Unsupported: "encryption codecs are handled outside the fragment core"
        ));
    }
    Ok(())
}
