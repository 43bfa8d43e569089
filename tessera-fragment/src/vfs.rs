use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use tessera_error::TesseraResult;

use crate::Uri;

/// A minimal virtual filesystem over `std::fs`.
///
/// The full VFS abstraction (cloud backends, async scheduling, read-ahead)
/// is an external collaborator; the fragment layer only needs the narrow
/// contract below, all calls synchronous and all failures surfacing as
/// [`TesseraError::IoError`](tessera_error::TesseraError).
#[derive(Debug, Default)]
pub struct Vfs {}

impl Vfs {
    /// Create a VFS rooted at the local filesystem.
    pub fn new() -> Self {
        Self {}
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read(&self, uri: &Uri, offset: u64, len: u64) -> TesseraResult<Bytes> {
        let mut file = File::open(uri.as_path())?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; usize::try_from(len).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "read length exceeds usize")
        })?];
        file.read_exact(&mut buf)?;
        log::debug!("vfs read {} bytes at {} from {}", len, offset, uri);
        Ok(Bytes::from(buf))
    }

    /// Append `data` to the file, creating it if absent.
    pub fn append(&self, uri: &Uri, data: &[u8]) -> TesseraResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(uri.as_path())?;
        file.write_all(data)?;
        log::debug!("vfs appended {} bytes to {}", data.len(), uri);
        Ok(())
    }

    /// Flush a file previously written with [`Vfs::append`].
    pub fn sync(&self, uri: &Uri) -> TesseraResult<()> {
        OpenOptions::new()
            .append(true)
            .open(uri.as_path())?
            .sync_all()?;
        Ok(())
    }

    /// The file's size in bytes.
    pub fn file_size(&self, uri: &Uri) -> TesseraResult<u64> {
        Ok(std::fs::metadata(uri.as_path())?.len())
    }

    /// Whether the path exists and is a regular file.
    pub fn is_file(&self, uri: &Uri) -> bool {
        uri.as_path().is_file()
    }

    /// Whether the path exists and is a directory.
    pub fn is_dir(&self, uri: &Uri) -> bool {
        uri.as_path().is_dir()
    }

    /// Remove a file, tolerating it already being gone.
    pub fn remove_file(&self, uri: &Uri) -> TesseraResult<()> {
        match std::fs::remove_file(uri.as_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a directory and its parents.
    pub fn create_dir(&self, uri: &Uri) -> TesseraResult<()> {
        std::fs::create_dir_all(uri.as_path())?;
        Ok(())
    }

    /// List the immediate children of a directory.
    pub fn ls(&self, uri: &Uri) -> TesseraResult<Vec<Uri>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(uri.as_path())? {
            entries.push(Uri::new(entry?.path()));
        }
        entries.sort();
        Ok(entries)
    }
}
