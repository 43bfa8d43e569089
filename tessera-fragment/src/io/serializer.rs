use tessera_dtype::{ToBytes, TryFromBytes};
use tessera_error::{tessera_err, TesseraResult};

/// An append-only little-endian byte sink for one metadata section.
#[derive(Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    /// Create an empty serializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one fixed-width value.
    pub fn write<T: ToBytes>(&mut self, value: T) {
        self.buf.extend_from_slice(value.to_le_bytes());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a `u64`-count-prefixed vector of `u64`s, the shape shared by
    /// the offsets, sums and null-count sections.
    pub fn write_u64_vec(&mut self, values: &[u64]) {
        self.write(values.len() as u64);
        for v in values {
            self.write(*v);
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the serializer, yielding its buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// A cursor over one section's bytes; every read reports [`Corrupt`] on
/// truncation instead of panicking.
///
/// [`Corrupt`]: tessera_error::TesseraError::Corrupt
#[derive(Debug)]
pub struct Deserializer<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Deserializer<'a> {
    /// Wrap a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Read one fixed-width value.
    pub fn read<T: TryFromBytes>(&mut self) -> TesseraResult<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(size as u64)?;
        T::try_from_le_bytes(bytes)
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: u64) -> TesseraResult<&'a [u8]> {
        let len = usize::try_from(len)
            .map_err(|_| tessera_err!(Corrupt: "section length {} exceeds usize", len))?;
        let end = self.offset.checked_add(len).ok_or_else(
            || tessera_err!(Corrupt: "section read overflows at offset {}", self.offset),
        )?;
        if end > self.buf.len() {
            return Err(tessera_err!(
                Corrupt: "truncated section: needed {} bytes at offset {} of {}",
                len,
                self.offset,
                self.buf.len()
            ));
        }
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    /// Read a `u64`-count-prefixed vector of `u64`s.
    pub fn read_u64_vec(&mut self) -> TesseraResult<Vec<u64>> {
        let n = self.read::<u64>()?;
        if n.saturating_mul(8) > self.remaining() as u64 {
            return Err(tessera_err!(
                Corrupt: "vector of {} entries exceeds its section of {} bytes",
                n,
                self.remaining()
            ));
        }
        let mut values = Vec::with_capacity(usize::try_from(n).unwrap_or(0));
        for _ in 0..n {
            values.push(self.read::<u64>()?);
        }
        Ok(values)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.offset
    }
}
