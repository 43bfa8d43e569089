use std::fmt::{Debug, Formatter};

use tessera_dtype::NativeType;
use tessera_error::{tessera_err, TesseraExpect, TesseraResult};

/// A 1-D range over one dimension: the low and high bound packed into a
/// single owned byte buffer.
///
/// For fixed-width dimensions the buffer is `2 * coord_size` bytes, low
/// first. For variable-length (string) dimensions `start_size` records where
/// the low bound ends so the high bound can be recovered.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Range {
    data: Vec<u8>,
    start_size: u64,
    var_size: bool,
}

impl Range {
    /// An empty range.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a fixed-width range from native bounds.
    pub fn fixed<T: NativeType>(low: T, high: T) -> Self {
        let mut data = Vec::with_capacity(2 * std::mem::size_of::<T>());
        data.extend_from_slice(low.to_le_bytes());
        data.extend_from_slice(high.to_le_bytes());
        Self {
            data,
            start_size: 0,
            var_size: false,
        }
    }

    /// Build a fixed-width range from its raw byte image (low then high).
    pub fn from_fixed_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            start_size: 0,
            var_size: false,
        }
    }

    /// Build a variable-length range from its two bounds.
    pub fn var(start: &[u8], end: &[u8]) -> Self {
        let mut data = Vec::with_capacity(start.len() + end.len());
        data.extend_from_slice(start);
        data.extend_from_slice(end);
        Self {
            data,
            start_size: start.len() as u64,
            var_size: true,
        }
    }

    /// Build a variable-length range from its raw byte image and the size of
    /// the low bound.
    pub fn from_var_bytes(data: &[u8], start_size: u64) -> TesseraResult<Self> {
        if start_size > data.len() as u64 {
            return Err(tessera_err!(
                Corrupt: "range start size {} exceeds payload of {} bytes",
                start_size,
                data.len()
            ));
        }
        Ok(Self {
            data: data.to_vec(),
            start_size,
            var_size: true,
        })
    }

    /// Whether this range holds no bounds at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this range is variable-length.
    pub fn is_var(&self) -> bool {
        self.var_size
    }

    /// The raw byte image, low bound then high bound.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total size of the byte image.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Size of the low bound within the byte image.
    pub fn start_size(&self) -> u64 {
        if self.var_size {
            self.start_size
        } else {
            self.data.len() as u64 / 2
        }
    }

    /// Size of the high bound within the byte image.
    pub fn end_size(&self) -> u64 {
        self.size() - self.start_size()
    }

    /// The low bound as raw bytes.
    pub fn start_bytes(&self) -> &[u8] {
        &self.data[..self.start_size() as usize]
    }

    /// The high bound as raw bytes.
    pub fn end_bytes(&self) -> &[u8] {
        &self.data[self.start_size() as usize..]
    }

    /// The low bound of a fixed-width range.
    ///
    /// Panics if the range does not hold a `T`-typed pair; callers validate
    /// the dimension type first.
    pub fn start_as<T: NativeType>(&self) -> T {
        T::try_from_le_bytes(self.start_bytes()).tessera_expect("range start width mismatch")
    }

    /// The high bound of a fixed-width range.
    pub fn end_as<T: NativeType>(&self) -> T {
        T::try_from_le_bytes(self.end_bytes()).tessera_expect("range end width mismatch")
    }

    /// Replace the low bound of a variable-length range.
    pub fn set_start_var(&mut self, start: &[u8]) {
        let end = self.end_bytes().to_vec();
        self.data.clear();
        self.data.extend_from_slice(start);
        self.data.extend_from_slice(&end);
        self.start_size = start.len() as u64;
        self.var_size = true;
    }

    /// Replace the high bound of a variable-length range.
    pub fn set_end_var(&mut self, end: &[u8]) {
        self.data.truncate(self.start_size() as usize);
        self.data.extend_from_slice(end);
        self.var_size = true;
    }
}

impl Debug for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.var_size {
            write!(
                f,
                "Range[{:?}, {:?}]",
                String::from_utf8_lossy(self.start_bytes()),
                String::from_utf8_lossy(self.end_bytes())
            )
        } else {
            write!(f, "Range[{:x?}, {:x?}]", self.start_bytes(), self.end_bytes())
        }
    }
}

/// An n-dimensional range: one [`Range`] per dimension, in dimension order.
/// Empty iff the fragment holds no cells.
pub type NDRange = Vec<Range>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_round_trip() {
        let r = Range::fixed(-5i32, 17i32);
        assert_eq!(r.size(), 8);
        assert_eq!(r.start_size(), 4);
        assert_eq!(r.start_as::<i32>(), -5);
        assert_eq!(r.end_as::<i32>(), 17);

        let r2 = Range::from_fixed_bytes(r.data());
        assert_eq!(r, r2);
    }

    #[test]
    fn var_round_trip() {
        let r = Range::var(b"alice", b"dan");
        assert_eq!(r.start_bytes(), b"alice");
        assert_eq!(r.end_bytes(), b"dan");
        assert_eq!(r.start_size(), 5);
        assert_eq!(r.end_size(), 3);

        let r2 = Range::from_var_bytes(r.data(), r.start_size()).unwrap();
        assert_eq!(r, r2);
        assert!(Range::from_var_bytes(b"abc", 9).is_err());
    }

    #[test]
    fn var_bound_updates() {
        let mut r = Range::var(b"bb", b"cc");
        r.set_start_var(b"a");
        assert_eq!(r.start_bytes(), b"a");
        assert_eq!(r.end_bytes(), b"cc");
        r.set_end_var(b"dddd");
        assert_eq!(r.start_bytes(), b"a");
        assert_eq!(r.end_bytes(), b"dddd");
    }

    #[test]
    fn empty_range() {
        let r = Range::empty();
        assert!(r.is_empty());
        assert_eq!(r.size(), 0);
    }
}
