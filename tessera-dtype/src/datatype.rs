use std::fmt::{Display, Formatter};

use tessera_error::{tessera_err, TesseraError};

/// The physical type of a dimension or attribute column.
///
/// This is a closed set: dimension geometry, statistics applicability and the
/// on-disk format are all defined over exactly these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// An 8-bit signed integer
    Int8,
    /// A 16-bit signed integer
    Int16,
    /// A 32-bit signed integer
    Int32,
    /// A 64-bit signed integer
    Int64,
    /// An 8-bit unsigned integer
    UInt8,
    /// A 16-bit unsigned integer
    UInt16,
    /// A 32-bit unsigned integer
    UInt32,
    /// A 64-bit unsigned integer
    UInt64,
    /// A 32-bit floating point number
    Float32,
    /// A 64-bit floating point number
    Float64,
    /// ASCII bytes; the only type valid for variable-length dimensions
    StringAscii,
}

impl Datatype {
    /// Size of one value in bytes (1 for [`Datatype::StringAscii`]).
    pub const fn size(&self) -> u64 {
        match self {
            Self::Int8 | Self::UInt8 | Self::StringAscii => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Returns `true` iff this is a signed integer type.
    pub const fn is_signed_int(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Returns `true` iff this is an unsigned integer type.
    pub const fn is_unsigned_int(&self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    /// Returns `true` iff this is an integer type.
    pub const fn is_integer(&self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    /// Returns `true` iff this is a floating point type.
    pub const fn is_real(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Returns `true` iff this is the string type.
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::StringAscii)
    }

    /// Returns `true` iff a dimension may be declared with this type.
    pub const fn is_valid_dimension_type(&self) -> bool {
        self.is_integer() || self.is_real() || self.is_string()
    }

    /// A stable numeric id, used where a type tag crosses a serialization
    /// boundary.
    pub const fn id(&self) -> u8 {
        match self {
            Self::Int8 => 0,
            Self::Int16 => 1,
            Self::Int32 => 2,
            Self::Int64 => 3,
            Self::UInt8 => 4,
            Self::UInt16 => 5,
            Self::UInt32 => 6,
            Self::UInt64 => 7,
            Self::Float32 => 8,
            Self::Float64 => 9,
            Self::StringAscii => 10,
        }
    }

    /// Inverse of [`Datatype::id`].
    pub fn try_from_id(id: u8) -> Result<Self, TesseraError> {
        Ok(match id {
            0 => Self::Int8,
            1 => Self::Int16,
            2 => Self::Int32,
            3 => Self::Int64,
            4 => Self::UInt8,
            5 => Self::UInt16,
            6 => Self::UInt32,
            7 => Self::UInt64,
            8 => Self::Float32,
            9 => Self::Float64,
            10 => Self::StringAscii,
            _ => return Err(tessera_err!(Corrupt: "unknown datatype id {}", id)),
        })
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int8 => write!(f, "int8"),
            Self::Int16 => write!(f, "int16"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::UInt8 => write!(f, "uint8"),
            Self::UInt16 => write!(f, "uint16"),
            Self::UInt32 => write!(f, "uint32"),
            Self::UInt64 => write!(f, "uint64"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::StringAscii => write!(f, "string_ascii"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Datatype; 11] = [
        Datatype::Int8,
        Datatype::Int16,
        Datatype::Int32,
        Datatype::Int64,
        Datatype::UInt8,
        Datatype::UInt16,
        Datatype::UInt32,
        Datatype::UInt64,
        Datatype::Float32,
        Datatype::Float64,
        Datatype::StringAscii,
    ];

    #[test]
    fn sizes() {
        assert_eq!(Datatype::Int8.size(), 1);
        assert_eq!(Datatype::UInt16.size(), 2);
        assert_eq!(Datatype::Int32.size(), 4);
        assert_eq!(Datatype::Float64.size(), 8);
        assert_eq!(Datatype::StringAscii.size(), 1);
    }

    #[test]
    fn id_round_trip() {
        for dt in ALL {
            assert_eq!(Datatype::try_from_id(dt.id()).unwrap(), dt);
        }
        assert!(Datatype::try_from_id(200).is_err());
    }

    #[test]
    fn classification() {
        assert!(Datatype::Int64.is_integer());
        assert!(Datatype::UInt8.is_integer());
        assert!(!Datatype::Float32.is_integer());
        assert!(Datatype::Float32.is_real());
        assert!(Datatype::StringAscii.is_string());
        assert!(!Datatype::StringAscii.is_integer());
    }
}
