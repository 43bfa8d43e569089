use std::cmp::Ordering;
use std::fmt::{Debug, Display};

use num_traits::{Bounded, FromPrimitive, Num, NumCast, ToPrimitive};
use tessera_error::{tessera_err, TesseraResult};

use crate::Datatype;

#[cfg(target_endian = "big")]
compile_error!("tessera assumes a little-endian target");

/// A trait for native Rust types that correspond 1:1 to a fixed-width
/// [`Datatype`].
pub trait NativeType:
    Send
    + Sync
    + Clone
    + Copy
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Default
    + Num
    + NumCast
    + FromPrimitive
    + ToPrimitive
    + Bounded
    + ToBytes
    + TryFromBytes
    + 'static
{
    /// The [`Datatype`] that corresponds to this native type.
    const DATATYPE: Datatype;

    /// Whether this instance is NaN. Always `false` for integer types.
    fn is_nan(self) -> bool;

    /// Compare another instance of this type to `self` under a total order.
    fn total_compare(self, other: Self) -> Ordering;
}

macro_rules! native_int_type {
    ($T:ty, $datatype:tt) => {
        impl NativeType for $T {
            const DATATYPE: Datatype = Datatype::$datatype;

            fn is_nan(self) -> bool {
                false
            }

            fn total_compare(self, other: Self) -> Ordering {
                self.cmp(&other)
            }
        }
    };
}

macro_rules! native_float_type {
    ($T:ty, $datatype:tt) => {
        impl NativeType for $T {
            const DATATYPE: Datatype = Datatype::$datatype;

            fn is_nan(self) -> bool {
                <$T>::is_nan(self)
            }

            fn total_compare(self, other: Self) -> Ordering {
                self.total_cmp(&other)
            }
        }
    };
}

native_int_type!(i8, Int8);
native_int_type!(i16, Int16);
native_int_type!(i32, Int32);
native_int_type!(i64, Int64);
native_int_type!(u8, UInt8);
native_int_type!(u16, UInt16);
native_int_type!(u32, UInt32);
native_int_type!(u64, UInt64);
native_float_type!(f32, Float32);
native_float_type!(f64, Float64);

/// Macro to match over each fixed-width [`Datatype`], binding the
/// corresponding native type (from [`NativeType`]).
///
/// Panics on [`Datatype::StringAscii`]; callers handle the string case
/// before dispatching.
#[macro_export]
macro_rules! match_each_native_datatype {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        use $crate::Datatype;
        match $self {
            Datatype::Int8 => __with__! { i8 },
            Datatype::Int16 => __with__! { i16 },
            Datatype::Int32 => __with__! { i32 },
            Datatype::Int64 => __with__! { i64 },
            Datatype::UInt8 => __with__! { u8 },
            Datatype::UInt16 => __with__! { u16 },
            Datatype::UInt32 => __with__! { u32 },
            Datatype::UInt64 => __with__! { u64 },
            Datatype::Float32 => __with__! { f32 },
            Datatype::Float64 => __with__! { f64 },
            Datatype::StringAscii => panic!("unsupported datatype string_ascii"),
        }
    })
}

/// Macro to match over each integer [`Datatype`], binding the corresponding
/// native type (from [`NativeType`]).
#[macro_export]
macro_rules! match_each_integer_datatype {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        use $crate::Datatype;
        match $self {
            Datatype::Int8 => __with__! { i8 },
            Datatype::Int16 => __with__! { i16 },
            Datatype::Int32 => __with__! { i32 },
            Datatype::Int64 => __with__! { i64 },
            Datatype::UInt8 => __with__! { u8 },
            Datatype::UInt16 => __with__! { u16 },
            Datatype::UInt32 => __with__! { u32 },
            Datatype::UInt64 => __with__! { u64 },
            other => panic!("unsupported datatype {}", other),
        }
    })
}

/// Macro to match over each floating point [`Datatype`], binding the
/// corresponding native type (from [`NativeType`]).
#[macro_export]
macro_rules! match_each_float_datatype {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        use $crate::Datatype;
        match $self {
            Datatype::Float32 => __with__! { f32 },
            Datatype::Float64 => __with__! { f64 },
            other => panic!("unsupported datatype {}", other),
        }
    })
}

/// A trait for types that expose their little-endian byte representation.
pub trait ToBytes: Sized {
    /// Returns this value's bytes in little-endian order.
    fn to_le_bytes(&self) -> &[u8];
}

/// A trait for types that can be read back from little-endian bytes.
pub trait TryFromBytes: Sized {
    /// Attempts to convert a little-endian byte slice to this type.
    fn try_from_le_bytes(bytes: &[u8]) -> TesseraResult<Self>;
}

macro_rules! try_from_bytes {
    ($T:ty) => {
        impl ToBytes for $T {
            #[inline]
            #[allow(clippy::size_of_in_element_count)]
            fn to_le_bytes(&self) -> &[u8] {
                // Safe because the target is little-endian, enforced above.
                let raw_ptr = self as *const $T as *const u8;
                unsafe { std::slice::from_raw_parts(raw_ptr, std::mem::size_of::<$T>()) }
            }
        }

        impl TryFromBytes for $T {
            fn try_from_le_bytes(bytes: &[u8]) -> TesseraResult<Self> {
                Ok(<$T>::from_le_bytes(bytes.try_into().map_err(|_| {
                    tessera_err!(
                        Corrupt: "expected {} bytes for {}, got {}",
                        std::mem::size_of::<$T>(),
                        stringify!($T),
                        bytes.len()
                    )
                })?))
            }
        }
    };
}

try_from_bytes!(i8);
try_from_bytes!(i16);
try_from_bytes!(i32);
try_from_bytes!(i64);
try_from_bytes!(u8);
try_from_bytes!(u16);
try_from_bytes!(u32);
try_from_bytes!(u64);
try_from_bytes!(f32);
try_from_bytes!(f64);
