//! The error type and result alias shared by all Tessera crates, along with
//! the `tessera_err!` / `tessera_bail!` / `tessera_panic!` macros used to
//! construct and raise them.

#![deny(missing_docs)]

use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

mod ext;

pub use ext::*;

/// A string that can be owned or a `'static` reference.
///
/// Error messages are almost always literals or `format!` products; this
/// avoids an allocation for the former.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        ErrString(msg.into())
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The top-level error type for Tessera operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TesseraError {
    /// A malformed range, out-of-bounds coordinate, NaN bound, unknown
    /// column name, or otherwise invalid argument.
    #[error("invalid: {0}")]
    Invalid(ErrString),
    /// An accessor was called before the metadata section backing it was
    /// loaded.
    #[error("not loaded: {0}")]
    NotLoaded(ErrString),
    /// A statistic was requested that the column's type does not maintain.
    #[error("not applicable: {0}")]
    NotApplicable(ErrString),
    /// The memory tracker refused a reservation.
    #[error("out of memory: needed {requested} bytes but only {available} available from budget {budget}")]
    OutOfMemory {
        /// Bytes the operation asked for.
        requested: u64,
        /// Bytes still available under the budget.
        available: u64,
        /// The configured budget.
        budget: u64,
    },
    /// On-disk state that cannot be interpreted: a section exceeding its
    /// enclosing tile, a non-monotonic offset vector, a footer size pointing
    /// outside the file, a truncated buffer.
    #[error("corrupt: {0}")]
    Corrupt(ErrString),
    /// An operation outside the supported surface, e.g. storing a format
    /// version below the writable floor.
    #[error("unsupported: {0}")]
    Unsupported(ErrString),
    /// An underlying I/O failure.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// A wrapped error with an additional message.
    #[error("{0}: {1}")]
    Context(ErrString, Box<TesseraError>),
}

impl TesseraError {
    /// Wrap this error with an additional context message.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        TesseraError::Context(msg.into(), Box::new(self))
    }
}

/// A specialized [`Result`] for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// Construct a [`TesseraError`].
///
/// `tessera_err!(Kind: "format", args...)` builds the given kind;
/// `tessera_err!(OutOfMemory: requested, available, budget)` builds the
/// structured out-of-memory variant; a bare format string defaults to
/// [`TesseraError::Invalid`].
#[macro_export]
macro_rules! tessera_err {
    (OutOfMemory: $requested:expr, $available:expr, $budget:expr) => {
        $crate::TesseraError::OutOfMemory {
            requested: $requested,
            available: $available,
            budget: $budget,
        }
    };
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::TesseraError::$variant(format!($fmt, $($arg),*).into())
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_err!(Invalid: $fmt, $($arg),*)
    };
}

/// Return early with a [`TesseraError`], `bail!`-style.
#[macro_export]
macro_rules! tessera_bail {
    ($($tt:tt)+) => {
        return Err($crate::tessera_err!($($tt)+))
    };
}

/// Panic with a formatted message.
///
/// Reserved for violated internal invariants; anything reachable from user
/// input must return a [`TesseraError`] instead.
#[macro_export]
macro_rules! tessera_panic {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        panic!("{}", $crate::tessera_err!($variant: $fmt, $($arg),*))
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        panic!("{}", $crate::tessera_err!($fmt, $($arg),*))
    };
}
