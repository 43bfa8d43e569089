use crate::{TesseraError, TesseraResult};

/// Extension trait for expect-style unwrapping that panics with a
/// [`TesseraError`]-formatted message.
///
/// Use only where the caller has already established the invariant; errors
/// reachable from user input must propagate as values.
pub trait TesseraExpect {
    /// The unwrapped type.
    type Output;

    /// Unwrap, panicking with `msg` on failure.
    fn tessera_expect(self, msg: &str) -> Self::Output;
}

impl<T> TesseraExpect for TesseraResult<T> {
    type Output = T;

    #[inline(always)]
    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|e| panic!("{msg}: {e}"))
    }
}

impl<T> TesseraExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| panic!("{msg}"))
    }
}

/// Extension trait for unwrapping without a caller-supplied message,
/// panicking with the error's own display.
///
/// Like [`TesseraExpect`], this is reserved for violated internal
/// invariants; anything reachable from user input must return a
/// [`TesseraError`] instead.
pub trait TesseraUnwrap {
    /// The unwrapped type.
    type Output;

    /// Unwrap, panicking with the error on failure.
    fn tessera_unwrap(self) -> Self::Output;
}

impl<T> TesseraUnwrap for TesseraResult<T> {
    type Output = T;

    #[inline(always)]
    fn tessera_unwrap(self) -> Self::Output {
        self.unwrap_or_else(|e| panic!("{e}"))
    }
}

impl<T> TesseraUnwrap for Option<T> {
    type Output = T;

    #[inline(always)]
    fn tessera_unwrap(self) -> Self::Output {
        self.unwrap_or_else(|| panic!("unwrapped an empty Option"))
    }
}

/// Extension trait for [`Result`]s whose error converts into
/// [`TesseraError`].
pub trait ResultExt<T> {
    /// Map the error into a [`TesseraError`] with an added context message.
    fn context(self, msg: &'static str) -> TesseraResult<T>;
}

impl<T, E: Into<TesseraError>> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &'static str) -> TesseraResult<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}
