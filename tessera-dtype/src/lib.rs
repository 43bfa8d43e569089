//! Datatype definitions for Tessera.
//!
//! A [`Datatype`] tags the physical type of a dimension or attribute column.
//! The [`NativeType`] trait binds each fixed-width tag to its native Rust
//! type, and the `match_each_*` macros dispatch generic code over the closed
//! set of tags, so type-specific behavior is resolved once rather than
//! matched on every call.

#![deny(missing_docs)]

mod cell_val_num;
mod datatype;
mod native;
mod nullability;

pub use cell_val_num::*;
pub use datatype::*;
pub use native::*;
pub use nullability::*;
