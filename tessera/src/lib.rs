//! Umbrella crate re-exporting the Tessera component crates.
//!
//! Tessera persists dense and sparse multi-dimensional arrays as
//! append-only sets of immutable fragments. See `tessera-fragment` for the
//! core: fragment layout, versioned metadata, and tile-overlap geometry.

#![deny(missing_docs)]

pub use tessera_dtype as dtype;
pub use tessera_error as error;
pub use tessera_fragment as fragment;

pub use tessera_dtype::{CellValNum, Datatype, Nullability};
pub use tessera_error::{TesseraError, TesseraResult};
pub use tessera_fragment::{
    ArrayDirectory, ArraySchema, Attribute, Config, Dimension, Domain, FragmentInfo,
    FragmentMetadata, Layout, MemoryTracker, NDRange, RTree, Range, Resources, TileOverlap, Uri,
};
