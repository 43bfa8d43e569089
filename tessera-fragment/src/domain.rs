use std::fmt::{Display, Formatter};

use num_traits::ToPrimitive;
use tessera_dtype::match_each_integer_datatype;
use tessera_error::{tessera_err, TesseraError, TesseraResult};

use crate::hilbert::{hilbert_bits, hilbert_index};
use crate::{Dimension, NDRange, Range};

/// Order in which cells or tiles are laid out within their enclosing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Last dimension varies fastest.
    RowMajor,
    /// First dimension varies fastest.
    ColMajor,
    /// Cells follow the Hilbert space-filling curve over bucketed
    /// coordinates. Valid as a cell order only.
    Hilbert,
}

impl Layout {
    /// A stable numeric id for serialization boundaries.
    pub const fn id(&self) -> u8 {
        match self {
            Self::RowMajor => 0,
            Self::ColMajor => 1,
            Self::Hilbert => 2,
        }
    }

    /// Inverse of [`Layout::id`].
    pub fn try_from_id(id: u8) -> TesseraResult<Self> {
        Ok(match id {
            0 => Self::RowMajor,
            1 => Self::ColMajor,
            2 => Self::Hilbert,
            _ => return Err(tessera_err!(Corrupt: "unknown layout id {}", id)),
        })
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowMajor => write!(f, "row-major"),
            Self::ColMajor => write!(f, "col-major"),
            Self::Hilbert => write!(f, "hilbert"),
        }
    }
}

/// The ordered dimensions of an array, together with its cell and tile
/// layout.
///
/// The tile layout maps a vector of per-dimension tile indices to a linear
/// tile id; it is meaningless (and ignored) when any dimension is
/// var-sized, since such arrays have no tile grid.
#[derive(Debug)]
pub struct Domain {
    dimensions: Vec<Dimension>,
    cell_order: Layout,
    tile_order: Layout,
}

impl Domain {
    /// Create a domain. The tile order must be row- or column-major.
    pub fn new(
        dimensions: Vec<Dimension>,
        cell_order: Layout,
        tile_order: Layout,
    ) -> TesseraResult<Self> {
        if dimensions.is_empty() {
            return Err(tessera_err!(Invalid: "domain needs at least one dimension"));
        }
        if tile_order == Layout::Hilbert {
            return Err(tessera_err!(Invalid: "hilbert is a cell order, not a tile order"));
        }
        for (i, dim) in dimensions.iter().enumerate() {
            if dimensions[..i].iter().any(|d| d.name() == dim.name()) {
                return Err(tessera_err!(
                    Invalid: "duplicate dimension name '{}'", dim.name()
                ));
            }
        }
        Ok(Self {
            dimensions,
            cell_order,
            tile_order,
        })
    }

    /// Number of dimensions.
    pub fn dim_num(&self) -> usize {
        self.dimensions.len()
    }

    /// The `d`-th dimension.
    pub fn dimension(&self, d: usize) -> &Dimension {
        &self.dimensions[d]
    }

    /// All dimensions in order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Index of the named dimension.
    pub fn dim_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name() == name)
    }

    /// The cell layout.
    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// The tile layout.
    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    /// Whether every dimension is fixed-width.
    pub fn all_dims_fixed(&self) -> bool {
        self.dimensions.iter().all(|d| !d.var_size())
    }

    /// Whether every dimension has the same datatype.
    pub fn all_dims_same_type(&self) -> bool {
        self.dimensions
            .iter()
            .all(|d| d.datatype() == self.dimensions[0].datatype())
    }

    /// Whether every dimension has a tile extent.
    pub fn all_dims_have_extents(&self) -> bool {
        self.dimensions.iter().all(|d| d.tile_extent().is_some())
    }

    /// The full array domain as an [`NDRange`].
    pub fn domain_ndrange(&self) -> NDRange {
        self.dimensions.iter().map(|d| d.domain().clone()).collect()
    }

    /// Number of cells in one full tile: the product of the integer tile
    /// extents, or 0 when a dimension has no extent or a non-integer type.
    pub fn cell_num_per_tile(&self) -> u64 {
        let mut cells: u64 = 1;
        for dim in &self.dimensions {
            if dim.tile_extent().is_none() || !dim.datatype().is_integer() {
                return 0;
            }
            let extent = match_each_integer_datatype!(dim.datatype(), |$T| {
                dim.tile_extent_as::<$T>().map(|e| e.to_u64().unwrap_or(0)).unwrap_or(0)
            });
            cells = cells.saturating_mul(extent);
        }
        cells
    }

    /// Snap every 1-D range outward to tile boundaries (noop per dimension
    /// for real domains and missing extents).
    pub fn expand_to_tiles(&self, ndrange: &mut NDRange) {
        for (dim, r) in self.dimensions.iter().zip(ndrange.iter_mut()) {
            dim.expand_to_tile(r);
        }
    }

    /// Intersect every 1-D range with its dimension domain.
    pub fn crop_ndrange(&self, ndrange: &mut NDRange) {
        for (dim, r) in self.dimensions.iter().zip(ndrange.iter_mut()) {
            dim.crop_range(r);
        }
    }

    /// Expand `dst` to also cover `src`, dimension by dimension.
    pub fn expand_ndrange(&self, src: &NDRange, dst: &mut NDRange) {
        if dst.is_empty() {
            *dst = src.clone();
            return;
        }
        for (d, dim) in self.dimensions.iter().enumerate() {
            dim.expand_range(&src[d], &mut dst[d]);
        }
    }

    /// Number of tiles intersecting `ndrange`: the product of the
    /// per-dimension tile counts.
    pub fn tile_num(&self, ndrange: &NDRange) -> u64 {
        let mut tiles: u64 = 1;
        for (dim, r) in self.dimensions.iter().zip(ndrange.iter()) {
            tiles = tiles.saturating_mul(dim.tile_num(r));
        }
        tiles
    }

    /// Map a vector of per-dimension tile indices within `domain` to a
    /// linear tile id under the tile layout.
    pub fn tile_pos(&self, domain: &NDRange, tile_coords: &[u64]) -> u64 {
        let counts: Vec<u64> = self
            .dimensions
            .iter()
            .zip(domain.iter())
            .map(|(dim, r)| dim.tile_num(r))
            .collect();
        match self.tile_order {
            Layout::RowMajor => {
                let mut pos = 0u64;
                for d in 0..self.dim_num() {
                    pos = pos * counts[d] + tile_coords[d];
                }
                pos
            }
            Layout::ColMajor => {
                let mut pos = 0u64;
                for d in (0..self.dim_num()).rev() {
                    pos = pos * counts[d] + tile_coords[d];
                }
                pos
            }
            Layout::Hilbert => unreachable!("hilbert tile order is rejected at construction"),
        }
    }

    /// Advance a tile coordinate vector to the next position inside the
    /// inclusive per-dimension bounds of `tile_domain`, in tile-layout
    /// order. Returns `false` once the vector has moved past the last
    /// position.
    pub fn get_next_tile_coords(&self, tile_domain: &[(u64, u64)], coords: &mut [u64]) -> bool {
        let dim_num = self.dim_num();
        let order: Vec<usize> = match self.tile_order {
            Layout::RowMajor => (0..dim_num).rev().collect(),
            Layout::ColMajor => (0..dim_num).collect(),
            Layout::Hilbert => unreachable!("hilbert tile order is rejected at construction"),
        };
        for d in order {
            if coords[d] < tile_domain[d].1 {
                coords[d] += 1;
                return true;
            }
            coords[d] = tile_domain[d].0;
        }
        false
    }

    /// The full rectangle of the tile at `tile_coords` within `domain`.
    pub fn get_tile_subarray(&self, domain: &NDRange, tile_coords: &[u64]) -> NDRange {
        self.dimensions
            .iter()
            .enumerate()
            .map(|(d, dim)| {
                let low = dim.tile_coord_low(tile_coords[d], domain[d].start_bytes());
                let high = dim.tile_coord_high(tile_coords[d], domain[d].start_bytes());
                let mut bytes = low;
                bytes.extend_from_slice(&high);
                Range::from_fixed_bytes(&bytes)
            })
            .collect()
    }

    /// The Hilbert index of a cell, used when the cell order is
    /// [`Layout::Hilbert`]: each coordinate is bucketed through
    /// [`Dimension::map_to_uint64`] and the buckets are interleaved.
    pub fn hilbert_cell_index(&self, coords: &[&[u8]]) -> u64 {
        let bits = hilbert_bits(self.dim_num());
        let max_bucket = (1u64 << bits) - 1;
        let buckets: Vec<u64> = self
            .dimensions
            .iter()
            .zip(coords.iter())
            .map(|(dim, coord)| dim.map_to_uint64(coord, bits, max_bucket))
            .collect();
        hilbert_index(&buckets, bits)
    }

    /// Validate that a subarray has one in-domain range per dimension.
    pub fn check_subarray(&self, subarray: &NDRange) -> TesseraResult<()> {
        if subarray.len() != self.dim_num() {
            return Err(tessera_err!(
                Invalid: "subarray has {} ranges for {} dimensions",
                subarray.len(),
                self.dim_num()
            ));
        }
        for (dim, r) in self.dimensions.iter().zip(subarray.iter()) {
            dim.check_range(r)
                .map_err(|e: TesseraError| e.with_context("invalid subarray"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_dtype::Datatype;

    fn domain_2d(tile_order: Layout) -> Domain {
        Domain::new(
            vec![
                Dimension::new("x", 0i64, 99i64, Some(10i64)).unwrap(),
                Dimension::new("y", 0i64, 99i64, Some(10i64)).unwrap(),
            ],
            Layout::RowMajor,
            tile_order,
        )
        .unwrap()
    }

    #[test]
    fn cell_num_per_tile_is_extent_product() {
        let domain = domain_2d(Layout::RowMajor);
        assert_eq!(domain.cell_num_per_tile(), 100);
    }

    #[test]
    fn tile_pos_row_vs_col_major() {
        let domain_row = domain_2d(Layout::RowMajor);
        let domain_col = domain_2d(Layout::ColMajor);
        let full = domain_row.domain_ndrange();

        // 10x10 tile grid; coords (2, 3).
        assert_eq!(domain_row.tile_pos(&full, &[2, 3]), 23);
        assert_eq!(domain_col.tile_pos(&full, &[2, 3]), 32);
    }

    #[test]
    fn next_tile_coords_walks_layout_order() {
        let domain = domain_2d(Layout::RowMajor);
        let bounds = [(1u64, 2u64), (5u64, 6u64)];
        let mut coords = vec![1u64, 5];
        let mut visited = vec![coords.clone()];
        while domain.get_next_tile_coords(&bounds, &mut coords) {
            visited.push(coords.clone());
        }
        assert_eq!(
            visited,
            vec![vec![1, 5], vec![1, 6], vec![2, 5], vec![2, 6]]
        );
    }

    #[test]
    fn expand_and_crop() {
        let domain = domain_2d(Layout::RowMajor);
        let mut nd = vec![Range::fixed(13i64, 27i64), Range::fixed(5i64, 5i64)];
        domain.expand_to_tiles(&mut nd);
        assert_eq!(nd[0], Range::fixed(10i64, 29i64));
        assert_eq!(nd[1], Range::fixed(0i64, 9i64));

        let mut nd = vec![Range::fixed(-5i64, 500i64), Range::fixed(0i64, 3i64)];
        domain.crop_ndrange(&mut nd);
        assert_eq!(nd[0], Range::fixed(0i64, 99i64));
        assert_eq!(nd[1], Range::fixed(0i64, 3i64));
    }

    #[test]
    fn tile_num_of_subarray() {
        let domain = domain_2d(Layout::RowMajor);
        let nd = vec![Range::fixed(5i64, 25i64), Range::fixed(0i64, 9i64)];
        assert_eq!(domain.tile_num(&nd), 3);
    }

    #[test]
    fn tile_subarray_rect() {
        let domain = domain_2d(Layout::RowMajor);
        let full = domain.domain_ndrange();
        let rect = domain.get_tile_subarray(&full, &[2, 0]);
        assert_eq!(rect[0], Range::fixed(20i64, 29i64));
        assert_eq!(rect[1], Range::fixed(0i64, 9i64));
    }

    #[test]
    fn hilbert_cell_index_spreads() {
        let domain = domain_2d(Layout::RowMajor);
        let a = domain.hilbert_cell_index(&[&0i64.to_le_bytes(), &0i64.to_le_bytes()]);
        let b = domain.hilbert_cell_index(&[&99i64.to_le_bytes(), &99i64.to_le_bytes()]);
        assert_ne!(a, b);
    }

    #[test]
    fn var_dims_make_domain_heterogeneous() {
        let domain = Domain::new(
            vec![
                Dimension::new_var("s").unwrap(),
                Dimension::new("x", 0i32, 9i32, Some(2i32)).unwrap(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap();
        assert!(!domain.all_dims_fixed());
        assert!(!domain.all_dims_same_type());
        assert_eq!(domain.cell_num_per_tile(), 0);
        assert_eq!(domain.dimension(0).datatype(), Datatype::StringAscii);
    }

    #[test]
    fn construction_rejects_bad_shapes() {
        assert!(Domain::new(vec![], Layout::RowMajor, Layout::RowMajor).is_err());
        assert!(Domain::new(
            vec![Dimension::new("x", 0i32, 9i32, None).unwrap()],
            Layout::RowMajor,
            Layout::Hilbert,
        )
        .is_err());
        assert!(Domain::new(
            vec![
                Dimension::new("x", 0i32, 9i32, None).unwrap(),
                Dimension::new("x", 0i32, 9i32, None).unwrap(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .is_err());
    }
}
