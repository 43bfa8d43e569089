use num_traits::AsPrimitive;
use tessera_dtype::{
    match_each_float_datatype, match_each_integer_datatype, CellValNum, Datatype, NativeType,
    TryFromBytes,
};
use tessera_error::{tessera_err, TesseraExpect, TesseraResult};

use crate::Range;

/// An array dimension: name, datatype, domain and tile extent, plus the
/// coordinate geometry the fragment layer needs over them.
///
/// Immutable after construction. Every type-dependent operation dispatches
/// through a table of function references ([`DimensionOps`]) resolved once
/// from the datatype, so a call is a single indirect jump rather than a
/// per-call match.
pub struct Dimension {
    name: String,
    datatype: Datatype,
    cell_val_num: CellValNum,
    domain: Range,
    tile_extent: Option<Vec<u8>>,
    ops: DimensionOps,
}

impl std::fmt::Debug for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dimension")
            .field("name", &self.name)
            .field("datatype", &self.datatype)
            .field("cell_val_num", &self.cell_val_num)
            .field("domain", &self.domain)
            .finish()
    }
}

impl Dimension {
    /// Create a fixed-width dimension.
    pub fn new<T: NativeType>(
        name: impl Into<String>,
        domain_low: T,
        domain_high: T,
        tile_extent: Option<T>,
    ) -> TesseraResult<Self> {
        let domain = Range::fixed(domain_low, domain_high);
        let extent = tile_extent.map(|e| e.to_le_bytes().to_vec());
        Self::from_parts(
            name.into(),
            T::DATATYPE,
            CellValNum::Single,
            domain,
            extent,
        )
    }

    /// Create a variable-length string dimension. Such a dimension has no
    /// domain and no tile extent.
    pub fn new_var(name: impl Into<String>) -> TesseraResult<Self> {
        Self::from_parts(
            name.into(),
            Datatype::StringAscii,
            CellValNum::Var,
            Range::empty(),
            None,
        )
    }

    /// Create a dimension from raw parts, validating domain and tile extent.
    pub fn from_parts(
        name: String,
        datatype: Datatype,
        cell_val_num: CellValNum,
        domain: Range,
        tile_extent: Option<Vec<u8>>,
    ) -> TesseraResult<Self> {
        if !datatype.is_valid_dimension_type() {
            return Err(tessera_err!(
                Invalid: "datatype {} is not valid for dimension '{}'", datatype, name
            ));
        }

        if cell_val_num.is_var() {
            if !datatype.is_string() {
                return Err(tessera_err!(
                    Invalid: "only string dimensions may be var-sized, got {} on '{}'",
                    datatype,
                    name
                ));
            }
            if !domain.is_empty() || tile_extent.is_some() {
                return Err(tessera_err!(
                    Invalid: "var-sized dimension '{}' cannot carry a domain or tile extent", name
                ));
            }
        } else {
            if datatype.is_string() {
                return Err(tessera_err!(
                    Invalid: "string dimension '{}' must be var-sized", name
                ));
            }
            if domain.size() != 2 * datatype.size() {
                return Err(tessera_err!(
                    Invalid: "domain of dimension '{}' must hold two {} values", name, datatype
                ));
            }
        }

        let dim = Self {
            name,
            datatype,
            cell_val_num,
            domain,
            tile_extent,
            ops: DimensionOps::for_datatype(datatype, cell_val_num.is_var()),
        };
        if !dim.var_size() {
            dim.check_domain()?;
            dim.check_tile_extent()?;
        }
        Ok(dim)
    }

    /// The dimension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dimension datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// The number of values per coordinate.
    pub fn cell_val_num(&self) -> CellValNum {
        self.cell_val_num
    }

    /// Whether coordinates are variable-length.
    pub fn var_size(&self) -> bool {
        self.cell_val_num.is_var()
    }

    /// Size in bytes of one fixed-width coordinate.
    pub fn coord_size(&self) -> u64 {
        self.datatype.size()
    }

    /// The dimension domain (empty for var-sized dimensions).
    pub fn domain(&self) -> &Range {
        &self.domain
    }

    /// The tile extent's byte image, if one is set.
    pub fn tile_extent(&self) -> Option<&[u8]> {
        self.tile_extent.as_deref()
    }

    /// The tile extent as a native value.
    pub fn tile_extent_as<T: NativeType>(&self) -> Option<T> {
        self.tile_extent.as_deref().map(|bytes| {
            T::try_from_le_bytes(bytes).tessera_expect("tile extent width mismatch")
        })
    }

    /// Index of the tile containing coordinate `v`, relative to the grid
    /// anchored at `low`. Requires a tile extent.
    pub fn tile_idx(&self, v: &[u8], low: &[u8]) -> u64 {
        (self.ops.tile_idx)(self, v, low)
    }

    /// Round `v` down to the start of its tile in the grid anchored at
    /// `low`.
    pub fn round_to_tile(&self, v: &[u8], low: &[u8]) -> Vec<u8> {
        (self.ops.round_to_tile)(self, v, low)
    }

    /// The first coordinate of tile `k` in the grid anchored at `low`.
    pub fn tile_coord_low(&self, k: u64, low: &[u8]) -> Vec<u8> {
        (self.ops.tile_coord_low)(self, k, low)
    }

    /// The last coordinate of tile `k` in the grid anchored at `low`.
    pub fn tile_coord_high(&self, k: u64, low: &[u8]) -> Vec<u8> {
        (self.ops.tile_coord_high)(self, k, low)
    }

    /// The value at the end of the `k`-th tile past the start of `r`.
    pub fn ceil_to_tile(&self, r: &Range, k: u64) -> Vec<u8> {
        (self.ops.ceil_to_tile)(self, r, k)
    }

    /// Validate an externally supplied range against this dimension.
    pub fn check_range(&self, r: &Range) -> TesseraResult<()> {
        (self.ops.check_range)(self, r)
    }

    /// Whether both bounds of `r` sit on tile boundaries.
    pub fn coincides_with_tiles(&self, r: &Range) -> bool {
        (self.ops.coincides_with_tiles)(self, r)
    }

    /// Clamp `r` to the dimension domain. Noop for var-sized dimensions.
    pub fn crop_range(&self, r: &mut Range) {
        (self.ops.crop_range)(self, r)
    }

    /// Width `high − low + 1` of `r` for integer dimensions, saturating to
    /// `u64::MAX`; `u64::MAX` for all other types.
    pub fn domain_range(&self, r: &Range) -> u64 {
        (self.ops.domain_range)(r)
    }

    /// Expand `r2` to also cover `r1`.
    pub fn expand_range(&self, r1: &Range, r2: &mut Range) {
        (self.ops.expand_range)(r1, r2)
    }

    /// Expand `r` to also cover the single coordinate `v`.
    pub fn expand_range_v(&self, v: &[u8], r: &mut Range) {
        (self.ops.expand_range_v)(v, r)
    }

    /// Expand var-sized `r2` to also cover var-sized `r1`.
    pub fn expand_range_var(&self, r1: &Range, r2: &mut Range) {
        expand_range_var_impl(r1, r2)
    }

    /// Snap `r` outward to tile boundaries. Noop for real domains and when
    /// no tile extent is set.
    pub fn expand_to_tile(&self, r: &mut Range) {
        (self.ops.expand_to_tile)(self, r)
    }

    /// Error if the coordinate lies outside the dimension domain.
    pub fn oob(&self, coord: &[u8]) -> TesseraResult<()> {
        (self.ops.oob)(self, coord)
    }

    /// Whether `r1` is fully covered by `r2`.
    pub fn covered(&self, r1: &Range, r2: &Range) -> bool {
        (self.ops.covered)(r1, r2)
    }

    /// Whether the two ranges overlap.
    pub fn overlap(&self, r1: &Range, r2: &Range) -> bool {
        (self.ops.overlap)(r1, r2)
    }

    /// The fraction of `r2` covered by `r1`, in `[0.0, 1.0]`.
    pub fn overlap_ratio(&self, r1: &Range, r2: &Range) -> f64 {
        (self.ops.overlap_ratio)(r1, r2)
    }

    /// Split `r` at `v`, producing the two sub-ranges.
    pub fn split_range(&self, r: &Range, v: &[u8]) -> (Range, Range) {
        (self.ops.split_range)(self, r, v)
    }

    /// The value to split `r` at, and whether `r` cannot be split.
    pub fn splitting_value(&self, r: &Range) -> (Vec<u8>, bool) {
        (self.ops.splitting_value)(r)
    }

    /// Number of tiles `r` intersects (1 when no tile extent is set).
    pub fn tile_num(&self, r: &Range) -> u64 {
        (self.ops.tile_num)(self, r)
    }

    /// Discretize a coordinate into a `bits`-wide bucket in
    /// `[0, max_bucket]`, for the Hilbert layout.
    pub fn map_to_uint64(&self, coord: &[u8], bits: u32, max_bucket: u64) -> u64 {
        (self.ops.map_to_uint64)(self, coord, bits, max_bucket)
    }

    /// Map a bucket id produced by [`Dimension::map_to_uint64`] back into
    /// the dimension domain.
    pub fn map_from_uint64(&self, value: u64, bits: u32, max_bucket: u64) -> Vec<u8> {
        (self.ops.map_from_uint64)(self, value, bits, max_bucket)
    }

    /// Whether `value` is smaller than the start of `range`.
    pub fn smaller_than(&self, value: &[u8], range: &Range) -> bool {
        (self.ops.smaller_than)(self, value, range)
    }

    /// The minimum bounding range of the fixed-width coordinates in
    /// `values`.
    pub fn compute_mbr(&self, values: &[u8]) -> TesseraResult<Range> {
        if self.var_size() {
            return Err(tessera_err!(
                NotApplicable: "compute_mbr on var-sized dimension '{}'", self.name
            ));
        }
        (self.ops.compute_mbr)(self, values)
    }

    /// The minimum bounding range of the var-sized coordinates described by
    /// `offsets` (one u64 per cell) into `values`.
    pub fn compute_mbr_var(&self, offsets: &[u8], values: &[u8]) -> TesseraResult<Range> {
        if !self.var_size() {
            return Err(tessera_err!(
                NotApplicable: "compute_mbr_var on fixed-sized dimension '{}'", self.name
            ));
        }
        compute_mbr_var_impl(offsets, values)
    }

    fn check_domain(&self) -> TesseraResult<()> {
        if self.datatype.is_integer() {
            match_each_integer_datatype!(self.datatype, |$T| check_domain_int::<$T>(self))
        } else {
            match_each_float_datatype!(self.datatype, |$T| check_domain_float::<$T>(self))
        }
    }

    fn check_tile_extent(&self) -> TesseraResult<()> {
        if self.tile_extent.is_none() {
            return Ok(());
        }
        if self.datatype.is_integer() {
            match_each_integer_datatype!(self.datatype, |$T| check_tile_extent_int::<$T>(self))
        } else {
            match_each_float_datatype!(self.datatype, |$T| check_tile_extent_float::<$T>(self))
        }
    }
}

/// The per-datatype operation table of a [`Dimension`].
#[derive(Clone, Copy)]
struct DimensionOps {
    tile_idx: fn(&Dimension, &[u8], &[u8]) -> u64,
    round_to_tile: fn(&Dimension, &[u8], &[u8]) -> Vec<u8>,
    tile_coord_low: fn(&Dimension, u64, &[u8]) -> Vec<u8>,
    tile_coord_high: fn(&Dimension, u64, &[u8]) -> Vec<u8>,
    ceil_to_tile: fn(&Dimension, &Range, u64) -> Vec<u8>,
    check_range: fn(&Dimension, &Range) -> TesseraResult<()>,
    coincides_with_tiles: fn(&Dimension, &Range) -> bool,
    compute_mbr: fn(&Dimension, &[u8]) -> TesseraResult<Range>,
    crop_range: fn(&Dimension, &mut Range),
    domain_range: fn(&Range) -> u64,
    expand_range: fn(&Range, &mut Range),
    expand_range_v: fn(&[u8], &mut Range),
    expand_to_tile: fn(&Dimension, &mut Range),
    oob: fn(&Dimension, &[u8]) -> TesseraResult<()>,
    covered: fn(&Range, &Range) -> bool,
    overlap: fn(&Range, &Range) -> bool,
    overlap_ratio: fn(&Range, &Range) -> f64,
    split_range: fn(&Dimension, &Range, &[u8]) -> (Range, Range),
    splitting_value: fn(&Range) -> (Vec<u8>, bool),
    tile_num: fn(&Dimension, &Range) -> u64,
    map_to_uint64: fn(&Dimension, &[u8], u32, u64) -> u64,
    map_from_uint64: fn(&Dimension, u64, u32, u64) -> Vec<u8>,
    smaller_than: fn(&Dimension, &[u8], &Range) -> bool,
}

impl DimensionOps {
    fn for_datatype(datatype: Datatype, var_size: bool) -> Self {
        if var_size {
            return var_ops();
        }
        if datatype.is_integer() {
            match_each_integer_datatype!(datatype, |$T| int_ops::<$T>())
        } else {
            match_each_float_datatype!(datatype, |$T| float_ops::<$T>())
        }
    }
}

/// A float type with successor/predecessor steps, needed for half-open tile
/// upper bounds.
trait FloatDim: NativeType + num_traits::Float {
    fn next_down_(self) -> Self;
    fn next_up_(self) -> Self;
}

impl FloatDim for f32 {
    fn next_down_(self) -> Self {
        self.next_down()
    }

    fn next_up_(self) -> Self {
        self.next_up()
    }
}

impl FloatDim for f64 {
    fn next_down_(self) -> Self {
        self.next_down()
    }

    fn next_up_(self) -> Self {
        self.next_up()
    }
}

fn int_ops<T: NativeType + AsPrimitive<i128>>() -> DimensionOps {
    DimensionOps {
        tile_idx: tile_idx_int::<T>,
        round_to_tile: round_to_tile_int::<T>,
        tile_coord_low: tile_coord_low_int::<T>,
        tile_coord_high: tile_coord_high_int::<T>,
        ceil_to_tile: ceil_to_tile_int::<T>,
        check_range: check_range_int::<T>,
        coincides_with_tiles: coincides_int::<T>,
        compute_mbr: compute_mbr_fixed::<T>,
        crop_range: crop_range_fixed::<T>,
        domain_range: domain_range_int::<T>,
        expand_range: expand_range_fixed::<T>,
        expand_range_v: expand_range_v_fixed::<T>,
        expand_to_tile: expand_to_tile_int::<T>,
        oob: oob_fixed::<T>,
        covered: covered_fixed::<T>,
        overlap: overlap_fixed::<T>,
        overlap_ratio: overlap_ratio_int::<T>,
        split_range: split_range_int::<T>,
        splitting_value: splitting_value_int::<T>,
        tile_num: tile_num_fixed::<T>,
        map_to_uint64: map_to_uint64_fixed::<T>,
        map_from_uint64: map_from_uint64_fixed::<T>,
        smaller_than: smaller_than_fixed::<T>,
    }
}

fn float_ops<T: FloatDim>() -> DimensionOps {
    DimensionOps {
        tile_idx: tile_idx_float::<T>,
        round_to_tile: round_to_tile_float::<T>,
        tile_coord_low: tile_coord_low_float::<T>,
        tile_coord_high: tile_coord_high_float::<T>,
        ceil_to_tile: ceil_to_tile_float::<T>,
        check_range: check_range_float::<T>,
        coincides_with_tiles: coincides_float::<T>,
        compute_mbr: compute_mbr_fixed::<T>,
        crop_range: crop_range_fixed::<T>,
        domain_range: domain_range_other,
        expand_range: expand_range_fixed::<T>,
        expand_range_v: expand_range_v_fixed::<T>,
        expand_to_tile: expand_to_tile_noop,
        oob: oob_fixed::<T>,
        covered: covered_fixed::<T>,
        overlap: overlap_fixed::<T>,
        overlap_ratio: overlap_ratio_float::<T>,
        split_range: split_range_float::<T>,
        splitting_value: splitting_value_float::<T>,
        tile_num: tile_num_fixed::<T>,
        map_to_uint64: map_to_uint64_fixed::<T>,
        map_from_uint64: map_from_uint64_fixed::<T>,
        smaller_than: smaller_than_fixed::<T>,
    }
}

fn var_ops() -> DimensionOps {
    DimensionOps {
        tile_idx: |dim, _, _| no_tile_grid(dim),
        round_to_tile: |dim, _, _| no_tile_grid(dim),
        tile_coord_low: |dim, _, _| no_tile_grid(dim),
        tile_coord_high: |dim, _, _| no_tile_grid(dim),
        ceil_to_tile: |dim, _, _| no_tile_grid(dim),
        check_range: check_range_var,
        coincides_with_tiles: |_, _| false,
        compute_mbr: |dim, _| {
            Err(tessera_err!(
                NotApplicable: "compute_mbr on var-sized dimension '{}'", dim.name()
            ))
        },
        crop_range: |_, _| {},
        domain_range: domain_range_other,
        expand_range: expand_range_var_impl,
        expand_range_v: expand_range_v_var,
        expand_to_tile: expand_to_tile_noop,
        oob: |_, _| Ok(()),
        covered: covered_var,
        overlap: overlap_var,
        overlap_ratio: overlap_ratio_var,
        split_range: split_range_var,
        splitting_value: splitting_value_var,
        tile_num: |_, _| 1,
        map_to_uint64: map_to_uint64_var,
        map_from_uint64: map_from_uint64_var,
        smaller_than: |_, value, range| value < range.start_bytes(),
    }
}

fn no_tile_grid<R>(dim: &Dimension) -> R {
    panic!(
        "dimension '{}' has no tile grid; var-sized dimensions carry no tile extent",
        dim.name()
    )
}

// ---------------------------------------------------------------------------
// Integer arithmetic. All intermediates are i128/u128 so a domain spanning
// the full width of T cannot overflow.

fn read<T: NativeType>(bytes: &[u8]) -> T {
    T::try_from_le_bytes(bytes).tessera_expect("coordinate width mismatch")
}

fn clamp_to_native<T: NativeType + AsPrimitive<i128>>(v: i128) -> T {
    let min: i128 = T::min_value().as_();
    let max: i128 = T::max_value().as_();
    T::from_i128(v.clamp(min, max)).tessera_expect("clamped value fits its type")
}

fn extent_i128<T: NativeType + AsPrimitive<i128>>(dim: &Dimension) -> i128 {
    dim.tile_extent_as::<T>()
        .tessera_expect("operation requires a tile extent")
        .as_()
}

fn tile_idx_int<T: NativeType + AsPrimitive<i128>>(dim: &Dimension, v: &[u8], low: &[u8]) -> u64 {
    let v: i128 = read::<T>(v).as_();
    let low: i128 = read::<T>(low).as_();
    let extent = extent_i128::<T>(dim);
    ((v - low) as u128 / extent as u128) as u64
}

fn round_to_tile_int<T: NativeType + AsPrimitive<i128>>(
    dim: &Dimension,
    v: &[u8],
    low: &[u8],
) -> Vec<u8> {
    let vi: i128 = read::<T>(v).as_();
    let lowi: i128 = read::<T>(low).as_();
    let extent = extent_i128::<T>(dim);
    let rounded = ((vi - lowi) as u128 / extent as u128 * extent as u128) as i128 + lowi;
    clamp_to_native::<T>(rounded).to_le_bytes().to_vec()
}

fn tile_coord_low_int<T: NativeType + AsPrimitive<i128>>(
    dim: &Dimension,
    k: u64,
    low: &[u8],
) -> Vec<u8> {
    let lowi: i128 = read::<T>(low).as_();
    let extent = extent_i128::<T>(dim);
    let coord = lowi + (k as i128) * extent;
    clamp_to_native::<T>(coord).to_le_bytes().to_vec()
}

fn tile_coord_high_int<T: NativeType + AsPrimitive<i128>>(
    dim: &Dimension,
    k: u64,
    low: &[u8],
) -> Vec<u8> {
    let lowi: i128 = read::<T>(low).as_();
    let extent = extent_i128::<T>(dim) as u128;
    let span = (k as u128 + 1).saturating_mul(extent);
    let coord = lowi
        .saturating_add(i128::try_from(span).unwrap_or(i128::MAX))
        .saturating_sub(1);
    clamp_to_native::<T>(coord).to_le_bytes().to_vec()
}

fn ceil_to_tile_int<T: NativeType + AsPrimitive<i128>>(
    dim: &Dimension,
    r: &Range,
    k: u64,
) -> Vec<u8> {
    tile_coord_high_int::<T>(dim, k, r.start_bytes())
}

fn check_range_int<T: NativeType + AsPrimitive<i128>>(
    dim: &Dimension,
    r: &Range,
) -> TesseraResult<()> {
    let (low, high) = (r.start_as::<T>(), r.end_as::<T>());
    if low > high {
        return Err(tessera_err!(
            Invalid: "range lower bound {} is larger than the upper bound {}", low, high
        ));
    }
    let (dom_low, dom_high) = (dim.domain.start_as::<T>(), dim.domain.end_as::<T>());
    if low < dom_low || high > dom_high {
        return Err(tessera_err!(
            Invalid: "range [{}, {}] is out of domain bounds [{}, {}] on dimension '{}'",
            low, high, dom_low, dom_high, dim.name
        ));
    }
    Ok(())
}

fn coincides_int<T: NativeType + AsPrimitive<i128>>(dim: &Dimension, r: &Range) -> bool {
    if dim.tile_extent.is_none() {
        return false;
    }
    let dom_low = dim.domain.start_bytes();
    let low_ok = round_to_tile_int::<T>(dim, r.start_bytes(), dom_low) == r.start_bytes();
    let high_tile = tile_idx_int::<T>(dim, r.end_bytes(), dom_low);
    let high_ok = tile_coord_high_int::<T>(dim, high_tile, dom_low) == r.end_bytes();
    low_ok && high_ok
}

fn domain_range_int<T: NativeType + AsPrimitive<i128>>(r: &Range) -> u64 {
    let low: i128 = r.start_as::<T>().as_();
    let high: i128 = r.end_as::<T>().as_();
    u64::try_from(high - low + 1).unwrap_or(u64::MAX)
}

fn domain_range_other(_r: &Range) -> u64 {
    u64::MAX
}

fn expand_to_tile_int<T: NativeType + AsPrimitive<i128>>(dim: &Dimension, r: &mut Range) {
    if dim.tile_extent.is_none() {
        return;
    }
    let dom_low = dim.domain.start_bytes().to_vec();
    let low = round_to_tile_int::<T>(dim, r.start_bytes(), &dom_low);
    let high_tile = tile_idx_int::<T>(dim, r.end_bytes(), &dom_low);
    let high = tile_coord_high_int::<T>(dim, high_tile, &dom_low);
    *r = Range::fixed(read::<T>(&low), read::<T>(&high));
}

fn expand_to_tile_noop(_dim: &Dimension, _r: &mut Range) {}

fn overlap_ratio_int<T: NativeType + AsPrimitive<i128>>(r1: &Range, r2: &Range) -> f64 {
    let (a_low, a_high): (i128, i128) = (r1.start_as::<T>().as_(), r1.end_as::<T>().as_());
    let (b_low, b_high): (i128, i128) = (r2.start_as::<T>().as_(), r2.end_as::<T>().as_());
    let o_low = a_low.max(b_low);
    let o_high = a_high.min(b_high);
    if o_low > o_high {
        return 0.0;
    }
    let ratio = (o_high - o_low + 1) as f64 / (b_high - b_low + 1) as f64;
    ratio.min(1.0)
}

fn split_range_int<T: NativeType + AsPrimitive<i128>>(
    _dim: &Dimension,
    r: &Range,
    v: &[u8],
) -> (Range, Range) {
    let split = read::<T>(v);
    let next: i128 = split.as_();
    let r1 = Range::fixed(r.start_as::<T>(), split);
    let r2 = Range::fixed(clamp_to_native::<T>(next + 1), r.end_as::<T>());
    (r1, r2)
}

fn splitting_value_int<T: NativeType + AsPrimitive<i128>>(r: &Range) -> (Vec<u8>, bool) {
    let low: i128 = r.start_as::<T>().as_();
    let high: i128 = r.end_as::<T>().as_();
    let v = low + (high - low) / 2;
    let unsplittable = v == high;
    (
        clamp_to_native::<T>(v).to_le_bytes().to_vec(),
        unsplittable,
    )
}

// ---------------------------------------------------------------------------
// Floating point arithmetic.

fn tile_idx_float<T: FloatDim>(dim: &Dimension, v: &[u8], low: &[u8]) -> u64 {
    let v = read::<T>(v);
    let low = read::<T>(low);
    let extent = dim
        .tile_extent_as::<T>()
        .tessera_expect("operation requires a tile extent");
    ((v - low) / extent).to_u64().unwrap_or(0)
}

fn round_to_tile_float<T: FloatDim>(dim: &Dimension, v: &[u8], low: &[u8]) -> Vec<u8> {
    let v = read::<T>(v);
    let low = read::<T>(low);
    let extent = dim
        .tile_extent_as::<T>()
        .tessera_expect("operation requires a tile extent");
    let rounded = ((v - low) / extent).floor() * extent + low;
    rounded.to_le_bytes().to_vec()
}

fn tile_coord_low_float<T: FloatDim>(dim: &Dimension, k: u64, low: &[u8]) -> Vec<u8> {
    let low = read::<T>(low);
    let extent = dim
        .tile_extent_as::<T>()
        .tessera_expect("operation requires a tile extent");
    let k = T::from(k).tessera_expect("tile index representable as float");
    (low + k * extent).to_le_bytes().to_vec()
}

fn tile_coord_high_float<T: FloatDim>(dim: &Dimension, k: u64, low: &[u8]) -> Vec<u8> {
    let low = read::<T>(low);
    let extent = dim
        .tile_extent_as::<T>()
        .tessera_expect("operation requires a tile extent");
    let k = T::from(k + 1).tessera_expect("tile index representable as float");
    (low + k * extent).next_down_().to_le_bytes().to_vec()
}

fn ceil_to_tile_float<T: FloatDim>(dim: &Dimension, r: &Range, k: u64) -> Vec<u8> {
    tile_coord_high_float::<T>(dim, k, r.start_bytes())
}

fn check_range_float<T: FloatDim>(dim: &Dimension, r: &Range) -> TesseraResult<()> {
    let (low, high) = (r.start_as::<T>(), r.end_as::<T>());
    if NativeType::is_nan(low) || NativeType::is_nan(high) {
        return Err(tessera_err!(Invalid: "range on dimension '{}' contains NaN", dim.name));
    }
    if low > high {
        return Err(tessera_err!(
            Invalid: "range lower bound {} is larger than the upper bound {}", low, high
        ));
    }
    let (dom_low, dom_high) = (dim.domain.start_as::<T>(), dim.domain.end_as::<T>());
    if low < dom_low || high > dom_high {
        return Err(tessera_err!(
            Invalid: "range [{}, {}] is out of domain bounds [{}, {}] on dimension '{}'",
            low, high, dom_low, dom_high, dim.name
        ));
    }
    Ok(())
}

fn coincides_float<T: FloatDim>(dim: &Dimension, r: &Range) -> bool {
    if dim.tile_extent.is_none() {
        return false;
    }
    let dom_low = dim.domain.start_bytes();
    let low_ok = round_to_tile_float::<T>(dim, r.start_bytes(), dom_low) == r.start_bytes();
    let high_tile = tile_idx_float::<T>(dim, r.end_bytes(), dom_low);
    let high_ok = tile_coord_high_float::<T>(dim, high_tile, dom_low) == r.end_bytes();
    low_ok && high_ok
}

fn overlap_ratio_float<T: FloatDim>(r1: &Range, r2: &Range) -> f64 {
    let (a_low, a_high) = (r1.start_as::<T>(), r1.end_as::<T>());
    let (b_low, b_high) = (r2.start_as::<T>(), r2.end_as::<T>());
    let o_low = if a_low > b_low { a_low } else { b_low };
    let o_high = if a_high < b_high { a_high } else { b_high };
    if o_low > o_high {
        return 0.0;
    }
    if b_low == b_high {
        return 1.0;
    }
    let den = (b_high - b_low).to_f64().unwrap_or(f64::MAX);
    let num = (o_high - o_low).to_f64().unwrap_or(0.0);
    let ratio = num / den;
    if ratio == 0.0 {
        // A genuine overlap never reports zero coverage.
        return f64::MIN_POSITIVE;
    }
    ratio.min(1.0)
}

fn split_range_float<T: FloatDim>(_dim: &Dimension, r: &Range, v: &[u8]) -> (Range, Range) {
    let split = read::<T>(v);
    let r1 = Range::fixed(r.start_as::<T>(), split);
    let r2 = Range::fixed(split.next_up_(), r.end_as::<T>());
    (r1, r2)
}

fn splitting_value_float<T: FloatDim>(r: &Range) -> (Vec<u8>, bool) {
    let low = r.start_as::<T>();
    let high = r.end_as::<T>();
    let two = T::from(2.0).tessera_expect("2 representable as float");
    let v = low / two + high / two;
    let unsplittable = !(low < high);
    (v.to_le_bytes().to_vec(), unsplittable)
}

// ---------------------------------------------------------------------------
// Shared fixed-width implementations.

fn compute_mbr_fixed<T: NativeType>(dim: &Dimension, values: &[u8]) -> TesseraResult<Range> {
    let size = std::mem::size_of::<T>();
    if values.is_empty() || values.len() % size != 0 {
        return Err(tessera_err!(
            Invalid: "coordinate tile of {} bytes is not a whole number of {} values on '{}'",
            values.len(),
            T::DATATYPE,
            dim.name()
        ));
    }
    let mut min = read::<T>(&values[..size]);
    let mut max = min;
    for chunk in values.chunks_exact(size).skip(1) {
        let v = read::<T>(chunk);
        if v.total_compare(min) == std::cmp::Ordering::Less {
            min = v;
        }
        if v.total_compare(max) == std::cmp::Ordering::Greater {
            max = v;
        }
    }
    Ok(Range::fixed(min, max))
}

fn crop_range_fixed<T: NativeType>(dim: &Dimension, r: &mut Range) {
    let (dom_low, dom_high) = (dim.domain.start_as::<T>(), dim.domain.end_as::<T>());
    let low = r.start_as::<T>();
    let high = r.end_as::<T>();
    let low = if low < dom_low { dom_low } else { low };
    let high = if high > dom_high { dom_high } else { high };
    *r = Range::fixed(low, high);
}

fn expand_range_fixed<T: NativeType>(r1: &Range, r2: &mut Range) {
    if r2.is_empty() {
        *r2 = r1.clone();
        return;
    }
    let low = if r1.start_as::<T>() < r2.start_as::<T>() {
        r1.start_as::<T>()
    } else {
        r2.start_as::<T>()
    };
    let high = if r1.end_as::<T>() > r2.end_as::<T>() {
        r1.end_as::<T>()
    } else {
        r2.end_as::<T>()
    };
    *r2 = Range::fixed(low, high);
}

fn expand_range_v_fixed<T: NativeType>(v: &[u8], r: &mut Range) {
    let v = read::<T>(v);
    if r.is_empty() {
        *r = Range::fixed(v, v);
        return;
    }
    let low = if v < r.start_as::<T>() {
        v
    } else {
        r.start_as::<T>()
    };
    let high = if v > r.end_as::<T>() { v } else { r.end_as::<T>() };
    *r = Range::fixed(low, high);
}

fn oob_fixed<T: NativeType>(dim: &Dimension, coord: &[u8]) -> TesseraResult<()> {
    let v = read::<T>(coord);
    let (dom_low, dom_high) = (dim.domain.start_as::<T>(), dim.domain.end_as::<T>());
    if v < dom_low || v > dom_high {
        return Err(tessera_err!(
            Invalid: "coordinate {} is out of domain bounds [{}, {}] on dimension '{}'",
            v, dom_low, dom_high, dim.name
        ));
    }
    Ok(())
}

fn covered_fixed<T: NativeType>(r1: &Range, r2: &Range) -> bool {
    r1.start_as::<T>() >= r2.start_as::<T>() && r1.end_as::<T>() <= r2.end_as::<T>()
}

fn overlap_fixed<T: NativeType>(r1: &Range, r2: &Range) -> bool {
    !(r1.end_as::<T>() < r2.start_as::<T>() || r1.start_as::<T>() > r2.end_as::<T>())
}

fn tile_num_fixed<T: NativeType>(dim: &Dimension, r: &Range) -> u64 {
    if dim.tile_extent.is_none() {
        return 1;
    }
    let dom_low = dim.domain.start_bytes();
    let first = (dim.ops.tile_idx)(dim, r.start_bytes(), dom_low);
    let last = (dim.ops.tile_idx)(dim, r.end_bytes(), dom_low);
    last - first + 1
}

fn map_to_uint64_fixed<T: NativeType>(
    dim: &Dimension,
    coord: &[u8],
    _bits: u32,
    max_bucket: u64,
) -> u64 {
    let v = read::<T>(coord).to_f64().unwrap_or(0.0);
    let low = dim.domain.start_as::<T>().to_f64().unwrap_or(0.0);
    let high = dim.domain.end_as::<T>().to_f64().unwrap_or(0.0);
    if high <= low {
        return 0;
    }
    let norm = (v - low) / (high - low);
    (norm * max_bucket as f64).round() as u64
}

fn map_from_uint64_fixed<T: NativeType>(
    dim: &Dimension,
    value: u64,
    _bits: u32,
    max_bucket: u64,
) -> Vec<u8> {
    let low = dim.domain.start_as::<T>().to_f64().unwrap_or(0.0);
    let high = dim.domain.end_as::<T>().to_f64().unwrap_or(0.0);
    let norm = if max_bucket == 0 {
        0.0
    } else {
        value as f64 / max_bucket as f64
    };
    let v = low + norm * (high - low);
    let v = if T::DATATYPE.is_integer() { v.round() } else { v };
    T::from(v)
        .unwrap_or_else(T::max_value)
        .to_le_bytes()
        .to_vec()
}

fn smaller_than_fixed<T: NativeType>(_dim: &Dimension, value: &[u8], range: &Range) -> bool {
    read::<T>(value) < range.start_as::<T>()
}

// ---------------------------------------------------------------------------
// Var-sized (string) implementations: plain lexicographic byte order.

fn check_range_var(_dim: &Dimension, r: &Range) -> TesseraResult<()> {
    if r.start_bytes() > r.end_bytes() {
        return Err(tessera_err!(
            Invalid: "range lower bound {:?} is larger than the upper bound {:?}",
            String::from_utf8_lossy(r.start_bytes()),
            String::from_utf8_lossy(r.end_bytes())
        ));
    }
    Ok(())
}

fn expand_range_var_impl(r1: &Range, r2: &mut Range) {
    if r2.is_empty() {
        *r2 = r1.clone();
        return;
    }
    if r1.start_bytes() < r2.start_bytes() {
        let start = r1.start_bytes().to_vec();
        r2.set_start_var(&start);
    }
    if r1.end_bytes() > r2.end_bytes() {
        let end = r1.end_bytes().to_vec();
        r2.set_end_var(&end);
    }
}

fn expand_range_v_var(v: &[u8], r: &mut Range) {
    if r.is_empty() {
        *r = Range::var(v, v);
        return;
    }
    if v < r.start_bytes() {
        r.set_start_var(v);
    }
    if v > r.end_bytes() {
        r.set_end_var(v);
    }
}

fn covered_var(r1: &Range, r2: &Range) -> bool {
    r1.start_bytes() >= r2.start_bytes() && r1.end_bytes() <= r2.end_bytes()
}

fn overlap_var(r1: &Range, r2: &Range) -> bool {
    !(r1.end_bytes() < r2.start_bytes() || r1.start_bytes() > r2.end_bytes())
}

fn overlap_ratio_var(r1: &Range, r2: &Range) -> f64 {
    // No meaningful measure over byte strings; a genuine overlap is treated
    // as full coverage.
    if overlap_var(r1, r2) {
        1.0
    } else {
        0.0
    }
}

fn split_range_var(_dim: &Dimension, r: &Range, v: &[u8]) -> (Range, Range) {
    let r1 = Range::var(r.start_bytes(), v);
    let mut next = v.to_vec();
    next.push(0);
    let r2 = Range::var(&next, r.end_bytes());
    (r1, r2)
}

fn splitting_value_var(r: &Range) -> (Vec<u8>, bool) {
    let start = r.start_bytes();
    let end = r.end_bytes();
    if start == end {
        return (start.to_vec(), true);
    }
    // Shortest prefix that discriminates: keep the common prefix and take
    // the byte midway between the first differing pair.
    let mut prefix = Vec::new();
    for i in 0..end.len().max(start.len()) {
        let a = start.get(i).copied().unwrap_or(0);
        let b = end.get(i).copied().unwrap_or(0);
        if a == b {
            prefix.push(a);
            continue;
        }
        prefix.push(a + b.saturating_sub(a) / 2);
        break;
    }
    if prefix.as_slice() < start {
        prefix = start.to_vec();
    }
    (prefix, false)
}

fn map_to_uint64_var(_dim: &Dimension, coord: &[u8], bits: u32, max_bucket: u64) -> u64 {
    let mut word = [0u8; 8];
    let n = coord.len().min(8);
    word[..n].copy_from_slice(&coord[..n]);
    let packed = u64::from_be_bytes(word);
    let shifted = if bits >= 64 { packed } else { packed >> (64 - bits) };
    shifted.min(max_bucket)
}

fn map_from_uint64_var(_dim: &Dimension, value: u64, bits: u32, _max_bucket: u64) -> Vec<u8> {
    let restored = if bits >= 64 { value } else { value << (64 - bits) };
    let bytes = restored.to_be_bytes();
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    bytes[..end].to_vec()
}

fn compute_mbr_var_impl(offsets: &[u8], values: &[u8]) -> TesseraResult<Range> {
    if offsets.is_empty() || offsets.len() % 8 != 0 {
        return Err(tessera_err!(
            Invalid: "offsets tile of {} bytes is not a whole number of u64 offsets",
            offsets.len()
        ));
    }
    let offsets: Vec<u64> = offsets
        .chunks_exact(8)
        .map(|c| u64::try_from_le_bytes(c).tessera_expect("8-byte chunk"))
        .collect();
    let cell = |i: usize| -> TesseraResult<&[u8]> {
        let start = usize::try_from(offsets[i])
            .map_err(|_| tessera_err!(Corrupt: "cell offset exceeds usize"))?;
        let end = if i + 1 < offsets.len() {
            usize::try_from(offsets[i + 1])
                .map_err(|_| tessera_err!(Corrupt: "cell offset exceeds usize"))?
        } else {
            values.len()
        };
        if start > end || end > values.len() {
            return Err(tessera_err!(
                Corrupt: "cell offsets [{}, {}) exceed a value tile of {} bytes",
                start,
                end,
                values.len()
            ));
        }
        Ok(&values[start..end])
    };

    let mut min = cell(0)?;
    let mut max = min;
    for i in 1..offsets.len() {
        let v = cell(i)?;
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    Ok(Range::var(min, max))
}

// ---------------------------------------------------------------------------
// Construction-time validation.

fn check_domain_int<T: NativeType + AsPrimitive<i128>>(dim: &Dimension) -> TesseraResult<()> {
    let (low, high) = (dim.domain.start_as::<T>(), dim.domain.end_as::<T>());
    if high < low {
        return Err(tessera_err!(
            Invalid: "domain upper bound must not be smaller than the lower one on '{}'", dim.name
        ));
    }
    if low == T::min_value() && high == T::max_value() {
        return Err(tessera_err!(
            Invalid: "domain range (upper - lower + 1) is larger than the maximum unsigned number on '{}'",
            dim.name
        ));
    }
    Ok(())
}

fn check_domain_float<T: FloatDim>(dim: &Dimension) -> TesseraResult<()> {
    let (low, high) = (dim.domain.start_as::<T>(), dim.domain.end_as::<T>());
    if low.is_infinite() || high.is_infinite() || NativeType::is_nan(low) || NativeType::is_nan(high)
    {
        return Err(tessera_err!(
            Invalid: "domain of '{}' contains NaN or infinity", dim.name
        ));
    }
    if high < low {
        return Err(tessera_err!(
            Invalid: "domain upper bound must not be smaller than the lower one on '{}'", dim.name
        ));
    }
    Ok(())
}

fn check_tile_extent_int<T: NativeType + AsPrimitive<i128>>(dim: &Dimension) -> TesseraResult<()> {
    let extent: i128 = dim
        .tile_extent_as::<T>()
        .tessera_expect("extent present")
        .as_();
    if extent <= 0 {
        return Err(tessera_err!(
            Invalid: "tile extent must be greater than 0 on '{}'", dim.name
        ));
    }
    let low: i128 = dim.domain.start_as::<T>().as_();
    let high: i128 = dim.domain.end_as::<T>().as_();
    if extent > high - low + 1 {
        return Err(tessera_err!(
            Invalid: "tile extent {} exceeds the domain range on '{}'", extent, dim.name
        ));
    }
    Ok(())
}

fn check_tile_extent_float<T: FloatDim>(dim: &Dimension) -> TesseraResult<()> {
    let extent = dim.tile_extent_as::<T>().tessera_expect("extent present");
    if NativeType::is_nan(extent) || extent <= T::zero() {
        return Err(tessera_err!(
            Invalid: "tile extent must be greater than 0 on '{}'", dim.name
        ));
    }
    let span = dim.domain.end_as::<T>() - dim.domain.start_as::<T>();
    if extent > span {
        return Err(tessera_err!(
            Invalid: "tile extent {} exceeds the domain range on '{}'", extent, dim.name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim_i32() -> Dimension {
        Dimension::new("d", 0i32, 9i32, Some(2i32)).unwrap()
    }

    #[test]
    fn tile_grid_laws_i32() {
        let d = dim_i32();
        let low = d.domain().start_bytes().to_vec();
        for v in 0i32..=9 {
            let bytes = v.to_le_bytes();
            let k = d.tile_idx(&bytes, &low);
            let t_low = i32::from_le_bytes(d.tile_coord_low(k, &low).try_into().unwrap());
            let t_high = i32::from_le_bytes(d.tile_coord_high(k, &low).try_into().unwrap());
            assert!(t_low <= v && v <= t_high, "{v} outside tile [{t_low}, {t_high}]");
            assert_eq!(d.round_to_tile(&bytes, &low), t_low.to_le_bytes());
        }
        assert_eq!(d.tile_idx(&3i32.to_le_bytes(), &low), 1);
    }

    #[test]
    fn full_width_signed_domain() {
        // A domain spanning all of i8 except the last value: the width is
        // 255, which only fits unsigned.
        let d = Dimension::new("d", i8::MIN, i8::MAX - 1, Some(1i8)).unwrap();
        assert_eq!(d.domain_range(d.domain()), 255);
        let low = d.domain().start_bytes().to_vec();
        assert_eq!(d.tile_idx(&(i8::MAX - 1).to_le_bytes(), &low), 254);
    }

    #[test]
    fn full_domain_is_rejected() {
        let err = Dimension::new("d", i8::MIN, i8::MAX, Some(1i8)).unwrap_err();
        assert!(err.to_string().contains("maximum unsigned number"));
    }

    #[test]
    fn extent_validation() {
        assert!(Dimension::new("d", 0i32, 9i32, Some(0i32)).is_err());
        assert!(Dimension::new("d", 0i32, 9i32, Some(11i32)).is_err());
        assert!(Dimension::new("d", 0i32, 9i32, Some(10i32)).is_ok());
    }

    #[test]
    fn check_range_bounds() {
        let d = dim_i32();
        assert!(d.check_range(&Range::fixed(3i32, 6i32)).is_ok());
        assert!(d.check_range(&Range::fixed(6i32, 3i32)).is_err());
        assert!(d.check_range(&Range::fixed(-1i32, 6i32)).is_err());
        assert!(d.check_range(&Range::fixed(3i32, 10i32)).is_err());
    }

    #[test]
    fn nan_is_rejected() {
        let d = Dimension::new("f", 0.0f64, 10.0f64, Some(2.0f64)).unwrap();
        assert!(d.check_range(&Range::fixed(f64::NAN, 5.0)).is_err());
        assert!(Dimension::new("f", f64::NAN, 1.0f64, None).is_err());
        assert!(Dimension::new("f", 0.0f64, f64::INFINITY, None).is_err());
    }

    #[test]
    fn float_tile_bounds_are_half_open() {
        let d = Dimension::new("f", 0.0f64, 10.0f64, Some(2.0f64)).unwrap();
        let low = d.domain().start_bytes().to_vec();
        let high = f64::from_le_bytes(d.tile_coord_high(0, &low).try_into().unwrap());
        assert!(high < 2.0);
        assert_eq!(high, 2.0f64.next_down());
        // The next tile starts exactly at 2.0.
        let next_low = f64::from_le_bytes(d.tile_coord_low(1, &low).try_into().unwrap());
        assert_eq!(next_low, 2.0);
    }

    #[test]
    fn overlap_and_covered_symmetry() {
        let d = dim_i32();
        let r1 = Range::fixed(1i32, 4i32);
        let r2 = Range::fixed(3i32, 9i32);
        assert_eq!(d.overlap(&r1, &r2), d.overlap(&r2, &r1));
        assert!(d.overlap(&r1, &r2));
        assert!(d.covered(&r1, &r1));
        assert!(!d.covered(&r2, &r1));
        assert!((d.overlap_ratio(&r1, &r1) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overlap_ratio_int_counts_cells() {
        let d = dim_i32();
        // [0, 5] covers 2 of the 4 cells of [4, 7].
        let ratio = d.overlap_ratio(&Range::fixed(0i32, 5i32), &Range::fixed(4i32, 7i32));
        assert!((ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn crop_and_expand() {
        let d = dim_i32();
        let mut r = Range::fixed(-5i32, 100i32);
        d.crop_range(&mut r);
        assert_eq!(r, Range::fixed(0i32, 9i32));

        let mut acc = Range::empty();
        d.expand_range(&Range::fixed(4i32, 5i32), &mut acc);
        d.expand_range(&Range::fixed(1i32, 2i32), &mut acc);
        assert_eq!(acc, Range::fixed(1i32, 5i32));

        d.expand_range_v(&8i32.to_le_bytes(), &mut acc);
        assert_eq!(acc, Range::fixed(1i32, 8i32));
    }

    #[test]
    fn expand_to_tile_snaps_to_grid() {
        let d = dim_i32();
        let mut r = Range::fixed(3i32, 6i32);
        d.expand_to_tile(&mut r);
        assert_eq!(r, Range::fixed(2i32, 7i32));
        assert!(d.coincides_with_tiles(&r));
        assert!(!d.coincides_with_tiles(&Range::fixed(3i32, 6i32)));
    }

    #[test]
    fn tile_num_of_range() {
        let d = dim_i32();
        assert_eq!(d.tile_num(&Range::fixed(3i32, 6i32)), 3);
        assert_eq!(d.tile_num(&Range::fixed(0i32, 9i32)), 5);
        assert_eq!(d.tile_num(&Range::fixed(4i32, 4i32)), 1);
    }

    #[test]
    fn split_int_range() {
        let d = dim_i32();
        let r = Range::fixed(0i32, 9i32);
        let (v, unsplittable) = d.splitting_value(&r);
        assert!(!unsplittable);
        let (r1, r2) = d.split_range(&r, &v);
        assert_eq!(r1, Range::fixed(0i32, 4i32));
        assert_eq!(r2, Range::fixed(5i32, 9i32));

        let (_, unsplittable) = d.splitting_value(&Range::fixed(7i32, 7i32));
        assert!(unsplittable);
    }

    #[test]
    fn split_var_range() {
        let d = Dimension::new_var("s").unwrap();
        let r = Range::var(b"alice", b"dan");
        let (v, unsplittable) = d.splitting_value(&r);
        assert!(!unsplittable);
        assert!(v.as_slice() >= b"alice".as_slice() && v.as_slice() < b"dan".as_slice());
        let (r1, r2) = d.split_range(&r, &v);
        assert_eq!(r1.start_bytes(), b"alice");
        assert_eq!(r2.end_bytes(), b"dan");
        assert!(r1.end_bytes() < r2.start_bytes());
    }

    #[test]
    fn var_range_checks() {
        let d = Dimension::new_var("s").unwrap();
        assert!(d.check_range(&Range::var(b"a", b"b")).is_ok());
        assert!(d.check_range(&Range::var(b"b", b"a")).is_err());
    }

    #[test]
    fn mbr_fixed_and_var() {
        let d = dim_i32();
        let mut coords = Vec::new();
        for v in [5i32, 1, 9, 3] {
            coords.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(d.compute_mbr(&coords).unwrap(), Range::fixed(1i32, 9i32));
        assert!(d.compute_mbr_var(&[], &[]).is_err());

        let s = Dimension::new_var("s").unwrap();
        let values = b"bobalicecaroldan";
        let mut offsets = Vec::new();
        for o in [0u64, 3, 8, 13] {
            offsets.extend_from_slice(&o.to_le_bytes());
        }
        let mbr = s.compute_mbr_var(&offsets, values).unwrap();
        assert_eq!(mbr.start_bytes(), b"alice");
        assert_eq!(mbr.end_bytes(), b"dan");
    }

    #[test]
    fn bucket_mapping_round_trips() {
        let d = Dimension::new("d", 0i64, 99i64, Some(10i64)).unwrap();
        let max_bucket = (1u64 << 16) - 1;
        for v in [0i64, 1, 42, 99] {
            let bucket = d.map_to_uint64(&v.to_le_bytes(), 16, max_bucket);
            assert!(bucket <= max_bucket);
            let back = d.map_from_uint64(bucket, 16, max_bucket);
            assert_eq!(i64::from_le_bytes(back.try_into().unwrap()), v);
        }
    }

    #[test]
    fn bucket_mapping_var_orders() {
        let d = Dimension::new_var("s").unwrap();
        let a = d.map_to_uint64(b"alice", 32, u64::MAX);
        let b = d.map_to_uint64(b"bob", 32, u64::MAX);
        assert!(a < b);
    }

    #[test]
    fn oob_and_smaller_than() {
        let d = dim_i32();
        assert!(d.oob(&5i32.to_le_bytes()).is_ok());
        assert!(d.oob(&42i32.to_le_bytes()).is_err());
        assert!(d.smaller_than(&1i32.to_le_bytes(), &Range::fixed(3i32, 6i32)));
        assert!(!d.smaller_than(&3i32.to_le_bytes(), &Range::fixed(3i32, 6i32)));
    }
}
