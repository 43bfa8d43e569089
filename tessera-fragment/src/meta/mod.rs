//! Per-fragment metadata: the write-side tile bookkeeping, the versioned
//! on-disk format, and the read-side lazy section loading.

mod load;
mod names;
mod stats;
mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_dtype::NativeType;
use tessera_error::{tessera_err, TesseraExpect, TesseraResult};

use crate::io::EncryptionKey;
use crate::{
    has_min_max_metadata, has_sum_metadata, ArraySchema, MemoryTracker, NDRange, RTree, Resources,
    TileOverlap, Uri, CELL_VAR_OFFSET_SIZE, COORDS, DELETE_CONDITION_INDEX, DELETE_TIMESTAMPS,
    TIMESTAMPS,
};

/// Aggregate per-tile metadata of one column, consumed by query-side
/// aggregators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMetadata {
    /// Cells in the tile.
    pub count: u64,
    /// Null cells in the tile (0 for non-nullable columns).
    pub null_count: u64,
    /// Minimum value bytes.
    pub min: Vec<u8>,
    /// Maximum value bytes.
    pub max: Vec<u8>,
    /// The raw 8-byte sum, where the column maintains one.
    pub sum: Option<[u8; 8]>,
}

/// Byte offsets of every generic sub-tile within the metadata file,
/// recorded by `store` and read back from the footer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericTileOffsets {
    /// Offset of the R-tree tile.
    pub rtree: u64,
    /// Per-column offsets of the tile-offsets tiles.
    pub tile_offsets: Vec<u64>,
    /// Per-column offsets of the var tile-offsets tiles.
    pub tile_var_offsets: Vec<u64>,
    /// Per-column offsets of the var tile-sizes tiles.
    pub tile_var_sizes: Vec<u64>,
    /// Per-column offsets of the validity tile-offsets tiles.
    pub tile_validity_offsets: Vec<u64>,
    /// Per-column offsets of the tile-min tiles.
    pub tile_min: Vec<u64>,
    /// Per-column offsets of the tile-max tiles.
    pub tile_max: Vec<u64>,
    /// Per-column offsets of the tile-sum tiles.
    pub tile_sum: Vec<u64>,
    /// Per-column offsets of the tile-null-count tiles.
    pub tile_null_count: Vec<u64>,
    /// Offset of the fragment min/max/sum/null-count tile.
    pub fragment_min_max_sum_null_count: u64,
    /// Offset of the processed-conditions tile.
    pub processed_conditions: u64,
}

/// One column's tile offsets and running file size, guarded together by the
/// column's own lock so concurrent writers to distinct columns never
/// contend.
#[derive(Debug, Default)]
pub(crate) struct ColumnOffsets {
    pub(crate) offsets: Vec<u64>,
    pub(crate) file_size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ColumnSlot {
    pub(crate) data: Mutex<ColumnOffsets>,
    pub(crate) loaded: AtomicBool,
}

/// Everything guarded by the coarse lock: the fragment geometry, the
/// R-tree, and every per-tile statistics buffer.
#[derive(Debug)]
pub(crate) struct CoarseState {
    pub(crate) non_empty_domain: NDRange,
    /// The non-empty domain expanded to tile boundaries (dense only).
    pub(crate) domain: NDRange,
    pub(crate) rtree: RTree,
    pub(crate) tile_var_sizes: Vec<Vec<u64>>,
    pub(crate) tile_validity_offsets: Vec<Vec<u64>>,
    pub(crate) file_validity_sizes: Vec<u64>,
    pub(crate) tile_min_buffer: Vec<Vec<u8>>,
    pub(crate) tile_min_var_buffer: Vec<Vec<u8>>,
    pub(crate) tile_max_buffer: Vec<Vec<u8>>,
    pub(crate) tile_max_var_buffer: Vec<Vec<u8>>,
    /// Per-tile sums, 8 raw bytes per tile reinterpreted by the column's
    /// sum type.
    pub(crate) tile_sums: Vec<Vec<u8>>,
    pub(crate) tile_null_counts: Vec<Vec<u64>>,
    pub(crate) fragment_mins: Vec<Vec<u8>>,
    pub(crate) fragment_maxs: Vec<Vec<u8>>,
    /// Fragment sums, 8 raw bytes each.
    pub(crate) fragment_sums: Vec<[u8; 8]>,
    pub(crate) fragment_null_counts: Vec<u64>,
    pub(crate) processed_conditions: Vec<String>,
    pub(crate) processed_conditions_set: FxHashSet<String>,
}

/// Which sections have been deserialized. Flags are published with release
/// stores after the section's buffers are fully populated under their lock,
/// and re-checked after acquiring the lock (double-checked loading).
#[derive(Debug, Default)]
pub(crate) struct LoadedMetadata {
    pub(crate) footer: AtomicBool,
    pub(crate) rtree: AtomicBool,
    pub(crate) tile_var_sizes: Vec<AtomicBool>,
    pub(crate) tile_validity_offsets: Vec<AtomicBool>,
    pub(crate) tile_min: Vec<AtomicBool>,
    pub(crate) tile_max: Vec<AtomicBool>,
    pub(crate) tile_sum: Vec<AtomicBool>,
    pub(crate) tile_null_count: Vec<AtomicBool>,
    pub(crate) fragment_min_max_sum_null_count: AtomicBool,
    pub(crate) processed_conditions: AtomicBool,
}

fn atomic_flags(num: usize) -> Vec<AtomicBool> {
    (0..num).map(|_| AtomicBool::new(false)).collect()
}

/// The metadata of one fragment.
///
/// A writer constructs one, sizes it with [`FragmentMetadata::init`] and
/// [`FragmentMetadata::set_num_tiles`], records tiles through the `set_*`
/// operations (thread-safe across distinct tiles and columns), reduces the
/// fragment roll-ups, and persists everything with
/// [`FragmentMetadata::store`] — after which the object is immutable.
///
/// A reader constructs one against the fragment URI, loads the footer with
/// [`FragmentMetadata::load`], and then demand-loads individual sections
/// (`load_rtree`, `load_tile_offsets`, ...) under the memory budget.
pub struct FragmentMetadata {
    resources: Arc<Resources>,
    memory_tracker: Arc<MemoryTracker>,
    schema: Arc<ArraySchema>,
    schema_name: String,
    fragment_uri: Uri,
    timestamp_range: (u64, u64),
    version: u32,
    dense: bool,
    has_timestamps: bool,
    has_delete_meta: bool,
    has_consolidated_footer: bool,
    sparse_tile_num: u64,
    last_tile_cell_num: u64,
    tile_index_base: u64,
    meta_file_size: u64,
    footer_size: u64,
    footer_offset: u64,
    gt_offsets: GenericTileOffsets,
    idx_map: FxHashMap<String, usize>,
    /// Column names in index order, the inverse of `idx_map`.
    idx_names: Vec<String>,
    fixed_cols: Vec<ColumnSlot>,
    var_cols: Vec<ColumnSlot>,
    state: RwLock<CoarseState>,
    loaded: LoadedMetadata,
}

impl std::fmt::Debug for FragmentMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentMetadata")
            .field("uri", &self.fragment_uri)
            .field("version", &self.version)
            .field("dense", &self.dense)
            .field("timestamp_range", &self.timestamp_range)
            .finish()
    }
}

impl FragmentMetadata {
    /// Create metadata for a fragment a writer is about to produce. The
    /// format version is the schema's write version.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resources: Arc<Resources>,
        memory_tracker: Arc<MemoryTracker>,
        schema: Arc<ArraySchema>,
        fragment_uri: Uri,
        timestamp_range: (u64, u64),
        dense: bool,
        has_timestamps: bool,
        has_delete_meta: bool,
    ) -> Self {
        let version = schema.write_version();
        Self::with_version(
            resources,
            memory_tracker,
            schema,
            fragment_uri,
            timestamp_range,
            dense,
            has_timestamps,
            has_delete_meta,
            version,
        )
    }

    /// Create metadata for an existing fragment whose footer will be read
    /// with [`FragmentMetadata::load`]. The version is the one encoded in
    /// the fragment name; the footer may refine it.
    pub fn for_reading(
        resources: Arc<Resources>,
        memory_tracker: Arc<MemoryTracker>,
        schema: Arc<ArraySchema>,
        fragment_uri: Uri,
        timestamp_range: (u64, u64),
        version: u32,
    ) -> Self {
        Self::with_version(
            resources,
            memory_tracker,
            schema,
            fragment_uri,
            timestamp_range,
            false,
            false,
            false,
            version,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_version(
        resources: Arc<Resources>,
        memory_tracker: Arc<MemoryTracker>,
        schema: Arc<ArraySchema>,
        fragment_uri: Uri,
        timestamp_range: (u64, u64),
        dense: bool,
        has_timestamps: bool,
        has_delete_meta: bool,
        version: u32,
    ) -> Self {
        let rtree = RTree::new(
            schema.domain().clone(),
            resources.config().rtree_fanout(),
        );
        let schema_name = schema.name().to_string();
        let mut meta = Self {
            resources,
            memory_tracker,
            schema,
            schema_name,
            fragment_uri,
            timestamp_range,
            version,
            dense,
            has_timestamps,
            has_delete_meta,
            has_consolidated_footer: false,
            sparse_tile_num: 0,
            last_tile_cell_num: 0,
            tile_index_base: 0,
            meta_file_size: 0,
            footer_size: 0,
            footer_offset: 0,
            gt_offsets: GenericTileOffsets::default(),
            idx_map: FxHashMap::default(),
            idx_names: Vec::new(),
            fixed_cols: Vec::new(),
            var_cols: Vec::new(),
            state: RwLock::new(CoarseState {
                non_empty_domain: NDRange::new(),
                domain: NDRange::new(),
                rtree,
                tile_var_sizes: Vec::new(),
                tile_validity_offsets: Vec::new(),
                file_validity_sizes: Vec::new(),
                tile_min_buffer: Vec::new(),
                tile_min_var_buffer: Vec::new(),
                tile_max_buffer: Vec::new(),
                tile_max_var_buffer: Vec::new(),
                tile_sums: Vec::new(),
                tile_null_counts: Vec::new(),
                fragment_mins: Vec::new(),
                fragment_maxs: Vec::new(),
                fragment_sums: Vec::new(),
                fragment_null_counts: Vec::new(),
                processed_conditions: Vec::new(),
                processed_conditions_set: FxHashSet::default(),
            }),
            loaded: LoadedMetadata::default(),
        };
        meta.build_idx_map();
        meta
    }

    /// Rebuild the name → column-index map: attributes first, the
    /// coordinates pseudo-attribute, the dimensions, then the optional
    /// timestamp and delete-metadata columns.
    pub(crate) fn build_idx_map(&mut self) {
        self.idx_map.clear();
        self.idx_names.clear();
        let attr_names: Vec<String> =
            self.schema.attributes().iter().map(|attr| attr.name().to_string()).collect();
        for name in attr_names {
            self.push_column(name);
        }
        self.push_column(COORDS.to_string());
        let dim_names: Vec<String> =
            self.schema.domain().dimensions().iter().map(|dim| dim.name().to_string()).collect();
        for name in dim_names {
            self.push_column(name);
        }
        if self.has_timestamps {
            self.push_column(TIMESTAMPS.to_string());
        }
        if self.has_delete_meta {
            self.push_column(DELETE_TIMESTAMPS.to_string());
            self.push_column(DELETE_CONDITION_INDEX.to_string());
        }
    }

    fn push_column(&mut self, name: String) {
        self.idx_map.insert(name.clone(), self.idx_names.len());
        self.idx_names.push(name);
    }

    /// Number of columns tracked: attributes, the coordinates
    /// pseudo-attribute, dimensions, and the optional timestamp/delete
    /// columns.
    pub fn num_dims_and_attrs(&self) -> usize {
        self.idx_names.len()
    }

    pub(crate) fn idx(&self, name: &str) -> TesseraResult<usize> {
        self.idx_map
            .get(name)
            .copied()
            .ok_or_else(|| tessera_err!(Invalid: "unknown column '{}' in fragment metadata", name))
    }

    /// Size all per-column vectors and, for dense fragments, derive the
    /// tile-aligned `domain` from the non-empty domain.
    pub fn init(&mut self, non_empty_domain: NDRange) -> TesseraResult<()> {
        let num = self.num_dims_and_attrs();
        self.init_domain(non_empty_domain)?;
        self.last_tile_cell_num = 0;

        self.fixed_cols = (0..num).map(|_| ColumnSlot::default()).collect();
        self.var_cols = (0..num).map(|_| ColumnSlot::default()).collect();
        // Writer-populated vectors count as loaded from the start.
        for slot in self.fixed_cols.iter().chain(self.var_cols.iter()) {
            slot.loaded.store(true, Ordering::Release);
        }

        let state = self.state.get_mut();
        state.tile_var_sizes = vec![Vec::new(); num];
        state.tile_validity_offsets = vec![Vec::new(); num];
        state.file_validity_sizes = vec![0; num];
        state.tile_min_buffer = vec![Vec::new(); num];
        state.tile_min_var_buffer = vec![Vec::new(); num];
        state.tile_max_buffer = vec![Vec::new(); num];
        state.tile_max_var_buffer = vec![Vec::new(); num];
        state.tile_sums = vec![Vec::new(); num];
        state.tile_null_counts = vec![Vec::new(); num];
        state.fragment_mins = vec![Vec::new(); num];
        state.fragment_maxs = vec![Vec::new(); num];
        state.fragment_sums = vec![[0u8; 8]; num];
        state.fragment_null_counts = vec![0; num];

        self.loaded.tile_var_sizes = atomic_flags(num);
        self.loaded.tile_validity_offsets = atomic_flags(num);
        self.loaded.tile_min = atomic_flags(num);
        self.loaded.tile_max = atomic_flags(num);
        self.loaded.tile_sum = atomic_flags(num);
        self.loaded.tile_null_count = atomic_flags(num);
        for flags in [
            &self.loaded.tile_var_sizes,
            &self.loaded.tile_validity_offsets,
            &self.loaded.tile_min,
            &self.loaded.tile_max,
            &self.loaded.tile_sum,
            &self.loaded.tile_null_count,
        ] {
            for flag in flags {
                flag.store(true, Ordering::Release);
            }
        }
        self.loaded
            .fragment_min_max_sum_null_count
            .store(true, Ordering::Release);
        self.loaded
            .processed_conditions
            .store(true, Ordering::Release);
        self.loaded.rtree.store(true, Ordering::Release);
        Ok(())
    }

    fn init_domain(&mut self, non_empty_domain: NDRange) -> TesseraResult<()> {
        if non_empty_domain.is_empty() {
            return Err(tessera_err!(Invalid: "non-empty domain must not be empty at init"));
        }
        if !self.dense {
            // Sparse fragments accumulate their non-empty domain from MBRs.
            return Ok(());
        }
        let domain = self.schema.domain().clone();
        let state = self.state.get_mut();
        state.non_empty_domain = non_empty_domain;
        // A dense consolidation may have expanded the fragment beyond the
        // array domain to whole space tiles; crop back first.
        domain.crop_ndrange(&mut state.non_empty_domain);
        state.domain = state.non_empty_domain.clone();
        domain.expand_to_tiles(&mut state.domain);
        Ok(())
    }

    /// Resize every per-column vector to `num_tiles`. Statistics vectors
    /// are only allocated where the column's shape maintains them, and
    /// never for dense dimension columns. For sparse fragments this also
    /// sets the R-tree leaf count.
    pub fn set_num_tiles(&mut self, num_tiles: u64) -> TesseraResult<()> {
        let n = usize::try_from(num_tiles)
            .map_err(|_| tessera_err!(Invalid: "tile count {} exceeds usize", num_tiles))?;
        for i in 0..self.num_dims_and_attrs() {
            let name = self.idx_names[i].clone();
            let info = self.schema.column(&name)?;
            let cell_size = if info.var_size() {
                CELL_VAR_OFFSET_SIZE
            } else {
                info.cell_size()
            };

            let fixed = self.fixed_cols[i].data.get_mut();
            if n < fixed.offsets.len() {
                return Err(tessera_err!(
                    Invalid: "cannot shrink tile vectors from {} to {}", fixed.offsets.len(), n
                ));
            }
            fixed.offsets.resize(n, 0);
            self.var_cols[i].data.get_mut().offsets.resize(n, 0);

            let state = self.state.get_mut();
            state.tile_var_sizes[i].resize(n, 0);
            state.tile_validity_offsets[i].resize(n, 0);

            // No statistics for dense dimension columns.
            if !self.dense || !info.is_dim {
                if has_min_max_metadata(
                    info.datatype,
                    info.is_dim,
                    info.var_size(),
                    info.cell_val_num,
                ) {
                    let bytes = n as u64 * cell_size;
                    let bytes = usize::try_from(bytes)
                        .map_err(|_| tessera_err!(Invalid: "statistics buffer exceeds usize"))?;
                    state.tile_min_buffer[i].resize(bytes, 0);
                    state.tile_max_buffer[i].resize(bytes, 0);
                }
                if has_sum_metadata(info.datatype, info.var_size(), info.cell_val_num)
                    && !info.var_size()
                {
                    state.tile_sums[i].resize(n * 8, 0);
                }
                if info.nullable() {
                    state.tile_null_counts[i].resize(n, 0);
                }
            }
        }

        if !self.dense {
            self.state.get_mut().rtree.set_leaf_num(num_tiles)?;
            self.sparse_tile_num = num_tiles;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Plain accessors.

    /// The shared resources this fragment operates against.
    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    /// The memory tracker charged for loaded sections.
    pub fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.memory_tracker
    }

    /// The array schema this fragment was written against.
    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// The name of that schema.
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Replace the schema (readers resolve the footer's schema name).
    pub(crate) fn set_schema(&mut self, schema: Arc<ArraySchema>) {
        self.schema = schema;
        self.build_idx_map();
    }

    /// The fragment directory URI.
    pub fn fragment_uri(&self) -> &Uri {
        &self.fragment_uri
    }

    /// The fragment name (last component of its URI).
    pub fn fragment_name(&self) -> &str {
        self.fragment_uri.last_path_part()
    }

    /// The inclusive `[t_start, t_end]` window this fragment was written
    /// at.
    pub fn timestamp_range(&self) -> (u64, u64) {
        self.timestamp_range
    }

    /// The first timestamp of the range, the primary fragment sort key.
    pub fn first_timestamp(&self) -> u64 {
        self.timestamp_range.0
    }

    /// The fragment format version.
    pub fn format_version(&self) -> u32 {
        self.version
    }

    /// Whether the fragment is dense.
    pub fn dense(&self) -> bool {
        self.dense
    }

    /// Whether cells carry explicit timestamps.
    pub fn has_timestamps(&self) -> bool {
        self.has_timestamps
    }

    /// Whether the fragment carries delete metadata columns.
    pub fn has_delete_meta(&self) -> bool {
        self.has_delete_meta
    }

    /// Whether the footer was read from a consolidated metadata buffer.
    pub fn has_consolidated_footer(&self) -> bool {
        self.has_consolidated_footer
    }

    /// Serialized size of the footer.
    pub fn footer_size(&self) -> u64 {
        self.footer_size
    }

    /// Byte offset of the footer within the metadata file.
    pub fn footer_offset(&self) -> u64 {
        self.footer_offset
    }

    /// The generic sub-tile offsets recorded in the footer.
    pub fn generic_tile_offsets(&self) -> &GenericTileOffsets {
        &self.gt_offsets
    }

    /// Datatypes of the dimensions in order.
    pub fn dim_types(&self) -> Vec<tessera_dtype::Datatype> {
        self.schema
            .domain()
            .dimensions()
            .iter()
            .map(|d| d.datatype())
            .collect()
    }

    /// Number of cells in a full tile of this fragment.
    fn cells_per_full_tile(&self) -> u64 {
        if self.dense {
            self.schema.domain().cell_num_per_tile()
        } else {
            self.schema.capacity()
        }
    }

    /// Number of cells in tile `tile_pos`.
    pub fn cell_num_in_tile(&self, tile_pos: u64) -> u64 {
        if self.dense {
            return self.schema.domain().cell_num_per_tile();
        }
        if tile_pos != self.tile_num() - 1 {
            self.schema.capacity()
        } else {
            self.last_tile_cell_num()
        }
    }

    /// Total number of cells in the fragment.
    pub fn cell_num(&self) -> u64 {
        let tile_num = self.tile_num();
        if self.dense {
            tile_num * self.schema.domain().cell_num_per_tile()
        } else {
            (tile_num - 1) * self.schema.capacity() + self.last_tile_cell_num()
        }
    }

    /// Number of tiles in the fragment.
    pub fn tile_num(&self) -> u64 {
        if self.dense {
            let state = self.state.read();
            self.schema.domain().tile_num(&state.domain)
        } else {
            self.sparse_tile_num
        }
    }

    /// Cells in the trailing partial tile (a stored zero means a full
    /// tile).
    pub fn last_tile_cell_num(&self) -> u64 {
        if self.last_tile_cell_num == 0 {
            self.cells_per_full_tile()
        } else {
            self.last_tile_cell_num
        }
    }

    /// The fragment's non-empty domain.
    pub fn non_empty_domain(&self) -> NDRange {
        self.state.read().non_empty_domain.clone()
    }

    /// The tile-aligned expanded domain of a dense fragment.
    pub fn expanded_domain(&self) -> NDRange {
        self.state.read().domain.clone()
    }

    /// Total size of the fragment: every column file plus the metadata
    /// file.
    pub fn fragment_size(&self) -> TesseraResult<u64> {
        let mut size: u64 = 0;
        for slot in &self.fixed_cols {
            size += slot.data.lock().file_size;
        }
        for slot in &self.var_cols {
            size += slot.data.lock().file_size;
        }
        {
            let state = self.state.read();
            size += state.file_validity_sizes.iter().sum::<u64>();
        }
        let meta_file_size = if self.meta_file_size != 0 {
            self.meta_file_size
        } else {
            self.resources.vfs().file_size(&self.meta_uri())?
        };
        Ok(size + meta_file_size)
    }

    // ------------------------------------------------------------------
    // Write-side mutation. Tile indices are offset by the tile index base
    // so successive writer passes append contiguously.

    /// Set the base added to every incoming tile index.
    pub fn set_tile_index_base(&mut self, tile_base: u64) {
        self.tile_index_base = tile_base;
    }

    /// The current tile index base.
    pub fn tile_index_base(&self) -> u64 {
        self.tile_index_base
    }

    /// Set the cell count of the trailing partial tile.
    pub fn set_last_tile_cell_num(&mut self, cell_num: u64) {
        self.last_tile_cell_num = cell_num;
    }

    /// Record the MBR of sparse tile `tile` and grow the fragment's
    /// non-empty domain around it.
    pub fn set_mbr(&self, tile: u64, mbr: NDRange) -> TesseraResult<()> {
        let tile = tile + self.tile_index_base;
        let domain = self.schema.domain().clone();
        let mut state = self.state.write();
        state.rtree.set_leaf(tile, mbr.clone())?;
        domain.expand_ndrange(&mbr, &mut state.non_empty_domain);
        Ok(())
    }

    /// Record that tile `tid` of the named column starts where the
    /// column's file currently ends, and grow the file by `step` bytes.
    pub fn set_tile_offset(&self, name: &str, tid: u64, step: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut col = self.fixed_cols[idx].data.lock();
        col.offsets[tid] = col.file_size;
        col.file_size += step;
    }

    /// The var-data analogue of [`FragmentMetadata::set_tile_offset`].
    pub fn set_tile_var_offset(&self, name: &str, tid: u64, step: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut col = self.var_cols[idx].data.lock();
        col.offsets[tid] = col.file_size;
        col.file_size += step;
    }

    /// Record the in-memory var-data size of one tile.
    pub fn set_tile_var_size(&self, name: &str, tid: u64, size: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        self.state.write().tile_var_sizes[idx][tid] = size;
    }

    /// The validity-data analogue of [`FragmentMetadata::set_tile_offset`].
    pub fn set_tile_validity_offset(&self, name: &str, tid: u64, step: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut state = self.state.write();
        let offset = state.file_validity_sizes[idx];
        state.tile_validity_offsets[idx][tid] = offset;
        state.file_validity_sizes[idx] += step;
    }

    /// Record the fixed-width minimum of one tile, packed at
    /// `tid * cell_size`.
    pub fn set_tile_min(&self, name: &str, tid: u64, min: &[u8]) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let offset = tid * min.len();
        self.state.write().tile_min_buffer[idx][offset..offset + min.len()].copy_from_slice(min);
    }

    /// Record the fixed-width maximum of one tile.
    pub fn set_tile_max(&self, name: &str, tid: u64, max: &[u8]) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let offset = tid * max.len();
        self.state.write().tile_max_buffer[idx][offset..offset + max.len()].copy_from_slice(max);
    }

    /// Record the byte size of one tile's var minimum; converted to an
    /// absolute offset by
    /// [`FragmentMetadata::convert_tile_min_max_var_sizes_to_offsets`].
    pub fn set_tile_min_var_size(&self, name: &str, tid: u64, size: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut state = self.state.write();
        state.tile_min_buffer[idx][tid * 8..tid * 8 + 8].copy_from_slice(&size.to_le_bytes());
    }

    /// The max analogue of [`FragmentMetadata::set_tile_min_var_size`].
    pub fn set_tile_max_var_size(&self, name: &str, tid: u64, size: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut state = self.state.write();
        state.tile_max_buffer[idx][tid * 8..tid * 8 + 8].copy_from_slice(&size.to_le_bytes());
    }

    /// Copy one tile's var minimum into the var buffer at the offset laid
    /// down by the size-to-offset conversion.
    pub fn set_tile_min_var(&self, name: &str, tid: u64, min: &[u8]) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut state = self.state.write();
        let (start, end) = var_stat_slot(&state.tile_min_buffer[idx], &state.tile_min_var_buffer[idx], tid);
        if end > start {
            state.tile_min_var_buffer[idx][start..end].copy_from_slice(min);
        }
    }

    /// The max analogue of [`FragmentMetadata::set_tile_min_var`].
    pub fn set_tile_max_var(&self, name: &str, tid: u64, max: &[u8]) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        let mut state = self.state.write();
        let (start, end) = var_stat_slot(&state.tile_max_buffer[idx], &state.tile_max_var_buffer[idx], tid);
        if end > start {
            state.tile_max_var_buffer[idx][start..end].copy_from_slice(max);
        }
    }

    /// Turn the per-tile var min/max sizes recorded so far into absolute
    /// offsets (prefix sums) and size the companion var buffers.
    pub fn convert_tile_min_max_var_sizes_to_offsets(&self, name: &str) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let base = self.tile_index_base as usize;
        let mut guard = self.state.write();
        let state = &mut *guard;
        let min_total = sizes_to_offsets(
            &mut state.tile_min_buffer[idx],
            state.tile_min_var_buffer[idx].len() as u64,
            base,
        );
        state.tile_min_var_buffer[idx].resize(min_total, 0);
        let max_total = sizes_to_offsets(
            &mut state.tile_max_buffer[idx],
            state.tile_max_var_buffer[idx].len() as u64,
            base,
        );
        state.tile_max_var_buffer[idx].resize(max_total, 0);
    }

    /// Record one tile's sum as its raw 8-byte image.
    pub fn set_tile_sum(&self, name: &str, tid: u64, sum: &[u8]) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        self.state.write().tile_sums[idx][tid * 8..tid * 8 + 8].copy_from_slice(sum);
    }

    /// Record one tile's null count.
    pub fn set_tile_null_count(&self, name: &str, tid: u64, null_count: u64) {
        let idx = self.idx(name).tessera_expect("column validated by caller");
        let tid = (tid + self.tile_index_base) as usize;
        self.state.write().tile_null_counts[idx][tid] = null_count;
    }

    /// Replace the list of processed delete conditions.
    pub fn set_processed_conditions(&self, conditions: Vec<String>) {
        let mut state = self.state.write();
        state.processed_conditions_set = conditions.iter().cloned().collect();
        state.processed_conditions = conditions;
        self.loaded
            .processed_conditions
            .store(true, Ordering::Release);
    }

    /// The processed delete conditions in application order.
    pub fn get_processed_conditions(&self) -> TesseraResult<Vec<String>> {
        if !self.loaded.processed_conditions.load(Ordering::Acquire) && self.version >= 16 {
            return Err(tessera_err!(
                NotLoaded: "processed conditions have not been loaded"
            ));
        }
        Ok(self.state.read().processed_conditions.clone())
    }

    /// Whether the named delete condition has been applied to this
    /// fragment.
    pub fn has_processed_condition(&self, condition: &str) -> bool {
        self.state.read().processed_conditions_set.contains(condition)
    }

    // ------------------------------------------------------------------
    // Read-side accessors over loaded sections. Every accessor reports
    // `NotLoaded` rather than loading implicitly.

    fn require(&self, flag: &AtomicBool, what: &str) -> TesseraResult<()> {
        if !flag.load(Ordering::Acquire) {
            return Err(tessera_err!(NotLoaded: "{} metadata has not been loaded", what));
        }
        Ok(())
    }

    /// Start offset of tile `tile_pos` of the named column within its data
    /// file.
    pub fn file_offset(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(&self.fixed_cols[idx].loaded, "tile offsets")?;
        Ok(self.fixed_cols[idx].data.lock().offsets[tile_pos as usize])
    }

    /// Start offset of tile `tile_pos` within the column's var-data file.
    pub fn file_var_offset(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(&self.var_cols[idx].loaded, "tile var offsets")?;
        Ok(self.var_cols[idx].data.lock().offsets[tile_pos as usize])
    }

    /// Start offset of tile `tile_pos` within the column's validity file.
    pub fn file_validity_offset(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(
            &self.loaded.tile_validity_offsets[idx],
            "tile validity offsets",
        )?;
        Ok(self.state.read().tile_validity_offsets[idx][tile_pos as usize])
    }

    /// Total size of the named column's data file.
    pub fn file_size(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        Ok(self.fixed_cols[idx].data.lock().file_size)
    }

    /// Total size of the named column's var-data file.
    pub fn file_var_size(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        Ok(self.var_cols[idx].data.lock().file_size)
    }

    /// Total size of the named column's validity file.
    pub fn file_validity_size(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        Ok(self.state.read().file_validity_sizes[idx])
    }

    /// On-disk size of one tile: the forward difference of the offsets
    /// vector, with the last tile closed by the file size.
    pub fn persisted_tile_size(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(&self.fixed_cols[idx].loaded, "tile offsets")?;
        let tile_num = self.tile_num();
        let col = self.fixed_cols[idx].data.lock();
        Ok(persisted_size(&col.offsets, col.file_size, tile_num, tile_pos))
    }

    /// On-disk size of one var-data tile.
    pub fn persisted_tile_var_size(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(&self.var_cols[idx].loaded, "tile var offsets")?;
        let tile_num = self.tile_num();
        let col = self.var_cols[idx].data.lock();
        Ok(persisted_size(&col.offsets, col.file_size, tile_num, tile_pos))
    }

    /// On-disk size of one validity tile.
    pub fn persisted_tile_validity_size(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(
            &self.loaded.tile_validity_offsets[idx],
            "tile validity offsets",
        )?;
        let tile_num = self.tile_num();
        let state = self.state.read();
        Ok(persisted_size(
            &state.tile_validity_offsets[idx],
            state.file_validity_sizes[idx],
            tile_num,
            tile_pos,
        ))
    }

    /// In-memory size of one tile: cells times cell size, or the offsets
    /// vector of a var column.
    pub fn tile_size(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let info = self.schema.column(name)?;
        let cell_num = self.cell_num_in_tile(tile_pos);
        Ok(if info.var_size() {
            (cell_num + 1) * CELL_VAR_OFFSET_SIZE
        } else {
            cell_num * info.cell_size()
        })
    }

    /// In-memory var-data size of one tile.
    pub fn tile_var_size(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(&self.loaded.tile_var_sizes[idx], "tile var sizes")?;
        Ok(self.state.read().tile_var_sizes[idx][tile_pos as usize])
    }

    /// The MBR of sparse tile `tile_pos`.
    pub fn mbr(&self, tile_pos: u64) -> TesseraResult<NDRange> {
        self.require(&self.loaded.rtree, "R-tree")?;
        Ok(self.state.read().rtree.leaf(tile_pos).clone())
    }

    /// All MBRs in tile order.
    pub fn mbrs(&self) -> TesseraResult<Vec<NDRange>> {
        self.require(&self.loaded.rtree, "R-tree")?;
        Ok(self.state.read().rtree.leaves().to_vec())
    }

    /// Compute which tiles `range` touches through the R-tree.
    pub fn get_tile_overlap(
        &self,
        range: &NDRange,
        is_default: &[bool],
    ) -> TesseraResult<TileOverlap> {
        self.require(&self.loaded.rtree, "R-tree")?;
        Ok(self.state.read().rtree.get_tile_overlap(range, is_default))
    }

    /// The 1-D tile bitmap over one dimension.
    pub fn compute_tile_bitmap(
        &self,
        range: &crate::Range,
        d: usize,
        bitmap: &mut Vec<u8>,
    ) -> TesseraResult<()> {
        self.require(&self.loaded.rtree, "R-tree")?;
        self.state.read().rtree.compute_tile_bitmap(range, d, bitmap);
        Ok(())
    }

    fn check_min_max_applicable(&self, name: &str) -> TesseraResult<()> {
        let info = self.schema.column(name)?;
        if !has_min_max_metadata(info.datatype, info.is_dim, info.var_size(), info.cell_val_num) {
            return Err(tessera_err!(
                NotApplicable: "column '{}' does not maintain min/max metadata", name
            ));
        }
        Ok(())
    }

    /// The fixed-width minimum of one tile.
    pub fn get_tile_min_as<T: NativeType>(&self, name: &str, tile_pos: u64) -> TesseraResult<T> {
        let idx = self.idx(name)?;
        let info = self.schema.column(name)?;
        if info.var_size() || info.cell_size() != std::mem::size_of::<T>() as u64 {
            return Err(tessera_err!(
                Invalid: "tile min of column '{}' requested as the wrong type", name
            ));
        }
        self.require(&self.loaded.tile_min[idx], "tile min")?;
        self.check_min_max_applicable(name)?;
        let state = self.state.read();
        let size = std::mem::size_of::<T>();
        let offset = tile_pos as usize * size;
        T::try_from_le_bytes(&state.tile_min_buffer[idx][offset..offset + size])
    }

    /// The fixed-width maximum of one tile.
    pub fn get_tile_max_as<T: NativeType>(&self, name: &str, tile_pos: u64) -> TesseraResult<T> {
        let idx = self.idx(name)?;
        let info = self.schema.column(name)?;
        if info.var_size() || info.cell_size() != std::mem::size_of::<T>() as u64 {
            return Err(tessera_err!(
                Invalid: "tile max of column '{}' requested as the wrong type", name
            ));
        }
        self.require(&self.loaded.tile_max[idx], "tile max")?;
        self.check_min_max_applicable(name)?;
        let state = self.state.read();
        let size = std::mem::size_of::<T>();
        let offset = tile_pos as usize * size;
        T::try_from_le_bytes(&state.tile_max_buffer[idx][offset..offset + size])
    }

    /// The var-length minimum of one tile, borrowed from the metadata
    /// buffers. An empty minimum yields an empty slice, not an error.
    pub fn get_tile_min_var(
        &self,
        name: &str,
        tile_pos: u64,
    ) -> TesseraResult<parking_lot::MappedRwLockReadGuard<'_, [u8]>> {
        let idx = self.idx(name)?;
        let info = self.schema.column(name)?;
        if !info.var_size() {
            return Err(tessera_err!(
                Invalid: "tile min of column '{}' requested as the wrong type", name
            ));
        }
        self.require(&self.loaded.tile_min[idx], "tile min")?;
        self.check_min_max_applicable(name)?;
        let tile_num = self.tile_num();
        let state = self.state.read();
        Ok(RwLockReadGuard::map(state, |s| {
            var_stat_value(
                &s.tile_min_buffer[idx],
                &s.tile_min_var_buffer[idx],
                tile_pos,
                tile_num,
            )
        }))
    }

    /// The var-length maximum of one tile.
    pub fn get_tile_max_var(
        &self,
        name: &str,
        tile_pos: u64,
    ) -> TesseraResult<parking_lot::MappedRwLockReadGuard<'_, [u8]>> {
        let idx = self.idx(name)?;
        let info = self.schema.column(name)?;
        if !info.var_size() {
            return Err(tessera_err!(
                Invalid: "tile max of column '{}' requested as the wrong type", name
            ));
        }
        self.require(&self.loaded.tile_max[idx], "tile max")?;
        self.check_min_max_applicable(name)?;
        let tile_num = self.tile_num();
        let state = self.state.read();
        Ok(RwLockReadGuard::map(state, |s| {
            var_stat_value(
                &s.tile_max_buffer[idx],
                &s.tile_max_var_buffer[idx],
                tile_pos,
                tile_num,
            )
        }))
    }

    /// The raw 8-byte sum of one tile, reinterpreted by the column's sum
    /// type.
    pub fn get_tile_sum(&self, name: &str, tile_pos: u64) -> TesseraResult<[u8; 8]> {
        let idx = self.idx(name)?;
        self.require(&self.loaded.tile_sum[idx], "tile sum")?;
        let info = self.schema.column(name)?;
        if !has_sum_metadata(info.datatype, info.var_size(), info.cell_val_num) {
            return Err(tessera_err!(
                NotApplicable: "column '{}' does not maintain sum metadata", name
            ));
        }
        let state = self.state.read();
        let offset = tile_pos as usize * 8;
        let mut sum = [0u8; 8];
        sum.copy_from_slice(&state.tile_sums[idx][offset..offset + 8]);
        Ok(sum)
    }

    /// The null count of one tile.
    pub fn get_tile_null_count(&self, name: &str, tile_pos: u64) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(&self.loaded.tile_null_count[idx], "tile null count")?;
        if !self.schema.column(name)?.nullable() {
            return Err(tessera_err!(
                NotApplicable: "column '{}' is not nullable", name
            ));
        }
        Ok(self.state.read().tile_null_counts[idx][tile_pos as usize])
    }

    /// The fragment-wide minimum of the named column.
    pub fn get_min(&self, name: &str) -> TesseraResult<Vec<u8>> {
        let idx = self.idx(name)?;
        self.require(
            &self.loaded.fragment_min_max_sum_null_count,
            "fragment min/max/sum/null count",
        )?;
        self.check_min_max_applicable(name)?;
        Ok(self.state.read().fragment_mins[idx].clone())
    }

    /// The fragment-wide maximum of the named column.
    pub fn get_max(&self, name: &str) -> TesseraResult<Vec<u8>> {
        let idx = self.idx(name)?;
        self.require(
            &self.loaded.fragment_min_max_sum_null_count,
            "fragment min/max/sum/null count",
        )?;
        self.check_min_max_applicable(name)?;
        Ok(self.state.read().fragment_maxs[idx].clone())
    }

    /// The fragment-wide sum of the named column as its raw 8-byte image.
    pub fn get_sum(&self, name: &str) -> TesseraResult<[u8; 8]> {
        let idx = self.idx(name)?;
        self.require(
            &self.loaded.fragment_min_max_sum_null_count,
            "fragment min/max/sum/null count",
        )?;
        let info = self.schema.column(name)?;
        if !has_sum_metadata(info.datatype, info.var_size(), info.cell_val_num) {
            return Err(tessera_err!(
                NotApplicable: "column '{}' does not maintain sum metadata", name
            ));
        }
        Ok(self.state.read().fragment_sums[idx])
    }

    /// The fragment-wide null count of the named column.
    pub fn get_null_count(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.idx(name)?;
        self.require(
            &self.loaded.fragment_min_max_sum_null_count,
            "fragment min/max/sum/null count",
        )?;
        if !self.schema.column(name)?.nullable() {
            return Err(tessera_err!(
                NotApplicable: "column '{}' is not nullable", name
            ));
        }
        Ok(self.state.read().fragment_null_counts[idx])
    }

    /// The aggregate per-tile metadata of one column: cell count, null
    /// count, min/max bytes and, where maintained, the raw sum.
    ///
    /// Dimension columns answer min/max from the tile's MBR.
    pub fn get_tile_metadata(&self, name: &str, tile_pos: u64) -> TesseraResult<TileMetadata> {
        let info = self.schema.column(name)?;
        let count = self.cell_num_in_tile(tile_pos);

        let null_count = if info.nullable() {
            self.get_tile_null_count(name, tile_pos)?
        } else {
            0
        };

        let (min, max) = if info.is_dim {
            let dim_idx = self
                .schema
                .domain()
                .dim_index(name)
                .tessera_expect("dimension resolved by column lookup");
            let mbr = self.mbr(tile_pos)?;
            (
                mbr[dim_idx].start_bytes().to_vec(),
                mbr[dim_idx].end_bytes().to_vec(),
            )
        } else if info.var_size() {
            (
                self.get_tile_min_var(name, tile_pos)?.to_vec(),
                self.get_tile_max_var(name, tile_pos)?.to_vec(),
            )
        } else {
            let idx = self.idx(name)?;
            self.require(&self.loaded.tile_min[idx], "tile min")?;
            self.require(&self.loaded.tile_max[idx], "tile max")?;
            self.check_min_max_applicable(name)?;
            let size = info.cell_size() as usize;
            let state = self.state.read();
            let at = tile_pos as usize * size;
            (
                state.tile_min_buffer[idx][at..at + size].to_vec(),
                state.tile_max_buffer[idx][at..at + size].to_vec(),
            )
        };

        let sum = if has_sum_metadata(info.datatype, info.var_size(), info.cell_val_num) {
            Some(self.get_tile_sum(name, tile_pos)?)
        } else {
            None
        };

        Ok(TileMetadata {
            count,
            null_count,
            min,
            max,
            sum,
        })
    }

    // ------------------------------------------------------------------
    // Subarray estimation.

    /// Grow `buffer_sizes` (fixed-bytes, var-bytes per column) by the
    /// maximum result sizes of `subarray` against this fragment.
    pub fn add_max_buffer_sizes(
        &self,
        encryption_key: &EncryptionKey,
        subarray: &NDRange,
        buffer_sizes: &mut FxHashMap<String, (u64, u64)>,
    ) -> TesseraResult<()> {
        if self.dense {
            let tids = self.compute_overlapping_tile_ids(subarray)?;
            for tid in tids {
                self.add_tile_to_buffer_sizes(tid, buffer_sizes)?;
            }
        } else {
            self.load_rtree(encryption_key)?;
            let is_default = vec![false; subarray.len()];
            let overlap = self.get_tile_overlap(subarray, &is_default)?;
            for (first, last) in &overlap.tile_ranges {
                for tid in *first..=*last {
                    self.add_tile_to_buffer_sizes(tid, buffer_sizes)?;
                }
            }
            for (tid, _) in &overlap.tiles {
                self.add_tile_to_buffer_sizes(*tid, buffer_sizes)?;
            }
        }
        Ok(())
    }

    fn add_tile_to_buffer_sizes(
        &self,
        tid: u64,
        buffer_sizes: &mut FxHashMap<String, (u64, u64)>,
    ) -> TesseraResult<()> {
        for (name, sizes) in buffer_sizes.iter_mut() {
            let info = self.schema.column(name)?;
            if info.var_size() {
                let cell_num = self.cell_num_in_tile(tid);
                sizes.0 += cell_num * CELL_VAR_OFFSET_SIZE;
                sizes.1 += self.tile_var_size(name, tid)?;
            } else {
                sizes.0 += self.cell_num_in_tile(tid) * info.cell_size();
            }
        }
        Ok(())
    }

    /// Ids of the dense tiles overlapping `subarray`, enumerated in tile
    /// layout order over the expanded fragment domain.
    pub fn compute_overlapping_tile_ids(&self, subarray: &NDRange) -> TesseraResult<Vec<u64>> {
        if !self.dense {
            return Err(tessera_err!(
                Invalid: "dense tile enumeration on a sparse fragment"
            ));
        }
        let domain = self.schema.domain().clone();
        let state = self.state.read();
        let frag_domain = &state.domain;
        let mut tids = Vec::new();

        for (d, dim) in domain.dimensions().iter().enumerate() {
            if !dim.overlap(&subarray[d], &frag_domain[d]) {
                return Ok(tids);
            }
        }

        // Per-dimension first/last overlapping tile index.
        let mut tile_domain = Vec::with_capacity(domain.dim_num());
        for (d, dim) in domain.dimensions().iter().enumerate() {
            let frag = &frag_domain[d];
            let mut cropped = subarray[d].clone();
            crop_to(dim, &mut cropped, frag);
            let first = dim.tile_idx(cropped.start_bytes(), frag.start_bytes());
            let last = dim.tile_idx(cropped.end_bytes(), frag.start_bytes());
            tile_domain.push((first, last));
        }

        let mut coords: Vec<u64> = tile_domain.iter().map(|(first, _)| *first).collect();
        loop {
            tids.push(domain.tile_pos(frag_domain, &coords));
            if !domain.get_next_tile_coords(&tile_domain, &mut coords) {
                break;
            }
        }
        Ok(tids)
    }
}

/// Clamp a fixed-width range into `bounds` on both ends.
fn crop_to(dim: &crate::Dimension, r: &mut crate::Range, bounds: &crate::Range) {
    let low = if dim.smaller_than(r.start_bytes(), bounds) {
        bounds.start_bytes().to_vec()
    } else {
        r.start_bytes().to_vec()
    };
    let high_probe =
        crate::Range::from_fixed_bytes(&[bounds.end_bytes(), bounds.end_bytes()].concat());
    let high = if dim.smaller_than(r.end_bytes(), &high_probe) {
        r.end_bytes().to_vec()
    } else {
        bounds.end_bytes().to_vec()
    };
    *r = crate::Range::from_fixed_bytes(&[low, high].concat());
}

/// The inclusive byte span of one tile's var min/max value within the var
/// buffer, derived from the prefix-sum offsets in the fixed buffer.
fn var_stat_slot(fixed: &[u8], var: &[u8], tid: usize) -> (usize, usize) {
    let offset_at = |t: usize| -> usize {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&fixed[t * 8..t * 8 + 8]);
        u64::from_le_bytes(bytes) as usize
    };
    let start = offset_at(tid);
    let end = if (tid + 1) * 8 < fixed.len() {
        offset_at(tid + 1)
    } else {
        var.len()
    };
    (start, end)
}

fn var_stat_value<'a>(fixed: &'a [u8], var: &'a [u8], tile_pos: u64, tile_num: u64) -> &'a [u8] {
    let tid = tile_pos as usize;
    let offset_at = |t: usize| -> usize {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&fixed[t * 8..t * 8 + 8]);
        u64::from_le_bytes(bytes) as usize
    };
    let start = offset_at(tid);
    let end = if tile_pos == tile_num - 1 {
        var.len()
    } else {
        offset_at(tid + 1)
    };
    &var[start..end]
}

/// Convert per-tile sizes (u64 packed in `fixed`, starting at tile `base`)
/// into absolute offsets, returning the total var bytes needed.
fn sizes_to_offsets(fixed: &mut [u8], mut offset: u64, base: usize) -> usize {
    let tiles = fixed.len() / 8;
    for t in base..tiles {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&fixed[t * 8..t * 8 + 8]);
        let size = u64::from_le_bytes(bytes);
        fixed[t * 8..t * 8 + 8].copy_from_slice(&offset.to_le_bytes());
        offset += size;
    }
    offset as usize
}

fn persisted_size(offsets: &[u64], file_size: u64, tile_num: u64, tile_pos: u64) -> u64 {
    let t = tile_pos as usize;
    if tile_pos != tile_num - 1 {
        offsets[t + 1] - offsets[t]
    } else {
        file_size - offsets[t]
    }
}

impl PartialEq for FragmentMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_range.0 == other.timestamp_range.0
            && self.fragment_uri == other.fragment_uri
    }
}

impl Eq for FragmentMetadata {}

impl PartialOrd for FragmentMetadata {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FragmentMetadata {
    /// Fragments order by `(t_start, uri)`, the order readers consume them
    /// in.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp_range
            .0
            .cmp(&other.timestamp_range.0)
            .then_with(|| self.fragment_uri.cmp(&other.fragment_uri))
    }
}
