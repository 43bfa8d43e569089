//! The read-side of fragment metadata: footer discovery and parsing, plus
//! the on-demand section loads guarded by double-checked flags and the
//! memory budget.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use itertools::Itertools;
use tessera_error::{tessera_err, TesseraResult, TesseraUnwrap};

use crate::io::{Deserializer, EncryptionKey, GenericTileIo};
use crate::meta::{atomic_flags, ColumnSlot, FragmentMetadata};
use crate::{MemoryType, NDRange, Range, SchemaMap, LEGACY_SCHEMA_NAME, TILE_METADATA_MIN_VERSION};

impl FragmentMetadata {
    /// Load the footer (or, for format versions 1–2, the whole legacy
    /// metadata blob).
    ///
    /// `consolidated` carries a pre-fetched consolidated-metadata buffer
    /// and the byte offset of this fragment's footer within it; when
    /// absent, the footer is located in the fragment's own metadata file.
    /// `schemas` must contain the schema named by the footer.
    pub fn load(
        &mut self,
        encryption_key: &EncryptionKey,
        consolidated: Option<(&[u8], u64)>,
        schemas: &SchemaMap,
    ) -> TesseraResult<()> {
        if consolidated.is_none() {
            self.meta_file_size = self.resources.vfs().file_size(&self.meta_uri())?;
        }
        if self.version <= 2 {
            self.load_v1_v2(encryption_key, schemas)
        } else {
            self.load_footer(encryption_key, consolidated, schemas)
        }
    }

    // ------------------------------------------------------------------
    // Footer discovery.

    fn load_footer(
        &mut self,
        _encryption_key: &EncryptionKey,
        consolidated: Option<(&[u8], u64)>,
        schemas: &SchemaMap,
    ) -> TesseraResult<()> {
        if self.loaded.footer.load(Ordering::Acquire) {
            return Ok(());
        }

        let footer_bytes: Bytes;
        let footer_view: &[u8];
        match consolidated {
            Some((buffer, offset)) => {
                self.has_consolidated_footer = true;
                self.footer_offset = offset;
                self.footer_size = 0; // derived from the bytes consumed below
                let offset = usize::try_from(offset)
                    .map_err(|_| tessera_err!(Corrupt: "footer offset exceeds usize"))?;
                if offset > buffer.len() {
                    return Err(tessera_err!(
                        Corrupt: "footer offset {} outside consolidated buffer of {} bytes",
                        offset,
                        buffer.len()
                    ));
                }
                footer_view = &buffer[offset..];
            }
            None => {
                self.has_consolidated_footer = false;
                let (offset, size) = self.get_footer_offset_and_size()?;
                self.footer_offset = offset;
                self.footer_size = size;
                self.memory_tracker.reserve(size, MemoryType::Footer)?;
                self.resources
                    .stats()
                    .add_counter("read_frag_meta_size", size);
                footer_bytes = self.resources.vfs().read(&self.meta_uri(), offset, size)?;
                footer_view = &footer_bytes;
            }
        }

        let mut deserializer = Deserializer::new(footer_view);
        self.read_footer(&mut deserializer, schemas)?;
        if self.footer_size == 0 {
            self.footer_size = deserializer.position() as u64;
        }
        self.loaded.footer.store(true, Ordering::Release);
        Ok(())
    }

    /// Where the footer lives in the metadata file. Versions whose footer
    /// size is not computable (any var dimension, or v10+) record it in a
    /// trailing u64; earlier all-fixed versions use a closed formula.
    fn get_footer_offset_and_size(&self) -> TesseraResult<(u64, u64)> {
        let all_fixed = self.schema.domain().all_dims_fixed();
        let size = if all_fixed && self.version < 5 {
            self.footer_size_v3_v4()
        } else if all_fixed && self.version < 7 {
            self.footer_size_v5_v6()
        } else if all_fixed && self.version < 10 {
            self.footer_size_v7_v9()
        } else {
            let size_offset = self
                .meta_file_size
                .checked_sub(8)
                .ok_or_else(|| tessera_err!(Corrupt: "metadata file too small for a footer"))?;
            let bytes = self.resources.vfs().read(&self.meta_uri(), size_offset, 8)?;
            let size = Deserializer::new(&bytes).read::<u64>()?;
            self.resources.stats().add_counter("read_frag_meta_size", 8);
            let offset = size_offset.checked_sub(size).ok_or_else(|| {
                tessera_err!(
                    Corrupt: "footer size {} points outside a metadata file of {} bytes",
                    size,
                    self.meta_file_size
                )
            })?;
            return Ok((offset, size));
        };
        let offset = self.meta_file_size.checked_sub(size).ok_or_else(|| {
            tessera_err!(
                Corrupt: "footer size {} points outside a metadata file of {} bytes",
                size,
                self.meta_file_size
            )
        })?;
        Ok((offset, size))
    }

    fn fixed_domain_size(&self) -> u64 {
        self.schema
            .domain()
            .dimensions()
            .iter()
            .map(|d| 2 * d.coord_size())
            .sum()
    }

    fn footer_size_v3_v4(&self) -> u64 {
        let a = self.schema.attribute_num() as u64;
        let mut size = 0u64;
        size += 4; // version
        size += 1; // dense
        size += 1; // null non-empty domain
        size += self.fixed_domain_size();
        size += 8; // sparse tile num
        size += 8; // last tile cell num
        size += (a + 1) * 8; // file sizes
        size += a * 8; // file var sizes
        size += 8; // R-tree offset
        size += (a + 1) * 8; // tile offsets
        size += a * 8; // tile var offsets
        size += a * 8; // tile var sizes
        size
    }

    fn footer_size_v5_v6(&self) -> u64 {
        let num = self.num_dims_and_attrs() as u64;
        let mut size = 0u64;
        size += 4 + 1 + 1;
        size += self.fixed_domain_size();
        size += 8 + 8;
        size += num * 8 * 2; // file sizes, file var sizes
        size += 8; // R-tree offset
        size += num * 8 * 3; // tile offsets, var offsets, var sizes
        size
    }

    fn footer_size_v7_v9(&self) -> u64 {
        let num = self.num_dims_and_attrs() as u64;
        let mut size = 0u64;
        size += 4 + 1 + 1;
        size += self.fixed_domain_size();
        size += 8 + 8;
        size += num * 8 * 3; // file sizes, var sizes, validity sizes
        size += 8; // R-tree offset
        size += num * 8 * 4; // tile, var, var-size, validity offsets
        size
    }

    // ------------------------------------------------------------------
    // Footer parsing.

    fn read_footer(
        &mut self,
        deserializer: &mut Deserializer<'_>,
        schemas: &SchemaMap,
    ) -> TesseraResult<()> {
        let version = deserializer.read::<u32>()?;
        if version == 0 || version > crate::FORMAT_VERSION {
            return Err(tessera_err!(Invalid: "invalid version {} in footer", version));
        }
        self.version = version;

        let schema_name = if self.version >= 10 {
            let size = deserializer.read::<u64>()?;
            if size == 0 {
                return Err(tessera_err!(Corrupt: "schema name of size zero in footer"));
            }
            String::from_utf8(deserializer.read_bytes(size)?.to_vec())
                .map_err(|_| tessera_err!(Corrupt: "schema name in footer is not UTF-8"))?
        } else {
            // Fragments predating named schemas always reference the
            // original schema.
            LEGACY_SCHEMA_NAME.to_string()
        };
        let schema = schemas.get(&schema_name).ok_or_else(|| {
            tessera_err!(
                Invalid: "could not find schema '{}' in the map of schemas loaded; \
                 consider reloading the array to check for new array schemas",
                schema_name
            )
        })?;
        self.schema_name = schema_name;
        self.set_schema(schema.clone());

        self.dense = deserializer.read::<u8>()? != 0;
        self.read_non_empty_domain(deserializer)?;
        self.sparse_tile_num = deserializer.read::<u64>()?;
        self.last_tile_cell_num = deserializer.read::<u64>()?;

        if self.version >= 14 {
            self.has_timestamps = deserializer.read::<u8>()? != 0;
            if self.has_timestamps {
                self.build_idx_map();
            }
        }
        if self.version >= 15 {
            self.has_delete_meta = deserializer.read::<u8>()? != 0;
            if self.has_delete_meta {
                self.build_idx_map();
            }
        }

        let num = self.num_dims_and_attrs();
        self.size_column_vectors(num);

        // File sizes. Pre-v5 footers only track the attributes and the
        // coordinates pseudo-attribute.
        let file_size_num = if self.version < 5 {
            self.schema.attribute_num() + 1
        } else {
            num
        };
        for i in 0..file_size_num {
            self.fixed_cols[i].data.get_mut().file_size = deserializer.read::<u64>()?;
        }
        let var_size_num = if self.version < 5 {
            self.schema.attribute_num()
        } else {
            num
        };
        for i in 0..var_size_num {
            self.var_cols[i].data.get_mut().file_size = deserializer.read::<u64>()?;
        }
        if self.version >= 7 {
            for i in 0..num {
                self.state.get_mut().file_validity_sizes[i] = deserializer.read::<u64>()?;
            }
        }

        self.read_generic_tile_offsets(deserializer)?;
        Ok(())
    }

    /// Size every per-column vector for lazy loading, with all loaded flags
    /// down.
    fn size_column_vectors(&mut self, num: usize) {
        self.fixed_cols = (0..num).map(|_| ColumnSlot::default()).collect();
        self.var_cols = (0..num).map(|_| ColumnSlot::default()).collect();
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
    }

    fn read_non_empty_domain(&mut self, deserializer: &mut Deserializer<'_>) -> TesseraResult<()> {
        let domain = self.schema.domain().clone();
        let ned = if self.version <= 2 {
            // u64 payload size; zero means empty.
            let payload_size = deserializer.read::<u64>()?;
            if payload_size == 0 {
                NDRange::new()
            } else {
                let payload = deserializer.read_bytes(payload_size)?;
                let mut ned = NDRange::with_capacity(domain.dim_num());
                let mut offset = 0usize;
                for dim in domain.dimensions() {
                    let size = 2 * dim.coord_size() as usize;
                    ned.push(Range::from_fixed_bytes(&payload[offset..offset + size]));
                    offset += size;
                }
                ned
            }
        } else if self.version <= 4 {
            // Null flag plus a fixed-width payload.
            let null = deserializer.read::<u8>()? != 0;
            let mut ned = NDRange::new();
            if !null {
                for dim in domain.dimensions() {
                    let bytes = deserializer.read_bytes(2 * dim.coord_size())?;
                    ned.push(Range::from_fixed_bytes(bytes));
                }
            }
            ned
        } else {
            // Null flag plus per-dimension fixed or var-sized ranges; a
            // null all-fixed domain is followed by dummy zero bytes.
            let null = deserializer.read::<u8>()? != 0;
            let mut ned = NDRange::new();
            if !null {
                for dim in domain.dimensions() {
                    if dim.var_size() {
                        let size = deserializer.read::<u64>()?;
                        let start_size = deserializer.read::<u64>()?;
                        let data = deserializer.read_bytes(size)?;
                        ned.push(Range::from_var_bytes(data, start_size)?);
                    } else {
                        let bytes = deserializer.read_bytes(2 * dim.coord_size())?;
                        ned.push(Range::from_fixed_bytes(bytes));
                    }
                }
            } else if domain.all_dims_fixed() {
                deserializer.read_bytes(self.fixed_domain_size())?;
            }
            ned
        };

        let state = self.state.get_mut();
        state.non_empty_domain = ned;
        if !state.non_empty_domain.is_empty() {
            state.domain = state.non_empty_domain.clone();
            domain.expand_to_tiles(&mut state.domain);
        }
        Ok(())
    }

    fn read_generic_tile_offsets(
        &mut self,
        deserializer: &mut Deserializer<'_>,
    ) -> TesseraResult<()> {
        let num = self.num_dims_and_attrs();
        let read_vec = |d: &mut Deserializer<'_>, n: usize| -> TesseraResult<Vec<u64>> {
            (0..n).map(|_| d.read::<u64>()).try_collect()
        };

        self.gt_offsets.rtree = deserializer.read::<u64>()?;
        if self.version <= 4 {
            let a = self.schema.attribute_num();
            self.gt_offsets.tile_offsets = read_vec(deserializer, a + 1)?;
            self.gt_offsets.tile_var_offsets = read_vec(deserializer, a)?;
            self.gt_offsets.tile_var_sizes = read_vec(deserializer, a)?;
            return Ok(());
        }

        self.gt_offsets.tile_offsets = read_vec(deserializer, num)?;
        self.gt_offsets.tile_var_offsets = read_vec(deserializer, num)?;
        self.gt_offsets.tile_var_sizes = read_vec(deserializer, num)?;
        if self.version >= 7 {
            self.gt_offsets.tile_validity_offsets = read_vec(deserializer, num)?;
        }
        if self.version >= 11 {
            self.gt_offsets.tile_min = read_vec(deserializer, num)?;
            self.gt_offsets.tile_max = read_vec(deserializer, num)?;
            self.gt_offsets.tile_sum = read_vec(deserializer, num)?;
            self.gt_offsets.tile_null_count = read_vec(deserializer, num)?;
            self.gt_offsets.fragment_min_max_sum_null_count = deserializer.read::<u64>()?;
        }
        if self.version >= 16 {
            self.gt_offsets.processed_conditions = deserializer.read::<u64>()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Legacy single-tile layout (format versions 1 and 2): everything in
    // one generic tile at offset 0, loaded eagerly.

    fn load_v1_v2(
        &mut self,
        encryption_key: &EncryptionKey,
        schemas: &SchemaMap,
    ) -> TesseraResult<()> {
        let schema = schemas.get(LEGACY_SCHEMA_NAME).ok_or_else(|| {
            tessera_err!(
                Invalid: "could not find schema '{}' in the map of schemas loaded",
                LEGACY_SCHEMA_NAME
            )
        })?;
        self.schema_name = LEGACY_SCHEMA_NAME.to_string();
        self.set_schema(schema.clone());

        let tile = self.read_generic_tile_from_file(encryption_key, 0)?;
        self.resources
            .stats()
            .add_counter("read_frag_meta_size", tile.len() as u64);
        let num = self.num_dims_and_attrs();
        self.size_column_vectors(num);

        let mut d = Deserializer::new(&tile);
        self.version = d.read::<u32>()?;
        self.read_non_empty_domain(&mut d)?;

        // MBRs, which double as the sparse tile count.
        let mbr_num = d.read::<u64>()?;
        {
            let domain = self.schema.domain().clone();
            let state = self.state.get_mut();
            state.rtree.set_leaf_num(mbr_num)?;
            for m in 0..mbr_num {
                let mut mbr = NDRange::with_capacity(domain.dim_num());
                for dim in domain.dimensions() {
                    let bytes = d.read_bytes(2 * dim.coord_size())?;
                    mbr.push(Range::from_fixed_bytes(bytes));
                }
                state.rtree.set_leaf(m, mbr)?;
            }
            if mbr_num > 0 {
                state.rtree.build_tree();
            }
        }
        self.sparse_tile_num = mbr_num;
        self.loaded.rtree.store(true, Ordering::Release);

        let attr_num = self.schema.attribute_num();
        for i in 0..attr_num + 1 {
            let offsets = d.read_u64_vec()?;
            self.memory_tracker
                .reserve(offsets.len() as u64 * 8, MemoryType::TileOffsets)?;
            self.fixed_cols[i].data.get_mut().offsets = offsets;
            self.fixed_cols[i].loaded.store(true, Ordering::Release);
        }
        for i in 0..attr_num {
            let offsets = d.read_u64_vec()?;
            self.memory_tracker
                .reserve(offsets.len() as u64 * 8, MemoryType::TileOffsets)?;
            self.var_cols[i].data.get_mut().offsets = offsets;
            self.var_cols[i].loaded.store(true, Ordering::Release);
        }
        for i in 0..attr_num {
            let sizes = d.read_u64_vec()?;
            self.memory_tracker
                .reserve(sizes.len() as u64 * 8, MemoryType::TileOffsets)?;
            self.state.get_mut().tile_var_sizes[i] = sizes;
            self.loaded.tile_var_sizes[i].store(true, Ordering::Release);
        }

        self.last_tile_cell_num = d.read::<u64>()?;
        for i in 0..attr_num + 1 {
            self.fixed_cols[i].data.get_mut().file_size = d.read::<u64>()?;
        }
        for i in 0..attr_num {
            self.var_cols[i].data.get_mut().file_size = d.read::<u64>()?;
        }

        self.loaded.footer.store(true, Ordering::Release);
        Ok(())
    }

    // ------------------------------------------------------------------
    // On-demand section loads.

    pub(crate) fn read_generic_tile_from_file(
        &self,
        encryption_key: &EncryptionKey,
        offset: u64,
    ) -> TesseraResult<Bytes> {
        let io = GenericTileIo::new(self.resources.vfs(), self.meta_uri());
        io.read_generic(offset, encryption_key)
    }

    /// Load the R-tree of a sparse fragment.
    pub fn load_rtree(&self, encryption_key: &EncryptionKey) -> TesseraResult<()> {
        if self.version <= 2 {
            return Ok(());
        }
        if self.loaded.rtree.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.rtree.load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self.read_generic_tile_from_file(encryption_key, self.gt_offsets.rtree)?;
        self.resources
            .stats()
            .add_counter("read_rtree_size", tile.len() as u64);
        // The serialized size stands in for the in-memory footprint.
        self.memory_tracker
            .reserve(tile.len() as u64, MemoryType::RTree)?;
        state.rtree.deserialize(&mut Deserializer::new(&tile))?;
        self.loaded.rtree.store(true, Ordering::Release);
        Ok(())
    }

    /// Drop the R-tree and return its memory to the tracker.
    pub fn free_rtree(&self) {
        let mut state = self.state.write();
        let freed = state.rtree.free_memory();
        self.memory_tracker.release_memory(freed, MemoryType::RTree);
        self.loaded.rtree.store(false, Ordering::Release);
    }

    /// Batched load of the tile offsets of the named columns: fixed
    /// offsets first, then var offsets, then validity offsets, each pass
    /// in column-index order so file reads stay sequential.
    pub fn load_tile_offsets(
        &self,
        encryption_key: &EncryptionKey,
        mut names: Vec<String>,
    ) -> TesseraResult<()> {
        self.sort_by_index(&mut names)?;
        for name in &names {
            self.load_tile_offsets_idx(encryption_key, self.idx(name)?)?;
        }
        for name in &names {
            if self.schema.column(name)?.var_size() {
                self.load_tile_var_offsets_idx(encryption_key, self.idx(name)?)?;
            }
        }
        for name in &names {
            if self.schema.column(name)?.nullable() {
                self.load_tile_validity_offsets_idx(encryption_key, self.idx(name)?)?;
            }
        }
        Ok(())
    }

    fn sort_by_index(&self, names: &mut [String]) -> TesseraResult<()> {
        for name in names.iter() {
            self.idx(name)?;
        }
        // Every name was just validated against the index map.
        names.sort_by_key(|name| self.idx(name).tessera_unwrap());
        Ok(())
    }

    fn load_tile_offsets_idx(
        &self,
        encryption_key: &EncryptionKey,
        idx: usize,
    ) -> TesseraResult<()> {
        if self.version <= 2 {
            return Ok(());
        }
        let slot = &self.fixed_cols[idx];
        if slot.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut col = slot.data.lock();
        if slot.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let tile =
            self.read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_offsets[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_offsets_size", tile.len() as u64);
        let offsets = Deserializer::new(&tile).read_u64_vec()?;
        check_monotonic(&offsets, col.file_size, "tile offsets")?;
        if !offsets.is_empty() {
            self.memory_tracker
                .reserve(offsets.len() as u64 * 8, MemoryType::TileOffsets)?;
        }
        col.offsets = offsets;
        slot.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn load_tile_var_offsets_idx(
        &self,
        encryption_key: &EncryptionKey,
        idx: usize,
    ) -> TesseraResult<()> {
        if self.version <= 2 {
            return Ok(());
        }
        let slot = &self.var_cols[idx];
        if slot.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut col = slot.data.lock();
        if slot.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self
            .read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_var_offsets[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_var_offsets_size", tile.len() as u64);
        let offsets = Deserializer::new(&tile).read_u64_vec()?;
        check_monotonic(&offsets, col.file_size, "tile var offsets")?;
        if !offsets.is_empty() {
            self.memory_tracker
                .reserve(offsets.len() as u64 * 8, MemoryType::TileOffsets)?;
        }
        col.offsets = offsets;
        slot.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn load_tile_validity_offsets_idx(
        &self,
        encryption_key: &EncryptionKey,
        idx: usize,
    ) -> TesseraResult<()> {
        if self.version <= 6 {
            return Ok(());
        }
        if self.loaded.tile_validity_offsets[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.tile_validity_offsets[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self.read_generic_tile_from_file(
            encryption_key,
            self.gt_offsets.tile_validity_offsets[idx],
        )?;
        self.resources
            .stats()
            .add_counter("read_tile_validity_offsets_size", tile.len() as u64);
        let offsets = Deserializer::new(&tile).read_u64_vec()?;
        check_monotonic(&offsets, state.file_validity_sizes[idx], "tile validity offsets")?;
        if !offsets.is_empty() {
            self.memory_tracker
                .reserve(offsets.len() as u64 * 8, MemoryType::TileOffsets)?;
        }
        state.tile_validity_offsets[idx] = offsets;
        self.loaded.tile_validity_offsets[idx].store(true, Ordering::Release);
        Ok(())
    }

    /// Load the var-data sizes of one named column.
    pub fn load_tile_var_sizes(
        &self,
        encryption_key: &EncryptionKey,
        name: &str,
    ) -> TesseraResult<()> {
        if self.version <= 2 {
            return Ok(());
        }
        let idx = self.idx(name)?;
        if self.loaded.tile_var_sizes[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.tile_var_sizes[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let tile =
            self.read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_var_sizes[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_var_sizes_size", tile.len() as u64);
        let sizes = Deserializer::new(&tile).read_u64_vec()?;
        if !sizes.is_empty() {
            self.memory_tracker
                .reserve(sizes.len() as u64 * 8, MemoryType::TileOffsets)?;
        }
        state.tile_var_sizes[idx] = sizes;
        self.loaded.tile_var_sizes[idx].store(true, Ordering::Release);
        Ok(())
    }

    /// Batched load of the per-tile minimum values of the named columns.
    pub fn load_tile_min_values(
        &self,
        encryption_key: &EncryptionKey,
        mut names: Vec<String>,
    ) -> TesseraResult<()> {
        self.sort_by_index(&mut names)?;
        for name in &names {
            self.load_tile_min_idx(encryption_key, self.idx(name)?)?;
        }
        Ok(())
    }

    /// Batched load of the per-tile maximum values of the named columns.
    pub fn load_tile_max_values(
        &self,
        encryption_key: &EncryptionKey,
        mut names: Vec<String>,
    ) -> TesseraResult<()> {
        self.sort_by_index(&mut names)?;
        for name in &names {
            self.load_tile_max_idx(encryption_key, self.idx(name)?)?;
        }
        Ok(())
    }

    /// Batched load of the per-tile sums of the named columns.
    pub fn load_tile_sum_values(
        &self,
        encryption_key: &EncryptionKey,
        mut names: Vec<String>,
    ) -> TesseraResult<()> {
        self.sort_by_index(&mut names)?;
        for name in &names {
            self.load_tile_sum_idx(encryption_key, self.idx(name)?)?;
        }
        Ok(())
    }

    /// Batched load of the per-tile null counts of the named columns.
    pub fn load_tile_null_count_values(
        &self,
        encryption_key: &EncryptionKey,
        mut names: Vec<String>,
    ) -> TesseraResult<()> {
        self.sort_by_index(&mut names)?;
        for name in &names {
            self.load_tile_null_count_idx(encryption_key, self.idx(name)?)?;
        }
        Ok(())
    }

    fn load_tile_min_idx(&self, encryption_key: &EncryptionKey, idx: usize) -> TesseraResult<()> {
        if self.version < TILE_METADATA_MIN_VERSION {
            return Ok(());
        }
        if self.loaded.tile_min[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.tile_min[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self.read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_min[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_min_size", tile.len() as u64);
        let mut d = Deserializer::new(&tile);
        let buffer_size = d.read::<u64>()?;
        let var_buffer_size = d.read::<u64>()?;
        if buffer_size != 0 {
            self.memory_tracker
                .reserve(buffer_size + var_buffer_size, MemoryType::MinMaxSumNullCount)?;
            state.tile_min_buffer[idx] = d.read_bytes(buffer_size)?.to_vec();
            state.tile_min_var_buffer[idx] = d.read_bytes(var_buffer_size)?.to_vec();
        }
        self.loaded.tile_min[idx].store(true, Ordering::Release);
        Ok(())
    }

    fn load_tile_max_idx(&self, encryption_key: &EncryptionKey, idx: usize) -> TesseraResult<()> {
        if self.version < TILE_METADATA_MIN_VERSION {
            return Ok(());
        }
        if self.loaded.tile_max[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.tile_max[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self.read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_max[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_max_size", tile.len() as u64);
        let mut d = Deserializer::new(&tile);
        let buffer_size = d.read::<u64>()?;
        let var_buffer_size = d.read::<u64>()?;
        if buffer_size != 0 {
            self.memory_tracker
                .reserve(buffer_size + var_buffer_size, MemoryType::MinMaxSumNullCount)?;
            state.tile_max_buffer[idx] = d.read_bytes(buffer_size)?.to_vec();
            state.tile_max_var_buffer[idx] = d.read_bytes(var_buffer_size)?.to_vec();
        }
        self.loaded.tile_max[idx].store(true, Ordering::Release);
        Ok(())
    }

    fn load_tile_sum_idx(&self, encryption_key: &EncryptionKey, idx: usize) -> TesseraResult<()> {
        if self.version < TILE_METADATA_MIN_VERSION {
            return Ok(());
        }
        if self.loaded.tile_sum[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.tile_sum[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self.read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_sum[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_sum_size", tile.len() as u64);
        let mut d = Deserializer::new(&tile);
        let sum_num = d.read::<u64>()?;
        if sum_num != 0 {
            self.memory_tracker
                .reserve(sum_num * 8, MemoryType::MinMaxSumNullCount)?;
            state.tile_sums[idx] = d.read_bytes(sum_num * 8)?.to_vec();
        }
        self.loaded.tile_sum[idx].store(true, Ordering::Release);
        Ok(())
    }

    fn load_tile_null_count_idx(
        &self,
        encryption_key: &EncryptionKey,
        idx: usize,
    ) -> TesseraResult<()> {
        if self.version < TILE_METADATA_MIN_VERSION {
            return Ok(());
        }
        if self.loaded.tile_null_count[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.tile_null_count[idx].load(Ordering::Acquire) {
            return Ok(());
        }
        let tile =
            self.read_generic_tile_from_file(encryption_key, self.gt_offsets.tile_null_count[idx])?;
        self.resources
            .stats()
            .add_counter("read_tile_null_count_size", tile.len() as u64);
        let counts = Deserializer::new(&tile).read_u64_vec()?;
        if !counts.is_empty() {
            self.memory_tracker
                .reserve(counts.len() as u64 * 8, MemoryType::MinMaxSumNullCount)?;
        }
        state.tile_null_counts[idx] = counts;
        self.loaded.tile_null_count[idx].store(true, Ordering::Release);
        Ok(())
    }

    /// Load the per-fragment min/max/sum/null-count roll-up.
    pub fn load_fragment_min_max_sum_null_count(
        &self,
        encryption_key: &EncryptionKey,
    ) -> TesseraResult<()> {
        if self.version <= TILE_METADATA_MIN_VERSION {
            return Ok(());
        }
        if self
            .loaded
            .fragment_min_max_sum_null_count
            .load(Ordering::Acquire)
        {
            return Ok(());
        }
        let mut state = self.state.write();
        if self
            .loaded
            .fragment_min_max_sum_null_count
            .load(Ordering::Acquire)
        {
            return Ok(());
        }
        let tile = self.read_generic_tile_from_file(
            encryption_key,
            self.gt_offsets.fragment_min_max_sum_null_count,
        )?;
        self.resources
            .stats()
            .add_counter("read_fragment_min_max_sum_null_count_size", tile.len() as u64);
        self.memory_tracker
            .reserve(tile.len() as u64, MemoryType::MinMaxSumNullCount)?;
        let mut d = Deserializer::new(&tile);
        for i in 0..self.num_dims_and_attrs() {
            let min_size = d.read::<u64>()?;
            state.fragment_mins[i] = d.read_bytes(min_size)?.to_vec();
            let max_size = d.read::<u64>()?;
            state.fragment_maxs[i] = d.read_bytes(max_size)?.to_vec();
            let mut sum = [0u8; 8];
            sum.copy_from_slice(d.read_bytes(8)?);
            state.fragment_sums[i] = sum;
            state.fragment_null_counts[i] = d.read::<u64>()?;
        }
        self.loaded
            .fragment_min_max_sum_null_count
            .store(true, Ordering::Release);
        Ok(())
    }

    /// Load the processed delete conditions.
    pub fn load_processed_conditions(&self, encryption_key: &EncryptionKey) -> TesseraResult<()> {
        if self.version <= 15 {
            return Ok(());
        }
        if self.loaded.processed_conditions.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.write();
        if self.loaded.processed_conditions.load(Ordering::Acquire) {
            return Ok(());
        }
        let tile = self
            .read_generic_tile_from_file(encryption_key, self.gt_offsets.processed_conditions)?;
        self.resources
            .stats()
            .add_counter("read_processed_conditions_size", tile.len() as u64);
        let mut d = Deserializer::new(&tile);
        let num = d.read::<u64>()?;
        let mut conditions = Vec::with_capacity(usize::try_from(num.min(1024)).unwrap_or(0));
        for _ in 0..num {
            let size = d.read::<u64>()?;
            let bytes = d.read_bytes(size)?;
            conditions.push(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| tessera_err!(Corrupt: "processed condition is not UTF-8"))?,
            );
        }
        state.processed_conditions_set = conditions.iter().cloned().collect();
        state.processed_conditions = conditions;
        self.loaded
            .processed_conditions
            .store(true, Ordering::Release);
        Ok(())
    }

    /// Release every tile-offsets vector (fixed, var, var-sizes, validity)
    /// back to the memory tracker. Each vector is released exactly once.
    pub fn free_tile_offsets(&self) {
        for slot in &self.fixed_cols {
            let mut col = slot.data.lock();
            self.memory_tracker
                .release_memory(col.offsets.len() as u64 * 8, MemoryType::TileOffsets);
            col.offsets = Vec::new();
            slot.loaded.store(false, Ordering::Release);
        }
        for slot in &self.var_cols {
            let mut col = slot.data.lock();
            self.memory_tracker
                .release_memory(col.offsets.len() as u64 * 8, MemoryType::TileOffsets);
            col.offsets = Vec::new();
            slot.loaded.store(false, Ordering::Release);
        }
        let mut state = self.state.write();
        for (idx, offsets) in state.tile_validity_offsets.iter_mut().enumerate() {
            self.memory_tracker
                .release_memory(offsets.len() as u64 * 8, MemoryType::TileOffsets);
            *offsets = Vec::new();
            self.loaded.tile_validity_offsets[idx].store(false, Ordering::Release);
        }
        for (idx, sizes) in state.tile_var_sizes.iter_mut().enumerate() {
            self.memory_tracker
                .release_memory(sizes.len() as u64 * 8, MemoryType::TileOffsets);
            *sizes = Vec::new();
            self.loaded.tile_var_sizes[idx].store(false, Ordering::Release);
        }
    }
}

/// Offsets must never decrease, and must stay within the column file.
fn check_monotonic(offsets: &[u64], file_size: u64, what: &str) -> TesseraResult<()> {
    for pair in offsets.windows(2) {
        if pair[1] < pair[0] {
            return Err(tessera_err!(
                Corrupt: "{} vector is non-monotonic ({} after {})", what, pair[1], pair[0]
            ));
        }
    }
    if let Some(last) = offsets.last() {
        if *last > file_size {
            return Err(tessera_err!(
                Corrupt: "{} vector ends at {} beyond a file of {} bytes", what, last, file_size
            ));
        }
    }
    Ok(())
}
