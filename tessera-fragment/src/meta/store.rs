//! The write-side persistence of fragment metadata: every section becomes a
//! generic tile, the footer indexes them all, and a trailing length word
//! lets readers find the footer when its size is not computable up front.

use tessera_error::{tessera_err, TesseraResult};

use crate::io::{EncryptionKey, GenericTileIo, Serializer};
use crate::meta::FragmentMetadata;
use crate::FORMAT_VERSION_WRITE_FLOOR;

/// One section of the metadata file, in the enum's declaration order for
/// the most recent versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaSection {
    RTree,
    TileOffsets,
    TileVarOffsets,
    TileVarSizes,
    TileValidityOffsets,
    TileMin,
    TileMax,
    TileSum,
    TileNullCount,
    FragmentMinMaxSumNullCount,
    ProcessedConditions,
}

/// The sections each format version stores, in file order. The footer
/// always follows.
fn sections_for_version(version: u32) -> &'static [MetaSection] {
    use MetaSection::*;
    const V7_V10: &[MetaSection] = &[
        RTree,
        TileOffsets,
        TileVarOffsets,
        TileVarSizes,
        TileValidityOffsets,
    ];
    const V11: &[MetaSection] = &[
        RTree,
        TileOffsets,
        TileVarOffsets,
        TileVarSizes,
        TileValidityOffsets,
        TileMin,
        TileMax,
        TileSum,
        TileNullCount,
    ];
    const V12_V14: &[MetaSection] = &[
        RTree,
        TileOffsets,
        TileVarOffsets,
        TileVarSizes,
        TileValidityOffsets,
        TileMin,
        TileMax,
        TileSum,
        TileNullCount,
        FragmentMinMaxSumNullCount,
    ];
    const V15_PLUS: &[MetaSection] = &[
        RTree,
        TileOffsets,
        TileVarOffsets,
        TileVarSizes,
        TileValidityOffsets,
        TileMin,
        TileMax,
        TileSum,
        TileNullCount,
        FragmentMinMaxSumNullCount,
        ProcessedConditions,
    ];
    match version {
        0..=10 => V7_V10,
        11 => V11,
        12..=14 => V12_V14,
        _ => V15_PLUS,
    }
}

impl FragmentMetadata {
    /// Persist the metadata: every generic sub-tile in the version's order,
    /// then the footer. On any failure the partial metadata file is removed
    /// and the error is rethrown with the fragment URI attached.
    pub fn store(&mut self, encryption_key: &EncryptionKey) -> TesseraResult<()> {
        if self.version < FORMAT_VERSION_WRITE_FLOOR {
            return Err(tessera_err!(
                Unsupported: "cannot store fragment metadata at version {} (floor is {}) for {}",
                self.version,
                FORMAT_VERSION_WRITE_FLOOR,
                self.fragment_uri
            ));
        }
        match self.try_store(encryption_key) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.clean_up()?;
                Err(e.with_context(format!(
                    "storing fragment metadata failed on {}",
                    self.meta_uri()
                )))
            }
        }
    }

    fn try_store(&mut self, encryption_key: &EncryptionKey) -> TesseraResult<()> {
        self.resources.vfs().create_dir(&self.fragment_uri)?;

        let num = self.num_dims_and_attrs();
        let mut offset: u64 = 0;

        for section in sections_for_version(self.version) {
            match section {
                MetaSection::RTree => {
                    self.gt_offsets.rtree = offset;
                    offset += self.store_rtree(encryption_key)?;
                }
                MetaSection::TileOffsets => {
                    self.gt_offsets.tile_offsets = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_offsets.push(offset);
                        offset += self.store_tile_offsets(i, encryption_key)?;
                    }
                }
                MetaSection::TileVarOffsets => {
                    self.gt_offsets.tile_var_offsets = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_var_offsets.push(offset);
                        offset += self.store_tile_var_offsets(i, encryption_key)?;
                    }
                }
                MetaSection::TileVarSizes => {
                    self.gt_offsets.tile_var_sizes = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_var_sizes.push(offset);
                        offset += self.store_tile_var_sizes(i, encryption_key)?;
                    }
                }
                MetaSection::TileValidityOffsets => {
                    self.gt_offsets.tile_validity_offsets = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_validity_offsets.push(offset);
                        offset += self.store_tile_validity_offsets(i, encryption_key)?;
                    }
                }
                MetaSection::TileMin => {
                    self.gt_offsets.tile_min = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_min.push(offset);
                        offset += self.store_tile_mins(i, encryption_key)?;
                    }
                }
                MetaSection::TileMax => {
                    self.gt_offsets.tile_max = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_max.push(offset);
                        offset += self.store_tile_maxs(i, encryption_key)?;
                    }
                }
                MetaSection::TileSum => {
                    self.gt_offsets.tile_sum = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_sum.push(offset);
                        offset += self.store_tile_sums(i, encryption_key)?;
                    }
                }
                MetaSection::TileNullCount => {
                    self.gt_offsets.tile_null_count = Vec::with_capacity(num);
                    for i in 0..num {
                        self.gt_offsets.tile_null_count.push(offset);
                        offset += self.store_tile_null_counts(i, encryption_key)?;
                    }
                }
                MetaSection::FragmentMinMaxSumNullCount => {
                    self.gt_offsets.fragment_min_max_sum_null_count = offset;
                    offset += self.store_fragment_min_max_sum_null_count(encryption_key)?;
                }
                MetaSection::ProcessedConditions => {
                    self.gt_offsets.processed_conditions = offset;
                    offset += self.store_processed_conditions(encryption_key)?;
                }
            }
        }

        self.store_footer(offset)?;
        Ok(())
    }

    /// Remove the (partial) metadata file after a failed store.
    pub(crate) fn clean_up(&self) -> TesseraResult<()> {
        self.resources.vfs().remove_file(&self.meta_uri())
    }

    fn write_section(
        &self,
        payload: &[u8],
        encryption_key: &EncryptionKey,
        counter: &'static str,
    ) -> TesseraResult<u64> {
        let io = GenericTileIo::new(self.resources.vfs(), self.meta_uri());
        let nbytes = io.write_generic(payload, self.version, encryption_key)?;
        self.resources.stats().add_counter(counter, nbytes);
        Ok(nbytes)
    }

    fn store_rtree(&mut self, encryption_key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        {
            let state = self.state.get_mut();
            state.rtree.build_tree();
            state.rtree.serialize(&mut serializer);
        }
        self.write_section(&serializer.into_vec(), encryption_key, "write_rtree_size")
    }

    fn store_tile_offsets(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        serializer.write_u64_vec(&self.fixed_cols[idx].data.get_mut().offsets);
        self.write_section(&serializer.into_vec(), key, "write_tile_offsets_size")
    }

    fn store_tile_var_offsets(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        serializer.write_u64_vec(&self.var_cols[idx].data.get_mut().offsets);
        self.write_section(&serializer.into_vec(), key, "write_tile_var_offsets_size")
    }

    fn store_tile_var_sizes(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        serializer.write_u64_vec(&self.state.get_mut().tile_var_sizes[idx]);
        self.write_section(&serializer.into_vec(), key, "write_tile_var_sizes_size")
    }

    fn store_tile_validity_offsets(
        &mut self,
        idx: usize,
        key: &EncryptionKey,
    ) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        serializer.write_u64_vec(&self.state.get_mut().tile_validity_offsets[idx]);
        self.write_section(&serializer.into_vec(), key, "write_tile_validity_offsets_size")
    }

    fn store_tile_mins(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        {
            let state = self.state.get_mut();
            serializer.write(state.tile_min_buffer[idx].len() as u64);
            serializer.write(state.tile_min_var_buffer[idx].len() as u64);
            serializer.write_bytes(&state.tile_min_buffer[idx]);
            serializer.write_bytes(&state.tile_min_var_buffer[idx]);
        }
        self.write_section(&serializer.into_vec(), key, "write_mins_size")
    }

    fn store_tile_maxs(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        {
            let state = self.state.get_mut();
            serializer.write(state.tile_max_buffer[idx].len() as u64);
            serializer.write(state.tile_max_var_buffer[idx].len() as u64);
            serializer.write_bytes(&state.tile_max_buffer[idx]);
            serializer.write_bytes(&state.tile_max_var_buffer[idx]);
        }
        self.write_section(&serializer.into_vec(), key, "write_maxs_size")
    }

    fn store_tile_sums(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        {
            let state = self.state.get_mut();
            let sums = &state.tile_sums[idx];
            serializer.write(sums.len() as u64 / 8);
            serializer.write_bytes(sums);
        }
        self.write_section(&serializer.into_vec(), key, "write_sums_size")
    }

    fn store_tile_null_counts(&mut self, idx: usize, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        serializer.write_u64_vec(&self.state.get_mut().tile_null_counts[idx]);
        self.write_section(&serializer.into_vec(), key, "write_null_counts_size")
    }

    fn store_fragment_min_max_sum_null_count(
        &mut self,
        key: &EncryptionKey,
    ) -> TesseraResult<u64> {
        let num = self.num_dims_and_attrs();
        let mut serializer = Serializer::new();
        {
            let state = self.state.get_mut();
            for i in 0..num {
                serializer.write(state.fragment_mins[i].len() as u64);
                serializer.write_bytes(&state.fragment_mins[i]);
                serializer.write(state.fragment_maxs[i].len() as u64);
                serializer.write_bytes(&state.fragment_maxs[i]);
                serializer.write_bytes(&state.fragment_sums[i]);
                serializer.write(state.fragment_null_counts[i]);
            }
        }
        self.write_section(
            &serializer.into_vec(),
            key,
            "write_fragment_min_max_sum_null_count_size",
        )
    }

    fn store_processed_conditions(&mut self, key: &EncryptionKey) -> TesseraResult<u64> {
        let mut serializer = Serializer::new();
        {
            let state = self.state.get_mut();
            serializer.write(state.processed_conditions.len() as u64);
            for condition in &state.processed_conditions {
                serializer.write(condition.len() as u64);
                serializer.write_bytes(condition.as_bytes());
            }
        }
        self.write_section(&serializer.into_vec(), key, "write_processed_conditions_size")
    }

    /// Serialize and append the footer, followed by its byte size when any
    /// dimension is var-sized or the version records lengths (v10+).
    fn store_footer(&mut self, footer_offset: u64) -> TesseraResult<()> {
        let mut serializer = Serializer::new();
        self.write_footer(&mut serializer)?;
        let payload = serializer.into_vec();

        self.footer_offset = footer_offset;
        self.footer_size = payload.len() as u64;

        let meta_uri = self.meta_uri();
        let vfs = self.resources.vfs();
        vfs.append(&meta_uri, &payload)?;
        if !self.schema.domain().all_dims_fixed() || self.version >= 10 {
            vfs.append(&meta_uri, &self.footer_size.to_le_bytes())?;
        }
        self.meta_file_size = vfs.file_size(&meta_uri)?;
        self.resources
            .stats()
            .add_counter("write_frag_meta_footer_size", self.footer_size);
        Ok(())
    }

    /// The footer byte layout, shared by every version from 3 up; fields
    /// outside the fragment's version are skipped.
    fn write_footer(&mut self, serializer: &mut Serializer) -> TesseraResult<()> {
        serializer.write(self.version);

        if self.version >= 10 {
            if self.schema_name.is_empty() {
                return Err(tessera_err!(
                    Invalid: "cannot write footer; schema name is empty"
                ));
            }
            serializer.write(self.schema_name.len() as u64);
            serializer.write_bytes(self.schema_name.as_bytes());
        }

        serializer.write(u8::from(self.dense));
        self.write_non_empty_domain(serializer);
        serializer.write(self.sparse_tile_num);
        serializer.write(self.last_tile_cell_num());

        if self.version >= 14 {
            serializer.write(u8::from(self.has_timestamps));
        }
        if self.version >= 15 {
            serializer.write(u8::from(self.has_delete_meta));
        }

        let num = self.num_dims_and_attrs();
        for i in 0..num {
            let size = self.fixed_cols[i].data.get_mut().file_size;
            serializer.write(size);
        }
        for i in 0..num {
            let size = self.var_cols[i].data.get_mut().file_size;
            serializer.write(size);
        }
        if self.version >= 7 {
            for i in 0..num {
                let size = self.state.get_mut().file_validity_sizes[i];
                serializer.write(size);
            }
        }

        self.write_generic_tile_offsets(serializer);
        Ok(())
    }

    fn write_non_empty_domain(&mut self, serializer: &mut Serializer) {
        let domain = self.schema.domain().clone();
        let state = self.state.get_mut();
        let empty = state.non_empty_domain.is_empty();
        serializer.write(u8::from(empty));
        if empty {
            // Dummy zero bytes; applicable only to all-fixed domains.
            for dim in domain.dimensions() {
                serializer.write_bytes(&vec![0u8; 2 * dim.coord_size() as usize]);
            }
            return;
        }
        for (d, dim) in domain.dimensions().iter().enumerate() {
            let r = &state.non_empty_domain[d];
            if dim.var_size() {
                serializer.write(r.size());
                serializer.write(r.start_size());
                serializer.write_bytes(r.data());
            } else {
                serializer.write_bytes(r.data());
            }
        }
    }

    fn write_generic_tile_offsets(&self, serializer: &mut Serializer) {
        let gt = &self.gt_offsets;
        serializer.write(gt.rtree);
        for offset in &gt.tile_offsets {
            serializer.write(*offset);
        }
        for offset in &gt.tile_var_offsets {
            serializer.write(*offset);
        }
        for offset in &gt.tile_var_sizes {
            serializer.write(*offset);
        }
        if self.version >= 7 {
            for offset in &gt.tile_validity_offsets {
                serializer.write(*offset);
            }
        }
        if self.version >= 11 {
            for offset in &gt.tile_min {
                serializer.write(*offset);
            }
            for offset in &gt.tile_max {
                serializer.write(*offset);
            }
            for offset in &gt.tile_sum {
                serializer.write(*offset);
            }
            for offset in &gt.tile_null_count {
                serializer.write(*offset);
            }
            serializer.write(gt.fragment_min_max_sum_null_count);
        }
        if self.version >= 16 {
            serializer.write(gt.processed_conditions);
        }
    }
}
