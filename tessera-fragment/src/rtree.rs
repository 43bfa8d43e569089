use std::sync::Arc;

use tessera_error::{tessera_err, TesseraResult};

use crate::io::{Deserializer, Serializer};
use crate::{Domain, NDRange, Range, TileOverlap};

/// An R-tree over the MBRs of a sparse fragment's tiles.
///
/// Leaves are the MBRs in tile (write) order and are never sorted; the
/// internal levels are bulk-loaded bottom-up by [`RTree::build_tree`], each
/// node the per-dimension union of up to `fanout` children. The tree is
/// rebuilt from scratch after deserialization and never mutated once built.
#[derive(Debug)]
pub struct RTree {
    domain: Arc<Domain>,
    fanout: u64,
    /// `levels[0]` holds the leaves; the last level holds the root once the
    /// tree is built.
    levels: Vec<Vec<NDRange>>,
}

impl RTree {
    /// Create an empty tree over the given domain.
    pub fn new(domain: Arc<Domain>, fanout: u32) -> Self {
        Self {
            domain,
            fanout: fanout.max(2) as u64,
            levels: vec![Vec::new()],
        }
    }

    /// The domain the MBRs range over.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// The configured fan-out.
    pub fn fanout(&self) -> u64 {
        self.fanout
    }

    /// Number of leaves (sparse tiles).
    pub fn leaf_num(&self) -> u64 {
        self.levels[0].len() as u64
    }

    /// Number of levels, leaves included.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    /// Grow the leaf level to `num` MBRs. Shrinking is not supported.
    pub fn set_leaf_num(&mut self, num: u64) -> TesseraResult<()> {
        let num = usize::try_from(num)
            .map_err(|_| tessera_err!(Invalid: "leaf count {} exceeds usize", num))?;
        if num < self.levels[0].len() {
            return Err(tessera_err!(
                Invalid: "cannot shrink R-tree leaves from {} to {}",
                self.levels[0].len(),
                num
            ));
        }
        self.levels[0].resize(num, NDRange::new());
        Ok(())
    }

    /// Set the MBR of leaf `idx`.
    pub fn set_leaf(&mut self, idx: u64, mbr: NDRange) -> TesseraResult<()> {
        let leaves = &mut self.levels[0];
        let slot = leaves
            .get_mut(usize::try_from(idx).unwrap_or(usize::MAX))
            .ok_or_else(|| {
                tessera_err!(Invalid: "leaf index {} out of bounds", idx)
            })?;
        *slot = mbr;
        Ok(())
    }

    /// The MBR of leaf `idx`.
    pub fn leaf(&self, idx: u64) -> &NDRange {
        &self.levels[0][idx as usize]
    }

    /// All leaves in tile order.
    pub fn leaves(&self) -> &[NDRange] {
        &self.levels[0]
    }

    /// Bulk-load the internal levels bottom-up. Any previously built levels
    /// are discarded first.
    pub fn build_tree(&mut self) {
        self.levels.truncate(1);
        while self.levels[self.levels.len() - 1].len() > 1 {
            let child_level = &self.levels[self.levels.len() - 1];
            let mut level = Vec::with_capacity(child_level.len().div_ceil(self.fanout as usize));
            for group in child_level.chunks(self.fanout as usize) {
                let mut node = group[0].clone();
                for child in &group[1..] {
                    self.domain.expand_ndrange(child, &mut node);
                }
                level.push(node);
            }
            self.levels.push(level);
        }
    }

    /// Compute which tiles `subarray` touches. `is_default[d]` marks a
    /// dimension the query does not constrain; such a dimension passes
    /// every node.
    ///
    /// Descends from the root with early termination: a node fully covered
    /// by the subarray contributes its whole leaf range without visiting
    /// its children.
    pub fn get_tile_overlap(&self, subarray: &NDRange, is_default: &[bool]) -> TileOverlap {
        let mut overlap = TileOverlap::default();
        if self.leaf_num() == 0 {
            return overlap;
        }
        let top = self.levels.len() - 1;
        for idx in 0..self.levels[top].len() {
            self.visit(top, idx, subarray, is_default, &mut overlap);
        }
        overlap
    }

    fn visit(
        &self,
        level: usize,
        idx: usize,
        subarray: &NDRange,
        is_default: &[bool],
        out: &mut TileOverlap,
    ) {
        let mbr = &self.levels[level][idx];
        if !self.overlaps(mbr, subarray, is_default) {
            return;
        }
        if self.covered(mbr, subarray, is_default) {
            out.tile_ranges.push(self.leaf_range(level, idx));
            return;
        }
        if level == 0 {
            let ratio = self.coverage(mbr, subarray, is_default);
            out.tiles.push((idx as u64, ratio));
            return;
        }
        let child_level = level - 1;
        let first = idx * self.fanout as usize;
        let last = ((idx + 1) * self.fanout as usize).min(self.levels[child_level].len());
        for child in first..last {
            self.visit(child_level, child, subarray, is_default, out);
        }
    }

    /// The inclusive leaf-id range a node at `(level, idx)` spans.
    fn leaf_range(&self, level: usize, idx: usize) -> (u64, u64) {
        let span = self
            .fanout
            .checked_pow(level as u32)
            .unwrap_or(u64::MAX);
        let first = idx as u64 * span;
        let last = first
            .saturating_add(span)
            .saturating_sub(1)
            .min(self.leaf_num() - 1);
        (first, last)
    }

    fn overlaps(&self, mbr: &NDRange, subarray: &NDRange, is_default: &[bool]) -> bool {
        self.domain
            .dimensions()
            .iter()
            .enumerate()
            .all(|(d, dim)| is_default[d] || dim.overlap(&subarray[d], &mbr[d]))
    }

    fn covered(&self, mbr: &NDRange, subarray: &NDRange, is_default: &[bool]) -> bool {
        self.domain
            .dimensions()
            .iter()
            .enumerate()
            .all(|(d, dim)| is_default[d] || dim.covered(&mbr[d], &subarray[d]))
    }

    fn coverage(&self, mbr: &NDRange, subarray: &NDRange, is_default: &[bool]) -> f64 {
        self.domain
            .dimensions()
            .iter()
            .enumerate()
            .map(|(d, dim)| {
                if is_default[d] {
                    1.0
                } else {
                    dim.overlap_ratio(&subarray[d], &mbr[d])
                }
            })
            .product()
    }

    /// The 1-D variant used by query-planning heuristics: set
    /// `bitmap[leaf] = 1` iff the leaf's MBR overlaps `range` on dimension
    /// `d`.
    pub fn compute_tile_bitmap(&self, range: &Range, d: usize, bitmap: &mut Vec<u8>) {
        let dim = self.domain.dimension(d);
        bitmap.resize(self.levels[0].len(), 0);
        for (leaf, mbr) in self.levels[0].iter().enumerate() {
            bitmap[leaf] = u8::from(dim.overlap(range, &mbr[d]));
        }
    }

    /// Serialize the leaves (internal levels are rebuilt on load).
    pub fn serialize(&self, serializer: &mut Serializer) {
        serializer.write(self.domain.dim_num() as u64);
        serializer.write(self.leaf_num());
        for mbr in &self.levels[0] {
            for (d, dim) in self.domain.dimensions().iter().enumerate() {
                let r = &mbr[d];
                if dim.var_size() {
                    serializer.write(r.size());
                    serializer.write(r.start_size());
                    serializer.write_bytes(r.data());
                } else {
                    serializer.write_bytes(r.data());
                }
            }
        }
    }

    /// Replace this tree with the leaves in `deserializer` and rebuild the
    /// internal levels.
    pub fn deserialize(&mut self, deserializer: &mut Deserializer<'_>) -> TesseraResult<()> {
        let dim_num = deserializer.read::<u64>()?;
        if dim_num != self.domain.dim_num() as u64 {
            return Err(tessera_err!(
                Corrupt: "R-tree holds {} dimensions, domain has {}",
                dim_num,
                self.domain.dim_num()
            ));
        }
        let leaf_num = deserializer.read::<u64>()?;
        let mut leaves = Vec::with_capacity(usize::try_from(leaf_num.min(4096)).unwrap_or(0));
        for _ in 0..leaf_num {
            let mut mbr = NDRange::with_capacity(self.domain.dim_num());
            for dim in self.domain.dimensions() {
                if dim.var_size() {
                    let size = deserializer.read::<u64>()?;
                    let start_size = deserializer.read::<u64>()?;
                    let data = deserializer.read_bytes(size)?;
                    mbr.push(Range::from_var_bytes(data, start_size)?);
                } else {
                    let data = deserializer.read_bytes(2 * dim.coord_size())?;
                    mbr.push(Range::from_fixed_bytes(data));
                }
            }
            leaves.push(mbr);
        }
        self.levels = vec![leaves];
        if leaf_num > 0 {
            self.build_tree();
        }
        Ok(())
    }

    /// Drop every level and report an estimate of the bytes released, so
    /// the caller can credit its memory tracker.
    pub fn free_memory(&mut self) -> u64 {
        let freed: u64 = self
            .levels
            .iter()
            .flatten()
            .flatten()
            .map(|r| r.size() + std::mem::size_of::<Range>() as u64)
            .sum();
        self.levels = vec![Vec::new()];
        freed
    }
}
