/// The tiles of one fragment that a query subarray touches.
///
/// Whole-tile hits are reported as inclusive id ranges; tiles the subarray
/// only partially covers are reported individually with the fraction of the
/// tile's MBR the subarray overlaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileOverlap {
    /// Inclusive `(first, last)` tile-id ranges fully covered by the
    /// subarray.
    pub tile_ranges: Vec<(u64, u64)>,
    /// `(tile_id, coverage)` pairs for partially overlapping tiles, with
    /// `coverage` in `(0.0, 1.0]`.
    pub tiles: Vec<(u64, f64)>,
}

impl TileOverlap {
    /// Total number of tiles reported.
    pub fn tile_num(&self) -> u64 {
        let ranged: u64 = self
            .tile_ranges
            .iter()
            .map(|(first, last)| last - first + 1)
            .sum();
        ranged + self.tiles.len() as u64
    }

    /// Whether no tile overlaps the subarray.
    pub fn is_empty(&self) -> bool {
        self.tile_ranges.is_empty() && self.tiles.is_empty()
    }
}
