use parking_lot::Mutex;
use tessera_error::{tessera_err, TesseraResult};

/// The category of a metadata memory reservation, tracked separately so the
/// query layer can see what a fragment's budget went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// The deserialized R-tree of a sparse fragment.
    RTree,
    /// Tile offset vectors (fixed, var, var-sizes, validity).
    TileOffsets,
    /// Per-tile and per-fragment min/max/sum/null-count buffers.
    MinMaxSumNullCount,
    /// The metadata file footer.
    Footer,
}

impl MemoryType {
    const COUNT: usize = 4;

    fn ordinal(self) -> usize {
        match self {
            Self::RTree => 0,
            Self::TileOffsets => 1,
            Self::MinMaxSumNullCount => 2,
            Self::Footer => 3,
        }
    }
}

#[derive(Debug, Default)]
struct Usage {
    total: u64,
    by_type: [u64; MemoryType::COUNT],
}

/// Accounts metadata memory against a budget.
///
/// Loads reserve before deserializing and release when a section is freed;
/// a denied reservation charges nothing, so a caller can free other
/// fragments' sections and retry the same load.
#[derive(Debug)]
pub struct MemoryTracker {
    budget: Mutex<u64>,
    usage: Mutex<Usage>,
}

impl MemoryTracker {
    /// Create a tracker with the given budget in bytes.
    pub fn new(budget: u64) -> Self {
        Self {
            budget: Mutex::new(budget),
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Create a tracker that never denies a reservation.
    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }

    /// Attempt to reserve `size` bytes. Returns whether the reservation was
    /// granted.
    pub fn take_memory(&self, size: u64, memory_type: MemoryType) -> bool {
        let budget = *self.budget.lock();
        let mut usage = self.usage.lock();
        if usage.total.saturating_add(size) > budget {
            return false;
        }
        usage.total += size;
        usage.by_type[memory_type.ordinal()] += size;
        true
    }

    /// Reserve `size` bytes, failing with a structured `OutOfMemory` error
    /// when the budget is exhausted.
    pub fn reserve(&self, size: u64, memory_type: MemoryType) -> TesseraResult<()> {
        if !self.take_memory(size, memory_type) {
            return Err(tessera_err!(
                OutOfMemory: size,
                self.memory_available(),
                self.memory_budget()
            ));
        }
        Ok(())
    }

    /// Return `size` bytes to the budget.
    pub fn release_memory(&self, size: u64, memory_type: MemoryType) {
        let mut usage = self.usage.lock();
        usage.total = usage.total.saturating_sub(size);
        let slot = &mut usage.by_type[memory_type.ordinal()];
        *slot = slot.saturating_sub(size);
    }

    /// Bytes still available under the budget.
    pub fn memory_available(&self) -> u64 {
        let budget = *self.budget.lock();
        budget.saturating_sub(self.usage.lock().total)
    }

    /// The configured budget.
    pub fn memory_budget(&self) -> u64 {
        *self.budget.lock()
    }

    /// Bytes currently reserved.
    pub fn memory_usage(&self) -> u64 {
        self.usage.lock().total
    }

    /// Bytes currently reserved under one category.
    pub fn memory_usage_for(&self, memory_type: MemoryType) -> u64 {
        self.usage.lock().by_type[memory_type.ordinal()]
    }

    /// Replace the budget; existing reservations are kept even if they now
    /// exceed it.
    pub fn set_budget(&self, budget: u64) {
        *self.budget.lock() = budget;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_error::TesseraError;

    #[test]
    fn take_and_release() {
        let tracker = MemoryTracker::new(100);
        assert!(tracker.take_memory(60, MemoryType::RTree));
        assert!(!tracker.take_memory(50, MemoryType::TileOffsets));
        assert_eq!(tracker.memory_available(), 40);
        assert_eq!(tracker.memory_usage_for(MemoryType::RTree), 60);

        tracker.release_memory(60, MemoryType::RTree);
        assert_eq!(tracker.memory_available(), 100);
        assert!(tracker.take_memory(50, MemoryType::TileOffsets));
    }

    #[test]
    fn reserve_reports_requested_and_available() {
        let tracker = MemoryTracker::new(100);
        assert!(tracker.take_memory(90, MemoryType::Footer));
        let err = tracker.reserve(20, MemoryType::RTree).unwrap_err();
        let TesseraError::OutOfMemory {
            requested,
            available,
            budget,
        } = err
        else {
            panic!("expected OutOfMemory, got {err}");
        };
        assert_eq!((requested, available, budget), (20, 10, 100));
        // A denied reservation charges nothing.
        assert_eq!(tracker.memory_usage(), 90);
    }

    #[test]
    fn enlarged_budget_admits_retry() {
        let tracker = MemoryTracker::new(10);
        assert!(tracker.reserve(50, MemoryType::RTree).is_err());
        tracker.set_budget(100);
        assert!(tracker.reserve(50, MemoryType::RTree).is_ok());
    }
}
