use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_error::TesseraResult;

use crate::{Config, Vfs};

/// Named monotonic counters recorded at load and store sites.
#[derive(Debug, Default)]
pub struct Stats {
    counters: Mutex<FxHashMap<&'static str, u64>>,
}

impl Stats {
    /// Add `value` to the named counter.
    pub fn add_counter(&self, name: &'static str, value: u64) {
        *self.counters.lock().entry(name).or_insert(0) += value;
    }

    /// The current value of the named counter.
    pub fn counter(&self, name: &'static str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

/// Shared services of the fragment layer: configuration, the VFS, stats
/// counters and the cooperative cancellation flag.
#[derive(Debug)]
pub struct Resources {
    config: Config,
    vfs: Vfs,
    stats: Stats,
    cancelled: AtomicBool,
}

impl Default for Resources {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Resources {
    /// Create resources backed by the local filesystem.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            vfs: Vfs::new(),
            stats: Stats::default(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The virtual filesystem.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// The stats counter registry.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Request cooperative cancellation of in-flight work.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with an I/O error if cancellation has been requested. Tasks call
    /// this between file operations.
    pub fn check_cancelled(&self) -> TesseraResult<()> {
        if self.is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "operation cancelled",
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::default();
        stats.add_counter("read_rtree_size", 10);
        stats.add_counter("read_rtree_size", 5);
        assert_eq!(stats.counter("read_rtree_size"), 15);
        assert_eq!(stats.counter("missing"), 0);
    }

    #[test]
    fn cancellation_flag() {
        let resources = Resources::default();
        assert!(resources.check_cancelled().is_ok());
        resources.cancel();
        assert!(resources.check_cancelled().is_err());
    }
}
