use rayon::prelude::*;
use tessera_error::TesseraResult;

/// Run `task(i)` for every `i` in `[begin, end)` across the compute thread
/// pool, returning the first error encountered.
///
/// Tasks must be independent; there is no ordering guarantee between them.
/// Long-running tasks cooperate with cancellation by calling
/// [`Resources::check_cancelled`](crate::Resources::check_cancelled) between
/// I/Os.
pub fn parallel_for<F>(begin: u64, end: u64, task: F) -> TesseraResult<()>
where
    F: Fn(u64) -> TesseraResult<()> + Send + Sync,
{
    (begin..end).into_par_iter().try_for_each(task)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use tessera_error::tessera_bail;

    #[test]
    fn visits_every_index_once() {
        let sum = AtomicU64::new(0);
        parallel_for(0, 100, |i| {
            sum.fetch_add(i, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 4950);
    }

    #[test]
    fn propagates_errors() {
        let result = parallel_for(0, 10, |i| {
            if i == 7 {
                tessera_bail!("task {} failed", i);
            }
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn empty_range_is_ok() {
        parallel_for(5, 5, |_| unreachable!()).unwrap();
    }
}
