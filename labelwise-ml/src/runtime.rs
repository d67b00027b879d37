//! Scoped worker pool for batch workloads.
//!
//! Workers pull the next input index from a shared counter, so uneven example
//! costs balance out. Results come back in input order. Once `stop` returns
//! true for any result, workers stop taking new inputs; inputs never started
//! are reported as `None`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Map `f` over `items` on up to `workers` threads.
pub fn parallel_map<T, R, F, S>(items: &[T], workers: usize, f: F, stop: S) -> Vec<Option<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
    S: Fn(&R) -> bool + Sync,
{
    let workers = workers.clamp(1, items.len().max(1));
    let next = AtomicUsize::new(0);
    let halted = AtomicBool::new(false);
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..items.len()).map(|_| None).collect());

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let (next, halted, results, f, stop) = (&next, &halted, &results, &f, &stop);
                s.spawn(move || {
                    let mut done = 0usize;
                    while !halted.load(Ordering::Acquire) {
                        let index = next.fetch_add(1, Ordering::AcqRel);
                        let Some(item) = items.get(index) else { break };
                        let out = f(index, item);
                        if stop(&out) {
                            halted.store(true, Ordering::Release);
                        }
                        let mut guard = results.lock().unwrap_or_else(|p| p.into_inner());
                        guard[index] = Some(out);
                        done += 1;
                    }
                    debug!(worker, done, "worker finished");
                })
            })
            .collect();
        for handle in handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    });

    results.into_inner().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_keep_input_order() {
        let items: Vec<u64> = (0..200).collect();
        let out = parallel_map(&items, 8, |i, x| (i as u64, x * 2), |_| false);
        for (i, r) in out.into_iter().enumerate() {
            assert_eq!(r, Some((i as u64, i as u64 * 2)));
        }
    }

    #[test]
    fn test_single_worker_and_empty_input() {
        let out = parallel_map(&[1, 2, 3], 1, |_, x| x + 1, |_| false);
        assert_eq!(out, vec![Some(2), Some(3), Some(4)]);
        let empty: Vec<Option<i32>> = parallel_map(&[] as &[i32], 4, |_, x| *x, |_| false);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_stop_halts_single_worker() {
        let items: Vec<i32> = (0..10).collect();
        let out = parallel_map(&items, 1, |_, x| *x, |x| *x == 3);
        assert_eq!(out[3], Some(3));
        assert!(out[4..].iter().all(Option::is_none));
    }
}
