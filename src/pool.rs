//! Bounded worker pools for the pipeline's fan-out points.
//!
//! Every concurrent group in the pipeline (PDF pages, reviewer lenses,
//! per-reference validation, translations) dispatches onto a pool with an
//! explicit worker bound and waits for the full group before continuing.
//! Results are stitched by original index, never by completion order.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Run `task` over `items` on at most `max_workers` scoped threads.
///
/// Returns one result per input item, in input order. The call blocks until
/// every item has been processed — partial-group consumption is not possible.
/// Tasks communicate failure through their return value (`Result` or a
/// sentinel), never by panicking.
pub fn run_indexed<T, R, F>(max_workers: usize, items: Vec<T>, task: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> R + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = max_workers.clamp(1, total);
    if workers == 1 {
        return items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| task(idx, item))
            .collect();
    }

    let queue: Mutex<VecDeque<(usize, T)>> =
        Mutex::new(items.into_iter().enumerate().collect());
    let slots: Mutex<Vec<Option<R>>> =
        Mutex::new((0..total).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some((idx, item)) = next else { break };
                let out = task(idx, item);
                slots.lock().unwrap_or_else(PoisonError::into_inner)[idx] = Some(out);
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .map(|slot| slot.expect("worker pool drained the queue"))
        .collect()
}

/// Number of CPUs available to the process, at least 1.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
