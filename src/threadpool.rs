//! Fixed-size work-stealing thread pool used by C5 to encode contigs
//! concurrently.
//!
//! Backed by `rayon::ThreadPool`, with bounded-queue / blocking-submit
//! semantics layered on top via a `crossbeam_channel::bounded` semaphore
//! channel, so a burst of contig jobs back-pressures the submitter instead
//! of growing an unbounded queue.
//!

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::ThreadPool as RayonPool;
use std::sync::{Arc, Condvar, Mutex};

type JobFn = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Internal shared state that workers and submitters both access.
// ---------------------------------------------------------------------------
struct PoolState {
    pending: usize, // number of submitted-but-not-yet-finished jobs
}

/// A bounded worker pool: `submit_job` blocks once `queue_size + nb_threads`
/// jobs are in flight, and `jobs_completed` waits for the pool to drain.
pub struct TPool {
    /// rayon thread pool that executes jobs.
    pool: Arc<RayonPool>,
    /// Bounded channel used as a semaphore: the sender slot limits how many
    /// jobs can be in-flight simultaneously (queue_size + nb_threads slots).
    /// Submitters acquire a slot before posting; workers release it on finish.
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    /// Shared counter of pending jobs plus a condvar for `jobs_completed`.
    state: Arc<(Mutex<PoolState>, Condvar)>,
}

impl TPool {
    /// Creates a pool of `nb_threads` rayon workers with room for
    /// `queue_size` jobs queued ahead of them. Returns `None` if either is
    /// zero or the underlying rayon pool fails to build.
    pub fn new(nb_threads: usize, queue_size: usize) -> Option<Self> {
        if nb_threads < 1 || queue_size < 1 {
            return None;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_threads)
            .build()
            .ok()?;

        let capacity = queue_size + nb_threads;
        let (slot_tx, slot_rx) = bounded(capacity);
        // Pre-fill the channel so that `slot_rx.recv()` acts as "wait for a
        // free slot" (i.e. we send tokens to represent free slots).
        for _ in 0..capacity {
            slot_tx.send(()).ok()?;
        }

        let state = Arc::new((Mutex::new(PoolState { pending: 0 }), Condvar::new()));

        Some(TPool {
            pool: Arc::new(pool),
            slot_tx,
            slot_rx,
            state,
        })
    }

    /// Submits `job`, blocking until a slot is free if the pool is at
    /// capacity.
    pub fn submit_job(&self, job: JobFn) {
        self.slot_rx.recv().expect("threadpool slot channel closed");

        // Increment pending count before spawning so `jobs_completed` cannot
        // observe zero between submit and actual execution start.
        {
            let (lock, _cvar) = &*self.state;
            let mut s = lock.lock().unwrap();
            s.pending += 1;
        }

        let state = Arc::clone(&self.state);
        let slot_tx = self.slot_tx.clone();
        self.pool.spawn(move || {
            job();

            // Release the slot and decrement pending count.
            let (lock, cvar) = &*state;
            let mut s = lock.lock().unwrap();
            s.pending -= 1;
            if s.pending == 0 {
                cvar.notify_all();
            }
            // Return the semaphore token.
            let _ = slot_tx.send(());
        });
    }

    /// Blocks until every job submitted so far has finished. The pool
    /// remains usable afterwards.
    pub fn jobs_completed(&self) {
        let (lock, cvar) = &*self.state;
        let mut s = lock.lock().unwrap();
        while s.pending > 0 {
            s = cvar.wait(s).unwrap();
        }
    }

    /// Runs `body` inside a rayon scope tied to this pool, allowing spawned
    /// closures to borrow from the caller's stack frame instead of requiring
    /// `'static`. Used for per-sample fan-out (one task per contig) where
    /// the scope's implicit join-all at the end acts as the end-of-sample
    /// barrier.
    pub fn scope<'scope, F, R>(&self, body: F) -> R
    where
        F: FnOnce(&rayon::Scope<'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(body)
    }
}

impl Drop for TPool {
    /// Waits for in-flight jobs to finish; rayon's `ThreadPool` joins its
    /// worker threads on its own drop right after.
    fn drop(&mut self) {
        self.jobs_completed();
        // rayon::ThreadPool::drop joins all worker threads automatically.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn submit_job_runs_everything_before_jobs_completed_returns() {
        let pool = TPool::new(4, 8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.submit_job(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.jobs_completed();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn scope_runs_borrowed_closures_to_completion() {
        let pool = TPool::new(4, 8).unwrap();
        let mut totals = vec![0usize; 10];
        pool.scope(|s| {
            for (i, slot) in totals.iter_mut().enumerate() {
                s.spawn(move |_| *slot = i * i);
            }
        });
        assert_eq!(totals, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn new_rejects_zero_sizes() {
        assert!(TPool::new(0, 8).is_none());
        assert!(TPool::new(4, 0).is_none());
    }
}
