//! Background worker for post-commit work.
//!
//! Jobs are queued in submission order and executed by a single named
//! thread. [`CleanupWorker::wait_for_idle`] is a barrier: it blocks on a
//! condition variable until every job submitted before the call has run.
//!
//! ```text
//!  commit ──▶ submit(job) ──▶ ┌─────────────┐ ──▶ run job ──▶ completed += 1
//!                             │    queue    │                     │
//!  wait_for_idle() ◀──────────┴─────────────┴──── notify_all ◀─────┘
//! ```

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tessera_common::config::CleanupConfig;
use tessera_common::types::TxnId;

use crate::error::{TxnError, TxnResult};

/// A unit of post-commit work.
pub type CleanupJob = Box<dyn FnOnce() + Send + 'static>;

/// Counters for the cleanup worker.
#[derive(Debug, Default)]
pub struct CleanupStats {
    /// Jobs submitted.
    pub submitted: AtomicU64,
    /// Jobs that ran to completion.
    pub completed: AtomicU64,
    /// Jobs that panicked.
    pub failed: AtomicU64,
}

struct Task {
    txn_id: TxnId,
    job: CleanupJob,
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    /// Sequence number of the last submitted task.
    submitted: u64,
    /// Sequence number of the last finished task.
    finished: u64,
    shutdown: bool,
}

struct WorkerShared {
    queue: Mutex<Queue>,
    work_available: Condvar,
    progress: Condvar,
    stats: CleanupStats,
    max_batch: usize,
}

/// Runs deferred jobs on a dedicated thread.
pub struct CleanupWorker {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupWorker {
    /// Starts the worker thread.
    pub fn start(config: &CleanupConfig) -> TxnResult<Self> {
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(Queue::default()),
            work_available: Condvar::new(),
            progress: Condvar::new(),
            stats: CleanupStats::default(),
            max_batch: config.max_batch.max(1),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run())
            .map_err(|e| TxnError::Worker(e.to_string()))?;

        tracing::info!("Started cleanup worker '{}'", config.thread_name);

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a job on behalf of a transaction.
    pub fn submit(&self, txn_id: TxnId, job: CleanupJob) {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            drop(queue);
            tracing::warn!("Cleanup worker stopped, running job for {:?} inline", txn_id);
            self.shared.stats.submitted.fetch_add(1, AtomicOrdering::Relaxed);
            self.shared.execute(Task { txn_id, job });
            return;
        }
        queue.submitted += 1;
        queue.tasks.push_back(Task { txn_id, job });
        self.shared.stats.submitted.fetch_add(1, AtomicOrdering::Relaxed);
        self.shared.work_available.notify_one();
    }

    /// Blocks until every job submitted before this call has finished.
    pub fn wait_for_idle(&self) {
        let mut queue = self.shared.queue.lock();
        let target = queue.submitted;
        while queue.finished < target {
            self.shared.progress.wait(&mut queue);
        }
    }

    /// Number of jobs queued or running.
    pub fn pending(&self) -> u64 {
        let queue = self.shared.queue.lock();
        queue.submitted - queue.finished
    }

    /// Returns worker statistics.
    pub fn stats(&self) -> &CleanupStats {
        &self.shared.stats
    }

    /// Drains the queue and stops the thread.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
        }
        self.shared.work_available.notify_all();

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("Cleanup worker thread panicked during shutdown");
            }
        }
        tracing::info!("Stopped cleanup worker");
    }
}

impl WorkerShared {
    fn run(&self) {
        loop {
            let batch: Vec<Task> = {
                let mut queue = self.queue.lock();
                while queue.tasks.is_empty() && !queue.shutdown {
                    self.work_available.wait(&mut queue);
                }
                if queue.tasks.is_empty() {
                    return;
                }
                let n = queue.tasks.len().min(self.max_batch);
                queue.tasks.drain(..n).collect()
            };

            for task in batch {
                self.execute(task);
                let mut queue = self.queue.lock();
                queue.finished += 1;
                self.progress.notify_all();
            }
        }
    }

    fn execute(&self, task: Task) {
        let Task { txn_id, job } = task;
        match catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                self.stats.completed.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, AtomicOrdering::Relaxed);
                tracing::warn!("Deferred cleanup job for {:?} panicked", txn_id);
            }
        }
    }
}

impl Drop for CleanupWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CleanupWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupWorker")
            .field("pending", &self.pending())
            .finish()
    }
}
