//! Extraction worker pool.
//!
//! A fixed number of OS threads share one FIFO channel. Each work item
//! is processed by exactly one worker; there is no priority or affinity
//! beyond arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use log::{debug, error, info};

use crate::dispatch::WorkItem;

use super::pipeline::{run_job, WorkerContext};

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads consuming from `receiver`.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(ctx: Arc<WorkerContext>, worker_count: usize, receiver: Receiver<WorkItem>) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_ctx = Arc::clone(&ctx);

            let handle = thread::spawn(move || {
                run_worker(worker_id, receiver, shutdown_flag, worker_ctx);
            });
            workers.push(handle);
        }

        info!("Started {} extraction workers", worker_count);

        Self { workers, shutdown }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Joins all workers. Call `shutdown` (or drop the queue sender)
    /// first, otherwise this blocks until the channel disconnects.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    receiver: Receiver<WorkItem>,
    shutdown: Arc<AtomicBool>,
    ctx: Arc<WorkerContext>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(item) => {
                debug!(
                    "Worker {} processing job {} (message {})",
                    worker_id, item.job_id, item.message_id
                );
                run_job(&ctx, &item);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
