//! Fixed-size worker pool for per-connection sessions.
//!
//! Jobs are boxed closures drained FIFO from one crossbeam channel by `N`
//! worker threads. Shutdown drops the sender: workers finish every job that
//! was already queued, then exit when the channel disconnects, which gives
//! the graceful-drain semantics without a separate stop flag inside the
//! workers.

use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::debug;

use crate::utils::error::{Result, ServerError};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads. Zero workers is rejected.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(ServerError::InvalidConfig(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        let (tx, rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    debug!("worker stopped");
                })
                .map_err(|err| {
                    ServerError::InvalidConfig(format!("spawn worker: {}", err))
                })?;
            handles.push(handle);
        }
        Ok(WorkerPool {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        })
    }

    /// Queue one job for execution.
    ///
    /// # Errors
    ///
    /// `ServerError::PoolShutdown` once `shutdown` has run.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx
                .send(Box::new(job))
                .map_err(|_| ServerError::PoolShutdown),
            None => Err(ServerError::PoolShutdown),
        }
    }

    /// Stop accepting jobs, run everything already queued, join all workers.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
