//! Small pool for delayed background work.
//!
//! Jobs wait out their delay on a worker, then re-check a
//! [`VersionStamp`]. If anything moved the stamp in the meantime the job
//! is dropped without running.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Monotonic counter bumped whenever scheduled work may have become stale.
#[derive(Debug, Clone, Default)]
pub struct VersionStamp(Arc<AtomicU64>);

impl VersionStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidate outstanding work. Returns the new version.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, version: u64) -> bool {
        self.current() == version
    }
}

/// Fixed number of workers draining one unbounded queue.
pub struct DeferredPool {
    tx: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl DeferredPool {
    /// Start `workers` workers (at least one) on the current runtime.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|n| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    tracing::trace!("deferred worker {} stopped", n);
                })
            })
            .collect();
        Self { tx, workers }
    }

    /// Run `job` on a worker as soon as one is free.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Box::pin(job)).is_err() {
            tracing::debug!("deferred job dropped: pool stopped");
        }
    }

    /// Run `job` after `delay` unless `stamp` has moved past `version`.
    pub fn schedule<F>(&self, delay: Duration, stamp: VersionStamp, version: u64, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(async move {
            tokio::time::sleep(delay).await;
            if stamp.is_current(version) {
                job.await;
            } else {
                tracing::trace!("deferred job at version {} is stale", version);
            }
        });
    }
}

impl Drop for DeferredPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for DeferredPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}
