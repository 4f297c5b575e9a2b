//! Bounded worker pool.
//!
//! A fixed number of workers drain a bounded queue of pending tasks.
//! Dispatch never waits: a full queue is reported to the caller.

use super::runner::Runner;
use futures::future::{BoxFuture, FutureExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument, Span};

/// Default number of concurrent workers.
pub const DEFAULT_THREADS: usize = 200;

/// Default number of tasks waiting for a worker.
pub const DEFAULT_CAPACITY: usize = 5000;

/// Errors returned by the worker pool.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Worker pool queue is full")]
    Saturated,
    #[error("Worker pool is shut down")]
    Closed,
    #[error("Worker pool {0} must be greater than zero")]
    InvalidSize(&'static str),
    #[error("Worker task panicked: {source}")]
    Join {
        #[source]
        source: tokio::task::JoinError,
    },
}

type Task = BoxFuture<'static, ()>;

/// Handle used to submit work to running workers.
pub struct WorkerPool {
    /// Bounded queue feeding the workers.
    tx: mpsc::Sender<Task>,
    /// Handles of the spawned workers.
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Queues `runner`; failures are logged under `name` by the worker.
    pub fn dispatch<R>(&self, name: &str, runner: R) -> Result<(), Error>
    where
        R: Runner + Send + 'static,
        R::Error: Display,
    {
        let name = name.to_string();
        let task = async move {
            if let Err(e) = runner.run().await {
                error!("{} failed: {}", name, e);
            }
        }
        .instrument(Span::current())
        .boxed();

        self.tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => Error::Saturated,
            TrySendError::Closed(_) => Error::Closed,
        })
    }

    /// Stops accepting work and waits for queued tasks to finish.
    pub async fn shutdown(self) -> Result<(), Error> {
        drop(self.tx);
        for worker in self.workers {
            worker.await.map_err(|source| Error::Join { source })?;
        }
        Ok(())
    }
}

/// Builder for [`WorkerPool`].
pub struct WorkerPoolBuilder {
    threads: usize,
    capacity: usize,
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl WorkerPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Spawns the workers. Must be called within a Tokio runtime.
    pub fn start(self) -> Result<WorkerPool, Error> {
        if self.threads == 0 {
            return Err(Error::InvalidSize("threads"));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidSize("capacity"));
        }

        let (tx, rx) = mpsc::channel::<Task>(self.capacity);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..self.threads)
            .map(|index| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let task = { rx.lock().await.recv().await };
                        match task {
                            Some(task) => task.await,
                            None => break,
                        }
                    }
                    debug!("Pool worker {} stopped", index);
                })
            })
            .collect();

        debug!(
            "Started worker pool with {} workers and capacity {}",
            self.threads, self.capacity
        );
        Ok(WorkerPool { tx, workers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(Arc<AtomicUsize>);

    impl Runner for Count {
        type Error = String;
        async fn run(self) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fail;

    impl Runner for Fail {
        type Error = String;
        async fn run(self) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn test_dispatched_tasks_run() {
        let pool = WorkerPoolBuilder::new().threads(4).capacity(16).start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            pool.dispatch("count", Count(Arc::clone(&counter))).unwrap();
        }
        pool.dispatch("fail", Fail).unwrap();
        pool.shutdown().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        // Workers cannot run before the test yields, so the queue fills up.
        let pool = WorkerPoolBuilder::new().threads(1).capacity(1).start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.dispatch("first", Count(Arc::clone(&counter))).unwrap();
        assert!(matches!(
            pool.dispatch("second", Count(Arc::clone(&counter))),
            Err(Error::Saturated)
        ));
        pool.shutdown().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        assert!(matches!(
            WorkerPoolBuilder::new().threads(0).start(),
            Err(Error::InvalidSize("threads"))
        ));
        assert!(matches!(
            WorkerPoolBuilder::new().capacity(0).start(),
            Err(Error::InvalidSize("capacity"))
        ));
    }
}
