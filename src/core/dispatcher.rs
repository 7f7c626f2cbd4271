use crate::core::engine::RegressionEngine;
use crate::domain::model::Job;
use crate::domain::ports::JobPipeline;
use crate::utils::error::{Result, TrackerError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Accepts jobs into a bounded queue.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<()>;
}

/// Bounded job queue drained by at most `workers` concurrent engine runs.
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    capacity: usize,
    workers: usize,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn start<P>(engine: Arc<RegressionEngine<P>>, workers: usize, capacity: usize) -> Self
    where
        P: JobPipeline + 'static,
    {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(dispatch_loop(engine, rx, shutdown_rx, workers));
        tracing::info!("Dispatcher started ({} workers, queue of {})", workers, capacity);

        Self {
            tx,
            capacity,
            workers,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Stops taking jobs off the queue and waits for running jobs to finish.
    /// Jobs still queued stay `queued` in the store.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Dispatcher loop panicked: {}", e);
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}

impl JobQueue for Dispatcher {
    fn enqueue(&self, job: Job) -> Result<()> {
        let job_id = job.id.clone();
        match self.tx.try_send(job) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Job queued");
                Ok(())
            }
            // A closed queue only happens during shutdown and is reported the same way.
            Err(_) => Err(TrackerError::QueueFull {
                capacity: self.capacity,
            }),
        }
    }
}

async fn dispatch_loop<P>(
    engine: Arc<RegressionEngine<P>>,
    mut rx: mpsc::Receiver<Job>,
    mut shutdown_rx: watch::Receiver<bool>,
    workers: usize,
) where
    P: JobPipeline + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    loop {
        // Hold a worker slot before taking the next job so the rest stay queued.
        let permit = tokio::select! {
            _ = shutdown_rx.changed() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job = tokio::select! {
            _ = shutdown_rx.changed() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let engine = engine.clone();
        running.spawn(async move {
            let _permit = permit;
            let job_id = job.id.clone();
            if let Err(e) = engine.run(job).await {
                tracing::error!(job_id = %job_id, "Failed to publish job: {}", e);
            }
        });

        while let Some(done) = running.try_join_next() {
            if let Err(e) = done {
                tracing::error!("Job task panicked: {}", e);
            }
        }
    }

    rx.close();
    if !running.is_empty() {
        tracing::info!("Waiting for {} running job(s)", running.len());
    }
    while let Some(done) = running.join_next().await {
        if let Err(e) = done {
            tracing::error!("Job task panicked: {}", e);
        }
    }
}
