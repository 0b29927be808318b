//! The persisted-retry engine.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use strata_config::RetryEngineConfig;
use strata_telemetry::Metrics;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};
use crate::executor::Executor;
use crate::store::{StoreError, TaskStore};
use crate::task::Task;

/// Durable task queue with parallel worker pools and a retry poller.
pub struct Engine<T: Task> {
    inner: Arc<Inner<T>>,
}

impl<T: Task> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Task> {
    config: RetryEngineConfig,
    store: Arc<dyn TaskStore<T>>,
    executor: Arc<dyn Executor<T>>,
    metrics: Metrics,
    incoming_tx: mpsc::Sender<T>,
    retry_tx: mpsc::Sender<T>,
    shutdown: CancellationToken,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl<T: Task> Engine<T> {
    /// Start the engine: recover crashed work, then launch the worker pools
    /// and the retry poller.
    ///
    /// Tasks that were pending at shutdown are indistinguishable from tasks
    /// that crashed mid-execution, so every pending task is flipped to failed
    /// and re-run through the retry path.
    ///
    /// # Errors
    ///
    /// Returns an error if the recovery scan fails.
    pub async fn start(
        config: RetryEngineConfig,
        store: Arc<dyn TaskStore<T>>,
        executor: Arc<dyn Executor<T>>,
        metrics: Metrics,
    ) -> EngineResult<Self> {
        for task in store.get_pending().await? {
            match store.mark_failed(&task).await {
                Ok(()) | Err(StoreError::TaskNotFound) => {}
                Err(source) => return Err(source.into()),
            }
        }

        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_buffer);
        let (retry_tx, retry_rx) = mpsc::channel(config.retry_buffer);
        let inner = Arc::new(Inner {
            config,
            store,
            executor,
            metrics,
            incoming_tx,
            retry_tx,
            shutdown: CancellationToken::new(),
            workers: StdMutex::new(Vec::new()),
        });

        let engine = Self { inner };
        engine.spawn_loops(incoming_rx, retry_rx);
        Ok(engine)
    }

    fn spawn_loops(&self, incoming_rx: mpsc::Receiver<T>, retry_rx: mpsc::Receiver<T>) {
        let mut handles = Vec::new();

        let incoming_rx = Arc::new(Mutex::new(incoming_rx));
        for _ in 0..self.inner.config.incoming_workers {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&incoming_rx);
            handles.push(tokio::spawn(worker_loop(inner, rx)));
        }

        let retry_rx = Arc::new(Mutex::new(retry_rx));
        for _ in 0..self.inner.config.retry_workers {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&retry_rx);
            handles.push(tokio::spawn(worker_loop(inner, rx)));
        }

        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(poller_loop(inner)));

        match self.inner.workers.lock() {
            Ok(mut workers) => workers.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }
    }

    /// Submit a task for durable execution.
    ///
    /// A task still inside its submission delay is persisted as failed and
    /// picked up by the retry poller once due. A ready task is persisted as
    /// pending and enqueued; if the incoming buffer is full its status is
    /// overwritten to failed so the retry path becomes the fallback.
    /// Concurrent submissions of the same identity are de-duplicated by the
    /// store's primary key, and the conflict is swallowed as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write for any reason other
    /// than an identity conflict.
    pub async fn add(&self, task: T) -> EngineResult<()> {
        if !task.ready() {
            return match self.inner.store.add_failed(&task).await {
                Ok(()) | Err(StoreError::TaskExists) => Ok(()),
                Err(source) => Err(source.into()),
            };
        }

        match self.inner.store.add_pending(&task).await {
            Ok(()) => {}
            Err(StoreError::TaskExists) => return Ok(()),
            Err(source) => return Err(source.into()),
        }

        if let Err(send_error) = self.inner.incoming_tx.try_send(task) {
            let task = send_error.into_inner();
            debug!(task = %task, "incoming buffer full, degrading to retry path");
            match self.inner.store.mark_failed(&task).await {
                Ok(()) | Err(StoreError::TaskNotFound) => {}
                Err(source) => return Err(source.into()),
            }
        }
        Ok(())
    }

    /// Run a task on the caller's stack, bypassing the queue entirely.
    ///
    /// No status is recorded; the caller owns the outcome. Used for
    /// write-through writes where the error is wanted synchronously.
    ///
    /// # Errors
    ///
    /// Returns the executor's failure unchanged.
    pub async fn sync_exec(&self, task: T) -> EngineResult<()> {
        self.inner
            .executor
            .exec(task)
            .await
            .map_err(|source| EngineError::Exec { source })
    }

    /// Cancel every worker and wait for them to drain.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = match self.inner.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "engine worker exited abnormally");
            }
        }
    }
}

async fn worker_loop<T: Task>(inner: Arc<Inner<T>>, rx: Arc<Mutex<mpsc::Receiver<T>>>) {
    loop {
        let task = tokio::select! {
            () = inner.shutdown.cancelled() => return,
            received = async { rx.lock().await.recv().await } => match received {
                Some(task) => task,
                None => return,
            },
        };

        inner.process(task).await;

        tokio::select! {
            () = inner.shutdown.cancelled() => return,
            () = tokio::time::sleep(inner.config.max_task_throughput) => {}
        }
    }
}

async fn poller_loop<T: Task>(inner: Arc<Inner<T>>) {
    let mut ticker = tokio::time::interval(inner.config.poll_retries_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        inner.poll_retries().await;
    }
}

impl<T: Task> Inner<T> {
    async fn process(&self, task: T) {
        let executor = self.executor.name();
        match self.executor.exec(task.clone()).await {
            Ok(()) => {
                self.metrics.record_task_executed(executor, "success");
                if let Err(err) = self.store.remove(&task).await {
                    warn!(task = %task, error = %err, "failed to remove completed task");
                }
            }
            Err(err) => {
                self.metrics.record_task_executed(executor, "failure");
                self.metrics.record_task_failure(executor, &task.tags());
                warn!(task = %task, error = %err, "task execution failed");
                match self.store.mark_failed(&task).await {
                    Ok(()) => {}
                    Err(StoreError::TaskNotFound) => {
                        debug!(task = %task, "failed task vanished before mark")
                    }
                    Err(err) => error!(task = %task, error = %err, "failed to mark task failed"),
                }
            }
        }
    }

    /// Scan the failed set and re-enqueue whatever is due.
    ///
    /// `mark_failed` bumps `last_attempt`, so a task bounced off a full retry
    /// buffer cannot be replayed faster than the retry interval.
    async fn poll_retries(&self) {
        let failed = match self.store.get_failed().await {
            Ok(failed) => failed,
            Err(err) => {
                error!(error = %err, "failed to scan retry candidates");
                return;
            }
        };

        let retry_after = chrono::Duration::from_std(self.config.retry_interval)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        for task in failed {
            if !task.ready() {
                continue;
            }
            if Utc::now().signed_duration_since(task.last_attempt()) < retry_after {
                continue;
            }

            match self.store.mark_pending(&task).await {
                Ok(()) => {}
                Err(StoreError::TaskNotFound) => continue,
                Err(err) => {
                    error!(task = %task, error = %err, "failed to mark retry pending");
                    continue;
                }
            }

            if let Err(send_error) = self.retry_tx.try_send(task) {
                let task = send_error.into_inner();
                match self.store.mark_failed(&task).await {
                    Ok(()) | Err(StoreError::TaskNotFound) => {}
                    Err(err) => {
                        error!(task = %task, error = %err, "failed to return task to retry set")
                    }
                }
            }
        }
    }
}
