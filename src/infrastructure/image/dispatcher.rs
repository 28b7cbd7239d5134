//! Background execution of pipeline requests.
//!
//! Requests run on a dedicated worker pool. Their results are handed back to
//! the foreground through a [`DeliveryQueue`], which the foreground drains on
//! its own thread, so callbacks never run on a worker.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::domain::entities::{ExecutionContext, FetchRequest, LoadOutcome};

use super::pipeline::FetchPipeline;

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Threads kept alive for async work.
    pub core_threads: usize,
    /// Upper bound on all pool threads, including blocking decode threads.
    pub max_threads: usize,
    /// Idle time before an extra thread is retired, in seconds.
    pub keep_alive_secs: u64,
}

impl PoolConfig {
    /// Returns the keep-alive window.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            core_threads: cores + 1,
            max_threads: 2 * cores + 1,
            keep_alive_secs: 10,
        }
    }
}

type Delivery = Box<dyn FnOnce() + Send>;

/// Foreground end of the dispatcher. Runs result callbacks on the thread that
/// drains it.
pub struct DeliveryQueue {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue").finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    /// Runs every callback that is ready without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(deliver) = self.rx.try_recv() {
            deliver();
            ran += 1;
        }
        ran
    }

    /// Waits for the next callback and runs it.
    /// Returns false once the dispatcher is gone and the queue is empty.
    ///
    /// # Panics
    /// Panics if called from within an async runtime.
    pub fn run_next_blocking(&mut self) -> bool {
        self.rx.blocking_recv().map(|deliver| deliver()).is_some()
    }

    /// Async variant of [`DeliveryQueue::run_next_blocking`].
    pub async fn run_next(&mut self) -> bool {
        self.rx.recv().await.map(|deliver| deliver()).is_some()
    }
}

/// Runs pipeline requests on a bounded worker pool.
pub struct TaskDispatcher {
    runtime: Option<Runtime>,
    handle: Handle,
    pipeline: Arc<FetchPipeline>,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("in_flight", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl TaskDispatcher {
    /// Starts the worker pool.
    ///
    /// # Errors
    /// Returns error if the pool threads cannot be spawned.
    pub fn new(
        pipeline: Arc<FetchPipeline>,
        pool: &PoolConfig,
    ) -> std::io::Result<(Self, DeliveryQueue)> {
        let core_threads = pool.core_threads.max(1);
        let blocking_threads = pool.max_threads.saturating_sub(core_threads).max(1);
        let thread_counter = AtomicUsize::new(0);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(core_threads)
            .max_blocking_threads(blocking_threads)
            .thread_keep_alive(pool.keep_alive())
            .thread_name_fn(move || {
                let n = thread_counter.fetch_add(1, Ordering::Relaxed) + 1;
                format!("imgtier-worker#{n}")
            })
            .enable_all()
            .build()?;

        debug!(
            core_threads,
            blocking_threads,
            keep_alive_secs = pool.keep_alive_secs,
            "Started image worker pool"
        );

        let (delivery_tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            pipeline,
            delivery_tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        Ok((dispatcher, DeliveryQueue { rx }))
    }

    /// Requests an image for `target`.
    ///
    /// A memory cache hit calls `on_result` before this returns. Otherwise
    /// the request runs on the pool and `on_result` is queued on the
    /// [`DeliveryQueue`] once the outcome is known, whatever it is.
    pub fn submit<T, F>(&self, request: FetchRequest, target: T, on_result: F)
    where
        T: Send + 'static,
        F: FnOnce(T, LoadOutcome) + Send + 'static,
    {
        if let Some(loaded) = self.pipeline.lookup_memory(&request) {
            trace!(key = %loaded.key, "Served from memory cache without scheduling");
            on_result(target, LoadOutcome::Found(loaded));
            return;
        }

        let pipeline = self.pipeline.clone();
        let delivery_tx = self.delivery_tx.clone();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);

        self.handle.spawn(async move {
            let outcome = pipeline.load(&request, ExecutionContext::Worker).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);

            if delivery_tx
                .send(Box::new(move || on_result(target, outcome)))
                .is_err()
            {
                debug!(url = %request.url, "Delivery queue closed, dropping result");
            }
        });
    }

    /// Runs a future on the pool and waits for it.
    ///
    /// # Panics
    /// Panics if called from within an async runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Returns the number of submitted requests still running.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the pipeline requests run through.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<FetchPipeline> {
        &self.pipeline
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
