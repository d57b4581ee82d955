use crate::context::{Context, PipelineData};
use crate::error::{ErrorHandler, PipelineError, StageError};
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::pipeline::{settle, Pipeline};
use crate::queue::{bounded_queue, Discipline, QueueSender};
use crate::stage::{run_stage, Stage, StageOutput};
use crossbeam::channel::{bounded, select_biased};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::Builder as ThreadBuilder;
use std::time::Duration;

// Worker names stay unique across pools.
static POOL_THREAD_SEQ: AtomicUsize = AtomicUsize::new(0);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads fed from a bounded submission queue.
///
/// The rejection policy for a full queue is an overflow [`Discipline`];
/// the default displaces the oldest pending submission. Workers are named
/// `papaline-pool-<n>` and detached, so an open pool never holds up process
/// exit. A pool is shared between pipelines and closed by whoever created
/// it.
pub struct WorkerPool {
    submit: Mutex<Option<QueueSender<Job>>>,
    rejected: Arc<std::sync::atomic::AtomicU64>,
    workers: usize,
}

impl WorkerPool {
    /// Pool with `workers` threads and the discard-oldest rejection policy
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self::with_rejection(workers, queue_capacity, Discipline::Sliding)
    }

    /// Pool with an explicit rejection policy for a full submission queue
    pub fn with_rejection(workers: usize, queue_capacity: usize, rejection: Discipline) -> Self {
        let (tx, rx) = bounded_queue::<Job>(queue_capacity, rejection);
        let workers = workers.max(1);
        for _ in 0..workers {
            let seq = POOL_THREAD_SEQ.fetch_add(1, Ordering::Relaxed);
            let rx = rx.clone();
            let spawned = ThreadBuilder::new()
                .name(format!("papaline-pool-{seq}"))
                .spawn(move || {
                    tracing::debug!("pool worker {} started", seq);
                    while let Some(job) = rx.take() {
                        job();
                    }
                    tracing::debug!("pool worker {} stopped", seq);
                });
            if let Err(err) = spawned {
                tracing::error!("failed to spawn pool worker {}: {}", seq, err);
            }
        }
        Self {
            rejected: tx.dropped_handle(),
            submit: Mutex::new(Some(tx)),
            workers,
        }
    }

    /// Queue a task for execution. Returns false once the pool is closed.
    /// A task displaced by the rejection policy simply never runs.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.submit.lock().as_ref() {
            Some(queue) => queue.put(Box::new(job) as Job).is_ok(),
            None => false,
        }
    }

    /// Stop accepting work. Workers drain the queue and exit.
    pub fn close(&self) {
        if self.submit.lock().take().is_some() {
            tracing::debug!("pool closed");
        }
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Submissions displaced or discarded by the rejection policy
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// The pool engine: one submitted task per invocation, walking the stage
/// chain inline on a single worker thread.
///
/// No per-stage queues exist, so fork and join have no meaning here and are
/// rejected as stage failures. Abort short-circuits the walk with the
/// current tuple as the result.
pub struct PoolPipeline<T: PipelineData> {
    pool: Arc<WorkerPool>,
    stages: Arc<Vec<(String, Stage<T>)>>,
    error_handler: Option<ErrorHandler<T>>,
    metrics: StageMetrics,
}

impl<T: PipelineData> PoolPipeline<T> {
    pub(crate) fn new(
        stages: Vec<Stage<T>>,
        pool: Arc<WorkerPool>,
        error_handler: Option<ErrorHandler<T>>,
    ) -> Self {
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(i, stage)| (stage.label(i), stage))
            .collect();
        Self {
            pool,
            stages: Arc::new(stages),
            error_handler,
            metrics: StageMetrics::new(),
        }
    }

    /// Invocation-level counters: processed and aborted count completed
    /// walks, failed counts walks that ended in a stage failure
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.metrics.total_processed(),
            failed: self.metrics.total_failed(),
            aborted: self.metrics.total_aborted(),
            dropped: self.pool.rejected_count(),
            blocked: 0,
            mean_latency_us: self.metrics.mean_latency_us(),
        }
    }

    fn invoke(&self, ctx: Context<T>) -> bool {
        let stages = Arc::clone(&self.stages);
        let handler = self.error_handler.clone();
        let metrics = self.metrics.clone();
        self.pool
            .submit(move || walk_stages(&stages, ctx, handler.as_ref(), &metrics))
    }
}

fn walk_stages<T: PipelineData>(
    stages: &[(String, Stage<T>)],
    mut ctx: Context<T>,
    handler: Option<&ErrorHandler<T>>,
    metrics: &StageMetrics,
) {
    let started = std::time::Instant::now();
    for (label, stage) in stages {
        let (next, output) = run_stage(stage, label, ctx, handler);
        ctx = next;
        if let Some(failure) = ctx.failure.take() {
            metrics.record_failed();
            report(&ctx, failure, label);
            return;
        }
        if ctx.aborted {
            break;
        }
        match output {
            Some(StageOutput::Value(args)) => ctx.args = args,
            Some(StageOutput::Fork(items)) => {
                metrics.record_failed();
                let failure =
                    StageError::message(label, items, "fork is not supported by the pool engine");
                report(&ctx, failure, label);
                return;
            }
            Some(StageOutput::Join(item)) => {
                metrics.record_failed();
                let failure = StageError::message(
                    label,
                    vec![item],
                    "join is not supported by the pool engine",
                );
                report(&ctx, failure, label);
                return;
            }
            Some(StageOutput::Abort(_)) | None => break,
        }
    }
    metrics.record_latency(started.elapsed());
    if ctx.aborted {
        metrics.record_aborted();
    } else {
        metrics.record_processed();
    }
    if let Some(wait) = ctx.wait.take() {
        let _ = wait.try_send(ctx.args);
    }
}

fn report<T: PipelineData>(ctx: &Context<T>, failure: StageError<T>, label: &str) {
    match ctx.error.as_ref() {
        Some(sink) => {
            let _ = sink.try_send(failure);
        }
        None => tracing::warn!("stage '{}' failed with no error sink: {}", label, failure),
    }
}

impl<T: PipelineData> Pipeline<T> for PoolPipeline<T> {
    fn run(&self, args: Vec<T>) {
        if !self.invoke(Context::new(args)) {
            tracing::debug!("pool closed, dropping invocation");
        }
    }

    fn run_wait(&self, args: Vec<T>) -> crate::error::Result<Vec<T>, T> {
        let (reply_tx, reply_rx) = bounded(1);
        let (err_tx, err_rx) = bounded(1);
        if !self.invoke(Context::with_reply(args, reply_tx, err_tx)) {
            return Err(PipelineError::Closed);
        }
        select_biased! {
            recv(err_rx) -> msg => match msg {
                Ok(err) => Err(err.into()),
                Err(_) => settle(&reply_rx, &err_rx),
            },
            recv(reply_rx) -> msg => match msg {
                Ok(args) => Ok(args),
                Err(_) => settle(&reply_rx, &err_rx),
            },
        }
    }

    fn run_wait_timeout(
        &self,
        timeout: Duration,
        sentinel: Vec<T>,
        args: Vec<T>,
    ) -> crate::error::Result<Vec<T>, T> {
        let (reply_tx, reply_rx) = bounded(1);
        let (err_tx, err_rx) = bounded(1);
        if !self.invoke(Context::with_reply(args, reply_tx, err_tx)) {
            return Err(PipelineError::Closed);
        }
        select_biased! {
            recv(err_rx) -> msg => match msg {
                Ok(err) => Err(err.into()),
                Err(_) => settle(&reply_rx, &err_rx),
            },
            recv(reply_rx) -> msg => match msg {
                Ok(args) => Ok(args),
                Err(_) => settle(&reply_rx, &err_rx),
            },
            default(timeout) => Ok(sentinel),
        }
    }

    // The pool belongs to its creator; closing it here would tear down
    // unrelated pipelines sharing it.
    fn stop(&self) {}
}
