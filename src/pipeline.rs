use crate::context::{Context, PipelineData};
use crate::error::{ErrorHandler, PipelineError, StageError};
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::pool::{PoolPipeline, WorkerPool};
use crate::queue::{bounded_queue, QueueReceiver, QueueSender};
use crate::stage::{run_stage, Stage, StageOutput};
use crossbeam::channel::{bounded, select_biased, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{Builder as ThreadBuilder, JoinHandle};
use std::time::{Duration, Instant};

/// The contract shared by both execution engines.
///
/// A pipeline accepts argument tuples, threads them through its stages, and
/// for the synchronous variants hands the final tuple back to the caller.
pub trait Pipeline<T: PipelineData>: Send + Sync {
    /// Fire-and-forget invocation. Failures are absorbed unless the
    /// pipeline was built with an error handler.
    fn run(&self, args: Vec<T>);

    /// Invoke and block until the final tuple, a stage failure, or
    /// shutdown. Stage failures re-raise here; a stopped pipeline raises
    /// [`PipelineError::Closed`].
    fn run_wait(&self, args: Vec<T>) -> crate::error::Result<Vec<T>, T>;

    /// As [`Pipeline::run_wait`], but give up after `timeout` and return
    /// `sentinel` instead. The in-flight work is not cancelled.
    fn run_wait_timeout(
        &self,
        timeout: Duration,
        sentinel: Vec<T>,
        args: Vec<T>,
    ) -> crate::error::Result<Vec<T>, T>;

    /// Shut the pipeline down. For the channel engine this stops every
    /// stage task; for the pool engine it is a no-op because the pool's
    /// lifecycle belongs to its creator.
    fn stop(&self);
}

/// Builder for pipelines over either engine
pub struct PipelineBuilder<T: PipelineData> {
    stages: Vec<Stage<T>>,
    error_handler: Option<ErrorHandler<T>>,
}

impl<T: PipelineData> PipelineBuilder<T> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            error_handler: None,
        }
    }

    /// Append a stage to the chain
    pub fn stage(mut self, stage: Stage<T>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Install a handler that observes every stage failure, including those
    /// of fire-and-forget invocations
    pub fn error_handler(mut self, handler: impl Fn(&StageError<T>) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Build and start a channel-engine pipeline: one reader task per stage,
    /// stages connected head-to-tail by their input queues
    pub fn build(self) -> crate::error::Result<ChannelPipeline<T>, T> {
        validate(&self.stages)?;
        Ok(ChannelPipeline::start(self.stages, self.error_handler))
    }

    /// Build a pool-engine pipeline: each invocation walks the whole chain
    /// inline on one worker of `pool`
    pub fn build_pooled(self, pool: Arc<WorkerPool>) -> crate::error::Result<PoolPipeline<T>, T> {
        validate(&self.stages)?;
        Ok(PoolPipeline::new(self.stages, pool, self.error_handler))
    }
}

impl<T: PipelineData> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn validate<T: PipelineData>(stages: &[Stage<T>]) -> crate::error::Result<(), T> {
    if stages.is_empty() {
        return Err(PipelineError::NoStages);
    }
    for (i, stage) in stages.iter().enumerate() {
        if stage.capacity() == 0 {
            return Err(PipelineError::ZeroCapacity(stage.label(i)));
        }
    }
    Ok(())
}

struct StageHandle<T: PipelineData> {
    label: String,
    queue: QueueSender<Context<T>>,
    metrics: StageMetrics,
}

/// The channel engine: every stage runs as its own long-lived reader task
/// over a bounded input queue.
///
/// Backpressure propagates upstream through the Block discipline of each
/// stage's queue, all the way to callers of `run`. The pipeline is live from
/// construction; `stop` closes the shared done signal, which every reader
/// observes with priority over its input.
pub struct ChannelPipeline<T: PipelineData> {
    stages: Vec<StageHandle<T>>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: PipelineData> ChannelPipeline<T> {
    fn start(stages: Vec<Stage<T>>, handler: Option<ErrorHandler<T>>) -> Self {
        let (done_tx, done_rx) = bounded::<()>(0);

        let mut senders = Vec::with_capacity(stages.len());
        let mut receivers = Vec::with_capacity(stages.len());
        for stage in &stages {
            let (tx, rx) = bounded_queue(stage.capacity(), stage.discipline());
            senders.push(tx);
            receivers.push(rx);
        }

        let mut handles = Vec::with_capacity(stages.len());
        let mut stage_handles = Vec::with_capacity(stages.len());
        for (i, (stage, input)) in stages.into_iter().zip(receivers).enumerate() {
            let label = stage.label(i);
            let out = senders.get(i + 1).cloned();
            let metrics = StageMetrics::new();
            stage_handles.push(StageHandle {
                label: label.clone(),
                queue: senders[i].clone(),
                metrics: metrics.clone(),
            });

            let done = done_rx.clone();
            let handler = handler.clone();
            let spawned = ThreadBuilder::new()
                .name(format!("papaline-stage-{i}"))
                .spawn(move || stage_reader(stage, label, input, out, done, handler, metrics));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::error!("failed to spawn stage reader {}: {}", i, err),
            }
        }

        Self {
            stages: stage_handles,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
            handles: Mutex::new(handles),
        }
    }

    /// Counters for the stage at `index`, including its queue's overflow
    /// counts
    pub fn stage_metrics(&self, index: usize) -> Option<MetricsSnapshot> {
        let handle = self.stages.get(index)?;
        Some(MetricsSnapshot {
            processed: handle.metrics.total_processed(),
            failed: handle.metrics.total_failed(),
            aborted: handle.metrics.total_aborted(),
            dropped: handle.queue.dropped_count(),
            blocked: handle.queue.blocked_count(),
            mean_latency_us: handle.metrics.mean_latency_us(),
        })
    }

    /// One formatted line per stage
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline metrics:\n");
        for (i, handle) in self.stages.iter().enumerate() {
            if let Some(snapshot) = self.stage_metrics(i) {
                summary.push_str(&format!("  {}: {}\n", handle.label, snapshot.format()));
            }
        }
        summary
    }

    fn head(&self) -> &QueueSender<Context<T>> {
        &self.stages[0].queue
    }

    fn wait_inner(
        &self,
        args: Vec<T>,
        deadline: Option<(Duration, Vec<T>)>,
    ) -> crate::error::Result<Vec<T>, T> {
        let (reply_tx, reply_rx) = bounded(1);
        let (err_tx, err_rx) = bounded(1);
        if self.head().put(Context::with_reply(args, reply_tx, err_tx)).is_err() {
            return Err(PipelineError::Closed);
        }
        match deadline {
            None => select_biased! {
                recv(self.done_rx) -> _ => Err(PipelineError::Closed),
                recv(err_rx) -> msg => match msg {
                    Ok(err) => Err(err.into()),
                    Err(_) => settle(&reply_rx, &err_rx),
                },
                recv(reply_rx) -> msg => match msg {
                    Ok(args) => Ok(args),
                    Err(_) => settle(&reply_rx, &err_rx),
                },
            },
            Some((timeout, sentinel)) => select_biased! {
                recv(self.done_rx) -> _ => Err(PipelineError::Closed),
                recv(err_rx) -> msg => match msg {
                    Ok(err) => Err(err.into()),
                    Err(_) => settle(&reply_rx, &err_rx),
                },
                recv(reply_rx) -> msg => match msg {
                    Ok(args) => Ok(args),
                    Err(_) => settle(&reply_rx, &err_rx),
                },
                default(timeout) => Ok(sentinel),
            },
        }
    }
}

impl<T: PipelineData> Pipeline<T> for ChannelPipeline<T> {
    fn run(&self, args: Vec<T>) {
        if self.head().put(Context::new(args)).is_err() {
            tracing::debug!("pipeline closed, dropping invocation");
        }
    }

    fn run_wait(&self, args: Vec<T>) -> crate::error::Result<Vec<T>, T> {
        self.wait_inner(args, None)
    }

    fn run_wait_timeout(
        &self,
        timeout: Duration,
        sentinel: Vec<T>,
        args: Vec<T>,
    ) -> crate::error::Result<Vec<T>, T> {
        self.wait_inner(args, Some((timeout, sentinel)))
    }

    fn stop(&self) {
        let Some(done) = self.done_tx.lock().take() else {
            return;
        };
        tracing::debug!("pipeline stop signaled");
        drop(done);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// The invocation's outcome channels disconnected without a winner in the
/// select; collect whichever result the context left behind.
pub(crate) fn settle<T: PipelineData>(
    reply_rx: &Receiver<Vec<T>>,
    err_rx: &Receiver<StageError<T>>,
) -> crate::error::Result<Vec<T>, T> {
    if let Ok(err) = err_rx.try_recv() {
        return Err(err.into());
    }
    if let Ok(args) = reply_rx.try_recv() {
        return Ok(args);
    }
    Err(PipelineError::Closed)
}

/// Long-lived reader task for one realized stage. Services the done signal
/// with priority over the input queue, so shutdown is observed promptly even
/// under sustained load.
fn stage_reader<T: PipelineData>(
    stage: Stage<T>,
    label: String,
    input: QueueReceiver<Context<T>>,
    out: Option<QueueSender<Context<T>>>,
    done: Receiver<()>,
    handler: Option<ErrorHandler<T>>,
    metrics: StageMetrics,
) {
    tracing::debug!("stage '{}' started", label);
    loop {
        select_biased! {
            recv(done) -> _ => break,
            recv(input.inner()) -> msg => match msg {
                Ok(ctx) => process_one(&stage, &label, ctx, out.as_ref(), handler.as_ref(), &metrics),
                Err(_) => break,
            },
        }
    }
    input.close();
    tracing::debug!("stage '{}' stopped", label);
}

fn process_one<T: PipelineData>(
    stage: &Stage<T>,
    label: &str,
    ctx: Context<T>,
    out: Option<&QueueSender<Context<T>>>,
    handler: Option<&ErrorHandler<T>>,
    metrics: &StageMetrics,
) {
    let started = Instant::now();
    let (mut ctx, output) = run_stage(stage, label, ctx, handler);
    metrics.record_latency(started.elapsed());

    if let Some(failure) = ctx.failure.take() {
        metrics.record_failed();
        deliver_failure(&ctx, failure, label);
        return;
    }
    if ctx.aborted {
        metrics.record_aborted();
        if let Some(wait) = ctx.wait.take() {
            let _ = wait.try_send(ctx.args);
        }
        return;
    }
    let Some(output) = output else {
        return;
    };
    metrics.record_processed();
    dispatch(ctx, output, out, label, metrics);
}

fn deliver_failure<T: PipelineData>(ctx: &Context<T>, failure: StageError<T>, label: &str) {
    match ctx.error.as_ref() {
        Some(sink) => {
            let _ = sink.try_send(failure);
        }
        None => tracing::warn!("stage '{}' failed with no error sink: {}", label, failure),
    }
}

fn dispatch<T: PipelineData>(
    mut ctx: Context<T>,
    output: StageOutput<T>,
    out: Option<&QueueSender<Context<T>>>,
    label: &str,
    metrics: &StageMetrics,
) {
    match output {
        StageOutput::Value(args) => {
            ctx.args = args;
            forward(ctx, out, label);
        }
        StageOutput::Fork(items) => {
            for sibling in ctx.fork_into(items) {
                forward(sibling, out, label);
            }
        }
        StageOutput::Join(item) => {
            if ctx.fork_depth() == 0 {
                metrics.record_failed();
                let failure =
                    StageError::message(label, vec![item], "join with no outstanding fork");
                deliver_failure(&ctx, failure, label);
                return;
            }
            if let Some(joined) = ctx.join_value(item) {
                forward(joined, out, label);
            }
        }
        // run_stage folds aborts into the context before dispatch
        StageOutput::Abort(_) => {}
    }
}

/// Hand a context to the effective output: the next stage's queue, or for
/// the terminal stage the caller's reply slot. A terminal context with no
/// waiter is dropped.
fn forward<T: PipelineData>(mut ctx: Context<T>, out: Option<&QueueSender<Context<T>>>, label: &str) {
    match out {
        Some(queue) => {
            if queue.put(ctx).is_err() {
                tracing::trace!("stage '{}': downstream queue closed, dropping item", label);
            }
        }
        None => {
            if let Some(wait) = ctx.wait.take() {
                // Non-blocking: the reply slot holds one tuple and any
                // extras (a terminal fork) have nowhere to land.
                let _ = wait.try_send(ctx.args);
            }
        }
    }
}

/// Wrap `pipeline` as a stage so it can be nested inside another pipeline.
/// The stage's transform is a synchronous `run_wait` against the wrapped
/// pipeline.
pub fn pipeline_as_stage<T: PipelineData>(pipeline: Arc<dyn Pipeline<T>>) -> Stage<T> {
    Stage::new(move |args| match pipeline.run_wait(args) {
        Ok(out) => crate::stage::value(out),
        Err(err) => Err(Box::new(err)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::value;

    #[test]
    fn test_no_stages_error() {
        let result = PipelineBuilder::<i32>::new().build();
        assert!(matches!(result, Err(PipelineError::NoStages)));
    }

    #[test]
    fn test_zero_capacity_error() {
        let result = PipelineBuilder::new()
            .stage(Stage::new(|args: Vec<i32>| value(args)).with_capacity(0).with_name("head"))
            .build();
        match result {
            Err(PipelineError::ZeroCapacity(name)) => assert_eq!(name, "head"),
            _ => panic!("expected a zero-capacity error"),
        }
    }

    #[test]
    fn test_stage_metrics_exposed() {
        let pipeline = PipelineBuilder::new()
            .stage(Stage::new(|args: Vec<i32>| value(args)))
            .build()
            .unwrap();
        let _ = pipeline.run_wait(vec![1]).unwrap();
        let snapshot = pipeline.stage_metrics(0).unwrap();
        assert_eq!(snapshot.processed, 1);
        assert!(pipeline.stage_metrics(1).is_none());
        pipeline.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let pipeline = PipelineBuilder::new()
            .stage(Stage::new(|args: Vec<i32>| value(args)))
            .build()
            .unwrap();
        pipeline.stop();
        pipeline.stop();
        assert!(matches!(pipeline.run_wait(vec![1]), Err(PipelineError::Closed)));
    }
}
