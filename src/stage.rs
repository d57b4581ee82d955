use crate::context::{Context, PipelineData};
use crate::error::{BoxError, ErrorHandler, StageError};
use crate::queue::Discipline;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default input queue capacity for a stage
pub const DEFAULT_CAPACITY: usize = 100;

/// What a stage hands back to the engine
pub enum StageOutput<T> {
    /// The argument tuple for the next stage
    Value(Vec<T>),
    /// Fan out: each element becomes an independent sibling downstream
    Fork(Vec<T>),
    /// Fan in: append this value to the innermost outstanding fan-out
    Join(T),
    /// Terminate this traversal with the given tuple as its result
    Abort(Vec<T>),
}

/// Result type returned by stage transforms
pub type StageResult<T> = std::result::Result<StageOutput<T>, BoxError>;

type Transform<T> = Arc<dyn Fn(Vec<T>) -> StageResult<T> + Send + Sync>;

/// Pass an argument tuple to the next stage
pub fn value<T>(args: impl Into<Vec<T>>) -> StageResult<T> {
    Ok(StageOutput::Value(args.into()))
}

/// Fan the elements of `items` out as independent downstream work items
pub fn fork<T>(items: impl IntoIterator<Item = T>) -> StageResult<T> {
    Ok(StageOutput::Fork(items.into_iter().collect()))
}

/// Hand `item` to the innermost outstanding fan-out; the joined tuple
/// advances once every sibling has arrived
pub fn join<T>(item: T) -> StageResult<T> {
    Ok(StageOutput::Join(item))
}

/// Terminate this traversal early, with `args` as its final result
pub fn abort<T>(args: impl Into<Vec<T>>) -> StageResult<T> {
    Ok(StageOutput::Abort(args.into()))
}

/// Raised through `?` from arbitrarily deep inside a transform to abort the
/// traversal. `None` keeps the tuple the stage was invoked with as the
/// result.
#[derive(Error, Debug)]
#[error("pipeline traversal aborted")]
pub struct Aborted<T: fmt::Debug + Send + Sync + 'static>(pub Option<Vec<T>>);

/// A reusable stage template: a transform plus the capacity, overflow
/// discipline, and name its input queue is realized with.
///
/// Constructing a stage only records intent; the queue exists once a
/// pipeline is built around it. Templates clone cheaply and may be shared
/// across pipelines.
pub struct Stage<T> {
    transform: Transform<T>,
    capacity: usize,
    discipline: Discipline,
    name: Option<String>,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            capacity: self.capacity,
            discipline: self.discipline,
            name: self.name.clone(),
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("capacity", &self.capacity)
            .field("discipline", &self.discipline)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T> Stage<T> {
    /// Create a stage from a transform, with capacity 100 and the Block
    /// discipline
    pub fn new(transform: impl Fn(Vec<T>) -> StageResult<T> + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
            capacity: DEFAULT_CAPACITY,
            discipline: Discipline::Block,
            name: None,
        }
    }

    /// Set the input queue capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the overflow discipline of the input queue
    pub fn with_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Name the stage; the name appears in failure wrappers and logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Display label: the stage name, or its position in the pipeline
    pub(crate) fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("stage-{index}"),
        }
    }
}

/// A stage that invokes `tap` for its side effects and forwards the
/// arguments unchanged. Useful as a logging tap.
pub fn copy_stage<T: PipelineData>(tap: impl Fn(&[T]) + Send + Sync + 'static) -> Stage<T> {
    Stage::new(move |args| {
        tap(&args);
        value(args)
    })
}

/// Run one stage against one context.
///
/// On success the control output is returned alongside the context. A
/// deep-raised [`Aborted`] marks the context aborted and merges its payload;
/// any other failure is wrapped with the stage label and input tuple,
/// reported to the pipeline's error handler, and recorded on the context.
/// An [`StageOutput::Abort`] return is folded into the aborted state here so
/// engines only ever dispatch on `Value`, `Fork`, and `Join`.
pub(crate) fn run_stage<T: PipelineData>(
    stage: &Stage<T>,
    label: &str,
    mut ctx: Context<T>,
    handler: Option<&ErrorHandler<T>>,
) -> (Context<T>, Option<StageOutput<T>>) {
    let inputs = ctx.args.clone();
    let args = std::mem::take(&mut ctx.args);
    match (stage.transform)(args) {
        Ok(StageOutput::Abort(args)) => {
            ctx.aborted = true;
            ctx.args = args;
            (ctx, None)
        }
        Ok(output) => (ctx, Some(output)),
        Err(err) => match err.downcast::<Aborted<T>>() {
            Ok(signal) => {
                ctx.aborted = true;
                ctx.args = signal.0.unwrap_or(inputs);
                (ctx, None)
            }
            Err(err) => {
                let wrapped = StageError::new(label, inputs, err);
                if let Some(handler) = handler {
                    handler(&wrapped);
                }
                ctx.failure = Some(wrapped);
                (ctx, None)
            }
        },
    }
}
