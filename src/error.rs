use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error type accepted from stage transforms
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pipeline operations over values of type `T`
pub type Result<R, T> = std::result::Result<R, PipelineError<T>>;

/// Callback invoked for every stage failure observed by a pipeline
pub type ErrorHandler<T> = Arc<dyn Fn(&StageError<T>) + Send + Sync>;

/// A transform failure wrapped with the stage that raised it and the
/// arguments it was invoked with
#[derive(Error, Debug)]
#[error("stage '{stage}' failed on input {args:?}")]
pub struct StageError<T: fmt::Debug> {
    /// Name of the failing stage
    pub stage: String,
    /// The argument tuple the transform received
    pub args: Vec<T>,
    /// The original failure
    #[source]
    pub source: BoxError,
}

impl<T: fmt::Debug> StageError<T> {
    pub(crate) fn new(stage: impl Into<String>, args: Vec<T>, source: BoxError) -> Self {
        Self {
            stage: stage.into(),
            args,
            source,
        }
    }

    /// Wrap a plain message as a stage failure
    pub(crate) fn message(stage: impl Into<String>, args: Vec<T>, msg: &str) -> Self {
        Self::new(stage, args, msg.into())
    }
}

/// Errors that can occur during pipeline construction and execution
#[derive(Error, Debug)]
pub enum PipelineError<T: fmt::Debug> {
    /// A stage transform failed; carries the wrapped failure
    #[error(transparent)]
    Stage(#[from] StageError<T>),

    /// The pipeline was stopped before a reply arrived, or an invocation
    /// was handed to an already-stopped pipeline
    #[error("pipeline is closed")]
    Closed,

    /// No stages in pipeline
    #[error("cannot build a pipeline with no stages")]
    NoStages,

    /// A stage declared a queue that can hold nothing
    #[error("stage '{0}' declares a zero-capacity queue")]
    ZeroCapacity(String),
}
