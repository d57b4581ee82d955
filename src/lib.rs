//! A staged dataflow pipeline runtime.
//!
//! Papaline composes a linear sequence of user-defined stages, connected by
//! bounded queues, and executes work items through them with well-defined
//! backpressure, error, fork/join, abort, and cancellation semantics. Two
//! engines share one stage model:
//!
//! - the **channel engine** runs each stage as an independent reader task
//!   over its own bounded input queue; backpressure propagates upstream
//!   through the Block discipline
//! - the **pool engine** runs a whole invocation inline on one worker of a
//!   shared bounded thread pool
//!
//! # Features
//!
//! - Bounded stage queues with Block, Sliding, and Dropping disciplines
//! - Dynamic fan-out/fan-in with `fork` and `join`, nestable
//! - Early termination with `abort`, delivered to synchronous waiters
//! - Blocking and deadline-based synchronous invocation
//! - Per-stage counters and an optional pipeline-wide error handler
//!
//! # Example
//!
//! ```ignore
//! use papaline::{Pipeline, PipelineBuilder, Stage, value};
//!
//! let pipeline = PipelineBuilder::new()
//!     .stage(Stage::new(|args: Vec<i64>| value(vec![args[0] + 1])).with_name("inc"))
//!     .stage(Stage::new(|args: Vec<i64>| value(vec![args[0] * 2])).with_name("double"))
//!     .build()?;
//!
//! assert_eq!(pipeline.run_wait(vec![3])?, vec![8]);
//! pipeline.stop();
//! ```

pub mod context;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod stage;

// Re-exports for convenience
pub use context::{Context, PipelineData};
pub use error::{BoxError, ErrorHandler, PipelineError, Result, StageError};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{pipeline_as_stage, ChannelPipeline, Pipeline, PipelineBuilder};
pub use pool::{PoolPipeline, WorkerPool};
pub use queue::{bounded_queue, Discipline, QueueReceiver, QueueSender};
pub use stage::{abort, copy_stage, fork, join, value, Aborted, Stage, StageOutput, StageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
