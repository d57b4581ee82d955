use crate::error::StageError;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Bounds required of values flowing through a pipeline.
///
/// `Clone` lets a failing stage report the tuple it was invoked with;
/// `Debug` lets that report format. Blanket-implemented.
pub trait PipelineData: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> PipelineData for T {}

/// The envelope that carries one work item through a pipeline.
///
/// Holds the current argument tuple, the reply and error slots of a
/// synchronous caller, and the bookkeeping for outstanding fan-outs. The
/// fork-width stack and the accumulator stack are always the same depth and
/// shrink together; accumulators are shared between sibling contexts and
/// appended to under a lock.
pub struct Context<T: fmt::Debug> {
    pub(crate) args: Vec<T>,
    pub(crate) wait: Option<Sender<Vec<T>>>,
    pub(crate) error: Option<Sender<StageError<T>>>,
    pub(crate) aborted: bool,
    pub(crate) failure: Option<StageError<T>>,
    pub(crate) forks: Vec<usize>,
    pub(crate) fork_rets: Vec<Arc<Mutex<Vec<T>>>>,
}

impl<T: fmt::Debug> Context<T> {
    /// Envelope for a fire-and-forget invocation
    pub(crate) fn new(args: Vec<T>) -> Self {
        Self {
            args,
            wait: None,
            error: None,
            aborted: false,
            failure: None,
            forks: Vec::new(),
            fork_rets: Vec::new(),
        }
    }

    /// Envelope for a synchronous invocation with reply and error slots
    pub(crate) fn with_reply(args: Vec<T>, wait: Sender<Vec<T>>, error: Sender<StageError<T>>) -> Self {
        Self {
            wait: Some(wait),
            error: Some(error),
            ..Self::new(args)
        }
    }

    /// The current argument tuple
    pub fn args(&self) -> &[T] {
        &self.args
    }

    /// Depth of outstanding fan-outs
    pub fn fork_depth(&self) -> usize {
        self.forks.len()
    }

    /// Record a fan-out of width `items.len()` and split this context into
    /// one sibling per element. Siblings share the reply and error slots and
    /// the accumulator for the fan-out they belong to.
    pub(crate) fn fork_into(mut self, items: Vec<T>) -> Vec<Context<T>> {
        self.forks.push(items.len());
        self.fork_rets
            .push(Arc::new(Mutex::new(Vec::with_capacity(items.len()))));
        items
            .into_iter()
            .map(|item| Context {
                args: vec![item],
                wait: self.wait.clone(),
                error: self.error.clone(),
                aborted: false,
                failure: None,
                forks: self.forks.clone(),
                fork_rets: self.fork_rets.clone(),
            })
            .collect()
    }

    /// Append one completed branch to the innermost fan-out. When this was
    /// the last outstanding branch, returns the joined context carrying the
    /// accumulated values as its argument tuple; otherwise the branch ends
    /// here and `None` is returned.
    pub(crate) fn join_value(mut self, value: T) -> Option<Context<T>> {
        let width = *self.forks.last()?;
        let complete = {
            let acc = self.fork_rets.last()?;
            let mut acc = acc.lock();
            acc.push(value);
            acc.len() == width
        };
        if !complete {
            return None;
        }
        self.forks.pop();
        let joined = self
            .fork_rets
            .pop()
            .map(|acc| std::mem::take(&mut *acc.lock()))
            .unwrap_or_default();
        self.args = joined;
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_splits_args() {
        let ctx = Context::new(vec![0]);
        let siblings = ctx.fork_into(vec![1, 2, 3]);
        assert_eq!(siblings.len(), 3);
        for (i, sibling) in siblings.iter().enumerate() {
            assert_eq!(sibling.args(), &[i as i32 + 1]);
            assert_eq!(sibling.fork_depth(), 1);
        }
    }

    #[test]
    fn test_join_completes_at_width() {
        let siblings = Context::new(vec![0]).fork_into(vec![1, 2, 3]);
        let mut joined = None;
        for (i, sibling) in siblings.into_iter().enumerate() {
            let result = sibling.join_value((i as i32 + 1) * 10);
            if i < 2 {
                assert!(result.is_none());
            } else {
                joined = result;
            }
        }
        let joined = joined.expect("last branch joins");
        assert_eq!(joined.args(), &[10, 20, 30]);
        assert_eq!(joined.fork_depth(), 0);
    }

    #[test]
    fn test_nested_fork_resolves_inner_first() {
        let outer = Context::new(vec![0]).fork_into(vec![1, 2]);
        let mut outer = outer.into_iter();
        let first = outer.next().unwrap();

        let inner = first.fork_into(vec![10, 20]);
        assert!(inner.iter().all(|c| c.fork_depth() == 2));

        let mut inner = inner.into_iter();
        assert!(inner.next().unwrap().join_value(10).is_none());
        let joined = inner.next().unwrap().join_value(20).expect("inner joins");
        assert_eq!(joined.args(), &[10, 20]);
        assert_eq!(joined.fork_depth(), 1);
    }
}
