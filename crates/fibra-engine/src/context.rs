//! Suspendable execution contexts
//!
//! The host interpreter supplies the actual suspension primitive; the engine
//! only sees it through the [`Context`] trait. Resuming a context has three
//! outcomes: it suspended again ([`Resume::Yielded`]), it ran to completion
//! ([`Resume::Completed`]), or it raised an error (`Err`). The scheduler never
//! looks inside a context — all state lives behind the trait object.
//!
//! For hosts without first-class coroutines (and for tests), [`StepFn`] lifts
//! an explicit state-machine closure into a `Context`: each resume invokes the
//! closure once with the pending arguments, and the closure decides whether
//! this step yields, completes, or fails.

use crate::sched::Scheduler;
use crate::SchedError;
use fibra_sdk::Value;

/// Outcome of resuming an execution context.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// The context suspended again, yielding these values to whichever
    /// context is logically waiting on it.
    Yielded(Vec<Value>),
    /// The context ran to completion with these final results.
    Completed(Vec<Value>),
}

/// An isolated, suspendable execution context owned by one task.
///
/// The `sched` handle gives the running body access to the scheduler that is
/// driving it — for sleeping, spawning child tasks, or nested waits. Holding
/// no scheduler borrows across `resume` is the engine's side of the contract;
/// the body may freely call back into it.
pub trait Context {
    /// Resume the context with `args`, until it suspends or completes.
    fn resume(&mut self, sched: &Scheduler, args: Vec<Value>) -> Result<Resume, SchedError>;
}

/// Explicit state-machine context: one closure invocation per resume.
pub struct StepFn<F> {
    step: F,
}

impl<F> StepFn<F>
where
    F: FnMut(&Scheduler, Vec<Value>) -> Result<Resume, SchedError>,
{
    /// Wrap a step closure.
    pub fn new(step: F) -> Self {
        Self { step }
    }
}

impl<F> Context for StepFn<F>
where
    F: FnMut(&Scheduler, Vec<Value>) -> Result<Resume, SchedError>,
{
    fn resume(&mut self, sched: &Scheduler, args: Vec<Value>) -> Result<Resume, SchedError> {
        (self.step)(sched, args)
    }
}

/// Box a step closure as a [`Context`].
pub fn from_fn<F>(step: F) -> Box<dyn Context>
where
    F: FnMut(&Scheduler, Vec<Value>) -> Result<Resume, SchedError> + 'static,
{
    Box::new(StepFn::new(step))
}
