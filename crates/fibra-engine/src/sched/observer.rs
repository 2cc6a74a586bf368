//! Scheduler transition observers
//!
//! Instead of per-context debug hooks, embedders attach an [`Observer`] to
//! the scheduler and receive every task transition as a structured event.
//! Observers run synchronously inside the tick and must not block.

use crate::sched::TaskId;

/// What happened to a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskEventKind {
    /// Registered in the task registry
    Created,
    /// First resume requested via `start`
    Started,
    /// About to be resumed (context re-entry or suspension-point probe)
    Resumed,
    /// Suspended again after a resume
    Yielded,
    /// Ran to completion with staged results
    Completed,
    /// Terminated by an error raised inside its body
    Failed,
    /// Terminated by explicit cancellation
    Cancelled,
    /// Terminated by the timeout sweep
    TimedOut,
    /// Removed from the registry
    Reaped,
}

/// One task transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    /// The task that transitioned
    pub task: TaskId,
    /// What happened
    pub kind: TaskEventKind,
}

/// Receives every task transition of one scheduler.
pub trait Observer {
    /// Called synchronously for each transition, in the order they happen.
    fn on_event(&self, event: &TaskEvent);
}

/// Observer that forwards transitions to `tracing`.
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_event(&self, e: &TaskEvent) {
        match e.kind {
            TaskEventKind::Failed => {
                tracing::debug!(task = e.task.as_u64(), "task failed");
            }
            TaskEventKind::TimedOut => {
                tracing::debug!(task = e.task.as_u64(), "task timed out");
            }
            kind => {
                tracing::trace!(task = e.task.as_u64(), event = ?kind, "task transition");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) struct Recorder {
        pub events: Rc<RefCell<Vec<TaskEvent>>>,
    }

    impl Observer for Recorder {
        fn on_event(&self, event: &TaskEvent) {
            self.events.borrow_mut().push(*event);
        }
    }

    #[test]
    fn test_recorder_collects_in_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: events.clone(),
        };

        let id = TaskId::new();
        recorder.on_event(&TaskEvent {
            task: id,
            kind: TaskEventKind::Created,
        });
        recorder.on_event(&TaskEvent {
            task: id,
            kind: TaskEventKind::Started,
        });

        let seen = events.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, TaskEventKind::Created);
        assert_eq!(seen[1].kind, TaskEventKind::Started);
    }

    #[test]
    fn test_log_observer_smoke() {
        let obs = LogObserver;
        obs.on_event(&TaskEvent {
            task: TaskId::new(),
            kind: TaskEventKind::Failed,
        });
    }
}
