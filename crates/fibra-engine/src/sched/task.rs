//! Task structure and lifecycle state

use crate::context::Context;
use crate::sched::stack::TransferStack;
use crate::sched::Scheduler;
use crate::SchedError;
use fibra_sdk::{SuspensionPoint, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Status of a Task
///
/// Transitions follow `Created → Running → {Sleeping ⇄ Running,
/// Paused ⇄ Running, Waiting ⇄ Running} → Terminated`; `Terminated` is
/// absorbing. The variant order matters: every live status compares below
/// `Terminated`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Just created, not yet started
    Created,
    /// Runnable; resumed by the next tick
    Running,
    /// Suspended, woken when `sleep_until` passes (immediately if unset)
    Sleeping,
    /// Its own code is blocked inside a wait primitive
    Waiting,
    /// Explicitly paused; ignored by the tick until resumed
    Paused,
    /// Finished: completed, cancelled, failed, or timed out
    Terminated,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Sleeping => "sleeping",
            Status::Waiting => "waiting",
            Status::Paused => "paused",
            Status::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// Completion callback invoked once with a task's final results.
pub(crate) type AfterFn = Box<dyn FnOnce(&Scheduler, &[Value]) -> Result<(), SchedError>>;

/// A lightweight cooperative task
///
/// A task owns exactly one body for its lifetime: either a suspendable
/// execution [`Context`] (interpreted code) or a [`SuspensionPoint`] (a
/// device module's resumable probe). The body slot is checked out while the
/// task executes, which is what makes nested scheduler ticks skip the task
/// that triggered them.
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Current status
    status: Cell<Status>,

    /// Higher runs earlier within a tick; default 0
    priority: Cell<i32>,

    /// Absolute wake time in scheduler milliseconds, 0 = not set
    sleep_until: Cell<u64>,

    /// Absolute forced-termination time in scheduler milliseconds, 0 = disabled
    timeout_at: Cell<u64>,

    /// Some caller is blocked on this task's completion
    is_waited: Cell<bool>,

    /// Body released and interpreter references dropped
    closed: Cell<bool>,

    /// Task that was executing when this one was created
    parent: Option<TaskId>,

    /// Interpreted execution context (None while checked out or after close)
    pub(crate) context: RefCell<Option<Box<dyn Context>>>,

    /// Device-module suspension point; when present it takes over resume
    pub(crate) point: RefCell<Option<Box<dyn SuspensionPoint>>>,

    /// Values staged for the next resume
    inbox: RefCell<TransferStack>,

    /// Values produced by the last resume, staged for the waiter/continuation
    results: RefCell<TransferStack>,

    /// Completion callback, run once at reap
    after: RefCell<Option<AfterFn>>,

    /// Error that terminated this task, if any
    error: RefCell<Option<SchedError>>,
}

impl Task {
    pub(crate) fn new(parent: Option<TaskId>, transfer_limit: usize) -> Self {
        Self {
            id: TaskId::new(),
            status: Cell::new(Status::Created),
            priority: Cell::new(0),
            sleep_until: Cell::new(0),
            timeout_at: Cell::new(0),
            is_waited: Cell::new(false),
            closed: Cell::new(false),
            parent,
            context: RefCell::new(None),
            point: RefCell::new(None),
            inbox: RefCell::new(TransferStack::new(transfer_limit)),
            results: RefCell::new(TransferStack::new(transfer_limit)),
            after: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current status
    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.status.set(status);
    }

    /// Get the scheduling priority
    pub fn priority(&self) -> i32 {
        self.priority.get()
    }

    /// Set the scheduling priority; applied at the next tick's reorder
    pub fn set_priority(&self, priority: i32) {
        self.priority.set(priority);
    }

    /// Get the parent task ID (the task active at creation), if any
    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// True once the task has reached its terminal state
    pub fn terminated(&self) -> bool {
        self.status.get() == Status::Terminated
    }

    /// True while some caller is blocked on this task's completion
    pub fn is_waited(&self) -> bool {
        self.is_waited.get()
    }

    pub(crate) fn set_waited(&self, waited: bool) {
        self.is_waited.set(waited);
    }

    /// True if the task was terminated by its timeout expiring
    ///
    /// Reads true for any terminated task that had a timeout armed, which is
    /// why timed-out tasks defer their final close until the handle drops.
    pub fn expired(&self) -> bool {
        self.timeout_at.get() > 0 && self.status.get() == Status::Terminated
    }

    pub(crate) fn sleep_until(&self) -> u64 {
        self.sleep_until.get()
    }

    pub(crate) fn set_sleep_until(&self, at: u64) {
        self.sleep_until.set(at);
    }

    pub(crate) fn clear_sleep(&self) {
        self.sleep_until.set(0);
    }

    pub(crate) fn timeout_at(&self) -> u64 {
        self.timeout_at.get()
    }

    pub(crate) fn set_timeout_at(&self, at: u64) {
        self.timeout_at.set(at);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn set_closed(&self) {
        self.closed.set(true);
    }

    /// True if the task still owns a body to run
    pub(crate) fn has_body(&self) -> bool {
        self.context.borrow().is_some() || self.point.borrow().is_some()
    }

    pub(crate) fn push_inbox(&self, values: Vec<Value>) -> Result<(), SchedError> {
        self.inbox.borrow_mut().push_all(values)
    }

    pub(crate) fn drain_inbox(&self) -> Vec<Value> {
        self.inbox.borrow_mut().take()
    }

    pub(crate) fn stage_results(&self, values: Vec<Value>) -> Result<(), SchedError> {
        let mut results = self.results.borrow_mut();
        results.take();
        results.push_all(values)
    }

    pub(crate) fn take_results(&self) -> Vec<Value> {
        self.results.borrow_mut().take()
    }

    pub(crate) fn results_snapshot(&self) -> Vec<Value> {
        self.results.borrow().snapshot()
    }

    pub(crate) fn set_after(&self, after: AfterFn) {
        *self.after.borrow_mut() = Some(after);
    }

    pub(crate) fn take_after(&self) -> Option<AfterFn> {
        self.after.borrow_mut().take()
    }

    pub(crate) fn set_error(&self, error: SchedError) {
        *self.error.borrow_mut() = Some(error);
    }

    /// The error that terminated this task, if it failed
    pub fn error(&self) -> Option<SchedError> {
        self.error.borrow().clone()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Safety net for handles dropped without an explicit close: the
        // suspension-point finalizer must still run exactly once.
        if self.closed.get() {
            return;
        }
        self.context.get_mut().take();
        if let Some(mut point) = self.point.get_mut().take() {
            point.close();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id.as_u64())
            .field("status", &self.status.get())
            .field("priority", &self.priority.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibra_sdk::Probe;
    use std::rc::Rc;

    #[test]
    fn test_task_id_uniqueness() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_task_id_default() {
        let id = TaskId::default();
        assert!(id.as_u64() > 0);
    }

    #[test]
    fn test_task_creation_defaults() {
        let task = Task::new(None, 8);

        assert_eq!(task.status(), Status::Created);
        assert_eq!(task.priority(), 0);
        assert_eq!(task.parent(), None);
        assert!(!task.is_waited());
        assert!(!task.expired());
        assert_eq!(task.sleep_until(), 0);
        assert_eq!(task.timeout_at(), 0);
        assert!(!task.has_body());
    }

    #[test]
    fn test_task_with_parent() {
        let parent_id = TaskId::new();
        let task = Task::new(Some(parent_id), 8);
        assert_eq!(task.parent(), Some(parent_id));
    }

    #[test]
    fn test_status_ordering() {
        assert!(Status::Created < Status::Terminated);
        assert!(Status::Running < Status::Terminated);
        assert!(Status::Paused < Status::Terminated);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Running.to_string(), "running");
        assert_eq!(Status::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_expired_requires_timeout_and_termination() {
        let task = Task::new(None, 8);
        task.set_timeout_at(5);
        assert!(!task.expired());

        task.set_status(Status::Terminated);
        assert!(task.expired());
        assert!(task.terminated());

        let plain = Task::new(None, 8);
        plain.set_status(Status::Terminated);
        assert!(!plain.expired());
    }

    #[test]
    fn test_results_staging_replaces() {
        let task = Task::new(None, 8);
        task.stage_results(vec![Value::Int(1)]).unwrap();
        task.stage_results(vec![Value::Int(2), Value::Int(3)]).unwrap();

        assert_eq!(task.take_results(), vec![Value::Int(2), Value::Int(3)]);
        assert!(task.take_results().is_empty());
    }

    #[test]
    fn test_inbox_overflow() {
        let task = Task::new(None, 2);
        task.push_inbox(vec![Value::Int(1), Value::Int(2)]).unwrap();

        let err = task.push_inbox(vec![Value::Int(3)]).unwrap_err();
        assert!(matches!(err, SchedError::StackOverflow { .. }));
    }

    #[test]
    fn test_drop_runs_point_finalizer() {
        struct TrackedPoint {
            closed: Rc<Cell<u32>>,
        }
        impl SuspensionPoint for TrackedPoint {
            fn poll(&mut self) -> Probe {
                Probe::Pending
            }
            fn close(&mut self) {
                self.closed.set(self.closed.get() + 1);
            }
        }

        let closed = Rc::new(Cell::new(0));
        {
            let task = Task::new(None, 8);
            *task.point.borrow_mut() = Some(Box::new(TrackedPoint {
                closed: closed.clone(),
            }));
        }
        assert_eq!(closed.get(), 1);
    }
}
