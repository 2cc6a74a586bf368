//! Main scheduler: registry, tick, and wait primitives
//!
//! One `Scheduler` owns the registry of live tasks and is the only thing that
//! moves a suspended task forward. Each call to [`Scheduler::update`] performs
//! one full tick: reorder by priority, wake sleepers, sweep timeouts, resume
//! runnable tasks, reap terminated ones. Wait primitives are loops over
//! `update` driven from the caller's context.
//!
//! Re-entrancy is expected: a task's own code may call back into the scheduler
//! (spawning children, nested waits) while a tick is in flight. The tick never
//! holds a registry borrow across a body resume, walks a snapshot of the
//! sorted order, and skips any task whose body is currently checked out.

use crate::context::{Context, Resume};
use crate::sched::observer::{Observer, TaskEvent, TaskEventKind};
use crate::sched::stack::TransferStack;
use crate::sched::task::{Status, Task, TaskId};
use crate::SchedError;
use fibra_sdk::{Probe, SuspensionPoint, Value};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total tasks registered
    pub tasks_spawned: u64,

    /// Total tasks that reached Terminated
    pub tasks_completed: u64,

    /// Tasks currently in the registry and not terminated
    pub active_tasks: usize,
}

/// Tuning knobs for a scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Nap the host thread every this many ticks; 0 disables the nap
    pub idle_threshold: u32,

    /// How long the cooperative idle nap lasts
    pub idle_sleep: Duration,

    /// Maximum values per transfer into a task; beyond it transfers fail
    /// with `StackOverflow`
    pub max_transfer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_threshold: 1,
            idle_sleep: Duration::from_millis(1),
            max_transfer: 256,
        }
    }
}

impl SchedulerConfig {
    /// Config without the cooperative idle nap (busy ticking; for callers
    /// that embed the tick in their own event loop)
    pub fn no_idle() -> Self {
        Self {
            idle_threshold: 0,
            ..Self::default()
        }
    }
}

/// Monotonic millisecond clock.
struct Clock {
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since scheduler start, offset by one so that 0 stays
    /// the "timer not set" sentinel.
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }
}

/// Cooperative task scheduler
///
/// Single-threaded by construction: tasks are `Rc`-shared with interior
/// mutability, and only one execution context is ever active at a time.
pub struct Scheduler {
    /// Live tasks in scheduling order; appends go at the tail so equal
    /// priorities keep FIFO fairness across ticks
    tasks: RefCell<Vec<Rc<Task>>>,

    /// Id lookup into the registry
    index: RefCell<FxHashMap<TaskId, Rc<Task>>>,

    /// Stack of tasks whose bodies are currently executing (nested resumes)
    executing: RefCell<Vec<TaskId>>,

    /// Transition observers
    observers: RefCell<Vec<Rc<dyn Observer>>>,

    /// Values yielded by tasks with no living creator, for the embedder
    root_inbox: RefCell<TransferStack>,

    config: SchedulerConfig,
    clock: Clock,

    /// Ticks since the last cooperative idle nap
    idle_ticks: Cell<u32>,

    spawned: Cell<u64>,
    completed: Cell<u64>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with a custom configuration
    pub fn with_config(config: SchedulerConfig) -> Self {
        let root_limit = config.max_transfer;
        Self {
            tasks: RefCell::new(Vec::new()),
            index: RefCell::new(FxHashMap::default()),
            executing: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            root_inbox: RefCell::new(TransferStack::new(root_limit)),
            config,
            clock: Clock::new(),
            idle_ticks: Cell::new(0),
            spawned: Cell::new(0),
            completed: Cell::new(0),
        }
    }

    // ========================================================================
    // Lifecycle operations
    // ========================================================================

    /// Create a task around a suspendable execution context.
    ///
    /// The task is registered as Created and does not run until
    /// [`Scheduler::start`]. Its parent is the task executing right now, if
    /// any, which is where its yielded values will be delivered.
    pub fn create(&self, context: Box<dyn Context>) -> Rc<Task> {
        let task = Task::new(self.current_id(), self.config.max_transfer);
        *task.context.borrow_mut() = Some(context);
        self.register(task)
    }

    /// Create a task driven by a device-module suspension point instead of
    /// interpreted code.
    pub fn create_external(&self, point: Box<dyn SuspensionPoint>) -> Rc<Task> {
        let task = Task::new(self.current_id(), self.config.max_transfer);
        *task.point.borrow_mut() = Some(point);
        self.register(task)
    }

    /// Attach a suspension point to a task: every future resume probes the
    /// point instead of re-entering the task's code.
    ///
    /// A previously attached point is finalized before being replaced.
    pub fn register_point(
        &self,
        task: &Rc<Task>,
        point: Box<dyn SuspensionPoint>,
    ) -> Result<(), SchedError> {
        if task.status() == Status::Terminated || task.is_closed() {
            return Err(SchedError::InvalidEntry);
        }
        if let Some(mut old) = task.point.borrow_mut().replace(point) {
            old.close();
        }
        Ok(())
    }

    /// Start a created task, performing its first resume with `args`.
    ///
    /// Returns `Some(results)` if the task terminated synchronously on this
    /// first resume, `None` if it suspended and now runs under scheduler
    /// control. An error raised on this first resume propagates to the
    /// caller directly.
    pub fn start(
        &self,
        task: &Rc<Task>,
        args: Vec<Value>,
    ) -> Result<Option<Vec<Value>>, SchedError> {
        if task.status() != Status::Created || !task.has_body() {
            return Err(SchedError::InvalidEntry);
        }
        if args.len() > self.config.max_transfer {
            return Err(SchedError::StackOverflow {
                count: args.len(),
                limit: self.config.max_transfer,
            });
        }
        task.set_status(Status::Running);
        self.notify(task.id(), TaskEventKind::Started);
        self.step(task, args)?;
        if task.status() == Status::Terminated {
            return Ok(Some(task.take_results()));
        }
        Ok(None)
    }

    /// Cancel a task: true if it was live and is now Terminated, false if
    /// it had already terminated (no-op).
    ///
    /// Bookkeeping only — the task's resources are released at the next
    /// reap pass, and code already past its last yield point is not
    /// interrupted.
    pub fn cancel(&self, task: &Rc<Task>) -> bool {
        if task.status() < Status::Terminated {
            self.finish(task, TaskEventKind::Cancelled);
            true
        } else {
            false
        }
    }

    /// Pause a Running or Sleeping task; no-op from any other status.
    pub fn pause(&self, task: &Rc<Task>) {
        if matches!(task.status(), Status::Running | Status::Sleeping) {
            task.set_status(Status::Paused);
        }
    }

    /// Resume a Paused task; no-op from any other status.
    pub fn resume(&self, task: &Rc<Task>) {
        if task.status() == Status::Paused {
            task.set_status(Status::Running);
        }
    }

    /// Remove a task from the registry and release its resources.
    ///
    /// The suspension-point finalizer (if any) runs here, exactly once.
    pub fn close(&self, task: &Rc<Task>) {
        self.remove(task.id());
        self.close_internal(task);
    }

    /// Install the completion callback, run once with the task's final
    /// results when it is reaped.
    pub fn set_after<F>(&self, task: &Rc<Task>, after: F)
    where
        F: FnOnce(&Scheduler, &[Value]) -> Result<(), SchedError> + 'static,
    {
        task.set_after(Box::new(after));
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Park a task for `ms` milliseconds. A Running task becomes Sleeping;
    /// the next tick after the deadline wakes it.
    pub fn sleep(&self, task: &Rc<Task>, ms: u64) {
        task.set_sleep_until(self.clock.now_ms() + ms);
        if task.status() == Status::Running {
            task.set_status(Status::Sleeping);
        }
    }

    /// Arm the forced-termination timer: the task terminates at `now + ms`,
    /// whatever its status then is.
    pub fn set_timeout(&self, task: &Rc<Task>, ms: u64) {
        task.set_timeout_at(self.clock.now_ms() + ms);
    }

    /// Milliseconds until the task's timeout fires; negative once it has
    /// expired, 0 when no timeout is armed.
    pub fn timeout(&self, task: &Rc<Task>) -> i64 {
        let at = task.timeout_at();
        if at == 0 {
            return 0;
        }
        at as i64 - self.clock.now_ms() as i64
    }

    // ========================================================================
    // Scheduler tick
    // ========================================================================

    /// Run one scheduler tick.
    ///
    /// An error raised by any resumed body aborts the tick immediately and
    /// propagates to the caller; tasks already advanced this tick keep
    /// their new state.
    pub fn update(&self) -> Result<(), SchedError> {
        let now = self.clock.now_ms();

        // 1. Reorder: stable sort by descending priority. Priorities can
        //    change between ticks, so this happens every tick.
        self.tasks
            .borrow_mut()
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
        let order: Vec<Rc<Task>> = self.tasks.borrow().clone();

        // 2. Wake sleepers. A yield without a sleep leaves sleep_until at
        //    0, which wakes on the very next tick.
        for task in &order {
            if task.status() == Status::Sleeping && task.sleep_until() <= now {
                task.clear_sleep();
                task.set_status(Status::Running);
            }
        }

        // 3. Timeout sweep: fires regardless of status, so a Paused or
        //    Sleeping task still expires.
        for task in &order {
            let at = task.timeout_at();
            if at > 0 && now >= at && task.status() != Status::Terminated {
                self.finish(task, TaskEventKind::TimedOut);
            }
        }

        // 4. Resume pass, in priority order. The executing check must come
        //    before the inbox drain: a re-entrant tick must not consume the
        //    pending values of the task that is driving it.
        for task in &order {
            if task.status() == Status::Running && !self.is_executing(task.id()) {
                let args = task.drain_inbox();
                self.step(task, args)?;
            }
        }

        // 5. Reap terminated tasks nobody is waiting on.
        let reapable: Vec<Rc<Task>> = self
            .tasks
            .borrow()
            .iter()
            .filter(|t| t.status() == Status::Terminated && !t.is_waited())
            .cloned()
            .collect();
        for task in reapable {
            self.remove(task.id());
            self.notify(task.id(), TaskEventKind::Reaped);
            if let Some(after) = task.take_after() {
                if task.error().is_none() {
                    let results = task.results_snapshot();
                    after(self, &results)?;
                }
            }
            // A timed-out task stays open so the embedder can still read
            // `expired` through its handle; it is finalized when the last
            // handle drops.
            if task.timeout_at() == 0 {
                self.close_internal(&task);
            }
        }

        // 6. Cooperative idle: nap every idle_threshold-th tick so a
        //    registry of blocked tasks does not spin the CPU.
        if self.config.idle_threshold > 0 {
            let ticks = self.idle_ticks.get() + 1;
            if ticks >= self.config.idle_threshold {
                std::thread::sleep(self.config.idle_sleep);
                self.idle_ticks.set(0);
            } else {
                self.idle_ticks.set(ticks);
            }
        }

        Ok(())
    }

    // ========================================================================
    // Wait primitives
    // ========================================================================

    /// Drive ticks until `task` terminates, then transfer its results to
    /// the caller and close it.
    ///
    /// While the wait is in flight the task cannot be reaped out from under
    /// the caller. Errors raised by any tick propagate; a task that already
    /// terminated with an error yields that stored error.
    pub fn wait_for(&self, task: &Rc<Task>) -> Result<Vec<Value>, SchedError> {
        task.set_waited(true);
        let driven = self.with_caller_waiting(|sched| {
            while task.status() != Status::Terminated {
                sched.update()?;
            }
            Ok(())
        });
        task.set_waited(false);
        driven?;

        if let Some(err) = task.error() {
            return Err(err);
        }
        let values = task.take_results();
        self.remove(task.id());
        self.close_internal(task);
        Ok(values)
    }

    /// Drive ticks until the registry is quiescent: no task remains except,
    /// when called from inside a task, the caller's own.
    pub fn wait_all(&self) -> Result<(), SchedError> {
        let keep = usize::from(self.current_id().is_some());
        self.with_caller_waiting(|sched| {
            while sched.task_count() > keep {
                sched.update()?;
            }
            Ok(())
        })
    }

    /// Wait for each task in order, collecting its results positionally.
    ///
    /// Waits are sequential, not concurrent: task *i + 1* is not inspected
    /// until task *i* has terminated.
    pub fn wait_all_of(&self, tasks: &[Rc<Task>]) -> Result<Vec<Vec<Value>>, SchedError> {
        let mut all = Vec::with_capacity(tasks.len());
        for task in tasks {
            all.push(self.wait_for(task)?);
        }
        Ok(all)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The task whose body is executing right now (innermost, under nested
    /// resumes), if any.
    pub fn current(&self) -> Option<Rc<Task>> {
        self.current_id().and_then(|id| self.get_task(id))
    }

    /// Look up a live task by id.
    pub fn get_task(&self, id: TaskId) -> Option<Rc<Task>> {
        self.index.borrow().get(&id).cloned()
    }

    /// Number of tasks in the registry.
    pub fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Values yielded by tasks that have no living creator.
    pub fn take_yielded(&self) -> Vec<Value> {
        self.root_inbox.borrow_mut().take()
    }

    /// Attach a transition observer.
    pub fn add_observer(&self, observer: Rc<dyn Observer>) {
        self.observers.borrow_mut().push(observer);
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let active_tasks = self
            .tasks
            .borrow()
            .iter()
            .filter(|task| task.status() != Status::Terminated)
            .count();
        SchedulerStats {
            tasks_spawned: self.spawned.get(),
            tasks_completed: self.completed.get(),
            active_tasks,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn register(&self, task: Task) -> Rc<Task> {
        let task = Rc::new(task);
        self.index.borrow_mut().insert(task.id(), task.clone());
        self.tasks.borrow_mut().push(task.clone());
        self.spawned.set(self.spawned.get() + 1);
        self.notify(task.id(), TaskEventKind::Created);
        task
    }

    fn current_id(&self) -> Option<TaskId> {
        self.executing.borrow().last().copied()
    }

    fn is_executing(&self, id: TaskId) -> bool {
        self.executing.borrow().contains(&id)
    }

    fn remove(&self, id: TaskId) {
        self.tasks.borrow_mut().retain(|t| t.id() != id);
        self.index.borrow_mut().remove(&id);
    }

    fn close_internal(&self, task: &Rc<Task>) {
        if task.is_closed() {
            return;
        }
        task.set_closed();
        task.context.borrow_mut().take();
        if let Some(mut point) = task.point.borrow_mut().take() {
            point.close();
        }
        task.take_after();
    }

    /// One resume of a task's body: probe its suspension point if it has
    /// one, otherwise re-enter its execution context with `args`.
    ///
    /// No registry borrow is held while the body runs; the body slot is
    /// checked out for the duration, so a nested tick skips this task.
    fn step(&self, task: &Rc<Task>, args: Vec<Value>) -> Result<(), SchedError> {
        let id = task.id();
        if self.is_executing(id) {
            return Ok(());
        }

        let point = task.point.borrow_mut().take();
        if let Some(mut point) = point {
            self.notify(id, TaskEventKind::Resumed);
            self.executing.borrow_mut().push(id);
            let outcome = point.poll();
            self.executing.borrow_mut().pop();
            if task.is_closed() {
                point.close();
            } else {
                *task.point.borrow_mut() = Some(point);
            }
            return match outcome {
                Probe::Ready(values) => {
                    if let Err(err) = task.stage_results(values) {
                        task.set_error(err.clone());
                        self.finish(task, TaskEventKind::Failed);
                        return Err(err);
                    }
                    self.finish(task, TaskEventKind::Completed);
                    Ok(())
                }
                Probe::Pending => {
                    if task.status() == Status::Running {
                        task.set_status(Status::Sleeping);
                    }
                    self.notify(id, TaskEventKind::Yielded);
                    Ok(())
                }
                Probe::Failed(message) => {
                    let err = SchedError::SuspensionPoint(message);
                    task.set_error(err.clone());
                    self.finish(task, TaskEventKind::Failed);
                    Err(err)
                }
            };
        }

        let context = task.context.borrow_mut().take();
        if let Some(mut context) = context {
            self.notify(id, TaskEventKind::Resumed);
            self.executing.borrow_mut().push(id);
            let outcome = context.resume(self, args);
            self.executing.borrow_mut().pop();
            if !task.is_closed() {
                *task.context.borrow_mut() = Some(context);
            }
            return match outcome {
                Ok(Resume::Yielded(values)) => {
                    if let Err(err) = self.deliver_yield(task, values) {
                        task.set_error(err.clone());
                        self.finish(task, TaskEventKind::Failed);
                        return Err(err);
                    }
                    if task.status() == Status::Running {
                        task.set_status(Status::Sleeping);
                    }
                    self.notify(id, TaskEventKind::Yielded);
                    Ok(())
                }
                Ok(Resume::Completed(values)) => {
                    if let Err(err) = task.stage_results(values) {
                        task.set_error(err.clone());
                        self.finish(task, TaskEventKind::Failed);
                        return Err(err);
                    }
                    self.finish(task, TaskEventKind::Completed);
                    Ok(())
                }
                Err(err) => {
                    task.set_error(err.clone());
                    self.finish(task, TaskEventKind::Failed);
                    Err(err)
                }
            };
        }

        // No body left: the task was closed out from under the snapshot.
        Ok(())
    }

    /// Deliver yielded values to whichever context is logically waiting on
    /// this task: its creator if still alive, otherwise the root inbox.
    fn deliver_yield(&self, task: &Rc<Task>, values: Vec<Value>) -> Result<(), SchedError> {
        if values.is_empty() {
            return Ok(());
        }
        if let Some(parent) = task.parent().and_then(|id| self.get_task(id)) {
            if parent.status() != Status::Terminated {
                return parent.push_inbox(values);
            }
        }
        self.root_inbox.borrow_mut().push_all(values)
    }

    fn finish(&self, task: &Rc<Task>, kind: TaskEventKind) {
        task.set_status(Status::Terminated);
        self.completed.set(self.completed.get() + 1);
        self.notify(task.id(), kind);
    }

    /// Mark the caller's own task Waiting while `drive` loops over ticks,
    /// restoring Running afterwards unless something terminated it.
    fn with_caller_waiting<T>(
        &self,
        drive: impl FnOnce(&Self) -> Result<T, SchedError>,
    ) -> Result<T, SchedError> {
        let caller = self.current();
        if let Some(c) = &caller {
            if c.status() == Status::Running {
                c.set_status(Status::Waiting);
            }
        }
        let result = drive(self);
        if let Some(c) = &caller {
            if c.status() == Status::Waiting {
                c.set_status(Status::Running);
            }
        }
        result
    }

    fn notify(&self, task: TaskId, kind: TaskEventKind) {
        tracing::trace!(task = task.as_u64(), event = ?kind, "task transition");
        if self.observers.borrow().is_empty() {
            return;
        }
        let observers: Vec<Rc<dyn Observer>> = self.observers.borrow().clone();
        let event = TaskEvent { task, kind };
        for observer in &observers {
            observer.on_event(&event);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
