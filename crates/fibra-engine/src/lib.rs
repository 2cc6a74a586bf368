//! Fibra Engine — cooperative task scheduler for an embedding interpreter
//!
//! This crate provides the runtime that lets many logical tasks, each backed
//! by a suspendable execution context, interleave over blocking system
//! operations on a single thread:
//! - Task entity and lifecycle (create, start, cancel, pause, close)
//! - Priority-ordered round-robin scheduler tick
//! - Sleep, timeout, and cross-task wait primitives
//! - Resume/suspend bridge between native code and interpreted contexts
//! - Suspension-point adapter for device modules (serial, power, network)
//!
//! The scheduler is strictly single-threaded: tasks never run in parallel,
//! and "concurrency" is interleaving at explicit suspension boundaries. The
//! whole API is therefore `!Send` by construction.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod sched;

pub use context::{from_fn, Context, Resume, StepFn};
pub use sched::{
    LogObserver, Observer, Scheduler, SchedulerConfig, SchedulerStats, Status, Task, TaskEvent,
    TaskEventKind, TaskId,
};

// Re-export SDK types (canonical definitions live in fibra-sdk)
pub use fibra_sdk::{Probe, SdkError, SdkResult, SuspensionPoint, Value};

/// Scheduler errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedError {
    /// Task has no runnable entry (never given a body, already started,
    /// terminated, or closed)
    #[error("Task entry is not callable")]
    InvalidEntry,

    /// Error raised inside a task's execution context, carrying the
    /// original error value
    #[error("Task error: {0}")]
    Context(Value),

    /// Insufficient space to transfer values into a context
    #[error("Stack overflow: {count} values exceeds transfer limit {limit}")]
    StackOverflow {
        /// Number of values in the rejected transfer
        count: usize,
        /// Configured transfer limit
        limit: usize,
    },

    /// A suspension point's probe reported failure
    #[error("Suspension point failed: {0}")]
    SuspensionPoint(String),
}
