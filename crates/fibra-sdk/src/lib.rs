//! Fibra SDK - Lightweight SDK for writing Fibra device modules
//!
//! This crate provides the minimal types needed to write device modules
//! (serial ports, power notifications, network pollers) against the Fibra
//! scheduler without depending on the full fibra-engine.
//!
//! A device module interacts with the scheduler through exactly two surfaces:
//!
//! - [`Value`], the dynamically-typed unit of transfer for arguments and
//!   results crossing a suspension boundary;
//! - [`SuspensionPoint`], the non-blocking resumable-probe contract that lets
//!   a task wait on an OS resource without blocking a thread.
//!
//! # Example
//!
//! ```ignore
//! use fibra_sdk::{Probe, SuspensionPoint, Value};
//!
//! struct ReadLine { port: PortHandle, buf: Vec<u8> }
//!
//! impl SuspensionPoint for ReadLine {
//!     fn poll(&mut self) -> Probe {
//!         match self.port.try_read(&mut self.buf) {
//!             ReadState::Complete(line) => Probe::Ready(vec![Value::str(line)]),
//!             ReadState::WouldBlock => Probe::Pending,
//!             ReadState::Error(e) => Probe::Failed(e.to_string()),
//!         }
//!     }
//!
//!     fn close(&mut self) {
//!         self.port.release_event_handle();
//!     }
//! }
//! ```

#![warn(missing_docs)]

mod error;
mod point;
mod value;

pub use error::{SdkError, SdkResult};
pub use point::{Probe, SuspensionPoint};
pub use value::Value;
