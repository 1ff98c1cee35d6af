//! # gcodelink core
//!
//! Core types shared by every gcodelink crate: the error taxonomy,
//! measurement/positioning modes, and the observer hooks the driver
//! reports through.

pub mod error;
pub mod event;
pub mod types;
pub mod units;

pub use error::{ConnectionError, DriverError, Error, GcodeError, ProtocolError, Result};

pub use event::{DriverEvent, EventDispatcher, Hook, HookFn, Hooks, Notifier};

pub use types::{thread_safe, ThreadSafe};

pub use units::{from_native_length, to_native_length, MeasurementSystem, Positioning, MM_PER_INCH};
