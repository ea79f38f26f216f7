//! Background task registry.
//!
//! A [`TaskManager`] owns every task it starts. Each task gets a cancellation
//! token, a bounded progress queue drained by one listener, and a completion
//! signal. Callers only ever see copies of a task's [`TaskStatus`].
//!
//! - `manager.rs` - Registry, task lifecycle, panic containment
//! - `status.rs` - State machine and status snapshots
//! - `sink.rs` - Producer side of the progress queue

pub use error::{Error, Result};
pub use manager::{TaskContext, TaskFailure, TaskManager};
pub use sink::ProgressSink;
pub use status::{TaskState, TaskStatus};
pub use tokio_util::sync::CancellationToken;

mod error;
mod manager;
mod sink;
mod status;
