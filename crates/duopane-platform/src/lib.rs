//! External tool discovery and cancellable process execution.
//!
//! - `command.rs` - Process builder with buffered and line-streamed runs
//! - `tool.rs` - `PATH` lookup for required tools

pub use command::{Command, LineError, Output};
pub use error::{Error, Result};
pub use tool::{all_available, is_available, locate};

pub mod command;
mod error;
pub mod tool;
