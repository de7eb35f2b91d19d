/*!
 * Process Module
 * Supervised external commands and in-process functions
 */

pub mod managed;
pub mod types;
mod validation;

pub use managed::ManagedProcess;
pub use types::{CustomFn, ExecutionMode, ProcessConfig, ProcessInfo};
