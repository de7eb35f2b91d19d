/*!
 * IPC Module
 * Line-based TCP control protocol for remote start/stop/restart/status
 */

pub mod protocol;
pub mod server;

pub use protocol::Command;
pub use server::IpcServer;
