/*!
 * Channel Types
 */

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Control messages processed serially by a channel's monitor task
#[derive(Debug)]
pub enum ChannelCommand<T> {
    /// Shut the monitor task down
    Stop,
    /// Reply with the cached last value
    Get(oneshot::Sender<Option<Arc<T>>>),
    /// Replace the cached value
    Set(T),
    /// Drop the cached value
    Clear,
    /// Cache the value and push it onto the data queue
    Save(T),
}

impl<T> ChannelCommand<T> {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelCommand::Stop => "stop",
            ChannelCommand::Get(_) => "get",
            ChannelCommand::Set(_) => "set",
            ChannelCommand::Clear => "clear",
            ChannelCommand::Save(_) => "save",
        }
    }
}

/// Point-in-time view of a channel, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelSnapshot {
    pub id: uuid::Uuid,
    pub name: String,
    pub buffer: usize,
    pub closed: bool,
    pub monitoring: bool,
    pub has_last: bool,
}
