/*!
 * Channel Module
 * Managed data channels with a control sideband and cached last value
 */

pub mod managed;
pub mod types;

pub use managed::ManagedChannel;
pub use types::{ChannelCommand, ChannelSnapshot};
