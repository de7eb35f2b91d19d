/*!
 * Lifecycle Module
 * The manager tying processes, stages, events and OS signals together
 */

pub mod events;
pub mod manager;
pub mod signals;

pub use events::LifecycleEvent;
pub use manager::{LifecycleManager, LifecycleManagerBuilder};
pub use signals::{forward_os_signals, next_os_signal, ShutdownSignal};
