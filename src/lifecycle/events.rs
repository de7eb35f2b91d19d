/*!
 * Lifecycle Events
 * Notifications fanned out to subscribers of the manager's event queue
 */

use super::signals::ShutdownSignal;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent<T> {
    /// An event callback ran
    Triggered {
        stage: String,
        event: String,
        data: Option<T>,
    },
    Transitioned {
        from: Option<String>,
        to: String,
    },
    ProcessStarted {
        name: String,
    },
    ProcessStopped {
        name: String,
    },
    Signal(ShutdownSignal),
}

impl<T> LifecycleEvent<T> {
    /// Short name, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Triggered { .. } => "triggered",
            LifecycleEvent::Transitioned { .. } => "transitioned",
            LifecycleEvent::ProcessStarted { .. } => "process_started",
            LifecycleEvent::ProcessStopped { .. } => "process_stopped",
            LifecycleEvent::Signal(_) => "signal",
        }
    }
}
