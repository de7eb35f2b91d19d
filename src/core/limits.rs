/*!
 * System Limits and Constants
 *
 * Centralized location for limits, default sizes and timeouts used by the
 * lifecycle layer.
 */

use std::time::Duration;

// =============================================================================
// WORKER POOL
// =============================================================================

/// Largest slot array a worker pool may be configured with
pub const MAX_WORKER_LIMIT: usize = 50;

/// Default pool size for stages that do not configure one
pub const DEFAULT_WORKER_LIMIT: usize = 1;

// =============================================================================
// CHANNELS
// =============================================================================

/// Default data-queue capacity for a managed channel
pub const DEFAULT_CHANNEL_BUFFER: usize = 100;

/// Minimum capacity used when a caller asks for a zero-sized buffer
/// (tokio bounded channels require at least one slot)
pub const MIN_CHANNEL_BUFFER: usize = 2;

/// Control-queue capacity; commands are small and drained serially
pub const CONTROL_QUEUE_SIZE: usize = 8;

// =============================================================================
// LIFECYCLE MANAGER
// =============================================================================

/// Capacity of the internal event queue fanned out to subscribers
pub const EVENT_QUEUE_SIZE: usize = 256;

/// Capacity of the OS signal queue
pub const SIGNAL_QUEUE_SIZE: usize = 4;

/// Default deadline for cooperative shutdown of workers and processes
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations slower than this are reported at warn level
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_millis(500);

// =============================================================================
// PROCESSES
// =============================================================================

/// Re-runs allowed per `start` for a waiting process flagged for restart
pub const MAX_PROCESS_RESTARTS: u32 = 3;

// =============================================================================
// IPC
// =============================================================================

/// Default TCP port of the line-based control protocol
pub const DEFAULT_IPC_PORT: u16 = 8081;

/// Default bind address of the control protocol
pub const DEFAULT_IPC_BIND_ADDR: &str = "0.0.0.0";

/// Longest accepted control line in bytes
pub const MAX_IPC_LINE: usize = 4096;
