/*!
 * Stage Types
 */

use crate::worker::PoolStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Event callback. Receives the optional data passed to the trigger.
pub type EventFn<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

/// Enter/exit hook
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Name of the three base stages
pub const INIT_STAGE: &str = "init";
pub const EXECUTE_STAGE: &str = "execute";
pub const END_STAGE: &str = "end";

/// Kind tag carried by the base stages
pub const BASE_KIND: &str = "base";

/// Serializable snapshot of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StageInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub description: String,
    pub tags: Vec<String>,
    pub possible_next: Vec<String>,
    pub possible_prev: Vec<String>,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}
