/*!
 * Stage Module
 * Nodes of the lifecycle transition graph
 */

#[allow(clippy::module_inception)]
pub mod stage;
pub mod types;

pub use stage::{base_stages, Stage};
pub use types::{EventFn, HookFn, StageInfo, BASE_KIND, END_STAGE, EXECUTE_STAGE, INIT_STAGE};
