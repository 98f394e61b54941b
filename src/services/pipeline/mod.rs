//! Analysis Pipeline
//!
//! - `plan` - resolved stage plans
//! - `selector` - builds a plan from a job's mode, files and request
//! - `orchestrator` - runs a plan in the background and records the outcome
//! - `render` - the tree rendering boundary

pub mod orchestrator;
pub mod plan;
pub mod render;
pub mod selector;

pub use orchestrator::PipelineOrchestrator;
pub use plan::{StagePlan, TreeOutput, TreeSource};
pub use render::{NoopRenderer, RenderRequest, ScriptRenderer, TreeRenderer};
pub use selector::WorkflowSelector;
