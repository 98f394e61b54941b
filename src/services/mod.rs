//! Services
//!
//! Business logic: the job registry, the analysis pipeline and the
//! service facade that ties them to configuration.

pub mod analysis;
pub mod pipeline;
pub mod registry;

pub use analysis::AnalysisService;
pub use registry::{JobProgressSink, JobRegistry};
