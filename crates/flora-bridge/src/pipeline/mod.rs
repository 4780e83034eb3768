//! Step catalogue, selection and orchestration

pub mod catalogue;
pub mod orchestrator;
pub mod selection;

pub use catalogue::StepId;
pub use orchestrator::{Orchestrator, RunReport, StepSummary};
pub use selection::StepSelection;
