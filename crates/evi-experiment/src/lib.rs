//! `evi-experiment`
//!
//! Measurement procedures built on the device API:
//!
//! - [`workflow`]: the persisted run state machine (`evifluor run ...`)
//! - [`context`]: the run's state document
//! - [`save`]: saving the device's last readings and recomputing data files
//! - [`export`]: CSV export of data files

pub mod context;
pub mod export;
pub mod save;
pub mod workflow;

pub use context::{RunContext, RunState};
pub use workflow::{RunWorkflow, StepOutcome, StepReport};
