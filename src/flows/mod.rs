//! Guided flows: the Diary, SOS and morning routine dialogs.
//!
//! The state tables are static data. The flow engine walks them uniformly;
//! nothing here performs I/O.

pub mod definition;
pub mod prompts;
pub mod state;

pub use definition::{Answers, FlowDefinition, PromptSource, StepSpec, TerminalPlan, definition};
pub use state::{DiaryStep, FlowKind, FlowState, MorningStep, SosStep};
