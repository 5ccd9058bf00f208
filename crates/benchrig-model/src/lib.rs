//! Shared data model for the benchrig serial-port test orchestration core.
//!
//! Leaf crate: no I/O, no async. Holds the types that flow between the
//! pool, config, protocol, and workflow crates, plus the boundary error
//! enum.

mod definition;
mod descriptor;
mod error;
mod ident;
mod result;

pub use definition::{
    parse_regex_options, BibDefinition, CommandDefinition, CommandSequence, PortDefinition,
    RegexOptions, ResponseMatcher, UutDefinition,
};
pub use descriptor::{ChipFamily, DeviceGroup, HardwareMetadata, PortDescriptor};
pub use error::Error;
pub use ident::is_valid_bib_id;
pub use result::{
    CommandResult, FailureKind, PhaseOutcome, SessionState, WorkflowPhase, WorkflowSummary,
};
