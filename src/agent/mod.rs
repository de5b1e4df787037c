//! LLM agents that investigate the budget document.
//!
//! This module provides the role-bound specialists, the date-status agent,
//! the tool loop they share and the tools they call.

pub mod dates;
pub mod runner;
pub mod specialist;
pub mod tools;

pub use dates::{BridgeDates, DateAgent, DateNormalizer};
pub use runner::AgentLimits;
pub use specialist::{Specialist, SpecialistRole};
pub use tools::{BridgeSearch, DocumentSearch};
