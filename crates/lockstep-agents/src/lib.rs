//! Agent state and typed interactions for the lockstep runtime.
//!
//! An [`AgentCell`] owns one agent's attribute record. The record layout
//! is data, not code: sizes and offsets come from the catalog, so one
//! cell type serves every agent type. The cell also keeps the
//! per-interaction-kind received lists and the shadow copy of the
//! critical sub-record used to detect which critical attributes a
//! behavior changed.
//!
//! An [`Interaction`] is a typed message between two agents, carrying a
//! payload encoded by the catalog's field layout for its kind.
//!
//! [`AgentCell`]: agent::AgentCell
//! [`Interaction`]: interaction::Interaction

pub mod agent;
pub mod error;
pub mod interaction;

pub use agent::{AgentCell, AgentRecord};
pub use error::AgentError;
pub use interaction::Interaction;
