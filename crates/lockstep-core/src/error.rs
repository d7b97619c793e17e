//! Errors of the execution core.

use lockstep_agents::AgentError;
use lockstep_catalog::CatalogError;
use lockstep_fabric::FabricError;
use lockstep_types::{GlobalId, LocalId, ValueError};

use crate::export::ExportError;
use crate::router::RouterError;

/// Errors raised by masters, the control plane and initialization.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// A catalog lookup failed.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// A fabric operation failed.
    #[error("fabric error: {source}")]
    Fabric {
        /// The underlying fabric error.
        #[from]
        source: FabricError,
    },

    /// An agent-state operation failed.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: AgentError,
    },

    /// A value conversion failed.
    #[error("value error: {source}")]
    Value {
        /// The underlying value error.
        #[from]
        source: ValueError,
    },

    /// The interaction exchange failed.
    #[error("router error: {source}")]
    Router {
        /// The underlying router error.
        #[from]
        source: RouterError,
    },

    /// Snapshot or instantiation handling failed.
    #[error("export error: {source}")]
    Export {
        /// The underlying export error.
        #[from]
        source: ExportError,
    },

    /// A global id has no entry in the window layout or directory.
    #[error("agent {global} is unknown to this cluster")]
    UnknownAgent {
        /// The unknown global id.
        global: GlobalId,
    },

    /// An operation named an agent that does not exist.
    #[error("agent {local_id} of type `{type_name}` does not exist")]
    AgentNotFound {
        /// Local id of the missing agent.
        local_id: LocalId,
        /// Name of its claimed type.
        type_name: String,
    },

    /// A private attribute is not sendable and cannot be modified
    /// remotely.
    #[error("attribute `{attr_name}` of type `{type_name}` cannot be modified: it is not sendable")]
    AttributeNotSendable {
        /// The agent type.
        type_name: String,
        /// The attribute.
        attr_name: String,
    },

    /// The peer group must contain at least one master.
    #[error("cannot launch a cluster with zero masters")]
    EmptyGroup,

    /// A coordinator-only argument was missing on the coordinator.
    #[error("coordinator argument missing: {detail}")]
    CoordinatorArgument {
        /// Which argument was missing.
        detail: &'static str,
    },

    /// A handler worker thread panicked during a phase.
    #[error("a handler worker thread panicked")]
    WorkerPanicked,

    /// A follower thread could not be spawned.
    #[error("failed to spawn master thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
