//! Errors for agent-state and interaction operations.

use lockstep_catalog::CatalogError;
use lockstep_types::{InteractionKind, TypeId, ValueError};

/// Errors raised by agent cells and interaction codecs.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A catalog lookup failed.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// A value conversion failed.
    #[error("value error: {source}")]
    Value {
        /// The underlying value error.
        #[from]
        source: ValueError,
    },

    /// A wire record's byte length does not match the catalog layout.
    #[error("record of agent type {type_id} has {got} bytes, layout needs {expected}")]
    RecordSize {
        /// The agent type the record claims.
        type_id: TypeId,
        /// Bytes expected by the layout.
        expected: usize,
        /// Bytes present.
        got: usize,
    },

    /// An interaction was built with the wrong number of payload fields.
    #[error("interaction kind {kind} takes {expected} fields, got {got}")]
    PayloadArity {
        /// The interaction kind.
        kind: InteractionKind,
        /// Fields declared in the catalog.
        expected: usize,
        /// Fields supplied.
        got: usize,
    },

    /// An interaction payload's byte length does not match its layout.
    #[error("payload of interaction kind {kind} has {got} bytes, layout needs {expected}")]
    PayloadSize {
        /// The interaction kind.
        kind: InteractionKind,
        /// Bytes expected by the layout.
        expected: usize,
        /// Bytes present.
        got: usize,
    },

    /// A destination buffer does not match the sub-record being copied.
    #[error("sub-record copy needs {expected} bytes, destination has {got}")]
    CopySize {
        /// Bytes expected.
        expected: usize,
        /// Bytes available.
        got: usize,
    },
}
