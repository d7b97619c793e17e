//! Engine-level errors: command parsing, state checks and pass-through
//! failures from the core.

use lockstep_catalog::CatalogError;
use lockstep_core::export::ExportError;
use lockstep_core::MasterError;

use crate::config::ConfigError;

/// Errors surfaced to the command front-end.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The command line could not be parsed; state is unchanged.
    #[error("invalid command: `{input}` (try `help`)")]
    InvalidCommand {
        /// The offending input line.
        input: String,
    },

    /// A command that needs a running simulation arrived before `init`.
    #[error("the simulation is not initialized; run `init` first")]
    NotInitialized,

    /// A command is only valid before `init`.
    #[error("invalid state: {detail}")]
    InvalidState {
        /// Why the command is not applicable now.
        detail: &'static str,
    },

    /// The configured model name is not a built-in.
    #[error("unknown model `{name}`")]
    UnknownModel {
        /// The unresolved model name.
        name: String,
    },

    /// A control-plane or step failure.
    #[error("master error: {source}")]
    Master {
        /// The underlying master error.
        #[from]
        source: MasterError,
    },

    /// A snapshot or instantiation failure.
    #[error("export error: {source}")]
    Export {
        /// The underlying export error.
        #[from]
        source: ExportError,
    },

    /// A catalog construction failure.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// A configuration loading failure.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A file could not be read or written.
    #[error("i/o error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or serialized.
    #[error("json error: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
