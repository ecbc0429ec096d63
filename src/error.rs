//! Error kinds surfaced by the core (spec §7).

use thiserror::Error;

/// Errors raised by target discovery, analysis, probe loading, and the manager.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No pid provided and none resolvable from env; fatal at startup.
    #[error("no target process: {0}")]
    NoTarget(String),

    /// A wanted function is absent from the target's symbol table.
    #[error("missing symbol: {0}")]
    MissingSymbol(String),

    /// The detected language/library version is outside the supported range.
    #[error("unsupported language version: {0}")]
    UnsupportedLanguageVersion(String),

    /// A required struct field offset is not present in the offsets database.
    #[error("missing offset for {module}::{struct_name}.{field} at version {version}")]
    MissingOffset {
        module: String,
        struct_name: String,
        field: String,
        version: String,
    },

    /// Could not reserve scratch memory in the target process.
    #[error("allocation failed: {0}")]
    AllocateFailed(String),

    /// In-kernel load or verifier rejection.
    #[error("load failed: {0}")]
    LoadFailed(String),

    /// An individual uprobe attach failed.
    #[error("attach failed: {0}")]
    AttachFailed(String),

    /// Zero probes remained usable after filtering.
    #[error("no instrumentations available after filtering")]
    UnavailableInstrumentations,

    /// An event ring was closed; this is a normal termination signal.
    #[error("ring closed")]
    Closed,

    /// The run context was cancelled; this is a normal termination signal.
    #[error("interrupted")]
    Interrupted,

    /// A state-machine transition was attempted from an invalid state.
    #[error("invalid manager state transition: {0}")]
    InvalidState(String),
}

impl AgentError {
    /// Kinds that should abort startup outright (spec §7 "Fatal").
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::NoTarget(_)
                | AgentError::UnsupportedLanguageVersion(_)
                | AgentError::AllocateFailed(_)
                | AgentError::UnavailableInstrumentations
        )
    }
}
