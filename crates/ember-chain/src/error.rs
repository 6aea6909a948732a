//! Error types for chain specification lookups.

use thiserror::Error;

/// Chain specification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Unknown parameter name within a section.
    #[error("unknown parameter '{name}' in section '{section}'")]
    UnknownParam { section: &'static str, name: String },

    /// Unknown hardfork name.
    #[error("unknown hardfork: {0}")]
    UnknownHardfork(String),

    /// Unknown network name.
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    /// The hardfork is not part of this chain's schedule.
    #[error("hardfork {0} is not scheduled on this chain")]
    HardforkNotScheduled(&'static str),

    /// Operation requires a clique chain.
    #[error("chain does not run the clique consensus algorithm")]
    NotClique,
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
