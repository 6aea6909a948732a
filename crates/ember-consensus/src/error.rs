//! Error types for header and transaction consensus rules.

use thiserror::Error;

/// Consensus validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The input is not a well-formed header encoding.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A fixed-width field has the wrong byte length.
    #[error("invalid width for field '{field}': expected {expected} bytes, got {got}")]
    InvalidFieldWidth {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// Genesis construction requested outside the chainstart hardfork.
    #[error("genesis header requires the chainstart hardfork, got {0}")]
    InvalidGenesisOption(String),

    /// Parent header not found in the store.
    #[error("parent header not found: {0}")]
    MissingParent(String),

    /// Block number is not parent number + 1.
    #[error("invalid number: got {got}, expected {expected}")]
    InvalidNumber { got: String, expected: String },

    /// Timestamp is not strictly greater than the parent's.
    #[error("invalid timestamp: block {block_time}, parent {parent_time}")]
    InvalidTimestamp {
        block_time: String,
        parent_time: String,
    },

    /// Clique block period not respected.
    #[error("invalid clique period: parent {parent_time} + {period}s > block {block_time}")]
    InvalidCliquePeriod {
        parent_time: String,
        period: u64,
        block_time: String,
    },

    /// Extra-data exceeds the chain's size cap.
    #[error("invalid extra-data: {0}")]
    InvalidExtraData(String),

    /// Clique extra-data layout violation.
    #[error("invalid clique extra-data: {0}")]
    InvalidCliqueExtraData(String),

    /// Clique checkpoint blocks must carry a zero coinbase.
    #[error("invalid clique coinbase: epoch transition requires the zero address")]
    InvalidCliqueCoinbase,

    /// Clique checkpoint blocks must carry a zero mix hash.
    #[error("invalid clique mix hash: epoch transition requires 32 zero bytes")]
    InvalidCliqueMixHash,

    /// Declared difficulty does not match the canonical value.
    #[error("invalid difficulty: got {got}, expected {expected}")]
    InvalidDifficulty { got: String, expected: String },

    /// Gas limit outside the parent-relative bounds or below the minimum.
    #[error("invalid gas limit: {0}")]
    InvalidGasLimit(String),

    /// Uncle height outside the permitted distance from the parent.
    #[error("invalid uncle distance: {0}")]
    InvalidUncleDistance(String),

    /// DAO-fork transition blocks must carry the fork marker.
    #[error("invalid DAO extra-data at block {number}")]
    InvalidDAOExtraData { number: String },

    /// Operation requires the clique consensus algorithm.
    #[error("operation requires clique consensus")]
    NotClique,

    /// Operation requires an epoch-transition header.
    #[error("header is not an epoch transition")]
    NotEpochTransition,

    /// Difficulty is only defined for proof-of-work chains.
    #[error("unsupported consensus for difficulty: {0}")]
    UnsupportedConsensus(String),

    /// Typed transaction envelopes require EIP-2718 activation.
    #[error("typed transaction envelopes are not activated (EIP-2718)")]
    Eip2718Disabled,

    /// Unknown typed-transaction discriminator.
    #[error("unknown transaction type: 0x{0:02x}")]
    UnknownTxType(u8),

    /// Explicitly unsupported lookup (ambiguous in the protocol).
    #[error("unsupported request: {0}")]
    UnsupportedRequest(String),

    /// RLP decoding failure with context.
    #[error("rlp decode error: {0}")]
    Rlp(String),

    /// Signature recovery failure.
    #[error("signature recovery failed: {0}")]
    SignatureRecovery(String),

    /// Chain specification error.
    #[error("chain spec error: {0}")]
    Chain(#[from] ember_chain::ChainError),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
