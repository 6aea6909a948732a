//! # ember-consensus
//!
//! Block-header consensus rules for the Ember node.
//!
//! This crate provides:
//! - The canonical 15-field header codec (RLP, field-dict and JSON forms)
//! - Header validation against a parent across hardfork epochs
//! - Proof-of-work difficulty with hardfork bomb delays
//! - Clique proof-of-authority extra-data and seal rules
//! - A thin typed-transaction decode factory

mod clique;
mod difficulty;
mod error;
mod header;
pub mod rlp;
mod tx;
mod validation;

pub use clique::{pubkey_to_address, CliqueRules};
pub use difficulty::DifficultyEngine;
pub use error::{ConsensusError, ConsensusResult};
pub use header::{
    keccak256, Address, BlockHeader, Hash256, HeaderFields, HeaderJson, HeaderOptions,
    CLIQUE_EXTRA_SEAL, CLIQUE_EXTRA_VANITY, DAO_EXTRA_DATA, DEFAULT_GAS_LIMIT, KECCAK256_RLP,
    KECCAK256_RLP_ARRAY,
};
pub use tx::{
    AccessListEntry, AccessListTransaction, LegacyTransaction, SignatureParts, Transaction,
    TransactionFactory, TxClass,
};
pub use validation::{HeaderReader, HeaderValidator};
