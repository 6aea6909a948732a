//! Test data generators for integration tests.
//!
//! Builders for headers, linked chains and in-memory header stores shared
//! by the validation and network test modules.

use ember_chain::ChainSpec;
use ember_consensus::{
    BlockHeader, DifficultyEngine, Hash256, HeaderFields, HeaderOptions, HeaderReader,
};
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory header store keyed by hash.
#[derive(Default)]
pub struct MemoryStore {
    headers: HashMap<Hash256, BlockHeader>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: &BlockHeader) {
        self.headers.insert(header.hash(), header.clone());
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl HeaderReader for MemoryStore {
    fn header_by_hash(&self, hash: &Hash256) -> Option<BlockHeader> {
        self.headers.get(hash).cloned()
    }
}

/// A mainnet chain spec shared by tests.
pub fn mainnet() -> Arc<ChainSpec> {
    Arc::new(ChainSpec::mainnet())
}

/// A clique chain spec shared by tests.
pub fn poanet() -> Arc<ChainSpec> {
    Arc::new(ChainSpec::poanet())
}

/// Build a header from sparse fields.
pub fn header(chain: &Arc<ChainSpec>, fields: HeaderFields) -> BlockHeader {
    BlockHeader::from_fields(fields, HeaderOptions::for_chain(Arc::clone(chain)))
        .expect("test header must build")
}

/// Build a proof-of-work parent at the given height.
pub fn pow_parent(chain: &Arc<ChainSpec>, number: u64) -> BlockHeader {
    header(
        chain,
        HeaderFields {
            number: Some(BigUint::from(number)),
            timestamp: Some(BigUint::from(1_000_000u64)),
            difficulty: Some(BigUint::from(1_000_000_000_000u64)),
            gas_limit: Some(BigUint::from(8_000_000u64)),
            ..Default::default()
        },
    )
}

/// Build the canonical child of a proof-of-work parent, `seconds` later.
pub fn pow_child(chain: &Arc<ChainSpec>, parent: &BlockHeader, seconds: u64) -> BlockHeader {
    let engine = DifficultyEngine::new(Arc::clone(chain));
    let number = parent.number() + 1u32;
    let timestamp = parent.timestamp() + seconds;

    let draft = header(
        chain,
        HeaderFields {
            parent_hash: Some(parent.hash()),
            number: Some(number.clone()),
            timestamp: Some(timestamp.clone()),
            gas_limit: Some(parent.gas_limit().clone()),
            ..Default::default()
        },
    );
    let difficulty = engine
        .canonical_difficulty(&draft, parent)
        .expect("difficulty for test child");

    header(
        chain,
        HeaderFields {
            parent_hash: Some(parent.hash()),
            number: Some(number),
            timestamp: Some(timestamp),
            gas_limit: Some(parent.gas_limit().clone()),
            difficulty: Some(difficulty),
            ..Default::default()
        },
    )
}

/// Clique extra-data: vanity, optional signers, zero seal.
pub fn clique_extra(signers: &[[u8; 20]]) -> Vec<u8> {
    let mut extra = vec![0u8; 32];
    for signer in signers {
        extra.extend_from_slice(signer);
    }
    extra.extend_from_slice(&[0u8; 65]);
    extra
}
