//! Header validation against a parent and the chain rules.

use crate::clique::CliqueRules;
use crate::difficulty::DifficultyEngine;
use crate::header::{BlockHeader, Hash256, CLIQUE_EXTRA_SEAL, CLIQUE_EXTRA_VANITY};
use crate::{ConsensusError, ConsensusResult};
use ember_chain::{ChainSpec, ConsensusAlgorithm, ConsensusType, GAS_CONFIG, VM};
use num_bigint::{BigInt, BigUint};
use num_traits::ToPrimitive;
use std::sync::Arc;
use tracing::debug;

/// Header lookup contract of the blockchain store.
pub trait HeaderReader {
    /// Header by its canonical hash.
    fn header_by_hash(&self, hash: &Hash256) -> Option<BlockHeader>;
}

/// Validates headers under the chain's consensus rules.
#[derive(Debug, Clone)]
pub struct HeaderValidator {
    chain: Arc<ChainSpec>,
    difficulty: DifficultyEngine,
    clique: CliqueRules,
}

impl HeaderValidator {
    pub fn new(chain: Arc<ChainSpec>) -> Self {
        Self {
            difficulty: DifficultyEngine::new(Arc::clone(&chain)),
            clique: CliqueRules::new(Arc::clone(&chain)),
            chain,
        }
    }

    /// Validate a header against its parent from `store`.
    ///
    /// `uncle_height` is the height of the block that would include this
    /// header as an uncle; supplying it enables the distance check.
    pub fn validate(
        &self,
        header: &BlockHeader,
        store: &dyn HeaderReader,
        uncle_height: Option<&BigUint>,
    ) -> ConsensusResult<()> {
        if header.is_genesis() {
            return Ok(());
        }

        self.check_extra_data(header)?;

        let parent = store
            .header_by_hash(header.parent_hash())
            .ok_or_else(|| ConsensusError::MissingParent(hex::encode(header.parent_hash())))?;

        let expected_number = parent.number() + 1u32;
        if header.number() != &expected_number {
            return Err(ConsensusError::InvalidNumber {
                got: header.number().to_string(),
                expected: expected_number.to_string(),
            });
        }

        if header.timestamp() <= parent.timestamp() {
            return Err(ConsensusError::InvalidTimestamp {
                block_time: header.timestamp().to_string(),
                parent_time: parent.timestamp().to_string(),
            });
        }

        if self.chain.consensus_algorithm() == ConsensusAlgorithm::Clique {
            let period = self.chain.consensus_config()?.period;
            if &(parent.timestamp() + period) > header.timestamp() {
                return Err(ConsensusError::InvalidCliquePeriod {
                    parent_time: parent.timestamp().to_string(),
                    period,
                    block_time: header.timestamp().to_string(),
                });
            }
        }

        if self.chain.consensus_type() == ConsensusType::Pow {
            let canonical = self.difficulty.canonical_difficulty(header, &parent)?;
            if &canonical != header.difficulty() {
                return Err(ConsensusError::InvalidDifficulty {
                    got: header.difficulty().to_string(),
                    expected: canonical.to_string(),
                });
            }
        }

        self.check_gas_limit(header, &parent)?;

        if let Some(uncle_height) = uncle_height {
            let distance = BigInt::from(uncle_height.clone()) - BigInt::from(parent.number().clone());
            if distance <= BigInt::from(1) || distance >= BigInt::from(8) {
                return Err(ConsensusError::InvalidUncleDistance(format!(
                    "uncle at height {uncle_height} is {distance} blocks from parent {}",
                    parent.number()
                )));
            }
        }

        debug!(number = %header.number(), id = %header.short_id(), "header valid");
        Ok(())
    }

    /// Extra-data bounds: a plain size cap for non-clique chains, the
    /// vanity/signers/seal layout for clique.
    fn check_extra_data(&self, header: &BlockHeader) -> ConsensusResult<()> {
        if self.chain.consensus_algorithm() != ConsensusAlgorithm::Clique {
            let max = self
                .chain
                .param_by_hardfork(VM, "maxExtraDataSize", header.hardfork())?
                .to_usize()
                .unwrap_or(usize::MAX);
            if header.extra_data().len() > max {
                return Err(ConsensusError::InvalidExtraData(format!(
                    "extra-data is {} bytes, maximum {max}",
                    header.extra_data().len()
                )));
            }
            return Ok(());
        }

        let min_len = CLIQUE_EXTRA_VANITY + CLIQUE_EXTRA_SEAL;
        let len = header.extra_data().len();
        if !self.clique.is_epoch_transition(header)? {
            if len != min_len {
                return Err(ConsensusError::InvalidCliqueExtraData(format!(
                    "expected {min_len} bytes outside epoch transitions, got {len}"
                )));
            }
            return Ok(());
        }

        if len < min_len || (len - min_len) % 20 != 0 {
            return Err(ConsensusError::InvalidCliqueExtraData(format!(
                "epoch transition signer list malformed at {len} bytes"
            )));
        }
        if header.coinbase() != &[0u8; 20] {
            return Err(ConsensusError::InvalidCliqueCoinbase);
        }
        if header.mix_hash() != &[0u8; 32] {
            return Err(ConsensusError::InvalidCliqueMixHash);
        }
        Ok(())
    }

    /// Gas limit must stay strictly inside the parent-relative window and
    /// at or above the chain minimum.
    fn check_gas_limit(&self, header: &BlockHeader, parent: &BlockHeader) -> ConsensusResult<()> {
        let hardfork = header.hardfork();
        let divisor = self
            .chain
            .param_by_hardfork(GAS_CONFIG, "gasLimitBoundDivisor", hardfork)?;
        let min_gas_limit = self
            .chain
            .param_by_hardfork(GAS_CONFIG, "minGasLimit", hardfork)?;

        let a = parent.gas_limit() / divisor;
        let upper = parent.gas_limit() + &a;
        let lower = parent.gas_limit() - &a;
        let gas_limit = header.gas_limit();

        if gas_limit >= &upper {
            return Err(ConsensusError::InvalidGasLimit(format!(
                "{gas_limit} is not below the upper bound {upper}"
            )));
        }
        if gas_limit <= &lower {
            return Err(ConsensusError::InvalidGasLimit(format!(
                "{gas_limit} is not above the lower bound {lower}"
            )));
        }
        if gas_limit < &min_gas_limit {
            return Err(ConsensusError::InvalidGasLimit(format!(
                "{gas_limit} is below the chain minimum {min_gas_limit}"
            )));
        }
        Ok(())
    }
}
