//! Canonical proof-of-work difficulty.
//!
//! The hardfork branches are tested newest-first so each block number lands
//! in exactly one epoch family: byzantium-style (uncle-aware, 9s target),
//! homestead-style (10s target), and the original duration-limit rule.

use crate::header::{BlockHeader, KECCAK256_RLP_ARRAY};
use crate::{ConsensusError, ConsensusResult};
use ember_chain::{ChainSpec, ConsensusType, Hardfork, POW};
use num_bigint::BigInt;
use num_bigint::BigUint;
use num_traits::{Signed, ToPrimitive, Zero};
use std::sync::Arc;

/// Bomb delay subtracted from the block number, by activation fork.
const BOMB_DELAYS: [(Hardfork, u64); 3] = [
    (Hardfork::MuirGlacier, 9_000_000),
    (Hardfork::Constantinople, 5_000_000),
    (Hardfork::Byzantium, 3_000_000),
];

/// Computes canonical difficulty for proof-of-work chains.
#[derive(Debug, Clone)]
pub struct DifficultyEngine {
    chain: Arc<ChainSpec>,
}

impl DifficultyEngine {
    pub fn new(chain: Arc<ChainSpec>) -> Self {
        Self { chain }
    }

    /// Canonical difficulty of `header` given its parent.
    pub fn canonical_difficulty(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> ConsensusResult<BigUint> {
        if self.chain.consensus_type() != ConsensusType::Pow {
            return Err(ConsensusError::UnsupportedConsensus(format!(
                "{:?}",
                self.chain.consensus_algorithm()
            )));
        }

        let hardfork = header.hardfork();
        let bound = BigInt::from(
            parent.difficulty()
                / self
                    .chain
                    .param_by_hardfork(POW, "difficultyBoundDivisor", hardfork)?,
        );
        let min_difficulty = BigInt::from(
            self.chain
                .param_by_hardfork(POW, "minimumDifficulty", hardfork)?,
        );

        let parent_difficulty = BigInt::from(parent.difficulty().clone());
        let time_diff = BigInt::from(header.timestamp().clone())
            - BigInt::from(parent.timestamp().clone());

        let mut difficulty = if hardfork.gte(Hardfork::Byzantium) {
            let uncle_addend: i64 = if parent.uncle_hash() == &KECCAK256_RLP_ARRAY {
                1
            } else {
                2
            };
            let a = (BigInt::from(uncle_addend) - &time_diff / 9i64).max(BigInt::from(-99));
            &parent_difficulty + &bound * a
        } else if hardfork.gte(Hardfork::Homestead) {
            let a = (BigInt::from(1) - &time_diff / 10i64).max(BigInt::from(-99));
            &parent_difficulty + &bound * a
        } else {
            let duration_limit =
                BigInt::from(self.chain.param_by_hardfork(POW, "durationLimit", hardfork)?);
            if BigInt::from(parent.timestamp().clone()) + duration_limit
                > BigInt::from(header.timestamp().clone())
            {
                &parent_difficulty + &bound
            } else {
                &parent_difficulty - &bound
            }
        };

        // Difficulty bomb, delayed per fork.
        let mut num = BigInt::from(header.number().clone());
        for (fork, delay) in BOMB_DELAYS {
            if hardfork.gte(fork) {
                num -= BigInt::from(delay);
                break;
            }
        }
        if num.is_negative() {
            num = BigInt::zero();
        }
        let exp: BigInt = num / 100_000i64 - 2;
        if !exp.is_negative() {
            let exp = exp.to_u32().ok_or_else(|| ConsensusError::InvalidDifficulty {
                got: "bomb exponent out of range".to_string(),
                expected: "an exponent representable as u32".to_string(),
            })?;
            difficulty += BigInt::from(2).pow(exp);
        }

        let (_, magnitude) = difficulty.max(min_difficulty).into_parts();
        Ok(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HeaderFields, HeaderOptions};

    fn mainnet() -> Arc<ChainSpec> {
        Arc::new(ChainSpec::mainnet())
    }

    fn header(
        chain: &Arc<ChainSpec>,
        number: u64,
        timestamp: u64,
        difficulty: u64,
        uncle_hash: Option<[u8; 32]>,
    ) -> BlockHeader {
        BlockHeader::from_fields(
            HeaderFields {
                number: Some(BigUint::from(number)),
                timestamp: Some(BigUint::from(timestamp)),
                difficulty: Some(BigUint::from(difficulty)),
                uncle_hash,
                ..Default::default()
            },
            HeaderOptions::for_chain(Arc::clone(chain)),
        )
        .unwrap()
    }

    #[test]
    fn test_byzantium_no_uncles() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        let parent = header(&chain, 5_000_000, 1_000_000, 1_000_000_000_000, None);
        let child = header(&chain, 5_000_001, 1_000_009, 0, None);

        let difficulty = engine.canonical_difficulty(&child, &parent).unwrap();
        assert_eq!(difficulty, BigUint::from(1_000_000_262_144u64));
    }

    #[test]
    fn test_byzantium_uncle_addend() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        // A parent with uncles raises the addend from 1 to 2.
        let parent = header(
            &chain,
            5_000_000,
            1_000_000,
            1_000_000_000_000,
            Some([0x42u8; 32]),
        );
        let child = header(&chain, 5_000_001, 1_000_009, 0, None);

        let bound = 1_000_000_000_000u64 / 2_048;
        let expected = 1_000_000_000_000u64 + bound + 262_144;
        let difficulty = engine.canonical_difficulty(&child, &parent).unwrap();
        assert_eq!(difficulty, BigUint::from(expected));
    }

    #[test]
    fn test_homestead_adjustment() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        // Homestead era: 1 - (ts_diff / 10), here ts_diff = 5 so a = 1.
        let parent = header(&chain, 2_000_000, 1_000_000, 1_000_000_000_000, None);
        let child = header(&chain, 2_000_001, 1_000_005, 0, None);

        let bound = 1_000_000_000_000u64 / 2_048;
        let exp = 2_000_001u64 / 100_000 - 2; // 18
        let expected = 1_000_000_000_000u64 + bound + (1u64 << exp);
        let difficulty = engine.canonical_difficulty(&child, &parent).unwrap();
        assert_eq!(difficulty, BigUint::from(expected));
    }

    #[test]
    fn test_frontier_duration_limit() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        // Fast block (< durationLimit of 13s): difficulty rises.
        let parent = header(&chain, 500_000, 1_000_000, 1_000_000_000_000, None);
        let fast = header(&chain, 500_001, 1_000_005, 0, None);
        let slow = header(&chain, 500_001, 1_000_020, 0, None);

        let bound = 1_000_000_000_000u64 / 2_048;
        let bomb = 1u64 << (500_001 / 100_000 - 2);
        assert_eq!(
            engine.canonical_difficulty(&fast, &parent).unwrap(),
            BigUint::from(1_000_000_000_000u64 + bound + bomb)
        );
        assert_eq!(
            engine.canonical_difficulty(&slow, &parent).unwrap(),
            BigUint::from(1_000_000_000_000u64 - bound + bomb)
        );
    }

    #[test]
    fn test_muir_glacier_bomb_delay() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        // num = 9_300_001 - 9_000_000 = 300_001, exp = 3 - 2 = 1.
        let parent = header(&chain, 9_300_000, 1_000_000, 1_000_000_000_000, None);
        let child = header(&chain, 9_300_001, 1_000_009, 0, None);

        let difficulty = engine.canonical_difficulty(&child, &parent).unwrap();
        assert_eq!(difficulty, BigUint::from(1_000_000_000_002u64));
    }

    #[test]
    fn test_difficulty_floor() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        // Tiny parent difficulty clamps to the minimum. The bomb term is
        // negligible this close past the Muir Glacier delay (exponent 0).
        let parent = header(&chain, 9_200_004, 1_000_000, 1_000, None);
        let child = header(&chain, 9_200_005, 1_000_009, 0, None);

        let difficulty = engine.canonical_difficulty(&child, &parent).unwrap();
        assert_eq!(difficulty, BigUint::from(131_072u32));
    }

    #[test]
    fn test_deterministic() {
        let chain = mainnet();
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        let parent = header(&chain, 5_000_000, 1_000_000, 1_000_000_000_000, None);
        let child = header(&chain, 5_000_001, 1_000_009, 0, None);

        let first = engine.canonical_difficulty(&child, &parent).unwrap();
        let second = engine.canonical_difficulty(&child, &parent).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_not_pow_is_unsupported() {
        let chain = Arc::new(ChainSpec::poanet());
        let engine = DifficultyEngine::new(Arc::clone(&chain));

        let parent = header(&chain, 1, 1_000_000, 1, None);
        let child = header(&chain, 2, 1_000_015, 1, None);

        assert!(matches!(
            engine.canonical_difficulty(&child, &parent),
            Err(ConsensusError::UnsupportedConsensus(_))
        ));
    }
}
