//! Chain specification: schedule, consensus selection and genesis values.

use crate::params::{param_by_hardfork, ParamSection};
use crate::{ChainError, ChainResult, Hardfork};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Consensus family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusType {
    /// Proof-of-work.
    Pow,
    /// Proof-of-authority.
    Poa,
}

/// Concrete consensus algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusAlgorithm {
    Ethash,
    Clique,
}

/// Clique signer-rotation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliqueConfig {
    /// Minimum seconds between consecutive blocks.
    pub period: u64,
    /// Blocks between signer-list checkpoints.
    pub epoch: u64,
}

/// Genesis block parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisParams {
    pub gas_limit: BigUint,
    pub timestamp: BigUint,
    pub difficulty: BigUint,
    pub extra_data: Vec<u8>,
    pub nonce: [u8; 8],
    pub state_root: [u8; 32],
}

/// A well-known endpoint seeded into the discovery table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootnodeEndpoint {
    pub address: String,
    pub udp_port: u16,
    pub tcp_port: u16,
}

/// Network-specific chain specification.
///
/// Resolves hardfork activations by block number and supplies the named
/// protocol constants consumed by header validation and difficulty
/// calculation.
#[derive(Debug, Clone)]
pub struct ChainSpec {
    name: String,
    network_id: u64,
    consensus_type: ConsensusType,
    consensus_algorithm: ConsensusAlgorithm,
    clique: Option<CliqueConfig>,
    /// Schedule in activation order; `None` means never scheduled.
    schedule: Vec<(Hardfork, Option<u64>)>,
    genesis: GenesisParams,
    bootnodes: Vec<BootnodeEndpoint>,
}

impl ChainSpec {
    /// Mainnet: ethash proof-of-work with the canonical fork blocks.
    pub fn mainnet() -> Self {
        Self {
            name: "mainnet".to_string(),
            network_id: 1,
            consensus_type: ConsensusType::Pow,
            consensus_algorithm: ConsensusAlgorithm::Ethash,
            clique: None,
            schedule: vec![
                (Hardfork::Chainstart, Some(0)),
                (Hardfork::Homestead, Some(1_150_000)),
                (Hardfork::Dao, Some(1_920_000)),
                (Hardfork::TangerineWhistle, Some(2_463_000)),
                (Hardfork::SpuriousDragon, Some(2_675_000)),
                (Hardfork::Byzantium, Some(4_370_000)),
                (Hardfork::Constantinople, Some(7_280_000)),
                (Hardfork::Petersburg, Some(7_280_000)),
                (Hardfork::Istanbul, Some(9_069_000)),
                (Hardfork::MuirGlacier, Some(9_200_000)),
                (Hardfork::Berlin, Some(12_244_000)),
            ],
            genesis: GenesisParams {
                gas_limit: BigUint::from(5_000u32),
                timestamp: BigUint::from(0u32),
                difficulty: BigUint::from(17_179_869_184u64),
                extra_data: hex::decode(
                    "11bbe8db4e347b4e8c937c1c8370e4b5ed33adb3db69cbdb7a38e1e50b1b82fa",
                )
                .expect("static hex"),
                nonce: [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x42],
                state_root: decode32(
                    "d7f8974fb5ac78d9ac099b9ad5018bedc2ce0a72dad1827a1709da30580f0544",
                ),
            },
            bootnodes: vec![
                BootnodeEndpoint {
                    address: "18.138.108.67".to_string(),
                    udp_port: 30303,
                    tcp_port: 30303,
                },
                BootnodeEndpoint {
                    address: "3.209.45.79".to_string(),
                    udp_port: 30303,
                    tcp_port: 30303,
                },
            ],
        }
    }

    /// Clique proof-of-authority network (15s period, 30 000 block epochs).
    pub fn poanet() -> Self {
        Self {
            name: "poanet".to_string(),
            network_id: 5,
            consensus_type: ConsensusType::Poa,
            consensus_algorithm: ConsensusAlgorithm::Clique,
            clique: Some(CliqueConfig {
                period: 15,
                epoch: 30_000,
            }),
            schedule: vec![
                (Hardfork::Chainstart, Some(0)),
                (Hardfork::Homestead, Some(0)),
                (Hardfork::Dao, None),
                (Hardfork::TangerineWhistle, Some(0)),
                (Hardfork::SpuriousDragon, Some(0)),
                (Hardfork::Byzantium, Some(0)),
                (Hardfork::Constantinople, Some(0)),
                (Hardfork::Petersburg, Some(0)),
                (Hardfork::Istanbul, Some(1_561_651)),
                (Hardfork::MuirGlacier, None),
                (Hardfork::Berlin, Some(4_460_644)),
            ],
            genesis: GenesisParams {
                gas_limit: BigUint::from(10_485_760u32),
                timestamp: BigUint::from(1_548_854_791u64),
                difficulty: BigUint::from(1u32),
                extra_data: vec![0u8; 32 + 20 + 65],
                nonce: [0u8; 8],
                state_root: decode32(
                    "5d6cded585e73c4e322c30c2f782a336316f17dd85a4863b9d838d2d4b8b3008",
                ),
            },
            bootnodes: vec![BootnodeEndpoint {
                address: "51.141.78.53".to_string(),
                udp_port: 30303,
                tcp_port: 30303,
            }],
        }
    }

    /// Look up a spec by network name.
    pub fn by_name(name: &str) -> ChainResult<Self> {
        match name {
            "mainnet" => Ok(Self::mainnet()),
            "poanet" => Ok(Self::poanet()),
            other => Err(ChainError::UnknownNetwork(other.to_string())),
        }
    }

    /// Chain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network identifier exchanged during session handshakes.
    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    /// Consensus family.
    pub fn consensus_type(&self) -> ConsensusType {
        self.consensus_type
    }

    /// Consensus algorithm.
    pub fn consensus_algorithm(&self) -> ConsensusAlgorithm {
        self.consensus_algorithm
    }

    /// Clique configuration; error on non-clique chains.
    pub fn consensus_config(&self) -> ChainResult<CliqueConfig> {
        self.clique.ok_or(ChainError::NotClique)
    }

    /// Genesis parameters.
    pub fn genesis(&self) -> &GenesisParams {
        &self.genesis
    }

    /// Bootstrap endpoints for the discovery table.
    pub fn bootnodes(&self) -> &[BootnodeEndpoint] {
        &self.bootnodes
    }

    /// Named protocol constant for a section and hardfork.
    pub fn param_by_hardfork(
        &self,
        section: ParamSection,
        name: &str,
        hardfork: Hardfork,
    ) -> ChainResult<BigUint> {
        param_by_hardfork(section, name, hardfork)
    }

    /// Activation block of a hardfork, `None` when not scheduled.
    pub fn hardfork_block(&self, hardfork: Hardfork) -> Option<u64> {
        self.schedule
            .iter()
            .find(|(hf, _)| *hf == hardfork)
            .and_then(|(_, block)| *block)
    }

    /// Whether a hardfork is part of this chain's schedule.
    pub fn is_hardfork_active(&self, hardfork: Hardfork) -> bool {
        self.hardfork_block(hardfork).is_some()
    }

    /// Latest hardfork active at a block number.
    pub fn active_hardfork_at(&self, number: u64) -> Hardfork {
        let mut active = Hardfork::Chainstart;
        for (hf, block) in &self.schedule {
            if let Some(block) = block {
                if *block <= number {
                    active = *hf;
                }
            }
        }
        active
    }

    /// `rank(a) >= rank(b)`.
    pub fn hardfork_gte(&self, a: Hardfork, b: Hardfork) -> bool {
        a.gte(b)
    }

    /// EIPs activated by the schedule, independent of block height.
    pub fn eips(&self) -> BTreeSet<u32> {
        let mut eips = BTreeSet::new();
        if self.is_hardfork_active(Hardfork::SpuriousDragon) {
            eips.extend([155, 160, 161, 170]);
        }
        if self.is_hardfork_active(Hardfork::Istanbul) {
            eips.extend([1344, 1884, 2028, 2200]);
        }
        if self.is_hardfork_active(Hardfork::Berlin) {
            eips.extend([2565, 2718, 2929, 2930]);
        }
        eips
    }
}

/// Builder for custom (test and private-network) specifications.
#[derive(Debug, Clone)]
pub struct ChainSpecBuilder {
    spec: ChainSpec,
}

impl ChainSpecBuilder {
    /// Start from an existing preset.
    pub fn from_spec(spec: ChainSpec) -> Self {
        Self { spec }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.spec.name = name.to_string();
        self
    }

    pub fn network_id(mut self, id: u64) -> Self {
        self.spec.network_id = id;
        self
    }

    pub fn clique(mut self, config: CliqueConfig) -> Self {
        self.spec.consensus_type = ConsensusType::Poa;
        self.spec.consensus_algorithm = ConsensusAlgorithm::Clique;
        self.spec.clique = Some(config);
        self
    }

    /// Override one hardfork's activation block.
    pub fn hardfork_block(mut self, hardfork: Hardfork, block: Option<u64>) -> Self {
        for entry in &mut self.spec.schedule {
            if entry.0 == hardfork {
                entry.1 = block;
            }
        }
        self
    }

    pub fn bootnodes(mut self, bootnodes: Vec<BootnodeEndpoint>) -> Self {
        self.spec.bootnodes = bootnodes;
        self
    }

    pub fn build(self) -> ChainSpec {
        self.spec
    }
}

fn decode32(s: &str) -> [u8; 32] {
    let bytes = hex::decode(s).expect("static hex");
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}
