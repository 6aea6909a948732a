//! # ember-chain
//!
//! Chain specifications for the Ember node.
//!
//! This crate provides:
//! - The hardfork schedule and `Hardfork` ordering
//! - Protocol constants keyed by `(section, name, hardfork)`
//! - Consensus type/algorithm selection and clique configuration
//! - Genesis parameters and EIP activation sets

mod error;
mod hardfork;
mod params;
mod spec;

pub use error::{ChainError, ChainResult};
pub use hardfork::Hardfork;
pub use params::{ParamSection, GAS_CONFIG, POW, VM};
pub use spec::{
    BootnodeEndpoint, ChainSpec, ChainSpecBuilder, CliqueConfig, ConsensusAlgorithm,
    ConsensusType, GenesisParams,
};

/// Default P2P listen port.
pub const DEFAULT_PORT: u16 = 30303;
