//! Protocol constants keyed by `(section, name, hardfork)`.
//!
//! Values are stable across the current schedule; the hardfork argument is
//! part of the lookup contract so per-fork overrides slot in without
//! touching call sites.

use crate::{ChainError, ChainResult, Hardfork};
use num_bigint::BigUint;

/// A named parameter section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSection {
    /// Proof-of-work constants.
    Pow,
    /// Gas accounting constants.
    GasConfig,
    /// Virtual machine limits.
    Vm,
}

/// Section name used in lookups and error messages.
pub const POW: ParamSection = ParamSection::Pow;
pub const GAS_CONFIG: ParamSection = ParamSection::GasConfig;
pub const VM: ParamSection = ParamSection::Vm;

impl ParamSection {
    pub fn name(self) -> &'static str {
        match self {
            ParamSection::Pow => "pow",
            ParamSection::GasConfig => "gasConfig",
            ParamSection::Vm => "vm",
        }
    }
}

/// Resolve a parameter value for a section, name and hardfork.
pub(crate) fn param_by_hardfork(
    section: ParamSection,
    name: &str,
    _hardfork: Hardfork,
) -> ChainResult<BigUint> {
    let value: u64 = match (section, name) {
        (ParamSection::Pow, "minimumDifficulty") => 131_072,
        (ParamSection::Pow, "difficultyBoundDivisor") => 2_048,
        (ParamSection::Pow, "durationLimit") => 13,
        (ParamSection::GasConfig, "gasLimitBoundDivisor") => 1_024,
        (ParamSection::GasConfig, "minGasLimit") => 5_000,
        (ParamSection::Vm, "maxExtraDataSize") => 32,
        _ => {
            return Err(ChainError::UnknownParam {
                section: section.name(),
                name: name.to_string(),
            })
        }
    };
    Ok(BigUint::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_params() {
        assert_eq!(
            param_by_hardfork(POW, "minimumDifficulty", Hardfork::Chainstart).unwrap(),
            BigUint::from(131_072u32)
        );
        assert_eq!(
            param_by_hardfork(POW, "difficultyBoundDivisor", Hardfork::Byzantium).unwrap(),
            BigUint::from(2_048u32)
        );
    }

    #[test]
    fn test_unknown_param_names_section_and_name() {
        let err = param_by_hardfork(POW, "blockReward", Hardfork::Chainstart).unwrap_err();
        match err {
            ChainError::UnknownParam { section, name } => {
                assert_eq!(section, "pow");
                assert_eq!(name, "blockReward");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
