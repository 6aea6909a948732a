//! Hardfork identifiers and ordering.
//!
//! Hardforks form a total order; consensus code branches on
//! `Hardfork::gte` instead of chains of name comparisons, which keeps the
//! difficulty epochs a table rather than nested conditionals.

use crate::{ChainError, ChainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named protocol upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Hardfork {
    Chainstart,
    Homestead,
    Dao,
    TangerineWhistle,
    SpuriousDragon,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    MuirGlacier,
    Berlin,
}

impl Hardfork {
    /// All hardforks in activation order.
    pub const ALL: [Hardfork; 11] = [
        Hardfork::Chainstart,
        Hardfork::Homestead,
        Hardfork::Dao,
        Hardfork::TangerineWhistle,
        Hardfork::SpuriousDragon,
        Hardfork::Byzantium,
        Hardfork::Constantinople,
        Hardfork::Petersburg,
        Hardfork::Istanbul,
        Hardfork::MuirGlacier,
        Hardfork::Berlin,
    ];

    /// Position of this hardfork in the activation order.
    pub fn rank(self) -> u32 {
        match self {
            Hardfork::Chainstart => 0,
            Hardfork::Homestead => 1,
            Hardfork::Dao => 2,
            Hardfork::TangerineWhistle => 3,
            Hardfork::SpuriousDragon => 4,
            Hardfork::Byzantium => 5,
            Hardfork::Constantinople => 6,
            Hardfork::Petersburg => 7,
            Hardfork::Istanbul => 8,
            Hardfork::MuirGlacier => 9,
            Hardfork::Berlin => 10,
        }
    }

    /// `true` when `self` activates at or after `other`.
    pub fn gte(self, other: Hardfork) -> bool {
        self.rank() >= other.rank()
    }

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Hardfork::Chainstart => "chainstart",
            Hardfork::Homestead => "homestead",
            Hardfork::Dao => "dao",
            Hardfork::TangerineWhistle => "tangerineWhistle",
            Hardfork::SpuriousDragon => "spuriousDragon",
            Hardfork::Byzantium => "byzantium",
            Hardfork::Constantinople => "constantinople",
            Hardfork::Petersburg => "petersburg",
            Hardfork::Istanbul => "istanbul",
            Hardfork::MuirGlacier => "muirGlacier",
            Hardfork::Berlin => "berlin",
        }
    }
}

impl fmt::Display for Hardfork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hardfork {
    type Err = ChainError;

    fn from_str(s: &str) -> ChainResult<Self> {
        Hardfork::ALL
            .iter()
            .copied()
            .find(|hf| hf.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChainError::UnknownHardfork(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_is_monotone() {
        for pair in Hardfork::ALL.windows(2) {
            assert!(pair[1].rank() > pair[0].rank());
        }
    }

    #[test]
    fn test_gte() {
        assert!(Hardfork::Byzantium.gte(Hardfork::Homestead));
        assert!(Hardfork::Byzantium.gte(Hardfork::Byzantium));
        assert!(!Hardfork::Homestead.gte(Hardfork::Byzantium));
    }

    #[test]
    fn test_name_roundtrip() {
        for hf in Hardfork::ALL {
            assert_eq!(hf.name().parse::<Hardfork>().unwrap(), hf);
        }
    }

    #[test]
    fn test_unknown_name_is_error() {
        assert!(matches!(
            "granite".parse::<Hardfork>(),
            Err(ChainError::UnknownHardfork(_))
        ));
    }
}
