use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use typed_builder::TypedBuilder;

/// Multiplicative depth used when none is requested.
pub const DEFAULT_MULTIPLICATIVE_DEPTH: u32 = 2;

/// The plaintext space Z_{65537}. 65537 is prime and 2^16 divides 65537 - 1,
/// so it supports packed encoding for every ring dimension up to 2^15.
pub const DEFAULT_PLAINTEXT_MODULUS: u64 = 65537;

/// Bit size of every tower of the RNS modulus chain.
pub const TOWER_BITS: u32 = 60;

pub const MIN_RING_DIM: usize = 1 << 3;
pub const MAX_RING_DIM: usize = 1 << 15;

/// Largest plaintext modulus accepted. Keeps `t * e` and the noise of a
/// fresh ciphertext far below the first tower.
pub const MAX_PLAINTEXT_MODULUS: u64 = 1 << 32;

/// NewHope bound of the secret key distribution (ternary).
pub(crate) const SECRET_NEW_HOPE_BOUND: usize = 1;

/// NewHope bound of the error distribution. A centered binomial with
/// parameter 20 has standard deviation sqrt(10) ~ 3.16.
pub(crate) const ERROR_NEW_HOPE_BOUND: usize = 20;

/// Security level presets.
///
/// The bounds are the maximum `log2(Q)` of the HomomorphicEncryption.org
/// standard for a ternary secret and classical attacks, for ring dimensions
/// 2^10 to 2^15.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum SecurityLevel {
    #[default]
    #[strum(serialize = "HEStd_128_classic")]
    HEStd128Classic,
    #[strum(serialize = "HEStd_192_classic")]
    HEStd192Classic,
    #[strum(serialize = "HEStd_256_classic")]
    HEStd256Classic,
    #[strum(serialize = "HEStd_NotSet")]
    HEStdNotSet,
}

const STD_RING_DIMS: [usize; 6] = [1 << 10, 1 << 11, 1 << 12, 1 << 13, 1 << 14, 1 << 15];
const STD_128_MAX_LOG_Q: [u32; 6] = [27, 54, 109, 218, 438, 881];
const STD_192_MAX_LOG_Q: [u32; 6] = [19, 37, 75, 152, 305, 611];
const STD_256_MAX_LOG_Q: [u32; 6] = [14, 29, 58, 118, 237, 476];

impl SecurityLevel {
    fn max_log_q_table(&self) -> Option<&'static [u32; 6]> {
        match self {
            SecurityLevel::HEStd128Classic => Some(&STD_128_MAX_LOG_Q),
            SecurityLevel::HEStd192Classic => Some(&STD_192_MAX_LOG_Q),
            SecurityLevel::HEStd256Classic => Some(&STD_256_MAX_LOG_Q),
            SecurityLevel::HEStdNotSet => None,
        }
    }

    /// Largest `log2(Q)` allowed at this level for `ring_dim`.
    /// `None` for `HEStdNotSet` and for dimensions outside the standard.
    pub fn max_log_q(&self, ring_dim: usize) -> Option<u32> {
        let table = self.max_log_q_table()?;
        STD_RING_DIMS
            .iter()
            .position(|n| *n == ring_dim)
            .map(|idx| table[idx])
    }

    /// Smallest standard ring dimension whose bound admits a modulus of `log_q` bits.
    pub fn min_ring_dim(&self, log_q: u32) -> Option<usize> {
        let table = self.max_log_q_table()?;
        STD_RING_DIMS
            .iter()
            .zip(table.iter())
            .find(|(_, max)| log_q <= **max)
            .map(|(n, _)| *n)
    }
}

/// Optional capabilities of a crypto context. Operations check that the
/// feature they belong to has been enabled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
pub enum SchemeFeature {
    /// Key generation, encryption and decryption.
    #[strum(serialize = "PKE")]
    Pke,
    /// Additions and plaintext multiplications on ciphertexts.
    #[strum(serialize = "LEVELEDSHE")]
    LeveledShe,
}

/// User facing parameters of a BGV crypto context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct BgvParams {
    #[builder(default = DEFAULT_MULTIPLICATIVE_DEPTH)]
    pub multiplicative_depth: u32,
    #[builder(default = DEFAULT_PLAINTEXT_MODULUS)]
    pub plaintext_modulus: u64,
    #[builder(default)]
    pub security_level: SecurityLevel,
    /// Ring dimension; chosen from the security level when unset.
    #[builder(default, setter(strip_option))]
    pub ring_dim: Option<usize>,
}

impl Default for BgvParams {
    fn default() -> Self {
        BgvParams::builder().build()
    }
}

impl BgvParams {
    /// Number of RNS towers of the ciphertext modulus: one per level plus the base tower.
    pub fn num_towers(&self) -> usize {
        self.multiplicative_depth as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_params() {
        let params = BgvParams::default();
        assert_eq!(params.multiplicative_depth, 2);
        assert_eq!(params.plaintext_modulus, 65537);
        assert_eq!(params.security_level, SecurityLevel::HEStd128Classic);
        assert_eq!(params.ring_dim, None);
        assert_eq!(params.num_towers(), 3);
    }

    #[test]
    fn test_min_ring_dim() {
        let level = SecurityLevel::HEStd128Classic;
        assert_eq!(level.min_ring_dim(180), Some(8192));
        assert_eq!(level.min_ring_dim(218), Some(8192));
        assert_eq!(level.min_ring_dim(219), Some(16384));
        assert_eq!(level.min_ring_dim(882), None);
        assert_eq!(SecurityLevel::HEStd192Classic.min_ring_dim(180), Some(16384));
        assert_eq!(SecurityLevel::HEStd256Classic.min_ring_dim(180), Some(16384));
        assert_eq!(SecurityLevel::HEStdNotSet.min_ring_dim(10), None);
    }

    #[test]
    fn test_security_level_names() {
        assert_eq!(
            SecurityLevel::from_str("HEStd_128_classic").unwrap(),
            SecurityLevel::HEStd128Classic
        );
        assert_eq!(SecurityLevel::HEStd256Classic.to_string(), "HEStd_256_classic");
        assert_eq!(SchemeFeature::from_str("LEVELEDSHE").unwrap(), SchemeFeature::LeveledShe);
    }
}
