use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::arith::{bit_length, is_prime};
use crate::context::{ContextData, CryptoContext};
use crate::error::BgvError;
use crate::params::{
    BgvParams, SecurityLevel, MAX_PLAINTEXT_MODULUS, MAX_RING_DIM, MIN_RING_DIM, TOWER_BITS,
};
use crate::serialization::{self, ObjectKind, SerialFormat};

/// Number of towers generated for the builtin engine. Bounds the
/// multiplicative depth a context can request.
pub const MAX_TOWERS: usize = 16;

/// The modulus tables an engine is instantiated from.
///
/// Every prime is `tower_bits` bits long and congruent to 1 modulo
/// `2 * max_ring_dim`, so it admits a negacyclic NTT for every power-of-two
/// ring dimension up to `max_ring_dim`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTables {
    pub tower_bits: u32,
    pub max_ring_dim: usize,
    pub primes: Vec<u64>,
}

impl EngineTables {
    /// Searches the `count` largest NTT-friendly primes below `2^tower_bits`.
    pub fn generate(count: usize, tower_bits: u32, max_ring_dim: usize) -> Result<Self, BgvError> {
        if !(20..=61).contains(&tower_bits) {
            return Err(BgvError::InvalidParameter(format!(
                "tower size of {tower_bits} bits is not supported"
            )));
        }
        check_ring_dim_shape(max_ring_dim)?;
        let step = 2 * max_ring_dim as u64;
        let lower = 1u64 << (tower_bits - 1);
        let mut candidate = (((1u64 << tower_bits) - 1) / step) * step + 1;
        if candidate >= 1u64 << tower_bits {
            candidate -= step;
        }

        let mut primes = Vec::with_capacity(count);
        while primes.len() < count {
            if candidate < lower {
                return Err(BgvError::InvalidParameter(format!(
                    "only {} primes of {tower_bits} bits are congruent to 1 modulo {step}",
                    primes.len()
                )));
            }
            if is_prime(candidate) {
                primes.push(candidate);
            }
            candidate -= step;
        }
        Ok(Self {
            tower_bits,
            max_ring_dim,
            primes,
        })
    }

    pub fn validate(&self) -> Result<(), BgvError> {
        check_ring_dim_shape(self.max_ring_dim)?;
        if self.primes.is_empty() {
            return Err(BgvError::InvalidParameter(
                "engine tables contain no primes".to_string(),
            ));
        }
        let step = 2 * self.max_ring_dim as u64;
        let mut seen = HashSet::new();
        for q in &self.primes {
            if bit_length(*q) != self.tower_bits {
                return Err(BgvError::InvalidParameter(format!(
                    "modulus {q} is not a {}-bit number",
                    self.tower_bits
                )));
            }
            if (q - 1) % step != 0 {
                return Err(BgvError::InvalidParameter(format!(
                    "modulus {q} is not congruent to 1 modulo {step}"
                )));
            }
            if !is_prime(*q) {
                return Err(BgvError::InvalidParameter(format!("modulus {q} is not prime")));
            }
            if !seen.insert(*q) {
                return Err(BgvError::InvalidParameter(format!("modulus {q} appears twice")));
            }
        }
        Ok(())
    }
}

fn check_ring_dim_shape(ring_dim: usize) -> Result<(), BgvError> {
    if !ring_dim.is_power_of_two() || !(MIN_RING_DIM..=MAX_RING_DIM).contains(&ring_dim) {
        return Err(BgvError::InvalidParameter(format!(
            "ring dimension {ring_dim} must be a power of two between {MIN_RING_DIM} and {MAX_RING_DIM}"
        )));
    }
    Ok(())
}

/// The homomorphic-encryption engine. Creates crypto contexts from its
/// modulus tables and keeps track of how many of them are alive.
#[derive(Debug)]
pub struct BgvEngine {
    tables: EngineTables,
    live_contexts: Arc<AtomicUsize>,
}

impl BgvEngine {
    /// Builds the engine from freshly generated tables. CPU bound.
    pub fn builtin() -> Result<Self, BgvError> {
        let tables = EngineTables::generate(MAX_TOWERS, TOWER_BITS, MAX_RING_DIM)?;
        info!(
            "Generated {} NTT-friendly {}-bit moduli",
            tables.primes.len(),
            tables.tower_bits
        );
        Self::from_tables(tables)
    }

    pub fn from_tables(tables: EngineTables) -> Result<Self, BgvError> {
        tables.validate()?;
        Ok(Self {
            tables,
            live_contexts: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Instantiates the engine from a serialized engine asset.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BgvError> {
        let tables: EngineTables =
            serialization::deserialize(ObjectKind::EngineTables, bytes, SerialFormat::Binary)?;
        Self::from_tables(tables)
    }

    /// Serializes the engine tables as an engine asset.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BgvError> {
        serialization::serialize(ObjectKind::EngineTables, &self.tables, SerialFormat::Binary)
    }

    pub fn tables(&self) -> &EngineTables {
        &self.tables
    }

    /// Number of crypto contexts created by this engine and not yet released.
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    /// Creates a crypto context. No feature is enabled on the new context.
    pub fn gen_crypto_context(&self, params: &BgvParams) -> Result<CryptoContext, BgvError> {
        check_plaintext_modulus(params.plaintext_modulus)?;
        let towers = params.num_towers();
        if towers > self.tables.primes.len() {
            return Err(BgvError::InvalidParameter(format!(
                "multiplicative depth {} needs {towers} towers, the engine provides {}",
                params.multiplicative_depth,
                self.tables.primes.len()
            )));
        }
        let moduli = self.tables.primes[..towers].to_vec();
        let ring_dim = self.resolve_ring_dim(params, &moduli)?;
        debug!(
            "Creating crypto context: ring dimension {ring_dim}, {towers} towers, plaintext modulus {}",
            params.plaintext_modulus
        );
        CryptoContext::new(params.clone(), moduli, ring_dim, self.live_contexts.clone())
    }

    /// Restores a crypto context serialized with [`CryptoContext::serialize`],
    /// including its enabled features.
    pub fn deserialize_crypto_context(
        &self,
        bytes: &[u8],
        format: SerialFormat,
    ) -> Result<CryptoContext, BgvError> {
        let data: ContextData =
            serialization::deserialize(ObjectKind::CryptoContext, bytes, format)?;
        check_plaintext_modulus(data.params.plaintext_modulus)?;
        if data.moduli.len() != data.params.num_towers() {
            return Err(BgvError::Deserialization(format!(
                "context has {} moduli for multiplicative depth {}",
                data.moduli.len(),
                data.params.multiplicative_depth
            )));
        }
        // only chains this engine issues carry NTT-friendly moduli of tower width
        if !self.tables.primes.starts_with(&data.moduli) {
            return Err(BgvError::Deserialization(format!(
                "context moduli {:?} were not issued by this engine",
                data.moduli
            )));
        }
        let ring_dim = self.resolve_ring_dim(&data.params, &data.moduli)?;
        let mut cc = CryptoContext::new(data.params, data.moduli, ring_dim, self.live_contexts.clone())?;
        for feature in data.features {
            cc.enable(feature);
        }
        Ok(cc)
    }

    /// Picks the ring dimension: the explicit one if it is secure enough,
    /// otherwise the smallest standard dimension admitting the modulus chain.
    fn resolve_ring_dim(&self, params: &BgvParams, moduli: &[u64]) -> Result<usize, BgvError> {
        let log_q: u32 = moduli.iter().map(|q| bit_length(*q)).sum();
        let level = params.security_level;
        let ring_dim = match params.ring_dim {
            Some(n) => {
                check_ring_dim_shape(n)?;
                if level != SecurityLevel::HEStdNotSet {
                    match level.max_log_q(n) {
                        Some(max) if log_q <= max => {}
                        _ => {
                            return Err(BgvError::InvalidParameter(format!(
                                "ring dimension {n} is too small for {log_q} bits of modulus at {level}"
                            )))
                        }
                    }
                }
                n
            }
            None => level.min_ring_dim(log_q).ok_or_else(|| {
                BgvError::InvalidParameter(format!(
                    "no standard ring dimension admits {log_q} bits of modulus at {level}"
                ))
            })?,
        };
        if ring_dim > self.tables.max_ring_dim {
            return Err(BgvError::InvalidParameter(format!(
                "ring dimension {ring_dim} exceeds the engine maximum {}",
                self.tables.max_ring_dim
            )));
        }
        Ok(ring_dim)
    }
}

fn check_plaintext_modulus(t: u64) -> Result<(), BgvError> {
    if !(2..=MAX_PLAINTEXT_MODULUS).contains(&t) {
        return Err(BgvError::InvalidParameter(format!(
            "plaintext modulus {t} must lie between 2 and {MAX_PLAINTEXT_MODULUS}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SchemeFeature;

    fn small_engine() -> BgvEngine {
        BgvEngine::from_tables(EngineTables::generate(4, TOWER_BITS, MAX_RING_DIM).unwrap()).unwrap()
    }

    #[test]
    fn test_generated_tables() {
        let tables = EngineTables::generate(3, 60, 1 << 15).unwrap();
        assert_eq!(
            tables.primes,
            vec![
                1152921504606584833,
                1152921504598720513,
                1152921504597016577
            ]
        );
        assert!(tables.validate().is_ok());
    }

    #[test]
    fn test_invalid_tables() {
        let mut tables = EngineTables::generate(2, 60, 1 << 15).unwrap();
        tables.primes[1] = tables.primes[0];
        assert!(tables.validate().is_err());

        tables.primes[1] = 65537;
        assert!(tables.validate().is_err());

        // congruent to 1 but skipped by the search, so composite
        tables.primes[1] = tables.primes[0] - 2 * (1 << 15);
        assert!(!is_prime(tables.primes[1]));
        assert!(tables.validate().is_err());

        assert!(EngineTables::generate(2, 60, 12).is_err());
    }

    #[test]
    fn test_default_context_shape() {
        let engine = small_engine();
        let cc = engine.gen_crypto_context(&BgvParams::default()).unwrap();
        assert_eq!(cc.ring_dim(), 8192);
        assert_eq!(cc.cyclotomic_order(), 16384);
        assert_eq!(cc.moduli().len(), 3);
        assert_eq!(cc.log_q(), 180);
        assert!(cc.supports_packing());
        assert_eq!(engine.live_contexts(), 1);
        cc.release();
        assert_eq!(engine.live_contexts(), 0);
    }

    #[test]
    fn test_rejected_params() {
        let engine = small_engine();
        let too_deep = BgvParams::builder().multiplicative_depth(10).build();
        assert!(engine.gen_crypto_context(&too_deep).is_err());

        let insecure = BgvParams::builder().ring_dim(4096).build();
        assert!(engine.gen_crypto_context(&insecure).is_err());

        let unset = BgvParams::builder()
            .security_level(SecurityLevel::HEStdNotSet)
            .build();
        assert!(engine.gen_crypto_context(&unset).is_err());

        let bad_t = BgvParams::builder().plaintext_modulus(1).build();
        assert!(engine.gen_crypto_context(&bad_t).is_err());
        assert_eq!(engine.live_contexts(), 0);
    }

    #[test]
    fn test_context_serialization() {
        let engine = small_engine();
        let params = BgvParams::builder()
            .security_level(SecurityLevel::HEStdNotSet)
            .ring_dim(64)
            .build();
        let mut cc = engine.gen_crypto_context(&params).unwrap();
        cc.enable(SchemeFeature::Pke);
        for format in [SerialFormat::Binary, SerialFormat::Json] {
            let bytes = cc.serialize(format).unwrap();
            let restored = engine.deserialize_crypto_context(&bytes, format).unwrap();
            assert_eq!(restored.fingerprint(), cc.fingerprint());
            assert!(restored.is_enabled(SchemeFeature::Pke));
            assert!(!restored.is_enabled(SchemeFeature::LeveledShe));
        }
        assert_eq!(engine.live_contexts(), 1);
    }

    #[test]
    fn test_foreign_moduli_are_rejected() {
        let engine = small_engine();
        // NTT-friendly for ring dimension 8, but 64 bits wide
        let wide = r#"{"params":{"multiplicative_depth":0,"plaintext_modulus":65537,"security_level":"HEStdNotSet","ring_dim":8},"moduli":[18446744073709551521],"features":["Pke"]}"#;
        let bytes = serialization::serialize(
            ObjectKind::CryptoContext,
            &serde_json::from_str::<serde_json::Value>(wide).unwrap(),
            SerialFormat::Json,
        )
        .unwrap();
        assert!(matches!(
            engine.deserialize_crypto_context(&bytes, SerialFormat::Json),
            Err(BgvError::Deserialization(_))
        ));

        // a valid 60-bit prime the engine never issued
        let other = EngineTables::generate(5, TOWER_BITS, MAX_RING_DIM).unwrap();
        let params = BgvParams::builder()
            .multiplicative_depth(0)
            .security_level(SecurityLevel::HEStdNotSet)
            .ring_dim(64)
            .build();
        let data = ContextData {
            params,
            moduli: vec![other.primes[4]],
            features: Default::default(),
        };
        let bytes = serialization::serialize(ObjectKind::CryptoContext, &data, SerialFormat::Binary)
            .unwrap();
        assert!(engine
            .deserialize_crypto_context(&bytes, SerialFormat::Binary)
            .is_err());

        // the same chain issued by the engine is accepted
        let data = ContextData {
            moduli: vec![engine.tables().primes[0]],
            ..data
        };
        let bytes = serialization::serialize(ObjectKind::CryptoContext, &data, SerialFormat::Binary)
            .unwrap();
        let cc = engine
            .deserialize_crypto_context(&bytes, SerialFormat::Binary)
            .unwrap();
        assert_eq!(cc.moduli(), &engine.tables().primes[..1]);
        cc.release();
        assert_eq!(engine.live_contexts(), 0);
    }

    #[test]
    fn test_asset_roundtrip() {
        let engine = small_engine();
        let bytes = engine.to_bytes().unwrap();
        let restored = BgvEngine::from_bytes(&bytes).unwrap();
        assert_eq!(restored.tables(), engine.tables());
        assert!(BgvEngine::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}
