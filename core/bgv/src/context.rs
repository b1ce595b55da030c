use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::arith::{center, lift};
use crate::ciphertext::Ciphertext;
use crate::error::BgvError;
use crate::keys::{KeyPair, PublicKey, SecretKey};
use crate::ntt::NttTable;
use crate::params::{BgvParams, SchemeFeature, ERROR_NEW_HOPE_BOUND, SECRET_NEW_HOPE_BOUND};
use crate::plaintext::{Encoding, Plaintext};
use crate::poly::{RnsBasis, RnsPoly};
use crate::sampling::new_hope_sample;
use crate::serialization::{self, ObjectKind, SerialFormat};

/// Identifies the ring a key or ciphertext lives in. Objects are only
/// accepted by a context with the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextFingerprint {
    pub ring_dim: usize,
    pub plaintext_modulus: u64,
    pub moduli: Vec<u64>,
}

/// What gets written when a context is serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContextData {
    pub(crate) params: BgvParams,
    pub(crate) moduli: Vec<u64>,
    pub(crate) features: BTreeSet<SchemeFeature>,
}

/// A BGV crypto context: resolved parameters, RNS basis and enabled features.
///
/// Contexts are counted by the engine that created them; the count drops
/// when the context is released or dropped.
#[derive(Debug)]
pub struct CryptoContext {
    params: BgvParams,
    basis: RnsBasis,
    plain_table: Option<NttTable>,
    features: BTreeSet<SchemeFeature>,
    fingerprint: ContextFingerprint,
    live: Arc<AtomicUsize>,
}

impl CryptoContext {
    pub(crate) fn new(
        params: BgvParams,
        moduli: Vec<u64>,
        ring_dim: usize,
        live: Arc<AtomicUsize>,
    ) -> Result<Self, BgvError> {
        let params = BgvParams {
            ring_dim: Some(ring_dim),
            ..params
        };
        let basis = RnsBasis::new(&moduli, ring_dim)?;
        let t = params.plaintext_modulus;
        let plain_table = if crate::arith::is_prime(t) {
            NttTable::new(t, ring_dim).ok()
        } else {
            None
        };
        let fingerprint = ContextFingerprint {
            ring_dim,
            plaintext_modulus: t,
            moduli,
        };
        live.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            params,
            basis,
            plain_table,
            features: BTreeSet::new(),
            fingerprint,
            live,
        })
    }

    pub fn enable(&mut self, feature: SchemeFeature) {
        self.features.insert(feature);
    }

    pub fn is_enabled(&self, feature: SchemeFeature) -> bool {
        self.features.contains(&feature)
    }

    fn require(&self, feature: SchemeFeature) -> Result<(), BgvError> {
        if self.is_enabled(feature) {
            Ok(())
        } else {
            Err(BgvError::FeatureNotEnabled(feature))
        }
    }

    fn check_fingerprint(&self, other: &ContextFingerprint, what: &str) -> Result<(), BgvError> {
        if &self.fingerprint == other {
            Ok(())
        } else {
            Err(BgvError::ContextMismatch(format!(
                "{what} uses ring dimension {} with plaintext modulus {} and {} towers, \
                 context uses ring dimension {} with plaintext modulus {} and {} towers",
                other.ring_dim,
                other.plaintext_modulus,
                other.moduli.len(),
                self.fingerprint.ring_dim,
                self.fingerprint.plaintext_modulus,
                self.fingerprint.moduli.len(),
            )))
        }
    }

    pub fn params(&self) -> &BgvParams {
        &self.params
    }

    pub fn fingerprint(&self) -> &ContextFingerprint {
        &self.fingerprint
    }

    pub fn ring_dim(&self) -> usize {
        self.basis.ring_dim()
    }

    pub fn cyclotomic_order(&self) -> usize {
        2 * self.ring_dim()
    }

    pub fn plaintext_modulus(&self) -> u64 {
        self.params.plaintext_modulus
    }

    pub fn moduli(&self) -> &[u64] {
        &self.fingerprint.moduli
    }

    /// Bit size of the full ciphertext modulus.
    pub fn log_q(&self) -> u32 {
        self.moduli().iter().map(|q| crate::arith::bit_length(*q)).sum()
    }

    pub fn features(&self) -> impl Iterator<Item = SchemeFeature> + '_ {
        self.features.iter().copied()
    }

    /// Whether the plaintext modulus supports slot (packed) encoding in this ring.
    pub fn supports_packing(&self) -> bool {
        self.plain_table.is_some()
    }

    pub fn keygen<R: Rng + CryptoRng>(&self, rng: &mut R) -> Result<KeyPair, BgvError> {
        self.require(SchemeFeature::Pke)?;
        let n = self.ring_dim();
        let t = self.plaintext_modulus();

        let s = RnsPoly::from_signed(&self.basis, &new_hope_sample(rng, SECRET_NEW_HOPE_BOUND, n));
        let e = RnsPoly::from_signed(&self.basis, &new_hope_sample(rng, ERROR_NEW_HOPE_BOUND, n));
        let a = RnsPoly::uniform(&self.basis, rng);
        let b = a
            .mul(&s, &self.basis)
            .add(&e.scalar_mul(t, &self.basis), &self.basis);

        Ok(KeyPair {
            public_key: PublicKey {
                fingerprint: self.fingerprint.clone(),
                a,
                b,
            },
            secret_key: SecretKey {
                fingerprint: self.fingerprint.clone(),
                s,
            },
        })
    }

    pub fn make_packed_plaintext(&self, values: &[i64]) -> Result<Plaintext, BgvError> {
        let table = self.plain_table.as_ref().ok_or_else(|| {
            BgvError::InvalidParameter(format!(
                "plaintext modulus {} does not support packed encoding with ring dimension {}",
                self.plaintext_modulus(),
                self.ring_dim()
            ))
        })?;
        self.check_value_count(values.len())?;
        let t = self.plaintext_modulus();
        let mut coeffs: Vec<u64> = values.iter().map(|v| lift(*v, t)).collect();
        coeffs.resize(self.ring_dim(), 0);
        // slots -> coefficients
        table.backward(&mut coeffs);
        Ok(self.plaintext_from_coeffs(Encoding::Packed, &coeffs, values.len()))
    }

    pub fn make_coef_packed_plaintext(&self, values: &[i64]) -> Result<Plaintext, BgvError> {
        self.check_value_count(values.len())?;
        let t = self.plaintext_modulus();
        let mut coeffs: Vec<u64> = values.iter().map(|v| lift(*v, t)).collect();
        coeffs.resize(self.ring_dim(), 0);
        Ok(self.plaintext_from_coeffs(
            Encoding::CoefPacked,
            &coeffs,
            values.len(),
        ))
    }

    fn check_value_count(&self, count: usize) -> Result<(), BgvError> {
        if count > self.ring_dim() {
            return Err(BgvError::InvalidParameter(format!(
                "cannot encode {count} values with ring dimension {}",
                self.ring_dim()
            )));
        }
        Ok(())
    }

    /// Builds a plaintext from reduced coefficients modulo `t`.
    fn plaintext_from_coeffs(&self, encoding: Encoding, coeffs: &[u64], length: usize) -> Plaintext {
        let t = self.plaintext_modulus();
        let mut values = coeffs.to_vec();
        if let (Encoding::Packed, Some(table)) = (encoding, self.plain_table.as_ref()) {
            table.forward(&mut values);
        }
        Plaintext {
            encoding,
            coeffs: coeffs.iter().map(|c| center(*c, t)).collect(),
            values: values.into_iter().map(|v| center(v, t)).collect(),
            length,
        }
    }

    fn check_plaintext(&self, pt: &Plaintext) -> Result<(), BgvError> {
        if pt.coeffs.len() != self.ring_dim() {
            return Err(BgvError::ContextMismatch(format!(
                "plaintext has {} coefficients, context ring dimension is {}",
                pt.coeffs.len(),
                self.ring_dim()
            )));
        }
        Ok(())
    }

    pub fn encrypt<R: Rng + CryptoRng>(
        &self,
        pk: &PublicKey,
        pt: &Plaintext,
        rng: &mut R,
    ) -> Result<Ciphertext, BgvError> {
        self.require(SchemeFeature::Pke)?;
        self.check_fingerprint(&pk.fingerprint, "public key")?;
        self.check_plaintext(pt)?;
        let n = self.ring_dim();
        let t = self.plaintext_modulus();

        let v = RnsPoly::from_signed(&self.basis, &new_hope_sample(rng, SECRET_NEW_HOPE_BOUND, n));
        let e0 = RnsPoly::from_signed(&self.basis, &new_hope_sample(rng, ERROR_NEW_HOPE_BOUND, n));
        let e1 = RnsPoly::from_signed(&self.basis, &new_hope_sample(rng, ERROR_NEW_HOPE_BOUND, n));
        let m = RnsPoly::from_signed(&self.basis, &pt.coeffs);

        let c0 = pk
            .b
            .mul(&v, &self.basis)
            .add(&e0.scalar_mul(t, &self.basis), &self.basis)
            .add(&m, &self.basis);
        let c1 = pk
            .a
            .mul(&v, &self.basis)
            .add(&e1.scalar_mul(t, &self.basis), &self.basis);

        Ok(Ciphertext {
            fingerprint: self.fingerprint.clone(),
            encoding: pt.encoding,
            c0,
            c1,
        })
    }

    pub fn decrypt(&self, sk: &SecretKey, ct: &Ciphertext) -> Result<Plaintext, BgvError> {
        self.require(SchemeFeature::Pke)?;
        self.check_fingerprint(&sk.fingerprint, "secret key")?;
        self.check_fingerprint(&ct.fingerprint, "ciphertext")?;
        let t = self.plaintext_modulus() as i64;

        let noisy = ct.c0.sub(&ct.c1.mul(&sk.s, &self.basis), &self.basis);
        let coeffs: Vec<u64> = noisy
            .centered_coeffs_first_tower(&self.basis)
            .into_iter()
            .map(|c| c.rem_euclid(t) as u64)
            .collect();
        if ct.encoding == Encoding::Packed && self.plain_table.is_none() {
            return Err(BgvError::CryptoFailure(
                "packed ciphertext under a plaintext modulus without slots".to_string(),
            ));
        }
        Ok(self.plaintext_from_coeffs(ct.encoding, &coeffs, self.ring_dim()))
    }

    fn check_eval_operands(&self, a: &Ciphertext, b: &Ciphertext) -> Result<(), BgvError> {
        self.require(SchemeFeature::LeveledShe)?;
        self.check_fingerprint(&a.fingerprint, "ciphertext")?;
        self.check_fingerprint(&b.fingerprint, "ciphertext")?;
        if a.encoding != b.encoding {
            return Err(BgvError::InvalidParameter(format!(
                "cannot combine {} and {} ciphertexts",
                a.encoding, b.encoding
            )));
        }
        Ok(())
    }

    fn check_eval_plaintext(&self, ct: &Ciphertext, pt: &Plaintext) -> Result<(), BgvError> {
        self.require(SchemeFeature::LeveledShe)?;
        self.check_fingerprint(&ct.fingerprint, "ciphertext")?;
        self.check_plaintext(pt)?;
        if ct.encoding != pt.encoding {
            return Err(BgvError::InvalidParameter(format!(
                "cannot combine a {} ciphertext with a {} plaintext",
                ct.encoding, pt.encoding
            )));
        }
        Ok(())
    }

    pub fn eval_add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, BgvError> {
        self.check_eval_operands(a, b)?;
        Ok(Ciphertext {
            fingerprint: self.fingerprint.clone(),
            encoding: a.encoding,
            c0: a.c0.add(&b.c0, &self.basis),
            c1: a.c1.add(&b.c1, &self.basis),
        })
    }

    pub fn eval_sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, BgvError> {
        self.check_eval_operands(a, b)?;
        Ok(Ciphertext {
            fingerprint: self.fingerprint.clone(),
            encoding: a.encoding,
            c0: a.c0.sub(&b.c0, &self.basis),
            c1: a.c1.sub(&b.c1, &self.basis),
        })
    }

    pub fn eval_negate(&self, ct: &Ciphertext) -> Result<Ciphertext, BgvError> {
        self.require(SchemeFeature::LeveledShe)?;
        self.check_fingerprint(&ct.fingerprint, "ciphertext")?;
        Ok(Ciphertext {
            fingerprint: self.fingerprint.clone(),
            encoding: ct.encoding,
            c0: ct.c0.neg(&self.basis),
            c1: ct.c1.neg(&self.basis),
        })
    }

    pub fn eval_add_plaintext(&self, ct: &Ciphertext, pt: &Plaintext) -> Result<Ciphertext, BgvError> {
        self.check_eval_plaintext(ct, pt)?;
        let m = RnsPoly::from_signed(&self.basis, &pt.coeffs);
        Ok(Ciphertext {
            fingerprint: self.fingerprint.clone(),
            encoding: ct.encoding,
            c0: ct.c0.add(&m, &self.basis),
            c1: ct.c1.clone(),
        })
    }

    pub fn eval_mult_plaintext(&self, ct: &Ciphertext, pt: &Plaintext) -> Result<Ciphertext, BgvError> {
        self.check_eval_plaintext(ct, pt)?;
        let m = RnsPoly::from_signed(&self.basis, &pt.coeffs);
        Ok(Ciphertext {
            fingerprint: self.fingerprint.clone(),
            encoding: ct.encoding,
            c0: ct.c0.mul(&m, &self.basis),
            c1: ct.c1.mul(&m, &self.basis),
        })
    }

    pub fn serialize(&self, format: SerialFormat) -> Result<Vec<u8>, BgvError> {
        let data = ContextData {
            params: self.params.clone(),
            moduli: self.fingerprint.moduli.clone(),
            features: self.features.clone(),
        };
        serialization::serialize(ObjectKind::CryptoContext, &data, format)
    }

    pub fn serialize_public_key(&self, pk: &PublicKey, format: SerialFormat) -> Result<Vec<u8>, BgvError> {
        self.check_fingerprint(&pk.fingerprint, "public key")?;
        serialization::serialize(ObjectKind::PublicKey, pk, format)
    }

    /// Deserializes a public key. Fails with `ContextMismatch` if the key was
    /// generated under different parameters.
    pub fn deserialize_public_key(&self, bytes: &[u8], format: SerialFormat) -> Result<PublicKey, BgvError> {
        let pk: PublicKey = serialization::deserialize(ObjectKind::PublicKey, bytes, format)?;
        self.check_fingerprint(&pk.fingerprint, "public key")?;
        pk.a.check_shape(&self.basis)?;
        pk.b.check_shape(&self.basis)?;
        Ok(pk)
    }

    pub fn serialize_ciphertext(&self, ct: &Ciphertext, format: SerialFormat) -> Result<Vec<u8>, BgvError> {
        self.check_fingerprint(&ct.fingerprint, "ciphertext")?;
        serialization::serialize(ObjectKind::Ciphertext, ct, format)
    }

    pub fn deserialize_ciphertext(&self, bytes: &[u8], format: SerialFormat) -> Result<Ciphertext, BgvError> {
        let ct: Ciphertext = serialization::deserialize(ObjectKind::Ciphertext, bytes, format)?;
        self.check_fingerprint(&ct.fingerprint, "ciphertext")?;
        ct.c0.check_shape(&self.basis)?;
        ct.c1.check_shape(&self.basis)?;
        Ok(ct)
    }

    /// Explicitly releases the context. Dropping it has the same effect.
    pub fn release(self) {
        trace!(
            "Releasing crypto context with ring dimension {}",
            self.ring_dim()
        );
    }
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_prng::AesRng;
    use rand::SeedableRng;

    const MODULI: [u64; 3] = [
        1152921504606584833,
        1152921504598720513,
        1152921504597016577,
    ];

    fn context(ring_dim: usize, t: u64) -> CryptoContext {
        let params = BgvParams::builder()
            .plaintext_modulus(t)
            .ring_dim(ring_dim)
            .build();
        let mut cc =
            CryptoContext::new(params, MODULI.to_vec(), ring_dim, Arc::new(AtomicUsize::new(0)))
                .unwrap();
        cc.enable(SchemeFeature::Pke);
        cc.enable(SchemeFeature::LeveledShe);
        cc
    }

    #[test]
    fn test_packed_encrypt_decrypt() {
        let mut rng = AesRng::seed_from_u64(11);
        let cc = context(1024, 65537);
        let keys = cc.keygen(&mut rng).unwrap();
        let values = vec![1, 2, 3, 4, 5, -6, 32768, -32768];
        let pt = cc.make_packed_plaintext(&values).unwrap();
        assert_eq!(pt.values(), values.as_slice());

        let ct = cc.encrypt(&keys.public_key, &pt, &mut rng).unwrap();
        let mut dec = cc.decrypt(&keys.secret_key, &ct).unwrap();
        dec.set_length(values.len());
        assert_eq!(dec.values(), values.as_slice());
        assert_eq!(dec.encoding(), Encoding::Packed);
    }

    #[test]
    fn test_coef_packed_with_non_prime_modulus() {
        let mut rng = AesRng::seed_from_u64(12);
        let cc = context(64, 256);
        assert!(!cc.supports_packing());
        assert!(cc.make_packed_plaintext(&[1]).is_err());

        let keys = cc.keygen(&mut rng).unwrap();
        let pt = cc.make_coef_packed_plaintext(&[1, -1, 100, 127]).unwrap();
        let ct = cc.encrypt(&keys.public_key, &pt, &mut rng).unwrap();
        let mut dec = cc.decrypt(&keys.secret_key, &ct).unwrap();
        dec.set_length(4);
        assert_eq!(dec.values(), &[1, -1, 100, 127]);
    }

    #[test]
    fn test_homomorphic_slot_arithmetic() {
        let mut rng = AesRng::seed_from_u64(13);
        let cc = context(1024, 65537);
        let keys = cc.keygen(&mut rng).unwrap();
        let x = cc.make_packed_plaintext(&[1, 2, 3, 4]).unwrap();
        let y = cc.make_packed_plaintext(&[10, 20, 30, 40]).unwrap();
        let cx = cc.encrypt(&keys.public_key, &x, &mut rng).unwrap();
        let cy = cc.encrypt(&keys.public_key, &y, &mut rng).unwrap();

        let decrypt4 = |ct: &Ciphertext| {
            let mut pt = cc.decrypt(&keys.secret_key, ct).unwrap();
            pt.set_length(4);
            pt.values().to_vec()
        };

        assert_eq!(decrypt4(&cc.eval_add(&cx, &cy).unwrap()), vec![11, 22, 33, 44]);
        assert_eq!(decrypt4(&cc.eval_sub(&cx, &cy).unwrap()), vec![-9, -18, -27, -36]);
        assert_eq!(decrypt4(&cc.eval_negate(&cx).unwrap()), vec![-1, -2, -3, -4]);
        assert_eq!(decrypt4(&cc.eval_add_plaintext(&cx, &y).unwrap()), vec![11, 22, 33, 44]);
        assert_eq!(decrypt4(&cc.eval_mult_plaintext(&cx, &y).unwrap()), vec![10, 40, 90, 160]);
    }

    #[test]
    fn test_feature_gating() {
        let mut rng = AesRng::seed_from_u64(14);
        let params = BgvParams::builder().ring_dim(64).build();
        let mut cc =
            CryptoContext::new(params, MODULI.to_vec(), 64, Arc::new(AtomicUsize::new(0))).unwrap();
        assert!(matches!(
            cc.keygen(&mut rng),
            Err(BgvError::FeatureNotEnabled(SchemeFeature::Pke))
        ));
        cc.enable(SchemeFeature::Pke);
        let keys = cc.keygen(&mut rng).unwrap();
        let pt = cc.make_packed_plaintext(&[1]).unwrap();
        let ct = cc.encrypt(&keys.public_key, &pt, &mut rng).unwrap();
        assert!(matches!(
            cc.eval_add(&ct, &ct),
            Err(BgvError::FeatureNotEnabled(SchemeFeature::LeveledShe))
        ));
    }

    #[test]
    fn test_mismatched_contexts() {
        let mut rng = AesRng::seed_from_u64(15);
        let small = context(64, 65537);
        let large = context(128, 65537);
        let keys = small.keygen(&mut rng).unwrap();
        let pt = large.make_packed_plaintext(&[1]).unwrap();
        assert!(matches!(
            large.encrypt(&keys.public_key, &pt, &mut rng),
            Err(BgvError::ContextMismatch(_))
        ));
        let bytes = small
            .serialize_public_key(&keys.public_key, SerialFormat::Binary)
            .unwrap();
        assert!(matches!(
            large.deserialize_public_key(&bytes, SerialFormat::Binary),
            Err(BgvError::ContextMismatch(_))
        ));
    }

    #[test]
    fn test_live_count() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = CryptoContext::new(BgvParams::default(), MODULI.to_vec(), 16, live.clone()).unwrap();
        let b = CryptoContext::new(BgvParams::default(), MODULI.to_vec(), 16, live.clone()).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 2);
        a.release();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        drop(b);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
