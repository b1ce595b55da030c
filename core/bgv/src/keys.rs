use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::ContextFingerprint;
use crate::poly::RnsPoly;

/// RLWE public key `(b, a)` with `b = a*s + t*e`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub(crate) fingerprint: ContextFingerprint,
    pub(crate) a: RnsPoly,
    pub(crate) b: RnsPoly,
}

impl PublicKey {
    pub fn fingerprint(&self) -> &ContextFingerprint {
        &self.fingerprint
    }
}

/// Ternary secret key. Never serialized.
#[derive(Clone)]
pub struct SecretKey {
    pub(crate) fingerprint: ContextFingerprint,
    pub(crate) s: RnsPoly,
}

impl SecretKey {
    pub fn fingerprint(&self) -> &ContextFingerprint {
        &self.fingerprint
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("fingerprint", &self.fingerprint)
            .field("s", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}
