use serde::{Deserialize, Serialize};

use crate::context::ContextFingerprint;
use crate::plaintext::Encoding;
use crate::poly::RnsPoly;

/// BGV ciphertext `(c0, c1)` decrypting as `c0 - c1*s`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub(crate) fingerprint: ContextFingerprint,
    pub(crate) encoding: Encoding,
    pub(crate) c0: RnsPoly,
    pub(crate) c1: RnsPoly,
}

impl Ciphertext {
    pub fn fingerprint(&self) -> &ContextFingerprint {
        &self.fingerprint
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}
