//! A self-contained BGV engine over `Z_Q[X]/(X^N + 1)` in RNS representation.
//!
//! An engine is created once from its modulus tables ([`BgvEngine`]); it hands
//! out [`CryptoContext`]s that generate keys, encode, encrypt, decrypt,
//! evaluate and (de)serialize.

pub(crate) mod arith;
pub mod ciphertext;
pub mod context;
pub mod engine;
pub mod error;
pub mod keys;
pub mod ntt;
pub mod params;
pub mod plaintext;
pub(crate) mod poly;
pub(crate) mod sampling;
pub mod serialization;

pub use arith::is_prime;
pub use ciphertext::Ciphertext;
pub use context::{ContextFingerprint, CryptoContext};
pub use engine::{BgvEngine, EngineTables};
pub use error::BgvError;
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use params::{BgvParams, SchemeFeature, SecurityLevel};
pub use plaintext::{Encoding, Plaintext};
pub use serialization::SerialFormat;
