//! Versioned envelopes for every serializable engine object.
//!
//! Binary encodings use bincode v2 with the legacy (v1 compatible)
//! configuration and a size limit on decoding.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::BgvError;

/// Refuse to decode anything bigger than this. A public key with the largest
/// supported ring dimension and chain stays far below it.
pub const DESER_SIZE_LIMIT: usize = 1024 * 1024 * 256;

pub const SERIALIZATION_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
pub enum SerialFormat {
    #[default]
    #[strum(serialize = "binary")]
    Binary,
    #[strum(serialize = "json")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ObjectKind {
    CryptoContext,
    PublicKey,
    Ciphertext,
    EngineTables,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u16,
    kind: ObjectKind,
    payload: T,
}

pub(crate) fn serialize<T: Serialize>(
    kind: ObjectKind,
    payload: &T,
    format: SerialFormat,
) -> Result<Vec<u8>, BgvError> {
    let envelope = Envelope {
        version: SERIALIZATION_VERSION,
        kind,
        payload,
    };
    match format {
        SerialFormat::Binary => Ok(bincode::serde::encode_to_vec(
            &envelope,
            bincode::config::legacy(),
        )?),
        SerialFormat::Json => {
            serde_json::to_vec(&envelope).map_err(|e| BgvError::Serialization(e.to_string()))
        }
    }
}

pub(crate) fn deserialize<T: DeserializeOwned>(
    kind: ObjectKind,
    bytes: &[u8],
    format: SerialFormat,
) -> Result<T, BgvError> {
    let envelope: Envelope<T> = match format {
        SerialFormat::Binary => {
            let (envelope, read) = bincode::serde::decode_from_slice(
                bytes,
                bincode::config::legacy().with_limit::<DESER_SIZE_LIMIT>(),
            )?;
            if read != bytes.len() {
                return Err(BgvError::Deserialization(format!(
                    "{} trailing bytes after {kind}",
                    bytes.len() - read
                )));
            }
            envelope
        }
        SerialFormat::Json => serde_json::from_slice(bytes)
            .map_err(|e| BgvError::Deserialization(e.to_string()))?,
    };
    if envelope.version != SERIALIZATION_VERSION {
        return Err(BgvError::Deserialization(format!(
            "unsupported serialization version {}",
            envelope.version
        )));
    }
    if envelope.kind != kind {
        return Err(BgvError::Deserialization(format!(
            "expected a serialized {kind}, found {}",
            envelope.kind
        )));
    }
    Ok(envelope.payload)
}
