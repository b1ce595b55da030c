use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ProvisioningError;

/// Standard (padded) base64 encoding of `bytes`.
pub fn bytes_to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn base64_to_bytes(text: &str) -> Result<Vec<u8>, ProvisioningError> {
    STANDARD
        .decode(text)
        .map_err(|e| ProvisioningError::Encoding(e.to_string()))
}
