use thiserror::Error;

use crate::params::SchemeFeature;

#[derive(Error, Debug)]
pub enum BgvError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("scheme feature {0} is not enabled on this crypto context")]
    FeatureNotEnabled(SchemeFeature),
    #[error("object was created under a different crypto context: {0}")]
    ContextMismatch(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("crypto failure: {0}")]
    CryptoFailure(String),
}

impl From<bincode::error::EncodeError> for BgvError {
    fn from(e: bincode::error::EncodeError) -> Self {
        BgvError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for BgvError {
    fn from(e: bincode::error::DecodeError) -> Self {
        BgvError::Deserialization(e.to_string())
    }
}
