use bgv_fhe::BgvError;
use observability::metrics_names::{
    ERR_CRYPTO, ERR_ENCODING, ERR_ENGINE_LOAD, ERR_IN_PROGRESS, ERR_MALFORMED_RESPONSE,
    ERR_NETWORK, ERR_SERVER_REJECTION,
};
use thiserror::Error;

/// Every way a provisioning run can fail. Errors are reported as-is to the
/// caller; nothing is retried.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("failed to load the encryption engine: {0}")]
    EngineLoad(String),
    #[error(transparent)]
    CryptoOperation(#[from] BgvError),
    #[error("network error: {0}")]
    Network(String),
    #[error("Registration failed ({status}): {body}")]
    ServerRejection { status: u16, body: String },
    #[error("malformed server response: {0}")]
    MalformedResponse(String),
    #[error("invalid base64 input: {0}")]
    Encoding(String),
    #[error("a provisioning run is already in progress")]
    InProgress,
}

impl ProvisioningError {
    /// Value of the `error` tag when counting this error.
    pub fn metric_tag(&self) -> &'static str {
        match self {
            ProvisioningError::EngineLoad(_) => ERR_ENGINE_LOAD,
            ProvisioningError::CryptoOperation(_) => ERR_CRYPTO,
            ProvisioningError::Network(_) => ERR_NETWORK,
            ProvisioningError::ServerRejection { .. } => ERR_SERVER_REJECTION,
            ProvisioningError::MalformedResponse(_) => ERR_MALFORMED_RESPONSE,
            ProvisioningError::Encoding(_) => ERR_ENCODING,
            ProvisioningError::InProgress => ERR_IN_PROGRESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message() {
        let err = ProvisioningError::ServerRejection {
            status: 500,
            body: "server error".to_string(),
        };
        assert_eq!(err.to_string(), "Registration failed (500): server error");
        assert_eq!(err.metric_tag(), ERR_SERVER_REJECTION);
    }

    #[test]
    fn test_crypto_error_is_wrapped() {
        let err: ProvisioningError = BgvError::CryptoFailure("boom".to_string()).into();
        assert!(matches!(
            err,
            ProvisioningError::CryptoOperation(BgvError::CryptoFailure(_))
        ));
        assert_eq!(err.to_string(), "crypto failure: boom");
    }
}
