use observability::metrics::METRICS;
use observability::metrics_names::{ERR_SERVER_REJECTION, OP_FETCH_CRYPTO_CONTEXT, OP_REGISTER};
use serde::{Deserialize, Serialize};

use crate::codec::base64_to_bytes;
use crate::error::ProvisioningError;

pub const DEFAULT_API_VERSION: &str = "v0.1.0";
pub const REGISTER_PATH: &str = "register";
pub const CRYPTO_CONTEXT_PATH: &str = "getCryptoContext";
pub const SESSION_ID_HEADER: &str = "X-Session-Id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub public_key: String,
}

/// The server's answer to a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoContextResponse {
    pub crypto_context: String,
}

/// HTTP client of the registration server.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    http: reqwest::Client,
    server_url: String,
    api_version: String,
}

impl RegistrationClient {
    pub fn new(server_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), server_url, api_version)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        server_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            http,
            server_url: server_url.into(),
            api_version: api_version.into(),
        }
    }

    /// `{server_url}/api/{api_version}/{name}`
    pub fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.server_url.trim_end_matches('/'),
            self.api_version,
            name
        )
    }

    /// POSTs the base64 encoded public key and returns the issued session.
    pub async fn register(
        &self,
        public_key_b64: &str,
    ) -> Result<RegistrationResult, ProvisioningError> {
        let url = self.endpoint(REGISTER_PATH);
        tracing::debug!("Registering public key at {url}");
        let request = RegistrationRequest {
            public_key: public_key_b64.to_string(),
        };
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProvisioningError::Network(format!("request to {url} failed: {e}")))?;
        let body = read_success_body(OP_REGISTER, response).await?;
        serde_json::from_str(&body).map_err(|e| {
            ProvisioningError::MalformedResponse(format!("expected a session id: {e}"))
        })
    }

    /// Fetches and decodes the serialized crypto context of a session.
    pub async fn fetch_crypto_context(&self, session_id: &str) -> Result<Vec<u8>, ProvisioningError> {
        let url = self.endpoint(CRYPTO_CONTEXT_PATH);
        tracing::debug!("Fetching crypto context of session {session_id} from {url}");
        let response = self
            .http
            .post(&url)
            .header(SESSION_ID_HEADER, session_id)
            .send()
            .await
            .map_err(|e| ProvisioningError::Network(format!("request to {url} failed: {e}")))?;
        let body = read_success_body(OP_FETCH_CRYPTO_CONTEXT, response).await?;
        let parsed: CryptoContextResponse = serde_json::from_str(&body).map_err(|e| {
            ProvisioningError::MalformedResponse(format!("expected a crypto context: {e}"))
        })?;
        let bytes = base64_to_bytes(&parsed.crypto_context)?;
        tracing::info!(
            "Downloaded crypto context of {} bytes for session {session_id}",
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Reads the body of a 2xx response, or turns any other status into a rejection.
async fn read_success_body(
    operation: &str,
    response: reqwest::Response,
) -> Result<String, ProvisioningError> {
    let status = response.status();
    if status.is_success() {
        return response.text().await.map_err(|e| {
            ProvisioningError::Network(format!("failed to read response body: {e}"))
        });
    }
    let body = response.text().await.unwrap_or_else(|e| {
        tracing::warn!("Failed to read body of rejected request: {e}");
        String::new()
    });
    tracing::error!("Error: {}", status);
    tracing::error!("Response: {}", body);
    if let Err(e) = METRICS.increment_error_counter(operation, ERR_SERVER_REJECTION) {
        tracing::warn!("Failed to count rejected request: {e}");
    }
    Err(ProvisioningError::ServerRejection {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let client = RegistrationClient::new("http://localhost:6969/", DEFAULT_API_VERSION);
        assert_eq!(
            client.endpoint(REGISTER_PATH),
            "http://localhost:6969/api/v0.1.0/register"
        );
        assert_eq!(
            client.endpoint(CRYPTO_CONTEXT_PATH),
            "http://localhost:6969/api/v0.1.0/getCryptoContext"
        );
    }

    #[test]
    fn test_wire_format() {
        let request = RegistrationRequest {
            public_key: "AAAA".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"publicKey":"AAAA"}"#
        );
        let result: RegistrationResult =
            serde_json::from_str(r#"{"sessionId":"abc123","extra":1}"#).unwrap();
        assert_eq!(result.session_id, "abc123");
    }

    /// Answers one connection with `head`, a body shorter than announced, then hangs up.
    async fn truncated_response_server(head: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!("{head}\r\nContent-Length: 100\r\n\r\nshort");
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_rejection_keeps_status_when_body_is_lost() {
        let url = truncated_response_server("HTTP/1.1 503 Service Unavailable").await;
        let client = RegistrationClient::new(url, DEFAULT_API_VERSION);
        match client.register("AAAA").await {
            Err(ProvisioningError::ServerRejection { status, body }) => {
                assert_eq!(status, 503);
                assert!(body.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_success_body_is_a_network_error() {
        let url = truncated_response_server("HTTP/1.1 200 OK").await;
        let client = RegistrationClient::new(url, DEFAULT_API_VERSION);
        assert!(matches!(
            client.register("AAAA").await,
            Err(ProvisioningError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // port 9 (discard) on localhost is not expected to accept HTTP
        let client = RegistrationClient::new("http://127.0.0.1:9", DEFAULT_API_VERSION);
        assert!(matches!(
            client.register("AAAA").await,
            Err(ProvisioningError::Network(_))
        ));
    }
}
