use crate::core::errors::ConnectorError;
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;

/// Result type for signing operations: (headers, `query_params`)
pub type SignatureResult = Result<(HashMap<String, String>, Vec<(String, String)>), ConnectorError>;

/// Signer trait for request authentication on request/response transports
pub trait Signer: Send + Sync {
    /// Sign a request and return headers and query parameters
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - Endpoint URL
    /// * `body` - Raw request body bytes
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;
}

/// Attaches an opaque bearer token
pub struct BearerSigner {
    token: Secret<String>,
}

impl BearerSigner {
    pub fn new(token: Secret<String>) -> Self {
        Self { token }
    }
}

impl Signer for BearerSigner {
    fn sign_request(
        &self,
        _method: &str,
        _endpoint: &str,
        _body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let token = self.token.expose_secret();
        if token.is_empty() {
            return Err(ConnectorError::Validation(
                "bearer token is empty".to_string(),
            ));
        }

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        headers.insert("X-Request-Timestamp".to_string(), timestamp.to_string());
        Ok((headers, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let signer = BearerSigner::new(Secret::new("tok-1".to_string()));
        let (headers, params) = signer.sign_request("POST", "https://x", b"{}", 42).unwrap();
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer tok-1");
        assert_eq!(headers.get("X-Request-Timestamp").unwrap(), "42");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_token_rejected() {
        let signer = BearerSigner::new(Secret::new(String::new()));
        assert!(signer.sign_request("POST", "https://x", b"", 0).is_err());
    }
}
