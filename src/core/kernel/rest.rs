use crate::core::classifier::HTTP_CODE_PREFIX;
use crate::core::errors::ConnectorError;
use crate::core::kernel::channel::Channel;
use crate::core::kernel::signer::Signer;
use crate::core::types::ProtocolMessage;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{instrument, trace};

/// Configuration for the request/response channel
#[derive(Clone, Debug)]
pub struct HttpChannelConfig {
    /// URL every envelope is POSTed to
    pub endpoint: String,
    /// Strategy name for logging and tracing
    pub label: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl HttpChannelConfig {
    pub fn new(endpoint: String, label: String) -> Self {
        Self {
            endpoint,
            label,
            timeout_seconds: 30,
            user_agent: "acctlink/0.1".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating HTTP channel instances
pub struct HttpChannelBuilder {
    config: HttpChannelConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl HttpChannelBuilder {
    pub fn new(config: HttpChannelConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<HttpChannel, ConnectorError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| {
                ConnectorError::Transport(format!("Failed to build HTTP client: {}", e))
            })?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(HttpChannel {
            client,
            config: self.config,
            signer: self.signer,
            inbound_tx: Some(inbound_tx),
            inbound_rx,
        })
    }
}

/// Secondary transport: each envelope is one POST, the reply envelope is
/// queued as inbound traffic.
pub struct HttpChannel {
    client: Client,
    config: HttpChannelConfig,
    signer: Option<Arc<dyn Signer>>,
    inbound_tx: Option<mpsc::UnboundedSender<ProtocolMessage>>,
    inbound_rx: mpsc::UnboundedReceiver<ProtocolMessage>,
}

impl std::fmt::Debug for HttpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChannel")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpChannel {
    /// Get the current timestamp in milliseconds
    fn get_timestamp() -> Result<u64, ConnectorError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .map_err(|e| ConnectorError::Transport(format!("Failed to get timestamp: {}", e)))
    }

    #[instrument(skip(self, message), fields(strategy = %self.config.label, kind = %message.kind))]
    async fn exchange(&self, message: &ProtocolMessage) -> Result<ProtocolMessage, ConnectorError> {
        let body = serde_json::to_vec(message).map_err(|e| {
            ConnectorError::MalformedResponse(format!("Failed to serialize envelope: {}", e))
        })?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json");

        if let Some(signer) = &self.signer {
            let (headers, params) =
                signer.sign_request("POST", &self.config.endpoint, &body, Self::get_timestamp()?)?;
            for (key, value) in headers {
                request = request.header(&key, &value);
            }
            for (key, value) in params {
                request = request.query(&[(key, value)]);
            }
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ConnectorError::Transport(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if status.is_success() {
            parse_reply(&response_text, message.request_id)
        } else {
            Ok(status_envelope(
                message.request_id,
                status.as_u16(),
                &response_text,
            ))
        }
    }
}

/// Decode a reply body; HTTP is inherently correlated, so a missing
/// `requestId` is taken from the request.
pub fn parse_reply(body: &str, request_id: Option<u64>) -> Result<ProtocolMessage, ConnectorError> {
    let mut reply: ProtocolMessage = serde_json::from_str(body).map_err(|e| {
        ConnectorError::MalformedResponse(format!("Failed to parse JSON response: {}", e))
    })?;
    if reply.request_id.is_none() {
        reply.request_id = request_id;
    }
    Ok(reply)
}

/// Non-2xx statuses become `error` envelopes for the originating request
pub fn status_envelope(request_id: Option<u64>, status: u16, body: &str) -> ProtocolMessage {
    let message = if body.is_empty() {
        format!("HTTP status {}", status)
    } else {
        body.to_string()
    };
    ProtocolMessage::error(request_id, format!("{}{}", HTTP_CODE_PREFIX, status), message)
}

#[async_trait]
impl Channel for HttpChannel {
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), ConnectorError> {
        if self.inbound_tx.is_none() {
            return Err(ConnectorError::Transport(
                "HTTP channel closed".to_string(),
            ));
        }
        let reply = self.exchange(&message).await?;
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(reply);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ProtocolMessage, ConnectorError>> {
        self.inbound_rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.inbound_tx = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inbound_tx.is_some()
    }
}
