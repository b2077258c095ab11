use crate::core::config::Credentials;
use crate::core::errors::ConnectorError;
use crate::core::kernel::{
    BearerSigner, Channel, Dialer, HttpChannelBuilder, HttpChannelConfig, JsonEnvelopeCodec,
    TungsteniteChannel, WsConfig,
};
use crate::core::types::{ConnectionStrategy, TransportConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Dials strategies over real sockets
///
/// Primary and alternate strategies open a WebSocket; the secondary strategy
/// gets an HTTP channel that POSTs each envelope. A bearer token in the
/// credentials is attached to HTTP requests.
#[derive(Debug, Clone)]
pub struct NetworkDialer {
    ws: WsConfig,
    http_timeout_seconds: u64,
    user_agent: Option<String>,
}

impl Default for NetworkDialer {
    fn default() -> Self {
        Self {
            ws: WsConfig::default(),
            http_timeout_seconds: 30,
            user_agent: None,
        }
    }
}

impl NetworkDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ws_config(mut self, config: WsConfig) -> Self {
        self.ws = config;
        self
    }

    pub fn with_http_timeout(mut self, timeout_seconds: u64) -> Self {
        self.http_timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = Some(user_agent);
        self
    }

    fn http_config(&self, url: &str, label: &str) -> HttpChannelConfig {
        let config = HttpChannelConfig::new(url.to_string(), label.to_string())
            .with_timeout(self.http_timeout_seconds);
        match &self.user_agent {
            Some(agent) => config.with_user_agent(agent.clone()),
            None => config,
        }
    }
}

#[async_trait]
impl Dialer for NetworkDialer {
    #[instrument(skip(self, credentials), fields(strategy = %strategy.name, transport = strategy.transport.variant_name()))]
    async fn dial(
        &self,
        strategy: &ConnectionStrategy,
        credentials: &Credentials,
    ) -> Result<Box<dyn Channel>, ConnectorError> {
        match &strategy.transport {
            TransportConfig::Primary(endpoint) | TransportConfig::Alternate(endpoint) => {
                let mut channel = TungsteniteChannel::new(
                    endpoint.connect_url(),
                    strategy.name.clone(),
                    JsonEnvelopeCodec,
                )
                .with_config(self.ws.clone());
                channel.connect().await?;
                Ok(Box::new(channel))
            }
            TransportConfig::Secondary(endpoint) => {
                let mut builder = HttpChannelBuilder::new(self.http_config(&endpoint.url, &strategy.name));
                if let Some(token) = &credentials.token {
                    debug!("attaching bearer token to HTTP channel");
                    builder = builder.with_signer(Arc::new(BearerSigner::new(token.clone())));
                }
                Ok(Box::new(builder.build()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProtocolMessage;

    #[tokio::test]
    async fn test_secondary_dials_without_network() {
        let dialer = NetworkDialer::new().with_http_timeout(5);
        let strategy = ConnectionStrategy::secondary("http://127.0.0.1:9/rpc");
        let mut channel = dialer
            .dial(&strategy, &Credentials::new("A1").with_token("tok"))
            .await
            .unwrap();
        assert!(channel.is_connected());
        channel.close().await.unwrap();
        let msg = ProtocolMessage::reply("balance", Some(1), serde_json::Value::Null);
        assert!(channel.send(msg).await.is_err());
    }

    #[test]
    fn test_http_config_carries_overrides() {
        let dialer = NetworkDialer::new()
            .with_http_timeout(7)
            .with_user_agent("probe/1".to_string());
        let config = dialer.http_config("https://rpc.test", "secondary");
        assert_eq!(config.timeout_seconds, 7);
        assert_eq!(config.user_agent, "probe/1");
        assert_eq!(config.label, "secondary");
    }
}
