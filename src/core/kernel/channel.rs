use crate::core::config::Credentials;
use crate::core::errors::ConnectorError;
use crate::core::types::{ConnectionStrategy, ProtocolMessage};
use async_trait::async_trait;

/// One open transport carrying envelopes in both directions
///
/// `recv` must be cancel-safe: the session pump polls it inside `select!`.
#[async_trait]
pub trait Channel: Send {
    /// Transmit one envelope
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), ConnectorError>;

    /// Next inbound envelope; `None` once the channel is closed
    async fn recv(&mut self) -> Option<Result<ProtocolMessage, ConnectorError>>;

    /// Close the channel
    async fn close(&mut self) -> Result<(), ConnectorError>;

    fn is_connected(&self) -> bool;
}

/// Opens a channel for a strategy's transport configuration
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        strategy: &ConnectionStrategy,
        credentials: &Credentials,
    ) -> Result<Box<dyn Channel>, ConnectorError>;
}
