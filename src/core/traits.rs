use crate::core::{
    config::Credentials,
    errors::ConnectorError,
    types::{AccountSnapshot, ConnectionState},
};
use async_trait::async_trait;

/// Read-only account telemetry source
#[async_trait]
pub trait AccountTelemetry: Send + Sync {
    /// Establish a session and return the first snapshot
    async fn connect(&self, credentials: Credentials) -> Result<AccountSnapshot, ConnectorError>;

    /// Re-query the active session without re-authenticating
    async fn refresh(&self) -> Result<AccountSnapshot, ConnectorError>;

    /// Tear down the active session; calling it again is a no-op
    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;
}
