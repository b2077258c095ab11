use crate::connector::orchestrator::ConnectionOrchestrator;
use crate::connector::strategy::NetworkDialer;
use crate::core::config::ConnectorConfig;
use crate::core::errors::ConnectorError;
use crate::core::kernel::{Dialer, WsConfig};
use crate::core::types::{ConnectionStrategy, WsEndpoint};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating connection orchestrators
///
/// Strategies are tried in the order they are added. Without an explicit
/// dialer the orchestrator dials real sockets through [`NetworkDialer`].
#[derive(Default)]
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    dialer: Option<Arc<dyn Dialer>>,
    ws_config: Option<WsConfig>,
    http_timeout_seconds: Option<u64>,
}

impl ConnectorBuilder {
    /// Create a new `ConnectorBuilder` with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration, e.g. one loaded from the environment
    pub fn with_config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_strategy(mut self, strategy: ConnectionStrategy) -> Self {
        self.config = self.config.with_strategy(strategy);
        self
    }

    /// Add a duplex WebSocket strategy named `primary`
    pub fn with_primary(self, url: impl Into<String>) -> Self {
        self.with_strategy(ConnectionStrategy::primary(url))
    }

    /// Add a WebSocket strategy named `alternate` with channel parameters
    pub fn with_alternate(self, endpoint: WsEndpoint) -> Self {
        self.with_strategy(ConnectionStrategy::alternate(endpoint))
    }

    /// Add a request/response strategy named `secondary`
    pub fn with_secondary(self, url: impl Into<String>) -> Self {
        self.with_strategy(ConnectionStrategy::secondary(url))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_attempt_timeout(timeout);
        self
    }

    /// Select a sub-account other than the credentials' own
    pub fn with_target_account(mut self, account: impl Into<String>) -> Self {
        self.config = self.config.with_target_account(account);
        self
    }

    /// Use a custom dialer instead of real sockets
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Set WebSocket connect settings for the network dialer
    pub fn with_ws_config(mut self, config: WsConfig) -> Self {
        self.ws_config = Some(config);
        self
    }

    /// Set HTTP client timeout for the network dialer
    pub fn with_http_timeout(mut self, timeout_seconds: u64) -> Self {
        self.http_timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn build(self) -> Result<ConnectionOrchestrator, ConnectorError> {
        let dialer = match self.dialer {
            Some(dialer) => dialer,
            None => {
                let mut network = NetworkDialer::new();
                if let Some(ws) = self.ws_config {
                    network = network.with_ws_config(ws);
                }
                if let Some(timeout) = self.http_timeout_seconds {
                    network = network.with_http_timeout(timeout);
                }
                Arc::new(network)
            }
        };
        ConnectionOrchestrator::new(self.config, dialer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorCategory;
    use crate::core::kernel::LoopbackDialer;
    use crate::core::types::ConnectionState;

    #[test]
    fn test_strategies_keep_insertion_order() {
        let orchestrator = ConnectorBuilder::new()
            .with_primary("wss://primary.test/ws")
            .with_alternate(WsEndpoint::new("wss://alt.test/ws").with_param("app_id", "1"))
            .with_secondary("https://rpc.test/v1")
            .with_dialer(Arc::new(LoopbackDialer::new()))
            .build()
            .unwrap();

        let names: Vec<_> = orchestrator
            .config()
            .strategies
            .iter()
            .map(|s| (s.name.as_str(), s.position))
            .collect();
        assert_eq!(names, vec![("primary", 0), ("alternate", 1), ("secondary", 2)]);
        assert_eq!(orchestrator.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_build_validates_deadlines() {
        let err = ConnectorBuilder::new()
            .with_primary("wss://primary.test/ws")
            .with_request_timeout(Duration::from_secs(5))
            .with_attempt_timeout(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
}
