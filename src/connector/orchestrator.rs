use crate::connector::discovery::{AccountDiscoveryFlow, Discovery};
use crate::connector::normalize::{normalize, SnapshotContext};
use crate::core::classifier::{ErrorClassifier, FailureSignal};
use crate::core::config::{ConnectorConfig, Credentials};
use crate::core::errors::{ConnectorError, ErrorCategory, StrategyFailure};
use crate::core::kernel::correlator::deadline_after;
use crate::core::kernel::{Dialer, ProtocolSession, StateCell};
use crate::core::traits::AccountTelemetry;
use crate::core::types::{AccountSnapshot, ConnectionState, ConnectionStrategy, MessageKind};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};

/// The session kept after a successful discovery
struct ActiveSession {
    session: ProtocolSession,
    target: String,
    account_id: String,
    currency: Option<String>,
}

/// Owns the single active session and runs strategies in order
///
/// Only one `connect` or `refresh` runs at a time; a concurrent call is
/// rejected with [`ConnectorError::Busy`]. `disconnect` waits for the call in
/// flight to finish.
pub struct ConnectionOrchestrator {
    config: ConnectorConfig,
    dialer: Arc<dyn Dialer>,
    state: StateCell,
    active: AsyncMutex<Option<ActiveSession>>,
    latest: Mutex<Option<AccountSnapshot>>,
}

impl std::fmt::Debug for ConnectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOrchestrator")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl ConnectionOrchestrator {
    pub fn new(config: ConnectorConfig, dialer: Arc<dyn Dialer>) -> Result<Self, ConnectorError> {
        config.validate()?;
        Ok(Self {
            config,
            dialer,
            state: StateCell::new(),
            active: AsyncMutex::new(None),
            latest: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Connect using the configured strategies
    pub async fn connect(&self, credentials: Credentials) -> Result<AccountSnapshot, ConnectorError> {
        self.connect_with(credentials, self.config.strategies.clone())
            .await
    }

    /// Connect trying `strategies` in ascending position
    #[instrument(skip_all, fields(account = %credentials.account))]
    pub async fn connect_with(
        &self,
        credentials: Credentials,
        mut strategies: Vec<ConnectionStrategy>,
    ) -> Result<AccountSnapshot, ConnectorError> {
        let mut active = self.active.try_lock().map_err(|_| ConnectorError::Busy)?;

        credentials.validate()?;
        if strategies.is_empty() {
            return Err(ConnectorError::Validation(
                "no connection strategies configured".to_string(),
            ));
        }

        if let Some(mut previous) = active.take() {
            debug!(strategy = %previous.session.strategy().name, "replacing active session");
            previous.session.close().await;
        }

        let target = self
            .config
            .target_account
            .clone()
            .unwrap_or_else(|| credentials.account.clone());
        strategies.sort_by_key(|s| s.position);

        let mut failures = Vec::new();
        for strategy in strategies {
            let name = strategy.name.clone();
            match self.attempt(strategy, &credentials, &target).await {
                Ok((session, discovery)) => {
                    info!(strategy = %name, snapshot = %discovery.snapshot, "connected");
                    self.store_snapshot(&discovery.snapshot);
                    let snapshot = discovery.snapshot.clone();
                    *active = Some(ActiveSession {
                        session,
                        target,
                        account_id: discovery.account_id,
                        currency: discovery.currency,
                    });
                    return Ok(snapshot);
                }
                Err(error) => {
                    let verdict = ErrorClassifier::verdict(&error);
                    warn!(
                        strategy = %name,
                        category = %verdict.category,
                        error = %error,
                        "strategy failed"
                    );
                    if verdict.halts {
                        return Err(error);
                    }
                    failures.push(StrategyFailure {
                        strategy: name,
                        error,
                    });
                    if !verdict.retryable {
                        break;
                    }
                }
            }
        }

        Err(ConnectorError::Exhausted(failures))
    }

    /// Open one strategy and run discovery within the attempt deadline
    async fn attempt(
        &self,
        strategy: ConnectionStrategy,
        credentials: &Credentials,
        target: &str,
    ) -> Result<(ProtocolSession, Discovery), ConnectorError> {
        let deadline = deadline_after(self.config.attempt_timeout);
        let elapsed = |what: String| {
            ErrorClassifier::classify(FailureSignal::Elapsed {
                what,
                after: self.config.attempt_timeout,
            })
        };

        let opened = tokio::time::timeout_at(
            deadline,
            ProtocolSession::open(
                strategy.clone(),
                credentials,
                self.dialer.as_ref(),
                self.state.clone(),
                self.config.request_timeout,
            ),
        )
        .await;
        let mut session = match opened {
            Ok(session) => session?,
            Err(_) => {
                self.state.transition(ConnectionState::Failed);
                return Err(elapsed(format!("opening strategy '{}'", strategy.name)));
            }
        };

        let outcome = tokio::time::timeout_at(
            deadline,
            AccountDiscoveryFlow::new(&session, credentials, target).run(),
        )
        .await
        .unwrap_or_else(|_| Err(elapsed(format!("discovery over '{}'", strategy.name))));

        match outcome {
            Ok(discovery) => Ok((session, discovery)),
            Err(error) => {
                session.fail(error.clone()).await;
                Err(error)
            }
        }
    }

    /// Re-query the active session for a fresh snapshot
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<AccountSnapshot, ConnectorError> {
        let mut guard = self.active.try_lock().map_err(|_| ConnectorError::Busy)?;

        let outcome = {
            let Some(active) = guard.as_ref() else {
                return Err(ConnectorError::NotConnected);
            };
            if active.session.is_alive() {
                active.session.transition(ConnectionState::Refreshing);
                let payload = active
                    .session
                    .request(MessageKind::Balance, json!({ "account": active.account_id }))
                    .await;
                Some(payload.and_then(|payload| {
                    normalize(
                        &payload,
                        &SnapshotContext {
                            account: &active.target,
                            strategy: &active.session.strategy().name,
                            fallback_currency: active.currency.as_deref(),
                        },
                    )
                }))
            } else {
                None
            }
        };

        match outcome {
            None => {
                // The channel died since the last call
                warn!("active session was lost");
                if let Some(mut lost) = guard.take() {
                    lost.session.close().await;
                }
                Err(ConnectorError::NotConnected)
            }
            Some(Ok(snapshot)) => {
                if let Some(active) = guard.as_ref() {
                    active.session.transition(ConnectionState::Ready);
                }
                debug!(snapshot = %snapshot, "refreshed");
                self.store_snapshot(&snapshot);
                Ok(snapshot)
            }
            Some(Err(error)) => {
                match error.category() {
                    ErrorCategory::Transport | ErrorCategory::Authentication => {
                        warn!(error = %error, "refresh failed, tearing down session");
                        if let Some(mut failed) = guard.take() {
                            failed.session.fail(error.clone()).await;
                        }
                    }
                    _ => {
                        warn!(error = %error, "refresh failed, session kept");
                        if let Some(active) = guard.as_ref() {
                            active.session.transition(ConnectionState::Ready);
                        }
                    }
                }
                Err(error)
            }
        }
    }

    /// Tear down the active session; safe to call repeatedly
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let mut guard = self.active.lock().await;
        if let Some(mut active) = guard.take() {
            active.session.close().await;
            info!(strategy = %active.session.strategy().name, "disconnected");
        }
        self.state.force(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn latest_snapshot(&self) -> Option<AccountSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state.get(),
            ConnectionState::Ready | ConnectionState::Refreshing
        )
    }

    fn store_snapshot(&self, snapshot: &AccountSnapshot) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
    }
}

#[async_trait]
impl AccountTelemetry for ConnectionOrchestrator {
    async fn connect(&self, credentials: Credentials) -> Result<AccountSnapshot, ConnectorError> {
        Self::connect(self, credentials).await
    }

    async fn refresh(&self) -> Result<AccountSnapshot, ConnectorError> {
        Self::refresh(self).await
    }

    async fn disconnect(&self) {
        Self::disconnect(self).await;
    }

    fn state(&self) -> ConnectionState {
        Self::state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::LoopbackDialer;
    use std::time::Duration;

    #[test]
    fn test_rejects_inverted_deadlines() {
        let config = ConnectorConfig::default()
            .with_strategy(ConnectionStrategy::primary("wss://primary.test/ws"))
            .with_request_timeout(Duration::from_secs(30))
            .with_attempt_timeout(Duration::from_secs(10));
        let err = ConnectionOrchestrator::new(config, Arc::new(LoopbackDialer::new())).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_no_strategies_is_validation() {
        let dialer = LoopbackDialer::new();
        let orchestrator =
            ConnectionOrchestrator::new(ConnectorConfig::default(), Arc::new(dialer.clone())).unwrap();
        let err = orchestrator
            .connect(Credentials::new("A1").with_token("tok"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(dialer.dials().is_empty());
        assert_eq!(orchestrator.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_closed() {
        let orchestrator = ConnectionOrchestrator::new(
            ConnectorConfig::default(),
            Arc::new(LoopbackDialer::new()),
        )
        .unwrap();
        orchestrator.disconnect().await;
        orchestrator.disconnect().await;
        assert_eq!(orchestrator.state(), ConnectionState::Closed);
        assert!(!orchestrator.is_connected());
    }
}
