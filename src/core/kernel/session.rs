use crate::core::classifier::{ErrorClassifier, FailureSignal};
use crate::core::config::Credentials;
use crate::core::errors::ConnectorError;
use crate::core::kernel::channel::{Channel, Dialer};
use crate::core::kernel::correlator::RequestCorrelator;
use crate::core::types::{ConnectionState, ConnectionStrategy, MessageKind, ProtocolMessage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

/// How long teardown waits for the pump to close its channel
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Observable connection state shared by the orchestrator and its sessions
#[derive(Debug, Clone)]
pub struct StateCell(Arc<watch::Sender<ConnectionState>>);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Idle);
        Self(Arc::new(tx))
    }

    pub fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }

    /// Restart the machine for a fresh session
    pub fn begin(&self) {
        self.force(ConnectionState::Connecting);
    }

    /// Overwrite the state without checking the machine; only valid while
    /// no session is live
    pub fn force(&self, next: ConnectionState) {
        let previous = self.0.send_replace(next);
        trace!(from = %previous, to = %next, "state reset");
    }

    /// Apply `next` if the machine allows it; refused transitions are logged
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut refused_from = None;
        let applied = self.0.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                refused_from = Some(*current);
                false
            }
        });

        match refused_from {
            Some(from) if from == next || from.is_terminal() => {
                trace!(%from, to = %next, "state transition ignored");
            }
            Some(from) => warn!(%from, to = %next, "illegal state transition refused"),
            None => debug!(to = %next, "state transition"),
        }
        applied
    }
}

/// One live channel plus its correlator, created per strategy attempt
///
/// A background pump task owns the channel: it writes envelopes queued by
/// the correlator and dispatches inbound ones back to it. When the channel
/// errors or closes, the pump rejects every pending request and moves the
/// session to `Failed`.
pub struct ProtocolSession {
    strategy: ConnectionStrategy,
    correlator: Arc<RequestCorrelator>,
    state: StateCell,
    shutdown: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("strategy", &self.strategy.name)
            .field("state", &self.state.get())
            .field("pending", &self.correlator.pending_count())
            .finish_non_exhaustive()
    }
}

impl ProtocolSession {
    /// Dial `strategy` and start the pump; leaves the state at `Connecting`
    #[instrument(skip_all, fields(strategy = %strategy.name))]
    pub async fn open(
        strategy: ConnectionStrategy,
        credentials: &Credentials,
        dialer: &dyn Dialer,
        state: StateCell,
        request_timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        state.begin();
        let channel = match dialer.dial(&strategy, credentials).await {
            Ok(channel) => channel,
            Err(e) => {
                state.transition(ConnectionState::Failed);
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(RequestCorrelator::new(strategy.name.clone(), outbound_tx));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(
            channel,
            outbound_rx,
            shutdown_rx,
            correlator.clone(),
            state.clone(),
            strategy.name.clone(),
        ));

        debug!("session open");
        Ok(Self {
            strategy,
            correlator,
            state,
            shutdown: Some(shutdown_tx),
            pump: Some(pump),
            request_timeout,
        })
    }

    /// Correlated request using the session's per-request deadline
    pub async fn request(&self, kind: MessageKind, payload: Value) -> Result<Value, ConnectorError> {
        self.correlator
            .request(kind, payload, self.request_timeout)
            .await
    }

    pub fn transition(&self, next: ConnectionState) -> bool {
        self.state.transition(next)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn strategy(&self) -> &ConnectionStrategy {
        &self.strategy
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn is_alive(&self) -> bool {
        !self.correlator.is_closed()
    }

    /// Orderly teardown to `Closed`
    pub async fn close(&mut self) {
        self.teardown(
            ConnectionState::Closed,
            ConnectorError::Transport(format!("session '{}' closed", self.strategy.name)),
        )
        .await;
    }

    /// Teardown to `Failed`; pending requests are rejected with `reason`
    pub async fn fail(&mut self, reason: ConnectorError) {
        self.teardown(ConnectionState::Failed, reason).await;
    }

    #[instrument(skip(self, reason), fields(strategy = %self.strategy.name))]
    async fn teardown(&mut self, target: ConnectionState, reason: ConnectorError) {
        let rejected = self.correlator.close(reason);
        self.state.transition(target);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut pump).await.is_err() {
                warn!("pump did not stop in time, aborting");
                pump.abort();
            }
        }
        debug!(rejected, state = %target, "session torn down");
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            self.correlator.close(ConnectorError::Transport(format!(
                "session '{}' dropped",
                self.strategy.name
            )));
            pump.abort();
            self.state.transition(ConnectionState::Failed);
        }
    }
}

async fn pump(
    mut channel: Box<dyn Channel>,
    mut outbound: mpsc::UnboundedReceiver<ProtocolMessage>,
    mut shutdown: oneshot::Receiver<()>,
    correlator: Arc<RequestCorrelator>,
    state: StateCell,
    label: String,
) {
    let failure = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                if let Err(e) = channel.close().await {
                    debug!(strategy = %label, "error closing channel: {}", e);
                }
                return;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = channel.send(message).await {
                    break e;
                }
            }
            inbound = channel.recv() => match inbound {
                Some(Ok(message)) => {
                    correlator.dispatch(message);
                }
                Some(Err(e)) => break e,
                None => {
                    break ErrorClassifier::classify(FailureSignal::ChannelClosed(format!(
                        "peer closed '{}'",
                        label
                    )));
                }
            }
        }
    };

    let _ = channel.close().await;
    // Teardown already owns the state once the correlator is closed
    if correlator.is_closed() {
        return;
    }
    warn!(strategy = %label, error = %failure, "session channel failed");
    correlator.close(failure);
    state.transition(ConnectionState::Failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorCategory;
    use crate::core::kernel::loopback::{LoopbackDialer, Reply};
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials::new("A1").with_token("tok")
    }

    async fn open(dialer: &LoopbackDialer, state: &StateCell) -> ProtocolSession {
        ProtocolSession::open(
            ConnectionStrategy::primary("wss://primary.test/ws"),
            &credentials(),
            dialer,
            state.clone(),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_state_cell_refuses_illegal() {
        let state = StateCell::new();
        assert!(!state.transition(ConnectionState::Ready));
        assert_eq!(state.get(), ConnectionState::Idle);
        state.begin();
        assert!(state.transition(ConnectionState::Authenticating));
        assert!(state.transition(ConnectionState::Failed));
        assert!(!state.transition(ConnectionState::Closed));
        assert_eq!(state.get(), ConnectionState::Failed);
        state.begin();
        assert_eq!(state.get(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let dialer = LoopbackDialer::new().serve("primary", |req| {
            vec![Reply::to(req, json!({"echo": req.payload["n"].clone()}))]
        });
        let state = StateCell::new();
        let mut session = open(&dialer, &state).await;
        assert_eq!(session.state(), ConnectionState::Connecting);

        let reply = session
            .request(MessageKind::Balance, json!({"n": 3}))
            .await
            .unwrap();
        assert_eq!(reply["echo"], 3);

        session.close().await;
        assert_eq!(state.get(), ConnectionState::Closed);
        assert_eq!(dialer.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_hangup_fails_session_and_rejects_pending() {
        let dialer = LoopbackDialer::new().serve("primary", |req| match req.message_kind() {
            Some(MessageKind::Balance) => vec![Reply::Hangup],
            _ => Vec::new(),
        });
        let state = StateCell::new();
        let session = open(&dialer, &state).await;
        state.transition(ConnectionState::Authenticating);

        let silent = session
            .correlator()
            .send(MessageKind::Authorize, json!({}), Duration::from_secs(60))
            .unwrap();
        let err = session
            .request(MessageKind::Balance, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(silent.wait().await.unwrap_err().category(), ErrorCategory::Transport);

        assert_eq!(session.correlator().pending_count(), 0);
        assert!(!session.is_alive());
        assert_eq!(state.get(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_fail_rejects_pending_with_reason() {
        let dialer = LoopbackDialer::new().serve("primary", |_| Vec::new());
        let state = StateCell::new();
        let mut session = open(&dialer, &state).await;

        let handles: Vec<_> = (0..3)
            .map(|_| {
                session
                    .correlator()
                    .send(MessageKind::Balance, json!({}), Duration::from_secs(60))
                    .unwrap()
            })
            .collect();
        session
            .fail(ConnectorError::Timeout("attempt deadline".to_string()))
            .await;

        for handle in handles {
            assert_eq!(handle.wait().await.unwrap_err().category(), ErrorCategory::Timeout);
        }
        assert_eq!(state.get(), ConnectionState::Failed);
        assert_eq!(dialer.open_channels(), 0);

        let err = session
            .request(MessageKind::Balance, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[tokio::test]
    async fn test_refused_dial_marks_failed() {
        let dialer = LoopbackDialer::new().refuse("primary", "connection refused");
        let state = StateCell::new();
        let err = ProtocolSession::open(
            ConnectionStrategy::primary("wss://primary.test/ws"),
            &credentials(),
            &dialer,
            state.clone(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(state.get(), ConnectionState::Failed);
    }
}
