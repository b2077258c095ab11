//! In-memory transport with a scripted responder.
//!
//! Routes are keyed by strategy name. Each route either serves envelopes
//! through a responder closure, refuses to open, or stalls forever while
//! opening. The dialer tracks how many channels are open at once.

use crate::core::config::Credentials;
use crate::core::errors::ConnectorError;
use crate::core::kernel::channel::{Channel, Dialer};
use crate::core::types::{ConnectionStrategy, ProtocolMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// What the scripted server does in answer to one inbound envelope
#[derive(Debug, Clone)]
pub enum Reply {
    Now(ProtocolMessage),
    After(Duration, ProtocolMessage),
    /// Drop the connection
    Hangup,
}

impl Reply {
    /// Answer `request` with the same kind and id
    pub fn to(request: &ProtocolMessage, payload: Value) -> Self {
        Self::Now(ProtocolMessage::reply(
            request.kind.clone(),
            request.request_id,
            payload,
        ))
    }

    pub fn error(request: &ProtocolMessage, code: &str, message: &str) -> Self {
        Self::Now(ProtocolMessage::error(request.request_id, code, message))
    }

    pub fn delayed(self, delay: Duration) -> Self {
        match self {
            Self::Now(message) | Self::After(_, message) => Self::After(delay, message),
            Self::Hangup => Self::Hangup,
        }
    }
}

pub type Responder = Arc<dyn Fn(&ProtocolMessage) -> Vec<Reply> + Send + Sync>;

#[derive(Clone)]
enum Route {
    Serve(Responder),
    Refuse(String),
    Stall,
}

#[derive(Default)]
struct Tracker {
    open: AtomicUsize,
    peak: AtomicUsize,
    dials: Mutex<Vec<String>>,
    received: Mutex<Vec<(String, ProtocolMessage)>>,
}

impl Tracker {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn released(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Dialer serving strategies from in-process scripts
#[derive(Clone, Default)]
pub struct LoopbackDialer {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    tracker: Arc<Tracker>,
}

impl LoopbackDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve strategy `name` with `responder`
    pub fn serve<F>(self, name: &str, responder: F) -> Self
    where
        F: Fn(&ProtocolMessage) -> Vec<Reply> + Send + Sync + 'static,
    {
        self.route(name, Route::Serve(Arc::new(responder)))
    }

    /// Opening strategy `name` fails with a transport error
    pub fn refuse(self, name: &str, reason: &str) -> Self {
        self.route(name, Route::Refuse(reason.to_string()))
    }

    /// Opening strategy `name` never completes
    pub fn stall(self, name: &str) -> Self {
        self.route(name, Route::Stall)
    }

    fn route(self, name: &str, route: Route) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), route);
        self
    }

    /// Strategy names in the order they were dialed
    pub fn dials(&self) -> Vec<String> {
        self.tracker
            .dials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Envelopes the scripted servers received, tagged with the strategy
    pub fn received(&self) -> Vec<(String, ProtocolMessage)> {
        self.tracker
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn open_channels(&self) -> usize {
        self.tracker.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open channels observed
    pub fn peak_open_channels(&self) -> usize {
        self.tracker.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(
        &self,
        strategy: &ConnectionStrategy,
        _credentials: &Credentials,
    ) -> Result<Box<dyn Channel>, ConnectorError> {
        self.tracker
            .dials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(strategy.name.clone());

        let route = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&strategy.name)
            .cloned();

        match route {
            Some(Route::Serve(responder)) => Ok(Box::new(LoopbackChannel::open(
                strategy.name.clone(),
                responder,
                self.tracker.clone(),
            ))),
            Some(Route::Refuse(reason)) => Err(ConnectorError::Transport(format!(
                "failed to open channel: {}",
                reason
            ))),
            Some(Route::Stall) => std::future::pending().await,
            None => Err(ConnectorError::Transport(format!(
                "no loopback route for strategy '{}'",
                strategy.name
            ))),
        }
    }
}

/// Channel whose peer is a responder closure
pub struct LoopbackChannel {
    label: String,
    responder: Responder,
    inbound_tx: Option<mpsc::UnboundedSender<ProtocolMessage>>,
    inbound_rx: mpsc::UnboundedReceiver<ProtocolMessage>,
    tracker: Arc<Tracker>,
    released: bool,
}

impl LoopbackChannel {
    fn open(label: String, responder: Responder, tracker: Arc<Tracker>) -> Self {
        tracker.opened();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            label,
            responder,
            inbound_tx: Some(inbound_tx),
            inbound_rx,
            tracker,
            released: false,
        }
    }

    fn release(&mut self) {
        self.inbound_tx = None;
        if !self.released {
            self.released = true;
            self.tracker.released();
        }
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    async fn send(&mut self, message: ProtocolMessage) -> Result<(), ConnectorError> {
        let Some(tx) = self.inbound_tx.clone() else {
            return Err(ConnectorError::Transport(format!(
                "loopback channel '{}' is closed",
                self.label
            )));
        };

        self.tracker
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((self.label.clone(), message.clone()));

        for reply in (self.responder)(&message) {
            match reply {
                Reply::Now(reply) => {
                    let _ = tx.send(reply);
                }
                Reply::After(delay, reply) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(reply);
                    });
                }
                Reply::Hangup => {
                    debug!(strategy = %self.label, "loopback peer hung up");
                    self.inbound_tx = None;
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ProtocolMessage, ConnectorError>> {
        self.inbound_rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.release();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inbound_tx.is_some()
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.release();
    }
}
