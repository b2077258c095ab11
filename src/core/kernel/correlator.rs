use crate::core::classifier::{ErrorClassifier, FailureSignal};
use crate::core::errors::ConnectorError;
use crate::core::types::{MessageKind, ProtocolMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

type Settlement = Result<Value, ConnectorError>;

struct PendingRequest {
    expected: MessageKind,
    timeout: Duration,
    reply: oneshot::Sender<Settlement>,
    timer: JoinHandle<()>,
}

impl PendingRequest {
    fn settle(self, outcome: Settlement) {
        self.timer.abort();
        // The caller may have dropped its handle; settlement still counts
        let _ = self.reply.send(outcome);
    }
}

#[derive(Default)]
struct Table {
    pending: HashMap<u64, PendingRequest>,
    closed: Option<ConnectorError>,
}

/// Correlator counters
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    pub sent: AtomicU64,
    pub settled: AtomicU64,
    pub timed_out: AtomicU64,
    pub unmatched: AtomicU64,
}

/// Awaitable reply to one correlated request
#[derive(Debug)]
pub struct ResponseHandle {
    request_id: u64,
    kind: MessageKind,
    rx: oneshot::Receiver<Settlement>,
}

impl ResponseHandle {
    pub const fn request_id(&self) -> u64 {
        self.request_id
    }

    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    pub async fn wait(self) -> Result<Value, ConnectorError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectorError::Transport(format!(
                "{} request {} dropped without a reply",
                self.kind, self.request_id
            ))),
        }
    }
}

/// Tracks in-flight requests of one session by numeric id
///
/// Ids start at 1 and only grow. Every registered request is settled
/// exactly once: by its reply, by an `error` envelope, by its own deadline,
/// or by [`RequestCorrelator::close`].
pub struct RequestCorrelator {
    label: String,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<ProtocolMessage>,
    table: Mutex<Table>,
    stats: CorrelatorStats,
}

impl RequestCorrelator {
    pub fn new(label: impl Into<String>, outbound: mpsc::UnboundedSender<ProtocolMessage>) -> Self {
        Self {
            label: label.into(),
            next_id: AtomicU64::new(1),
            outbound,
            table: Mutex::new(Table::default()),
            stats: CorrelatorStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register and transmit a request
    pub fn send(
        self: &Arc<Self>,
        kind: MessageKind,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResponseHandle, ConnectorError> {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut table = self.lock();
            if let Some(reason) = &table.closed {
                return Err(ConnectorError::Transport(format!(
                    "session '{}' is closed: {}",
                    self.label, reason
                )));
            }

            let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let deadline = deadline_after(timeout);
            // Timer is spawned under the lock, so it cannot expire an entry
            // that has not been inserted yet
            let timer = spawn_timer(Arc::downgrade(self), request_id, deadline);
            table.pending.insert(
                request_id,
                PendingRequest {
                    expected: kind,
                    timeout,
                    reply: tx,
                    timer,
                },
            );
            request_id
        };

        let envelope = ProtocolMessage::request(kind, request_id, payload);
        if self.outbound.send(envelope).is_err() {
            let error = ConnectorError::Transport(format!(
                "session '{}' is no longer sending",
                self.label
            ));
            if let Some(entry) = self.lock().pending.remove(&request_id) {
                entry.settle(Err(error.clone()));
            }
            return Err(error);
        }

        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        trace!(strategy = %self.label, request_id, %kind, "request sent");
        Ok(ResponseHandle {
            request_id,
            kind,
            rx,
        })
    }

    /// `send` and wait for the settlement
    pub async fn request(
        self: &Arc<Self>,
        kind: MessageKind,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, ConnectorError> {
        self.send(kind, payload, timeout)?.wait().await
    }

    /// Route one inbound envelope; returns whether it settled a request
    pub fn dispatch(&self, message: ProtocolMessage) -> bool {
        let kind = message.message_kind();
        let entry = {
            let mut table = self.lock();
            match message.request_id {
                Some(id) => table.pending.remove(&id).map(|entry| (id, entry)),
                None => {
                    // Unsolicited replies go to the oldest request expecting the kind
                    let oldest = table
                        .pending
                        .iter()
                        .filter(|(_, pending)| Some(pending.expected) == kind)
                        .map(|(id, _)| *id)
                        .min();
                    oldest.and_then(|id| table.pending.remove(&id).map(|entry| (id, entry)))
                }
            }
        };

        let Some((request_id, entry)) = entry else {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                strategy = %self.label,
                kind = %message.kind,
                request_id = ?message.request_id,
                "discarding unmatched message"
            );
            return false;
        };

        let outcome = match kind {
            Some(MessageKind::Error) => Err(ErrorClassifier::remote(&message.payload)),
            Some(k) if k == entry.expected => Ok(message.payload),
            _ => Err(ErrorClassifier::classify(FailureSignal::Malformed(format!(
                "expected {} reply for request {}, got '{}'",
                entry.expected, request_id, message.kind
            )))),
        };
        debug!(strategy = %self.label, request_id, ok = outcome.is_ok(), "request settled");
        entry.settle(outcome);
        self.stats.settled.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn expire(&self, request_id: u64) {
        let Some(entry) = self.lock().pending.remove(&request_id) else {
            return;
        };
        warn!(
            strategy = %self.label,
            request_id,
            kind = %entry.expected,
            "request deadline elapsed"
        );
        let error = ErrorClassifier::classify(FailureSignal::Elapsed {
            what: format!("{} request {}", entry.expected, request_id),
            after: entry.timeout,
        });
        entry.settle(Err(error));
        self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
        self.stats.settled.fetch_add(1, Ordering::Relaxed);
    }

    /// Reject every pending request with `reason` and refuse new ones.
    /// Returns the number of requests rejected.
    pub fn close(&self, reason: ConnectorError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.clone());
            }
            table.pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            entry.settle(Err(reason.clone()));
        }
        if count > 0 {
            debug!(strategy = %self.label, count, "rejected pending requests on close");
        }
        self.stats
            .settled
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn stats(&self) -> &CorrelatorStats {
        &self.stats
    }
}

/// `now + timeout`, saturating at a far-future instant
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn spawn_timer(correlator: Weak<RequestCorrelator>, request_id: u64, deadline: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if let Some(correlator) = correlator.upgrade() {
            correlator.expire(request_id);
        }
    })
}
