use crate::core::errors::ConnectorError;
use crate::core::traits::AccountTelemetry;
use crate::core::types::AccountSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Refresh results delivered by a [`RefreshMonitor`]
pub type RefreshStream = mpsc::Receiver<Result<AccountSnapshot, ConnectorError>>;

const STREAM_CAPACITY: usize = 64;

/// Periodically refreshes a telemetry source in the background
///
/// Ticks that find the source busy are skipped. The monitor ends after
/// delivering `NotConnected`, when the receiver is dropped, or on `stop`.
#[derive(Debug)]
pub struct RefreshMonitor {
    handle: Option<JoinHandle<()>>,
}

impl RefreshMonitor {
    pub fn spawn<T>(source: Arc<T>, every: Duration) -> (Self, RefreshStream)
    where
        T: AccountTelemetry + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let every = every.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; connect just produced a snapshot
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = source.refresh().await;
                if matches!(outcome, Err(ConnectorError::Busy)) {
                    trace!("source busy, skipping tick");
                    continue;
                }
                let last = matches!(outcome, Err(ConnectorError::NotConnected));
                if tx.send(outcome).await.is_err() || last {
                    break;
                }
            }
            debug!("refresh monitor stopped");
        });

        (
            Self {
                handle: Some(handle),
            },
            rx,
        )
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for RefreshMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
