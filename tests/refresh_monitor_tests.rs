mod common;

use acctlink::core::kernel::{LoopbackDialer, Reply};
use acctlink::{ConnectionState, ErrorCategory, MessageKind, RefreshMonitor};
use common::*;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod monitor_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_streams_until_session_lost() {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        let dialer = LoopbackDialer::new().serve("primary", move |req| match req.message_kind() {
            Some(MessageKind::Balance) => {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    let balance = 101 + i64::try_from(n).unwrap();
                    vec![Reply::to(
                        req,
                        json!({"balance": balance, "equity": 95, "usedMargin": 10}),
                    )]
                } else {
                    vec![Reply::Hangup]
                }
            }
            _ => account_server(req),
        });
        let orchestrator = Arc::new(orchestrator(&dialer));
        orchestrator.connect(credentials()).await.unwrap();

        let (monitor, mut updates) =
            RefreshMonitor::spawn(orchestrator.clone(), Duration::from_secs(1));

        let first = updates.recv().await.unwrap().unwrap();
        let second = updates.recv().await.unwrap().unwrap();
        assert_eq!(first.balance, Decimal::new(101, 0));
        assert_eq!(second.balance, Decimal::new(102, 0));
        assert!(second.timestamp >= first.timestamp);

        let lost = updates.recv().await.unwrap().unwrap_err();
        assert_eq!(lost.category(), ErrorCategory::Transport);
        let ended = updates.recv().await.unwrap().unwrap_err();
        assert_eq!(ended.category(), ErrorCategory::NotConnected);
        assert!(updates.recv().await.is_none());

        assert!(monitor.is_finished());
        assert_eq!(orchestrator.state(), ConnectionState::Failed);
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_receiver_stops_monitor() {
        let dialer = LoopbackDialer::new().serve("primary", counting_server());
        let orchestrator = Arc::new(orchestrator(&dialer));
        orchestrator.connect(credentials()).await.unwrap();

        let (monitor, mut updates) =
            RefreshMonitor::spawn(orchestrator.clone(), Duration::from_secs(1));
        assert!(updates.recv().await.unwrap().is_ok());
        drop(updates);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(monitor.is_finished());

        let balance_requests = dialer
            .received()
            .into_iter()
            .filter(|(_, m)| m.kind == "balance")
            .count();
        assert!(balance_requests <= 2);
        assert_eq!(orchestrator.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_without_connection_ends_immediately() {
        let dialer = LoopbackDialer::new().serve("primary", account_server);
        let orchestrator = Arc::new(orchestrator(&dialer));

        let (_monitor, mut updates) =
            RefreshMonitor::spawn(orchestrator, Duration::from_secs(1));

        let err = updates.recv().await.unwrap().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotConnected);
        assert!(updates.recv().await.is_none());
        assert!(dialer.dials().is_empty());
    }
}
