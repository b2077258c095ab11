#![allow(dead_code)]

use acctlink::core::kernel::{LoopbackDialer, Reply};
use acctlink::{
    ConnectionOrchestrator, ConnectionStrategy, ConnectorBuilder, Credentials, MessageKind,
    ProtocolMessage, WsEndpoint,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);

pub fn credentials() -> Credentials {
    Credentials::new("A1").with_token("test-token")
}

pub fn summary() -> Value {
    json!({"balance": 100, "equity": 95, "usedMargin": 10, "freeMargin": 85})
}

/// Full discovery path: authorize without summary, list with `A1 -> int-1`,
/// settings and balance answered with [`summary`]
pub fn account_server(req: &ProtocolMessage) -> Vec<Reply> {
    match req.message_kind() {
        Some(MessageKind::Authorize) => vec![Reply::to(req, json!({"account": "A1"}))],
        Some(MessageKind::AccountList) => vec![Reply::to(
            req,
            json!({"accounts": [
                {"account": "A1", "id": "int-1", "currency": "USD"},
                {"account": "SUB-2", "id": "int-2", "currency": "EUR"}
            ]}),
        )],
        Some(MessageKind::AccountSettings | MessageKind::Balance) => {
            vec![Reply::to(req, summary())]
        }
        _ => vec![Reply::error(req, "InvalidRequest", "unsupported")],
    }
}

/// Like [`account_server`] but every `balance` reply grows the balance by one
pub fn counting_server() -> impl Fn(&ProtocolMessage) -> Vec<Reply> + Send + Sync + 'static {
    let balance = Arc::new(AtomicI64::new(100));
    move |req: &ProtocolMessage| match req.message_kind() {
        Some(MessageKind::Balance) => {
            let next = balance.fetch_add(1, Ordering::SeqCst) + 1;
            vec![Reply::to(
                req,
                json!({"balance": next, "equity": 95, "usedMargin": 10}),
            )]
        }
        _ => account_server(req),
    }
}

/// Answers `authorize` and ignores everything after it
pub fn mute_after_authorize(req: &ProtocolMessage) -> Vec<Reply> {
    match req.message_kind() {
        Some(MessageKind::Authorize) => vec![Reply::to(req, json!({}))],
        _ => Vec::new(),
    }
}

pub fn strategies() -> Vec<ConnectionStrategy> {
    vec![
        ConnectionStrategy::primary("wss://primary.test/ws").with_position(0),
        ConnectionStrategy::alternate(
            WsEndpoint::new("wss://alternate.test/ws").with_param("app_id", "1089"),
        )
        .with_position(1),
        ConnectionStrategy::secondary("https://secondary.test/rpc").with_position(2),
    ]
}

pub fn builder(dialer: &LoopbackDialer) -> ConnectorBuilder {
    ConnectorBuilder::new()
        .with_primary("wss://primary.test/ws")
        .with_alternate(WsEndpoint::new("wss://alternate.test/ws").with_param("app_id", "1089"))
        .with_secondary("https://secondary.test/rpc")
        .with_request_timeout(REQUEST_TIMEOUT)
        .with_attempt_timeout(ATTEMPT_TIMEOUT)
        .with_dialer(Arc::new(dialer.clone()))
}

pub fn orchestrator(dialer: &LoopbackDialer) -> ConnectionOrchestrator {
    builder(dialer).build().expect("valid test configuration")
}

/// Kinds the scripted servers received, in order
pub fn received_kinds(dialer: &LoopbackDialer) -> Vec<(String, String)> {
    dialer
        .received()
        .into_iter()
        .map(|(strategy, message)| (strategy, message.kind))
        .collect()
}
