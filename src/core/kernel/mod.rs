/// `acctlink` Kernel - transport and correlation layer
///
/// The kernel knows nothing about accounts. It moves `ProtocolMessage`
/// envelopes over a channel and matches replies to requests.
///
/// # Architecture
///
/// ## Transport Layer
/// - `Channel`: one open duplex pipe for envelopes
/// - `Dialer`: opens a `Channel` for a `ConnectionStrategy`
/// - `TungsteniteChannel`: WebSocket transport (primary and alternate strategies)
/// - `HttpChannel`: request/response transport (secondary strategy)
/// - `LoopbackDialer`: in-memory scripted transport
///
/// ## Authentication
/// - `Signer`: pluggable request authentication for HTTP
/// - `BearerSigner`: opaque bearer token
///
/// ## Message Handling
/// - `EnvelopeCodec`: frame <-> envelope conversion
/// - `RequestCorrelator`: numeric request ids, deadlines, settlement
/// - `ProtocolSession`: channel + correlator + state machine
///
/// # Usage
///
/// ```rust,no_run
/// use acctlink::core::config::Credentials;
/// use acctlink::core::kernel::{LoopbackDialer, ProtocolSession, Reply, StateCell};
/// use acctlink::core::types::{ConnectionStrategy, MessageKind};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), acctlink::ConnectorError> {
/// let dialer = LoopbackDialer::new()
///     .serve("primary", |req| vec![Reply::to(req, json!({"balance": 1}))]);
/// let mut session = ProtocolSession::open(
///     ConnectionStrategy::primary("wss://example.invalid/ws"),
///     &Credentials::new("A1").with_token("token"),
///     &dialer,
///     StateCell::new(),
///     Duration::from_secs(5),
/// )
/// .await?;
/// let reply = session.request(MessageKind::Balance, json!({})).await?;
/// session.close().await;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
pub mod channel;
pub mod codec;
pub mod correlator;
pub mod loopback;
pub mod rest;
pub mod session;
pub mod signer;
pub mod ws;

// Re-export key types for convenience
pub use channel::{Channel, Dialer};
pub use codec::{EnvelopeCodec, JsonEnvelopeCodec};
pub use correlator::{CorrelatorStats, RequestCorrelator, ResponseHandle};
pub use loopback::{LoopbackChannel, LoopbackDialer, Reply, Responder};
pub use rest::{HttpChannel, HttpChannelBuilder, HttpChannelConfig};
pub use session::{ProtocolSession, StateCell};
pub use signer::{BearerSigner, SignatureResult, Signer};
pub use ws::{ChannelStats, TungsteniteChannel, WsConfig};
