use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Envelope kinds spoken by the discovery flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Authorize,
    AccountList,
    AccountSettings,
    Balance,
    Error,
}

impl MessageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::AccountList => "accountList",
            Self::AccountSettings => "accountSettings",
            Self::Balance => "balance",
            Self::Error => "error",
        }
    }

    /// Parse a wire `kind`; unknown kinds yield `None`
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "authorize" => Some(Self::Authorize),
            "accountList" => Some(Self::AccountList),
            "accountSettings" => Some(Self::AccountSettings),
            "balance" => Some(Self::Balance),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-agnostic wire envelope: `{ kind, requestId?, payload }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub payload: Value,
}

impl ProtocolMessage {
    pub fn request(kind: MessageKind, request_id: u64, payload: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            request_id: Some(request_id),
            payload,
        }
    }

    pub fn reply(kind: impl Into<String>, request_id: Option<u64>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            request_id,
            payload,
        }
    }

    /// Build an `error` envelope carrying `{ code, message }`
    pub fn error(request_id: Option<u64>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error.as_str().to_string(),
            request_id,
            payload: json!({ "code": code.into(), "message": message.into() }),
        }
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_wire(&self.kind)
    }
}

/// Duplex WebSocket endpoint. `params` are appended as a query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsEndpoint {
    pub url: String,
    #[serde(default)]
    pub params: Vec<(String, String)>,
}

impl WsEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Full URL including channel parameters
    pub fn connect_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, query)
    }
}

/// Request/response endpoint used by the secondary transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub url: String,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Transport configuration of one strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Primary(WsEndpoint),
    Alternate(WsEndpoint),
    Secondary(HttpEndpoint),
}

impl TransportConfig {
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::Primary(_) => "primary",
            Self::Alternate(_) => "alternate",
            Self::Secondary(_) => "secondary",
        }
    }
}

/// Immutable descriptor of one connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStrategy {
    pub name: String,
    pub position: u32,
    pub transport: TransportConfig,
}

impl ConnectionStrategy {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            position: 0,
            transport,
        }
    }

    pub fn primary(url: impl Into<String>) -> Self {
        Self::new("primary", TransportConfig::Primary(WsEndpoint::new(url)))
    }

    pub fn alternate(endpoint: WsEndpoint) -> Self {
        Self::new("alternate", TransportConfig::Alternate(endpoint))
    }

    pub fn secondary(url: impl Into<String>) -> Self {
        Self::new("secondary", TransportConfig::Secondary(HttpEndpoint::new(url)))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub const fn with_position(mut self, position: u32) -> Self {
        self.position = position;
        self
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Discovering,
    Ready,
    Refreshing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Closed | Self::Failed => true,
            Self::Connecting => matches!(self, Self::Idle),
            Self::Authenticating => matches!(self, Self::Connecting),
            Self::Discovering => matches!(self, Self::Authenticating),
            // Authorize replies may carry the summary directly
            Self::Ready => matches!(
                self,
                Self::Authenticating | Self::Discovering | Self::Refreshing
            ),
            Self::Refreshing => matches!(self, Self::Ready),
            Self::Idle => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Refreshing => "refreshing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Immutable point-in-time read of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub used_margin: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub free_margin: Decimal,
    /// `None` when the server never reported a currency
    pub currency: Option<String>,
    pub source_strategy: String,
    pub timestamp: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Rounding tolerance for `free_margin = equity - used_margin`
    pub const MARGIN_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    pub fn is_consistent(&self) -> bool {
        let non_negative = [
            self.balance,
            self.equity,
            self.used_margin,
            self.free_margin,
        ]
        .iter()
        .all(|v| !v.is_sign_negative() || v.is_zero());

        let drift = self
            .equity
            .checked_sub(self.used_margin)
            .and_then(|derived| self.free_margin.checked_sub(derived));
        non_negative && drift.is_some_and(|d| d.abs() <= Self::MARGIN_TOLERANCE)
    }
}

impl fmt::Display for AccountSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] balance={} equity={} used_margin={} free_margin={}",
            self.account,
            self.currency.as_deref().unwrap_or("?"),
            self.balance,
            self.equity,
            self.used_margin,
            self.free_margin
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_names() {
        let msg = ProtocolMessage::request(MessageKind::AccountList, 7, json!({"account": "A1"}));
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"requestId\":7"));
        assert!(text.contains("\"kind\":\"accountList\""));

        let parsed: ProtocolMessage =
            serde_json::from_str(r#"{"kind":"balance","payload":{"balance":1}}"#).unwrap();
        assert_eq!(parsed.request_id, None);
        assert_eq!(parsed.message_kind(), Some(MessageKind::Balance));
    }

    #[test]
    fn test_unknown_kind_is_none() {
        assert_eq!(MessageKind::from_wire("tick"), None);
    }

    #[test]
    fn test_connect_url_with_params() {
        let endpoint = WsEndpoint::new("wss://alt.example.com/ws")
            .with_param("app_id", "1089")
            .with_param("l", "EN");
        assert_eq!(
            endpoint.connect_url(),
            "wss://alt.example.com/ws?app_id=1089&l=EN"
        );

        let endpoint = WsEndpoint::new("wss://alt.example.com/ws?v=3").with_param("brand", "x");
        assert_eq!(endpoint.connect_url(), "wss://alt.example.com/ws?v=3&brand=x");

        let strategy = ConnectionStrategy::alternate(endpoint).with_name("alternate-eu");
        assert_eq!(strategy.name, "alternate-eu");
        assert_eq!(strategy.transport.variant_name(), "alternate");
    }

    #[test]
    fn test_state_machine_transitions() {
        use ConnectionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Refreshing));
        assert!(Refreshing.can_transition_to(Ready));
        assert!(Discovering.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Ready));
        assert!(!Closed.can_transition_to(Connecting));
        assert!(!Failed.can_transition_to(Closed));
    }

    #[test]
    fn test_snapshot_consistency() {
        let mut snapshot = AccountSnapshot {
            account: "A1".to_string(),
            balance: Decimal::new(100, 0),
            equity: Decimal::new(95, 0),
            used_margin: Decimal::new(10, 0),
            free_margin: Decimal::new(85, 0),
            currency: Some("USD".to_string()),
            source_strategy: "primary".to_string(),
            timestamp: Utc::now(),
        };
        assert!(snapshot.is_consistent());

        snapshot.free_margin = Decimal::new(8501, 2);
        assert!(snapshot.is_consistent());

        snapshot.free_margin = Decimal::new(80, 0);
        assert!(!snapshot.is_consistent());

        snapshot.equity = Decimal::ZERO;
        snapshot.used_margin = Decimal::MAX;
        snapshot.free_margin = Decimal::MAX;
        assert!(!snapshot.is_consistent());
    }

    #[test]
    fn test_snapshot_serializes_with_timestamp() {
        let snapshot = AccountSnapshot {
            account: "A1".to_string(),
            balance: Decimal::new(10050, 2),
            equity: Decimal::new(95, 0),
            used_margin: Decimal::new(10, 0),
            free_margin: Decimal::new(85, 0),
            currency: None,
            source_strategy: "secondary".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["balance"], "100.50");
        assert!(value["timestamp"].is_string());

        let parsed: AccountSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
