use crate::connector::normalize::{has_summary, normalize, SnapshotContext};
use crate::core::config::Credentials;
use crate::core::errors::ConnectorError;
use crate::core::kernel::ProtocolSession;
use crate::core::types::{AccountSnapshot, ConnectionState, MessageKind};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

/// Outcome of a successful discovery
#[derive(Debug, Clone)]
pub struct Discovery {
    pub snapshot: AccountSnapshot,
    /// Server-side id used for later `balance` queries
    pub account_id: String,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListEntry {
    id: String,
    currency: Option<String>,
}

/// Authorize, enumerate, resolve and normalize over one session
pub struct AccountDiscoveryFlow<'a> {
    session: &'a ProtocolSession,
    credentials: &'a Credentials,
    target: &'a str,
}

impl<'a> AccountDiscoveryFlow<'a> {
    pub fn new(session: &'a ProtocolSession, credentials: &'a Credentials, target: &'a str) -> Self {
        Self {
            session,
            credentials,
            target,
        }
    }

    #[instrument(skip(self), fields(strategy = %self.session.strategy().name, target = %self.target))]
    pub async fn run(&self) -> Result<Discovery, ConnectorError> {
        self.session.transition(ConnectionState::Authenticating);
        let authorized = self
            .session
            .request(MessageKind::Authorize, authorize_payload(self.credentials))
            .await?;
        let auth_currency = currency_of(&authorized);

        if has_summary(&authorized) {
            debug!("authorize reply carries the account summary");
            let snapshot = normalize(&authorized, &self.context(auth_currency.as_deref()))?;
            self.session.transition(ConnectionState::Ready);
            return Ok(Discovery {
                snapshot,
                account_id: self.target.to_string(),
                currency: auth_currency,
            });
        }

        self.session.transition(ConnectionState::Discovering);
        let entry = match self
            .session
            .request(MessageKind::AccountList, json!({}))
            .await
        {
            Ok(list) => find_entry(&list, self.target),
            Err(e) => {
                debug!(error = %e, "account list unavailable, resolving target directly");
                None
            }
        };

        let (account_id, currency) = match entry {
            Some(entry) => (entry.id, entry.currency.or(auth_currency)),
            None => (self.target.to_string(), auth_currency),
        };

        let settings = self
            .session
            .request(
                MessageKind::AccountSettings,
                json!({ "account": account_id }),
            )
            .await?;
        let snapshot = normalize(&settings, &self.context(currency.as_deref()))?;
        self.session.transition(ConnectionState::Ready);
        debug!(account_id = %account_id, "discovery complete");

        Ok(Discovery {
            snapshot,
            account_id,
            currency,
        })
    }

    fn context<'c>(&'c self, currency: Option<&'c str>) -> SnapshotContext<'c> {
        SnapshotContext {
            account: self.target,
            strategy: &self.session.strategy().name,
            fallback_currency: currency,
        }
    }
}

fn authorize_payload(credentials: &Credentials) -> Value {
    let mut payload = Map::new();
    payload.insert("account".to_string(), json!(credentials.account));
    if let Some(secret) = credentials.secret() {
        payload.insert("secret".to_string(), json!(secret));
    }
    if let Some(token) = credentials.token() {
        payload.insert("token".to_string(), json!(token));
    }
    if let Some(server) = &credentials.server {
        payload.insert("server".to_string(), json!(server));
    }
    Value::Object(payload)
}

fn currency_of(payload: &Value) -> Option<String> {
    payload
        .get("currency")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Exact match on `account`; `id` falls back to the account name
fn find_entry(list: &Value, target: &str) -> Option<ListEntry> {
    let entries = list
        .get("accounts")
        .and_then(Value::as_array)
        .or_else(|| list.as_array())?;

    entries
        .iter()
        .find(|entry| entry.get("account").and_then(Value::as_str) == Some(target))
        .map(|entry| ListEntry {
            id: entry
                .get("id")
                .and_then(id_of)
                .unwrap_or_else(|| target.to_string()),
            currency: currency_of(entry),
        })
}
