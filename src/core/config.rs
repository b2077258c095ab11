use crate::core::errors::ConnectorError;
use crate::core::types::{ConnectionStrategy, WsEndpoint};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

/// Identity bundle for the remote account
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Target account identifier
    pub account: String,
    pub secret: Option<Secret<String>>,
    /// Routing/server designator
    pub server: Option<String>,
    /// Optional bearer token
    pub token: Option<Secret<String>>,
}

// Never expose secrets in serialization
impl Serialize for Credentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credentials", 4)?;
        state.serialize_field("account", &self.account)?;
        state.serialize_field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))?;
        state.serialize_field("server", &self.server)?;
        state.serialize_field("token", &self.token.as_ref().map(|_| "[REDACTED]"))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialsHelper {
            account: String,
            secret: Option<String>,
            server: Option<String>,
            token: Option<String>,
        }

        let helper = CredentialsHelper::deserialize(deserializer)?;
        Ok(Self {
            account: helper.account,
            secret: helper.secret.map(Secret::new),
            server: helper.server,
            token: helper.token.map(Secret::new),
        })
    }
}

impl Credentials {
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: None,
            server: None,
            token: None,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(Secret::new(secret.into()));
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Secret::new(token.into()));
        self
    }

    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Create credentials from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_ACCOUNT` (required)
    /// - `{PREFIX}_SECRET` and/or `{PREFIX}_TOKEN`
    /// - `{PREFIX}_SERVER` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let account_var = format!("{}_ACCOUNT", prefix);
        let account = env::var(&account_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(account_var))?;

        Ok(Self {
            account,
            secret: non_empty_var(&format!("{}_SECRET", prefix)).map(Secret::new),
            server: non_empty_var(&format!("{}_SERVER", prefix)),
            token: non_empty_var(&format!("{}_TOKEN", prefix)).map(Secret::new),
        })
    }

    /// Create credentials from a .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        load_env_file(env_file_path)?;
        Self::from_env(prefix)
    }

    /// Reject credentials that must never reach a transport
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.account.trim().is_empty() {
            return Err(ConnectorError::Validation(
                "account identifier is empty".to_string(),
            ));
        }
        let has_secret = self
            .secret
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty());
        let has_token = self
            .token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty());
        if !has_secret && !has_token {
            return Err(ConnectorError::Validation(
                "credentials need a secret or a token".to_string(),
            ));
        }
        Ok(())
    }

    /// Get secret (use carefully - exposes secret)
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_ref().map(|s| s.expose_secret().as_str())
    }

    /// Get token (use carefully - exposes secret)
    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

/// Orchestrator configuration, fixed at construction
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Strategies, tried in ascending `position`
    pub strategies: Vec<ConnectionStrategy>,
    /// Deadline for a single correlated request
    pub request_timeout: Duration,
    /// Deadline for one strategy attempt (open + discovery)
    pub attempt_timeout: Duration,
    /// Overrides the credentials' account when selecting the sub-account
    pub target_account: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            request_timeout: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
            target_account: None,
        }
    }
}

impl ConnectorConfig {
    /// Upper bound for either timeout
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

    /// Append a strategy; its position is its index in the list
    #[must_use]
    pub fn with_strategy(mut self, strategy: ConnectionStrategy) -> Self {
        let position = u32::try_from(self.strategies.len()).unwrap_or(u32::MAX);
        self.strategies.push(strategy.with_position(position));
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_target_account(mut self, account: impl Into<String>) -> Self {
        self.target_account = Some(account.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "request timeout must be positive".to_string(),
            ));
        }
        if self.attempt_timeout > Self::MAX_TIMEOUT {
            return Err(ConfigError::InvalidConfiguration(format!(
                "attempt timeout {:?} exceeds {:?}",
                self.attempt_timeout,
                Self::MAX_TIMEOUT
            )));
        }
        if self.attempt_timeout <= self.request_timeout {
            return Err(ConfigError::InvalidConfiguration(format!(
                "attempt timeout {:?} must exceed request timeout {:?}",
                self.attempt_timeout, self.request_timeout
            )));
        }
        if self.target_account.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ConfigError::InvalidConfiguration(
                "target account override is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables (at least one URL):
    /// - `{PREFIX}_PRIMARY_URL`
    /// - `{PREFIX}_ALTERNATE_URL`, `{PREFIX}_ALTERNATE_PARAMS` (`k=v&k=v`)
    /// - `{PREFIX}_SECONDARY_URL`
    /// - `{PREFIX}_REQUEST_TIMEOUT_MS`, `{PREFIX}_ATTEMPT_TIMEOUT_MS` (optional)
    /// - `{PREFIX}_TARGET_ACCOUNT` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let mut config = Self::default();

        if let Some(url) = non_empty_var(&format!("{}_PRIMARY_URL", prefix)) {
            config = config.with_strategy(ConnectionStrategy::primary(url));
        }
        if let Some(url) = non_empty_var(&format!("{}_ALTERNATE_URL", prefix)) {
            let mut endpoint = WsEndpoint::new(url);
            if let Some(params) = non_empty_var(&format!("{}_ALTERNATE_PARAMS", prefix)) {
                endpoint.params = parse_params(&params)?;
            }
            config = config.with_strategy(ConnectionStrategy::alternate(endpoint));
        }
        if let Some(url) = non_empty_var(&format!("{}_SECONDARY_URL", prefix)) {
            config = config.with_strategy(ConnectionStrategy::secondary(url));
        }
        if config.strategies.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable(format!(
                "{}_PRIMARY_URL",
                prefix
            )));
        }

        if let Some(ms) = millis_var(&format!("{}_REQUEST_TIMEOUT_MS", prefix))? {
            config.request_timeout = ms;
        }
        if let Some(ms) = millis_var(&format!("{}_ATTEMPT_TIMEOUT_MS", prefix))? {
            config.attempt_timeout = ms;
        }
        config.target_account = non_empty_var(&format!("{}_TARGET_ACCOUNT", prefix));

        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        load_env_file(".env")?;
        Self::from_env(prefix)
    }
}

#[cfg(feature = "env-file")]
fn load_env_file(path: &str) -> Result<(), ConfigError> {
    match dotenv::from_path(path) {
        Ok(()) => Ok(()),
        Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
            // No .env file, fall back to the process environment
            Ok(())
        }
        Err(e) => Err(ConfigError::InvalidConfiguration(format!(
            "Failed to load .env file '{}': {}",
            path, e
        ))),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn millis_var(name: &str) -> Result<Option<Duration>, ConfigError> {
    non_empty_var(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| {
                    ConfigError::InvalidConfiguration(format!("{} is not a number: {}", name, e))
                })
        })
        .transpose()
}

fn parse_params(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    ConfigError::InvalidConfiguration(format!(
                        "channel parameter '{}' is not key=value",
                        pair
                    ))
                })
        })
        .collect()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
