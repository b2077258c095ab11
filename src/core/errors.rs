use std::fmt;
use thiserror::Error;

/// Closed failure taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    Authentication,
    NotFound,
    MalformedResponse,
    Timeout,
    Transport,
    Busy,
    NotConnected,
}

impl ErrorCategory {
    /// Whether another strategy may succeed where this one failed
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Transport)
    }

    /// Stops the strategy loop and is reported alone
    pub const fn halts(self) -> bool {
        matches!(self, Self::Validation | Self::Authentication)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "ValidationError",
            Self::Authentication => "AuthenticationError",
            Self::NotFound => "NotFoundError",
            Self::MalformedResponse => "MalformedResponseError",
            Self::Timeout => "Timeout",
            Self::Transport => "TransportError",
            Self::Busy => "BusyError",
            Self::NotConnected => "NotConnectedError",
        };
        f.write_str(name)
    }
}

/// One strategy's classified failure inside an aggregated error
#[derive(Debug, Clone)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: ConnectorError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

fn describe_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {code} - {message}")]
    Authentication { code: String, message: String },

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connector busy: a connect or refresh is already in progress")]
    Busy,

    #[error("Not connected: no active session")]
    NotConnected,

    #[error("All connection strategies failed: {}", describe_failures(.0))]
    Exhausted(Vec<StrategyFailure>),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}

impl ConnectorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::MalformedResponse(_) => ErrorCategory::MalformedResponse,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Busy => ErrorCategory::Busy,
            Self::NotConnected => ErrorCategory::NotConnected,
            // The failure that ended the loop decides
            Self::Exhausted(failures) => failures
                .last()
                .map_or(ErrorCategory::Transport, |f| f.error.category()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Per-strategy failures when every strategy was exhausted
    pub fn failures(&self) -> &[StrategyFailure] {
        match self {
            Self::Exhausted(failures) => failures,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("HTTP request timed out: {}", err))
        } else {
            Self::Transport(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(format!("WebSocket error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categories() {
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Transport.is_retryable());
        assert!(!ErrorCategory::Authentication.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(ErrorCategory::Authentication.halts());
        assert!(ErrorCategory::Validation.halts());
        assert!(!ErrorCategory::MalformedResponse.halts());
    }

    #[test]
    fn test_exhausted_lists_every_strategy() {
        let err = ConnectorError::Exhausted(vec![
            StrategyFailure {
                strategy: "primary".to_string(),
                error: ConnectorError::Transport("refused".to_string()),
            },
            StrategyFailure {
                strategy: "secondary".to_string(),
                error: ConnectorError::Timeout("authorize".to_string()),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("primary: Transport error: refused"));
        assert!(text.contains("secondary: Timeout: authorize"));
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_json_error_is_malformed() {
        let err: ConnectorError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), ErrorCategory::MalformedResponse);
    }
}
