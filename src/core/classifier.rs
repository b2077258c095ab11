use crate::core::errors::{ConnectorError, ErrorCategory};
use serde_json::Value;
use std::time::Duration;

/// Raw failure observed somewhere below the orchestrator
#[derive(Debug, Clone)]
pub enum FailureSignal {
    /// Reply that could not be interpreted
    Malformed(String),
    /// `error` envelope reported by the counterparty
    Remote { code: String, message: String },
    /// Channel closed or errored after it was open
    ChannelClosed(String),
    /// Channel could not be opened at all
    OpenFailed(String),
    /// A deadline elapsed
    Elapsed { what: String, after: Duration },
}

/// Category plus the orchestrator's treatment of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub halts: bool,
}

const AUTH_CODES: &[&str] = &[
    "AuthorizationRequired",
    "InvalidToken",
    "InvalidCredentials",
    "Unauthorized",
    "Forbidden",
    "AuthFailed",
];

const NOT_FOUND_CODES: &[&str] = &["NotFound", "AccountNotFound", "InvalidAccount"];

const BAD_REQUEST_CODES: &[&str] = &["InvalidRequest", "BadRequest"];

/// Prefix used for HTTP status codes surfaced as `error` envelopes
pub const HTTP_CODE_PREFIX: &str = "http.";

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(signal: FailureSignal) -> ConnectorError {
        match signal {
            FailureSignal::Malformed(detail) => ConnectorError::MalformedResponse(detail),
            FailureSignal::Remote { code, message } => Self::remote_error(code, message),
            FailureSignal::ChannelClosed(detail) => {
                ConnectorError::Transport(format!("channel closed: {}", detail))
            }
            FailureSignal::OpenFailed(detail) => {
                ConnectorError::Transport(format!("failed to open channel: {}", detail))
            }
            FailureSignal::Elapsed { what, after } => {
                ConnectorError::Timeout(format!("{} exceeded {:?}", what, after))
            }
        }
    }

    /// Classify the payload of an `error` envelope
    pub fn remote(payload: &Value) -> ConnectorError {
        let Some(code) = payload.get("code").and_then(code_as_string) else {
            return ConnectorError::MalformedResponse(format!(
                "error envelope without code: {}",
                payload
            ));
        };
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self::classify(FailureSignal::Remote { code, message })
    }

    pub fn category_for_code(code: &str) -> ErrorCategory {
        if let Some(status) = code
            .strip_prefix(HTTP_CODE_PREFIX)
            .and_then(|s| s.parse::<u16>().ok())
        {
            return Self::category_for_status(status);
        }
        if AUTH_CODES.contains(&code) {
            ErrorCategory::Authentication
        } else if NOT_FOUND_CODES.contains(&code) {
            ErrorCategory::NotFound
        } else if BAD_REQUEST_CODES.contains(&code) {
            ErrorCategory::MalformedResponse
        } else {
            // Unrecognized codes are treated as server-side faults
            ErrorCategory::Transport
        }
    }

    pub const fn category_for_status(status: u16) -> ErrorCategory {
        match status {
            401 | 403 => ErrorCategory::Authentication,
            404 => ErrorCategory::NotFound,
            400 | 422 => ErrorCategory::MalformedResponse,
            408 | 504 => ErrorCategory::Timeout,
            _ => ErrorCategory::Transport,
        }
    }

    pub fn verdict(error: &ConnectorError) -> Verdict {
        let category = error.category();
        Verdict {
            category,
            retryable: category.is_retryable(),
            halts: category.halts(),
        }
    }

    fn remote_error(code: String, message: String) -> ConnectorError {
        match Self::category_for_code(&code) {
            ErrorCategory::Authentication => ConnectorError::Authentication { code, message },
            ErrorCategory::NotFound => ConnectorError::NotFound(format!("{}: {}", code, message)),
            ErrorCategory::MalformedResponse => {
                ConnectorError::MalformedResponse(format!("{}: {}", code, message))
            }
            ErrorCategory::Timeout => ConnectorError::Timeout(format!("{}: {}", code, message)),
            _ => ConnectorError::Transport(format!("remote error {}: {}", code, message)),
        }
    }
}

fn code_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
