use crate::core::errors::ConnectorError;
use crate::core::types::AccountSnapshot;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

const BALANCE: &[&str] = &["balance"];
const EQUITY: &[&str] = &["equity"];
const USED_MARGIN: &[&str] = &["usedMargin", "margin"];
const FREE_MARGIN: &[&str] = &["freeMargin", "marginFree"];

/// Facts about the account that do not come from the summary payload
#[derive(Debug, Clone, Copy)]
pub struct SnapshotContext<'a> {
    pub account: &'a str,
    pub strategy: &'a str,
    /// Currency learned earlier in discovery, used when the payload has none
    pub fallback_currency: Option<&'a str>,
}

/// Map an account summary payload to a snapshot
///
/// `balance`, `equity` and `usedMargin` are required. `freeMargin` is
/// derived from `equity - usedMargin` only when absent; when present it
/// must agree within [`AccountSnapshot::MARGIN_TOLERANCE`].
pub fn normalize(payload: &Value, ctx: &SnapshotContext<'_>) -> Result<AccountSnapshot, ConnectorError> {
    if !payload.is_object() {
        return Err(ConnectorError::MalformedResponse(format!(
            "account summary is not an object: {}",
            payload
        )));
    }

    let balance = required(payload, BALANCE)?;
    let equity = required(payload, EQUITY)?;
    let used_margin = required(payload, USED_MARGIN)?;
    let reported = optional(payload, FREE_MARGIN)?;

    for (name, value) in [
        ("balance", Some(balance)),
        ("equity", Some(equity)),
        ("usedMargin", Some(used_margin)),
        ("freeMargin", reported),
    ] {
        if let Some(value) = value.filter(|v| v.is_sign_negative() && !v.is_zero()) {
            return Err(ConnectorError::MalformedResponse(format!(
                "{} is negative: {}",
                name, value
            )));
        }
    }

    let derived = equity.checked_sub(used_margin).ok_or_else(|| {
        ConnectorError::MalformedResponse(format!(
            "equity {} - usedMargin {} is out of range",
            equity, used_margin
        ))
    })?;
    let free_margin = match reported {
        Some(reported) => {
            let drift = reported.checked_sub(derived).map(|d| d.abs());
            if !drift.is_some_and(|d| d <= AccountSnapshot::MARGIN_TOLERANCE) {
                return Err(ConnectorError::MalformedResponse(format!(
                    "freeMargin {} disagrees with equity {} - usedMargin {}",
                    reported, equity, used_margin
                )));
            }
            reported
        }
        None if derived.is_sign_negative() && !derived.is_zero() => {
            return Err(ConnectorError::MalformedResponse(format!(
                "freeMargin is negative: {}",
                derived
            )));
        }
        None => derived,
    };

    let currency = payload
        .get("currency")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .or(ctx.fallback_currency)
        .map(str::to_string);

    Ok(AccountSnapshot {
        account: ctx.account.to_string(),
        balance,
        equity,
        used_margin,
        free_margin,
        currency,
        source_strategy: ctx.strategy.to_string(),
        timestamp: Utc::now(),
    })
}

/// Whether an authorize reply already carries the account summary
pub fn has_summary(payload: &Value) -> bool {
    payload.get("balance").is_some_and(|v| !v.is_null())
}

fn required(payload: &Value, names: &[&str]) -> Result<Decimal, ConnectorError> {
    optional(payload, names)?.ok_or_else(|| {
        ConnectorError::MalformedResponse(format!("missing field '{}'", names[0]))
    })
}

fn optional(payload: &Value, names: &[&str]) -> Result<Option<Decimal>, ConnectorError> {
    names
        .iter()
        .find_map(|name| payload.get(*name).filter(|v| !v.is_null()).map(|v| (*name, v)))
        .map(|(name, value)| parse_decimal(name, value))
        .transpose()
}

/// Accepts JSON numbers and numeric strings, including scientific notation
pub fn parse_decimal(field: &str, value: &Value) -> Result<Decimal, ConnectorError> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(ConnectorError::MalformedResponse(format!(
                "field '{}' is not numeric: {}",
                field, other
            )))
        }
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|e| {
            ConnectorError::MalformedResponse(format!(
                "field '{}' has invalid number '{}': {}",
                field, raw, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorCategory;
    use serde_json::json;

    const CTX: SnapshotContext<'static> = SnapshotContext {
        account: "A1",
        strategy: "primary",
        fallback_currency: Some("USD"),
    };

    #[test]
    fn test_normalize_full_summary() {
        let snapshot = normalize(
            &json!({"balance": 100, "equity": 95, "usedMargin": 10, "freeMargin": 85}),
            &CTX,
        )
        .unwrap();
        assert_eq!(snapshot.balance, Decimal::new(100, 0));
        assert_eq!(snapshot.free_margin, Decimal::new(85, 0));
        assert_eq!(snapshot.currency.as_deref(), Some("USD"));
        assert_eq!(snapshot.source_strategy, "primary");
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_string_numbers_and_aliases() {
        let snapshot = normalize(
            &json!({
                "balance": "1050.25",
                "equity": "1000.5",
                "margin": "200.25",
                "marginFree": "800.25",
                "currency": "EUR"
            }),
            &CTX,
        )
        .unwrap();
        assert_eq!(snapshot.used_margin, Decimal::new(20025, 2));
        assert_eq!(snapshot.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_free_margin_derived_when_absent() {
        let snapshot =
            normalize(&json!({"balance": 10, "equity": 12.5, "usedMargin": 2}), &CTX).unwrap();
        assert_eq!(snapshot.free_margin, Decimal::new(105, 1));
    }

    #[test]
    fn test_free_margin_within_tolerance() {
        let snapshot = normalize(
            &json!({"balance": 10, "equity": 10, "usedMargin": 1, "freeMargin": "9.01"}),
            &CTX,
        )
        .unwrap();
        assert_eq!(snapshot.free_margin, Decimal::new(901, 2));

        let err = normalize(
            &json!({"balance": 10, "equity": 10, "usedMargin": 1, "freeMargin": 8}),
            &CTX,
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MalformedResponse);
    }

    #[test]
    fn test_missing_or_non_numeric_is_malformed() {
        for payload in [
            json!({"equity": 1, "usedMargin": 0}),
            json!({"balance": "n/a", "equity": 1, "usedMargin": 0}),
            json!({"balance": 1, "equity": true, "usedMargin": 0}),
            json!({"balance": 1, "equity": 1, "usedMargin": null}),
            json!([1, 2, 3]),
        ] {
            let err = normalize(&payload, &CTX).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::MalformedResponse, "{}", payload);
        }
    }

    #[test]
    fn test_negative_is_malformed() {
        let err = normalize(&json!({"balance": -1, "equity": 0, "usedMargin": 0}), &CTX).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MalformedResponse);

        let err = normalize(&json!({"balance": 1, "equity": 1, "usedMargin": 5}), &CTX).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MalformedResponse);
    }

    #[test]
    fn test_out_of_range_margin_is_malformed() {
        let max = "79228162514264337593543950335";
        let err = normalize(
            &json!({"balance": "1", "equity": "0", "usedMargin": max, "freeMargin": max}),
            &CTX,
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MalformedResponse);

        let snapshot = normalize(
            &json!({"balance": max, "equity": max, "usedMargin": "0"}),
            &CTX,
        )
        .unwrap();
        assert_eq!(snapshot.free_margin, Decimal::MAX);
    }

    #[test]
    fn test_scientific_notation() {
        let value = parse_decimal("balance", &json!("1.5e3")).unwrap();
        assert_eq!(value, Decimal::new(1500, 0));
    }

    #[test]
    fn test_currency_absent_everywhere() {
        let ctx = SnapshotContext {
            fallback_currency: None,
            ..CTX
        };
        let snapshot = normalize(&json!({"balance": 1, "equity": 1, "usedMargin": 0}), &ctx).unwrap();
        assert_eq!(snapshot.currency, None);
    }

    #[test]
    fn test_has_summary() {
        assert!(has_summary(&json!({"balance": 0})));
        assert!(!has_summary(&json!({"loginid": "A1"})));
        assert!(!has_summary(&json!({"balance": null})));
    }
}
