use serde_json::Value;
use thiserror::Error;

/// How a transport-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Errors surfaced by the data-access layer.
///
/// The type is `Clone` because a single outcome is handed to every caller
/// joined to the same in-flight read and to every refresh waiter.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server rejected the credential and the call was already replayed once.
    #[error("authentication expired")]
    AuthenticationExpired,
    /// The access credential could not be renewed; the session is over.
    #[error("credential renewal failed: {reason}")]
    RenewalFailed { reason: String },
    #[error("transport error: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("upstream returned status {status}")]
    Upstream { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("background task aborted: {0}")]
    Aborted(String),
}

impl ApiError {
    pub fn renewal_failed(reason: impl Into<String>) -> Self {
        Self::RenewalFailed {
            reason: reason.into(),
        }
    }

    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status carried by upstream failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::AuthenticationExpired => Some(401),
            _ => None,
        }
    }

    /// True when the session is over and the caller must sign in again.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, Self::RenewalFailed { .. } | Self::AuthenticationExpired)
    }

    /// Render a message suitable for showing to an end user.
    ///
    /// Upstream bodies are inspected for a `detail` field (either a string or a
    /// list of `{loc, msg}` validation items) and then a `message` field before
    /// falling back to the error's own display text.
    pub fn user_message(&self) -> String {
        let Self::Upstream { body, .. } = self else {
            return self.to_string();
        };
        let Ok(parsed) = serde_json::from_str::<Value>(body) else {
            return self.to_string();
        };

        match parsed.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(Value::Array(items)) if !items.is_empty() => {
                return items
                    .iter()
                    .map(render_validation_item)
                    .collect::<Vec<_>>()
                    .join(", ");
            }
            _ => {}
        }

        parsed
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.to_string())
    }
}

fn render_validation_item(item: &Value) -> String {
    let field = item
        .get("loc")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .map(|part| match part {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".")
        })
        .filter(|joined| !joined.is_empty())
        .unwrap_or_else(|| "field".to_string());
    let msg = item
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("Invalid value");
    format!("{field}: {msg}")
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::transport(kind, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(body: &str) -> ApiError {
        ApiError::Upstream {
            status: 422,
            body: body.to_string(),
        }
    }

    #[test]
    fn user_message_prefers_string_detail() {
        let err = upstream(r#"{"detail":"Password too short"}"#);
        assert_eq!(err.user_message(), "Password too short");
    }

    #[test]
    fn user_message_formats_validation_items() {
        let err = upstream(
            r#"{"detail":[{"loc":["body","year"],"msg":"must be positive"},{"msg":"oops"}]}"#,
        );
        assert_eq!(
            err.user_message(),
            "body.year: must be positive, field: oops"
        );
    }

    #[test]
    fn user_message_falls_back_to_message_then_display() {
        assert_eq!(upstream(r#"{"message":"slow down"}"#).user_message(), "slow down");
        assert_eq!(
            upstream("not json").user_message(),
            "upstream returned status 422"
        );
        assert_eq!(
            ApiError::AuthenticationExpired.user_message(),
            "authentication expired"
        );
    }

    #[test]
    fn status_is_exposed_for_http_failures() {
        assert_eq!(upstream("{}").status(), Some(422));
        assert_eq!(ApiError::AuthenticationExpired.status(), Some(401));
        assert_eq!(ApiError::Decode("x".into()).status(), None);
    }

    #[test]
    fn only_authentication_failures_end_the_session() {
        assert!(ApiError::AuthenticationExpired.is_session_terminal());
        assert!(ApiError::renewal_failed("revoked").is_session_terminal());
        assert!(!upstream("{}").is_session_terminal());
        assert!(!ApiError::Decode("x".into()).is_session_terminal());
    }
}
