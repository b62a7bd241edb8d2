use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state_machine::SyncPhase;

/// Broad error category used for retry decisions and caller-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, rejected request, or other caller-side issue.
    Config,
    /// Missing, invalid or expired credential (401/403).
    Auth,
    /// Transient network failure, transport timeout or 5xx.
    Network,
    /// Rate-limited by the homeserver.
    RateLimited,
    /// Response was received but does not have the expected shape.
    Protocol,
    /// Request payload could not be serialized.
    Serialization,
    /// Client bug or invariant break.
    Internal,
}

/// Stable error payload returned by client operations and recorded by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ClientError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code (Matrix `errcode` when the server sent one).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ClientError {
    /// Construct a new client error.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SyncPhase, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot apply '{action}' while sync is in phase {current:?}"),
        )
    }

    /// Error returned by request wrappers when no session is present.
    pub fn not_logged_in() -> Self {
        Self::new(ErrorCategory::Auth, "not_logged_in", "no authenticated session")
    }

    /// Build a protocol error for a response that lacks an expected field.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Protocol, "malformed_response", message)
    }

    /// Build an error from a non-success HTTP status and its (possibly empty) body.
    ///
    /// Matrix error bodies look like `{"errcode":"M_FORBIDDEN","error":"..."}`;
    /// when present, `errcode` becomes the code and `retry_after_ms` is kept as a hint.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let errcode = parsed
            .as_ref()
            .and_then(|value| value.get("errcode"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let message = parsed
            .as_ref()
            .and_then(|value| value.get("error"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("homeserver responded with status {status}"));
        let retry_after_ms = parsed
            .as_ref()
            .and_then(|value| value.get("retry_after_ms"))
            .and_then(Value::as_u64);

        let mut error = Self::new(
            classify_http_status(status),
            errcode.unwrap_or_else(|| format!("http_{status}")),
            message,
        );
        error.retry_after_ms = retry_after_ms;
        error
    }

    /// Whether a background loop may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Network | ErrorCategory::RateLimited | ErrorCategory::Protocol
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}
