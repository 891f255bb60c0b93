//! Error taxonomy shared by the retry executor, the table handles and callers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = ClassifiedError> = std::result::Result<T, E>;

/// What went wrong, at the granularity callers and the retry/fallback policy
/// act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts and transport failures: the backend was never reached.
    Connection,
    Authentication,
    Permission,
    /// A row or an unknown relation is missing.
    NotFound,
    /// `NotFound` sub-kind: the backend lacks one of the known tables.
    MissingTable,
    Validation,
    RateLimit,
    Server,
    Unknown,
    /// The caller aborted the call through its cancellation token.
    Cancelled,
}

impl ErrorKind {
    /// Worth another attempt against the same backend.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Connection | Self::Server | Self::RateLimit)
    }

    /// Answered from the fallback store instead of reaching the caller.
    #[must_use]
    pub fn degrades(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Server | Self::RateLimit | Self::MissingTable
        )
    }

    #[must_use]
    pub fn is_not_found(self) -> bool {
        matches!(self, Self::NotFound | Self::MissingTable)
    }

    /// Needs the caller to do something (re-authenticate, fix input).
    #[must_use]
    pub fn is_caller_actionable(self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Permission | Self::Validation
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::MissingTable => "missing_table",
            Self::Validation => "validation",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Unknown => "unknown",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by a PostgREST-style backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ErrorPayload {
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Message and details joined, lowercased, for pattern matching.
    #[must_use]
    pub fn haystack(&self) -> String {
        let mut text = String::new();
        for part in [&self.message, &self.details, &self.hint].into_iter().flatten() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(part);
        }
        text.to_lowercase()
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message.as_deref().unwrap_or("no message");
        match &self.code {
            Some(code) => write!(f, "{message} ({code})"),
            None => f.write_str(message),
        }
    }
}

/// Raw failure of one attempt against a data source, before classification.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("HTTP {status}: {payload}")]
    Status { status: u16, payload: ErrorPayload },

    #[error("undecodable response: {0}")]
    Decode(String),

    /// The query cannot be evaluated as written (unknown column, missing
    /// required value, violated constraint).
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl SourceError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Status { payload, .. } => payload.code.as_deref(),
            _ => None,
        }
    }
}

/// A failure after classification. This is the error half of every table
/// handle result.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error on {table}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub table: String,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    /// Attempts made against the source that produced this error.
    pub attempts: u32,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            message: message.into(),
            status: None,
            code: None,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, table, message)
    }

    #[must_use]
    pub fn from_source(kind: ErrorKind, table: &str, err: &SourceError, attempts: u32) -> Self {
        let message = match err {
            SourceError::Status { payload, .. } => payload.to_string(),
            other => other.to_string(),
        };
        Self {
            kind,
            table: table.to_string(),
            message,
            status: err.status(),
            code: err.code().map(str::to_string),
            attempts,
        }
    }

    /// A message fit to show an end user: specific for the kinds the user can
    /// act on, generic otherwise.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Authentication => {
                "Your session is not valid for the recipe backend. Check the anon key or sign in again.".to_string()
            }
            ErrorKind::Permission => {
                format!("You are not allowed to access {}.", self.table)
            }
            ErrorKind::Validation => format!("Invalid request: {}", self.message),
            ErrorKind::NotFound | ErrorKind::MissingTable => {
                format!("Nothing found in {}.", self.table)
            }
            ErrorKind::Cancelled => "The request was cancelled.".to_string(),
            ErrorKind::Connection
            | ErrorKind::RateLimit
            | ErrorKind::Server
            | ErrorKind::Unknown => {
                "The recipe backend could not complete the request. Try again later.".to_string()
            }
        }
    }
}

/// Rejected client configuration. Raised at construction, never at first query.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("backend credential is missing")]
    MissingCredential,

    #[error("backend credential is malformed: {0}")]
    MalformedCredential(String),

    #[error("refusing privileged backend credential (role '{0}'); supply the public anon key")]
    PrivilegedCredential(String),

    #[error("invalid retry options: {0}")]
    InvalidRetryOptions(String),

    #[error("failed to build HTTP client: {0}")]
    Http(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degrading_kinds() {
        let degrading: Vec<ErrorKind> = [
            ErrorKind::Connection,
            ErrorKind::Authentication,
            ErrorKind::Permission,
            ErrorKind::NotFound,
            ErrorKind::MissingTable,
            ErrorKind::Validation,
            ErrorKind::RateLimit,
            ErrorKind::Server,
            ErrorKind::Unknown,
            ErrorKind::Cancelled,
        ]
        .into_iter()
        .filter(|k| k.degrades())
        .collect();
        assert_eq!(
            degrading,
            vec![
                ErrorKind::Connection,
                ErrorKind::MissingTable,
                ErrorKind::RateLimit,
                ErrorKind::Server
            ]
        );
    }

    #[test]
    fn test_missing_table_is_not_found_but_not_retryable() {
        assert!(ErrorKind::MissingTable.is_not_found());
        assert!(ErrorKind::NotFound.is_not_found());
        assert!(!ErrorKind::MissingTable.is_retryable());
        assert!(!ErrorKind::NotFound.degrades());
    }

    #[test]
    fn test_payload_haystack() {
        let payload = ErrorPayload {
            code: Some("42P01".to_string()),
            message: Some("relation \"public.recipes\" does not exist".to_string()),
            details: None,
            hint: Some("Check the schema".to_string()),
        };
        assert_eq!(
            payload.haystack(),
            "relation \"public.recipes\" does not exist check the schema"
        );
        assert_eq!(
            payload.to_string(),
            "relation \"public.recipes\" does not exist (42P01)"
        );
    }

    #[test]
    fn test_from_source_keeps_status_and_code() {
        let err = SourceError::Status {
            status: 403,
            payload: ErrorPayload {
                code: Some("42501".to_string()),
                message: Some("permission denied for table recipes".to_string()),
                details: None,
                hint: None,
            },
        };
        let classified = ClassifiedError::from_source(ErrorKind::Permission, "recipes", &err, 1);
        assert_eq!(classified.status, Some(403));
        assert_eq!(classified.code.as_deref(), Some("42501"));
        assert_eq!(classified.attempts, 1);
        assert_eq!(
            classified.to_string(),
            "permission error on recipes: permission denied for table recipes (42501)"
        );
    }

    #[test]
    fn test_user_message_is_specific_for_actionable_kinds() {
        let err = ClassifiedError::validation("ingredients", "duplicate name 'Salt'");
        assert_eq!(err.user_message(), "Invalid request: duplicate name 'Salt'");
        let err = ClassifiedError::new(ErrorKind::Server, "recipes", "boom");
        assert!(!err.user_message().contains("boom"));
    }
}
