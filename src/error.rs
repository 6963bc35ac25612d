//! Error types for egonet.
//!
//! Three layers, matching where a failure can be acted on:
//!
//! - [`ApiError`] - failures reported by the remote social-graph API
//! - [`StoreError`] - failures reported by the persistence sink
//! - [`EgonetError`] - everything that can reach the command line

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

// =============================================================================
// Remote API Errors
// =============================================================================

/// Failure taxonomy of the remote API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The requested user, list, or resource does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The per-credential request window is exhausted.
    #[error("Rate limited, retry after {} seconds", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Network failure, timeout, or 5xx response.
    #[error("Transient API failure: {message}")]
    Transient { message: String },

    /// The request can never succeed for this target.
    #[error("Permanent API failure: {message}")]
    Permanent { message: String },

    /// Credentials are malformed or revoked.
    #[error("Fatal API failure: {message}")]
    Fatal { message: String },

    /// The bounded retry budget of one sub-operation ran out.
    #[error("Gave up on {operation} after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: String,
    },
}

/// Result type for remote API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

static PERMANENT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)not authorized|page does not exist").expect("static regex is valid")
});

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Build an error from a remote message, promoting messages that are
    /// known to be permanent for the current target.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if PERMANENT_MARKERS.is_match(&message) {
            Self::Permanent { message }
        } else {
            Self::Transient { message }
        }
    }

    /// Whether a bounded retry may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { message } => !PERMANENT_MARKERS.is_match(message),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Whether the whole run must stop: the session itself is unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Whether the current sub-operation must be abandoned without retrying.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Get the suggested wait before the next call.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Failure taxonomy of the persistence sink.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Lock contention or a dropped connection; worth one retry after reconnecting.
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// Constraint violations, schema problems, I/O failures.
    #[error("Store failure: {0}")]
    Permanent(String),

    /// The record holds text the store cannot encode.
    #[error("Encoding failure: {0}")]
    Encoding(String),
}

/// Result type for persistence calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Transient(err.to_string())
            }
            rusqlite::Error::Utf8Error(_)
            | rusqlite::Error::NulError(_)
            | rusqlite::Error::ToSqlConversionFailure(_) => Self::Encoding(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// A status that cannot be turned into a tweet record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("status {id} has no author")]
    MissingAuthor { id: i64 },

    #[error("status {id} has an unreadable date '{raw}'")]
    BadDate { id: i64, raw: String },
}

// =============================================================================
// Top-level Errors
// =============================================================================

/// Primary error type for egonet operations.
#[derive(Error, Debug)]
pub enum EgonetError {
    /// No usable credentials were configured.
    #[error("Missing credentials: {missing}")]
    MissingCredentials { missing: String },

    /// Credentials were rejected by the remote API.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote API failure that escaped its sub-operation.
    #[error("API error: {0}")]
    Api(ApiError),

    /// Persistence failure outside a single-record save.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database could not be opened or migrated.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    Config { path: PathBuf, reason: String },

    /// Invalid command-line argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// File read/write error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for egonet operations.
pub type Result<T> = std::result::Result<T, EgonetError>;

impl From<ApiError> for EgonetError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Fatal { message } => Self::Authentication(message),
            other => Self::Api(other),
        }
    }
}

impl EgonetError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MissingCredentials { .. } => Some(
                "Set the [credentials] section in ~/.config/egonet/config.toml or export EGONET_CONSUMER_KEY and friends.",
            ),
            Self::Authentication(_) => {
                Some("Check that the consumer and access tokens belong to the same app.")
            }
            Self::Database(_) => Some("Make sure no other process holds an exclusive lock on the database."),
            Self::Config { .. } => Some("Run 'egonet config --init' to write a fresh default file."),
            _ => None,
        }
    }
}

// =============================================================================
// CLI Error Formatting
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    if !suggestions.is_empty() {
        output.push_str("\n\n   ");
        if suggestions.len() == 1 {
            let _ = write!(output, "{} {}", "Hint:".cyan(), suggestions[0]);
        } else {
            let _ = write!(output, "{}:", "Try".cyan());
            for suggestion in suggestions {
                let _ = write!(output, "\n     {} {}", "•".dimmed(), suggestion);
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permanent_markers() {
        assert!(matches!(
            ApiError::classify("Not authorized."),
            ApiError::Permanent { .. }
        ));
        assert!(matches!(
            ApiError::classify("Sorry, that page does not exist"),
            ApiError::Permanent { .. }
        ));
        assert!(matches!(
            ApiError::classify("Over capacity"),
            ApiError::Transient { .. }
        ));
    }

    #[test]
    fn test_transient_with_permanent_text_is_not_retryable() {
        let err = ApiError::transient("401: Not authorized");
        assert!(!err.is_retryable());
        assert!(ApiError::transient("503 Service Unavailable").is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let err = ApiError::RateLimited {
            retry_after: Duration::from_secs(15),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(15)));
        assert_eq!(ApiError::not_found("x").retry_after(), None);
    }

    #[test]
    fn test_not_found_and_fatal_are_permanent() {
        assert!(ApiError::not_found("nobody").is_permanent());
        assert!(ApiError::fatal("bad token").is_permanent());
    }

    #[test]
    fn test_fatal_api_error_becomes_authentication_failure() {
        assert!(ApiError::fatal("Invalid or expired token (code 89)").is_fatal());
        assert!(!ApiError::permanent("Not authorized.").is_fatal());

        let err = EgonetError::from(ApiError::fatal("Invalid or expired token (code 89)"));
        assert!(matches!(err, EgonetError::Authentication(_)));
        assert!(err.suggestion().is_some());
        assert!(matches!(
            EgonetError::from(ApiError::transient("503")),
            EgonetError::Api(_)
        ));
    }

    #[test]
    fn test_store_error_from_busy() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StoreError::from(busy), StoreError::Transient(_)));
    }

    #[test]
    fn test_store_error_from_other() {
        let err = StoreError::from(rusqlite::Error::InvalidQuery);
        assert!(matches!(err, StoreError::Permanent(_)));
    }

    #[test]
    fn test_suggestions() {
        let err = EgonetError::MissingCredentials {
            missing: "consumer_key".into(),
        };
        assert!(err.suggestion().is_some());
        assert!(EgonetError::invalid_argument("x").suggestion().is_none());
    }

    #[test]
    fn format_error_single_suggestion() {
        let output = format_error("Test Error", "Something went wrong", &["Try this"]);
        assert!(output.contains("Test Error"));
        assert!(output.contains("Something went wrong"));
        assert!(output.contains("Try this"));
    }

    #[test]
    fn format_error_multiple_suggestions() {
        let output = format_error("Test Error", "", &["First option", "Second option"]);
        assert!(output.contains("First option"));
        assert!(output.contains("Second option"));
    }
}
