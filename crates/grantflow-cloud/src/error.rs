//! Grant controller error types

use crate::constraint::ConstraintKind;
use crate::retry::RetryError;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a remote API failure
///
/// Retry decisions are made on categories, never on raw error codes, so each
/// API binding maps its own codes onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A dependency of the remote service timed out
    DependencyTimeout,
    /// The remote service reported an internal, transient failure
    Internal,
    /// A referenced principal or key is not visible yet (propagation lag)
    InvalidReference,
    /// The addressed resource was not found
    NotFound,
    /// The request never got a response (connect/dispatch/timeout)
    Transport,
    /// Permission, validation, conflict and everything else
    Other,
}

impl ErrorCategory {
    /// Map a KMS-style error code onto a category
    pub fn from_code(code: &str) -> Self {
        match code {
            "DependencyTimeoutException" => ErrorCategory::DependencyTimeout,
            "InternalException" | "KMSInternalException" => ErrorCategory::Internal,
            "InvalidArnException" => ErrorCategory::InvalidReference,
            "NotFoundException" => ErrorCategory::NotFound,
            _ => ErrorCategory::Other,
        }
    }
}

/// Error returned by a [`crate::GrantApi`] call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build an error whose category is derived from its code
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            category: ErrorCategory::from_code(&code),
            code,
            message: message.into(),
        }
    }
}

/// Local validation failures, raised before any remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A grant constraint can't have more than one populated kind, found: {}", format_kinds(.kinds))]
    ConflictingConstraints { kinds: Vec<ConstraintKind> },

    #[error("Invalid grant name {0:?}: must be 1-256 characters of [a-zA-Z0-9:/_-]")]
    InvalidName(String),

    #[error("{field} must be an ARN, got {value:?}")]
    InvalidArn { field: &'static str, value: String },

    #[error("Unknown grant operation: {0}")]
    UnknownOperation(String),

    #[error("At least one grant operation is required")]
    NoOperations,

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid import key {0:?}, expected <key-id>:<grant-id>")]
    InvalidImportKey(String),
}

fn format_kinds(kinds: &[ConstraintKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raised when a grant expected to be listed is not
///
/// Kept apart from [`ErrorCategory::NotFound`] so callers can tell "not
/// visible yet" from a remote failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingGrant {
    message: String,
}

impl MissingGrant {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for MissingGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for MissingGrant {}

/// Grant controller errors
#[derive(Error, Debug)]
pub enum GrantError {
    #[error("Invalid grant: {0}")]
    Validation(#[from] ValidationError),

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: RemoteError,
    },

    #[error("{0}")]
    Missing(MissingGrant),

    #[error("Grant {grant_id} for key {key_id} still exists while expected to be revoked")]
    StillPresent { key_id: String, grant_id: String },

    #[error("Timed out after {attempts} attempts ({elapsed:?}): {last}")]
    DeadlineExceeded {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Box<GrantError>,
    },

    #[error("Cancelled after {attempts} attempts")]
    Cancelled {
        attempts: u32,
        last: Option<Box<GrantError>>,
    },

    #[error("Grant {grant_id} requires replacement, changed: {}", .attributes.join(", "))]
    RequiresReplacement {
        grant_id: String,
        attributes: Vec<&'static str>,
    },

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GrantError {
    pub fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        GrantError::Remote {
            context: context.into(),
            source,
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        GrantError::Missing(MissingGrant::new(message))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, GrantError::Missing(_))
    }

    /// Convert the outcome of a retried remote call, attaching `context`
    pub fn from_remote_retry(err: RetryError<RemoteError>, context: &str) -> Self {
        match err {
            RetryError::Fatal(source) => GrantError::remote(context, source),
            RetryError::DeadlineExceeded {
                last,
                attempts,
                elapsed,
            } => GrantError::DeadlineExceeded {
                attempts,
                elapsed,
                last: Box::new(GrantError::remote(context, last)),
            },
            RetryError::Cancelled { last, attempts } => GrantError::Cancelled {
                attempts,
                last: last.map(|source| Box::new(GrantError::remote(context, source))),
            },
        }
    }
}

impl From<RetryError<GrantError>> for GrantError {
    fn from(err: RetryError<GrantError>) -> Self {
        match err {
            RetryError::Fatal(e) => e,
            RetryError::DeadlineExceeded {
                last,
                attempts,
                elapsed,
            } => GrantError::DeadlineExceeded {
                attempts,
                elapsed,
                last: Box::new(last),
            },
            RetryError::Cancelled { last, attempts } => GrantError::Cancelled {
                attempts,
                last: last.map(Box::new),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, GrantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(
            ErrorCategory::from_code("DependencyTimeoutException"),
            ErrorCategory::DependencyTimeout
        );
        assert_eq!(
            ErrorCategory::from_code("KMSInternalException"),
            ErrorCategory::Internal
        );
        assert_eq!(
            ErrorCategory::from_code("InvalidArnException"),
            ErrorCategory::InvalidReference
        );
        assert_eq!(
            ErrorCategory::from_code("AccessDeniedException"),
            ErrorCategory::Other
        );
    }

    #[test]
    fn test_missing_grant_message_is_stored_text() {
        let err = GrantError::missing("Grant abc not found for key id: k1");
        assert!(err.is_missing());
        assert_eq!(err.to_string(), "Grant abc not found for key id: k1");

        let GrantError::Missing(missing) = err else {
            panic!("expected missing");
        };
        assert_eq!(missing.message(), "Grant abc not found for key id: k1");
    }

    #[test]
    fn test_conflicting_constraints_names_kinds() {
        let err = ValidationError::ConflictingConstraints {
            kinds: vec![ConstraintKind::Equals, ConstraintKind::Subset],
        };
        let msg = err.to_string();
        assert!(msg.contains("encryption_context_equals"));
        assert!(msg.contains("encryption_context_subset"));
    }

    #[test]
    fn test_deadline_wraps_last_failure() {
        let err = GrantError::from_remote_retry(
            RetryError::DeadlineExceeded {
                last: RemoteError::from_code("InternalException", "boom"),
                attempts: 4,
                elapsed: Duration::from_secs(180),
            },
            "creating grant for key k1",
        );
        match err {
            GrantError::DeadlineExceeded { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert!(last.to_string().contains("InternalException: boom"));
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
