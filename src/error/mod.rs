use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use tracing::error;

/// Stable taxonomy of failures surfaced across the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No local user could be resolved for the caller.
    NotAuthenticated,
    /// Record, invite, group or member is absent (or invisible to the caller).
    NotFound,
    /// The authorization resolver denied the operation.
    Unauthorized,
    /// A required field is missing or malformed.
    Validation,
    /// The write collides with existing state (in-use record, consumed invite).
    Conflict,
    /// The accepting user already belongs to the invite's group.
    AlreadyMember,
    /// The invite is past its expiry.
    Expired,
    /// The group creator cannot leave while co-members remain.
    CannotRemoveCreator,
    /// Storage or runtime failure; details are only in the logs.
    OperationFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::NotAuthenticated,
        ErrorCode::NotFound,
        ErrorCode::Unauthorized,
        ErrorCode::Validation,
        ErrorCode::Conflict,
        ErrorCode::AlreadyMember,
        ErrorCode::Expired,
        ErrorCode::CannotRemoveCreator,
        ErrorCode::OperationFailed,
    ];

    /// Returns the stable machine-readable code string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotAuthenticated => "AUTH/NOT_AUTHENTICATED",
            ErrorCode::NotFound => "RECORD/NOT_FOUND",
            ErrorCode::Unauthorized => "AUTH/UNAUTHORIZED",
            ErrorCode::Validation => "VALIDATION/INVALID",
            ErrorCode::Conflict => "RECORD/CONFLICT",
            ErrorCode::AlreadyMember => "GROUP/ALREADY_MEMBER",
            ErrorCode::Expired => "INVITE/EXPIRED",
            ErrorCode::CannotRemoveCreator => "GROUP/CANNOT_REMOVE_CREATOR",
            ErrorCode::OperationFailed => "APP/OPERATION_FAILED",
        }
    }

    /// Short, user-facing message used when the caller does not supply one.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::NotAuthenticated => "Not authenticated",
            ErrorCode::NotFound => "Not found",
            ErrorCode::Unauthorized => "You don't have permission to do that",
            ErrorCode::Validation => "Some fields are missing or invalid",
            ErrorCode::Conflict => "This change conflicts with existing data",
            ErrorCode::AlreadyMember => "You are already a member of this group",
            ErrorCode::Expired => "This invite has expired",
            ErrorCode::CannotRemoveCreator => {
                "The group creator cannot be removed while other members exist"
            }
            ErrorCode::OperationFailed => "Something went wrong, please try again",
        }
    }

    /// Convenience helper to create an [`AppError`] carrying the default message.
    #[must_use]
    pub fn into_error(self) -> AppError {
        AppError::new(self.as_str(), self.default_message())
    }

    #[must_use]
    pub fn with_message(self, message: impl Into<String>) -> AppError {
        AppError::new(self.as_str(), message)
    }
}

impl From<ErrorCode> for AppError {
    fn from(code: ErrorCode) -> Self {
        code.into_error()
    }
}

/// A structured application error that is serialized across the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    pub fn not_found(what: &str) -> Self {
        ErrorCode::NotFound
            .with_message(format!("{what} not found"))
            .with_context("entity", what.to_ascii_lowercase())
    }

    pub fn unauthorized() -> Self {
        ErrorCode::Unauthorized.into_error()
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ErrorCode::Validation
            .with_message(message)
            .with_context("field", field.to_string())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ErrorCode::Conflict.with_message(message)
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.context.get("retryable").map(String::as_str) == Some("true")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn find_app_error(err: &(dyn StdError + 'static)) -> Option<AppError> {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return Some(app.clone());
            }
            err.source().and_then(find_app_error)
        }

        if let Some(app) = find_app_error(error.as_ref()) {
            return app;
        }
        error!(target: "couplefy", event = "internal_failure", error = %format!("{error:#}"));
        ErrorCode::OperationFailed.into_error()
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let mut app_error = ErrorCode::Validation.with_message("Malformed request payload");
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

/// SQLite primary result codes for `SQLITE_BUSY` and `SQLITE_LOCKED`.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

fn is_retryable_sqlx(error: &SqlxError) -> bool {
    match error {
        SqlxError::PoolTimedOut => true,
        SqlxError::Database(db) => db
            .code()
            .map(|code| {
                let primary = code.parse::<i64>().map(|c| (c & 0xff).to_string());
                matches!(primary.as_deref(), Ok(SQLITE_BUSY) | Ok(SQLITE_LOCKED))
            })
            .unwrap_or(false),
        _ => false,
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        let retryable = is_retryable_sqlx(&error);
        error!(
            target: "couplefy",
            event = "storage_failure",
            retryable,
            error = %error
        );
        let mut app_error = ErrorCode::OperationFailed.into_error();
        if let SqlxError::Database(db) = &error {
            if let Some(code) = db.code() {
                app_error = app_error.with_context("db_code", code.to_string());
            }
        }
        if retryable {
            app_error = app_error.with_context("retryable", "true");
        }
        app_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn builds_error_with_context_and_cause() {
        let error = AppError::new("TEST/CODE", "Something went wrong")
            .with_context("entity", "expense")
            .with_context("id", "1234")
            .with_cause(AppError::from("inner failure"));

        assert_eq!(error.code(), "TEST/CODE");
        assert_eq!(error.message(), "Something went wrong");
        assert_eq!(error.context().get("entity"), Some(&"expense".to_string()));
        assert_eq!(error.context().get("id"), Some(&"1234".to_string()));
        let cause = error.cause().expect("cause present");
        assert_eq!(cause.message(), "inner failure");
        assert_eq!(cause.code(), AppError::GENERIC_CODE);
    }

    #[test]
    fn taxonomy_codes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::ALL {
            assert!(seen.insert(code.as_str()), "duplicate {}", code.as_str());
            assert!(code.into_error().is(code));
        }
    }

    #[test]
    fn anyhow_chain_preserves_inner_app_error() {
        let inner = AppError::conflict("in use");
        let err = AnyhowError::from(inner.clone()).context("outer failure");
        assert_eq!(AppError::from(err), inner);

        let question_mark = || -> anyhow::Result<()> { Err(AppError::unauthorized())? };
        assert!(AppError::from(question_mark().unwrap_err()).is(ErrorCode::Unauthorized));
    }

    #[test]
    fn anyhow_without_app_error_becomes_operation_failed() {
        let err = (|| -> anyhow::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
                .context("failed to open database")
        })()
        .unwrap_err();

        let app_error = AppError::from(err);
        assert!(app_error.is(ErrorCode::OperationFailed));
        assert!(!app_error.message().contains("disk full"));
    }

    #[test]
    fn sqlx_errors_never_leak_storage_text() {
        let err = SqlxError::Protocol("secret table layout".into());
        let app_error = AppError::from(err);
        assert!(app_error.is(ErrorCode::OperationFailed));
        assert!(!app_error.to_string().contains("secret"));
        assert!(!app_error.is_retryable());
    }

    #[test]
    fn pool_timeouts_are_retryable() {
        let app_error = AppError::from(SqlxError::PoolTimedOut);
        assert!(app_error.is(ErrorCode::OperationFailed));
        assert!(app_error.is_retryable());
    }

    #[test]
    fn serde_json_errors_are_validation_failures() {
        let err: SerdeJsonError =
            serde_json::from_str::<serde_json::Value>("{\"amount\": }").expect_err("invalid json");
        let app_error = AppError::from(err);
        assert!(app_error.is(ErrorCode::Validation));
        assert!(app_error.context().contains_key("line"));
    }

    #[test]
    fn json_shape_is_flat_struct() {
        let error = AppError::validation("name", "Name is required");
        let value = serde_json::to_value(&error).expect("serialize app error");
        assert_eq!(
            value.get("code").and_then(|v| v.as_str()),
            Some("VALIDATION/INVALID")
        );
        assert_eq!(
            value
                .get("context")
                .and_then(|c| c.get("field"))
                .and_then(|v| v.as_str()),
            Some("name")
        );
        assert!(value.get("cause").is_none());
    }
}
