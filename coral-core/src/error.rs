//! Error model for CORAL operations
//!
//! Every layer reports failures as a `(code, message)` pair; exceptions to
//! this rule exist only at API edges where the REST handlers translate a
//! [`CoralError`] into a structured JSON body. Codes are stable integers,
//! grouped by range; each code maps to exactly one [`ErrorKind`], and each
//! kind to one HTTP status.

use thiserror::Error;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,

    // --- generic (1..99) ---
    Internal = 4,
    BadParameter = 10,
    Forbidden = 11,
    LockTimeout = 18,
    ShuttingDown = 30,

    // --- documents & collections (1200..1299) ---
    Conflict = 1200,
    DocumentNotFound = 1202,
    CollectionNotFound = 1203,
    DocumentHandleBad = 1205,
    DuplicateName = 1207,
    UniqueConstraintViolated = 1210,
    IndexNotFound = 1212,
    DuplicateIdentifier = 1213,
    DocumentKeyBad = 1221,
    DatabaseNotFound = 1228,
    IndexCreationFailed = 1235,

    // --- cluster (1450..1499) ---
    ClusterTimeout = 1457,
    ShardSyncCancelled = 1466,
    MustNotChangeShardingAttributes = 1475,
    MustNotChangeSmartJoinAttribute = 1480,
    FollowerRefused = 1487,

    // --- query (1500..1599) ---
    QueryKilled = 1500,
    QueryNumberOutOfRange = 1504,
    QueryDivisionByZero = 1562,
    QueryFunctionNameUnknown = 1577,

    // --- storage engine (3000..3099) ---
    StorageEngine = 3000,
    StorageCorrupted = 3001,
}

/// Coarse classification of an error code, used for HTTP status mapping and
/// retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key, index, collection, or database not found. Non-fatal.
    NotFound,
    /// Unique constraint or revision precondition violation. Non-fatal.
    Conflict,
    /// Server is stopping; the operation terminated early. Not retried.
    Shutdown,
    /// A cluster-internal network deadline expired.
    ClusterTimeout,
    /// Malformed user input, returned verbatim.
    BadParameter,
    /// Assertion-level violation.
    Internal,
    /// Mapped from the underlying key-value engine.
    Storage,
}

impl ErrorCode {
    /// Classify this code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::DocumentNotFound
            | ErrorCode::CollectionNotFound
            | ErrorCode::IndexNotFound
            | ErrorCode::DatabaseNotFound => ErrorKind::NotFound,

            ErrorCode::Conflict
            | ErrorCode::UniqueConstraintViolated
            | ErrorCode::DuplicateName
            | ErrorCode::DuplicateIdentifier => ErrorKind::Conflict,

            ErrorCode::ShuttingDown => ErrorKind::Shutdown,

            ErrorCode::ClusterTimeout => ErrorKind::ClusterTimeout,

            ErrorCode::BadParameter
            | ErrorCode::Forbidden
            | ErrorCode::DocumentHandleBad
            | ErrorCode::DocumentKeyBad
            | ErrorCode::QueryNumberOutOfRange
            | ErrorCode::QueryFunctionNameUnknown => ErrorKind::BadParameter,

            ErrorCode::StorageEngine | ErrorCode::StorageCorrupted => ErrorKind::Storage,

            _ => ErrorKind::Internal,
        }
    }

    /// The HTTP status this code surfaces as at the REST edge.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadParameter => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Shutdown => 503,
            _ => 500,
        }
    }

    /// Numeric form, for wire bodies.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

// ============================================================================
// ERROR TYPE
// ============================================================================

/// A failed operation: stable code plus human-readable context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (error {})", code.as_i32())]
pub struct CoralError {
    pub code: ErrorCode,
    pub message: String,
}

impl CoralError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Construct with the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::DocumentNotFound => "document not found",
            ErrorCode::CollectionNotFound => "collection or view not found",
            ErrorCode::DatabaseNotFound => "database not found",
            ErrorCode::IndexNotFound => "index not found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::UniqueConstraintViolated => "unique constraint violated",
            ErrorCode::DocumentKeyBad => "illegal document key",
            ErrorCode::DocumentHandleBad => "illegal document handle",
            ErrorCode::BadParameter => "bad parameter",
            ErrorCode::LockTimeout => "lock timeout",
            ErrorCode::ShuttingDown => "shutting down",
            ErrorCode::ClusterTimeout => "cluster internal network timeout",
            ErrorCode::Internal => "internal error",
            _ => "error",
        };
        Self::new(code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadParameter, message)
    }

    /// Whether this error carries the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }
}

impl From<ErrorCode> for CoralError {
    fn from(code: ErrorCode) -> Self {
        Self::from_code(code)
    }
}

/// Result type alias for CORAL operations.
pub type CoralResult<T> = Result<T, CoralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(ErrorCode::DocumentNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(ErrorCode::UniqueConstraintViolated.kind(), ErrorKind::Conflict);
        assert_eq!(ErrorCode::ShuttingDown.kind(), ErrorKind::Shutdown);
        assert_eq!(ErrorCode::BadParameter.kind(), ErrorKind::BadParameter);
        assert_eq!(ErrorCode::Internal.kind(), ErrorKind::Internal);
        assert_eq!(ErrorCode::StorageEngine.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::BadParameter.http_status(), 400);
        assert_eq!(ErrorCode::DocumentNotFound.http_status(), 404);
        assert_eq!(ErrorCode::Conflict.http_status(), 409);
        assert_eq!(ErrorCode::ShuttingDown.http_status(), 503);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn test_error_display_carries_code() {
        let err = CoralError::from_code(ErrorCode::UniqueConstraintViolated);
        let text = err.to_string();
        assert!(text.contains("unique constraint violated"));
        assert!(text.contains("1210"));
    }
}
