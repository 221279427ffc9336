//! DynamoDB error types.
//!
//! Every failure the table emulator can report is one `DynamoDBErrorCode`.
//! The short code (`as_str`) names the precise kind; the `__type` string
//! (`error_type`) is what AWS SDKs expect on the wire, which folds the
//! expression-level kinds into `ValidationException`.

use std::fmt;

use crate::types::CancellationReason;

/// Well-known DynamoDB error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum DynamoDBErrorCode {
    /// Request shape or value is invalid.
    #[default]
    ValidationException,
    /// Expression text failed to parse, referenced an unknown placeholder, or
    /// applied an operator to an incompatible type.
    MalformedExpression,
    /// Two clauses of one update expression target overlapping paths.
    ConflictingClause,
    /// Condition expression evaluated to false.
    ConditionalCheckFailedException,
    /// A multi-item write was rejected as a whole.
    TransactionCanceledException,
    /// The operation required an existing item and none was found.
    ItemNotFound,
    /// A pagination token was malformed or issued for a different query.
    InvalidCursor,
    /// An expression or request exceeded a hard size or nesting cap.
    ResourceLimitExceeded,
    /// Table already exists.
    ResourceInUseException,
    /// Table or index not found.
    ResourceNotFoundException,
    /// Request body could not be deserialized.
    SerializationException,
    /// Internal server error.
    InternalServerError,
    /// Missing `X-Amz-Target` header.
    MissingAction,
    /// Unknown operation.
    UnrecognizedClientException,
}

impl DynamoDBErrorCode {
    /// Returns the fully-qualified error type string for JSON `__type` field.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ValidationException
            | Self::MalformedExpression
            | Self::ConflictingClause
            | Self::InvalidCursor => "com.amazon.coral.validate#ValidationException",
            Self::ConditionalCheckFailedException => {
                "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException"
            }
            Self::TransactionCanceledException => {
                "com.amazonaws.dynamodb.v20120810#TransactionCanceledException"
            }
            Self::ItemNotFound => "com.amazonaws.dynamodb.v20120810#ItemNotFoundException",
            Self::ResourceLimitExceeded => "com.amazonaws.dynamodb.v20120810#LimitExceededException",
            Self::ResourceInUseException => {
                "com.amazonaws.dynamodb.v20120810#ResourceInUseException"
            }
            Self::ResourceNotFoundException => {
                "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException"
            }
            Self::SerializationException => {
                "com.amazonaws.dynamodb.v20120810#SerializationException"
            }
            Self::InternalServerError => "com.amazonaws.dynamodb.v20120810#InternalServerError",
            Self::MissingAction => "com.amazonaws.dynamodb.v20120810#MissingAction",
            Self::UnrecognizedClientException => {
                "com.amazonaws.dynamodb.v20120810#UnrecognizedClientException"
            }
        }
    }

    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationException => "ValidationException",
            Self::MalformedExpression => "MalformedExpression",
            Self::ConflictingClause => "ConflictingClause",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::TransactionCanceledException => "TransactionCanceledException",
            Self::ItemNotFound => "ItemNotFound",
            Self::InvalidCursor => "InvalidCursor",
            Self::ResourceLimitExceeded => "ResourceLimitExceeded",
            Self::ResourceInUseException => "ResourceInUseException",
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::SerializationException => "SerializationException",
            Self::InternalServerError => "InternalServerError",
            Self::MissingAction => "MissingAction",
            Self::UnrecognizedClientException => "UnrecognizedClientException",
        }
    }

    /// Returns the default HTTP status code for this error.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        match self {
            Self::InternalServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
            _ => http::StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for DynamoDBErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DynamoDB error response.
#[derive(Debug)]
pub struct DynamoDBError {
    /// The error code.
    pub code: DynamoDBErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The HTTP status code.
    pub status_code: http::StatusCode,
    /// Per-operation outcome for a canceled transaction, in request order.
    pub cancellation_reasons: Vec<CancellationReason>,
    /// The underlying source error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for DynamoDBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamoDBError({}): {}", self.code, self.message)
    }
}

impl std::error::Error for DynamoDBError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl DynamoDBError {
    /// Create a new `DynamoDBError` from an error code.
    #[must_use]
    pub fn new(code: DynamoDBErrorCode) -> Self {
        Self::with_message(code, code.as_str())
    }

    /// Create a new `DynamoDBError` with a custom message.
    #[must_use]
    pub fn with_message(code: DynamoDBErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code: code.default_status_code(),
            message: message.into(),
            code,
            cancellation_reasons: Vec::new(),
            source: None,
        }
    }

    /// Set the source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the `__type` string for the JSON error response.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        self.code.error_type()
    }

    // -- Convenience constructors --

    /// Table already exists.
    #[must_use]
    pub fn resource_in_use(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ResourceInUseException, message)
    }

    /// Table or index not found.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ResourceNotFoundException, message)
    }

    /// Condition expression evaluated to false.
    #[must_use]
    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ConditionalCheckFailedException, message)
    }

    /// Transaction canceled; `reasons` holds one entry per requested operation.
    #[must_use]
    pub fn transaction_canceled(reasons: Vec<CancellationReason>) -> Self {
        let codes: Vec<&str> = reasons.iter().map(|r| r.code.as_deref().unwrap_or("None")).collect();
        let mut err = Self::with_message(
            DynamoDBErrorCode::TransactionCanceledException,
            format!(
                "Transaction cancelled, please refer cancellation reasons for specific reasons [{}]",
                codes.join(", ")
            ),
        );
        err.cancellation_reasons = reasons;
        err
    }

    /// Malformed expression.
    #[must_use]
    pub fn malformed_expression(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::MalformedExpression, message)
    }

    /// Overlapping update clauses.
    #[must_use]
    pub fn conflicting_clause(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ConflictingClause, message)
    }

    /// Required item missing.
    #[must_use]
    pub fn item_not_found(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ItemNotFound, message)
    }

    /// Bad pagination token.
    #[must_use]
    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::InvalidCursor, message)
    }

    /// Hard cap exceeded.
    #[must_use]
    pub fn resource_limit_exceeded(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ResourceLimitExceeded, message)
    }

    /// Validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ValidationException, message)
    }

    /// Serialization error.
    #[must_use]
    pub fn serialization_exception(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::SerializationException, message)
    }

    /// Internal server error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::InternalServerError, message)
    }

    /// Missing action header.
    #[must_use]
    pub fn missing_action() -> Self {
        Self::with_message(
            DynamoDBErrorCode::MissingAction,
            "Missing required header: X-Amz-Target",
        )
    }

    /// Unknown operation.
    #[must_use]
    pub fn unknown_operation(target: &str) -> Self {
        Self::with_message(
            DynamoDBErrorCode::UnrecognizedClientException,
            format!("Unrecognized operation: {target}"),
        )
    }
}

/// Create a `DynamoDBError` from an error code.
///
/// # Examples
///
/// ```
/// use syncstack_dynamodb_model::dynamodb_error;
/// use syncstack_dynamodb_model::error::DynamoDBErrorCode;
///
/// let err = dynamodb_error!(InvalidCursor);
/// assert_eq!(err.code, DynamoDBErrorCode::InvalidCursor);
///
/// let err = dynamodb_error!(ResourceNotFoundException, "Table not found");
/// assert_eq!(err.message, "Table not found");
/// ```
#[macro_export]
macro_rules! dynamodb_error {
    ($code:ident) => {
        $crate::error::DynamoDBError::new($crate::error::DynamoDBErrorCode::$code)
    };
    ($code:ident, $msg:expr) => {
        $crate::error::DynamoDBError::with_message($crate::error::DynamoDBErrorCode::$code, $msg)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_fold_expression_errors_into_validation_wire_type() {
        let err = DynamoDBError::malformed_expression("bad token");
        assert_eq!(err.code.as_str(), "MalformedExpression");
        assert_eq!(err.error_type(), "com.amazon.coral.validate#ValidationException");
        assert_eq!(err.status_code, http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_should_list_reason_codes_in_transaction_message() {
        let err = DynamoDBError::transaction_canceled(vec![
            CancellationReason::none(),
            CancellationReason::conditional_check_failed(),
        ]);
        assert_eq!(err.cancellation_reasons.len(), 2);
        assert!(err.message.ends_with("[None, ConditionalCheckFailed]"));
    }
}
