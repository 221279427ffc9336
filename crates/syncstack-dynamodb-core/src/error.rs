//! Bridges from internal errors to `DynamoDBError`.
//!
//! The functions take errors by value because they are used as `.map_err()`
//! arguments.

use syncstack_dynamodb_model::error::DynamoDBError;

use crate::cursor::CursorError;
use crate::expression::ExpressionError;
use crate::query::KeyConditionError;
use crate::storage::StorageError;

/// Convert a storage error into a DynamoDB validation error.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn storage_error_to_dynamodb(e: StorageError) -> DynamoDBError {
    DynamoDBError::validation(e.to_string())
}

/// Convert an expression error into its DynamoDB kind.
///
/// Length and nesting caps become `ResourceLimitExceeded`, overlapping update
/// paths `ConflictingClause`, everything else `MalformedExpression`.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn expression_error_to_dynamodb(e: ExpressionError) -> DynamoDBError {
    match e {
        ExpressionError::ConflictingClause { .. } => DynamoDBError::conflicting_clause(e.to_string()),
        ExpressionError::TooLong { .. } | ExpressionError::TooDeep { .. } => {
            DynamoDBError::resource_limit_exceeded(e.to_string())
        }
        _ => DynamoDBError::malformed_expression(e.to_string()),
    }
}

/// Convert a key condition error.
#[must_use]
pub fn key_condition_error_to_dynamodb(e: KeyConditionError) -> DynamoDBError {
    match e {
        KeyConditionError::Expression(inner) => expression_error_to_dynamodb(inner),
        KeyConditionError::Storage(inner) => storage_error_to_dynamodb(inner),
        KeyConditionError::Unsupported(_) => DynamoDBError::validation(e.to_string()),
    }
}

/// Convert a pagination token error.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn cursor_error_to_dynamodb(e: CursorError) -> DynamoDBError {
    DynamoDBError::invalid_cursor(e.to_string())
}
