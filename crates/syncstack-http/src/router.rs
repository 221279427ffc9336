//! Request routing.
//!
//! Table operations use the `awsJson1_0` protocol: `POST /` with the
//! operation named in the `X-Amz-Target` header:
//!
//! ```text
//! X-Amz-Target: DynamoDB_20120810.PutItem
//! ```
//!
//! GraphQL operations are `POST /graphql`; `GET /health` reports status.

use syncstack_dynamodb_model::{DynamoDBError, DynamoDBOperation};

/// The expected prefix for the `X-Amz-Target` header value.
const TARGET_PREFIX: &str = "DynamoDB_20120810.";

/// Path of the GraphQL endpoint.
pub const GRAPHQL_PATH: &str = "/graphql";

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Table protocol request; the operation is resolved from headers.
    DynamoDB,
    /// GraphQL operation.
    GraphQL,
    /// Health probe.
    Health,
    /// Nothing serves this path.
    NotFound,
}

/// Pick the route for a request.
#[must_use]
pub fn route(method: &http::Method, path: &str, headers: &http::HeaderMap) -> Route {
    if *method == http::Method::GET && matches!(path, "/health" | "/_health") {
        return Route::Health;
    }
    if path == GRAPHQL_PATH {
        return Route::GraphQL;
    }
    let is_table_target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|t| t.starts_with("DynamoDB_"));
    if is_table_target || path == "/" {
        return Route::DynamoDB;
    }
    Route::NotFound
}

/// Resolve a table operation from the `X-Amz-Target` header.
pub fn resolve_operation(headers: &http::HeaderMap) -> Result<DynamoDBOperation, DynamoDBError> {
    let target = headers
        .get("x-amz-target")
        .ok_or_else(DynamoDBError::missing_action)?;

    let target_str = target
        .to_str()
        .map_err(|_| DynamoDBError::missing_action())?;

    let operation_name = target_str
        .strip_prefix(TARGET_PREFIX)
        .ok_or_else(|| DynamoDBError::unknown_operation(target_str))?;

    DynamoDBOperation::from_name(operation_name)
        .ok_or_else(|| DynamoDBError::unknown_operation(target_str))
}
