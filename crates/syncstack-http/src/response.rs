//! Response serialization and error formatting.

use serde_json::json;
use syncstack_appsync_model::{AppSyncError, GraphQLResponse};
use syncstack_dynamodb_model::DynamoDBError;

use crate::body::SyncStackBody;

/// Content type for table protocol responses.
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Content type for GraphQL responses.
pub const GRAPHQL_CONTENT_TYPE: &str = "application/json";

/// Serialize a table error into a JSON body:
///
/// ```json
/// {
///   "__type": "com.amazonaws.dynamodb.v20120810#TransactionCanceledException",
///   "message": "Transaction cancelled, please refer cancellation reasons for specific reasons",
///   "CancellationReasons": [{"Code": "None"}, {"Code": "ConditionalCheckFailed"}]
/// }
/// ```
#[must_use]
pub fn error_to_json(error: &DynamoDBError) -> Vec<u8> {
    let mut body = json!({
        "__type": error.error_type(),
        "message": error.message,
    });
    if !error.cancellation_reasons.is_empty() {
        body["CancellationReasons"] = json!(error.cancellation_reasons);
    }
    body.to_string().into_bytes()
}

/// Convert a table error into a complete HTTP error response.
#[must_use]
pub fn error_to_response(error: &DynamoDBError, request_id: &str) -> http::Response<SyncStackBody> {
    table_response(error.status_code, error_to_json(error), request_id)
}

/// Build a table protocol success response from JSON bytes.
#[must_use]
pub fn json_response(json: Vec<u8>, request_id: &str) -> http::Response<SyncStackBody> {
    table_response(http::StatusCode::OK, json, request_id)
}

fn table_response(status: http::StatusCode, json: Vec<u8>, request_id: &str) -> http::Response<SyncStackBody> {
    let crc = crc32fast::hash(&json);
    let mut response = http::Response::new(SyncStackBody::from_bytes(json));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert("content-type", http::HeaderValue::from_static(CONTENT_TYPE));
    if let Ok(hv) = http::HeaderValue::from_str(request_id) {
        headers.insert("x-amzn-requestid", hv);
    }
    headers.insert("x-amz-crc32", http::HeaderValue::from(crc));
    response
}

/// Serialize a GraphQL response with status 200.
#[must_use]
pub fn graphql_response(response: &GraphQLResponse) -> http::Response<SyncStackBody> {
    let body = serde_json::to_vec(response).unwrap_or_else(|e| {
        json!({"errors": [{"message": format!("Failed to serialize response: {e}"), "errorType": "InternalFailure"}]})
            .to_string()
            .into_bytes()
    });
    plain_json(http::StatusCode::OK, body)
}

/// An operation-level GraphQL error with its code's status.
#[must_use]
pub fn graphql_error(error: AppSyncError) -> http::Response<SyncStackBody> {
    let status = error.code.default_status_code();
    let response = GraphQLResponse {
        data: None,
        errors: vec![error.into_field_error(Vec::new())],
    };
    let mut http_response = graphql_response(&response);
    *http_response.status_mut() = status;
    http_response
}

/// A plain JSON response.
#[must_use]
pub fn plain_json(status: http::StatusCode, body: Vec<u8>) -> http::Response<SyncStackBody> {
    let mut response = http::Response::new(SyncStackBody::from_bytes(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        "content-type",
        http::HeaderValue::from_static(GRAPHQL_CONTENT_TYPE),
    );
    response
}

/// Health probe response listing the running services.
#[must_use]
pub fn health_response(graphql: bool) -> http::Response<SyncStackBody> {
    let graphql = if graphql { "running" } else { "disabled" };
    let body = json!({"services": {"dynamodb": "running", "graphql": graphql}});
    plain_json(http::StatusCode::OK, body.to_string().into_bytes())
}

/// 404 for paths nothing serves.
#[must_use]
pub fn not_found(path: &str) -> http::Response<SyncStackBody> {
    let body = json!({"message": format!("No route for {path}")});
    plain_json(http::StatusCode::NOT_FOUND, body.to_string().into_bytes())
}
