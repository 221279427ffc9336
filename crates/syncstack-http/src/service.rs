//! SyncStack HTTP service implementing the hyper `Service` trait.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tracing::debug;

use syncstack_appsync_core::SyncStackAppSync;
use syncstack_appsync_model::{AppSyncError, GraphQLRequest, OperationType};
use syncstack_dynamodb_core::SyncStackDynamoDB;
use syncstack_dynamodb_model::DynamoDBError;

use crate::body::SyncStackBody;
use crate::dispatch::dispatch_dynamodb;
use crate::response::{
    error_to_response, graphql_error, graphql_response, health_response, not_found,
};
use crate::router::{Route, resolve_operation, route};

/// Hyper `Service` serving the table protocol and, when an API is loaded,
/// the GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct SyncStackHttpService {
    dynamodb: Arc<SyncStackDynamoDB>,
    appsync: Option<Arc<SyncStackAppSync>>,
}

impl SyncStackHttpService {
    /// Create a new service.
    #[must_use]
    pub fn new(dynamodb: Arc<SyncStackDynamoDB>, appsync: Option<Arc<SyncStackAppSync>>) -> Self {
        Self { dynamodb, appsync }
    }

    /// Handle a request whose body has already been collected.
    pub async fn handle(
        &self,
        parts: &http::request::Parts,
        body: Bytes,
        request_id: &str,
    ) -> http::Response<SyncStackBody> {
        match route(&parts.method, parts.uri.path(), &parts.headers) {
            Route::Health => health_response(self.appsync.is_some()),
            Route::NotFound => not_found(parts.uri.path()),
            Route::DynamoDB => self.handle_dynamodb(parts, &body, request_id),
            Route::GraphQL => match &self.appsync {
                Some(appsync) => handle_graphql(appsync, parts, &body).await,
                None => not_found(parts.uri.path()),
            },
        }
    }

    fn handle_dynamodb(
        &self,
        parts: &http::request::Parts,
        body: &[u8],
        request_id: &str,
    ) -> http::Response<SyncStackBody> {
        if parts.method != http::Method::POST {
            let err = DynamoDBError::validation(format!(
                "DynamoDB requires POST method, got {}",
                parts.method,
            ));
            return error_to_response(&err, request_id);
        }

        let op = match resolve_operation(&parts.headers) {
            Ok(op) => op,
            Err(err) => return error_to_response(&err, request_id),
        };
        debug!(operation = op.as_str(), request_id, "dispatching table operation");

        match dispatch_dynamodb(&self.dynamodb, op, body, request_id) {
            Ok(response) => response,
            Err(err) => {
                debug!(operation = op.as_str(), code = err.code.as_str(), "table operation failed");
                error_to_response(&err, request_id)
            }
        }
    }
}

async fn handle_graphql(
    appsync: &SyncStackAppSync,
    parts: &http::request::Parts,
    body: &[u8],
) -> http::Response<SyncStackBody> {
    if parts.method != http::Method::POST {
        return graphql_error(AppSyncError::bad_request(format!(
            "GraphQL requires POST method, got {}",
            parts.method,
        )));
    }
    let request: GraphQLRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            return graphql_error(AppSyncError::bad_request(format!(
                "Invalid GraphQL request: {e}"
            )));
        }
    };
    if request.operation.operation_type == OperationType::Subscription {
        return graphql_error(AppSyncError::bad_request(
            "Subscriptions are not available over HTTP",
        ));
    }
    graphql_response(&appsync.execute(&request).await)
}

impl hyper::service::Service<http::Request<Incoming>> for SyncStackHttpService {
    type Response = http::Response<SyncStackBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let service = self.clone();
        let request_id = uuid::Uuid::new_v4().to_string();

        Box::pin(async move {
            let (parts, incoming) = req.into_parts();
            let response = match collect_body(incoming).await {
                Ok(body) => service.handle(&parts, body, &request_id).await,
                Err(err) => error_to_response(&err, &request_id),
            };
            Ok(add_common_headers(response, &request_id))
        })
    }
}

/// Collect the incoming body into a single `Bytes` buffer.
async fn collect_body(incoming: Incoming) -> Result<Bytes, DynamoDBError> {
    incoming
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| DynamoDBError::internal_error(format!("Failed to read request body: {e}")))
}

/// Add common response headers to every response.
fn add_common_headers(
    mut response: http::Response<SyncStackBody>,
    request_id: &str,
) -> http::Response<SyncStackBody> {
    let headers = response.headers_mut();

    if let Ok(hv) = http::HeaderValue::from_str(request_id) {
        headers.entry("x-amzn-requestid").or_insert(hv);
    }
    headers.insert("server", http::HeaderValue::from_static("SyncStack"));
    headers.insert(
        "access-control-allow-origin",
        http::HeaderValue::from_static("*"),
    );

    response
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use syncstack_appsync_core::AppSyncConfig;
    use syncstack_appsync_model::Definition;
    use syncstack_dynamodb_core::DynamoDBConfig;

    use super::*;

    fn parts(method: http::Method, path: &str, target: Option<&str>) -> http::request::Parts {
        let mut builder = http::Request::builder().method(method).uri(path);
        if let Some(target) = target {
            builder = builder.header("x-amz-target", target);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn body_json(resp: http::Response<SyncStackBody>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn service() -> SyncStackHttpService {
        let provider = Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()));
        let definition: Definition = serde_json::from_value(json!({
            "dataSources": [{"name": "local", "type": "NONE"}],
            "resolvers": [{
                "typeName": "Query",
                "fieldName": "echo",
                "dataSource": "local",
                "requestMappingTemplate": "{\"payload\": $util.toJson($ctx.args.msg)}",
                "responseMappingTemplate": "$util.toJson($ctx.result)"
            }]
        }))
        .unwrap();
        let appsync = SyncStackAppSync::from_definition(
            &definition,
            Arc::clone(&provider),
            None,
            &AppSyncConfig::default(),
        )
        .unwrap();
        SyncStackHttpService::new(provider, Some(Arc::new(appsync)))
    }

    #[tokio::test]
    async fn test_should_report_health() {
        let svc = service();
        let resp = svc
            .handle(&parts(http::Method::GET, "/health", None), Bytes::new(), "r")
            .await;
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(body_json(resp).await["services"]["graphql"], "running");
    }

    #[tokio::test]
    async fn test_should_serve_table_operations() {
        let svc = service();
        let resp = svc
            .handle(
                &parts(
                    http::Method::POST,
                    "/",
                    Some("DynamoDB_20120810.ListTables"),
                ),
                Bytes::from_static(b"{}"),
                "r",
            )
            .await;
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(body_json(resp).await["TableNames"], json!([]));
    }

    #[tokio::test]
    async fn test_should_format_table_errors() {
        let svc = service();
        let resp = svc
            .handle(&parts(http::Method::POST, "/", None), Bytes::new(), "r")
            .await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(
            body["__type"],
            "com.amazonaws.dynamodb.v20120810#MissingAction"
        );
    }

    #[tokio::test]
    async fn test_should_execute_graphql_query() {
        let svc = service();
        let request = json!({
            "operation": {
                "operationType": "query",
                "selections": [{"name": "echo", "arguments": {"msg": "hi"}}]
            }
        });
        let resp = svc
            .handle(
                &parts(http::Method::POST, "/graphql", None),
                Bytes::from(request.to_string()),
                "r",
            )
            .await;
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["echo"], "hi");
    }

    #[tokio::test]
    async fn test_should_reject_subscription_and_bad_json_over_http() {
        let svc = service();
        let request = json!({
            "operation": {
                "operationType": "subscription",
                "selections": [{"name": "onEcho"}]
            }
        });
        let resp = svc
            .handle(
                &parts(http::Method::POST, "/graphql", None),
                Bytes::from(request.to_string()),
                "r",
            )
            .await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);

        let resp = svc
            .handle(
                &parts(http::Method::POST, "/graphql", None),
                Bytes::from_static(b"{"),
                "r",
            )
            .await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await["errors"][0]["errorType"],
            "BadRequestException"
        );
    }

    #[tokio::test]
    async fn test_should_return_not_found_for_unknown_paths() {
        let svc = SyncStackHttpService::new(
            Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default())),
            None,
        );
        let resp = svc
            .handle(&parts(http::Method::POST, "/graphql", None), Bytes::new(), "r")
            .await;
        assert_eq!(resp.status(), http::StatusCode::NOT_FOUND);
    }
}
