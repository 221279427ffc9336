//! GraphQL operation executor.
//!
//! [`SyncStackAppSync`] is built once from an emulator [`Definition`] and
//! then serves pre-parsed operations. Query root fields resolve concurrently,
//! mutation root fields serially in document order. A field without a
//! resolver takes `source[fieldName]`. Failed fields become `null` and add a
//! field error with their path.

use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicBool},
};

use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use syncstack_appsync_model::{
    AppSyncError, Definition, FieldError, GraphQLRequest, GraphQLResponse, OperationType,
    PathSegment, Selection, SubscriptionFilter,
};
use syncstack_dynamodb_core::SyncStackDynamoDB;
use syncstack_dynamodb_model::input::{CreateTableInput, DeleteTableInput};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    config::AppSyncConfig,
    context::{ResolverContext, ResolverInfo},
    datasource::{DataSourceRouter, FunctionInvoker},
    pipeline::{PipelineFunction, Resolver},
    subscription::{Subscription, SubscriptionBroker},
    template::TemplateLimits,
};

/// The AppSync emulator.
#[derive(Debug)]
pub struct SyncStackAppSync {
    provider: Arc<SyncStackDynamoDB>,
    router: DataSourceRouter,
    resolvers: HashMap<String, Resolver>,
    broker: SubscriptionBroker,
    limits: TemplateLimits,
    permits: Semaphore,
}

/// Per-operation state shared by its field resolutions.
#[derive(Debug)]
struct Execution<'r> {
    variables: &'r Map<String, Value>,
    identity: &'r Value,
    cancelled: &'r AtomicBool,
    errors: Mutex<Vec<FieldError>>,
}

impl Execution<'_> {
    fn fail(&self, error: AppSyncError, path: &[PathSegment]) {
        self.errors.lock().push(error.into_field_error(path.to_vec()));
    }
}

fn resolver_key(type_name: &str, field_name: &str) -> String {
    format!("{type_name}.{field_name}")
}

fn child_path(path: &[PathSegment], segment: PathSegment) -> Vec<PathSegment> {
    let mut child = Vec::with_capacity(path.len() + 1);
    child.extend_from_slice(path);
    child.push(segment);
    child
}

/// Create every table of a definition. Tables created before a failure are
/// dropped again so a rejected definition leaves the store as it was.
fn create_tables(provider: &SyncStackDynamoDB, tables: &[CreateTableInput]) -> Result<(), AppSyncError> {
    for (created, table) in tables.iter().enumerate() {
        if let Err(e) = provider.handle_create_table(table.clone()) {
            for earlier in &tables[..created] {
                if let Err(rollback) = provider.handle_delete_table(DeleteTableInput {
                    table_name: earlier.table_name.clone(),
                }) {
                    warn!(table = %earlier.table_name, error = %rollback.message, "failed to drop table of rejected definition");
                }
            }
            return Err(AppSyncError::invalid_definition(format!(
                "Table '{}' could not be created: {}",
                table.table_name, e.message
            ))
            .with_source(e));
        }
    }
    Ok(())
}

impl SyncStackAppSync {
    /// Load a definition: compile data sources, functions, resolvers and
    /// subscription bindings, then create its tables.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition`, `UnsupportedDataSource` or
    /// `TemplateEvaluationError` when the definition is inconsistent.
    pub fn from_definition(
        definition: &Definition,
        provider: Arc<SyncStackDynamoDB>,
        invoker: Option<Arc<dyn FunctionInvoker>>,
        config: &AppSyncConfig,
    ) -> Result<Self, AppSyncError> {
        let limits = config.template_limits();

        let router = DataSourceRouter::load(&definition.data_sources, &provider, invoker.as_ref())?;

        let mut functions = HashMap::with_capacity(definition.functions.len());
        for def in &definition.functions {
            let function = PipelineFunction::load(def, &router, &limits)?;
            if functions.insert(def.name.clone(), Arc::new(function)).is_some() {
                return Err(AppSyncError::invalid_definition(format!(
                    "Duplicate function '{}'",
                    def.name
                )));
            }
        }

        let mut resolvers = HashMap::with_capacity(definition.resolvers.len());
        for def in &definition.resolvers {
            let key = resolver_key(&def.type_name, &def.field_name);
            let resolver = Resolver::load(def, &functions, &router, &limits)?;
            if resolvers.insert(key.clone(), resolver).is_some() {
                return Err(AppSyncError::invalid_definition(format!(
                    "Duplicate resolver for {key}"
                )));
            }
        }

        create_tables(&provider, &definition.tables)?;

        info!(
            tables = definition.tables.len(),
            data_sources = definition.data_sources.len(),
            functions = functions.len(),
            resolvers = resolvers.len(),
            subscriptions = definition.subscriptions.len(),
            "AppSync definition loaded"
        );

        Ok(Self {
            provider,
            router,
            resolvers,
            broker: SubscriptionBroker::new(&definition.subscriptions, config.subscription_buffer),
            limits,
            permits: Semaphore::new(config.max_concurrent_operations.max(1)),
        })
    }

    /// The table store behind `AMAZON_DYNAMODB` data sources.
    #[must_use]
    pub fn provider(&self) -> &Arc<SyncStackDynamoDB> {
        &self.provider
    }

    /// The subscription registry.
    #[must_use]
    pub fn broker(&self) -> &SubscriptionBroker {
        &self.broker
    }

    /// Execute a query or mutation.
    pub async fn execute(&self, request: &GraphQLRequest) -> GraphQLResponse {
        self.execute_cancellable(request, &AtomicBool::new(false)).await
    }

    /// Execute a query or mutation, abandoning data source invocations not
    /// yet started once `cancelled` is set. Writes already applied stay.
    pub async fn execute_cancellable(
        &self,
        request: &GraphQLRequest,
        cancelled: &AtomicBool,
    ) -> GraphQLResponse {
        let operation = &request.operation;
        if operation.operation_type == OperationType::Subscription {
            return error_response(AppSyncError::bad_request(
                "Subscription operations must be registered with subscribe",
            ));
        }
        let Ok(_permit) = self.permits.acquire().await else {
            return error_response(AppSyncError::internal("Executor is shutting down"));
        };

        let root = operation.operation_type.root_type_name();
        debug!(operation = ?operation.name, root, fields = operation.selections.len(), "executing operation");
        let identity = request.identity.clone().unwrap_or(Value::Null);
        let exec = Execution {
            variables: &request.variables,
            identity: &identity,
            cancelled,
            errors: Mutex::new(Vec::new()),
        };

        let mut data = Map::new();
        match operation.operation_type {
            OperationType::Query => {
                let values = join_all(operation.selections.iter().map(|selection| {
                    let path = vec![PathSegment::Key(selection.response_key().to_owned())];
                    self.resolve_field(&exec, root, selection, &Value::Null, path)
                }))
                .await;
                for (selection, value) in operation.selections.iter().zip(values) {
                    data.insert(selection.response_key().to_owned(), value);
                }
            }
            OperationType::Mutation | OperationType::Subscription => {
                for selection in &operation.selections {
                    let path = vec![PathSegment::Key(selection.response_key().to_owned())];
                    let value = match self
                        .run_resolver(&exec, root, selection, &Value::Null, &path)
                        .await
                    {
                        Some(raw) => {
                            if !raw.is_null() && self.broker.is_trigger(&selection.name) {
                                self.broker.publish(&selection.name, &raw);
                            }
                            self.complete(&exec, selection, raw, path).await
                        }
                        None => Value::Null,
                    };
                    data.insert(selection.response_key().to_owned(), value);
                }
            }
        }

        GraphQLResponse {
            data: Some(Value::Object(data)),
            errors: exec.errors.into_inner(),
        }
    }

    /// Register a subscription operation for `connection_id`.
    ///
    /// A resolver attached to the subscription field runs first; if it fails
    /// (for example through `$util.unauthorized()`), nothing is registered.
    ///
    /// # Errors
    ///
    /// `BadRequestException` when the operation is not a subscription with
    /// exactly one root field, or the error of the subscription resolver.
    pub async fn subscribe(
        &self,
        connection_id: &str,
        request: &GraphQLRequest,
        filter: Option<SubscriptionFilter>,
    ) -> Result<Subscription, AppSyncError> {
        let operation = &request.operation;
        if operation.operation_type != OperationType::Subscription {
            return Err(AppSyncError::bad_request("Operation is not a subscription"));
        }
        let [selection] = operation.selections.as_slice() else {
            return Err(AppSyncError::bad_request(
                "A subscription must select exactly one root field",
            ));
        };
        let arguments = selection.resolve_arguments(&request.variables);

        let root = operation.operation_type.root_type_name();
        if let Some(resolver) = self.resolvers.get(&resolver_key(root, &selection.name)) {
            let mut ctx = Self::context(
                root,
                selection,
                arguments.clone(),
                request.identity.clone().unwrap_or(Value::Null),
                Value::Null,
                &request.variables,
            );
            resolver
                .resolve(&mut ctx, &self.router, &self.limits, &AtomicBool::new(false))
                .await?;
        }

        self.broker
            .subscribe(connection_id, selection, arguments, filter)
    }

    fn context(
        parent_type: &str,
        selection: &Selection,
        arguments: Map<String, Value>,
        identity: Value,
        source: Value,
        variables: &Map<String, Value>,
    ) -> ResolverContext {
        ResolverContext::new(
            arguments,
            identity,
            source,
            ResolverInfo {
                field_name: selection.name.clone(),
                parent_type_name: parent_type.to_owned(),
                variables: variables.clone(),
                selection_set_list: selection.selection_set_list(),
            },
        )
    }

    /// The field's own value before nested selections are applied. `None`
    /// when the field failed; the error is already recorded.
    async fn run_resolver(
        &self,
        exec: &Execution<'_>,
        parent_type: &str,
        selection: &Selection,
        source: &Value,
        path: &[PathSegment],
    ) -> Option<Value> {
        if selection.name == "__typename" {
            return Some(Value::String(parent_type.to_owned()));
        }
        let Some(resolver) = self.resolvers.get(&resolver_key(parent_type, &selection.name)) else {
            return Some(source.get(&selection.name).cloned().unwrap_or(Value::Null));
        };

        let mut ctx = Self::context(
            parent_type,
            selection,
            selection.resolve_arguments(exec.variables),
            exec.identity.clone(),
            source.clone(),
            exec.variables,
        );
        let result = resolver
            .resolve(&mut ctx, &self.router, &self.limits, exec.cancelled)
            .await;
        for appended in ctx.appended_errors.drain(..) {
            exec.fail(appended, path);
        }
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(field = %format_args!("{parent_type}.{}", selection.name), error = %e, "field failed");
                exec.fail(e, path);
                None
            }
        }
    }

    fn resolve_field<'a>(
        &'a self,
        exec: &'a Execution<'a>,
        parent_type: &'a str,
        selection: &'a Selection,
        source: &'a Value,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'a, Value> {
        async move {
            match self.run_resolver(exec, parent_type, selection, source, &path).await {
                Some(value) => self.complete(exec, selection, value, path).await,
                None => Value::Null,
            }
        }
        .boxed()
    }

    /// Apply nested selections to a resolved value.
    fn complete<'a>(
        &'a self,
        exec: &'a Execution<'a>,
        selection: &'a Selection,
        value: Value,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'a, Value> {
        async move {
            if selection.selections.is_empty() {
                return value;
            }
            let type_name = selection.return_type.as_deref().unwrap_or_default();
            match value {
                Value::Array(items) => {
                    let completed = join_all(items.into_iter().enumerate().map(|(i, item)| {
                        self.complete(exec, selection, item, child_path(&path, PathSegment::Index(i)))
                    }))
                    .await;
                    Value::Array(completed)
                }
                Value::Object(_) => {
                    let fields = join_all(selection.selections.iter().map(|child| {
                        let key_path = child_path(&path, PathSegment::Key(child.response_key().to_owned()));
                        self.resolve_field(exec, type_name, child, &value, key_path)
                    }))
                    .await;
                    Value::Object(
                        selection
                            .selections
                            .iter()
                            .map(|child| child.response_key().to_owned())
                            .zip(fields)
                            .collect(),
                    )
                }
                other => other,
            }
        }
        .boxed()
    }
}

fn error_response(error: AppSyncError) -> GraphQLResponse {
    GraphQLResponse {
        data: None,
        errors: vec![error.into_field_error(Vec::new())],
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use syncstack_appsync_model::AppSyncErrorCode;
    use syncstack_dynamodb_core::DynamoDBConfig;

    use super::*;

    fn definition() -> Definition {
        serde_json::from_value(json!({
            "tables": [{
                "TableName": "Posts",
                "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}],
                "AttributeDefinitions": [{"AttributeName": "id", "AttributeType": "S"}]
            }],
            "dataSources": [
                {"name": "posts", "type": "AMAZON_DYNAMODB", "tableName": "Posts"},
                {"name": "local", "type": "NONE"}
            ],
            "resolvers": [
                {
                    "typeName": "Mutation",
                    "fieldName": "createPost",
                    "dataSource": "posts",
                    "requestMappingTemplate": "{\"operation\": \"PutItem\", \"key\": {\"id\": $util.dynamodb.toDynamoDBJson($ctx.args.id)}, \"attributeValues\": $util.dynamodb.toMapValuesJson($ctx.args.input)}",
                    "responseMappingTemplate": "$util.toJson($ctx.result)"
                },
                {
                    "typeName": "Query",
                    "fieldName": "getPost",
                    "dataSource": "posts",
                    "requestMappingTemplate": "{\"operation\": \"GetItem\", \"key\": {\"id\": $util.dynamodb.toDynamoDBJson($ctx.args.id)}}",
                    "responseMappingTemplate": "$util.toJson($ctx.result)"
                },
                {
                    "typeName": "Post",
                    "fieldName": "shout",
                    "dataSource": "local",
                    "requestMappingTemplate": "{\"payload\": \"$ctx.source.title.toUpperCase()\"}",
                    "responseMappingTemplate": "$util.toJson($ctx.result)"
                },
                {
                    "typeName": "Query",
                    "fieldName": "fail",
                    "dataSource": "local",
                    "requestMappingTemplate": "$util.error(\"nope\", \"Boom\")",
                    "responseMappingTemplate": "null"
                }
            ],
            "subscriptions": [{"fieldName": "onCreatePost", "mutations": ["createPost"]}]
        }))
        .unwrap()
    }

    fn table_names(provider: &SyncStackDynamoDB) -> Vec<String> {
        provider
            .handle_list_tables(syncstack_dynamodb_model::input::ListTablesInput::default())
            .unwrap()
            .table_names
    }

    fn appsync() -> SyncStackAppSync {
        let provider = Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()));
        SyncStackAppSync::from_definition(&definition(), provider, None, &AppSyncConfig::default()).unwrap()
    }

    fn request(operation: Value, variables: Value) -> GraphQLRequest {
        serde_json::from_value(json!({"operation": operation, "variables": variables})).unwrap()
    }

    fn create_post() -> GraphQLRequest {
        request(
            json!({
                "operationType": "mutation",
                "selections": [{
                    "name": "createPost",
                    "arguments": {"id": {"$variable": "id"}, "input": {"title": "hello", "tags": ["a", "b"]}},
                    "returnType": "Post",
                    "selections": [{"name": "id"}, {"name": "shout"}, {"name": "__typename"}]
                }]
            }),
            json!({"id": "p1"}),
        )
    }

    #[tokio::test]
    async fn test_should_run_mutation_with_nested_and_default_resolvers() {
        let appsync = appsync();
        let response = appsync.execute(&create_post()).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.unwrap(),
            json!({"createPost": {"id": "p1", "shout": "HELLO", "__typename": "Post"}})
        );
    }

    #[tokio::test]
    async fn test_should_null_failed_field_and_keep_siblings() {
        let appsync = appsync();
        appsync.execute(&create_post()).await;
        let response = appsync
            .execute(&request(
                json!({
                    "operationType": "query",
                    "selections": [
                        {"name": "fail"},
                        {"name": "getPost", "alias": "post", "arguments": {"id": "p1"}, "returnType": "Post",
                         "selections": [{"name": "tags"}]}
                    ]
                }),
                json!({}),
            ))
            .await;
        assert_eq!(
            response.data.unwrap(),
            json!({"fail": null, "post": {"tags": ["a", "b"]}})
        );
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].error_type.as_deref(), Some("Boom"));
        assert_eq!(response.errors[0].path, vec![PathSegment::Key("fail".to_owned())]);
    }

    #[tokio::test]
    async fn test_should_publish_mutation_to_subscribers() {
        let appsync = appsync();
        let subscription = request(
            json!({
                "operationType": "subscription",
                "selections": [{"name": "onCreatePost", "selections": [{"name": "id"}, {"name": "title"}]}]
            }),
            json!({}),
        );
        let mut sub = appsync.subscribe("conn-1", &subscription, None).await.unwrap();
        appsync.execute(&create_post()).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.data, json!({"onCreatePost": {"id": "p1", "title": "hello"}}));

        let rejected = appsync.execute(&subscription).await;
        assert!(rejected.data.is_none());
        assert_eq!(rejected.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_should_skip_invocation_when_cancelled() {
        let appsync = appsync();
        let response = appsync
            .execute_cancellable(&create_post(), &AtomicBool::new(true))
            .await;
        assert_eq!(response.data.unwrap(), json!({"createPost": null}));
        assert_eq!(response.errors[0].error_type.as_deref(), Some("Cancelled"));
        let scan = appsync
            .provider()
            .handle_scan(syncstack_dynamodb_model::input::ScanInput {
                table_name: "Posts".to_owned(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(scan.count, 0);
    }

    #[test]
    fn test_should_reject_inconsistent_definitions() {
        let provider = Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()));
        let mut def = definition();
        def.data_sources[1].source_type = "HTTP".to_owned();
        let err = SyncStackAppSync::from_definition(&def, Arc::clone(&provider), None, &AppSyncConfig::default())
            .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::UnsupportedDataSource);
        assert!(table_names(&provider).is_empty());

        let provider = Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()));
        let mut def = definition();
        def.resolvers[1].request_mapping_template = Some("#macro(x)#end".to_owned());
        let err = SyncStackAppSync::from_definition(&def, Arc::clone(&provider), None, &AppSyncConfig::default())
            .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::TemplateEvaluationError);
        assert!(table_names(&provider).is_empty());
    }

    #[test]
    fn test_should_drop_created_tables_when_a_later_table_fails() {
        let provider = Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()));
        let mut existing = definition().tables.remove(0);
        existing.table_name = "Existing".to_owned();
        provider.handle_create_table(existing.clone()).unwrap();

        let mut def = definition();
        def.tables.push(existing);
        let err = SyncStackAppSync::from_definition(&def, Arc::clone(&provider), None, &AppSyncConfig::default())
            .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::InvalidDefinition);
        assert_eq!(table_names(&provider), vec!["Existing".to_owned()]);

        SyncStackAppSync::from_definition(&definition(), Arc::clone(&provider), None, &AppSyncConfig::default())
            .unwrap();
        assert_eq!(table_names(&provider), vec!["Existing".to_owned(), "Posts".to_owned()]);
    }
}
