//! GraphQL scenarios: pipelines, data sources and subscriptions.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};
    use syncstack_appsync_core::{AppSyncConfig, FnInvoker, FunctionInvoker, SyncStackAppSync};
    use syncstack_appsync_model::{
        AppSyncError, AppSyncErrorCode, Definition, GraphQLRequest, SubscriptionFilter,
    };
    use syncstack_dynamodb_model::input::ScanInput;

    use crate::provider;

    fn request(operation: Value, variables: Value) -> GraphQLRequest {
        serde_json::from_value(json!({"operation": operation, "variables": variables})).unwrap()
    }

    fn definition(value: Value) -> Definition {
        serde_json::from_value(value).unwrap()
    }

    fn posts_table() -> Value {
        json!({
            "TableName": "Posts",
            "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}],
            "AttributeDefinitions": [
                {"AttributeName": "id", "AttributeType": "S"},
                {"AttributeName": "status", "AttributeType": "S"}
            ],
            "GlobalSecondaryIndexes": [{
                "IndexName": "by-status",
                "KeySchema": [{"AttributeName": "status", "KeyType": "HASH"}],
                "Projection": {"ProjectionType": "ALL"}
            }]
        })
    }

    fn validate_then_write() -> Definition {
        definition(json!({
            "tables": [posts_table()],
            "dataSources": [
                {"name": "posts", "type": "AMAZON_DYNAMODB", "tableName": "Posts"},
                {"name": "local", "type": "NONE"}
            ],
            "functions": [
                {
                    "name": "validate",
                    "dataSource": "local",
                    "requestMappingTemplate": "{\"payload\": $util.toJson($ctx.args)}",
                    "responseMappingTemplate": "#if($ctx.result.title.length() < 3)$util.qr($ctx.stash.put(\"valid\", false))#else$util.qr($ctx.stash.put(\"valid\", true))#end$util.toJson($ctx.result)"
                },
                {
                    "name": "write",
                    "dataSource": "posts",
                    "requestMappingTemplate": "#if(!$ctx.stash.valid)#return({\"rejected\": true})#end{\"operation\": \"PutItem\", \"key\": {\"id\": $util.dynamodb.toDynamoDBJson($ctx.args.id)}, \"attributeValues\": {\"title\": $util.dynamodb.toDynamoDBJson($ctx.args.title), \"status\": {\"S\": \"A\"}}}",
                    "responseMappingTemplate": "$util.toJson($ctx.result)"
                }
            ],
            "resolvers": [
                {
                    "typeName": "Mutation",
                    "fieldName": "createPost",
                    "kind": "PIPELINE",
                    "functions": ["validate", "write"],
                    "requestMappingTemplate": "{}",
                    "responseMappingTemplate": "$util.toJson($ctx.result)"
                },
                {
                    "typeName": "Query",
                    "fieldName": "postsByStatus",
                    "dataSource": "posts",
                    "requestMappingTemplate": "{\"operation\": \"Query\", \"index\": \"by-status\", \"query\": {\"expression\": \"#s = :s\", \"expressionNames\": {\"#s\": \"status\"}, \"expressionValues\": {\":s\": $util.dynamodb.toDynamoDBJson($ctx.args.status)}}}",
                    "responseMappingTemplate": "$util.toJson($ctx.result.items)"
                }
            ]
        }))
    }

    fn create_post(id: &str, title: &str) -> GraphQLRequest {
        request(
            json!({
                "operationType": "mutation",
                "selections": [{
                    "name": "createPost",
                    "arguments": {"id": id, "title": title}
                }]
            }),
            json!({}),
        )
    }

    fn stored_posts(appsync: &SyncStackAppSync) -> usize {
        appsync
            .provider()
            .handle_scan(ScanInput {
                table_name: "Posts".to_owned(),
                ..Default::default()
            })
            .unwrap()
            .items
            .len()
    }

    #[tokio::test]
    async fn test_should_short_circuit_write_when_validation_fails() {
        let appsync = SyncStackAppSync::from_definition(
            &validate_then_write(),
            provider(),
            None,
            &AppSyncConfig::default(),
        )
        .unwrap();

        let response = appsync.execute(&create_post("p1", "no")).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(response.data.unwrap(), json!({"createPost": {"rejected": true}}));
        assert_eq!(stored_posts(&appsync), 0);

        let response = appsync.execute(&create_post("p2", "a fine title")).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.unwrap()["createPost"]["title"],
            json!("a fine title")
        );
        assert_eq!(stored_posts(&appsync), 1);

        let response = appsync
            .execute(&request(
                json!({
                    "operationType": "query",
                    "selections": [{
                        "name": "postsByStatus",
                        "arguments": {"status": "A"},
                        "returnType": "Post",
                        "selections": [{"name": "id"}]
                    }]
                }),
                json!({}),
            ))
            .await;
        assert_eq!(
            response.data.unwrap(),
            json!({"postsByStatus": [{"id": "p2"}]})
        );
    }

    fn counter_definition() -> Definition {
        definition(json!({
            "tables": [posts_table()],
            "dataSources": [
                {"name": "posts", "type": "AMAZON_DYNAMODB", "tableName": "Posts"},
                {"name": "scorer", "type": "AWS_LAMBDA", "functionName": "score"}
            ],
            "resolvers": [
                {
                    "typeName": "Mutation",
                    "fieldName": "upvote",
                    "dataSource": "posts",
                    "requestMappingTemplate": "{\"operation\": \"UpdateItem\", \"key\": {\"id\": $util.dynamodb.toDynamoDBJson($ctx.args.id)}, \"update\": {\"expression\": \"ADD votes :one\", \"expressionValues\": {\":one\": {\"N\": \"1\"}}}, \"condition\": {\"expression\": \"attribute_exists(id)\"}}",
                    "responseMappingTemplate": "#if($ctx.error)$util.error($ctx.error.message, $ctx.error.type)#end$util.toJson($ctx.result)"
                },
                {
                    "typeName": "Query",
                    "fieldName": "score",
                    "dataSource": "scorer",
                    "requestMappingTemplate": "{\"operation\": \"Invoke\", \"payload\": {\"id\": $util.toJson($ctx.args.id)}}",
                    "responseMappingTemplate": "$util.toJson($ctx.result)"
                }
            ],
            "subscriptions": [{"fieldName": "onUpvote", "mutations": ["upvote"]}]
        }))
    }

    fn upvote(id: &str) -> GraphQLRequest {
        request(
            json!({
                "operationType": "mutation",
                "selections": [{
                    "name": "upvote",
                    "arguments": {"id": id},
                    "returnType": "Post",
                    "selections": [{"name": "id"}, {"name": "votes"}]
                }]
            }),
            json!({}),
        )
    }

    fn on_upvote(id: Option<&str>) -> GraphQLRequest {
        let arguments = id.map_or_else(|| json!({}), |id| json!({"id": id}));
        request(
            json!({
                "operationType": "subscription",
                "selections": [{
                    "name": "onUpvote",
                    "arguments": arguments,
                    "returnType": "Post",
                    "selections": [{"name": "id"}, {"name": "votes"}]
                }]
            }),
            json!({}),
        )
    }

    fn seed(appsync: &SyncStackAppSync, id: &str) {
        use syncstack_dynamodb_model::AttributeValue;
        use syncstack_dynamodb_model::input::PutItemInput;

        appsync
            .provider()
            .handle_put_item(PutItemInput {
                table_name: "Posts".to_owned(),
                item: [("id".to_owned(), AttributeValue::S(id.to_owned()))].into(),
                ..Default::default()
            })
            .unwrap();
    }

    fn counting_invoker(calls: Arc<AtomicUsize>) -> Arc<dyn FunctionInvoker> {
        Arc::new(FnInvoker(
            move |name: &str, payload: Value| -> Result<Value, AppSyncError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"function": name, "id": payload["id"], "score": 42}))
            },
        ))
    }

    #[tokio::test]
    async fn test_should_fan_out_mutations_to_matching_subscribers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let appsync = SyncStackAppSync::from_definition(
            &counter_definition(),
            provider(),
            Some(counting_invoker(Arc::clone(&calls))),
            &AppSyncConfig::default(),
        )
        .unwrap();
        seed(&appsync, "p1");
        seed(&appsync, "p2");

        let mut only_p1 = appsync.subscribe("c1", &on_upvote(Some("p1")), None).await.unwrap();
        let mut popular = appsync
            .subscribe(
                "c2",
                &on_upvote(None),
                Some(SubscriptionFilter {
                    expression: "votes >= :min".to_owned(),
                    expression_values: [(":min".to_owned(), json!(2))].into(),
                    ..SubscriptionFilter::default()
                }),
            )
            .await
            .unwrap();

        for id in ["p2", "p1", "p1"] {
            let response = appsync.execute(&upvote(id)).await;
            assert!(response.errors.is_empty(), "{:?}", response.errors);
        }

        let first = only_p1.recv().await.unwrap();
        assert_eq!(first.data, json!({"onUpvote": {"id": "p1", "votes": 1}}));
        let second = only_p1.recv().await.unwrap();
        assert_eq!(second.data, json!({"onUpvote": {"id": "p1", "votes": 2}}));
        assert!(only_p1.try_recv().is_none());

        let event = popular.recv().await.unwrap();
        assert_eq!(event.data, json!({"onUpvote": {"id": "p1", "votes": 2}}));
        assert!(popular.try_recv().is_none());

        assert_eq!(appsync.broker().disconnect("c1"), 1);
        assert_eq!(appsync.broker().active(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_should_map_store_errors_and_invoke_functions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let appsync = SyncStackAppSync::from_definition(
            &counter_definition(),
            provider(),
            Some(counting_invoker(Arc::clone(&calls))),
            &AppSyncConfig::default(),
        )
        .unwrap();
        let mut sub = appsync.subscribe("c1", &on_upvote(None), None).await.unwrap();

        let response = appsync
            .execute(&request(
                json!({
                    "operationType": "query",
                    "selections": [
                        {"name": "score", "arguments": {"id": "p9"}},
                        {"name": "score", "alias": "again", "arguments": {"id": "p8"}}
                    ]
                }),
                json!({}),
            ))
            .await;
        assert_eq!(
            response.data.unwrap(),
            json!({
                "score": {"function": "score", "id": "p9", "score": 42},
                "again": {"function": "score", "id": "p8", "score": 42}
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let response = appsync.execute(&upvote("missing")).await;
        assert_eq!(response.data.unwrap(), json!({"upvote": null}));
        assert_eq!(response.errors.len(), 1);
        let error_type = response.errors[0].error_type.as_deref().unwrap_or_default();
        assert!(error_type.starts_with("DynamoDB:"), "{error_type}");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_should_reject_lambda_source_without_invoker() {
        let err = SyncStackAppSync::from_definition(
            &counter_definition(),
            provider(),
            None,
            &AppSyncConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::InvalidDefinition);
    }
}
