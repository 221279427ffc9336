//! Table store scenarios: indexes, conditions, transactions, pagination.

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use syncstack_dynamodb_core::SyncStackDynamoDB;
    use syncstack_dynamodb_model::DynamoDBErrorCode;
    use syncstack_dynamodb_model::input::{
        DeleteItemInput, GetItemInput, PutItemInput, QueryInput, ScanInput,
        TransactWriteItemsInput, UpdateItemInput,
    };
    use syncstack_dynamodb_model::types::{
        ConditionCheck, ReturnValue, TransactPut, TransactUpdate, TransactWriteItem,
    };
    use syncstack_dynamodb_model::{AttributeValue, Item};

    use crate::{
        create_composite_table, create_status_table, make_item, make_values, n, provider, s,
        test_table_name,
    };

    fn put(provider: &SyncStackDynamoDB, table: &str, item: Item) {
        provider
            .handle_put_item(PutItemInput {
                table_name: table.to_owned(),
                item,
                ..Default::default()
            })
            .unwrap();
    }

    fn get(provider: &SyncStackDynamoDB, table: &str, key: Item) -> Option<Item> {
        provider
            .handle_get_item(GetItemInput {
                table_name: table.to_owned(),
                key,
                ..Default::default()
            })
            .unwrap()
            .item
    }

    fn ids(items: &[Item]) -> Vec<i64> {
        items
            .iter()
            .map(|item| item["id"].as_n().unwrap().parse().unwrap())
            .collect()
    }

    fn query_status(provider: &SyncStackDynamoDB, table: &str, status: &str) -> Vec<Item> {
        provider
            .handle_query(QueryInput {
                table_name: table.to_owned(),
                index_name: Some("by-status".to_owned()),
                key_condition_expression: "#s = :s".to_owned(),
                expression_attribute_names: HashMap::from([("#s".to_owned(), "status".to_owned())]),
                expression_attribute_values: make_values(&[(":s", s(status))]),
                ..Default::default()
            })
            .unwrap()
            .items
    }

    fn scan_index(provider: &SyncStackDynamoDB, table: &str) -> BTreeSet<(i64, String)> {
        provider
            .handle_scan(ScanInput {
                table_name: table.to_owned(),
                index_name: Some("by-status".to_owned()),
                ..Default::default()
            })
            .unwrap()
            .items
            .iter()
            .map(|item| {
                (
                    item["id"].as_n().unwrap().parse().unwrap(),
                    item["status"].as_s().unwrap().to_owned(),
                )
            })
            .collect()
    }

    fn scan_base_with_status(provider: &SyncStackDynamoDB, table: &str) -> BTreeSet<(i64, String)> {
        provider
            .handle_scan(ScanInput {
                table_name: table.to_owned(),
                ..Default::default()
            })
            .unwrap()
            .items
            .iter()
            .filter_map(|item| {
                let status = item.get("status")?.as_s()?.to_owned();
                Some((item["id"].as_n()?.parse().ok()?, status))
            })
            .collect()
    }

    #[test]
    fn test_should_query_index_by_status_and_follow_updates() {
        let provider = provider();
        let table = test_table_name("gsi");
        create_status_table(&provider, &table);

        put(&provider, &table, make_item(&[("id", n(1)), ("status", s("A"))]));
        put(&provider, &table, make_item(&[("id", n(2)), ("status", s("B"))]));
        put(&provider, &table, make_item(&[("id", n(3)), ("status", s("A"))]));

        assert_eq!(ids(&query_status(&provider, &table, "A")), vec![1, 3]);

        provider
            .handle_update_item(UpdateItemInput {
                table_name: table.clone(),
                key: make_item(&[("id", n(3))]),
                update_expression: Some("SET #s = :b".to_owned()),
                expression_attribute_names: HashMap::from([("#s".to_owned(), "status".to_owned())]),
                expression_attribute_values: make_values(&[(":b", s("B"))]),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(ids(&query_status(&provider, &table, "A")), vec![1]);
        assert_eq!(ids(&query_status(&provider, &table, "B")), vec![2, 3]);
    }

    #[test]
    fn test_should_keep_index_equal_to_base_projection() {
        let provider = provider();
        let table = test_table_name("consistency");
        create_status_table(&provider, &table);

        for id in 0..12 {
            let status = if id % 3 == 0 { "A" } else { "B" };
            let item = if id % 4 == 0 {
                make_item(&[("id", n(id))])
            } else {
                make_item(&[("id", n(id)), ("status", s(status))])
            };
            put(&provider, &table, item);
            assert_eq!(scan_index(&provider, &table), scan_base_with_status(&provider, &table));
        }

        for id in (0..12).step_by(2) {
            let expression = if id % 3 == 0 { "REMOVE #s" } else { "SET #s = :c" };
            let values = if id % 3 == 0 {
                HashMap::new()
            } else {
                make_values(&[(":c", s("C"))])
            };
            provider
                .handle_update_item(UpdateItemInput {
                    table_name: table.clone(),
                    key: make_item(&[("id", n(id))]),
                    update_expression: Some(expression.to_owned()),
                    expression_attribute_names: HashMap::from([(
                        "#s".to_owned(),
                        "status".to_owned(),
                    )]),
                    expression_attribute_values: values,
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(scan_index(&provider, &table), scan_base_with_status(&provider, &table));
        }

        for id in (1..12).step_by(3) {
            provider
                .handle_delete_item(DeleteItemInput {
                    table_name: table.clone(),
                    key: make_item(&[("id", n(id))]),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(scan_index(&provider, &table), scan_base_with_status(&provider, &table));
        }
    }

    #[test]
    fn test_should_leave_item_untouched_when_condition_fails() {
        let provider = provider();
        let table = test_table_name("cond");
        create_status_table(&provider, &table);
        let original = make_item(&[("id", n(1)), ("status", s("A")), ("count", n(5))]);
        put(&provider, &table, original.clone());
        let key = make_item(&[("id", n(1))]);

        let err = provider
            .handle_put_item(PutItemInput {
                table_name: table.clone(),
                item: make_item(&[("id", n(1)), ("status", s("Z"))]),
                condition_expression: Some("attribute_not_exists(id)".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ConditionalCheckFailedException);

        let err = provider
            .handle_update_item(UpdateItemInput {
                table_name: table.clone(),
                key: key.clone(),
                update_expression: Some("SET #c = #c + :one".to_owned()),
                condition_expression: Some("#c > :ten".to_owned()),
                expression_attribute_names: HashMap::from([("#c".to_owned(), "count".to_owned())]),
                expression_attribute_values: make_values(&[(":one", n(1)), (":ten", n(10))]),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ConditionalCheckFailedException);

        let err = provider
            .handle_delete_item(DeleteItemInput {
                table_name: table.clone(),
                key: key.clone(),
                condition_expression: Some("#s = :z".to_owned()),
                expression_attribute_names: HashMap::from([("#s".to_owned(), "status".to_owned())]),
                expression_attribute_values: make_values(&[(":z", s("Z"))]),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ConditionalCheckFailedException);

        assert_eq!(get(&provider, &table, key), Some(original));
        assert_eq!(ids(&query_status(&provider, &table, "A")), vec![1]);
    }

    #[test]
    fn test_should_apply_no_transaction_member_when_one_fails() {
        let provider = provider();
        let table = test_table_name("txn");
        create_status_table(&provider, &table);
        put(&provider, &table, make_item(&[("id", n(1)), ("status", s("A"))]));

        let err = provider
            .handle_transact_write_items(TransactWriteItemsInput {
                transact_items: vec![
                    TransactWriteItem {
                        put: Some(TransactPut {
                            table_name: table.clone(),
                            item: make_item(&[("id", n(2)), ("status", s("A"))]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    TransactWriteItem {
                        update: Some(TransactUpdate {
                            table_name: table.clone(),
                            key: make_item(&[("id", n(1))]),
                            update_expression: "SET #s = :b".to_owned(),
                            expression_attribute_names: HashMap::from([(
                                "#s".to_owned(),
                                "status".to_owned(),
                            )]),
                            expression_attribute_values: make_values(&[(":b", s("B"))]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    TransactWriteItem {
                        condition_check: Some(ConditionCheck {
                            table_name: table.clone(),
                            key: make_item(&[("id", n(99))]),
                            condition_expression: "attribute_exists(id)".to_owned(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
            })
            .unwrap_err();

        assert_eq!(err.code, DynamoDBErrorCode::TransactionCanceledException);
        let codes: Vec<_> = err
            .cancellation_reasons
            .iter()
            .map(|r| r.code.as_deref())
            .collect();
        assert_eq!(codes, vec![Some("None"), Some("None"), Some("ConditionalCheckFailed")]);

        assert!(get(&provider, &table, make_item(&[("id", n(2))])).is_none());
        assert_eq!(
            get(&provider, &table, make_item(&[("id", n(1))])).unwrap()["status"],
            s("A")
        );
        assert_eq!(ids(&query_status(&provider, &table, "A")), vec![1]);
    }

    #[test]
    fn test_should_page_query_and_scan_to_exact_result_set() {
        let provider = provider();
        let table = test_table_name("pages");
        create_composite_table(&provider, &table);
        for pk in ["a", "b"] {
            for sk in 0..23 {
                put(
                    &provider,
                    &table,
                    make_item(&[("pk", s(pk)), ("sk", n(sk)), ("even", AttributeValue::Bool(sk % 2 == 0))]),
                );
            }
        }

        for limit in [1, 4, 7, 50] {
            let mut seen = Vec::new();
            let mut next_token = None;
            loop {
                let page = provider
                    .handle_query(QueryInput {
                        table_name: table.clone(),
                        key_condition_expression: "pk = :pk AND sk >= :from".to_owned(),
                        filter_expression: Some("even = :t".to_owned()),
                        expression_attribute_values: make_values(&[
                            (":pk", s("a")),
                            (":from", n(5)),
                            (":t", AttributeValue::Bool(true)),
                        ]),
                        limit: Some(limit),
                        next_token: next_token.take(),
                        ..Default::default()
                    })
                    .unwrap();
                seen.extend(
                    page.items
                        .iter()
                        .map(|item| item["sk"].as_n().unwrap().parse::<i64>().unwrap()),
                );
                match page.next_token {
                    Some(token) => next_token = Some(token),
                    None => break,
                }
            }
            let expected: Vec<i64> = (5..23).filter(|sk| sk % 2 == 0).collect();
            assert_eq!(seen, expected, "limit {limit}");
        }

        let mut seen = BTreeSet::new();
        let mut next_token = None;
        loop {
            let page = provider
                .handle_scan(ScanInput {
                    table_name: table.clone(),
                    limit: Some(5),
                    next_token: next_token.take(),
                    ..Default::default()
                })
                .unwrap();
            for item in &page.items {
                let key = (
                    item["pk"].as_s().unwrap().to_owned(),
                    item["sk"].as_n().unwrap().to_owned(),
                );
                assert!(seen.insert(key), "duplicate item in scan");
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        assert_eq!(seen.len(), 46);
    }

    #[test]
    fn test_should_reflect_update_actions_on_reread() {
        let provider = provider();
        let table = test_table_name("update");
        create_status_table(&provider, &table);
        put(
            &provider,
            &table,
            make_item(&[
                ("id", n(1)),
                ("score", n(10)),
                ("tags", AttributeValue::Ss(vec!["a".into(), "b".into(), "c".into()])),
            ]),
        );

        let output = provider
            .handle_update_item(UpdateItemInput {
                table_name: table.clone(),
                key: make_item(&[("id", n(1))]),
                update_expression: Some(
                    "SET title = :t ADD score :inc DELETE tags :gone".to_owned(),
                ),
                expression_attribute_values: make_values(&[
                    (":t", s("hello")),
                    (":inc", n("2.5")),
                    (":gone", AttributeValue::Ss(vec!["a".into(), "c".into(), "zz".into()])),
                ]),
                return_values: Some(ReturnValue::AllNew),
                ..Default::default()
            })
            .unwrap();
        let returned = output.attributes.unwrap();

        let item = get(&provider, &table, make_item(&[("id", n(1))])).unwrap();
        assert_eq!(returned, item);
        assert_eq!(item["title"], s("hello"));
        assert_eq!(item["score"].as_n().unwrap().parse::<f64>().unwrap(), 12.5);
        assert_eq!(item["tags"], AttributeValue::Ss(vec!["b".into()]));
    }

    #[test]
    fn test_should_report_missing_item_only_when_existence_required() {
        let provider = provider();
        let table = test_table_name("exists");
        create_status_table(&provider, &table);

        assert!(get(&provider, &table, make_item(&[("id", n(7))])).is_none());

        let err = provider
            .handle_update_item(UpdateItemInput {
                table_name: table.clone(),
                key: make_item(&[("id", n(7))]),
                update_expression: Some("SET title = :t".to_owned()),
                expression_attribute_values: make_values(&[(":t", s("x"))]),
                require_existing: true,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ItemNotFound);
        assert!(get(&provider, &table, make_item(&[("id", n(7))])).is_none());
    }
}
