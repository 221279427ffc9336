//! `AMAZON_DYNAMODB` data source.
//!
//! A request mapping template renders a document such as
//! `{"version": "2018-05-29", "operation": "GetItem", "key": {...}}`. The
//! document is decoded into a table operation, run against the provider, and
//! the result is unmarshalled to plain JSON for the response template.

use std::collections::{HashMap, hash_map::Entry};

use serde::Deserialize;
use serde_json::{Value, json};
use syncstack_appsync_model::AppSyncError;
use syncstack_dynamodb_core::SyncStackDynamoDB;
use syncstack_dynamodb_model::{
    AttributeValue, DynamoDBError, Item,
    attribute_value::item_to_json,
    input::{
        BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput, QueryInput, ScanInput,
        TransactGetItemsInput, TransactWriteItemsInput, UpdateItemInput,
    },
    types::{
        ConditionCheck, DeleteRequest, PutRequest, ReturnValue, Select, TransactDelete, TransactGet,
        TransactGetItem, TransactPut, TransactUpdate, TransactWriteItem, WriteRequest,
    },
};
use tracing::debug;

use crate::error::dynamodb_error_to_appsync;

// ---------------------------------------------------------------------------
// Request documents
// ---------------------------------------------------------------------------

/// Expression with its placeholders, as written in request documents.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpressionDoc {
    expression: String,
    #[serde(default)]
    expression_names: HashMap<String, String>,
    #[serde(default)]
    expression_values: HashMap<String, AttributeValue>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "operation")]
enum DynamoDBRequest {
    GetItem(GetItemDoc),
    PutItem(PutItemDoc),
    UpdateItem(UpdateItemDoc),
    DeleteItem(DeleteItemDoc),
    Query(QueryDoc),
    Scan(ScanDoc),
    BatchGetItem(BatchDoc<BatchGetTable>),
    BatchPutItem(BatchDoc<Vec<Item>>),
    BatchDeleteItem(BatchDoc<Vec<Item>>),
    TransactGetItems(TransactDoc<TransactGetEntry>),
    TransactWriteItems(TransactDoc<TransactWriteEntry>),
}

impl DynamoDBRequest {
    fn operation(&self) -> &'static str {
        match self {
            Self::GetItem(_) => "GetItem",
            Self::PutItem(_) => "PutItem",
            Self::UpdateItem(_) => "UpdateItem",
            Self::DeleteItem(_) => "DeleteItem",
            Self::Query(_) => "Query",
            Self::Scan(_) => "Scan",
            Self::BatchGetItem(_) => "BatchGetItem",
            Self::BatchPutItem(_) => "BatchPutItem",
            Self::BatchDeleteItem(_) => "BatchDeleteItem",
            Self::TransactGetItems(_) => "TransactGetItems",
            Self::TransactWriteItems(_) => "TransactWriteItems",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetItemDoc {
    key: Item,
    consistent_read: Option<bool>,
    projection: Option<ExpressionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutItemDoc {
    key: Item,
    #[serde(default)]
    attribute_values: Item,
    condition: Option<ExpressionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateItemDoc {
    key: Item,
    update: ExpressionDoc,
    condition: Option<ExpressionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteItemDoc {
    key: Item,
    condition: Option<ExpressionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryDoc {
    query: ExpressionDoc,
    index: Option<String>,
    next_token: Option<String>,
    limit: Option<i32>,
    scan_index_forward: Option<bool>,
    consistent_read: Option<bool>,
    select: Option<Select>,
    filter: Option<ExpressionDoc>,
    projection: Option<ExpressionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanDoc {
    index: Option<String>,
    next_token: Option<String>,
    limit: Option<i32>,
    segment: Option<i32>,
    total_segments: Option<i32>,
    select: Option<Select>,
    filter: Option<ExpressionDoc>,
    projection: Option<ExpressionDoc>,
}

#[derive(Debug, Deserialize)]
struct BatchDoc<T> {
    tables: HashMap<String, T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetTable {
    keys: Vec<Item>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactDoc<T> {
    transact_items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactGetEntry {
    table: String,
    key: Item,
    projection: Option<ExpressionDoc>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum TransactWriteOperation {
    PutItem,
    UpdateItem,
    DeleteItem,
    ConditionCheck,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactWriteEntry {
    table: String,
    operation: TransactWriteOperation,
    key: Item,
    #[serde(default)]
    attribute_values: Item,
    update: Option<ExpressionDoc>,
    condition: Option<ExpressionDoc>,
}

/// Placeholder maps of several expressions combined into one.
#[derive(Debug, Default)]
struct Placeholders {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Placeholders {
    /// Take in one expression's placeholders. A key already bound to a
    /// different value by an earlier expression is rejected.
    fn add(&mut self, doc: Option<&ExpressionDoc>) -> Result<Option<String>, AppSyncError> {
        let Some(doc) = doc else {
            return Ok(None);
        };
        merge_placeholders(&mut self.names, &doc.expression_names)?;
        merge_placeholders(&mut self.values, &doc.expression_values)?;
        Ok(Some(doc.expression.clone()))
    }
}

fn merge_placeholders<V: Clone + PartialEq>(
    into: &mut HashMap<String, V>,
    from: &HashMap<String, V>,
) -> Result<(), AppSyncError> {
    for (key, value) in from {
        match into.entry(key.clone()) {
            Entry::Occupied(bound) if bound.get() != value => {
                return Err(AppSyncError::template(format!(
                    "Placeholder '{key}' is bound to different values in the expressions of one request"
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
            }
        }
    }
    Ok(())
}

/// Failure while running a decoded request document.
#[derive(Debug)]
enum RunError {
    Request(AppSyncError),
    Store(DynamoDBError),
}

impl From<AppSyncError> for RunError {
    fn from(e: AppSyncError) -> Self {
        Self::Request(e)
    }
}

impl From<DynamoDBError> for RunError {
    fn from(e: DynamoDBError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run a rendered request document against `table_name`.
///
/// # Errors
///
/// An undecodable document is a `TemplateEvaluationError`. Store failures are
/// data source errors typed `DynamoDB:<code>`.
pub(crate) fn execute(provider: &SyncStackDynamoDB, table_name: &str, request: Value) -> Result<Value, AppSyncError> {
    let request: DynamoDBRequest = serde_json::from_value(request).map_err(|e| {
        AppSyncError::template(format!("Unable to parse the DynamoDB request document: {e}"))
    })?;
    debug!(table = %table_name, operation = request.operation(), "invoking DynamoDB data source");
    run(provider, table_name, request).map_err(|e| match e {
        RunError::Request(e) => e,
        RunError::Store(e) => dynamodb_error_to_appsync(e),
    })
}

fn run(provider: &SyncStackDynamoDB, table_name: &str, request: DynamoDBRequest) -> Result<Value, RunError> {
    let table_name = table_name.to_owned();
    match request {
        DynamoDBRequest::GetItem(doc) => {
            let mut placeholders = Placeholders::default();
            let projection_expression = placeholders.add(doc.projection.as_ref())?;
            let output = provider.handle_get_item(GetItemInput {
                table_name,
                key: doc.key,
                consistent_read: doc.consistent_read,
                projection_expression,
                expression_attribute_names: placeholders.names,
            })?;
            Ok(optional_item(output.item.as_ref()))
        }
        DynamoDBRequest::PutItem(doc) => {
            let mut placeholders = Placeholders::default();
            let condition_expression = placeholders.add(doc.condition.as_ref())?;
            let mut item = doc.attribute_values;
            item.extend(doc.key);
            provider.handle_put_item(PutItemInput {
                table_name,
                item: item.clone(),
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                return_values: None,
            })?;
            Ok(item_to_json(&item))
        }
        DynamoDBRequest::UpdateItem(doc) => {
            let mut placeholders = Placeholders::default();
            let update_expression = placeholders.add(Some(&doc.update))?;
            let condition_expression = placeholders.add(doc.condition.as_ref())?;
            let output = provider.handle_update_item(UpdateItemInput {
                table_name,
                key: doc.key,
                update_expression,
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                return_values: Some(ReturnValue::AllNew),
                require_existing: false,
            })?;
            Ok(optional_item(output.attributes.as_ref()))
        }
        DynamoDBRequest::DeleteItem(doc) => {
            let mut placeholders = Placeholders::default();
            let condition_expression = placeholders.add(doc.condition.as_ref())?;
            let output = provider.handle_delete_item(DeleteItemInput {
                table_name,
                key: doc.key,
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                return_values: Some(ReturnValue::AllOld),
            })?;
            Ok(optional_item(output.attributes.as_ref()))
        }
        DynamoDBRequest::Query(doc) => {
            let mut placeholders = Placeholders::default();
            let key_condition_expression = placeholders.add(Some(&doc.query))?.unwrap_or_default();
            let filter_expression = placeholders.add(doc.filter.as_ref())?;
            let projection_expression = placeholders.add(doc.projection.as_ref())?;
            let output = provider.handle_query(QueryInput {
                table_name,
                index_name: doc.index,
                key_condition_expression,
                filter_expression,
                projection_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                scan_index_forward: doc.scan_index_forward,
                limit: doc.limit,
                next_token: doc.next_token,
                select: doc.select,
                consistent_read: doc.consistent_read,
            })?;
            Ok(page(&output.items, output.next_token, output.scanned_count))
        }
        DynamoDBRequest::Scan(doc) => {
            let mut placeholders = Placeholders::default();
            let filter_expression = placeholders.add(doc.filter.as_ref())?;
            let projection_expression = placeholders.add(doc.projection.as_ref())?;
            let output = provider.handle_scan(ScanInput {
                table_name,
                index_name: doc.index,
                filter_expression,
                projection_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
                limit: doc.limit,
                next_token: doc.next_token,
                segment: doc.segment,
                total_segments: doc.total_segments,
                select: doc.select,
            })?;
            Ok(page(&output.items, output.next_token, output.scanned_count))
        }
        DynamoDBRequest::BatchGetItem(doc) => {
            let mut data = serde_json::Map::new();
            let mut unprocessed = serde_json::Map::new();
            for (table, wanted) in doc.tables {
                let mut found = Vec::with_capacity(wanted.keys.len());
                for key in wanted.keys {
                    let output = provider.handle_get_item(GetItemInput {
                        table_name: table.clone(),
                        key,
                        ..GetItemInput::default()
                    })?;
                    found.push(optional_item(output.item.as_ref()));
                }
                unprocessed.insert(table.clone(), json!([]));
                data.insert(table, Value::Array(found));
            }
            Ok(json!({"data": data, "unprocessedKeys": unprocessed}))
        }
        DynamoDBRequest::BatchPutItem(doc) => {
            let response = batch_response(&doc.tables);
            let request_items = doc
                .tables
                .into_iter()
                .map(|(table, items)| {
                    let requests = items
                        .into_iter()
                        .map(|item| WriteRequest {
                            put_request: Some(PutRequest { item }),
                            delete_request: None,
                        })
                        .collect();
                    (table, requests)
                })
                .collect();
            provider.handle_batch_write_item(BatchWriteItemInput { request_items })?;
            Ok(json!({"data": response, "unprocessedItems": {}}))
        }
        DynamoDBRequest::BatchDeleteItem(doc) => {
            let response = batch_response(&doc.tables);
            let request_items = doc
                .tables
                .into_iter()
                .map(|(table, keys)| {
                    let requests = keys
                        .into_iter()
                        .map(|key| WriteRequest {
                            put_request: None,
                            delete_request: Some(DeleteRequest { key }),
                        })
                        .collect();
                    (table, requests)
                })
                .collect();
            provider.handle_batch_write_item(BatchWriteItemInput { request_items })?;
            Ok(json!({"data": response, "unprocessedKeys": {}}))
        }
        DynamoDBRequest::TransactGetItems(doc) => {
            let transact_items = doc
                .transact_items
                .into_iter()
                .map(|entry| {
                    let mut placeholders = Placeholders::default();
                    let projection_expression = placeholders.add(entry.projection.as_ref())?;
                    Ok(TransactGetItem {
                        get: TransactGet {
                            table_name: entry.table,
                            key: entry.key,
                            projection_expression,
                            expression_attribute_names: placeholders.names,
                        },
                    })
                })
                .collect::<Result<_, AppSyncError>>()?;
            let output = provider.handle_transact_get_items(TransactGetItemsInput { transact_items })?;
            let items: Vec<Value> = output
                .responses
                .iter()
                .map(|response| optional_item(response.item.as_ref()))
                .collect();
            Ok(json!({"items": items, "cancellationReasons": null}))
        }
        DynamoDBRequest::TransactWriteItems(doc) => {
            let keys: Vec<Value> = doc
                .transact_items
                .iter()
                .map(|entry| item_to_json(&entry.key))
                .collect();
            let transact_items = doc
                .transact_items
                .into_iter()
                .map(transact_write_item)
                .collect::<Result<_, RunError>>()?;
            provider.handle_transact_write_items(TransactWriteItemsInput { transact_items })?;
            Ok(json!({"keys": keys, "cancellationReasons": null}))
        }
    }
}

fn transact_write_item(entry: TransactWriteEntry) -> Result<TransactWriteItem, RunError> {
    let mut placeholders = Placeholders::default();
    let mut member = TransactWriteItem::default();
    match entry.operation {
        TransactWriteOperation::PutItem => {
            let condition_expression = placeholders.add(entry.condition.as_ref())?;
            let mut item = entry.attribute_values;
            item.extend(entry.key);
            member.put = Some(TransactPut {
                table_name: entry.table,
                item,
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
            });
        }
        TransactWriteOperation::UpdateItem => {
            let update_expression = placeholders
                .add(entry.update.as_ref())?
                .ok_or_else(|| DynamoDBError::validation("UpdateItem in a transaction requires 'update'"))?;
            let condition_expression = placeholders.add(entry.condition.as_ref())?;
            member.update = Some(TransactUpdate {
                table_name: entry.table,
                key: entry.key,
                update_expression,
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
            });
        }
        TransactWriteOperation::DeleteItem => {
            let condition_expression = placeholders.add(entry.condition.as_ref())?;
            member.delete = Some(TransactDelete {
                table_name: entry.table,
                key: entry.key,
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
            });
        }
        TransactWriteOperation::ConditionCheck => {
            let condition_expression = placeholders
                .add(entry.condition.as_ref())?
                .ok_or_else(|| DynamoDBError::validation("ConditionCheck requires 'condition'"))?;
            member.condition_check = Some(ConditionCheck {
                table_name: entry.table,
                key: entry.key,
                condition_expression,
                expression_attribute_names: placeholders.names,
                expression_attribute_values: placeholders.values,
            });
        }
    }
    Ok(member)
}

fn optional_item(item: Option<&Item>) -> Value {
    item.map_or(Value::Null, item_to_json)
}

fn page(items: &[Item], next_token: Option<String>, scanned_count: i32) -> Value {
    json!({
        "items": items.iter().map(item_to_json).collect::<Vec<_>>(),
        "nextToken": next_token,
        "scannedCount": scanned_count,
    })
}

fn batch_response(tables: &HashMap<String, Vec<Item>>) -> serde_json::Map<String, Value> {
    tables
        .iter()
        .map(|(table, items)| {
            (
                table.clone(),
                Value::Array(items.iter().map(item_to_json).collect()),
            )
        })
        .collect()
}
