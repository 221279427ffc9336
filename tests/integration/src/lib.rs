//! End-to-end scenarios for the SyncStack emulator.
//!
//! Every test builds its own in-process provider, so the suite needs no
//! running server:
//! ```text
//! cargo test -p syncstack-integration
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Once};

use syncstack_dynamodb_core::{DynamoDBConfig, SyncStackDynamoDB};
use syncstack_dynamodb_model::input::CreateTableInput;
use syncstack_dynamodb_model::types::{
    AttributeDefinition, GlobalSecondaryIndex, KeySchemaElement, Projection, ScalarAttributeType,
};
use syncstack_dynamodb_model::{AttributeValue, Item};

mod test_graphql;
mod test_http;
mod test_table_store;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Create a fresh provider with default limits.
#[must_use]
pub fn provider() -> Arc<SyncStackDynamoDB> {
    init_tracing();
    Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()))
}

/// Generate a unique table name for a test.
#[must_use]
pub fn test_table_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// String attribute.
#[must_use]
pub fn s(value: &str) -> AttributeValue {
    AttributeValue::S(value.to_owned())
}

/// Number attribute.
#[must_use]
pub fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// Build an item from name/value pairs.
#[must_use]
pub fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), value.clone()))
        .collect()
}

/// Build an expression value map from placeholder/value pairs.
#[must_use]
pub fn make_values(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), value.clone()))
        .collect()
}

/// Create a table keyed by numeric `id` with a `by-status` index on `status`.
pub fn create_status_table(provider: &SyncStackDynamoDB, table_name: &str) {
    provider
        .handle_create_table(CreateTableInput {
            table_name: table_name.to_owned(),
            key_schema: vec![KeySchemaElement::hash("id")],
            attribute_definitions: vec![
                AttributeDefinition::new("id", ScalarAttributeType::N),
                AttributeDefinition::new("status", ScalarAttributeType::S),
            ],
            global_secondary_indexes: vec![GlobalSecondaryIndex {
                index_name: "by-status".to_owned(),
                key_schema: vec![KeySchemaElement::hash("status")],
                projection: Projection::default(),
            }],
            ..Default::default()
        })
        .unwrap_or_else(|e| panic!("failed to create table {table_name}: {e}"));
}

/// Create a composite-key table with partition `pk` and sort `sk`.
pub fn create_composite_table(provider: &SyncStackDynamoDB, table_name: &str) {
    provider
        .handle_create_table(CreateTableInput {
            table_name: table_name.to_owned(),
            key_schema: vec![KeySchemaElement::hash("pk"), KeySchemaElement::range("sk")],
            attribute_definitions: vec![
                AttributeDefinition::new("pk", ScalarAttributeType::S),
                AttributeDefinition::new("sk", ScalarAttributeType::N),
            ],
            ..Default::default()
        })
        .unwrap_or_else(|e| panic!("failed to create table {table_name}: {e}"));
}
