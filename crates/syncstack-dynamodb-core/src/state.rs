//! DynamoDB service state management.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use syncstack_dynamodb_model::error::DynamoDBError;
use syncstack_dynamodb_model::input::CreateTableInput;
use syncstack_dynamodb_model::types::{AttributeDefinition, KeySchemaElement, TableDescription, TableStatus};

use crate::change::{ChangeEvent, ChangeFeed};
use crate::config::DynamoDBConfig;
use crate::error::storage_error_to_dynamodb;
use crate::index::{IndexKind, IndexManager, SecondaryIndex};
use crate::storage::{KeySchema, TableData};

/// Top-level DynamoDB service state.
#[derive(Debug)]
pub struct DynamoDBServiceState {
    /// All tables keyed by name.
    tables: DashMap<String, Arc<DynamoDBTable>>,
    /// Committed writes across all tables.
    changes: ChangeFeed,
}

impl DynamoDBServiceState {
    /// Create a new empty service state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            changes: ChangeFeed::new(),
        }
    }

    /// Get a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<Arc<DynamoDBTable>> {
        self.tables.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Get a table or return `ResourceNotFoundException`.
    pub fn require_table(&self, name: &str) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        self.get_table(name).ok_or_else(|| {
            DynamoDBError::resource_not_found(format!(
                "Requested resource not found: Table: {name} not found"
            ))
        })
    }

    /// Insert a new table. Returns error if table already exists.
    pub fn create_table(&self, table: DynamoDBTable) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        let name = table.name.clone();
        match self.tables.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(e) => Err(DynamoDBError::resource_in_use(
                format!("Table already exists: {}", e.key()),
            )),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let table = Arc::new(table);
                e.insert(Arc::clone(&table));
                info!(table = %table.name, "table created");
                Ok(table)
            }
        }
    }

    /// Remove a table by name. Returns the removed table.
    pub fn delete_table(&self, name: &str) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        let table = self.tables.remove(name).map(|(_, t)| t).ok_or_else(|| {
            DynamoDBError::resource_not_found(format!(
                "Requested resource not found: Table: {name} not found"
            ))
        })?;
        info!(table = %name, "table deleted");
        Ok(table)
    }

    /// List all table names (sorted).
    #[must_use]
    pub fn list_table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// The change feed of committed writes.
    #[must_use]
    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Record one committed write. Call with the table's write lock held.
    pub fn record_change(
        &self,
        table_name: &str,
        old_item: Option<syncstack_dynamodb_model::Item>,
        new_item: Option<syncstack_dynamodb_model::Item>,
    ) -> ChangeEvent {
        self.changes.record(table_name, old_item, new_item)
    }

    /// Reset all state (remove all tables).
    pub fn reset(&self) {
        self.tables.clear();
    }
}

impl Default for DynamoDBServiceState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single DynamoDB table with metadata and storage.
#[derive(Debug)]
pub struct DynamoDBTable {
    /// Table name.
    pub name: String,
    /// Key schema elements.
    pub key_schema_elements: Vec<KeySchemaElement>,
    /// Attribute definitions.
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Table ARN.
    pub arn: String,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Base items and indexes behind one lock.
    data: RwLock<TableData>,
}

impl DynamoDBTable {
    /// Builds a table from a `CreateTable` request.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid key schema, an index key
    /// attribute without a definition, duplicate index names, or a local
    /// index whose partition key differs from the table's.
    pub fn from_input(input: &CreateTableInput, config: &DynamoDBConfig) -> Result<Self, DynamoDBError> {
        validate_table_name(&input.table_name)?;
        let schema = KeySchema::from_elements(&input.key_schema, &input.attribute_definitions)
            .map_err(storage_error_to_dynamodb)?;

        let mut names = HashSet::new();
        let mut indexes = Vec::new();
        let specs = input
            .global_secondary_indexes
            .iter()
            .map(|g| (IndexKind::Global, &g.index_name, &g.key_schema, &g.projection))
            .chain(
                input
                    .local_secondary_indexes
                    .iter()
                    .map(|l| (IndexKind::Local, &l.index_name, &l.key_schema, &l.projection)),
            );
        for (kind, name, elements, projection) in specs {
            if !names.insert(name.clone()) {
                return Err(DynamoDBError::validation(format!("Duplicate index name: {name}")));
            }
            let index_schema = KeySchema::from_elements(elements, &input.attribute_definitions)
                .map_err(storage_error_to_dynamodb)?;
            if kind == IndexKind::Local {
                if index_schema.partition_key.name != schema.partition_key.name {
                    return Err(DynamoDBError::validation(format!(
                        "Local secondary index {name} must use the table partition key {}",
                        schema.partition_key.name
                    )));
                }
                if index_schema.sort_key.is_none() {
                    return Err(DynamoDBError::validation(format!(
                        "Local secondary index {name} must have a sort key"
                    )));
                }
            }
            indexes.push(SecondaryIndex::new(
                name.clone(),
                kind,
                elements.clone(),
                index_schema,
                &schema,
                projection.clone(),
            ));
        }

        Ok(Self {
            name: input.table_name.clone(),
            key_schema_elements: input.key_schema.clone(),
            attribute_definitions: input.attribute_definitions.clone(),
            arn: format!(
                "arn:aws:dynamodb:{}:{}:table/{}",
                config.default_region, config.account_id, input.table_name
            ),
            created_at: chrono::Utc::now(),
            data: RwLock::new(TableData::new(schema, IndexManager::new(indexes), config.max_item_size_bytes)),
        })
    }

    /// Shared access to the table data.
    pub fn read(&self) -> RwLockReadGuard<'_, TableData> {
        self.data.read()
    }

    /// Exclusive access to the table data.
    pub fn write(&self) -> RwLockWriteGuard<'_, TableData> {
        self.data.write()
    }

    /// Build a `TableDescription` from this table's metadata.
    #[must_use]
    pub fn to_description(&self) -> TableDescription {
        let data = self.read();
        #[allow(clippy::cast_precision_loss)] // DynamoDB returns epoch seconds as f64
        let creation_time = self.created_at.timestamp() as f64;
        TableDescription {
            table_name: self.name.clone(),
            table_status: Some(TableStatus::Active),
            key_schema: self.key_schema_elements.clone(),
            attribute_definitions: self.attribute_definitions.clone(),
            creation_date_time: creation_time,
            item_count: i64::try_from(data.item_count()).unwrap_or(i64::MAX),
            table_size_bytes: i64::try_from(data.base().size_bytes()).unwrap_or(i64::MAX),
            table_arn: self.arn.clone(),
            global_secondary_indexes: data.indexes().describe(IndexKind::Global),
            local_secondary_indexes: data.indexes().describe(IndexKind::Local),
        }
    }

    /// Description returned by `DeleteTable`.
    #[must_use]
    pub fn to_delete_description(&self) -> TableDescription {
        TableDescription {
            table_status: Some(TableStatus::Deleting),
            ..self.to_description()
        }
    }
}

fn validate_table_name(name: &str) -> Result<(), DynamoDBError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if (3..=255).contains(&name.len()) && valid_chars {
        Ok(())
    } else {
        Err(DynamoDBError::validation(format!(
            "TableName must be 3-255 characters of [a-zA-Z0-9_.-], got '{name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use syncstack_dynamodb_model::types::{GlobalSecondaryIndex, LocalSecondaryIndex, Projection, ScalarAttributeType};
    use syncstack_dynamodb_model::DynamoDBErrorCode;

    use super::*;

    fn input() -> CreateTableInput {
        CreateTableInput {
            table_name: "orders".to_owned(),
            key_schema: vec![KeySchemaElement::hash("id")],
            attribute_definitions: vec![
                AttributeDefinition::new("id", ScalarAttributeType::S),
                AttributeDefinition::new("status", ScalarAttributeType::S),
            ],
            global_secondary_indexes: vec![GlobalSecondaryIndex {
                index_name: "by_status".to_owned(),
                key_schema: vec![KeySchemaElement::hash("status")],
                projection: Projection::default(),
            }],
            local_secondary_indexes: vec![],
        }
    }

    #[test]
    fn test_should_create_and_reject_duplicate_table() {
        let state = DynamoDBServiceState::new();
        let config = DynamoDBConfig::default();
        state.create_table(DynamoDBTable::from_input(&input(), &config).unwrap()).unwrap();
        let err = state
            .create_table(DynamoDBTable::from_input(&input(), &config).unwrap())
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ResourceInUseException);
        assert_eq!(state.list_table_names(), vec!["orders".to_owned()]);
    }

    #[test]
    fn test_should_describe_indexes() {
        let table = DynamoDBTable::from_input(&input(), &DynamoDBConfig::default()).unwrap();
        let desc = table.to_description();
        assert_eq!(desc.global_secondary_indexes.len(), 1);
        assert_eq!(desc.table_status, Some(TableStatus::Active));
        assert!(desc.table_arn.ends_with("table/orders"));
    }

    #[test]
    fn test_should_reject_local_index_with_other_partition_key() {
        let mut bad = input();
        bad.global_secondary_indexes.clear();
        bad.local_secondary_indexes.push(LocalSecondaryIndex {
            index_name: "lsi".to_owned(),
            key_schema: vec![KeySchemaElement::hash("status"), KeySchemaElement::range("id")],
            projection: Projection::default(),
        });
        let err = DynamoDBTable::from_input(&bad, &DynamoDBConfig::default()).unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
    }

    #[test]
    fn test_should_reject_undefined_index_attribute() {
        let mut bad = input();
        bad.global_secondary_indexes[0].key_schema = vec![KeySchemaElement::hash("missing")];
        assert!(DynamoDBTable::from_input(&bad, &DynamoDBConfig::default()).is_err());
    }

    #[test]
    fn test_should_delete_missing_table_with_not_found() {
        let state = DynamoDBServiceState::new();
        let err = state.delete_table("nope").unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ResourceNotFoundException);
    }
}
