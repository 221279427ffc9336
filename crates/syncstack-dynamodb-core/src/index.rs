//! Secondary index maintenance.
//!
//! Every index is a [`Collection`] keyed by the index key, holding projected
//! copies of base items. [`IndexManager::apply`] is called by [`TableData`]
//! for every base write, inside the table lock, with the old and new versions
//! of the item. An item that lacks any index key attribute has no entry.
//!
//! [`TableData`]: crate::storage::TableData

use std::collections::HashSet;

use tracing::trace;

use syncstack_dynamodb_model::types::{KeySchemaElement, Projection, ProjectionType, SecondaryIndexDescription};
use syncstack_dynamodb_model::Item;

use crate::storage::{Collection, KeySchema, PrimaryKey, SlotKey, StorageError, StoredItem, calculate_item_size};

/// Global or local secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Any partition key.
    Global,
    /// Same partition key as the table.
    Local,
}

/// One secondary index and its entries.
#[derive(Debug)]
pub struct SecondaryIndex {
    name: String,
    kind: IndexKind,
    key_schema_elements: Vec<KeySchemaElement>,
    schema: KeySchema,
    projection: Projection,
    /// Attributes copied for `KEYS_ONLY`/`INCLUDE`: table keys, index keys and
    /// any included non-key attributes.
    projected_attributes: HashSet<String>,
    entries: Collection,
}

impl SecondaryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: IndexKind,
        key_schema_elements: Vec<KeySchemaElement>,
        schema: KeySchema,
        table_schema: &KeySchema,
        projection: Projection,
    ) -> Self {
        let mut projected_attributes: HashSet<String> = table_schema
            .attribute_names()
            .chain(schema.attribute_names())
            .map(str::to_owned)
            .collect();
        if projection.projection_type == Some(ProjectionType::Include) {
            projected_attributes.extend(projection.non_key_attributes.iter().cloned());
        }
        Self {
            name: name.into(),
            kind,
            key_schema_elements,
            schema,
            projection,
            projected_attributes,
            entries: Collection::default(),
        }
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global or local.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// The index key schema.
    #[must_use]
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Current entries.
    #[must_use]
    pub fn entries(&self) -> &Collection {
        &self.entries
    }

    /// Whether index entries carry every attribute of the base item.
    #[must_use]
    pub fn projects_all(&self) -> bool {
        matches!(self.projection.projection_type, None | Some(ProjectionType::All))
    }

    /// Whether `attribute` is stored in index entries.
    #[must_use]
    pub fn projects(&self, attribute: &str) -> bool {
        match self.projection.projection_type {
            None | Some(ProjectionType::All) => true,
            Some(ProjectionType::KeysOnly | ProjectionType::Include) => self.projected_attributes.contains(attribute),
        }
    }

    /// Applies the projection rule to a base item.
    #[must_use]
    pub fn project(&self, item: &Item) -> Item {
        match self.projection.projection_type {
            None | Some(ProjectionType::All) => item.clone(),
            Some(ProjectionType::KeysOnly | ProjectionType::Include) => item
                .iter()
                .filter(|(k, _)| self.projected_attributes.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Rejects items whose index key attributes are present but mistyped.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::IndexKeyType`.
    pub fn validate(&self, item: &Item) -> Result<(), StorageError> {
        match self.schema.extract_if_present(item) {
            Ok(_) => Ok(()),
            Err(StorageError::InvalidKeyType { attr, expected, actual }) => Err(StorageError::IndexKeyType {
                index: self.name.clone(),
                attr,
                expected,
                actual,
            }),
            Err(other) => Err(other),
        }
    }

    fn entry_key(&self, item: &Item) -> Option<PrimaryKey> {
        self.schema.extract_if_present(item).ok().flatten()
    }

    fn apply(&mut self, old: Option<&Item>, new: Option<&Item>, seq: u64) {
        if let Some(key) = old.and_then(|item| self.entry_key(item)) {
            self.entries.remove(&key.partition, &SlotKey { sort: key.sort, seq });
        }
        if let Some((key, item)) = new.and_then(|item| self.entry_key(item).map(|k| (k, item))) {
            let projected = self.project(item);
            let size = calculate_item_size(&projected);
            self.entries.insert(
                key.partition,
                SlotKey { sort: key.sort, seq },
                StoredItem {
                    item: projected,
                    seq,
                    size,
                },
            );
        }
        trace!(index = %self.name, entries = self.entries.len(), "index updated");
    }

    /// Runtime description with the current entry count and size.
    #[must_use]
    pub fn describe(&self) -> SecondaryIndexDescription {
        SecondaryIndexDescription {
            index_name: self.name.clone(),
            key_schema: self.key_schema_elements.clone(),
            projection: self.projection.clone(),
            item_count: i64::try_from(self.entries.len()).unwrap_or(i64::MAX),
            index_size_bytes: i64::try_from(self.entries.size_bytes()).unwrap_or(i64::MAX),
        }
    }
}

/// All secondary indexes of one table.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: Vec<SecondaryIndex>,
}

impl IndexManager {
    /// Wraps the given indexes.
    #[must_use]
    pub fn new(indexes: Vec<SecondaryIndex>) -> Self {
        Self { indexes }
    }

    /// Finds an index by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// All indexes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &SecondaryIndex> {
        self.indexes.iter()
    }

    /// Validates an item against every index key schema.
    ///
    /// # Errors
    ///
    /// Returns the first `StorageError::IndexKeyType`.
    pub fn validate(&self, item: &Item) -> Result<(), StorageError> {
        self.indexes.iter().try_for_each(|index| index.validate(item))
    }

    /// Replaces the entries derived from `old` with those derived from `new`.
    /// `seq` is the base item's insertion sequence.
    pub fn apply(&mut self, old: Option<&Item>, new: Option<&Item>, seq: u64) {
        for index in &mut self.indexes {
            index.apply(old, new, seq);
        }
    }

    /// Descriptions of the indexes of one kind.
    #[must_use]
    pub fn describe(&self, kind: IndexKind) -> Vec<SecondaryIndexDescription> {
        self.indexes
            .iter()
            .filter(|i| i.kind == kind)
            .map(SecondaryIndex::describe)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use syncstack_dynamodb_model::AttributeValue;
    use syncstack_dynamodb_model::types::{AttributeDefinition, ScalarAttributeType};

    use super::*;
    use crate::storage::TableData;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    fn definitions() -> Vec<AttributeDefinition> {
        vec![
            AttributeDefinition::new("id", ScalarAttributeType::S),
            AttributeDefinition::new("status", ScalarAttributeType::S),
        ]
    }

    fn table_with_index(projection: Projection) -> TableData {
        let table_schema = KeySchema::from_elements(&[KeySchemaElement::hash("id")], &definitions()).unwrap();
        let elements = vec![KeySchemaElement::hash("status")];
        let index_schema = KeySchema::from_elements(&elements, &definitions()).unwrap();
        let index = SecondaryIndex::new("by_status", IndexKind::Global, elements, index_schema, &table_schema, projection);
        TableData::new(table_schema, IndexManager::new(vec![index]), 400 * 1024)
    }

    fn index_items(data: &TableData) -> Vec<Item> {
        data.indexes()
            .get("by_status")
            .unwrap()
            .entries()
            .iter_after(None)
            .map(|(_, _, st)| st.item.clone())
            .collect()
    }

    #[test]
    fn test_should_skip_items_without_index_key() {
        let mut data = table_with_index(Projection::default());
        data.put(make_item(&[("id", s("1"))])).unwrap();
        data.put(make_item(&[("id", s("2")), ("status", s("A"))])).unwrap();
        assert_eq!(index_items(&data).len(), 1);
    }

    #[test]
    fn test_should_move_entry_when_index_key_changes() {
        let mut data = table_with_index(Projection::default());
        data.put(make_item(&[("id", s("1")), ("status", s("A"))])).unwrap();
        data.put(make_item(&[("id", s("1")), ("status", s("B"))])).unwrap();
        let entries = index_items(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["status"], s("B"));

        data.put(make_item(&[("id", s("1"))])).unwrap();
        assert!(index_items(&data).is_empty());
    }

    #[test]
    fn test_should_keep_insertion_order_for_equal_index_keys() {
        let mut data = table_with_index(Projection::default());
        for id in ["3", "1", "2"] {
            data.put(make_item(&[("id", s(id)), ("status", s("A"))])).unwrap();
        }
        // Overwriting keeps the original position.
        data.put(make_item(&[("id", s("3")), ("status", s("A")), ("x", s("y"))])).unwrap();
        let ids: Vec<_> = index_items(&data).iter().map(|i| i["id"].clone()).collect();
        assert_eq!(ids, vec![s("3"), s("1"), s("2")]);
    }

    #[test]
    fn test_should_apply_keys_only_and_include_projections() {
        let mut keys_only = table_with_index(Projection {
            projection_type: Some(ProjectionType::KeysOnly),
            non_key_attributes: vec![],
        });
        let item = make_item(&[("id", s("1")), ("status", s("A")), ("name", s("n")), ("extra", s("e"))]);
        keys_only.put(item.clone()).unwrap();
        let entry = &index_items(&keys_only)[0];
        assert_eq!(entry.len(), 2);

        let mut include = table_with_index(Projection {
            projection_type: Some(ProjectionType::Include),
            non_key_attributes: vec!["name".to_owned()],
        });
        include.put(item).unwrap();
        let entry = &index_items(&include)[0];
        assert_eq!(entry.len(), 3);
        assert!(entry.contains_key("name"));
        assert!(!entry.contains_key("extra"));
    }

    #[test]
    fn test_should_reject_mistyped_index_key_without_writing() {
        let mut data = table_with_index(Projection::default());
        let err = data
            .put(make_item(&[("id", s("1")), ("status", AttributeValue::N("1".to_owned()))]))
            .unwrap_err();
        assert!(matches!(err, StorageError::IndexKeyType { .. }));
        assert_eq!(data.item_count(), 0);
    }

    #[test]
    fn test_should_remove_entry_on_delete() {
        let mut data = table_with_index(Projection::default());
        data.put(make_item(&[("id", s("1")), ("status", s("A"))])).unwrap();
        let key = data.key_from_request(&make_item(&[("id", s("1"))])).unwrap();
        data.delete(&key);
        assert!(index_items(&data).is_empty());
        assert_eq!(data.indexes().describe(IndexKind::Global)[0].item_count, 0);
    }
}
