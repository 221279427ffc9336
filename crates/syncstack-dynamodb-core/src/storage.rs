//! In-memory storage engine for DynamoDB tables.
//!
//! A table's base items and every secondary index are stored in the same shape,
//! a [`Collection`]:
//!
//! ```text
//! BTreeMap<partition, BTreeMap<SlotKey { sort, seq }, StoredItem>>
//! ```
//!
//! - Partitions and sort keys are [`SortableAttributeValue`]s, ordered by
//!   DynamoDB comparison rules (numbers as exact decimals).
//! - Base items use `seq = 0`, so the key is unique per primary key. Index
//!   entries carry the base item's insertion sequence, so entries sharing an
//!   index sort key come back in insertion order.
//! - Tables without a sort key use a sentinel sort value.
//!
//! [`TableData`] owns the base collection and the [`IndexManager`]. It is always
//! accessed through the table's `RwLock`, so index maintenance happens in the
//! same critical section as the base write.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Bound;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use syncstack_dynamodb_model::types::{AttributeDefinition, KeySchemaElement, KeyType, ScalarAttributeType};
use syncstack_dynamodb_model::{AttributeValue, Item};

use crate::index::IndexManager;
use crate::number::{format_number, parse_number};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A required key attribute was not found in the item.
    #[error("missing required key attribute: {attr}")]
    MissingKeyAttribute {
        /// The name of the missing attribute.
        attr: String,
    },
    /// A key attribute has the wrong type.
    #[error("key attribute '{attr}' has wrong type: expected {expected}, got {actual}")]
    InvalidKeyType {
        /// The name of the attribute.
        attr: String,
        /// The expected type descriptor.
        expected: String,
        /// The actual type descriptor.
        actual: String,
    },
    /// A key map carried attributes beyond the key schema.
    #[error("the provided key element does not match the schema: unexpected attribute '{attr}'")]
    UnexpectedKeyAttribute {
        /// The extra attribute.
        attr: String,
    },
    /// A number attribute could not be parsed.
    #[error("attribute '{attr}' is not a valid number: {value}")]
    InvalidNumber {
        /// The attribute name.
        attr: String,
        /// The offending text.
        value: String,
    },
    /// An index key attribute is present with the wrong type.
    #[error(
        "one or more parameter values were invalid: type mismatch for index key {attr} of index {index}: expected {expected}, got {actual}"
    )]
    IndexKeyType {
        /// The index name.
        index: String,
        /// The attribute name.
        attr: String,
        /// The expected type descriptor.
        expected: String,
        /// The actual type descriptor.
        actual: String,
    },
    /// The item exceeds the maximum item size.
    #[error("item size {size} has exceeded the maximum allowed size of {max} bytes")]
    ItemTooLarge {
        /// Computed size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
    /// A key schema could not be built from its definition.
    #[error("{message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// SortableAttributeValue
// ---------------------------------------------------------------------------

/// A key-eligible [`AttributeValue`] with a total order.
///
/// - **S**: UTF-8 byte ordering.
/// - **N**: exact decimal ordering.
/// - **B**: unsigned byte ordering.
/// - **Sentinel**: the single sort value of tables (or indexes) without a
///   sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortableAttributeValue {
    /// String key.
    S(String),
    /// Number key.
    N(Decimal),
    /// Binary key.
    B(bytes::Bytes),
    /// Placeholder sort value when there is no sort key.
    Sentinel,
}

impl SortableAttributeValue {
    /// Converts back into an [`AttributeValue`]; `None` for the sentinel.
    #[must_use]
    pub fn to_attribute_value(&self) -> Option<AttributeValue> {
        match self {
            Self::S(s) => Some(AttributeValue::S(s.clone())),
            Self::N(n) => Some(AttributeValue::N(format_number(*n))),
            Self::B(b) => Some(AttributeValue::B(b.clone())),
            Self::Sentinel => None,
        }
    }

    /// Creates a sortable value from an attribute value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKeyType` for non-scalar values and
    /// `StorageError::InvalidNumber` for unparsable numbers.
    pub fn from_attribute_value(attr_name: &str, value: &AttributeValue) -> Result<Self, StorageError> {
        match value {
            AttributeValue::S(s) => Ok(Self::S(s.clone())),
            AttributeValue::N(n) => parse_number(n).map(Self::N).ok_or_else(|| StorageError::InvalidNumber {
                attr: attr_name.to_owned(),
                value: n.clone(),
            }),
            AttributeValue::B(b) => Ok(Self::B(b.clone())),
            other => Err(StorageError::InvalidKeyType {
                attr: attr_name.to_owned(),
                expected: "S, N, or B".to_owned(),
                actual: other.type_descriptor().to_owned(),
            }),
        }
    }

    /// Whether this value starts with `prefix` (strings and binaries only).
    #[must_use]
    pub fn begins_with(&self, prefix: &Self) -> bool {
        match (self, prefix) {
            (Self::S(s), Self::S(p)) => s.starts_with(p.as_str()),
            (Self::B(b), Self::B(p)) => b.starts_with(p),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Key schema
// ---------------------------------------------------------------------------

/// A single key attribute definition with its name and scalar type.
#[derive(Debug, Clone)]
pub struct KeyAttribute {
    /// The attribute name.
    pub name: String,
    /// The scalar type (S, N, or B).
    pub attr_type: ScalarAttributeType,
}

/// Parsed key schema of a table or index.
#[derive(Debug, Clone)]
pub struct KeySchema {
    /// Partition (HASH) key name and type.
    pub partition_key: KeyAttribute,
    /// Optional sort (RANGE) key name and type.
    pub sort_key: Option<KeyAttribute>,
}

/// A primary key: partition value and sort value (sentinel without a sort key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey {
    /// The partition (HASH) key value.
    pub partition: SortableAttributeValue,
    /// The sort (RANGE) key value.
    pub sort: SortableAttributeValue,
}

impl KeySchema {
    /// Builds a key schema from wire-level elements, resolving each key
    /// attribute's type through the attribute definitions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidSchema` when the schema does not have
    /// exactly one HASH key, at most one RANGE key, or references an
    /// attribute without a valid S/N/B definition.
    pub fn from_elements(
        elements: &[KeySchemaElement],
        definitions: &[AttributeDefinition],
    ) -> Result<Self, StorageError> {
        let resolve = |element: &KeySchemaElement| -> Result<KeyAttribute, StorageError> {
            let def = definitions
                .iter()
                .find(|d| d.attribute_name == element.attribute_name)
                .ok_or_else(|| StorageError::InvalidSchema {
                    message: format!(
                        "one or more parameter values were invalid: some index key attributes are not defined in AttributeDefinitions: {}",
                        element.attribute_name
                    ),
                })?;
            if !def.attribute_type.is_valid_key_type() {
                return Err(StorageError::InvalidSchema {
                    message: format!(
                        "invalid attribute type {} for key attribute {}",
                        def.attribute_type, def.attribute_name
                    ),
                });
            }
            Ok(KeyAttribute {
                name: element.attribute_name.clone(),
                attr_type: def.attribute_type.clone(),
            })
        };

        let hashes: Vec<_> = elements.iter().filter(|e| e.key_type == KeyType::Hash).collect();
        let ranges: Vec<_> = elements.iter().filter(|e| e.key_type == KeyType::Range).collect();
        let ([hash], ranges @ ([] | [_])) = (hashes.as_slice(), ranges.as_slice()) else {
            return Err(StorageError::InvalidSchema {
                message: "a key schema needs exactly one HASH key and at most one RANGE key".to_owned(),
            });
        };
        let partition_key = resolve(hash)?;
        let sort_key = ranges.first().map(|r| resolve(r)).transpose()?;
        if sort_key.as_ref().is_some_and(|s| s.name == partition_key.name) {
            return Err(StorageError::InvalidSchema {
                message: "HASH and RANGE keys must be different attributes".to_owned(),
            });
        }
        Ok(Self { partition_key, sort_key })
    }

    /// Names of the key attributes, partition key first.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.name.as_str()).chain(self.sort_key.as_ref().map(|k| k.name.as_str()))
    }

    /// Extracts the primary key from an item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::MissingKeyAttribute` if a key attribute is
    /// absent, or a type error if one has the wrong type.
    pub fn extract(&self, item: &Item) -> Result<PrimaryKey, StorageError> {
        let partition = required_key_value(&self.partition_key, item)?;
        let sort = match &self.sort_key {
            Some(sk) => required_key_value(sk, item)?,
            None => SortableAttributeValue::Sentinel,
        };
        Ok(PrimaryKey { partition, sort })
    }

    /// Extracts a key if every key attribute is present.
    ///
    /// Used by secondary indexes: an item without the index key attributes has
    /// no entry in the index.
    ///
    /// # Errors
    ///
    /// Returns a type error if a key attribute is present with the wrong type.
    pub fn extract_if_present(&self, item: &Item) -> Result<Option<PrimaryKey>, StorageError> {
        if self.attribute_names().any(|name| !item.contains_key(name)) {
            return Ok(None);
        }
        self.extract(item).map(Some)
    }

    /// Validates a request key: exactly the key attributes, correctly typed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnexpectedKeyAttribute` for extra attributes and
    /// the errors of [`KeySchema::extract`] otherwise.
    pub fn extract_exact(&self, key: &Item) -> Result<PrimaryKey, StorageError> {
        if let Some(extra) = key.keys().find(|k| !self.attribute_names().any(|n| n == k.as_str())) {
            return Err(StorageError::UnexpectedKeyAttribute { attr: extra.clone() });
        }
        self.extract(key)
    }

    /// Copies just the key attributes out of an item.
    #[must_use]
    pub fn key_item(&self, item: &Item) -> Item {
        self.attribute_names()
            .filter_map(|name| item.get(name).map(|v| (name.to_owned(), v.clone())))
            .collect()
    }
}

fn required_key_value(key: &KeyAttribute, item: &Item) -> Result<SortableAttributeValue, StorageError> {
    let value = item
        .get(&key.name)
        .ok_or_else(|| StorageError::MissingKeyAttribute { attr: key.name.clone() })?;
    if !key.attr_type.matches(value) {
        return Err(StorageError::InvalidKeyType {
            attr: key.name.clone(),
            expected: key.attr_type.as_str().to_owned(),
            actual: value.type_descriptor().to_owned(),
        });
    }
    SortableAttributeValue::from_attribute_value(&key.name, value)
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Position of an entry inside a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    /// Sort key value (sentinel without a sort key).
    pub sort: SortableAttributeValue,
    /// `0` for base items, the base item's insertion sequence for index entries.
    pub seq: u64,
}

impl SlotKey {
    /// Slot of a base item.
    #[must_use]
    pub fn base(sort: SortableAttributeValue) -> Self {
        Self { sort, seq: 0 }
    }
}

/// An item as stored, with bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredItem {
    /// All stored attributes.
    pub item: Item,
    /// Insertion sequence of the base item, kept across overwrites.
    pub seq: u64,
    /// Item size in bytes.
    pub size: u64,
}

/// Sorted entries of one partition.
pub type Partition = BTreeMap<SlotKey, StoredItem>;

/// Entry yielded by collection iteration.
pub type Entry<'a> = (&'a SortableAttributeValue, &'a SlotKey, &'a StoredItem);

/// Ordered entries of a table or index.
#[derive(Debug, Default)]
pub struct Collection {
    partitions: BTreeMap<SortableAttributeValue, Partition>,
    len: usize,
    size_bytes: u64,
}

impl Collection {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total size of all entries in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Looks up one entry.
    #[must_use]
    pub fn get(&self, partition: &SortableAttributeValue, slot: &SlotKey) -> Option<&StoredItem> {
        self.partitions.get(partition)?.get(slot)
    }

    /// Inserts or replaces an entry, returning the replaced one.
    pub fn insert(&mut self, partition: SortableAttributeValue, slot: SlotKey, stored: StoredItem) -> Option<StoredItem> {
        let added = stored.size;
        let old = self.partitions.entry(partition).or_default().insert(slot, stored);
        self.size_bytes += added;
        match &old {
            Some(old) => self.size_bytes = self.size_bytes.saturating_sub(old.size),
            None => self.len += 1,
        }
        old
    }

    /// Removes an entry, dropping the partition once it is empty.
    pub fn remove(&mut self, partition: &SortableAttributeValue, slot: &SlotKey) -> Option<StoredItem> {
        let entries = self.partitions.get_mut(partition)?;
        let removed = entries.remove(slot)?;
        if entries.is_empty() {
            self.partitions.remove(partition);
        }
        self.len -= 1;
        self.size_bytes = self.size_bytes.saturating_sub(removed.size);
        Some(removed)
    }

    /// Entries of one partition.
    #[must_use]
    pub fn partition(&self, partition: &SortableAttributeValue) -> Option<&Partition> {
        self.partitions.get(partition)
    }

    /// All entries in (partition, slot) order, starting strictly after `after`.
    pub fn iter_after(&self, after: Option<(SortableAttributeValue, SlotKey)>) -> Box<dyn Iterator<Item = Entry<'_>> + '_> {
        let Some((pk, slot)) = after else {
            return Box::new(
                self.partitions
                    .iter()
                    .flat_map(|(pk, entries)| entries.iter().map(move |(slot, s)| (pk, slot, s))),
            );
        };
        let first = self
            .partitions
            .get_key_value(&pk)
            .into_iter()
            .flat_map(move |(pk, entries)| {
                entries
                    .range((Bound::Excluded(slot.clone()), Bound::Unbounded))
                    .map(move |(slot, s)| (pk, slot, s))
            });
        let rest = self
            .partitions
            .range((Bound::Excluded(pk), Bound::Unbounded))
            .flat_map(|(pk, entries)| entries.iter().map(move |(slot, s)| (pk, slot, s)));
        Box::new(first.chain(rest))
    }
}

/// Parallel scan segment owning a partition.
#[must_use]
pub fn segment_of(partition: &SortableAttributeValue, total_segments: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    partition.hash(&mut hasher);
    let segments = u64::from(total_segments.max(1));
    // The remainder is below `total_segments`, which fits in u32.
    u32::try_from(hasher.finish() % segments).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// TableData
// ---------------------------------------------------------------------------

/// Base items and secondary indexes of one table.
///
/// Always accessed under the owning table's lock.
#[derive(Debug)]
pub struct TableData {
    schema: KeySchema,
    base: Collection,
    indexes: IndexManager,
    next_seq: u64,
    max_item_size: u64,
}

impl TableData {
    /// Creates empty table data.
    #[must_use]
    pub fn new(schema: KeySchema, indexes: IndexManager, max_item_size: u64) -> Self {
        Self {
            schema,
            base: Collection::default(),
            indexes,
            next_seq: 0,
            max_item_size,
        }
    }

    /// The table's key schema.
    #[must_use]
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Base items.
    #[must_use]
    pub fn base(&self) -> &Collection {
        &self.base
    }

    /// Secondary indexes.
    #[must_use]
    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Number of base items.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.base.len()
    }

    /// Parses a request key against the table schema.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the key does not match the schema exactly.
    pub fn key_from_request(&self, key: &Item) -> Result<PrimaryKey, StorageError> {
        self.schema.extract_exact(key)
    }

    /// Current item for a key.
    #[must_use]
    pub fn get(&self, key: &PrimaryKey) -> Option<&Item> {
        self.base
            .get(&key.partition, &SlotKey::base(key.sort.clone()))
            .map(|s| &s.item)
    }

    /// Checks that `item` can be stored: key attributes, index key types and
    /// item size. Returns the item's primary key.
    ///
    /// # Errors
    ///
    /// Returns the first `StorageError` found.
    pub fn validate_put(&self, item: &Item) -> Result<PrimaryKey, StorageError> {
        let key = self.schema.extract(item)?;
        self.indexes.validate(item)?;
        let size = calculate_item_size(item);
        if size > self.max_item_size {
            return Err(StorageError::ItemTooLarge {
                size,
                max: self.max_item_size,
            });
        }
        Ok(key)
    }

    /// Inserts or replaces an item and maintains every index. Returns the
    /// replaced item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` from [`TableData::validate_put`]; nothing is
    /// modified in that case.
    pub fn put(&mut self, item: Item) -> Result<Option<Item>, StorageError> {
        let key = self.validate_put(&item)?;
        let slot = SlotKey::base(key.sort);
        let existing = self.base.get(&key.partition, &slot);
        let seq = match existing {
            Some(stored) => stored.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.indexes.apply(existing.map(|s| &s.item), Some(&item), seq);

        let size = calculate_item_size(&item);
        let old = self.base.insert(key.partition, slot, StoredItem { item, seq, size });
        debug!(seq, size, replaced = old.is_some(), "stored item");
        Ok(old.map(|s| s.item))
    }

    /// Deletes an item and its index entries. Returns the deleted item.
    pub fn delete(&mut self, key: &PrimaryKey) -> Option<Item> {
        let removed = self.base.remove(&key.partition, &SlotKey::base(key.sort.clone()))?;
        self.indexes.apply(Some(&removed.item), None, removed.seq);
        debug!(seq = removed.seq, "deleted item");
        Some(removed.item)
    }
}

// ---------------------------------------------------------------------------
// Item size calculation
// ---------------------------------------------------------------------------

/// Calculates the size of an item in bytes following DynamoDB's rules.
///
/// Each attribute contributes `len(name) + size(value)`:
/// - **S**: UTF-8 length
/// - **N**: `(len + 1) / 2 + 1`
/// - **B**: byte length
/// - **Bool / Null**: 1 byte
/// - **SS / NS / BS**: sum of element sizes
/// - **L**: `3 + sum(1 + element_size)`
/// - **M**: `3 + sum(key_len + 1 + value_size)`
#[must_use]
pub fn calculate_item_size(item: &Item) -> u64 {
    item.iter()
        .map(|(name, value)| name.len() as u64 + calculate_value_size(value))
        .sum()
}

fn calculate_value_size(value: &AttributeValue) -> u64 {
    match value {
        AttributeValue::S(s) => s.len() as u64,
        AttributeValue::N(n) => (n.len().div_ceil(2) + 1) as u64,
        AttributeValue::B(b) => b.len() as u64,
        AttributeValue::Bool(_) | AttributeValue::Null(_) => 1,
        AttributeValue::Ss(v) => v.iter().map(|s| s.len() as u64).sum(),
        AttributeValue::Ns(v) => v.iter().map(|n| (n.len().div_ceil(2) + 1) as u64).sum(),
        AttributeValue::Bs(v) => v.iter().map(|b| b.len() as u64).sum(),
        AttributeValue::L(list) => 3 + list.iter().map(|elem| 1 + calculate_value_size(elem)).sum::<u64>(),
        AttributeValue::M(map) => {
            3 + map
                .iter()
                .map(|(k, v)| k.len() as u64 + 1 + calculate_value_size(v))
                .sum::<u64>()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
