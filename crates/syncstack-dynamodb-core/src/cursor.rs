//! Opaque pagination tokens.
//!
//! A token is base64 of a small JSON document holding the page's last position
//! and a fingerprint of the request shape. The fingerprint is a SHA-256 over the
//! table, index, key condition, filter, placeholder maps, direction and scan
//! segment, so a token can only resume the exact query that produced it.

use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use syncstack_dynamodb_model::AttributeValue;

use crate::storage::{SlotKey, SortableAttributeValue};

/// Errors decoding a pagination token.
#[derive(Debug, Error)]
pub enum CursorError {
    /// The token is not valid base64 JSON.
    #[error("the pagination token could not be decoded")]
    Undecodable,
    /// The token was issued for a different request.
    #[error("the pagination token was issued for a different query")]
    ShapeMismatch,
    /// The stored position is not a valid key.
    #[error("the pagination token holds an invalid position")]
    InvalidPosition,
}

/// Request properties a token is bound to.
#[derive(Debug, Clone, Copy)]
pub struct QueryShape<'a> {
    /// `Query` or `Scan`.
    pub operation: &'a str,
    /// Table name.
    pub table_name: &'a str,
    /// Index name, if any.
    pub index_name: Option<&'a str>,
    /// Key condition text (queries only).
    pub key_condition: Option<&'a str>,
    /// Filter text.
    pub filter: Option<&'a str>,
    /// Name placeholders.
    pub names: &'a HashMap<String, String>,
    /// Value placeholders.
    pub values: &'a HashMap<String, AttributeValue>,
    /// Sort direction.
    pub forward: bool,
    /// Parallel scan segment and total.
    pub segment: Option<(u32, u32)>,
}

impl QueryShape<'_> {
    /// Hex SHA-256 fingerprint of the shape.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let names: BTreeMap<_, _> = self.names.iter().collect();
        let values: BTreeMap<_, _> = self.values.iter().collect();
        let canonical = serde_json::json!({
            "operation": self.operation,
            "table": self.table_name,
            "index": self.index_name,
            "keyCondition": self.key_condition,
            "filter": self.filter,
            "names": names,
            "values": values,
            "forward": self.forward,
            "segment": self.segment,
        });
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }
}

/// Last position of a page inside a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Partition value.
    pub partition: SortableAttributeValue,
    /// Slot within the partition.
    pub slot: SlotKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct Token {
    shape: String,
    forward: bool,
    partition: AttributeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<AttributeValue>,
    seq: u64,
}

/// Encodes a resume token for `position` under `shape`.
#[must_use]
pub fn encode(shape: &QueryShape<'_>, position: &Position) -> String {
    let token = Token {
        shape: shape.fingerprint(),
        forward: shape.forward,
        partition: position
            .partition
            .to_attribute_value()
            .unwrap_or(AttributeValue::Null(true)),
        sort: position.slot.sort.to_attribute_value(),
        seq: position.slot.seq,
    };
    // Serializing plain attribute values cannot fail.
    let json = serde_json::to_vec(&token).unwrap_or_default();
    BASE64.encode(json)
}

/// Decodes a token, checking that it belongs to `shape`.
///
/// # Errors
///
/// Returns `CursorError` if the token is malformed, belongs to another
/// request, or holds an unusable position.
pub fn decode(shape: &QueryShape<'_>, token: &str) -> Result<Position, CursorError> {
    let bytes = BASE64.decode(token.trim()).map_err(|_| CursorError::Undecodable)?;
    let token: Token = serde_json::from_slice(&bytes).map_err(|_| CursorError::Undecodable)?;
    if token.shape != shape.fingerprint() || token.forward != shape.forward {
        return Err(CursorError::ShapeMismatch);
    }
    let partition = SortableAttributeValue::from_attribute_value("partition", &token.partition)
        .map_err(|_| CursorError::InvalidPosition)?;
    let sort = match &token.sort {
        Some(value) => SortableAttributeValue::from_attribute_value("sort", value).map_err(|_| CursorError::InvalidPosition)?,
        None => SortableAttributeValue::Sentinel,
    };
    Ok(Position {
        partition,
        slot: SlotKey { sort, seq: token.seq },
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn shape<'a>(
        names: &'a HashMap<String, String>,
        values: &'a HashMap<String, AttributeValue>,
        filter: Option<&'a str>,
    ) -> QueryShape<'a> {
        QueryShape {
            operation: "Query",
            table_name: "t",
            index_name: None,
            key_condition: Some("pk = :pk"),
            filter,
            names,
            values,
            forward: true,
            segment: None,
        }
    }

    fn position() -> Position {
        Position {
            partition: SortableAttributeValue::S("a".to_owned()),
            slot: SlotKey {
                sort: SortableAttributeValue::N(Decimal::from(5)),
                seq: 7,
            },
        }
    }

    #[test]
    fn test_should_resume_from_encoded_position() {
        let names = HashMap::new();
        let values = HashMap::from([(":pk".to_owned(), AttributeValue::S("a".to_owned()))]);
        let shape = shape(&names, &values, None);
        let token = encode(&shape, &position());
        assert_eq!(decode(&shape, &token).unwrap(), position());
    }

    #[test]
    fn test_should_reject_token_from_different_query() {
        let names = HashMap::new();
        let values = HashMap::from([(":pk".to_owned(), AttributeValue::S("a".to_owned()))]);
        let token = encode(&shape(&names, &values, None), &position());

        let filtered = shape(&names, &values, Some("x = :pk"));
        assert!(matches!(decode(&filtered, &token), Err(CursorError::ShapeMismatch)));

        let other_values = HashMap::from([(":pk".to_owned(), AttributeValue::S("b".to_owned()))]);
        let other = shape(&names, &other_values, None);
        assert!(matches!(decode(&other, &token), Err(CursorError::ShapeMismatch)));
    }

    #[test]
    fn test_should_reject_garbage_token() {
        let names = HashMap::new();
        let values = HashMap::new();
        let shape = shape(&names, &values, None);
        assert!(matches!(decode(&shape, "not base64!"), Err(CursorError::Undecodable)));
        let not_json = BASE64.encode(b"hello");
        assert!(matches!(decode(&shape, &not_json), Err(CursorError::Undecodable)));
    }
}
