//! GraphQL request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::operation::Operation;

/// A GraphQL request: operation, variables and pass-through identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// The validated operation.
    pub operation: Operation,
    /// Variable values.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Caller identity, exposed to templates unvalidated.
    #[serde(default)]
    pub identity: Option<Value>,
}

/// One step of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Object field (response key).
    Key(String),
    /// List position.
    Index(usize),
}

/// A field-level GraphQL error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// Human-readable message.
    pub message: String,
    /// Error type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Extra data from `$util.error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Extra info from `$util.error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<Value>,
    /// Path of the failed field.
    #[serde(default)]
    pub path: Vec<PathSegment>,
}

/// A GraphQL response with partial data and field errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// Resolved data; `null` fields have errors.
    pub data: Option<Value>,
    /// Field errors in resolution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}
