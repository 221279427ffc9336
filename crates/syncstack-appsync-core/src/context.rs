//! Resolver context: the per-invocation state templates read and write.
//!
//! One context is created for each field resolution and owned by it alone.
//! The stash lives for the whole pipeline and is dropped with the context.

use serde_json::{Map, Value};

use syncstack_appsync_model::AppSyncError;

/// Field information exposed as `$ctx.info`.
#[derive(Debug, Clone, Default)]
pub struct ResolverInfo {
    /// Field being resolved.
    pub field_name: String,
    /// Parent type of the field.
    pub parent_type_name: String,
    /// Request variables.
    pub variables: Map<String, Value>,
    /// Slash-separated nested selection paths.
    pub selection_set_list: Vec<String>,
}

/// Error of the last data source invocation, exposed as `$ctx.error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError {
    /// Message.
    pub message: String,
    /// Error type, e.g. `DynamoDB:ConditionalCheckFailedException`.
    pub error_type: String,
}

/// Mutable state of one resolver invocation.
#[derive(Debug, Default)]
pub struct ResolverContext {
    /// Field arguments with variables substituted.
    pub arguments: Map<String, Value>,
    /// Caller identity, passed through unvalidated.
    pub identity: Value,
    /// Resolved value of the parent field.
    pub source: Value,
    /// Data shared between pipeline steps.
    pub stash: Map<String, Value>,
    /// Result of the previous pipeline step.
    pub prev_result: Value,
    /// Result of the current data source invocation.
    pub result: Value,
    /// Error of the current data source invocation.
    pub error: Option<InvocationError>,
    /// Field information.
    pub info: ResolverInfo,
    /// Errors added with `$util.appendError`.
    pub appended_errors: Vec<AppSyncError>,
}

impl ResolverContext {
    /// Context for resolving one field.
    #[must_use]
    pub fn new(arguments: Map<String, Value>, identity: Value, source: Value, info: ResolverInfo) -> Self {
        Self {
            arguments,
            identity,
            source,
            info,
            ..Self::default()
        }
    }

    /// Direct-invocation payload sent to a function without a request template.
    #[must_use]
    pub fn to_invocation_payload(&self) -> Value {
        serde_json::json!({
            "arguments": self.arguments,
            "identity": self.identity,
            "source": self.source,
            "stash": self.stash,
            "prev": {"result": self.prev_result},
            "info": {
                "fieldName": self.info.field_name,
                "parentTypeName": self.info.parent_type_name,
                "variables": self.info.variables,
                "selectionSetList": self.info.selection_set_list,
            },
        })
    }
}
