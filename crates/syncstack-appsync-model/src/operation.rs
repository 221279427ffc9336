//! Pre-parsed GraphQL operations.
//!
//! Arguments are plain JSON. A `{"$variable": "name"}` object anywhere inside
//! an argument is replaced by the named variable at execution time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Read-only; root fields run concurrently.
    Query,
    /// Writes; root fields run serially in document order.
    Mutation,
    /// Registers a subscription instead of returning data.
    Subscription,
}

impl OperationType {
    /// GraphQL root type name.
    #[must_use]
    pub fn root_type_name(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Mutation => "Mutation",
            Self::Subscription => "Subscription",
        }
    }
}

/// A validated GraphQL operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation kind.
    pub operation_type: OperationType,
    /// Optional operation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Root field selections.
    pub selections: Vec<Selection>,
}

/// One selected field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Field name in the schema.
    pub name: String,
    /// Response key override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Field arguments, possibly holding variable references.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    /// Nested selections; empty for leaf fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<Selection>,
    /// Named return type of the field (list and non-null wrappers removed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl Selection {
    /// Key of this field in the response object.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Arguments with variable references substituted. Unknown variables
    /// become `null`.
    #[must_use]
    pub fn resolve_arguments(&self, variables: &Map<String, Value>) -> Map<String, Value> {
        self.arguments
            .iter()
            .map(|(k, v)| (k.clone(), substitute_variables(v, variables)))
            .collect()
    }

    /// Slash-separated paths of every nested field, in document order.
    #[must_use]
    pub fn selection_set_list(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(&self.selections, "", &mut out);
        out
    }
}

fn collect_paths(selections: &[Selection], prefix: &str, out: &mut Vec<String>) {
    for selection in selections {
        let path = if prefix.is_empty() {
            selection.name.clone()
        } else {
            format!("{prefix}/{}", selection.name)
        };
        out.push(path.clone());
        collect_paths(&selection.selections, &path, out);
    }
}

fn substitute_variables(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(name)) = map.get("$variable") {
                    return variables.get(name).cloned().unwrap_or(Value::Null);
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), substitute_variables(v, variables)))
                    .collect(),
            )
        }
        Value::Array(items) => items
            .iter()
            .map(|v| substitute_variables(v, variables))
            .collect(),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_substitute_nested_variables() {
        let selection: Selection = serde_json::from_value(json!({
            "name": "createPost",
            "arguments": {
                "input": {"title": {"$variable": "title"}, "tags": [{"$variable": "tag"}]},
                "missing": {"$variable": "nope"}
            }
        }))
        .unwrap();
        let variables = json!({"title": "hello", "tag": "rust"});
        let args = selection.resolve_arguments(variables.as_object().unwrap());
        assert_eq!(args["input"], json!({"title": "hello", "tags": ["rust"]}));
        assert_eq!(args["missing"], Value::Null);
    }

    #[test]
    fn test_should_list_nested_selection_paths() {
        let selection: Selection = serde_json::from_value(json!({
            "name": "getPost",
            "selections": [
                {"name": "id"},
                {"name": "author", "selections": [{"name": "name"}]}
            ]
        }))
        .unwrap();
        assert_eq!(selection.selection_set_list(), vec!["id", "author", "author/name"]);
        assert_eq!(selection.response_key(), "getPost");
    }
}
