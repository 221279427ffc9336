//! Emulator definition: tables, data sources, functions, resolvers and
//! subscription bindings, loaded once at start.
//!
//! Data source types are kept as strings here so that an unknown type is
//! reported as `UnsupportedDataSource` by the loader rather than as a JSON
//! error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use syncstack_dynamodb_model::input::CreateTableInput;

/// The full emulator definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// Tables to create at start.
    #[serde(default)]
    pub tables: Vec<CreateTableInput>,
    /// Data sources by name.
    #[serde(default)]
    pub data_sources: Vec<DataSourceDefinition>,
    /// Pipeline functions by name.
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
    /// Field resolvers.
    #[serde(default)]
    pub resolvers: Vec<ResolverDefinition>,
    /// Subscription fields and the mutations that trigger them.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionDefinition>,
}

/// Supported data source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceType {
    /// Table Store and Query Engine.
    AmazonDynamoDB,
    /// Function-style invocation.
    AwsLambda,
    /// Local resolver; the request payload is the result.
    None,
}

impl DataSourceType {
    /// Parse the declared type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AMAZON_DYNAMODB" => Some(Self::AmazonDynamoDB),
            "AWS_LAMBDA" => Some(Self::AwsLambda),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }

    /// The declared type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmazonDynamoDB => "AMAZON_DYNAMODB",
            Self::AwsLambda => "AWS_LAMBDA",
            Self::None => "NONE",
        }
    }
}

/// A declared data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDefinition {
    /// Unique name referenced by functions and resolvers.
    pub name: String,
    /// Type name, e.g. `AMAZON_DYNAMODB`.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Backing table for `AMAZON_DYNAMODB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Function name for `AWS_LAMBDA`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

/// A pipeline function: request mapping, invocation, response mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    /// Unique name referenced by pipeline resolvers.
    pub name: String,
    /// Data source invoked by this function.
    pub data_source: String,
    /// Request mapping template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_mapping_template: Option<String>,
    /// Response mapping template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mapping_template: Option<String>,
}

/// Unit resolvers invoke one data source; pipeline resolvers run functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolverKind {
    /// One data source, request and response templates around it.
    #[default]
    Unit,
    /// Before mapping, ordered functions, after mapping.
    Pipeline,
}

/// A resolver attached to `type_name.field_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverDefinition {
    /// Parent type, e.g. `Mutation`.
    pub type_name: String,
    /// Field name.
    pub field_name: String,
    /// Unit or pipeline.
    #[serde(default)]
    pub kind: ResolverKind,
    /// Data source of a unit resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    /// Function names of a pipeline resolver, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
    /// Request template (before mapping for pipelines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_mapping_template: Option<String>,
    /// Response template (after mapping for pipelines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mapping_template: Option<String>,
}

/// A subscription field bound to the mutations that publish to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDefinition {
    /// Subscription field name.
    pub field_name: String,
    /// Mutation field names whose results are published.
    pub mutations: Vec<String>,
}

/// Filter expression supplied when subscribing, evaluated against each
/// published payload with the condition expression grammar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    /// Condition expression text.
    pub expression: String,
    /// `#name` placeholders.
    #[serde(default)]
    pub expression_names: HashMap<String, String>,
    /// `:value` placeholders as plain JSON.
    #[serde(default)]
    pub expression_values: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_parse_definition_document() {
        let definition: Definition = serde_json::from_value(json!({
            "tables": [{
                "TableName": "Posts",
                "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}],
                "AttributeDefinitions": [{"AttributeName": "id", "AttributeType": "S"}]
            }],
            "dataSources": [{"name": "posts", "type": "AMAZON_DYNAMODB", "tableName": "Posts"}],
            "resolvers": [{
                "typeName": "Mutation",
                "fieldName": "createPost",
                "kind": "PIPELINE",
                "functions": ["validate", "write"]
            }],
            "subscriptions": [{"fieldName": "onCreatePost", "mutations": ["createPost"]}]
        }))
        .unwrap();
        assert_eq!(definition.tables[0].table_name, "Posts");
        assert_eq!(definition.resolvers[0].kind, ResolverKind::Pipeline);
        assert_eq!(
            DataSourceType::from_name(&definition.data_sources[0].source_type),
            Some(DataSourceType::AmazonDynamoDB)
        );
        assert_eq!(DataSourceType::from_name("HTTP"), None);
    }
}
