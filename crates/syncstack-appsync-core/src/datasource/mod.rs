//! Data Source Router.
//!
//! Maps data source names from the definition to their backends and runs a
//! rendered request document against the right one.

mod dynamodb;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use syncstack_appsync_model::{AppSyncError, DataSourceDefinition, DataSourceType};
use syncstack_dynamodb_core::SyncStackDynamoDB;
use tracing::debug;

/// Invokes functions behind `AWS_LAMBDA` data sources.
///
/// The emulator does not run functions itself; the embedding application
/// supplies an invoker.
#[async_trait]
pub trait FunctionInvoker: Send + Sync + fmt::Debug {
    /// Invoke `function_name` with `payload` and return its result.
    async fn invoke(&self, function_name: &str, payload: Value) -> Result<Value, AppSyncError>;
}

/// A [`FunctionInvoker`] backed by a synchronous closure.
pub struct FnInvoker<F>(pub F);

impl<F> fmt::Debug for FnInvoker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> FunctionInvoker for FnInvoker<F>
where
    F: Fn(&str, Value) -> Result<Value, AppSyncError> + Send + Sync,
{
    async fn invoke(&self, function_name: &str, payload: Value) -> Result<Value, AppSyncError> {
        (self.0)(function_name, payload)
    }
}

/// A loaded data source.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Table operations against one table.
    DynamoDB {
        /// Backing table.
        table_name: String,
        /// Table store.
        provider: Arc<SyncStackDynamoDB>,
    },
    /// Function invocation.
    Lambda {
        /// Function name passed to the invoker.
        function_name: String,
        /// Invoker.
        invoker: Arc<dyn FunctionInvoker>,
    },
    /// Local resolver: the request document is the result.
    None,
}

impl DataSource {
    /// The declared type of this source.
    #[must_use]
    pub fn source_type(&self) -> DataSourceType {
        match self {
            Self::DynamoDB { .. } => DataSourceType::AmazonDynamoDB,
            Self::Lambda { .. } => DataSourceType::AwsLambda,
            Self::None => DataSourceType::None,
        }
    }

    /// Run `request` against this source.
    ///
    /// # Errors
    ///
    /// Returns `TemplateEvaluationError` for an undecodable request document
    /// and `DataSourceError` for backend failures.
    pub async fn invoke(&self, request: Value) -> Result<Value, AppSyncError> {
        match self {
            Self::DynamoDB {
                table_name,
                provider,
            } => dynamodb::execute(provider, table_name, request),
            Self::Lambda {
                function_name,
                invoker,
            } => {
                let payload = match request {
                    Value::Object(mut doc) if doc.contains_key("operation") => {
                        doc.remove("payload").unwrap_or(Value::Null)
                    }
                    other => other,
                };
                debug!(function = %function_name, "invoking function data source");
                invoker.invoke(function_name, payload).await.map_err(|e| {
                    if e.error_type().starts_with("Lambda:") || e.error_type() == "DataSourceError" {
                        e
                    } else {
                        let message = e.message.clone();
                        AppSyncError::data_source(message)
                            .with_error_type("Lambda:Unhandled")
                            .with_source(e)
                    }
                })
            }
            Self::None => Ok(match request {
                Value::Object(mut doc) if doc.contains_key("payload") => {
                    doc.remove("payload").unwrap_or(Value::Null)
                }
                other => other,
            }),
        }
    }
}

/// Name to data source table, built once from the definition.
#[derive(Debug, Clone, Default)]
pub struct DataSourceRouter {
    sources: HashMap<String, DataSource>,
}

impl DataSourceRouter {
    /// Build the router from declared data sources.
    ///
    /// # Errors
    ///
    /// `UnsupportedDataSource` for an unknown type. `InvalidDefinition` for a
    /// duplicate name, a missing table or function name, or a function data
    /// source declared without an invoker.
    pub fn load(
        definitions: &[DataSourceDefinition],
        provider: &Arc<SyncStackDynamoDB>,
        invoker: Option<&Arc<dyn FunctionInvoker>>,
    ) -> Result<Self, AppSyncError> {
        let mut sources = HashMap::with_capacity(definitions.len());
        for def in definitions {
            let source_type = DataSourceType::from_name(&def.source_type).ok_or_else(|| {
                AppSyncError::unsupported_data_source(format!(
                    "Data source '{}' has unsupported type '{}'",
                    def.name, def.source_type
                ))
            })?;
            let source = match source_type {
                DataSourceType::AmazonDynamoDB => DataSource::DynamoDB {
                    table_name: def.table_name.clone().ok_or_else(|| {
                        AppSyncError::invalid_definition(format!(
                            "Data source '{}' requires tableName",
                            def.name
                        ))
                    })?,
                    provider: Arc::clone(provider),
                },
                DataSourceType::AwsLambda => DataSource::Lambda {
                    function_name: def.function_name.clone().ok_or_else(|| {
                        AppSyncError::invalid_definition(format!(
                            "Data source '{}' requires functionName",
                            def.name
                        ))
                    })?,
                    invoker: invoker.cloned().ok_or_else(|| {
                        AppSyncError::invalid_definition(format!(
                            "Data source '{}' needs a function invoker",
                            def.name
                        ))
                    })?,
                },
                DataSourceType::None => DataSource::None,
            };
            if sources.insert(def.name.clone(), source).is_some() {
                return Err(AppSyncError::invalid_definition(format!(
                    "Duplicate data source '{}'",
                    def.name
                )));
            }
        }
        Ok(Self { sources })
    }

    /// Look up a data source by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataSource> {
        self.sources.get(name)
    }

    /// Whether `name` is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Run `request` against the named source.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` if the name is unknown, otherwise as
    /// [`DataSource::invoke`].
    pub async fn invoke(&self, name: &str, request: Value) -> Result<Value, AppSyncError> {
        let source = self.get(name).ok_or_else(|| {
            AppSyncError::invalid_definition(format!("Unknown data source '{name}'"))
        })?;
        source.invoke(request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use syncstack_appsync_model::AppSyncErrorCode;
    use syncstack_dynamodb_core::DynamoDBConfig;

    use super::*;

    fn def(name: &str, source_type: &str) -> DataSourceDefinition {
        DataSourceDefinition {
            name: name.to_owned(),
            source_type: source_type.to_owned(),
            table_name: None,
            function_name: None,
        }
    }

    fn provider() -> Arc<SyncStackDynamoDB> {
        Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()))
    }

    #[test]
    fn test_should_reject_unsupported_type() {
        let err = DataSourceRouter::load(&[def("http", "HTTP")], &provider(), None).unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::UnsupportedDataSource);
    }

    #[test]
    fn test_should_require_table_name_and_invoker() {
        let err =
            DataSourceRouter::load(&[def("posts", "AMAZON_DYNAMODB")], &provider(), None).unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::InvalidDefinition);

        let mut lambda = def("fn", "AWS_LAMBDA");
        lambda.function_name = Some("resolve".to_owned());
        let err = DataSourceRouter::load(&[lambda], &provider(), None).unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::InvalidDefinition);
    }

    #[tokio::test]
    async fn test_should_echo_payload_for_none_source() {
        let router = DataSourceRouter::load(&[def("local", "NONE")], &provider(), None).unwrap();
        let result = router
            .invoke("local", json!({"version": "2018-05-29", "payload": {"ok": true}}))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        let whole = router.invoke("local", json!({"a": 1})).await.unwrap();
        assert_eq!(whole, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_should_pass_payload_to_function_invoker() {
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(FnInvoker(|name: &str, payload: Value| -> Result<Value, AppSyncError> {
            Ok(json!({"function": name, "echo": payload}))
        }));
        let mut lambda = def("fn", "AWS_LAMBDA");
        lambda.function_name = Some("resolve".to_owned());
        let router = DataSourceRouter::load(&[lambda], &provider(), Some(&invoker)).unwrap();
        let result = router
            .invoke("fn", json!({"operation": "Invoke", "payload": {"x": 1}}))
            .await
            .unwrap();
        assert_eq!(result, json!({"function": "resolve", "echo": {"x": 1}}));
    }

    #[tokio::test]
    async fn test_should_type_function_failures() {
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(FnInvoker(|_: &str, _: Value| -> Result<Value, AppSyncError> {
            Err(AppSyncError::internal("boom"))
        }));
        let mut lambda = def("fn", "AWS_LAMBDA");
        lambda.function_name = Some("resolve".to_owned());
        let router = DataSourceRouter::load(&[lambda], &provider(), Some(&invoker)).unwrap();
        let err = router.invoke("fn", json!({})).await.unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::DataSourceError);
        assert_eq!(err.error_type(), "Lambda:Unhandled");
    }
}
