//! Resolver Pipeline.
//!
//! A resolver moves through fixed stages:
//!
//! ```text
//! BeforeMapping -> [RequestMapping -> Invoke -> ResponseMapping] per function -> AfterMapping
//! ```
//!
//! A unit resolver is a pipeline of one implicit function with no before or
//! after mapping. `#return` in a request template skips the invocation and
//! the response template of that function; `#return` in the before mapping
//! ends the resolver with the returned value.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde_json::Value;
use syncstack_appsync_model::{
    AppSyncError, AppSyncErrorCode, FunctionDefinition, ResolverDefinition, ResolverKind,
};
use tracing::debug;

use crate::{
    context::{InvocationError, ResolverContext},
    datasource::DataSourceRouter,
    error::template_error_to_appsync,
    template::{Rendered, Template, TemplateLimits},
};

/// Stage of a running resolver, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pipeline before mapping.
    BeforeMapping,
    /// Request mapping of the function at this index.
    RequestMapping(usize),
    /// Data source invocation of the function at this index.
    Invoke(usize),
    /// Response mapping of the function at this index.
    ResponseMapping(usize),
    /// Pipeline after mapping.
    AfterMapping,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeMapping => f.write_str("before-mapping"),
            Self::RequestMapping(i) => write!(f, "function[{i}].request-mapping"),
            Self::Invoke(i) => write!(f, "function[{i}].invoke"),
            Self::ResponseMapping(i) => write!(f, "function[{i}].response-mapping"),
            Self::AfterMapping => f.write_str("after-mapping"),
        }
    }
}

/// A compiled pipeline function.
#[derive(Debug)]
pub struct PipelineFunction {
    name: String,
    data_source: String,
    request: Option<Template>,
    response: Option<Template>,
}

impl PipelineFunction {
    /// Compile a declared function.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` for an unknown data source, `TemplateEvaluationError`
    /// for a template that does not compile.
    pub fn load(
        def: &FunctionDefinition,
        router: &DataSourceRouter,
        limits: &TemplateLimits,
    ) -> Result<Self, AppSyncError> {
        Self::new(
            &def.name,
            &def.data_source,
            def.request_mapping_template.as_deref(),
            def.response_mapping_template.as_deref(),
            router,
            limits,
        )
    }

    fn new(
        name: &str,
        data_source: &str,
        request: Option<&str>,
        response: Option<&str>,
        router: &DataSourceRouter,
        limits: &TemplateLimits,
    ) -> Result<Self, AppSyncError> {
        if !router.contains(data_source) {
            return Err(AppSyncError::invalid_definition(format!(
                "'{name}' references unknown data source '{data_source}'"
            )));
        }
        Ok(Self {
            name: name.to_owned(),
            data_source: data_source.to_owned(),
            request: compile(request, limits)?,
            response: compile(response, limits)?,
        })
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn compile(source: Option<&str>, limits: &TemplateLimits) -> Result<Option<Template>, AppSyncError> {
    source
        .map(|s| Template::compile(s, limits).map_err(template_error_to_appsync))
        .transpose()
}

/// A compiled resolver bound to `type_name.field_name`.
#[derive(Debug)]
pub struct Resolver {
    type_name: String,
    field_name: String,
    kind: ResolverKind,
    before: Option<Template>,
    functions: Vec<Arc<PipelineFunction>>,
    after: Option<Template>,
}

impl Resolver {
    /// Compile a declared resolver.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` when a unit resolver has no data source, a pipeline
    /// resolver names an unknown function, or a data source is unknown.
    pub fn load(
        def: &ResolverDefinition,
        functions: &HashMap<String, Arc<PipelineFunction>>,
        router: &DataSourceRouter,
        limits: &TemplateLimits,
    ) -> Result<Self, AppSyncError> {
        let field = format!("{}.{}", def.type_name, def.field_name);
        let (before, steps, after) = match def.kind {
            ResolverKind::Unit => {
                let data_source = def.data_source.as_deref().ok_or_else(|| {
                    AppSyncError::invalid_definition(format!("Unit resolver {field} requires a data source"))
                })?;
                let step = PipelineFunction::new(
                    &field,
                    data_source,
                    def.request_mapping_template.as_deref(),
                    def.response_mapping_template.as_deref(),
                    router,
                    limits,
                )?;
                (None, vec![Arc::new(step)], None)
            }
            ResolverKind::Pipeline => {
                let steps = def
                    .functions
                    .iter()
                    .map(|name| {
                        functions.get(name).cloned().ok_or_else(|| {
                            AppSyncError::invalid_definition(format!(
                                "Pipeline resolver {field} references unknown function '{name}'"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    compile(def.request_mapping_template.as_deref(), limits)?,
                    steps,
                    compile(def.response_mapping_template.as_deref(), limits)?,
                )
            }
        };
        Ok(Self {
            type_name: def.type_name.clone(),
            field_name: def.field_name.clone(),
            kind: def.kind,
            before,
            functions: steps,
            after,
        })
    }

    /// Parent type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Field name.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Unit or pipeline.
    #[must_use]
    pub fn kind(&self) -> ResolverKind {
        self.kind
    }

    /// Run the resolver to a field result.
    ///
    /// `cancelled` is checked before every data source invocation; once set,
    /// no further invocation starts and the resolver fails with `Cancelled`.
    ///
    /// # Errors
    ///
    /// Template failures, limit violations, errors raised from templates, and
    /// data source errors not handled by the response template.
    pub async fn resolve(
        &self,
        ctx: &mut ResolverContext,
        router: &DataSourceRouter,
        limits: &TemplateLimits,
        cancelled: &AtomicBool,
    ) -> Result<Value, AppSyncError> {
        if let Some(before) = &self.before {
            self.trace(Stage::BeforeMapping);
            let rendered = render(before, ctx, limits)?;
            if let Some(value) = rendered.returned {
                return Ok(value);
            }
            ctx.prev_result = parse_document(&rendered.output)?;
        }

        for (index, function) in self.functions.iter().enumerate() {
            let result = self
                .run_function(index, function, ctx, router, limits, cancelled)
                .await?;
            ctx.prev_result = result;
        }

        let Some(after) = &self.after else {
            return Ok(std::mem::take(&mut ctx.prev_result));
        };
        self.trace(Stage::AfterMapping);
        ctx.result = ctx.prev_result.clone();
        ctx.error = None;
        let rendered = render(after, ctx, limits)?;
        match rendered.returned {
            Some(value) => Ok(value),
            None => parse_document(&rendered.output),
        }
    }

    async fn run_function(
        &self,
        index: usize,
        function: &PipelineFunction,
        ctx: &mut ResolverContext,
        router: &DataSourceRouter,
        limits: &TemplateLimits,
        cancelled: &AtomicBool,
    ) -> Result<Value, AppSyncError> {
        ctx.result = Value::Null;
        ctx.error = None;

        self.trace(Stage::RequestMapping(index));
        let request = match &function.request {
            Some(template) => {
                let rendered = render(template, ctx, limits)?;
                if let Some(value) = rendered.returned {
                    return Ok(value);
                }
                parse_document(&rendered.output)?
            }
            None => ctx.to_invocation_payload(),
        };

        if cancelled.load(Ordering::Acquire) {
            return Err(AppSyncError::cancelled());
        }
        self.trace(Stage::Invoke(index));
        let mut pending = None;
        match router.invoke(&function.data_source, request).await {
            Ok(value) => ctx.result = value,
            Err(e) if e.code == AppSyncErrorCode::DataSourceError => {
                ctx.error = Some(InvocationError {
                    message: e.message.clone(),
                    error_type: e.error_type().to_owned(),
                });
                pending = Some(e);
            }
            Err(e) => return Err(e),
        }

        let Some(response) = &function.response else {
            return match pending {
                Some(e) => Err(e),
                None => Ok(std::mem::take(&mut ctx.result)),
            };
        };
        if let Some(e) = pending {
            if !response.reads_context_field("error") {
                return Err(e);
            }
        }
        self.trace(Stage::ResponseMapping(index));
        let rendered = render(response, ctx, limits)?;
        match rendered.returned {
            Some(value) => Ok(value),
            None => parse_document(&rendered.output),
        }
    }

    fn trace(&self, stage: Stage) {
        debug!(field = %format_args!("{}.{}", self.type_name, self.field_name), %stage, "resolver stage");
    }
}

fn render(template: &Template, ctx: &mut ResolverContext, limits: &TemplateLimits) -> Result<Rendered, AppSyncError> {
    template.render(ctx, limits).map_err(template_error_to_appsync)
}

/// Parse rendered template output. Blank output is `null`.
fn parse_document(output: &str) -> Result<Value, AppSyncError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(trimmed).map_err(|e| {
        AppSyncError::template(format!("Unable to parse the JSON document: {e}")).with_source(e)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use syncstack_appsync_model::DataSourceDefinition;
    use syncstack_dynamodb_core::{DynamoDBConfig, SyncStackDynamoDB};
    use syncstack_dynamodb_model::{
        input::CreateTableInput,
        types::{AttributeDefinition, KeySchemaElement, ScalarAttributeType},
    };

    use super::*;
    use crate::context::ResolverInfo;

    fn router() -> DataSourceRouter {
        let provider = Arc::new(SyncStackDynamoDB::new(DynamoDBConfig::default()));
        provider
            .handle_create_table(CreateTableInput {
                table_name: "Posts".to_owned(),
                key_schema: vec![KeySchemaElement::hash("id")],
                attribute_definitions: vec![AttributeDefinition::new("id", ScalarAttributeType::S)],
                ..Default::default()
            })
            .unwrap();
        DataSourceRouter::load(
            &[
                DataSourceDefinition {
                    name: "local".to_owned(),
                    source_type: "NONE".to_owned(),
                    table_name: None,
                    function_name: None,
                },
                DataSourceDefinition {
                    name: "posts".to_owned(),
                    source_type: "AMAZON_DYNAMODB".to_owned(),
                    table_name: Some("Posts".to_owned()),
                    function_name: None,
                },
            ],
            &provider,
            None,
        )
        .unwrap()
    }

    fn context(args: Value) -> ResolverContext {
        let Value::Object(arguments) = args else {
            panic!("arguments must be an object");
        };
        ResolverContext::new(
            arguments,
            Value::Null,
            Value::Null,
            ResolverInfo {
                field_name: "createPost".to_owned(),
                parent_type_name: "Mutation".to_owned(),
                ..ResolverInfo::default()
            },
        )
    }

    fn function(name: &str, data_source: &str, request: &str, response: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_owned(),
            data_source: data_source.to_owned(),
            request_mapping_template: Some(request.to_owned()),
            response_mapping_template: Some(response.to_owned()),
        }
    }

    fn pipeline(functions: &[&str]) -> ResolverDefinition {
        ResolverDefinition {
            type_name: "Mutation".to_owned(),
            field_name: "createPost".to_owned(),
            kind: ResolverKind::Pipeline,
            data_source: None,
            functions: functions.iter().map(|f| (*f).to_owned()).collect(),
            request_mapping_template: Some("{}".to_owned()),
            response_mapping_template: Some("$util.toJson($ctx.result)".to_owned()),
        }
    }

    fn load_functions(
        defs: &[FunctionDefinition],
        router: &DataSourceRouter,
    ) -> HashMap<String, Arc<PipelineFunction>> {
        defs.iter()
            .map(|d| {
                let f = PipelineFunction::load(d, router, &TemplateLimits::default()).unwrap();
                (d.name.clone(), Arc::new(f))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_should_resolve_unit_resolver_through_none_source() {
        let router = router();
        let def = ResolverDefinition {
            type_name: "Query".to_owned(),
            field_name: "echo".to_owned(),
            kind: ResolverKind::Unit,
            data_source: Some("local".to_owned()),
            functions: vec![],
            request_mapping_template: Some(r#"{"payload": $util.toJson($ctx.args)}"#.to_owned()),
            response_mapping_template: Some("$util.toJson($ctx.result)".to_owned()),
        };
        let limits = TemplateLimits::default();
        let resolver = Resolver::load(&def, &HashMap::new(), &router, &limits).unwrap();
        let mut ctx = context(json!({"msg": "hi"}));
        let result = resolver
            .resolve(&mut ctx, &router, &limits, &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(result, json!({"msg": "hi"}));
    }

    #[tokio::test]
    async fn test_should_share_stash_and_short_circuit_on_return() {
        let router = router();
        let defs = [
            function(
                "validate",
                "local",
                r#"#if($ctx.args.title.length() < 3)#set($ctx.stash.valid = false)#else#set($ctx.stash.valid = true)#end{"payload": {}}"#,
                "$util.toJson($ctx.result)",
            ),
            function(
                "write",
                "posts",
                r#"#if(!$ctx.stash.valid)#return({"skipped": true})#end{"operation": "PutItem", "key": {"id": {"S": "p1"}}, "attributeValues": {"title": {"S": "$ctx.args.title"}}}"#,
                "$util.toJson($ctx.result)",
            ),
        ];
        let functions = load_functions(&defs, &router);
        let limits = TemplateLimits::default();
        let resolver = Resolver::load(&pipeline(&["validate", "write"]), &functions, &router, &limits).unwrap();

        let mut ctx = context(json!({"title": "no"}));
        let result = resolver
            .resolve(&mut ctx, &router, &limits, &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(result, json!({"skipped": true}));
        assert_eq!(ctx.stash["valid"], json!(false));

        let mut ctx = context(json!({"title": "a real title"}));
        let result = resolver
            .resolve(&mut ctx, &router, &limits, &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(result, json!({"id": "p1", "title": "a real title"}));
    }

    #[tokio::test]
    async fn test_should_surface_unhandled_data_source_error() {
        let router = router();
        let put = r#"{"operation": "PutItem", "key": {"id": {"S": "p1"}}, "condition": {"expression": "attribute_not_exists(id)"}}"#;
        let defs = [
            function("ignores", "posts", put, "$util.toJson($ctx.result)"),
            function(
                "handles",
                "posts",
                put,
                r#"#if($ctx.error){"failed": "$ctx.error.type"}#else$util.toJson($ctx.result)#end"#,
            ),
        ];
        let functions = load_functions(&defs, &router);
        let limits = TemplateLimits::default();
        let cancelled = AtomicBool::new(false);

        let first = Resolver::load(&pipeline(&["ignores"]), &functions, &router, &limits).unwrap();
        first
            .resolve(&mut context(json!({})), &router, &limits, &cancelled)
            .await
            .unwrap();
        let err = first
            .resolve(&mut context(json!({})), &router, &limits, &cancelled)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "DynamoDB:ConditionalCheckFailedException");

        let second = Resolver::load(&pipeline(&["handles"]), &functions, &router, &limits).unwrap();
        let handled = second
            .resolve(&mut context(json!({})), &router, &limits, &cancelled)
            .await
            .unwrap();
        assert_eq!(
            handled,
            json!({"failed": "DynamoDB:ConditionalCheckFailedException"})
        );
    }

    #[tokio::test]
    async fn test_should_not_invoke_after_cancellation() {
        let router = router();
        let defs = [function(
            "write",
            "posts",
            r#"{"operation": "PutItem", "key": {"id": {"S": "c1"}}}"#,
            "$util.toJson($ctx.result)",
        )];
        let functions = load_functions(&defs, &router);
        let limits = TemplateLimits::default();
        let resolver = Resolver::load(&pipeline(&["write"]), &functions, &router, &limits).unwrap();
        let err = resolver
            .resolve(&mut context(json!({})), &router, &limits, &AtomicBool::new(true))
            .await
            .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn test_should_reject_invalid_response_json() {
        let router = router();
        let defs = [function("echo", "local", r#"{"payload": 1}"#, "not json")];
        let functions = load_functions(&defs, &router);
        let limits = TemplateLimits::default();
        let resolver = Resolver::load(&pipeline(&["echo"]), &functions, &router, &limits).unwrap();
        let err = resolver
            .resolve(&mut context(json!({})), &router, &limits, &AtomicBool::new(false))
            .await
            .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::TemplateEvaluationError);
    }

    #[test]
    fn test_should_reject_unknown_function_and_data_source() {
        let router = router();
        let limits = TemplateLimits::default();
        let err = Resolver::load(&pipeline(&["missing"]), &HashMap::new(), &router, &limits).unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::InvalidDefinition);

        let err = PipelineFunction::load(
            &function("f", "nowhere", "{}", "{}"),
            &router,
            &limits,
        )
        .unwrap_err();
        assert_eq!(err.code, AppSyncErrorCode::InvalidDefinition);
    }
}
