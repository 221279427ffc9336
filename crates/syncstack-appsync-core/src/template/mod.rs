//! Mapping templates: a restricted Velocity dialect.
//!
//! Supported: references (`$x`, `$!x`, `${x}`, `$!{x}`) with property, index
//! and method access, `#set`, `#if`/`#elseif`/`#else`, `#foreach`, `#break`,
//! `#return`, comments, and the `$util` library. Macros and file inclusion
//! are rejected at compile time. Evaluation is bounded by [`TemplateLimits`].
//!
//! A template sees the resolver context as `$ctx` (alias `$context`). Writes
//! to `$ctx.stash` persist to later templates of the same pipeline; all other
//! context fields are read-only copies.

pub mod ast;
mod eval;
pub mod parser;
mod util;
pub mod value;

use std::collections::BTreeMap;

pub use parser::TemplateError;
use serde_json::Map;
pub use value::Value;

use self::{
    ast::Node,
    eval::{Evaluator, Flow},
};
use crate::context::ResolverContext;

/// Hard caps on one template evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateLimits {
    /// Evaluation steps.
    pub max_steps: usize,
    /// Nesting depth of syntax, evaluation and values.
    pub max_depth: usize,
    /// Iterations of a single `#foreach`, and length of a range literal.
    pub max_foreach_iterations: usize,
    /// Rendered output size in bytes.
    pub max_output_bytes: usize,
}

impl Default for TemplateLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_depth: 64,
            max_foreach_iterations: 1000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

/// Result of rendering a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Rendered text.
    pub output: String,
    /// Value passed to `#return`, if the template returned early.
    pub returned: Option<serde_json::Value>,
}

impl Template {
    /// Compile template text.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` for syntax errors, unsupported directives and
    /// nesting beyond `limits.max_depth`.
    pub fn compile(source: &str, limits: &TemplateLimits) -> Result<Self, TemplateError> {
        Ok(Self {
            nodes: parser::parse_template(source, limits.max_depth)?,
        })
    }

    /// Whether the template reads `$ctx.<field>` anywhere.
    #[must_use]
    pub fn reads_context_field(&self, field: &str) -> bool {
        ast::reads_context_field(&self.nodes, field)
    }

    /// Render against a resolver context.
    ///
    /// Stash writes are copied back into `ctx`, and errors added with
    /// `$util.appendError` are pushed onto `ctx.appended_errors`.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` for evaluation failures, exceeded limits and
    /// errors raised by `$util.error`, `$util.validate` or
    /// `$util.unauthorized`.
    pub fn render(&self, ctx: &mut ResolverContext, limits: &TemplateLimits) -> Result<Rendered, TemplateError> {
        let mut evaluator = Evaluator::new(limits);
        let context = context_value(ctx);
        evaluator.vars.insert("ctx".to_owned(), context.clone());
        evaluator.vars.insert("context".to_owned(), context.clone());

        let flow = evaluator.exec_block(&self.nodes);
        ctx.appended_errors.append(&mut evaluator.appended);
        let flow = flow?;

        if let Value::Map(map) = &context {
            if let Some(stash) = map.borrow().get("stash") {
                if let serde_json::Value::Object(stash) = stash.to_json(limits.max_depth)? {
                    ctx.stash = stash;
                }
            }
        }

        let returned = match flow {
            Flow::Return(value) => Some(value.to_json(limits.max_depth)?),
            Flow::Normal | Flow::Break => None,
        };
        Ok(Rendered {
            output: evaluator.output,
            returned,
        })
    }
}

/// The `$ctx` map for one render.
fn context_value(ctx: &ResolverContext) -> Value {
    let object = |map: &Map<String, serde_json::Value>| Value::from_json(&serde_json::Value::Object(map.clone()));
    let arguments = object(&ctx.arguments);

    let mut prev = BTreeMap::new();
    prev.insert("result".to_owned(), Value::from_json(&ctx.prev_result));

    let error = ctx.error.as_ref().map_or(Value::Null, |error| {
        let mut map = BTreeMap::new();
        map.insert("message".to_owned(), Value::String(error.message.clone()));
        map.insert("type".to_owned(), Value::String(error.error_type.clone()));
        Value::map(map)
    });

    let mut info = BTreeMap::new();
    info.insert("fieldName".to_owned(), Value::String(ctx.info.field_name.clone()));
    info.insert(
        "parentTypeName".to_owned(),
        Value::String(ctx.info.parent_type_name.clone()),
    );
    info.insert("variables".to_owned(), object(&ctx.info.variables));
    info.insert(
        "selectionSetList".to_owned(),
        Value::list(
            ctx.info
                .selection_set_list
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );

    let mut map = BTreeMap::new();
    map.insert("arguments".to_owned(), arguments.clone());
    map.insert("args".to_owned(), arguments);
    map.insert("identity".to_owned(), Value::from_json(&ctx.identity));
    map.insert("source".to_owned(), Value::from_json(&ctx.source));
    map.insert("stash".to_owned(), object(&ctx.stash));
    map.insert("prev".to_owned(), Value::map(prev));
    map.insert("result".to_owned(), Value::from_json(&ctx.result));
    map.insert("error".to_owned(), error);
    map.insert("info".to_owned(), Value::map(info));
    Value::map(map)
}
