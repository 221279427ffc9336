//! DynamoDB expression language: lexer, parser, syntax tree and evaluator.
//!
//! Condition, filter and key-condition expressions share one grammar but are
//! parsed through separate entry points so errors name their parameter. All
//! parsing is done up front, before any item is touched.

pub mod ast;
pub mod evaluator;
pub mod parser;

use std::collections::HashMap;

use syncstack_dynamodb_model::{AttributeValue, Item};

pub use ast::{
    AttributePath, CompareOp, Expr, FunctionName, LogicalOp, Operand, PathElement, Placeholders,
    UpdateExpr,
};
pub use evaluator::EvalContext;
pub use parser::{
    ExpressionError, ExpressionKind, MAX_EXPRESSION_LENGTH, MAX_NESTING_DEPTH, parse_condition,
    parse_filter, parse_key_condition, parse_projection, parse_update,
};

/// Parse and evaluate a single condition against an item.
///
/// The name and value maps must be used exactly by the expression.
///
/// # Errors
///
/// Returns `ExpressionError` for syntax errors, placeholder mismatches or
/// type errors during evaluation.
#[allow(clippy::implicit_hasher)]
pub fn evaluate(
    text: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
    item: &Item,
) -> Result<bool, ExpressionError> {
    let expr = parse_condition(text)?;
    let mut placeholders = Placeholders::default();
    placeholders.add_condition(&expr);
    placeholders.verify(names, values)?;
    EvalContext {
        item,
        names,
        values,
    }
    .evaluate(&expr)
}

/// Parse and apply a single update expression, returning the new item.
///
/// # Errors
///
/// Returns `ExpressionError` for syntax errors, placeholder mismatches,
/// overlapping paths or operand type errors.
#[allow(clippy::implicit_hasher)]
pub fn apply_update(
    text: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
    item: &Item,
) -> Result<Item, ExpressionError> {
    let update = parse_update(text)?;
    let mut placeholders = Placeholders::default();
    placeholders.add_update(&update);
    placeholders.verify(names, values)?;
    EvalContext {
        item,
        names,
        values,
    }
    .apply_update(&update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_reject_unused_value_before_evaluating() {
        let item = Item::new();
        let values = HashMap::from([
            (":a".to_owned(), AttributeValue::S("x".to_owned())),
            (":unused".to_owned(), AttributeValue::S("y".to_owned())),
        ]);
        let err = evaluate("a = :a", &HashMap::new(), &values, &item).unwrap_err();
        assert!(matches!(err, ExpressionError::UnusedValue { ref name } if name == ":unused"));
    }

    #[test]
    fn test_should_apply_update_with_name_placeholders() {
        let item = Item::new();
        let names = HashMap::from([("#s".to_owned(), "status".to_owned())]);
        let values = HashMap::from([(":v".to_owned(), AttributeValue::S("B".to_owned()))]);
        let updated = apply_update("SET #s = :v", &names, &values, &item).unwrap();
        assert_eq!(updated["status"], AttributeValue::S("B".to_owned()));
    }
}
