//! Expression evaluator for DynamoDB condition, update, and projection expressions.
//!
//! The evaluator resolves expression attribute names and values against an item,
//! then evaluates condition expressions to booleans, applies update mutations, or
//! projects attributes. Numbers are compared and added as exact decimals.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use syncstack_dynamodb_model::{AttributeValue, Item};

use super::ast::{
    AttributePath, CompareOp, Expr, FunctionName, LogicalOp, Operand, PathElement, SetValue,
    UpdateExpr,
};
use super::parser::ExpressionError;
use crate::number::{format_number, parse_number};

/// Type names accepted by `attribute_type`.
const TYPE_DESCRIPTORS: [&str; 10] = ["S", "SS", "N", "NS", "B", "BS", "BOOL", "NULL", "L", "M"];

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Evaluation context binding an item to its expression attribute name/value mappings.
#[derive(Debug)]
pub struct EvalContext<'a> {
    /// The item being evaluated. Update operands always read from this item.
    pub item: &'a Item,
    /// Expression attribute name substitutions (`#name` -> actual attribute name).
    pub names: &'a HashMap<String, String>,
    /// Expression attribute value substitutions (`:val` -> `AttributeValue`).
    pub values: &'a HashMap<String, AttributeValue>,
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

impl<'a> EvalContext<'a> {
    /// Evaluate a condition expression against the item.
    ///
    /// `AND` and `OR` short-circuit left to right, so an error in the right
    /// operand is only reported when the left one does not decide the result.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError` if a placeholder cannot be resolved or an
    /// operator is applied to an operand of the wrong type.
    pub fn evaluate(&self, expr: &Expr) -> Result<bool, ExpressionError> {
        match expr {
            Expr::Compare { left, op, right } => self.eval_compare(left, *op, right),
            Expr::Between { value, low, high } => self.eval_between(value, low, high),
            Expr::In { value, list } => self.eval_in(value, list),
            Expr::Logical { op, left, right } => match op {
                LogicalOp::And => Ok(self.evaluate(left)? && self.evaluate(right)?),
                LogicalOp::Or => Ok(self.evaluate(left)? || self.evaluate(right)?),
            },
            Expr::Not(inner) => self.evaluate(inner).map(|v| !v),
            Expr::Function { name, args } => self.eval_function(*name, args),
        }
    }

    fn eval_compare(
        &self,
        left: &Operand,
        op: CompareOp,
        right: &Operand,
    ) -> Result<bool, ExpressionError> {
        let lval = self.resolve_operand(left)?;
        let rval = self.resolve_operand(right)?;

        if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
            check_orderable_placeholder(left, lval.as_deref(), op)?;
            check_orderable_placeholder(right, rval.as_deref(), op)?;
        }

        let (Some(lv), Some(rv)) = (lval, rval) else {
            return Ok(false);
        };
        compare_values(&lv, &rv, op)
    }

    fn eval_between(
        &self,
        value: &Operand,
        low: &Operand,
        high: &Operand,
    ) -> Result<bool, ExpressionError> {
        let lo = self.resolve_operand(low)?;
        let hi = self.resolve_operand(high)?;
        check_orderable_placeholder(low, lo.as_deref(), CompareOp::Ge)?;
        check_orderable_placeholder(high, hi.as_deref(), CompareOp::Le)?;
        let v = self.resolve_operand(value)?;

        let (Some(v), Some(lo), Some(hi)) = (v, lo, hi) else {
            return Ok(false);
        };
        if order_values(&lo, &hi)? == Some(Ordering::Greater) {
            return Err(ExpressionError::InvalidOperand {
                operation: "BETWEEN".to_owned(),
                message: format!("lower bound {lo} is greater than upper bound {hi}"),
            });
        }
        Ok(compare_values(&v, &lo, CompareOp::Ge)? && compare_values(&v, &hi, CompareOp::Le)?)
    }

    fn eval_in(&self, value: &Operand, list: &[Operand]) -> Result<bool, ExpressionError> {
        let candidates = list
            .iter()
            .map(|op| self.resolve_operand(op))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(v) = self.resolve_operand(value)? else {
            return Ok(false);
        };
        Ok(candidates
            .iter()
            .flatten()
            .any(|c| values_equal(&v, c)))
    }

    fn eval_function(&self, name: FunctionName, args: &[Operand]) -> Result<bool, ExpressionError> {
        let path = operand_as_path(args.first(), name)?;
        match name {
            FunctionName::AttributeExists => Ok(self.resolve_path(path)?.is_some()),
            FunctionName::AttributeNotExists => Ok(self.resolve_path(path)?.is_none()),
            FunctionName::AttributeType => {
                let expected = self.resolve_operand(second_arg(args, name)?)?;
                let Some(AttributeValue::S(expected)) = expected.as_deref() else {
                    return Err(ExpressionError::TypeMismatch {
                        message: "attribute_type expects a string type name".to_owned(),
                    });
                };
                if !TYPE_DESCRIPTORS.contains(&expected.as_str()) {
                    return Err(ExpressionError::InvalidOperand {
                        operation: name.to_string(),
                        message: format!("unknown attribute type '{expected}'"),
                    });
                }
                Ok(self
                    .resolve_path(path)?
                    .is_some_and(|v| v.type_descriptor() == expected))
            }
            FunctionName::BeginsWith => {
                let prefix = self.resolve_operand(second_arg(args, name)?)?;
                let attr = self.resolve_path(path)?;
                match (attr, prefix.as_deref()) {
                    (Some(AttributeValue::S(s)), Some(AttributeValue::S(p))) => {
                        Ok(s.starts_with(p.as_str()))
                    }
                    (Some(AttributeValue::B(b)), Some(AttributeValue::B(p))) => {
                        Ok(b.starts_with(p))
                    }
                    (_, Some(AttributeValue::S(_) | AttributeValue::B(_)) | None) => Ok(false),
                    (_, Some(other)) => Err(ExpressionError::TypeMismatch {
                        message: format!(
                            "begins_with expects a string or binary prefix, got {}",
                            other.type_descriptor()
                        ),
                    }),
                }
            }
            FunctionName::Contains => {
                let needle = self.resolve_operand(second_arg(args, name)?)?;
                let (Some(attr), Some(needle)) = (self.resolve_path(path)?, needle) else {
                    return Ok(false);
                };
                Ok(attribute_contains(attr, &needle))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Operand resolution
// ---------------------------------------------------------------------------

impl<'a> EvalContext<'a> {
    /// Resolve an operand to its concrete value, if present.
    ///
    /// A path that does not exist in the item yields `None`, as does
    /// `size()` of a missing or unsized attribute.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError` if a placeholder cannot be resolved.
    pub fn resolve_operand(
        &self,
        operand: &Operand,
    ) -> Result<Option<Cow<'a, AttributeValue>>, ExpressionError> {
        match operand {
            Operand::Path(path) => Ok(self.resolve_path(path)?.map(Cow::Borrowed)),
            Operand::Value(name) => self
                .values
                .get(name)
                .map(|v| Some(Cow::Borrowed(v)))
                .ok_or_else(|| ExpressionError::UnresolvedValue { name: name.clone() }),
            Operand::Size(path) => Ok(self
                .resolve_path(path)?
                .and_then(attribute_size)
                .map(|n| Cow::Owned(AttributeValue::N(n.to_string())))),
        }
    }

    /// Walk an attribute path against the item, resolving `#name` placeholders
    /// through the names map.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::UnresolvedName` for an unknown `#name`.
    pub fn resolve_path(&self, path: &AttributePath) -> Result<Option<&'a AttributeValue>, ExpressionError> {
        let resolved = self.resolve_names(path)?;
        Ok(lookup(self.item, &resolved.elements))
    }

    /// Substitute every `#name` element of a path.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::UnresolvedName` for an unknown `#name`.
    pub fn resolve_names(&self, path: &AttributePath) -> Result<AttributePath, ExpressionError> {
        let elements = path
            .elements
            .iter()
            .map(|element| match element {
                PathElement::Attribute(name) if name.starts_with('#') => self
                    .names
                    .get(name)
                    .map(|n| PathElement::Attribute(n.clone()))
                    .ok_or_else(|| ExpressionError::UnresolvedName { name: name.clone() }),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AttributePath { elements })
    }
}

// ---------------------------------------------------------------------------
// Update application
// ---------------------------------------------------------------------------

impl EvalContext<'_> {
    /// Apply an update expression, returning the new item.
    ///
    /// Every right-hand side is computed from the original item, so the order of
    /// actions within the expression does not matter. The original item is
    /// never modified; on error nothing has changed.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::ConflictingClause` when two target paths
    /// overlap, and other variants for unresolved placeholders, invalid
    /// document paths or operand type mismatches.
    pub fn apply_update(&self, update: &UpdateExpr) -> Result<Item, ExpressionError> {
        let targets = update
            .target_paths()
            .map(|p| self.resolve_names(p))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, later) in targets.iter().enumerate() {
            if targets[..i].iter().any(|earlier| earlier.overlaps(later)) {
                return Err(ExpressionError::ConflictingClause {
                    path: later.to_string(),
                });
            }
        }

        let mut result = self.item.clone();

        for action in &update.set_actions {
            let path = self.resolve_names(&action.path)?;
            let value = self.resolve_set_value(&action.value)?;
            set_path_value(&mut result, &path, value)?;
        }

        // Later list indexes first so earlier removals do not shift them.
        let mut removals = update
            .remove_paths
            .iter()
            .map(|p| self.resolve_names(p))
            .collect::<Result<Vec<_>, _>>()?;
        removals.sort();
        for path in removals.iter().rev() {
            remove_path_value(&mut result, path);
        }

        for action in &update.add_actions {
            let path = self.resolve_names(&action.path)?;
            let name = top_level_name(&path, "ADD")?;
            let value = self.require_operand(&action.value, "ADD")?;
            let merged = add_values(result.get(name), value.into_owned())?;
            result.insert(name.to_owned(), merged);
        }

        for action in &update.delete_actions {
            let path = self.resolve_names(&action.path)?;
            let name = top_level_name(&path, "DELETE")?;
            let value = self.require_operand(&action.value, "DELETE")?;
            let Some(existing) = result.get(name) else {
                if !value.is_set() {
                    return Err(ExpressionError::TypeMismatch {
                        message: "DELETE requires a set operand".to_owned(),
                    });
                }
                continue;
            };
            match subtract_set(existing, &value)? {
                Some(remaining) => result.insert(name.to_owned(), remaining),
                None => result.remove(name),
            };
        }

        Ok(result)
    }

    fn require_operand(
        &self,
        operand: &Operand,
        operation: &str,
    ) -> Result<Cow<'_, AttributeValue>, ExpressionError> {
        self.resolve_operand(operand)?
            .ok_or_else(|| ExpressionError::InvalidOperand {
                operation: operation.to_owned(),
                message: "the operand refers to an attribute that does not exist in the item"
                    .to_owned(),
            })
    }

    fn resolve_set_value(&self, value: &SetValue) -> Result<AttributeValue, ExpressionError> {
        match value {
            SetValue::Operand(op) => Ok(self.require_operand(op, "SET")?.into_owned()),
            SetValue::Plus(a, b) | SetValue::Minus(a, b) => {
                let left = self.resolve_set_value(a)?;
                let right = self.resolve_set_value(b)?;
                let is_add = matches!(value, SetValue::Plus(..));
                numeric_arithmetic(&left, &right, is_add)
            }
            SetValue::IfNotExists(path, fallback) => match self.resolve_path(path)? {
                Some(existing) => Ok(existing.clone()),
                None => Ok(self.require_operand(fallback, "if_not_exists")?.into_owned()),
            },
            SetValue::ListAppend(a, b) => {
                match (self.resolve_set_value(a)?, self.resolve_set_value(b)?) {
                    (AttributeValue::L(mut first), AttributeValue::L(second)) => {
                        first.extend(second);
                        Ok(AttributeValue::L(first))
                    }
                    (x, y) => Err(ExpressionError::TypeMismatch {
                        message: format!(
                            "list_append expects two lists, got {} and {}",
                            x.type_descriptor(),
                            y.type_descriptor()
                        ),
                    }),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Partially projected document, rebuilt into an item once all paths are in.
enum Projected {
    Whole(AttributeValue),
    Map(BTreeMap<String, Projected>),
    List(BTreeMap<usize, Projected>),
}

impl Projected {
    fn into_value(self) -> AttributeValue {
        match self {
            Self::Whole(v) => v,
            Self::Map(m) => AttributeValue::M(m.into_iter().map(|(k, v)| (k, v.into_value())).collect()),
            Self::List(l) => AttributeValue::L(l.into_values().map(Self::into_value).collect()),
        }
    }
}

impl EvalContext<'_> {
    /// Apply a projection, returning a new item with only the requested paths.
    ///
    /// Nested paths keep their enclosing structure; list elements picked by
    /// index come back as a compacted list in index order. Paths that do not
    /// exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::UnresolvedName` for an unknown `#name`.
    pub fn apply_projection(&self, paths: &[AttributePath]) -> Result<Item, ExpressionError> {
        let mut root = Projected::Map(BTreeMap::new());
        for path in paths {
            let resolved = self.resolve_names(path)?;
            if let Some(value) = lookup(self.item, &resolved.elements) {
                project_into(&mut root, &resolved.elements, value);
            }
        }
        match root.into_value() {
            AttributeValue::M(item) => Ok(item),
            _ => Ok(Item::new()),
        }
    }
}

/// Merge one resolved path into the projection tree. A whole value already
/// taken at a shorter path covers everything beneath it.
fn project_into(node: &mut Projected, elements: &[PathElement], value: &AttributeValue) {
    let Some((first, rest)) = elements.split_first() else {
        return;
    };
    let child = match (node, first) {
        (Projected::Map(m), PathElement::Attribute(key)) => {
            m.entry(key.clone()).or_insert_with(|| branch_for(rest, value))
        }
        (Projected::List(l), PathElement::Index(idx)) => {
            l.entry(*idx).or_insert_with(|| branch_for(rest, value))
        }
        _ => return,
    };
    if rest.is_empty() {
        *child = Projected::Whole(value.clone());
    } else {
        project_into(child, rest, value);
    }
}

fn branch_for(rest: &[PathElement], value: &AttributeValue) -> Projected {
    match rest.first() {
        None => Projected::Whole(value.clone()),
        Some(PathElement::Attribute(_)) => Projected::Map(BTreeMap::new()),
        Some(PathElement::Index(_)) => Projected::List(BTreeMap::new()),
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Follow resolved path elements from the item root.
fn lookup<'v>(item: &'v Item, elements: &[PathElement]) -> Option<&'v AttributeValue> {
    let (PathElement::Attribute(head), rest) = elements.split_first()? else {
        return None;
    };
    let mut current = item.get(head)?;
    for element in rest {
        current = match (current, element) {
            (AttributeValue::M(map), PathElement::Attribute(key)) => map.get(key)?,
            (AttributeValue::L(list), PathElement::Index(idx)) => list.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

fn operand_as_path(
    operand: Option<&Operand>,
    name: FunctionName,
) -> Result<&AttributePath, ExpressionError> {
    match operand {
        Some(Operand::Path(path)) => Ok(path),
        _ => Err(ExpressionError::InvalidOperand {
            operation: name.to_string(),
            message: "first argument must be a document path".to_owned(),
        }),
    }
}

fn second_arg(args: &[Operand], name: FunctionName) -> Result<&Operand, ExpressionError> {
    args.get(1).ok_or_else(|| ExpressionError::InvalidOperand {
        operation: name.to_string(),
        message: "missing second argument".to_owned(),
    })
}

fn is_ordered_type(v: &AttributeValue) -> bool {
    matches!(v, AttributeValue::S(_) | AttributeValue::N(_) | AttributeValue::B(_))
}

/// Ordering operators only accept scalar placeholders.
fn check_orderable_placeholder(
    operand: &Operand,
    value: Option<&AttributeValue>,
    op: CompareOp,
) -> Result<(), ExpressionError> {
    match (operand, value) {
        (Operand::Value(name), Some(v)) if !is_ordered_type(v) => Err(ExpressionError::TypeMismatch {
            message: format!(
                "operator {op} cannot be applied to {name} of type {}",
                v.type_descriptor()
            ),
        }),
        _ => Ok(()),
    }
}

/// Ordering between two values of the same scalar type; `None` otherwise.
fn order_values(a: &AttributeValue, b: &AttributeValue) -> Result<Option<Ordering>, ExpressionError> {
    Ok(match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.cmp(y)),
        (AttributeValue::N(x), AttributeValue::N(y)) => Some(number(x)?.cmp(&number(y)?)),
        _ => None,
    })
}

/// Compare two values. Values of different types are only ever unequal.
fn compare_values(
    left: &AttributeValue,
    right: &AttributeValue,
    op: CompareOp,
) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => return Ok(values_equal(left, right)),
        CompareOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }
    let Some(ord) = order_values(left, right)? else {
        return Ok(false);
    };
    Ok(match op {
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    })
}

/// Structural equality with numeric and unordered-set semantics.
pub(crate) fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::N(x), AttributeValue::N(y)) => {
            match (parse_number(x), parse_number(y)) {
                (Some(x), Some(y)) => x == y,
                _ => x == y,
            }
        }
        (AttributeValue::Ss(x), AttributeValue::Ss(y)) => {
            x.len() == y.len() && x.iter().all(|s| y.contains(s))
        }
        (AttributeValue::Bs(x), AttributeValue::Bs(y)) => {
            x.len() == y.len() && x.iter().all(|s| y.contains(s))
        }
        (AttributeValue::Ns(x), AttributeValue::Ns(y)) => {
            x.len() == y.len() && x.iter().all(|n| number_set_contains(y, n))
        }
        (AttributeValue::L(x), AttributeValue::L(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (AttributeValue::M(x), AttributeValue::M(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

fn number_set_contains(set: &[String], n: &str) -> bool {
    set.iter()
        .any(|m| values_equal(&AttributeValue::N(m.clone()), &AttributeValue::N(n.to_owned())))
}

fn attribute_contains(attr: &AttributeValue, needle: &AttributeValue) -> bool {
    match (attr, needle) {
        (AttributeValue::S(s), AttributeValue::S(sub)) => s.contains(sub.as_str()),
        (AttributeValue::B(b), AttributeValue::B(sub)) => {
            sub.is_empty() || b.windows(sub.len()).any(|w| w == sub.as_ref())
        }
        (AttributeValue::Ss(set), AttributeValue::S(s)) => set.contains(s),
        (AttributeValue::Ns(set), AttributeValue::N(n)) => number_set_contains(set, n),
        (AttributeValue::Bs(set), AttributeValue::B(b)) => set.contains(b),
        (AttributeValue::L(list), _) => list.iter().any(|v| values_equal(v, needle)),
        _ => false,
    }
}

fn number(s: &str) -> Result<rust_decimal::Decimal, ExpressionError> {
    parse_number(s).ok_or_else(|| ExpressionError::TypeMismatch {
        message: format!("'{s}' is not a valid number"),
    })
}

fn numeric_arithmetic(
    a: &AttributeValue,
    b: &AttributeValue,
    is_add: bool,
) -> Result<AttributeValue, ExpressionError> {
    let (AttributeValue::N(x), AttributeValue::N(y)) = (a, b) else {
        return Err(ExpressionError::TypeMismatch {
            message: format!(
                "arithmetic expects numbers, got {} and {}",
                a.type_descriptor(),
                b.type_descriptor()
            ),
        });
    };
    let (x, y) = (number(x)?, number(y)?);
    let result = if is_add { x.checked_add(y) } else { x.checked_sub(y) };
    result
        .map(|d| AttributeValue::N(format_number(d)))
        .ok_or_else(|| ExpressionError::InvalidOperand {
            operation: if is_add { "+" } else { "-" }.to_owned(),
            message: "number overflow".to_owned(),
        })
}

/// `size()` of a value; numbers, booleans and nulls have no size.
fn attribute_size(val: &AttributeValue) -> Option<usize> {
    match val {
        AttributeValue::S(s) => Some(s.len()),
        AttributeValue::B(b) => Some(b.len()),
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => Some(v.len()),
        AttributeValue::Bs(v) => Some(v.len()),
        AttributeValue::L(v) => Some(v.len()),
        AttributeValue::M(m) => Some(m.len()),
        AttributeValue::N(_) | AttributeValue::Bool(_) | AttributeValue::Null(_) => None,
    }
}

fn top_level_name<'p>(path: &'p AttributePath, operation: &str) -> Result<&'p str, ExpressionError> {
    match path.elements.as_slice() {
        [PathElement::Attribute(name)] => Ok(name),
        _ => Err(ExpressionError::InvalidOperand {
            operation: operation.to_owned(),
            message: format!("{operation} only supports top-level attributes, got {path}"),
        }),
    }
}

fn invalid_document_path(path: &AttributePath) -> ExpressionError {
    ExpressionError::InvalidOperand {
        operation: "SET".to_owned(),
        message: format!("the document path {path} is invalid for update"),
    }
}

/// Write `value` at `path`. The parent of a nested path must already exist.
/// An index past the end of a list appends.
fn set_path_value(
    item: &mut Item,
    path: &AttributePath,
    value: AttributeValue,
) -> Result<(), ExpressionError> {
    let Some((PathElement::Attribute(head), rest)) = path.elements.split_first() else {
        return Err(invalid_document_path(path));
    };
    let Some((last, parents)) = rest.split_last() else {
        item.insert(head.clone(), value);
        return Ok(());
    };

    let mut current = item.get_mut(head).ok_or_else(|| invalid_document_path(path))?;
    for element in parents {
        current = match (current, element) {
            (AttributeValue::M(map), PathElement::Attribute(key)) => map.get_mut(key),
            (AttributeValue::L(list), PathElement::Index(idx)) => list.get_mut(*idx),
            _ => None,
        }
        .ok_or_else(|| invalid_document_path(path))?;
    }

    match (current, last) {
        (AttributeValue::M(map), PathElement::Attribute(key)) => {
            map.insert(key.clone(), value);
        }
        (AttributeValue::L(list), PathElement::Index(idx)) => {
            if let Some(slot) = list.get_mut(*idx) {
                *slot = value;
            } else {
                list.push(value);
            }
        }
        _ => return Err(invalid_document_path(path)),
    }
    Ok(())
}

/// Remove the value at `path`; missing paths are ignored.
fn remove_path_value(item: &mut Item, path: &AttributePath) {
    let Some((PathElement::Attribute(head), rest)) = path.elements.split_first() else {
        return;
    };
    let Some((last, parents)) = rest.split_last() else {
        item.remove(head);
        return;
    };
    let Some(mut current) = item.get_mut(head) else {
        return;
    };
    for element in parents {
        let next = match (current, element) {
            (AttributeValue::M(map), PathElement::Attribute(key)) => map.get_mut(key),
            (AttributeValue::L(list), PathElement::Index(idx)) => list.get_mut(*idx),
            _ => None,
        };
        let Some(next) = next else {
            return;
        };
        current = next;
    }
    match (current, last) {
        (AttributeValue::M(map), PathElement::Attribute(key)) => {
            map.remove(key);
        }
        (AttributeValue::L(list), PathElement::Index(idx)) if *idx < list.len() => {
            list.remove(*idx);
        }
        _ => {}
    }
}

/// `ADD`: numeric increment or set union.
fn add_values(
    existing: Option<&AttributeValue>,
    value: AttributeValue,
) -> Result<AttributeValue, ExpressionError> {
    match (existing, value) {
        (None, v @ (AttributeValue::N(_) | AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_))) => Ok(v),
        (Some(e @ AttributeValue::N(_)), v @ AttributeValue::N(_)) => numeric_arithmetic(e, &v, true),
        (Some(AttributeValue::Ss(e)), AttributeValue::Ss(v)) => {
            let mut merged = e.clone();
            merged.extend(v.into_iter().filter(|s| !e.contains(s)));
            Ok(AttributeValue::Ss(merged))
        }
        (Some(AttributeValue::Ns(e)), AttributeValue::Ns(v)) => {
            let mut merged = e.clone();
            for n in v {
                if !number_set_contains(&merged, &n) {
                    merged.push(n);
                }
            }
            Ok(AttributeValue::Ns(merged))
        }
        (Some(AttributeValue::Bs(e)), AttributeValue::Bs(v)) => {
            let mut merged = e.clone();
            merged.extend(v.into_iter().filter(|b| !e.contains(b)));
            Ok(AttributeValue::Bs(merged))
        }
        (existing, v) => Err(ExpressionError::TypeMismatch {
            message: format!(
                "ADD cannot combine {} with {}",
                existing.map_or("nothing", AttributeValue::type_descriptor),
                v.type_descriptor()
            ),
        }),
    }
}

/// `DELETE`: set difference. `None` when the set becomes empty.
fn subtract_set(
    existing: &AttributeValue,
    value: &AttributeValue,
) -> Result<Option<AttributeValue>, ExpressionError> {
    let remaining = match (existing, value) {
        (AttributeValue::Ss(e), AttributeValue::Ss(v)) => {
            AttributeValue::Ss(e.iter().filter(|s| !v.contains(s)).cloned().collect())
        }
        (AttributeValue::Ns(e), AttributeValue::Ns(v)) => AttributeValue::Ns(
            e.iter()
                .filter(|n| !number_set_contains(v, n))
                .cloned()
                .collect(),
        ),
        (AttributeValue::Bs(e), AttributeValue::Bs(v)) => {
            AttributeValue::Bs(e.iter().filter(|b| !v.contains(b)).cloned().collect())
        }
        _ => {
            return Err(ExpressionError::TypeMismatch {
                message: format!(
                    "DELETE cannot remove {} from {}",
                    value.type_descriptor(),
                    existing.type_descriptor()
                ),
            });
        }
    };
    let empty = match &remaining {
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => v.is_empty(),
        AttributeValue::Bs(v) => v.is_empty(),
        _ => false,
    };
    Ok((!empty).then_some(remaining))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
