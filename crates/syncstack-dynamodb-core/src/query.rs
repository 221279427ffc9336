//! Query and scan execution over a [`Collection`].
//!
//! Both operations walk entries in key order starting after the resume
//! position and stop once `limit` entries were examined or the page byte
//! budget is spent. Filters run on the examined entries afterwards, so a page
//! can hold fewer items than `limit` while still carrying a resume position.

use std::ops::Bound;

use syncstack_dynamodb_model::AttributeValue;

use crate::cursor::Position;
use crate::expression::ast::{AttributePath, CompareOp, Expr, FunctionName, LogicalOp, Operand, PathElement};
use crate::expression::evaluator::EvalContext;
use crate::expression::ExpressionError;
use crate::storage::{Collection, KeySchema, SlotKey, SortableAttributeValue, StorageError, StoredItem, segment_of};

// ---------------------------------------------------------------------------
// Key conditions
// ---------------------------------------------------------------------------

/// Conditions that can be applied to sort keys during query operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    /// Sort key equals the given value.
    Eq(SortableAttributeValue),
    /// Sort key is less than the given value.
    Lt(SortableAttributeValue),
    /// Sort key is less than or equal to the given value.
    Le(SortableAttributeValue),
    /// Sort key is greater than the given value.
    Gt(SortableAttributeValue),
    /// Sort key is greater than or equal to the given value.
    Ge(SortableAttributeValue),
    /// Sort key is between the two given values (inclusive).
    Between(SortableAttributeValue, SortableAttributeValue),
    /// Sort key begins with the given string or binary prefix.
    BeginsWith(SortableAttributeValue),
}

/// Parsed key condition of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    /// Partition key value.
    pub partition: SortableAttributeValue,
    /// Optional sort key constraint.
    pub sort: Option<SortKeyCondition>,
}

/// Errors turning a key condition expression into a [`KeyCondition`].
#[derive(Debug, thiserror::Error)]
pub enum KeyConditionError {
    /// The expression itself is broken.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// The expression is valid but not a supported key condition.
    #[error("query key condition not supported: {0}")]
    Unsupported(String),
    /// A key value has the wrong type.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl KeyCondition {
    /// Extracts the key condition from a parsed expression.
    ///
    /// The expression must be `pk = :v`, optionally `AND`-ed with a single
    /// sort key comparison, `BETWEEN`, or `begins_with`.
    ///
    /// # Errors
    ///
    /// Returns `KeyConditionError::Unsupported` for any other shape, and
    /// type errors when a value does not match the key schema.
    pub fn from_expr(expr: &Expr, schema: &KeySchema, ctx: &EvalContext<'_>) -> Result<Self, KeyConditionError> {
        let mut clauses = Vec::new();
        flatten_and(expr, &mut clauses)?;
        if clauses.len() > 2 {
            return Err(KeyConditionError::Unsupported(
                "at most one partition key and one sort key condition are allowed".to_owned(),
            ));
        }

        let mut partition = None;
        let mut sort = None;
        for clause in clauses {
            let (name, condition) = sort_condition(clause, ctx)?;
            if name == schema.partition_key.name {
                let SortKeyCondition::Eq(value) = condition else {
                    return Err(KeyConditionError::Unsupported(format!(
                        "the partition key {name} only supports equality"
                    )));
                };
                check_key_type(&schema.partition_key.attr_type, &name, &value)?;
                if partition.replace(value).is_some() {
                    return Err(KeyConditionError::Unsupported(format!("{name} is constrained twice")));
                }
            } else if schema.sort_key.as_ref().is_some_and(|sk| sk.name == name) {
                if let Some(sk) = &schema.sort_key {
                    for value in condition_values(&condition) {
                        check_key_type(&sk.attr_type, &name, value)?;
                    }
                }
                if let SortKeyCondition::Between(lo, hi) = &condition {
                    if lo > hi {
                        return Err(KeyConditionError::Unsupported(
                            "BETWEEN lower bound is greater than the upper bound".to_owned(),
                        ));
                    }
                }
                if sort.replace(condition).is_some() {
                    return Err(KeyConditionError::Unsupported(format!("{name} is constrained twice")));
                }
            } else {
                return Err(KeyConditionError::Unsupported(format!("{name} is not a key attribute")));
            }
        }

        let partition = partition.ok_or_else(|| {
            KeyConditionError::Unsupported(format!(
                "the partition key {} must be constrained with equality",
                schema.partition_key.name
            ))
        })?;
        Ok(Self { partition, sort })
    }
}

fn flatten_and<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) -> Result<(), KeyConditionError> {
    match expr {
        Expr::Logical {
            op: LogicalOp::And,
            left,
            right,
        } => {
            flatten_and(left, out)?;
            flatten_and(right, out)
        }
        Expr::Logical { op: LogicalOp::Or, .. } | Expr::Not(_) | Expr::In { .. } => Err(KeyConditionError::Unsupported(
            "only AND may combine key conditions".to_owned(),
        )),
        other => {
            out.push(other);
            Ok(())
        }
    }
}

/// Attribute name and condition of one key clause.
fn sort_condition(clause: &Expr, ctx: &EvalContext<'_>) -> Result<(String, SortKeyCondition), KeyConditionError> {
    match clause {
        Expr::Compare { left, op, right } => {
            let (path, value, op) = match (left.as_ref(), right.as_ref()) {
                (Operand::Path(p), v @ Operand::Value(_)) => (p, v, *op),
                (v @ Operand::Value(_), Operand::Path(p)) => (p, v, flip(*op)),
                _ => {
                    return Err(KeyConditionError::Unsupported(
                        "key conditions compare a key attribute with a value".to_owned(),
                    ));
                }
            };
            let name = key_name(path, ctx)?;
            let value = key_value(&name, value, ctx)?;
            let condition = match op {
                CompareOp::Eq => SortKeyCondition::Eq(value),
                CompareOp::Lt => SortKeyCondition::Lt(value),
                CompareOp::Le => SortKeyCondition::Le(value),
                CompareOp::Gt => SortKeyCondition::Gt(value),
                CompareOp::Ge => SortKeyCondition::Ge(value),
                CompareOp::Ne => {
                    return Err(KeyConditionError::Unsupported("<> is not a key condition".to_owned()));
                }
            };
            Ok((name, condition))
        }
        Expr::Between { value, low, high } => {
            let Operand::Path(path) = value.as_ref() else {
                return Err(KeyConditionError::Unsupported("BETWEEN needs a key attribute".to_owned()));
            };
            let name = key_name(path, ctx)?;
            let lo = key_value(&name, low, ctx)?;
            let hi = key_value(&name, high, ctx)?;
            Ok((name, SortKeyCondition::Between(lo, hi)))
        }
        Expr::Function {
            name: FunctionName::BeginsWith,
            args,
        } => {
            let (Some(Operand::Path(path)), Some(prefix)) = (args.first(), args.get(1)) else {
                return Err(KeyConditionError::Unsupported("begins_with needs a key attribute".to_owned()));
            };
            let name = key_name(path, ctx)?;
            let prefix = key_value(&name, prefix, ctx)?;
            if matches!(prefix, SortableAttributeValue::N(_)) {
                return Err(KeyConditionError::Unsupported("begins_with needs a string or binary prefix".to_owned()));
            }
            Ok((name, SortKeyCondition::BeginsWith(prefix)))
        }
        _ => Err(KeyConditionError::Unsupported(
            "key conditions support =, <, <=, >, >=, BETWEEN and begins_with".to_owned(),
        )),
    }
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        other => other,
    }
}

fn key_name(path: &AttributePath, ctx: &EvalContext<'_>) -> Result<String, KeyConditionError> {
    match ctx.resolve_names(path)?.elements.as_slice() {
        [PathElement::Attribute(name)] => Ok(name.clone()),
        _ => Err(KeyConditionError::Unsupported(format!("{path} is not a top-level key attribute"))),
    }
}

fn key_value(name: &str, operand: &Operand, ctx: &EvalContext<'_>) -> Result<SortableAttributeValue, KeyConditionError> {
    let value = ctx
        .resolve_operand(operand)?
        .ok_or_else(|| KeyConditionError::Unsupported(format!("no value given for {name}")))?;
    Ok(SortableAttributeValue::from_attribute_value(name, &value)?)
}

fn condition_values(condition: &SortKeyCondition) -> Vec<&SortableAttributeValue> {
    match condition {
        SortKeyCondition::Eq(v)
        | SortKeyCondition::Lt(v)
        | SortKeyCondition::Le(v)
        | SortKeyCondition::Gt(v)
        | SortKeyCondition::Ge(v)
        | SortKeyCondition::BeginsWith(v) => vec![v],
        SortKeyCondition::Between(lo, hi) => vec![lo, hi],
    }
}

fn check_key_type(
    expected: &syncstack_dynamodb_model::types::ScalarAttributeType,
    name: &str,
    value: &SortableAttributeValue,
) -> Result<(), KeyConditionError> {
    let matches = value.to_attribute_value().is_some_and(|v: AttributeValue| expected.matches(&v));
    if matches {
        Ok(())
    } else {
        Err(KeyConditionError::Storage(StorageError::InvalidKeyType {
            attr: name.to_owned(),
            expected: expected.as_str().to_owned(),
            actual: value
                .to_attribute_value()
                .map_or("NULL", |v| v.type_descriptor())
                .to_owned(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Page execution
// ---------------------------------------------------------------------------

/// Page bounds shared by query and scan.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    /// Maximum number of entries examined.
    pub limit: Option<usize>,
    /// Byte budget of examined entries.
    pub max_page_bytes: u64,
}

/// Examined entries of one page.
#[derive(Debug)]
pub struct Page<'a> {
    /// Entries in result order, before filtering.
    pub entries: Vec<&'a StoredItem>,
    /// Position to resume from when more entries may follow.
    pub last: Option<Position>,
}

/// Runs a key condition against one partition of a collection.
#[must_use]
pub fn query_collection<'a>(
    collection: &'a Collection,
    condition: &KeyCondition,
    forward: bool,
    resume: Option<&Position>,
    limits: PageLimits,
) -> Page<'a> {
    let Some(partition) = collection.partition(&condition.partition) else {
        return Page {
            entries: Vec::new(),
            last: None,
        };
    };
    // A resume position from another partition cannot belong to this query.
    let resume = resume.filter(|p| p.partition == condition.partition).map(|p| &p.slot);

    let (mut lower, mut upper) = sort_bounds(condition.sort.as_ref());
    if let Some(slot) = resume {
        if forward {
            lower = tighten_lower(lower, slot);
        } else {
            upper = tighten_upper(upper, slot);
        }
    }
    if is_empty_range(&lower, &upper) {
        return Page {
            entries: Vec::new(),
            last: None,
        };
    }

    let range = partition.range((lower, upper));
    let prefix = match &condition.sort {
        Some(SortKeyCondition::BeginsWith(prefix)) => Some(prefix),
        _ => None,
    };
    let matching = move |slot: &SlotKey| prefix.is_none_or(|p| slot.sort.begins_with(p));
    let iter: Box<dyn Iterator<Item = (&'a SlotKey, &'a StoredItem)> + '_> = if forward {
        Box::new(range.take_while(move |(slot, _)| matching(*slot)))
    } else {
        Box::new(
            range
                .rev()
                .skip_while(move |(slot, _)| !matching(*slot))
                .take_while(move |(slot, _)| matching(*slot)),
        )
    };
    let partition_key = condition.partition.clone();
    collect_page(iter.map(move |(slot, stored)| (partition_key.clone(), slot, stored)), limits)
}

/// Walks a whole collection in key order, optionally restricted to one
/// parallel scan segment.
#[must_use]
pub fn scan_collection<'a>(
    collection: &'a Collection,
    segment: Option<(u32, u32)>,
    resume: Option<&Position>,
    limits: PageLimits,
) -> Page<'a> {
    let after = resume.map(|p| (p.partition.clone(), p.slot.clone()));
    let iter = collection
        .iter_after(after)
        .filter(move |(pk, _, _)| segment.is_none_or(|(seg, total)| segment_of(pk, total) == seg))
        .map(|(pk, slot, stored)| (pk.clone(), slot, stored));
    collect_page(iter, limits)
}

fn collect_page<'a>(
    iter: impl Iterator<Item = (SortableAttributeValue, &'a SlotKey, &'a StoredItem)>,
    limits: PageLimits,
) -> Page<'a> {
    let limit = limits.limit.unwrap_or(usize::MAX);
    let mut iter = iter.peekable();
    let mut entries = Vec::new();
    let mut bytes = 0u64;
    let mut last = None;

    while let Some((partition, slot, stored)) = iter.next() {
        entries.push(stored);
        bytes += stored.size;
        let full = entries.len() >= limit || bytes >= limits.max_page_bytes;
        if full {
            if iter.peek().is_some() {
                last = Some(Position {
                    partition,
                    slot: slot.clone(),
                });
            }
            break;
        }
    }
    Page { entries, last }
}

fn sort_bounds(condition: Option<&SortKeyCondition>) -> (Bound<SlotKey>, Bound<SlotKey>) {
    let first = |v: &SortableAttributeValue| SlotKey { sort: v.clone(), seq: 0 };
    let last = |v: &SortableAttributeValue| SlotKey {
        sort: v.clone(),
        seq: u64::MAX,
    };
    match condition {
        None => (Bound::Unbounded, Bound::Unbounded),
        Some(SortKeyCondition::Eq(v)) => (Bound::Included(first(v)), Bound::Included(last(v))),
        Some(SortKeyCondition::Lt(v)) => (Bound::Unbounded, Bound::Excluded(first(v))),
        Some(SortKeyCondition::Le(v)) => (Bound::Unbounded, Bound::Included(last(v))),
        Some(SortKeyCondition::Gt(v)) => (Bound::Excluded(last(v)), Bound::Unbounded),
        Some(SortKeyCondition::Ge(v)) => (Bound::Included(first(v)), Bound::Unbounded),
        Some(SortKeyCondition::Between(lo, hi)) => (Bound::Included(first(lo)), Bound::Included(last(hi))),
        Some(SortKeyCondition::BeginsWith(p)) => (Bound::Included(first(p)), Bound::Unbounded),
    }
}

fn tighten_lower(lower: Bound<SlotKey>, resume: &SlotKey) -> Bound<SlotKey> {
    match &lower {
        Bound::Included(l) | Bound::Excluded(l) if l > resume => lower,
        _ => Bound::Excluded(resume.clone()),
    }
}

fn tighten_upper(upper: Bound<SlotKey>, resume: &SlotKey) -> Bound<SlotKey> {
    match &upper {
        Bound::Included(u) | Bound::Excluded(u) if u < resume => upper,
        _ => Bound::Excluded(resume.clone()),
    }
}

/// `BTreeMap::range` panics on inverted bounds.
fn is_empty_range(lower: &Bound<SlotKey>, upper: &Bound<SlotKey>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
