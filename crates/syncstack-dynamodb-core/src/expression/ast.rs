//! Syntax tree for condition, filter, key-condition, update and projection
//! expressions.
//!
//! Placeholders are kept verbatim: name references as `#name` path elements and
//! value references as `:value` operands. [`Placeholders`] walks a tree and
//! records every reference so a request can be checked for unresolved or
//! unused entries before anything is evaluated.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use syncstack_dynamodb_model::AttributeValue;

use super::parser::ExpressionError;

/// Condition expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// `left op right`.
    Compare {
        /// Left-hand operand.
        left: Box<Operand>,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand operand.
        right: Box<Operand>,
    },
    /// `value BETWEEN low AND high`, inclusive on both ends.
    Between {
        /// Value to test.
        value: Box<Operand>,
        /// Lower bound.
        low: Box<Operand>,
        /// Upper bound.
        high: Box<Operand>,
    },
    /// `value IN (a, b, ...)`.
    In {
        /// Value to search for.
        value: Box<Operand>,
        /// Candidates.
        list: Vec<Operand>,
    },
    /// `left AND right` / `left OR right`.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Evaluated first.
        left: Box<Expr>,
        /// Evaluated only when `left` does not decide the result.
        right: Box<Expr>,
    },
    /// `NOT expr`.
    Not(Box<Expr>),
    /// Boolean function call.
    Function {
        /// Function name.
        name: FunctionName,
        /// Arguments in call order.
        args: Vec<Operand>,
    },
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// Logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `AND`
    And,
    /// `OR`
    Or,
}

/// Boolean functions usable as conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    /// `attribute_exists(path)`
    AttributeExists,
    /// `attribute_not_exists(path)`
    AttributeNotExists,
    /// `attribute_type(path, :type)`
    AttributeType,
    /// `begins_with(path, :prefix)`
    BeginsWith,
    /// `contains(path, operand)`
    Contains,
}

impl FunctionName {
    /// Number of arguments the function takes.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::AttributeExists | Self::AttributeNotExists => 1,
            Self::AttributeType | Self::BeginsWith | Self::Contains => 2,
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AttributeExists => "attribute_exists",
            Self::AttributeNotExists => "attribute_not_exists",
            Self::AttributeType => "attribute_type",
            Self::BeginsWith => "begins_with",
            Self::Contains => "contains",
        })
    }
}

/// A value producer inside an expression.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Document path such as `info.rating`, `#n` or `tags[0]`.
    Path(AttributePath),
    /// Value placeholder, stored with its leading `:`.
    Value(String),
    /// `size(path)`.
    Size(AttributePath),
}

/// A document path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttributePath {
    /// Path elements in order; never empty.
    pub elements: Vec<PathElement>,
}

impl AttributePath {
    /// Single-element path.
    #[must_use]
    pub fn top_level(name: impl Into<String>) -> Self {
        Self {
            elements: vec![PathElement::Attribute(name.into())],
        }
    }

    /// Returns `true` if `self` equals `other` or one is a prefix of the other.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.elements
            .iter()
            .zip(&other.elements)
            .all(|(a, b)| a == b)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, elem) in self.elements.iter().enumerate() {
            match elem {
                PathElement::Attribute(name) if i == 0 => write!(f, "{name}")?,
                PathElement::Attribute(name) => write!(f, ".{name}")?,
                PathElement::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// One step of a document path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathElement {
    /// Map key, or a `#name` placeholder before resolution.
    Attribute(String),
    /// List index.
    Index(usize),
}

/// Update expression: all four clause kinds.
#[derive(Debug, Clone, Default)]
pub struct UpdateExpr {
    /// `SET` actions.
    pub set_actions: Vec<SetAction>,
    /// `REMOVE` targets.
    pub remove_paths: Vec<AttributePath>,
    /// `ADD` actions.
    pub add_actions: Vec<AddAction>,
    /// `DELETE` actions.
    pub delete_actions: Vec<DeleteAction>,
}

impl UpdateExpr {
    /// Returns `true` if no clause carries an action.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set_actions.is_empty()
            && self.remove_paths.is_empty()
            && self.add_actions.is_empty()
            && self.delete_actions.is_empty()
    }

    /// Every target path in clause order (`SET`, `REMOVE`, `ADD`, `DELETE`).
    pub fn target_paths(&self) -> impl Iterator<Item = &AttributePath> {
        self.set_actions
            .iter()
            .map(|a| &a.path)
            .chain(&self.remove_paths)
            .chain(self.add_actions.iter().map(|a| &a.path))
            .chain(self.delete_actions.iter().map(|a| &a.path))
    }
}

/// `path = value`.
#[derive(Debug, Clone)]
pub struct SetAction {
    /// Target.
    pub path: AttributePath,
    /// Right-hand side.
    pub value: SetValue,
}

/// Right-hand side of a `SET` action.
#[derive(Debug, Clone)]
pub enum SetValue {
    /// Plain operand.
    Operand(Operand),
    /// `a + b` on numbers.
    Plus(Box<SetValue>, Box<SetValue>),
    /// `a - b` on numbers.
    Minus(Box<SetValue>, Box<SetValue>),
    /// `if_not_exists(path, fallback)`.
    IfNotExists(AttributePath, Operand),
    /// `list_append(a, b)`.
    ListAppend(Box<SetValue>, Box<SetValue>),
}

/// `path value` in an `ADD` clause.
#[derive(Debug, Clone)]
pub struct AddAction {
    /// Target.
    pub path: AttributePath,
    /// Number or set to add.
    pub value: Operand,
}

/// `path value` in a `DELETE` clause.
#[derive(Debug, Clone)]
pub struct DeleteAction {
    /// Target set.
    pub path: AttributePath,
    /// Members to remove.
    pub value: Operand,
}

// ---------------------------------------------------------------------------
// Placeholder collection
// ---------------------------------------------------------------------------

/// Name and value placeholders referenced by one or more parsed expressions.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    /// `#name` references, with the `#`.
    pub names: BTreeSet<String>,
    /// `:value` references, with the `:`.
    pub values: BTreeSet<String>,
}

impl Placeholders {
    /// Record every reference in a condition expression.
    pub fn add_condition(&mut self, expr: &Expr) {
        match expr {
            Expr::Compare { left, right, .. } => {
                self.add_operand(left);
                self.add_operand(right);
            }
            Expr::Between { value, low, high } => {
                self.add_operand(value);
                self.add_operand(low);
                self.add_operand(high);
            }
            Expr::In { value, list } => {
                self.add_operand(value);
                list.iter().for_each(|op| self.add_operand(op));
            }
            Expr::Logical { left, right, .. } => {
                self.add_condition(left);
                self.add_condition(right);
            }
            Expr::Not(inner) => self.add_condition(inner),
            Expr::Function { args, .. } => args.iter().for_each(|op| self.add_operand(op)),
        }
    }

    /// Record every reference in an update expression.
    pub fn add_update(&mut self, update: &UpdateExpr) {
        for action in &update.set_actions {
            self.add_path(&action.path);
            self.add_set_value(&action.value);
        }
        for path in &update.remove_paths {
            self.add_path(path);
        }
        for action in &update.add_actions {
            self.add_path(&action.path);
            self.add_operand(&action.value);
        }
        for action in &update.delete_actions {
            self.add_path(&action.path);
            self.add_operand(&action.value);
        }
    }

    /// Record every reference in a projection.
    pub fn add_projection(&mut self, paths: &[AttributePath]) {
        paths.iter().for_each(|p| self.add_path(p));
    }

    /// Check the references against the maps supplied with the request.
    ///
    /// Every referenced placeholder must be supplied and every supplied
    /// placeholder must be referenced.
    #[allow(clippy::implicit_hasher)]
    pub fn verify(
        &self,
        names: &HashMap<String, String>,
        values: &HashMap<String, AttributeValue>,
    ) -> Result<(), ExpressionError> {
        if let Some(name) = self.names.iter().find(|n| !names.contains_key(*n)) {
            return Err(ExpressionError::UnresolvedName { name: name.clone() });
        }
        if let Some(name) = self.values.iter().find(|v| !values.contains_key(*v)) {
            return Err(ExpressionError::UnresolvedValue { name: name.clone() });
        }
        let mut unused_names: Vec<&String> = names.keys().filter(|n| !self.names.contains(*n)).collect();
        unused_names.sort();
        if let Some(name) = unused_names.first() {
            return Err(ExpressionError::UnusedName {
                name: (*name).clone(),
            });
        }
        let mut unused_values: Vec<&String> =
            values.keys().filter(|v| !self.values.contains(*v)).collect();
        unused_values.sort();
        if let Some(name) = unused_values.first() {
            return Err(ExpressionError::UnusedValue {
                name: (*name).clone(),
            });
        }
        Ok(())
    }

    fn add_operand(&mut self, operand: &Operand) {
        match operand {
            Operand::Path(path) | Operand::Size(path) => self.add_path(path),
            Operand::Value(name) => {
                self.values.insert(name.clone());
            }
        }
    }

    fn add_path(&mut self, path: &AttributePath) {
        for element in &path.elements {
            if let PathElement::Attribute(name) = element {
                if name.starts_with('#') {
                    self.names.insert(name.clone());
                }
            }
        }
    }

    fn add_set_value(&mut self, value: &SetValue) {
        match value {
            SetValue::Operand(op) => self.add_operand(op),
            SetValue::Plus(a, b) | SetValue::Minus(a, b) | SetValue::ListAppend(a, b) => {
                self.add_set_value(a);
                self.add_set_value(b);
            }
            SetValue::IfNotExists(path, op) => {
                self.add_path(path);
                self.add_operand(op);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> AttributePath {
        AttributePath {
            elements: parts
                .iter()
                .map(|p| PathElement::Attribute((*p).to_owned()))
                .collect(),
        }
    }

    #[test]
    fn test_should_treat_prefix_paths_as_overlapping() {
        assert!(path(&["a"]).overlaps(&path(&["a", "b"])));
        assert!(path(&["a", "b"]).overlaps(&path(&["a"])));
        assert!(path(&["a", "b"]).overlaps(&path(&["a", "b"])));
        assert!(!path(&["a", "b"]).overlaps(&path(&["a", "c"])));
        assert!(!path(&["ab"]).overlaps(&path(&["a"])));
    }

    #[test]
    fn test_should_report_unused_and_unresolved_placeholders() {
        let mut usage = Placeholders::default();
        usage.names.insert("#a".to_owned());
        usage.values.insert(":v".to_owned());

        let names = HashMap::from([("#a".to_owned(), "a".to_owned())]);
        let values = HashMap::from([(":v".to_owned(), AttributeValue::N("1".to_owned()))]);
        assert!(usage.verify(&names, &values).is_ok());

        let err = usage.verify(&HashMap::new(), &values).unwrap_err();
        assert!(matches!(err, ExpressionError::UnresolvedName { name } if name == "#a"));

        let mut extra = values.clone();
        extra.insert(":w".to_owned(), AttributeValue::Bool(true));
        let err = usage.verify(&names, &extra).unwrap_err();
        assert!(matches!(err, ExpressionError::UnusedValue { name } if name == ":w"));
    }

    #[test]
    fn test_should_render_path_with_indexes() {
        let p = AttributePath {
            elements: vec![
                PathElement::Attribute("items".to_owned()),
                PathElement::Index(2),
                PathElement::Attribute("name".to_owned()),
            ],
        };
        assert_eq!(p.to_string(), "items[2].name");
    }
}
