//! Runtime values of the template interpreter.
//!
//! Lists and maps are shared, mutable references so that `$list.add(x)` and
//! `#set($map.key = x)` are visible through every alias, as in Velocity.

use std::{cell::RefCell, cmp::Ordering, collections::BTreeMap, fmt::Write as _, rc::Rc};

use super::parser::TemplateError;

/// Shared list storage.
pub type ListRef = Rc<RefCell<Vec<Value>>>;
/// Shared map storage, keys sorted.
pub type MapRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// A template value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent or `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    String(String),
    /// List.
    List(ListRef),
    /// Map.
    Map(MapRef),
}

impl Value {
    /// A new list value.
    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    /// A new map value.
    #[must_use]
    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(Rc::new(RefCell::new(entries)))
    }

    /// Convert from JSON.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .unwrap_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::list(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. Self-containing collections hit `max_depth`.
    pub fn to_json(&self, max_depth: usize) -> Result<serde_json::Value, TemplateError> {
        self.to_json_at(0, max_depth)
    }

    fn to_json_at(&self, depth: usize, max_depth: usize) -> Result<serde_json::Value, TemplateError> {
        if depth > max_depth {
            return Err(depth_exceeded(max_depth));
        }
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_at(depth + 1, max_depth))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json_at(depth + 1, max_depth)?)))
                    .collect::<Result<_, TemplateError>>()?,
            ),
        })
    }

    /// Only `null` and `false` are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    /// Type name reported by `$util.typeOf`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) | Self::Float(_) => "Number",
            Self::String(_) => "String",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
        }
    }

    /// Numeric view of `Int` and `Float`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String contents, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Text form used for output: strings raw, collections `[a, b]` and
    /// `{k=v}`.
    pub fn render(&self, max_depth: usize) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.render_into(&mut out, 0, max_depth)?;
        Ok(out)
    }

    fn render_into(&self, out: &mut String, depth: usize, max_depth: usize) -> Result<(), TemplateError> {
        if depth > max_depth {
            return Err(depth_exceeded(max_depth));
        }
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&format_float(*f)),
            Self::String(s) => out.push_str(s),
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render_into(out, depth + 1, max_depth)?;
                }
                out.push(']');
            }
            Self::Map(map) => {
                out.push('{');
                for (i, (key, item)) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push('=');
                    item.render_into(out, depth + 1, max_depth)?;
                }
                out.push('}');
            }
        }
        Ok(())
    }

    /// Value equality; integers and floats compare numerically.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self.equals_at(other, 0)
    }

    #[allow(clippy::float_cmp)]
    fn equals_at(&self, other: &Self, depth: usize) -> bool {
        const MAX_EQUALITY_DEPTH: usize = 128;
        if depth > MAX_EQUALITY_DEPTH {
            return false;
        }
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals_at(y, depth + 1))
            }
            (Self::Map(a), Self::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equals_at(vb, depth + 1))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering for `<`, `>`, and friends: numbers numerically, strings
    /// lexicographically.
    pub fn compare(&self, other: &Self) -> Result<Ordering, TemplateError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Ok(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                    TemplateError::type_error("cannot compare NaN")
                }),
                _ => Err(TemplateError::type_error(format!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }
}

/// Java-style double formatting: whole numbers keep one decimal place.
#[allow(clippy::float_cmp)]
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn depth_exceeded(max: usize) -> TemplateError {
    TemplateError::LimitExceeded {
        limit: "depth",
        max,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_render_collections_java_style() {
        let value = Value::from_json(&json!({"b": [1, 2.0, "x"], "a": null}));
        assert_eq!(value.render(8).unwrap(), "{a=null, b=[1, 2.0, x]}");
    }

    #[test]
    fn test_should_compare_int_and_float_numerically() {
        assert!(Value::Int(2).equals(&Value::Float(2.0)));
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)).unwrap(), Ordering::Less);
        assert!(Value::String("a".into()).compare(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_should_fail_on_self_containing_list() {
        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(matches!(
            list.to_json(16),
            Err(TemplateError::LimitExceeded { limit: "depth", .. })
        ));
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_should_treat_only_null_and_false_as_falsy() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::String(String::new()).is_truthy());
    }
}
