//! Tree-walking evaluator.
//!
//! Every node, expression and method call costs one step. Steps, rendered
//! bytes, value depth and `#foreach` iterations are capped; hitting a cap
//! aborts the render with `TemplateError::LimitExceeded`.

use std::collections::{BTreeMap, HashMap};

use syncstack_appsync_model::AppSyncError;

use super::{
    TemplateLimits,
    ast::{Accessor, BinaryOp, Expr, Node, Reference},
    parser::TemplateError,
    value::Value,
};

/// Control flow out of a block.
pub(super) enum Flow {
    Normal,
    Break,
    Return(Value),
}

/// Interpreter state for one render.
pub(super) struct Evaluator<'l> {
    pub(super) vars: HashMap<String, Value>,
    pub(super) output: String,
    pub(super) appended: Vec<AppSyncError>,
    steps: usize,
    depth: usize,
    pub(super) limits: &'l TemplateLimits,
}

impl<'l> Evaluator<'l> {
    pub(super) fn new(limits: &'l TemplateLimits) -> Self {
        Self {
            vars: HashMap::new(),
            output: String::new(),
            appended: Vec::new(),
            steps: 0,
            depth: 0,
            limits,
        }
    }

    // -- Budget --

    fn tick(&mut self) -> Result<(), TemplateError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(TemplateError::LimitExceeded {
                limit: "step",
                max: self.limits.max_steps,
            });
        }
        Ok(())
    }

    fn enter(&mut self) -> Result<(), TemplateError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(TemplateError::LimitExceeded {
                limit: "depth",
                max: self.limits.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn write(&mut self, text: &str) -> Result<(), TemplateError> {
        if self.output.len() + text.len() > self.limits.max_output_bytes {
            return Err(TemplateError::LimitExceeded {
                limit: "output",
                max: self.limits.max_output_bytes,
            });
        }
        self.output.push_str(text);
        Ok(())
    }

    // -- Nodes --

    pub(super) fn exec_block(&mut self, nodes: &[Node]) -> Result<Flow, TemplateError> {
        self.enter()?;
        let flow = self.exec_nodes(nodes);
        self.leave();
        flow
    }

    fn exec_nodes(&mut self, nodes: &[Node]) -> Result<Flow, TemplateError> {
        for node in nodes {
            self.tick()?;
            match node {
                Node::Text(text) => self.write(text)?,
                Node::Reference(reference) => self.render_reference(reference)?,
                Node::Set { target, value } => {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = None;
                    for (condition, body) in branches {
                        if self.eval(condition)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    let flow = self.exec_block(taken.unwrap_or(otherwise))?;
                    if !matches!(flow, Flow::Normal) {
                        return Ok(flow);
                    }
                }
                Node::Foreach {
                    var,
                    iterable,
                    body,
                } => {
                    if let Flow::Return(value) = self.exec_foreach(var, iterable, body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Node::Break => return Ok(Flow::Break),
                Node::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Null,
                    };
                    return Ok(Flow::Return(value));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn render_reference(&mut self, reference: &Reference) -> Result<(), TemplateError> {
        match self.resolve(reference)? {
            Value::Null => {
                if !reference.quiet && !reference.ends_with_method() {
                    self.write(&reference.source)?;
                }
                Ok(())
            }
            value => {
                let text = value.render(self.limits.max_depth)?;
                self.write(&text)
            }
        }
    }

    fn exec_foreach(&mut self, var: &str, iterable: &Expr, body: &[Node]) -> Result<Flow, TemplateError> {
        let items: Vec<Value> = match self.eval(iterable)? {
            Value::List(items) => items.borrow().clone(),
            Value::Map(map) => map.borrow().values().cloned().collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(TemplateError::type_error(format!(
                    "cannot iterate over {}",
                    other.type_name()
                )));
            }
        };

        let saved_var = self.vars.remove(var);
        let saved_foreach = self.vars.remove("foreach");
        let saved_count = self.vars.remove("velocityCount");

        let count = items.len();
        let mut result = Ok(Flow::Normal);
        for (index, item) in items.into_iter().enumerate() {
            if index >= self.limits.max_foreach_iterations {
                result = Err(TemplateError::LimitExceeded {
                    limit: "foreach iteration",
                    max: self.limits.max_foreach_iterations,
                });
                break;
            }
            self.vars.insert(var.to_owned(), item);
            self.vars.insert("foreach".to_owned(), foreach_state(index, count));
            self.vars
                .insert("velocityCount".to_owned(), Value::Int(to_i64(index + 1)));
            match self.exec_block(body) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Break) => break,
                other => {
                    result = other;
                    break;
                }
            }
        }

        restore(&mut self.vars, var, saved_var);
        restore(&mut self.vars, "foreach", saved_foreach);
        restore(&mut self.vars, "velocityCount", saved_count);
        result
    }

    fn assign(&mut self, target: &Reference, value: Value) -> Result<(), TemplateError> {
        let Some((last, path)) = target.accessors.split_last() else {
            self.vars.insert(target.root.clone(), value);
            return Ok(());
        };
        let container = self.resolve_chain(target, path)?;
        match (last, container) {
            (Accessor::Property(name), Value::Map(map)) => {
                map.borrow_mut().insert(name.clone(), value);
                Ok(())
            }
            (Accessor::Index(index), container) => match (container, self.eval(index)?) {
                (Value::Map(map), Value::String(key)) => {
                    map.borrow_mut().insert(key, value);
                    Ok(())
                }
                (Value::List(items), Value::Int(i)) => {
                    let mut items = items.borrow_mut();
                    let slot = usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get_mut(i))
                        .ok_or_else(|| TemplateError::type_error(format!("list index {i} is out of range")))?;
                    *slot = value;
                    Ok(())
                }
                (container, index) => Err(TemplateError::type_error(format!(
                    "cannot index {} with {}",
                    container.type_name(),
                    index.type_name()
                ))),
            },
            (_, container) => Err(TemplateError::type_error(format!(
                "cannot assign into {} in {}",
                container.type_name(),
                target.source
            ))),
        }
    }

    // -- References --

    pub(super) fn resolve(&mut self, reference: &Reference) -> Result<Value, TemplateError> {
        self.resolve_chain(reference, &reference.accessors)
    }

    fn resolve_chain(&mut self, reference: &Reference, accessors: &[Accessor]) -> Result<Value, TemplateError> {
        self.tick()?;
        let (mut current, rest) = if reference.root == "util" || reference.root == "utils" {
            self.resolve_util(reference, accessors)?
        } else {
            let root = self.vars.get(&reference.root).cloned().ok_or_else(|| {
                TemplateError::Unresolvable {
                    reference: reference.source.clone(),
                }
            })?;
            (root, accessors)
        };

        for accessor in rest {
            current = match accessor {
                Accessor::Property(name) => property(&current, name, reference)?,
                Accessor::Index(index) => {
                    let index = self.eval(index)?;
                    index_value(&current, &index)?
                }
                Accessor::Method { name, args } => {
                    let args = self.eval_args(args)?;
                    self.tick()?;
                    call_method(&current, name, args)?
                }
            };
        }
        Ok(current)
    }

    /// `$util.ns.fn(args)`: property names up to the first method select the
    /// helper; accessors after it apply to the helper's result.
    fn resolve_util<'a>(
        &mut self,
        reference: &Reference,
        accessors: &'a [Accessor],
    ) -> Result<(Value, &'a [Accessor]), TemplateError> {
        let mut namespace = Vec::new();
        for (i, accessor) in accessors.iter().enumerate() {
            match accessor {
                Accessor::Property(name) => namespace.push(name.as_str()),
                Accessor::Method { name, args } => {
                    let args = self.eval_args(args)?;
                    self.tick()?;
                    let value = self.call_util(&namespace, name, args)?;
                    return Ok((value, &accessors[i + 1..]));
                }
                Accessor::Index(_) => break,
            }
        }
        Err(TemplateError::Unresolvable {
            reference: reference.source.clone(),
        })
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    // -- Expressions --

    pub(super) fn eval(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        self.tick()?;
        self.enter()?;
        let value = self.eval_inner(expr);
        self.leave();
        value
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        Ok(match expr {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::String(s.clone()),
            Expr::Interpolated(nodes) => {
                let outer = std::mem::take(&mut self.output);
                let flow = self.exec_nodes(nodes);
                let text = std::mem::replace(&mut self.output, outer);
                flow?;
                Value::String(text)
            }
            Expr::List(items) => Value::list(self.eval_args(items)?),
            Expr::Range(from, to) => {
                let from = self.eval(from)?;
                let to = self.eval(to)?;
                self.range(&from, &to)?
            }
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::String(s) => s,
                        other => other.render(self.limits.max_depth)?,
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Value::map(map)
            }
            Expr::Ref(reference) => self.resolve(reference)?,
            Expr::Not(inner) => Value::Bool(!self.eval(inner)?.is_truthy()),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(i) => Value::Int(
                    i.checked_neg()
                        .ok_or_else(|| TemplateError::type_error("integer overflow"))?,
                ),
                Value::Float(f) => Value::Float(-f),
                other => {
                    return Err(TemplateError::type_error(format!(
                        "cannot negate {}",
                        other.type_name()
                    )));
                }
            },
            Expr::Binary { op, left, right } => self.binary(*op, left, right)?,
        })
    }

    fn range(&self, from: &Value, to: &Value) -> Result<Value, TemplateError> {
        let (Value::Int(from), Value::Int(to)) = (from, to) else {
            return Err(TemplateError::type_error("range bounds must be integers"));
        };
        let len = from.abs_diff(*to).saturating_add(1);
        if len > self.limits.max_foreach_iterations as u64 {
            return Err(TemplateError::LimitExceeded {
                limit: "foreach iteration",
                max: self.limits.max_foreach_iterations,
            });
        }
        let items = if from <= to {
            (*from..=*to).map(Value::Int).collect()
        } else {
            (*to..=*from).rev().map(Value::Int).collect()
        };
        Ok(Value::list(items))
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, TemplateError> {
        match op {
            BinaryOp::Or => {
                let truthy = self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy();
                return Ok(Value::Bool(truthy));
            }
            BinaryOp::And => {
                let truthy = self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy();
                return Ok(Value::Bool(truthy));
            }
            _ => {}
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;
        let max_depth = self.limits.max_depth;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(left.equals(&right))),
            BinaryOp::Ne => Ok(Value::Bool(!left.equals(&right))),
            BinaryOp::Lt => Ok(Value::Bool(left.compare(&right)?.is_lt())),
            BinaryOp::Le => Ok(Value::Bool(left.compare(&right)?.is_le())),
            BinaryOp::Gt => Ok(Value::Bool(left.compare(&right)?.is_gt())),
            BinaryOp::Ge => Ok(Value::Bool(left.compare(&right)?.is_ge())),
            BinaryOp::Add if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
                let mut text = left.render(max_depth)?;
                text.push_str(&right.render(max_depth)?);
                Ok(Value::String(text))
            }
            _ => arithmetic(op, &left, &right),
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, TemplateError> {
    let overflow = || TemplateError::type_error("integer overflow");
    let by_zero = || TemplateError::type_error("division by zero");

    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
            BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
            BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
            BinaryOp::Div if b == 0 => return Err(by_zero()),
            BinaryOp::Div => a.checked_div(b).ok_or_else(overflow)?,
            BinaryOp::Mod if b == 0 => return Err(by_zero()),
            BinaryOp::Mod => a.checked_rem(b).ok_or_else(overflow)?,
            _ => return Err(TemplateError::type_error("unsupported operator")),
        };
        return Ok(Value::Int(result));
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(TemplateError::type_error(format!(
            "cannot apply arithmetic to {} and {}",
            left.type_name(),
            right.type_name()
        )));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(by_zero()),
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(TemplateError::type_error("unsupported operator")),
    };
    Ok(Value::Float(result))
}

fn property(value: &Value, name: &str, reference: &Reference) -> Result<Value, TemplateError> {
    match value {
        Value::Map(map) => Ok(map.borrow().get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(TemplateError::Unresolvable {
            reference: format!("{} (property '{name}' of {})", reference.source, other.type_name()),
        }),
    }
}

fn index_value(value: &Value, index: &Value) -> Result<Value, TemplateError> {
    match (value, index) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::List(items), Value::Int(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.borrow().get(i).cloned())
            .unwrap_or(Value::Null)),
        (Value::Map(map), Value::String(key)) => Ok(map.borrow().get(key).cloned().unwrap_or(Value::Null)),
        (value, index) => Err(TemplateError::type_error(format!(
            "cannot index {} with {}",
            value.type_name(),
            index.type_name()
        ))),
    }
}

fn foreach_state(index: usize, count: usize) -> Value {
    let mut state = BTreeMap::new();
    state.insert("index".to_owned(), Value::Int(to_i64(index)));
    state.insert("count".to_owned(), Value::Int(to_i64(index + 1)));
    state.insert("hasNext".to_owned(), Value::Bool(index + 1 < count));
    state.insert("first".to_owned(), Value::Bool(index == 0));
    state.insert("last".to_owned(), Value::Bool(index + 1 == count));
    Value::map(state)
}

fn restore(vars: &mut HashMap<String, Value>, name: &str, saved: Option<Value>) {
    match saved {
        Some(value) => {
            vars.insert(name.to_owned(), value);
        }
        None => {
            vars.remove(name);
        }
    }
}

pub(super) fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Methods on values
// ---------------------------------------------------------------------------

fn call_method(target: &Value, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match (target, name) {
        (Value::Null, _) => Ok(Value::Null),
        (_, "toString") => Ok(Value::String(target.render(MAX_METHOD_RENDER_DEPTH)?)),
        (_, "equals") => Ok(Value::Bool(target.equals(arg(&args, 0, name)?))),
        (Value::Map(map), _) => map_method(map, name, args),
        (Value::List(items), _) => list_method(items, name, args),
        (Value::String(s), _) => string_method(s, name, &args),
        (other, _) => Err(unknown_method(other, name)),
    }
}

const MAX_METHOD_RENDER_DEPTH: usize = 64;

fn map_method(map: &super::value::MapRef, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "put" => {
            let key = string_arg(&args, 0, name)?.to_owned();
            let value = arg(&args, 1, name)?.clone();
            Ok(map.borrow_mut().insert(key, value).unwrap_or(Value::Null))
        }
        "putAll" => {
            let Value::Map(other) = arg(&args, 0, name)? else {
                return Err(TemplateError::type_error("putAll expects a map"));
            };
            let entries: Vec<(String, Value)> =
                other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            map.borrow_mut().extend(entries);
            Ok(Value::Null)
        }
        "get" => Ok(map
            .borrow()
            .get(string_arg(&args, 0, name)?)
            .cloned()
            .unwrap_or(Value::Null)),
        "containsKey" => Ok(Value::Bool(map.borrow().contains_key(string_arg(&args, 0, name)?))),
        "remove" => Ok(map
            .borrow_mut()
            .remove(string_arg(&args, 0, name)?)
            .unwrap_or(Value::Null)),
        "keySet" => Ok(Value::list(
            map.borrow().keys().cloned().map(Value::String).collect(),
        )),
        "values" => Ok(Value::list(map.borrow().values().cloned().collect())),
        "entrySet" => Ok(Value::list(
            map.borrow()
                .iter()
                .map(|(k, v)| {
                    let mut entry = BTreeMap::new();
                    entry.insert("key".to_owned(), Value::String(k.clone()));
                    entry.insert("value".to_owned(), v.clone());
                    Value::map(entry)
                })
                .collect(),
        )),
        "size" => Ok(Value::Int(to_i64(map.borrow().len()))),
        "isEmpty" => Ok(Value::Bool(map.borrow().is_empty())),
        _ => Err(unknown_method(&Value::Map(map.clone()), name)),
    }
}

fn list_method(items: &super::value::ListRef, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "add" => {
            let value = arg(&args, 0, name)?.clone();
            items.borrow_mut().push(value);
            Ok(Value::Bool(true))
        }
        "addAll" => {
            let Value::List(other) = arg(&args, 0, name)? else {
                return Err(TemplateError::type_error("addAll expects a list"));
            };
            let extra: Vec<Value> = other.borrow().clone();
            items.borrow_mut().extend(extra);
            Ok(Value::Bool(true))
        }
        "get" => {
            let index = index_arg(&args, 0, name)?;
            items
                .borrow()
                .get(index)
                .cloned()
                .ok_or_else(|| TemplateError::type_error(format!("list index {index} is out of range")))
        }
        "set" => {
            let index = index_arg(&args, 0, name)?;
            let value = arg(&args, 1, name)?.clone();
            let mut items = items.borrow_mut();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| TemplateError::type_error(format!("list index {index} is out of range")))?;
            Ok(std::mem::replace(slot, value))
        }
        "contains" => {
            let needle = arg(&args, 0, name)?;
            Ok(Value::Bool(items.borrow().iter().any(|v| v.equals(needle))))
        }
        "remove" => {
            let index = index_arg(&args, 0, name)?;
            let mut items = items.borrow_mut();
            if index >= items.len() {
                return Err(TemplateError::type_error(format!("list index {index} is out of range")));
            }
            Ok(items.remove(index))
        }
        "size" => Ok(Value::Int(to_i64(items.borrow().len()))),
        "isEmpty" => Ok(Value::Bool(items.borrow().is_empty())),
        _ => Err(unknown_method(&Value::List(items.clone()), name)),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let text = |t: String| Ok(Value::String(t));
    match name {
        "length" => Ok(Value::Int(to_i64(s.chars().count()))),
        "isEmpty" => Ok(Value::Bool(s.is_empty())),
        "toUpperCase" => text(s.to_uppercase()),
        "toLowerCase" => text(s.to_lowercase()),
        "trim" => text(s.trim().to_owned()),
        "contains" => Ok(Value::Bool(s.contains(string_arg(args, 0, name)?))),
        "startsWith" => Ok(Value::Bool(s.starts_with(string_arg(args, 0, name)?))),
        "endsWith" => Ok(Value::Bool(s.ends_with(string_arg(args, 0, name)?))),
        "replace" => text(s.replace(string_arg(args, 0, name)?, string_arg(args, 1, name)?)),
        "replaceAll" => {
            let pattern = compile_regex(string_arg(args, 0, name)?)?;
            text(pattern.replace_all(s, string_arg(args, 1, name)?).into_owned())
        }
        "matches" => {
            let pattern = compile_regex(&format!("^(?:{})$", string_arg(args, 0, name)?))?;
            Ok(Value::Bool(pattern.is_match(s)))
        }
        "split" => {
            let pattern = compile_regex(string_arg(args, 0, name)?)?;
            let mut parts: Vec<Value> = pattern
                .split(s)
                .map(|part| Value::String(part.to_owned()))
                .collect();
            while matches!(parts.last(), Some(Value::String(last)) if last.is_empty()) {
                parts.pop();
            }
            Ok(Value::list(parts))
        }
        "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let start = index_arg(args, 0, name)?;
            let end = match args.get(1) {
                Some(_) => index_arg(args, 1, name)?,
                None => chars.len(),
            };
            if start > end || end > chars.len() {
                return Err(TemplateError::type_error(format!(
                    "substring({start}, {end}) is out of range for length {}",
                    chars.len()
                )));
            }
            text(chars[start..end].iter().collect())
        }
        "indexOf" => {
            let needle = string_arg(args, 0, name)?;
            Ok(Value::Int(
                s.find(needle)
                    .map_or(-1, |byte| to_i64(s[..byte].chars().count())),
            ))
        }
        _ => Err(unknown_method(&Value::String(s.to_owned()), name)),
    }
}

pub(super) fn compile_regex(pattern: &str) -> Result<regex::Regex, TemplateError> {
    regex::Regex::new(pattern)
        .map_err(|e| TemplateError::type_error(format!("invalid regular expression: {e}")))
}

fn unknown_method(target: &Value, name: &str) -> TemplateError {
    TemplateError::Unresolvable {
        reference: format!("method {name}() on {}", target.type_name()),
    }
}

pub(super) fn arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a Value, TemplateError> {
    args.get(index).ok_or_else(|| {
        TemplateError::type_error(format!("{method}() expects at least {} argument(s)", index + 1))
    })
}

pub(super) fn string_arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a str, TemplateError> {
    arg(args, index, method)?.as_str().ok_or_else(|| {
        TemplateError::type_error(format!("{method}() expects a string argument"))
    })
}

fn index_arg(args: &[Value], index: usize, method: &str) -> Result<usize, TemplateError> {
    match arg(args, index, method)? {
        Value::Int(i) => usize::try_from(*i)
            .map_err(|_| TemplateError::type_error(format!("{method}() index {i} is negative"))),
        other => Err(TemplateError::type_error(format!(
            "{method}() expects an integer, got {}",
            other.type_name()
        ))),
    }
}
