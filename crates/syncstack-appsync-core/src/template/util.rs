//! The `$util` helper library.
//!
//! Helpers are addressed by namespace and name: `$util.toJson(x)` is
//! `([], "toJson")`, `$util.dynamodb.toDynamoDBJson(x)` is
//! `(["dynamodb"], "toDynamoDBJson")`.

use std::collections::BTreeMap;

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use syncstack_appsync_model::AppSyncError;
use syncstack_dynamodb_model::AttributeValue;

use super::{
    eval::{Evaluator, arg, compile_regex, string_arg},
    parser::TemplateError,
    value::Value,
};

/// Characters `java.net.URLEncoder` leaves alone, besides alphanumerics.
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'*').remove(b'_');

impl Evaluator<'_> {
    pub(super) fn call_util(&mut self, namespace: &[&str], name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
        match namespace {
            [] => self.core_util(name, &args),
            ["time"] => time_util(name, &args),
            ["dynamodb"] => self.dynamodb_util(name, &args),
            ["map"] => map_util(name, &args),
            ["list"] => list_util(name, &args),
            ["str"] => str_util(name, &args),
            ["math"] => math_util(name, &args),
            _ => Err(unknown_util(namespace, name)),
        }
    }

    fn core_util(&mut self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let max_depth = self.limits.max_depth;
        match name {
            "qr" | "quiet" => Ok(Value::Null),
            "toJson" => {
                let json = arg(args, 0, name)?.to_json(max_depth)?;
                Ok(Value::String(json.to_string()))
            }
            "parseJson" => {
                let text = string_arg(args, 0, name)?;
                serde_json::from_str(text)
                    .map(|json| Value::from_json(&json))
                    .map_err(|e| TemplateError::type_error(format!("parseJson: {e}")))
            }
            "autoId" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            "error" => Err(self.custom_error(name, args)?.into()),
            "appendError" => {
                let error = self.custom_error(name, args)?;
                self.appended.push(error.into());
                Ok(Value::Null)
            }
            "validate" => {
                if arg(args, 0, name)?.is_truthy() {
                    Ok(Value::Null)
                } else {
                    Err(self.custom_error(name, &args[1..])?.into())
                }
            }
            "unauthorized" => Err(TemplateError::Unauthorized),
            "isNull" => Ok(Value::Bool(matches!(arg(args, 0, name)?, Value::Null))),
            "isNullOrEmpty" => Ok(Value::Bool(is_null_or_empty(arg(args, 0, name)?))),
            "isNullOrBlank" => Ok(Value::Bool(is_null_or_blank(arg(args, 0, name)?))),
            "defaultIfNull" => default_if(args, name, |v| matches!(v, Value::Null)),
            "defaultIfNullOrEmpty" => default_if(args, name, is_null_or_empty),
            "defaultIfNullOrBlank" => default_if(args, name, is_null_or_blank),
            "isString" => Ok(Value::Bool(matches!(arg(args, 0, name)?, Value::String(_)))),
            "isNumber" => Ok(Value::Bool(matches!(arg(args, 0, name)?, Value::Int(_) | Value::Float(_)))),
            "isBoolean" => Ok(Value::Bool(matches!(arg(args, 0, name)?, Value::Bool(_)))),
            "isList" => Ok(Value::Bool(matches!(arg(args, 0, name)?, Value::List(_)))),
            "isMap" => Ok(Value::Bool(matches!(arg(args, 0, name)?, Value::Map(_)))),
            "typeOf" => Ok(Value::String(arg(args, 0, name)?.type_name().to_owned())),
            "matches" => {
                let pattern = compile_regex(&format!("^(?:{})$", string_arg(args, 0, name)?))?;
                Ok(Value::Bool(pattern.is_match(string_arg(args, 1, name)?)))
            }
            "escapeJavaScript" => Ok(Value::String(escape_javascript(string_arg(args, 0, name)?))),
            "urlEncode" => Ok(Value::String(
                utf8_percent_encode(string_arg(args, 0, name)?, URL_ENCODE_SET)
                    .to_string()
                    .replace("%20", "+"),
            )),
            "urlDecode" => {
                let text = string_arg(args, 0, name)?.replace('+', " ");
                percent_decode_str(&text)
                    .decode_utf8()
                    .map(|s| Value::String(s.into_owned()))
                    .map_err(|e| TemplateError::type_error(format!("urlDecode: {e}")))
            }
            "base64Encode" => Ok(Value::String(
                base64::engine::general_purpose::STANDARD.encode(string_arg(args, 0, name)?),
            )),
            "base64Decode" => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(string_arg(args, 0, name)?)
                    .map_err(|e| TemplateError::type_error(format!("base64Decode: {e}")))?;
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|e| TemplateError::type_error(format!("base64Decode: {e}")))
            }
            _ => Err(unknown_util(&[], name)),
        }
    }

    /// `(message, errorType?, data?, errorInfo?)` as a custom error.
    fn custom_error(&self, name: &str, args: &[Value]) -> Result<CustomError, TemplateError> {
        let max_depth = self.limits.max_depth;
        let message = match arg(args, 0, name)? {
            Value::String(s) => s.clone(),
            other => other.render(max_depth)?,
        };
        let error_type = match args.get(1) {
            None | Some(Value::Null) => None,
            Some(other) => Some(other.render(max_depth)?),
        };
        let optional_json = |index: usize| -> Result<Option<serde_json::Value>, TemplateError> {
            match args.get(index) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => value.to_json(max_depth).map(Some),
            }
        };
        Ok(CustomError {
            message,
            error_type,
            data: optional_json(2)?,
            error_info: optional_json(3)?,
        })
    }

    fn dynamodb_util(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let max_depth = self.limits.max_depth;
        let (base, as_json) = match name.strip_suffix("Json") {
            Some(base) => (base, true),
            None => (name, false),
        };
        let input = args.first().unwrap_or(&Value::Null);
        let attribute = match base {
            "toDynamoDB" => AttributeValue::from_json(&input.to_json(max_depth)?),
            "toString" => AttributeValue::S(string_arg(args, 0, name)?.to_owned()),
            "toNumber" => match input {
                Value::Int(_) | Value::Float(_) => AttributeValue::N(input.render(max_depth)?),
                other => {
                    return Err(TemplateError::type_error(format!(
                        "{name}() expects a number, got {}",
                        other.type_name()
                    )));
                }
            },
            "toBoolean" => match input {
                Value::Bool(b) => AttributeValue::Bool(*b),
                other => {
                    return Err(TemplateError::type_error(format!(
                        "{name}() expects a boolean, got {}",
                        other.type_name()
                    )));
                }
            },
            "toNull" => AttributeValue::Null(true),
            "toList" | "toMap" => AttributeValue::from_json(&input.to_json(max_depth)?),
            "toStringSet" => AttributeValue::Ss(string_items(input, name)?),
            "toNumberSet" => AttributeValue::Ns(
                list_items(input, name)?
                    .iter()
                    .map(|item| match item {
                        Value::Int(_) | Value::Float(_) => item.render(max_depth),
                        other => Err(TemplateError::type_error(format!(
                            "{name}() expects numbers, got {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            "toMapValues" => {
                let Value::Map(map) = input else {
                    return Err(TemplateError::type_error(format!("{name}() expects a map")));
                };
                let converted = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), AttributeValue::from_json(&v.to_json(max_depth)?))))
                    .collect::<Result<_, TemplateError>>()?;
                AttributeValue::M(converted)
            }
            _ => return Err(unknown_util(&["dynamodb"], name)),
        };

        // toMapValues yields the bare map of attribute values, not an `M`.
        let wire = match (base, attribute) {
            ("toMapValues", AttributeValue::M(map)) => serde_json::to_value(&map),
            (_, attribute) => serde_json::to_value(&attribute),
        }
        .map_err(|e| TemplateError::type_error(format!("{name}: {e}")))?;

        Ok(if as_json {
            Value::String(wire.to_string())
        } else {
            Value::from_json(&wire)
        })
    }
}

/// Arguments of `$util.error` and friends.
struct CustomError {
    message: String,
    error_type: Option<String>,
    data: Option<serde_json::Value>,
    error_info: Option<serde_json::Value>,
}

impl From<CustomError> for TemplateError {
    fn from(e: CustomError) -> Self {
        Self::Custom {
            message: e.message,
            error_type: e.error_type,
            data: e.data,
            error_info: e.error_info,
        }
    }
}

impl From<CustomError> for AppSyncError {
    fn from(e: CustomError) -> Self {
        Self::custom(e.message, e.error_type, e.data, e.error_info)
    }
}

fn is_null_or_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.borrow().is_empty(),
        Value::Map(map) => map.borrow().is_empty(),
        _ => false,
    }
}

fn is_null_or_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn default_if(args: &[Value], name: &str, test: impl Fn(&Value) -> bool) -> Result<Value, TemplateError> {
    let value = arg(args, 0, name)?;
    let fallback = arg(args, 1, name)?;
    Ok(if test(value) { fallback.clone() } else { value.clone() })
}

fn escape_javascript(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '/' => out.push_str("\\/"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn list_items(value: &Value, name: &str) -> Result<Vec<Value>, TemplateError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        other => Err(TemplateError::type_error(format!(
            "{name}() expects a list, got {}",
            other.type_name()
        ))),
    }
}

fn string_items(value: &Value, name: &str) -> Result<Vec<String>, TemplateError> {
    list_items(value, name)?
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(TemplateError::type_error(format!(
                "{name}() expects strings, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn unknown_util(namespace: &[&str], name: &str) -> TemplateError {
    let mut path = String::from("$util");
    for part in namespace {
        path.push('.');
        path.push_str(part);
    }
    TemplateError::Unresolvable {
        reference: format!("{path}.{name}()"),
    }
}

// ---------------------------------------------------------------------------
// $util.time
// ---------------------------------------------------------------------------

fn time_util(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let now = Utc::now();
    match name {
        "nowISO8601" => Ok(Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))),
        "nowEpochSeconds" => Ok(Value::Int(now.timestamp())),
        "nowEpochMilliSeconds" => Ok(Value::Int(now.timestamp_millis())),
        "nowFormatted" => {
            let format = java_to_chrono_format(string_arg(args, 0, name)?);
            Ok(Value::String(now.format(&format).to_string()))
        }
        "epochMilliSecondsToISO8601" => {
            let Value::Int(millis) = arg(args, 0, name)? else {
                return Err(TemplateError::type_error(format!("{name}() expects an integer")));
            };
            DateTime::<Utc>::from_timestamp_millis(*millis)
                .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .ok_or_else(|| TemplateError::type_error(format!("{name}(): timestamp out of range")))
        }
        "parseISO8601ToEpochMilliSeconds" => DateTime::parse_from_rfc3339(string_arg(args, 0, name)?)
            .map(|t| Value::Int(t.timestamp_millis()))
            .map_err(|e| TemplateError::type_error(format!("{name}(): {e}"))),
        _ => Err(unknown_util(&["time"], name)),
    }
}

/// Translate a `java.time` pattern such as `yyyy-MM-dd HH:mm:ss` into a
/// `chrono` format string. Quoted runs are literal.
fn java_to_chrono_format(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let pattern = match (c, run) {
            ('y', 2) => Some("%y"),
            ('y', _) => Some("%Y"),
            ('M', 1 | 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d', _) => Some("%d"),
            ('H', _) => Some("%H"),
            ('h', _) => Some("%I"),
            ('m', _) => Some("%M"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            ('a', _) => Some("%p"),
            ('E', 1..=3) => Some("%a"),
            ('E', _) => Some("%A"),
            ('Z', _) => Some("%z"),
            ('X', _) => Some("%:z"),
            _ => None,
        };
        match pattern {
            Some(pattern) => out.push_str(pattern),
            None => (0..run).for_each(|_| push_literal(&mut out, c)),
        }
        i += run;
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

// ---------------------------------------------------------------------------
// $util.map, $util.list, $util.str, $util.math
// ---------------------------------------------------------------------------

fn map_util(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let Value::Map(map) = arg(args, 0, name)? else {
        return Err(TemplateError::type_error(format!("{name}() expects a map")));
    };
    let keys = string_items(arg(args, 1, name)?, name)?;
    let retain = match name {
        "copyAndRetainAllKeys" => true,
        "copyAndRemoveAllKeys" => false,
        _ => return Err(unknown_util(&["map"], name)),
    };
    let copy: BTreeMap<String, Value> = map
        .borrow()
        .iter()
        .filter(|(k, _)| keys.contains(*k) == retain)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(Value::map(copy))
}

fn list_util(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let items = list_items(arg(args, 0, name)?, name)?;
    let other = list_items(arg(args, 1, name)?, name)?;
    let retain = match name {
        "copyAndRetainAll" => true,
        "copyAndRemoveAll" => false,
        _ => return Err(unknown_util(&["list"], name)),
    };
    Ok(Value::list(
        items
            .into_iter()
            .filter(|item| other.iter().any(|o| o.equals(item)) == retain)
            .collect(),
    ))
}

fn str_util(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let s = string_arg(args, 0, name)?;
    match name {
        "toUpper" => Ok(Value::String(s.to_uppercase())),
        "toLower" => Ok(Value::String(s.to_lowercase())),
        "toReplace" => Ok(Value::String(
            s.replace(string_arg(args, 1, name)?, string_arg(args, 2, name)?),
        )),
        _ => Err(unknown_util(&["str"], name)),
    }
}

fn math_util(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let number = |index: usize| {
        arg(args, index, name)?
            .as_f64()
            .ok_or_else(|| TemplateError::type_error(format!("{name}() expects numbers")))
    };
    match name {
        #[allow(clippy::cast_possible_truncation)]
        "roundNum" => Ok(Value::Int(number(0)?.round() as i64)),
        "minVal" => Ok(Value::Float(number(0)?.min(number(1)?))),
        "maxVal" => Ok(Value::Float(number(0)?.max(number(1)?))),
        "abs" => match arg(args, 0, name)? {
            Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
            _ => Ok(Value::Float(number(0)?.abs())),
        },
        _ => Err(unknown_util(&["math"], name)),
    }
}
