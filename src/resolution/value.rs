//! Runtime values inside the resolution sandbox

use std::sync::Arc;

use serde_json::json;

use crate::governance::{Checker, CheckerTable};
use crate::wagers::PickTable;

/// Host capabilities reachable from resolution logic. This enum is the
/// whole surface: anything not listed here does not exist in the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `crypto.*` hashing and signer recovery
    Crypto,
    /// `Object.keys/values/entries`
    ObjectNs,
    /// `JSON.stringify` and `JSON.parse`
    Json,
    /// `Math.*` helpers
    Math,
    /// `Error`, `TypeError`, `RangeError`
    ErrorCtor(&'static str),
    /// `Number(x)`, `String(x)`, `Boolean(x)`
    Convert(&'static str),
}

/// A checker as seen by resolution logic
#[derive(Clone)]
pub struct CheckerRef {
    pub name: String,
    pub checker: Arc<dyn Checker>,
}

/// Deferred checker verification, completed by `await` or by the runner
#[derive(Clone)]
pub struct Pending {
    pub checker: CheckerRef,
    pub digest: Option<String>,
    pub signature: Option<String>,
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
    /// Insertion-ordered properties
    Object(Vec<(String, Value)>),
    Checker(CheckerRef),
    Builtin(Builtin),
    /// Method looked up on a receiver, not yet called
    Method(Box<Value>, String),
    Pending(Box<Pending>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Object property lookup (`None` when absent or not an object)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Method(..) | Value::Builtin(Builtin::ErrorCtor(_)) | Value::Builtin(Builtin::Convert(_)) => {
                "function"
            }
            _ => "object",
        }
    }

    /// Script `String(x)` conversion
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => match (self.get("name"), self.get("message")) {
                (Some(Value::Str(name)), Some(message)) => {
                    format!("{}: {}", name, message.to_display())
                }
                _ => "[object Object]".into(),
            },
            Value::Checker(c) => format!("[checker {}]", c.name),
            Value::Builtin(b) => format!("[builtin {:?}]", b),
            Value::Method(_, name) => format!("function {}() {{ [native code] }}", name),
            Value::Pending(_) => "[object Promise]".into(),
        }
    }

    /// Script `Number(x)` conversion
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else if let Some(hex) = trimmed.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(f64::NAN)
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) if items.is_empty() => 0.0,
            Value::Array(items) if items.len() == 1 => items[0].to_number(),
            _ => f64::NAN,
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Checker(a), Value::Checker(b)) => Arc::ptr_eq(&a.checker, &b.checker),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// Snapshot as JSON; capabilities and pending calls render as `{}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Number(n) if n.is_finite() => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    json!(*n as i64)
                } else {
                    json!(n)
                }
            }
            Value::Number(_) => serde_json::Value::Null,
            Value::Str(s) => json!(s),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    if !matches!(v, Value::Undefined) {
                        map.insert(k.clone(), v.to_json());
                    }
                }
                serde_json::Value::Object(map)
            }
            _ => json!({}),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }

    /// Deep copy of the pick table, keeping label order
    pub fn from_picks(picks: &PickTable) -> Self {
        let fields = picks
            .iter()
            .map(|(label, wagers)| {
                let wagers = wagers
                    .iter()
                    .map(|w| {
                        Value::Object(vec![
                            ("pick".into(), Value::str(&w.pick)),
                            ("player".into(), Value::str(&w.player)),
                            ("tokenAddress".into(), Value::str(&w.token_address)),
                            ("amount".into(), Value::Number(w.amount as f64)),
                        ])
                    })
                    .collect();
                (label.to_string(), Value::Array(wagers))
            })
            .collect();
        Value::Object(fields)
    }

    pub fn from_checkers(checkers: &CheckerTable) -> Self {
        Value::Object(
            checkers
                .iter()
                .map(|(name, checker)| {
                    let handle = CheckerRef { name: name.clone(), checker: Arc::clone(checker) };
                    (name.clone(), Value::Checker(handle))
                })
                .collect(),
        )
    }

    /// Error object as produced by `new Error(message)`
    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Value::Object(vec![
            ("name".into(), Value::str(name)),
            ("message".into(), Value::Str(message.into())),
        ])
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Method(ra, na), Value::Method(rb, nb)) => ra == rb && na == nb,
            (Value::Pending(a), Value::Pending(b)) => {
                Arc::ptr_eq(&a.checker.checker, &b.checker.checker)
                    && a.digest == b.digest
                    && a.signature == b.signature
            }
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Checker(c) => write!(f, "Checker({}, {})", c.name, c.checker.kind()),
            Value::Builtin(b) => write!(f, "Builtin({:?})", b),
            Value::Method(recv, name) => write!(f, "Method({:?}.{})", recv, name),
            Value::Pending(p) => write!(f, "Pending({}.verify)", p.checker.name),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_display())
    }
}

/// Script number formatting: integers without a fraction, `NaN`, `Infinity`
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == 0.0 {
        "0".into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}
