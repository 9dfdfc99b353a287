//! Sandboxed evaluator for compiled resolution logic
//!
//! Tree-walking and asynchronous: evaluation only suspends when the logic
//! awaits a checker. The global scope holds the fixed `Builtin` surface and
//! nothing else, so logic can see its arguments and those capabilities but
//! no filesystem, network, clock or process state.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::ast::*;
use super::value::{Builtin, CheckerRef, Pending, Value};
use crate::crypto;
use crate::governance::CheckerError;

// ============================================================================
// CONTROL FLOW
// ============================================================================

/// Abrupt completion escaping the logic
#[derive(Debug, Clone)]
pub enum Fault {
    /// Value passed to `throw` (or a runtime TypeError/ReferenceError)
    Throw(Value),
    /// A checker refused its inputs
    Checker(CheckerError),
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type Eval<'a, T> = Pin<Box<dyn Future<Output = Result<T, Fault>> + Send + 'a>>;

fn throw(kind: &str, message: impl Into<String>) -> Fault {
    Fault::Throw(Value::error(kind, message))
}

fn type_error(message: impl Into<String>) -> Fault {
    throw("TypeError", message)
}

// ============================================================================
// LIMITS
// ============================================================================

/// Statements between cooperative yields to the scheduler
const YIELD_EVERY: u64 = 64;

/// Resource ceilings for one run. Exceeding any of them throws a
/// `RangeError` inside the logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Statements plus loop iterations
    pub max_steps: u64,
    /// Characters in any single string the logic builds
    pub max_string_len: usize,
    /// Total size of any array or object the logic builds
    pub max_value_size: usize,
    /// Nesting depth of any array or object the logic builds
    pub max_value_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_string_len: 1 << 20,
            max_value_size: 1 << 20,
            max_value_depth: 128,
        }
    }
}

fn range_error(message: impl Into<String>) -> Fault {
    throw("RangeError", message)
}

/// (size, depth) of a value; strings weigh their byte length
fn measure(value: &Value) -> (usize, usize) {
    match value {
        Value::Str(s) => (1 + s.len(), 1),
        Value::Array(items) => measure_children(items.iter()),
        Value::Object(fields) => {
            let keys: usize = fields.iter().map(|(k, _)| k.len()).sum();
            let (size, depth) = measure_children(fields.iter().map(|(_, v)| v));
            (size.saturating_add(keys), depth)
        }
        Value::Method(receiver, _) => measure(receiver),
        _ => (1, 1),
    }
}

fn measure_children<'a>(items: impl Iterator<Item = &'a Value>) -> (usize, usize) {
    let (size, depth) = items.fold((1usize, 0usize), |(size, depth), item| {
        let (s, d) = measure(item);
        (size.saturating_add(s), depth.max(d))
    });
    (size, depth + 1)
}

fn check_string(value: Value, limits: &Limits) -> Result<Value, Fault> {
    match &value {
        Value::Str(s) if s.len() > limits.max_string_len => Err(range_error(format!(
            "string length {} exceeds the {} limit",
            s.len(),
            limits.max_string_len
        ))),
        _ => Ok(value),
    }
}

fn check_container(value: Value, limits: &Limits) -> Result<Value, Fault> {
    let (size, depth) = measure(&value);
    if depth > limits.max_value_depth {
        return Err(range_error(format!("value nested deeper than {}", limits.max_value_depth)));
    }
    if size > limits.max_value_size {
        return Err(range_error(format!("value size {} exceeds the {} limit", size, limits.max_value_size)));
    }
    Ok(value)
}

// ============================================================================
// SCOPES
// ============================================================================

struct Binding {
    value: Value,
    mutable: bool,
}

/// One invocation's worth of interpreter state. Built fresh per run.
pub struct Machine {
    scopes: Vec<HashMap<String, Binding>>,
    limits: Limits,
    steps: u64,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let mut globals = HashMap::new();
        let builtins = [
            ("crypto", Value::Builtin(Builtin::Crypto)),
            ("Object", Value::Builtin(Builtin::ObjectNs)),
            ("JSON", Value::Builtin(Builtin::Json)),
            ("Math", Value::Builtin(Builtin::Math)),
            ("Error", Value::Builtin(Builtin::ErrorCtor("Error"))),
            ("TypeError", Value::Builtin(Builtin::ErrorCtor("TypeError"))),
            ("RangeError", Value::Builtin(Builtin::ErrorCtor("RangeError"))),
            ("Number", Value::Builtin(Builtin::Convert("Number"))),
            ("String", Value::Builtin(Builtin::Convert("String"))),
            ("Boolean", Value::Builtin(Builtin::Convert("Boolean"))),
            ("NaN", Value::Number(f64::NAN)),
            ("Infinity", Value::Number(f64::INFINITY)),
        ];
        for (name, value) in builtins {
            globals.insert(name.to_string(), Binding { value, mutable: false });
        }
        Self { scopes: vec![globals], limits, steps: 0 }
    }

    /// Charge one step, yielding to the scheduler every few so a
    /// surrounding `tokio::time::timeout` can fire
    async fn tick(&mut self) -> Result<(), Fault> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(range_error(format!(
                "resolution logic exceeded {} steps",
                self.limits.max_steps
            )));
        }
        if self.steps % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn declare(&mut self, kind: DeclKind, name: &str, value: Value) -> Result<(), Fault> {
        // `var` lives in the function scope, just above the globals
        let index = match kind {
            DeclKind::Var => 1.min(self.scopes.len() - 1),
            _ => self.scopes.len() - 1,
        };
        let scope = &mut self.scopes[index];
        if kind != DeclKind::Var && scope.contains_key(name) {
            return Err(throw(
                "SyntaxError",
                format!("Identifier '{}' has already been declared", name),
            ));
        }
        scope.insert(name.to_string(), Binding { value, mutable: kind != DeclKind::Const });
        Ok(())
    }

    fn bind(&mut self, kind: DeclKind, target: &Pattern, value: Value) -> Result<(), Fault> {
        match target {
            Pattern::Name(name) => self.declare(kind, name, value),
            Pattern::Array(names) => {
                let items = match value {
                    Value::Array(items) => items,
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => return Err(type_error(format!("{} is not iterable", other.to_display()))),
                };
                for (i, name) in names.iter().enumerate() {
                    if let Some(name) = name {
                        let item = items.get(i).cloned().unwrap_or(Value::Undefined);
                        self.declare(kind, name, item)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), Fault> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.get_mut(name) {
                if !binding.mutable {
                    return Err(type_error("Assignment to constant variable."));
                }
                binding.value = value;
                return Ok(());
            }
        }
        Err(throw("ReferenceError", format!("{} is not defined", name)))
    }

    // ========================================================================
    // INVOCATION
    // ========================================================================

    /// Invoke the compiled callable with positional arguments
    pub async fn call(&mut self, function: &Function, args: Vec<Value>) -> Result<Value, Fault> {
        self.scopes.push(HashMap::new());

        let mut args = args.into_iter();
        for param in &function.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.declare(DeclKind::Let, param, value)?;
        }
        if let Some(rest) = &function.rest {
            self.declare(DeclKind::Let, rest, Value::Array(args.collect()))?;
        }

        let result = match &function.body {
            Body::Expr(expr) => self.eval(expr).await?,
            Body::Block(stmts) => match self.exec_stmts(stmts).await? {
                Flow::Return(value) => value,
                _ => Value::Undefined,
            },
        };

        self.scopes.pop();
        Ok(result)
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn exec_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> Eval<'a, Flow> {
        Box::pin(async move {
            self.scopes.push(HashMap::new());
            let flow = self.exec_stmts(stmts).await;
            self.scopes.pop();
            flow
        })
    }

    fn exec_stmts<'a>(&'a mut self, stmts: &'a [Stmt]) -> Eval<'a, Flow> {
        Box::pin(async move {
            for stmt in stmts {
                match self.exec(stmt).await? {
                    Flow::Normal => {}
                    abrupt => return Ok(abrupt),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec<'a>(&'a mut self, stmt: &'a Stmt) -> Eval<'a, Flow> {
        Box::pin(async move {
            self.tick().await?;
            match stmt {
                Stmt::Decl { kind, target, init } => {
                    let value = match init {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::Undefined,
                    };
                    self.bind(*kind, target, value)?;
                }
                Stmt::Assign { name, op, value } => {
                    let rhs = self.eval(value).await?;
                    let new_value = match op {
                        AssignOp::Set => rhs,
                        AssignOp::Add | AssignOp::Sub => {
                            let current = self
                                .lookup(name)
                                .map(|b| b.value.clone())
                                .ok_or_else(|| throw("ReferenceError", format!("{} is not defined", name)))?;
                            let op = if *op == AssignOp::Add { BinaryOp::Add } else { BinaryOp::Sub };
                            binary(op, &current, &rhs, &self.limits)?
                        }
                    };
                    self.assign(name, new_value)?;
                }
                Stmt::If { cond, then, otherwise } => {
                    if self.eval(cond).await?.truthy() {
                        return self.exec_block(then).await;
                    } else if let Some(otherwise) = otherwise {
                        return self.exec_block(otherwise).await;
                    }
                }
                Stmt::ForOf { kind, target, iterable, body } => {
                    let items = match self.eval(iterable).await? {
                        Value::Array(items) => items,
                        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                        other => return Err(type_error(format!("{} is not iterable", other.to_display()))),
                    };
                    for item in items {
                        self.tick().await?;
                        self.scopes.push(HashMap::new());
                        let bound = self.bind(*kind, target, item);
                        let flow = match bound {
                            Ok(()) => self.exec_stmts(body).await,
                            Err(e) => Err(e),
                        };
                        self.scopes.pop();
                        match flow? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            Flow::Return(value) => return Ok(Flow::Return(value)),
                        }
                    }
                }
                Stmt::Block(stmts) => return self.exec_block(stmts).await,
                Stmt::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::Undefined,
                    };
                    return Ok(Flow::Return(value));
                }
                Stmt::Throw(expr) => {
                    let value = self.eval(expr).await?;
                    return Err(Fault::Throw(value));
                }
                Stmt::Break => return Ok(Flow::Break),
                Stmt::Continue => return Ok(Flow::Continue),
                Stmt::Expr(expr) => {
                    self.eval(expr).await?;
                }
            }
            Ok(Flow::Normal)
        })
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> Eval<'a, Value> {
        Box::pin(async move {
            match expr {
                Expr::Literal(lit) => Ok(match lit {
                    Literal::Undefined => Value::Undefined,
                    Literal::Null => Value::Null,
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Number(n) => Value::Number(*n),
                    Literal::Str(s) => Value::Str(s.clone()),
                }),
                Expr::Ident(name) => self
                    .lookup(name)
                    .map(|b| b.value.clone())
                    .ok_or_else(|| throw("ReferenceError", format!("{} is not defined", name))),
                Expr::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    check_container(Value::Array(out), &self.limits)
                }
                Expr::Object(fields) => {
                    let mut out: Vec<(String, Value)> = Vec::with_capacity(fields.len());
                    for (key, expr) in fields {
                        let value = self.eval(expr).await?;
                        match out.iter_mut().find(|(k, _)| k == key) {
                            Some(slot) => slot.1 = value,
                            None => out.push((key.clone(), value)),
                        }
                    }
                    check_container(Value::Object(out), &self.limits)
                }
                Expr::Member { object, property } => {
                    let object = self.eval(object).await?;
                    get_property(object, property)
                }
                Expr::Index { object, index } => {
                    let object = self.eval(object).await?;
                    let index = self.eval(index).await?;
                    if let (Value::Array(items), Value::Number(n)) = (&object, &index) {
                        let element = if n.fract() == 0.0 && *n >= 0.0 {
                            items.get(*n as usize).cloned()
                        } else {
                            None
                        };
                        return Ok(element.unwrap_or(Value::Undefined));
                    }
                    get_property(object, &index.to_display())
                }
                Expr::Call { callee, args } => {
                    let callee = self.eval(callee).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg).await?);
                    }
                    check_string(call_value(callee, values)?, &self.limits)
                }
                Expr::New { constructor, args } => {
                    let ctor = self
                        .lookup(constructor)
                        .map(|b| b.value.clone())
                        .ok_or_else(|| throw("ReferenceError", format!("{} is not defined", constructor)))?;
                    if !matches!(ctor, Value::Builtin(Builtin::ErrorCtor(_))) {
                        return Err(type_error(format!("{} is not a constructor", constructor)));
                    }
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg).await?);
                    }
                    call_value(ctor, values)
                }
                Expr::Await(inner) => {
                    let value = self.eval(inner).await?;
                    settle(value).await
                }
                Expr::Unary { op, operand } => {
                    if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, operand.as_ref()) {
                        if self.lookup(name).is_none() {
                            return Ok(Value::str("undefined"));
                        }
                    }
                    let value = self.eval(operand).await?;
                    Ok(match op {
                        UnaryOp::Not => Value::Bool(!value.truthy()),
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                        UnaryOp::TypeOf => Value::str(value.type_of()),
                    })
                }
                Expr::Binary { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    binary(*op, &left, &right, &self.limits)
                }
                Expr::Logical { op, left, right } => {
                    let left = self.eval(left).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left.truthy(),
                        LogicalOp::Or => left.truthy(),
                        LogicalOp::Nullish => !left.is_nullish(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(right).await
                    }
                }
                Expr::Conditional { cond, then, otherwise } => {
                    if self.eval(cond).await?.truthy() {
                        self.eval(then).await
                    } else {
                        self.eval(otherwise).await
                    }
                }
            }
        })
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ASYNC COMPLETION
// ============================================================================

/// Complete a pending checker call; any other value settles to itself
pub async fn settle(value: Value) -> Result<Value, Fault> {
    match value {
        Value::Pending(pending) => {
            let Pending { checker, digest, signature } = *pending;
            debug!(checker = %checker.name, kind = checker.checker.kind(), "awaiting checker verification");
            checker
                .checker
                .verify(digest.as_deref(), signature.as_deref())
                .await
                .map(Value::Bool)
                .map_err(Fault::Checker)
        }
        other => Ok(other),
    }
}

// ============================================================================
// OPERATORS
// ============================================================================

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_) => value.clone(),
        other => Value::Str(other.to_display()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value, limits: &Limits) -> Result<Value, Fault> {
    Ok(match op {
        BinaryOp::Add => {
            let (l, r) = (to_primitive(left), to_primitive(right));
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                let (l, r) = (l.to_display(), r.to_display());
                if l.len() + r.len() > limits.max_string_len {
                    return Err(range_error(format!(
                        "string length {} exceeds the {} limit",
                        l.len() + r.len(),
                        limits.max_string_len
                    )));
                }
                Value::Str(l + &r)
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (to_primitive(left), to_primitive(right)) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(&b)),
                (a, b) => a.to_number().partial_cmp(&b.to_number()),
            };
            Value::Bool(match ordering {
                None => false,
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                },
            })
        }
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
        BinaryOp::LooseEq => Value::Bool(left.loose_equals(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_equals(right)),
    })
}

// ============================================================================
// PROPERTIES & METHODS
// ============================================================================

const ARRAY_METHODS: &[&str] = &["includes", "indexOf", "join", "at", "slice"];
const STRING_METHODS: &[&str] = &[
    "toLowerCase", "toUpperCase", "trim", "startsWith", "endsWith", "includes", "split", "slice",
    "indexOf",
];

fn method(receiver: Value, name: &str) -> Value {
    Value::Method(Box::new(receiver), name.to_string())
}

fn get_property(object: Value, name: &str) -> Result<Value, Fault> {
    let exposes = |names: &[&str]| names.contains(&name);
    Ok(match object {
        Value::Undefined | Value::Null => {
            return Err(type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                object.to_display(),
                name
            )))
        }
        Value::Object(ref fields) => fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Undefined),
        Value::Array(ref items) if name == "length" => Value::Number(items.len() as f64),
        Value::Array(_) if exposes(ARRAY_METHODS) => method(object, name),
        Value::Array(ref items) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Undefined),
        Value::Str(ref s) if name == "length" => Value::Number(s.chars().count() as f64),
        Value::Str(_) if exposes(STRING_METHODS) => method(object, name),
        Value::Str(ref s) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::Str(c.to_string()))
            .unwrap_or(Value::Undefined),
        Value::Checker(_) if name == "verify" => method(object, name),
        Value::Checker(ref checker) if name == "name" => Value::str(&checker.name),
        Value::Checker(_) => Value::Undefined,
        Value::Builtin(builtin) => {
            let members: &[&str] = match builtin {
                Builtin::Crypto => &["keccak256", "hashMessage", "recoverAddress", "verifyMessage"],
                Builtin::ObjectNs => &["keys", "values", "entries"],
                Builtin::Json => &["stringify", "parse"],
                Builtin::Math => &["max", "min", "floor", "ceil", "abs", "round"],
                _ => &[],
            };
            if exposes(members) {
                method(object, name)
            } else {
                Value::Undefined
            }
        }
        _ => Value::Undefined,
    })
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn string_arg(args: &[Value], i: usize, what: &str) -> Result<String, Fault> {
    match arg(args, i) {
        Value::Str(s) => Ok(s),
        other => Err(type_error(format!("{} expects a string, got {}", what, other.type_of()))),
    }
}

/// Checker inputs: null/undefined stay missing, anything else is text
fn attestation_arg(args: &[Value], i: usize) -> Option<String> {
    match arg(args, i) {
        Value::Undefined | Value::Null => None,
        Value::Str(s) => Some(s),
        other => Some(other.to_display()),
    }
}

fn call_value(callee: Value, args: Vec<Value>) -> Result<Value, Fault> {
    match callee {
        Value::Method(receiver, name) => call_method(*receiver, &name, args),
        Value::Builtin(Builtin::ErrorCtor(kind)) => {
            let message = match arg(&args, 0) {
                Value::Undefined => String::new(),
                other => other.to_display(),
            };
            Ok(Value::error(kind, message))
        }
        Value::Builtin(Builtin::Convert(kind)) => {
            let value = arg(&args, 0);
            Ok(match kind {
                "Number" if args.is_empty() => Value::Number(0.0),
                "Number" => Value::Number(value.to_number()),
                "String" if args.is_empty() => Value::str(""),
                "String" => Value::Str(value.to_display()),
                _ => Value::Bool(value.truthy()),
            })
        }
        other => Err(type_error(format!("{} is not a function", other.to_display()))),
    }
}

fn call_method(receiver: Value, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    match receiver {
        Value::Checker(checker) => checker_method(checker, name, &args),
        Value::Builtin(Builtin::Crypto) => crypto_method(name, &args),
        Value::Builtin(Builtin::ObjectNs) => object_method(name, &args),
        Value::Builtin(Builtin::Json) => json_method(name, &args),
        Value::Builtin(Builtin::Math) => Ok(math_method(name, &args)),
        Value::Array(items) => Ok(array_method(&items, name, &args)),
        Value::Str(s) => Ok(string_method(&s, name, &args)),
        other => Err(type_error(format!("{}.{} is not a function", other.to_display(), name))),
    }
}

fn checker_method(checker: CheckerRef, name: &str, args: &[Value]) -> Result<Value, Fault> {
    match name {
        "verify" => Ok(Value::Pending(Box::new(Pending {
            checker,
            digest: attestation_arg(args, 0),
            signature: attestation_arg(args, 1),
        }))),
        _ => Err(type_error(format!("checker.{} is not a function", name))),
    }
}

fn crypto_method(name: &str, args: &[Value]) -> Result<Value, Fault> {
    let failed = |e: crypto::CryptoError| throw("Error", e.to_string());
    match name {
        "keccak256" => {
            let text = string_arg(args, 0, "crypto.keccak256")?;
            Ok(Value::Str(crypto::to_hex(&crypto::keccak256(&crypto::text_bytes(&text)))))
        }
        "hashMessage" => {
            let text = string_arg(args, 0, "crypto.hashMessage")?;
            Ok(Value::Str(crypto::to_hex(&crypto::hash_message(text.as_bytes()))))
        }
        "recoverAddress" => {
            let digest = string_arg(args, 0, "crypto.recoverAddress")?;
            let signature = string_arg(args, 1, "crypto.recoverAddress")?;
            crypto::recover_address(&digest, &signature).map(Value::Str).map_err(failed)
        }
        "verifyMessage" => {
            let text = string_arg(args, 0, "crypto.verifyMessage")?;
            let signature = string_arg(args, 1, "crypto.verifyMessage")?;
            crypto::verify_message(text.as_bytes(), &signature).map(Value::Str).map_err(failed)
        }
        _ => Err(type_error(format!("crypto.{} is not a function", name))),
    }
}

fn object_method(name: &str, args: &[Value]) -> Result<Value, Fault> {
    let entries: Vec<(String, Value)> = match arg(args, 0) {
        Value::Undefined | Value::Null => {
            return Err(type_error("Cannot convert undefined or null to object"))
        }
        Value::Object(fields) => fields,
        Value::Array(items) => items.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::Str(c.to_string())))
            .collect(),
        _ => Vec::new(),
    };
    Ok(Value::Array(match name {
        "keys" => entries.into_iter().map(|(k, _)| Value::Str(k)).collect(),
        "values" => entries.into_iter().map(|(_, v)| v).collect(),
        _ => entries
            .into_iter()
            .map(|(k, v)| Value::Array(vec![Value::Str(k), v]))
            .collect(),
    }))
}

fn json_method(name: &str, args: &[Value]) -> Result<Value, Fault> {
    match name {
        "stringify" => Ok(match arg(args, 0) {
            Value::Undefined => Value::Undefined,
            value => Value::Str(value.to_json().to_string()),
        }),
        _ => {
            let text = string_arg(args, 0, "JSON.parse")?;
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| throw("SyntaxError", e.to_string()))
        }
    }
}

fn math_method(name: &str, args: &[Value]) -> Value {
    let numbers: Vec<f64> = args.iter().map(Value::to_number).collect();
    let first = numbers.first().copied().unwrap_or(f64::NAN);
    Value::Number(match name {
        "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) }
        }),
        "min" => numbers.iter().copied().fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) }
        }),
        "floor" => first.floor(),
        "ceil" => first.ceil(),
        "abs" => first.abs(),
        _ => (first + 0.5).floor(),
    })
}

/// Resolve a relative slice bound against a length
fn clamp_index(value: Value, len: usize, default: usize) -> usize {
    if value.is_nullish() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn array_method(items: &[Value], name: &str, args: &[Value]) -> Value {
    match name {
        "includes" => {
            let needle = arg(args, 0);
            let nan = |v: &Value| matches!(v, Value::Number(n) if n.is_nan());
            Value::Bool(items.iter().any(|v| v.strict_equals(&needle) || (nan(v) && nan(&needle))))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            let index = items.iter().position(|v| v.strict_equals(&needle));
            Value::Number(index.map(|i| i as f64).unwrap_or(-1.0))
        }
        "join" => {
            let sep = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_display(),
            };
            let parts: Vec<String> = items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect();
            Value::Str(parts.join(&sep))
        }
        "at" => {
            let n = arg(args, 0).to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            let index = if n < 0.0 { items.len() as f64 + n } else { n };
            if index < 0.0 {
                Value::Undefined
            } else {
                items.get(index as usize).cloned().unwrap_or(Value::Undefined)
            }
        }
        _ => {
            let start = clamp_index(arg(args, 0), items.len(), 0);
            let end = clamp_index(arg(args, 1), items.len(), items.len());
            Value::Array(if start < end { items[start..end].to_vec() } else { Vec::new() })
        }
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Value {
    let text_arg = |i: usize| arg(args, i).to_display();
    match name {
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "trim" => Value::str(s.trim()),
        "startsWith" => Value::Bool(s.starts_with(&text_arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&text_arg(0))),
        "includes" => Value::Bool(s.contains(&text_arg(0))),
        "indexOf" => {
            let needle = text_arg(0);
            let index = s.find(&needle).map(|byte| s[..byte].chars().count() as f64);
            Value::Number(index.unwrap_or(-1.0))
        }
        "split" => match arg(args, 0) {
            Value::Undefined => Value::Array(vec![Value::str(s)]),
            sep => {
                let sep = sep.to_display();
                if sep.is_empty() {
                    Value::Array(s.chars().map(|c| Value::Str(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(Value::str).collect())
                }
            }
        },
        _ => {
            let chars: Vec<char> = s.chars().collect();
            let start = clamp_index(arg(args, 0), chars.len(), 0);
            let end = clamp_index(arg(args, 1), chars.len(), chars.len());
            Value::Str(if start < end { chars[start..end].iter().collect() } else { String::new() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::parser::parse_function;

    async fn eval_source(src: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let function = parse_function(src).unwrap();
        let mut machine = Machine::new();
        let value = machine.call(&function, args).await?;
        settle(value).await
    }

    async fn eval_limited(src: &str, limits: Limits) -> Result<Value, Fault> {
        let function = parse_function(src).unwrap();
        Machine::with_limits(limits).call(&function, vec![]).await
    }

    fn range_message(result: Result<Value, Fault>) -> String {
        let err = thrown(result);
        assert_eq!(err.get("name"), Some(&Value::str("RangeError")));
        err.get("message").map(Value::to_display).unwrap_or_default()
    }

    async fn eval_ok(src: &str) -> Value {
        eval_source(src, vec![]).await.unwrap()
    }

    fn thrown(result: Result<Value, Fault>) -> Value {
        match result {
            Err(Fault::Throw(value)) => value,
            other => panic!("expected a throw, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_arithmetic_and_strings() {
        assert_eq!(eval_ok("() => 1 + 2 * 3").await, Value::Number(7.0));
        assert_eq!(eval_ok("() => 'a' + 1 + 2").await, Value::str("a12"));
        assert_eq!(eval_ok("() => 7 % 4 - 10 / 4").await, Value::Number(0.5));
        assert_eq!(eval_ok("() => 'abc' < 'abd'").await, Value::Bool(true));
        assert_eq!(eval_ok("() => typeof undeclaredThing").await, Value::str("undefined"));
        assert_eq!(eval_ok("() => null ?? 'fallback'").await, Value::str("fallback"));
        assert_eq!(eval_ok("() => 0 || '' || 'last'").await, Value::str("last"));
        assert_eq!(eval_ok("() => 1 == '1' ? 'loose' : 'strict'").await, Value::str("loose"));
    }

    #[tokio::test]
    async fn test_statements_and_loops() {
        let src = r#"(picks) => {
            let best = undefined;
            let most = -1;
            for (const [label, wagers] of Object.entries(picks)) {
                let total = 0;
                for (const w of wagers) { total += w.amount; }
                if (total > most) { most = total; best = label; }
            }
            return best;
        }"#;
        let picks = Value::Object(vec![
            ("low".into(), Value::Array(vec![Value::Object(vec![("amount".into(), Value::Number(1.0))])])),
            ("high".into(), Value::Array(vec![
                Value::Object(vec![("amount".into(), Value::Number(2.0))]),
                Value::Object(vec![("amount".into(), Value::Number(3.0))]),
            ])),
        ]);
        assert_eq!(eval_source(src, vec![picks]).await.unwrap(), Value::str("high"));
    }

    #[tokio::test]
    async fn test_break_and_continue() {
        let src = r#"() => {
            let seen = '';
            for (const c of 'abcdef') {
                if (c === 'b') continue;
                if (c === 'e') break;
                seen += c;
            }
            return seen;
        }"#;
        assert_eq!(eval_ok(src).await, Value::str("acd"));
    }

    #[tokio::test]
    async fn test_variadic_arguments() {
        let src = "(...args) => args.length + ':' + args.join('|')";
        let out = eval_source(src, vec!["a".into(), "b".into(), Value::Null]).await.unwrap();
        assert_eq!(out, Value::str("3:a|b|"));

        let missing = eval_source("(a, b) => typeof b", vec!["x".into()]).await.unwrap();
        assert_eq!(missing, Value::str("undefined"));
    }

    #[tokio::test]
    async fn test_const_reassignment_is_type_error() {
        let err = thrown(eval_source("() => { const a = 1; a = 2; }", vec![]).await);
        assert_eq!(err.get("name"), Some(&Value::str("TypeError")));
    }

    #[tokio::test]
    async fn test_host_globals_are_unreachable() {
        for name in ["require", "process", "fetch", "globalThis", "setTimeout", "Date"] {
            let err = thrown(eval_source(&format!("() => {}", name), vec![]).await);
            assert_eq!(err.get("name"), Some(&Value::str("ReferenceError")), "{} leaked", name);
        }
        let err = thrown(eval_source("() => crypto.randomBytes(8)", vec![]).await);
        assert_eq!(err.get("name"), Some(&Value::str("TypeError")));
    }

    #[tokio::test]
    async fn test_property_of_undefined() {
        let err = thrown(eval_source("(p) => p.missing.deeper", vec![Value::Object(vec![])]).await);
        assert_eq!(
            err.get("message"),
            Some(&Value::str("Cannot read properties of undefined (reading 'deeper')"))
        );
    }

    #[tokio::test]
    async fn test_throw_plain_and_error_values() {
        let err = thrown(eval_source("() => { throw new Error('boom'); }", vec![]).await);
        assert_eq!(err, Value::error("Error", "boom"));
        let err = thrown(eval_source("() => { throw 'raw'; }", vec![]).await);
        assert_eq!(err, Value::str("raw"));
    }

    #[tokio::test]
    async fn test_crypto_capabilities() {
        let out = eval_ok("() => crypto.keccak256('')").await;
        assert_eq!(
            out,
            Value::str("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );

        let signer = crypto::AttestationSigner::from_seed(b"interp", "ALICE").unwrap();
        let signature = signer.sign_message(b"result: home");
        let recovered = eval_source(
            "(data, sig) => crypto.recoverAddress(crypto.hashMessage(data), sig)",
            vec!["result: home".into(), Value::Str(signature.clone())],
        )
        .await
        .unwrap();
        assert_eq!(recovered, Value::Str(signer.address.clone()));

        let via_verify = eval_source(
            "(data, sig) => crypto.verifyMessage(data, sig)",
            vec!["result: home".into(), Value::Str(signature)],
        )
        .await
        .unwrap();
        assert_eq!(via_verify, Value::Str(signer.address));
    }

    #[tokio::test]
    async fn test_json_and_math() {
        assert_eq!(eval_ok("() => JSON.parse('{\"w\":\"yes\"}').w").await, Value::str("yes"));
        assert_eq!(eval_ok("() => JSON.stringify([1, 'a', null])").await, Value::str("[1,\"a\",null]"));
        assert_eq!(eval_ok("() => Math.max(1, 5, 3)").await, Value::Number(5.0));
        assert_eq!(eval_ok("() => Math.round(2.5)").await, Value::Number(3.0));
        let err = thrown(eval_source("() => JSON.parse('{')", vec![]).await);
        assert_eq!(err.get("name"), Some(&Value::str("SyntaxError")));
    }

    #[tokio::test]
    async fn test_string_and_array_helpers() {
        assert_eq!(eval_ok("() => 'A,B'.toLowerCase().split(',')[1]").await, Value::str("b"));
        assert_eq!(eval_ok("() => ['x', 'y', 'z'].at(-1)").await, Value::str("z"));
        assert_eq!(eval_ok("() => ['x', 'y', 'z'].slice(1).join('')").await, Value::str("yz"));
        assert_eq!(eval_ok("() => ['x', 'y'].indexOf('y')").await, Value::Number(1.0));
        assert_eq!(eval_ok("() => 'hello'.slice(-3)").await, Value::str("llo"));
        assert_eq!(eval_ok("() => 'hello'.length").await, Value::Number(5.0));
    }

    #[tokio::test]
    async fn test_step_budget_stops_long_loops() {
        let limits = Limits { max_steps: 500, ..Limits::default() };
        let src = "() => { let n = 0; for (const a of 'abcdefghij') { for (const b of 'abcdefghij') { for (const c of 'abcdefghij') { n += 1; } } } return n; }";
        let message = range_message(eval_limited(src, limits).await);
        assert!(message.contains("500 steps"), "{}", message);

        let small = "() => { let n = 0; for (const a of 'abc') { n += 1; } return n; }";
        assert_eq!(eval_limited(small, limits).await.unwrap(), Value::Number(3.0));
    }

    #[tokio::test]
    async fn test_empty_loop_bodies_still_count() {
        let limits = Limits { max_steps: 100, ..Limits::default() };
        let src = format!("() => {{ for (const c of '{}') {{}} return 1; }}", "x".repeat(1000));
        assert!(range_message(eval_limited(&src, limits).await).contains("steps"));
    }

    #[tokio::test]
    async fn test_string_doubling_hits_length_limit() {
        let limits = Limits { max_string_len: 4096, ..Limits::default() };
        let src = "() => { let s = 'ab'; for (const i of [1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,48,49,50,51,52,53,54,55,56,57,58,59,60,61,62,63,64]) { s = s + s; } return s; }";
        assert!(range_message(eval_limited(src, limits).await).contains("string length"));

        let sep = "-".repeat(2000);
        let joined = format!("() => ['a', 'b', 'c', 'd'].join('{}')", sep);
        assert!(range_message(eval_limited(&joined, limits).await).contains("string length"));
    }

    #[tokio::test]
    async fn test_array_doubling_hits_size_limit() {
        let limits = Limits { max_value_size: 10_000, ..Limits::default() };
        let src = "() => { let a = [1]; for (const i of 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx') { a = [a, a]; } return a; }";
        assert!(range_message(eval_limited(src, limits).await).contains("value size"));
    }

    #[tokio::test]
    async fn test_value_nesting_hits_depth_limit() {
        let limits = Limits { max_value_depth: 16, ..Limits::default() };
        let src = format!("() => {{ let a = 0; for (const c of '{}') {{ a = [a]; }} return a; }}", "x".repeat(100));
        assert!(range_message(eval_limited(&src, limits).await).contains("nested deeper"));
    }
}
