//! Tree-walking evaluator over the `ast` module, matching the teacher's
//! `interpreter::interpreter::Interpreter` shape (statement/expression
//! dispatch over an owned `Scope` chain) restructured for the BUILD
//! grammar's much smaller surface.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::*;
use super::callback::CallbackRegistry;
use super::error::{LangError, Result};
use super::lexer::Position;
use super::scope::Scope;
use super::value::{FunctionBody, FunctionValue, Value};

/// Threaded through evaluation so builtins can reach the package currently
/// being parsed (for `package()`, `glob()`, target-declaring builtins) and
/// register pre/post-build closures. `callbacks` is an `Rc<RefCell<..>>`
/// handle rather than an exclusive borrow, same as `BuiltinContext::graph`:
/// `subinclude` recursively builds a second `Interpreter` sharing this
/// registry and the caller's `globals` scope, which an exclusively-borrowed
/// `&mut CallbackRegistry` held for the whole outer `exec_module` call would
/// make impossible (the nested evaluation would find it already borrowed).
#[derive(Clone)]
pub struct EvalContext {
    pub current_package_dir: String,
    pub callbacks: Rc<RefCell<CallbackRegistry>>,
}

pub struct Interpreter {
    pub globals: Scope,
    pub ctx: EvalContext,
}

impl Interpreter {
    pub fn new(globals: Scope, ctx: EvalContext) -> Self {
        Self { globals, ctx }
    }

    pub fn exec_module(&mut self, module: &Module) -> Result<()> {
        self.exec_block(&module.statements, &self.globals.clone())?;
        Ok(())
    }

    /// Executes a statement list. `Ok(Some(v))` means a `return v` was hit
    /// and the caller (a function body) should unwind immediately with it;
    /// `Ok(None)` means control fell off the end of the block normally.
    fn exec_block(&mut self, stmts: &[Statement], scope: &Scope) -> Result<Option<Value>> {
        for stmt in stmts {
            if let Some(v) = self.exec_stmt(stmt, scope)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn exec_stmt(&mut self, stmt: &Statement, scope: &Scope) -> Result<Option<Value>> {
        match &stmt.kind {
            StatementKind::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(None)
            }
            StatementKind::Assign { target, value } => {
                let v = self.eval(value, scope)?;
                self.assign(target, v, scope)?;
                Ok(None)
            }
            StatementKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test, scope)?.truthy() {
                        let child = scope.child();
                        return self.exec_block(body, &child);
                    }
                }
                let child = scope.child();
                self.exec_block(orelse, &child)
            }
            StatementKind::For { target, iter, body } => {
                let iterable = self.eval(iter, scope)?;
                for item in self.iterate(&iterable, stmt.span.start)? {
                    let child = scope.child();
                    self.assign(target, item, &child)?;
                    if let Some(v) = self.exec_block(body, &child)? {
                        return Ok(Some(v));
                    }
                }
                Ok(None)
            }
            StatementKind::FunctionDef { name, params, body } => {
                let func = Value::Func(Rc::new(FunctionValue {
                    name: name.clone(),
                    params: params.clone(),
                    body: FunctionBody::Statements(body.clone()),
                    closure: scope.clone(),
                }));
                scope.set(name.clone(), func);
                Ok(None)
            }
            StatementKind::Return(expr) => {
                let v = match expr {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::None,
                };
                Ok(Some(v))
            }
            StatementKind::Assert { test, message } => {
                if !self.eval(test, scope)?.truthy() {
                    let msg = match message {
                        Some(m) => self.eval(m, scope)?.display_string(),
                        None => "assertion failed".to_string(),
                    };
                    return Err(LangError::AssertionFailed(stmt.span.start, msg));
                }
                Ok(None)
            }
            StatementKind::Pass => Ok(None),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Scope) -> Result<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                scope.set(name.clone(), value);
                Ok(())
            }
            ExprKind::Tuple(items) => {
                let values = self.iterate(&value, target.span.start)?;
                if values.len() != items.len() {
                    return Err(LangError::TypeError(
                        target.span.start,
                        format!("cannot unpack {} values into {}", values.len(), items.len()),
                    ));
                }
                for (item, v) in items.iter().zip(values) {
                    self.assign(item, v, scope)?;
                }
                Ok(())
            }
            _ => Err(LangError::TypeError(
                target.span.start,
                "invalid assignment target".to_string(),
            )),
        }
    }

    fn iterate(&mut self, value: &Value, pos: Position) -> Result<Vec<Value>> {
        match value {
            Value::List(l) => Ok(l.borrow().items.clone()),
            Value::Dict(d) => Ok(d.borrow().items.keys().map(|k| Value::Str(k.clone())).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(LangError::TypeError(
                pos,
                format!("{} is not iterable", other.type_name()),
            )),
        }
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value> {
        match &expr.kind {
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::None => Ok(Value::None),
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => out.push_str(s),
                        FStringPart::Interpolate(name) => {
                            let v = scope.get(name).ok_or_else(|| {
                                LangError::NameError(expr.span.start, name.clone())
                            })?;
                            out.push_str(&v.display_string());
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            ExprKind::Ident(name) => scope
                .get(name)
                .ok_or_else(|| LangError::NameError(expr.span.start, name.clone())),
            ExprKind::List(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e, scope))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::list(values))
            }
            ExprKind::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e, scope))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::list(values))
            }
            ExprKind::Dict(pairs) => {
                let mut map = IndexMap::new();
                for (k, v) in pairs {
                    let key = self.eval(k, scope)?;
                    let key = key.as_str().ok_or_else(|| {
                        LangError::TypeError(k.span.start, "dict keys must be strings".to_string())
                    })?;
                    let value = self.eval(v, scope)?;
                    map.insert(key.to_string(), value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::BinOp { left, op, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                self.eval_binop(*op, l, r, expr.span.start)
            }
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::Bool(*op == BoolOp::And);
                for (i, v) in values.iter().enumerate() {
                    let val = self.eval(v, scope)?;
                    let short_circuit = match op {
                        BoolOp::And => !val.truthy(),
                        BoolOp::Or => val.truthy(),
                    };
                    result = val;
                    if short_circuit && i + 1 < values.len() {
                        break;
                    }
                }
                Ok(result)
            }
            ExprKind::UnaryNot(inner) => Ok(Value::Bool(!self.eval(inner, scope)?.truthy())),
            ExprKind::Compare { left, op, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                self.eval_compare(*op, &l, &r, expr.span.start)
            }
            ExprKind::Call { func, args, kwargs } => {
                let callee = self.eval(func, scope)?;
                let arg_values = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                let mut kwarg_values = IndexMap::new();
                for (name, expr) in kwargs {
                    kwarg_values.insert(name.clone(), self.eval(expr, scope)?);
                }
                self.call(callee, &arg_values, &kwarg_values, expr.span.start)
            }
            ExprKind::Attribute { value, attr } => {
                let v = self.eval(value, scope)?;
                // `CONFIG.KEY` is the one attribute-access form the grammar
                // needs (spec.md's `[Buildconfig]` section, "exposed as
                // CONFIG.KEY in the language") — treat any dict the same way.
                match &v {
                    Value::Dict(d) => d.borrow().items.get(attr).cloned().ok_or_else(|| {
                        LangError::NameError(expr.span.start, attr.clone())
                    }),
                    other => Err(LangError::TypeError(
                        expr.span.start,
                        format!("{} has no attribute {attr:?}", other.type_name()),
                    )),
                }
            }
            ExprKind::Index { value, index } => {
                let v = self.eval(value, scope)?;
                let idx = self.eval(index, scope)?;
                self.eval_index(&v, &idx, expr.span.start)
            }
            ExprKind::Slice { value, lower, upper } => {
                let v = self.eval(value, scope)?;
                let lower = match lower {
                    Some(e) => Some(self.eval(e, scope)?.as_int().ok_or_else(|| {
                        LangError::TypeError(expr.span.start, "slice bound must be int".to_string())
                    })?),
                    None => None,
                };
                let upper = match upper {
                    Some(e) => Some(self.eval(e, scope)?.as_int().ok_or_else(|| {
                        LangError::TypeError(expr.span.start, "slice bound must be int".to_string())
                    })?),
                    None => None,
                };
                self.eval_slice(&v, lower, upper, expr.span.start)
            }
            ExprKind::Lambda { params, body } => Ok(Value::Func(Rc::new(FunctionValue {
                name: "<lambda>".to_string(),
                params: params.clone(),
                body: FunctionBody::Lambda(body.clone()),
                closure: scope.clone(),
            }))),
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                let iterable = self.eval(iter, scope)?;
                let items = self.iterate(&iterable, expr.span.start)?;
                let mut out = Vec::new();
                for item in items {
                    let child = scope.child();
                    self.assign(target, item, &child)?;
                    if let Some(cond) = condition {
                        if !self.eval(cond, &child)?.truthy() {
                            continue;
                        }
                    }
                    out.push(self.eval(element, &child)?);
                }
                Ok(Value::list(out))
            }
            ExprKind::IfElse { body, test, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
        }
    }

    fn eval_binop(&mut self, op: BinOp, l: Value, r: Value, pos: Position) -> Result<Value> {
        match (op, &l, &r) {
            (BinOp::Add, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().items.clone();
                items.extend(b.borrow().items.clone());
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Dict(a), Value::Dict(b)) => {
                let mut map = a.borrow().items.clone();
                for (k, v) in b.borrow().items.iter() {
                    map.insert(k.clone(), v.clone());
                }
                Ok(Value::dict(map))
            }
            (BinOp::Sub, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            (BinOp::Mul, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
            (BinOp::Mul, Value::Str(a), Value::Int(b)) => Ok(Value::Str(a.repeat((*b).max(0) as usize))),
            (BinOp::Div, Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(LangError::TypeError(pos, "division by zero".to_string()));
                }
                Ok(Value::Int(a / b))
            }
            (BinOp::Mod, Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(LangError::TypeError(pos, "modulo by zero".to_string()));
                }
                Ok(Value::Int(a % b))
            }
            (BinOp::Mod, Value::Str(fmt), other) => Ok(Value::Str(format_percent(fmt, other))),
            (BinOp::BitOr, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().items.clone();
                for item in b.borrow().items.clone() {
                    if !items.iter().any(|x| value_eq(x, &item)) {
                        items.push(item);
                    }
                }
                Ok(Value::list(items))
            }
            (BinOp::BitAnd, Value::List(a), Value::List(b)) => {
                let items: Vec<Value> = a
                    .borrow()
                    .items
                    .iter()
                    .filter(|x| b.borrow().items.iter().any(|y| value_eq(x, y)))
                    .cloned()
                    .collect();
                Ok(Value::list(items))
            }
            _ => Err(LangError::TypeError(
                pos,
                format!("unsupported operand types for {:?}: {} and {}", op, l.type_name(), r.type_name()),
            )),
        }
    }

    fn eval_compare(&mut self, op: CompareOp, l: &Value, r: &Value, pos: Position) -> Result<Value> {
        match op {
            CompareOp::Eq => Ok(Value::Bool(value_eq(l, r))),
            CompareOp::NotEq => Ok(Value::Bool(!value_eq(l, r))),
            CompareOp::Lt | CompareOp::Gt | CompareOp::LtEq | CompareOp::GtEq => {
                let ordering = match (l, r) {
                    (Value::Int(a), Value::Int(b)) => a.cmp(b),
                    (Value::Str(a), Value::Str(b)) => a.cmp(b),
                    _ => {
                        return Err(LangError::TypeError(
                            pos,
                            format!("cannot compare {} and {}", l.type_name(), r.type_name()),
                        ))
                    }
                };
                Ok(Value::Bool(match op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::LtEq => ordering.is_le(),
                    CompareOp::GtEq => ordering.is_ge(),
                    _ => unreachable!(),
                }))
            }
            CompareOp::In | CompareOp::NotIn => {
                let found = match r {
                    Value::List(l2) => l2.borrow().items.iter().any(|v| value_eq(v, l)),
                    Value::Dict(d) => match l.as_str() {
                        Some(k) => d.borrow().items.contains_key(k),
                        None => false,
                    },
                    Value::Str(s) => match l.as_str() {
                        Some(needle) => s.contains(needle),
                        None => false,
                    },
                    _ => {
                        return Err(LangError::TypeError(
                            pos,
                            format!("{} is not a container", r.type_name()),
                        ))
                    }
                };
                Ok(Value::Bool(if op == CompareOp::In { found } else { !found }))
            }
        }
    }

    fn eval_index(&mut self, value: &Value, index: &Value, pos: Position) -> Result<Value> {
        match (value, index) {
            (Value::List(l), Value::Int(i)) => {
                let items = &l.borrow().items;
                let idx = normalize_index(*i, items.len());
                items
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| LangError::TypeError(pos, "list index out of range".to_string()))
            }
            (Value::Dict(d), Value::Str(k)) => d
                .borrow()
                .items
                .get(k)
                .cloned()
                .ok_or_else(|| LangError::NameError(pos, k.clone())),
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = normalize_index(*i, chars.len());
                chars
                    .get(idx)
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| LangError::TypeError(pos, "string index out of range".to_string()))
            }
            _ => Err(LangError::TypeError(
                pos,
                format!("{} is not subscriptable", value.type_name()),
            )),
        }
    }

    fn eval_slice(
        &mut self,
        value: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        pos: Position,
    ) -> Result<Value> {
        match value {
            Value::List(l) => {
                let items = l.borrow().items.clone();
                let (lo, hi) = slice_bounds(lower, upper, items.len());
                Ok(Value::list(items[lo..hi].to_vec()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (lo, hi) = slice_bounds(lower, upper, chars.len());
                Ok(Value::Str(chars[lo..hi].iter().collect()))
            }
            _ => Err(LangError::TypeError(
                pos,
                format!("{} is not sliceable", value.type_name()),
            )),
        }
    }

    pub fn call(
        &mut self,
        callee: Value,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
        pos: Position,
    ) -> Result<Value> {
        match callee {
            Value::Builtin(b) => (b.func)(args, kwargs),
            Value::Func(f) => {
                let call_scope = f.closure.child();
                self.bind_params(&f.params, args, kwargs, &call_scope, pos)?;
                match &f.body {
                    FunctionBody::Lambda(expr) => self.eval(expr, &call_scope),
                    FunctionBody::Statements(stmts) => {
                        Ok(self.exec_block(stmts, &call_scope)?.unwrap_or(Value::None))
                    }
                }
            }
            other => Err(LangError::TypeError(
                pos,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    fn bind_params(
        &mut self,
        params: &[Param],
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
        scope: &Scope,
        pos: Position,
    ) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            let value = if let Some(v) = args.get(i) {
                v.clone()
            } else if let Some(v) = kwargs
                .get(&param.name)
                .or_else(|| param.alias.as_ref().and_then(|a| kwargs.get(a)))
            {
                v.clone()
            } else if let Some(default) = &param.default {
                self.eval(default, scope)?
            } else {
                return Err(LangError::UnknownArgument(
                    pos,
                    param.name.clone(),
                    "missing required argument".to_string(),
                ));
            };
            self.check_param_type(param, &value, pos)?;
            scope.set(param.name.clone(), value);
        }
        Ok(())
    }

    fn check_param_type(&self, param: &Param, value: &Value, pos: Position) -> Result<()> {
        if param.types.is_empty() {
            return Ok(());
        }
        let matches = param.types.iter().any(|t| match t.as_str() {
            "str" => matches!(value, Value::Str(_)),
            "int" => matches!(value, Value::Int(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "function" => matches!(value, Value::Func(_) | Value::Builtin(_)),
            "none" => matches!(value, Value::None),
            _ => true,
        });
        if matches {
            Ok(())
        } else {
            Err(LangError::TypeError(
                pos,
                format!(
                    "argument {:?} expected {}, got {}",
                    param.name,
                    param.types.join("|"),
                    value.type_name()
                ),
            ))
        }
    }
}

fn normalize_index(i: i64, len: usize) -> usize {
    if i < 0 {
        (len as i64 + i).max(0) as usize
    } else {
        i as usize
    }
}

fn slice_bounds(lower: Option<i64>, upper: Option<i64>, len: usize) -> (usize, usize) {
    let lo = lower.map(|i| normalize_index(i, len)).unwrap_or(0).min(len);
    let hi = upper.map(|i| normalize_index(i, len)).unwrap_or(len).min(len);
    (lo, hi.max(lo))
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::None, Value::None) => true,
        (Value::List(x), Value::List(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.items.len() == y.items.len()
                && x.items.iter().zip(y.items.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.items.len() == y.items.len()
                && x.items.iter().all(|(k, v)| y.items.get(k).map(|v2| value_eq(v, v2)).unwrap_or(false))
        }
        _ => false,
    }
}

fn format_percent(fmt: &str, value: &Value) -> String {
    fmt.replacen("%s", &value.display_string(), 1)
}
