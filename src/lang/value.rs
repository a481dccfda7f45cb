//! Runtime values for the BUILD-language interpreter.
//!
//! Lists and dicts are reference types (`Rc<RefCell<...>>`), matching the
//! teacher's `interpreter::value` shape for mutable shell variables. The
//! grammar gives them no in-place mutation: there's no index-assignment
//! target and no `append`/`extend` builtin, so `+`/`|`/`&` all build and
//! return a new container rather than mutating either operand.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::{Expr, Param};
use super::error::Result;
use super::scope::Scope;

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    List(Rc<RefCell<ListValue>>),
    Dict(Rc<RefCell<DictValue>>),
    Func(Rc<FunctionValue>),
    Builtin(Rc<BuiltinValue>),
    None,
}

pub struct ListValue {
    pub items: Vec<Value>,
}

pub struct DictValue {
    pub items: IndexMap<String, Value>,
}

pub struct FunctionValue {
    pub name: String,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub closure: Scope,
}

pub enum FunctionBody {
    Statements(Vec<super::ast::Statement>),
    Lambda(Box<Expr>),
}

pub struct BuiltinValue {
    pub name: String,
    #[allow(clippy::type_complexity)]
    pub func: Box<dyn Fn(&[Value], &IndexMap<String, Value>) -> Result<Value>>,
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(ListValue { items })))
    }

    pub fn dict(items: IndexMap<String, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(DictValue { items })))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Func(_) => "function",
            Value::Builtin(_) => "function",
            Value::None => "none",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::List(l) => !l.borrow().items.is_empty(),
            Value::Dict(d) => !d.borrow().items.is_empty(),
            Value::Func(_) | Value::Builtin(_) => true,
            Value::None => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Coerces to a `Vec<String>` the way `srcs`/`deps`/`visibility` style
    /// arguments accept either a single string or a list of strings.
    pub fn as_str_list(&self) -> Vec<String> {
        match self {
            Value::Str(s) => vec![s.clone()],
            Value::List(l) => l
                .borrow()
                .items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            Value::None => vec![],
            _ => vec![],
        }
    }

    pub fn display_string(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::None => "None".to_string(),
            Value::List(l) => {
                let items: Vec<String> = l.borrow().items.iter().map(|v| v.repr()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Dict(d) => {
                let items: Vec<String> = d
                    .borrow()
                    .items
                    .iter()
                    .map(|(k, v)| format!("{:?}: {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Func(f) => format!("<function {}>", f.name),
            Value::Builtin(b) => format!("<built-in function {}>", b.name),
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("{:?}", s),
            other => other.display_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

