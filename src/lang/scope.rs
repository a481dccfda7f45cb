//! Lexical scoping: a chain of frames, each a `Rc<RefCell<...>>` so closures
//! captured by `lambda`/`def` can outlive the statement that created them,
//! matching the teacher's `interpreter::scope::Scope` frame-chain shape.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;

#[derive(Clone)]
pub struct Scope(Rc<RefCell<Frame>>);

struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Scope>,
}

impl Scope {
    pub fn root() -> Self {
        Scope(Rc::new(RefCell::new(Frame {
            vars: HashMap::new(),
            parent: None,
        })))
    }

    pub fn child(&self) -> Self {
        Scope(Rc::new(RefCell::new(Frame {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        if let Some(v) = frame.vars.get(name) {
            return Some(v.clone());
        }
        frame.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Declares or overwrites a binding in this frame specifically (used
    /// for assignment, which in this grammar always binds locally).
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.0.borrow().vars.contains_key(name)
    }
}
