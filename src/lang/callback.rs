//! Pre/post-build callback registry.
//!
//! spec.md §9 deliberately keeps `graph::BuildTarget` from holding a
//! closure by value (it must stay `Send + Sync` for the scheduler):
//! instead a target stores an opaque `graph::target::CallbackId`, and the
//! interpreter-owned `CallbackRegistry` is the only place the actual
//! `Value::Func`/`Value::Builtin` closures live.

use std::collections::HashMap;

use crate::graph::target::CallbackId;

use super::value::Value;

#[derive(Default)]
pub struct CallbackRegistry {
    next_id: u32,
    callbacks: HashMap<CallbackId, Value>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, func: Value) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks.insert(id, func);
        id
    }

    pub fn get(&self, id: CallbackId) -> Option<&Value> {
        self.callbacks.get(&id)
    }
}
