use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::value::Value;

#[derive(Clone, Debug)]
enum Slot {
    Value(Value),
    // JSON objects and arrays live in a shared document so that paths
    // through the variable can modify them in place.
    Document(Rc<RefCell<Json>>),
}

/// Variables declared on one path context.
#[derive(Clone, Debug, Default)]
pub struct Variables {
    slots: HashMap<String, Slot>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, value: impl Into<Value>) {
        let slot = match value.into() {
            Value::Object(json) => Slot::Document(Rc::new(RefCell::new(json))),
            other => Slot::Value(other),
        };
        self.slots.insert(name.to_string(), slot);
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.slots.get(name).map(|slot| match slot {
            Slot::Value(v) => v.clone(),
            Slot::Document(doc) => Value::Object(doc.borrow().clone()),
        })
    }

    pub(crate) fn document(&self, name: &str) -> Option<Rc<RefCell<Json>>> {
        match self.slots.get(name) {
            Some(Slot::Document(doc)) => Some(doc.clone()),
            _ => None,
        }
    }

    pub fn undeclare(&mut self, name: &str) -> bool {
        self.slots.remove(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}
