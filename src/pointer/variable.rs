use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use super::{Bean, NodeKind, NodePointer, Pointer, Pointers};
use crate::engine::Engine;
use crate::errors::{EvalError, Result};
use crate::qname::QName;
use crate::value::Value;
use crate::variables::Variables;

/// Transparent container around a variable's value.
#[derive(Clone)]
pub struct VariablePointer {
    name: QName,
    scope: Option<Rc<RefCell<Variables>>>,
    engine: Arc<Engine>,
}

impl VariablePointer {
    pub fn new(name: QName, scope: Option<Rc<RefCell<Variables>>>, engine: Arc<Engine>) -> Self {
        Self { name, scope, engine }
    }

    fn key(&self) -> &str {
        self.name.qualified()
    }

    fn wrap(&self, value: Value) -> Option<Pointer> {
        let base: Pointer = Rc::new(self.clone());
        let bean: Bean = match self.scope.as_ref().and_then(|s| s.borrow().document(self.key())) {
            Some(doc) => doc,
            None => Rc::new(RefCell::new(value.to_json())),
        };
        self.engine
            .new_node_pointer(Some(&base), &self.name, &bean)
            .ok()
    }
}

impl fmt::Debug for VariablePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariablePointer")
            .field("name", &self.name.qualified())
            .field("declared", &self.is_actual())
            .finish()
    }
}

impl NodePointer for VariablePointer {
    fn name(&self) -> QName {
        self.name.clone()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Root
    }

    fn parent(&self) -> Option<Pointer> {
        None
    }

    fn value(&self) -> Value {
        self.scope
            .as_ref()
            .and_then(|s| s.borrow().get(self.key()))
            .unwrap_or(Value::Null)
    }

    fn immediate_value_pointer(&self) -> Option<Pointer> {
        if !self.is_actual() {
            return None;
        }
        match self.value() {
            Value::Pointer(p) => Some(p),
            Value::Context(ctx) => crate::infoset::single_pointer(&ctx),
            other => self.wrap(other),
        }
    }

    fn is_actual(&self) -> bool {
        self.scope
            .as_ref()
            .is_some_and(|s| s.borrow().is_declared(self.key()))
    }

    fn is_leaf(&self) -> bool {
        self.immediate_value_pointer().map_or(true, |p| p.is_leaf())
    }

    fn is_container(&self) -> bool {
        true
    }

    fn is_variable(&self) -> bool {
        true
    }

    fn children(&self) -> Pointers {
        match self.immediate_value_pointer() {
            Some(p) => p.children(),
            None => Box::new(std::iter::empty()),
        }
    }

    fn compare_child_pointers(&self, _a: &Pointer, _b: &Pointer) -> Ordering {
        Ordering::Equal
    }

    fn as_path(&self) -> String {
        format!("${}", self.name)
    }

    fn set_value(&self, value: &Value) -> Result<()> {
        match &self.scope {
            Some(scope) if self.is_actual() => {
                scope.borrow_mut().declare(self.key(), value.clone());
                Ok(())
            }
            _ => Err(EvalError::UndefinedVariable(self.name.to_string())),
        }
    }

    fn remove(&self) -> Result<()> {
        match &self.scope {
            Some(scope) if scope.borrow_mut().undeclare(self.key()) => Ok(()),
            _ => Err(EvalError::UndefinedVariable(self.name.to_string())),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pointer_eq(&self, other: &dyn NodePointer) -> bool {
        other
            .as_any()
            .downcast_ref::<VariablePointer>()
            .is_some_and(|o| {
                o.name == self.name
                    && match (&o.scope, &self.scope) {
                        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                        (None, None) => true,
                        _ => false,
                    }
            })
    }

    fn pointer_hash(&self, mut state: &mut dyn Hasher) {
        self.name.hash(&mut state);
    }
}
