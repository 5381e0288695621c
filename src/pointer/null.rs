use std::any::Any;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::{NodeKind, NodePointer, Pointer};
use crate::qname::QName;
use crate::value::Value;

/// Stands for a node that does not exist.
#[derive(Debug)]
pub struct NullPointer {
    parent: Option<Pointer>,
    name: QName,
}

impl NullPointer {
    pub fn new(parent: Option<Pointer>, name: QName) -> Pointer {
        Rc::new(Self { parent, name })
    }

    pub fn empty() -> Pointer {
        Self::new(None, QName::local(""))
    }
}

impl NodePointer for NullPointer {
    fn name(&self) -> QName {
        self.name.clone()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Element
    }

    fn parent(&self) -> Option<Pointer> {
        self.parent.clone()
    }

    fn value(&self) -> Value {
        Value::Null
    }

    fn is_actual(&self) -> bool {
        false
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn compare_child_pointers(&self, _a: &Pointer, _b: &Pointer) -> Ordering {
        Ordering::Equal
    }

    fn as_path(&self) -> String {
        match &self.parent {
            Some(parent) if !self.name.local_name().is_empty() => {
                let base = parent.as_path();
                let base = base.trim_end_matches('/');
                format!("{base}/{}", self.name)
            }
            Some(parent) => parent.as_path(),
            None => "null()".to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pointer_eq(&self, other: &dyn NodePointer) -> bool {
        other
            .as_any()
            .downcast_ref::<NullPointer>()
            .is_some_and(|o| o.name == self.name && o.parent == self.parent)
    }

    fn pointer_hash(&self, mut state: &mut dyn Hasher) {
        self.name.hash(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::JsonPointer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn null_pointer_is_never_actual() {
        let root = JsonPointer::document(json!({}));
        let missing = NullPointer::new(Some(root), QName::local("gone"));
        assert!(!missing.is_actual());
        assert_eq!(missing.value(), Value::Null);
        assert_eq!(missing.as_path(), "/gone");
        assert_eq!(NullPointer::empty().as_path(), "null()");
    }
}
