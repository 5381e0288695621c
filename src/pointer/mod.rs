//! Node pointers: one addressing abstraction over every backend.
//!
//! A [`Pointer`] is a shared handle to a location in some host object graph.
//! The engine only talks to backends through [`NodePointer`]; backends are
//! plugged in with a [`NodePointerFactory`] registered on the
//! [`Engine`](crate::engine::Engine).

pub mod json;
pub mod null;
pub mod variable;

use std::any::Any;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::iter;
use std::rc::Rc;

use crate::errors::{EvalError, Result};
use crate::qname::QName;
use crate::value::Value;

pub use json::{JsonPointer, JsonPointerFactory};
pub use null::NullPointer;
pub use variable::VariablePointer;

pub type Pointer = Rc<dyn NodePointer>;

/// Iterator over the children, attributes or namespaces of a node.
pub type Pointers = Box<dyn Iterator<Item = Pointer>>;

/// A raw host object handed to the factory registry.
pub type Bean = Rc<dyn Any>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

pub trait NodePointer: Debug + 'static {
    fn name(&self) -> QName;

    fn kind(&self) -> NodeKind;

    /// Immediate parent, which may be a transparent container.
    fn parent(&self) -> Option<Pointer>;

    /// The value stored at this location.
    fn value(&self) -> Value;

    /// The pointer a container opens onto. Plain nodes return `None`.
    fn immediate_value_pointer(&self) -> Option<Pointer> {
        None
    }

    /// Whether the location actually exists in the backing graph.
    fn is_actual(&self) -> bool {
        true
    }

    fn is_leaf(&self) -> bool;

    fn is_container(&self) -> bool {
        false
    }

    fn is_variable(&self) -> bool {
        false
    }

    fn children(&self) -> Pointers {
        Box::new(iter::empty())
    }

    fn attributes(&self) -> Pointers {
        Box::new(iter::empty())
    }

    fn namespaces(&self) -> Pointers {
        Box::new(iter::empty())
    }

    /// Namespace URI of this node's own name.
    fn namespace_uri(&self) -> Option<String> {
        None
    }

    /// URI bound to `prefix` in the scope of this node.
    fn namespace_uri_for(&self, prefix: &str) -> Option<String> {
        self.parent().and_then(|p| p.namespace_uri_for(prefix))
    }

    fn language(&self) -> Option<String> {
        self.parent().and_then(|p| p.language())
    }

    /// Order two direct children (or attributes) of this node.
    fn compare_child_pointers(&self, a: &Pointer, b: &Pointer) -> Ordering;

    /// A path that resolves back to this location from the root.
    fn as_path(&self) -> String;

    fn set_value(&self, _value: &Value) -> Result<()> {
        Err(self.unsupported("set a value"))
    }

    fn remove(&self) -> Result<()> {
        Err(self.unsupported("remove"))
    }

    /// Create the `index`-th child named `name` (first when `None`).
    fn create_child(&self, _name: &QName, _index: Option<usize>) -> Result<Pointer> {
        Err(self.unsupported("create a child"))
    }

    fn create_attribute(&self, _name: &QName) -> Result<Pointer> {
        Err(self.unsupported("create an attribute"))
    }

    fn as_any(&self) -> &dyn Any;

    fn pointer_eq(&self, other: &dyn NodePointer) -> bool;

    fn pointer_hash(&self, state: &mut dyn Hasher);

    fn unsupported(&self, operation: &str) -> EvalError {
        EvalError::Unsupported(format!(
            "cannot {operation} at {}, operation is not allowed for this type of node",
            self.as_path()
        ))
    }
}

impl PartialEq for dyn NodePointer {
    fn eq(&self, other: &Self) -> bool {
        self.pointer_eq(other)
    }
}

impl Eq for dyn NodePointer {}

impl Hash for dyn NodePointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pointer_hash(state)
    }
}

/// Open every container between `pointer` and the node it stands for.
pub fn value_pointer(pointer: &Pointer) -> Pointer {
    let mut current = pointer.clone();
    while let Some(next) = current.immediate_value_pointer() {
        if Rc::ptr_eq(&next, &current) {
            break;
        }
        current = next;
    }
    current
}

/// Parent skipping transparent containers.
pub fn node_parent(pointer: &Pointer) -> Option<Pointer> {
    let mut parent = pointer.parent();
    while let Some(p) = parent {
        if !p.is_container() {
            return Some(p);
        }
        parent = p.parent();
    }
    None
}

pub fn root_of(pointer: &Pointer) -> Pointer {
    let mut current = pointer.clone();
    while let Some(parent) = current.parent() {
        current = parent;
    }
    current
}

fn ancestry(pointer: &Pointer) -> Vec<Pointer> {
    let mut chain = vec![pointer.clone()];
    let mut current = pointer.parent();
    while let Some(p) = current {
        current = p.parent();
        chain.push(p);
    }
    chain.reverse();
    chain
}

/// Document order of two pointers.
///
/// Both pointers must live in the same tree: their ancestries are compared
/// down to the first divergence, where the common parent decides.
pub fn compare_pointers(a: &Pointer, b: &Pointer) -> Result<Ordering> {
    if Rc::ptr_eq(a, b) || a == b {
        return Ok(Ordering::Equal);
    }
    let chain_a = ancestry(a);
    let chain_b = ancestry(b);
    let common = chain_a
        .iter()
        .zip(chain_b.iter())
        .take_while(|(x, y)| x == y)
        .count();
    if common == 0 {
        return Err(EvalError::evaluation(format!(
            "cannot compare pointers that do not belong to the same tree: '{}' and '{}'",
            a.as_path(),
            b.as_path()
        )));
    }
    match (chain_a.get(common), chain_b.get(common)) {
        (None, None) => Ok(Ordering::Equal),
        (None, Some(_)) => Ok(Ordering::Less),
        (Some(_), None) => Ok(Ordering::Greater),
        (Some(x), Some(y)) => Ok(chain_a[common - 1].compare_child_pointers(x, y)),
    }
}

/// A backend adapter turning raw host objects into pointers.
pub trait NodePointerFactory: Send + Sync {
    /// Factories are consulted in ascending order.
    fn order(&self) -> i32;

    fn create_node_pointer(
        &self,
        parent: Option<&Pointer>,
        name: &QName,
        bean: &Bean,
    ) -> Option<Pointer>;
}
