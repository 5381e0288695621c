use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::pointer::Pointer;
use crate::value::Value;

/// Chainable prefix/URI resolver.
///
/// A resolver is a cheap handle to a shared scope node. Once a node is
/// sealed, registrations through any handle first copy the node, so
/// holders of the sealed scope never see the change.
#[derive(Clone, Debug, Default)]
pub struct NamespaceResolver {
    node: Rc<ResolverNode>,
}

#[derive(Debug, Default)]
struct ResolverNode {
    parent: Option<NamespaceResolver>,
    explicit: HashMap<String, String>,
    reverse: HashMap<String, String>,
    context_pointer: Option<Pointer>,
    sealed: Cell<bool>,
}

// A copy is never sealed.
impl Clone for ResolverNode {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            explicit: self.explicit.clone(),
            reverse: self.reverse.clone(),
            context_pointer: self.context_pointer.clone(),
            sealed: Cell::new(false),
        }
    }
}

impl NamespaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: NamespaceResolver) -> Self {
        Self {
            node: Rc::new(ResolverNode {
                parent: Some(parent),
                ..ResolverNode::default()
            }),
        }
    }

    pub fn register_namespace(&mut self, prefix: &str, uri: &str) {
        let node = self.node_mut();
        if let Some(old) = node.explicit.insert(prefix.to_string(), uri.to_string()) {
            if node.reverse.get(&old).is_some_and(|p| p == prefix) {
                node.reverse.remove(&old);
            }
        }
        node.reverse.insert(uri.to_string(), prefix.to_string());
    }

    pub fn set_namespace_context_pointer(&mut self, pointer: Option<Pointer>) {
        self.node_mut().context_pointer = pointer;
    }

    pub fn namespace_context_pointer(&self) -> Option<Pointer> {
        self.node.context_pointer.clone()
    }

    /// URI for `prefix`: explicit registrations up the chain first, then
    /// the declarations visible from this scope's context pointer.
    pub fn namespace_uri(&self, prefix: &str) -> Option<String> {
        self.registered_namespace_uri(prefix).or_else(|| {
            self.node
                .context_pointer
                .as_ref()
                .and_then(|p| p.namespace_uri_for(prefix))
        })
    }

    pub fn registered_namespace_uri(&self, prefix: &str) -> Option<String> {
        match self.node.explicit.get(prefix) {
            Some(uri) => Some(uri.clone()),
            None => self
                .node
                .parent
                .as_ref()
                .and_then(|p| p.registered_namespace_uri(prefix)),
        }
    }

    pub fn prefix(&self, uri: &str) -> Option<String> {
        self.registered_prefix(uri).or_else(|| {
            self.node
                .context_pointer
                .as_ref()
                .and_then(|p| declared_prefix(p, uri))
        })
    }

    pub fn registered_prefix(&self, uri: &str) -> Option<String> {
        match self.node.reverse.get(uri) {
            Some(prefix) => Some(prefix.clone()),
            None => self
                .node
                .parent
                .as_ref()
                .and_then(|p| p.registered_prefix(uri)),
        }
    }

    /// Seal this scope and every scope above it.
    pub fn seal(&self) {
        self.node.sealed.set(true);
        if let Some(parent) = &self.node.parent {
            parent.seal();
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.node.sealed.get()
    }

    fn node_mut(&mut self) -> &mut ResolverNode {
        if self.node.sealed.get() {
            self.node = Rc::new(ResolverNode::clone(&self.node));
        }
        Rc::make_mut(&mut self.node)
    }
}

pub(crate) fn declared_prefix(pointer: &Pointer, uri: &str) -> Option<String> {
    let mut current = Some(pointer.clone());
    while let Some(p) = current {
        for ns in p.namespaces() {
            let matches = matches!(ns.value(), Value::String(ref u) if u == uri);
            let prefix = ns.name().local_name().to_string();
            if matches && !prefix.is_empty() {
                return Some(prefix);
            }
        }
        current = p.parent();
    }
    None
}
