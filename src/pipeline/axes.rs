//! Lazy node producers, one per axis, and node-test matching.
//!
//! Forward axes yield in document order; reverse axes (ancestor,
//! preceding, preceding-sibling) yield nearest node first.

use std::iter;

use crate::compiler::ast::NodeTest;
use crate::compiler::{Axis, NodeType};
use crate::pointer::{node_parent, NodeKind, Pointer, Pointers};

pub fn produce(axis: Axis, origin: &Pointer) -> Pointers {
    match axis {
        Axis::Self_ => Box::new(iter::once(origin.clone())),
        Axis::Child => origin.children(),
        Axis::Attribute => origin.attributes(),
        Axis::Namespace => origin.namespaces(),
        Axis::Parent => Box::new(node_parent(origin).into_iter()),
        Axis::Ancestor => ancestors(origin),
        Axis::AncestorOrSelf => Box::new(iter::once(origin.clone()).chain(ancestors(origin))),
        Axis::Descendant => Box::new(Descendants::below(origin)),
        Axis::DescendantOrSelf => descendant_or_self(origin),
        Axis::FollowingSibling => following_siblings(origin),
        Axis::PrecedingSibling => preceding_siblings(origin),
        Axis::Following => following(origin),
        Axis::Preceding => preceding(origin),
    }
}

fn ancestors(origin: &Pointer) -> Pointers {
    Box::new(iter::successors(node_parent(origin), node_parent))
}

fn descendant_or_self(origin: &Pointer) -> Pointers {
    Box::new(iter::once(origin.clone()).chain(Descendants::below(origin)))
}

/// Pre-order walk below a node, holding one child cursor per level.
struct Descendants {
    stack: Vec<Pointers>,
}

impl Descendants {
    fn below(origin: &Pointer) -> Self {
        Self {
            stack: vec![origin.children()],
        }
    }
}

impl Iterator for Descendants {
    type Item = Pointer;

    fn next(&mut self) -> Option<Pointer> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(node) => {
                    self.stack.push(node.children());
                    return Some(node);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

fn has_siblings(origin: &Pointer) -> bool {
    !matches!(origin.kind(), NodeKind::Attribute | NodeKind::Namespace)
}

fn following_siblings(origin: &Pointer) -> Pointers {
    let Some(parent) = node_parent(origin).filter(|_| has_siblings(origin)) else {
        return Box::new(iter::empty());
    };
    let origin = origin.clone();
    Box::new(parent.children().skip_while(move |c| **c != *origin).skip(1))
}

fn preceding_siblings(origin: &Pointer) -> Pointers {
    let Some(parent) = node_parent(origin).filter(|_| has_siblings(origin)) else {
        return Box::new(iter::empty());
    };
    let mut before: Vec<Pointer> = parent.children().take_while(|c| c != origin).collect();
    before.reverse();
    Box::new(before.into_iter())
}

fn following(origin: &Pointer) -> Pointers {
    // An attribute is followed by the content of its element.
    let (head, start): (Pointers, Pointer) = if has_siblings(origin) {
        (Box::new(iter::empty()), origin.clone())
    } else {
        match node_parent(origin) {
            Some(element) => (Box::new(Descendants::below(&element)), element),
            None => return Box::new(iter::empty()),
        }
    };
    let chain = iter::once(start.clone()).chain(iter::successors(node_parent(&start), node_parent));
    Box::new(head.chain(chain.flat_map(|node| {
        following_siblings(&node).flat_map(|sibling| descendant_or_self(&sibling))
    })))
}

fn preceding(origin: &Pointer) -> Pointers {
    let start = if has_siblings(origin) {
        Some(origin.clone())
    } else {
        node_parent(origin)
    };
    let chain = start
        .into_iter()
        .flat_map(|s| iter::once(s.clone()).chain(iter::successors(node_parent(&s), node_parent)));
    Box::new(chain.flat_map(|node| {
        preceding_siblings(&node).flat_map(|sibling| {
            let mut subtree: Vec<Pointer> = descendant_or_self(&sibling).collect();
            subtree.reverse();
            subtree
        })
    }))
}

/// Whether `pointer` passes `test`. Prefixed name tests compare namespace
/// URIs, resolving the test prefix with `resolve`.
pub fn matches(pointer: &Pointer, test: &NodeTest, resolve: &dyn Fn(&str) -> Option<String>) -> bool {
    match test {
        NodeTest::Type(NodeType::Node) => true,
        NodeTest::Type(NodeType::Text) => pointer.kind() == NodeKind::Text,
        NodeTest::Type(NodeType::Comment) => pointer.kind() == NodeKind::Comment,
        NodeTest::Type(NodeType::ProcessingInstruction) => {
            pointer.kind() == NodeKind::ProcessingInstruction
        }
        NodeTest::ProcessingInstruction(target) => {
            pointer.kind() == NodeKind::ProcessingInstruction
                && pointer.name().local_name() == target
        }
        NodeTest::Name(name) => {
            if pointer.is_container()
                || !matches!(
                    pointer.kind(),
                    NodeKind::Element | NodeKind::Attribute | NodeKind::Namespace
                )
            {
                return false;
            }
            let wildcard = name.local_name() == "*";
            if wildcard && name.prefix().is_none() {
                return true;
            }
            let node_name = pointer.name();
            if !wildcard && name.local_name() != node_name.local_name() {
                return false;
            }
            let node_ns = pointer.namespace_uri();
            let test_ns = name.prefix().and_then(resolve);
            test_ns == node_ns || (node_ns.is_none() && name.prefix() == node_name.prefix())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::JsonPointer;
    use crate::qname::QName;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tree() -> Pointer {
        JsonPointer::document(json!({
            "a": {"b": 1, "c": {"d": 2}},
            "e": 3,
            "f": [4, 5]
        }))
    }

    fn paths(it: Pointers) -> Vec<String> {
        it.map(|p| p.as_path()).collect()
    }

    fn node(root: &Pointer, path: &[usize]) -> Pointer {
        let mut current = root.clone();
        for i in path {
            current = current.children().nth(*i).unwrap_or_else(|| panic!("no child {i}"));
        }
        current
    }

    #[test]
    fn descendants_are_pre_order() {
        let root = tree();
        assert_eq!(
            paths(produce(Axis::Descendant, &root)),
            vec!["/a", "/a/b", "/a/c", "/a/c/d", "/e", "/f[1]", "/f[2]"]
        );
    }

    #[test]
    fn reverse_axes_start_nearest() {
        let root = tree();
        let d = node(&root, &[0, 1, 0]);
        assert_eq!(paths(produce(Axis::Ancestor, &d)), vec!["/a/c", "/a", "/"]);
        let f2 = node(&root, &[3]);
        assert_eq!(paths(produce(Axis::PrecedingSibling, &f2)), vec!["/f[1]", "/e", "/a"]);
        assert_eq!(
            paths(produce(Axis::Preceding, &f2)),
            vec!["/f[1]", "/e", "/a/c/d", "/a/c", "/a/b", "/a"]
        );
    }

    #[test]
    fn following_skips_descendants() {
        let root = tree();
        let a = node(&root, &[0]);
        assert_eq!(paths(produce(Axis::Following, &a)), vec!["/e", "/f[1]", "/f[2]"]);
        let b = node(&root, &[0, 0]);
        assert_eq!(paths(produce(Axis::FollowingSibling, &b)), vec!["/a/c"]);
    }

    #[test]
    fn name_tests() {
        let root = tree();
        let a = node(&root, &[0]);
        let none = |_: &str| -> Option<String> { None };
        assert!(matches(&a, &NodeTest::Name(QName::local("a")), &none));
        assert!(matches(&a, &NodeTest::Name(QName::local("*")), &none));
        assert!(!matches(&a, &NodeTest::Name(QName::local("b")), &none));
        assert!(!matches(&root, &NodeTest::Name(QName::local("*")), &none));
        assert!(matches(&root, &NodeTest::Type(NodeType::Node), &none));
        assert!(!matches(&a, &NodeTest::Type(NodeType::Text), &none));
    }
}
