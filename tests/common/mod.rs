//! A small in-memory element tree with namespaces, attributes and text nodes,
//! plugged into the engine through its own factory.

#![allow(dead_code)]

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use object_path_query::{
    Bean, Engine, EngineConfig, NodeKind, NodePointer, NodePointerFactory, PathContext, Pointer, Pointers, QName,
    Result, Value,
};

#[derive(Debug)]
pub enum Node {
    Element(Element),
    Text(RefCell<String>),
}

#[derive(Debug, Default)]
pub struct Element {
    pub name: String,
    pub namespaces: Vec<(String, String)>,
    pub attributes: RefCell<Vec<(String, String)>>,
    pub children: RefCell<Vec<Rc<Node>>>,
}

pub fn elem(name: &str) -> ElementBuilder {
    ElementBuilder(Element {
        name: name.to_string(),
        ..Element::default()
    })
}

pub fn text(t: &str) -> Rc<Node> {
    Rc::new(Node::Text(RefCell::new(t.to_string())))
}

pub struct ElementBuilder(Element);

impl ElementBuilder {
    pub fn ns(mut self, prefix: &str, uri: &str) -> Self {
        self.0.namespaces.push((prefix.to_string(), uri.to_string()));
        self
    }

    pub fn attr(self, name: &str, value: &str) -> Self {
        self.0.attributes.borrow_mut().push((name.to_string(), value.to_string()));
        self
    }

    pub fn child(self, node: impl Into<Rc<Node>>) -> Self {
        self.0.children.borrow_mut().push(node.into());
        self
    }

    pub fn text(self, t: &str) -> Self {
        self.child(text(t))
    }

    pub fn build(self) -> Rc<Node> {
        Rc::new(Node::Element(self.0))
    }
}

impl From<ElementBuilder> for Rc<Node> {
    fn from(b: ElementBuilder) -> Self {
        b.build()
    }
}

/// The host object handed to the factory: a document node.
pub struct TreeDocument(pub Rc<Node>);

#[derive(Clone, PartialEq)]
enum Facet {
    Node,
    Attribute(String),
    Namespace(String, String),
}

#[derive(Clone)]
pub struct TreePointer {
    node: Rc<Node>,
    parent: Option<Pointer>,
    facet: Facet,
}

impl TreePointer {
    pub fn root(node: Rc<Node>) -> Pointer {
        Rc::new(Self {
            node,
            parent: None,
            facet: Facet::Node,
        })
    }

    fn element(&self) -> Option<&Element> {
        match &*self.node {
            Node::Element(e) if self.facet == Facet::Node => Some(e),
            _ => None,
        }
    }

    fn owner(&self) -> Option<&Element> {
        match &*self.node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    fn me(&self) -> Pointer {
        Rc::new(self.clone())
    }

    fn position(&self) -> (u8, usize) {
        match &self.facet {
            Facet::Namespace(prefix, _) => (
                0,
                self.owner()
                    .and_then(|e| e.namespaces.iter().position(|(p, _)| p == prefix))
                    .unwrap_or(0),
            ),
            Facet::Attribute(name) => (
                1,
                self.owner()
                    .and_then(|e| e.attributes.borrow().iter().position(|(n, _)| n == name))
                    .unwrap_or(0),
            ),
            Facet::Node => (
                2,
                self.parent
                    .as_ref()
                    .and_then(|p| p.as_any().downcast_ref::<TreePointer>())
                    .and_then(|p| p.owner())
                    .and_then(|e| e.children.borrow().iter().position(|c| Rc::ptr_eq(c, &self.node)))
                    .unwrap_or(0),
            ),
        }
    }

    fn text_of(node: &Node) -> String {
        match node {
            Node::Text(t) => t.borrow().clone(),
            Node::Element(e) => e.children.borrow().iter().map(|c| Self::text_of(c)).collect(),
        }
    }

    fn parent_element(&self) -> Option<Pointer> {
        match self.facet {
            Facet::Node => self.parent.clone(),
            _ => Some(Rc::new(TreePointer {
                node: self.node.clone(),
                parent: self.parent.clone(),
                facet: Facet::Node,
            })),
        }
    }
}

impl fmt::Debug for TreePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreePointer({})", self.as_path())
    }
}

impl NodePointer for TreePointer {
    fn name(&self) -> QName {
        match (&self.facet, &*self.node) {
            (Facet::Attribute(name), _) => QName::parse(name),
            (Facet::Namespace(prefix, _), _) => QName::local(prefix),
            (Facet::Node, Node::Element(e)) => QName::parse(&e.name),
            (Facet::Node, Node::Text(_)) => QName::local(""),
        }
    }

    fn kind(&self) -> NodeKind {
        match (&self.facet, &*self.node) {
            (Facet::Attribute(_), _) => NodeKind::Attribute,
            (Facet::Namespace(..), _) => NodeKind::Namespace,
            (Facet::Node, Node::Text(_)) => NodeKind::Text,
            (Facet::Node, Node::Element(_)) if self.parent.is_none() => NodeKind::Root,
            (Facet::Node, Node::Element(_)) => NodeKind::Element,
        }
    }

    fn parent(&self) -> Option<Pointer> {
        self.parent_element()
    }

    fn value(&self) -> Value {
        match &self.facet {
            Facet::Attribute(name) => self
                .owner()
                .and_then(|e| {
                    e.attributes
                        .borrow()
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| Value::String(v.clone()))
                })
                .unwrap_or(Value::Null),
            Facet::Namespace(_, uri) => Value::String(uri.clone()),
            Facet::Node => Value::String(Self::text_of(&self.node)),
        }
    }

    fn is_actual(&self) -> bool {
        match &self.facet {
            Facet::Attribute(name) => self
                .owner()
                .is_some_and(|e| e.attributes.borrow().iter().any(|(n, _)| n == name)),
            _ => true,
        }
    }

    fn is_leaf(&self) -> bool {
        self.element().map_or(true, |e| e.children.borrow().is_empty())
    }

    fn children(&self) -> Pointers {
        let Some(e) = self.element() else {
            return Box::new(std::iter::empty());
        };
        let me = self.me();
        let kids: Vec<Pointer> = e
            .children
            .borrow()
            .iter()
            .map(|c| -> Pointer {
                Rc::new(TreePointer {
                    node: c.clone(),
                    parent: Some(me.clone()),
                    facet: Facet::Node,
                })
            })
            .collect();
        Box::new(kids.into_iter())
    }

    fn attributes(&self) -> Pointers {
        let Some(e) = self.element() else {
            return Box::new(std::iter::empty());
        };
        let attrs: Vec<Pointer> = e
            .attributes
            .borrow()
            .iter()
            .filter(|(n, _)| !n.starts_with("xmlns"))
            .map(|(n, _)| -> Pointer {
                Rc::new(TreePointer {
                    node: self.node.clone(),
                    parent: self.parent.clone(),
                    facet: Facet::Attribute(n.clone()),
                })
            })
            .collect();
        Box::new(attrs.into_iter())
    }

    fn namespaces(&self) -> Pointers {
        let Some(e) = self.element() else {
            return Box::new(std::iter::empty());
        };
        let decls: Vec<Pointer> = e
            .namespaces
            .iter()
            .map(|(p, u)| -> Pointer {
                Rc::new(TreePointer {
                    node: self.node.clone(),
                    parent: self.parent.clone(),
                    facet: Facet::Namespace(p.clone(), u.clone()),
                })
            })
            .collect();
        Box::new(decls.into_iter())
    }

    fn namespace_uri(&self) -> Option<String> {
        let name = self.name();
        match (&self.facet, name.prefix()) {
            (Facet::Namespace(..), _) => None,
            (_, Some(prefix)) => self.namespace_uri_for(prefix),
            (Facet::Attribute(_), None) => None,
            (Facet::Node, None) => self.namespace_uri_for(""),
        }
    }

    fn namespace_uri_for(&self, prefix: &str) -> Option<String> {
        if let Some(e) = self.owner() {
            if let Some((_, uri)) = e.namespaces.iter().find(|(p, _)| p == prefix) {
                return Some(uri.clone());
            }
        }
        self.parent
            .as_ref()
            .and_then(|p| p.namespace_uri_for(prefix))
    }

    fn language(&self) -> Option<String> {
        self.owner()
            .and_then(|e| {
                e.attributes
                    .borrow()
                    .iter()
                    .find(|(n, _)| n == "xml:lang")
                    .map(|(_, v)| v.clone())
            })
            .or_else(|| self.parent.as_ref().and_then(|p| p.language()))
    }

    fn compare_child_pointers(&self, a: &Pointer, b: &Pointer) -> Ordering {
        let pos = |p: &Pointer| {
            p.as_any()
                .downcast_ref::<TreePointer>()
                .map(|t| t.position())
                .unwrap_or_default()
        };
        pos(a).cmp(&pos(b))
    }

    fn as_path(&self) -> String {
        let base = self
            .parent_element()
            .filter(|_| self.facet != Facet::Node)
            .or_else(|| self.parent.clone())
            .map(|p| p.as_path())
            .unwrap_or_default();
        let base = if base == "/" { String::new() } else { base };
        let step = match (&self.facet, &*self.node) {
            (Facet::Attribute(n), _) => format!("@{n}"),
            (Facet::Namespace(p, _), _) => format!("namespace::{p}"),
            (Facet::Node, _) if self.parent.is_none() => return "/".to_string(),
            (Facet::Node, node) => {
                let siblings = self
                    .parent
                    .as_ref()
                    .and_then(|p| p.as_any().downcast_ref::<TreePointer>())
                    .and_then(|p| p.owner())
                    .map(|e| e.children.borrow().clone())
                    .unwrap_or_default();
                let same = |c: &Rc<Node>| match (&**c, node) {
                    (Node::Element(x), Node::Element(y)) => x.name == y.name,
                    (Node::Text(_), Node::Text(_)) => true,
                    _ => false,
                };
                let index = siblings
                    .iter()
                    .filter(|c| same(c))
                    .position(|c| Rc::ptr_eq(c, &self.node))
                    .unwrap_or(0)
                    + 1;
                match node {
                    Node::Element(e) => format!("{}[{index}]", e.name),
                    Node::Text(_) => format!("text()[{index}]"),
                }
            }
        };
        format!("{base}/{step}")
    }

    fn set_value(&self, value: &Value) -> Result<()> {
        let content = object_path_query::infoset::string_value(value);
        match (&self.facet, &*self.node) {
            (Facet::Attribute(name), Node::Element(e)) => {
                let mut attrs = e.attributes.borrow_mut();
                match attrs.iter_mut().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = content,
                    None => attrs.push((name.clone(), content)),
                }
                Ok(())
            }
            (Facet::Node, Node::Text(t)) => {
                *t.borrow_mut() = content;
                Ok(())
            }
            (Facet::Node, Node::Element(e)) => {
                *e.children.borrow_mut() = vec![text(&content)];
                Ok(())
            }
            _ => Err(self.unsupported("set a value")),
        }
    }

    fn remove(&self) -> Result<()> {
        match &self.facet {
            Facet::Attribute(name) => {
                if let Some(e) = self.owner() {
                    e.attributes.borrow_mut().retain(|(n, _)| n != name);
                }
                Ok(())
            }
            Facet::Namespace(..) => Err(self.unsupported("remove")),
            Facet::Node => {
                let parent = self
                    .parent
                    .as_ref()
                    .and_then(|p| p.as_any().downcast_ref::<TreePointer>())
                    .and_then(|p| p.owner())
                    .ok_or_else(|| self.unsupported("remove"))?;
                let mut kids = parent.children.borrow_mut();
                let before = kids.len();
                kids.retain(|c| !Rc::ptr_eq(c, &self.node));
                if kids.len() == before {
                    return Err(self.unsupported("remove a detached node"));
                }
                Ok(())
            }
        }
    }

    fn create_child(&self, name: &QName, index: Option<usize>) -> Result<Pointer> {
        let Some(e) = self.element() else {
            return Err(self.unsupported("create a child"));
        };
        let wanted = index.unwrap_or(0);
        let named = |kids: &[Rc<Node>]| {
            kids.iter()
                .filter(|c| matches!(&***c, Node::Element(x) if x.name == name.qualified()))
                .cloned()
                .collect::<Vec<_>>()
        };
        while named(&e.children.borrow()).len() <= wanted {
            e.children.borrow_mut().push(elem(name.qualified()).build());
        }
        let node = named(&e.children.borrow())[wanted].clone();
        Ok(Rc::new(TreePointer {
            node,
            parent: Some(self.me()),
            facet: Facet::Node,
        }))
    }

    fn create_attribute(&self, name: &QName) -> Result<Pointer> {
        let Some(e) = self.element() else {
            return Err(self.unsupported("create an attribute"));
        };
        let key = name.qualified().to_string();
        {
            let mut attrs = e.attributes.borrow_mut();
            if !attrs.iter().any(|(n, _)| *n == key) {
                attrs.push((key.clone(), String::new()));
            }
        }
        Ok(Rc::new(TreePointer {
            node: self.node.clone(),
            parent: self.parent.clone(),
            facet: Facet::Attribute(key),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pointer_eq(&self, other: &dyn NodePointer) -> bool {
        other
            .as_any()
            .downcast_ref::<TreePointer>()
            .is_some_and(|o| Rc::ptr_eq(&self.node, &o.node) && self.facet == o.facet)
    }

    fn pointer_hash(&self, mut state: &mut dyn Hasher) {
        (Rc::as_ptr(&self.node) as *const () as usize).hash(&mut state);
        match &self.facet {
            Facet::Node => 0u8.hash(&mut state),
            Facet::Attribute(n) => n.hash(&mut state),
            Facet::Namespace(p, _) => p.hash(&mut state),
        }
    }
}

pub struct TreeFactory;

impl NodePointerFactory for TreeFactory {
    fn order(&self) -> i32 {
        100
    }

    fn create_node_pointer(&self, _parent: Option<&Pointer>, _name: &QName, bean: &Bean) -> Option<Pointer> {
        let doc = bean.downcast_ref::<TreeDocument>()?;
        Some(TreePointer::root(doc.0.clone()))
    }
}

/// An engine that knows the tree backend as well as JSON.
pub fn tree_engine() -> Arc<Engine> {
    let engine = Engine::new(EngineConfig::default());
    engine.add_factory(Arc::new(TreeFactory));
    Arc::new(engine)
}

/// Context over a document whose single top-level element is `root`.
pub fn tree_context(root: Rc<Node>) -> PathContext {
    let bean: Bean = Rc::new(TreeDocument(elem("").child(root).build()));
    match PathContext::with_engine(tree_engine(), bean) {
        Ok(ctx) => ctx,
        Err(e) => panic!("tree backend rejected: {e}"),
    }
}

/// A catalog with a prefixed namespace, mixed text and language
/// attributes.
pub fn catalog() -> Rc<Node> {
    elem("catalog")
        .ns("pr", "urn:price")
        .attr("xml:lang", "en-GB")
        .child(
            elem("item")
                .attr("id", "i1")
                .child(elem("title").text("Alpha"))
                .child(elem("pr:amount").attr("currency", "EUR").text("10")),
        )
        .child(
            elem("item")
                .attr("id", "i2")
                .attr("xml:lang", "de")
                .child(elem("title").text("Beta"))
                .child(elem("pr:amount").attr("currency", "USD").text("25")),
        )
        .child(
            elem("note")
                .text("first ")
                .child(elem("b").text("bold"))
                .text(" last"),
        )
        .build()
}
