//! Pointers into a shared, mutable `serde_json::Value` document.
//!
//! Objects are elements whose members are child elements; scalar members
//! are also exposed as attributes. A member holding an array is flattened:
//! every element becomes a child named after the member, so `items[2]`
//! addresses the second array element. Arrays that are not object members
//! yield anonymous children, addressed as `node()[n]`.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde_json::{Map, Value as Json};

use super::{Bean, NodeKind, NodePointer, NodePointerFactory, Pointer, Pointers};
use crate::errors::{EvalError, Result};
use crate::qname::QName;
use crate::value::Value;

/// Factories for dynamic records rank ahead of generic bean-like backends.
pub const JSON_FACTORY_ORDER: i32 = 800;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Segment {
    Key(String),
    Index(usize),
}

pub struct JsonPointer {
    doc: Rc<RefCell<Json>>,
    path: Vec<Segment>,
    attribute: bool,
    base: Option<Pointer>,
    root_name: QName,
}

impl JsonPointer {
    /// Root pointer over a fresh document.
    pub fn document(json: Json) -> Pointer {
        Self::root(Rc::new(RefCell::new(json)), None, QName::local(""))
    }

    /// Root pointer over a shared document. `base` is the container the
    /// document sits in, if any; paths are then reported relative to it.
    pub fn root(doc: Rc<RefCell<Json>>, base: Option<Pointer>, name: QName) -> Pointer {
        Rc::new(Self {
            doc,
            path: Vec::new(),
            attribute: false,
            base,
            root_name: name,
        })
    }

    pub fn document_handle(&self) -> Rc<RefCell<Json>> {
        self.doc.clone()
    }

    fn at(&self, path: Vec<Segment>, attribute: bool) -> Pointer {
        Rc::new(Self {
            doc: self.doc.clone(),
            path,
            attribute,
            base: self.base.clone(),
            root_name: self.root_name.clone(),
        })
    }

    fn extended(&self, segments: &[Segment], attribute: bool) -> Pointer {
        let mut path = self.path.clone();
        path.extend_from_slice(segments);
        self.at(path, attribute)
    }

    fn with_node<R>(&self, f: impl FnOnce(Option<&Json>) -> R) -> R {
        let doc = self.doc.borrow();
        f(resolve(&doc, &self.path))
    }

    // Key-tailed pointers to arrays stand for the whole member; only
    // anonymous arrays expose their elements as children.
    fn is_member_collection(&self) -> bool {
        matches!(self.path.last(), Some(Segment::Key(_)))
    }

    fn key_position(&self, key: &str) -> usize {
        self.with_node(|node| {
            node.and_then(Json::as_object)
                .and_then(|map| map.keys().position(|k| k == key))
        })
        .unwrap_or(usize::MAX)
    }

    fn child_order(&self, child: &JsonPointer) -> (u8, usize, usize) {
        let depth = self.path.len();
        match child.path.get(depth) {
            Some(Segment::Key(key)) => {
                let index = match child.path.get(depth + 1) {
                    Some(Segment::Index(i)) => *i,
                    _ => 0,
                };
                (u8::from(!child.attribute), self.key_position(key), index)
            }
            Some(Segment::Index(i)) => (1, *i, 0),
            None => (0, 0, 0),
        }
    }

    fn missing(&self) -> EvalError {
        EvalError::evaluation(format!("no node at {}", self.as_path()))
    }
}

fn resolve<'a>(mut node: &'a Json, path: &[Segment]) -> Option<&'a Json> {
    for segment in path {
        node = match segment {
            Segment::Key(k) => node.as_object()?.get(k)?,
            Segment::Index(i) => node.as_array()?.get(*i)?,
        };
    }
    Some(node)
}

fn resolve_mut<'a>(mut node: &'a mut Json, path: &[Segment]) -> Option<&'a mut Json> {
    for segment in path {
        node = match segment {
            Segment::Key(k) => node.as_object_mut()?.get_mut(k)?,
            Segment::Index(i) => node.as_array_mut()?.get_mut(*i)?,
        };
    }
    Some(node)
}

fn is_qname(key: &str) -> bool {
    let ncname = |s: &str| {
        let mut chars = s.chars();
        chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    match key.split_once(':') {
        Some((prefix, local)) => ncname(prefix) && ncname(local),
        None => ncname(key),
    }
}

fn name_step(key: &str) -> String {
    if is_qname(key) {
        key.to_string()
    } else if key.contains('\'') {
        format!("*[name()=\"{key}\"]")
    } else {
        format!("*[name()='{key}']")
    }
}

impl fmt::Debug for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonPointer")
            .field("path", &self.as_path())
            .finish()
    }
}

impl NodePointer for JsonPointer {
    fn name(&self) -> QName {
        let tail = self.path.len().checked_sub(1).map(|i| (i, &self.path[i]));
        match tail {
            None => match &self.base {
                Some(base) => base.name(),
                None => self.root_name.clone(),
            },
            Some((_, Segment::Key(k))) => QName::parse(k),
            Some((i, Segment::Index(_))) => match i.checked_sub(1).map(|j| &self.path[j]) {
                Some(Segment::Key(k)) => QName::parse(k),
                _ => QName::local(""),
            },
        }
    }

    fn kind(&self) -> NodeKind {
        if self.attribute {
            NodeKind::Attribute
        } else if self.path.is_empty() && self.base.is_none() {
            NodeKind::Root
        } else {
            NodeKind::Element
        }
    }

    fn parent(&self) -> Option<Pointer> {
        if self.path.is_empty() {
            return self.base.clone();
        }
        if self.attribute {
            return Some(self.at(self.path[..self.path.len() - 1].to_vec(), false));
        }
        let n = self.path.len();
        let drop = match (&self.path[n - 1], n.checked_sub(2).map(|i| &self.path[i])) {
            (Segment::Index(_), Some(Segment::Key(_))) => 2,
            _ => 1,
        };
        Some(self.at(self.path[..n - drop].to_vec(), false))
    }

    fn value(&self) -> Value {
        self.with_node(|node| node.map(Value::from).unwrap_or(Value::Null))
    }

    fn is_actual(&self) -> bool {
        self.with_node(|node| node.is_some())
    }

    fn is_leaf(&self) -> bool {
        self.with_node(|node| !matches!(node, Some(Json::Object(_)) | Some(Json::Array(_))))
    }

    fn children(&self) -> Pointers {
        if self.attribute {
            return Box::new(std::iter::empty());
        }
        let segments: Vec<Vec<Segment>> = self.with_node(|node| match node {
            Some(Json::Object(map)) => map
                .iter()
                .flat_map(|(k, v)| match v {
                    Json::Array(items) => (0..items.len())
                        .map(|i| vec![Segment::Key(k.clone()), Segment::Index(i)])
                        .collect::<Vec<_>>(),
                    _ => vec![vec![Segment::Key(k.clone())]],
                })
                .collect(),
            Some(Json::Array(items)) if !self.is_member_collection() => {
                (0..items.len()).map(|i| vec![Segment::Index(i)]).collect()
            }
            _ => Vec::new(),
        });
        let pointers: Vec<Pointer> = segments
            .iter()
            .map(|s| self.extended(s, false))
            .collect();
        Box::new(pointers.into_iter())
    }

    fn attributes(&self) -> Pointers {
        if self.attribute {
            return Box::new(std::iter::empty());
        }
        let keys: Vec<String> = self.with_node(|node| match node {
            Some(Json::Object(map)) => map
                .iter()
                .filter(|(_, v)| !v.is_array())
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        });
        let pointers: Vec<Pointer> = keys
            .into_iter()
            .map(|k| self.extended(&[Segment::Key(k)], true))
            .collect();
        Box::new(pointers.into_iter())
    }

    fn compare_child_pointers(&self, a: &Pointer, b: &Pointer) -> Ordering {
        match (
            a.as_any().downcast_ref::<JsonPointer>(),
            b.as_any().downcast_ref::<JsonPointer>(),
        ) {
            (Some(a), Some(b)) => self.child_order(a).cmp(&self.child_order(b)),
            _ => Ordering::Equal,
        }
    }

    fn as_path(&self) -> String {
        let mut out = self.base.as_ref().map(|b| b.as_path()).unwrap_or_default();
        let last = self.path.len().saturating_sub(1);
        let mut i = 0;
        while i < self.path.len() {
            match &self.path[i] {
                Segment::Key(k) => {
                    let step = name_step(k);
                    if let Some(Segment::Index(n)) = self.path.get(i + 1) {
                        out.push_str(&format!("/{step}[{}]", n + 1));
                        i += 2;
                        continue;
                    }
                    if self.attribute && i == last {
                        out.push_str(&format!("/@{step}"));
                    } else {
                        out.push_str(&format!("/{step}"));
                    }
                }
                // Elements of a collection held by a container are
                // addressed by position on the container itself.
                Segment::Index(n) if i == 0 && self.base.is_some() => {
                    out.push_str(&format!("[{}]", n + 1))
                }
                Segment::Index(n) => out.push_str(&format!("/node()[{}]", n + 1)),
            }
            i += 1;
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    fn set_value(&self, value: &Value) -> Result<()> {
        let json = value.to_json();
        let mut doc = self.doc.borrow_mut();
        let slot = resolve_mut(&mut doc, &self.path).ok_or_else(|| self.missing())?;
        *slot = json;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let Some((last, parent_path)) = self.path.split_last() else {
            return Err(self.unsupported("remove"));
        };
        let mut doc = self.doc.borrow_mut();
        let removed = match (resolve_mut(&mut doc, parent_path), last) {
            (Some(Json::Object(map)), Segment::Key(k)) => map.shift_remove(k).is_some(),
            (Some(Json::Array(items)), Segment::Index(i)) if *i < items.len() => {
                items.remove(*i);
                true
            }
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            drop(doc);
            Err(self.missing())
        }
    }

    fn create_child(&self, name: &QName, index: Option<usize>) -> Result<Pointer> {
        let key = name.qualified().to_string();
        let segments = {
            let mut doc = self.doc.borrow_mut();
            let Some(node) = resolve_mut(&mut doc, &self.path) else {
                return Err(self.missing());
            };
            if node.is_null() {
                *node = Json::Object(Map::new());
            }
            let Json::Object(map) = node else {
                return Err(self.unsupported(&format!("create child '{key}'")));
            };
            match index.unwrap_or(0) {
                0 => match map.get_mut(&key) {
                    None => {
                        map.insert(key.clone(), Json::Null);
                        vec![Segment::Key(key)]
                    }
                    Some(Json::Array(items)) => {
                        if items.is_empty() {
                            items.push(Json::Null);
                        }
                        vec![Segment::Key(key), Segment::Index(0)]
                    }
                    Some(_) => vec![Segment::Key(key)],
                },
                i => {
                    let slot = map.entry(key.clone()).or_insert(Json::Null);
                    if !slot.is_array() {
                        let old = std::mem::take(slot);
                        *slot = Json::Array(if old.is_null() { Vec::new() } else { vec![old] });
                    }
                    if let Json::Array(items) = slot {
                        while items.len() <= i {
                            items.push(Json::Null);
                        }
                    }
                    vec![Segment::Key(key), Segment::Index(i)]
                }
            }
        };
        Ok(self.extended(&segments, false))
    }

    fn create_attribute(&self, name: &QName) -> Result<Pointer> {
        let key = name.qualified().to_string();
        {
            let mut doc = self.doc.borrow_mut();
            let Some(node) = resolve_mut(&mut doc, &self.path) else {
                return Err(self.missing());
            };
            if node.is_null() {
                *node = Json::Object(Map::new());
            }
            let Json::Object(map) = node else {
                return Err(self.unsupported(&format!("create attribute '{key}'")));
            };
            map.entry(key.clone()).or_insert(Json::Null);
        }
        Ok(self.extended(&[Segment::Key(key)], true))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pointer_eq(&self, other: &dyn NodePointer) -> bool {
        other
            .as_any()
            .downcast_ref::<JsonPointer>()
            .is_some_and(|o| {
                Rc::ptr_eq(&self.doc, &o.doc) && self.path == o.path && self.attribute == o.attribute
            })
    }

    fn pointer_hash(&self, mut state: &mut dyn Hasher) {
        (Rc::as_ptr(&self.doc) as *const () as usize).hash(&mut state);
        self.path.hash(&mut state);
        self.attribute.hash(&mut state);
    }
}

/// Wraps `RefCell<serde_json::Value>` beans (shared, mutable documents) and
/// plain `serde_json::Value` beans (copied into a fresh document).
#[derive(Debug, Default)]
pub struct JsonPointerFactory;

impl NodePointerFactory for JsonPointerFactory {
    fn order(&self) -> i32 {
        JSON_FACTORY_ORDER
    }

    fn create_node_pointer(
        &self,
        parent: Option<&Pointer>,
        name: &QName,
        bean: &Bean,
    ) -> Option<Pointer> {
        let doc = match bean.clone().downcast::<RefCell<Json>>() {
            Ok(doc) => doc,
            Err(bean) => Rc::new(RefCell::new(bean.downcast_ref::<Json>()?.clone())),
        };
        Some(JsonPointer::root(doc, parent.cloned(), name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn paths(it: Pointers) -> Vec<String> {
        it.map(|p| p.as_path()).collect()
    }

    #[test]
    fn arrays_are_flattened_into_named_children() {
        let root = JsonPointer::document(json!({"a": 1, "items": [10, 20], "odd key": true}));
        assert_eq!(
            paths(root.children()),
            vec!["/a", "/items[1]", "/items[2]", "/*[name()='odd key']"]
        );
        assert_eq!(paths(root.attributes()), vec!["/@a", "/@*[name()='odd key']"]);
        let second = root.children().nth(2).map(|p| p.value());
        assert_eq!(second, Some(Value::Number(20.0)));
    }

    #[test]
    fn anonymous_array_children() {
        let root = JsonPointer::document(json!([[1, 2], 3]));
        let kids: Vec<Pointer> = root.children().collect();
        assert_eq!(kids[0].as_path(), "/node()[1]");
        assert_eq!(paths(kids[0].children()), vec!["/node()[1]/node()[1]", "/node()[1]/node()[2]"]);
        assert_eq!(kids[1].name().local_name(), "");
    }

    #[test]
    fn parent_of_member_skips_the_array() {
        let root = JsonPointer::document(json!({"items": [{"x": 1}]}));
        let item = root.children().next();
        let parent = item.and_then(|p| p.parent());
        assert_eq!(parent.map(|p| p.as_path()), Some("/".to_string()));
    }

    #[test]
    fn create_child_pads_arrays() {
        let doc = Rc::new(RefCell::new(json!({"a": 5})));
        let root = JsonPointer::root(doc.clone(), None, QName::local(""));
        let created = root.create_child(&QName::local("a"), Some(2));
        assert_eq!(created.map(|p| p.as_path()).ok(), Some("/a[3]".to_string()));
        assert_eq!(*doc.borrow(), json!({"a": [5, null, null]}));

        let fresh = root.create_child(&QName::local("b"), None);
        assert_eq!(fresh.map(|p| p.as_path()).ok(), Some("/b".to_string()));
        assert_eq!(*doc.borrow(), json!({"a": [5, null, null], "b": null}));
    }

    #[test]
    fn remove_keeps_member_order() {
        let doc = Rc::new(RefCell::new(json!({"a": 1, "b": 2, "c": 3})));
        let root = JsonPointer::root(doc.clone(), None, QName::local(""));
        let b = root.children().nth(1);
        assert!(b.map(|p| p.remove().is_ok()).unwrap_or(false));
        assert_eq!(doc.borrow().to_string(), r#"{"a":1,"c":3}"#);
    }

    #[test]
    fn scalars_cannot_grow_children() {
        let root = JsonPointer::document(json!({"a": 1}));
        let a = root.children().next();
        let err = a.map(|p| p.create_child(&QName::local("x"), None).is_err());
        assert_eq!(err, Some(true));
    }
}
