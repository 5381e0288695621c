//! The lazy evaluation pipeline.
//!
//! Every location step (and every predicate) becomes one [`EvalContext`]
//! stage linked to the stage before it. A stage produces one *set* of nodes
//! per node of its parent: `next_set` moves to the next parent node,
//! `next_node` pulls the next match inside the current set. The chain is
//! anchored by an initial stage over a start pointer, whose upstream is the
//! [`RootContext`] of the evaluation.
//!
//! Plain iteration streams results in natural axis order. When a stage
//! requires document order, the first pull drains the whole chain, removes
//! duplicates and sorts.

pub mod axes;

use std::cell::{OnceCell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;
use std::vec;

use itertools::Itertools;
use serde_json::Value as Json;
use tracing::trace;

use crate::compiler::ast::{Expression, NodeTest};
use crate::compiler::Axis;
use crate::context::PathContext;
use crate::errors::{EvalError, Result};
use crate::expression::collapse;
use crate::infoset;
use crate::pointer::{compare_pointers, value_pointer, Pointer, Pointers};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentOrder {
    Unordered,
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SetState {
    NotStarted,
    InSet,
    Exhausted,
}

/// Anchor of a pipeline: the façade being evaluated against and the
/// pointer evaluation started from.
pub struct RootContext {
    context: PathContext,
    pointer: Pointer,
}

impl RootContext {
    pub fn new(context: PathContext, pointer: Pointer) -> Rc<Self> {
        Rc::new(Self { context, pointer })
    }

    pub fn path_context(&self) -> &PathContext {
        &self.context
    }

    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    /// Start pointer for absolute paths.
    pub fn absolute_root_pointer(&self) -> Pointer {
        self.context.root_pointer()
    }

    pub fn namespace_uri(&self, prefix: &str) -> Option<String> {
        self.context.namespace_uri(prefix)
    }
}

enum Upstream {
    Root(Rc<RootContext>),
    Parent(Box<EvalContext>),
}

enum Stage {
    /// A single start node, or the members of a collection held by a
    /// variable.
    Initial {
        start: Pointer,
        members: Option<Vec<Pointer>>,
    },
    /// An already materialized node-set.
    NodeSet {
        pointers: Vec<Pointer>,
        order: DocumentOrder,
    },
    Axis {
        axis: Axis,
        test: NodeTest,
        cursor: Option<Pointers>,
    },
    Predicate {
        predicate: Arc<Expression>,
        positional: bool,
        done: bool,
    },
}

pub struct EvalContext {
    upstream: Upstream,
    stage: Stage,
    root: OnceCell<Rc<RootContext>>,
    position: usize,
    current: Option<Pointer>,
    state: SetState,
    sorted: Option<vec::IntoIter<Pointer>>,
}

impl EvalContext {
    fn with(upstream: Upstream, stage: Stage) -> Self {
        Self {
            upstream,
            stage,
            root: OnceCell::new(),
            position: 0,
            current: None,
            state: SetState::NotStarted,
            sorted: None,
        }
    }

    pub fn initial(root: Rc<RootContext>, start: Pointer) -> Self {
        let members = collection_members(&start);
        Self::with(Upstream::Root(root), Stage::Initial { start, members })
    }

    pub fn from_pointers(root: Rc<RootContext>, pointers: Vec<Pointer>, order: DocumentOrder) -> Self {
        Self::with(Upstream::Root(root), Stage::NodeSet { pointers, order })
    }

    pub fn axis(parent: EvalContext, axis: Axis, test: NodeTest) -> Self {
        Self::with(
            Upstream::Parent(Box::new(parent)),
            Stage::Axis {
                axis,
                test,
                cursor: None,
            },
        )
    }

    /// Filter stage. Numeric values of a context-independent predicate
    /// select by position; anything else is tested for truth.
    pub fn predicate(parent: EvalContext, predicate: Arc<Expression>) -> Self {
        let positional = !predicate.is_context_dependent();
        Self::with(
            Upstream::Parent(Box::new(parent)),
            Stage::Predicate {
                predicate,
                positional,
                done: false,
            },
        )
    }

    /// Take a lazy node-set out of a [`Value::Context`]. A context that is
    /// still shared is drained into a node-set instead.
    pub fn from_shared(ctx: Rc<RefCell<EvalContext>>) -> Result<EvalContext> {
        match Rc::try_unwrap(ctx) {
            Ok(cell) => Ok(cell.into_inner()),
            Err(shared) => {
                let mut shared = shared
                    .try_borrow_mut()
                    .map_err(|_| EvalError::ConcurrentIteration)?;
                let root = shared.root_context();
                let order = shared.document_order();
                let pointers = shared.node_set()?;
                Ok(EvalContext::from_pointers(root, pointers, order))
            }
        }
    }

    pub fn root_context(&self) -> Rc<RootContext> {
        self.root
            .get_or_init(|| match &self.upstream {
                Upstream::Root(root) => root.clone(),
                Upstream::Parent(parent) => parent.root_context(),
            })
            .clone()
    }

    pub fn current_position(&self) -> usize {
        self.position
    }

    fn parent_mut(&mut self) -> Option<&mut EvalContext> {
        match &mut self.upstream {
            Upstream::Parent(parent) => Some(parent),
            Upstream::Root(_) => None,
        }
    }

    /// Move to the next set of candidates. Position restarts at 0.
    pub fn next_set(&mut self) -> Result<bool> {
        self.rewind_set();
        if self.state == SetState::Exhausted {
            return Ok(false);
        }
        let started = self.state == SetState::InSet;
        let found = match self.stage {
            Stage::Initial { .. } | Stage::NodeSet { .. } => !started,
            Stage::Predicate { .. } => match self.parent_mut() {
                Some(parent) => parent.next_set()?,
                None => false,
            },
            Stage::Axis { .. } => match self.parent_mut() {
                Some(parent) => {
                    (started && parent.next_node()?) || first_non_empty_set(parent)?
                }
                None => false,
            },
        };
        self.state = if found {
            SetState::InSet
        } else {
            SetState::Exhausted
        };
        Ok(found)
    }

    /// Advance within the current set.
    pub fn next_node(&mut self) -> Result<bool> {
        if self.state == SetState::Exhausted {
            return Ok(false);
        }
        if self.state == SetState::NotStarted && !self.next_set()? {
            return Ok(false);
        }
        let found = match self.stage {
            Stage::Initial {
                ref start,
                ref members,
            } => match members {
                Some(members) => members.get(self.position).cloned(),
                None => (self.position == 0).then(|| start.clone()),
            },
            Stage::NodeSet { ref pointers, .. } => pointers.get(self.position).cloned(),
            Stage::Axis { .. } => self.next_axis_node()?,
            Stage::Predicate { .. } => self.next_matching_node()?,
        };
        match found {
            Some(pointer) => {
                self.position += 1;
                self.current = Some(pointer);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn next_axis_node(&mut self) -> Result<Option<Pointer>> {
        let root = self.root_context();
        let Stage::Axis { axis, test, cursor } = &mut self.stage else {
            return Ok(None);
        };
        if cursor.is_none() {
            let Upstream::Parent(parent) = &mut self.upstream else {
                return Ok(None);
            };
            let Some(origin) = parent.current_pointer()? else {
                return Ok(None);
            };
            *cursor = Some(axes::produce(*axis, &value_pointer(&origin)));
        }
        let resolve = |prefix: &str| root.namespace_uri(prefix);
        Ok(cursor
            .as_mut()
            .and_then(|it| it.find(|p| axes::matches(p, test, &resolve))))
    }

    fn next_matching_node(&mut self) -> Result<Option<Pointer>> {
        let Stage::Predicate {
            predicate,
            positional,
            done,
        } = &mut self.stage
        else {
            return Ok(None);
        };
        let Upstream::Parent(parent) = &mut self.upstream else {
            return Ok(None);
        };
        if *done {
            return Ok(None);
        }
        while parent.next_node()? {
            let matched = match predicate.compute_value(parent)? {
                Value::Number(n) if *positional => {
                    *done = true;
                    let hit = n.fract() == 0.0 && n >= 1.0 && parent.set_position(n as usize)?;
                    return if hit { parent.current_pointer() } else { Ok(None) };
                }
                Value::Number(n) => n == parent.current_position() as f64,
                other => infoset::boolean_value(&collapse(other)?),
            };
            if matched {
                return parent.current_pointer();
            }
        }
        Ok(None)
    }

    /// The node at the current position; positions on the first node when
    /// iteration has not started.
    pub fn current_pointer(&mut self) -> Result<Option<Pointer>> {
        if let Stage::Initial {
            start,
            members: None,
        } = &self.stage
        {
            return Ok(Some(start.clone()));
        }
        if self.position == 0 && !self.set_position(1)? {
            return Ok(None);
        }
        Ok(self.current.clone())
    }

    /// Jump to the `position`-th node of the current set; 0 rewinds it.
    pub fn set_position(&mut self, position: usize) -> Result<bool> {
        if position == 0 {
            self.rewind_set();
            return Ok(true);
        }
        let direct = match &self.stage {
            Stage::Initial {
                start,
                members: None,
            } => Some((position == 1).then(|| start.clone())),
            Stage::Initial {
                members: Some(members),
                ..
            } => Some(members.get(position - 1).cloned()),
            Stage::NodeSet { pointers, .. } => Some(pointers.get(position - 1).cloned()),
            _ => None,
        };
        if let Some(found) = direct {
            if self.state == SetState::NotStarted {
                self.state = SetState::InSet;
            }
            self.position = position;
            self.current = found;
            return Ok(self.current.is_some());
        }
        if position == self.position {
            return Ok(self.current.is_some());
        }
        if position < self.position {
            self.rewind_set();
        }
        while self.position < position {
            if !self.next_node()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Restart the current set.
    pub fn rewind_set(&mut self) {
        self.position = 0;
        self.current = None;
        match (&mut self.stage, &mut self.upstream) {
            (Stage::Axis { cursor, .. }, _) => *cursor = None,
            (Stage::Predicate { done, .. }, Upstream::Parent(parent)) => {
                *done = false;
                parent.rewind_set();
            }
            _ => {}
        }
    }

    /// Restart the whole pipeline. The next traversal replays the first.
    pub fn reset(&mut self) {
        self.rewind_set();
        self.state = SetState::NotStarted;
        self.sorted = None;
        if let Some(parent) = self.parent_mut() {
            parent.reset();
        }
    }

    pub fn document_order(&self) -> DocumentOrder {
        match &self.stage {
            Stage::Initial { .. } => DocumentOrder::Unordered,
            Stage::NodeSet { order, .. } => *order,
            Stage::Axis {
                axis: Axis::Ancestor | Axis::AncestorOrSelf | Axis::Preceding,
                ..
            } => DocumentOrder::Descending,
            Stage::Axis {
                axis: Axis::Following,
                ..
            } => DocumentOrder::Ascending,
            _ => match &self.upstream {
                Upstream::Parent(parent) if parent.is_child_ordering_required() => {
                    DocumentOrder::Ascending
                }
                _ => DocumentOrder::Unordered,
            },
        }
    }

    pub fn is_child_ordering_required(&self) -> bool {
        matches!(
            self.stage,
            Stage::Axis {
                axis: Axis::Descendant | Axis::DescendantOrSelf,
                ..
            }
        ) || self.document_order() != DocumentOrder::Unordered
    }

    /// All nodes of the current set. The caller's position is restored.
    pub fn context_node_list(&mut self) -> Result<Vec<Pointer>> {
        let saved = self.position;
        if saved != 0 {
            self.set_position(0)?;
        }
        let mut list = Vec::new();
        while self.next_node()? {
            list.extend(self.current.clone());
        }
        self.set_position(saved)?;
        Ok(list)
    }

    /// Every node of every set, in document order when the stage needs it.
    ///
    /// Fails while an iteration is in progress; leaves the pipeline reset.
    pub fn node_set(&mut self) -> Result<Vec<Pointer>> {
        if self.position != 0 {
            return Err(EvalError::ConcurrentIteration);
        }
        let order = self.document_order();
        let all = self.drain();
        self.reset();
        let all = all?;
        match order {
            DocumentOrder::Unordered => Ok(all),
            order => sort_in_document_order(all, order),
        }
    }

    /// First node across sets, from a fresh start.
    pub fn single_node_pointer(&mut self) -> Result<Option<Pointer>> {
        self.reset();
        while self.next_set()? {
            if self.next_node()? {
                return Ok(self.current.clone());
            }
        }
        Ok(None)
    }

    fn drain(&mut self) -> Result<Vec<Pointer>> {
        let mut all = Vec::new();
        while self.next_set()? {
            while self.next_node()? {
                all.extend(self.current.clone());
            }
        }
        Ok(all)
    }

    fn advance(&mut self) -> Result<bool> {
        if self.position != 0 && self.next_node()? {
            return Ok(true);
        }
        while self.next_set()? {
            if self.next_node()? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn first_non_empty_set(ctx: &mut EvalContext) -> Result<bool> {
    while ctx.next_set()? {
        if ctx.next_node()? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn collection_members(start: &Pointer) -> Option<Vec<Pointer>> {
    if !start.is_variable() {
        return None;
    }
    let target = value_pointer(start);
    match target.value() {
        Value::Object(Json::Array(_)) => Some(target.children().collect()),
        _ => None,
    }
}

/// De-duplicate and sort `pointers`, reversed for descending order.
pub fn sort_in_document_order(pointers: Vec<Pointer>, order: DocumentOrder) -> Result<Vec<Pointer>> {
    let mut list: Vec<Pointer> = pointers.into_iter().unique().collect();
    let mut failure = None;
    list.sort_by(|a, b| match compare_pointers(a, b) {
        Ok(ordering) => ordering,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if order == DocumentOrder::Descending {
        list.reverse();
    }
    Ok(list)
}

impl Iterator for EvalContext {
    type Item = Result<Pointer>;

    fn next(&mut self) -> Option<Result<Pointer>> {
        if self.sorted.is_none() && self.document_order() != DocumentOrder::Unordered {
            let order = self.document_order();
            let sorted = self
                .drain()
                .and_then(|all| sort_in_document_order(all, order));
            match sorted {
                Ok(list) => {
                    trace!(count = list.len(), ?order, "materialized node set");
                    self.sorted = Some(list.into_iter());
                }
                Err(err) => {
                    self.sorted = Some(Vec::new().into_iter());
                    return Some(Err(err));
                }
            }
        }
        if let Some(sorted) = &mut self.sorted {
            return sorted.next().map(Ok);
        }
        match self.advance() {
            Ok(true) => self.current.clone().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::NodeTest;
    use crate::compiler::NodeType;
    use crate::qname::QName;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn root() -> (PathContext, Rc<RootContext>) {
        let ctx = PathContext::new(json!({
            "a": [{"b": 1}, {"b": 2}, {"b": 3}],
            "c": {"d": {"e": 4}}
        }));
        let root = RootContext::new(ctx.clone(), ctx.context_pointer());
        (ctx, root)
    }

    fn name(n: &str) -> NodeTest {
        NodeTest::Name(QName::local(n))
    }

    fn child_b_of_a(root: &Rc<RootContext>) -> EvalContext {
        let start = EvalContext::initial(root.clone(), root.pointer().clone());
        let a = EvalContext::axis(start, Axis::Child, name("a"));
        EvalContext::axis(a, Axis::Child, name("b"))
    }

    fn paths(ctx: &mut EvalContext) -> Vec<String> {
        ctx.map(|p| p.map(|p| p.as_path()).unwrap_or_else(|e| e.to_string()))
            .collect()
    }

    #[test]
    fn one_set_per_parent_node() {
        let (_, root) = root();
        let mut ctx = child_b_of_a(&root);
        let mut sets = Vec::new();
        while ctx.next_set().unwrap_or(false) {
            sets.push(ctx.context_node_list().map(|l| l.len()).unwrap_or(0));
        }
        assert_eq!(sets, vec![1, 1, 1]);
    }

    #[test]
    fn reset_replays_the_traversal() {
        let (_, root) = root();
        let mut ctx = child_b_of_a(&root);
        let first = paths(&mut ctx);
        ctx.reset();
        assert_eq!(paths(&mut ctx), first);
        assert_eq!(first, vec!["/a[1]/b", "/a[2]/b", "/a[3]/b"]);
    }

    #[test]
    fn node_set_refuses_a_started_iteration() {
        let (_, root) = root();
        let mut ctx = child_b_of_a(&root);
        assert!(ctx.next().is_some());
        assert!(matches!(ctx.node_set(), Err(EvalError::ConcurrentIteration)));
    }

    #[test]
    fn node_set_leaves_the_context_reusable() {
        let (_, root) = root();
        let mut ctx = child_b_of_a(&root);
        assert_eq!(ctx.node_set().map(|s| s.len()).ok(), Some(3));
        assert_eq!(ctx.current_position(), 0);
        assert_eq!(ctx.node_set().map(|s| s.len()).ok(), Some(3));
    }

    #[test]
    fn context_node_list_restores_position() {
        let (_, root) = root();
        let start = EvalContext::initial(root.clone(), root.pointer().clone());
        let mut ctx = EvalContext::axis(start, Axis::Child, name("a"));
        assert!(ctx.next_set().unwrap_or(false));
        assert!(ctx.set_position(2).unwrap_or(false));
        assert_eq!(ctx.context_node_list().map(|l| l.len()).ok(), Some(3));
        assert_eq!(ctx.current_position(), 2);
        let current = ctx.current_pointer().ok().flatten().map(|p| p.as_path());
        assert_eq!(current.as_deref(), Some("/a[2]"));
    }

    #[test]
    fn descendant_steps_are_sorted_and_unique() {
        let (_, root) = root();
        let start = EvalContext::initial(root.clone(), root.pointer().clone());
        let all = EvalContext::axis(start, Axis::DescendantOrSelf, NodeTest::Type(NodeType::Node));
        let mut ctx = EvalContext::axis(all, Axis::DescendantOrSelf, name("e"));
        assert_eq!(ctx.document_order(), DocumentOrder::Ascending);
        assert_eq!(paths(&mut ctx), vec!["/c/d/e"]);
    }

    #[test]
    fn ancestors_come_out_nearest_first() {
        let (_, root) = root();
        let start = EvalContext::initial(root.clone(), root.pointer().clone());
        let e = EvalContext::axis(start, Axis::Descendant, name("e"));
        let mut ctx = EvalContext::axis(e, Axis::Ancestor, NodeTest::Type(NodeType::Node));
        assert_eq!(ctx.document_order(), DocumentOrder::Descending);
        assert_eq!(paths(&mut ctx), vec!["/c/d", "/c", "/"]);
    }

    #[test]
    fn single_node_pointer_restarts() {
        let (_, root) = root();
        let mut ctx = child_b_of_a(&root);
        let _ = ctx.next();
        let _ = ctx.next();
        let first = ctx.single_node_pointer().ok().flatten().map(|p| p.as_path());
        assert_eq!(first.as_deref(), Some("/a[1]/b"));
    }
}
