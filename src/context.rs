//! The path context: the entry point for reading and changing an object
//! graph with path expressions.
//!
//! A [`PathContext`] pairs a context node with the settings an evaluation
//! needs (variables, functions, namespaces, lenient mode, locale, decimal
//! formats, key and identity managers). Relative contexts made with
//! [`PathContext::relative_context`] fall back to their parent for every
//! setting they do not override.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tracing::debug;

use crate::compiler::ast::{Expression, LocationPath, NodeTest, Step};
use crate::compiler::Axis;
use crate::engine::Engine;
use crate::errors::{EvalError, Result};
use crate::expression::{PointerIter, Values};
use crate::functions::{DecimalSymbols, Function, FunctionLibrary};
use crate::infoset::{self, string_value};
use crate::namespace::{declared_prefix, NamespaceResolver};
use crate::pipeline::{axes, sort_in_document_order, DocumentOrder, EvalContext, RootContext};
use crate::pointer::{root_of, value_pointer, Bean, JsonPointer, NullPointer, Pointer, VariablePointer};
use crate::qname::QName;
use crate::value::Value;
use crate::variables::Variables;

/// Looks nodes up by a named key.
pub trait KeyManager {
    fn pointer_by_key(&self, ctx: &PathContext, key: &str, value: &str) -> Result<Option<Pointer>>;

    /// Every node with `key` equal to `value`. Defaults to the single
    /// pointer found for the string value.
    fn node_set_by_key(&self, ctx: &PathContext, key: &str, value: &Value) -> Result<Vec<Pointer>> {
        Ok(self
            .pointer_by_key(ctx, key, &string_value(value))?
            .into_iter()
            .collect())
    }
}

/// Looks nodes up by identifier, for `id()`.
pub trait IdentityManager {
    fn pointer_by_id(&self, ctx: &PathContext, id: &str) -> Result<Option<Pointer>>;
}

static BUILTIN_FUNCTIONS: LazyLock<FunctionLibrary> = LazyLock::new(FunctionLibrary::with_builtins);

#[derive(Clone)]
pub struct PathContext {
    engine: Arc<Engine>,
    parent: Option<Rc<PathContext>>,
    context_pointer: Pointer,
    root_pointer: Pointer,
    variables: Rc<RefCell<Variables>>,
    functions: Option<FunctionLibrary>,
    namespaces: NamespaceResolver,
    lenient: Option<bool>,
    locale: Option<String>,
    decimal_formats: Rc<HashMap<String, DecimalSymbols>>,
    key_manager: Option<Rc<dyn KeyManager>>,
    identity_manager: Option<Rc<dyn IdentityManager>>,
}

/// A compiled path bound to its source text, reusable across contexts.
#[derive(Clone, Debug)]
pub struct CompiledExpression {
    text: String,
    expr: Arc<Expression>,
}

impl PathContext {
    /// Context over a JSON document, using the shared engine.
    pub fn new(json: Json) -> Self {
        Self::from_document(Rc::new(RefCell::new(json)))
    }

    /// Context over a document the caller keeps a handle to.
    pub fn from_document(doc: Rc<RefCell<Json>>) -> Self {
        let root = JsonPointer::root(doc, None, QName::local(""));
        Self::at(Engine::shared(), None, root.clone(), root)
    }

    /// Context over any host object a factory of `engine` accepts.
    pub fn with_engine(engine: Arc<Engine>, bean: Bean) -> Result<Self> {
        let root = engine.new_node_pointer(None, &QName::local(""), &bean)?;
        Ok(Self::at(engine, None, root.clone(), root))
    }

    fn at(engine: Arc<Engine>, parent: Option<Rc<PathContext>>, context_pointer: Pointer, root_pointer: Pointer) -> Self {
        let namespaces = match &parent {
            Some(p) => NamespaceResolver::with_parent(p.namespaces.clone()),
            None => NamespaceResolver::new(),
        };
        Self {
            engine,
            parent,
            context_pointer,
            root_pointer,
            variables: Rc::new(RefCell::new(Variables::new())),
            functions: None,
            namespaces,
            lenient: None,
            locale: None,
            decimal_formats: Rc::new(HashMap::new()),
            key_manager: None,
            identity_manager: None,
        }
    }

    /// A child context positioned at `pointer`. The parent's settings are
    /// inherited; its namespace registrations are frozen for the child.
    pub fn relative_context(&self, pointer: Pointer) -> PathContext {
        self.namespaces.seal();
        let root = root_of(&pointer);
        Self::at(self.engine.clone(), Some(Rc::new(self.clone())), pointer, root)
    }

    pub fn parent(&self) -> Option<&PathContext> {
        self.parent.as_deref()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn context_pointer(&self) -> Pointer {
        self.context_pointer.clone()
    }

    pub fn root_pointer(&self) -> Pointer {
        self.root_pointer.clone()
    }

    fn chain(&self) -> impl Iterator<Item = &PathContext> {
        iter::successors(Some(self), |c| c.parent.as_deref())
    }

    fn evaluation(&self) -> EvalContext {
        let root = RootContext::new(self.clone(), self.context_pointer.clone());
        EvalContext::initial(root, self.context_pointer.clone())
    }

    pub fn compile(&self, xpath: &str) -> Result<CompiledExpression> {
        let expr = self.engine.compile(xpath).map_err(|e| e.at_path(xpath))?;
        Ok(CompiledExpression {
            text: xpath.to_string(),
            expr,
        })
    }

    /// The value at `xpath`. In strict mode a path that selects nothing is
    /// an error; in lenient mode it is `Null`.
    pub fn get_value(&self, xpath: &str) -> Result<Value> {
        self.compile(xpath)?.get_value(self)
    }

    /// The value at `xpath`, converted to `T`.
    pub fn get_value_as<T: DeserializeOwned>(&self, xpath: &str) -> Result<T> {
        self.compile(xpath)?.get_value_as(self)
    }

    pub fn iterate(&self, xpath: &str) -> Result<Values> {
        self.compile(xpath)?.iterate(self)
    }

    pub fn get_pointer(&self, xpath: &str) -> Result<Option<Pointer>> {
        self.compile(xpath)?.get_pointer(self)
    }

    pub fn iterate_pointers(&self, xpath: &str) -> Result<PointerIter> {
        self.compile(xpath)?.iterate_pointers(self)
    }

    /// Values of every node `xpath` selects.
    pub fn select_nodes(&self, xpath: &str) -> Result<Vec<Value>> {
        self.iterate_pointers(xpath)?
            .map(|p| p.map(|p| value_pointer(&p).value()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.at_path(xpath))
    }

    pub fn select_single_node(&self, xpath: &str) -> Result<Value> {
        Ok(match self.get_pointer(xpath)? {
            Some(p) => value_pointer(&p).value(),
            None => Value::Null,
        })
    }

    fn value_of(&self, compiled: &CompiledExpression) -> Result<Value> {
        debug!(xpath = %compiled.text, "get value");
        let mut ctx = self.evaluation();
        let result = compiled.expr.compute_value(&mut ctx)?;
        let result = match result {
            Value::Context(shared) => match infoset::single_pointer(&shared) {
                Some(p) => Value::Pointer(p),
                None => Value::Null,
            },
            other => other,
        };
        match result {
            Value::Null if is_path(&compiled.expr) => self.absent(compiled, Value::Null),
            Value::Pointer(p) => {
                let target = value_pointer(&p);
                if target.is_actual() {
                    Ok(target.value())
                } else {
                    self.absent(compiled, Value::Null)
                }
            }
            other => Ok(other),
        }
    }

    fn absent<T>(&self, compiled: &CompiledExpression, lenient: T) -> Result<T> {
        if self.is_lenient() {
            Ok(lenient)
        } else {
            Err(EvalError::NotFound {
                path: compiled.text.clone(),
            })
        }
    }

    fn pointer_of(&self, compiled: &CompiledExpression) -> Result<Option<Pointer>> {
        debug!(xpath = %compiled.text, "get pointer");
        let mut ctx = self.evaluation();
        let pointer = match compiled.expr.compute(&mut ctx)? {
            Value::Context(shared) => {
                let mut nodes = shared
                    .try_borrow_mut()
                    .map_err(|_| EvalError::ConcurrentIteration)?;
                nodes.single_node_pointer()?
            }
            Value::Pointer(p) => Some(p),
            Value::Null => None,
            other => Some(self.wrap_value(other)?),
        };
        match pointer {
            Some(p) if p.is_actual() || self.is_lenient() => Ok(Some(p)),
            _ => self.absent(compiled, None),
        }
    }

    /// Wrap a plain value in a pointer through the factory registry.
    pub fn wrap_value(&self, value: Value) -> Result<Pointer> {
        match value {
            Value::Pointer(p) => Ok(p),
            Value::Context(shared) => {
                Ok(infoset::single_pointer(&shared).unwrap_or_else(NullPointer::empty))
            }
            Value::Null => Ok(NullPointer::empty()),
            other => {
                let bean: Bean = Rc::new(RefCell::new(other.to_json()));
                self.engine.new_node_pointer(None, &QName::local(""), &bean)
            }
        }
    }

    /// Replace the value at `xpath`, which must exist.
    pub fn set_value(&self, xpath: &str, value: impl Into<Value>) -> Result<()> {
        self.compile(xpath)?.set_value(self, value)
    }

    /// Make sure the nodes `xpath` names exist, creating missing ones.
    pub fn create_path(&self, xpath: &str) -> Result<Pointer> {
        self.compile(xpath)?.create_path(self)
    }

    pub fn create_path_and_set_value(&self, xpath: &str, value: impl Into<Value>) -> Result<Pointer> {
        self.compile(xpath)?.create_path_and_set_value(self, value)
    }

    pub fn remove_path(&self, xpath: &str) -> Result<()> {
        self.compile(xpath)?.remove_path(self)
    }

    /// Remove every node `xpath` selects, last in document order first.
    pub fn remove_all(&self, xpath: &str) -> Result<()> {
        self.compile(xpath)?.remove_all(self)
    }

    fn assign(&self, compiled: &CompiledExpression, value: &Value) -> Result<()> {
        debug!(xpath = %compiled.text, "set value");
        match self.pointer_of(compiled)? {
            Some(p) if p.is_actual() => p.set_value(value),
            _ => Err(EvalError::NotFound {
                path: compiled.text.clone(),
            }),
        }
    }

    fn create(&self, compiled: &CompiledExpression, value: Option<&Value>) -> Result<Pointer> {
        debug!(xpath = %compiled.text, "create path");
        if !compiled.expr.is_simple_path() {
            return Err(EvalError::InvalidSyntax {
                path: compiled.text.clone(),
                message: "cannot create a path that is not a simple path".to_string(),
            });
        }
        let (start, steps): (Pointer, &[Step]) = match compiled.expr.as_ref() {
            Expression::LocationPath(LocationPath { absolute, steps }) => {
                let start = if *absolute {
                    self.root_pointer()
                } else {
                    self.context_pointer()
                };
                (start, steps.as_slice())
            }
            Expression::ExpressionPath { head, steps, .. } => match head.as_ref() {
                Expression::Variable(name) => (self.declared_variable(name)?, steps.as_slice()),
                _ => return Err(EvalError::evaluation("path head is not a variable")),
            },
            Expression::Variable(name) => (self.declared_variable(name)?, &[] as &[Step]),
            _ => return Err(EvalError::evaluation("not a path")),
        };
        let mut current = start;
        for step in steps {
            current = self.create_step(&value_pointer(&current), step)?;
        }
        if let Some(value) = value {
            current.set_value(value)?;
        }
        Ok(current)
    }

    fn declared_variable(&self, name: &QName) -> Result<Pointer> {
        let pointer = self.variable_pointer(name);
        if pointer.is_actual() {
            Ok(pointer)
        } else {
            Err(EvalError::UndefinedVariable(name.to_string()))
        }
    }

    fn create_step(&self, parent: &Pointer, step: &Step) -> Result<Pointer> {
        let index = match step.predicates.first() {
            Some(predicate) => match predicate.compute_value(&mut self.evaluation())? {
                Value::Number(n) if n >= 1.0 && n.fract() == 0.0 => Some(n as usize - 1),
                other => {
                    return Err(EvalError::evaluation(format!(
                        "cannot create a node at position {}",
                        string_value(&other)
                    )))
                }
            },
            None => None,
        };
        let NodeTest::Name(name) = &step.test else {
            return Ok(parent.clone());
        };
        let resolve = |prefix: &str| self.namespace_uri(prefix);
        let existing = match step.axis {
            Axis::Attribute => parent.attributes(),
            Axis::Child => parent.children(),
            _ => return Ok(parent.clone()),
        }
        .filter(|p| axes::matches(p, &step.test, &resolve))
        .nth(index.unwrap_or(0));
        match (existing, step.axis) {
            (Some(found), _) => Ok(found),
            (None, Axis::Attribute) => parent.create_attribute(name),
            (None, _) => parent.create_child(name, index),
        }
    }

    fn remove(&self, compiled: &CompiledExpression) -> Result<()> {
        debug!(xpath = %compiled.text, "remove path");
        match self.pointer_of(compiled)? {
            Some(p) if p.is_actual() => p.remove(),
            _ => Ok(()),
        }
    }

    fn remove_every(&self, compiled: &CompiledExpression) -> Result<()> {
        debug!(xpath = %compiled.text, "remove all");
        let mut ctx = self.evaluation();
        let found = compiled
            .expr
            .iterate_pointers(&mut ctx)?
            .collect::<Result<Vec<_>>>()?;
        // Last node first; the rest are re-resolved from their paths.
        let mut ordered = sort_in_document_order(found, DocumentOrder::Descending)?.into_iter();
        if let Some(last) = ordered.next() {
            last.remove()?;
        }
        ordered.try_for_each(|pointer| self.remove_path(&pointer.as_path()))
    }

    pub fn set_lenient(&mut self, lenient: bool) {
        self.lenient = Some(lenient);
    }

    /// Inherited from the parent context unless set here; off by default.
    pub fn is_lenient(&self) -> bool {
        self.chain().find_map(|c| c.lenient).unwrap_or(false)
    }

    pub fn set_locale(&mut self, locale: &str) {
        self.locale = Some(locale.to_string());
    }

    pub fn locale(&self) -> String {
        self.chain()
            .find_map(|c| c.locale.clone())
            .unwrap_or_else(|| "en".to_string())
    }

    /// Register decimal-format symbols for `format-number()`. The name `""`
    /// sets the default.
    pub fn set_decimal_format_symbols(&mut self, name: &str, symbols: DecimalSymbols) {
        Rc::make_mut(&mut self.decimal_formats).insert(name.to_string(), symbols);
    }

    pub fn decimal_format_symbols(&self, name: &str) -> Option<DecimalSymbols> {
        self.chain().find_map(|c| c.decimal_formats.get(name).cloned())
    }

    pub fn set_functions(&mut self, functions: FunctionLibrary) {
        self.functions = Some(functions);
    }

    pub fn functions(&self) -> Option<&FunctionLibrary> {
        self.functions.as_ref()
    }

    /// Resolve an extension function by prefix, name and arity, searching
    /// this context, then its parents, then the built-in library.
    pub fn function(&self, name: &QName, arity: usize) -> Result<Arc<dyn Function>> {
        self.chain()
            .filter_map(|c| c.functions.as_ref())
            .chain(iter::once(&*BUILTIN_FUNCTIONS))
            .find_map(|lib| lib.find(name.prefix(), name.local_name(), arity))
            .ok_or_else(|| EvalError::UndefinedFunction(name.to_string()))
    }

    pub fn variables(&self) -> Rc<RefCell<Variables>> {
        self.variables.clone()
    }

    pub fn set_variables(&mut self, variables: Variables) {
        self.variables = Rc::new(RefCell::new(variables));
    }

    pub fn declare_variable(&self, name: &str, value: impl Into<Value>) {
        self.variables.borrow_mut().declare(name, value);
    }

    /// Pointer to the nearest declaration of `name`; a non-actual pointer
    /// when no context in the chain declares it.
    pub fn variable_pointer(&self, name: &QName) -> Pointer {
        let scope = self
            .chain()
            .find(|c| c.variables.borrow().is_declared(name.qualified()))
            .map(|c| c.variables.clone());
        Rc::new(VariablePointer::new(name.clone(), scope, self.engine.clone()))
    }

    pub fn variable_value(&self, name: &QName) -> Result<Value> {
        self.chain()
            .find_map(|c| c.variables.borrow().get(name.qualified()))
            .ok_or_else(|| EvalError::UndefinedVariable(name.to_string()))
    }

    pub fn register_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces.register_namespace(prefix, uri);
    }

    /// Registered URI for `prefix`, else the declaration visible from the
    /// namespace context pointer.
    pub fn namespace_uri(&self, prefix: &str) -> Option<String> {
        self.namespaces.namespace_uri(prefix).or_else(|| {
            self.namespaces
                .namespace_context_pointer()
                .is_none()
                .then(|| self.context_pointer.namespace_uri_for(prefix))
                .flatten()
        })
    }

    pub fn prefix(&self, uri: &str) -> Option<String> {
        self.namespaces.prefix(uri).or_else(|| {
            self.namespaces
                .namespace_context_pointer()
                .is_none()
                .then(|| declared_prefix(&self.context_pointer, uri))
                .flatten()
        })
    }

    pub fn set_namespace_context_pointer(&mut self, pointer: Option<Pointer>) {
        self.namespaces.set_namespace_context_pointer(pointer);
    }

    /// Where undeclared prefixes are resolved; the context pointer unless
    /// another one was set.
    pub fn namespace_context_pointer(&self) -> Pointer {
        self.namespaces
            .namespace_context_pointer()
            .unwrap_or_else(|| self.context_pointer())
    }

    pub fn set_key_manager(&mut self, manager: Rc<dyn KeyManager>) {
        self.key_manager = Some(manager);
    }

    pub fn set_identity_manager(&mut self, manager: Rc<dyn IdentityManager>) {
        self.identity_manager = Some(manager);
    }

    fn key_manager(&self) -> Result<Rc<dyn KeyManager>> {
        self.chain()
            .find_map(|c| c.key_manager.clone())
            .ok_or_else(|| {
                EvalError::evaluation("cannot find an element by key, no key manager has been specified")
            })
    }

    pub fn pointer_by_id(&self, id: &str) -> Result<Option<Pointer>> {
        let manager = self
            .chain()
            .find_map(|c| c.identity_manager.clone())
            .ok_or_else(|| {
                EvalError::evaluation("cannot find an element by id, no identity manager has been specified")
            })?;
        manager.pointer_by_id(self, id)
    }

    pub fn pointer_by_key(&self, key: &str, value: &str) -> Result<Option<Pointer>> {
        self.key_manager()?.pointer_by_key(self, key, value)
    }

    pub fn node_set_by_key(&self, key: &str, value: &Value) -> Result<Vec<Pointer>> {
        self.key_manager()?.node_set_by_key(self, key, value)
    }
}

fn is_path(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::LocationPath(_) | Expression::ExpressionPath { .. }
    )
}

impl fmt::Debug for PathContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathContext")
            .field("context_pointer", &self.context_pointer.as_path())
            .field("lenient", &self.is_lenient())
            .field("locale", &self.locale())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl CompiledExpression {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expression(&self) -> &Expression {
        &self.expr
    }

    pub fn get_value(&self, ctx: &PathContext) -> Result<Value> {
        ctx.value_of(self).map_err(|e| e.at_path(&self.text))
    }

    pub fn get_value_as<T: DeserializeOwned>(&self, ctx: &PathContext) -> Result<T> {
        let value = self.get_value(ctx)?;
        let json = value.to_json();
        if let Ok(v) = serde_json::from_value::<T>(json.clone()) {
            return Ok(v);
        }
        if let Json::String(text) = &json {
            if let Ok(v) = serde_json::from_str::<T>(text) {
                return Ok(v);
            }
        }
        serde_json::from_value::<T>(Json::String(string_value(&value))).map_err(|err| {
            EvalError::TypeConversion {
                path: self.text.clone(),
                message: err.to_string(),
            }
        })
    }

    pub fn iterate(&self, ctx: &PathContext) -> Result<Values> {
        debug!(xpath = %self.text, "iterate");
        let path = self.text.clone();
        let values = self
            .expr
            .iterate(&mut ctx.evaluation())
            .map_err(|e| e.at_path(&path))?;
        Ok(Box::new(values.map(move |v| v.map_err(|e| e.at_path(&path)))))
    }

    pub fn get_pointer(&self, ctx: &PathContext) -> Result<Option<Pointer>> {
        ctx.pointer_of(self).map_err(|e| e.at_path(&self.text))
    }

    pub fn iterate_pointers(&self, ctx: &PathContext) -> Result<PointerIter> {
        debug!(xpath = %self.text, "iterate pointers");
        let path = self.text.clone();
        let pointers = self
            .expr
            .iterate_pointers(&mut ctx.evaluation())
            .map_err(|e| e.at_path(&path))?;
        Ok(Box::new(pointers.map(move |p| p.map_err(|e| e.at_path(&path)))))
    }

    pub fn set_value(&self, ctx: &PathContext, value: impl Into<Value>) -> Result<()> {
        ctx.assign(self, &value.into())
            .map_err(|e| e.at_path(&self.text))
    }

    pub fn create_path(&self, ctx: &PathContext) -> Result<Pointer> {
        ctx.create(self, None).map_err(|e| e.at_path(&self.text))
    }

    pub fn create_path_and_set_value(&self, ctx: &PathContext, value: impl Into<Value>) -> Result<Pointer> {
        ctx.create(self, Some(&value.into()))
            .map_err(|e| e.at_path(&self.text))
    }

    pub fn remove_path(&self, ctx: &PathContext) -> Result<()> {
        ctx.remove(self).map_err(|e| e.at_path(&self.text))
    }

    pub fn remove_all(&self, ctx: &PathContext) -> Result<()> {
        ctx.remove_every(self).map_err(|e| e.at_path(&self.text))
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
