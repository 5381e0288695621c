use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::context::PathContext;
use crate::errors::Result;
use crate::pointer::Pointer;
use crate::value::Value;

pub mod core;
pub mod format;
pub mod text;

pub use format::DecimalSymbols;

/// What an extension function sees of the evaluation that called it.
pub struct CallContext<'a> {
    pub context: &'a PathContext,
    pub node: Option<Pointer>,
    pub position: usize,
}

/// Trait for pluggable functions used by the expression evaluator.
pub trait Function: Send + Sync {
    fn name(&self) -> &str;
    fn arity(&self) -> RangeInclusive<usize>;
    fn invoke(&self, ctx: &CallContext<'_>, args: &[Value]) -> Result<Value>;
}

type Key = (Option<String>, String);

/// Extension function library, keyed by prefix and name.
///
/// Cloning is cheap; registering on a clone copies the table first.
#[derive(Clone, Default)]
pub struct FunctionLibrary {
    inner: Arc<HashMap<Key, Vec<Arc<dyn Function>>>>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut lib = Self::new();
        lib.register(None, text::LowerCase);
        lib.register(None, text::UpperCase);
        lib.register(None, text::DistinctValues);
        lib.register(None, text::OrDefault);
        lib.register(None, text::FromJson);
        lib
    }

    /// Add `f` under `prefix`. Overloads with different arities coexist;
    /// earlier registrations win on overlap.
    pub fn register<F: Function + 'static>(&mut self, prefix: Option<&str>, f: F) {
        let key = (prefix.map(str::to_string), f.name().to_string());
        let table = Arc::make_mut(&mut self.inner);
        table.entry(key).or_default().push(Arc::new(f));
    }

    /// Register a closure as a function.
    pub fn register_fn<F>(&mut self, prefix: Option<&str>, name: &str, arity: RangeInclusive<usize>, f: F)
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(
            prefix,
            FnFunction {
                name: name.to_string(),
                arity,
                f,
            },
        );
    }

    pub fn find(&self, prefix: Option<&str>, name: &str, arity: usize) -> Option<Arc<dyn Function>> {
        let key = (prefix.map(str::to_string), name.to_string());
        self.inner
            .get(&key)?
            .iter()
            .find(|f| f.arity().contains(&arity))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for FunctionLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .inner
            .keys()
            .map(|(prefix, name)| match prefix {
                Some(p) => format!("{p}:{name}"),
                None => name.clone(),
            })
            .collect();
        names.sort();
        f.debug_struct("FunctionLibrary").field("functions", &names).finish()
    }
}

struct FnFunction<F> {
    name: String,
    arity: RangeInclusive<usize>,
    f: F,
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&CallContext<'_>, &[Value]) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str { &self.name }
    fn arity(&self) -> RangeInclusive<usize> { self.arity.clone() }
    fn invoke(&self, ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
        (self.f)(ctx, args)
    }
}
