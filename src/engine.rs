//! Process-wide state: the compiled-expression cache and the registry of
//! node pointer factories.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwapOption;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::compiler::ast::Expression;
use crate::compiler::TreeCompiler;
use crate::errors::{EvalError, Result};
use crate::parser::parse_expression;
use crate::pointer::{Bean, JsonPointerFactory, NodePointerFactory, Pointer};
use crate::qname::QName;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compiled expressions kept before the least recently used is dropped.
    pub cache_capacity: usize,
    /// Register the JSON backend on construction.
    pub builtin_factories: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            builtin_factories: true,
        }
    }
}

type Factories = Vec<Arc<dyn NodePointerFactory>>;

#[derive(Default)]
struct Entries {
    next_seq: u64,
    list: Vec<(u64, Arc<dyn NodePointerFactory>)>,
}

/// Writers serialize on the mutex and drop the published snapshot; the next
/// reader rebuilds it, sorted by `(order, registration sequence)`.
struct FactoryRegistry {
    entries: Mutex<Entries>,
    snapshot: ArcSwapOption<Factories>,
}

impl FactoryRegistry {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            snapshot: ArcSwapOption::empty(),
        }
    }

    fn snapshot(&self) -> Arc<Factories> {
        if let Some(snap) = self.snapshot.load_full() {
            return snap;
        }
        let entries = self.entries.lock();
        if let Some(snap) = self.snapshot.load_full() {
            return snap;
        }
        let mut list = entries.list.clone();
        list.sort_by_key(|(seq, f)| (f.order(), *seq));
        let snap: Arc<Factories> = Arc::new(list.into_iter().map(|(_, f)| f).collect());
        debug!(factories = snap.len(), "rebuilt node pointer factory snapshot");
        self.snapshot.store(Some(snap.clone()));
        snap
    }

    fn add(&self, factory: Arc<dyn NodePointerFactory>) {
        let mut entries = self.entries.lock();
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.list.push((seq, factory));
        self.snapshot.store(None);
    }

    fn remove(&self, factory: &Arc<dyn NodePointerFactory>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.list.len();
        entries
            .list
            .retain(|(_, f)| Arc::as_ptr(f).cast::<()>() != Arc::as_ptr(factory).cast::<()>());
        let removed = entries.list.len() != before;
        if removed {
            self.snapshot.store(None);
        }
        removed
    }
}

pub struct Engine {
    cache: Mutex<LruCache<String, Arc<Expression>>>,
    factories: FactoryRegistry,
}

static SHARED: LazyLock<Arc<Engine>> = LazyLock::new(|| Arc::new(Engine::new(EngineConfig::default())));

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let engine = Self {
            cache: Mutex::new(LruCache::new(capacity)),
            factories: FactoryRegistry::new(),
        };
        if config.builtin_factories {
            engine.add_factory(Arc::new(JsonPointerFactory));
        }
        engine
    }

    /// The default engine shared by every context that is not given one.
    pub fn shared() -> Arc<Engine> {
        SHARED.clone()
    }

    /// Compile `text`, reusing the cached tree when there is one.
    pub fn compile(&self, text: &str) -> Result<Arc<Expression>> {
        if let Some(expr) = self.cache.lock().get(text) {
            debug!(xpath = text, "expression cache hit");
            return Ok(expr.clone());
        }
        debug!(xpath = text, "expression cache miss, compiling");
        let expr = Arc::new(parse_expression(&TreeCompiler, text)?);
        self.cache.lock().put(text.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn cached_expressions(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn add_factory(&self, factory: Arc<dyn NodePointerFactory>) {
        debug!(order = factory.order(), "registering node pointer factory");
        self.factories.add(factory);
    }

    pub fn remove_factory(&self, factory: &Arc<dyn NodePointerFactory>) -> bool {
        self.factories.remove(factory)
    }

    /// Registered factories in consultation order.
    pub fn list_factories(&self) -> Vec<Arc<dyn NodePointerFactory>> {
        self.factories.snapshot().as_ref().clone()
    }

    /// Wrap a host object in a pointer using the first factory that accepts it.
    pub fn new_node_pointer(&self, parent: Option<&Pointer>, name: &QName, bean: &Bean) -> Result<Pointer> {
        self.factories
            .snapshot()
            .iter()
            .find_map(|f| f.create_node_pointer(parent, name, bean))
            .ok_or_else(|| {
                EvalError::Unsupported(format!(
                    "no node pointer factory accepts the object named '{name}'"
                ))
            })
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cached_expressions", &self.cached_expressions())
            .field("factories", &self.factories.snapshot().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::NullPointer;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    struct Fixed(i32, &'static str);

    impl NodePointerFactory for Fixed {
        fn order(&self) -> i32 {
            self.0
        }

        fn create_node_pointer(&self, parent: Option<&Pointer>, _: &QName, bean: &Bean) -> Option<Pointer> {
            bean.downcast_ref::<&'static str>()
                .filter(|s| **s == self.1)
                .map(|_| NullPointer::new(parent.cloned(), QName::local(self.1)))
        }
    }

    fn bare() -> Engine {
        Engine::new(EngineConfig {
            builtin_factories: false,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn compile_reuses_cached_trees() {
        let engine = bare();
        let a = engine.compile("a/b[1]").unwrap();
        let b = engine.compile("a/b[1]").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cached_expressions(), 1);
        engine.clear_cache();
        assert_eq!(engine.cached_expressions(), 0);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let engine = Engine::new(EngineConfig {
            cache_capacity: 2,
            builtin_factories: false,
        });
        let a = engine.compile("a").unwrap();
        engine.compile("b").unwrap();
        engine.compile("a").unwrap();
        engine.compile("c").unwrap();
        assert_eq!(engine.cached_expressions(), 2);
        assert!(Arc::ptr_eq(&a, &engine.compile("a").unwrap()));
    }

    #[test]
    fn syntax_errors_are_not_cached() {
        let engine = bare();
        assert!(engine.compile("a[").is_err());
        assert_eq!(engine.cached_expressions(), 0);
    }

    #[test]
    fn factories_are_consulted_in_order() {
        let engine = bare();
        let late: Arc<dyn NodePointerFactory> = Arc::new(Fixed(10, "x"));
        let early: Arc<dyn NodePointerFactory> = Arc::new(Fixed(1, "y"));
        engine.add_factory(late.clone());
        engine.add_factory(early.clone());
        let orders: Vec<i32> = engine.list_factories().iter().map(|f| f.order()).collect();
        assert_eq!(orders, vec![1, 10]);

        let bean: Bean = Rc::new("x");
        let made = engine.new_node_pointer(None, &QName::local("v"), &bean);
        assert_eq!(made.map(|p| p.name().to_string()).ok(), Some("x".to_string()));

        assert!(engine.remove_factory(&late));
        assert!(!engine.remove_factory(&late));
        assert!(engine.new_node_pointer(None, &QName::local("v"), &bean).is_err());
    }
}
