mod common;

use std::rc::Rc;
use std::sync::Arc;

use common::{catalog, tree_context, tree_engine, TreeFactory};
use object_path_query::{
    Bean, DecimalSymbols, Engine, EngineConfig, IdentityManager, KeyManager, NodePointerFactory, PathContext,
    Pointer, Result, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Finds elements by their `id` attribute.
struct ByIdAttribute;

impl IdentityManager for ByIdAttribute {
    fn pointer_by_id(&self, ctx: &PathContext, id: &str) -> Result<Option<Pointer>> {
        let mut lookup = ctx.clone();
        lookup.set_lenient(true);
        lookup.get_pointer(&format!("//*[@id='{id}']"))
    }
}

/// Keys books by author.
struct Authors;

impl KeyManager for Authors {
    fn pointer_by_key(&self, ctx: &PathContext, key: &str, value: &str) -> Result<Option<Pointer>> {
        if key != "author" {
            return Ok(None);
        }
        let mut lookup = ctx.clone();
        lookup.set_lenient(true);
        lookup.get_pointer(&format!("/book[author='{value}']"))
    }
}

#[test]
fn test_identity_manager_resolves_id() {
    let mut ctx = tree_context(catalog());
    ctx.set_identity_manager(Rc::new(ByIdAttribute));
    assert_eq!(ctx.get_value("id('i2')/title").unwrap(), Value::from("Beta"));
    assert_eq!(ctx.get_value("count(id('nope'))").unwrap(), Value::Number(0.0));

    // relative contexts use the parent's manager
    let note = ctx.get_pointer("/catalog/note").unwrap().unwrap();
    let child = ctx.relative_context(note);
    assert_eq!(child.get_value("id('i1')/title").unwrap(), Value::from("Alpha"));
}

#[test]
fn test_key_manager_resolves_keys() {
    let mut ctx = PathContext::new(json!({"book": [
        {"title": "Sword", "author": "Waugh"},
        {"title": "Moby", "author": "Melville"}
    ]}));
    ctx.set_key_manager(Rc::new(Authors));
    assert_eq!(ctx.get_value("key('author', 'Melville')/title").unwrap(), Value::from("Moby"));
    assert_eq!(ctx.get_value("count(key('author', 'Nobody'))").unwrap(), Value::Number(0.0));
    assert_eq!(ctx.get_value("count(key('title', 'Moby'))").unwrap(), Value::Number(0.0));
}

#[test]
fn test_factories_in_order() {
    let engine = tree_engine();
    let orders: Vec<i32> = engine.list_factories().iter().map(|f| f.order()).collect();
    assert_eq!(orders, vec![100, 800]);

    let bare = Engine::new(EngineConfig {
        builtin_factories: false,
        ..EngineConfig::default()
    });
    let json_bean: Bean = Rc::new(json!({"a": 1}));
    assert!(PathContext::with_engine(Arc::new(bare), json_bean.clone()).is_err());

    let ctx = PathContext::with_engine(tree_engine(), json_bean).unwrap();
    assert_eq!(ctx.get_value("a").unwrap(), Value::Number(1.0));
}

#[test]
fn test_removed_factory_is_no_longer_consulted() {
    let engine = Engine::new(EngineConfig::default());
    let tree: Arc<dyn NodePointerFactory> = Arc::new(TreeFactory);
    engine.add_factory(tree.clone());
    assert_eq!(engine.list_factories().len(), 2);
    assert!(engine.remove_factory(&tree));
    let bean: Bean = Rc::new(common::TreeDocument(catalog()));
    assert!(PathContext::with_engine(Arc::new(engine), bean).is_err());
}

#[test]
fn test_scalar_variables_wrap_through_the_engine() {
    let ctx = tree_context(catalog());
    ctx.declare_variable("n", 4);
    assert_eq!(ctx.get_value("$n * 2").unwrap(), Value::Number(8.0));
    let p = ctx.get_pointer("$n").unwrap().unwrap();
    assert_eq!(p.as_path(), "$n");
}

#[test]
fn test_locale_and_decimal_formats() {
    let mut ctx = PathContext::new(json!({"total": 1234.5}));
    ctx.set_locale("de_DE");
    assert_eq!(
        ctx.get_value("format-number(total, '#,##0.00')").unwrap(),
        Value::from("1.234,50")
    );
    ctx.set_decimal_format_symbols(
        "plain",
        DecimalSymbols {
            grouping_separator: ' ',
            ..DecimalSymbols::default()
        },
    );
    assert_eq!(
        ctx.get_value("format-number(total, '#,##0.0', 'plain')").unwrap(),
        Value::from("1 234.5")
    );
    assert_eq!(ctx.locale(), "de_DE");
}
