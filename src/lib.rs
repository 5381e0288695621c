//! Read, write, create and remove values in object graphs with XPath 1.0
//! style path expressions.
//!
//! ```
//! use object_path_query::{PathContext, Value};
//! use serde_json::json;
//!
//! let ctx = PathContext::new(json!({"store": {"book": [{"price": 8}, {"price": 12}]}}));
//! assert_eq!(ctx.get_value("sum(store/book/price)").unwrap(), Value::Number(20.0));
//! ```

pub mod errors;
pub mod qname;
pub mod value;
pub mod infoset;
pub mod namespace;
pub mod pointer;
pub mod variables;
pub mod compiler;
pub mod parser;
pub mod pipeline;
pub mod expression;
mod comparison;
pub mod functions;
pub mod engine;
pub mod context;

pub use context::{CompiledExpression, IdentityManager, KeyManager, PathContext};
pub use engine::{Engine, EngineConfig};
pub use errors::{EvalError, Result};
pub use functions::{CallContext, DecimalSymbols, Function, FunctionLibrary};
pub use namespace::NamespaceResolver;
pub use pointer::{Bean, NodeKind, NodePointer, NodePointerFactory, Pointer, Pointers};
pub use qname::QName;
pub use value::Value;
pub use variables::Variables;
