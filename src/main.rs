use std::cell::RefCell;
use std::fs;
use std::process;
use std::rc::Rc;
use std::sync::Arc;

use clap::Parser;
use itertools::Itertools;
use object_path_query::{Bean, Engine, EngineConfig, PathContext};
use serde_json::Value as Json;
use tracing::Level;

/// Evaluate a path expression against a JSON document.
#[derive(Parser, Debug)]
#[command(name = "opq", author, version, about)]
struct Args {
    /// Path expression
    path: String,
    /// Read the document from a file
    #[arg(long, conflicts_with = "json")]
    file: Option<String>,
    /// Document as inline JSON text
    #[arg(long)]
    json: Option<String>,
    /// Print node paths instead of values
    #[arg(long)]
    pointers: bool,
    /// Absent values print as null instead of failing
    #[arg(long)]
    lenient: bool,
    /// Register a namespace, PREFIX=URI
    #[arg(long = "ns", value_name = "PREFIX=URI")]
    namespaces: Vec<String>,
    /// Declare a variable, NAME=JSON (plain text when not valid JSON)
    #[arg(long = "var", value_name = "NAME=JSON")]
    variables: Vec<String>,
    /// Show only the first result
    #[arg(long)]
    first: bool,
    /// Drop duplicate results
    #[arg(long)]
    unique: bool,
    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<String>,
    /// More log output on stderr; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    process::exit(1);
}

fn pair<'a>(text: &'a str, what: &str) -> (&'a str, &'a str) {
    text.split_once('=')
        .unwrap_or_else(|| fail(format!("Invalid {what} '{text}', expected NAME=VALUE")))
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let text = match (&args.file, &args.json) {
        (Some(path), _) => fs::read_to_string(path).unwrap_or_else(|e| fail(format!("Cannot read {path}: {e}"))),
        (None, Some(json)) => json.clone(),
        (None, None) => "{}".to_string(),
    };
    let data: Json = serde_json::from_str(&text).unwrap_or_else(|e| fail(format!("Invalid JSON: {e}")));

    let config = match &args.config {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|c| serde_json::from_str::<EngineConfig>(&c).map_err(|e| e.to_string()))
            .unwrap_or_else(|e| fail(format!("Invalid config {path}: {e}"))),
        None => EngineConfig::default(),
    };
    let bean: Bean = Rc::new(RefCell::new(data));
    let mut ctx = PathContext::with_engine(Arc::new(Engine::new(config)), bean).unwrap_or_else(|e| fail(e));
    ctx.set_lenient(args.lenient);
    for ns in &args.namespaces {
        let (prefix, uri) = pair(ns, "namespace");
        ctx.register_namespace(prefix, uri);
    }
    for var in &args.variables {
        let (name, value) = pair(var, "variable");
        let value = serde_json::from_str::<Json>(value).unwrap_or_else(|_| Json::String(value.to_string()));
        ctx.declare_variable(name, value);
    }

    let out: Vec<Json> = if args.pointers {
        let pointers = ctx.iterate_pointers(&args.path).unwrap_or_else(|e| fail(e));
        pointers
            .map(|p| p.map(|p| Json::String(p.as_path())))
            .collect::<Result<_, _>>()
            .unwrap_or_else(|e| fail(e))
    } else {
        let values = ctx.iterate(&args.path).unwrap_or_else(|e| fail(e));
        values
            .map(|v| v.map(|v| v.to_json()))
            .collect::<Result<_, _>>()
            .unwrap_or_else(|e| fail(e))
    };
    let out = if args.unique {
        out.into_iter().unique_by(|j| j.to_string()).collect()
    } else {
        out
    };

    if args.pointers {
        let lines = if args.first { &out[..out.len().min(1)] } else { &out[..] };
        for line in lines {
            println!("{}", line.as_str().unwrap_or_default());
        }
        return;
    }
    let shown = if args.first {
        out.into_iter().next().unwrap_or(Json::Null)
    } else {
        Json::Array(out)
    };
    match serde_json::to_string_pretty(&shown) {
        Ok(s) => println!("{s}"),
        Err(e) => fail(e),
    }
}
