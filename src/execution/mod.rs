//! Function execution.
//!
//! The compiler only type-checks; running a compiled function is delegated
//! to an `ExecutionStrategy` installed on the runtime. `NativeFunctions` is
//! the in-process strategy: a table of Rust closures keyed by function path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::model::{Node, NodeId, Value, Values, keys, path};
use crate::storage::{GraphView, MemoryStore};
use crate::{Error, Result};

/// Runs compiled functions.
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Execute `function` (a function element of `graph`) with one value
    /// collection per declared parameter.
    fn execute(&self, graph: &MemoryStore, function: NodeId, args: &[Values]) -> Result<ExecutionResult>;
}

/// Values returned by one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub values: Values,
}

impl ExecutionResult {
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self { values: values.into_iter().collect() }
    }

    /// The single returned value, converted.
    pub fn get<T: FromValue>(&self) -> Result<T> {
        match self.values.as_slice() {
            [one] => T::from_value(one),
            other => Err(Error::Execution(format!("expected exactly one value, got {}", other.len()))),
        }
    }

    /// Every returned value, converted.
    pub fn all<T: FromValue>(&self) -> Result<Vec<T>> {
        self.values.iter().map(T::from_value).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

fn mismatch(expected: &str, got: &Value) -> Error {
    Error::Execution(format!("expected {expected}, got {}", got.type_name()))
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_str().map(str::to_string).ok_or_else(|| mismatch("String", val))
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| mismatch("Integer", val))
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            _ => Err(mismatch("Float", val)),
        }
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_bool().ok_or_else(|| mismatch("Boolean", val))
    }
}

impl FromValue for NodeId {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Node(id) => Ok(*id),
            Value::Ref(r) => r.target.ok_or_else(|| mismatch("Node", val)),
            _ => Err(mismatch("Node", val)),
        }
    }
}

/// Body of a native function.
pub type NativeFn = Arc<dyn Fn(&[Values]) -> Result<Values> + Send + Sync>;

/// Strategy dispatching on the function's path to registered closures.
#[derive(Clone, Default)]
pub struct NativeFunctions {
    functions: HashMap<String, NativeFn>,
}

impl fmt::Debug for NativeFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("NativeFunctions").field("functions", &names).finish()
    }
}

impl NativeFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body for every overload at `path`
    /// (`meta::pure::functions::string::length`) or for one signature id
    /// (`meta::pure::functions::math::plus_Integer_1__Integer_1__Integer_1_`).
    pub fn register<F>(&mut self, path: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Values]) -> Result<Values> + Send + Sync + 'static,
    {
        self.functions.insert(path.into(), Arc::new(f));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.functions.contains_key(path)
    }

    fn lookup(&self, graph: &MemoryStore, function: &Node) -> Option<&NativeFn> {
        let signature_path = graph.path_of(function.id);
        if let Some(f) = self.functions.get(&signature_path) {
            return Some(f);
        }
        let name = function.str_property(keys::FUNCTION_NAME)?;
        let path = path::join(path::package_of(&signature_path), name);
        self.functions.get(&path)
    }
}

impl ExecutionStrategy for NativeFunctions {
    fn name(&self) -> &str {
        "native"
    }

    fn execute(&self, graph: &MemoryStore, function: NodeId, args: &[Values]) -> Result<ExecutionResult> {
        let node = graph
            .node(function)
            .ok_or_else(|| Error::NotFound(format!("Function {function}")))?;
        let body = self
            .lookup(graph, node)
            .ok_or_else(|| Error::Execution(format!("No native implementation for {}", graph.path_of(function))))?;
        debug!(function = %graph.path_of(function), args = args.len(), "executing native function");
        Ok(ExecutionResult { values: body(args)? })
    }
}
