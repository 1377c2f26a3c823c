//! # m3-rs: Metamodel Graph Compiler
//!
//! An in-memory metamodel repository with an incremental compiler in front
//! of it. Source units are parsed into graph deltas, applied inside one
//! write transaction, resolved, validated and type-checked over the
//! affected closure only, and committed or rolled back as a whole.
//!
//! ## Design Principles
//!
//! 1. **Arena graph**: nodes live in `MemoryStore` keyed by `NodeId`; every
//!    edge is an id, so cyclic metamodels need no shared ownership
//! 2. **Parser owns nothing**: source → `GraphDelta` is a pure function
//! 3. **Located errors**: every compilation failure is a `Diagnostic` with
//!    source id, line and column
//! 4. **All or nothing**: a failed compile leaves the graph untouched
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use m3::Runtime;
//!
//! # fn example() -> m3::Result<()> {
//! let runtime = Runtime::new()?;
//! runtime.create_source("/model.pure", "Class model::Person { name: String[1]; }")?;
//! runtime.compile()?;
//!
//! let person = runtime.get_element("model::Person").expect("compiled");
//! assert!(runtime.subtype_of("model::Person", "Any")?);
//! # let _ = person;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | `model` | nodes, values, generic types, multiplicities, bootstrap M3 |
//! | `storage` | `MemoryStore` with reverse-reference index and undo journal |
//! | `tx` | thread-affine transactions |
//! | `parser` | grammar front-end producing graph deltas |
//! | `types` | generalization, compatibility, binding, relation algebra, inference |
//! | `compiler` | source registry and incremental compile pipeline |
//! | `validation` | structural element checks |
//! | `execution` | pluggable function execution |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod tx;
pub mod parser;
pub mod types;
pub mod compiler;
pub mod validation;
pub mod diagnostic;
pub mod scope;
pub mod config;
pub mod execution;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument};

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    GenericType, Multiplicity, Node, NodeId, PropertyMap, Reference, SourceInformation, Value, Values, M3,
};
pub use storage::{GraphView, MemoryStore, StoreStats};
pub use tx::{Transaction, TransactionManager, TxId, TxMode};
pub use compiler::{CompileReport, IncrementalCompiler};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use scope::{ScopeDescriptor, ScopeSet};
pub use config::RuntimeConfig;
pub use execution::{ExecutionResult, ExecutionStrategy, FromValue, NativeFunctions};

// ============================================================================
// Runtime handle
// ============================================================================

/// The primary entry point. A `Runtime` owns one compiler and its graph,
/// shared between threads: readers run concurrently, compiles are
/// exclusive.
#[derive(Clone)]
pub struct Runtime {
    compiler: Arc<RwLock<IncrementalCompiler>>,
    strategy: Arc<RwLock<Option<Arc<dyn ExecutionStrategy>>>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategy = self.strategy.read().as_ref().map(|s| s.name().to_string());
        f.debug_struct("Runtime").field("strategy", &strategy).finish_non_exhaustive()
    }
}

impl Runtime {
    /// A runtime with the default configuration: no scopes, platform loaded.
    pub fn new() -> Result<Self> {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Result<Self> {
        let compiler = IncrementalCompiler::new(config)?;
        Ok(Self { compiler: Arc::new(RwLock::new(compiler)), strategy: Arc::new(RwLock::new(None)) })
    }

    // ---- sources ----

    pub fn create_source(&self, id: &str, text: &str) -> Result<()> {
        self.compiler.write().sources_mut().create(id, text)
    }

    pub fn modify_source(&self, id: &str, text: &str) -> Result<()> {
        self.compiler.write().sources_mut().modify(id, text)
    }

    pub fn delete_source(&self, id: &str) -> Result<()> {
        self.compiler.write().sources_mut().delete(id)
    }

    pub fn add_or_update_source(&self, id: &str, text: &str) -> Result<()> {
        self.compiler.write().sources_mut().add_or_update(id, text)
    }

    /// Text of a committed source.
    pub fn source_text(&self, id: &str) -> Option<String> {
        self.compiler.read().sources().get(id).map(|s| s.text.clone())
    }

    pub fn has_pending(&self) -> bool {
        self.compiler.read().has_pending()
    }

    /// Compile every pending change. Either all of them are applied or
    /// none is.
    pub fn compile(&self) -> Result<CompileReport> {
        self.compiler.write().compile()
    }

    // ---- graph queries ----

    /// Run `f` against the compiler under a read lock.
    pub fn read<R>(&self, f: impl FnOnce(&IncrementalCompiler) -> R) -> R {
        f(&self.compiler.read())
    }

    pub fn get_element(&self, path: &str) -> Option<Node> {
        let compiler = self.compiler.read();
        let store = compiler.store();
        store.element(path).and_then(|id| store.get_node(id))
    }

    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.compiler.read().store().get_node(id)
    }

    /// A function by signature path (`a::f_String_1__Integer_1_`), or by
    /// plain path (`a::f`) when exactly one overload exists.
    pub fn get_function(&self, signature: &str) -> Option<Node> {
        let compiler = self.compiler.read();
        let store = compiler.store();
        find_function(store, signature).ok().and_then(|id| store.get_node(id))
    }

    /// Whether `node` is an instance of the type at `type_path`, taking
    /// generalizations into account.
    pub fn instance_of(&self, node: NodeId, type_path: &str) -> Result<bool> {
        let compiler = self.compiler.read();
        let store = compiler.store();
        let classifier = store
            .classifier_of(node)
            .ok_or_else(|| Error::NotFound(format!("Node {node}")))?;
        let ty = element_id(store, type_path)?;
        Ok(compiler.cache().is_subtype(store, classifier, ty))
    }

    pub fn subtype_of(&self, sub: &str, sup: &str) -> Result<bool> {
        let compiler = self.compiler.read();
        let store = compiler.store();
        let (sub, sup) = (element_id(store, sub)?, element_id(store, sup)?);
        Ok(compiler.cache().is_subtype(store, sub, sup))
    }

    /// Deterministic serialization of the whole graph.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.compiler.read().store().serialize()
    }

    /// Full-graph referential integrity check.
    pub fn validate(&self) -> Result<()> {
        self.compiler.read().store().validate()
    }

    pub fn transaction_manager(&self) -> TransactionManager {
        self.compiler.read().store().transaction_manager().clone()
    }

    // ---- execution ----

    pub fn set_execution_strategy(&self, strategy: Arc<dyn ExecutionStrategy>) {
        debug!(strategy = strategy.name(), "execution strategy installed");
        *self.strategy.write() = Some(strategy);
    }

    /// Execute a compiled function with one value collection per parameter.
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub fn execute(&self, function: &str, args: &[Values]) -> Result<ExecutionResult> {
        let strategy = self
            .strategy
            .read()
            .clone()
            .ok_or_else(|| Error::Execution("No execution strategy installed".into()))?;
        let compiler = self.compiler.read();
        if compiler.has_pending() {
            return Err(Error::Execution("Sources have changed; compile before executing".into()));
        }
        let store = compiler.store();
        let id = find_function(store, function)?;
        let arity = store.node(id).map(|n| n.values(model::keys::PARAMETERS).len()).unwrap_or_default();
        if arity != args.len() {
            return Err(Error::Execution(format!(
                "{} expects {arity} argument(s), got {}",
                store.path_of(id),
                args.len()
            )));
        }
        strategy.execute(store, id, args)
    }
}

fn element_id(store: &MemoryStore, path: &str) -> Result<NodeId> {
    store.element(path).ok_or_else(|| Error::NotFound(format!("Element '{path}'")))
}

fn find_function(store: &MemoryStore, signature: &str) -> Result<NodeId> {
    if let Some(id) = store.element(signature).filter(|id| types::lookup::is_function(store, *id)) {
        return Ok(id);
    }
    let package = store
        .element(model::path::package_of(signature))
        .ok_or_else(|| Error::NotFound(format!("Function '{signature}'")))?;
    let name = model::path::simple_name(signature);
    let overloads: Vec<NodeId> = store
        .children(package)
        .into_iter()
        .filter(|c| types::lookup::is_function(store, *c))
        .filter(|c| store.node(*c).and_then(|n| n.str_property(model::keys::FUNCTION_NAME)) == Some(name))
        .collect();
    match overloads.as_slice() {
        [one] => Ok(*one),
        [] => Err(Error::NotFound(format!("Function '{signature}'"))),
        _ => Err(Error::Execution(format!(
            "Function '{signature}' is overloaded; use a signature path"
        ))),
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ParseError(Diagnostic),

    #[error("{0}")]
    ReferentialIntegrity(Diagnostic),

    #[error("{0}")]
    TypeInference(Diagnostic),

    #[error("{0}")]
    TypeArgumentMismatch(Diagnostic),

    #[error("{0}")]
    DuplicateElement(Diagnostic),

    #[error("{0}")]
    ScopeVisibility(Diagnostic),

    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    #[error("Transaction error: {0}")]
    TransactionState(String),

    #[error("Scope configuration error: {0}")]
    ScopeConfig(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The located diagnostic, for compilation errors.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Error::ParseError(d)
            | Error::ReferentialIntegrity(d)
            | Error::TypeInference(d)
            | Error::TypeArgumentMismatch(d)
            | Error::DuplicateElement(d)
            | Error::ScopeVisibility(d) => Some(d),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
