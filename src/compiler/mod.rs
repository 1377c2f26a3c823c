//! # Incremental Compiler
//!
//! Applies pending source changes to the graph as one write transaction.
//!
//! ```text
//! pending ──parse──▶ deltas ──┐
//!                             ▼
//! replaced elements ──▶ affected closure ──reset──▶ remove ──▶ apply
//!                                                              │
//!            commit ◀── infer ◀── validate ◀── resolve ◀──────┘
//!              │
//!              └── any diagnostic: rollback, sources stay pending
//! ```
//!
//! Only the affected closure is re-checked: elements created by the change,
//! elements referencing replaced elements (transitively, through the
//! store's reverse-reference index), and elements that looked up one of
//! the simple names the change adds or removes.

pub(crate) mod closure;
pub mod platform;
pub(crate) mod resolve;
pub mod source;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::diagnostic::{self, Diagnostic, DiagnosticKind};
use crate::model::{NodeId, SourceInformation, Value, Values, keys};
use crate::parser::{self, Classifier, DeltaValue, GraphDelta, Instruction, LocalId};
use crate::scope::ScopeSet;
use crate::storage::{GraphView, MemoryStore};
use crate::tx::{Transaction, TxMode};
use crate::types::{GeneralizationCache, infer_element, lookup};
use crate::validation::validate_element;
use crate::{Error, Result};

pub use source::{Change, Source, SourceRegistry};

/// What one successful `compile()` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub sources_parsed: usize,
    pub nodes_created: u64,
    pub nodes_removed: u64,
    /// Elements resolved, validated and inferred.
    pub elements_validated: usize,
    pub stubs_resolved: usize,
}

/// Definitions of one function signature colliding in one package.
#[derive(Debug, Default)]
struct FunctionConflict {
    locations: Vec<SourceInformation>,
}

/// Owns the graph and the sources it was built from.
#[derive(Debug)]
pub struct IncrementalCompiler {
    store: MemoryStore,
    sources: SourceRegistry,
    cache: GeneralizationCache,
    scopes: ScopeSet,
    /// simple name → elements whose resolution or inference looked it up
    name_dependencies: BTreeMap<String, BTreeSet<NodeId>>,
}

impl IncrementalCompiler {
    /// A compiler over a fresh bootstrap graph. The platform library is
    /// compiled immediately unless the configuration disables it.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let mut compiler = Self {
            store: MemoryStore::new(),
            sources: SourceRegistry::new(),
            cache: GeneralizationCache::new(),
            scopes: config.scope_set()?,
            name_dependencies: BTreeMap::new(),
        };
        if config.load_platform {
            for (id, text) in platform::PLATFORM_SOURCES {
                compiler.sources.create_immutable(id, text)?;
            }
            let report = compiler.compile()?;
            debug!(nodes = report.nodes_created, "platform compiled");
        }
        Ok(compiler)
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceRegistry {
        &mut self.sources
    }

    pub fn cache(&self) -> &GeneralizationCache {
        &self.cache
    }

    pub fn has_pending(&self) -> bool {
        self.sources.has_pending()
    }

    /// Apply every pending source change. On failure the graph is left
    /// exactly as it was and the changes stay pending.
    #[instrument(skip(self))]
    pub fn compile(&mut self) -> Result<CompileReport> {
        if !self.sources.has_pending() {
            debug!("nothing to compile");
            return Ok(CompileReport::default());
        }
        let mut report = CompileReport::default();
        let mut deltas = Vec::new();
        for (id, change) in self.sources.pending() {
            if let Change::Upsert { text, .. } = change {
                deltas.push(parser::parse(id, text)?);
                report.sources_parsed += 1;
            }
        }

        let saved_dependencies = self.name_dependencies.clone();
        let tx = self.store.begin_tx(TxMode::ReadWrite)?;
        match self.apply(&tx, &deltas, &mut report) {
            Ok(elements) => {
                let stats = self.store.commit_tx(&tx)?;
                report.nodes_created = stats.nodes_created;
                report.nodes_removed = stats.nodes_removed;
                self.sources.commit(elements);
                info!(
                    parsed = report.sources_parsed,
                    created = report.nodes_created,
                    removed = report.nodes_removed,
                    validated = report.elements_validated,
                    "compile committed"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback_tx(&tx) {
                    warn!(error = %rollback, "rollback failed");
                }
                self.cache.clear();
                self.name_dependencies = saved_dependencies;
                warn!(error = %e, "compile rolled back");
                Err(e)
            }
        }
    }

    /// Everything between begin and commit. Returns the elements created
    /// for each upserted source.
    fn apply(
        &mut self,
        tx: &Transaction,
        deltas: &[GraphDelta],
        report: &mut CompileReport,
    ) -> Result<BTreeMap<String, Vec<NodeId>>> {
        let replaced = self.sources.replaced_elements();
        let removed_elements: BTreeSet<NodeId> = replaced.iter().copied().collect();
        let mut changed_names = BTreeSet::new();
        let mut touched_packages = BTreeSet::new();
        for element in &replaced {
            changed_names.extend(element_names(&self.store, *element));
            if let Some(package) = self.store.node(*element).and_then(|n| n.node_ref(keys::PACKAGE)) {
                touched_packages.insert(package);
            }
        }

        let mut affected: BTreeSet<NodeId> = closure::dependents(&self.store, replaced.iter().copied())
            .into_iter()
            .filter(|e| !removed_elements.contains(e))
            .collect();
        self.remove(tx, &removed_elements, &affected)?;

        let mut diagnostics = Vec::new();
        let mut conflicts: BTreeMap<(NodeId, String), FunctionConflict> = BTreeMap::new();
        let mut created = BTreeMap::new();
        let mut new_elements = BTreeSet::new();
        for delta in deltas {
            let elements = self.apply_delta(tx, delta, &mut conflicts, &mut diagnostics)?;
            for element in &elements {
                changed_names.extend(element_names(&self.store, *element));
            }
            new_elements.extend(elements.iter().copied());
            created.insert(delta.source_id.clone(), elements);
        }
        for ((package, signature), conflict) in conflicts {
            diagnostics.push(function_conflict(&self.store, package, &signature, conflict));
        }
        first_diagnostic(diagnostics)?;

        // Whatever still uses a package about to be pruned must resolve again.
        let prunable: BTreeSet<NodeId> =
            touched_packages.iter().flat_map(|p| self.store.prunable_packages(*p)).collect();
        for element in closure::dependents(&self.store, prunable.iter().copied()) {
            if prunable.contains(&element) || new_elements.contains(&element) {
                continue;
            }
            if affected.insert(element) {
                closure::reset_element(&mut self.store, tx, element)?;
            }
        }
        self.prune_packages(tx, &touched_packages)?;

        let looked_up: BTreeSet<NodeId> = changed_names
            .iter()
            .filter_map(|name| self.name_dependencies.get(name))
            .flatten()
            .copied()
            .filter(|e| self.store.contains(*e) && !new_elements.contains(e))
            .collect();
        for element in closure::dependents(&self.store, looked_up) {
            if !new_elements.contains(&element) && affected.insert(element) {
                closure::reset_element(&mut self.store, tx, element)?;
            }
        }

        self.cache.invalidate(affected.iter().chain(&new_elements).chain(&removed_elements).copied());
        for deps in self.name_dependencies.values_mut() {
            deps.retain(|e| !removed_elements.contains(e) && !affected.contains(e));
        }

        let targets: BTreeSet<NodeId> = affected.into_iter().chain(new_elements).collect();
        report.elements_validated = targets.len();
        self.check(tx, &targets, report)?;
        Ok(created)
    }

    /// Unbind the affected closure, then remove every node of the replaced
    /// elements.
    #[instrument(skip_all, fields(removed = removed.len(), affected = affected.len()))]
    fn remove(&mut self, tx: &Transaction, removed: &BTreeSet<NodeId>, affected: &BTreeSet<NodeId>) -> Result<()> {
        for element in affected {
            closure::reset_element(&mut self.store, tx, *element)?;
        }
        let mut nodes = BTreeSet::new();
        for element in removed {
            self.store.detach(tx, *element)?;
            nodes.extend(self.store.members(*element));
        }
        self.store.remove_nodes(tx, &nodes)
    }

    /// Create the nodes of one delta and attach its elements.
    fn apply_delta(
        &mut self,
        tx: &Transaction,
        delta: &GraphDelta,
        conflicts: &mut BTreeMap<(NodeId, String), FunctionConflict>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<NodeId>> {
        let mut ids: BTreeMap<LocalId, NodeId> = BTreeMap::new();
        let local = |ids: &BTreeMap<LocalId, NodeId>, l: LocalId| {
            ids.get(&l)
                .copied()
                .ok_or_else(|| Error::NotFound(format!("local node {} of {}", l.0, delta.source_id)))
        };
        for instruction in &delta.instructions {
            match instruction {
                Instruction::NewNode { local: l, classifier, name, element, source } => {
                    let classifier = match classifier {
                        Classifier::Bootstrap(m3) => m3.id(),
                        Classifier::Local(c) => local(&ids, *c)?,
                    };
                    let element = element.map(|e| local(&ids, e)).transpose()?;
                    let id = self.store.create_node(tx, classifier, name.clone(), element, source.clone())?;
                    ids.insert(*l, id);
                }
                Instruction::SetProperty { node, key, values } => {
                    let node = local(&ids, *node)?;
                    let values = values
                        .iter()
                        .map(|v| match v {
                            DeltaValue::Value(v) => Ok(v.clone()),
                            DeltaValue::Local(l) => Ok(Value::Node(local(&ids, *l)?)),
                        })
                        .collect::<Result<Values>>()?;
                    self.store.set_property(tx, node, key, values)?;
                }
                Instruction::Attach { element, package } => {
                    let element = local(&ids, *element)?;
                    self.attach(tx, element, package, conflicts, diagnostics)?;
                }
            }
        }
        Ok(delta.elements.iter().filter_map(|l| ids.get(l).copied()).collect())
    }

    fn attach(
        &mut self,
        tx: &Transaction,
        element: NodeId,
        package: &str,
        conflicts: &mut BTreeMap<(NodeId, String), FunctionConflict>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        let location = self.store.node(element).and_then(|n| n.source.clone()).unwrap_or_default();
        let package = match self.store.ensure_package(tx, package) {
            Ok(id) => id,
            Err(Error::DanglingReference(message)) => {
                diagnostics.push(Diagnostic::new(DiagnosticKind::DuplicateElement, location, message));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let name = self.store.node(element).and_then(|n| n.name.clone()).unwrap_or_default();
        if let Some(existing) = self.store.child(package, &name) {
            if lookup::is_function(&self.store, existing) && lookup::is_function(&self.store, element) {
                let conflict = conflicts.entry((package, name)).or_insert_with(|| FunctionConflict {
                    locations: vec![self.store.node(existing).and_then(|n| n.source.clone()).unwrap_or_default()],
                });
                conflict.locations.push(location);
                return Ok(());
            }
        }
        match self.store.attach(tx, package, element) {
            Err(Error::DuplicateElement(d)) => {
                diagnostics.push(d);
                Ok(())
            }
            other => other,
        }
    }

    /// Remove packages left empty by the change, from the outermost one
    /// that became empty down.
    fn prune_packages(&mut self, tx: &Transaction, packages: &BTreeSet<NodeId>) -> Result<()> {
        for package in packages {
            if !self.store.contains(*package) {
                continue;
            }
            let prunable = self.store.prunable_packages(*package);
            let Some(top) = prunable.last() else { continue };
            debug!(package = %self.store.path_of(*top), count = prunable.len(), "pruning empty packages");
            self.store.detach(tx, *top)?;
            self.store.remove_nodes(tx, &prunable.iter().copied().collect())?;
        }
        Ok(())
    }

    /// Resolution, validation and inference over `targets`. Each phase
    /// checks every target; the first diagnostic in reporting order fails
    /// the compile before the next phase runs.
    fn check(&mut self, tx: &Transaction, targets: &BTreeSet<NodeId>, report: &mut CompileReport) -> Result<()> {
        let mut diagnostics = Vec::new();
        for element in targets {
            match resolve::resolve_element(&mut self.store, tx, &self.scopes, *element) {
                Ok(resolution) => {
                    report.stubs_resolved += resolution.bound;
                    self.record_names(*element, resolution.names);
                }
                Err(e) => diagnostics.push(located(e)?),
            }
        }
        first_diagnostic(diagnostics)?;
        debug!(elements = targets.len(), stubs = report.stubs_resolved, "references resolved");

        let mut diagnostics = Vec::new();
        for element in targets {
            if let Err(e) = validate_element(&self.store, &self.cache, *element) {
                diagnostics.push(located(e)?);
            }
        }
        first_diagnostic(diagnostics)?;

        let mut diagnostics = Vec::new();
        for element in targets {
            match infer_element(&self.store, &self.cache, &self.scopes, *element) {
                Ok(outcome) => {
                    for write in outcome.writes {
                        self.store.set_property(tx, write.node, write.key, write.values)?;
                    }
                    self.record_names(*element, outcome.lookups);
                }
                Err(e) => diagnostics.push(located(e)?),
            }
        }
        first_diagnostic(diagnostics)?;
        debug!(elements = targets.len(), "elements validated");
        Ok(())
    }

    fn record_names(&mut self, element: NodeId, names: BTreeSet<String>) {
        for name in names {
            self.name_dependencies.entry(name).or_default().insert(element);
        }
    }
}

/// Simple names an element can be looked up by.
fn element_names(g: &MemoryStore, element: NodeId) -> Vec<String> {
    let Some(node) = g.node(element) else { return Vec::new() };
    let mut names: Vec<String> = node.name.iter().cloned().collect();
    if let Some(function_name) = node.str_property(keys::FUNCTION_NAME) {
        names.push(function_name.to_string());
    }
    names
}

fn function_conflict(g: &MemoryStore, package: NodeId, signature: &str, conflict: FunctionConflict) -> Diagnostic {
    let mut locations = conflict.locations;
    locations.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    let at = locations.get(1).cloned().unwrap_or_default();
    let listed: Vec<String> = locations.iter().map(ToString::to_string).collect();
    Diagnostic::new(
        DiagnosticKind::DuplicateElement,
        at,
        format!(
            "Function '{signature}' is defined more than once in the package '{}' at: {}",
            g.path_of(package),
            listed.join(", ")
        ),
    )
}

/// Keep located errors for sorting; anything else aborts immediately.
fn located(e: Error) -> Result<Diagnostic> {
    match e.diagnostic() {
        Some(d) => Ok(d.clone()),
        None => Err(e),
    }
}

fn first_diagnostic(mut diagnostics: Vec<Diagnostic>) -> Result<()> {
    diagnostic::sort(&mut diagnostics);
    match diagnostics.into_iter().next() {
        Some(d) => Err(d.into_error()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bare() -> IncrementalCompiler {
        IncrementalCompiler::new(&RuntimeConfig { load_platform: false, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_compile_without_changes_is_a_no_op() {
        let mut c = bare();
        assert_eq!(c.compile().unwrap(), CompileReport::default());
    }

    #[test]
    fn test_compile_creates_packages_and_elements() {
        let mut c = bare();
        c.sources_mut().create("/a.pure", "Class a::b::C { name: String[1]; }").unwrap();
        let report = c.compile().unwrap();
        assert_eq!(report.sources_parsed, 1);
        assert!(report.nodes_created > 0);
        assert!(c.store().element("a::b::C").is_some());
        assert!(c.store().element("a::b").is_some());
        c.store().validate().unwrap();
    }

    #[test]
    fn test_delete_prunes_empty_packages() {
        let mut c = bare();
        c.sources_mut().create("/a.pure", "Class a::b::C {}").unwrap();
        c.compile().unwrap();
        c.sources_mut().delete("/a.pure").unwrap();
        let report = c.compile().unwrap();
        assert!(report.nodes_removed > 0);
        assert!(c.store().element("a::b::C").is_none());
        assert!(c.store().element("a::b").is_none());
        assert!(c.store().element("a").is_none());
    }

    #[test]
    fn test_failed_compile_rolls_back_and_keeps_changes_pending() {
        let mut c = bare();
        c.sources_mut().create("/a.pure", "Class a::A {}").unwrap();
        c.compile().unwrap();
        let before = c.store().serialize().unwrap();

        c.sources_mut().create("/b.pure", "Class a::B extends a::Missing {}").unwrap();
        let err = c.compile().unwrap_err();
        assert!(matches!(err, Error::ReferentialIntegrity(_)));
        assert_eq!(c.store().serialize().unwrap(), before);
        assert!(c.has_pending());

        c.sources_mut().modify("/b.pure", "Class a::B extends a::A {}").unwrap();
        c.compile().unwrap();
        assert!(c.store().element("a::B").is_some());
    }

    #[test]
    fn test_duplicate_functions_list_every_definition() {
        let mut c = bare();
        c.sources_mut().create("/one.pure", "function p::f(s: String[1]): String[1] { $s }").unwrap();
        c.sources_mut().create("/two.pure", "function p::f(s: String[1]): String[1] { $s }").unwrap();
        let err = c.compile().unwrap_err();
        let d = err.diagnostic().unwrap();
        assert_eq!(d.kind, DiagnosticKind::DuplicateElement);
        assert!(d.message.starts_with("Function 'f_String_1__String_1_' is defined more than once in the package 'p' at: "));
        assert!(d.message.contains("resource:/one.pure"));
        assert!(d.message.contains("resource:/two.pure"));
    }

    #[test]
    fn test_modifying_a_supertype_revalidates_subclasses() {
        let mut c = bare();
        c.sources_mut().create("/a.pure", "Class p::A {}").unwrap();
        c.sources_mut().create("/b.pure", "Class p::B extends p::A {}").unwrap();
        c.compile().unwrap();

        c.sources_mut().modify("/a.pure", "Class p::A2 {}").unwrap();
        let err = c.compile().unwrap_err();
        assert_eq!(err.diagnostic().unwrap().message, "p::A has not been defined!");

        c.sources_mut().modify("/a.pure", "Class p::A { n: Integer[0..1]; }").unwrap();
        let report = c.compile().unwrap();
        assert_eq!(report.elements_validated, 3);
        c.store().validate().unwrap();
    }

    #[test]
    fn test_new_class_makes_simple_name_ambiguous() {
        let mut c = bare();
        c.sources_mut().create("/x.pure", "Class b::X {}").unwrap();
        c.sources_mut()
            .create("/user.pure", "import b::*;\nimport c::*;\nClass a::User { x: X[1]; }")
            .unwrap();
        c.compile().unwrap();

        c.sources_mut().create("/y.pure", "Class c::X {}").unwrap();
        let err = c.compile().unwrap_err();
        assert_eq!(
            err.diagnostic().unwrap().message,
            "X has been found more than one time in the imports: [b::X, c::X]"
        );
    }
}
