//! In-memory graph store.
//!
//! Nodes live in an arena keyed by `NodeId`. Alongside the arena the store
//! maintains a reverse-reference index (referent → referrers) and a
//! classifier index, both updated on every property write.
//!
//! ## Transactions
//!
//! - **Single writer**: at most one read-write transaction is active; every
//!   mutation must pass that transaction and is recorded in its undo journal.
//! - **Atomic rollback**: `rollback_tx()` replays the journal backwards and
//!   restores the id counter, so a rolled-back compile leaves the graph
//!   byte-identical to its previous state.
//! - **Reads** never need a transaction.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::model::*;
use crate::model::bootstrap::{self, ROOT_NAME};
use crate::tx::{Transaction, TransactionManager, TxMode, TxState};
use crate::{Error, Result};
use super::journal::{Journal, UndoOp};
use super::{GraphView, StoreStats};

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory metamodel graph.
#[derive(Debug)]
pub struct MemoryStore {
    nodes: HashMap<NodeId, Node>,
    /// referent → (referrer → edge count)
    referrers: HashMap<NodeId, HashMap<NodeId, u32>>,
    /// classifier → instances
    classifier_index: HashMap<NodeId, BTreeSet<NodeId>>,
    /// element → member nodes (the element included)
    element_index: HashMap<NodeId, BTreeSet<NodeId>>,
    next_id: u64,
    /// Ids below this belong to the bootstrap and are never removed.
    first_dynamic_id: u64,
    tx_manager: TransactionManager,
    journal: Option<Journal>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store holding only the M3 bootstrap.
    pub fn new() -> Self {
        Self::with_transaction_manager(TransactionManager::new())
    }

    pub fn with_transaction_manager(tx_manager: TransactionManager) -> Self {
        let mut store = Self {
            nodes: HashMap::new(),
            referrers: HashMap::new(),
            classifier_index: HashMap::new(),
            element_index: HashMap::new(),
            next_id: 1,
            first_dynamic_id: 1,
            tx_manager,
            journal: None,
        };
        store.install_bootstrap();
        store
    }

    fn install_bootstrap(&mut self) {
        let nodes = bootstrap::bootstrap_nodes();
        self.next_id = nodes.len() as u64 + 1;
        for node in nodes {
            self.raw_insert(node);
        }
        let mut root_children = Vec::new();
        let mut meta_children = Vec::new();
        for m3 in M3::ALL {
            if m3.package().is_empty() {
                root_children.push(m3.id());
            } else {
                meta_children.push(m3.id());
            }
        }
        let metamodel = self.raw_package_chain(bootstrap::METAMODEL_PACKAGE, &mut root_children);
        for child in &meta_children {
            self.raw_set(*child, keys::PACKAGE, Some(property_map::one(Value::Node(metamodel))));
        }
        self.raw_set_children(metamodel, meta_children);
        for child in &root_children {
            self.raw_set(*child, keys::PACKAGE, Some(property_map::one(Value::Node(ROOT))));
        }
        self.raw_set_children(ROOT, root_children);
        self.first_dynamic_id = self.next_id;
        debug!(nodes = self.nodes.len(), "bootstrap installed");
    }

    /// Creates `a::b::c` under Root without journaling; returns the leaf.
    fn raw_package_chain(&mut self, path: &str, root_children: &mut Vec<NodeId>) -> NodeId {
        let mut parent = ROOT;
        for (depth, segment) in path::segments(path).into_iter().enumerate() {
            let id = self.allocate();
            let mut node = Node::new(id, M3::Package.id()).with_name(segment);
            node.element = Some(id);
            self.raw_insert(node);
            self.raw_set(id, keys::PACKAGE, Some(property_map::one(Value::Node(parent))));
            if depth == 0 {
                root_children.push(id);
            } else {
                self.raw_set_children(parent, vec![id]);
            }
            parent = id;
        }
        parent
    }

    fn raw_set_children(&mut self, package: NodeId, mut children: Vec<NodeId>) {
        children.sort_by(|a, b| self.name_of(*a).cmp(self.name_of(*b)));
        let values = property_map::many(children.into_iter().map(Value::Node));
        self.raw_set(package, keys::CHILDREN, Some(values));
    }

    fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn name_of(&self, id: NodeId) -> &str {
        self.nodes.get(&id).and_then(|n| n.name.as_deref()).unwrap_or("")
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.tx_manager
    }

    pub fn is_bootstrap(&self, id: NodeId) -> bool {
        id.0 < self.first_dynamic_id
    }

    /// Cloned node, for readers outside the store.
    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.nodes.get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction. Only one read-write transaction may be active.
    pub fn begin_tx(&mut self, mode: TxMode) -> Result<Transaction> {
        if mode == TxMode::ReadWrite {
            if let Some(journal) = &self.journal {
                match self.tx_manager.state(journal.tx) {
                    Some(TxState::Open) => {
                        return Err(Error::TransactionState(format!(
                            "write transaction {} is already active",
                            journal.tx
                        )));
                    }
                    _ => {
                        warn!(tx = %journal.tx, "discarding journal of an invalidated transaction");
                        self.undo_journal();
                    }
                }
            }
        }
        let tx = self.tx_manager.begin(mode);
        if mode == TxMode::ReadWrite {
            self.journal = Some(Journal::new(tx.id(), self.next_id));
        }
        Ok(tx)
    }

    /// Commit: the journal is dropped and the changes become permanent.
    pub fn commit_tx(&mut self, tx: &Transaction) -> Result<StoreStats> {
        tx.commit()?;
        let stats = match self.journal.take_if(|j| j.tx == tx.id()) {
            Some(journal) => journal.stats,
            None => StoreStats::default(),
        };
        debug!(tx = %tx.id(), ?stats, "store commit");
        Ok(stats)
    }

    /// Roll back: every journaled mutation is undone.
    pub fn rollback_tx(&mut self, tx: &Transaction) -> Result<StoreStats> {
        tx.rollback()?;
        let stats = match &self.journal {
            Some(j) if j.tx == tx.id() => {
                let stats = j.stats.clone();
                self.undo_journal();
                stats
            }
            _ => StoreStats::default(),
        };
        debug!(tx = %tx.id(), ?stats, "store rollback");
        Ok(stats)
    }

    /// Undo any active journal and invalidate every outstanding transaction.
    pub fn reset_transactions(&mut self) {
        self.undo_journal();
        self.tx_manager.clear();
    }

    fn undo_journal(&mut self) {
        let Some(journal) = self.journal.take() else { return };
        for op in journal.ops.into_iter().rev() {
            match op {
                UndoOp::Created(id) => {
                    self.raw_remove(id);
                }
                UndoOp::Removed(node) => self.raw_insert(*node),
                UndoOp::PropertyChanged { id, key, old } => {
                    self.raw_set(id, &key, old);
                }
            }
        }
        self.next_id = journal.next_id_at_begin;
    }

    fn check_write(&self, tx: &Transaction) -> Result<()> {
        if tx.mode() != TxMode::ReadWrite {
            return Err(Error::TransactionState(format!("{} is read-only", tx.id())));
        }
        tx.check_usable()?;
        match &self.journal {
            Some(j) if j.tx == tx.id() => Ok(()),
            _ => Err(Error::TransactionState(format!("{} is not the active write transaction", tx.id()))),
        }
    }

    fn record(&mut self, op: UndoOp) {
        if let Some(journal) = self.journal.as_mut() {
            journal.record(op);
        }
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node. `element = None` makes the node its own element.
    pub fn create_node(
        &mut self,
        tx: &Transaction,
        classifier: NodeId,
        name: Option<String>,
        element: Option<NodeId>,
        source: Option<SourceInformation>,
    ) -> Result<NodeId> {
        self.check_write(tx)?;
        if !self.nodes.contains_key(&classifier) {
            return Err(Error::DanglingReference(format!("classifier {classifier} does not exist")));
        }
        let id = self.allocate();
        let mut node = Node::new(id, classifier);
        node.name = name;
        node.element = Some(element.unwrap_or(id));
        node.source = source;
        self.raw_insert(node);
        self.record(UndoOp::Created(id));
        trace!(%id, %classifier, "node created");
        Ok(id)
    }

    /// Replace the values of a property. Empty values remove it.
    pub fn set_property(&mut self, tx: &Transaction, id: NodeId, key: &str, values: Values) -> Result<()> {
        self.check_write(tx)?;
        if !self.nodes.contains_key(&id) {
            return Err(Error::NotFound(format!("Node {id}")));
        }
        for value in &values {
            let mut targets = Vec::new();
            value.collect_ids(&mut targets);
            if let Some(missing) = targets.iter().find(|t| !self.nodes.contains_key(*t)) {
                return Err(Error::DanglingReference(format!(
                    "property '{key}' of node {id} points at missing node {missing}"
                )));
            }
        }
        let new = if values.is_empty() { None } else { Some(values) };
        let old = self.raw_set(id, key, new);
        self.record(UndoOp::PropertyChanged { id, key: key.to_string(), old });
        Ok(())
    }

    pub fn remove_property(&mut self, tx: &Transaction, id: NodeId, key: &str) -> Result<()> {
        self.set_property(tx, id, key, Values::new())
    }

    /// Rewrite a property through `f`; a no-op when nothing changed.
    pub fn update_property(
        &mut self,
        tx: &Transaction,
        id: NodeId,
        key: &str,
        f: impl FnOnce(&mut Values),
    ) -> Result<()> {
        let Some(old) = self.nodes.get(&id).and_then(|n| n.get(key)).cloned() else {
            return Ok(());
        };
        let mut new = old.clone();
        f(&mut new);
        // Reference equality ignores a missing target, so compare bindings too.
        if new == old && bound_ids(&new) == bound_ids(&old) {
            return Ok(());
        }
        self.set_property(tx, id, key, new)
    }

    /// Remove a set of nodes. Fails if a node outside the set still holds a
    /// reference to one of them.
    pub fn remove_nodes(&mut self, tx: &Transaction, ids: &BTreeSet<NodeId>) -> Result<()> {
        self.check_write(tx)?;
        for id in ids {
            if self.is_bootstrap(*id) {
                return Err(Error::DanglingReference(format!("bootstrap node {id} cannot be removed")));
            }
            if let Some(live) = self.referrers(*id).into_iter().find(|r| !ids.contains(r)) {
                return Err(Error::DanglingReference(format!(
                    "cannot remove {} ({id}): still referenced by node {live} ({})",
                    self.describe(*id),
                    self.describe(live),
                )));
            }
        }
        for id in ids {
            if let Some(node) = self.raw_remove(*id) {
                self.record(UndoOp::Removed(Box::new(node)));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Packages
    // ========================================================================

    /// Package for `path`, creating missing packages on the way.
    pub fn ensure_package(&mut self, tx: &Transaction, path: &str) -> Result<NodeId> {
        let mut current = ROOT;
        for segment in path::segments(path) {
            current = match self.child(current, segment) {
                Some(child) => {
                    if self.classifier_of(child) != Some(M3::Package.id()) {
                        return Err(Error::DanglingReference(format!(
                            "'{}' is not a package",
                            self.path_of(child)
                        )));
                    }
                    child
                }
                None => {
                    let id = self.create_node(tx, M3::Package.id(), Some(segment.to_string()), None, None)?;
                    self.attach(tx, current, id)?;
                    id
                }
            };
        }
        Ok(current)
    }

    /// Attach `child` to `package`, keeping children in name order.
    /// Names are unique per package whatever the kind of element.
    pub fn attach(&mut self, tx: &Transaction, package: NodeId, child: NodeId) -> Result<()> {
        let name = self.name_of(child).to_string();
        if let Some(existing) = self.child(package, &name) {
            let location = self
                .nodes
                .get(&child)
                .and_then(|n| n.source.clone())
                .unwrap_or_default();
            let package_path = self.path_of(package);
            let kind = self.describe_kind(existing);
            return Err(Error::DuplicateElement(Diagnostic::new(
                DiagnosticKind::DuplicateElement,
                location,
                format!("The element '{name}' already exists in the package '{package_path}' (as {kind})"),
            )));
        }
        let mut children = self.children(package);
        let position = children.partition_point(|c| self.name_of(*c) < name.as_str());
        children.insert(position, child);
        self.set_property(tx, package, keys::CHILDREN, property_map::many(children.into_iter().map(Value::Node)))?;
        self.set_property(tx, child, keys::PACKAGE, property_map::one(Value::Node(package)))
    }

    /// Detach an element from its package.
    pub fn detach(&mut self, tx: &Transaction, child: NodeId) -> Result<()> {
        let Some(package) = self.nodes.get(&child).and_then(|n| n.node_ref(keys::PACKAGE)) else {
            return Ok(());
        };
        self.update_property(tx, package, keys::CHILDREN, |values| {
            values.retain(|v| *v != Value::Node(child));
        })?;
        self.remove_property(tx, child, keys::PACKAGE)
    }

    /// `package` and the ancestors that become empty once it is removed,
    /// deepest first. Empty when `package` still has children.
    pub fn prunable_packages(&self, package: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = package;
        let mut removed_child: Option<NodeId> = None;
        loop {
            if current == ROOT || self.is_bootstrap(current) {
                break;
            }
            if self.classifier_of(current) != Some(M3::Package.id()) {
                break;
            }
            let remaining = self
                .children(current)
                .into_iter()
                .filter(|c| Some(*c) != removed_child)
                .count();
            if remaining > 0 {
                break;
            }
            out.push(current);
            removed_child = Some(current);
            match self.nodes.get(&current).and_then(|n| n.node_ref(keys::PACKAGE)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        out
    }

    // ========================================================================
    // Whole-graph operations
    // ========================================================================

    /// Walk the whole graph: every reference must be bound and live, and
    /// every classifier chain must end at the self-classified `Class`.
    pub fn validate(&self) -> Result<()> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort();
        for id in ids {
            let node = &self.nodes[&id];
            let mut seen = BTreeSet::new();
            let mut classifier = node.classifier;
            loop {
                let Some(c) = self.nodes.get(&classifier) else {
                    return Err(Error::DanglingReference(format!(
                        "classifier {classifier} of node {id} does not exist"
                    )));
                };
                if c.classifier == classifier {
                    if classifier != M3::Class.id() {
                        return Err(Error::DanglingReference(format!(
                            "classifier chain of node {id} ends at {} instead of Class",
                            self.describe(classifier)
                        )));
                    }
                    break;
                }
                if !seen.insert(classifier) {
                    return Err(Error::DanglingReference(format!("classifier cycle at node {id}")));
                }
                classifier = c.classifier;
            }
            for (key, values) in &node.properties {
                for value in values {
                    let mut unresolved = None;
                    value.for_each_reference(&mut |r| {
                        if r.target.is_none() && unresolved.is_none() {
                            unresolved = Some(r.path.clone());
                        }
                    });
                    if let Some(path) = unresolved {
                        return Err(Error::DanglingReference(format!(
                            "property '{key}' of node {id} holds unresolved reference '{path}'"
                        )));
                    }
                    let mut targets = Vec::new();
                    value.collect_ids(&mut targets);
                    if let Some(missing) = targets.iter().find(|t| !self.nodes.contains_key(*t)) {
                        return Err(Error::DanglingReference(format!(
                            "property '{key}' of node {id} points at missing node {missing}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Deterministic JSON rendering of the whole graph (nodes in id order).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(serde_json::to_vec(&nodes)?)
    }

    /// Human-readable description used in error messages.
    pub fn describe(&self, id: NodeId) -> String {
        match self.nodes.get(&id) {
            Some(node) if node.element == Some(id) => self.path_of(id),
            Some(node) => format!("{} of {}", self.describe_kind(id), node.element.map(|e| self.path_of(e)).unwrap_or_default()),
            None => format!("<missing {id}>"),
        }
    }

    fn describe_kind(&self, id: NodeId) -> &str {
        self.nodes
            .get(&id)
            .and_then(|n| self.nodes.get(&n.classifier))
            .and_then(|c| c.name.as_deref())
            .unwrap_or("node")
    }

    // ========================================================================
    // Raw operations (unjournaled, index-maintaining)
    // ========================================================================

    fn raw_insert(&mut self, node: Node) {
        let id = node.id;
        self.classifier_index.entry(node.classifier).or_default().insert(id);
        if let Some(element) = node.element {
            self.element_index.entry(element).or_default().insert(id);
        }
        let targets = node.referenced_ids();
        self.nodes.insert(id, node);
        self.link(id, &targets);
    }

    fn raw_remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        if let Some(set) = self.classifier_index.get_mut(&node.classifier) {
            set.remove(&id);
            if set.is_empty() {
                self.classifier_index.remove(&node.classifier);
            }
        }
        if let Some(element) = node.element {
            if let Some(set) = self.element_index.get_mut(&element) {
                set.remove(&id);
                if set.is_empty() {
                    self.element_index.remove(&element);
                }
            }
        }
        self.unlink(id, &node.referenced_ids());
        Some(node)
    }

    fn raw_set(&mut self, id: NodeId, key: &str, values: Option<Values>) -> Option<Values> {
        let Some(node) = self.nodes.get_mut(&id) else { return None };
        let old = match values {
            Some(v) => node.properties.insert(key.to_string(), v),
            None => node.properties.remove(key),
        };
        let mut old_ids = Vec::new();
        for v in old.iter().flatten() {
            v.collect_ids(&mut old_ids);
        }
        let mut new_ids = Vec::new();
        for v in node.properties.get(key).into_iter().flatten() {
            v.collect_ids(&mut new_ids);
        }
        self.unlink(id, &old_ids);
        self.link(id, &new_ids);
        old
    }

    fn link(&mut self, from: NodeId, targets: &[NodeId]) {
        for t in targets {
            *self.referrers.entry(*t).or_default().entry(from).or_insert(0) += 1;
        }
    }

    fn unlink(&mut self, from: NodeId, targets: &[NodeId]) {
        for t in targets {
            if let Some(map) = self.referrers.get_mut(t) {
                if let Some(count) = map.get_mut(&from) {
                    *count -= 1;
                    if *count == 0 {
                        map.remove(&from);
                    }
                }
                if map.is_empty() {
                    self.referrers.remove(t);
                }
            }
        }
    }
}

fn bound_ids(values: &Values) -> Vec<NodeId> {
    let mut out = Vec::new();
    for v in values {
        v.collect_ids(&mut out);
    }
    out
}

// ============================================================================
// GraphView impl
// ============================================================================

impl GraphView for MemoryStore {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn element(&self, path: &str) -> Option<NodeId> {
        if path == ROOT_NAME || path.is_empty() {
            return Some(ROOT);
        }
        let mut current = ROOT;
        for segment in path::segments(path) {
            current = self.child(current, segment)?;
        }
        Some(current)
    }

    fn referrers(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<_> = self
            .referrers
            .get(&id)
            .map(|m| m.keys().copied().filter(|r| *r != id).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn classified_by(&self, classifier: NodeId) -> Vec<NodeId> {
        self.classifier_index
            .get(&classifier)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn members(&self, element: NodeId) -> Vec<NodeId> {
        self.element_index
            .get(&element)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
