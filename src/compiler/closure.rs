//! Affected closure.
//!
//! An element must be re-validated when something it references changed.
//! The store's reverse-reference index answers "who points at this node",
//! so the closure is a breadth-first walk over referrers, lifted from
//! member nodes to the elements owning them.

use std::collections::{BTreeSet, VecDeque};

use crate::model::{M3, NodeId, keys};
use crate::storage::{GraphView, MemoryStore};
use crate::tx::Transaction;
use crate::Result;

/// `seeds` plus every element that references one of them, transitively.
/// Packages are never part of the closure.
pub(crate) fn dependents<G: GraphView + ?Sized>(g: &G, seeds: impl IntoIterator<Item = NodeId>) -> BTreeSet<NodeId> {
    let mut closure = BTreeSet::new();
    let mut queue = VecDeque::new();
    for seed in seeds {
        if closure.insert(seed) {
            queue.push_back(seed);
        }
    }
    while let Some(element) = queue.pop_front() {
        for member in g.members(element) {
            for referrer in g.referrers(member) {
                let Some(owner) = g.element_of(referrer) else { continue };
                if g.classifier_of(owner) == Some(M3::Package.id()) {
                    continue;
                }
                if closure.insert(owner) {
                    queue.push_back(owner);
                }
            }
        }
    }
    closure
}

/// Return an element to its parsed state: inferred values dropped and every
/// reference unbound, so resolution and inference can run again.
pub(crate) fn reset_element(store: &mut MemoryStore, tx: &Transaction, element: NodeId) -> Result<()> {
    for member in store.members(element) {
        let Some(node) = store.node(member) else { continue };
        let mut updates = Vec::new();
        for (key, values) in &node.properties {
            if keys::INFERRED.contains(&key.as_str()) {
                updates.push((key.clone(), None));
                continue;
            }
            let mut values = values.clone();
            let mut changed = false;
            for value in values.iter_mut() {
                value.for_each_reference_mut(&mut |r: &mut crate::model::Reference| {
                    if r.target.take().is_some() {
                        changed = true;
                    }
                });
            }
            if changed {
                updates.push((key.clone(), Some(values)));
            }
        }
        for (key, values) in updates {
            match values {
                Some(values) => store.set_property(tx, member, &key, values)?,
                None => store.remove_property(tx, member, &key)?,
            }
        }
    }
    Ok(())
}
