//! Generalization linearization.
//!
//! Each class gets a breadth-first ordered list of its ancestors, expressed
//! in terms of the class's own type parameters (`Box<T> extends List<T>`
//! linearizes to `[Box<T>, List<T>, Any]`). Lists are cached and
//! invalidated per class by the incremental compiler.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{GenericType, M3, Multiplicity, NodeId, RawType, Reference, keys};
use crate::storage::GraphView;

/// Cache of linearized generalization lists, keyed by element id.
#[derive(Debug, Default)]
pub struct GeneralizationCache {
    entries: Mutex<HashMap<NodeId, Arc<Vec<GenericType>>>>,
}

impl GeneralizationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ancestors of `element`, itself first and `Any` last.
    pub fn linearize<G: GraphView + ?Sized>(&self, g: &G, element: NodeId) -> Arc<Vec<GenericType>> {
        if let Some(hit) = self.entries.lock().get(&element) {
            return Arc::clone(hit);
        }
        let computed = Arc::new(compute(g, element));
        self.entries.lock().insert(element, Arc::clone(&computed));
        computed
    }

    pub fn invalidate(&self, elements: impl IntoIterator<Item = NodeId>) {
        let mut entries = self.entries.lock();
        for id in elements {
            entries.remove(&id);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `sub` equals `sup` or has it among its ancestors. `Nil` is below
    /// everything and everything is below `Any`.
    pub fn is_subtype<G: GraphView + ?Sized>(&self, g: &G, sub: NodeId, sup: NodeId) -> bool {
        if sub == sup || sub == M3::Nil.id() || sup == M3::Any.id() {
            return true;
        }
        self.linearize(g, sub).iter().any(|t| t.element_id() == Some(sup))
    }

    /// View `t` as its ancestor `ancestor`, substituting type arguments
    /// along the generalization chain. `None` when `ancestor` is not one.
    pub fn resolve_ancestor<G: GraphView + ?Sized>(
        &self,
        g: &G,
        t: &GenericType,
        ancestor: NodeId,
    ) -> Option<GenericType> {
        let element = t.element_id()?;
        let entry = self
            .linearize(g, element)
            .iter()
            .find(|a| a.element_id() == Some(ancestor))
            .cloned()?;
        Some(substitute_declared(g, element, t, &entry))
    }
}

/// Type parameter names declared on a class or function.
pub fn type_parameters<G: GraphView + ?Sized>(g: &G, id: NodeId) -> Vec<String> {
    g.node(id)
        .map(|n| n.values(keys::TYPE_PARAMETERS).iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

pub fn multiplicity_parameters<G: GraphView + ?Sized>(g: &G, id: NodeId) -> Vec<String> {
    g.node(id)
        .map(|n| {
            n.values(keys::MULTIPLICITY_PARAMETERS).iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        })
        .unwrap_or_default()
}

/// The type of `element` applied to its own parameters (`Box<T|m>`).
pub fn self_type<G: GraphView + ?Sized>(g: &G, element: NodeId) -> GenericType {
    GenericType::element(Reference::resolved(g.path_of(element), element))
        .with_type_arguments(type_parameters(g, element).into_iter().map(GenericType::parameter).collect())
        .with_multiplicity_arguments(
            multiplicity_parameters(g, element).into_iter().map(Multiplicity::Parameter).collect(),
        )
}

/// Replace `declaring`'s parameters inside `declared` by the arguments
/// carried by `actual`. Missing arguments leave the parameter open.
pub fn substitute_declared<G: GraphView + ?Sized>(
    g: &G,
    declaring: NodeId,
    actual: &GenericType,
    declared: &GenericType,
) -> GenericType {
    let params = type_parameters(g, declaring);
    let mult_params = multiplicity_parameters(g, declaring);
    let mut bindings = super::Bindings::default();
    for (name, arg) in params.iter().zip(&actual.type_arguments) {
        bindings.types.insert(name.clone(), arg.clone());
    }
    for (name, arg) in mult_params.iter().zip(&actual.multiplicity_arguments) {
        bindings.multiplicities.insert(name.clone(), arg.clone());
    }
    bindings.substitute_lenient(declared)
}

fn compute<G: GraphView + ?Sized>(g: &G, element: NodeId) -> Vec<GenericType> {
    let mut out = vec![self_type(g, element)];
    let mut seen = BTreeSet::from([element]);
    let mut queue = VecDeque::from([0usize]);
    while let Some(index) = queue.pop_front() {
        let current = out[index].clone();
        let Some(id) = current.element_id() else { continue };
        let Some(node) = g.node(id) else { continue };
        for general in node.values(keys::GENERALIZATIONS).iter().filter_map(|v| v.as_type()) {
            let Some(target) = general.element_id() else { continue };
            if target == M3::Any.id() || !seen.insert(target) {
                continue;
            }
            if !matches!(general.raw, RawType::Element(_)) {
                continue;
            }
            out.push(substitute_declared(g, id, &current, general));
            queue.push_back(out.len() - 1);
        }
    }
    if element != M3::Any.id() {
        out.push(M3::Any.generic_type());
    }
    out
}

/// Generalization targets of `element` that lead back to it.
pub fn find_cycle<G: GraphView + ?Sized>(g: &G, element: NodeId) -> bool {
    let mut stack: Vec<NodeId> = direct_generalizations(g, element);
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if id == element {
            return true;
        }
        if seen.insert(id) {
            stack.extend(direct_generalizations(g, id));
        }
    }
    false
}

pub fn direct_generalizations<G: GraphView + ?Sized>(g: &G, element: NodeId) -> Vec<NodeId> {
    g.node(element)
        .map(|n| n.values(keys::GENERALIZATIONS).iter().filter_map(|v| v.as_type()?.element_id()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Value, property_map};
    use crate::storage::MemoryStore;
    use crate::tx::TxMode;

    fn class(store: &mut MemoryStore, tx: &crate::tx::Transaction, name: &str, params: &[&str], extends: Vec<GenericType>) -> NodeId {
        let id = store.create_node(tx, M3::Class.id(), Some(name.into()), None, None).unwrap();
        if !params.is_empty() {
            store
                .set_property(tx, id, keys::TYPE_PARAMETERS, property_map::many(params.iter().map(|p| Value::from(*p))))
                .unwrap();
        }
        if !extends.is_empty() {
            store.set_property(tx, id, keys::GENERALIZATIONS, property_map::many(extends.into_iter().map(Value::Type))).unwrap();
        }
        let root = store.ensure_package(tx, "t").unwrap();
        store.attach(tx, root, id).unwrap();
        id
    }

    fn of(id: NodeId, path: &str, args: Vec<GenericType>) -> GenericType {
        GenericType::element(Reference::resolved(path, id)).with_type_arguments(args)
    }

    #[test]
    fn test_linearization_is_breadth_first_with_any_last() {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        let a = class(&mut store, &tx, "A", &[], vec![]);
        let b = class(&mut store, &tx, "B", &[], vec![of(a, "t::A", vec![])]);
        let c = class(&mut store, &tx, "C", &[], vec![]);
        let d = class(&mut store, &tx, "D", &[], vec![of(b, "t::B", vec![]), of(c, "t::C", vec![])]);
        let cache = GeneralizationCache::new();
        let names: Vec<String> = cache.linearize(&store, d).iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["D", "B", "C", "A", "Any"]);
        assert!(cache.is_subtype(&store, d, a));
        assert!(!cache.is_subtype(&store, a, d));
        assert!(cache.is_subtype(&store, M3::Nil.id(), d));
    }

    #[test]
    fn test_resolve_ancestor_substitutes_arguments() {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        let list = class(&mut store, &tx, "L", &["T"], vec![]);
        let boxed = class(&mut store, &tx, "Box", &["U"], vec![of(list, "t::L", vec![GenericType::parameter("U")])]);
        let cache = GeneralizationCache::new();
        let actual = of(boxed, "t::Box", vec![M3::String.generic_type()]);
        let seen = cache.resolve_ancestor(&store, &actual, list).unwrap();
        assert_eq!(seen.to_string(), "L<String>");
        assert!(cache.resolve_ancestor(&store, &actual, M3::Integer.id()).is_none());
    }

    #[test]
    fn test_cycle_detection_and_invalidation() {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        let a = class(&mut store, &tx, "A", &[], vec![]);
        let b = class(&mut store, &tx, "B", &[], vec![of(a, "t::A", vec![])]);
        store
            .set_property(&tx, a, keys::GENERALIZATIONS, property_map::one(Value::Type(of(b, "t::B", vec![]))))
            .unwrap();
        assert!(find_cycle(&store, a));
        let cache = GeneralizationCache::new();
        assert_eq!(cache.linearize(&store, a).len(), 3);
        cache.invalidate([a]);
        assert!(cache.is_empty());
    }
}
