//! Name lookup shared by resolution, inference and validation.

use crate::model::{GenericType, M3, NodeId, Value, bootstrap::AUTO_IMPORTS, keys, path};
use crate::storage::GraphView;

use super::GeneralizationCache;

/// Package of a packageable element (`""` for Root).
pub fn package_of_element<G: GraphView + ?Sized>(g: &G, element: NodeId) -> String {
    match g.node(element).and_then(|n| n.node_ref(keys::PACKAGE)) {
        Some(pkg) if pkg != crate::model::ROOT => g.path_of(pkg),
        _ => String::new(),
    }
}

/// Imports declared by the source that defined `element`.
pub fn imports_of<G: GraphView + ?Sized>(g: &G, element: NodeId) -> Vec<String> {
    let Some(group) = g.node(element).and_then(|n| n.node_ref(keys::IMPORT_GROUP)) else {
        return Vec::new();
    };
    g.node(group)
        .map(|n| {
            n.values(keys::IMPORTS)
                .iter()
                .filter_map(|v| match v {
                    Value::Ref(r) => Some(r.path.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Packages searched for an unqualified name used inside `element`, in
/// order: its own package, its imports, the auto-imports, then Root.
pub fn search_packages<G: GraphView + ?Sized>(g: &G, element: NodeId) -> Vec<String> {
    let mut out = vec![package_of_element(g, element)];
    for p in imports_of(g, element).into_iter().chain(AUTO_IMPORTS.iter().map(|s| s.to_string())) {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    if !out.iter().any(String::is_empty) {
        out.push(String::new());
    }
    out
}

pub fn is_function<G: GraphView + ?Sized>(g: &G, id: NodeId) -> bool {
    g.classifier_of(id).and_then(M3::from_id).is_some_and(M3::is_function)
}

/// Functions named `name` visible from `element`. A qualified name only
/// searches its own package.
pub fn function_candidates<G: GraphView + ?Sized>(g: &G, element: NodeId, name: &str) -> Vec<NodeId> {
    let (packages, simple) = if path::is_qualified(name) {
        (vec![path::package_of(name).to_string()], path::simple_name(name))
    } else {
        (search_packages(g, element), name)
    };
    let mut out = Vec::new();
    for package in packages {
        let Some(pkg) = g.element(&package) else { continue };
        for child in g.children(pkg) {
            if out.contains(&child) || !is_function(g, child) {
                continue;
            }
            if g.node(child).and_then(|n| n.str_property(keys::FUNCTION_NAME)) == Some(simple) {
                out.push(child);
            }
        }
    }
    out
}

/// A property visible on a type, with the ancestor that declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundProperty {
    pub property: NodeId,
    /// The receiver seen as the declaring class (`List<String>`), used to
    /// substitute the declaration's type parameters.
    pub declaring: GenericType,
    pub declaring_id: NodeId,
}

/// Find a simple property on `receiver` (own, inherited, association ends).
pub fn find_property<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    receiver: &GenericType,
    name: &str,
) -> Option<FoundProperty> {
    all_properties(g, cache, receiver).into_iter().find(|p| property_name(g, p.property) == Some(name))
}

/// Every simple property of `receiver`, nearest declaration first. A name
/// redeclared in a subclass hides the inherited one.
pub fn all_properties<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    receiver: &GenericType,
) -> Vec<FoundProperty> {
    let Some(class) = receiver.element_id() else { return Vec::new() };
    let mut out: Vec<FoundProperty> = Vec::new();
    let mut seen_names: Vec<String> = Vec::new();
    for ancestor in cache.linearize(g, class).iter() {
        let Some(declaring_id) = ancestor.element_id() else { continue };
        let declaring = cache.resolve_ancestor(g, receiver, declaring_id).unwrap_or_else(|| ancestor.clone());
        let own = g.node(declaring_id).map(|n| n.node_refs(keys::PROPERTIES)).unwrap_or_default();
        for property in own.into_iter().chain(association_ends(g, declaring_id)) {
            let Some(name) = property_name(g, property) else { continue };
            if seen_names.iter().any(|n| n == name) {
                continue;
            }
            seen_names.push(name.to_string());
            out.push(FoundProperty { property, declaring: declaring.clone(), declaring_id });
        }
    }
    out
}

/// Qualified properties named `name` on `receiver`, nearest first.
pub fn qualified_properties<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    receiver: &GenericType,
    name: &str,
) -> Vec<FoundProperty> {
    let Some(class) = receiver.element_id() else { return Vec::new() };
    let mut out = Vec::new();
    for ancestor in cache.linearize(g, class).iter() {
        let Some(declaring_id) = ancestor.element_id() else { continue };
        let declaring = cache.resolve_ancestor(g, receiver, declaring_id).unwrap_or_else(|| ancestor.clone());
        for qp in g.node(declaring_id).map(|n| n.node_refs(keys::QUALIFIED_PROPERTIES)).unwrap_or_default() {
            if property_name(g, qp) == Some(name) {
                out.push(FoundProperty { property: qp, declaring: declaring.clone(), declaring_id });
            }
        }
    }
    out
}

/// Ends of associations navigable from `class`: for an association
/// `{a: A[1]; b: B[*];}`, class `A` sees `b` and class `B` sees `a`.
pub fn association_ends<G: GraphView + ?Sized>(g: &G, class: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    for association in g.classified_by(M3::Association.id()) {
        let ends = g.node(association).map(|n| n.node_refs(keys::PROPERTIES)).unwrap_or_default();
        let [first, second] = ends.as_slice() else { continue };
        if end_target(g, *first) == Some(class) {
            out.push(*second);
        }
        if end_target(g, *second) == Some(class) && first != second {
            out.push(*first);
        }
    }
    out
}

fn end_target<G: GraphView + ?Sized>(g: &G, property: NodeId) -> Option<NodeId> {
    g.node(property)?.first(keys::GENERIC_TYPE)?.as_type()?.element_id()
}

pub fn property_name<G: GraphView + ?Sized>(g: &G, property: NodeId) -> Option<&str> {
    g.node(property).and_then(|n| n.name.as_deref())
}
