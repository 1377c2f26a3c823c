//! Reference resolution.
//!
//! Binds every unresolved `Reference` held by an element's nodes. A
//! qualified path names exactly one element; a simple name is searched in
//! the element's package, its imports, the auto-imports and Root, and must
//! be found exactly once. Imports name packages by full path. Bound targets
//! are then checked against the configured scopes.

use std::collections::BTreeSet;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::model::{M3, Node, NodeId, Reference, SourceInformation, Values, keys, path};
use crate::scope::ScopeSet;
use crate::storage::{GraphView, MemoryStore};
use crate::tx::Transaction;
use crate::types::lookup;
use crate::{Error, Result};

/// What resolving one element produced.
#[derive(Debug, Default)]
pub(crate) struct Resolution {
    pub bound: usize,
    /// Simple names looked up, for the name-dependency index.
    pub names: BTreeSet<String>,
}

/// Where a reference sits, which decides what it may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    /// Types, supertypes and association ends.
    Type,
    /// An element used as a value in an expression. Packages allowed.
    Value,
    /// `import a::b::*;`: a package by full path.
    Import,
}

impl Site {
    fn of(node: &Node, key: &str) -> Self {
        if key == keys::IMPORTS {
            Site::Import
        } else if key == keys::VALUES && node.classifier == M3::InstanceValue.id() {
            Site::Value
        } else {
            Site::Type
        }
    }
}

/// Bind every unresolved reference held by the nodes of `element`.
pub(crate) fn resolve_element(
    store: &mut MemoryStore,
    tx: &Transaction,
    scopes: &ScopeSet,
    element: NodeId,
) -> Result<Resolution> {
    let mut resolution = Resolution::default();
    for member in store.members(element) {
        let Some(node) = store.node(member) else { continue };
        let fallback = node.source.clone().unwrap_or_default();
        let mut updates: Vec<(String, Values)> = Vec::new();
        for (key, values) in &node.properties {
            let site = Site::of(node, key);
            let mut values = values.clone();
            let mut changed = false;
            let mut failure: Option<Error> = None;
            for value in values.iter_mut() {
                value.for_each_reference_mut(&mut |r: &mut Reference| {
                    if r.is_resolved() || failure.is_some() {
                        return;
                    }
                    if site != Site::Import {
                        resolution.names.insert(r.simple_name().to_string());
                    }
                    match bind(store, scopes, element, site, r, &fallback) {
                        Ok(target) => {
                            r.target = Some(target);
                            changed = true;
                            resolution.bound += 1;
                        }
                        Err(e) => failure = Some(e),
                    }
                });
            }
            if let Some(e) = failure {
                return Err(e);
            }
            if changed {
                updates.push((key.clone(), values));
            }
        }
        for (key, values) in updates {
            store.set_property(tx, member, &key, values)?;
        }
    }
    Ok(resolution)
}

fn bind(
    g: &MemoryStore,
    scopes: &ScopeSet,
    element: NodeId,
    site: Site,
    reference: &Reference,
    fallback: &SourceInformation,
) -> Result<NodeId> {
    let location = reference.source.clone().unwrap_or_else(|| fallback.clone());
    let found = match site {
        Site::Import => find_package(g, &reference.path),
        Site::Value => find(g, element, &reference.path, true),
        Site::Type => find(g, element, &reference.path, false),
    };
    let target = found.map_err(|message| {
        Error::ReferentialIntegrity(Diagnostic::new(DiagnosticKind::ReferentialIntegrity, location.clone(), message))
    })?;
    scopes.check_access(g, element, target).map_err(|message| {
        Error::ScopeVisibility(Diagnostic::new(DiagnosticKind::ScopeVisibility, location, message))
    })?;
    Ok(target)
}

/// Elements a path may name: anything packageable except functions, and
/// packages only where `packages` allows them.
fn is_referenceable<G: GraphView + ?Sized>(g: &G, id: NodeId, packages: bool) -> bool {
    (packages || g.classifier_of(id) != Some(M3::Package.id())) && !lookup::is_function(g, id)
}

/// The package at the full path `name`.
pub(crate) fn find_package<G: GraphView + ?Sized>(g: &G, name: &str) -> std::result::Result<NodeId, String> {
    g.element(name)
        .filter(|id| g.classifier_of(*id) == Some(M3::Package.id()))
        .ok_or_else(|| format!("{name} has not been defined!"))
}

/// Find the element `path` names from inside `element`.
pub(crate) fn find<G: GraphView + ?Sized>(
    g: &G,
    element: NodeId,
    name: &str,
    packages: bool,
) -> std::result::Result<NodeId, String> {
    if path::is_qualified(name) {
        return g
            .element(name)
            .filter(|id| is_referenceable(g, *id, packages))
            .ok_or_else(|| format!("{name} has not been defined!"));
    }
    let mut found: Vec<NodeId> = Vec::new();
    for package in lookup::search_packages(g, element) {
        let Some(package) = g.element(&package) else { continue };
        if let Some(child) = g.child(package, name) {
            if is_referenceable(g, child, packages) && !found.contains(&child) {
                found.push(child);
            }
        }
    }
    match found.as_slice() {
        [] => Err(format!("{name} has not been defined!")),
        [one] => Ok(*one),
        many => {
            let mut paths: Vec<String> = many.iter().map(|id| g.path_of(*id)).collect();
            paths.sort();
            Err(format!("{name} has been found more than one time in the imports: [{}]", paths.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxMode;

    fn class(store: &mut MemoryStore, tx: &Transaction, package: &str, name: &str) -> NodeId {
        let id = store.create_node(tx, M3::Class.id(), Some(name.into()), None, None).unwrap();
        let pkg = store.ensure_package(tx, package).unwrap();
        store.attach(tx, pkg, id).unwrap();
        id
    }

    #[test]
    fn test_find_by_simple_and_qualified_name() {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        let person = class(&mut store, &tx, "a", "Person");
        let user = class(&mut store, &tx, "a", "User");
        assert_eq!(find(&store, user, "Person", false), Ok(person));
        assert_eq!(find(&store, user, "a::Person", false), Ok(person));
        assert_eq!(find(&store, user, "String", false), Ok(M3::String.id()));
        assert_eq!(find(&store, user, "Nobody", false), Err("Nobody has not been defined!".to_string()));
        assert_eq!(find(&store, user, "a", false), Err("a has not been defined!".to_string()));
    }

    #[test]
    fn test_packages_only_where_allowed() {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        let user = class(&mut store, &tx, "a::b", "User");
        let package = store.element("a::b").unwrap();
        assert_eq!(find(&store, user, "a::b", true), Ok(package));
        assert_eq!(find(&store, user, "a::b", false), Err("a::b has not been defined!".to_string()));
        assert_eq!(find_package(&store, "a::b"), Ok(package));
        assert_eq!(find_package(&store, "a::b::User"), Err("a::b::User has not been defined!".to_string()));
        assert_eq!(find_package(&store, "no::such"), Err("no::such has not been defined!".to_string()));
    }

    #[test]
    fn test_ambiguous_imports() {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        class(&mut store, &tx, "b", "X");
        class(&mut store, &tx, "c", "X");
        let group = store.create_node(&tx, M3::ImportGroup.id(), None, None, None).unwrap();
        store
            .set_property(
                &tx,
                group,
                keys::IMPORTS,
                crate::model::property_map::many(["b", "c"].map(|p| Reference::unresolved(p, None))),
            )
            .unwrap();
        let user = class(&mut store, &tx, "a", "User");
        store
            .set_property(&tx, user, keys::IMPORT_GROUP, crate::model::property_map::one(group))
            .unwrap();
        assert_eq!(
            find(&store, user, "X", false),
            Err("X has been found more than one time in the imports: [b::X, c::X]".to_string())
        );
    }
}
