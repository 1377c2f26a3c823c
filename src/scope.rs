//! Repository scopes.
//!
//! A scope owns the packages whose path matches its pattern and may see the
//! elements of the scopes it depends on (transitively). Packages owned by
//! no scope are visible from everywhere, and elements outside every scope
//! may see everything.

use std::collections::{BTreeMap, BTreeSet};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{M3, NodeId, keys, path};
use crate::storage::GraphView;
use crate::types::lookup;
use crate::{Error, Result};

/// Stereotype marking an element as private to its scope.
pub const PRIVATE_STEREOTYPE: &str = "access.private";

/// Scope declaration as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub name: String,
    /// Regular expression over package paths, matched against the whole path.
    pub pattern: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ScopeDescriptor {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, dependencies: &[&str]) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Scope {
    name: String,
    pattern: Regex,
    /// Transitive dependencies, the scope itself included.
    visible: BTreeSet<String>,
}

/// A validated set of scopes.
#[derive(Debug, Clone, Default)]
pub struct ScopeSet {
    scopes: Vec<Scope>,
}

impl ScopeSet {
    /// Build the set. Fails on duplicate names, unknown dependencies and
    /// patterns that do not compile.
    pub fn new(descriptors: &[ScopeDescriptor]) -> Result<Self> {
        let mut by_name: BTreeMap<&str, &ScopeDescriptor> = BTreeMap::new();
        for d in descriptors {
            if by_name.insert(d.name.as_str(), d).is_some() {
                return Err(Error::ScopeConfig(format!("The scope '{}' is defined more than once", d.name)));
            }
        }
        for d in descriptors {
            if let Some(missing) = d.dependencies.iter().find(|dep| !by_name.contains_key(dep.as_str())) {
                return Err(Error::ScopeConfig(format!(
                    "The scope '{}' depends on the unknown scope '{missing}'",
                    d.name
                )));
            }
        }

        let mut scopes = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            let pattern = Regex::new(&format!("^(?:{})$", d.pattern)).map_err(|e| {
                Error::ScopeConfig(format!("Invalid pattern for the scope '{}': {e}", d.name))
            })?;
            let mut visible = BTreeSet::from([d.name.clone()]);
            let mut stack: Vec<&str> = d.dependencies.iter().map(String::as_str).collect();
            while let Some(dep) = stack.pop() {
                if visible.insert(dep.to_string()) {
                    if let Some(next) = by_name.get(dep) {
                        stack.extend(next.dependencies.iter().map(String::as_str));
                    }
                }
            }
            scopes.push(Scope { name: d.name.clone(), pattern, visible });
        }
        Ok(Self { scopes })
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Scope owning `package`, the first declared one when several match.
    pub fn scope_of(&self, package: &str) -> Option<&str> {
        self.scopes.iter().find(|s| s.pattern.is_match(package)).map(|s| s.name.as_str())
    }

    /// Whether code in `from_package` may see elements of `to_package`.
    pub fn is_visible(&self, from_package: &str, to_package: &str) -> bool {
        let Some(to) = self.scope_of(to_package) else { return true };
        let Some(from) = self.scope_of(from_package) else { return true };
        self.scopes
            .iter()
            .find(|s| s.name == from)
            .is_some_and(|s| s.visible.contains(to))
    }

    /// Whether a private element of `to_package` may be used from
    /// `from_package`: same scope, or same package when unscoped.
    pub fn is_accessible(&self, from_package: &str, to_package: &str) -> bool {
        match (self.scope_of(from_package), self.scope_of(to_package)) {
            (_, None) => from_package == to_package,
            (from, to) => from == to,
        }
    }

    /// Whether `element` may use `target`. On failure returns the message
    /// to report at the use site. Packages are never scope-checked.
    pub fn check_access<G: GraphView + ?Sized>(
        &self,
        g: &G,
        element: NodeId,
        target: NodeId,
    ) -> std::result::Result<(), String> {
        if self.is_empty() || g.classifier_of(target) == Some(M3::Package.id()) {
            return Ok(());
        }
        let from = lookup::package_of_element(g, element);
        let to = lookup::package_of_element(g, target);
        if !self.is_visible(&from, &to) {
            return Err(format!(
                "{} is not visible in the scope '{}'",
                display_path(g, target),
                self.scope_of(&from).unwrap_or_default()
            ));
        }
        let private = g
            .node(target)
            .is_some_and(|n| n.values(keys::STEREOTYPES).iter().any(|v| v.as_str() == Some(PRIVATE_STEREOTYPE)));
        if private && !self.is_accessible(&from, &to) {
            return Err(format!(
                "{} is private and not accessible from {}",
                display_path(g, target),
                display_path(g, element)
            ));
        }
        Ok(())
    }
}

/// Path of an element as written in source: functions by package and
/// function name rather than signature id.
fn display_path<G: GraphView + ?Sized>(g: &G, element: NodeId) -> String {
    match g.node(element).and_then(|n| n.str_property(keys::FUNCTION_NAME)) {
        Some(name) => path::join(&lookup::package_of_element(g, element), name),
        None => g.path_of(element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> ScopeSet {
        ScopeSet::new(&[
            ScopeDescriptor::new("core", "core(::.*)?", &[]),
            ScopeDescriptor::new("model", "model(::.*)?", &["core"]),
            ScopeDescriptor::new("app", "app(::.*)?", &["model"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_scope_of_matches_whole_path() {
        let s = scopes();
        assert_eq!(s.scope_of("model::x"), Some("model"));
        assert_eq!(s.scope_of("model"), Some("model"));
        assert_eq!(s.scope_of("modelling"), None);
    }

    #[test]
    fn test_visibility_follows_dependencies_transitively() {
        let s = scopes();
        assert!(s.is_visible("app::a", "core::b"));
        assert!(s.is_visible("model::a", "core::b"));
        assert!(!s.is_visible("core::a", "model::b"));
        assert!(s.is_visible("core::a", "other::b"));
        assert!(s.is_visible("other::a", "app::b"));
    }

    #[test]
    fn test_private_access() {
        let s = scopes();
        assert!(s.is_accessible("model::a", "model::b::c"));
        assert!(!s.is_accessible("app::a", "model::b"));
        assert!(s.is_accessible("x", "x"));
        assert!(!s.is_accessible("y", "x"));
    }

    #[test]
    fn test_invalid_configurations() {
        let dup = ScopeSet::new(&[ScopeDescriptor::new("a", "a", &[]), ScopeDescriptor::new("a", "b", &[])]);
        assert!(matches!(dup, Err(Error::ScopeConfig(m)) if m.contains("more than once")));
        let unknown = ScopeSet::new(&[ScopeDescriptor::new("a", "a", &["zzz"])]);
        assert!(matches!(unknown, Err(Error::ScopeConfig(m)) if m.contains("'zzz'")));
        let bad = ScopeSet::new(&[ScopeDescriptor::new("a", "(", &[])]);
        assert!(matches!(bad, Err(Error::ScopeConfig(_))));
    }
}
