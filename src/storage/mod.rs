//! # Graph Store
//!
//! The in-memory arena that owns every node, plus the read contract
//! (`GraphView`) that the type engine, grammar extensions and execution
//! strategies consume.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | Arena with reverse-reference index and undo journal |

pub mod memory;
pub mod journal;

use crate::model::{Node, NodeId, keys, path};

pub use memory::MemoryStore;

// ============================================================================
// Read contract
// ============================================================================

/// Read-only graph query API.
pub trait GraphView {
    fn node(&self, id: NodeId) -> Option<&Node>;

    /// Resolve an absolute element path (`a::b::C`, `Root` for the root).
    fn element(&self, path: &str) -> Option<NodeId>;

    /// Nodes holding a strong or resolved reference to `id`.
    fn referrers(&self, id: NodeId) -> Vec<NodeId>;

    /// Nodes whose classifier is `classifier`, in id order.
    fn classified_by(&self, classifier: NodeId) -> Vec<NodeId>;

    /// Nodes owned by a top-level element, the element included, in id order.
    fn members(&self, element: NodeId) -> Vec<NodeId>;

    fn node_count(&self) -> usize;

    /// Full path of a packageable element (`Root` for the root package).
    fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let Some(node) = self.node(cur) else { break };
            if cur == crate::model::ROOT {
                break;
            }
            names.push(node.name.clone().unwrap_or_default());
            current = node.node_ref(keys::PACKAGE);
        }
        if names.is_empty() {
            return crate::model::bootstrap::ROOT_NAME.to_string();
        }
        names.reverse();
        names.join(path::SEPARATOR)
    }

    /// Children of a package, in name order.
    fn children(&self, package: NodeId) -> Vec<NodeId> {
        self.node(package).map(|n| n.node_refs(keys::CHILDREN)).unwrap_or_default()
    }

    /// Child of a package with the given simple name.
    fn child(&self, package: NodeId, name: &str) -> Option<NodeId> {
        self.children(package)
            .into_iter()
            .find(|c| self.node(*c).and_then(|n| n.name.as_deref()) == Some(name))
    }

    fn classifier_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).map(|n| n.classifier)
    }

    /// Top-level element owning `id`.
    fn element_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.element)
    }
}

// ============================================================================
// Store statistics
// ============================================================================

/// Counters describing store activity during one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub nodes_created: u64,
    pub nodes_removed: u64,
    pub properties_set: u64,
}
