//! Node in the metamodel graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{PropertyMap, Value, Values};

/// Opaque node identifier. Stable for the lifetime of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a construct came from. Used for diagnostics only, never identity.
///
/// `line`/`column` point at the main token of the construct (an element's
/// name, a call's function name); `start_*`/`end_*` bound the whole
/// construct. All positions are 1-based and the end column is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceInformation {
    pub source_id: String,
    pub start_line: u32,
    pub start_column: u32,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceInformation {
    pub fn new(
        source_id: impl Into<String>,
        start: (u32, u32),
        main: (u32, u32),
        end: (u32, u32),
    ) -> Self {
        Self {
            source_id: source_id.into(),
            start_line: start.0,
            start_column: start.1,
            line: main.0,
            column: main.1,
            end_line: end.0,
            end_column: end.1,
        }
    }

    /// Ordering key used to report diagnostics deterministically.
    pub fn sort_key(&self) -> (&str, u32, u32) {
        (&self.source_id, self.line, self.column)
    }
}

impl fmt::Display for SourceInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(resource:{} line:{} column:{})",
            self.source_id, self.line, self.column
        )
    }
}

/// A vertex of the metamodel graph.
///
/// Every node has a classifier (another node describing its type) and a map
/// of multi-valued properties. Properties hold ids, never owning pointers,
/// so cyclic graphs (self-classified `Class`) need no shared ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub classifier: NodeId,
    pub name: Option<String>,
    /// Top-level element this node belongs to (itself for elements).
    pub element: Option<NodeId>,
    pub properties: PropertyMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInformation>,
}

impl Node {
    pub fn new(id: NodeId, classifier: NodeId) -> Self {
        Self {
            id,
            classifier,
            name: None,
            element: None,
            properties: PropertyMap::new(),
            source: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Values> {
        self.properties.get(key)
    }

    /// First value of a property, if any.
    pub fn first(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).and_then(|v| v.first())
    }

    /// All values of a property (empty when the property is unset).
    pub fn values(&self, key: &str) -> &[Value] {
        self.properties.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn str_property(&self, key: &str) -> Option<&str> {
        match self.first(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Containment children stored under `key` as `Value::Node`.
    pub fn node_refs(&self, key: &str) -> Vec<NodeId> {
        self.values(key)
            .iter()
            .filter_map(|v| match v {
                Value::Node(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn node_ref(&self, key: &str) -> Option<NodeId> {
        match self.first(key) {
            Some(Value::Node(id)) => Some(*id),
            _ => None,
        }
    }

    /// Every node id this node points at, through any property value.
    pub fn referenced_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for values in self.properties.values() {
            for v in values {
                v.collect_ids(&mut out);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_information_display() {
        let info = SourceInformation::new("/a.pure", (1, 1), (1, 7), (3, 1));
        assert_eq!(info.to_string(), "(resource:/a.pure line:1 column:7)");
    }

    #[test]
    fn test_node_properties() {
        let node = Node::new(NodeId(7), NodeId(1))
            .with_name("Person")
            .with_property("stereotypes", "access.private")
            .with_property("properties", Value::Node(NodeId(8)))
            .with_property("properties", Value::Node(NodeId(9)));
        assert_eq!(node.str_property("stereotypes"), Some("access.private"));
        assert_eq!(node.node_refs("properties"), vec![NodeId(8), NodeId(9)]);
        assert_eq!(node.referenced_ids(), vec![NodeId(8), NodeId(9)]);
        assert!(node.values("missing").is_empty());
    }
}
