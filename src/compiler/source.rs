//! Source registry.
//!
//! Tracks committed source units, the elements each one contributed, and
//! the changes waiting for the next compile. A unit moves through
//! `Absent → Parsed (pending) → Applied (committed) → Deleted`.

use std::collections::BTreeMap;

use crate::model::NodeId;
use crate::{Error, Result};

/// A committed source unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    pub text: String,
    /// Platform sources cannot be modified or deleted.
    pub immutable: bool,
    /// Top-level nodes created from this source, import group first.
    pub elements: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Upsert { text: String, immutable: bool },
    Delete,
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    committed: BTreeMap<String, Source>,
    pending: BTreeMap<String, Change>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` exists once pending changes are taken into account.
    pub fn exists(&self, id: &str) -> bool {
        match self.pending.get(id) {
            Some(Change::Upsert { .. }) => true,
            Some(Change::Delete) => false,
            None => self.committed.contains_key(id),
        }
    }

    fn check_mutable(&self, id: &str) -> Result<()> {
        match self.committed.get(id) {
            Some(source) if source.immutable => {
                Err(Error::Source(format!("Source '{id}' is immutable")))
            }
            _ => Ok(()),
        }
    }

    pub fn create(&mut self, id: &str, text: &str) -> Result<()> {
        self.create_with(id, text, false)
    }

    /// Register a source that can never change afterwards.
    pub fn create_immutable(&mut self, id: &str, text: &str) -> Result<()> {
        self.create_with(id, text, true)
    }

    fn create_with(&mut self, id: &str, text: &str, immutable: bool) -> Result<()> {
        if self.exists(id) {
            return Err(Error::Source(format!("Source '{id}' already exists")));
        }
        self.check_mutable(id)?;
        self.pending.insert(id.to_string(), Change::Upsert { text: text.to_string(), immutable });
        Ok(())
    }

    pub fn modify(&mut self, id: &str, text: &str) -> Result<()> {
        if !self.exists(id) {
            return Err(Error::Source(format!("Source '{id}' does not exist")));
        }
        self.check_mutable(id)?;
        if self.committed.get(id).is_some_and(|s| s.text == text) {
            self.pending.remove(id);
        } else {
            self.pending.insert(id.to_string(), Change::Upsert { text: text.to_string(), immutable: false });
        }
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        if !self.exists(id) {
            return Err(Error::Source(format!("Source '{id}' does not exist")));
        }
        self.check_mutable(id)?;
        if self.committed.contains_key(id) {
            self.pending.insert(id.to_string(), Change::Delete);
        } else {
            self.pending.remove(id);
        }
        Ok(())
    }

    pub fn add_or_update(&mut self, id: &str, text: &str) -> Result<()> {
        if self.exists(id) { self.modify(id, text) } else { self.create(id, text) }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Pending changes in source id order.
    pub fn pending(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.pending.iter().map(|(id, c)| (id.as_str(), c))
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.committed.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.committed.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Elements owned by committed sources that have a pending change.
    pub fn replaced_elements(&self) -> Vec<NodeId> {
        self.pending
            .keys()
            .filter_map(|id| self.committed.get(id))
            .flat_map(|s| s.elements.iter().copied())
            .collect()
    }

    /// Make pending changes permanent. `elements` maps every upserted id to
    /// the elements created for it.
    pub fn commit(&mut self, mut elements: BTreeMap<String, Vec<NodeId>>) {
        for (id, change) in std::mem::take(&mut self.pending) {
            match change {
                Change::Delete => {
                    self.committed.remove(&id);
                }
                Change::Upsert { text, immutable } => {
                    let elements = elements.remove(&id).unwrap_or_default();
                    self.committed.insert(id.clone(), Source { id, text, immutable, elements });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut r = SourceRegistry::new();
        r.create("/a.pure", "Class A {}").unwrap();
        assert!(r.exists("/a.pure"));
        assert!(r.get("/a.pure").is_none());
        r.commit(BTreeMap::from([("/a.pure".to_string(), vec![NodeId(100)])]));
        assert_eq!(r.get("/a.pure").unwrap().elements, vec![NodeId(100)]);
        assert!(!r.has_pending());

        r.delete("/a.pure").unwrap();
        assert!(!r.exists("/a.pure"));
        assert_eq!(r.replaced_elements(), vec![NodeId(100)]);
        r.commit(BTreeMap::new());
        assert!(r.is_empty());
    }

    #[test]
    fn test_misuse_is_reported() {
        let mut r = SourceRegistry::new();
        assert!(matches!(r.modify("/x", ""), Err(Error::Source(_))));
        assert!(matches!(r.delete("/x"), Err(Error::Source(_))));
        r.create("/x", "").unwrap();
        assert!(matches!(r.create("/x", ""), Err(Error::Source(_))));
        r.delete("/x").unwrap();
        assert!(!r.has_pending());
    }

    #[test]
    fn test_modify_back_to_committed_text_is_not_a_change() {
        let mut r = SourceRegistry::new();
        r.create("/x", "Class A {}").unwrap();
        r.commit(BTreeMap::new());
        r.modify("/x", "Class B {}").unwrap();
        assert!(r.has_pending());
        r.add_or_update("/x", "Class A {}").unwrap();
        assert!(!r.has_pending());
    }

    #[test]
    fn test_immutable_sources() {
        let mut r = SourceRegistry::new();
        r.create_immutable("/platform/core.pure", "").unwrap();
        r.commit(BTreeMap::new());
        let err = r.delete("/platform/core.pure").unwrap_err();
        assert_eq!(err.to_string(), "Source error: Source '/platform/core.pure' is immutable");
        assert!(r.modify("/platform/core.pure", "x").is_err());
    }
}
