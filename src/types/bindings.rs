//! Type and multiplicity parameter bindings.
//!
//! Unification never edits a signature: it records what each parameter
//! stands for, and `substitute` builds fresh `GenericType`s from those
//! records.

use std::collections::BTreeMap;

use crate::model::{GenericType, Multiplicity, RawType, TypeOperator};
use crate::storage::GraphView;

use super::GeneralizationCache;
use super::relation::{self, RelationError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    pub types: BTreeMap<String, GenericType>,
    pub multiplicities: BTreeMap<String, Multiplicity>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, widening to the common supertype when already bound.
    pub fn bind_type<G: GraphView + ?Sized>(
        &mut self,
        g: &G,
        cache: &GeneralizationCache,
        name: &str,
        t: &GenericType,
    ) {
        let merged = match self.types.get(name) {
            Some(existing) => common_supertype(g, cache, existing, t),
            None => t.clone(),
        };
        self.types.insert(name.to_string(), merged);
    }

    /// Bind `name`, widening to the covering interval when already bound.
    pub fn bind_multiplicity(&mut self, name: &str, m: &Multiplicity) {
        let merged = match self.multiplicities.get(name) {
            Some(existing) => existing.union(m),
            None => m.clone(),
        };
        self.multiplicities.insert(name.to_string(), merged);
    }

    /// Record what the parameters of `declared` stand for in `actual`.
    pub fn unify<G: GraphView + ?Sized>(
        &mut self,
        g: &G,
        cache: &GeneralizationCache,
        declared: &GenericType,
        actual: &GenericType,
    ) {
        match (&declared.raw, &actual.raw) {
            (RawType::Parameter(name), _) => self.bind_type(g, cache, name, actual),
            (RawType::Operation(op), _) => {
                // `Z⊆T` binds `Z`; the constraint is checked once `T` is known.
                if op.operator == TypeOperator::Subset {
                    if let RawType::Parameter(name) = &op.left.raw {
                        self.bind_type(g, cache, name, actual);
                    }
                }
            }
            (RawType::Element(_), RawType::Element(_)) => {
                let Some(target) = declared.element_id() else { return };
                let Some(seen) = cache.resolve_ancestor(g, actual, target) else { return };
                for (d, a) in declared.type_arguments.iter().zip(&seen.type_arguments) {
                    self.unify(g, cache, d, a);
                }
                for (d, a) in declared.multiplicity_arguments.iter().zip(&seen.multiplicity_arguments) {
                    self.unify_multiplicity(d, a);
                }
            }
            (RawType::Function(d), RawType::Function(a)) => {
                for (dp, ap) in d.parameters.iter().zip(&a.parameters) {
                    self.unify(g, cache, &dp.generic_type, &ap.generic_type);
                    self.unify_multiplicity(&dp.multiplicity, &ap.multiplicity);
                }
                self.unify(g, cache, &d.return_type, &a.return_type);
                self.unify_multiplicity(&d.return_multiplicity, &a.return_multiplicity);
            }
            (RawType::Relation(d), RawType::Relation(a)) => {
                for dc in &d.columns {
                    if let (Some(dt), Some(at)) = (&dc.generic_type, a.column(&dc.name).and_then(|c| c.generic_type.as_ref())) {
                        self.unify(g, cache, dt, at);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn unify_multiplicity(&mut self, declared: &Multiplicity, actual: &Multiplicity) {
        if let Multiplicity::Parameter(name) = declared {
            self.bind_multiplicity(name, actual);
        }
    }

    /// Check every `Z⊆T` constraint inside `declared` and rebind `Z` to the
    /// columns as typed by `T`.
    pub fn apply_constraints<G: GraphView + ?Sized>(
        &mut self,
        g: &G,
        cache: &GeneralizationCache,
        declared: &GenericType,
    ) -> Result<(), RelationError> {
        let mut pending = Vec::new();
        collect_subsets(declared, &mut pending);
        for (sub, sup) in pending {
            let (Some(RawType::Relation(sub_rel)), Some(RawType::Relation(sup_rel))) =
                (self.types.get(&sub).map(|t| &t.raw), self.types.get(&sup).map(|t| &t.raw))
            else {
                continue;
            };
            let typed = relation::subset(sub_rel, sup_rel, |f, e| super::is_compatible(g, cache, f, e))?;
            self.types.insert(sub, GenericType::new(RawType::Relation(typed)));
        }
        Ok(())
    }

    /// Replace bound parameters and evaluate column operations.
    pub fn substitute(&self, t: &GenericType) -> Result<GenericType, RelationError> {
        let raw = match &t.raw {
            RawType::Parameter(name) => match self.types.get(name) {
                Some(bound) if t.type_arguments.is_empty() => return Ok(bound.clone()),
                _ => t.raw.clone(),
            },
            RawType::Element(_) => t.raw.clone(),
            RawType::Function(f) => {
                let mut f = (**f).clone();
                for p in &mut f.parameters {
                    p.generic_type = self.substitute(&p.generic_type)?;
                    p.multiplicity = self.substitute_multiplicity(&p.multiplicity);
                }
                f.return_type = self.substitute(&f.return_type)?;
                f.return_multiplicity = self.substitute_multiplicity(&f.return_multiplicity);
                RawType::Function(Box::new(f))
            }
            RawType::Relation(r) => {
                let mut r = r.clone();
                for c in &mut r.columns {
                    if let Some(ct) = &c.generic_type {
                        c.generic_type = Some(self.substitute(ct)?);
                    }
                }
                RawType::Relation(r)
            }
            RawType::Operation(op) => {
                let left = self.substitute(&op.left)?;
                let right = self.substitute(&op.right)?;
                match (&left.raw, &right.raw, op.operator) {
                    (RawType::Relation(l), RawType::Relation(r), TypeOperator::Add) => {
                        RawType::Relation(relation::union(l, r)?)
                    }
                    (RawType::Relation(l), RawType::Relation(r), TypeOperator::Subtract) => {
                        RawType::Relation(relation::subtract(l, r))
                    }
                    (_, _, TypeOperator::Subset) if !left.is_open() => return Ok(left),
                    _ => RawType::Operation(Box::new(crate::model::TypeOperation {
                        left,
                        operator: op.operator,
                        right,
                    })),
                }
            }
        };
        let mut out = GenericType::new(raw);
        for arg in &t.type_arguments {
            out.type_arguments.push(self.substitute(arg)?);
        }
        out.multiplicity_arguments = t.multiplicity_arguments.iter().map(|m| self.substitute_multiplicity(m)).collect();
        Ok(out)
    }

    /// `substitute`, leaving column operations that fail unevaluated.
    pub fn substitute_lenient(&self, t: &GenericType) -> GenericType {
        self.substitute(t).unwrap_or_else(|_| t.clone())
    }

    pub fn substitute_multiplicity(&self, m: &Multiplicity) -> Multiplicity {
        match m {
            Multiplicity::Parameter(name) => self.multiplicities.get(name).cloned().unwrap_or_else(|| m.clone()),
            _ => m.clone(),
        }
    }
}

fn collect_subsets(t: &GenericType, out: &mut Vec<(String, String)>) {
    if let RawType::Operation(op) = &t.raw {
        if let (TypeOperator::Subset, Some(l), Some(r)) = (op.operator, op.left.as_parameter(), op.right.as_parameter()) {
            out.push((l.to_string(), r.to_string()));
        }
    }
    if let RawType::Function(f) = &t.raw {
        for p in &f.parameters {
            collect_subsets(&p.generic_type, out);
        }
        collect_subsets(&f.return_type, out);
    }
    for arg in &t.type_arguments {
        collect_subsets(arg, out);
    }
}

/// Smallest common ancestor of two types; `Any` when nothing closer exists.
pub fn common_supertype<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    a: &GenericType,
    b: &GenericType,
) -> GenericType {
    if super::is_compatible(g, cache, b, a) {
        return a.clone();
    }
    if super::is_compatible(g, cache, a, b) {
        return b.clone();
    }
    if let (Some(aid), Some(bid)) = (a.element_id(), b.element_id()) {
        for ancestor in cache.linearize(g, aid).iter() {
            let Some(candidate) = ancestor.element_id() else { continue };
            if cache.is_subtype(g, bid, candidate) {
                if let Some(seen) = cache.resolve_ancestor(g, a, candidate) {
                    return seen;
                }
            }
        }
    }
    crate::model::M3::Any.generic_type()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, M3, RelationType, TypeOperation};
    use crate::storage::MemoryStore;

    fn rel(names: &[&str]) -> GenericType {
        GenericType::relation(
            names
                .iter()
                .map(|n| Column { name: n.to_string(), generic_type: Some(M3::Integer.generic_type()) })
                .collect(),
        )
    }

    fn op(l: &str, operator: TypeOperator, r: &str) -> GenericType {
        GenericType::new(RawType::Operation(Box::new(TypeOperation {
            left: GenericType::parameter(l),
            operator,
            right: GenericType::parameter(r),
        })))
    }

    #[test]
    fn test_unify_widens_to_common_supertype() {
        let store = MemoryStore::new();
        let cache = GeneralizationCache::new();
        let mut b = Bindings::new();
        b.bind_type(&store, &cache, "T", &M3::Integer.generic_type());
        b.bind_type(&store, &cache, "T", &M3::Float.generic_type());
        assert_eq!(b.types["T"].to_string(), "Number");
        b.bind_type(&store, &cache, "T", &M3::String.generic_type());
        assert_eq!(b.types["T"].to_string(), "Any");
        b.bind_multiplicity("m", &Multiplicity::ONE);
        b.bind_multiplicity("m", &Multiplicity::ZERO_ONE);
        assert_eq!(b.multiplicities["m"], Multiplicity::ZERO_ONE);
    }

    #[test]
    fn test_substitute_evaluates_column_operations() {
        let mut b = Bindings::new();
        b.types.insert("T".into(), rel(&["a", "b"]));
        b.types.insert("Z".into(), rel(&["b"]));
        b.types.insert("V".into(), rel(&["c"]));
        assert_eq!(b.substitute(&op("T", TypeOperator::Subtract, "Z")).unwrap().to_string(), "(a:Integer)");
        assert_eq!(b.substitute(&op("T", TypeOperator::Add, "V")).unwrap().to_string(), "(a:Integer, b:Integer, c:Integer)");
        let err = b.substitute(&op("T", TypeOperator::Add, "Z")).unwrap_err();
        assert_eq!(err.to_string(), "The relation contains duplicates: [b]");
    }

    #[test]
    fn test_subset_constraint_types_the_selection() {
        let store = MemoryStore::new();
        let cache = GeneralizationCache::new();
        let mut b = Bindings::new();
        b.types.insert("T".into(), rel(&["a", "b"]));
        b.types.insert(
            "Z".into(),
            GenericType::new(RawType::Relation(RelationType { columns: vec![Column { name: "a".into(), generic_type: None }] })),
        );
        b.apply_constraints(&store, &cache, &op("Z", TypeOperator::Subset, "T")).unwrap();
        assert_eq!(b.types["Z"].to_string(), "(a:Integer)");
        b.types.insert("Z".into(), rel(&["q"]));
        assert!(b.apply_constraints(&store, &cache, &op("Z", TypeOperator::Subset, "T")).is_err());
    }
}
