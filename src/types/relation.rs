//! Relation column algebra.
//!
//! A relation type is an ordered bag of `(name, type)` columns. Column
//! operations build new relation types; they never edit their inputs.

use crate::model::{Column, GenericType, RelationType};

/// Column algebra failures. The messages are part of the diagnostic contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelationError {
    #[error("The relation contains duplicates: [{}]", .0.join(", "))]
    Duplicates(Vec<String>),

    #[error("The system can't find the column {column} in the Relation {relation}")]
    MissingColumn { column: String, relation: RelationType },

    #[error("The column '{column}' has type {found} in the Relation {relation}; expected: {expected}")]
    IncompatibleColumn {
        column: String,
        found: GenericType,
        expected: GenericType,
        relation: RelationType,
    },
}

/// `T+Z`: all columns of both sides. Shared names are an error.
pub fn union(left: &RelationType, right: &RelationType) -> Result<RelationType, RelationError> {
    let duplicates: Vec<String> = right
        .columns
        .iter()
        .filter(|c| left.column(&c.name).is_some())
        .map(|c| c.name.clone())
        .collect();
    if !duplicates.is_empty() {
        return Err(RelationError::Duplicates(duplicates));
    }
    let mut columns = left.columns.clone();
    columns.extend(right.columns.iter().cloned());
    Ok(RelationType { columns })
}

/// `T-Z`: columns of `left` not named in `right`.
pub fn subtract(left: &RelationType, right: &RelationType) -> RelationType {
    RelationType {
        columns: left
            .columns
            .iter()
            .filter(|c| right.column(&c.name).is_none())
            .cloned()
            .collect(),
    }
}

/// Column lookup by name.
pub fn lookup<'r>(relation: &'r RelationType, name: &str) -> Result<&'r Column, RelationError> {
    relation.column(name).ok_or_else(|| RelationError::MissingColumn {
        column: name.to_string(),
        relation: relation.clone(),
    })
}

/// `Z⊆T`: every column of `sub` must exist in `sup`. Typed columns of `sub`
/// must be accepted by `compatible(found, expected)`. Returns `sub` with
/// every column typed from `sup`.
pub fn subset(
    sub: &RelationType,
    sup: &RelationType,
    mut compatible: impl FnMut(&GenericType, &GenericType) -> bool,
) -> Result<RelationType, RelationError> {
    let mut columns = Vec::with_capacity(sub.columns.len());
    for c in &sub.columns {
        let target = lookup(sup, &c.name)?;
        if let (Some(found), Some(expected)) = (&c.generic_type, &target.generic_type) {
            if !compatible(found, expected) {
                return Err(RelationError::IncompatibleColumn {
                    column: c.name.clone(),
                    found: found.clone(),
                    expected: expected.clone(),
                    relation: sup.clone(),
                });
            }
        }
        columns.push(Column {
            name: c.name.clone(),
            generic_type: target.generic_type.clone().or_else(|| c.generic_type.clone()),
        });
    }
    Ok(RelationType { columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{M3, Reference};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn rel(cols: &[(&str, M3)]) -> RelationType {
        RelationType {
            columns: cols
                .iter()
                .map(|(n, t)| Column { name: n.to_string(), generic_type: Some(t.generic_type()) })
                .collect(),
        }
    }

    #[test]
    fn test_union_rejects_shared_columns() {
        let left = rel(&[("a", M3::Integer), ("b", M3::String)]);
        let right = rel(&[("b", M3::String), ("c", M3::Float)]);
        let err = union(&left, &right).unwrap_err();
        assert_eq!(err.to_string(), "The relation contains duplicates: [b]");
        let ok = union(&left, &rel(&[("c", M3::Float)])).unwrap();
        assert_eq!(ok.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_subtract_then_lookup_missing_column() {
        let left = rel(&[("a", M3::Integer), ("b", M3::String)]);
        let removed = subtract(&left, &rel(&[("z", M3::Integer)]));
        assert_eq!(removed, left);
        let err = lookup(&removed, "z").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The system can't find the column z in the Relation (a:Integer, b:String)"
        );
        let narrowed = subtract(&left, &rel(&[("a", M3::Integer)]));
        assert!(lookup(&narrowed, "a").is_err());
    }

    #[test]
    fn test_subset_types_columns_from_superset() {
        let sup = rel(&[("a", M3::Integer), ("b", M3::String)]);
        let sub = RelationType { columns: vec![Column { name: "b".into(), generic_type: None }] };
        let typed = subset(&sub, &sup, |f, e| f == e).unwrap();
        assert_eq!(typed.to_string(), "(b:String)");
        let wrong = rel(&[("b", M3::Integer)]);
        assert!(matches!(
            subset(&wrong, &sup, |f, e| f == e),
            Err(RelationError::IncompatibleColumn { .. })
        ));
        let missing = RelationType {
            columns: vec![Column {
                name: "q".into(),
                generic_type: Some(GenericType::element(Reference::unresolved("String", None))),
            }],
        };
        assert!(matches!(subset(&missing, &sup, |_, _| true), Err(RelationError::MissingColumn { .. })));
    }

    fn arb_relation() -> impl Strategy<Value = RelationType> {
        proptest::collection::btree_set("[a-e]", 0..5).prop_map(|names| RelationType {
            columns: names
                .into_iter()
                .map(|n| Column { name: n, generic_type: Some(M3::String.generic_type()) })
                .collect(),
        })
    }

    proptest! {
        #[test]
        fn prop_union_of_disjoint_keeps_every_column(a in arb_relation(), b in arb_relation()) {
            let b = subtract(&b, &a);
            let u = union(&a, &b).unwrap();
            prop_assert_eq!(u.columns.len(), a.columns.len() + b.columns.len());
        }

        #[test]
        fn prop_subtract_removes_named_columns(a in arb_relation(), b in arb_relation()) {
            let d = subtract(&a, &b);
            for c in &b.columns {
                prop_assert!(d.column(&c.name).is_none());
            }
            prop_assert!(subset(&d, &a, |f, e| f == e).is_ok());
        }
    }
}
