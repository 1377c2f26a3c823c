//! Directional type compatibility.
//!
//! `is_compatible(found, expected)` asks whether a value of type `found`
//! may be supplied where `expected` is required. Classes follow their
//! generalizations. Function types accept broader parameters and narrower
//! returns, so `{Address[1]->String[1]}` may stand in for
//! `{HomeAddress[1]->String[1]}` but not the other way round.

use crate::model::{FunctionType, GenericType, M3, RawType, RelationType};
use crate::storage::GraphView;

use super::GeneralizationCache;

pub fn is_compatible<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    found: &GenericType,
    expected: &GenericType,
) -> bool {
    if expected.element_id() == Some(M3::Any.id()) || found.element_id() == Some(M3::Nil.id()) {
        return true;
    }
    match (&found.raw, &expected.raw) {
        (RawType::Element(_), RawType::Element(_)) => {
            let (Some(f), Some(e)) = (found.element_id(), expected.element_id()) else {
                return found == expected;
            };
            if !cache.is_subtype(g, f, e) {
                return false;
            }
            if expected.type_arguments.is_empty() {
                return true;
            }
            let Some(seen) = cache.resolve_ancestor(g, found, e) else { return false };
            seen.type_arguments.len() == expected.type_arguments.len()
                && seen
                    .type_arguments
                    .iter()
                    .zip(&expected.type_arguments)
                    .all(|(s, x)| is_compatible(g, cache, s, x))
        }
        (RawType::Parameter(a), RawType::Parameter(b)) => a == b,
        (RawType::Function(f), RawType::Function(e)) => function_compatible(g, cache, f, e),
        (RawType::Relation(f), RawType::Relation(e)) => relation_compatible(g, cache, f, e),
        (RawType::Operation(_), RawType::Operation(_)) => found == expected,
        _ => false,
    }
}

fn function_compatible<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    found: &FunctionType,
    expected: &FunctionType,
) -> bool {
    found.parameters.len() == expected.parameters.len()
        && found.parameters.iter().zip(&expected.parameters).all(|(f, e)| {
            is_compatible(g, cache, &e.generic_type, &f.generic_type) && e.multiplicity.subsumed_by(&f.multiplicity)
        })
        && is_compatible(g, cache, &found.return_type, &expected.return_type)
        && found.return_multiplicity.subsumed_by(&expected.return_multiplicity)
}

fn relation_compatible<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    found: &RelationType,
    expected: &RelationType,
) -> bool {
    found.columns.len() == expected.columns.len()
        && expected.columns.iter().all(|e| match found.column(&e.name) {
            None => false,
            Some(f) => match (&f.generic_type, &e.generic_type) {
                (Some(ft), Some(et)) => is_compatible(g, cache, ft, et),
                _ => true,
            },
        })
}

/// Rank how well `found` matches a declared parameter type: 3 for the same
/// element, 2 for a subtype (or anything against `Any`), 1 for type
/// parameters and structural types, `None` when it cannot match.
pub fn match_score<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    found: &GenericType,
    declared: &GenericType,
) -> Option<u8> {
    match &declared.raw {
        RawType::Parameter(_) | RawType::Operation(_) => Some(1),
        RawType::Element(_) => {
            let target = declared.element_id()?;
            match found.element_id() {
                Some(f) if f == target => Some(3),
                Some(f) if cache.is_subtype(g, f, target) => Some(2),
                _ if target == M3::Any.id() => Some(2),
                _ => None,
            }
        }
        RawType::Function(d) => match &found.raw {
            RawType::Function(f) if f.parameters.len() == d.parameters.len() => Some(1),
            _ => None,
        },
        RawType::Relation(_) => matches!(found.raw, RawType::Relation(_)).then_some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplicity, ParameterType, Reference, Value, keys, property_map};
    use crate::storage::MemoryStore;
    use crate::tx::TxMode;

    fn setup() -> (MemoryStore, GenericType, GenericType) {
        let mut store = MemoryStore::new();
        let tx = store.begin_tx(TxMode::ReadWrite).unwrap();
        let pkg = store.ensure_package(&tx, "a").unwrap();
        let address = store.create_node(&tx, M3::Class.id(), Some("Address".into()), None, None).unwrap();
        store.attach(&tx, pkg, address).unwrap();
        let address_t = GenericType::element(Reference::resolved("a::Address", address));
        let home = store.create_node(&tx, M3::Class.id(), Some("HomeAddress".into()), None, None).unwrap();
        store
            .set_property(&tx, home, keys::GENERALIZATIONS, property_map::one(Value::Type(address_t.clone())))
            .unwrap();
        store.attach(&tx, pkg, home).unwrap();
        let home_t = GenericType::element(Reference::resolved("a::HomeAddress", home));
        store.commit_tx(&tx).unwrap();
        (store, home_t, address_t)
    }

    fn to_string(param: &GenericType) -> GenericType {
        GenericType::function(
            vec![ParameterType { generic_type: param.clone(), multiplicity: Multiplicity::ONE }],
            M3::String.generic_type(),
            Multiplicity::ONE,
        )
    }

    #[test]
    fn test_subclass_is_compatible_one_way() {
        let (store, home, address) = setup();
        let cache = GeneralizationCache::new();
        assert!(is_compatible(&store, &cache, &home, &address));
        assert!(!is_compatible(&store, &cache, &address, &home));
    }

    #[test]
    fn test_function_types_are_contravariant_in_parameters() {
        let (store, home, address) = setup();
        let cache = GeneralizationCache::new();
        let takes_address = to_string(&address);
        let takes_home = to_string(&home);
        assert!(is_compatible(&store, &cache, &takes_address, &takes_home));
        assert!(!is_compatible(&store, &cache, &takes_home, &takes_address));
    }

    #[test]
    fn test_any_and_nil() {
        let (store, home, _) = setup();
        let cache = GeneralizationCache::new();
        assert!(is_compatible(&store, &cache, &home, &M3::Any.generic_type()));
        assert!(is_compatible(&store, &cache, &M3::Nil.generic_type(), &home));
        assert!(!is_compatible(&store, &cache, &M3::Any.generic_type(), &home));
        assert!(is_compatible(&store, &cache, &M3::Integer.generic_type(), &M3::Number.generic_type()));
    }

    #[test]
    fn test_match_scores() {
        let (store, home, address) = setup();
        let cache = GeneralizationCache::new();
        assert_eq!(match_score(&store, &cache, &address, &address), Some(3));
        assert_eq!(match_score(&store, &cache, &home, &address), Some(2));
        assert_eq!(match_score(&store, &cache, &address, &home), None);
        assert_eq!(match_score(&store, &cache, &home, &GenericType::parameter("T")), Some(1));
    }
}
