//! Platform library.
//!
//! Sources compiled at startup, before any user source, and never
//! modifiable afterwards. They declare the core generic classes and the
//! signatures of the native functions the front-end desugars operators to.
//! Bodies are supplied by execution strategies.

/// `(source id, text)` pairs, compiled in this order.
pub const PLATFORM_SOURCES: [(&str, &str); 7] = [
    ("/platform/type.pure", TYPE),
    ("/platform/collection.pure", COLLECTION),
    ("/platform/lang.pure", LANG),
    ("/platform/boolean.pure", BOOLEAN),
    ("/platform/math.pure", MATH),
    ("/platform/string.pure", STRING),
    ("/platform/relation.pure", RELATION),
];

pub fn is_platform_source(id: &str) -> bool {
    PLATFORM_SOURCES.iter().any(|(p, _)| *p == id)
}

const TYPE: &str = "\
Class meta::pure::metamodel::type::List<T>
{
  values: T[*];
}

Class meta::pure::metamodel::type::Pair<U,V>
{
  first: U[1];
  second: V[1];
}

Class meta::pure::metamodel::relation::Relation<T>
{
}

Class meta::pure::metamodel::relation::ColSpec<Z>
{
  name: String[1];
}

Class meta::pure::metamodel::relation::ColSpecArray<Z>
{
  names: String[*];
}
";

const COLLECTION: &str = "\
native function meta::pure::functions::collection::size<T>(c: T[*]): Integer[1];
native function meta::pure::functions::collection::isEmpty<T>(c: T[*]): Boolean[1];
native function meta::pure::functions::collection::isNotEmpty<T>(c: T[*]): Boolean[1];
native function meta::pure::functions::collection::first<T>(c: T[*]): T[0..1];
native function meta::pure::functions::collection::toOne<T>(c: T[*]): T[1];
native function meta::pure::functions::collection::filter<T>(c: T[*], f: {T[1]->Boolean[1]}[1]): T[*];
native function meta::pure::functions::collection::map<T,V>(c: T[*], f: {T[1]->V[*]}[1]): V[*];
native function meta::pure::functions::collection::pair<U,V>(first: U[1], second: V[1]): Pair<U,V>[1];
";

const LANG: &str = "\
native function meta::pure::functions::lang::if<T|m>(test: Boolean[1], valid: {->T[m]}[1], invalid: {->T[m]}[1]): T[m];
native function meta::pure::functions::lang::eval<T,V|m,n>(func: {T[n]->V[m]}[1], param: T[n]): V[m];
";

const BOOLEAN: &str = "\
native function meta::pure::functions::boolean::equal(left: Any[*], right: Any[*]): Boolean[1];
native function meta::pure::functions::boolean::not(b: Boolean[1]): Boolean[1];
native function meta::pure::functions::boolean::and(a: Boolean[1], b: Boolean[1]): Boolean[1];
native function meta::pure::functions::boolean::or(a: Boolean[1], b: Boolean[1]): Boolean[1];
";

const MATH: &str = "\
native function meta::pure::functions::math::plus(a: Integer[1], b: Integer[1]): Integer[1];
native function meta::pure::functions::math::plus(a: Float[1], b: Float[1]): Float[1];
native function meta::pure::functions::math::plus(a: Number[1], b: Number[1]): Number[1];
native function meta::pure::functions::math::minus(a: Integer[1], b: Integer[1]): Integer[1];
native function meta::pure::functions::math::minus(a: Float[1], b: Float[1]): Float[1];
native function meta::pure::functions::math::minus(a: Number[1], b: Number[1]): Number[1];
native function meta::pure::functions::math::minus(a: Integer[1]): Integer[1];
native function meta::pure::functions::math::minus(a: Float[1]): Float[1];
native function meta::pure::functions::math::times(a: Integer[1], b: Integer[1]): Integer[1];
native function meta::pure::functions::math::times(a: Float[1], b: Float[1]): Float[1];
native function meta::pure::functions::math::times(a: Number[1], b: Number[1]): Number[1];
native function meta::pure::functions::math::divide(a: Number[1], b: Number[1]): Float[1];
native function meta::pure::functions::math::lessThan(a: Number[1], b: Number[1]): Boolean[1];
native function meta::pure::functions::math::lessThanEqual(a: Number[1], b: Number[1]): Boolean[1];
native function meta::pure::functions::math::greaterThan(a: Number[1], b: Number[1]): Boolean[1];
native function meta::pure::functions::math::greaterThanEqual(a: Number[1], b: Number[1]): Boolean[1];
";

const STRING: &str = "\
native function meta::pure::functions::string::plus(a: String[1], b: String[1]): String[1];
native function meta::pure::functions::string::length(s: String[1]): Integer[1];
native function meta::pure::functions::string::toString(a: Any[1]): String[1];
";

const RELATION: &str = "\
native function meta::pure::functions::relation::select<T,Z>(rel: Relation<T>[1], cols: ColSpecArray<Z⊆T>[1]): Relation<Z>[1];
native function meta::pure::functions::relation::exclude<T,Z>(rel: Relation<T>[1], cols: ColSpecArray<Z⊆T>[1]): Relation<T-Z>[1];
native function meta::pure::functions::relation::join<T,V>(left: Relation<T>[1], right: Relation<V>[1], f: {T[1],V[1]->Boolean[1]}[1]): Relation<T+V>[1];
native function meta::pure::functions::relation::concatenate<T>(a: Relation<T>[1], b: Relation<T>[1]): Relation<T>[1];
native function meta::pure::functions::relation::filter<T>(rel: Relation<T>[1], f: {T[1]->Boolean[1]}[1]): Relation<T>[1];
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_sources_parse() {
        for (id, text) in PLATFORM_SOURCES {
            let delta = crate::parser::parse(id, text).unwrap();
            assert!(!delta.elements.is_empty(), "{id} declares nothing");
        }
        assert!(is_platform_source("/platform/math.pure"));
        assert!(!is_platform_source("/user.pure"));
    }
}
