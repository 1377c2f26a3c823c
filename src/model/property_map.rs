//! PropertyMap: the multi-valued key-value store on nodes.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use super::Value;

/// Values of one property. Most properties are single-valued.
pub type Values = SmallVec<[Value; 1]>;

/// Property name to values. Ordered so graph serialization is deterministic.
pub type PropertyMap = BTreeMap<String, Values>;

/// Build a single-valued `Values`.
pub fn one(value: impl Into<Value>) -> Values {
    let mut v = Values::new();
    v.push(value.into());
    v
}

/// Build `Values` from any iterator of values.
pub fn many<I, V>(values: I) -> Values
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values.into_iter().map(Into::into).collect()
}
