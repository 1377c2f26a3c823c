//! Property values stored on graph nodes.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{GenericType, Multiplicity, NodeId, SourceInformation};

/// A value held by a node property.
///
/// Two kinds of edges exist: `Node` is a strong containment edge (a class
/// owns its properties, a function owns its expressions), `Ref` is a
/// by-path reference that the resolution pass binds to a target. An
/// unbound `Ref` is the reference stub recorded at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(PureDate),
    Node(NodeId),
    Ref(Reference),
    Type(GenericType),
    Multiplicity(Multiplicity),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Date(d) if d.has_time() => "DateTime",
            Value::Date(d) if d.day.is_some() => "StrictDate",
            Value::Date(_) => "Date",
            Value::Node(_) => "Node",
            Value::Ref(_) => "Ref",
            Value::Type(_) => "GenericType",
            Value::Multiplicity(_) => "Multiplicity",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&GenericType> {
        match self {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_multiplicity(&self) -> Option<&Multiplicity> {
        match self {
            Value::Multiplicity(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&Reference> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Collect every node id reachable from this value (bound refs only).
    pub fn collect_ids(&self, out: &mut Vec<NodeId>) {
        match self {
            Value::Node(id) => out.push(*id),
            Value::Ref(r) => {
                if let Some(id) = r.target {
                    out.push(id);
                }
            }
            Value::Type(t) => t.collect_ids(out),
            _ => {}
        }
    }

    /// Visit every reference inside this value mutably.
    pub fn for_each_reference_mut(&mut self, f: &mut dyn FnMut(&mut Reference)) {
        match self {
            Value::Ref(r) => f(r),
            Value::Type(t) => t.for_each_reference_mut(f),
            _ => {}
        }
    }

    /// Visit every reference inside this value.
    pub fn for_each_reference(&self, f: &mut dyn FnMut(&Reference)) {
        match self {
            Value::Ref(r) => f(r),
            Value::Type(t) => t.for_each_reference(f),
            _ => {}
        }
    }
}

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Boolean(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Integer(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<NodeId> for Value { fn from(v: NodeId) -> Self { Value::Node(v) } }
impl From<Reference> for Value { fn from(v: Reference) -> Self { Value::Ref(v) } }
impl From<GenericType> for Value { fn from(v: GenericType) -> Self { Value::Type(v) } }
impl From<Multiplicity> for Value { fn from(v: Multiplicity) -> Self { Value::Multiplicity(v) } }
impl From<PureDate> for Value { fn from(v: PureDate) -> Self { Value::Date(v) } }

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::Date(d) => write!(f, "%{d}"),
            Value::Node(id) => write!(f, "@{id}"),
            Value::Ref(r) => write!(f, "{}", r.path),
            Value::Type(t) => write!(f, "{t}"),
            Value::Multiplicity(m) => write!(f, "[{m}]"),
        }
    }
}

// ============================================================================
// Reference
// ============================================================================

/// A by-path reference to a packageable element.
///
/// Created unbound by the parser; the resolution pass sets `target`.
/// Unbinding (clearing `target`) lets an element be re-resolved after the
/// referenced element was recreated by an incremental recompile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub path: String,
    pub target: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInformation>,
}

impl Reference {
    pub fn unresolved(path: impl Into<String>, source: Option<SourceInformation>) -> Self {
        Self { path: path.into(), target: None, source }
    }

    pub fn resolved(path: impl Into<String>, target: NodeId) -> Self {
        Self { path: path.into(), target: Some(target), source: None }
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// Last `::` segment of the path.
    pub fn simple_name(&self) -> &str {
        super::path::simple_name(&self.path)
    }
}

/// Bound references compare by target, stubs by path.
impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        match (self.target, other.target) {
            (Some(a), Some(b)) => a == b,
            _ => self.path == other.path,
        }
    }
}

// ============================================================================
// Dates
// ============================================================================

/// A possibly partial date literal (`%2024`, `%2024-03`, `%2024-03-15T10:30:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PureDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub time: Option<NaiveTime>,
}

impl PureDate {
    /// Validate components with chrono and build the date.
    pub fn new(
        year: i32,
        month: Option<u32>,
        day: Option<u32>,
        time: Option<(u32, u32, u32, u32)>,
    ) -> std::result::Result<Self, String> {
        if let Some(m) = month {
            if !(1..=12).contains(&m) {
                return Err(format!("invalid month: {m}"));
            }
        }
        if let (Some(m), Some(d)) = (month, day) {
            if NaiveDate::from_ymd_opt(year, m, d).is_none() {
                return Err(format!("invalid day {d} for {year:04}-{m:02}"));
            }
        }
        let time = match time {
            Some((h, mi, s, ms)) => Some(
                NaiveTime::from_hms_milli_opt(h, mi, s, ms)
                    .ok_or_else(|| format!("invalid time: {h:02}:{mi:02}:{s:02}"))?,
            ),
            None => None,
        };
        Ok(Self { year, month, day, time })
    }

    pub fn has_time(&self) -> bool {
        self.time.is_some()
    }
}

impl fmt::Display for PureDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(m) = self.month {
            write!(f, "-{m:02}")?;
        }
        if let Some(d) = self.day {
            write!(f, "-{d:02}")?;
        }
        if let Some(t) = self.time {
            write!(f, "T{}", t.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(true), Value::Boolean(true));
    }

    #[test]
    fn test_reference_equality() {
        let a = Reference::resolved("a::Person", NodeId(4));
        let b = Reference::resolved("Person", NodeId(4));
        let stub = Reference::unresolved("Person", None);
        assert_eq!(a, b);
        assert_ne!(a, stub);
        assert_eq!(stub.simple_name(), "Person");
    }

    #[test]
    fn test_date_validation() {
        assert!(PureDate::new(2024, Some(2), Some(29), None).is_ok());
        assert!(PureDate::new(2023, Some(2), Some(29), None).is_err());
        assert!(PureDate::new(2023, Some(13), None, None).is_err());
        assert!(PureDate::new(2023, Some(1), Some(1), Some((25, 0, 0, 0))).is_err());
        let d = PureDate::new(2024, Some(3), Some(5), Some((10, 30, 0, 0))).unwrap();
        assert_eq!(d.to_string(), "2024-03-05T10:30:00");
        assert_eq!(Value::Date(d).type_name(), "DateTime");
    }
}
