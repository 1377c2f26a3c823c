//! Multiplicity: how many values a property or expression may hold.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A cardinality interval `[lower..upper]` (`upper = None` means many), or
/// a multiplicity parameter of a generic function/class (`[m]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    Range { lower: u64, upper: Option<u64> },
    Parameter(String),
}

impl Multiplicity {
    pub const ZERO: Multiplicity = Multiplicity::Range { lower: 0, upper: Some(0) };
    pub const ONE: Multiplicity = Multiplicity::Range { lower: 1, upper: Some(1) };
    pub const ZERO_ONE: Multiplicity = Multiplicity::Range { lower: 0, upper: Some(1) };
    pub const ZERO_MANY: Multiplicity = Multiplicity::Range { lower: 0, upper: None };
    pub const ONE_MANY: Multiplicity = Multiplicity::Range { lower: 1, upper: None };

    /// Build a range, rejecting `lower > upper`.
    pub fn range(lower: u64, upper: Option<u64>) -> Option<Self> {
        match upper {
            Some(u) if u < lower => None,
            _ => Some(Multiplicity::Range { lower, upper }),
        }
    }

    pub fn exactly(n: u64) -> Self {
        Multiplicity::Range { lower: n, upper: Some(n) }
    }

    pub fn bounds(&self) -> Option<(u64, Option<u64>)> {
        match self {
            Multiplicity::Range { lower, upper } => Some((*lower, *upper)),
            Multiplicity::Parameter(_) => None,
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self, Multiplicity::Parameter(_))
    }

    /// `self ⊆ other`: every cardinality allowed by `self` is allowed by
    /// `other`. Parameters are only subsumed by the same parameter.
    pub fn subsumed_by(&self, other: &Multiplicity) -> bool {
        match (self, other) {
            (
                Multiplicity::Range { lower: l1, upper: u1 },
                Multiplicity::Range { lower: l2, upper: u2 },
            ) => {
                let upper_ok = match (u1, u2) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => a <= b,
                };
                l1 >= l2 && upper_ok
            }
            (Multiplicity::Parameter(a), Multiplicity::Parameter(b)) => a == b,
            (Multiplicity::Parameter(_), Multiplicity::Range { lower: 0, upper: None }) => true,
            _ => false,
        }
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &Multiplicity) -> Multiplicity {
        match (self.bounds(), other.bounds()) {
            (Some((l1, u1)), Some((l2, u2))) => Multiplicity::Range {
                lower: l1.min(l2),
                upper: match (u1, u2) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                },
            },
            _ if self == other => self.clone(),
            _ => Multiplicity::ZERO_MANY,
        }
    }

    /// Interval sum, used for collection literals.
    pub fn add(&self, other: &Multiplicity) -> Multiplicity {
        match (self.bounds(), other.bounds()) {
            (Some((l1, u1)), Some((l2, u2))) => Multiplicity::Range {
                lower: l1 + l2,
                upper: match (u1, u2) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                },
            },
            _ => Multiplicity::ZERO_MANY,
        }
    }

    /// Interval product, used when navigating a property from a collection.
    pub fn multiply(&self, other: &Multiplicity) -> Multiplicity {
        match (self.bounds(), other.bounds()) {
            (Some((l1, u1)), Some((l2, u2))) => Multiplicity::Range {
                lower: l1 * l2,
                upper: match (u1, u2) {
                    (Some(0), _) | (_, Some(0)) => Some(0),
                    (Some(a), Some(b)) => Some(a * b),
                    _ => None,
                },
            },
            _ => Multiplicity::ZERO_MANY,
        }
    }

    /// Token used inside function signature ids (`1`, `MANY`, `$0_1$`).
    pub fn signature_token(&self) -> String {
        match self {
            Multiplicity::Range { lower, upper: Some(u) } if lower == u => lower.to_string(),
            Multiplicity::Range { lower: 0, upper: None } => "MANY".to_string(),
            Multiplicity::Range { lower, upper: None } => format!("${lower}_MANY$"),
            Multiplicity::Range { lower, upper: Some(u) } => format!("${lower}_{u}$"),
            Multiplicity::Parameter(p) => p.clone(),
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Range { lower, upper: Some(u) } if lower == u => write!(f, "{lower}"),
            Multiplicity::Range { lower: 0, upper: None } => write!(f, "*"),
            Multiplicity::Range { lower, upper: None } => write!(f, "{lower}..*"),
            Multiplicity::Range { lower, upper: Some(u) } => write!(f, "{lower}..{u}"),
            Multiplicity::Parameter(p) => write!(f, "{p}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display() {
        assert_eq!(Multiplicity::ONE.to_string(), "1");
        assert_eq!(Multiplicity::ZERO_ONE.to_string(), "0..1");
        assert_eq!(Multiplicity::ZERO_MANY.to_string(), "*");
        assert_eq!(Multiplicity::ONE_MANY.to_string(), "1..*");
        assert_eq!(Multiplicity::exactly(2).to_string(), "2");
        assert_eq!(Multiplicity::Parameter("m".into()).to_string(), "m");
    }

    #[test]
    fn test_subsumption() {
        assert!(Multiplicity::ONE.subsumed_by(&Multiplicity::ZERO_MANY));
        assert!(Multiplicity::ONE.subsumed_by(&Multiplicity::ZERO_ONE));
        assert!(!Multiplicity::exactly(2).subsumed_by(&Multiplicity::ONE));
        assert!(!Multiplicity::ZERO_ONE.subsumed_by(&Multiplicity::ONE));
        assert!(!Multiplicity::ZERO_MANY.subsumed_by(&Multiplicity::ONE_MANY));
    }

    #[test]
    fn test_invalid_range() {
        assert!(Multiplicity::range(3, Some(1)).is_none());
        assert_eq!(Multiplicity::range(1, None), Some(Multiplicity::ONE_MANY));
    }

    #[test]
    fn test_signature_tokens() {
        assert_eq!(Multiplicity::ONE.signature_token(), "1");
        assert_eq!(Multiplicity::ZERO_MANY.signature_token(), "MANY");
        assert_eq!(Multiplicity::ZERO_ONE.signature_token(), "$0_1$");
        assert_eq!(Multiplicity::ONE_MANY.signature_token(), "$1_MANY$");
    }

    fn arb_range() -> impl Strategy<Value = Multiplicity> {
        (0u64..5, proptest::option::of(0u64..5)).prop_filter_map("lower <= upper", |(l, u)| {
            Multiplicity::range(l, u.map(|u| u + l))
        })
    }

    proptest! {
        #[test]
        fn prop_subsumption_is_interval_containment(a in arb_range(), b in arb_range()) {
            let (l1, u1) = a.bounds().unwrap();
            let (l2, u2) = b.bounds().unwrap();
            let contained = l1 >= l2 && match (u1, u2) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(x), Some(y)) => x <= y,
            };
            prop_assert_eq!(a.subsumed_by(&b), contained);
        }

        #[test]
        fn prop_union_covers_both(a in arb_range(), b in arb_range()) {
            let u = a.union(&b);
            prop_assert!(a.subsumed_by(&u));
            prop_assert!(b.subsumed_by(&u));
        }

        #[test]
        fn prop_exact_two_never_fits_one(n in 2u64..50) {
            prop_assert!(!Multiplicity::exactly(n).subsumed_by(&Multiplicity::ONE));
        }
    }
}
