//! # Type Engine
//!
//! Generic types, multiplicities and the rules relating them: generalization
//! linearization, directional compatibility, parameter binding, relation
//! column algebra, name lookup and expression inference.
//!
//! Everything here reads the graph through `GraphView` and never writes it.

pub mod bindings;
pub mod compatibility;
pub mod generalization;
pub mod inference;
pub mod lookup;
pub mod relation;

pub use bindings::{Bindings, common_supertype};
pub use compatibility::{is_compatible, match_score};
pub use generalization::GeneralizationCache;
pub use inference::{InferenceOutcome, Typed, Write, infer_element};
pub use relation::RelationError;
