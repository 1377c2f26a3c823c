//! # Metamodel Graph Model
//!
//! Plain data that crosses every boundary: store ↔ front-end ↔ type engine
//! ↔ compiler ↔ execution strategies.
//!
//! Design rule: no store handles, no locks, no I/O here.

pub mod node;
pub mod value;
pub mod property_map;
pub mod path;
pub mod multiplicity;
pub mod generic_type;
pub mod bootstrap;

pub use node::{Node, NodeId, SourceInformation};
pub use value::{Value, Reference, PureDate};
pub use property_map::{PropertyMap, Values};
pub use multiplicity::Multiplicity;
pub use generic_type::{
    GenericType, RawType, FunctionType, ParameterType, RelationType, Column,
    TypeOperation, TypeOperator,
};
pub use bootstrap::{M3, ROOT, keys};
