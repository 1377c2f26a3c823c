//! GenericType: a raw type plus type and multiplicity arguments.
//!
//! GenericTypes are values: inference copies and rebuilds them, it never
//! mutates a binding site in place. The `Display` rendering is canonical
//! and embedded verbatim in diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Multiplicity, NodeId, Reference};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericType {
    pub raw: RawType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_arguments: Vec<GenericType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multiplicity_arguments: Vec<Multiplicity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawType {
    /// A class, primitive type or enumeration.
    Element(Reference),
    /// An open type parameter (`T`).
    Parameter(String),
    /// A function type `{A[1]->B[*]}`.
    Function(Box<FunctionType>),
    /// A structural column list `(a:String, b:Integer)`.
    Relation(RelationType),
    /// Column algebra over type parameters (`T+Z`, `T-Z`, `Z⊆T`).
    Operation(Box<TypeOperation>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionType {
    pub parameters: Vec<ParameterType>,
    pub return_type: GenericType,
    pub return_multiplicity: Multiplicity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterType {
    pub generic_type: GenericType,
    pub multiplicity: Multiplicity,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationType {
    pub columns: Vec<Column>,
}

/// A relation column. Columns named by a bare `~name` spec are untyped until
/// matched against a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub generic_type: Option<GenericType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeOperation {
    pub left: GenericType,
    pub operator: TypeOperator,
    pub right: GenericType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeOperator {
    Add,
    Subtract,
    Subset,
}

impl GenericType {
    pub fn new(raw: RawType) -> Self {
        Self { raw, type_arguments: Vec::new(), multiplicity_arguments: Vec::new() }
    }

    pub fn element(reference: Reference) -> Self {
        Self::new(RawType::Element(reference))
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::new(RawType::Parameter(name.into()))
    }

    pub fn function(parameters: Vec<ParameterType>, return_type: GenericType, return_multiplicity: Multiplicity) -> Self {
        Self::new(RawType::Function(Box::new(FunctionType {
            parameters,
            return_type,
            return_multiplicity,
        })))
    }

    pub fn relation(columns: Vec<Column>) -> Self {
        Self::new(RawType::Relation(RelationType { columns }))
    }

    pub fn with_type_arguments(mut self, args: Vec<GenericType>) -> Self {
        self.type_arguments = args;
        self
    }

    pub fn with_multiplicity_arguments(mut self, args: Vec<Multiplicity>) -> Self {
        self.multiplicity_arguments = args;
        self
    }

    /// Target of an element raw type, when bound.
    pub fn element_id(&self) -> Option<NodeId> {
        match &self.raw {
            RawType::Element(r) => r.target,
            _ => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&str> {
        match &self.raw {
            RawType::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match &self.raw {
            RawType::Function(f) => Some(f),
            _ => None,
        }
    }

    /// True when any type parameter or column operation occurs inside.
    pub fn is_open(&self) -> bool {
        let raw_open = match &self.raw {
            RawType::Parameter(_) | RawType::Operation(_) => true,
            RawType::Element(_) => false,
            RawType::Function(f) => {
                f.parameters.iter().any(|p| p.generic_type.is_open() || p.multiplicity.is_parameter())
                    || f.return_type.is_open()
                    || f.return_multiplicity.is_parameter()
            }
            RawType::Relation(r) => r
                .columns
                .iter()
                .any(|c| c.generic_type.as_ref().is_some_and(GenericType::is_open)),
        };
        raw_open
            || self.type_arguments.iter().any(GenericType::is_open)
            || self.multiplicity_arguments.iter().any(Multiplicity::is_parameter)
    }

    pub fn collect_ids(&self, out: &mut Vec<NodeId>) {
        self.for_each_reference(&mut |r| {
            if let Some(id) = r.target {
                out.push(id);
            }
        });
    }

    pub fn for_each_reference(&self, f: &mut dyn FnMut(&Reference)) {
        match &self.raw {
            RawType::Element(r) => f(r),
            RawType::Parameter(_) => {}
            RawType::Function(ft) => {
                for p in &ft.parameters {
                    p.generic_type.for_each_reference(f);
                }
                ft.return_type.for_each_reference(f);
            }
            RawType::Relation(rel) => {
                for c in &rel.columns {
                    if let Some(t) = &c.generic_type {
                        t.for_each_reference(f);
                    }
                }
            }
            RawType::Operation(op) => {
                op.left.for_each_reference(f);
                op.right.for_each_reference(f);
            }
        }
        for arg in &self.type_arguments {
            arg.for_each_reference(f);
        }
    }

    pub fn for_each_reference_mut(&mut self, f: &mut dyn FnMut(&mut Reference)) {
        match &mut self.raw {
            RawType::Element(r) => f(r),
            RawType::Parameter(_) => {}
            RawType::Function(ft) => {
                for p in &mut ft.parameters {
                    p.generic_type.for_each_reference_mut(f);
                }
                ft.return_type.for_each_reference_mut(f);
            }
            RawType::Relation(rel) => {
                for c in &mut rel.columns {
                    if let Some(t) = &mut c.generic_type {
                        t.for_each_reference_mut(f);
                    }
                }
            }
            RawType::Operation(op) => {
                op.left.for_each_reference_mut(f);
                op.right.for_each_reference_mut(f);
            }
        }
        for arg in &mut self.type_arguments {
            arg.for_each_reference_mut(f);
        }
    }

    /// Token used inside function signature ids.
    pub fn signature_token(&self) -> String {
        match &self.raw {
            RawType::Element(r) => r.simple_name().to_string(),
            RawType::Parameter(p) => p.clone(),
            RawType::Function(_) => "Function".to_string(),
            RawType::Relation(_) => "Relation".to_string(),
            RawType::Operation(_) => "Operation".to_string(),
        }
    }
}

impl fmt::Display for GenericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            RawType::Element(r) => write!(f, "{}", r.simple_name())?,
            RawType::Parameter(p) => write!(f, "{p}")?,
            RawType::Function(ft) => write!(f, "{ft}")?,
            RawType::Relation(rel) => write!(f, "{rel}")?,
            RawType::Operation(op) => {
                let symbol = match op.operator {
                    TypeOperator::Add => "+",
                    TypeOperator::Subtract => "-",
                    TypeOperator::Subset => "⊆",
                };
                write!(f, "{}{symbol}{}", op.left, op.right)?;
            }
        }
        if !self.type_arguments.is_empty() || !self.multiplicity_arguments.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.type_arguments.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            if !self.multiplicity_arguments.is_empty() {
                write!(f, "|")?;
                for (i, m) in self.multiplicity_arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{m}")?;
                }
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}[{}]", p.generic_type, p.multiplicity)?;
        }
        write!(f, "->{}[{}]}}", self.return_type, self.return_multiplicity)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &c.generic_type {
                Some(t) => write!(f, "{}:{t}", c.name)?,
                None => write!(f, "{}", c.name)?,
            }
        }
        write!(f, ")")
    }
}

impl RelationType {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(path: &str) -> GenericType {
        GenericType::element(Reference::unresolved(path, None))
    }

    #[test]
    fn test_print_nested_function_type() {
        let inner = GenericType::function(
            vec![ParameterType { generic_type: named("a::Address"), multiplicity: Multiplicity::ONE }],
            named("String"),
            Multiplicity::ONE,
        );
        let outer = GenericType::function(
            vec![
                ParameterType { generic_type: inner, multiplicity: Multiplicity::ONE },
                ParameterType { generic_type: GenericType::parameter("T"), multiplicity: Multiplicity::ZERO_MANY },
            ],
            named("Boolean"),
            Multiplicity::ZERO_ONE,
        );
        assert_eq!(outer.to_string(), "{{Address[1]->String[1]}[1], T[*]->Boolean[0..1]}");
    }

    #[test]
    fn test_print_relation_and_arguments() {
        let rel = GenericType::relation(vec![
            Column { name: "a".into(), generic_type: Some(named("String")) },
            Column { name: "b".into(), generic_type: None },
        ]);
        let t = named("Relation").with_type_arguments(vec![rel]);
        assert_eq!(t.to_string(), "Relation<(a:String, b)>");
        let p = named("Pair")
            .with_type_arguments(vec![named("String"), GenericType::parameter("V")])
            .with_multiplicity_arguments(vec![Multiplicity::ONE]);
        assert_eq!(p.to_string(), "Pair<String, V|1>");
    }

    #[test]
    fn test_is_open() {
        assert!(GenericType::parameter("T").is_open());
        assert!(!named("String").is_open());
        assert!(named("List").with_type_arguments(vec![GenericType::parameter("T")]).is_open());
    }
}
