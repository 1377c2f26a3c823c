//! The M3 bootstrap: the self-describing core of the graph.
//!
//! `Class` is classified by itself; every other classifier chain ends there.
//! Bootstrap nodes have fixed ids, belong to no source unit, and are never
//! removed.

use super::{GenericType, Node, NodeId, Reference, Value, property_map};

/// Property keys shared by the front-end, the store and the compiler.
pub mod keys {
    pub const CHILDREN: &str = "children";
    pub const PACKAGE: &str = "package";
    pub const PROPERTIES: &str = "properties";
    pub const QUALIFIED_PROPERTIES: &str = "qualifiedProperties";
    pub const GENERALIZATIONS: &str = "generalizations";
    pub const TYPE_PARAMETERS: &str = "typeParameters";
    pub const MULTIPLICITY_PARAMETERS: &str = "multiplicityParameters";
    pub const GENERIC_TYPE: &str = "genericType";
    pub const MULTIPLICITY: &str = "multiplicity";
    pub const OWNER: &str = "owner";
    pub const VALUES: &str = "values";
    pub const PARAMETERS: &str = "parameters";
    pub const RETURN_TYPE: &str = "returnType";
    pub const RETURN_MULTIPLICITY: &str = "returnMultiplicity";
    pub const EXPRESSIONS: &str = "expressionSequence";
    pub const FUNCTION_NAME: &str = "functionName";
    pub const ARGUMENTS: &str = "parametersValues";
    pub const PROPERTY_NAME: &str = "propertyName";
    pub const RECEIVER: &str = "receiver";
    pub const KEY: &str = "key";
    pub const EXPRESSION: &str = "expression";
    pub const KEY_EXPRESSIONS: &str = "keyExpressions";
    pub const CLASS_TYPE: &str = "classType";
    pub const STEREOTYPES: &str = "stereotypes";
    pub const IMPORTS: &str = "imports";
    pub const IMPORT_GROUP: &str = "importGroup";
    pub const IS_ARRAY: &str = "isArray";
    pub const QUALIFIED: &str = "qualified";

    // Written by inference, cleared whenever an element is unbound.
    pub const INFERRED_TYPE: &str = "inferredType";
    pub const INFERRED_MULTIPLICITY: &str = "inferredMultiplicity";
    pub const FUNC: &str = "func";
    pub const RESOLVED_PROPERTY: &str = "resolvedProperty";

    pub const INFERRED: [&str; 4] = [INFERRED_TYPE, INFERRED_MULTIPLICITY, FUNC, RESOLVED_PROPERTY];
}

pub const ROOT: NodeId = NodeId(1);
pub const ROOT_NAME: &str = "Root";
pub const METAMODEL_PACKAGE: &str = "meta::pure::metamodel";

/// Packages every source sees without importing them.
pub const AUTO_IMPORTS: [&str; 8] = [
    "meta::pure::metamodel::type",
    "meta::pure::metamodel::relation",
    "meta::pure::functions::collection",
    "meta::pure::functions::lang",
    "meta::pure::functions::boolean",
    "meta::pure::functions::math",
    "meta::pure::functions::string",
    "meta::pure::functions::relation",
];

/// Bootstrap classifiers and primitive types, with fixed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum M3 {
    Class,
    Package,
    PrimitiveType,
    Enumeration,
    Association,
    Property,
    QualifiedProperty,
    ConcreteFunctionDefinition,
    NativeFunction,
    LambdaFunction,
    ImportGroup,
    InstanceValue,
    VariableExpression,
    SimpleFunctionExpression,
    PropertyExpression,
    NewExpression,
    KeyExpression,
    LetExpression,
    ColumnSpecification,
    // Types at Root
    Any,
    Nil,
    String,
    Boolean,
    Number,
    Integer,
    Float,
    Date,
    StrictDate,
    DateTime,
}

impl M3 {
    pub const ALL: [M3; 29] = [
        M3::Class,
        M3::Package,
        M3::PrimitiveType,
        M3::Enumeration,
        M3::Association,
        M3::Property,
        M3::QualifiedProperty,
        M3::ConcreteFunctionDefinition,
        M3::NativeFunction,
        M3::LambdaFunction,
        M3::ImportGroup,
        M3::InstanceValue,
        M3::VariableExpression,
        M3::SimpleFunctionExpression,
        M3::PropertyExpression,
        M3::NewExpression,
        M3::KeyExpression,
        M3::LetExpression,
        M3::ColumnSpecification,
        M3::Any,
        M3::Nil,
        M3::String,
        M3::Boolean,
        M3::Number,
        M3::Integer,
        M3::Float,
        M3::Date,
        M3::StrictDate,
        M3::DateTime,
    ];

    pub fn id(self) -> NodeId {
        NodeId(self as u64 + 2)
    }

    pub fn from_id(id: NodeId) -> Option<M3> {
        let index = id.0.checked_sub(2)?;
        M3::ALL.get(index as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            M3::Class => "Class",
            M3::Package => "Package",
            M3::PrimitiveType => "PrimitiveType",
            M3::Enumeration => "Enumeration",
            M3::Association => "Association",
            M3::Property => "Property",
            M3::QualifiedProperty => "QualifiedProperty",
            M3::ConcreteFunctionDefinition => "ConcreteFunctionDefinition",
            M3::NativeFunction => "NativeFunction",
            M3::LambdaFunction => "LambdaFunction",
            M3::ImportGroup => "ImportGroup",
            M3::InstanceValue => "InstanceValue",
            M3::VariableExpression => "VariableExpression",
            M3::SimpleFunctionExpression => "SimpleFunctionExpression",
            M3::PropertyExpression => "PropertyExpression",
            M3::NewExpression => "NewExpression",
            M3::KeyExpression => "KeyExpression",
            M3::LetExpression => "LetExpression",
            M3::ColumnSpecification => "ColumnSpecification",
            M3::Any => "Any",
            M3::Nil => "Nil",
            M3::String => "String",
            M3::Boolean => "Boolean",
            M3::Number => "Number",
            M3::Integer => "Integer",
            M3::Float => "Float",
            M3::Date => "Date",
            M3::StrictDate => "StrictDate",
            M3::DateTime => "DateTime",
        }
    }

    /// Package the element lives in (`""` is Root).
    pub fn package(self) -> &'static str {
        if self.is_root_type() { "" } else { METAMODEL_PACKAGE }
    }

    pub fn path(self) -> String {
        super::path::join(self.package(), self.name())
    }

    fn is_root_type(self) -> bool {
        (self as u64) >= (M3::Any as u64)
    }

    /// The classifier of this bootstrap node.
    pub fn classifier(self) -> M3 {
        match self {
            M3::Any | M3::Nil => M3::Class,
            t if t.is_root_type() => M3::PrimitiveType,
            _ => M3::Class,
        }
    }

    pub fn generalization(self) -> Option<M3> {
        match self {
            M3::Any => None,
            M3::Integer | M3::Float => Some(M3::Number),
            M3::StrictDate | M3::DateTime => Some(M3::Date),
            _ => Some(M3::Any),
        }
    }

    pub fn is_function(self) -> bool {
        matches!(self, M3::ConcreteFunctionDefinition | M3::NativeFunction)
    }

    /// GenericType naming this bootstrap type.
    pub fn generic_type(self) -> GenericType {
        GenericType::element(Reference::resolved(self.path(), self.id()))
    }
}

/// Bootstrap nodes in id order, not yet attached to packages.
pub fn bootstrap_nodes() -> Vec<Node> {
    let mut nodes = Vec::with_capacity(M3::ALL.len() + 1);
    nodes.push(
        Node::new(ROOT, M3::Package.id())
            .with_name(ROOT_NAME),
    );
    for m3 in M3::ALL {
        let mut node = Node::new(m3.id(), m3.classifier().id()).with_name(m3.name());
        node.element = Some(m3.id());
        if let Some(general) = m3.generalization() {
            node.properties
                .insert(keys::GENERALIZATIONS.to_string(), property_map::one(Value::Type(general.generic_type())));
        }
        nodes.push(node);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_is_self_classified() {
        assert_eq!(M3::Class.classifier(), M3::Class);
        assert_eq!(M3::Class.id(), NodeId(2));
        assert_eq!(M3::from_id(M3::Integer.id()), Some(M3::Integer));
        assert_eq!(M3::from_id(ROOT), None);
    }

    #[test]
    fn test_primitive_hierarchy() {
        assert_eq!(M3::Integer.generalization(), Some(M3::Number));
        assert_eq!(M3::Number.generalization(), Some(M3::Any));
        assert_eq!(M3::Any.generalization(), None);
        assert_eq!(M3::String.classifier(), M3::PrimitiveType);
        assert_eq!(M3::String.path(), "String");
        assert_eq!(M3::Property.path(), "meta::pure::metamodel::Property");
    }

    #[test]
    fn test_bootstrap_nodes_are_ordered() {
        let nodes = bootstrap_nodes();
        for (i, n) in nodes.iter().enumerate() {
            assert_eq!(n.id, NodeId(i as u64 + 1));
        }
        assert_eq!(nodes[1].classifier, nodes[1].id);
    }
}
