//! Abstract syntax for model sources.
//!
//! Types are parsed straight into `GenericType` values with unbound
//! references; the lowering pass in `delta` turns this tree into graph
//! construction instructions.

use crate::model::{GenericType, Multiplicity, SourceInformation, Value};

/// One parsed source unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub source_id: String,
    pub imports: Vec<Import>,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// Package path without the trailing `::*`.
    pub package: String,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Class(ClassDef),
    Enumeration(EnumDef),
    Association(AssociationDef),
    Function(FunctionDef),
}

impl Element {
    pub fn name(&self) -> &str {
        match self {
            Element::Class(c) => &c.name,
            Element::Enumeration(e) => &e.name,
            Element::Association(a) => &a.name,
            Element::Function(f) => &f.name,
        }
    }

    pub fn package(&self) -> &str {
        match self {
            Element::Class(c) => &c.package,
            Element::Enumeration(e) => &e.package,
            Element::Association(a) => &a.package,
            Element::Function(f) => &f.package,
        }
    }

    pub fn source(&self) -> &SourceInformation {
        match self {
            Element::Class(c) => &c.source,
            Element::Enumeration(e) => &e.source,
            Element::Association(a) => &a.source,
            Element::Function(f) => &f.source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub package: String,
    pub name: String,
    pub stereotypes: Vec<String>,
    pub type_parameters: Vec<String>,
    pub multiplicity_parameters: Vec<String>,
    pub generalizations: Vec<GenericType>,
    pub properties: Vec<PropertyDef>,
    pub qualified_properties: Vec<QualifiedPropertyDef>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub stereotypes: Vec<String>,
    pub generic_type: GenericType,
    pub multiplicity: Multiplicity,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedPropertyDef {
    pub name: String,
    pub parameters: Vec<ParameterDef>,
    pub return_type: GenericType,
    pub return_multiplicity: Multiplicity,
    pub body: Vec<Expr>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub package: String,
    pub name: String,
    pub stereotypes: Vec<String>,
    pub values: Vec<(String, SourceInformation)>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssociationDef {
    pub package: String,
    pub name: String,
    pub stereotypes: Vec<String>,
    pub properties: Vec<PropertyDef>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub package: String,
    pub name: String,
    pub stereotypes: Vec<String>,
    pub type_parameters: Vec<String>,
    pub multiplicity_parameters: Vec<String>,
    pub parameters: Vec<ParameterDef>,
    pub return_type: GenericType,
    pub return_multiplicity: Multiplicity,
    /// `None` for native functions.
    pub body: Option<Vec<Expr>>,
    pub source: SourceInformation,
}

impl FunctionDef {
    /// Package-unique name: `f_String_1__Integer_MANY__Boolean_1_`.
    pub fn signature_id(&self) -> String {
        let token = |t: &GenericType, m: &Multiplicity| format!("{}_{}_", t.signature_token(), m.signature_token());
        let params: Vec<String> = self
            .parameters
            .iter()
            .filter_map(|p| p.typed.as_ref().map(|(t, m)| token(t, m)))
            .collect();
        format!(
            "{}_{}_{}",
            self.name,
            params.join("_"),
            token(&self.return_type, &self.return_multiplicity)
        )
    }
}

/// A function, qualified property or lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    /// Lambda parameters may leave the type to inference.
    pub typed: Option<(GenericType, Multiplicity)>,
    pub source: SourceInformation,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal scalar (`1`, `'a'`, `true`, `%2024-01-01`).
    Literal(Value),
    /// `[a, b, c]`
    Collection(Vec<Expr>),
    /// `$x`
    Variable(String),
    /// `let x = value`
    Let { name: String, value: Box<Expr> },
    /// A packageable element by path (`Person`, `a::Color`).
    ElementRef(String),
    /// `$x.name`, `$x.qualified(args)`, `Color.RED`
    Property { receiver: Box<Expr>, name: String, arguments: Option<Vec<Expr>> },
    /// `f(a, b)` and `$a->f(b)` (receiver first).
    Call { function: String, arguments: Vec<Expr> },
    /// `^Person(name = 'x')`
    New { class: GenericType, keys: Vec<KeyValue> },
    /// `{x: String[1] | ...}`, `x | ...`, `| ...`
    Lambda { parameters: Vec<ParameterDef>, body: Vec<Expr> },
    /// `~a`, `~a:String`, `~[a, b]`
    ColumnSpec { columns: Vec<(String, Option<GenericType>)>, is_array: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Expr,
    pub source: SourceInformation,
}
