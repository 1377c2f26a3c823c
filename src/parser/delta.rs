//! Graph deltas: the parser's only output.
//!
//! A `GraphDelta` is an ordered list of construction instructions against
//! source-local node ids. The compiler maps local ids to store ids while
//! applying it inside a write transaction; the parser never touches the
//! shared graph.

use crate::model::{
    GenericType, M3, Multiplicity, Reference, SourceInformation, Value, keys, path,
};
use super::ast::*;

/// Node id local to one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u32);

/// Classifier of a new node: a bootstrap concept, or a node of the same
/// delta (enumeration values are classified by their enumeration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    Bootstrap(M3),
    Local(LocalId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaValue {
    Value(Value),
    /// Strong edge to a node created earlier in the same delta.
    Local(LocalId),
}

impl From<Value> for DeltaValue {
    fn from(v: Value) -> Self {
        DeltaValue::Value(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    NewNode {
        local: LocalId,
        classifier: Classifier,
        name: Option<String>,
        /// Owning element; `None` makes the node an element itself.
        element: Option<LocalId>,
        source: Option<SourceInformation>,
    },
    SetProperty {
        node: LocalId,
        key: &'static str,
        values: Vec<DeltaValue>,
    },
    /// Attach an element to the package at `package` (created on demand).
    Attach {
        element: LocalId,
        package: String,
    },
}

/// A by-path reference recorded at parse time, bound by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceStub {
    pub node: LocalId,
    pub key: &'static str,
    pub path: String,
    pub source: Option<SourceInformation>,
}

/// Construction instructions for one source unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphDelta {
    pub source_id: String,
    pub instructions: Vec<Instruction>,
    pub stubs: Vec<ReferenceStub>,
    /// Top-level elements, in declaration order. The import group comes
    /// first when the source declares any element.
    pub elements: Vec<LocalId>,
}

impl GraphDelta {
    pub fn node_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| matches!(i, Instruction::NewNode { .. }))
            .count()
    }
}

// ============================================================================
// Lowering
// ============================================================================

/// Lower a parsed source unit into a graph delta.
pub fn lower(unit: &SourceUnit) -> GraphDelta {
    let mut b = DeltaBuilder::new(&unit.source_id);
    if unit.elements.is_empty() {
        return b.finish();
    }
    let imports = b.import_group(unit);
    for element in &unit.elements {
        match element {
            Element::Class(c) => b.class(c, imports),
            Element::Enumeration(e) => b.enumeration(e),
            Element::Association(a) => b.association(a),
            Element::Function(f) => b.function(f, imports),
        }
    }
    b.finish()
}

struct DeltaBuilder {
    delta: GraphDelta,
    next: u32,
}

impl DeltaBuilder {
    fn new(source_id: &str) -> Self {
        Self { delta: GraphDelta { source_id: source_id.to_string(), ..Default::default() }, next: 0 }
    }

    fn finish(self) -> GraphDelta {
        self.delta
    }

    fn node(
        &mut self,
        classifier: Classifier,
        name: Option<&str>,
        element: Option<LocalId>,
        source: Option<&SourceInformation>,
    ) -> LocalId {
        let local = LocalId(self.next);
        self.next += 1;
        self.delta.instructions.push(Instruction::NewNode {
            local,
            classifier,
            name: name.map(str::to_string),
            element,
            source: source.cloned(),
        });
        local
    }

    fn m3(&mut self, m3: M3, name: Option<&str>, element: Option<LocalId>, source: &SourceInformation) -> LocalId {
        self.node(Classifier::Bootstrap(m3), name, element, Some(source))
    }

    /// Set a property, recording a stub for every reference inside it.
    fn set(&mut self, node: LocalId, key: &'static str, values: Vec<DeltaValue>) {
        if values.is_empty() {
            return;
        }
        for value in &values {
            if let DeltaValue::Value(v) = value {
                v.for_each_reference(&mut |r| {
                    if !r.is_resolved() {
                        self.delta.stubs.push(ReferenceStub {
                            node,
                            key,
                            path: r.path.clone(),
                            source: r.source.clone(),
                        });
                    }
                });
            }
        }
        self.delta.instructions.push(Instruction::SetProperty { node, key, values });
    }

    fn set_value(&mut self, node: LocalId, key: &'static str, value: impl Into<Value>) {
        self.set(node, key, vec![DeltaValue::Value(value.into())]);
    }

    fn set_strings(&mut self, node: LocalId, key: &'static str, values: &[String]) {
        let values = values.iter().map(|s| DeltaValue::Value(Value::String(s.clone()))).collect();
        self.set(node, key, values);
    }

    fn set_nodes(&mut self, node: LocalId, key: &'static str, children: Vec<LocalId>) {
        self.set(node, key, children.into_iter().map(DeltaValue::Local).collect());
    }

    fn element(&mut self, local: LocalId, package: &str) {
        self.delta.elements.push(local);
        self.delta.instructions.push(Instruction::Attach { element: local, package: package.to_string() });
    }

    // ------------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------------

    fn import_group(&mut self, unit: &SourceUnit) -> LocalId {
        let source = SourceInformation::new(&unit.source_id, (1, 1), (1, 1), (1, 1));
        let group = self.m3(M3::ImportGroup, None, None, &source);
        let packages = unit
            .imports
            .iter()
            .map(|i| DeltaValue::Value(Value::Ref(Reference::unresolved(i.package.clone(), Some(i.source.clone())))))
            .collect();
        self.set(group, keys::IMPORTS, packages);
        self.delta.elements.push(group);
        group
    }

    fn class(&mut self, c: &ClassDef, imports: LocalId) {
        let class = self.m3(M3::Class, Some(c.name.as_str()), None, &c.source);
        self.set_strings(class, keys::STEREOTYPES, &c.stereotypes);
        self.set_strings(class, keys::TYPE_PARAMETERS, &c.type_parameters);
        self.set_strings(class, keys::MULTIPLICITY_PARAMETERS, &c.multiplicity_parameters);
        let generalizations = c.generalizations.iter().map(|g| DeltaValue::Value(Value::Type(g.clone()))).collect();
        self.set(class, keys::GENERALIZATIONS, generalizations);

        let properties: Vec<LocalId> = c.properties.iter().map(|p| self.property(p, class)).collect();
        self.set_nodes(class, keys::PROPERTIES, properties);

        let this_type = GenericType::element(Reference::unresolved(path::join(&c.package, &c.name), Some(c.source.clone())))
            .with_type_arguments(c.type_parameters.iter().map(GenericType::parameter).collect())
            .with_multiplicity_arguments(
                c.multiplicity_parameters.iter().map(|m| Multiplicity::Parameter(m.clone())).collect(),
            );
        let qualified: Vec<LocalId> = c
            .qualified_properties
            .iter()
            .map(|q| self.qualified_property(q, class, &this_type))
            .collect();
        self.set_nodes(class, keys::QUALIFIED_PROPERTIES, qualified);
        self.set_nodes(class, keys::IMPORT_GROUP, vec![imports]);
        self.element(class, &c.package);
    }

    fn property(&mut self, p: &PropertyDef, owner: LocalId) -> LocalId {
        let prop = self.m3(M3::Property, Some(p.name.as_str()), Some(owner), &p.source);
        self.set_value(prop, keys::GENERIC_TYPE, p.generic_type.clone());
        self.set_value(prop, keys::MULTIPLICITY, p.multiplicity.clone());
        self.set_strings(prop, keys::STEREOTYPES, &p.stereotypes);
        self.set_nodes(prop, keys::OWNER, vec![owner]);
        prop
    }

    fn qualified_property(&mut self, q: &QualifiedPropertyDef, owner: LocalId, this_type: &GenericType) -> LocalId {
        let qp = self.m3(M3::QualifiedProperty, Some(q.name.as_str()), Some(owner), &q.source);
        let this = self.m3(M3::VariableExpression, Some("this"), Some(owner), &q.source);
        self.set_value(this, keys::GENERIC_TYPE, this_type.clone());
        self.set_value(this, keys::MULTIPLICITY, Multiplicity::ONE);
        let mut parameters = vec![this];
        parameters.extend(q.parameters.iter().map(|p| self.parameter(p, owner)));
        self.set_nodes(qp, keys::PARAMETERS, parameters);
        self.set_value(qp, keys::RETURN_TYPE, q.return_type.clone());
        self.set_value(qp, keys::RETURN_MULTIPLICITY, q.return_multiplicity.clone());
        let body: Vec<LocalId> = q.body.iter().map(|e| self.expr(e, owner)).collect();
        self.set_nodes(qp, keys::EXPRESSIONS, body);
        self.set_nodes(qp, keys::OWNER, vec![owner]);
        qp
    }

    fn parameter(&mut self, p: &ParameterDef, element: LocalId) -> LocalId {
        let var = self.m3(M3::VariableExpression, Some(p.name.as_str()), Some(element), &p.source);
        if let Some((t, m)) = &p.typed {
            self.set_value(var, keys::GENERIC_TYPE, t.clone());
            self.set_value(var, keys::MULTIPLICITY, m.clone());
        }
        var
    }

    fn enumeration(&mut self, e: &EnumDef) {
        let enumeration = self.m3(M3::Enumeration, Some(e.name.as_str()), None, &e.source);
        self.set_strings(enumeration, keys::STEREOTYPES, &e.stereotypes);
        let values: Vec<LocalId> = e
            .values
            .iter()
            .map(|(name, source)| self.node(Classifier::Local(enumeration), Some(name.as_str()), Some(enumeration), Some(source)))
            .collect();
        self.set_nodes(enumeration, keys::VALUES, values);
        self.element(enumeration, &e.package);
    }

    fn association(&mut self, a: &AssociationDef) {
        let association = self.m3(M3::Association, Some(a.name.as_str()), None, &a.source);
        self.set_strings(association, keys::STEREOTYPES, &a.stereotypes);
        let properties: Vec<LocalId> = a.properties.iter().map(|p| self.property(p, association)).collect();
        self.set_nodes(association, keys::PROPERTIES, properties);
        self.element(association, &a.package);
    }

    fn function(&mut self, f: &FunctionDef, imports: LocalId) {
        let classifier = if f.body.is_some() { M3::ConcreteFunctionDefinition } else { M3::NativeFunction };
        let function = self.m3(classifier, Some(f.signature_id().as_str()), None, &f.source);
        self.set_value(function, keys::FUNCTION_NAME, f.name.clone());
        self.set_strings(function, keys::STEREOTYPES, &f.stereotypes);
        self.set_strings(function, keys::TYPE_PARAMETERS, &f.type_parameters);
        self.set_strings(function, keys::MULTIPLICITY_PARAMETERS, &f.multiplicity_parameters);
        let parameters: Vec<LocalId> = f.parameters.iter().map(|p| self.parameter(p, function)).collect();
        self.set_nodes(function, keys::PARAMETERS, parameters);
        self.set_value(function, keys::RETURN_TYPE, f.return_type.clone());
        self.set_value(function, keys::RETURN_MULTIPLICITY, f.return_multiplicity.clone());
        if let Some(body) = &f.body {
            let body: Vec<LocalId> = body.iter().map(|e| self.expr(e, function)).collect();
            self.set_nodes(function, keys::EXPRESSIONS, body);
        }
        self.set_nodes(function, keys::IMPORT_GROUP, vec![imports]);
        self.element(function, &f.package);
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn expr(&mut self, e: &Expr, element: LocalId) -> LocalId {
        match &e.kind {
            ExprKind::Literal(v) => {
                let node = self.m3(M3::InstanceValue, None, Some(element), &e.source);
                self.set_value(node, keys::VALUES, v.clone());
                node
            }
            ExprKind::Collection(items) => {
                let node = self.m3(M3::InstanceValue, None, Some(element), &e.source);
                let values = items
                    .iter()
                    .map(|item| match &item.kind {
                        ExprKind::Literal(v) => DeltaValue::Value(v.clone()),
                        _ => DeltaValue::Local(self.expr(item, element)),
                    })
                    .collect::<Vec<_>>();
                self.set(node, keys::VALUES, values);
                node
            }
            ExprKind::ElementRef(p) => {
                let node = self.m3(M3::InstanceValue, None, Some(element), &e.source);
                self.set_value(node, keys::VALUES, Reference::unresolved(p.clone(), Some(e.source.clone())));
                node
            }
            ExprKind::Variable(name) => self.m3(M3::VariableExpression, Some(name.as_str()), Some(element), &e.source),
            ExprKind::Let { name, value } => {
                let node = self.m3(M3::LetExpression, Some(name.as_str()), Some(element), &e.source);
                let value = self.expr(value, element);
                self.set_nodes(node, keys::EXPRESSION, vec![value]);
                node
            }
            ExprKind::Property { receiver, name, arguments } => {
                let node = self.m3(M3::PropertyExpression, None, Some(element), &e.source);
                self.set_value(node, keys::PROPERTY_NAME, name.clone());
                let receiver = self.expr(receiver, element);
                self.set_nodes(node, keys::RECEIVER, vec![receiver]);
                if let Some(arguments) = arguments {
                    self.set_value(node, keys::QUALIFIED, true);
                    let args: Vec<LocalId> = arguments.iter().map(|a| self.expr(a, element)).collect();
                    self.set_nodes(node, keys::ARGUMENTS, args);
                }
                node
            }
            ExprKind::Call { function, arguments } => {
                let node = self.m3(M3::SimpleFunctionExpression, None, Some(element), &e.source);
                self.set_value(node, keys::FUNCTION_NAME, function.clone());
                let args: Vec<LocalId> = arguments.iter().map(|a| self.expr(a, element)).collect();
                self.set_nodes(node, keys::ARGUMENTS, args);
                node
            }
            ExprKind::New { class, keys: key_values } => {
                let node = self.m3(M3::NewExpression, None, Some(element), &e.source);
                self.set_value(node, keys::CLASS_TYPE, class.clone());
                let mut key_nodes = Vec::with_capacity(key_values.len());
                for kv in key_values {
                    let key_node = self.m3(M3::KeyExpression, None, Some(element), &kv.source);
                    self.set_value(key_node, keys::KEY, kv.key.clone());
                    let value = self.expr(&kv.value, element);
                    self.set_nodes(key_node, keys::EXPRESSION, vec![value]);
                    key_nodes.push(key_node);
                }
                self.set_nodes(node, keys::KEY_EXPRESSIONS, key_nodes);
                node
            }
            ExprKind::Lambda { parameters, body } => {
                let node = self.m3(M3::LambdaFunction, None, Some(element), &e.source);
                let params: Vec<LocalId> = parameters.iter().map(|p| self.parameter(p, element)).collect();
                self.set_nodes(node, keys::PARAMETERS, params);
                let body: Vec<LocalId> = body.iter().map(|b| self.expr(b, element)).collect();
                self.set_nodes(node, keys::EXPRESSIONS, body);
                node
            }
            ExprKind::ColumnSpec { columns, is_array } => {
                let node = self.m3(M3::ColumnSpecification, None, Some(element), &e.source);
                let relation = GenericType::relation(
                    columns
                        .iter()
                        .map(|(name, t)| crate::model::Column { name: name.clone(), generic_type: t.clone() })
                        .collect(),
                );
                self.set_value(node, keys::GENERIC_TYPE, relation);
                self.set_value(node, keys::IS_ARRAY, *is_array);
                node
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> GraphDelta {
        crate::parser::parse("/d.pure", text).unwrap()
    }

    fn new_nodes(d: &GraphDelta) -> Vec<(Classifier, Option<String>)> {
        d.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::NewNode { classifier, name, .. } => Some((*classifier, name.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_source_has_no_instructions() {
        let d = delta("import a::*;");
        assert!(d.instructions.is_empty());
        assert!(d.elements.is_empty());
    }

    #[test]
    fn test_class_lowering() {
        let d = delta("Class a::Person { name: String[1]; address: b::Address[0..1]; }");
        let nodes = new_nodes(&d);
        assert_eq!(nodes[0], (Classifier::Bootstrap(M3::ImportGroup), None));
        assert_eq!(nodes[1], (Classifier::Bootstrap(M3::Class), Some("Person".into())));
        assert_eq!(nodes[2], (Classifier::Bootstrap(M3::Property), Some("name".into())));
        assert_eq!(d.elements, vec![LocalId(0), LocalId(1)]);
        let stub_paths: Vec<&str> = d.stubs.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(stub_paths, vec!["String", "b::Address"]);
        assert!(d.instructions.contains(&Instruction::Attach { element: LocalId(1), package: "a".into() }));
    }

    #[test]
    fn test_imports_are_stubs_on_the_group() {
        let d = delta("import a::b::*;\nimport c::*;\nClass z::User {}");
        let imports: Vec<(LocalId, &str)> = d
            .stubs
            .iter()
            .filter(|s| s.key == keys::IMPORTS)
            .map(|s| (s.node, s.path.as_str()))
            .collect();
        assert_eq!(imports, vec![(LocalId(0), "a::b"), (LocalId(0), "c")]);
        let second = d.stubs.iter().find(|s| s.path == "c").and_then(|s| s.source.clone()).unwrap();
        assert_eq!(second.line, 2);
    }

    #[test]
    fn test_enumeration_values_are_classified_by_enum() {
        let d = delta("Enum Color { RED, GREEN }");
        let nodes = new_nodes(&d);
        assert_eq!(nodes[2], (Classifier::Local(LocalId(1)), Some("RED".into())));
        assert_eq!(nodes[3], (Classifier::Local(LocalId(1)), Some("GREEN".into())));
    }

    #[test]
    fn test_function_named_by_signature() {
        let d = delta("function p::f(s: String[1]): Boolean[1] { $s == 'x' }");
        let nodes = new_nodes(&d);
        assert_eq!(nodes[1], (Classifier::Bootstrap(M3::ConcreteFunctionDefinition), Some("f_String_1__Boolean_1_".into())));
        assert!(nodes.contains(&(Classifier::Bootstrap(M3::SimpleFunctionExpression), None)));
    }

    #[test]
    fn test_qualified_property_gets_this_parameter() {
        let d = delta("Class Box<T> { v: T[1]; get() { $this.v }: T[1]; }");
        let this = d
            .instructions
            .iter()
            .find_map(|i| match i {
                Instruction::NewNode { local, name: Some(n), .. } if n == "this" => Some(*local),
                _ => None,
            })
            .unwrap();
        let this_type = d
            .instructions
            .iter()
            .find_map(|i| match i {
                Instruction::SetProperty { node, key, values } if *node == this && *key == keys::GENERIC_TYPE => {
                    Some(values[0].clone())
                }
                _ => None,
            })
            .unwrap();
        let DeltaValue::Value(Value::Type(t)) = this_type else { panic!() };
        assert_eq!(t.to_string(), "Box<T>");
    }
}
