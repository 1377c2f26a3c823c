//! # Element Validation
//!
//! Structural checks run over every element of the affected closure once
//! its references are bound:
//!
//! | Check | Applies to |
//! |-------|------------|
//! | exactly two class-typed ends | associations |
//! | generalizations target classes, no cycles | classes |
//! | type and multiplicity argument arity | every type written in the element |
//! | overrides compatible with the inherited declaration | class properties and qualified properties |
//!
//! Each check returns the first failure as a located `Error`.

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::model::{
    GenericType, M3, Multiplicity, Node, NodeId, ParameterType, RawType, SourceInformation, Value, keys,
};
use crate::storage::GraphView;
use crate::types::generalization::{self, find_cycle, self_type};
use crate::types::{GeneralizationCache, is_compatible};
use crate::{Error, Result};

/// Property keys holding types written in source.
const TYPE_KEYS: [&str; 4] = [keys::GENERIC_TYPE, keys::RETURN_TYPE, keys::GENERALIZATIONS, keys::CLASS_TYPE];

/// Run every check on `element`, stopping at the first failure.
pub fn validate_element<G: GraphView + ?Sized>(g: &G, cache: &GeneralizationCache, element: NodeId) -> Result<()> {
    let Some(node) = g.node(element) else { return Ok(()) };
    match M3::from_id(node.classifier) {
        Some(M3::Association) => check_association(g, node)?,
        Some(M3::Class) => check_generalizations(g, node)?,
        _ => {}
    }
    check_type_arguments(g, element)?;
    if node.classifier == M3::Class.id() {
        check_property_overrides(g, cache, node)?;
        check_qualified_property_overrides(g, cache, node)?;
    }
    Ok(())
}

fn location(node: &Node) -> SourceInformation {
    node.source.clone().unwrap_or_default()
}

fn compilation_error(at: SourceInformation, message: String) -> Error {
    Error::TypeInference(Diagnostic::new(DiagnosticKind::TypeInference, at, message))
}

fn name_of(node: &Node) -> &str {
    node.name.as_deref().unwrap_or_default()
}

// ============================================================================
// Associations and generalizations
// ============================================================================

fn check_association<G: GraphView + ?Sized>(g: &G, association: &Node) -> Result<()> {
    let name = name_of(association);
    let ends = association.node_refs(keys::PROPERTIES);
    if ends.len() != 2 {
        return Err(compilation_error(
            location(association),
            format!("Expected 2 properties for association '{name}', found {}", ends.len()),
        ));
    }
    for end in ends {
        let Some(end) = g.node(end) else { continue };
        let Some(t) = end.first(keys::GENERIC_TYPE).and_then(Value::as_type) else { continue };
        let is_class = t.element_id().and_then(|id| g.classifier_of(id)) == Some(M3::Class.id());
        if !is_class {
            return Err(compilation_error(
                location(end),
                format!("Association '{name}' can only be applied to Classes; '{t}' is not a Class"),
            ));
        }
    }
    Ok(())
}

fn check_generalizations<G: GraphView + ?Sized>(g: &G, class: &Node) -> Result<()> {
    let name = name_of(class);
    for general in class.values(keys::GENERALIZATIONS).iter().filter_map(Value::as_type) {
        let target_is_class = general.element_id().and_then(|id| g.classifier_of(id)) == Some(M3::Class.id());
        if !target_is_class {
            return Err(compilation_error(
                location(class),
                format!("Class '{name}' can only extend classes; '{general}' is not a Class"),
            ));
        }
    }
    if find_cycle(g, class.id) {
        return Err(compilation_error(
            location(class),
            format!("Class '{}' is part of a generalization cycle", g.path_of(class.id)),
        ));
    }
    Ok(())
}

// ============================================================================
// Type argument arity
// ============================================================================

fn check_type_arguments<G: GraphView + ?Sized>(g: &G, element: NodeId) -> Result<()> {
    for member in g.members(element) {
        let Some(node) = g.node(member) else { continue };
        for key in TYPE_KEYS {
            // `^Box(...)` may leave its arguments to inference.
            let inferable = key == keys::CLASS_TYPE;
            for t in node.values(key).iter().filter_map(Value::as_type) {
                check_arity(g, t, node, inferable)?;
            }
        }
    }
    Ok(())
}

fn check_arity<G: GraphView + ?Sized>(g: &G, t: &GenericType, at: &Node, inferable: bool) -> Result<()> {
    match &t.raw {
        RawType::Element(reference) => {
            if let Some(target) = reference.target {
                let params = generalization::type_parameters(g, target);
                let mult_params = generalization::multiplicity_parameters(g, target);
                let omitted = inferable && t.type_arguments.is_empty() && t.multiplicity_arguments.is_empty();
                let written_at = reference.source.clone().unwrap_or_else(|| location(at));
                if !omitted && params.len() != t.type_arguments.len() {
                    return Err(Error::TypeArgumentMismatch(Diagnostic::new(
                        DiagnosticKind::TypeArgumentMismatch,
                        written_at.clone(),
                        format!(
                            "Type argument mismatch for the class {} (expected {}, got {}): {t}",
                            self_type(g, target),
                            params.len(),
                            t.type_arguments.len()
                        ),
                    )));
                }
                if !omitted && mult_params.len() != t.multiplicity_arguments.len() {
                    return Err(Error::TypeArgumentMismatch(Diagnostic::new(
                        DiagnosticKind::TypeArgumentMismatch,
                        written_at.clone(),
                        format!(
                            "Multiplicity argument mismatch for the class {} (expected {}, got {}): {t}",
                            self_type(g, target),
                            mult_params.len(),
                            t.multiplicity_arguments.len()
                        ),
                    )));
                }
            }
        }
        RawType::Parameter(_) => {}
        RawType::Function(f) => {
            for p in &f.parameters {
                check_arity(g, &p.generic_type, at, false)?;
            }
            check_arity(g, &f.return_type, at, false)?;
        }
        RawType::Relation(r) => {
            for t in r.columns.iter().filter_map(|c| c.generic_type.as_ref()) {
                check_arity(g, t, at, false)?;
            }
        }
        RawType::Operation(op) => {
            check_arity(g, &op.left, at, false)?;
            check_arity(g, &op.right, at, false)?;
        }
    }
    for arg in &t.type_arguments {
        check_arity(g, arg, at, false)?;
    }
    Ok(())
}

// ============================================================================
// Overrides
// ============================================================================

fn declared(node: &Node) -> Option<(GenericType, Multiplicity)> {
    Some((
        node.first(keys::GENERIC_TYPE)?.as_type()?.clone(),
        node.first(keys::MULTIPLICITY)?.as_multiplicity()?.clone(),
    ))
}

/// A redeclared property must narrow the inherited one.
fn check_property_overrides<G: GraphView + ?Sized>(g: &G, cache: &GeneralizationCache, class: &Node) -> Result<()> {
    let this = self_type(g, class.id);
    let class_name = name_of(class);
    for own in class.node_refs(keys::PROPERTIES) {
        let Some(own) = g.node(own) else { continue };
        let Some((own_type, own_mult)) = declared(own) else { continue };
        let name = name_of(own);
        for ancestor in cache.linearize(g, class.id).iter().skip(1) {
            let Some(ancestor_id) = ancestor.element_id() else { continue };
            let Some(ancestor_node) = g.node(ancestor_id) else { continue };
            let inherited = ancestor_node
                .node_refs(keys::PROPERTIES)
                .into_iter()
                .filter_map(|p| g.node(p))
                .find(|p| p.name.as_deref() == Some(name));
            let Some(inherited) = inherited else { continue };
            let Some((t, m)) = declared(inherited) else { continue };
            let seen = cache.resolve_ancestor(g, &this, ancestor_id).unwrap_or_else(|| ancestor.clone());
            let expected = generalization::substitute_declared(g, ancestor_id, &seen, &t);
            if !is_compatible(g, cache, &own_type, &expected) || !own_mult.subsumed_by(&m) {
                return Err(compilation_error(
                    location(own),
                    format!(
                        "Property conflict on class {class_name}: property '{name}' of type {own_type}[{own_mult}] is not compatible with {expected}[{m}] inherited from {}",
                        name_of(ancestor_node)
                    ),
                ));
            }
            break;
        }
    }
    Ok(())
}

/// Qualified property viewed as a function type, without its `this`.
fn qualified_type(declared_of: &impl Fn(NodeId) -> Option<(GenericType, Multiplicity)>, qp: &Node) -> Option<GenericType> {
    let parameters = qp
        .node_refs(keys::PARAMETERS)
        .into_iter()
        .skip(1)
        .map(|p| declared_of(p).map(|(generic_type, multiplicity)| ParameterType { generic_type, multiplicity }))
        .collect::<Option<Vec<_>>>()?;
    Some(GenericType::function(
        parameters,
        qp.first(keys::RETURN_TYPE)?.as_type()?.clone(),
        qp.first(keys::RETURN_MULTIPLICITY)?.as_multiplicity()?.clone(),
    ))
}

/// A redeclared qualified property must be usable wherever the inherited
/// one is: broader parameters, narrower result.
fn check_qualified_property_overrides<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    class: &Node,
) -> Result<()> {
    let this = self_type(g, class.id);
    let class_name = name_of(class);
    let declared_of = |id: NodeId| g.node(id).and_then(declared);
    for own in class.node_refs(keys::QUALIFIED_PROPERTIES) {
        let Some(own) = g.node(own) else { continue };
        let Some(own_type) = qualified_type(&declared_of, own) else { continue };
        let arity = own.node_refs(keys::PARAMETERS).len();
        let name = name_of(own);
        for ancestor in cache.linearize(g, class.id).iter().skip(1) {
            let Some(ancestor_id) = ancestor.element_id() else { continue };
            let Some(ancestor_node) = g.node(ancestor_id) else { continue };
            let inherited = ancestor_node
                .node_refs(keys::QUALIFIED_PROPERTIES)
                .into_iter()
                .filter_map(|p| g.node(p))
                .find(|p| p.name.as_deref() == Some(name) && p.node_refs(keys::PARAMETERS).len() == arity);
            let Some(inherited) = inherited else { continue };
            let Some(t) = qualified_type(&declared_of, inherited) else { continue };
            let seen = cache.resolve_ancestor(g, &this, ancestor_id).unwrap_or_else(|| ancestor.clone());
            let expected = generalization::substitute_declared(g, ancestor_id, &seen, &t);
            if !is_compatible(g, cache, &own_type, &expected) {
                return Err(compilation_error(
                    location(own),
                    format!(
                        "Qualified property conflict on class {class_name}: '{name}' of type {own_type} is not compatible with {expected} inherited from {}",
                        name_of(ancestor_node)
                    ),
                ));
            }
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::IncrementalCompiler;
    use crate::config::RuntimeConfig;

    fn compile(text: &str) -> Result<()> {
        let mut compiler = IncrementalCompiler::new(&RuntimeConfig { load_platform: false, ..Default::default() })?;
        compiler.sources_mut().create("/v.pure", text)?;
        compiler.compile().map(|_| ())
    }

    fn message(text: &str) -> String {
        match compile(text) {
            Err(e) => e.diagnostic().map(|d| d.message.clone()).unwrap_or_else(|| e.to_string()),
            Ok(()) => String::new(),
        }
    }

    #[test]
    fn test_association_with_one_end() {
        let err = compile(
            "Class Product{name:String[1];}\nClass Synonym{name:String[1];}\nAssociation ProdSyn\n{\n  product:Product[1];\n}",
        )
        .unwrap_err();
        let d = err.diagnostic().unwrap();
        assert_eq!(d.message, "Expected 2 properties for association 'ProdSyn', found 1");
        assert_eq!((d.location.line, d.location.column), (3, 13));
    }

    #[test]
    fn test_association_end_must_be_a_class() {
        assert_eq!(
            message("Class A{}\nAssociation AB { a: A[1]; s: String[1]; }"),
            "Association 'AB' can only be applied to Classes; 'String' is not a Class"
        );
    }

    #[test]
    fn test_generalization_checks() {
        assert_eq!(message("Class A extends String {}"), "Class 'A' can only extend classes; 'String' is not a Class");
        assert_eq!(message("Class A extends B {}\nClass B extends A {}"), "Class 'A' is part of a generalization cycle");
    }

    #[test]
    fn test_type_argument_arity() {
        assert_eq!(
            message("Class Box<T> { v: T[1]; }\nClass User { b: Box[1]; }"),
            "Type argument mismatch for the class Box<T> (expected 1, got 0): Box"
        );
        assert_eq!(
            message("Class Box<T> { v: T[1]; }\nClass User { b: Box<String, Integer>[1]; }"),
            "Type argument mismatch for the class Box<T> (expected 1, got 2): Box<String, Integer>"
        );
        assert_eq!(message("Class Box<T> { v: T[1]; }\nClass User { b: Box<String>[1]; }"), "");
    }

    #[test]
    fn test_property_override_must_narrow() {
        assert_eq!(
            message("Class A { n: Number[1]; }\nClass B extends A { n: Integer[1]; }"),
            ""
        );
        assert_eq!(
            message("Class A { n: Integer[1]; }\nClass B extends A { n: String[1]; }"),
            "Property conflict on class B: property 'n' of type String[1] is not compatible with Integer[1] inherited from A"
        );
    }

    #[test]
    fn test_qualified_property_override_uses_function_compatibility() {
        let base = "Class Address {}\nClass HomeAddress extends Address {}\n";
        assert_eq!(
            message(&format!(
                "{base}Class A {{ f(a: HomeAddress[1]) {{ 'x' }}: String[1]; }}\nClass B extends A {{ f(a: Address[1]) {{ 'y' }}: String[1]; }}"
            )),
            ""
        );
        assert_eq!(
            message(&format!(
                "{base}Class A {{ f(a: Address[1]) {{ 'x' }}: String[1]; }}\nClass B extends A {{ f(a: HomeAddress[1]) {{ 'y' }}: String[1]; }}"
            )),
            "Qualified property conflict on class B: 'f' of type {HomeAddress[1]->String[1]} is not compatible with {Address[1]->String[1]} inherited from A"
        );
    }
}
