//! Expression type and multiplicity inference.
//!
//! Inference walks the bodies of one element (function bodies, qualified
//! property bodies) and computes a `(GenericType, Multiplicity)` pair for
//! every expression node. It only reads the graph: results come back as
//! `Write`s which the compiler applies inside its transaction.

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::model::{
    FunctionType, GenericType, M3, Multiplicity, Node, NodeId, ParameterType, RawType, Reference, SourceInformation,
    Value, Values, keys, path, property_map,
};
use crate::scope::ScopeSet;
use crate::storage::GraphView;
use crate::{Error, Result};

use super::compatibility::{is_compatible, match_score};
use super::generalization::{GeneralizationCache, substitute_declared};
use super::lookup;
use super::{Bindings, common_supertype, relation};

const COL_SPEC: &str = "meta::pure::metamodel::relation::ColSpec";
const COL_SPEC_ARRAY: &str = "meta::pure::metamodel::relation::ColSpecArray";

/// An inferred type with its multiplicity.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub generic_type: GenericType,
    pub multiplicity: Multiplicity,
}

impl Typed {
    pub fn new(generic_type: GenericType, multiplicity: Multiplicity) -> Self {
        Self { generic_type, multiplicity }
    }

    fn one(m3: M3) -> Self {
        Self::new(m3.generic_type(), Multiplicity::ONE)
    }
}

/// A property write produced by inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub node: NodeId,
    pub key: &'static str,
    pub values: Values,
}

/// Everything inference learned about one element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutcome {
    pub writes: Vec<Write>,
    /// Simple function names looked up while inferring.
    pub lookups: BTreeSet<String>,
}

/// Infer every expression owned by `element`. Called functions must be
/// visible and accessible from it under `scopes`.
pub fn infer_element<G: GraphView + ?Sized>(
    g: &G,
    cache: &GeneralizationCache,
    scopes: &ScopeSet,
    element: NodeId,
) -> Result<InferenceOutcome> {
    let mut cx = Inference::new(g, cache, scopes, element);
    let Some(node) = g.node(element) else { return Ok(InferenceOutcome::default()) };
    match M3::from_id(node.classifier) {
        Some(M3::ConcreteFunctionDefinition) => cx.function_body(node)?,
        Some(M3::Class) => {
            for qp in node.node_refs(keys::QUALIFIED_PROPERTIES) {
                if let Some(qp) = g.node(qp) {
                    cx.qualified_property_body(qp)?;
                }
            }
        }
        _ => {}
    }
    trace!(%element, writes = cx.writes.len(), "element inferred");
    Ok(InferenceOutcome { writes: cx.writes, lookups: cx.lookups })
}

/// Why a candidate function was rejected.
#[derive(Debug, Clone)]
enum Mismatch {
    Type,
    Multiplicity { required: Multiplicity, found: Multiplicity },
}

/// A function signature read from the graph.
struct Signature {
    id: NodeId,
    path: String,
    parameters: Vec<(GenericType, Multiplicity)>,
    return_type: GenericType,
    return_multiplicity: Multiplicity,
}

struct Inference<'a, G: GraphView + ?Sized> {
    g: &'a G,
    cache: &'a GeneralizationCache,
    access: &'a ScopeSet,
    element: NodeId,
    scopes: Vec<HashMap<String, Typed>>,
    writes: Vec<Write>,
    lookups: BTreeSet<String>,
}

impl<'a, G: GraphView + ?Sized> Inference<'a, G> {
    fn new(g: &'a G, cache: &'a GeneralizationCache, access: &'a ScopeSet, element: NodeId) -> Self {
        Self { g, cache, access, element, scopes: Vec::new(), writes: Vec::new(), lookups: BTreeSet::new() }
    }

    fn node(&self, id: NodeId) -> Result<&'a Node> {
        self.g.node(id).ok_or_else(|| Error::NotFound(format!("Node {id}")))
    }

    fn location(&self, at: &Node) -> SourceInformation {
        at.source
            .clone()
            .or_else(|| self.g.node(self.element).and_then(|e| e.source.clone()))
            .unwrap_or_default()
    }

    fn error(&self, at: &Node, message: impl Into<String>) -> Error {
        Error::TypeInference(Diagnostic::new(DiagnosticKind::TypeInference, self.location(at), message))
    }

    fn scope_error(&self, at: &Node, message: String) -> Error {
        Error::ScopeVisibility(Diagnostic::new(DiagnosticKind::ScopeVisibility, self.location(at), message))
    }

    fn write(&mut self, node: NodeId, key: &'static str, value: impl Into<Value>) {
        self.writes.push(Write { node, key, values: property_map::one(value) });
    }

    fn compatible(&self, found: &GenericType, expected: &GenericType) -> bool {
        is_compatible(self.g, self.cache, found, expected)
    }

    fn declared(&self, node: &Node) -> Option<Typed> {
        let t = node.first(keys::GENERIC_TYPE)?.as_type()?.clone();
        let m = node.first(keys::MULTIPLICITY)?.as_multiplicity()?.clone();
        Some(Typed::new(t, m))
    }

    fn lookup_variable(&self, name: &str) -> Option<&Typed> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn bind_variable(&mut self, name: &str, typed: Typed) {
        if self.scopes.is_empty() {
            self.scopes.push(HashMap::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), typed);
        }
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    fn function_body(&mut self, function: &'a Node) -> Result<()> {
        let name = function.str_property(keys::FUNCTION_NAME).unwrap_or_default().to_string();
        self.body(function, &format!("function '{name}'"))
    }

    fn qualified_property_body(&mut self, qp: &'a Node) -> Result<()> {
        let name = qp.name.clone().unwrap_or_default();
        self.body(qp, &format!("qualified property '{name}'"))
    }

    /// Parameters in scope, expressions in order, last one against the
    /// declared return.
    fn body(&mut self, owner: &'a Node, what: &str) -> Result<()> {
        self.scopes.push(HashMap::new());
        for param in owner.node_refs(keys::PARAMETERS) {
            let param = self.node(param)?;
            if let (Some(name), Some(typed)) = (&param.name, self.declared(param)) {
                self.bind_variable(name, typed);
            }
        }
        let mut last = Typed::new(M3::Nil.generic_type(), Multiplicity::ZERO);
        let mut last_node = owner;
        for expr in owner.node_refs(keys::EXPRESSIONS) {
            last = self.infer(expr)?;
            last_node = self.node(expr)?;
        }
        self.scopes.pop();

        let expected_type = owner.first(keys::RETURN_TYPE).and_then(Value::as_type);
        let expected_mult = owner.first(keys::RETURN_MULTIPLICITY).and_then(Value::as_multiplicity);
        if let Some(expected) = expected_type {
            if !self.compatible(&last.generic_type, expected) {
                return Err(self.error(
                    last_node,
                    format!("Return type error in {what}; found: {}; expected: {expected}", last.generic_type),
                ));
            }
        }
        if let Some(expected) = expected_mult {
            if !last.multiplicity.subsumed_by(expected) {
                return Err(self.error(
                    last_node,
                    format!(
                        "Return multiplicity error in {what}; Required multiplicity: {expected}, found: {}",
                        last.multiplicity
                    ),
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn infer(&mut self, id: NodeId) -> Result<Typed> {
        let node = self.node(id)?;
        let typed = match M3::from_id(node.classifier) {
            Some(M3::InstanceValue) => self.instance_value(node)?,
            Some(M3::VariableExpression) => {
                let name = node.name.as_deref().unwrap_or_default();
                self.lookup_variable(name)
                    .cloned()
                    .ok_or_else(|| self.error(node, format!("The variable '{name}' is unknown!")))?
            }
            Some(M3::LetExpression) => {
                let value = node
                    .node_ref(keys::EXPRESSION)
                    .ok_or_else(|| self.error(node, "let without a value"))?;
                let typed = self.infer(value)?;
                let name = node.name.clone().unwrap_or_default();
                self.bind_variable(&name, typed.clone());
                typed
            }
            Some(M3::PropertyExpression) => self.property_expression(node)?,
            Some(M3::SimpleFunctionExpression) => self.call(node)?,
            Some(M3::NewExpression) => self.new_instance(node)?,
            Some(M3::LambdaFunction) => self.lambda(node, None)?,
            Some(M3::ColumnSpecification) => self.column_spec(node)?,
            _ => return Err(self.error(node, format!("Unexpected expression node: {}", node.id))),
        };
        self.write(id, keys::INFERRED_TYPE, typed.generic_type.clone());
        self.write(id, keys::INFERRED_MULTIPLICITY, typed.multiplicity.clone());
        Ok(typed)
    }

    fn instance_value(&mut self, node: &'a Node) -> Result<Typed> {
        let mut types: Vec<GenericType> = Vec::new();
        let mut multiplicity = Multiplicity::ZERO;
        for value in node.values(keys::VALUES) {
            let typed = match value {
                Value::Node(child) => self.infer(*child)?,
                Value::Ref(r) => {
                    let target = r.target.ok_or_else(|| self.error(node, format!("{} has not been defined!", r.path)))?;
                    Typed::new(self.element_type(target), Multiplicity::ONE)
                }
                literal => Typed::one(literal_type(literal)),
            };
            types.push(typed.generic_type);
            multiplicity = multiplicity.add(&typed.multiplicity);
        }
        let generic_type = types
            .iter()
            .skip(1)
            .fold(types.first().cloned(), |acc, t| acc.map(|a| common_supertype(self.g, self.cache, &a, t)))
            .unwrap_or_else(|| M3::Nil.generic_type());
        Ok(Typed::new(generic_type, multiplicity))
    }

    /// Type of a bare element reference: its classifier applied to itself
    /// (`Class<Person>`, `Enumeration<Color>`). Packages are plain `Package`.
    fn element_type(&self, target: NodeId) -> GenericType {
        let classifier = self.g.classifier_of(target).unwrap_or(M3::Any.id());
        let raw = GenericType::element(Reference::resolved(self.g.path_of(classifier), classifier));
        if classifier == M3::Package.id() {
            return raw;
        }
        raw.with_type_arguments(vec![GenericType::element(Reference::resolved(self.g.path_of(target), target))])
    }

    fn property_expression(&mut self, node: &'a Node) -> Result<Typed> {
        let name = node.str_property(keys::PROPERTY_NAME).unwrap_or_default();
        let receiver_id = node
            .node_ref(keys::RECEIVER)
            .ok_or_else(|| self.error(node, format!("Missing receiver for property '{name}'")))?;
        if let Some(enumeration) = self.enumeration_receiver(receiver_id) {
            return self.enum_value(node, receiver_id, enumeration, name);
        }
        let receiver = self.infer(receiver_id)?;
        if node.first(keys::QUALIFIED).and_then(Value::as_bool) == Some(true) {
            return self.qualified_call(node, &receiver, name);
        }
        if let RawType::Relation(rel) = &receiver.generic_type.raw {
            let column = relation::lookup(rel, name).map_err(|e| self.error(node, e.to_string()))?;
            let t = column.generic_type.clone().unwrap_or_else(|| M3::Any.generic_type());
            return Ok(Typed::new(t, receiver.multiplicity.multiply(&Multiplicity::ONE)));
        }
        let Some(found) = lookup::find_property(self.g, self.cache, &receiver.generic_type, name) else {
            return Err(self.error(
                node,
                format!("Can't find the property '{name}' in the class {}", receiver.generic_type),
            ));
        };
        let declared = self.declared(self.node(found.property)?).ok_or_else(|| {
            self.error(node, format!("The property '{name}' has no declared type"))
        })?;
        let generic_type = substitute_declared(self.g, found.declaring_id, &found.declaring, &declared.generic_type);
        self.write(node.id, keys::RESOLVED_PROPERTY, Reference::resolved(name, found.property));
        Ok(Typed::new(generic_type, receiver.multiplicity.multiply(&declared.multiplicity)))
    }

    /// `Color.RED`: a receiver that is a single reference to an enumeration.
    fn enumeration_receiver(&self, receiver: NodeId) -> Option<NodeId> {
        let node = self.g.node(receiver)?;
        if node.classifier != M3::InstanceValue.id() {
            return None;
        }
        let [Value::Ref(r)] = node.values(keys::VALUES) else { return None };
        let target = r.target?;
        (self.g.classifier_of(target) == Some(M3::Enumeration.id())).then_some(target)
    }

    fn enum_value(&mut self, node: &'a Node, receiver: NodeId, enumeration: NodeId, name: &str) -> Result<Typed> {
        let enum_node = self.node(enumeration)?;
        let value = enum_node
            .node_refs(keys::VALUES)
            .into_iter()
            .find(|v| lookup::property_name(self.g, *v) == Some(name))
            .ok_or_else(|| {
                self.error(
                    node,
                    format!("The enum value '{name}' can't be found in the enumeration {}", self.g.path_of(enumeration)),
                )
            })?;
        let receiver_type = Typed::new(self.element_type(enumeration), Multiplicity::ONE);
        self.write(receiver, keys::INFERRED_TYPE, receiver_type.generic_type);
        self.write(receiver, keys::INFERRED_MULTIPLICITY, receiver_type.multiplicity);
        self.write(node.id, keys::RESOLVED_PROPERTY, Reference::resolved(name, value));
        Ok(Typed::new(
            GenericType::element(Reference::resolved(self.g.path_of(enumeration), enumeration)),
            Multiplicity::ONE,
        ))
    }

    fn qualified_call(&mut self, node: &'a Node, receiver: &Typed, name: &str) -> Result<Typed> {
        let mut args = Vec::new();
        for arg in node.node_refs(keys::ARGUMENTS) {
            args.push(self.infer(arg)?);
        }
        for found in lookup::qualified_properties(self.g, self.cache, &receiver.generic_type, name) {
            let qp = self.node(found.property)?;
            let params: Vec<Typed> = qp
                .node_refs(keys::PARAMETERS)
                .into_iter()
                .skip(1)
                .filter_map(|p| self.g.node(p).and_then(|p| self.declared(p)))
                .collect();
            let fits = params.len() == args.len()
                && params.iter().zip(&args).all(|(p, a)| {
                    let p_type = substitute_declared(self.g, found.declaring_id, &found.declaring, &p.generic_type);
                    self.compatible(&a.generic_type, &p_type) && a.multiplicity.subsumed_by(&p.multiplicity)
                });
            if !fits {
                continue;
            }
            let return_type = qp.first(keys::RETURN_TYPE).and_then(Value::as_type).cloned();
            let return_mult = qp.first(keys::RETURN_MULTIPLICITY).and_then(Value::as_multiplicity).cloned();
            let (Some(t), Some(m)) = (return_type, return_mult) else { continue };
            self.write(node.id, keys::RESOLVED_PROPERTY, Reference::resolved(name, found.property));
            let t = substitute_declared(self.g, found.declaring_id, &found.declaring, &t);
            return Ok(Typed::new(t, receiver.multiplicity.multiply(&m)));
        }
        Err(self.error(
            node,
            format!("The system can't find a match for the qualified property: {name}({})", render_args(&args)),
        ))
    }

    // ========================================================================
    // Function application
    // ========================================================================

    fn signature(&self, function: NodeId) -> Result<Signature> {
        let node = self.node(function)?;
        let mut parameters = Vec::new();
        for p in node.node_refs(keys::PARAMETERS) {
            let p = self.node(p)?;
            let typed = self.declared(p).unwrap_or_else(|| Typed::new(M3::Any.generic_type(), Multiplicity::ZERO_MANY));
            parameters.push((typed.generic_type, typed.multiplicity));
        }
        Ok(Signature {
            id: function,
            path: self.g.path_of(function),
            parameters,
            return_type: node
                .first(keys::RETURN_TYPE)
                .and_then(Value::as_type)
                .cloned()
                .unwrap_or_else(|| M3::Any.generic_type()),
            return_multiplicity: node
                .first(keys::RETURN_MULTIPLICITY)
                .and_then(Value::as_multiplicity)
                .cloned()
                .unwrap_or(Multiplicity::ZERO_MANY),
        })
    }

    /// Score a candidate against the already inferred non-lambda arguments.
    fn score(&self, sig: &Signature, args: &[Option<Typed>], lambda_arity: &[usize]) -> std::result::Result<u32, Mismatch> {
        let mut score = 0u32;
        for (i, (pt, pm)) in sig.parameters.iter().enumerate() {
            match &args[i] {
                None => match &pt.raw {
                    RawType::Function(f) if f.parameters.len() == lambda_arity[i] => score += 1,
                    RawType::Parameter(_) => score += 1,
                    RawType::Element(_) if pt.element_id() == Some(M3::Any.id()) => score += 1,
                    _ => return Err(Mismatch::Type),
                },
                Some(arg) => {
                    let s = match_score(self.g, self.cache, &arg.generic_type, pt).ok_or(Mismatch::Type)?;
                    if !pm.is_parameter() && !arg.multiplicity.subsumed_by(pm) {
                        return Err(Mismatch::Multiplicity { required: pm.clone(), found: arg.multiplicity.clone() });
                    }
                    score += u32::from(s);
                }
            }
        }
        Ok(score)
    }

    fn call(&mut self, node: &'a Node) -> Result<Typed> {
        let name = node.str_property(keys::FUNCTION_NAME).unwrap_or_default().to_string();
        self.lookups.insert(path::simple_name(&name).to_string());
        let arg_ids = node.node_refs(keys::ARGUMENTS);
        let mut args: Vec<Option<Typed>> = Vec::with_capacity(arg_ids.len());
        let mut lambda_arity = Vec::with_capacity(arg_ids.len());
        for arg in &arg_ids {
            let arg_node = self.node(*arg)?;
            if arg_node.classifier == M3::LambdaFunction.id() {
                args.push(None);
                lambda_arity.push(arg_node.node_refs(keys::PARAMETERS).len());
            } else {
                args.push(Some(self.infer(*arg)?));
                lambda_arity.push(0);
            }
        }

        let mut candidates = Vec::new();
        let mut denied = None;
        for id in lookup::function_candidates(self.g, self.element, &name) {
            if let Err(message) = self.access.check_access(self.g, self.element, id) {
                denied.get_or_insert(message);
                continue;
            }
            let sig = self.signature(id)?;
            if sig.parameters.len() == arg_ids.len() {
                candidates.push(sig);
            }
        }
        candidates.sort_by(|a, b| a.path.cmp(&b.path));

        let mut best: Option<(u32, usize)> = None;
        let mut last_mismatch = None;
        for (i, sig) in candidates.iter().enumerate() {
            match self.score(sig, &args, &lambda_arity) {
                Ok(score) if best.is_none_or(|(b, _)| score > b) => best = Some((score, i)),
                Ok(_) => {}
                Err(m) => last_mismatch = Some(m),
            }
        }
        let Some((_, chosen)) = best else {
            if let (0, Some(message)) = (candidates.len(), denied) {
                return Err(self.scope_error(node, message));
            }
            if let (1, Some(Mismatch::Multiplicity { required, found })) = (candidates.len(), &last_mismatch) {
                return Err(self.error(node, format!("Required multiplicity: {required}, found: {found}")));
            }
            let rendered: Vec<String> = args
                .iter()
                .map(|a| match a {
                    Some(t) => format!("_:{}[{}]", t.generic_type, t.multiplicity),
                    None => "_:LambdaFunction[1]".to_string(),
                })
                .collect();
            return Err(self.error(
                node,
                format!("The system can't find a match for the function: {name}({})", rendered.join(", ")),
            ));
        };
        let sig = &candidates[chosen];

        let mut bindings = Bindings::new();
        for ((pt, pm), arg) in sig.parameters.iter().zip(&args) {
            if let Some(arg) = arg {
                bindings.unify(self.g, self.cache, pt, &arg.generic_type);
                bindings.unify_multiplicity(pm, &arg.multiplicity);
            }
        }
        for (i, ((pt, _), arg)) in sig.parameters.iter().zip(&args).enumerate() {
            if arg.is_some() {
                continue;
            }
            let expected = bindings.substitute_lenient(pt);
            let lambda_node = self.node(arg_ids[i])?;
            let typed = self.lambda(lambda_node, expected.as_function())?;
            self.write(arg_ids[i], keys::INFERRED_TYPE, typed.generic_type.clone());
            self.write(arg_ids[i], keys::INFERRED_MULTIPLICITY, typed.multiplicity.clone());
            bindings.unify(self.g, self.cache, pt, &typed.generic_type);
        }
        for (pt, _) in &sig.parameters {
            bindings
                .apply_constraints(self.g, self.cache, pt)
                .map_err(|e| self.error(node, e.to_string()))?;
        }
        let return_type = bindings.substitute(&sig.return_type).map_err(|e| self.error(node, e.to_string()))?;
        let return_multiplicity = bindings.substitute_multiplicity(&sig.return_multiplicity);
        self.write(node.id, keys::FUNC, Reference::resolved(sig.path.clone(), sig.id));
        Ok(Typed::new(return_type, return_multiplicity))
    }

    /// Infer a lambda. Untyped parameters take their types from the
    /// expected function type.
    fn lambda(&mut self, node: &'a Node, expected: Option<&FunctionType>) -> Result<Typed> {
        let mut scope = HashMap::new();
        let mut parameters = Vec::new();
        for (i, p) in node.node_refs(keys::PARAMETERS).into_iter().enumerate() {
            let param = self.node(p)?;
            let name = param.name.clone().unwrap_or_default();
            let typed = match self.declared(param) {
                Some(t) => t,
                None => match expected.and_then(|f| f.parameters.get(i)) {
                    Some(ParameterType { generic_type, multiplicity }) => {
                        let typed = Typed::new(generic_type.clone(), multiplicity.clone());
                        self.write(p, keys::INFERRED_TYPE, typed.generic_type.clone());
                        self.write(p, keys::INFERRED_MULTIPLICITY, typed.multiplicity.clone());
                        typed
                    }
                    None => {
                        return Err(self.error(param, format!("Can't infer the type of the lambda parameter '{name}'")));
                    }
                },
            };
            parameters.push(ParameterType { generic_type: typed.generic_type.clone(), multiplicity: typed.multiplicity.clone() });
            scope.insert(name, typed);
        }
        self.scopes.push(scope);
        let mut last = Typed::new(M3::Nil.generic_type(), Multiplicity::ZERO);
        let body = node.node_refs(keys::EXPRESSIONS);
        let result = (|| -> Result<()> {
            for expr in body {
                last = self.infer(expr)?;
            }
            Ok(())
        })();
        self.scopes.pop();
        result?;
        Ok(Typed::new(GenericType::function(parameters, last.generic_type, last.multiplicity), Multiplicity::ONE))
    }

    fn column_spec(&mut self, node: &'a Node) -> Result<Typed> {
        let is_array = node.first(keys::IS_ARRAY).and_then(Value::as_bool).unwrap_or(false);
        let class_path = if is_array { COL_SPEC_ARRAY } else { COL_SPEC };
        let class = self
            .g
            .element(class_path)
            .ok_or_else(|| self.error(node, format!("{class_path} has not been defined!")))?;
        let columns = node
            .first(keys::GENERIC_TYPE)
            .and_then(Value::as_type)
            .cloned()
            .unwrap_or_else(|| GenericType::relation(Vec::new()));
        let t = GenericType::element(Reference::resolved(class_path, class)).with_type_arguments(vec![columns]);
        Ok(Typed::new(t, Multiplicity::ONE))
    }

    // ========================================================================
    // Instance creation
    // ========================================================================

    fn new_instance(&mut self, node: &'a Node) -> Result<Typed> {
        let declared = node
            .first(keys::CLASS_TYPE)
            .and_then(Value::as_type)
            .cloned()
            .ok_or_else(|| self.error(node, "Missing class for new instance"))?;
        let class = declared
            .element_id()
            .ok_or_else(|| self.error(node, format!("{declared} has not been defined!")))?;
        let class_name = self.g.path_of(class);
        let class_simple = path::simple_name(&class_name).to_string();

        let params = super::generalization::type_parameters(self.g, class);
        let mult_params = super::generalization::multiplicity_parameters(self.g, class);
        let infer_arguments = declared.type_arguments.is_empty() && !params.is_empty();
        let open_self = super::generalization::self_type(self.g, class);
        let receiver = if infer_arguments { open_self.clone() } else { declared.clone() };
        let properties = lookup::all_properties(self.g, self.cache, &receiver);

        let mut bindings = Bindings::new();
        let mut provided = Vec::new();
        let mut checks: Vec<(&'a Node, Typed, Typed)> = Vec::new();
        for key_id in node.node_refs(keys::KEY_EXPRESSIONS) {
            let key_node = self.node(key_id)?;
            let key = key_node.str_property(keys::KEY).unwrap_or_default().to_string();
            let Some(found) = properties.iter().find(|p| lookup::property_name(self.g, p.property) == Some(key.as_str())) else {
                return Err(self.error(key_node, format!("The property '{key}' can't be found in the type class {class_simple}")));
            };
            let value_id = key_node
                .node_ref(keys::EXPRESSION)
                .ok_or_else(|| self.error(key_node, format!("Missing value for property '{key}'")))?;
            let value = self.infer(value_id)?;
            let prop = self
                .declared(self.node(found.property)?)
                .ok_or_else(|| self.error(key_node, format!("The property '{key}' has no declared type")))?;
            let prop_type = substitute_declared(self.g, found.declaring_id, &found.declaring, &prop.generic_type);
            if infer_arguments {
                bindings.unify(self.g, self.cache, &prop_type, &value.generic_type);
                bindings.unify_multiplicity(&prop.multiplicity, &value.multiplicity);
            }
            provided.push(key);
            checks.push((key_node, Typed::new(prop_type, prop.multiplicity), value));
        }

        for (key_node, expected, value) in &checks {
            let key = key_node.str_property(keys::KEY).unwrap_or_default();
            let expected_type = bindings.substitute_lenient(&expected.generic_type);
            let expected_mult = bindings.substitute_multiplicity(&expected.multiplicity);
            if !self.compatible(&value.generic_type, &expected_type) {
                return Err(self.error(
                    key_node,
                    format!(
                        "Type Error: '{}' not a subtype of '{expected_type}' for property '{key}' of class {class_simple}",
                        value.generic_type
                    ),
                ));
            }
            if !expected_mult.is_parameter() && !value.multiplicity.subsumed_by(&expected_mult) {
                return Err(self.error(
                    key_node,
                    format!(
                        "Multiplicity error for property '{key}' of class {class_simple}: Required multiplicity: {expected_mult}, found: {}",
                        value.multiplicity
                    ),
                ));
            }
        }

        for found in &properties {
            let prop = self.node(found.property)?;
            let name = prop.name.as_deref().unwrap_or_default();
            if provided.iter().any(|p| p == name) {
                continue;
            }
            let Some(m) = prop.first(keys::MULTIPLICITY).and_then(Value::as_multiplicity) else { continue };
            if m.bounds().is_some_and(|(lower, _)| lower > 0) {
                return Err(self.error(
                    node,
                    format!(
                        "Missing value(s) for required property '{name}' which has a multiplicity of [{m}] for type {class_simple}"
                    ),
                ));
            }
        }

        let result = if infer_arguments {
            GenericType::element(Reference::resolved(class_name, class))
                .with_type_arguments(
                    params
                        .iter()
                        .map(|p| bindings.types.get(p).cloned().unwrap_or_else(|| M3::Any.generic_type()))
                        .collect(),
                )
                .with_multiplicity_arguments(
                    mult_params
                        .iter()
                        .map(|m| bindings.multiplicities.get(m).cloned().unwrap_or(Multiplicity::ZERO_MANY))
                        .collect(),
                )
        } else {
            declared
        };
        Ok(Typed::new(result, Multiplicity::ONE))
    }
}

/// Primitive type of a literal value.
pub fn literal_type(value: &Value) -> M3 {
    match value {
        Value::Boolean(_) => M3::Boolean,
        Value::Integer(_) => M3::Integer,
        Value::Float(_) => M3::Float,
        Value::String(_) => M3::String,
        Value::Date(d) if d.has_time() => M3::DateTime,
        Value::Date(d) if d.day.is_some() => M3::StrictDate,
        Value::Date(_) => M3::Date,
        _ => M3::Any,
    }
}

fn render_args(args: &[Typed]) -> String {
    args.iter()
        .map(|t| format!("_:{}[{}]", t.generic_type, t.multiplicity))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_types() {
        assert_eq!(literal_type(&Value::Integer(1)), M3::Integer);
        assert_eq!(literal_type(&Value::String("a".into())), M3::String);
        let day = crate::model::PureDate::new(2024, Some(1), Some(2), None).unwrap();
        assert_eq!(literal_type(&Value::Date(day)), M3::StrictDate);
        assert_eq!(Typed::one(M3::Boolean).multiplicity, Multiplicity::ONE);
    }

    #[test]
    fn test_render_args() {
        let args = vec![
            Typed::one(M3::String),
            Typed::new(M3::Integer.generic_type(), Multiplicity::ZERO_MANY),
        ];
        assert_eq!(render_args(&args), "_:String[1], _:Integer[*]");
    }
}
