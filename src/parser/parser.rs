//! Recursive descent parser for model sources.
//!
//! Parses token streams into a `SourceUnit`. Supports:
//! - `import` sections
//! - Class (with stereotypes, type/multiplicity parameters, generalizations,
//!   properties and qualified properties), Enum, Association
//! - concrete and native functions
//! - function, relation-column and column-algebra types
//! - full expression parsing with precedence; infix operators are
//!   desugared into platform function calls

use std::collections::HashSet;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::model::{
    Column, GenericType, Multiplicity, ParameterType, PureDate, RawType, Reference, SourceInformation, TypeOperation,
    TypeOperator, Value, path,
};
use crate::{Error, Result};
use super::ast::*;
use super::lexer::{LineIndex, Span, Token, TokenKind};

/// Parser state: wraps a token slice with cursor.
pub(crate) struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    source_id: &'t str,
    lines: LineIndex<'t>,
    /// Type parameters in scope; names here parse as `RawType::Parameter`.
    type_params: Vec<String>,
}

impl<'t> Parser<'t> {
    pub(crate) fn new(source_id: &'t str, text: &'t str, tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0, source_id, lines: LineIndex::new(text), type_params: Vec::new() }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> TokenKind {
        self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)].span
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected: {} found: {}", kind.describe(), self.found())))
        }
    }

    fn found(&self) -> String {
        let tok = self.peek();
        if tok.kind == TokenKind::Eof {
            TokenKind::Eof.describe().to_string()
        } else {
            format!("'{}'", tok.text)
        }
    }

    fn error(&self, msg: String) -> Error {
        self.error_at(self.peek().span, msg)
    }

    fn error_at(&self, span: Span, msg: String) -> Error {
        let location = self.info(span, span, span);
        Error::ParseError(Diagnostic::new(DiagnosticKind::Parse, location, msg))
    }

    fn info(&self, start: Span, main: Span, end: Span) -> SourceInformation {
        SourceInformation::new(
            self.source_id,
            self.lines.position(start.start),
            self.lines.position(main.start),
            self.lines.end_position(end),
        )
    }

    /// Location spanning two already-located constructs.
    fn info_between(&self, start: &SourceInformation, main: Span, end: &SourceInformation) -> SourceInformation {
        let (line, column) = self.lines.position(main.start);
        SourceInformation {
            source_id: self.source_id.to_string(),
            start_line: start.start_line,
            start_column: start.start_column,
            line,
            column,
            end_line: end.end_line,
            end_column: end.end_column,
        }
    }

    /// Location from a span start through the last consumed token.
    fn info_to_here(&self, start: Span, main: Span) -> SourceInformation {
        self.info(start, main, self.prev_span())
    }
}

/// Parse a complete source unit from tokens.
pub(crate) fn parse_unit(p: &mut Parser) -> Result<SourceUnit> {
    let mut imports = Vec::new();
    let mut elements = Vec::new();
    loop {
        match p.peek_kind() {
            TokenKind::Eof => break,
            TokenKind::Import => imports.push(parse_import(p)?),
            TokenKind::Class => elements.push(Element::Class(parse_class(p)?)),
            TokenKind::Enum => elements.push(Element::Enumeration(parse_enum(p)?)),
            TokenKind::Association => elements.push(Element::Association(parse_association(p)?)),
            TokenKind::Function | TokenKind::Native => elements.push(Element::Function(parse_function(p)?)),
            _ => {
                return Err(p.error(format!(
                    "expected: one of 'Class', 'Enum', 'Association', 'function', 'native', 'import' found: {}",
                    p.found()
                )));
            }
        }
    }
    Ok(SourceUnit { source_id: p.source_id.to_string(), imports, elements })
}

// ============================================================================
// Elements
// ============================================================================

fn parse_import(p: &mut Parser) -> Result<Import> {
    let start = p.expect(TokenKind::Import)?.span;
    let (package, main) = parse_qualified_name(p)?;
    p.expect(TokenKind::PathSep)?;
    p.expect(TokenKind::Star)?;
    p.expect(TokenKind::Semicolon)?;
    Ok(Import { package, source: p.info_to_here(start, main) })
}

/// `a::b::C`. Returns the path and the span of its last segment. Stops
/// before a `::` that is not followed by an identifier (`a::b::*`).
fn parse_qualified_name(p: &mut Parser) -> Result<(String, Span)> {
    let first = p.expect(TokenKind::Identifier)?;
    let mut name = first.text;
    let mut last = first.span;
    while p.at(TokenKind::PathSep) && p.peek_nth_kind(1) == TokenKind::Identifier {
        p.advance();
        let seg = p.advance();
        name.push_str(path::SEPARATOR);
        name.push_str(&seg.text);
        last = seg.span;
    }
    Ok((name, last))
}

/// `<<profile.stereotype, ...>>`
fn parse_stereotypes(p: &mut Parser) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !(p.at(TokenKind::Lt) && p.peek_nth_kind(1) == TokenKind::Lt) {
        return Ok(out);
    }
    p.advance();
    p.advance();
    loop {
        let (profile, _) = parse_qualified_name(p)?;
        p.expect(TokenKind::Dot)?;
        let value = p.expect(TokenKind::Identifier)?;
        out.push(format!("{}.{}", path::simple_name(&profile), value.text));
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    p.expect(TokenKind::Gt)?;
    p.expect(TokenKind::Gt)?;
    Ok(out)
}

/// `<T, U|m>` on a class or function declaration.
fn parse_type_parameter_decl(p: &mut Parser) -> Result<(Vec<String>, Vec<String>)> {
    let mut types = Vec::new();
    let mut multiplicities = Vec::new();
    if !p.eat(TokenKind::Lt) {
        return Ok((types, multiplicities));
    }
    if !p.at(TokenKind::Pipe) {
        loop {
            types.push(p.expect(TokenKind::Identifier)?.text);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    if p.eat(TokenKind::Pipe) {
        loop {
            multiplicities.push(p.expect(TokenKind::Identifier)?.text);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::Gt)?;
    Ok((types, multiplicities))
}

fn split_path(full: &str) -> (String, String) {
    (path::package_of(full).to_string(), path::simple_name(full).to_string())
}

fn parse_class(p: &mut Parser) -> Result<ClassDef> {
    let start = p.expect(TokenKind::Class)?.span;
    let stereotypes = parse_stereotypes(p)?;
    let (full, main) = parse_qualified_name(p)?;
    let (package, name) = split_path(&full);
    let (type_parameters, multiplicity_parameters) = parse_type_parameter_decl(p)?;
    let saved = std::mem::replace(&mut p.type_params, type_parameters.clone());

    let result = (|| -> Result<_> {
        let mut generalizations = Vec::new();
        if p.eat(TokenKind::Extends) {
            loop {
                generalizations.push(parse_type(p)?);
                if !p.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        p.expect(TokenKind::LBrace)?;
        let mut properties: Vec<PropertyDef> = Vec::new();
        let mut qualified_properties: Vec<QualifiedPropertyDef> = Vec::new();
        let mut seen_properties = HashSet::new();
        let mut seen_qualified = HashSet::new();
        while !p.at(TokenKind::RBrace) {
            if p.at(TokenKind::Eof) {
                return Err(p.error(format!("expected: {} found: {}", TokenKind::RBrace.describe(), p.found())));
            }
            let member_start = p.peek().span;
            let member_stereotypes = parse_stereotypes(p)?;
            let name_tok = p.expect(TokenKind::Identifier)?;
            if p.at(TokenKind::LParen) {
                let parameters = parse_parameters(p)?;
                p.expect(TokenKind::LBrace)?;
                let body = parse_body(p)?;
                p.expect(TokenKind::Colon)?;
                let return_type = parse_type(p)?;
                let return_multiplicity = parse_multiplicity(p)?;
                p.expect(TokenKind::Semicolon)?;
                let key = (
                    name_tok.text.clone(),
                    parameters
                        .iter()
                        .map(|param| param.typed.as_ref().map(|(t, m)| format!("{t}[{m}]")).unwrap_or_default())
                        .collect::<Vec<_>>(),
                );
                if !seen_qualified.insert(key) {
                    return Err(p.error_at(
                        name_tok.span,
                        format!(
                            "Qualified property conflict on class {name}: qualified property '{}' defined more than once with the same parameters",
                            name_tok.text
                        ),
                    ));
                }
                qualified_properties.push(QualifiedPropertyDef {
                    name: name_tok.text,
                    parameters,
                    return_type,
                    return_multiplicity,
                    body,
                    source: p.info_to_here(member_start, name_tok.span),
                });
            } else {
                p.expect(TokenKind::Colon)?;
                let generic_type = parse_type(p)?;
                let multiplicity = parse_multiplicity(p)?;
                p.expect(TokenKind::Semicolon)?;
                if !seen_properties.insert(name_tok.text.clone()) {
                    return Err(p.error_at(
                        name_tok.span,
                        format!("Property conflict on class {name}: property '{}' defined more than once", name_tok.text),
                    ));
                }
                properties.push(PropertyDef {
                    name: name_tok.text,
                    stereotypes: member_stereotypes,
                    generic_type,
                    multiplicity,
                    source: p.info_to_here(member_start, name_tok.span),
                });
            }
        }
        p.expect(TokenKind::RBrace)?;
        Ok((generalizations, properties, qualified_properties))
    })();
    p.type_params = saved;
    let (generalizations, properties, qualified_properties) = result?;

    Ok(ClassDef {
        package,
        name,
        stereotypes,
        type_parameters,
        multiplicity_parameters,
        generalizations,
        properties,
        qualified_properties,
        source: p.info_to_here(start, main),
    })
}

fn parse_enum(p: &mut Parser) -> Result<EnumDef> {
    let start = p.expect(TokenKind::Enum)?.span;
    let stereotypes = parse_stereotypes(p)?;
    let (full, main) = parse_qualified_name(p)?;
    let (package, name) = split_path(&full);
    p.expect(TokenKind::LBrace)?;
    let mut values: Vec<(String, SourceInformation)> = Vec::new();
    while !p.at(TokenKind::RBrace) {
        let tok = p.expect(TokenKind::Identifier)?;
        if values.iter().any(|(v, _)| *v == tok.text) {
            return Err(p.error_at(
                tok.span,
                format!("Enumeration value '{}' is defined more than once in '{name}'", tok.text),
            ));
        }
        values.push((tok.text.clone(), p.info(tok.span, tok.span, tok.span)));
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(EnumDef { package, name, stereotypes, values, source: p.info_to_here(start, main) })
}

fn parse_association(p: &mut Parser) -> Result<AssociationDef> {
    let start = p.expect(TokenKind::Association)?.span;
    let stereotypes = parse_stereotypes(p)?;
    let (full, main) = parse_qualified_name(p)?;
    let (package, name) = split_path(&full);
    p.expect(TokenKind::LBrace)?;
    let mut properties: Vec<PropertyDef> = Vec::new();
    while !p.at(TokenKind::RBrace) {
        if p.at(TokenKind::Eof) {
            return Err(p.error(format!("expected: {} found: {}", TokenKind::RBrace.describe(), p.found())));
        }
        let member_start = p.peek().span;
        let member_stereotypes = parse_stereotypes(p)?;
        let name_tok = p.expect(TokenKind::Identifier)?;
        p.expect(TokenKind::Colon)?;
        let generic_type = parse_type(p)?;
        let multiplicity = parse_multiplicity(p)?;
        p.expect(TokenKind::Semicolon)?;
        if properties.iter().any(|prop| prop.name == name_tok.text) {
            return Err(p.error_at(
                name_tok.span,
                format!("Property conflict on association {name}: property '{}' defined more than once", name_tok.text),
            ));
        }
        properties.push(PropertyDef {
            name: name_tok.text,
            stereotypes: member_stereotypes,
            generic_type,
            multiplicity,
            source: p.info_to_here(member_start, name_tok.span),
        });
    }
    p.expect(TokenKind::RBrace)?;
    Ok(AssociationDef { package, name, stereotypes, properties, source: p.info_to_here(start, main) })
}

fn parse_function(p: &mut Parser) -> Result<FunctionDef> {
    let start = p.peek().span;
    let native = p.eat(TokenKind::Native);
    p.expect(TokenKind::Function)?;
    let stereotypes = parse_stereotypes(p)?;
    let (full, main) = parse_qualified_name(p)?;
    let (package, name) = split_path(&full);
    let (type_parameters, multiplicity_parameters) = parse_type_parameter_decl(p)?;
    let saved = std::mem::replace(&mut p.type_params, type_parameters.clone());

    let result = (|| -> Result<_> {
        let parameters = parse_parameters(p)?;
        p.expect(TokenKind::Colon)?;
        let return_type = parse_type(p)?;
        let return_multiplicity = parse_multiplicity(p)?;
        let body = if native {
            p.expect(TokenKind::Semicolon)?;
            None
        } else {
            p.expect(TokenKind::LBrace)?;
            Some(parse_body(p)?)
        };
        Ok((parameters, return_type, return_multiplicity, body))
    })();
    p.type_params = saved;
    let (parameters, return_type, return_multiplicity, body) = result?;

    Ok(FunctionDef {
        package,
        name,
        stereotypes,
        type_parameters,
        multiplicity_parameters,
        parameters,
        return_type,
        return_multiplicity,
        body,
        source: p.info_to_here(start, main),
    })
}

/// `(x: String[1], y: T[*])`
fn parse_parameters(p: &mut Parser) -> Result<Vec<ParameterDef>> {
    p.expect(TokenKind::LParen)?;
    let mut out: Vec<ParameterDef> = Vec::new();
    if !p.at(TokenKind::RParen) {
        loop {
            let tok = p.expect(TokenKind::Identifier)?;
            p.expect(TokenKind::Colon)?;
            let t = parse_type(p)?;
            let m = parse_multiplicity(p)?;
            if out.iter().any(|param| param.name == tok.text) {
                return Err(p.error_at(tok.span, format!("Parameter '{}' is defined more than once", tok.text)));
            }
            out.push(ParameterDef {
                name: tok.text,
                typed: Some((t, m)),
                source: p.info_to_here(tok.span, tok.span),
            });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RParen)?;
    Ok(out)
}

/// Expressions separated by `;` up to and including the closing `}`.
fn parse_body(p: &mut Parser) -> Result<Vec<Expr>> {
    let mut body = Vec::new();
    while !p.at(TokenKind::RBrace) {
        body.push(parse_expr(p)?);
        if !p.eat(TokenKind::Semicolon) {
            break;
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(body)
}

// ============================================================================
// Types and multiplicities
// ============================================================================

/// A type, optionally combined with column algebra (`T+Z`, `T-Z`, `Z⊆T`).
fn parse_type(p: &mut Parser) -> Result<GenericType> {
    let left = parse_type_term(p)?;
    let operator = match p.peek_kind() {
        TokenKind::Plus => TypeOperator::Add,
        TokenKind::Minus => TypeOperator::Subtract,
        TokenKind::Subset => TypeOperator::Subset,
        _ => return Ok(left),
    };
    p.advance();
    let right = parse_type_term(p)?;
    Ok(GenericType::new(RawType::Operation(Box::new(TypeOperation { left, operator, right }))))
}

fn parse_type_term(p: &mut Parser) -> Result<GenericType> {
    match p.peek_kind() {
        TokenKind::LBrace => parse_function_type(p),
        TokenKind::LParen => {
            p.advance();
            let mut columns = Vec::new();
            if !p.at(TokenKind::RParen) {
                loop {
                    let name = p.expect(TokenKind::Identifier)?.text;
                    let generic_type = if p.eat(TokenKind::Colon) { Some(parse_type(p)?) } else { None };
                    columns.push(Column { name, generic_type });
                    if !p.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            p.expect(TokenKind::RParen)?;
            Ok(GenericType::relation(columns))
        }
        TokenKind::Identifier => {
            let start = p.peek().span;
            let (full, main) = parse_qualified_name(p)?;
            let raw = if !path::is_qualified(&full) && p.type_params.contains(&full) {
                RawType::Parameter(full)
            } else {
                RawType::Element(Reference::unresolved(full, Some(p.info_to_here(start, main))))
            };
            let mut generic_type = GenericType::new(raw);
            if p.at(TokenKind::Lt) {
                let (type_arguments, multiplicity_arguments) = parse_type_arguments(p)?;
                generic_type.type_arguments = type_arguments;
                generic_type.multiplicity_arguments = multiplicity_arguments;
            }
            Ok(generic_type)
        }
        _ => Err(p.error(format!("expected: a type found: {}", p.found()))),
    }
}

/// `{A[1], B[*]->C[0..1]}`
fn parse_function_type(p: &mut Parser) -> Result<GenericType> {
    p.expect(TokenKind::LBrace)?;
    let mut parameters = Vec::new();
    if !p.at(TokenKind::Arrow) {
        loop {
            let generic_type = parse_type(p)?;
            let multiplicity = parse_multiplicity(p)?;
            parameters.push(ParameterType { generic_type, multiplicity });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::Arrow)?;
    let return_type = parse_type(p)?;
    let return_multiplicity = parse_multiplicity(p)?;
    p.expect(TokenKind::RBrace)?;
    Ok(GenericType::function(parameters, return_type, return_multiplicity))
}

/// `<A, B|m, 1>`
fn parse_type_arguments(p: &mut Parser) -> Result<(Vec<GenericType>, Vec<Multiplicity>)> {
    p.expect(TokenKind::Lt)?;
    let mut types = Vec::new();
    let mut multiplicities = Vec::new();
    if !p.at(TokenKind::Pipe) && !p.at(TokenKind::Gt) {
        loop {
            types.push(parse_type(p)?);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    if p.eat(TokenKind::Pipe) {
        loop {
            multiplicities.push(parse_multiplicity_body(p)?);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::Gt)?;
    Ok((types, multiplicities))
}

/// `[1]`, `[*]`, `[0..1]`, `[1..*]`, `[m]`
fn parse_multiplicity(p: &mut Parser) -> Result<Multiplicity> {
    p.expect(TokenKind::LBracket)?;
    let m = parse_multiplicity_body(p)?;
    p.expect(TokenKind::RBracket)?;
    Ok(m)
}

fn parse_multiplicity_body(p: &mut Parser) -> Result<Multiplicity> {
    match p.peek_kind() {
        TokenKind::Star => {
            p.advance();
            Ok(Multiplicity::ZERO_MANY)
        }
        TokenKind::Identifier => Ok(Multiplicity::Parameter(p.advance().text)),
        TokenKind::Integer => {
            let lower_tok = p.advance();
            let lower = parse_bound(p, &lower_tok)?;
            if !p.eat(TokenKind::DotDot) {
                return Ok(Multiplicity::exactly(lower));
            }
            let upper = if p.eat(TokenKind::Star) {
                None
            } else {
                let tok = p.expect(TokenKind::Integer)?;
                Some(parse_bound(p, &tok)?)
            };
            Multiplicity::range(lower, upper).ok_or_else(|| {
                p.error_at(lower_tok.span, format!("Invalid multiplicity: lower bound {lower} exceeds upper bound"))
            })
        }
        _ => Err(p.error(format!("expected: a multiplicity found: {}", p.found()))),
    }
}

fn parse_bound(p: &Parser, tok: &Token) -> Result<u64> {
    tok.text
        .parse::<u64>()
        .map_err(|_| p.error_at(tok.span, format!("Invalid multiplicity bound: {}", tok.text)))
}

// ============================================================================
// Expressions
// ============================================================================

/// Entry point for expression parsing (lowest precedence).
pub(crate) fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or(p)
}

fn binary(p: &Parser, function: &str, op: Span, left: Expr, right: Expr) -> Expr {
    let source = p.info_between(&left.source, op, &right.source);
    Expr { kind: ExprKind::Call { function: function.to_string(), arguments: vec![left, right] }, source }
}

fn parse_or(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(p)?;
    while p.at(TokenKind::OrOr) {
        let op = p.advance().span;
        let right = parse_and(p)?;
        left = binary(p, "or", op, left, right);
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_equality(p)?;
    while p.at(TokenKind::AndAnd) {
        let op = p.advance().span;
        let right = parse_equality(p)?;
        left = binary(p, "and", op, left, right);
    }
    Ok(left)
}

fn parse_equality(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_comparison(p)?;
    loop {
        match p.peek_kind() {
            TokenKind::Eq => {
                let op = p.advance().span;
                let right = parse_comparison(p)?;
                left = binary(p, "equal", op, left, right);
            }
            TokenKind::Neq => {
                let op = p.advance().span;
                let right = parse_comparison(p)?;
                let equal = binary(p, "equal", op, left, right);
                let source = equal.source.clone();
                left = Expr { kind: ExprKind::Call { function: "not".into(), arguments: vec![equal] }, source };
            }
            _ => return Ok(left),
        }
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_additive(p)?;
    loop {
        let function = match p.peek_kind() {
            TokenKind::Lt => "lessThan",
            TokenKind::Lte => "lessThanEqual",
            TokenKind::Gt => "greaterThan",
            TokenKind::Gte => "greaterThanEqual",
            _ => return Ok(left),
        };
        let op = p.advance().span;
        let right = parse_additive(p)?;
        left = binary(p, function, op, left, right);
    }
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let function = match p.peek_kind() {
            TokenKind::Plus => "plus",
            TokenKind::Minus => "minus",
            _ => return Ok(left),
        };
        let op = p.advance().span;
        let right = parse_multiplicative(p)?;
        left = binary(p, function, op, left, right);
    }
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(p)?;
    loop {
        let function = match p.peek_kind() {
            TokenKind::Star => "times",
            TokenKind::Slash => "divide",
            _ => return Ok(left),
        };
        let op = p.advance().span;
        let right = parse_unary(p)?;
        left = binary(p, function, op, left, right);
    }
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Not => {
            let op = p.advance().span;
            let operand = parse_unary(p)?;
            let source = p.info_between(&p.info(op, op, op), op, &operand.source);
            Ok(Expr { kind: ExprKind::Call { function: "not".into(), arguments: vec![operand] }, source })
        }
        TokenKind::Minus => {
            let op = p.advance().span;
            match p.peek_kind() {
                TokenKind::Integer => {
                    let tok = p.advance();
                    let value = format!("-{}", tok.text)
                        .parse::<i64>()
                        .map_err(|_| p.error_at(tok.span, format!("Integer literal out of range: -{}", tok.text)))?;
                    Ok(Expr { kind: ExprKind::Literal(Value::Integer(value)), source: p.info(op, op, tok.span) })
                }
                TokenKind::Float => {
                    let tok = p.advance();
                    let value = parse_float(p, &tok)?;
                    Ok(Expr { kind: ExprKind::Literal(Value::Float(-value)), source: p.info(op, op, tok.span) })
                }
                _ => {
                    let operand = parse_unary(p)?;
                    let source = p.info_between(&p.info(op, op, op), op, &operand.source);
                    Ok(Expr { kind: ExprKind::Call { function: "minus".into(), arguments: vec![operand] }, source })
                }
            }
        }
        _ => parse_postfix(p),
    }
}

/// `.property`, `.qualified(args)` and `->function(args)` chains.
fn parse_postfix(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;
    loop {
        match p.peek_kind() {
            TokenKind::Dot => {
                p.advance();
                let name = p.expect(TokenKind::Identifier)?;
                let arguments = if p.at(TokenKind::LParen) { Some(parse_arguments(p)?) } else { None };
                let source = p.info_between(&expr.source, name.span, &p.info(p.prev_span(), p.prev_span(), p.prev_span()));
                expr = Expr {
                    kind: ExprKind::Property { receiver: Box::new(expr), name: name.text, arguments },
                    source,
                };
            }
            TokenKind::Arrow => {
                p.advance();
                let (function, main) = parse_qualified_name(p)?;
                let mut arguments = vec![expr];
                arguments.extend(parse_arguments(p)?);
                let end = p.info(p.prev_span(), p.prev_span(), p.prev_span());
                let source = p.info_between(&arguments[0].source, main, &end);
                expr = Expr { kind: ExprKind::Call { function, arguments }, source };
            }
            _ => return Ok(expr),
        }
    }
}

/// `(a, b, c)`
fn parse_arguments(p: &mut Parser) -> Result<Vec<Expr>> {
    p.expect(TokenKind::LParen)?;
    let mut args = Vec::new();
    if !p.at(TokenKind::RParen) {
        loop {
            args.push(parse_expr(p)?);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RParen)?;
    Ok(args)
}

fn parse_float(p: &Parser, tok: &Token) -> Result<f64> {
    match tok.text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(p.error_at(tok.span, format!("Invalid float literal: {}", tok.text))),
    }
}

/// `2024`, `2024-03`, `2024-03-15`, `2024-03-15T10:30:00.250`
fn parse_date(p: &Parser, tok: &Token) -> Result<PureDate> {
    let invalid = |detail: String| p.error_at(tok.span, format!("Invalid date literal '%{}': {detail}", tok.text));
    let (date_part, time_part) = match tok.text.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (tok.text.as_str(), None),
    };
    let mut fields = date_part.split('-');
    let number = |s: Option<&str>, what: &str| -> std::result::Result<Option<u32>, String> {
        match s {
            None => Ok(None),
            Some(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse::<u32>().map(Some).map_err(|_| format!("invalid {what}: {s}"))
            }
            Some(s) => Err(format!("invalid {what}: {s}")),
        }
    };
    let year = number(fields.next(), "year").map_err(&invalid)?.ok_or_else(|| invalid("missing year".into()))?;
    let month = number(fields.next(), "month").map_err(&invalid)?;
    let day = number(fields.next(), "day").map_err(&invalid)?;
    if fields.next().is_some() {
        return Err(invalid("too many date components".into()));
    }
    let time = match time_part {
        None => None,
        Some(t) => {
            if day.is_none() {
                return Err(invalid("a time requires a full date".into()));
            }
            let (hms, millis) = match t.split_once('.') {
                Some((hms, frac)) => {
                    let millis = format!("{:0<3}", &frac[..frac.len().min(3)]);
                    (hms, number(Some(&millis), "fraction").map_err(&invalid)?.unwrap_or(0))
                }
                None => (t, 0),
            };
            let mut parts = hms.split(':');
            let hour = number(parts.next(), "hour").map_err(&invalid)?.unwrap_or(0);
            let minute = number(parts.next(), "minute").map_err(&invalid)?.unwrap_or(0);
            let second = number(parts.next(), "second").map_err(&invalid)?.unwrap_or(0);
            Some((hour, minute, second, millis))
        }
    };
    let year = i32::try_from(year).map_err(|_| invalid(format!("invalid year: {year}")))?;
    PureDate::new(year, month, day, time).map_err(invalid)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    let tok = p.peek().clone();
    let literal = |p: &Parser, value: Value| Expr { kind: ExprKind::Literal(value), source: p.info(tok.span, tok.span, tok.span) };
    match tok.kind {
        TokenKind::Integer => {
            p.advance();
            let value = tok
                .text
                .parse::<i64>()
                .map_err(|_| p.error_at(tok.span, format!("Integer literal out of range: {}", tok.text)))?;
            Ok(literal(p, Value::Integer(value)))
        }
        TokenKind::Float => {
            p.advance();
            let value = parse_float(p, &tok)?;
            Ok(literal(p, Value::Float(value)))
        }
        TokenKind::StringLiteral => {
            p.advance();
            Ok(literal(p, Value::String(tok.text.clone())))
        }
        TokenKind::True | TokenKind::False => {
            p.advance();
            Ok(literal(p, Value::Boolean(tok.kind == TokenKind::True)))
        }
        TokenKind::Date => {
            p.advance();
            let date = parse_date(p, &tok)?;
            Ok(literal(p, Value::Date(date)))
        }
        TokenKind::Variable => {
            p.advance();
            Ok(Expr { kind: ExprKind::Variable(tok.text.clone()), source: p.info(tok.span, tok.span, tok.span) })
        }
        TokenKind::LBracket => {
            p.advance();
            let mut values = Vec::new();
            if !p.at(TokenKind::RBracket) {
                loop {
                    values.push(parse_expr(p)?);
                    if !p.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr { kind: ExprKind::Collection(values), source: p.info_to_here(tok.span, tok.span) })
        }
        TokenKind::LParen => {
            p.advance();
            let inner = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(inner)
        }
        TokenKind::Let => {
            p.advance();
            let name = p.expect(TokenKind::Identifier)?;
            p.expect(TokenKind::Assign)?;
            let value = parse_expr(p)?;
            let source = p.info_between(&p.info(tok.span, tok.span, tok.span), name.span, &value.source);
            Ok(Expr { kind: ExprKind::Let { name: name.text, value: Box::new(value) }, source })
        }
        TokenKind::Caret => parse_new(p),
        TokenKind::LBrace => parse_lambda(p),
        TokenKind::Pipe => {
            p.advance();
            let body = parse_expr(p)?;
            let source = p.info_between(&p.info(tok.span, tok.span, tok.span), tok.span, &body.source);
            Ok(Expr { kind: ExprKind::Lambda { parameters: Vec::new(), body: vec![body] }, source })
        }
        TokenKind::Tilde => parse_column_spec(p),
        TokenKind::Identifier if p.peek_nth_kind(1) == TokenKind::Pipe => {
            p.advance();
            p.advance();
            let parameter = ParameterDef { name: tok.text.clone(), typed: None, source: p.info(tok.span, tok.span, tok.span) };
            let body = parse_expr(p)?;
            let source = p.info_between(&parameter.source, tok.span, &body.source);
            Ok(Expr { kind: ExprKind::Lambda { parameters: vec![parameter], body: vec![body] }, source })
        }
        TokenKind::Identifier => {
            let (full, main) = parse_qualified_name(p)?;
            if p.at(TokenKind::LParen) {
                let arguments = parse_arguments(p)?;
                Ok(Expr { kind: ExprKind::Call { function: full, arguments }, source: p.info_to_here(tok.span, main) })
            } else {
                Ok(Expr { kind: ExprKind::ElementRef(full), source: p.info_to_here(tok.span, main) })
            }
        }
        _ => Err(p.error(format!("expected: an expression found: {}", p.found()))),
    }
}

/// `^a::Person(name = 'x', age = 3)`
fn parse_new(p: &mut Parser) -> Result<Expr> {
    let start = p.expect(TokenKind::Caret)?.span;
    let main = p.peek().span;
    let class = parse_type_term(p)?;
    p.expect(TokenKind::LParen)?;
    let mut keys: Vec<KeyValue> = Vec::new();
    if !p.at(TokenKind::RParen) {
        loop {
            let key = p.expect(TokenKind::Identifier)?;
            p.expect(TokenKind::Assign)?;
            let value = parse_expr(p)?;
            if keys.iter().any(|k| k.key == key.text) {
                return Err(p.error_at(key.span, format!("The key '{}' is set more than once", key.text)));
            }
            let source = p.info_between(&p.info(key.span, key.span, key.span), key.span, &value.source);
            keys.push(KeyValue { key: key.text, value, source });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RParen)?;
    Ok(Expr { kind: ExprKind::New { class, keys }, source: p.info_to_here(start, main) })
}

/// `{x: String[1], y | body; body}` or `{| body}`
fn parse_lambda(p: &mut Parser) -> Result<Expr> {
    let start = p.expect(TokenKind::LBrace)?.span;
    let mut parameters: Vec<ParameterDef> = Vec::new();
    if !p.at(TokenKind::Pipe) {
        loop {
            let tok = p.expect(TokenKind::Identifier)?;
            let typed = if p.eat(TokenKind::Colon) {
                let t = parse_type(p)?;
                let m = parse_multiplicity(p)?;
                Some((t, m))
            } else {
                None
            };
            parameters.push(ParameterDef { name: tok.text, typed, source: p.info_to_here(tok.span, tok.span) });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::Pipe)?;
    let body = parse_body(p)?;
    Ok(Expr { kind: ExprKind::Lambda { parameters, body }, source: p.info_to_here(start, start) })
}

/// `~a`, `~a:String`, `~[a, b:Integer]`
fn parse_column_spec(p: &mut Parser) -> Result<Expr> {
    let start = p.expect(TokenKind::Tilde)?.span;
    let column = |p: &mut Parser| -> Result<(String, Option<GenericType>)> {
        let name = p.expect(TokenKind::Identifier)?.text;
        let t = if p.eat(TokenKind::Colon) { Some(parse_type(p)?) } else { None };
        Ok((name, t))
    };
    if p.eat(TokenKind::LBracket) {
        let mut columns: Vec<(String, Option<GenericType>)> = Vec::new();
        if !p.at(TokenKind::RBracket) {
            loop {
                let col_span = p.peek().span;
                let col = column(p)?;
                if columns.iter().any(|(n, _)| *n == col.0) {
                    return Err(p.error_at(col_span, format!("The relation contains duplicates: [{}]", col.0)));
                }
                columns.push(col);
                if !p.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        p.expect(TokenKind::RBracket)?;
        Ok(Expr { kind: ExprKind::ColumnSpec { columns, is_array: true }, source: p.info_to_here(start, start) })
    } else {
        let col = column(p)?;
        Ok(Expr { kind: ExprKind::ColumnSpec { columns: vec![col], is_array: false }, source: p.info_to_here(start, start) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Result<SourceUnit> {
        let tokens = tokenize(text).unwrap();
        let mut p = Parser::new("/test.pure", text, &tokens);
        parse_unit(&mut p)
    }

    fn parse_err(text: &str) -> Diagnostic {
        match parse(text) {
            Err(Error::ParseError(d)) => d,
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    fn body_of(text: &str) -> Vec<Expr> {
        let unit = parse(text).unwrap();
        match &unit.elements[0] {
            Element::Function(f) => f.body.clone().unwrap(),
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn test_class_with_everything() {
        let unit = parse(
            "import x::y::*;\n\
             Class <<access.private>> a::b::Box<T|m> extends Base<T>\n\
             {\n\
               value: T[m];\n\
               tags: String[*];\n\
               show(prefix: String[1]) { $prefix + 'x' }: String[1];\n\
             }",
        )
        .unwrap();
        assert_eq!(unit.imports[0].package, "x::y");
        let Element::Class(class) = &unit.elements[0] else { panic!() };
        assert_eq!(class.package, "a::b");
        assert_eq!(class.name, "Box");
        assert_eq!(class.stereotypes, vec!["access.private".to_string()]);
        assert_eq!(class.type_parameters, vec!["T".to_string()]);
        assert_eq!(class.multiplicity_parameters, vec!["m".to_string()]);
        assert_eq!(class.generalizations[0].to_string(), "Base<T>");
        assert_eq!(class.properties[0].generic_type.as_parameter(), Some("T"));
        assert_eq!(class.properties[0].multiplicity, Multiplicity::Parameter("m".into()));
        assert_eq!(class.properties[1].multiplicity, Multiplicity::ZERO_MANY);
        assert_eq!(class.qualified_properties[0].name, "show");
        assert_eq!((class.source.line, class.source.column), (2, 32));
    }

    #[test]
    fn test_function_signature_id() {
        let unit = parse("function a::f(s: String[1], i: Integer[*]): Boolean[1] { true }").unwrap();
        let Element::Function(f) = &unit.elements[0] else { panic!() };
        assert_eq!(f.signature_id(), "f_String_1__Integer_MANY__Boolean_1_");
        let unit = parse("native function g(): String[0..1];").unwrap();
        let Element::Function(g) = &unit.elements[0] else { panic!() };
        assert!(g.body.is_none());
        assert_eq!(g.signature_id(), "g__String_$0_1$_");
    }

    #[test]
    fn test_function_and_relation_types() {
        let unit = parse(
            "native function r<T,Z>(rel: Relation<T>[1], cols: ColSpecArray<Z⊆T>[1], f: {T[1]->Boolean[1]}[1]): Relation<T-Z>[1];",
        )
        .unwrap();
        let Element::Function(f) = &unit.elements[0] else { panic!() };
        let types: Vec<String> = f.parameters.iter().map(|p| p.typed.as_ref().unwrap().0.to_string()).collect();
        assert_eq!(types, vec!["Relation<T>", "ColSpecArray<Z⊆T>", "{T[1]->Boolean[1]}"]);
        assert_eq!(f.return_type.to_string(), "Relation<T-Z>");
        let unit = parse("function q(r: Relation<(a:Integer, b:String)>[1]): Any[*] { $r }").unwrap();
        let Element::Function(q) = &unit.elements[0] else { panic!() };
        assert_eq!(q.parameters[0].typed.as_ref().unwrap().0.to_string(), "Relation<(a:Integer, b:String)>");
    }

    #[test]
    fn test_infix_desugaring_and_precedence() {
        let body = body_of("function f(): Boolean[1] { 1 + 2 * 3 > 4 && !false }");
        let ExprKind::Call { function, arguments } = &body[0].kind else { panic!() };
        assert_eq!(function, "and");
        let ExprKind::Call { function: gt, arguments: gt_args } = &arguments[0].kind else { panic!() };
        assert_eq!(gt, "greaterThan");
        let ExprKind::Call { function: plus, arguments: plus_args } = &gt_args[0].kind else { panic!() };
        assert_eq!(plus, "plus");
        assert!(matches!(&plus_args[1].kind, ExprKind::Call { function, .. } if function == "times"));
        assert!(matches!(&arguments[1].kind, ExprKind::Call { function, .. } if function == "not"));
    }

    #[test]
    fn test_arrow_property_and_lambda() {
        let body = body_of("function f(xs: Person[*]): String[*] { $xs->filter(p|$p.age > 3)->map({p: Person[1]| $p.name}) }");
        let ExprKind::Call { function, arguments } = &body[0].kind else { panic!() };
        assert_eq!(function, "map");
        assert!(matches!(&arguments[0].kind, ExprKind::Call { function, .. } if function == "filter"));
        let ExprKind::Lambda { parameters, body } = &arguments[1].kind else { panic!() };
        assert_eq!(parameters[0].name, "p");
        assert!(parameters[0].typed.is_some());
        assert!(matches!(&body[0].kind, ExprKind::Property { name, .. } if name == "name"));
    }

    #[test]
    fn test_new_let_enum_and_columns() {
        let body = body_of(
            "function f(): Any[*] { let x = ^a::Person(name = 'n', age = 3); Color.RED; ~[a, b:String]; ~c; %2024-02-29; [1, 2] }",
        );
        assert!(matches!(&body[0].kind, ExprKind::Let { name, .. } if name == "x"));
        let ExprKind::Property { receiver, name, .. } = &body[1].kind else { panic!() };
        assert_eq!(name, "RED");
        assert!(matches!(&receiver.kind, ExprKind::ElementRef(p) if p == "Color"));
        assert!(matches!(&body[2].kind, ExprKind::ColumnSpec { columns, is_array: true } if columns.len() == 2));
        assert!(matches!(&body[3].kind, ExprKind::ColumnSpec { is_array: false, .. }));
        assert!(matches!(&body[4].kind, ExprKind::Literal(Value::Date(_))));
        assert!(matches!(&body[5].kind, ExprKind::Collection(v) if v.len() == 2));
    }

    #[test]
    fn test_duplicate_property_is_parse_error() {
        let d = parse_err("Class A\n{\n  name: String[1];\n  name: Integer[1];\n}");
        assert_eq!(d.message, "Property conflict on class A: property 'name' defined more than once");
        assert_eq!((d.location.line, d.location.column), (4, 3));
    }

    #[test]
    fn test_unterminated_block() {
        let d = parse_err("Class A\n{\n  name: String[1];\n");
        assert!(d.message.contains("found: end of input"), "{}", d.message);
    }

    #[test]
    fn test_invalid_literals() {
        assert!(parse_err("function f(): Any[1] { %2024-13-01 }").message.contains("invalid month: 13"));
        assert!(parse_err("function f(): Any[1] { 99999999999999999999 }").message.contains("out of range"));
        assert!(parse_err("function f(): Any[1] { 1.5e }").message.contains("Invalid float literal"));
        assert!(parse_err("Class A { p: String[3..1]; }").message.contains("Invalid multiplicity"));
    }

    #[test]
    fn test_expression_locations() {
        let body = body_of("function f(): Any[*]\n{\n  $x->size()\n}");
        assert_eq!((body[0].source.line, body[0].source.column), (3, 7));
        assert_eq!((body[0].source.start_line, body[0].source.start_column), (3, 3));
        assert_eq!((body[0].source.end_line, body[0].source.end_column), (3, 12));
    }
}
