//! # Source Front-End
//!
//! Turns source text into a `GraphDelta`. Parsing is pure: it never sees
//! the graph, so sources can be parsed in any order and applied later in a
//! deterministic one.
//!
//! ```text
//! text ──tokenize──▶ tokens ──parse──▶ SourceUnit ──lower──▶ GraphDelta
//! ```

pub mod ast;
pub mod delta;
pub mod lexer;
mod parser;

use tracing::debug;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::model::SourceInformation;
use crate::{Error, Result};

pub use delta::{Classifier, DeltaValue, GraphDelta, Instruction, LocalId, ReferenceStub};

/// Parse a source unit into its syntax tree.
pub fn parse_source(source_id: &str, text: &str) -> Result<ast::SourceUnit> {
    let tokens = lexer::tokenize(text).map_err(|e| {
        let lines = lexer::LineIndex::new(text);
        let at = lines.position(e.span.start);
        let location = SourceInformation::new(source_id, at, at, lines.end_position(e.span));
        Error::ParseError(Diagnostic::new(DiagnosticKind::Parse, location, e.message))
    })?;
    let mut p = parser::Parser::new(source_id, text, &tokens);
    parser::parse_unit(&mut p)
}

/// Parse a source unit into graph construction instructions.
pub fn parse(source_id: &str, text: &str) -> Result<GraphDelta> {
    let unit = parse_source(source_id, text)?;
    let delta = delta::lower(&unit);
    debug!(
        source = source_id,
        elements = unit.elements.len(),
        nodes = delta.node_count(),
        stubs = delta.stubs.len(),
        "source parsed"
    );
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_error_is_located() {
        let err = parse("/x.pure", "Class A\n{\n  n: String[1] & ;\n}").unwrap_err();
        let Error::ParseError(d) = err else { panic!("expected parse error") };
        assert_eq!((d.location.line, d.location.column), (3, 16));
        assert_eq!(d.message, "Unexpected character: '&'");
    }

    #[test]
    fn test_parse_error_display() {
        let err = parse("/x.pure", "Class A {").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Parser error at (resource:/x.pure line:1 column:10), \"expected: '}' found: end of input\""
        );
    }
}
