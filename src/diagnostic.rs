//! Located compiler diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::SourceInformation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    Parse,
    ReferentialIntegrity,
    TypeInference,
    TypeArgumentMismatch,
    DuplicateElement,
    ScopeVisibility,
}

/// A source-located error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: SourceInformation,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, location: SourceInformation, message: impl Into<String>) -> Self {
        Self { kind, location, message: message.into() }
    }

    pub fn source_id(&self) -> &str {
        &self.location.source_id
    }

    pub fn start_line(&self) -> u32 {
        self.location.start_line
    }

    pub fn start_column(&self) -> u32 {
        self.location.start_column
    }

    pub fn end_line(&self) -> u32 {
        self.location.end_line
    }

    pub fn end_column(&self) -> u32 {
        self.location.end_column
    }

    /// Total order used to pick the reported error.
    pub fn sort_key(&self) -> (&str, u32, u32, &str) {
        let (source, line, column) = self.location.sort_key();
        (source, line, column, &self.message)
    }

    pub fn into_error(self) -> crate::Error {
        use crate::Error;
        match self.kind {
            DiagnosticKind::Parse => Error::ParseError(self),
            DiagnosticKind::ReferentialIntegrity => Error::ReferentialIntegrity(self),
            DiagnosticKind::TypeInference => Error::TypeInference(self),
            DiagnosticKind::TypeArgumentMismatch => Error::TypeArgumentMismatch(self),
            DiagnosticKind::DuplicateElement => Error::DuplicateElement(self),
            DiagnosticKind::ScopeVisibility => Error::ScopeVisibility(self),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.kind {
            DiagnosticKind::Parse => "Parser",
            _ => "Compilation",
        };
        write!(f, "{phase} error at {}, \"{}\"", self.location, self.message)
    }
}

/// Sort diagnostics into reporting order.
pub fn sort(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_shape() {
        let d = Diagnostic::new(
            DiagnosticKind::ReferentialIntegrity,
            SourceInformation::new("/t.pure", (2, 1), (2, 13), (2, 40)),
            "Expected 2 properties for association 'ProdSyn', found 1",
        );
        assert_eq!(
            d.to_string(),
            "Compilation error at (resource:/t.pure line:2 column:13), \"Expected 2 properties for association 'ProdSyn', found 1\""
        );
        assert_eq!(d.start_column(), 1);
        assert_eq!(d.end_column(), 40);
    }

    #[test]
    fn test_sort_order() {
        let at = |src: &str, line, col| {
            Diagnostic::new(DiagnosticKind::TypeInference, SourceInformation::new(src, (line, col), (line, col), (line, col)), "x")
        };
        let mut ds = vec![at("/b", 1, 1), at("/a", 3, 1), at("/a", 1, 9), at("/a", 1, 2)];
        sort(&mut ds);
        let keys: Vec<_> = ds.iter().map(|d| (d.source_id().to_string(), d.location.line, d.location.column)).collect();
        assert_eq!(keys, vec![
            ("/a".to_string(), 1, 2),
            ("/a".to_string(), 1, 9),
            ("/a".to_string(), 3, 1),
            ("/b".to_string(), 1, 1),
        ]);
    }
}
