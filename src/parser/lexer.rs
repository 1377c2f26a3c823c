//! Lexer: tokenizes model source text.

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Byte span in the source text, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Class, Enum, Association, Function, Native, Import, Extends, Let, True, False,

    // Literals
    Integer, Float, StringLiteral, Date,

    // Identifiers and variables
    Identifier, Variable,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, Comma, Colon, Semicolon, Pipe, Star,
    PathSep,    // ::
    Arrow,      // ->
    DotDot,     // ..
    Tilde,      // ~
    Caret,      // ^
    Subset,     // ⊆

    // Operators
    Assign, Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Minus, Slash, Not, AndAnd, OrOr,

    Eof,
}

impl TokenKind {
    /// Rendering used in "expected X" messages.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Class => "'Class'",
            TokenKind::Enum => "'Enum'",
            TokenKind::Association => "'Association'",
            TokenKind::Function => "'function'",
            TokenKind::Native => "'native'",
            TokenKind::Import => "'import'",
            TokenKind::Extends => "'extends'",
            TokenKind::Let => "'let'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Integer => "integer",
            TokenKind::Float => "float",
            TokenKind::StringLiteral => "string",
            TokenKind::Date => "date",
            TokenKind::Identifier => "identifier",
            TokenKind::Variable => "variable",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Dot => "'.'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Pipe => "'|'",
            TokenKind::Star => "'*'",
            TokenKind::PathSep => "'::'",
            TokenKind::Arrow => "'->'",
            TokenKind::DotDot => "'..'",
            TokenKind::Tilde => "'~'",
            TokenKind::Caret => "'^'",
            TokenKind::Subset => "'⊆'",
            TokenKind::Assign => "'='",
            TokenKind::Eq => "'=='",
            TokenKind::Neq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Lte => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Gte => "'>='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Slash => "'/'",
            TokenKind::Not => "'!'",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::Eof => "end of input",
        }
    }
}

/// A lexical error at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Tokenize source text.
pub fn tokenize(input: &str) -> std::result::Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => { chars.next(); }

            // Block comments /* ... */
            '/' if matches!(chars.clone().nth(1), Some((_, '*'))) => {
                chars.next();
                chars.next();
                loop {
                    match chars.next() {
                        Some((_, '*')) => {
                            if matches!(chars.peek(), Some(&(_, '/'))) {
                                chars.next();
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            return Err(LexError {
                                span: Span { start: pos, end: pos + 2 },
                                message: "Unterminated block comment".into(),
                            });
                        }
                    }
                }
            }

            // Line comments
            '/' if matches!(chars.clone().nth(1), Some((_, '/'))) => {
                while chars.peek().is_some_and(|&(_, c)| c != '\n') {
                    chars.next();
                }
            }

            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, c)) => s.push(c),
                            None => {
                                return Err(LexError {
                                    span: Span { start: pos, end: pos + 1 },
                                    message: "Unterminated string literal".into(),
                                });
                            }
                        },
                        Some((end, '\'')) => {
                            tokens.push(Token {
                                kind: TokenKind::StringLiteral,
                                span: Span { start: pos, end: end + 1 },
                                text: s,
                            });
                            break;
                        }
                        Some((_, c)) => s.push(c),
                        None => {
                            return Err(LexError {
                                span: Span { start: pos, end: pos + 1 },
                                message: "Unterminated string literal".into(),
                            });
                        }
                    }
                }
            }

            // Numbers: 12, 1.5, 2.5e10. `1..2` lexes as 1, .., 2.
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                let mut is_float = false;
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else if c == '.' && !is_float && matches!(chars.clone().nth(1), Some((_, d)) if d.is_ascii_digit()) {
                        is_float = true;
                        num.push(c);
                        chars.next();
                    } else if (c == 'e' || c == 'E') && is_float {
                        num.push(c);
                        chars.next();
                        if let Some(&(_, sign)) = chars.peek() {
                            if sign == '+' || sign == '-' {
                                num.push(sign);
                                chars.next();
                            }
                        }
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: if is_float { TokenKind::Float } else { TokenKind::Integer },
                    span: Span { start: pos, end: pos + num.len() },
                    text: num,
                });
            }

            // Dates: %2024-01-15T10:30:00
            '%' => {
                chars.next();
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '-' | 'T' | ':' | '.') {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if text.is_empty() {
                    return Err(LexError {
                        span: Span { start: pos, end: pos + 1 },
                        message: "Expected a date after '%'".into(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Date,
                    span: Span { start: pos, end: pos + 1 + text.len() },
                    text,
                });
            }

            '$' => {
                chars.next();
                let name = take_ident(&mut chars);
                if name.is_empty() {
                    return Err(LexError {
                        span: Span { start: pos, end: pos + 1 },
                        message: "Expected a variable name after '$'".into(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Variable,
                    span: Span { start: pos, end: pos + 1 + name.len() },
                    text: name,
                });
            }

            c if c.is_alphabetic() || c == '_' => {
                let ident = take_ident(&mut chars);
                tokens.push(Token {
                    kind: keyword_or_ident(&ident),
                    span: Span { start: pos, end: pos + ident.len() },
                    text: ident,
                });
            }

            '(' => { chars.next(); tokens.push(punct(TokenKind::LParen, pos, "(")); }
            ')' => { chars.next(); tokens.push(punct(TokenKind::RParen, pos, ")")); }
            '[' => { chars.next(); tokens.push(punct(TokenKind::LBracket, pos, "[")); }
            ']' => { chars.next(); tokens.push(punct(TokenKind::RBracket, pos, "]")); }
            '{' => { chars.next(); tokens.push(punct(TokenKind::LBrace, pos, "{")); }
            '}' => { chars.next(); tokens.push(punct(TokenKind::RBrace, pos, "}")); }
            ',' => { chars.next(); tokens.push(punct(TokenKind::Comma, pos, ",")); }
            ';' => { chars.next(); tokens.push(punct(TokenKind::Semicolon, pos, ";")); }
            '*' => { chars.next(); tokens.push(punct(TokenKind::Star, pos, "*")); }
            '~' => { chars.next(); tokens.push(punct(TokenKind::Tilde, pos, "~")); }
            '^' => { chars.next(); tokens.push(punct(TokenKind::Caret, pos, "^")); }
            '+' => { chars.next(); tokens.push(punct(TokenKind::Plus, pos, "+")); }
            '/' => { chars.next(); tokens.push(punct(TokenKind::Slash, pos, "/")); }
            '⊆' => { chars.next(); tokens.push(punct(TokenKind::Subset, pos, "⊆")); }
            ':' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, ':'))) {
                    chars.next();
                    tokens.push(punct(TokenKind::PathSep, pos, "::"));
                } else {
                    tokens.push(punct(TokenKind::Colon, pos, ":"));
                }
            }
            '.' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '.'))) {
                    chars.next();
                    tokens.push(punct(TokenKind::DotDot, pos, ".."));
                } else {
                    tokens.push(punct(TokenKind::Dot, pos, "."));
                }
            }
            '-' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '>'))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Arrow, pos, "->"));
                } else {
                    tokens.push(punct(TokenKind::Minus, pos, "-"));
                }
            }
            '=' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Eq, pos, "=="));
                } else {
                    tokens.push(punct(TokenKind::Assign, pos, "="));
                }
            }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Neq, pos, "!="));
                } else {
                    tokens.push(punct(TokenKind::Not, pos, "!"));
                }
            }
            '<' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Lte, pos, "<="));
                } else {
                    tokens.push(punct(TokenKind::Lt, pos, "<"));
                }
            }
            '>' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Gte, pos, ">="));
                } else {
                    tokens.push(punct(TokenKind::Gt, pos, ">"));
                }
            }
            '|' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '|'))) {
                    chars.next();
                    tokens.push(punct(TokenKind::OrOr, pos, "||"));
                } else {
                    tokens.push(punct(TokenKind::Pipe, pos, "|"));
                }
            }
            '&' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '&'))) {
                    chars.next();
                    tokens.push(punct(TokenKind::AndAnd, pos, "&&"));
                } else {
                    return Err(LexError {
                        span: Span { start: pos, end: pos + 1 },
                        message: "Unexpected character: '&'".into(),
                    });
                }
            }

            other => {
                return Err(LexError {
                    span: Span { start: pos, end: pos + other.len_utf8() },
                    message: format!("Unexpected character: '{other}'"),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: input.len(), end: input.len() },
        text: String::new(),
    });

    Ok(tokens)
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

fn punct(kind: TokenKind, pos: usize, text: &str) -> Token {
    Token {
        kind,
        span: Span { start: pos, end: pos + text.len() },
        text: text.to_string(),
    }
}

fn keyword_or_ident(s: &str) -> TokenKind {
    match s {
        "Class" => TokenKind::Class,
        "Enum" => TokenKind::Enum,
        "Association" => TokenKind::Association,
        "function" => TokenKind::Function,
        "native" => TokenKind::Native,
        "import" => TokenKind::Import,
        "extends" => TokenKind::Extends,
        "let" => TokenKind::Let,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => TokenKind::Identifier,
    }
}

// ============================================================================
// Line index
// ============================================================================

/// Maps byte offsets to 1-based (line, column) pairs. Columns count chars.
#[derive(Debug, Clone)]
pub struct LineIndex<'s> {
    text: &'s str,
    line_starts: Vec<usize>,
}

impl<'s> LineIndex<'s> {
    pub fn new(text: &'s str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { text, line_starts }
    }

    /// Position of the char starting at byte `offset`.
    pub fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.text.len());
        let line = self.line_starts.partition_point(|&s| s <= offset).saturating_sub(1);
        let start = self.line_starts[line];
        let column = self.text.get(start..offset).map_or(offset - start, |s| s.chars().count());
        (line as u32 + 1, column as u32 + 1)
    }

    /// Position of the last char of a span (inclusive end).
    pub fn end_position(&self, span: Span) -> (u32, u32) {
        if span.end <= span.start {
            return self.position(span.start);
        }
        let last = self
            .text
            .get(span.start..span.end)
            .and_then(|s| s.char_indices().last())
            .map_or(span.start, |(i, _)| span.start + i);
        self.position(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_class_header() {
        assert_eq!(kinds("Class a::B<T> extends C"), vec![
            TokenKind::Class,
            TokenKind::Identifier,
            TokenKind::PathSep,
            TokenKind::Identifier,
            TokenKind::Lt,
            TokenKind::Identifier,
            TokenKind::Gt,
            TokenKind::Extends,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_multiplicity_range_is_not_a_float() {
        assert_eq!(kinds("[0..1]"), vec![
            TokenKind::LBracket,
            TokenKind::Integer,
            TokenKind::DotDot,
            TokenKind::Integer,
            TokenKind::RBracket,
            TokenKind::Eof,
        ]);
        let tokens = tokenize("1.5e3").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Float);
        assert_eq!(tokens[0].text, "1.5e3");
    }

    #[test]
    fn test_operators() {
        assert_eq!(kinds("$x->f() || !$y && $a != 1"), vec![
            TokenKind::Variable,
            TokenKind::Arrow,
            TokenKind::Identifier,
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::OrOr,
            TokenKind::Not,
            TokenKind::Variable,
            TokenKind::AndAnd,
            TokenKind::Variable,
            TokenKind::Neq,
            TokenKind::Integer,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_string_and_date() {
        let tokens = tokenize("'it\\'s' %2024-03-05").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[1].kind, TokenKind::Date);
        assert_eq!(tokens[1].text, "2024-03-05");
    }

    #[test]
    fn test_unterminated() {
        assert!(tokenize("'abc").is_err());
        assert!(tokenize("/* abc").is_err());
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(kinds("// line\n/* block\n */ Enum"), vec![TokenKind::Enum, TokenKind::Eof]);
    }

    #[test]
    fn test_line_index() {
        let text = "Class A\n{\n  p: String[1];\n}";
        let index = LineIndex::new(text);
        assert_eq!(index.position(0), (1, 1));
        assert_eq!(index.position(6), (1, 7));
        assert_eq!(index.position(text.find('p').unwrap()), (3, 3));
        assert_eq!(index.end_position(Span { start: 0, end: 5 }), (1, 5));
        assert_eq!(index.end_position(Span { start: text.len() - 1, end: text.len() }), (4, 1));
    }
}
