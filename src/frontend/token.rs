use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    EndOfCode,

    // separators
    Dot,
    Colon,
    Newline,

    // operators
    Deref,
    Frame,
    Register,
    Directive,

    // literals
    Integer,
    Float,
    String,

    Name,
}

impl TokenKind {
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::EndOfCode => "end of code",
            TokenKind::Dot => "'.'",
            TokenKind::Colon => "':'",
            TokenKind::Newline => "newline",
            TokenKind::Deref => "'@'",
            TokenKind::Frame => "'~'",
            TokenKind::Register => "'$'",
            TokenKind::Directive => "'#'",
            TokenKind::Integer => "integer literal",
            TokenKind::Float => "float literal",
            TokenKind::String => "string literal",
            TokenKind::Name => "name",
        }
    }

    /// The kind produced by a single-character token, if any.
    pub fn from_single(ch: char) -> Option<Self> {
        Some(match ch {
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '\n' => TokenKind::Newline,
            '@' => TokenKind::Deref,
            '~' => TokenKind::Frame,
            '$' => TokenKind::Register,
            '#' => TokenKind::Directive,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// A lexed token. `text` holds the literal spelling; string tokens hold
/// their contents without the quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub line: usize,
    pub column: usize,
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            line,
            column,
            kind,
            text: text.into(),
        }
    }

    pub fn end_of_code(line: usize, column: usize) -> Self {
        Token::new(TokenKind::EndOfCode, "", line, column)
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// Statement terminators.
    pub fn ends_statement(&self) -> bool {
        matches!(self.kind, TokenKind::Newline | TokenKind::EndOfCode)
    }
}

/// Tokens are immutable once lexed; lists are shared between the compiler,
/// macro bodies and expansions without copying.
pub type TokenList = Rc<Vec<Token>>;
