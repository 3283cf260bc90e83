use crate::bytecode::op::MAX_CALL_ARGS;
use crate::bytecode::Datatype;
use crate::frontend::token::Token;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("unknown instruction '{0}'")]
    UnknownInstruction(String),
    #[error("unknown datatype '{0}'")]
    UnknownDatatype(String),
    #[error("'{0}' requires a datatype")]
    MissingDatatype(String),
    #[error("'{0}' does not take a datatype")]
    UnexpectedDatatype(String),
    #[error("datatype mismatch: {found} cannot be used as {expected}")]
    DatatypeMismatch { expected: Datatype, found: String },
    #[error("unknown register '{0}'")]
    UnknownRegister(String),
    #[error("unknown directive '#{0}'")]
    UnknownDirective(String),
    #[error("symbol '{0}' already defined")]
    SymbolAlreadyDefined(String),
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),
    #[error("macro '{0}' already defined")]
    MacroAlreadyDefined(String),
    #[error("macro '{name}' takes {expected} arguments, got {found}")]
    MacroArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("macro expansion nested too deeply in '{0}'")]
    MacroRecursion(String),
    #[error("macro '{0}' has no matching #end")]
    UnterminatedMacro(String),
    #[error("dereference count exhausted")]
    DerefLimit,
    #[error("cannot dereference {0}")]
    InvalidDereference(&'static str),
    #[error("integer literal {literal} out of range for {datatype}")]
    IntegerOutOfRange { literal: String, datatype: Datatype },
    #[error("invalid numeric literal '{0}'")]
    InvalidLiteral(String),
    #[error("too many call arguments (at most {MAX_CALL_ARGS})")]
    TooManyCallArguments,
    #[error("cannot end the global scope")]
    EndOfGlobalScope,
    #[error("invalid scope name '{0}'")]
    InvalidScopeName(String),
    #[error("scope '{0}' is never closed")]
    UnclosedScope(String),
    #[error("#local outside of a function")]
    LocalOutsideFunction,
}

/// A compile error at a source position. Formats as `line:col: message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: usize,
    pub column: usize,
}

impl CompileError {
    pub fn at(token: &Token, kind: CompileErrorKind) -> Self {
        CompileError {
            kind,
            line: token.line,
            column: token.column,
        }
    }

    pub fn unexpected(token: &Token, expected: impl Into<String>) -> Self {
        let found = match token.text.as_str() {
            "" | "\n" => token.kind.describe().to_string(),
            text => format!("{} '{}'", token.kind.describe(), text),
        };
        Self::at(
            token,
            CompileErrorKind::UnexpectedToken {
                expected: expected.into(),
                found,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::token::TokenKind;

    #[test]
    fn test_display_has_position() {
        let token = Token::new(TokenKind::Name, "movv", 3, 7);
        let err = CompileError::at(&token, CompileErrorKind::UnknownInstruction("movv".into()));
        assert_eq!(err.to_string(), "3:7: unknown instruction 'movv'");
    }

    #[test]
    fn test_unexpected_describes_token() {
        let token = Token::new(TokenKind::Newline, "\n", 1, 4);
        let err = CompileError::unexpected(&token, "':'");
        assert_eq!(err.to_string(), "1:4: expected ':', found newline");

        let token = Token::new(TokenKind::Integer, "5", 2, 1);
        let err = CompileError::unexpected(&token, "a name");
        assert_eq!(err.to_string(), "2:1: expected a name, found integer literal '5'");
    }
}
