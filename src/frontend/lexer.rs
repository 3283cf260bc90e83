use crate::frontend::token::{Token, TokenKind, TokenList};
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    InString,
    InComment,
    InInteger,
    InFloat,
    InName,
}

#[derive(Debug, Clone)]
struct Checkpoint {
    source_len: usize,
    pos: usize,
    line: usize,
    column: usize,
    tokens_len: usize,
    sentinel: Option<Token>,
}

/// Restartable tokenizer.
///
/// Source text can be appended with [`Tokenizer::push_source`] and scanned
/// again; scanning resumes where the last successful call stopped and the
/// previously emitted tokens are kept. The list always ends with a single
/// end-of-code token.
pub struct Tokenizer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: TokenList,
    checkpoint: Option<Checkpoint>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Tokenizer {
            source: Vec::new(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Rc::new(Vec::new()),
            checkpoint: None,
        }
    }

    pub fn with_source(source: &str) -> Self {
        let mut tokenizer = Self::new();
        tokenizer.push_source(source);
        tokenizer
    }

    pub fn push_source(&mut self, text: &str) {
        self.source.extend(text.chars());
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Remembers the current scan position and token count.
    pub fn backup(&mut self) {
        let sentinel = self
            .tokens
            .last()
            .filter(|t| t.is(TokenKind::EndOfCode))
            .cloned();
        let tokens_len = self.tokens.len() - usize::from(sentinel.is_some());
        self.checkpoint = Some(Checkpoint {
            source_len: self.source.len(),
            pos: self.pos,
            line: self.line,
            column: self.column,
            tokens_len,
            sentinel,
        });
    }

    /// Rolls back to the last [`Tokenizer::backup`], dropping any source
    /// text appended since. Returns false when there is no backup.
    pub fn recover(&mut self) -> bool {
        let Some(cp) = self.checkpoint.clone() else {
            return false;
        };
        self.source.truncate(cp.source_len);
        self.pos = cp.pos;
        self.line = cp.line;
        self.column = cp.column;
        let tokens = Rc::make_mut(&mut self.tokens);
        tokens.truncate(cp.tokens_len);
        tokens.extend(cp.sentinel);
        true
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn advance(&mut self) {
        if self.current() == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.pos += 1;
    }

    /// Appends in place unless a previously returned list is still shared.
    fn emit(&mut self, token: Token) {
        Rc::make_mut(&mut self.tokens).push(token);
    }

    fn error(&self, kind: LexErrorKind, line: usize, column: usize) -> LexError {
        LexError { kind, line, column }
    }

    fn is_delimiter(ch: char) -> bool {
        ch.is_whitespace() || ch == '"' || ch == '/' || TokenKind::from_single(ch).is_some()
    }

    fn is_word_char(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_'
    }

    /// Scans all pending source text.
    pub fn tokenize(&mut self) -> Result<TokenList, LexError> {
        if self.tokens.last().is_some_and(|t| t.is(TokenKind::EndOfCode)) {
            Rc::make_mut(&mut self.tokens).pop();
        }

        let mut state = State::Begin;
        let mut text = String::new();
        let mut start = (self.line, self.column);
        let mut hex = false;

        loop {
            let ch = self.current();
            match state {
                State::Begin => {
                    let Some(c) = ch else { break };
                    start = (self.line, self.column);
                    match c {
                        ' ' | '\t' | '\r' => self.advance(),
                        '"' => {
                            self.advance();
                            state = State::InString;
                        }
                        '/' => {
                            self.advance();
                            state = State::InComment;
                        }
                        c if c.is_ascii_digit() || c == '+' || c == '-' => {
                            text.push(c);
                            self.advance();
                            hex = false;
                            state = State::InInteger;
                        }
                        c if c.is_alphabetic() || c == '_' => {
                            text.push(c);
                            self.advance();
                            state = State::InName;
                        }
                        c => match TokenKind::from_single(c) {
                            Some(kind) => {
                                self.emit(Token::new(kind, c, start.0, start.1));
                                self.advance();
                            }
                            None => {
                                return Err(self.error(
                                    LexErrorKind::UnexpectedChar(c),
                                    self.line,
                                    self.column,
                                ));
                            }
                        },
                    }
                }

                State::InString => match ch {
                    Some('"') => {
                        self.advance();
                        let contents = std::mem::take(&mut text);
                        self.emit(Token::new(TokenKind::String, contents, start.0, start.1));
                        state = State::Begin;
                    }
                    Some('\n') | None => {
                        return Err(self.error(LexErrorKind::UnterminatedString, start.0, start.1));
                    }
                    Some(c) => {
                        text.push(c);
                        self.advance();
                    }
                },

                State::InComment => match ch {
                    // The newline itself is still a token.
                    Some('\n') | None => state = State::Begin,
                    Some(_) => self.advance(),
                },

                State::InInteger => {
                    let digits = text.trim_start_matches(['+', '-']).len();
                    let leading_zero = text.ends_with('0') && digits == 1;
                    match ch {
                        Some(c) if c.is_ascii_digit() || (hex && c.is_ascii_hexdigit()) => {
                            text.push(c);
                            self.advance();
                        }
                        Some(c @ ('x' | 'X')) if leading_zero && !hex => {
                            text.push(c);
                            self.advance();
                            hex = true;
                        }
                        Some('.') if !hex && digits > 0 => {
                            text.push('.');
                            self.advance();
                            state = State::InFloat;
                        }
                        Some(c) if !Self::is_delimiter(c) => {
                            return Err(self.error(
                                LexErrorKind::UnexpectedChar(c),
                                self.line,
                                self.column,
                            ));
                        }
                        _ => {
                            let complete = if hex { digits > 2 } else { digits > 0 };
                            if !complete {
                                let last = text.chars().last().unwrap_or('-');
                                return Err(self.error(
                                    LexErrorKind::UnexpectedChar(last),
                                    start.0,
                                    start.1,
                                ));
                            }
                            let literal = std::mem::take(&mut text);
                            self.emit(Token::new(TokenKind::Integer, literal, start.0, start.1));
                            state = State::Begin;
                        }
                    }
                }

                State::InFloat => match ch {
                    Some(c) if c.is_ascii_digit() => {
                        text.push(c);
                        self.advance();
                    }
                    Some(c) if !Self::is_delimiter(c) || c == '.' => {
                        return Err(self.error(
                            LexErrorKind::UnexpectedChar(c),
                            self.line,
                            self.column,
                        ));
                    }
                    _ => {
                        let literal = std::mem::take(&mut text);
                        self.emit(Token::new(TokenKind::Float, literal, start.0, start.1));
                        state = State::Begin;
                    }
                },

                State::InName => match ch {
                    Some(c) if Self::is_word_char(c) => {
                        text.push(c);
                        self.advance();
                    }
                    Some(c) if !Self::is_delimiter(c) => {
                        return Err(self.error(
                            LexErrorKind::UnexpectedChar(c),
                            self.line,
                            self.column,
                        ));
                    }
                    _ => {
                        let name = std::mem::take(&mut text);
                        self.emit(Token::new(TokenKind::Name, name, start.0, start.1));
                        state = State::Begin;
                    }
                },
            }
        }

        self.emit(Token::end_of_code(self.line, self.column));
        Ok(Rc::clone(&self.tokens))
    }
}

/// Tokenizes a complete source buffer.
pub fn tokenize(source: &str) -> Result<TokenList, LexError> {
    Tokenizer::with_source(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize failed")
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    fn texts(source: &str) -> Vec<String> {
        tokenize(source)
            .expect("tokenize failed")
            .iter()
            .filter(|t| !t.ends_statement())
            .map(|t| t.text.clone())
            .collect()
    }

    #[test]
    fn test_instruction_line() {
        use TokenKind::*;
        assert_eq!(
            kinds("mov.i32 : $ac : 5"),
            vec![Name, Dot, Name, Colon, Register, Name, Colon, Integer, EndOfCode]
        );
    }

    #[test]
    fn test_operators_and_directives() {
        use TokenKind::*;
        assert_eq!(
            kinds("#label x\nadd.u8 : @~-8 : 1"),
            vec![
                Directive, Name, Name, Newline, Name, Dot, Name, Colon, Deref, Frame, Integer,
                Colon, Integer, EndOfCode
            ]
        );
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(
            texts("12 -7 +3 0x1F 1.5 -0.25"),
            vec!["12", "-7", "+3", "0x1F", "1.5", "-0.25"]
        );
        let list = tokenize("1.5 7").unwrap();
        assert_eq!(list[0].kind, TokenKind::Float);
        assert_eq!(list[1].kind, TokenKind::Integer);
    }

    #[test]
    fn test_float_cannot_retransition() {
        let err = tokenize("1.2.3").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('.'));
        assert_eq!((err.line, err.column), (1, 4));
    }

    #[test]
    fn test_unexpected_char_in_number_and_name() {
        let err = tokenize("12ab").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('a'));

        let err = tokenize("abc%").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('%'));

        let err = tokenize("- 5").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('-'));
    }

    #[test]
    fn test_strings_have_no_escapes() {
        let list = tokenize(r#"#static s : "a\nb""#).unwrap();
        let s = list.iter().find(|t| t.is(TokenKind::String)).unwrap();
        assert_eq!(s.text, r"a\nb");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"abc\nx").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!((err.line, err.column), (1, 1));

        let err = tokenize("  \"abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.column, 3);
    }

    #[test]
    fn test_comments_are_discarded() {
        use TokenKind::*;
        assert_eq!(
            kinds("nop / does nothing\nexit/ bye"),
            vec![Name, Newline, Name, EndOfCode]
        );
    }

    #[test]
    fn test_positions() {
        let list = tokenize("nop\n  exit").unwrap();
        assert_eq!((list[0].line, list[0].column), (1, 1));
        assert_eq!((list[2].line, list[2].column), (2, 3));
    }

    #[test]
    fn test_restart_reuses_tokens() {
        let mut tokenizer = Tokenizer::with_source("nop\n");
        let first = tokenizer.tokenize().unwrap();
        assert_eq!(first.len(), 3);

        tokenizer.push_source("exit\n");
        let second = tokenizer.tokenize().unwrap();
        assert_eq!(&second[..2], &first[..2]);
        assert_eq!(second[2].text, "exit");
        assert_eq!(
            second.iter().filter(|t| t.is(TokenKind::EndOfCode)).count(),
            1
        );
    }

    #[test]
    fn test_list_is_shared_not_copied() {
        let mut tokenizer = Tokenizer::with_source("nop\n");
        let first = tokenizer.tokenize().unwrap();
        assert_eq!(Rc::strong_count(&first), 2);
        let storage = Rc::as_ptr(&first);
        drop(first);

        // appending grows the same list once nobody else holds it
        tokenizer.push_source("exit\n");
        let second = tokenizer.tokenize().unwrap();
        assert_eq!(Rc::as_ptr(&second), storage);
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn test_backup_and_recover() {
        let mut tokenizer = Tokenizer::with_source("nop\n");
        let before = tokenizer.tokenize().unwrap();

        tokenizer.backup();
        tokenizer.push_source("\"broken\n");
        assert!(tokenizer.tokenize().is_err());
        assert!(tokenizer.recover());
        assert_eq!(tokenizer.tokens(), before.as_slice());

        tokenizer.push_source("exit\n");
        let after = tokenizer.tokenize().unwrap();
        assert_eq!(after[2].text, "exit");
    }
}
