use crate::frontend::token::{Token, TokenKind, TokenList};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Read position inside a shared token list.
///
/// Reading past the end keeps returning the final token, which the
/// tokenizer guarantees is end-of-code.
#[derive(Debug, Clone)]
pub struct TokenCursor {
    list: TokenList,
    pos: usize,
    fallback: Token,
}

impl TokenCursor {
    pub fn new(list: TokenList) -> Self {
        Self::at(list, 0)
    }

    pub fn at(list: TokenList, pos: usize) -> Self {
        let fallback = list
            .last()
            .filter(|t| t.is(TokenKind::EndOfCode))
            .cloned()
            .unwrap_or_else(|| Token::end_of_code(0, 0));
        TokenCursor {
            list,
            pos,
            fallback,
        }
    }

    pub fn empty() -> Self {
        Self::new(Rc::new(vec![Token::end_of_code(0, 0)]))
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn list(&self) -> &TokenList {
        &self.list
    }

    pub fn current(&self) -> &Token {
        self.list.get(self.pos).unwrap_or(&self.fallback)
    }

    pub fn peek(&self) -> &Token {
        self.list.get(self.pos + 1).unwrap_or(&self.fallback)
    }

    /// Moves forward one token and returns the new current token.
    pub fn next_token(&mut self) -> &Token {
        if self.pos < self.list.len() {
            self.pos += 1;
        }
        self.current()
    }

    pub fn at_end(&self) -> bool {
        self.current().is(TokenKind::EndOfCode)
    }
}

/// Anything that reads from a swappable token cursor.
pub trait CursorOwner {
    fn cursor_mut(&mut self) -> &mut TokenCursor;
}

/// Points an owner's cursor at another token list for the guard's lifetime
/// and puts the original cursor back on drop, error paths included.
pub struct Redirect<'a, T: CursorOwner> {
    owner: &'a mut T,
    saved: Option<TokenCursor>,
}

impl<'a, T: CursorOwner> Redirect<'a, T> {
    pub fn new(owner: &'a mut T, cursor: TokenCursor) -> Self {
        let saved = std::mem::replace(owner.cursor_mut(), cursor);
        Redirect {
            owner,
            saved: Some(saved),
        }
    }
}

impl<T: CursorOwner> Deref for Redirect<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.owner
    }
}

impl<T: CursorOwner> DerefMut for Redirect<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.owner
    }
}

impl<T: CursorOwner> Drop for Redirect<'_, T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.owner.cursor_mut() = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;

    struct Reader {
        cursor: TokenCursor,
    }

    impl CursorOwner for Reader {
        fn cursor_mut(&mut self) -> &mut TokenCursor {
            &mut self.cursor
        }
    }

    #[test]
    fn test_cursor_walks_and_saturates() {
        let mut cursor = TokenCursor::new(tokenize("nop exit").unwrap());
        assert_eq!(cursor.current().text, "nop");
        assert_eq!(cursor.peek().text, "exit");
        assert_eq!(cursor.next_token().text, "exit");
        assert!(cursor.next_token().is(TokenKind::EndOfCode));
        assert!(cursor.next_token().is(TokenKind::EndOfCode));
        assert!(cursor.at_end());
    }

    #[test]
    fn test_redirect_restores_on_drop() {
        let mut reader = Reader {
            cursor: TokenCursor::at(tokenize("a b c").unwrap(), 1),
        };
        {
            let mut guard = Redirect::new(&mut reader, TokenCursor::new(tokenize("x").unwrap()));
            assert_eq!(guard.cursor.current().text, "x");
            guard.cursor.next_token();
            assert!(guard.cursor.at_end());
        }
        assert_eq!(reader.cursor.current().text, "b");
        assert_eq!(reader.cursor.pos(), 1);
    }

    #[test]
    fn test_redirect_restores_on_early_return() {
        fn fails(reader: &mut Reader) -> Result<(), String> {
            let guard = Redirect::new(reader, TokenCursor::empty());
            if guard.cursor.at_end() {
                return Err("stopped".to_string());
            }
            Ok(())
        }

        let mut reader = Reader {
            cursor: TokenCursor::new(tokenize("keep").unwrap()),
        };
        assert!(fails(&mut reader).is_err());
        assert_eq!(reader.cursor.current().text, "keep");
    }
}
