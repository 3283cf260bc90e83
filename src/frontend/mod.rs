pub mod cursor;
pub mod lexer;
pub mod locator;
pub mod token;
pub mod token_dumper;

pub use lexer::{tokenize, LexError, Tokenizer};
pub use locator::{LocatorConfig, LocatorError, ModuleLocator};
pub use token::{Token, TokenKind, TokenList};
