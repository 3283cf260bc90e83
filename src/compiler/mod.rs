//! Assembler: turns a token list into a relocatable [`ModuleInfo`].
//!
//! Statements are compiled strictly left to right with one token of
//! lookahead. Each statement is checkpointed first; a failing statement is
//! rolled back completely so an interactive caller can keep going.

pub mod compile_error;
mod directives;
mod instruction;
mod macros;
mod scope;

pub use compile_error::{CompileError, CompileErrorKind};

use crate::bytecode::{Datatype, ModuleInfo, Opcode};
use crate::frontend::cursor::{CursorOwner, TokenCursor};
use crate::frontend::token::{Token, TokenKind, TokenList};
use macros::Macro;
use scope::Scope;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use tracing::debug;

/// Compiles a complete token list into a module named `name`.
pub fn compile(tokens: TokenList, name: &str) -> Result<ModuleInfo, CompileError> {
    let mut compiler = Compiler::new(name);
    compiler.feed(tokens)?;
    compiler.finish()
}

pub struct Compiler {
    module: ModuleInfo,
    cursor: TokenCursor,
    /// Open scopes, innermost last. Empty means the global scope.
    scopes: Vec<Scope>,
    macros: HashMap<String, Rc<Macro>>,
    symbol_index: HashMap<String, usize>,
    /// Source position of each entry in `module.unresolved`.
    ref_positions: Vec<(usize, usize)>,
    expansion_depth: usize,
    statements: usize,
}

/// Sizes of everything a statement can append to, taken before it runs.
struct Checkpoint {
    code: usize,
    static_data: usize,
    symbols: usize,
    unresolved: usize,
    relocations: usize,
    required: usize,
    mandatory: BTreeSet<String>,
    optional: BTreeSet<String>,
    scopes: Vec<Scope>,
    statements: usize,
}

impl CursorOwner for Compiler {
    fn cursor_mut(&mut self) -> &mut TokenCursor {
        &mut self.cursor
    }
}

impl Compiler {
    pub fn new(name: &str) -> Self {
        Compiler {
            module: ModuleInfo::new(name),
            cursor: TokenCursor::empty(),
            scopes: Vec::new(),
            macros: HashMap::new(),
            symbol_index: HashMap::new(),
            ref_positions: Vec::new(),
            expansion_depth: 0,
            statements: 0,
        }
    }

    /// The module as compiled so far.
    pub fn module(&self) -> &ModuleInfo {
        &self.module
    }

    /// Number of source statements compiled successfully. A macro call
    /// counts once, however many statements it expands to.
    pub fn statements(&self) -> usize {
        self.statements
    }

    /// Compiles every statement from the current position to the end of
    /// `tokens`. The list must extend the one passed on the previous call,
    /// as the restartable tokenizer produces.
    ///
    /// On error the failing statement is rolled back and skipped, so a later
    /// `feed` continues with the next line.
    pub fn feed(&mut self, tokens: TokenList) -> Result<(), CompileError> {
        let pos = self.cursor.pos();
        self.cursor = TokenCursor::at(tokens, pos);
        self.compile_statements()
    }

    /// Closes the module: checks scopes and binds references to symbols the
    /// module defines itself. Everything else is left for the linker.
    pub fn finish(mut self) -> Result<ModuleInfo, CompileError> {
        if let Some(open) = self.scopes.last() {
            return Err(self.error(CompileErrorKind::UnclosedScope(open.name.clone())));
        }
        self.resolve_local()?;

        debug!(
            module = %self.module.name,
            code = self.module.code.len(),
            static_data = self.module.static_data.len(),
            symbols = self.module.symbols.len(),
            unresolved = self.module.unresolved.len(),
            "module compiled"
        );
        Ok(self.module)
    }

    fn compile_statements(&mut self) -> Result<(), CompileError> {
        loop {
            self.skip_newlines();
            if self.cursor.at_end() {
                return Ok(());
            }

            let checkpoint = self.checkpoint();
            if let Err(err) = self.statement() {
                self.restore(checkpoint);
                self.skip_line();
                return Err(err);
            }
            if self.expansion_depth == 0 {
                self.statements += 1;
            }
        }
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let token = self.cursor.current().clone();
        match token.kind {
            TokenKind::Directive => {
                self.cursor.next_token();
                self.directive()?;
            }
            TokenKind::Name => {
                if let Some(opcode) = Opcode::from_mnemonic(&token.text) {
                    self.instruction(opcode)?;
                } else if self.macros.contains_key(&token.text) {
                    self.expand_macro()?;
                } else {
                    return Err(CompileError::at(
                        &token,
                        CompileErrorKind::UnknownInstruction(token.text.clone()),
                    ));
                }
            }
            _ => return Err(CompileError::unexpected(&token, "an instruction or directive")),
        }
        self.end_statement()
    }

    fn end_statement(&mut self) -> Result<(), CompileError> {
        if !self.cursor.current().ends_statement() {
            return Err(CompileError::unexpected(self.cursor.current(), "end of statement"));
        }
        self.skip_newlines();
        Ok(())
    }

    fn skip_newlines(&mut self) {
        while self.cursor.current().is(TokenKind::Newline) {
            self.cursor.next_token();
        }
    }

    fn skip_line(&mut self) {
        while !self.cursor.current().ends_statement() {
            self.cursor.next_token();
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            code: self.module.code.len(),
            static_data: self.module.static_data.len(),
            symbols: self.module.symbols.len(),
            unresolved: self.module.unresolved.len(),
            relocations: self.module.relocations.len(),
            required: self.module.required_modules.len(),
            mandatory: self.module.mandatory_permissions.clone(),
            optional: self.module.optional_permissions.clone(),
            scopes: self.scopes.clone(),
            statements: self.statements,
        }
    }

    fn restore(&mut self, cp: Checkpoint) {
        for symbol in &self.module.symbols[cp.symbols..] {
            self.symbol_index.remove(&symbol.name);
        }
        self.module.symbols.truncate(cp.symbols);
        self.module.code.truncate(cp.code);
        self.module.static_data.truncate(cp.static_data);
        self.module.unresolved.truncate(cp.unresolved);
        self.ref_positions.truncate(cp.unresolved);
        self.module.relocations.truncate(cp.relocations);
        self.module.required_modules.truncate(cp.required);
        self.module.mandatory_permissions = cp.mandatory;
        self.module.optional_permissions = cp.optional;
        self.scopes = cp.scopes;
        self.statements = cp.statements;
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::at(self.cursor.current(), kind)
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, CompileError> {
        let token = self.cursor.current().clone();
        if !token.is(kind) {
            return Err(CompileError::unexpected(&token, expected));
        }
        self.cursor.next_token();
        Ok(token)
    }

    fn expect_colon(&mut self) -> Result<(), CompileError> {
        self.expect(TokenKind::Colon, "':'").map(|_| ())
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        self.expect(TokenKind::Name, "a name").map(|t| t.text)
    }

    /// `name(.name)*`
    fn dotted_name(&mut self) -> Result<String, CompileError> {
        let mut name = self.expect_name()?;
        while self.cursor.current().is(TokenKind::Dot) && self.cursor.peek().is(TokenKind::Name) {
            self.cursor.next_token();
            name.push('.');
            name.push_str(&self.cursor.current().text);
            self.cursor.next_token();
        }
        Ok(name)
    }

    /// `.dt` following an instruction or a declared name.
    fn datatype_suffix(&mut self) -> Result<Datatype, CompileError> {
        self.expect(TokenKind::Dot, "'.'")?;
        let token = self.expect(TokenKind::Name, "a datatype")?;
        Datatype::from_mnemonic(&token.text).ok_or_else(|| {
            CompileError::at(&token, CompileErrorKind::UnknownDatatype(token.text.clone()))
        })
    }
}
