use super::{CompileError, CompileErrorKind, Compiler};
use crate::bytecode::Opcode;
use crate::frontend::cursor::{Redirect, TokenCursor};
use crate::frontend::token::{Token, TokenKind};
use std::rc::Rc;

const MAX_EXPANSION_DEPTH: usize = 64;

/// Directives whose bodies close with their own `#end`.
const BLOCK_DIRECTIVES: [&str; 4] = ["scope", "func", "funx", "macro"];

#[derive(Debug)]
pub(super) struct Macro {
    pub params: Vec<String>,
    pub body: Vec<Token>,
}

impl Compiler {
    /// `#macro name : p : ...` up to its matching `#end`. The body is kept
    /// as raw tokens and compiled at each use.
    pub(super) fn define_macro(&mut self) -> Result<(), CompileError> {
        let name_token = self.expect(TokenKind::Name, "a macro name")?;
        let name = name_token.text.clone();
        if self.macros.contains_key(&name) || Opcode::from_mnemonic(&name).is_some() {
            return Err(CompileError::at(
                &name_token,
                CompileErrorKind::MacroAlreadyDefined(name),
            ));
        }

        let mut params = Vec::new();
        while self.cursor.current().is(TokenKind::Colon) {
            self.cursor.next_token();
            params.push(self.expect_name()?);
        }
        if !self.cursor.current().ends_statement() {
            return Err(CompileError::unexpected(self.cursor.current(), "end of statement"));
        }

        let mut body = Vec::new();
        let mut depth = 0usize;
        loop {
            let token = self.cursor.current().clone();
            match token.kind {
                TokenKind::EndOfCode => {
                    return Err(CompileError::at(
                        &name_token,
                        CompileErrorKind::UnterminatedMacro(name),
                    ));
                }
                TokenKind::Directive => {
                    let directive = self.cursor.peek().text.as_str();
                    if directive == "end" {
                        if depth == 0 {
                            self.cursor.next_token();
                            self.cursor.next_token();
                            break;
                        }
                        depth -= 1;
                    } else if BLOCK_DIRECTIVES.contains(&directive) {
                        depth += 1;
                    }
                }
                _ => {}
            }
            body.push(token);
            self.cursor.next_token();
        }

        if !self.cursor.current().ends_statement() {
            return Err(CompileError::unexpected(self.cursor.current(), "end of statement"));
        }
        self.macros.insert(name, Rc::new(Macro { params, body }));
        Ok(())
    }

    /// Compiles one use of a macro with its arguments substituted.
    pub(super) fn expand_macro(&mut self) -> Result<(), CompileError> {
        let call = self.cursor.current().clone();
        let Some(definition) = self.macros.get(&call.text).cloned() else {
            return Err(CompileError::at(
                &call,
                CompileErrorKind::UnknownInstruction(call.text.clone()),
            ));
        };
        self.cursor.next_token();

        let mut args: Vec<Vec<Token>> = Vec::new();
        while self.cursor.current().is(TokenKind::Colon) {
            self.cursor.next_token();
            let mut arg = Vec::new();
            while !self.cursor.current().is(TokenKind::Colon)
                && !self.cursor.current().ends_statement()
            {
                arg.push(self.cursor.current().clone());
                self.cursor.next_token();
            }
            if arg.is_empty() {
                return Err(CompileError::unexpected(self.cursor.current(), "a macro argument"));
            }
            args.push(arg);
        }

        if args.len() != definition.params.len() {
            return Err(CompileError::at(
                &call,
                CompileErrorKind::MacroArity {
                    name: call.text.clone(),
                    expected: definition.params.len(),
                    found: args.len(),
                },
            ));
        }
        if self.expansion_depth >= MAX_EXPANSION_DEPTH {
            return Err(CompileError::at(
                &call,
                CompileErrorKind::MacroRecursion(call.text.clone()),
            ));
        }

        let mut expanded = Vec::with_capacity(definition.body.len() + 1);
        for token in &definition.body {
            let param = token
                .is(TokenKind::Name)
                .then(|| definition.params.iter().position(|p| *p == token.text))
                .flatten();
            match param {
                Some(i) => expanded.extend(args[i].iter().cloned()),
                None => expanded.push(token.clone()),
            }
        }
        expanded.push(Token::end_of_code(call.line, call.column));

        let mut guard = Redirect::new(self, TokenCursor::new(Rc::new(expanded)));
        guard.expansion_depth += 1;
        let result = guard.compile_statements();
        guard.expansion_depth -= 1;
        result
    }
}
