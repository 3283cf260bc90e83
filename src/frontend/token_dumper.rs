use crate::frontend::token::{Token, TokenKind};
use std::io::{self, Write};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the token text instead of its Debug form
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Token]) -> io::Result<()> {
        let stdout = io::stdout();
        self.write_to(&mut stdout.lock(), tokens)
    }

    pub fn write_to(&self, out: &mut impl Write, tokens: &[Token]) -> io::Result<()> {
        for t in tokens {
            self.write_one(out, t)?;
        }
        Ok(())
    }

    fn write_one(&self, out: &mut impl Write, t: &Token) -> io::Result<()> {
        let kind = self.kind(t.kind);
        let colr = if self.color { self.color(t.kind) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            return writeln!(
                out,
                "[{:02}:{:02}] {}{:<9} {:?}{}",
                t.line, t.column, colr, kind, t.text, reset
            );
        }

        let shown = match t.kind {
            TokenKind::Newline => "NEWLINE".to_string(),
            TokenKind::EndOfCode => "EOC".to_string(),
            TokenKind::String => format!("\"{}\"", t.text),
            _ => t.text.clone(),
        };
        writeln!(
            out,
            "[{:02}:{:02}] {}{:<9} {}{}",
            t.line, t.column, colr, kind, shown, reset
        )
    }

    fn kind(&self, kind: TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            Newline => "NEWLINE",
            EndOfCode => "EOC",

            Integer => "INT",
            Float => "FLOAT",
            String => "STRING",

            Name => "NAME",

            Dot | Colon => "SEP",
            Deref | Frame | Register => "OP",
            Directive => "DIRECTIVE",
        }
    }

    fn color(&self, kind: TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            Newline | EndOfCode => Self::DIM,
            String => Self::GRN,
            Integer | Float => Self::CYN,
            Name => Self::YEL,
            Deref | Frame | Register | Directive => Self::MAG,
            Dot | Colon => Self::RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;

    #[test]
    fn test_pretty_plain_output() {
        let tokens = tokenize("push.i8 : \"hi\"").unwrap();
        let mut out = Vec::new();
        TokenDumper::new()
            .no_color()
            .pretty()
            .write_to(&mut out, &tokens)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[01:01] NAME      push");
        assert!(lines[4].ends_with("\"hi\""));
        assert!(lines.last().unwrap().contains("EOC"));
    }

    #[test]
    fn test_debug_output_has_colors() {
        let tokens = tokenize("5").unwrap();
        let mut out = Vec::new();
        TokenDumper::new().write_to(&mut out, &tokens).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\x1b[36m"));
        assert!(text.contains("\"5\""));
    }
}
