//! Tokenizer for the restricted BUILD-language grammar (spec.md §4.1/§6).
//!
//! Shaped after the teacher's `parser::lexer`: a `Position`/`Span` pair on
//! every token for error reporting, a flat `Token{kind, span}` stream
//! consumed by a recursive-descent parser.

use std::fmt;

use super::error::{LangError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Str(String),
    FString(String),
    Ident(String),
    True,
    False,
    None,
    If,
    Elif,
    Else,
    For,
    In,
    NotIn,
    Assert,
    Return,
    Lambda,
    And,
    Or,
    Not,
    Def,
    Pass,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Eq,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Arrow,
    Pipe,

    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

const KEYWORDS: &[(&str, fn() -> TokenKind)] = &[
    ("True", || TokenKind::True),
    ("False", || TokenKind::False),
    ("None", || TokenKind::None),
    ("if", || TokenKind::If),
    ("elif", || TokenKind::Elif),
    ("else", || TokenKind::Else),
    ("for", || TokenKind::For),
    ("in", || TokenKind::In),
    ("assert", || TokenKind::Assert),
    ("return", || TokenKind::Return),
    ("lambda", || TokenKind::Lambda),
    ("and", || TokenKind::And),
    ("or", || TokenKind::Or),
    ("not", || TokenKind::Not),
    ("def", || TokenKind::Def),
    ("pass", || TokenKind::Pass),
];

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
    /// Stack of indentation widths, innermost last, mirroring Python-style
    /// significant whitespace (the grammar this dialect's block structure
    /// is modelled on per spec.md §6).
    indents: Vec<usize>,
    paren_depth: u32,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if let Some(tok) = self.handle_indentation()? {
                    tokens.push(tok);
                    continue;
                }
            }
            self.skip_inline_whitespace_and_comments();
            let start = self.position();
            let Some(c) = self.peek() else {
                break;
            };
            if c == b'\n' {
                self.advance();
                if self.paren_depth == 0 {
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        span: Span { start, end: self.position() },
                    });
                    self.at_line_start = true;
                }
                continue;
            }
            let kind = self.next_token_kind(start)?;
            tokens.push(Token {
                kind,
                span: Span {
                    start,
                    end: self.position(),
                },
            });
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                span: Span::default(),
            });
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::default(),
        });
        Ok(tokens)
    }

    fn handle_indentation(&mut self) -> Result<Option<Token>> {
        let line_start = self.pos;
        let mut width = 0;
        loop {
            match self.peek() {
                Some(b' ') => {
                    width += 1;
                    self.advance();
                }
                Some(b'\t') => {
                    width += 8 - (width % 8);
                    self.advance();
                }
                _ => break,
            }
        }
        // Blank line or comment-only line: don't emit indent/dedent, let the
        // newline/comment handling consume it instead.
        if matches!(self.peek(), Some(b'\n') | Some(b'#') | None) {
            self.at_line_start = false;
            if self.peek().is_none() {
                return Ok(None);
            }
            if self.peek() == Some(b'#') {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.advance();
                }
            }
            if self.peek() == Some(b'\n') {
                self.advance();
                self.at_line_start = true;
                return self.handle_indentation();
            }
            return Ok(None);
        }

        self.at_line_start = false;
        let current = *self.indents.last().unwrap();
        let pos = self.position();
        if width > current {
            self.indents.push(width);
            return Ok(Some(Token {
                kind: TokenKind::Indent,
                span: Span { start: pos, end: pos },
            }));
        }
        if width < current {
            if !self.indents.contains(&width) {
                return Err(LangError::ParseError(
                    pos,
                    "inconsistent indentation".to_string(),
                ));
            }
            self.indents.pop();
            // Re-check: caller loop will call handle_indentation again via
            // the Newline-free path since at_line_start stays false once we
            // return a Dedent but width may require multiple pops; rewind.
            self.pos = line_start;
            self.line = pos.line;
            self.column = 1;
            self.at_line_start = true;
            return Ok(Some(Token {
                kind: TokenKind::Dedent,
                span: Span { start: pos, end: pos },
            }));
        }
        Ok(None)
    }

    fn skip_inline_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'\\') if self.peek_at(1) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn next_token_kind(&mut self, start: Position) -> Result<TokenKind> {
        let c = self.peek().unwrap();
        if c.is_ascii_digit() {
            return Ok(self.read_number());
        }
        if c == b'"' || c == b'\'' {
            return self.read_string(false);
        }
        if c == b'f' && matches!(self.peek_at(1), Some(b'"') | Some(b'\'')) {
            self.advance();
            return self.read_string(true);
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.read_ident_or_keyword());
        }
        self.advance();
        match c {
            b'+' => Ok(TokenKind::Plus),
            b'-' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    Ok(TokenKind::Arrow)
                } else {
                    Ok(TokenKind::Minus)
                }
            }
            b'*' => Ok(TokenKind::Star),
            b'/' => Ok(TokenKind::Slash),
            b'%' => Ok(TokenKind::Percent),
            b'&' => Ok(TokenKind::Amp),
            b'|' => Ok(TokenKind::Pipe),
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Ok(TokenKind::EqEq)
                } else {
                    Ok(TokenKind::Eq)
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Ok(TokenKind::NotEq)
                } else {
                    Err(LangError::ParseError(start, "unexpected '!'".to_string()))
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Ok(TokenKind::LtEq)
                } else {
                    Ok(TokenKind::Lt)
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Ok(TokenKind::GtEq)
                } else {
                    Ok(TokenKind::Gt)
                }
            }
            b'(' => {
                self.paren_depth += 1;
                Ok(TokenKind::LParen)
            }
            b')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Ok(TokenKind::RParen)
            }
            b'[' => {
                self.paren_depth += 1;
                Ok(TokenKind::LBracket)
            }
            b']' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Ok(TokenKind::RBracket)
            }
            b'{' => {
                self.paren_depth += 1;
                Ok(TokenKind::LBrace)
            }
            b'}' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Ok(TokenKind::RBrace)
            }
            b',' => Ok(TokenKind::Comma),
            b':' => Ok(TokenKind::Colon),
            b'.' => Ok(TokenKind::Dot),
            other => Err(LangError::ParseError(
                start,
                format!("unexpected character {:?}", other as char),
            )),
        }
    }

    fn read_number(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        TokenKind::Int(text.parse().unwrap_or(0))
    }

    fn read_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if text == "not" && self.peeks_keyword_after_whitespace("in") {
            self.skip_inline_whitespace_and_comments();
            self.advance_keyword("in");
            return TokenKind::NotIn;
        }
        for (kw, make) in KEYWORDS {
            if *kw == text {
                return make();
            }
        }
        TokenKind::Ident(text.to_string())
    }

    fn peeks_keyword_after_whitespace(&self, kw: &str) -> bool {
        let mut i = self.pos;
        while matches!(self.src.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
        self.src[i..].starts_with(kw.as_bytes())
    }

    fn advance_keyword(&mut self, kw: &str) {
        for _ in 0..kw.len() {
            self.advance();
        }
    }

    fn read_string(&mut self, is_fstring: bool) -> Result<TokenKind> {
        let quote = self.advance().unwrap();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(LangError::ParseError(
                        self.position(),
                        "unterminated string literal".to_string(),
                    ))
                }
                Some(c) if c == quote => break,
                Some(b'\\') => {
                    let escaped = self.advance().ok_or_else(|| {
                        LangError::ParseError(self.position(), "unterminated escape".to_string())
                    })?;
                    out.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'"' => '"',
                        b'\'' => '\'',
                        other => other as char,
                    });
                }
                Some(c) => out.push(c as char),
            }
        }
        Ok(if is_fstring {
            TokenKind::FString(out)
        } else {
            TokenKind::Str(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_simple_assignment() {
        let k = kinds("x = 1\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Eq,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_fstring_and_string() {
        let k = kinds(r#"f"hi {name}""#);
        assert_eq!(k[0], TokenKind::FString("hi {name}".to_string()));
    }

    #[test]
    fn tokenizes_keywords() {
        let k = kinds("if x in y:\n    pass\n");
        assert!(k.contains(&TokenKind::If));
        assert!(k.contains(&TokenKind::In));
        assert!(k.contains(&TokenKind::Indent));
        assert!(k.contains(&TokenKind::Pass));
    }

    #[test]
    fn tokenizes_not_in() {
        let k = kinds("x not in y\n");
        assert!(k.contains(&TokenKind::NotIn));
    }

    #[test]
    fn dedent_emitted_on_block_exit() {
        let k = kinds("if x:\n    pass\ny = 1\n");
        let indent_count = k.iter().filter(|t| **t == TokenKind::Indent).count();
        let dedent_count = k.iter().filter(|t| **t == TokenKind::Dedent).count();
        assert_eq!(indent_count, dedent_count);
    }
}
