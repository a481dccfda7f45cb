//! Recursive-descent parser over the `Lexer` token stream, producing the
//! `ast` module's tree. Shaped after the teacher's `parser::Parser`
//! (token cursor + peek/expect helpers), restructured for the BUILD
//! grammar's statement/expression set.

use super::ast::*;
use super::error::{LangError, Result};
use super::lexer::{Lexer, Position, Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_str(src: &str) -> Result<Module> {
        let tokens = Lexer::new(src).tokenize()?;
        Parser::new(tokens).parse_module()
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_pos(&self) -> Position {
        self.tokens[self.pos].span.start
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(LangError::ParseError(
                self.peek_pos(),
                format!("expected {:?}, found {:?}", kind, self.peek()),
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
    }

    pub fn parse_module(&mut self) -> Result<Module> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), TokenKind::Eof) {
            statements.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Module { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>> {
        self.expect(&TokenKind::Colon)?;
        self.skip_newlines();
        self.expect(&TokenKind::Indent)?;
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), TokenKind::Dedent) {
            stmts.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.expect(&TokenKind::Dedent)?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.peek_pos();
        let kind = match self.peek().clone() {
            TokenKind::Def => self.parse_function_def()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Return => {
                self.advance();
                if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                    StatementKind::Return(None)
                } else {
                    StatementKind::Return(Some(self.parse_expr()?))
                }
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expr()?;
                let message = if self.eat(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                StatementKind::Assert { test, message }
            }
            TokenKind::Pass => {
                self.advance();
                StatementKind::Pass
            }
            _ => self.parse_expr_or_assign_statement()?,
        };
        let end = self.peek_pos();
        Ok(Statement {
            kind,
            span: Span { start, end },
        })
    }

    fn parse_expr_or_assign_statement(&mut self) -> Result<StatementKind> {
        let target = self.parse_expr()?;
        if self.eat(&TokenKind::Eq) {
            let value = self.parse_expr()?;
            return Ok(StatementKind::Assign { target, value });
        }
        Ok(StatementKind::Expr(target))
    }

    fn parse_function_def(&mut self) -> Result<StatementKind> {
        self.expect(&TokenKind::Def)?;
        let name = self.parse_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            params.push(self.parse_param()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        // Optional `-> ReturnType` annotation: parsed and discarded, the
        // interpreter is dynamically typed at the value level.
        if self.eat(&TokenKind::Arrow) {
            self.parse_ident()?;
        }
        let body = self.parse_block()?;
        Ok(StatementKind::FunctionDef { name, params, body })
    }

    fn parse_param(&mut self) -> Result<Param> {
        let name = self.parse_ident()?;
        let mut types = Vec::new();
        let mut alias = None;
        if self.eat(&TokenKind::Colon) {
            types.push(self.parse_ident()?);
            while self.eat(&TokenKind::Pipe) {
                types.push(self.parse_ident()?);
            }
            if self.eat(&TokenKind::Amp) {
                alias = Some(self.parse_ident()?);
            }
        }
        let default = if self.eat(&TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Param {
            name,
            types,
            alias,
            default,
        })
    }

    fn parse_if(&mut self) -> Result<StatementKind> {
        let mut branches = Vec::new();
        self.expect(&TokenKind::If)?;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((test, body));
        let mut orelse = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Elif => {
                    self.advance();
                    let test = self.parse_expr()?;
                    let body = self.parse_block()?;
                    branches.push((test, body));
                }
                TokenKind::Else => {
                    self.advance();
                    orelse = self.parse_block()?;
                    break;
                }
                _ => break,
            }
        }
        Ok(StatementKind::If { branches, orelse })
    }

    fn parse_for(&mut self) -> Result<StatementKind> {
        self.expect(&TokenKind::For)?;
        let target = self.parse_atom()?;
        self.expect(&TokenKind::In)?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StatementKind::For { target, iter, body })
    }

    fn parse_ident(&mut self) -> Result<String> {
        match self.advance().kind {
            TokenKind::Ident(s) => Ok(s),
            other => Err(LangError::ParseError(
                self.peek_pos(),
                format!("expected identifier, found {:?}", other),
            )),
        }
    }

    // --- expressions, lowest to highest precedence ---

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let body = self.parse_or()?;
        if self.eat(&TokenKind::If) {
            let test = self.parse_or()?;
            self.expect(&TokenKind::Else)?;
            let orelse = self.parse_ternary()?;
            let end = self.peek_pos();
            return Ok(Expr {
                kind: ExprKind::IfElse {
                    body: Box::new(body),
                    test: Box::new(test),
                    orelse: Box::new(orelse),
                },
                span: Span { start, end },
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut left = self.parse_and()?;
        while matches!(self.peek(), TokenKind::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            let end = self.peek_pos();
            left = Expr {
                kind: ExprKind::BoolOp {
                    op: BoolOp::Or,
                    values: vec![left, rhs],
                },
                span: Span { start, end },
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut left = self.parse_not()?;
        while matches!(self.peek(), TokenKind::And) {
            self.advance();
            let rhs = self.parse_not()?;
            let end = self.peek_pos();
            left = Expr {
                kind: ExprKind::BoolOp {
                    op: BoolOp::And,
                    values: vec![left, rhs],
                },
                span: Span { start, end },
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        if self.eat(&TokenKind::Not) {
            let operand = self.parse_not()?;
            let end = self.peek_pos();
            return Ok(Expr {
                kind: ExprKind::UnaryNot(Box::new(operand)),
                span: Span { start, end },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let left = self.parse_bitor()?;
        let op = match self.peek() {
            TokenKind::EqEq => CompareOp::Eq,
            TokenKind::NotEq => CompareOp::NotEq,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::LtEq => CompareOp::LtEq,
            TokenKind::GtEq => CompareOp::GtEq,
            TokenKind::In => CompareOp::In,
            TokenKind::NotIn => CompareOp::NotIn,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_bitor()?;
        let end = self.peek_pos();
        Ok(Expr {
            kind: ExprKind::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span: Span { start, end },
        })
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut left = self.parse_bitand()?;
        while matches!(self.peek(), TokenKind::Pipe) {
            self.advance();
            let right = self.parse_bitand()?;
            let end = self.peek_pos();
            left = Expr {
                kind: ExprKind::BinOp {
                    left: Box::new(left),
                    op: BinOp::BitOr,
                    right: Box::new(right),
                },
                span: Span { start, end },
            };
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut left = self.parse_additive()?;
        while matches!(self.peek(), TokenKind::Amp) {
            self.advance();
            let right = self.parse_additive()?;
            let end = self.peek_pos();
            left = Expr {
                kind: ExprKind::BinOp {
                    left: Box::new(left),
                    op: BinOp::BitAnd,
                    right: Box::new(right),
                },
                span: Span { start, end },
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let end = self.peek_pos();
            left = Expr {
                kind: ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span: Span { start, end },
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let end = self.peek_pos();
            left = Expr {
                kind: ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span: Span { start, end },
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            let end = self.peek_pos();
            return Ok(Expr {
                kind: ExprKind::BinOp {
                    left: Box::new(Expr {
                        kind: ExprKind::Int(0),
                        span: Span { start, end: start },
                    }),
                    op: BinOp::Sub,
                    right: Box::new(operand),
                },
                span: Span { start, end },
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek().clone() {
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    let end = self.peek_pos();
                    expr = Expr {
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            kwargs,
                        },
                        span: Span { start, end },
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.parse_ident()?;
                    let end = self.peek_pos();
                    expr = Expr {
                        kind: ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span: Span { start, end },
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    expr = self.parse_subscript(expr, start)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self, value: Expr, start: Position) -> Result<Expr> {
        if self.eat(&TokenKind::Colon) {
            let upper = if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect(&TokenKind::RBracket)?;
            let end = self.peek_pos();
            return Ok(Expr {
                kind: ExprKind::Slice {
                    value: Box::new(value),
                    lower: None,
                    upper,
                },
                span: Span { start, end },
            });
        }
        let first = self.parse_expr()?;
        if self.eat(&TokenKind::Colon) {
            let upper = if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect(&TokenKind::RBracket)?;
            let end = self.peek_pos();
            return Ok(Expr {
                kind: ExprKind::Slice {
                    value: Box::new(value),
                    lower: Some(Box::new(first)),
                    upper,
                },
                span: Span { start, end },
            });
        }
        self.expect(&TokenKind::RBracket)?;
        let end = self.peek_pos();
        Ok(Expr {
            kind: ExprKind::Index {
                value: Box::new(value),
                index: Box::new(first),
            },
            span: Span { start, end },
        })
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if let TokenKind::Ident(name) = self.peek().clone() {
                if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Eq) {
                    self.advance();
                    self.advance();
                    let value = self.parse_expr()?;
                    kwargs.push((name, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    continue;
                }
            }
            args.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let start = self.peek_pos();
        let tok = self.advance();
        let kind = match tok.kind {
            TokenKind::Int(n) => ExprKind::Int(n),
            TokenKind::Str(s) => ExprKind::Str(s),
            TokenKind::FString(s) => ExprKind::FString(parse_fstring_parts(&s)),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::None => ExprKind::None,
            TokenKind::Ident(name) => ExprKind::Ident(name),
            TokenKind::Lambda => {
                let mut params = Vec::new();
                while !self.check(&TokenKind::Colon) {
                    params.push(self.parse_param()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::Colon)?;
                let body = self.parse_expr()?;
                ExprKind::Lambda {
                    params,
                    body: Box::new(body),
                }
            }
            TokenKind::LParen => {
                if self.eat(&TokenKind::RParen) {
                    ExprKind::Tuple(vec![])
                } else {
                    let first = self.parse_expr()?;
                    if self.eat(&TokenKind::Comma) {
                        let mut items = vec![first];
                        while !self.check(&TokenKind::RParen) {
                            items.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen)?;
                        ExprKind::Tuple(items)
                    } else {
                        self.expect(&TokenKind::RParen)?;
                        first.kind
                    }
                }
            }
            TokenKind::LBracket => self.parse_list_or_comprehension()?,
            TokenKind::LBrace => self.parse_dict()?,
            other => {
                return Err(LangError::ParseError(
                    start,
                    format!("unexpected token {:?}", other),
                ))
            }
        };
        let end = self.peek_pos();
        Ok(Expr {
            kind,
            span: Span { start, end },
        })
    }

    fn parse_list_or_comprehension(&mut self) -> Result<ExprKind> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(ExprKind::List(vec![]));
        }
        let first = self.parse_expr()?;
        if matches!(self.peek(), TokenKind::For) {
            self.advance();
            let target = self.parse_atom()?;
            self.expect(&TokenKind::In)?;
            let iter = self.parse_expr()?;
            let condition = if self.eat(&TokenKind::If) {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            self.expect(&TokenKind::RBracket)?;
            return Ok(ExprKind::ListComp {
                element: Box::new(first),
                target: Box::new(target),
                iter: Box::new(iter),
                condition,
            });
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(ExprKind::List(items))
    }

    fn parse_dict(&mut self) -> Result<ExprKind> {
        let mut items = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = self.parse_expr()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            items.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(ExprKind::Dict(items))
    }
}

/// Splits an f-string body into literal/interpolation parts. Interpolation
/// is restricted to bare `{identifier}` per spec.md §6 — no expressions,
/// no format specs.
fn parse_fstring_parts(raw: &str) -> Vec<FStringPart> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            if chars.peek() == Some(&'{') {
                chars.next();
                literal.push('{');
                continue;
            }
            if !literal.is_empty() {
                parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
            }
            let mut ident = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                ident.push(c2);
            }
            parts.push(FStringPart::Interpolate(ident));
        } else if c == '}' && chars.peek() == Some(&'}') {
            chars.next();
            literal.push('}');
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignment_and_call() {
        let module = Parser::parse_str("x = glob([\"*.go\"])\n").unwrap();
        assert_eq!(module.statements.len(), 1);
        match &module.statements[0].kind {
            StatementKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Call { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_function_def_with_annotations() {
        let src = "def lib(name: str, deps: str|list & d = []):\n    pass\n";
        let module = Parser::parse_str(src).unwrap();
        match &module.statements[0].kind {
            StatementKind::FunctionDef { params, .. } => {
                assert_eq!(params.len(), 2);
                assert_eq!(params[1].alias.as_deref(), Some("d"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_if_elif_else() {
        let src = "if x:\n    pass\nelif y:\n    pass\nelse:\n    pass\n";
        let module = Parser::parse_str(src).unwrap();
        match &module.statements[0].kind {
            StatementKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_list_comprehension() {
        let module = Parser::parse_str("x = [y for y in z if y]\n").unwrap();
        match &module.statements[0].kind {
            StatementKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::ListComp { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_fstring_interpolation() {
        let module = Parser::parse_str("x = f\"{name}-{version}\"\n").unwrap();
        match &module.statements[0].kind {
            StatementKind::Assign { value, .. } => match &value.kind {
                ExprKind::FString(parts) => {
                    assert_eq!(parts.len(), 3);
                    assert_eq!(parts[0], FStringPart::Interpolate("name".to_string()));
                    assert_eq!(parts[1], FStringPart::Literal("-".to_string()));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
