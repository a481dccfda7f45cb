//! AST for the restricted BUILD-language grammar (spec.md §6).
//!
//! No classes, exceptions, `while`, `import`, or user-defined `*args`/
//! `**kwargs` — the grammar is deliberately small. Every node carries a
//! `Span` for error reporting, mirroring the teacher's `ast::types` shape.

use super::lexer::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Expr(Expr),
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Statement>)>,
        orelse: Vec<Statement>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Statement>,
    },
    FunctionDef {
        name: String,
        params: Vec<Param>,
        body: Vec<Statement>,
    },
    Return(Option<Expr>),
    Assert {
        test: Expr,
        message: Option<Expr>,
    },
    Pass,
}

/// `name: type1|type2 & alias = default` (spec.md §6 argument annotations).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub types: Vec<String>,
    pub alias: Option<String>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Str(String),
    FString(Vec<FStringPart>),
    Bool(bool),
    None,
    Ident(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Tuple(Vec<Expr>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    UnaryNot(Box<Expr>),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    ListComp {
        element: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
    },
    IfElse {
        body: Box<Expr>,
        test: Box<Expr>,
        orelse: Box<Expr>,
    },
}

/// A literal chunk or a bare-identifier interpolation inside an f-string.
/// Per spec.md §6, interpolation is restricted to bare identifiers — no
/// arbitrary expressions inside `{}`.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Interpolate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    In,
    NotIn,
}
