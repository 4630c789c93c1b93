//! Syntax tree produced by the parser.

use std::collections::HashSet;
use std::rc::Rc;

pub type Block = Vec<Stmt>;

/// A parsed program.
#[derive(Debug, Clone)]
pub struct Module {
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Block)>,
        orelse: Block,
    },
    While {
        test: Expr,
        body: Block,
        orelse: Block,
    },
    For {
        target: Target,
        iter: Expr,
        body: Block,
        orelse: Block,
    },
    Def(Rc<FunctionDef>),
    Return(Option<Expr>),
    Assert {
        test: Expr,
        message: Option<Expr>,
    },
    Del(Vec<Target>),
    Global(Vec<String>),
    Import(String),
    Raise(Option<Expr>),
    Break,
    Continue,
    Pass,
}

#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Subscript { object: Expr, index: Expr },
    Attribute { object: Expr, name: String },
    Sequence(Vec<Target>),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    /// Names bound anywhere in the body; reads of these before assignment
    /// are unbound-local errors rather than outer lookups.
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
}

#[derive(Debug, Clone)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
    Star(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Debug, Clone)]
pub struct CompClause {
    pub target: Target,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Box<Expr>,
        conversion: Option<char>,
        spec: Vec<FStringPart>,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    FString(Vec<FStringPart>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Attribute {
        object: Box<Expr>,
        name: String,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Comprehension(Rc<Comprehension>),
}

/// List/set/dict comprehension or generator expression. Shared so a lazy
/// generator can keep evaluating it after the expression that built it.
#[derive(Debug)]
pub struct Comprehension {
    pub kind: CompKind,
    pub element: Expr,
    /// Value expression of a dict comprehension.
    pub value: Option<Expr>,
    pub clauses: Vec<CompClause>,
}

impl Expr {
    /// Short description used in "cannot assign to ..." diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Expr::Literal(_) | Expr::FString(_) => "literal",
            Expr::Call { .. } => "function call",
            Expr::BinOp { .. } | Expr::Unary { .. } => "expression",
            Expr::Compare { .. } => "comparison",
            Expr::And(..) | Expr::Or(..) => "expression",
            Expr::Lambda(_) => "lambda",
            Expr::IfElse { .. } => "conditional expression",
            Expr::Comprehension(_) => "comprehension",
            Expr::Dict(_) => "dict literal",
            Expr::Set(_) => "set display",
            _ => "expression",
        }
    }
}
