//! Recursive-descent parser for the learner's language subset.
//!
//! Statement forms outside the subset (`try`, `class`, `with`, ...) are
//! rejected at parse time so the learner sees the problem before anything
//! runs.

use super::ast::*;
use super::error::SyntaxFault;
use super::lexer::{tokenize, Tok, Token};
use std::collections::HashSet;
use std::rc::Rc;

type PResult<T> = Result<T, SyntaxFault>;

/// Combined limit on bracket nesting and operator chains. Keeps the
/// tree shallow enough for the tree-walking evaluator.
const MAX_DEPTH: usize = 200;
const MAX_BLOCK_DEPTH: usize = 100;

const UNSUPPORTED: &[&str] = &[
    "try", "except", "finally", "class", "with", "async", "await", "yield", "nonlocal",
];

const STARRED_TARGET: &str = "starred assignment targets are not supported here";

pub fn parse(source: &str) -> PResult<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    blocks: usize,
    loops: usize,
    functions: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            blocks: 0,
            loops: 0,
            functions: 0,
        }
    }

    // ---- token helpers ----

    fn token(&self) -> &Token {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn peek(&self) -> &Tok {
        &self.token().tok
    }

    fn peek_ahead(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.token().line
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxFault {
        SyntaxFault::new(self.line(), message)
    }

    fn expect_op(&mut self, op: &str, message: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    /// Closing bracket of a display or call; a following expression
    /// almost always means a forgotten comma.
    fn expect_close(&mut self, close: &str) -> PResult<()> {
        if self.eat_op(close) {
            return Ok(());
        }
        if starts_expr(self.peek()) {
            Err(self.error("invalid syntax. Perhaps you forgot a comma?"))
        } else {
            Err(self.error("invalid syntax"))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", other.describe()))),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::EndOfFile)
    }

    fn expect_line_end(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::EndOfFile => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn enter(&mut self, message: &str) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(message));
        }
        Ok(())
    }

    // ---- statements ----

    fn parse_module(&mut self) -> PResult<Module> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::EndOfFile => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Dedent => return Err(self.error("invalid syntax")),
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(Module { body })
    }

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        match self.peek() {
            Tok::Indent => Err(self.error("unexpected indent")),
            Tok::Keyword("if") => Ok(vec![self.parse_if()?]),
            Tok::Keyword("while") => Ok(vec![self.parse_while()?]),
            Tok::Keyword("for") => Ok(vec![self.parse_for()?]),
            Tok::Keyword("def") => Ok(vec![self.parse_def()?]),
            Tok::Keyword(kw) if UNSUPPORTED.contains(kw) => Err(self.error(format!(
                "'{}' statements are not supported here",
                kw
            ))),
            _ => self.parse_simple_line(),
        }
    }

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_stmt()?];
        while self.eat_op(";") {
            if self.at_line_end() {
                break;
            }
            stmts.push(self.parse_small_stmt()?);
        }
        self.expect_line_end()?;
        Ok(stmts)
    }

    fn parse_suite(&mut self, context: &str, header_line: usize) -> PResult<Block> {
        if !self.eat_op(":") {
            if self.check_op("=") {
                return Err(self.error("invalid syntax. Maybe you meant '==' instead of '='?"));
            }
            return Err(self.error("expected ':'"));
        }
        if !matches!(self.peek(), Tok::Newline) {
            if let Tok::Keyword(kw @ ("if" | "for" | "while" | "def")) = self.peek() {
                return Err(self.error(format!("'{}' must start on its own line", kw)));
            }
            return self.parse_simple_line();
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error(format!(
                "expected an indented block after {} on line {}",
                context, header_line
            )));
        }
        self.pos += 1;

        self.blocks += 1;
        if self.blocks > MAX_BLOCK_DEPTH {
            return Err(self.error("too many statically nested blocks"));
        }
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::EndOfFile => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        self.blocks -= 1;
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let test = self.parse_test()?;
        let body = self.parse_suite("'if' statement", line)?;
        let mut branches = vec![(test, body)];
        let mut orelse = Vec::new();
        loop {
            if self.check_kw("elif") {
                let elif_line = self.advance().line;
                let test = self.parse_test()?;
                let body = self.parse_suite("'elif' statement", elif_line)?;
                branches.push((test, body));
            } else if self.check_kw("else") {
                let else_line = self.advance().line;
                orelse = self.parse_suite("'else' statement", else_line)?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            line,
            kind: StmtKind::If { branches, orelse },
        })
    }

    fn parse_loop_else(&mut self) -> PResult<Block> {
        if self.check_kw("else") {
            let line = self.advance().line;
            self.parse_suite("'else' statement", line)
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let test = self.parse_test()?;
        self.loops += 1;
        let body = self.parse_suite("'while' statement", line)?;
        self.loops -= 1;
        let orelse = self.parse_loop_else()?;
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let target = self.parse_target_list()?;
        if !self.eat_kw("in") {
            return Err(self.error("invalid syntax: expected 'in' in for statement"));
        }
        let iter = self.parse_testlist()?;
        self.loops += 1;
        let body = self.parse_suite("'for' statement", line)?;
        self.loops -= 1;
        let orelse = self.parse_loop_else()?;
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn parse_def(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        self.expect_op("(", "expected '('")?;
        let params = self.parse_params(")")?;
        if self.eat_op("->") {
            self.parse_test()?;
        }

        let saved_loops = std::mem::replace(&mut self.loops, 0);
        self.functions += 1;
        let body = self.parse_suite("function definition", line)?;
        self.functions -= 1;
        self.loops = saved_loops;

        let (locals, globals) = collect_scope(&params, &body);
        Ok(Stmt {
            line,
            kind: StmtKind::Def(Rc::new(FunctionDef {
                name,
                params,
                body,
                locals,
                globals,
            })),
        })
    }

    fn parse_params(&mut self, close: &str) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check_op(close) {
            if self.check_op("*") || self.check_op("**") {
                return Err(self.error("variadic parameters are not supported"));
            }
            let name = self.expect_name()?;
            if close == ")" && self.eat_op(":") {
                self.parse_test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.parse_test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!(
                    "duplicate argument '{}' in function definition",
                    name
                )));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        if close == ")" {
            self.expect_close(")")?;
        } else {
            self.expect_op(close, "expected ':'")?;
        }
        Ok(params)
    }

    fn parse_small_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Keyword("pass") => {
                self.pos += 1;
                StmtKind::Pass
            }
            Tok::Keyword("break") => {
                self.pos += 1;
                if self.loops == 0 {
                    return Err(SyntaxFault::new(line, "'break' outside loop"));
                }
                StmtKind::Break
            }
            Tok::Keyword("continue") => {
                self.pos += 1;
                if self.loops == 0 {
                    return Err(SyntaxFault::new(line, "'continue' not properly in loop"));
                }
                StmtKind::Continue
            }
            Tok::Keyword("return") => {
                self.pos += 1;
                if self.functions == 0 {
                    return Err(SyntaxFault::new(line, "'return' outside function"));
                }
                if self.at_line_end() || self.check_op(";") {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist()?))
                }
            }
            Tok::Keyword("raise") => {
                self.pos += 1;
                if self.at_line_end() || self.check_op(";") {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.parse_test()?))
                }
            }
            Tok::Keyword("global") => {
                self.pos += 1;
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            Tok::Keyword("del") => {
                self.pos += 1;
                let expr = self.parse_testlist()?;
                match self.to_target(expr, line)? {
                    Target::Sequence(targets) => StmtKind::Del(targets),
                    target => StmtKind::Del(vec![target]),
                }
            }
            Tok::Keyword("assert") => {
                self.pos += 1;
                let test = self.parse_test()?;
                let message = if self.eat_op(",") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, message }
            }
            Tok::Keyword("import") | Tok::Keyword("from") => self.parse_import()?,
            Tok::Keyword(kw) if UNSUPPORTED.contains(kw) => {
                return Err(self.error(format!("'{}' statements are not supported here", kw)))
            }
            _ => self.parse_expr_stmt()?,
        };
        Ok(Stmt { line, kind })
    }

    fn parse_import(&mut self) -> PResult<StmtKind> {
        self.pos += 1;
        let module = self.parse_dotted_name()?;
        // The rest of the statement only names what to bind; the import
        // itself fails when it runs.
        while !self.at_line_end() && !self.check_op(";") {
            self.pos += 1;
        }
        Ok(StmtKind::Import(module))
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_expr_stmt(&mut self) -> PResult<StmtKind> {
        let line = self.line();
        if self.check_op("*") {
            return Err(self.error(STARRED_TARGET));
        }
        let first = self.parse_testlist()?;
        // `a, *rest = ...`: the tuple stops at the star.
        if self.check_op("*") && matches!(first, Expr::Tuple(_)) {
            return Err(self.error(STARRED_TARGET));
        }

        if let Some(op) = aug_op(self.peek()) {
            self.pos += 1;
            let target = self.to_target(first, line)?;
            if matches!(target, Target::Sequence(_)) {
                return Err(SyntaxFault::new(
                    line,
                    "'tuple' is an illegal expression for augmented assignment",
                ));
            }
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.check_op(":")
            && matches!(
                first,
                Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. }
            )
        {
            self.pos += 1;
            self.parse_test()?;
            if self.eat_op("=") {
                let target = self.to_target(first, line)?;
                let value = self.parse_testlist()?;
                return Ok(StmtKind::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        if self.check_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.parse_testlist()?);
            }
            let value = exprs.pop().ok_or_else(|| self.error("invalid syntax"))?;
            let targets = exprs
                .into_iter()
                .map(|e| self.to_target(e, line))
                .collect::<PResult<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        if let Expr::Name(name) = &first {
            if name == "print" && matches!(self.peek(), Tok::Str(_) | Tok::FStr(_) | Tok::Name(_) | Tok::Int(_)) {
                return Err(SyntaxFault::new(
                    line,
                    "Missing parentheses in call to 'print'. Did you mean print(...)?",
                ));
            }
        }
        Ok(StmtKind::Expr(first))
    }

    fn to_target(&self, expr: Expr, line: usize) -> PResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { object, index } => Ok(Target::Subscript {
                object: *object,
                index: *index,
            }),
            Expr::Attribute { object, name } => Ok(Target::Attribute {
                object: *object,
                name,
            }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Sequence(
                items
                    .into_iter()
                    .map(|e| self.to_target(e, line))
                    .collect::<PResult<Vec<_>>>()?,
            )),
            Expr::Literal(Literal::None) => Err(SyntaxFault::new(line, "cannot assign to None")),
            Expr::Literal(Literal::Bool(b)) => Err(SyntaxFault::new(
                line,
                format!("cannot assign to {}", if b { "True" } else { "False" }),
            )),
            other => Err(SyntaxFault::new(
                line,
                format!("cannot assign to {}", other.describe()),
            )),
        }
    }

    /// Loop targets stop below comparisons so `in` is left for the caller.
    fn parse_target_list(&mut self) -> PResult<Target> {
        let line = self.line();
        let first = self.parse_target_item()?;
        let expr = if self.check_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.check_kw("in") {
                    break;
                }
                items.push(self.parse_target_item()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.to_target(expr, line)
    }

    fn parse_target_item(&mut self) -> PResult<Expr> {
        if self.check_op("*") {
            return Err(self.error(STARRED_TARGET));
        }
        self.parse_bitor()
    }

    // ---- expressions ----

    fn parse_testlist(&mut self) -> PResult<Expr> {
        let first = self.parse_test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !starts_expr(self.peek()) {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_test(&mut self) -> PResult<Expr> {
        self.enter("too many nested parentheses")?;
        let result = self.parse_test_inner();
        self.depth -= 1;
        result
    }

    fn parse_test_inner(&mut self) -> PResult<Expr> {
        if self.check_kw("lambda") {
            return self.parse_lambda();
        }
        let expr = self.parse_or()?;
        if self.eat_kw("if") {
            let test = self.parse_or()?;
            if !self.eat_kw("else") {
                return Err(self.error("expected 'else' after 'if' expression"));
            }
            let orelse = self.parse_test()?;
            return Ok(Expr::IfElse {
                test: Box::new(test),
                body: Box::new(expr),
                orelse: Box::new(orelse),
            });
        }
        Ok(expr)
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let line = self.advance().line;
        let params = self.parse_params(":")?;
        let saved_loops = std::mem::replace(&mut self.loops, 0);
        let value = self.parse_test()?;
        self.loops = saved_loops;
        let body = vec![Stmt {
            line,
            kind: StmtKind::Return(Some(value)),
        }];
        let (locals, globals) = collect_scope(&params, &body);
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body,
            locals,
            globals,
        })))
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mark = self.depth;
        let mut left = self.parse_and()?;
        while self.eat_kw("or") {
            self.enter("expression too complex")?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mark = self.depth;
        let mut left = self.parse_not()?;
        while self.eat_kw("and") {
            self.enter("expression too complex")?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            self.enter("expression too complex")?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let first = self.parse_bitor()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("not") if matches!(self.peek_ahead(1), Some(Tok::Keyword("in"))) => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Keyword("is") => {
                    if matches!(self.peek_ahead(1), Some(Tok::Keyword("not"))) {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.parse_bitor()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_binary(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        ops: &[(&str, BinOp)],
    ) -> PResult<Expr> {
        let mark = self.depth;
        let mut left = next(self)?;
        loop {
            let Some(op) = ops.iter().find_map(|(sym, op)| self.check_op(sym).then_some(*op))
            else {
                break;
            };
            self.pos += 1;
            self.enter("expression too complex")?;
            let right = next(self)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary(Self::parse_bitxor, &[("|", BinOp::BitOr)])
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary(Self::parse_bitand, &[("^", BinOp::BitXor)])
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary(Self::parse_shift, &[("&", BinOp::BitAnd)])
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary(
            Self::parse_arith,
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
        )
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.parse_binary(Self::parse_term, &[("+", BinOp::Add), ("-", BinOp::Sub)])
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.parse_binary(
            Self::parse_factor,
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
        )
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            Tok::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_power();
        };
        self.pos += 1;
        self.enter("expression too complex")?;
        let operand = self.parse_factor()?;
        self.depth -= 1;
        // Fold negative literals so `-9223372036854775808` style constants
        // and plain `-1` don't cost an evaluation step.
        if op == UnaryOp::Neg {
            match operand {
                Expr::Literal(Literal::Int(i)) if i != i64::MIN => {
                    return Ok(Expr::Literal(Literal::Int(-i)))
                }
                Expr::Literal(Literal::Float(f)) => return Ok(Expr::Literal(Literal::Float(-f))),
                _ => {}
            }
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_primary()?;
        if self.eat_op("**") {
            self.enter("expression too complex")?;
            let exponent = self.parse_factor()?;
            self.depth -= 1;
            return Ok(Expr::BinOp {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let mark = self.depth;
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_op("(") {
                self.enter("expression too complex")?;
                let args = self.parse_call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                self.enter("expression too complex")?;
                let index = self.parse_subscript()?;
                expr = Expr::Subscript {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                self.enter("expression too complex")?;
                let name = self.expect_name()?;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }
        self.depth = mark;
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.check_op(")") {
            if self.eat_op("*") {
                args.push(Arg::Star(self.parse_test()?));
            } else if self.check_op("**") {
                return Err(self.error("'**' arguments are not supported"));
            } else if matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_ahead(1), Some(Tok::Op("=")))
            {
                let name = self.expect_name()?;
                self.pos += 1;
                let value = self.parse_test()?;
                if args
                    .iter()
                    .any(|a| matches!(a, Arg::Keyword(existing, _) if *existing == name))
                {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                args.push(Arg::Keyword(name, value));
                seen_keyword = true;
            } else {
                let expr = self.parse_test()?;
                if self.check_kw("for") {
                    let generator = self.parse_comprehension(CompKind::Generator, expr, None)?;
                    if !args.is_empty() || !self.check_op(")") {
                        return Err(self.error("Generator expression must be parenthesized"));
                    }
                    args.push(Arg::Positional(generator));
                    break;
                }
                if seen_keyword {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(Arg::Positional(expr));
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_close(")")?;
        Ok(args)
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let first = self.parse_slice_item()?;
        let index = if self.check_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.check_op("]") {
                    break;
                }
                items.push(self.parse_slice_item()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.expect_close("]")?;
        Ok(index)
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let lower = if self.check_op(":") {
            None
        } else {
            let expr = self.parse_test()?;
            if !self.check_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":", "invalid syntax")?;
        let slice_end = |p: &Self| p.check_op(":") || p.check_op("]") || p.check_op(",");
        let upper = if slice_end(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat_op(":") {
            if self.check_op("]") || self.check_op(",") {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_comprehension(
        &mut self,
        kind: CompKind,
        element: Expr,
        value: Option<Expr>,
    ) -> PResult<Expr> {
        let mut clauses = Vec::new();
        while self.eat_kw("for") {
            let target = self.parse_target_list()?;
            self.expect_kw("in")?;
            let iter = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.parse_or()?);
            }
            clauses.push(CompClause {
                target,
                iter,
                conditions,
            });
        }
        Ok(Expr::Comprehension(Rc::new(Comprehension {
            kind,
            element,
            value,
            clauses,
        })))
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let token = self.token().clone();
        match token.tok {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(Expr::Name(name))
            }
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.parse_strings(),
            Tok::Keyword("None") => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::None))
            }
            Tok::Keyword("True") => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Tok::Keyword("False") => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Tok::Op("(") => {
                self.pos += 1;
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.check_kw("for") {
                    let generator = self.parse_comprehension(CompKind::Generator, first, None)?;
                    self.expect_close(")")?;
                    return Ok(generator);
                }
                if !self.check_op(",") {
                    self.expect_close(")")?;
                    return Ok(first);
                }
                let items = self.parse_display_items(first, ")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.pos += 1;
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.check_kw("for") {
                    let comp = self.parse_comprehension(CompKind::List, first, None)?;
                    self.expect_close("]")?;
                    return Ok(comp);
                }
                let items = self.parse_display_items(first, "]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.pos += 1;
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.eat_op(":") {
                    let value = self.parse_test()?;
                    if self.check_kw("for") {
                        let comp = self.parse_comprehension(CompKind::Dict, first, Some(value))?;
                        self.expect_close("}")?;
                        return Ok(comp);
                    }
                    let mut pairs = vec![(first, value)];
                    while self.eat_op(",") {
                        if self.check_op("}") {
                            break;
                        }
                        let key = self.parse_test()?;
                        self.expect_op(":", "':' expected after dictionary key")?;
                        pairs.push((key, self.parse_test()?));
                    }
                    self.expect_close("}")?;
                    return Ok(Expr::Dict(pairs));
                }
                if self.check_kw("for") {
                    let comp = self.parse_comprehension(CompKind::Set, first, None)?;
                    self.expect_close("}")?;
                    return Ok(comp);
                }
                let items = self.parse_display_items(first, "}")?;
                Ok(Expr::Set(items))
            }
            Tok::Indent => Err(self.error("unexpected indent")),
            Tok::Keyword(kw) if UNSUPPORTED.contains(&kw) => {
                Err(self.error(format!("'{}' is not supported here", kw)))
            }
            Tok::Op("*") => Err(self.error("starred expressions are not supported here")),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn parse_display_items(&mut self, first: Expr, close: &str) -> PResult<Vec<Expr>> {
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(close) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect_close(close)?;
        Ok(items)
    }

    /// Adjacent literals concatenate; any f-string among them turns the
    /// whole run into an f-string.
    fn parse_strings(&mut self) -> PResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut plain = String::new();
        let mut formatted = false;
        loop {
            let token = self.token().clone();
            match token.tok {
                Tok::Str(s) => {
                    plain.push_str(&s);
                }
                Tok::FStr(s) => {
                    formatted = true;
                    if !plain.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut plain)));
                    }
                    parts.extend(parse_fstring(&s, token.line, 0)?);
                }
                _ => break,
            }
            self.pos += 1;
        }
        if !formatted {
            return Ok(Expr::Literal(Literal::Str(Rc::from(plain.as_str()))));
        }
        if !plain.is_empty() {
            parts.push(FStringPart::Literal(plain));
        }
        Ok(Expr::FString(parts))
    }
}

fn starts_expr(tok: &Tok) -> bool {
    match tok {
        Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
        Tok::Keyword(kw) => matches!(*kw, "None" | "True" | "False" | "not" | "lambda"),
        Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~"),
        _ => false,
    }
}

fn aug_op(tok: &Tok) -> Option<BinOp> {
    let Tok::Op(op) = tok else { return None };
    Some(match *op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        _ => return None,
    })
}

/// Names a function body binds (making them local) and names it declares global.
fn collect_scope(params: &[Param], body: &Block) -> (HashSet<String>, HashSet<String>) {
    let mut locals: HashSet<String> = params.iter().map(|p| p.name.clone()).collect();
    let mut globals = HashSet::new();
    scan_block(body, &mut locals, &mut globals);
    for name in &globals {
        locals.remove(name);
    }
    (locals, globals)
}

fn scan_block(block: &Block, locals: &mut HashSet<String>, globals: &mut HashSet<String>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    bind_target(target, locals);
                }
            }
            StmtKind::AugAssign { target, .. } => bind_target(target, locals),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                bind_target(target, locals);
                scan_block(body, locals, globals);
                scan_block(orelse, locals, globals);
            }
            StmtKind::While { body, orelse, .. } => {
                scan_block(body, locals, globals);
                scan_block(orelse, locals, globals);
            }
            StmtKind::If { branches, orelse } => {
                for (_, body) in branches {
                    scan_block(body, locals, globals);
                }
                scan_block(orelse, locals, globals);
            }
            StmtKind::Def(def) => {
                locals.insert(def.name.clone());
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    bind_target(target, locals);
                }
            }
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            _ => {}
        }
    }
}

fn bind_target(target: &Target, locals: &mut HashSet<String>) {
    match target {
        Target::Name(name) => {
            locals.insert(name.clone());
        }
        Target::Sequence(items) => {
            for item in items {
                bind_target(item, locals);
            }
        }
        Target::Subscript { .. } | Target::Attribute { .. } => {}
    }
}

// ---- f-strings ----

const MAX_FSTRING_NESTING: usize = 2;

fn parse_fstring(text: &str, line: usize, nesting: usize) -> PResult<Vec<FStringPart>> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let (field, next) = parse_fstring_field(&chars, i + 1, line, nesting)?;
                parts.extend(field);
                i = next;
            }
            '}' => return Err(SyntaxFault::new(line, "f-string: single '}' is not allowed")),
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

fn parse_fstring_field(
    chars: &[char],
    start: usize,
    line: usize,
    nesting: usize,
) -> PResult<(Vec<FStringPart>, usize)> {
    if nesting >= MAX_FSTRING_NESTING {
        return Err(SyntaxFault::new(line, "f-string: expressions nested too deeply"));
    }

    let mut i = start;
    let mut brackets = 0usize;
    let mut quote: Option<char> = None;
    let mut expr_end = None;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => brackets += 1,
            ')' | ']' | '}' if brackets > 0 => brackets -= 1,
            '}' | ':' if brackets == 0 => {
                expr_end = Some(i);
                break;
            }
            '!' if brackets == 0 && chars.get(i + 1) != Some(&'=') => {
                expr_end = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let Some(end) = expr_end else {
        return Err(SyntaxFault::new(line, "f-string: expecting '}'"));
    };

    let raw: String = chars[start..end].iter().collect();
    let trimmed = raw.trim_end();
    let debug = trimmed.ends_with('=')
        && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op));
    let expr_text = if debug {
        &trimmed[..trimmed.len() - 1]
    } else {
        raw.as_str()
    };
    if expr_text.trim().is_empty() {
        return Err(SyntaxFault::new(line, "f-string: valid expression required before '}'"));
    }
    let expr = parse_embedded_expression(expr_text.trim(), line)?;

    let mut i = end;
    let mut conversion = None;
    if chars[i] == '!' {
        match chars.get(i + 1) {
            Some('r') | Some('a') => conversion = Some('r'),
            Some('s') => conversion = Some('s'),
            _ => {
                return Err(SyntaxFault::new(
                    line,
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                ))
            }
        }
        i += 2;
    }

    let mut spec = Vec::new();
    if chars.get(i) == Some(&':') {
        let spec_start = i + 1;
        let mut j = spec_start;
        let mut nested = 0usize;
        while j < chars.len() {
            match chars[j] {
                '{' => nested += 1,
                '}' if nested == 0 => break,
                '}' => nested -= 1,
                _ => {}
            }
            j += 1;
        }
        let spec_text: String = chars[spec_start..j].iter().collect();
        spec = parse_fstring(&spec_text, line, nesting + 1)?;
        i = j;
    }

    if chars.get(i) != Some(&'}') {
        return Err(SyntaxFault::new(line, "f-string: expecting '}'"));
    }

    let mut parts = Vec::new();
    if debug {
        parts.push(FStringPart::Literal(raw.clone()));
        if conversion.is_none() && spec.is_empty() {
            conversion = Some('r');
        }
    }
    parts.push(FStringPart::Field {
        expr: Box::new(expr),
        conversion,
        spec,
    });
    Ok((parts, i + 1))
}

fn parse_embedded_expression(text: &str, line: usize) -> PResult<Expr> {
    let relocate = |fault: SyntaxFault| SyntaxFault::new(line, format!("f-string: {}", fault.message));
    let tokens = tokenize(text).map_err(relocate)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_testlist().map_err(relocate)?;
    parser.expect_line_end().map_err(relocate)?;
    if !matches!(parser.peek(), Tok::EndOfFile) {
        return Err(SyntaxFault::new(line, "f-string: invalid syntax"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(source: &str) -> SyntaxFault {
        parse(source).unwrap_err()
    }

    #[test]
    fn test_parses_loops_and_functions() {
        let module = parse(
            "total = 0\nfor i, item in enumerate(items):\n    total += item\nelse:\n    pass\n\ndef f(a, b=2):\n    return a + b\n",
        )
        .unwrap();
        assert_eq!(module.body.len(), 3);
        let StmtKind::Def(def) = &module.body[2].kind else {
            panic!("expected def");
        };
        assert_eq!(def.params.len(), 2);
        assert!(def.locals.contains("a"));
    }

    #[test]
    fn test_locals_and_globals_collected() {
        let module = parse("def f():\n    global g\n    g = 1\n    x = 2\n    for k in y:\n        pass\n").unwrap();
        let StmtKind::Def(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert!(def.locals.contains("x"));
        assert!(def.locals.contains("k"));
        assert!(!def.locals.contains("g"));
        assert!(def.globals.contains("g"));
    }

    #[test]
    fn test_missing_colon() {
        let fault = err("for x in range(5)\n    print(x)\n");
        assert_eq!(fault.line, 1);
        assert_eq!(fault.message, "expected ':'");
    }

    #[test]
    fn test_missing_indented_block() {
        let fault = err("for x in range(3):\nprint(x)\n");
        assert_eq!(fault.line, 2);
        assert_eq!(
            fault.message,
            "expected an indented block after 'for' statement on line 1"
        );
    }

    #[test]
    fn test_unexpected_indent() {
        let fault = err("x = 1\n    y = 2\n");
        assert_eq!(fault.line, 2);
        assert_eq!(fault.message, "unexpected indent");
    }

    #[test]
    fn test_invalid_targets() {
        assert_eq!(err("f() = 1\n").message, "cannot assign to function call");
        assert_eq!(err("None = 1\n").message, "cannot assign to None");
    }

    #[test]
    fn test_starred_targets_named_as_unsupported() {
        for source in [
            "a, *b = [1, 2, 3]\n",
            "*a, b = [1, 2, 3]\n",
            "for first, *rest in [[1, 2]]:\n    pass\n",
        ] {
            let fault = err(source);
            assert_eq!(fault.line, 1);
            assert_eq!(fault.message, "starred assignment targets are not supported here");
        }
        assert_eq!(
            err("x = [*y]\n").message,
            "starred expressions are not supported here"
        );
    }

    #[test]
    fn test_flow_statements_outside_context() {
        assert_eq!(err("break\n").message, "'break' outside loop");
        assert_eq!(err("return 1\n").message, "'return' outside function");
        assert!(parse("def f():\n    for x in y:\n        return x\n").is_ok());
    }

    #[test]
    fn test_unsupported_statements_rejected() {
        let fault = err("try:\n    x = 1\nexcept:\n    pass\n");
        assert_eq!(fault.message, "'try' statements are not supported here");
    }

    #[test]
    fn test_comprehensions_and_generators() {
        assert!(parse("squares = [x * x for x in range(10) if x % 2 == 0]\n").is_ok());
        assert!(parse("d = {k: v for k, v in pairs}\n").is_ok());
        assert!(parse("print(sum(x for x in nums))\n").is_ok());
        assert!(parse("s = {c for c in word}\n").is_ok());
    }

    #[test]
    fn test_fstring_fields() {
        let module = parse("print(f\"{name!r:>10} has {count:{width}d} items {x=}\")\n").unwrap();
        let StmtKind::Expr(Expr::Call { args, .. }) = &module.body[0].kind else {
            panic!("expected call");
        };
        let Arg::Positional(Expr::FString(parts)) = &args[0] else {
            panic!("expected f-string");
        };
        assert!(parts
            .iter()
            .any(|p| matches!(p, FStringPart::Field { conversion: Some('r'), .. })));
        assert!(parts
            .iter()
            .any(|p| matches!(p, FStringPart::Literal(s) if s == "x=")));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("x = {}1{}\n", "(".repeat(300), ")".repeat(300));
        let fault = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || err(&source))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(fault.message, "too many nested parentheses");
    }

    #[test]
    fn test_print_statement_hint() {
        let fault = err("print \"hello\"\n");
        assert!(fault.message.starts_with("Missing parentheses in call to 'print'"));
    }
}
