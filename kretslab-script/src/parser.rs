//! Recursive-descent parser for the sketch dialect.
//!
//! Function definitions are only accepted at the top level and are hoisted
//! into [`Program::functions`]. Both `function name(a, b)` and C-style typed
//! definitions (`void setup()`, `int add(int a, int b)`) are accepted; a
//! typed prototype ending in `;` is skipped.

use crate::ast::*;
use crate::error::Diagnostic;
use crate::lexer::{Span, SpannedToken, Token};

type PResult<T> = Result<T, Diagnostic>;

/// Statement and expression nesting accepted by the parser. Keeps both
/// parsing and evaluation of the deepest script within a 2 MiB stack.
pub const MAX_NESTING: usize = 64;

const TYPE_NAMES: &[&str] = &[
    "void", "int", "long", "short", "float", "double", "bool", "boolean", "char", "byte", "word",
    "String", "unsigned", "signed", "size_t", "uint8_t", "uint16_t", "uint32_t", "uint64_t",
    "int8_t", "int16_t", "int32_t", "int64_t", "auto",
];

const INTEGRAL_TYPES: &[&str] = &[
    "int", "long", "short", "byte", "word", "unsigned", "signed", "size_t", "uint8_t",
    "uint16_t", "uint32_t", "uint64_t", "int8_t", "int16_t", "int32_t", "int64_t",
];

fn is_type_name(name: &str) -> bool {
    TYPE_NAMES.contains(&name)
}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse(&mut self) -> PResult<Program> {
        let mut program = Program::default();

        while !self.is_at_end() {
            if self.at_function_def() {
                if let Some(function) = self.parse_function()? {
                    program.functions.push(function);
                }
            } else {
                program.statements.push(self.parse_stmt()?);
            }
        }

        Ok(program)
    }

    // ===== Functions =====

    fn at_function_def(&self) -> bool {
        if matches!(self.peek_token(), Some(Token::Function)) {
            return true;
        }
        let prefix = self.type_prefix_len(self.pos);
        prefix > 0
            && matches!(self.token_at(self.pos + prefix), Some(Token::Ident(_)))
            && matches!(self.token_at(self.pos + prefix + 1), Some(Token::LParen))
    }

    /// Returns `None` for a prototype such as `void blink(int pin);`.
    fn parse_function(&mut self) -> PResult<Option<FunctionDef>> {
        let span = self.current_span();
        if matches!(self.peek_token(), Some(Token::Function)) {
            self.advance();
        } else {
            self.skip_type_prefix();
        }
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let params = self.parse_params()?;

        if matches!(self.peek_token(), Some(Token::Semi)) {
            self.advance();
            return Ok(None);
        }

        let body = self.parse_block()?;
        Ok(Some(FunctionDef {
            name,
            params,
            body,
            span,
        }))
    }

    fn parse_params(&mut self) -> PResult<Vec<String>> {
        let mut params = Vec::new();

        if self.is_ident("void") && matches!(self.token_at(self.pos + 1), Some(Token::RParen)) {
            self.advance();
        }

        while !matches!(self.peek_token(), Some(Token::RParen)) {
            if matches!(self.peek_token(), Some(Token::Const)) {
                self.advance();
            }
            let prefix = self.type_prefix_len(self.pos);
            if prefix > 0 && matches!(self.token_at(self.pos + prefix), Some(Token::Ident(_))) {
                self.skip_type_prefix();
            }
            params.push(self.expect_ident()?);

            if matches!(self.peek_token(), Some(Token::Comma)) {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(Token::RParen)?;
        Ok(params)
    }

    // ===== Statements =====

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();

        while !matches!(self.peek_token(), Some(Token::RBrace)) && !self.is_at_end() {
            stmts.push(self.parse_stmt()?);
        }

        self.expect(Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        self.nested(|p| p.parse_stmt_inner())
    }

    fn parse_stmt_inner(&mut self) -> PResult<Stmt> {
        let span = self.current_span();
        let kind = match self.peek_token() {
            Some(Token::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(Token::Let) | Some(Token::Var) | Some(Token::Const) => {
                let kind = self.parse_decl()?;
                self.consume_semi()?;
                kind
            }
            Some(Token::Ident(_)) if self.at_typed_decl() => {
                let kind = self.parse_decl()?;
                self.consume_semi()?;
                kind
            }
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => {
                self.advance();
                let cond = self.parse_paren_expr()?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::While { cond, body }
            }
            Some(Token::Do) => {
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                self.expect(Token::While)?;
                let cond = self.parse_paren_expr()?;
                self.consume_semi()?;
                StmtKind::DoWhile { body, cond }
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Break) => {
                self.advance();
                self.consume_semi()?;
                StmtKind::Break
            }
            Some(Token::Continue) => {
                self.advance();
                self.consume_semi()?;
                StmtKind::Continue
            }
            Some(Token::Return) => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.consume_semi()?;
                StmtKind::Return(value)
            }
            Some(Token::Throw) => {
                self.advance();
                let value = self.parse_expr()?;
                self.consume_semi()?;
                StmtKind::Throw(value)
            }
            Some(Token::Semi) => {
                self.advance();
                StmtKind::Empty
            }
            Some(Token::Function) => {
                return Err(self.error("Functions can only be declared at the top level"))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.consume_semi()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, span })
    }

    fn at_typed_decl(&self) -> bool {
        let prefix = self.type_prefix_len(self.pos);
        prefix > 0 && matches!(self.token_at(self.pos + prefix), Some(Token::Ident(_)))
    }

    /// `let|var|const [type] a = 1, b` or `type a = 1, b`. Does not consume
    /// the trailing semicolon.
    fn parse_decl(&mut self) -> PResult<StmtKind> {
        let kind = match self.peek_token() {
            Some(Token::Let) => {
                self.advance();
                DeclKind::Let
            }
            Some(Token::Var) => {
                self.advance();
                DeclKind::Var
            }
            Some(Token::Const) => {
                self.advance();
                DeclKind::Const
            }
            _ => DeclKind::Let,
        };
        if self.at_typed_decl() {
            self.skip_type_prefix();
        }

        let mut declarators = Vec::new();
        loop {
            let name_span = self.current_span();
            let name = self.expect_ident()?;
            match self.peek_token() {
                Some(Token::LParen) => {
                    return Err(self.error("Functions can only be declared at the top level"))
                }
                Some(Token::LBracket) => return Err(self.error("Arrays are not supported")),
                _ => {}
            }

            let init = if matches!(self.peek_token(), Some(Token::Assign)) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(Diagnostic::new(
                    format!("Missing initializer in const declaration '{}'", name),
                    name_span.line,
                    name_span.col,
                ));
            }
            declarators.push(Declarator { name, init });

            if matches!(self.peek_token(), Some(Token::Comma)) {
                self.advance();
            } else {
                break;
            }
        }

        Ok(StmtKind::Decl { kind, declarators })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.expect(Token::If)?;
        let cond = self.parse_paren_expr()?;
        let then = Box::new(self.parse_stmt()?);

        let otherwise = if matches!(self.peek_token(), Some(Token::Else)) {
            self.advance();
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };

        Ok(StmtKind::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;

        let init = match self.peek_token() {
            Some(Token::Semi) => None,
            Some(Token::Let) | Some(Token::Var) | Some(Token::Const) => {
                let span = self.current_span();
                Some(Box::new(Stmt {
                    kind: self.parse_decl()?,
                    span,
                }))
            }
            Some(Token::Ident(_)) if self.at_typed_decl() => {
                let span = self.current_span();
                Some(Box::new(Stmt {
                    kind: self.parse_decl()?,
                    span,
                }))
            }
            _ => {
                let expr = self.parse_expr()?;
                Some(Box::new(Stmt {
                    span: expr.span,
                    kind: StmtKind::Expr(expr),
                }))
            }
        };
        self.expect(Token::Semi)?;

        let cond = if matches!(self.peek_token(), Some(Token::Semi)) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::Semi)?;

        let update = if matches!(self.peek_token(), Some(Token::RParen)) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::RParen)?;

        let body = Box::new(self.parse_stmt()?);
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn parse_paren_expr(&mut self) -> PResult<Expr> {
        self.expect(Token::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(Token::RParen)?;
        Ok(expr)
    }

    // ===== Expressions =====

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(|p| p.parse_assignment_inner())
    }

    fn parse_assignment_inner(&mut self) -> PResult<Expr> {
        let left = self.parse_conditional()?;

        let op = match self.peek_token() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(BinOp::Add),
            Some(Token::MinusAssign) => Some(BinOp::Sub),
            Some(Token::StarAssign) => Some(BinOp::Mul),
            Some(Token::SlashAssign) => Some(BinOp::Div),
            Some(Token::PercentAssign) => Some(BinOp::Rem),
            _ => return Ok(left),
        };

        let target = match left.kind {
            ExprKind::Ident(name) => name,
            _ => {
                return Err(Diagnostic::new(
                    "Invalid assignment target",
                    left.span.line,
                    left.span.col,
                ))
            }
        };
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::new(
            ExprKind::Assign {
                target,
                op,
                value: Box::new(value),
            },
            left.span,
        ))
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let cond = self.parse_logical_or()?;
        if !matches!(self.peek_token(), Some(Token::Question)) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_assignment()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_assignment()?;
        let span = cond.span;
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_logical_and()?;

        while matches!(self.peek_token(), Some(Token::OrOr)) {
            self.advance();
            let right = self.parse_logical_and()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;

        while matches!(self.peek_token(), Some(Token::AndAnd)) {
            self.advance();
            let right = self.parse_equality()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;

        while let Some(token) = self.peek_token() {
            let op = match token {
                Token::EqEq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::EqEqEq => BinOp::StrictEq,
                Token::NeEq => BinOp::StrictNe,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek_token() {
            let op = match token {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek_token() {
            let op = match token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek_token() {
            let op = match token {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        self.nested(|p| p.parse_unary_inner())
    }

    fn parse_unary_inner(&mut self) -> PResult<Expr> {
        let span = self.current_span();
        let op = match self.peek_token() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                let delta = if matches!(self.peek_token(), Some(Token::PlusPlus)) {
                    1.0
                } else {
                    -1.0
                };
                self.advance();
                let target = self.expect_update_target()?;
                return Ok(Expr::new(
                    ExprKind::Update {
                        target,
                        delta,
                        prefix: true,
                    },
                    span,
                ));
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let expr = self.parse_primary()?;

        let delta = match self.peek_token() {
            Some(Token::PlusPlus) => 1.0,
            Some(Token::MinusMinus) => -1.0,
            _ => return Ok(expr),
        };
        match expr.kind {
            ExprKind::Ident(target) => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Update {
                        target,
                        delta,
                        prefix: false,
                    },
                    expr.span,
                ))
            }
            _ => Err(self.error("Invalid update target")),
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.current_span();
        let token = match self.peek_token() {
            Some(token) => token.clone(),
            None => return Err(self.error("Unexpected end of input")),
        };

        let kind = match token {
            Token::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            Token::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            Token::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::Null => {
                self.advance();
                ExprKind::Null
            }
            Token::New => {
                self.advance();
                let name = self.expect_ident()?;
                let args = self.parse_args()?;
                ExprKind::Call {
                    callee: Callee::Function(name),
                    args,
                }
            }
            Token::Ident(name) => {
                self.advance();
                match self.peek_token() {
                    Some(Token::Dot) => {
                        self.advance();
                        let method = self.expect_ident()?;
                        if !matches!(self.peek_token(), Some(Token::LParen)) {
                            return Err(self.error(&format!(
                                "Property access is not supported: {}.{}",
                                name, method
                            )));
                        }
                        let args = self.parse_args()?;
                        ExprKind::Call {
                            callee: Callee::Method {
                                namespace: name,
                                name: method,
                            },
                            args,
                        }
                    }
                    Some(Token::LParen) => {
                        let args = self.parse_args()?;
                        ExprKind::Call {
                            callee: Callee::Function(name),
                            args,
                        }
                    }
                    _ => ExprKind::Ident(name),
                }
            }
            Token::LParen => return self.parse_paren_or_cast(),
            Token::LBracket => return Err(self.error("Arrays are not supported")),
            other => return Err(self.error(&format!("Unexpected {}", other.describe()))),
        };

        Ok(Expr::new(kind, span))
    }

    fn parse_paren_or_cast(&mut self) -> PResult<Expr> {
        let span = self.current_span();
        let prefix = self.type_prefix_len(self.pos + 1);
        if prefix > 0 && matches!(self.token_at(self.pos + 1 + prefix), Some(Token::RParen)) {
            let integral = matches!(
                self.token_at(self.pos + 1),
                Some(Token::Ident(name)) if INTEGRAL_TYPES.contains(&name.as_str())
            );
            self.pos += prefix + 2;
            let expr = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Cast {
                    integral,
                    expr: Box::new(expr),
                },
                span,
            ));
        }

        self.expect(Token::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(Token::RParen)?;
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();

        while !matches!(self.peek_token(), Some(Token::RParen)) {
            args.push(self.parse_assignment()?);
            if matches!(self.peek_token(), Some(Token::Comma)) {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(Token::RParen)?;
        Ok(args)
    }

    // ===== Helper Methods =====

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Number of tokens starting at `from` that spell a C type, e.g.
    /// `unsigned long` or `char*`. Zero when there is none.
    fn type_prefix_len(&self, from: usize) -> usize {
        let mut i = from;
        let mut names = 0;
        loop {
            match self.token_at(i) {
                Some(Token::Ident(name)) if is_type_name(name) => names += 1,
                Some(Token::Star) if names > 0 => {}
                _ => break,
            }
            i += 1;
        }
        if names == 0 {
            0
        } else {
            i - from
        }
    }

    fn skip_type_prefix(&mut self) {
        self.pos += self.type_prefix_len(self.pos);
    }

    fn expect_update_target(&mut self) -> PResult<String> {
        match self.peek_token() {
            Some(Token::Ident(_)) => self.expect_ident(),
            _ => Err(self.error("Invalid update target")),
        }
    }

    /// Accepts `;`, or an implied semicolon before `}`, end of input or a
    /// line break.
    fn consume_semi(&mut self) -> PResult<()> {
        if matches!(self.peek_token(), Some(Token::Semi)) {
            self.advance();
            return Ok(());
        }
        if self.at_statement_end() {
            return Ok(());
        }
        Err(self.error(&format!("Expected ';' but found {}", self.found())))
    }

    fn at_statement_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(st) => {
                matches!(st.token, Token::Semi | Token::RBrace)
                    || st.span.line > self.prev_span().line
            }
        }
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek_token(), Some(Token::Ident(n)) if n == name)
    }

    fn token_at(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index).map(|st| &st.token)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.token_at(self.pos)
    }

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some(st) => st.span,
            None => self.end_span(),
        }
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|st| st.span)
            .unwrap_or_default()
    }

    /// Position just past the last token.
    fn end_span(&self) -> Span {
        match self.tokens.last() {
            Some(st) => Span::new(
                st.span.end,
                st.span.end,
                st.span.line,
                st.span.col + (st.span.end - st.span.start),
            ),
            None => Span::new(0, 0, 1, 1),
        }
    }

    fn advance(&mut self) -> Option<&SpannedToken> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn found(&self) -> String {
        match self.peek_token() {
            Some(token) => token.describe(),
            None => "end of input".to_string(),
        }
    }

    fn expect(&mut self, expected: Token) -> PResult<()> {
        match self.peek_token() {
            Some(token) if std::mem::discriminant(token) == std::mem::discriminant(&expected) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(&format!(
                "Expected {} but found {}",
                expected.describe(),
                self.found()
            ))),
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek_token() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!("Expected identifier but found {}", self.found()))),
        }
    }

    fn error(&self, message: &str) -> Diagnostic {
        let span = self.current_span();
        Diagnostic::new(message, span.line, span.col)
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}
