//! Static validation of a script.
//!
//! `compile` never executes user code. It reports, in order: every lexical
//! error, every unmatched delimiter, the first syntax error, then every
//! structural problem (`break`/`continue` outside a loop, `return` outside a
//! function, duplicate function definitions).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{FunctionDef, Program, Stmt, StmtKind};
use crate::error::Diagnostic;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::parser::Parser;

#[derive(Debug, Clone)]
pub struct CompileResult {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Present exactly when `success` is true.
    pub program: Option<Arc<Program>>,
}

impl CompileResult {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            diagnostics,
            program: None,
        }
    }
}

pub fn compile(source: &str) -> CompileResult {
    let (tokens, mut diagnostics) = Lexer::new(source).tokenize();
    diagnostics.extend(check_delimiters(&tokens));
    if !diagnostics.is_empty() {
        debug!(count = diagnostics.len(), "script rejected before parsing");
        return CompileResult::failed(diagnostics);
    }

    let program = match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(diagnostic) => return CompileResult::failed(vec![diagnostic]),
    };

    let diagnostics = check_structure(&program);
    if !diagnostics.is_empty() {
        return CompileResult::failed(diagnostics);
    }

    debug!(
        functions = program.functions.len(),
        statements = program.statements.len(),
        "script compiled"
    );
    CompileResult {
        success: true,
        diagnostics: Vec::new(),
        program: Some(Arc::new(program)),
    }
}

fn closing_for(open: &Token) -> Option<Token> {
    match open {
        Token::LParen => Some(Token::RParen),
        Token::LBrace => Some(Token::RBrace),
        Token::LBracket => Some(Token::RBracket),
        _ => None,
    }
}

fn check_delimiters(tokens: &[SpannedToken]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut stack: Vec<&SpannedToken> = Vec::new();

    for st in tokens {
        match st.token {
            Token::LParen | Token::LBrace | Token::LBracket => stack.push(st),
            Token::RParen | Token::RBrace | Token::RBracket => {
                let matches_top = stack
                    .last()
                    .and_then(|open| closing_for(&open.token))
                    .is_some_and(|close| close == st.token);
                if matches_top {
                    stack.pop();
                } else {
                    diagnostics.push(Diagnostic::new(
                        format!("Unmatched {}", st.token.describe()),
                        st.span.line,
                        st.span.col,
                    ));
                }
            }
            _ => {}
        }
    }

    for open in stack {
        diagnostics.push(Diagnostic::new(
            format!("Unclosed {}", open.token.describe()),
            open.span.line,
            open.span.col,
        ));
    }
    diagnostics
}

#[derive(Clone, Copy)]
struct Context {
    in_loop: bool,
    in_function: bool,
}

fn check_structure(program: &Program) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let top = Context {
        in_loop: false,
        in_function: false,
    };
    for stmt in &program.statements {
        check_stmt(stmt, top, &mut diagnostics);
    }

    let mut seen = HashSet::new();
    for function in &program.functions {
        if !seen.insert(function.name.as_str()) {
            diagnostics.push(Diagnostic::new(
                format!("Duplicate function definition: '{}'", function.name),
                function.span.line,
                function.span.col,
            ));
        }
        check_function(function, &mut diagnostics);
    }

    diagnostics.sort_by_key(|d| (d.line, d.col));
    diagnostics
}

fn check_function(function: &FunctionDef, diagnostics: &mut Vec<Diagnostic>) {
    let ctx = Context {
        in_loop: false,
        in_function: true,
    };
    for stmt in &function.body {
        check_stmt(stmt, ctx, diagnostics);
    }
}

fn check_stmt(stmt: &Stmt, ctx: Context, diagnostics: &mut Vec<Diagnostic>) {
    let looped = Context {
        in_loop: true,
        ..ctx
    };
    match &stmt.kind {
        StmtKind::Break if !ctx.in_loop => diagnostics.push(Diagnostic::new(
            "'break' outside of a loop",
            stmt.span.line,
            stmt.span.col,
        )),
        StmtKind::Continue if !ctx.in_loop => diagnostics.push(Diagnostic::new(
            "'continue' outside of a loop",
            stmt.span.line,
            stmt.span.col,
        )),
        StmtKind::Return(_) if !ctx.in_function => diagnostics.push(Diagnostic::new(
            "'return' outside of a function",
            stmt.span.line,
            stmt.span.col,
        )),
        StmtKind::Block(stmts) => {
            for s in stmts {
                check_stmt(s, ctx, diagnostics);
            }
        }
        StmtKind::If {
            then, otherwise, ..
        } => {
            check_stmt(then, ctx, diagnostics);
            if let Some(otherwise) = otherwise {
                check_stmt(otherwise, ctx, diagnostics);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            check_stmt(body, looped, diagnostics)
        }
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                check_stmt(init, ctx, diagnostics);
            }
            check_stmt(body, looped, diagnostics);
        }
        _ => {}
    }
}
