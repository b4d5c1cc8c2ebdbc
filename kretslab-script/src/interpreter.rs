//! Tree-walking interpreter.
//!
//! The interpreter reaches the outside world only through the [`Host`]
//! trait: unknown identifiers are looked up with [`Host::global`] and every
//! call that is neither a script function nor a pure builtin goes to
//! [`Host::call`]. Each public entry point runs under a fresh step budget and
//! a call-depth limit, so runaway scripts fault instead of hanging.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::ast::*;
use crate::builtins;
use crate::error::{HostError, RuntimeError};
use crate::value::Value;

/// A host call target, `name(...)` or `namespace.name(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTarget<'a> {
    pub namespace: Option<&'a str>,
    pub name: &'a str,
}

impl fmt::Display for CallTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => f.write_str(self.name),
        }
    }
}

/// The whitelisted surface a script may touch.
pub trait Host {
    fn call(&mut self, target: CallTarget<'_>, args: &[Value]) -> Result<Value, HostError>;

    /// Read-only host constants such as `HIGH` or `A0`.
    fn global(&self, name: &str) -> Option<Value>;
}

/// Hard cap on script call depth, whatever the limits ask for.
pub const MAX_CALL_DEPTH: usize = 64;

/// Nested statement and expression evaluations allowed across all active
/// calls. Bounds native stack use on a 2 MiB thread.
const MAX_EVAL_NESTING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    /// Statements and loop iterations allowed per invocation.
    pub step_budget: u64,
    pub max_call_depth: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            step_budget: 100_000,
            max_call_depth: 64,
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

type Scope = HashMap<String, Binding>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

type Exec<T> = Result<T, RuntimeError>;

pub struct Interpreter {
    program: Arc<Program>,
    functions: HashMap<String, usize>,
    limits: ExecLimits,
    globals: Scope,
    /// Local scopes of the active call frames, innermost last.
    frames: Vec<Vec<Scope>>,
    depth: usize,
    nesting: usize,
    steps: u64,
}

impl Interpreter {
    pub fn new(program: Arc<Program>, limits: ExecLimits) -> Self {
        let limits = ExecLimits {
            max_call_depth: limits.max_call_depth.min(MAX_CALL_DEPTH),
            ..limits
        };
        let functions = program
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            program,
            functions,
            limits,
            globals: Scope::new(),
            frames: Vec::new(),
            depth: 0,
            nesting: 0,
            steps: 0,
        }
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Steps consumed by the most recent invocation.
    pub fn steps_used(&self) -> u64 {
        self.steps
    }

    /// Current value of a script global, if declared.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name).map(|b| &b.value)
    }

    /// Executes the top-level statements once.
    pub fn run_top_level(&mut self, host: &mut dyn Host) -> Exec<()> {
        self.steps = 0;
        self.depth = 0;
        self.nesting = 0;
        self.frames.clear();
        let program = Arc::clone(&self.program);
        for stmt in &program.statements {
            match self.exec_stmt(stmt, host)? {
                Flow::Normal => {}
                // Rejected by `compile`; treat as end of script.
                Flow::Break | Flow::Continue | Flow::Return(_) => break,
            }
        }
        Ok(())
    }

    /// Invokes a script function by name under a fresh step budget.
    pub fn call_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        host: &mut dyn Host,
    ) -> Exec<Value> {
        self.steps = 0;
        self.depth = 0;
        self.nesting = 0;
        self.frames.clear();
        let index = self
            .functions
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::new(format!("{} is not a function", name), 0))?;
        let line = self.program.functions[index].span.line;
        self.invoke(index, args, line, host)
    }

    fn invoke(
        &mut self,
        index: usize,
        args: Vec<Value>,
        line: usize,
        host: &mut dyn Host,
    ) -> Exec<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(RuntimeError::new(
                format!(
                    "Maximum call depth exceeded ({})",
                    self.limits.max_call_depth
                ),
                line,
            ));
        }

        let program = Arc::clone(&self.program);
        let function = &program.functions[index];
        trace!(function = %function.name, depth = self.depth, "call");

        let mut scope = Scope::new();
        let mut args = args.into_iter();
        for param in &function.params {
            scope.insert(
                param.clone(),
                Binding {
                    value: args.next().unwrap_or_default(),
                    mutable: true,
                },
            );
        }
        self.frames.push(vec![scope]);
        self.depth += 1;

        let mut result = Ok(Value::Null);
        for stmt in &function.body {
            match self.exec_stmt(stmt, host) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Return(value)) => {
                    result = Ok(value);
                    break;
                }
                Ok(Flow::Break) | Ok(Flow::Continue) => break,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        self.depth -= 1;
        self.frames.pop();
        result
    }

    // ===== Statements =====

    fn tick(&mut self, line: usize) -> Exec<()> {
        self.steps += 1;
        if self.steps > self.limits.step_budget {
            return Err(RuntimeError::new(
                format!("Step budget exhausted ({} steps)", self.limits.step_budget),
                line,
            ));
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], host: &mut dyn Host) -> Exec<Flow> {
        self.push_scope();
        let mut flow = Ok(Flow::Normal);
        for stmt in stmts {
            match self.exec_stmt(stmt, host) {
                Ok(Flow::Normal) => {}
                other => {
                    flow = other;
                    break;
                }
            }
        }
        self.pop_scope();
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt, host: &mut dyn Host) -> Exec<Flow> {
        self.enter(stmt.span.line)?;
        let flow = self.exec_stmt_inner(stmt, host);
        self.nesting -= 1;
        flow
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt, host: &mut dyn Host) -> Exec<Flow> {
        self.tick(stmt.span.line)?;

        match &stmt.kind {
            StmtKind::Decl { kind, declarators } => {
                for declarator in declarators {
                    let value = match &declarator.init {
                        Some(expr) => self.eval(expr, host)?,
                        None => Value::Null,
                    };
                    self.declare(&declarator.name, value, *kind != DeclKind::Const);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, host)?;
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => self.exec_block(stmts, host),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, host)?.truthy() {
                    self.exec_stmt(then, host)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, host)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, host)?.truthy() {
                    self.tick(stmt.span.line)?;
                    match self.exec_stmt(body, host)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::DoWhile { body, cond } => {
                loop {
                    self.tick(stmt.span.line)?;
                    match self.exec_stmt(body, host)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(cond, host)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.push_scope();
                let flow = self.exec_for(
                    init.as_deref(),
                    cond.as_ref(),
                    update.as_ref(),
                    body,
                    stmt.span.line,
                    host,
                );
                self.pop_scope();
                flow
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, host)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, host)?;
                Err(RuntimeError::new(value.to_string(), stmt.span.line))
            }
            StmtKind::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        line: usize,
        host: &mut dyn Host,
    ) -> Exec<Flow> {
        if let Some(init) = init {
            self.exec_stmt(init, host)?;
        }
        loop {
            if let Some(cond) = cond {
                if !self.eval(cond, host)?.truthy() {
                    break;
                }
            }
            self.tick(line)?;
            match self.exec_stmt(body, host)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update, host)?;
            }
        }
        Ok(Flow::Normal)
    }

    // ===== Bindings =====

    fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(Scope::new());
        } else {
            // Block opened by top-level code.
            self.frames.push(vec![Scope::new()]);
        }
    }

    fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pop();
            if frame.is_empty() {
                self.frames.pop();
            }
        }
    }

    fn declare(&mut self, name: &str, value: Value, mutable: bool) {
        let binding = Binding { value, mutable };
        match self.frames.last_mut().and_then(|frame| frame.last_mut()) {
            Some(scope) => {
                scope.insert(name.to_string(), binding);
            }
            None => {
                self.globals.insert(name.to_string(), binding);
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames
            .last()
            .and_then(|frame| frame.iter().rev().find_map(|scope| scope.get(name)))
            .or_else(|| self.globals.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        let in_frame = self
            .frames
            .last()
            .is_some_and(|frame| frame.iter().any(|scope| scope.contains_key(name)));
        if in_frame {
            self.frames
                .last_mut()
                .and_then(|frame| frame.iter_mut().rev().find_map(|scope| scope.get_mut(name)))
        } else {
            self.globals.get_mut(name)
        }
    }

    fn read_var(&self, name: &str, line: usize, host: &dyn Host) -> Exec<Value> {
        if let Some(binding) = self.lookup(name) {
            return Ok(binding.value.clone());
        }
        host.global(name)
            .ok_or_else(|| RuntimeError::new(format!("{} is not defined", name), line))
    }

    fn write_var(&mut self, name: &str, value: Value, line: usize, host: &dyn Host) -> Exec<()> {
        match self.lookup_mut(name) {
            Some(binding) if binding.mutable => {
                binding.value = value;
                Ok(())
            }
            Some(_) => Err(RuntimeError::new(
                format!("Assignment to constant variable '{}'", name),
                line,
            )),
            None if host.global(name).is_some() => Err(RuntimeError::new(
                format!("Assignment to constant variable '{}'", name),
                line,
            )),
            None => Err(RuntimeError::new(format!("{} is not defined", name), line)),
        }
    }

    // ===== Expressions =====

    fn eval(&mut self, expr: &Expr, host: &mut dyn Host) -> Exec<Value> {
        self.enter(expr.span.line)?;
        let value = self.eval_inner(expr, host);
        self.nesting -= 1;
        value
    }

    fn enter(&mut self, line: usize) -> Exec<()> {
        if self.nesting >= MAX_EVAL_NESTING {
            return Err(RuntimeError::new("Nesting too deep", line));
        }
        self.nesting += 1;
        Ok(())
    }

    fn eval_inner(&mut self, expr: &Expr, host: &mut dyn Host) -> Exec<Value> {
        let line = expr.span.line;
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Ident(name) => self.read_var(name, line, host),
            ExprKind::Unary { op, expr } => {
                let value = self.eval(expr, host)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                })
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left, host)?;
                let right = self.eval(right, host)?;
                binary_op(*op, &left, &right, line)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left, host)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, host),
                }
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, host)?.truthy() {
                    self.eval(then, host)
                } else {
                    self.eval(otherwise, host)
                }
            }
            ExprKind::Assign { target, op, value } => {
                let rhs = self.eval(value, host)?;
                let value = match op {
                    Some(op) => {
                        let current = self.read_var(target, line, host)?;
                        binary_op(*op, &current, &rhs, line)?
                    }
                    None => rhs,
                };
                self.write_var(target, value.clone(), line, host)?;
                Ok(value)
            }
            ExprKind::Update {
                target,
                delta,
                prefix,
            } => {
                let old = self.read_var(target, line, host)?.to_number();
                let new = old + delta;
                self.write_var(target, Value::Number(new), line, host)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ExprKind::Cast { integral, expr } => {
                let value = self.eval(expr, host)?;
                if *integral {
                    Ok(Value::Number(value.to_number().trunc()))
                } else {
                    Ok(value)
                }
            }
            ExprKind::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, host)?);
                }
                self.call(callee, values, line, host)
            }
        }
    }

    fn call(
        &mut self,
        callee: &Callee,
        args: Vec<Value>,
        line: usize,
        host: &mut dyn Host,
    ) -> Exec<Value> {
        let target = match callee {
            Callee::Function(name) => {
                if let Some(&index) = self.functions.get(name.as_str()) {
                    return self.invoke(index, args, line, host);
                }
                CallTarget {
                    namespace: None,
                    name: name.as_str(),
                }
            }
            Callee::Method { namespace, name } => CallTarget {
                namespace: Some(namespace.as_str()),
                name: name.as_str(),
            },
        };

        if let Some(result) = builtins::call(target, &args) {
            return result.map_err(|message| RuntimeError::new(message, line));
        }

        host.call(target, &args)
            .map_err(|err| RuntimeError::new(err.to_string(), line))
    }
}

fn binary_op(op: BinOp, left: &Value, right: &Value, line: usize) -> Exec<Value> {
    let value = match op {
        BinOp::Add => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", left, right)),
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinOp::Div | BinOp::Rem => {
            let divisor = right.to_number();
            if divisor == 0.0 {
                return Err(RuntimeError::new("Division by zero", line));
            }
            let dividend = left.to_number();
            if op == BinOp::Div {
                Value::Number(dividend / divisor)
            } else {
                Value::Number(dividend % divisor)
            }
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Value::Bool(compare(op, left, right)),
        BinOp::Eq => Value::Bool(left.loose_eq(right)),
        BinOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinOp::StrictNe => Value::Bool(!left.strict_eq(right)),
    };
    Ok(value)
}

fn compare(op: BinOp, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        _ => a >= b,
    }
}
