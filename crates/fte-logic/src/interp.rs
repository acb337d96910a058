//! Tree-walking evaluator
//!
//! Every evaluated node costs one step. The step budget, collection and text
//! sizes and the nesting depth are all bounded by [`Limits`], and an optional
//! cancel flag is polled on every step so a supervisor can stop a runaway
//! evaluation.

use fte_context::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ast::{Expr, Procedure, Stmt, UnaryOp};
use crate::builtins;
use crate::error::LogicError;
use crate::ops;
use crate::parser::{parse_expression, parse_procedure};

/// Resource ceilings for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Evaluated nodes and loop iterations
    pub max_steps: u64,
    /// Elements in any sequence or mapping produced
    pub max_collection_len: usize,
    /// Characters in any text produced
    pub max_text_len: usize,
    /// Expression and block nesting
    pub max_depth: usize,
    /// Total elements across one produced value, nested ones included
    pub max_value_nodes: usize,
    /// Nesting of sequences and mappings inside one produced value
    pub max_value_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_collection_len: 100_000,
            max_text_len: 1 << 20,
            max_depth: 128,
            max_value_nodes: 1_000_000,
            max_value_depth: 128,
        }
    }
}

/// Gateway for data primitives
pub trait Host {
    /// Whether `name` is an allow-listed primitive
    fn is_primitive(&self, name: &str) -> bool;

    /// Invoke a primitive with evaluated arguments
    ///
    /// # Errors
    /// A message describing the failure.
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String>;
}

/// Host that knows no primitives
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrimitives;

impl Host for NoPrimitives {
    fn is_primitive(&self, _name: &str) -> bool {
        false
    }

    fn call(&mut self, name: &str, _args: Vec<Value>) -> Result<Value, String> {
        Err(format!("no primitive '{name}'"))
    }
}

enum Flow {
    Next,
    Return(Value),
}

struct Interpreter<'a> {
    scopes: Vec<HashMap<String, Value>>,
    globals: &'a BTreeMap<String, Value>,
    limits: Limits,
    steps: u64,
    depth: usize,
    cancel: Option<&'a AtomicBool>,
    host: &'a mut dyn Host,
    primitives_allowed: bool,
}

impl<'a> Interpreter<'a> {
    fn tick(&mut self) -> Result<(), LogicError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(LogicError::StepBudgetExhausted(self.limits.max_steps));
        }
        if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(LogicError::Cancelled);
        }
        Ok(())
    }

    fn enter(&mut self) -> Result<(), LogicError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(LogicError::LimitExceeded(format!(
                "nesting deeper than {}",
                self.limits.max_depth
            )));
        }
        Ok(())
    }

    fn check_size(&self, value: &Value) -> Result<(), LogicError> {
        let limits = &self.limits;
        let mut nodes = 0_usize;
        let mut pending = vec![(value, 0_usize)];
        while let Some((value, depth)) = pending.pop() {
            nodes += 1;
            if nodes > limits.max_value_nodes {
                return Err(LogicError::LimitExceeded(format!(
                    "value holds more than {} elements",
                    limits.max_value_nodes
                )));
            }
            if depth > limits.max_value_depth {
                return Err(LogicError::LimitExceeded(format!(
                    "value nested deeper than {}",
                    limits.max_value_depth
                )));
            }
            let (len, max, what) = match value {
                Value::Seq(items) => {
                    pending.extend(items.iter().map(|item| (item, depth + 1)));
                    (items.len(), limits.max_collection_len, "sequence")
                }
                Value::Map(map) => {
                    pending.extend(map.values().map(|item| (item, depth + 1)));
                    (map.len(), limits.max_collection_len, "mapping")
                }
                Value::Text(s) => (s.len(), limits.max_text_len, "text"),
                _ => continue,
            };
            if len > max {
                return Err(LogicError::LimitExceeded(format!("{what} of {len} exceeds {max}")));
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value, LogicError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| LogicError::UnknownName(name.to_string()))
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), LogicError> {
        match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LogicError::UnknownName(name.to_string())),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, LogicError> {
        self.tick()?;
        self.enter()?;
        let value = self.eval_node(expr);
        self.depth -= 1;
        let value = value?;
        // names and literals hold values that were already admitted
        if !matches!(expr, Expr::Name(_) | Expr::Literal(_)) {
            self.check_size(&value)?;
        }
        Ok(value)
    }

    fn eval_node(&mut self, expr: &Expr) -> Result<Value, LogicError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::Seq(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, e) in entries {
                    map.insert(key.clone(), self.eval(e)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                ops::index(&target, &index)
            }
            Expr::Field { target, name } => {
                let target = self.eval(target)?;
                ops::index(&target, &Value::Text(name.clone()))
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => ops::negate(&v),
                    UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                ops::binary(*op, &l, &r)
            }
            Expr::And(lhs, rhs) => {
                let l = self.eval(lhs)?;
                if l.is_truthy() {
                    self.eval(rhs)
                } else {
                    Ok(l)
                }
            }
            Expr::Or(lhs, rhs) => {
                let l = self.eval(lhs)?;
                if l.is_truthy() {
                    Ok(l)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, LogicError> {
        let is_builtin = builtins::is_builtin(name);
        let is_primitive = !is_builtin && self.host.is_primitive(name);
        if !is_builtin && !is_primitive {
            return Err(LogicError::UnknownFunction(name.to_string()));
        }
        if is_primitive && !self.primitives_allowed {
            return Err(LogicError::PrimitiveNotAllowed(name.to_string()));
        }
        let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
        if is_primitive {
            return self.host.call(name, args).map_err(|message| LogicError::Primitive {
                name: name.to_string(),
                message,
            });
        }
        builtins::call(name, &args, &self.limits)
            .unwrap_or_else(|| Err(LogicError::UnknownFunction(name.to_string())))
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<Flow, LogicError> {
        self.enter()?;
        self.scopes.push(HashMap::new());
        let flow = self.statements(stmts);
        self.scopes.pop();
        self.depth -= 1;
        flow
    }

    fn statements(&mut self, stmts: &[Stmt]) -> Result<Flow, LogicError> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, LogicError> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value } => {
                let v = self.eval(value)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), v);
                }
            }
            Stmt::Assign { name, value } => {
                let v = self.eval(value)?;
                self.assign(name, v)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if self.eval(cond)?.is_truthy() {
                    then
                } else {
                    otherwise
                };
                return self.block(branch);
            }
            Stmt::For { var, iter, body } => {
                let items = match self.eval(iter)? {
                    Value::Seq(items) => items,
                    Value::Map(map) => map.into_keys().map(Value::Text).collect(),
                    other => {
                        return Err(LogicError::type_error(format!(
                            "cannot iterate over {}",
                            other.kind_name()
                        )))
                    }
                };
                for item in items {
                    self.tick()?;
                    self.scopes.push(HashMap::from([(var.clone(), item)]));
                    let flow = self.block(body);
                    self.scopes.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    if let Flow::Return(v) = self.block(body)? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
            Stmt::Return(e) => return Ok(Flow::Return(self.eval(e)?)),
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
        }
        Ok(Flow::Next)
    }
}

/// Evaluate a parsed expression
///
/// `host` is consulted only to tell primitives apart from unknown names;
/// calling a primitive from an expression is an error.
///
/// # Errors
/// Any [`LogicError`] raised during evaluation.
pub fn evaluate_expression(
    expr: &Expr,
    inputs: &BTreeMap<String, Value>,
    limits: Limits,
    host: &mut dyn Host,
    cancel: Option<&AtomicBool>,
) -> Result<Value, LogicError> {
    let mut interp = Interpreter {
        scopes: Vec::new(),
        globals: inputs,
        limits,
        steps: 0,
        depth: 0,
        cancel,
        host,
        primitives_allowed: false,
    };
    interp.eval(expr)
}

/// Run a parsed procedure to its `return`
///
/// # Errors
/// Any [`LogicError`] raised during execution; [`LogicError::NoReturn`] if
/// the body finishes without returning.
pub fn run_procedure(
    procedure: &Procedure,
    inputs: &BTreeMap<String, Value>,
    limits: Limits,
    host: &mut dyn Host,
    cancel: Option<&AtomicBool>,
) -> Result<Value, LogicError> {
    let mut interp = Interpreter {
        scopes: Vec::new(),
        globals: inputs,
        limits,
        steps: 0,
        depth: 0,
        cancel,
        host,
        primitives_allowed: true,
    };
    match interp.block(&procedure.body)? {
        Flow::Return(v) => Ok(v),
        Flow::Next => Err(LogicError::NoReturn),
    }
}

/// Parse and evaluate an expression with no primitives
///
/// # Errors
/// Syntax or evaluation errors.
pub fn eval_str(source: &str, inputs: &BTreeMap<String, Value>) -> Result<Value, LogicError> {
    let expr = parse_expression(source)?;
    evaluate_expression(&expr, inputs, Limits::default(), &mut NoPrimitives, None)
}

/// Parse and run a procedure
///
/// # Errors
/// Syntax or execution errors.
pub fn run_str(
    source: &str,
    inputs: &BTreeMap<String, Value>,
    host: &mut dyn Host,
) -> Result<Value, LogicError> {
    let procedure = parse_procedure(source)?;
    run_procedure(&procedure, inputs, Limits::default(), host, None)
}
