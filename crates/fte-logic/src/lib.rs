//! Restricted logic language for fact definitions
//!
//! Two forms share one grammar:
//! - **expressions**: a single side-effect-free expression over the
//!   context and dependency values;
//! - **procedures**: statements with local variables, bounded loops and
//!   calls to allow-listed data primitives, ending in `return`.
//!
//! Nothing in the language reaches the file system, the network, the clock
//! or process state. Data access goes through a [`Host`] supplied by the
//! caller, and every evaluation runs under [`Limits`].
//!
//! ```
//! use std::collections::BTreeMap;
//! use fte_context::Value;
//!
//! let mut inputs = BTreeMap::new();
//! inputs.insert("amounts".to_string(), Value::from(vec![10_i64, 20, 12]));
//! let total = fte_logic::eval_str("sum(amounts) / len(amounts)", &inputs).unwrap();
//! assert_eq!(total, Value::Int(14));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod ast;
pub mod builtins;
mod error;
mod interp;
mod lexer;
pub mod ops;
mod parser;

pub use error::LogicError;
pub use interp::{
    eval_str, evaluate_expression, run_procedure, run_str, Host, Limits, NoPrimitives,
};
pub use lexer::{tokenize, Token};
pub use parser::{parse_expression, parse_procedure};
