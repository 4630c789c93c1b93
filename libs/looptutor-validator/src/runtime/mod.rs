//! The execution primitive: a lexer, parser and tree-walking interpreter for
//! the iteration-teaching subset of the learner's language.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod format;
pub mod interpreter;
pub mod lexer;
pub mod methods;
pub mod parser;
pub mod value;

pub use error::{ErrorKind, RunResult, RuntimeError, SyntaxFault};
pub use interpreter::{ExecutionLimits, Interpreter};
pub use parser::parse;
pub use value::{Builtin, Value};
