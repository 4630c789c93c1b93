pub mod allowlist;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod mistakes;
pub mod runtime;
pub mod syntax;

mod executor_tests;

pub use engine::{ExecutionFault, SandboxEngine};
pub use executor::{validate_single, validate_with_cases, ConfigurationFault, Validator};
pub use mistakes::detect;
pub use syntax::{check, SyntaxReport};
