/// Sandboxed Executor
///
/// **Core Responsibility:**
/// Run one program in a fresh environment and hand back what it printed,
/// or the fault it raised.
///
/// **Critical Properties:**
/// - Fresh global scope per call, seeded only from the capability allowlist
/// - Output is captured in a buffer owned by that call's interpreter; no
///   process-wide stream is ever redirected, so concurrent calls on
///   separate threads cannot see each other's output
/// - Knows nothing about test cases, expected outputs or scoring
///
/// **Containment:**
/// Every run happens on a dedicated thread with a large stack. Runaway
/// loops hit the cooperative deadline, runaway recursion hits the call
/// depth limit, and a panic inside the runtime is reported as an
/// `InternalError` fault instead of unwinding into the caller.

use crate::allowlist::capabilities;
use crate::runtime::{parse, ErrorKind, ExecutionLimits, Interpreter, RuntimeError};
use looptutor_common::config::ValidatorConfig;
use looptutor_common::types::{ExecutionResult, StructuredFault};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Stack reserved for the sandbox thread.
const SANDBOX_STACK_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFault {
    /// Error raised by the program, rendered `"<ErrorType>: <detail>"`.
    #[error("{0}")]
    Raised(RuntimeError),
    #[error("ValueError: source is {size} bytes, limit is {limit} bytes")]
    SourceTooLarge { size: usize, limit: usize },
    #[error("InternalError: {0}")]
    Internal(String),
}

impl ExecutionFault {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFault::Raised(e) if e.kind == ErrorKind::TimeoutError)
    }

    /// Line of the statement that raised, counted in the executed source.
    pub fn line(&self) -> Option<usize> {
        match self {
            ExecutionFault::Raised(e) => e.line,
            _ => None,
        }
    }
}

/// Build the augmented program for a test case: the case's input text is
/// prepended as literal statements.
pub fn with_input(input: &str, program: &str) -> String {
    if input.trim().is_empty() {
        return program.to_string();
    }
    format!("{}\n{}", input, program)
}

#[derive(Debug, Clone)]
pub struct SandboxEngine {
    timeout: Duration,
    max_output_bytes: usize,
    max_source_bytes: usize,
    max_call_depth: usize,
}

impl Default for SandboxEngine {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

impl SandboxEngine {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
            max_source_bytes: config.max_source_bytes,
            max_call_depth: config.max_call_depth,
        }
    }

    /// Execute `source`; `Ok` carries stdout verbatim.
    pub fn execute(&self, source: &str) -> Result<String, ExecutionFault> {
        let (stdout, raised) = self.run_captured(source)?;
        match raised {
            Some(err) => Err(ExecutionFault::Raised(err)),
            None => Ok(stdout),
        }
    }

    /// Execute `input` followed by `program`.
    pub fn execute_with_input(&self, input: &str, program: &str) -> Result<String, ExecutionFault> {
        self.execute(&with_input(input, program))
    }

    /// Data-shaped variant of [`execute`](Self::execute). Output printed
    /// before a fault is kept.
    pub fn run(&self, source: &str) -> ExecutionResult {
        match self.run_captured(source) {
            Ok((stdout, raised)) => ExecutionResult {
                stdout,
                raised: raised.map(|e| StructuredFault {
                    message: e.to_string(),
                }),
            },
            Err(fault) => ExecutionResult {
                stdout: String::new(),
                raised: Some(StructuredFault {
                    message: fault.to_string(),
                }),
            },
        }
    }

    fn run_captured(&self, source: &str) -> Result<(String, Option<RuntimeError>), ExecutionFault> {
        if source.len() > self.max_source_bytes {
            return Err(ExecutionFault::SourceTooLarge {
                size: source.len(),
                limit: self.max_source_bytes,
            });
        }

        let started = Instant::now();
        let limits = ExecutionLimits {
            deadline: Some(started + self.timeout),
            max_output_bytes: self.max_output_bytes,
            max_call_depth: self.max_call_depth,
        };

        let (stdout, raised) = on_sandbox_stack(move || {
            let module = match parse(source) {
                Ok(module) => module,
                Err(fault) => return (String::new(), Some(RuntimeError::from(fault))),
            };
            let mut interp = Interpreter::new(capabilities(), limits);
            let outcome = interp.run(&module);
            (interp.output().to_string(), outcome.err())
        })?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout_bytes = stdout.len(),
            raised = raised.as_ref().map(|e| e.kind.to_string()).unwrap_or_default(),
            "Sandbox run finished"
        );
        Ok((stdout, raised))
    }
}

/// Run `task` on a fresh thread with the sandbox stack size. A panic in the
/// task becomes an `Internal` fault.
pub(crate) fn on_sandbox_stack<T, F>(task: F) -> Result<T, ExecutionFault>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    std::thread::scope(|scope| -> Result<T, ExecutionFault> {
        let handle = std::thread::Builder::new()
            .name("sandbox".to_string())
            .stack_size(SANDBOX_STACK_BYTES)
            .spawn_scoped(scope, task)
            .map_err(|e| ExecutionFault::Internal(format!("failed to start sandbox thread: {}", e)))?;
        handle.join().map_err(|panic| {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "sandbox thread panicked".to_string());
            ExecutionFault::Internal(detail)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout_verbatim() {
        let engine = SandboxEngine::default();
        let out = engine
            .execute("for fruit in ['apple', 'banana']:\n    print(fruit)\n")
            .unwrap();
        assert_eq!(out, "apple\nbanana\n");
    }

    #[test]
    fn test_fresh_scope_per_call() {
        let engine = SandboxEngine::default();
        engine.execute("secret = 42\n").unwrap();
        let fault = engine.execute("print(secret)\n").unwrap_err();
        assert_eq!(fault.to_string(), "NameError: name 'secret' is not defined");
    }

    #[test]
    fn test_runtime_fault_message_and_line() {
        let engine = SandboxEngine::default();
        let fault = engine.execute("x = 1\nprint(x / 0)\n").unwrap_err();
        assert_eq!(fault.to_string(), "ZeroDivisionError: division by zero");
        assert_eq!(fault.line(), Some(2));
    }

    #[test]
    fn test_run_keeps_partial_output() {
        let engine = SandboxEngine::default();
        let result = engine.run("print('before')\nprint(undefined)\n");
        assert_eq!(result.stdout, "before\n");
        assert!(!result.succeeded());
        assert_eq!(
            result.raised.unwrap().message,
            "NameError: name 'undefined' is not defined"
        );
    }

    #[test]
    fn test_syntax_error_during_execution() {
        let engine = SandboxEngine::default();
        let fault = engine.execute("for x in [1, 2]\n    print(x)\n").unwrap_err();
        assert!(fault.to_string().starts_with("SyntaxError: "));
    }

    #[test]
    fn test_input_is_prepended() {
        let engine = SandboxEngine::default();
        let out = engine
            .execute_with_input("numbers = [1, 2, 3]", "for n in numbers:\n    print(n * 2)\n")
            .unwrap();
        assert_eq!(out, "2\n4\n6\n");
        assert_eq!(with_input("", "print(1)"), "print(1)");
        assert_eq!(with_input("x = 1", "print(x)"), "x = 1\nprint(x)");
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let config = ValidatorConfig {
            timeout_ms: 100,
            ..ValidatorConfig::default()
        };
        let engine = SandboxEngine::new(&config);
        let started = Instant::now();
        let fault = engine.execute("i = 0\nwhile True:\n    i += 1\n").unwrap_err();
        assert!(fault.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_source_size_limit() {
        let config = ValidatorConfig {
            max_source_bytes: 16,
            ..ValidatorConfig::default()
        };
        let engine = SandboxEngine::new(&config);
        let fault = engine.execute("print('this is far too long')\n").unwrap_err();
        assert!(matches!(fault, ExecutionFault::SourceTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_concurrent_calls_do_not_share_output() {
        let engine = SandboxEngine::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    let source = format!("for _ in range(200):\n    print({})\n", i);
                    (i, engine.execute(&source).unwrap())
                })
            })
            .collect();
        for handle in handles {
            let (i, out) = handle.join().unwrap();
            assert_eq!(out, format!("{}\n", i).repeat(200));
        }
    }

    #[test]
    fn test_deep_recursion_is_contained() {
        let engine = SandboxEngine::default();
        let fault = engine
            .execute("def down(n):\n    return down(n + 1)\ndown(0)\n")
            .unwrap_err();
        assert_eq!(
            fault.to_string(),
            "RecursionError: maximum recursion depth exceeded"
        );
    }
}
