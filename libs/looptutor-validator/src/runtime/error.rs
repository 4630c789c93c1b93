use std::fmt;
use thiserror::Error;

/// Parse failure with the 1-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Syntax Error on line {line}: {message}")]
pub struct SyntaxFault {
    pub line: usize,
    pub message: String,
}

impl SyntaxFault {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    InternalError,
    KeyError,
    MemoryError,
    NameError,
    OutputLimitError,
    OverflowError,
    RecursionError,
    RuntimeError,
    SyntaxError,
    TimeoutError,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error raised by sandboxed code, rendered the way the learner expects
/// to read it: `NameError: name 'open' is not defined`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Line of the innermost statement that was executing.
    pub line: Option<usize>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ErrorKind::NameError, format!("name '{}' is not defined", name))
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::OverflowError, "integer result out of range")
    }

    pub fn memory() -> Self {
        Self::new(ErrorKind::MemoryError, "result too large for the sandbox")
    }
}

impl From<SyntaxFault> for RuntimeError {
    fn from(fault: SyntaxFault) -> Self {
        RuntimeError::new(
            ErrorKind::SyntaxError,
            format!("{} (line {})", fault.message, fault.line),
        )
    }
}

pub type RunResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = RuntimeError::name_error("open");
        assert_eq!(err.to_string(), "NameError: name 'open' is not defined");

        let located = err.clone().at_line(4).at_line(9);
        assert_eq!(located.line, Some(4));
        assert_eq!(located.to_string(), "NameError: name 'open' is not defined");

        let fault = SyntaxFault::new(3, "expected ':'");
        assert_eq!(fault.to_string(), "Syntax Error on line 3: expected ':'");
    }
}
