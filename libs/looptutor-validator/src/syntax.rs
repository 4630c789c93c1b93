/// Syntax Checker
///
/// Parses source without executing anything. Runs before every execution
/// so a learner with a typo sees the parse error rather than a runtime
/// failure.

use crate::engine::on_sandbox_stack;
use crate::runtime::parse;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxReport {
    pub valid: bool,
    /// Empty when valid; otherwise exactly one
    /// `"Syntax Error on line N: <cause>"` entry.
    pub errors: Vec<String>,
}

impl SyntaxReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
        }
    }
}

pub fn check(source: &str) -> SyntaxReport {
    match on_sandbox_stack(|| parse(source).map(|_| ())) {
        Ok(Ok(())) => SyntaxReport::ok(),
        Ok(Err(fault)) => SyntaxReport::failed(fault.to_string()),
        Err(internal) => SyntaxReport::failed(format!("Syntax Error on line 1: {}", internal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_program() {
        let report = check("fruits = ['a', 'b']\nfor f in fruits:\n    print(f)\n");
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_missing_colon() {
        let report = check("for f in fruits\n    print(f)\n");
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Syntax Error on line 1: expected ':'"]);
    }

    #[test]
    fn test_reports_line_of_failure() {
        let report = check("x = 1\ny = 2\nprint(x +)\n");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Syntax Error on line 3: "));
    }

    #[test]
    fn test_missing_indented_block() {
        let report = check("for x in range(3):\nprint(x)\n");
        assert_eq!(
            report.errors,
            vec!["Syntax Error on line 2: expected an indented block after 'for' statement on line 1"]
        );
    }

    #[test]
    fn test_mixed_tabs_and_spaces_rejected() {
        let report = check("for x in range(2):\n\tprint(x)\n        print(x)\n");
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec!["Syntax Error on line 3: inconsistent use of tabs and spaces in indentation"]
        );

        assert!(check("for x in range(2):\n\tif x:\n\t\tprint(x)\n\tprint(x)\n").valid);
    }

    #[test]
    fn test_does_not_execute() {
        let report = check("while True:\n    pass\n");
        assert!(report.valid);
    }

    #[test]
    fn test_empty_source_is_valid() {
        assert!(check("").valid);
        assert!(check("# only a comment\n").valid);
    }

    #[test]
    fn test_pathological_nesting_never_panics() {
        let report = check(&format!("x = {}1{}\n", "(".repeat(5000), ")".repeat(5000)));
        assert!(!report.valid);
        assert!(report.errors[0].contains("too many nested parentheses"));
    }
}
