use serde::{Deserialize, Serialize};

/// One (input, expected output) pair authored in the content store.
///
/// `input` is source text in the exercise language. It is prepended to the
/// program under test, so a case like `numbers = [1, 2, 3]` seeds the data
/// the exercise iterates over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: String,
    #[serde(alias = "output", default)]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(
        description: impl Into<String>,
        input: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Exercise record as exposed by the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_hint")]
    pub hint: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    /// Concept name used by the concept-specific mistake rules
    /// (e.g. `BasicListIteration`, `DictKeysIteration`).
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_starter_code")]
    pub starter_code: String,
}

fn default_hint() -> String {
    "Try breaking the problem into smaller steps.".to_string()
}

fn default_difficulty() -> u8 {
    1
}

fn default_starter_code() -> String {
    "# Write your code here\n".to_string()
}

impl Problem {
    /// Expected output of the first test case that declares one.
    pub fn expected_output(&self) -> &str {
        self.test_cases
            .iter()
            .map(|tc| tc.expected_output.as_str())
            .find(|out| !out.is_empty())
            .unwrap_or("")
    }
}

/// Reference solution linked to a problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub problem: String,
    pub code: String,
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// Captured runtime error surfaced as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredFault {
    pub message: String,
}

/// Result of one sandboxed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub raised: Option<StructuredFault>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.raised.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MistakeKind {
    MissingBlockTerminator,
    MissingMembershipKeyword,
    UnnecessaryIndexAccess,
    BadTupleUnpackSingleVar,
    WrongAccessorMethod,
    BadIndentation,
}

/// Static, advisory diagnosis of a likely conceptual error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistakeFinding {
    pub kind: MistakeKind,
    pub message: String,
    pub offending_line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub ordinal: u32,
    pub description: String,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    pub fault: Option<String>,
    pub solution_output: String,
    pub input_used: String,
}

/// Why a verdict failed before or outside of output comparison.
///
/// `Configuration` marks content-authoring bugs (no test cases, no
/// reference solution) so the UI can tell them apart from a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Syntax,
    Execution,
    Configuration,
}

/// Terminal output of one validation call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verdict {
    pub overall_passed: bool,
    pub score: u32,
    pub tests_passed: u32,
    pub tests_total: u32,
    pub syntax_errors: Vec<String>,
    pub case_results: Vec<TestCaseResult>,
    pub mistakes: Vec<MistakeFinding>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub feedback: Vec<String>,
    pub failure: Option<FailureKind>,
}

impl Verdict {
    pub fn is_configuration_error(&self) -> bool {
        self.failure == Some(FailureKind::Configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_accepts_output_alias() {
        let tc: TestCase =
            serde_json::from_str(r#"{"description": "d", "input": "x = 1", "output": "1"}"#)
                .unwrap();
        assert_eq!(tc.expected_output, "1");
        assert_eq!(tc.input, "x = 1");
    }

    #[test]
    fn problem_defaults_fill_missing_fields() {
        let problem: Problem = serde_json::from_str(r#"{"name": "PrintItems"}"#).unwrap();
        assert_eq!(problem.difficulty, 1);
        assert_eq!(problem.starter_code, "# Write your code here\n");
        assert!(problem.concept.is_none());
        assert_eq!(problem.expected_output(), "");
    }

    #[test]
    fn mistake_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&MistakeKind::BadTupleUnpackSingleVar).unwrap();
        assert_eq!(json, "\"BAD_TUPLE_UNPACK_SINGLE_VAR\"");
    }

    #[test]
    fn expected_output_skips_empty_cases() {
        let problem = Problem {
            name: "p".into(),
            description: String::new(),
            hint: String::new(),
            difficulty: 1,
            concept: None,
            test_cases: vec![TestCase::new("a", "", ""), TestCase::new("b", "", "1\n2")],
            starter_code: String::new(),
        };
        assert_eq!(problem.expected_output(), "1\n2");
    }
}
