/// Validation Engine - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one learner submission into a Verdict.
///
/// **Architecture:**
/// 1. Syntax gate (syntax.rs); nothing runs when it fails
/// 2. Sandboxed execution of reference and submission (engine.rs)
/// 3. Output comparison and scoring (evaluator.rs)
/// 4. Mistake diagnosis when the submission did not pass (mistakes.rs)
///
/// This module is the glue layer. Every failure mode, including faults in
/// the learner's code and broken content, comes back as a normal Verdict.

use crate::engine::{with_input, ExecutionFault, SandboxEngine};
use crate::evaluator::{self, normalize_output, outputs_match};
use crate::mistakes::detect;
use crate::syntax;
use looptutor_common::config::ValidatorConfig;
use looptutor_common::types::{FailureKind, Problem, TestCase, TestCaseResult, Verdict};
use thiserror::Error;
use tracing::{debug, info, warn};

const FIX_SYNTAX: &str = "Fix syntax errors before testing.";
const SOLUTION_MISMATCH: &str = "Warning: Solution output doesn't match expected output.";

/// Content-authoring bugs. Reported in the Verdict, never blamed on the
/// learner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationFault {
    #[error("No test cases available.")]
    NoTestCases,
    #[error("No reference solution available.")]
    MissingSolution,
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
    engine: SandboxEngine,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        let engine = SandboxEngine::new(&config);
        Self { config, engine }
    }

    /// Validate against one implicit test case.
    ///
    /// The reference solution is run first; if its output disagrees with
    /// `expected` a warning is recorded and validation continues. The
    /// submission passes when its output matches either of the two.
    #[tracing::instrument(skip_all, fields(mode = "single"))]
    pub fn validate_single(&self, student: &str, solution: &str, expected: &str) -> Verdict {
        if let Some(verdict) = syntax_gate(student, None) {
            return verdict;
        }
        if solution.trim().is_empty() {
            return configuration_error(ConfigurationFault::MissingSolution, 0);
        }

        let mut verdict = Verdict {
            tests_total: 1,
            ..Verdict::default()
        };

        let outcome = self.engine.execute(solution).and_then(|solution_output| {
            if normalize_output(&solution_output) != normalize_output(expected) {
                verdict.warnings.push(SOLUTION_MISMATCH.to_string());
            }
            let student_output = self.engine.execute(student)?;
            Ok((solution_output, student_output))
        });

        let case = match outcome {
            Ok((solution_output, student_output)) => {
                let passed = outputs_match(&student_output, expected)
                    || outputs_match(&student_output, &solution_output);
                TestCaseResult {
                    ordinal: 1,
                    description: case_description("", 1),
                    passed,
                    expected: normalize_output(expected).to_string(),
                    actual: normalize_output(&student_output).to_string(),
                    fault: None,
                    solution_output: normalize_output(&solution_output).to_string(),
                    input_used: String::new(),
                }
            }
            Err(fault) => {
                warn!(fault = %fault, "Execution fault during single validation");
                verdict.errors.push(format!("Runtime Error: {}", fault));
                verdict.feedback.push("Your code produced an error.".to_string());
                verdict.failure = Some(FailureKind::Execution);
                TestCaseResult {
                    ordinal: 1,
                    description: case_description("", 1),
                    passed: false,
                    expected: normalize_output(expected).to_string(),
                    actual: String::new(),
                    fault: Some(fault.to_string()),
                    solution_output: String::new(),
                    input_used: String::new(),
                }
            }
        };

        if case.passed {
            verdict.tests_passed = 1;
            verdict.score = 100;
            verdict.overall_passed = true;
            verdict
                .feedback
                .push("Perfect! Your code produces the correct output!".to_string());
        } else {
            if case.fault.is_none() {
                verdict
                    .feedback
                    .push("Output doesn't match expected result.".to_string());
            }
            verdict.mistakes = detect(student, None);
        }
        verdict.case_results.push(case);

        info!(
            score = verdict.score,
            passed = verdict.overall_passed,
            warnings = verdict.warnings.len(),
            "Single validation complete"
        );
        verdict
    }

    /// Validate against every test case of `problem`, in order.
    ///
    /// Each case runs the reference solution and the submission with the
    /// case input prepended. A fault fails only its own case.
    #[tracing::instrument(skip_all, fields(mode = "cases", problem = %problem.name))]
    pub fn validate_with_cases(&self, student: &str, problem: &Problem, solution: &str) -> Verdict {
        let concept = problem.concept.as_deref();
        if let Some(verdict) = syntax_gate(student, concept) {
            return verdict;
        }
        if problem.test_cases.is_empty() {
            return configuration_error(ConfigurationFault::NoTestCases, 0);
        }
        if solution.trim().is_empty() {
            return configuration_error(ConfigurationFault::MissingSolution, 0);
        }

        let mut verdict = Verdict {
            tests_total: problem.test_cases.len() as u32,
            ..Verdict::default()
        };

        for (index, case) in problem.test_cases.iter().enumerate() {
            let ordinal = index as u32 + 1;
            let result = self.run_case(ordinal, case, student, solution, &mut verdict.warnings);
            debug!(
                ordinal,
                passed = result.passed,
                faulted = result.fault.is_some(),
                "Test case evaluated"
            );
            if result.passed {
                verdict.tests_passed += 1;
            }
            verdict.case_results.push(result);
        }

        verdict.score = evaluator::score(verdict.tests_passed, verdict.tests_total);
        verdict.overall_passed = evaluator::is_passing(verdict.score, self.config.pass_threshold);
        verdict.feedback.insert(
            0,
            evaluator::summary_feedback(
                verdict.tests_passed,
                verdict.tests_total,
                self.config.pass_threshold,
            ),
        );

        if !verdict.overall_passed {
            verdict.mistakes = detect(student, concept);
            if verdict.case_results.iter().any(|r| r.fault.is_some()) {
                verdict.failure = Some(FailureKind::Execution);
            }
        }

        info!(
            tests_passed = verdict.tests_passed,
            tests_total = verdict.tests_total,
            score = verdict.score,
            passed = verdict.overall_passed,
            "Validation complete"
        );
        verdict
    }

    fn run_case(
        &self,
        ordinal: u32,
        case: &TestCase,
        student: &str,
        solution: &str,
        warnings: &mut Vec<String>,
    ) -> TestCaseResult {
        let expected = normalize_output(&case.expected_output);
        let solution_run = self.engine.execute(&with_input(&case.input, solution));
        let student_run = self.engine.execute(&with_input(&case.input, student));

        let solution_output = match &solution_run {
            Ok(out) => {
                if normalize_output(out) != expected {
                    warnings.push(format!(
                        "Warning: Solution output doesn't match expected output for test {}.",
                        ordinal
                    ));
                }
                normalize_output(out).to_string()
            }
            Err(_) => String::new(),
        };

        let (passed, actual, fault) = match (&solution_run, student_run) {
            (Err(fault), student_run) => {
                warn!(ordinal, fault = %fault, "Reference solution faulted");
                let actual = student_run
                    .map(|out| normalize_output(&out).to_string())
                    .unwrap_or_default();
                (false, actual, Some(reference_fault(fault)))
            }
            (Ok(_), Err(fault)) => (false, String::new(), Some(fault.to_string())),
            (Ok(_), Ok(out)) => {
                let passed = outputs_match(&out, expected) || outputs_match(&out, &solution_output);
                (passed, normalize_output(&out).to_string(), None)
            }
        };

        TestCaseResult {
            ordinal,
            description: case_description(&case.description, ordinal),
            passed,
            expected: expected.to_string(),
            actual,
            fault,
            solution_output,
            input_used: case.input.clone(),
        }
    }
}

fn reference_fault(fault: &ExecutionFault) -> String {
    format!("Reference solution error: {}", fault)
}

fn case_description(description: &str, ordinal: u32) -> String {
    if description.trim().is_empty() {
        format!("Test {}", ordinal)
    } else {
        description.to_string()
    }
}

/// Short-circuit Verdict when `student` does not parse.
fn syntax_gate(student: &str, concept: Option<&str>) -> Option<Verdict> {
    let report = syntax::check(student);
    if report.valid {
        return None;
    }
    debug!(errors = ?report.errors, "Submission failed the syntax gate");
    Some(Verdict {
        syntax_errors: report.errors,
        mistakes: detect(student, concept),
        feedback: vec![FIX_SYNTAX.to_string()],
        failure: Some(FailureKind::Syntax),
        ..Verdict::default()
    })
}

fn configuration_error(fault: ConfigurationFault, tests_total: u32) -> Verdict {
    warn!(fault = %fault, "Problem content is not gradeable");
    Verdict {
        tests_total,
        errors: vec![fault.to_string()],
        failure: Some(FailureKind::Configuration),
        ..Verdict::default()
    }
}

/// [`Validator::validate_single`] with the default configuration.
pub fn validate_single(student: &str, solution: &str, expected: &str) -> Verdict {
    Validator::default().validate_single(student, solution, expected)
}

/// [`Validator::validate_with_cases`] with the default configuration.
pub fn validate_with_cases(student: &str, problem: &Problem, solution: &str) -> Verdict {
    Validator::default().validate_with_cases(student, problem, solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(cases: Vec<TestCase>) -> Problem {
        Problem {
            name: "CountToThree".to_string(),
            description: String::new(),
            hint: String::new(),
            difficulty: 1,
            concept: Some("BasicListIteration".to_string()),
            test_cases: cases,
            starter_code: String::new(),
        }
    }

    #[test]
    fn test_case_description_defaults() {
        assert_eq!(case_description("", 3), "Test 3");
        assert_eq!(case_description("  ", 1), "Test 1");
        assert_eq!(case_description("Empty list", 1), "Empty list");
    }

    #[test]
    fn test_single_pass() {
        let verdict = validate_single("print('hi')", "print('hi')", "hi");
        assert!(verdict.overall_passed);
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.tests_total, 1);
        assert_eq!(verdict.feedback, vec!["Perfect! Your code produces the correct output!"]);
        assert!(verdict.warnings.is_empty());
        assert!(verdict.mistakes.is_empty());
    }

    #[test]
    fn test_single_stale_expected_output_warns() {
        let verdict = validate_single("print('new')", "print('new')", "old");
        assert!(verdict.overall_passed);
        assert_eq!(verdict.warnings, vec![SOLUTION_MISMATCH]);
    }

    #[test]
    fn test_single_mismatch() {
        let verdict = validate_single("print('no')", "print('yes')", "yes");
        assert!(!verdict.overall_passed);
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.feedback, vec!["Output doesn't match expected result."]);
        assert!(verdict.failure.is_none());
        assert_eq!(verdict.case_results[0].actual, "no");
    }

    #[test]
    fn test_single_runtime_error() {
        let verdict = validate_single("print(1 / 0)", "print(1)", "1");
        assert_eq!(verdict.score, 0);
        assert_eq!(
            verdict.errors,
            vec!["Runtime Error: ZeroDivisionError: division by zero"]
        );
        assert_eq!(verdict.feedback, vec!["Your code produced an error."]);
        assert_eq!(verdict.failure, Some(FailureKind::Execution));
    }

    #[test]
    fn test_single_syntax_gate() {
        let verdict = validate_single("for x in range(5)\n    print(x)", "print(1)", "1");
        assert!(verdict.case_results.is_empty());
        assert_eq!(verdict.syntax_errors.len(), 1);
        assert_eq!(verdict.feedback, vec![FIX_SYNTAX]);
        assert_eq!(verdict.failure, Some(FailureKind::Syntax));
        assert_eq!(verdict.tests_total, 0);
    }

    #[test]
    fn test_missing_solution_is_configuration_error() {
        let verdict = validate_single("print(1)", "   ", "1");
        assert!(verdict.is_configuration_error());
        assert_eq!(verdict.errors, vec!["No reference solution available."]);

        let p = problem(vec![TestCase::new("", "", "1")]);
        let verdict = validate_with_cases("print(1)", &p, "");
        assert!(verdict.is_configuration_error());
        assert!(verdict.case_results.is_empty());
    }

    #[test]
    fn test_no_test_cases_is_configuration_error() {
        let verdict = validate_with_cases("print(1)", &problem(vec![]), "print(1)");
        assert!(verdict.is_configuration_error());
        assert_eq!(verdict.tests_total, 0);
        assert_eq!(verdict.errors, vec!["No test cases available."]);
        assert!(!verdict.overall_passed);
    }

    #[test]
    fn test_reference_fault_fails_the_case() {
        let p = problem(vec![TestCase::new("", "", "1")]);
        let verdict = validate_with_cases("print(1)", &p, "print(missing)");
        let case = &verdict.case_results[0];
        assert!(!case.passed);
        assert_eq!(case.actual, "1");
        assert_eq!(
            case.fault.as_deref(),
            Some("Reference solution error: NameError: name 'missing' is not defined")
        );
    }

    #[test]
    fn test_custom_threshold() {
        let validator = Validator::new(ValidatorConfig {
            pass_threshold: 50,
            ..ValidatorConfig::default()
        });
        let p = problem(vec![
            TestCase::new("", "x = 1", "1"),
            TestCase::new("", "x = 2", "2"),
        ]);
        let verdict = validator.validate_with_cases("print(1)", &p, "print(x)");
        assert_eq!(verdict.score, 50);
        assert!(verdict.overall_passed);
        assert_eq!(verdict.feedback[0], "Good job! Passed 1/2 tests.");
    }
}
