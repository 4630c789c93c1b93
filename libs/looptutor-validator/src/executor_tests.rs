/// End-to-end validation scenarios
///
/// These tests drive the public validate functions through the whole
/// pipeline (syntax gate, sandbox, comparison, scoring, diagnosis):
/// 1. Passing and failing submissions are scored with floor arithmetic
/// 2. The pass threshold boundary sits exactly at 70
/// 3. A fault in one case never aborts the others
/// 4. Anything outside the allowlist fails as an execution fault
/// 5. Syntax failures short-circuit before any case runs

#[cfg(test)]
mod validation_tests {
    use crate::executor::{validate_single, validate_with_cases, Validator};
    use looptutor_common::config::ValidatorConfig;
    use looptutor_common::content::ProblemBank;
    use looptutor_common::types::{FailureKind, MistakeKind, Problem, TestCase};

    fn problem(concept: Option<&str>, cases: Vec<TestCase>) -> Problem {
        Problem {
            name: "Scenario".to_string(),
            description: "scenario problem".to_string(),
            hint: String::new(),
            difficulty: 1,
            concept: concept.map(str::to_string),
            test_cases: cases,
            starter_code: String::new(),
        }
    }

    /// Cases `n = 1 ..= total`, each expecting `n` printed.
    fn numbered_cases(total: i64) -> Vec<TestCase> {
        (1..=total)
            .map(|n| TestCase::new("", format!("n = {}", n), n.to_string()))
            .collect()
    }

    /// Prints `n` for the first `limit` cases and a wrong answer after.
    fn passes_first(limit: i64) -> String {
        format!("if n <= {}:\n    print(n)\nelse:\n    print('no')\n", limit)
    }

    const COUNT_SOLUTION: &str = "for i in [1,2,3]: print(i)";

    #[test]
    fn test_identical_submission_passes() {
        let p = problem(None, vec![TestCase::new("", "", "1\n2\n3")]);
        let verdict = validate_with_cases(COUNT_SOLUTION, &p, COUNT_SOLUTION);

        assert_eq!(verdict.tests_passed, 1);
        assert_eq!(verdict.tests_total, 1);
        assert_eq!(verdict.score, 100);
        assert!(verdict.overall_passed);
        assert_eq!(verdict.feedback, vec!["Perfect! All tests passed!"]);
        assert!(verdict.mistakes.is_empty());
        assert!(verdict.failure.is_none());

        let case = &verdict.case_results[0];
        assert_eq!(case.description, "Test 1");
        assert_eq!(case.actual, "1\n2\n3");
        assert_eq!(case.solution_output, "1\n2\n3");
    }

    #[test]
    fn test_wrong_submission_fails() {
        let p = problem(None, vec![TestCase::new("", "", "1\n2\n3")]);
        let verdict = validate_with_cases("print(\"wrong\")", &p, COUNT_SOLUTION);

        assert_eq!(verdict.tests_passed, 0);
        assert_eq!(verdict.score, 0);
        assert!(!verdict.overall_passed);
        assert!(verdict.mistakes.is_empty());
        assert_eq!(verdict.feedback[0], "Keep trying! Only 0/1 tests passed.");
        assert_eq!(verdict.case_results[0].actual, "wrong");

        let json = serde_json::to_value(&verdict).unwrap();
        assert!(json["mistakes"].is_array());
    }

    #[test]
    fn test_two_of_three_scores_66() {
        let p = problem(None, numbered_cases(3));
        let verdict = validate_with_cases(&passes_first(2), &p, "print(n)");
        assert_eq!(verdict.tests_passed, 2);
        assert_eq!(verdict.score, 66);
        assert!(!verdict.overall_passed);
        assert_eq!(verdict.feedback[0], "Keep trying! Only 2/3 tests passed.");
    }

    #[test]
    fn test_threshold_boundary_70_passes() {
        let p = problem(None, numbered_cases(10));
        let verdict = validate_with_cases(&passes_first(7), &p, "print(n)");
        assert_eq!(verdict.score, 70);
        assert!(verdict.overall_passed);
        assert_eq!(verdict.feedback[0], "Good job! Passed 7/10 tests.");
        assert!(verdict.mistakes.is_empty());
    }

    #[test]
    fn test_threshold_boundary_69_fails() {
        let p = problem(None, numbered_cases(100));
        let verdict = validate_with_cases(&passes_first(69), &p, "print(n)");
        assert_eq!(verdict.tests_passed, 69);
        assert_eq!(verdict.score, 69);
        assert!(!verdict.overall_passed);
    }

    #[test]
    fn test_matching_expected_output_passes_despite_stale_solution() {
        let p = problem(None, vec![TestCase::new("", "", "apple\nbanana")]);
        let student = "for fruit in ['apple', 'banana']:\n    print(fruit)\n";
        let verdict = validate_with_cases(student, &p, "print('cherry')");
        assert!(verdict.case_results[0].passed);
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[test]
    fn test_matching_solution_output_passes_despite_stale_expected() {
        let p = problem(None, vec![TestCase::new("", "", "outdated")]);
        let verdict = validate_with_cases("print(3)", &p, "print(1 + 2)");
        assert!(verdict.case_results[0].passed);
        assert!(verdict.overall_passed);
    }

    #[test]
    fn test_line_trimmed_comparison() {
        let p = problem(None, vec![TestCase::new("", "", "a\nb")]);
        let verdict = validate_with_cases("print('a   ')\nprint('  b')\n", &p, "print('a')\nprint('b')");
        assert!(verdict.overall_passed);
    }

    #[test]
    fn test_idempotent() {
        let p = problem(Some("BasicListIteration"), numbered_cases(3));
        let student = passes_first(1);
        let first = validate_with_cases(&student, &p, "print(n)");
        let second = validate_with_cases(&student, &p, "print(n)");
        assert_eq!(first, second);
    }

    #[test]
    fn test_fault_in_one_case_does_not_abort_others() {
        let p = problem(
            None,
            vec![
                TestCase::new("Empty list", "items = []", "empty"),
                TestCase::new("One item", "items = [5]", "5"),
            ],
        );
        let solution = "if items:\n    print(items[0])\nelse:\n    print('empty')\n";
        let verdict = validate_with_cases("print(items[0])\n", &p, solution);

        assert_eq!(verdict.tests_total, 2);
        assert_eq!(verdict.tests_passed, 1);
        assert_eq!(verdict.score, 50);
        assert_eq!(verdict.failure, Some(FailureKind::Execution));

        let first = &verdict.case_results[0];
        assert_eq!(first.description, "Empty list");
        assert!(!first.passed);
        assert_eq!(first.fault.as_deref(), Some("IndexError: list index out of range"));
        assert_eq!(first.input_used, "items = []");

        let second = &verdict.case_results[1];
        assert!(second.passed);
        assert!(second.fault.is_none());
    }

    #[test]
    fn test_runaway_case_times_out_and_next_case_runs() {
        let validator = Validator::new(ValidatorConfig {
            timeout_ms: 100,
            ..ValidatorConfig::default()
        });
        let p = problem(
            None,
            vec![
                TestCase::new("", "n = 0", "0"),
                TestCase::new("", "n = 1", "1"),
            ],
        );
        let student = "while n == 0:\n    pass\nprint(n)\n";
        let verdict = validator.validate_with_cases(student, &p, "print(n)");

        let fault = verdict.case_results[0].fault.as_deref().unwrap();
        assert!(fault.starts_with("TimeoutError: "));
        assert!(verdict.case_results[1].passed);
        assert_eq!(verdict.score, 50);
    }

    #[test]
    fn test_capability_boundary() {
        let p = problem(None, vec![TestCase::new("", "", "")]);
        for student in [
            "f = open('/etc/passwd')\nprint(f.read())\n",
            "import os\nos.system('ls')\n",
            "print(__import__('os'))\n",
            "print(eval('1 + 1'))\n",
        ] {
            let verdict = validate_with_cases(student, &p, "print('')");
            let case = &verdict.case_results[0];
            assert!(!case.passed, "{} must not pass", student);
            let fault = case.fault.as_deref().unwrap();
            assert!(
                fault.starts_with("NameError: ") || fault.starts_with("ImportError: "),
                "unexpected fault {}",
                fault
            );
        }
    }

    #[test]
    fn test_syntax_failure_short_circuits_both_modes() {
        let broken = "for x in range(5)\n    print(x)";
        let p = problem(Some("BasicListIteration"), numbered_cases(2));

        let verdict = validate_with_cases(broken, &p, "print(n)");
        assert!(verdict.case_results.is_empty());
        assert!(!verdict.syntax_errors.is_empty());
        assert_eq!(verdict.failure, Some(FailureKind::Syntax));
        assert_eq!(verdict.mistakes[0].kind, MistakeKind::MissingBlockTerminator);

        let verdict = validate_single(broken, "print(1)", "1");
        assert!(verdict.case_results.is_empty());
        assert!(!verdict.syntax_errors.is_empty());
    }

    #[test]
    fn test_mistakes_use_problem_concept() {
        let p = problem(
            Some("DictKeysIteration"),
            vec![TestCase::new("", "ages = {'ann': 30, 'bob': 25}", "ann\nbob")],
        );
        let student = "for name, age in ages.items():\n    print(age)\n";
        let verdict = validate_with_cases(student, &p, "for name in ages.keys():\n    print(name)\n");
        assert!(!verdict.overall_passed);
        assert_eq!(verdict.mistakes.len(), 1);
        assert_eq!(verdict.mistakes[0].kind, MistakeKind::WrongAccessorMethod);
    }

    #[test]
    fn test_mistakes_suppressed_when_passing() {
        let p = problem(
            Some("BasicListIteration"),
            vec![TestCase::new("", "items = ['a', 'b']", "a\nb")],
        );
        let student = "for i in range(len(items)):\n    print(items[i])\n";
        let verdict = validate_with_cases(student, &p, "for item in items:\n    print(item)\n");
        assert!(verdict.overall_passed);
        assert!(verdict.mistakes.is_empty());
    }

    #[test]
    fn test_concurrent_validations_are_independent() {
        let handles: Vec<_> = (1..=4)
            .map(|limit| {
                std::thread::spawn(move || {
                    let p = problem(None, numbered_cases(4));
                    validate_with_cases(&passes_first(limit), &p, "print(n)")
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let verdict = handle.join().unwrap();
            assert_eq!(verdict.tests_passed, i as u32 + 1);
        }
    }

    #[test]
    fn test_shipped_bank_solutions_pass_their_own_cases() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../content/problems.json");
        let bank = ProblemBank::load(&path).unwrap();
        assert!(!bank.problems().is_empty());
        for problem in bank.problems() {
            let solution = bank.solution(&problem.name).unwrap();
            let verdict = validate_with_cases(&solution.code, problem, &solution.code);
            assert_eq!(verdict.score, 100, "{}: {:?}", problem.name, verdict.case_results);
            assert!(verdict.warnings.is_empty(), "{}: {:?}", problem.name, verdict.warnings);
        }
    }
}
