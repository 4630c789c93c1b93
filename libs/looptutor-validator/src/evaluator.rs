/// Output Evaluator - Comparison and Scoring Rules
///
/// **Core Responsibility:**
/// Decide whether a learner's output matches the expected output, and turn
/// per-case pass counts into a score and feedback.
///
/// **Critical Properties:**
/// - Knows nothing about the sandbox
/// - Knows nothing about test case sources
/// - Pure functions: (outputs, counts) → decisions
///
/// **Normalization Rules:**
/// - Trim leading and trailing whitespace of the whole output: YES
/// - Trim each line: YES (second chance, see `outputs_match`)
/// - Ignore newline differences (\n vs \r\n): YES
/// - Case sensitivity: YES (exact match required)
/// - Blank lines inside the output: significant
///
/// **Scoring Rules:**
/// - score = floor(100 * passed / total), 0 when total is 0
/// - overall pass when score >= threshold (default 70)

/// Output with surrounding whitespace removed.
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Normalized output split into lines, each trimmed.
pub fn normalize_lines(output: &str) -> Vec<&str> {
    normalize_output(output).lines().map(str::trim).collect()
}

/// Two outputs match when their trimmed forms are equal, or failing that
/// when their line-trimmed forms are equal. The second test is strictly
/// more lenient, so it decides the outcome.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
        || normalize_lines(actual) == normalize_lines(expected)
}

pub fn score(passed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (u64::from(passed) * 100 / u64::from(total)) as u32
}

pub fn is_passing(score: u32, threshold: u32) -> bool {
    score >= threshold
}

/// Headline feedback for a multi-case run.
pub fn summary_feedback(passed: u32, total: u32, threshold: u32) -> String {
    let score = score(passed, total);
    if score == 100 {
        "Perfect! All tests passed!".to_string()
    } else if is_passing(score, threshold) {
        format!("Good job! Passed {}/{} tests.", passed, total)
    } else {
        format!("Keep trying! Only {}/{} tests passed.", passed, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("  hello  "), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output("\nhello\n"), "hello");
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_normalize_lines() {
        assert_eq!(normalize_lines("a  \n  b\n"), vec!["a", "b"]);
        assert_eq!(normalize_lines("a\r\nb\r\n"), vec!["a", "b"]);
        assert_eq!(normalize_lines("a\n\nb"), vec!["a", "", "b"]);
        assert!(normalize_lines("").is_empty());
    }

    #[test]
    fn test_exact_match() {
        assert!(outputs_match("apple\nbanana\n", "apple\nbanana"));
    }

    #[test]
    fn test_line_trimmed_match() {
        assert!(outputs_match("apple   \nbanana", "apple\nbanana"));
        assert!(outputs_match("  1\n  2\n", "1\n2"));
    }

    #[test]
    fn test_mismatch() {
        assert!(!outputs_match("apple", "Apple"));
        assert!(!outputs_match("1 2", "1\n2"));
        assert!(!outputs_match("1\n\n2", "1\n2"));
        assert!(!outputs_match("", "x"));
    }

    #[test]
    fn test_score_floors() {
        assert_eq!(score(2, 3), 66);
        assert_eq!(score(1, 3), 33);
        assert_eq!(score(3, 3), 100);
        assert_eq!(score(0, 0), 0);
        assert_eq!(score(7, 10), 70);
        assert_eq!(score(69, 100), 69);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(is_passing(70, 70));
        assert!(!is_passing(69, 70));
    }

    #[test]
    fn test_summary_feedback() {
        assert_eq!(summary_feedback(3, 3, 70), "Perfect! All tests passed!");
        assert_eq!(summary_feedback(3, 4, 70), "Good job! Passed 3/4 tests.");
        assert_eq!(summary_feedback(2, 3, 70), "Keep trying! Only 2/3 tests passed.");
    }

    proptest! {
        #[test]
        fn prop_score_is_floor_and_bounded(total in 1u32..500, frac in 0.0f64..=1.0) {
            let passed = ((f64::from(total) * frac) as u32).min(total);
            let s = score(passed, total);
            prop_assert!(s <= 100);
            prop_assert_eq!(s, passed * 100 / total);
            prop_assert!(u64::from(s) * u64::from(total) <= u64::from(passed) * 100);
            prop_assert_eq!(s == 100, passed == total);
        }

        #[test]
        fn prop_match_ignores_surrounding_whitespace(
            lines in prop::collection::vec("[a-z0-9]{1,8}", 1..6),
            pad in "[ \t]{0,3}",
        ) {
            let expected = lines.join("\n");
            let padded: Vec<String> = lines.iter().map(|l| format!("{}{}{}", pad, l, pad)).collect();
            let actual = format!("\n{}\n\n", padded.join("\n"));
            prop_assert!(outputs_match(&actual, &expected));
        }
    }
}
