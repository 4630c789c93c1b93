// CLI commands for authors and graders
use anyhow::{bail, Context, Result};
use looptutor_common::config::ValidatorConfig;
use looptutor_common::content::ProblemBank;
use looptutor_common::types::{Problem, Solution, Verdict};
use looptutor_validator::{detect, syntax, SandboxEngine, Validator};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Extra slack on top of the per-run deadline before an audit gives up on
/// a problem.
const AUDIT_GRACE_MS: u64 = 2_000;

pub fn load_config(path: Option<&Path>) -> Result<ValidatorConfig> {
    match path {
        Some(path) => ValidatorConfig::load(path)?.with_env_overrides(),
        None => ValidatorConfig::load_default(),
    }
}

fn load_bank(path: Option<&Path>) -> Result<ProblemBank> {
    match path {
        Some(path) => ProblemBank::load(path),
        None => ProblemBank::load_default(),
    }
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

pub fn check_file(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let report = syntax::check(&source);
    if report.valid {
        println!("✓ {}: no syntax errors", file.display());
        return Ok(());
    }
    for error in &report.errors {
        println!("✗ {}", error);
    }
    bail!("{} has syntax errors", file.display());
}

pub fn show_mistakes(file: &Path, concept: Option<&str>) -> Result<()> {
    let source = read_source(file)?;
    let findings = detect(&source, concept);
    if findings.is_empty() {
        println!("✓ No common mistakes found");
        return Ok(());
    }
    println!("Found {} possible mistake(s):", findings.len());
    for finding in &findings {
        println!();
        println!("  [{:?}] {}", finding.kind, finding.message);
        if let Some(line) = &finding.offending_line {
            println!("    → {}", line);
        }
    }
    Ok(())
}

pub fn run_file(config: &ValidatorConfig, file: &Path, input_file: Option<&Path>) -> Result<()> {
    let source = read_source(file)?;
    let input = match input_file {
        Some(path) => read_source(path)?,
        None => String::new(),
    };

    let engine = SandboxEngine::new(config);
    match engine.execute_with_input(&input, &source) {
        Ok(stdout) => {
            print!("{}", stdout);
            Ok(())
        }
        Err(fault) => {
            match fault.line() {
                Some(line) => eprintln!("✗ {} (line {})", fault, line),
                None => eprintln!("✗ {}", fault),
            }
            bail!("{} raised an error", file.display());
        }
    }
}

pub fn validate_file(
    config: &ValidatorConfig,
    problem_name: &str,
    file: &Path,
    bank_path: Option<&Path>,
    single: bool,
    json: bool,
) -> Result<()> {
    let bank = load_bank(bank_path)?;
    let problem = bank.problem(problem_name)?;
    let solution = bank.solution(problem_name)?;
    let student = read_source(file)?;

    let validator = Validator::new(config.clone());
    let verdict = if single {
        validator.validate_single(&student, &solution.code, single_case_expected(problem, solution))
    } else {
        validator.validate_with_cases(&student, problem, &solution.code)
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&verdict).context("Failed to serialize verdict")?
        );
    } else {
        print_verdict(problem, &verdict);
    }
    Ok(())
}

/// Output a single-case run is graded against: the solution's declared
/// output, else the first non-empty expected output of the problem.
fn single_case_expected<'a>(problem: &'a Problem, solution: &'a Solution) -> &'a str {
    solution
        .expected_output
        .as_deref()
        .unwrap_or_else(|| problem.expected_output())
}

fn print_verdict(problem: &Problem, verdict: &Verdict) {
    println!("🧪 {}", problem.name);
    println!();

    for error in &verdict.syntax_errors {
        println!("  ✗ {}", error);
    }
    for error in &verdict.errors {
        println!("  ✗ {}", error);
    }

    for case in &verdict.case_results {
        let mark = if case.passed { "✓" } else { "✗" };
        println!("  {} {}", mark, case.description);
        if case.passed {
            continue;
        }
        if let Some(fault) = &case.fault {
            println!("    Error:    {}", fault);
        } else {
            println!("    Expected: \"{}\"", case.expected);
            println!("    Got:      \"{}\"", case.actual);
        }
    }

    if !verdict.case_results.is_empty() {
        println!();
        println!(
            "  Score: {} ({} / {} tests)",
            verdict.score, verdict.tests_passed, verdict.tests_total
        );
    }
    for line in &verdict.feedback {
        println!("  {}", line);
    }
    for warning in &verdict.warnings {
        println!("  ⚠ {}", warning);
    }

    if !verdict.mistakes.is_empty() {
        println!();
        println!("  💡 Hints:");
        for mistake in &verdict.mistakes {
            println!("    - {}", mistake.message);
        }
    }
}

pub fn list_problems(bank_path: Option<&Path>, level: Option<u8>) -> Result<()> {
    let bank = load_bank(bank_path)?;
    let problems: Vec<&Problem> = match level {
        Some(level) => bank.problems_by_level(level),
        None => bank.problems().iter().collect(),
    };

    if problems.is_empty() {
        println!("No problems found");
        return Ok(());
    }
    for problem in problems {
        println!(
            "  [{}] {:<28} {:>2} tests  {}",
            problem.difficulty,
            problem.name,
            problem.test_cases.len(),
            problem.concept.as_deref().unwrap_or("-")
        );
    }

    let stats = bank.statistics();
    println!();
    println!(
        "  {} problems, {} solutions, {} test cases, {} concepts",
        stats.problems, stats.solutions, stats.test_cases, stats.concepts
    );
    Ok(())
}

/// Outcome of grading one reference solution against its own problem.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub problem: String,
    pub score: u32,
    pub passed: bool,
    /// Ordinals of cases whose expected output disagrees with the solution.
    pub stale_cases: Vec<u32>,
    pub errors: Vec<String>,
}

impl AuditEntry {
    fn clean(&self) -> bool {
        self.passed && self.score == 100 && self.stale_cases.is_empty() && self.errors.is_empty()
    }

    fn from_verdict(problem: &str, verdict: &Verdict) -> Self {
        let mut errors = verdict.errors.clone();
        errors.extend(verdict.syntax_errors.iter().cloned());
        errors.extend(verdict.case_results.iter().filter_map(|c| c.fault.clone()));
        Self {
            problem: problem.to_string(),
            score: verdict.score,
            passed: verdict.overall_passed,
            stale_cases: verdict
                .case_results
                .iter()
                .filter(|c| c.fault.is_none() && c.solution_output != c.expected)
                .map(|c| c.ordinal)
                .collect(),
            errors,
        }
    }

    fn failed(problem: &str, error: String) -> Self {
        Self {
            problem: problem.to_string(),
            score: 0,
            passed: false,
            stale_cases: Vec::new(),
            errors: vec![error],
        }
    }
}

/// Grade every reference solution in the bank, `parallel` problems at a
/// time. Each problem runs on the blocking pool under an outer timeout.
pub async fn audit_bank(
    config: &ValidatorConfig,
    bank: &ProblemBank,
    parallel: usize,
) -> Vec<AuditEntry> {
    let validator = Validator::new(config.clone());
    let permits = Arc::new(Semaphore::new(parallel.max(1)));
    let mut handles = Vec::new();

    for problem in bank.problems() {
        let name = problem.name.clone();
        let Ok(solution) = bank.solution(&problem.name) else {
            handles.push((name.clone(), None));
            continue;
        };

        let ceiling = Duration::from_millis(
            config.timeout_ms * (2 * problem.test_cases.len() as u64 + 1) + AUDIT_GRACE_MS,
        );
        let validator = validator.clone();
        let problem = problem.clone();
        let code = solution.code.clone();
        let permits = Arc::clone(&permits);

        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            let task = tokio::task::spawn_blocking(move || {
                validator.validate_with_cases(&code, &problem, &code)
            });
            tokio::time::timeout(ceiling, task).await
        });
        handles.push((name, Some(handle)));
    }

    let mut entries = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let entry = match handle {
            None => AuditEntry::failed(&name, format!("No solution found for problem: {}", name)),
            Some(handle) => match handle.await {
                Ok(Ok(Ok(verdict))) => AuditEntry::from_verdict(&name, &verdict),
                Ok(Ok(Err(join_err))) => AuditEntry::failed(&name, format!("Validation task failed: {}", join_err)),
                Ok(Err(_)) => AuditEntry::failed(&name, "Audit timed out".to_string()),
                Err(join_err) => AuditEntry::failed(&name, format!("Audit task failed: {}", join_err)),
            },
        };
        if !entry.clean() {
            warn!(problem = %entry.problem, score = entry.score, "Reference solution does not grade cleanly");
        }
        entries.push(entry);
    }
    entries
}

pub async fn audit(config: &ValidatorConfig, bank_path: Option<&Path>, parallel: usize) -> Result<()> {
    let bank = load_bank(bank_path)?;
    println!("🔍 Auditing {} problems", bank.problems().len());
    println!();

    let entries = audit_bank(config, &bank, parallel).await;
    let dirty = entries.iter().filter(|e| !e.clean()).count();

    for entry in &entries {
        if entry.clean() {
            println!("  ✓ {}", entry.problem);
            continue;
        }
        println!("  ✗ {} (score {})", entry.problem, entry.score);
        if !entry.stale_cases.is_empty() {
            println!("    Stale expected output in tests: {:?}", entry.stale_cases);
        }
        for error in &entry.errors {
            println!("    {}", error);
        }
    }

    println!();
    info!(problems = entries.len(), dirty, "Audit complete");
    if dirty > 0 {
        bail!("{} of {} problems need attention", dirty, entries.len());
    }
    println!("✅ All reference solutions pass their own tests");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BANK: &str = r#"{
        "problems": [
            {
                "name": "PrintEach",
                "difficulty": 1,
                "concept": "BasicListIteration",
                "test_cases": [
                    {"description": "three", "input": "items = [1, 2, 3]", "output": "1\n2\n3"},
                    {"input": "items = []", "output": ""}
                ]
            },
            {
                "name": "Stale",
                "difficulty": 2,
                "test_cases": [{"input": "", "output": "old"}]
            },
            {
                "name": "Orphan",
                "difficulty": 3,
                "test_cases": [{"input": "", "output": "x"}]
            }
        ],
        "solutions": [
            {"problem": "PrintEach", "code": "for item in items:\n    print(item)\n"},
            {"problem": "Stale", "code": "print('new')"}
        ]
    }"#;

    #[tokio::test]
    async fn test_audit_flags_stale_and_missing() {
        let bank = ProblemBank::from_json(BANK).unwrap();
        let entries = audit_bank(&ValidatorConfig::default(), &bank, 2).await;

        assert_eq!(entries.len(), 3);
        assert!(entries[0].clean());

        assert_eq!(entries[1].problem, "Stale");
        assert!(entries[1].passed);
        assert_eq!(entries[1].stale_cases, vec![1]);
        assert!(!entries[1].clean());

        assert_eq!(entries[2].problem, "Orphan");
        assert_eq!(entries[2].errors, vec!["No solution found for problem: Orphan"]);
    }

    #[test]
    fn test_single_case_expected_prefers_solution() {
        let bank = ProblemBank::from_json(BANK).unwrap();
        let problem = bank.problem("PrintEach").unwrap();
        let mut solution = bank.solution("PrintEach").unwrap().clone();
        assert_eq!(single_case_expected(problem, &solution), "1\n2\n3");

        solution.expected_output = Some("declared".to_string());
        assert_eq!(single_case_expected(problem, &solution), "declared");
    }

    #[test]
    fn test_validate_file_single_mode() {
        let mut bank = tempfile::NamedTempFile::new().unwrap();
        write!(bank, "{}", BANK).unwrap();
        let mut student = tempfile::NamedTempFile::new().unwrap();
        write!(student, "print('new')\n").unwrap();

        let config = ValidatorConfig::default();
        assert!(validate_file(&config, "Stale", student.path(), Some(bank.path()), true, true).is_ok());
        assert!(validate_file(&config, "Orphan", student.path(), Some(bank.path()), true, true).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timeout_ms": 1500}}"#).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.timeout_ms, 1500);
    }

    #[test]
    fn test_check_file_reports_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "for x in range(3)\n    print(x)\n").unwrap();
        assert!(check_file(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "for x in range(3):\n    print(x)\n").unwrap();
        assert!(check_file(file.path()).is_ok());
    }
}
