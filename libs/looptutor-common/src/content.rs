//! Problem bank - read-only adapter over the exercise content file.
//!
//! Holds the problems, their test cases, and the reference solution linked
//! to each problem. One JSON file, parsed once, indexed by name.

use crate::types::{Problem, Solution};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_BANK_PATH: &str = "content/problems.json";

#[derive(Debug, Serialize, Deserialize)]
struct BankJson {
    problems: Vec<Problem>,
    #[serde(default)]
    solutions: Vec<Solution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BankStatistics {
    pub problems: usize,
    pub solutions: usize,
    pub test_cases: usize,
    pub concepts: usize,
}

#[derive(Debug, Clone)]
pub struct ProblemBank {
    problems: Vec<Problem>,
    index: HashMap<String, usize>,
    solutions: HashMap<String, Solution>,
}

impl ProblemBank {
    pub fn load(bank_path: &Path) -> Result<Self> {
        if !bank_path.exists() {
            bail!("Problem bank not found: {}", bank_path.display());
        }

        let content = fs::read_to_string(bank_path)
            .with_context(|| format!("Failed to read {}", bank_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to load {}", bank_path.display()))
    }

    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_BANK_PATH))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let bank: BankJson = serde_json::from_str(content).context("Failed to parse problem bank")?;

        let mut index = HashMap::new();
        for (idx, problem) in bank.problems.iter().enumerate() {
            if index.insert(problem.name.clone(), idx).is_some() {
                bail!("Duplicate problem name: {}", problem.name);
            }
            if !(1..=3).contains(&problem.difficulty) {
                bail!(
                    "Problem {} has difficulty {} (expected 1-3)",
                    problem.name,
                    problem.difficulty
                );
            }
        }

        let mut solutions = HashMap::new();
        for solution in bank.solutions {
            if !index.contains_key(&solution.problem) {
                tracing::warn!(problem = %solution.problem, "Solution references unknown problem");
            }
            solutions.insert(solution.problem.clone(), solution);
        }

        let mut problems = bank.problems;
        for problem in &mut problems {
            for (idx, tc) in problem.test_cases.iter_mut().enumerate() {
                if tc.description.trim().is_empty() {
                    tc.description = format!("Test {}", idx + 1);
                }
            }
        }

        tracing::info!(
            problems = problems.len(),
            solutions = solutions.len(),
            "Problem bank loaded"
        );

        Ok(Self {
            problems,
            index,
            solutions,
        })
    }

    pub fn problem(&self, name: &str) -> Result<&Problem> {
        self.index
            .get(name)
            .map(|&idx| &self.problems[idx])
            .ok_or_else(|| anyhow!("No problem named: {}", name))
    }

    /// Reference solution for a problem. Its absence is a content error.
    pub fn solution(&self, name: &str) -> Result<&Solution> {
        self.solutions
            .get(name)
            .ok_or_else(|| anyhow!("No solution found for problem: {}", name))
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Problems at a difficulty level (1=easy, 2=medium, 3=hard).
    pub fn problems_by_level(&self, level: u8) -> Vec<&Problem> {
        self.problems.iter().filter(|p| p.difficulty == level).collect()
    }

    pub fn list_problems(&self) -> Vec<String> {
        self.problems.iter().map(|p| p.name.clone()).collect()
    }

    pub fn statistics(&self) -> BankStatistics {
        let mut concepts: Vec<&str> = self
            .problems
            .iter()
            .filter_map(|p| p.concept.as_deref())
            .collect();
        concepts.sort_unstable();
        concepts.dedup();

        BankStatistics {
            problems: self.problems.len(),
            solutions: self.solutions.len(),
            test_cases: self.problems.iter().map(|p| p.test_cases.len()).sum(),
            concepts: concepts.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BANK: &str = r#"{
        "problems": [
            {
                "name": "PrintNumbers",
                "difficulty": 1,
                "concept": "BasicListIteration",
                "test_cases": [
                    {"input": "numbers = [1, 2]", "output": "1\n2"},
                    {"description": "Empty list", "input": "numbers = []", "output": ""}
                ]
            },
            {
                "name": "SumValues",
                "difficulty": 2,
                "concept": "DictValuesIteration",
                "test_cases": []
            }
        ],
        "solutions": [
            {"problem": "PrintNumbers", "code": "for n in numbers:\n    print(n)"}
        ]
    }"#;

    #[test]
    fn test_lookup_and_default_descriptions() {
        let bank = ProblemBank::from_json(BANK).unwrap();
        let problem = bank.problem("PrintNumbers").unwrap();
        assert_eq!(problem.test_cases[0].description, "Test 1");
        assert_eq!(problem.test_cases[1].description, "Empty list");
        assert_eq!(problem.test_cases[0].expected_output, "1\n2");
    }

    #[test]
    fn test_missing_solution_is_error() {
        let bank = ProblemBank::from_json(BANK).unwrap();
        assert!(bank.solution("PrintNumbers").is_ok());
        let err = bank.solution("SumValues").unwrap_err();
        assert!(err.to_string().contains("No solution found"));
    }

    #[test]
    fn test_problems_by_level_and_statistics() {
        let bank = ProblemBank::from_json(BANK).unwrap();
        assert_eq!(bank.problems_by_level(1).len(), 1);
        assert_eq!(bank.problems_by_level(3).len(), 0);

        let stats = bank.statistics();
        assert_eq!(stats.problems, 2);
        assert_eq!(stats.solutions, 1);
        assert_eq!(stats.test_cases, 2);
        assert_eq!(stats.concepts, 2);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let json = r#"{"problems": [{"name": "A"}, {"name": "A"}]}"#;
        assert!(ProblemBank::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_bad_difficulty() {
        let json = r#"{"problems": [{"name": "A", "difficulty": 4}]}"#;
        assert!(ProblemBank::from_json(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BANK.as_bytes()).unwrap();

        let bank = ProblemBank::load(file.path()).unwrap();
        assert_eq!(bank.list_problems(), vec!["PrintNumbers", "SumValues"]);
    }
}
