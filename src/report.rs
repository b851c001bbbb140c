use crate::types::{RunSummary, TestResult};
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub group: String,
    pub name: String,
    #[serde(flatten)]
    pub result: TestResult,
}

impl CaseReport {
    pub fn new(group: impl Into<String>, name: impl Into<String>, result: TestResult) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            result,
        }
    }

    pub fn key(&self) -> String {
        format!("{} / {}", self.group, self.name)
    }
}

/// Results for one subject of one suite, e.g. the mock of an interface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub subject: String,
    pub cases: Vec<CaseReport>,
    /// Setup failure that prevented the cases from running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl SuiteReport {
    pub fn new(suite: &str, subject: impl Into<String>) -> Self {
        Self {
            suite: suite.to_string(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, group: impl Into<String>, name: impl Into<String>, result: TestResult) {
        self.cases.push(CaseReport::new(group, name, result));
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for case in &self.cases {
            summary.record(&case.result);
        }
        summary
    }

    pub fn is_skipped(&self) -> bool {
        !self.cases.is_empty()
            && self
                .cases
                .iter()
                .all(|c| matches!(c.result, TestResult::Skipped(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.aborted.is_some() || self.cases.iter().any(|c| c.result.is_failed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParityReport {
    pub interface: String,
    pub mismatches: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub network: String,
    pub target_chain_available: bool,
    pub suites: Vec<SuiteReport>,
    pub parity: Vec<ParityReport>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        self.suites.iter().fold(RunSummary::default(), |mut acc, suite| {
            let s = suite.summary();
            acc.total_passed += s.total_passed;
            acc.total_failed += s.total_failed;
            acc.total_skipped += s.total_skipped;
            acc
        })
    }

    pub fn has_failures(&self) -> bool {
        self.suites.iter().any(|s| s.has_failures())
            || self.parity.iter().any(|p| !p.mismatches.is_empty())
    }

    pub fn print(&self) {
        println!(
            "{} {} (precompiles {})",
            "Network:".bold(),
            self.network,
            if self.target_chain_available {
                "enabled".green()
            } else {
                "skipped".yellow()
            }
        );

        for suite in &self.suites {
            println!();
            println!("{} {}", suite.suite.bold().cyan(), suite.subject.bold());
            if let Some(reason) = &suite.aborted {
                println!("  {} {}", "ABORTED".red().bold(), reason);
                continue;
            }

            let mut current_group: Option<&str> = None;
            for case in &suite.cases {
                if current_group != Some(case.group.as_str()) {
                    println!("  {}", case.group);
                    current_group = Some(case.group.as_str());
                }
                match &case.result {
                    TestResult::Passed => println!("    {} {}", "✔".green(), case.name),
                    TestResult::Failed(reason) => {
                        println!("    {} {}", "✘".red(), case.name.red());
                        println!("      {}", reason);
                    }
                    TestResult::Skipped(reason) => {
                        println!("    {} {} ({})", "-".yellow(), case.name.dimmed(), reason)
                    }
                }
            }
        }

        for parity in &self.parity {
            if parity.mismatches.is_empty() {
                continue;
            }
            println!();
            println!(
                "{} mock and precompile disagree for {}:",
                "Parity:".red().bold(),
                parity.interface
            );
            for key in &parity.mismatches {
                println!("  - {}", key);
            }
        }

        let summary = self.summary();
        println!();
        println!("{}", "Conformance Summary:".bold());
        println!("   {} passed", summary.total_passed.to_string().green());
        println!("   {} failed", summary.total_failed.to_string().red());
        if summary.total_skipped > 0 {
            println!("   {} skipped", summary.total_skipped.to_string().yellow());
        }
        println!("   Total: {} cases across {} suites", summary.total(), self.suites.len());
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Cases whose pass/fail outcome differs between a mock and its precompile.
///
/// Cases present on only one side count as mismatches. Skipped cases are ignored.
pub fn parity_mismatches(mock: &SuiteReport, precompile: &SuiteReport) -> Vec<String> {
    let outcomes = |suite: &SuiteReport| -> BTreeMap<String, bool> {
        suite
            .cases
            .iter()
            .filter(|c| !matches!(c.result, TestResult::Skipped(_)))
            .map(|c| (c.key(), c.result == TestResult::Passed))
            .collect()
    };
    let mock = outcomes(mock);
    let precompile = outcomes(precompile);

    let mut keys: Vec<&String> = mock.keys().chain(precompile.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter(|key| mock.get(*key) != precompile.get(*key))
        .cloned()
        .collect()
}
