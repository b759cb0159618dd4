use std::{collections::BTreeMap, fmt::Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::BackendError, eval::verdict::Verdict};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed { verdict: Verdict },
    /// The backend never produced a verdict; not the same as a failed check.
    Unscored { error: BackendError },
    Cancelled,
}

impl Outcome {
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Outcome::Completed { verdict } => Some(verdict),
            _ => None,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Outcome::Completed { verdict } if verdict.passed() => "PASS",
            Outcome::Completed { .. } => "FAIL",
            Outcome::Unscored { .. } => "ERROR",
            Outcome::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub scenario_label: String,
    pub rubric_name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Entries are in scenario-major, rubric-minor order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub cancelled: bool,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn entry(&self, scenario_label: &str, rubric_name: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|entry| entry.scenario_label == scenario_label && entry.rubric_name == rubric_name)
    }

    pub fn verdict(&self, scenario_label: &str, rubric_name: &str) -> Option<&Verdict> {
        self.entry(scenario_label, rubric_name)
            .and_then(|entry| entry.outcome.verdict())
    }

    /// True when every entry produced a verdict and every verdict passed.
    pub fn all_passed(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| matches!(&entry.outcome, Outcome::Completed { verdict } if verdict.passed()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RubricTally {
    pub pass: usize,
    pub fail: usize,
    pub unscored: usize,
    pub cancelled: usize,
}

impl RubricTally {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { verdict } if verdict.passed() => self.pass += 1,
            Outcome::Completed { .. } => self.fail += 1,
            Outcome::Unscored { .. } => self.unscored += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub pass_count: usize,
    pub fail_count: usize,
    pub unscored_count: usize,
    pub cancelled_count: usize,
    pub by_rubric: BTreeMap<String, RubricTally>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.pass_count + self.fail_count + self.unscored_count + self.cancelled_count
    }
}

pub struct ReportFormatter;

impl ReportFormatter {
    pub fn summarize(report: &Report) -> Summary {
        let mut overall = RubricTally::default();
        let mut by_rubric: BTreeMap<String, RubricTally> = BTreeMap::new();

        for entry in &report.entries {
            overall.record(&entry.outcome);
            by_rubric
                .entry(entry.rubric_name.clone())
                .or_default()
                .record(&entry.outcome);
        }

        Summary {
            pass_count: overall.pass,
            fail_count: overall.fail,
            unscored_count: overall.unscored,
            cancelled_count: overall.cancelled,
            by_rubric,
        }
    }

    pub fn render(report: &Report) -> String {
        let mut out = String::new();
        let label_width = report
            .entries
            .iter()
            .map(|entry| entry.scenario_label.chars().count() + entry.rubric_name.chars().count() + 3)
            .max()
            .unwrap_or(0);

        for entry in &report.entries {
            let target = format!("{} / {}", entry.scenario_label, entry.rubric_name);
            let _ = write!(out, "{:<11} {:<width$}", format!("[{}]", entry.outcome.tag()), target, width = label_width);
            match &entry.outcome {
                Outcome::Completed { verdict } => {
                    let _ = write!(
                        out,
                        "  score {:.2} (threshold {:.2})",
                        verdict.score(),
                        verdict.threshold()
                    );
                    let reason = single_line(verdict.reason());
                    if !reason.is_empty() {
                        let _ = write!(out, "  {reason}");
                    }
                }
                Outcome::Unscored { error } => {
                    let _ = write!(out, "  {}", single_line(&error.to_string()));
                }
                Outcome::Cancelled => {}
            }
            out.push('\n');
        }

        let summary = Self::summarize(report);
        let _ = writeln!(
            out,
            "\n{} passed, {} failed, {} unscored, {} cancelled ({} total)",
            summary.pass_count,
            summary.fail_count,
            summary.unscored_count,
            summary.cancelled_count,
            summary.total()
        );
        for (rubric, tally) in &summary.by_rubric {
            let _ = writeln!(
                out,
                "  {rubric}: {} passed, {} failed, {} unscored, {} cancelled",
                tally.pass, tally.fail, tally.unscored, tally.cancelled
            );
        }
        out
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
