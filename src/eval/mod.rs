pub mod report;
pub mod rubric;
pub mod runner;
pub mod scenario;
pub mod verdict;

pub use report::{Outcome, Report, ReportEntry, ReportFormatter, RubricTally, Summary};
pub use rubric::{Comparison, Rubric, RubricContext, RubricKind, ScoreScale};
pub use runner::{EvaluationHarness, HarnessState};
pub use scenario::{load_scenarios, Scenario, ScenarioBuilder};
pub use verdict::Verdict;
