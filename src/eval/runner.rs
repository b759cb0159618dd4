use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use futures_util::{stream, StreamExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::CredentialProvider,
    config::EvalConfig,
    error::{BackendError, ConfigError, EvalError, ValidationError},
    eval::{
        report::{Outcome, Report, ReportEntry, ReportFormatter},
        rubric::{Rubric, RubricContext, RubricKind},
        scenario::Scenario,
    },
    functions::ToolRegistry,
    judge::{LlmJudge, ScoringBackend},
    providers::azure_openai::{AzureOpenAI, AzureOpenAIConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Idle,
    Running,
    Done,
}

/// Scores every (scenario, rubric) pair against a [`ScoringBackend`].
///
/// Calls run concurrently up to `max_concurrency`; each writes only its own
/// report slot, so results come back in scenario-major, rubric-minor order
/// whatever order the backend answers in.
pub struct EvaluationHarness {
    config: EvalConfig,
    backend: Arc<dyn ScoringBackend>,
    registry: Arc<ToolRegistry>,
    state: Mutex<HarnessState>,
}

impl EvaluationHarness {
    pub fn new(
        config: EvalConfig,
        backend: Arc<dyn ScoringBackend>,
        registry: Arc<ToolRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            registry,
            state: Mutex::new(HarnessState::Idle),
        })
    }

    /// Wires an [`LlmJudge`] over Azure OpenAI. The credential is fetched
    /// here so that authentication problems surface before any scoring.
    pub fn azure(
        config: EvalConfig,
        credentials: &dyn CredentialProvider,
        registry: Arc<ToolRegistry>,
    ) -> Result<Self, EvalError> {
        config.validate()?;
        let credential = credentials.credential()?;
        let provider = AzureOpenAI::from_config(AzureOpenAIConfig::from_eval_config(&config, credential))?;
        let judge = LlmJudge::new(Arc::new(provider), config.deployment.clone());
        Ok(Self::new(config, Arc::new(judge), registry)?)
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn state(&self) -> HarnessState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: HarnessState) {
        set_state(&self.state, state);
    }

    /// The three built-in rubrics, honouring threshold overrides from config.
    pub fn standard_rubrics(&self) -> Result<Vec<Rubric>, ValidationError> {
        RubricKind::ALL
            .into_iter()
            .map(|kind| match self.config.thresholds.for_kind(kind) {
                Some(threshold) => Rubric::new(kind, threshold),
                None => Ok(Rubric::standard(kind)),
            })
            .collect()
    }

    pub async fn run(&self, scenarios: &[Scenario], rubrics: &[Rubric]) -> Report {
        self.run_with_cancellation(scenarios, rubrics, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops dispatching when `cancel` fires.
    /// In-flight calls are dropped and their slots report `Cancelled`.
    pub async fn run_with_cancellation(
        &self,
        scenarios: &[Scenario],
        rubrics: &[Rubric],
        cancel: CancellationToken,
    ) -> Report {
        self.set_state(HarnessState::Running);
        let _finished = FinishOnDrop(&self.state);
        let started_at = Utc::now();
        let labels = unique_labels(scenarios);

        let pairs: Vec<(&Scenario, &Rubric)> = scenarios
            .iter()
            .flat_map(|scenario| rubrics.iter().map(move |rubric| (scenario, rubric)))
            .collect();
        tracing::info!(
            backend = self.backend.name(),
            scenarios = scenarios.len(),
            rubrics = rubrics.len(),
            pairs = pairs.len(),
            "evaluation started"
        );

        let context = RubricContext::new(self.registry.definitions());
        let context = &context;
        let backend = self.backend.as_ref();
        let call_timeout = self.config.request_timeout();

        let mut slots = vec![Outcome::Cancelled; pairs.len()];
        let mut pending = stream::iter(pairs.iter().copied().enumerate())
            .map(|(slot, (scenario, rubric))| async move {
                tracing::debug!(scenario = scenario.label(), rubric = rubric.name(), "scoring");
                let outcome = match timeout(call_timeout, rubric.invoke(backend, scenario, context)).await {
                    Ok(Ok(verdict)) => Outcome::Completed { verdict },
                    Ok(Err(error)) => Outcome::Unscored { error },
                    Err(_) => Outcome::Unscored {
                        error: BackendError::Unavailable(format!(
                            "no response within {}ms",
                            call_timeout.as_millis()
                        )),
                    },
                };
                (slot, outcome)
            })
            .buffer_unordered(self.config.max_concurrency.max(1));

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some((slot, outcome)) => {
                        if let Outcome::Unscored { error } = &outcome {
                            let (scenario, rubric) = pairs[slot];
                            tracing::warn!(
                                scenario = scenario.label(),
                                rubric = rubric.name(),
                                %error,
                                "pair could not be scored"
                            );
                        }
                        slots[slot] = outcome;
                    }
                    None => break,
                }
            }
        }
        drop(pending);

        let entries: Vec<ReportEntry> = scenarios
            .iter()
            .enumerate()
            .flat_map(|(index, _)| rubrics.iter().map(move |rubric| (index, rubric)))
            .zip(slots)
            .map(|((index, rubric), outcome)| ReportEntry {
                scenario_label: labels[index].clone(),
                rubric_name: rubric.name().to_string(),
                outcome,
            })
            .collect();

        let report = Report {
            started_at,
            completed_at: Utc::now(),
            cancelled,
            entries,
        };

        let summary = ReportFormatter::summarize(&report);
        if cancelled {
            tracing::warn!(
                completed = summary.pass_count + summary.fail_count,
                cancelled = summary.cancelled_count,
                "evaluation cancelled"
            );
        }
        tracing::info!(
            passed = summary.pass_count,
            failed = summary.fail_count,
            unscored = summary.unscored_count,
            "evaluation finished"
        );

        report
    }
}

fn set_state(state: &Mutex<HarnessState>, next: HarnessState) {
    *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
}

/// Marks the harness `Done` when a run ends, including when its future is dropped.
struct FinishOnDrop<'a>(&'a Mutex<HarnessState>);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        set_state(self.0, HarnessState::Done);
    }
}

/// Scenario labels for the report. A repeated label gets a ` #n` suffix so
/// every entry stays addressable.
fn unique_labels(scenarios: &[Scenario]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    scenarios
        .iter()
        .map(|scenario| {
            let count = seen.entry(scenario.label()).or_insert(0);
            *count += 1;
            if *count == 1 {
                scenario.label().to_string()
            } else {
                format!("{} #{}", scenario.label(), count)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::sleep;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::judge::{BackendVerdict, RubricPayload};

    /// Scores by query text; `slow` queries sleep, `down` queries fail.
    struct TestBackend {
        slow: Option<(String, Duration)>,
        down: Option<(String, RubricKind)>,
    }

    impl TestBackend {
        fn new() -> Self {
            Self { slow: None, down: None }
        }
    }

    #[async_trait]
    impl ScoringBackend for TestBackend {
        async fn evaluate(
            &self,
            kind: RubricKind,
            payload: &RubricPayload,
        ) -> Result<BackendVerdict, BackendError> {
            if let Some((query, delay)) = &self.slow {
                if payload.query() == query {
                    sleep(*delay).await;
                }
            }
            if let Some((query, down_kind)) = &self.down {
                if payload.query() == query && *down_kind == kind {
                    return Err(BackendError::Unavailable("connection refused".to_string()));
                }
            }

            let score = match kind {
                RubricKind::ToolCallAccuracy => 1.0,
                _ => 4.0,
            };
            Ok(BackendVerdict {
                score,
                reason: format!("{kind} for {}", payload.query()),
                details: BTreeMap::new(),
            })
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    fn config() -> EvalConfig {
        EvalConfig::new("https://example", "key", "gpt-4o", "proj")
    }

    fn scenarios() -> Vec<Scenario> {
        ["first", "second", "third"]
            .into_iter()
            .map(|label| {
                Scenario::builder(format!("{label} query"))
                    .label(label)
                    .response("ok")
                    .call("fetch_weather", json!({ "location": "Seattle" }))
                    .build()
                    .unwrap()
            })
            .collect()
    }

    fn harness(backend: TestBackend) -> EvaluationHarness {
        EvaluationHarness::new(config(), Arc::new(backend), Arc::new(ToolRegistry::new())).unwrap()
    }

    fn order(report: &Report) -> Vec<(String, String)> {
        report
            .entries
            .iter()
            .map(|e| (e.scenario_label.clone(), e.rubric_name.clone()))
            .collect()
    }

    #[tokio::test]
    async fn report_order_ignores_backend_latency() {
        let mut backend = TestBackend::new();
        backend.slow = Some(("first query".to_string(), Duration::from_millis(80)));
        let harness = harness(backend);
        let rubrics = harness.standard_rubrics().unwrap();

        assert_eq!(harness.state(), HarnessState::Idle);
        let report = harness.run(&scenarios(), &rubrics).await;
        assert_eq!(harness.state(), HarnessState::Done);

        let expected: Vec<(String, String)> = ["first", "second", "third"]
            .iter()
            .flat_map(|s| RubricKind::ALL.into_iter().map(move |k| (s.to_string(), k.as_str().to_string())))
            .collect();
        assert_eq!(order(&report), expected);
        assert!(report.all_passed());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn one_unreachable_call_does_not_abort_the_run() {
        let mut backend = TestBackend::new();
        backend.down = Some(("second query".to_string(), RubricKind::TaskAdherence));
        let harness = harness(backend);
        let rubrics = harness.standard_rubrics().unwrap();

        let report = harness.run(&scenarios(), &rubrics).await;
        assert_eq!(report.entries.len(), 9);

        let failed = report.entry("second", "task_adherence").unwrap();
        assert!(matches!(
            &failed.outcome,
            Outcome::Unscored { error: BackendError::Unavailable(_) }
        ));

        let summary = ReportFormatter::summarize(&report);
        assert_eq!(summary.pass_count, 8);
        assert_eq!(summary.fail_count, 0);
        assert_eq!(summary.unscored_count, 1);
    }

    #[tokio::test]
    async fn hung_backend_times_out_as_unscored() {
        let mut backend = TestBackend::new();
        backend.slow = Some(("first query".to_string(), Duration::from_secs(5)));
        let harness = EvaluationHarness::new(
            config().with_timeout(Duration::from_millis(50)),
            Arc::new(backend),
            Arc::new(ToolRegistry::new()),
        )
        .unwrap();
        let rubrics = vec![Rubric::standard(RubricKind::TaskAdherence)];

        let report = harness.run(&scenarios(), &rubrics).await;
        assert!(matches!(report.entries[0].outcome, Outcome::Unscored { .. }));
        assert!(report.entries[1].outcome.verdict().is_some());
    }

    #[tokio::test]
    async fn cancellation_returns_partial_report() {
        let mut backend = TestBackend::new();
        backend.slow = Some(("third query".to_string(), Duration::from_secs(5)));
        let harness = harness(backend);
        let rubrics = vec![Rubric::standard(RubricKind::IntentResolution)];

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = harness
            .run_with_cancellation(&scenarios(), &rubrics, cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.entries.len(), 3);
        assert!(report.entries[0].outcome.verdict().is_some());
        assert!(report.entries[1].outcome.verdict().is_some());
        assert_eq!(report.entries[2].outcome, Outcome::Cancelled);
        assert_eq!(harness.state(), HarnessState::Done);
    }

    #[tokio::test]
    async fn configured_thresholds_feed_standard_rubrics() {
        let mut config = config();
        config.thresholds.tool_call_accuracy = Some(0.5);
        let harness =
            EvaluationHarness::new(config, Arc::new(TestBackend::new()), Arc::new(ToolRegistry::new())).unwrap();

        let rubrics = harness.standard_rubrics().unwrap();
        assert_eq!(rubrics[1].threshold(), 0.5);
        assert_eq!(rubrics[0].threshold(), 3.0);
    }

    #[tokio::test]
    async fn repeated_labels_are_made_distinct() {
        let harness = harness(TestBackend::new());
        let same = || {
            Scenario::builder("What's the weather in Seattle?")
                .response("Sunny.")
                .build()
                .unwrap()
        };
        let rubrics = vec![Rubric::standard(RubricKind::IntentResolution)];

        let report = harness.run(&[same(), same()], &rubrics).await;
        let labels: Vec<_> = report.entries.iter().map(|e| e.scenario_label.as_str()).collect();
        assert_eq!(
            labels,
            ["What's the weather in Seattle?", "What's the weather in Seattle? #2"]
        );
    }

    #[tokio::test]
    async fn dropped_run_leaves_harness_done() {
        let mut backend = TestBackend::new();
        backend.slow = Some(("first query".to_string(), Duration::from_secs(5)));
        let harness = harness(backend);
        let rubrics = harness.standard_rubrics().unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(50), harness.run(&scenarios(), &rubrics)).await;
        assert!(abandoned.is_err());
        assert_eq!(harness.state(), HarnessState::Done);
    }

    #[test]
    fn missing_setting_fails_before_any_run() {
        let mut config = config();
        config.project_connection.clear();
        let result = EvaluationHarness::new(config, Arc::new(TestBackend::new()), Arc::new(ToolRegistry::new()));
        assert!(matches!(result, Err(ConfigError::Missing("project_connection"))));
    }
}
