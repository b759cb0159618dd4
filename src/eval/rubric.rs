use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{BackendError, ValidationError},
    eval::{scenario::Scenario, verdict::Verdict},
    functions::FunctionDefinition,
    judge::{RubricPayload, ScoringBackend},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricKind {
    IntentResolution,
    ToolCallAccuracy,
    TaskAdherence,
}

impl RubricKind {
    pub const ALL: [RubricKind; 3] = [
        RubricKind::IntentResolution,
        RubricKind::ToolCallAccuracy,
        RubricKind::TaskAdherence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RubricKind::IntentResolution => "intent_resolution",
            RubricKind::ToolCallAccuracy => "tool_call_accuracy",
            RubricKind::TaskAdherence => "task_adherence",
        }
    }

    pub fn scale(self) -> ScoreScale {
        match self {
            RubricKind::ToolCallAccuracy => ScoreScale::FRACTION,
            RubricKind::IntentResolution | RubricKind::TaskAdherence => ScoreScale::LIKERT,
        }
    }

    pub fn default_threshold(self) -> f64 {
        match self {
            RubricKind::ToolCallAccuracy => 0.8,
            RubricKind::IntentResolution | RubricKind::TaskAdherence => 3.0,
        }
    }
}

impl fmt::Display for RubricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RubricKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        RubricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown rubric '{value}', expected one of: {}",
                    RubricKind::ALL.map(RubricKind::as_str).join(", ")
                )
            })
    }
}

/// Inclusive range a backend score must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl ScoreScale {
    pub const LIKERT: ScoreScale = ScoreScale { min: 1.0, max: 5.0 };
    pub const FRACTION: ScoreScale = ScoreScale { min: 0.0, max: 1.0 };

    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `score >= threshold` passes.
    #[default]
    AtLeast,
    /// `score <= threshold` passes, for rubrics where lower is better.
    AtMost,
}

impl Comparison {
    pub fn holds(self, score: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtLeast => score >= threshold,
            Comparison::AtMost => score <= threshold,
        }
    }
}

/// Extra inputs a rubric may fold into its payload.
#[derive(Debug, Clone, Default)]
pub struct RubricContext {
    pub tool_definitions: Vec<FunctionDefinition>,
}

impl RubricContext {
    pub fn new(tool_definitions: Vec<FunctionDefinition>) -> Self {
        Self { tool_definitions }
    }
}

/// A named evaluation dimension. Stateless; one rubric is shared by every
/// scenario in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rubric {
    name: String,
    kind: RubricKind,
    threshold: f64,
    comparison: Comparison,
}

impl Rubric {
    /// A rubric with the kind's default threshold.
    pub fn standard(kind: RubricKind) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            threshold: kind.default_threshold(),
            comparison: Comparison::AtLeast,
        }
    }

    pub fn new(kind: RubricKind, threshold: f64) -> Result<Self, ValidationError> {
        let rubric = Self {
            threshold,
            ..Self::standard(kind)
        };
        rubric.check_threshold()?;
        Ok(rubric)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyRubricName);
        }
        self.name = name;
        Ok(self)
    }

    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    fn check_threshold(&self) -> Result<(), ValidationError> {
        let invalid = |message: &str| ValidationError::InvalidThreshold {
            rubric: self.name.clone(),
            threshold: self.threshold,
            message: message.to_string(),
        };

        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(invalid("must be a positive number"));
        }
        let scale = self.kind.scale();
        if !scale.contains(self.threshold) {
            return Err(invalid(&format!(
                "outside the {}..={} score scale",
                scale.min, scale.max
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RubricKind {
        self.kind
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn passes(&self, score: f64) -> bool {
        self.comparison.holds(score, self.threshold)
    }

    pub fn payload(&self, scenario: &Scenario, context: &RubricContext) -> RubricPayload {
        match self.kind {
            RubricKind::IntentResolution => RubricPayload::IntentResolution {
                query: scenario.query().to_string(),
                response: scenario.response().to_string(),
            },
            RubricKind::ToolCallAccuracy => RubricPayload::ToolCallAccuracy {
                query: scenario.query().to_string(),
                tool_calls: scenario.tool_calls().to_vec(),
                tool_definitions: context.tool_definitions.clone(),
            },
            RubricKind::TaskAdherence => RubricPayload::TaskAdherence {
                query: scenario.query().to_string(),
                response: scenario.response().to_string(),
                tool_calls: scenario.tool_calls().to_vec(),
            },
        }
    }

    /// Scores one scenario with a single backend call.
    pub async fn invoke(
        &self,
        backend: &dyn ScoringBackend,
        scenario: &Scenario,
        context: &RubricContext,
    ) -> Result<Verdict, BackendError> {
        let payload = self.payload(scenario, context);
        let raw = backend.evaluate(self.kind, &payload).await?;
        Verdict::from_backend(self, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rubric_scales() {
        assert_eq!(Rubric::standard(RubricKind::IntentResolution).threshold(), 3.0);
        assert_eq!(Rubric::standard(RubricKind::ToolCallAccuracy).threshold(), 0.8);
        assert_eq!(Rubric::standard(RubricKind::TaskAdherence).threshold(), 3.0);
    }

    #[test]
    fn non_positive_or_out_of_scale_thresholds_are_rejected() {
        for bad in [0.0, -1.0, f64::NAN] {
            assert!(Rubric::new(RubricKind::TaskAdherence, bad).is_err(), "{bad}");
        }
        assert!(Rubric::new(RubricKind::ToolCallAccuracy, 1.5).is_err());
        assert!(Rubric::new(RubricKind::IntentResolution, 6.0).is_err());
        assert!(Rubric::new(RubricKind::ToolCallAccuracy, 0.5).is_ok());
    }

    #[test]
    fn comparison_direction_is_respected() {
        let at_least = Rubric::standard(RubricKind::TaskAdherence);
        assert!(at_least.passes(3.0));
        assert!(!at_least.passes(2.9));

        let at_most = Rubric::standard(RubricKind::TaskAdherence).with_comparison(Comparison::AtMost);
        assert!(at_most.passes(2.0));
        assert!(!at_most.passes(4.0));
    }

    #[test]
    fn names_parse_in_either_case_style() {
        assert_eq!("tool-call-accuracy".parse::<RubricKind>(), Ok(RubricKind::ToolCallAccuracy));
        assert_eq!("Intent_Resolution".parse::<RubricKind>(), Ok(RubricKind::IntentResolution));
        assert!("fluency".parse::<RubricKind>().is_err());
    }

    #[test]
    fn blank_names_are_rejected() {
        let error = Rubric::standard(RubricKind::TaskAdherence).with_name(" ").unwrap_err();
        assert_eq!(error, ValidationError::EmptyRubricName);
    }
}
