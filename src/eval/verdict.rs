use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::{error::BackendError, eval::rubric::Rubric, judge::BackendVerdict};

/// Outcome of scoring one scenario against one rubric.
///
/// `passed` is derived from `score` and the rubric's threshold when the
/// verdict is built and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    score: f64,
    threshold: f64,
    passed: bool,
    reason: String,
    details: BTreeMap<String, Value>,
}

impl Verdict {
    /// Rejects scores outside the rubric's scale as malformed.
    pub fn from_backend(rubric: &Rubric, raw: BackendVerdict) -> Result<Self, BackendError> {
        let scale = rubric.kind().scale();
        if !scale.contains(raw.score) {
            return Err(BackendError::MalformedResponse(format!(
                "{} score {} outside {}..={}",
                rubric.name(),
                raw.score,
                scale.min,
                scale.max
            )));
        }

        Ok(Self {
            score: raw.score,
            threshold: rubric.threshold(),
            passed: rubric.passes(raw.score),
            reason: raw.reason,
            details: raw.details,
        })
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::eval::rubric::{Comparison, RubricKind};

    fn raw(score: f64) -> BackendVerdict {
        BackendVerdict {
            score,
            reason: "because".to_string(),
            details: BTreeMap::from([("intent_resolved".to_string(), json!(true))]),
        }
    }

    #[test]
    fn passed_flag_tracks_threshold_for_every_score() {
        let rubrics = [
            Rubric::standard(RubricKind::IntentResolution),
            Rubric::standard(RubricKind::TaskAdherence).with_comparison(Comparison::AtMost),
            Rubric::new(RubricKind::TaskAdherence, 4.5).unwrap(),
        ];

        for rubric in &rubrics {
            for step in 4..=20 {
                let score = step as f64 / 4.0;
                let verdict = Verdict::from_backend(rubric, raw(score)).unwrap();
                assert_eq!(
                    verdict.passed(),
                    rubric.comparison().holds(score, rubric.threshold()),
                    "{} at {score}",
                    rubric.name()
                );
            }
        }

        let accuracy = Rubric::standard(RubricKind::ToolCallAccuracy);
        for step in 0..=10 {
            let score = step as f64 / 10.0;
            let verdict = Verdict::from_backend(&accuracy, raw(score)).unwrap();
            assert_eq!(verdict.passed(), score >= 0.8, "accuracy at {score}");
        }
    }

    #[test]
    fn out_of_scale_scores_are_malformed() {
        let rubric = Rubric::standard(RubricKind::IntentResolution);
        assert!(matches!(
            Verdict::from_backend(&rubric, raw(0.0)),
            Err(BackendError::MalformedResponse(_))
        ));
        assert!(Verdict::from_backend(&rubric, raw(f64::NAN)).is_err());
    }

    #[test]
    fn details_are_carried_through() {
        let rubric = Rubric::standard(RubricKind::IntentResolution);
        let verdict = Verdict::from_backend(&rubric, raw(5.0)).unwrap();
        assert_eq!(verdict.detail("intent_resolved"), Some(&json!(true)));
        assert_eq!(verdict.reason(), "because");
    }
}
