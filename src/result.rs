use crate::config::{LabelStrategy, ModelConfig};
use crate::errors::ErrorKind;

/// Outcome of one detection request.
///
/// `Success` carries the probability that the image is explicit: 0.0 for safe content,
/// 1.0 for explicit content. A `Failure` is never a verdict about the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionResult {
    Success { confidence: f32 },
    Failure { reason: ErrorKind },
}

impl DetectionResult {
    /// Clamp `confidence` into `[0, 1]`. A non-finite score carries no usable
    /// observation and becomes `Failure { NoObservation }`.
    pub fn success(confidence: f32) -> Self {
        if confidence.is_finite() {
            Self::Success {
                confidence: confidence.clamp(0.0, 1.0),
            }
        } else {
            Self::failure(ErrorKind::NoObservation)
        }
    }

    pub const fn failure(reason: ErrorKind) -> Self {
        Self::Failure { reason }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub const fn confidence(&self) -> Option<f32> {
        match self {
            Self::Success { confidence } => Some(*confidence),
            Self::Failure { .. } => None,
        }
    }

    pub const fn reason(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason } => Some(*reason),
        }
    }
}

impl From<DetectionResult> for Result<f32, ErrorKind> {
    fn from(result: DetectionResult) -> Self {
        match result {
            DetectionResult::Success { confidence } => Ok(confidence),
            DetectionResult::Failure { reason } => Err(reason),
        }
    }
}

/// One ranked candidate reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub identifier: String,
    pub confidence: f32,
}

impl Observation {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }
}

/// Maps a backend's ranked candidates to an explicit-content confidence.
///
/// Backends must report candidates best-first. With [`LabelStrategy::TopCandidate`]
/// only index 0 is read, so a backend that orders or names its labels differently
/// silently changes the reported score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub explicit_label: String,
    pub strategy: LabelStrategy,
}

impl Interpretation {
    pub fn new(explicit_label: impl Into<String>, strategy: LabelStrategy) -> Self {
        Self {
            explicit_label: explicit_label.into(),
            strategy,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.explicit_label.clone(), config.label_strategy)
    }

    pub fn interpret(&self, observations: &[Observation]) -> DetectionResult {
        match self.strategy {
            LabelStrategy::TopCandidate => match observations.first() {
                Some(top) if top.identifier == self.explicit_label => {
                    DetectionResult::success(top.confidence)
                }
                Some(top) => DetectionResult::success(1.0 - top.confidence),
                None => DetectionResult::failure(ErrorKind::NoObservation),
            },
            LabelStrategy::NamedLabel => observations
                .iter()
                .find(|o| o.identifier == self.explicit_label)
                .map_or(DetectionResult::failure(ErrorKind::NoObservation), |o| {
                    DetectionResult::success(o.confidence)
                }),
        }
    }
}

impl Default for Interpretation {
    fn default() -> Self {
        Self::new("NSFW", LabelStrategy::TopCandidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(result: DetectionResult, expected: f32) {
        let confidence = result.confidence().expect("expected success");
        assert!(
            (confidence - expected).abs() < 1e-6,
            "{} != {}",
            confidence,
            expected
        );
    }

    #[test]
    fn test_explicit_winner_reports_raw_confidence() {
        let policy = Interpretation::default();
        approx(policy.interpret(&[Observation::new("NSFW", 0.9)]), 0.9);
    }

    #[test]
    fn test_safe_winner_reports_complement() {
        let policy = Interpretation::default();
        approx(
            policy.interpret(&[Observation::new("SFW", 0.9), Observation::new("NSFW", 0.1)]),
            0.1,
        );
    }

    #[test]
    fn test_unknown_winner_reports_complement() {
        let policy = Interpretation::default();
        approx(policy.interpret(&[Observation::new("drawing", 0.75)]), 0.25);
    }

    #[test]
    fn test_only_top_candidate_is_read() {
        let policy = Interpretation::default();
        approx(
            policy.interpret(&[Observation::new("SFW", 0.6), Observation::new("NSFW", 0.99)]),
            0.4,
        );
    }

    #[test]
    fn test_no_observation() {
        let policy = Interpretation::default();
        assert_eq!(
            policy.interpret(&[]),
            DetectionResult::failure(ErrorKind::NoObservation)
        );
    }

    #[test]
    fn test_named_label_strategy() {
        let policy = Interpretation::new("NSFW", LabelStrategy::NamedLabel);
        approx(
            policy.interpret(&[Observation::new("SFW", 0.7), Observation::new("NSFW", 0.3)]),
            0.3,
        );
        assert_eq!(
            policy.interpret(&[Observation::new("SFW", 0.7)]).reason(),
            Some(ErrorKind::NoObservation)
        );
    }

    #[test]
    fn test_confidence_is_clamped() {
        let policy = Interpretation::default();
        for raw in [-3.0, -0.1, 0.0, 0.5, 1.0, 1.2, 42.0] {
            for label in ["NSFW", "SFW"] {
                let c = policy
                    .interpret(&[Observation::new(label, raw)])
                    .confidence()
                    .unwrap();
                assert!((0.0..=1.0).contains(&c), "{} from {} {}", c, label, raw);
            }
        }
    }

    #[test]
    fn test_non_finite_confidence_is_not_success() {
        assert_eq!(
            DetectionResult::success(f32::NAN),
            DetectionResult::failure(ErrorKind::NoObservation)
        );
        assert!(!DetectionResult::success(f32::INFINITY).is_success());
    }

    #[test]
    fn test_failure_is_not_zero_confidence() {
        let failure = DetectionResult::failure(ErrorKind::BackendError);
        assert_ne!(failure, DetectionResult::success(0.0));
        assert_eq!(failure.confidence(), None);
        assert_eq!(
            Result::<f32, ErrorKind>::from(failure),
            Err(ErrorKind::BackendError)
        );
    }
}
