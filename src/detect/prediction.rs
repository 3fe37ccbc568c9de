use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// The two classes the model distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallClass {
    Fall,
    NoFall,
}

impl FallClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallClass::Fall => "fall",
            FallClass::NoFall => "no_fall",
        }
    }
}

/// Class order used when the model was trained (`classes=['fall', 'no_fall']`).
///
/// A binary sigmoid head outputs the probability of the class at index 1, so
/// under this order a low score means "fall".
pub const CLASS_LABELS: [FallClass; 2] = [FallClass::Fall, FallClass::NoFall];

/// Index of `Fall` in [`CLASS_LABELS`].
pub const DEFAULT_FALL_CLASS_INDEX: usize = 0;

/// Explicit class-to-index mapping for the model's score.
///
/// Models exported with the opposite directory order set `fall_index = 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassMapping {
    labels: [FallClass; 2],
}

impl Default for ClassMapping {
    fn default() -> Self {
        Self {
            labels: CLASS_LABELS,
        }
    }
}

impl ClassMapping {
    pub fn with_fall_index(fall_index: usize) -> Result<Self, PipelineError> {
        match fall_index {
            0 => Ok(Self {
                labels: [FallClass::Fall, FallClass::NoFall],
            }),
            1 => Ok(Self {
                labels: [FallClass::NoFall, FallClass::Fall],
            }),
            other => Err(PipelineError::ModelLoadFailure(format!(
                "fall class index must be 0 or 1, got {}",
                other
            ))),
        }
    }

    pub fn fall_index(&self) -> usize {
        if self.labels[0] == FallClass::Fall {
            0
        } else {
            1
        }
    }

    pub fn label(&self, index: usize) -> FallClass {
        self.labels[index.min(1)]
    }

    /// Build a prediction from the raw model score (probability of index 1).
    pub fn predict(&self, score: f32) -> Result<Prediction, PipelineError> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(PipelineError::InferenceError(format!(
                "model score {} outside [0, 1]",
                score
            )));
        }
        // f32::round sends 0.5 to index 1.
        let index = score.round() as usize;
        let fall_confidence = if self.fall_index() == 1 {
            score
        } else {
            1.0 - score
        };
        Ok(Prediction {
            score,
            label: self.label(index),
            fall_confidence,
        })
    }
}

/// Result of classifying one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    /// Raw model output: probability of the class at index 1.
    pub score: f32,
    /// `CLASS_LABELS[round(score)]` under the active mapping.
    pub label: FallClass,
    /// Probability of the `Fall` class.
    pub fall_confidence: f32,
}

impl Prediction {
    pub fn is_fall(&self) -> bool {
        self.label == FallClass::Fall
    }

    /// Confidence of whichever label was predicted.
    pub fn label_confidence(&self) -> f32 {
        if self.is_fall() {
            self.fall_confidence
        } else {
            1.0 - self.fall_confidence
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_order_maps_low_scores_to_fall() {
        // Known-fall sample: the trained model scores a fall still near 0.
        let prediction = ClassMapping::default().predict(0.03).unwrap();
        assert_eq!(prediction.label, FallClass::Fall);
        assert!((prediction.fall_confidence - 0.97).abs() < 1e-6);

        let prediction = ClassMapping::default().predict(0.96).unwrap();
        assert_eq!(prediction.label, FallClass::NoFall);
        assert!((prediction.label_confidence() - 0.96).abs() < 1e-6);
    }

    #[test]
    fn fall_index_one_reads_score_directly() {
        let mapping = ClassMapping::with_fall_index(1).unwrap();
        let prediction = mapping.predict(0.9).unwrap();
        assert_eq!(prediction.label, FallClass::Fall);
        assert!((prediction.fall_confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn midpoint_rounds_to_index_one() {
        let prediction = ClassMapping::default().predict(0.5).unwrap();
        assert_eq!(prediction.label, FallClass::NoFall);
    }

    #[test]
    fn rejects_out_of_range_scores() {
        let mapping = ClassMapping::default();
        assert!(mapping.predict(f32::NAN).is_err());
        assert!(mapping.predict(1.2).is_err());
        assert!(mapping.predict(-0.1).is_err());
    }

    #[test]
    fn rejects_bad_fall_index() {
        assert!(ClassMapping::with_fall_index(2).is_err());
        assert_eq!(ClassMapping::with_fall_index(0).unwrap().fall_index(), 0);
    }
}
