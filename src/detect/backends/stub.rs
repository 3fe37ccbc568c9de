use crate::detect::backend::Classifier;
use crate::detect::prediction::{ClassMapping, Prediction};
use crate::preprocess::{Tensor, MODEL_INPUT_CHANNELS, MODEL_INPUT_SIZE};
use crate::PipelineError;

enum StubMode {
    /// Replays scores in order, wrapping around.
    Scripted { scores: Vec<f32>, next: usize },
    /// Scores each tensor by its mean intensity.
    Luminance,
    /// Model never loaded.
    Unready,
}

/// Stub backend for testing and synthetic runs. No model file involved.
///
/// In luminance mode a dark frame scores low, which the default class mapping
/// reads as a fall. The synthetic source renders its fall episodes dark.
pub struct StubBackend {
    mode: StubMode,
    mapping: ClassMapping,
    calls: u64,
}

impl StubBackend {
    pub fn luminance(mapping: ClassMapping) -> Self {
        Self {
            mode: StubMode::Luminance,
            mapping,
            calls: 0,
        }
    }

    /// Replay raw model scores. Non-finite or out-of-range scores surface as
    /// `InferenceError`, which is how tests simulate a misbehaving model.
    pub fn scripted(scores: Vec<f32>, mapping: ClassMapping) -> Self {
        Self {
            mode: StubMode::Scripted { scores, next: 0 },
            mapping,
            calls: 0,
        }
    }

    pub fn unready() -> Self {
        Self {
            mode: StubMode::Unready,
            mapping: ClassMapping::default(),
            calls: 0,
        }
    }

    /// Number of `infer` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn check_shape(tensor: &Tensor) -> Result<(), PipelineError> {
        let expected = [
            1,
            MODEL_INPUT_SIZE as usize,
            MODEL_INPUT_SIZE as usize,
            MODEL_INPUT_CHANNELS,
        ];
        if tensor.shape() != expected {
            return Err(PipelineError::InferenceError(format!(
                "tensor shape {:?} does not match model input {:?}",
                tensor.shape(),
                expected
            )));
        }
        Ok(())
    }
}

impl Classifier for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn is_ready(&self) -> bool {
        !matches!(self.mode, StubMode::Unready)
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<Prediction, PipelineError> {
        self.calls += 1;
        Self::check_shape(tensor)?;
        let score = match &mut self.mode {
            StubMode::Unready => {
                return Err(PipelineError::InferenceError("model not loaded".into()))
            }
            StubMode::Luminance => tensor.mean(),
            StubMode::Scripted { scores, next } => {
                if scores.is_empty() {
                    return Err(PipelineError::InferenceError("empty score script".into()));
                }
                let score = scores[*next % scores.len()];
                *next += 1;
                score
            }
        };
        self.mapping.predict(score)
    }
}
