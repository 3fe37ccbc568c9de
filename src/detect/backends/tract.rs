#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Classifier;
use crate::detect::prediction::{ClassMapping, Prediction};
use crate::preprocess::{Tensor as InputTensor, MODEL_INPUT_CHANNELS, MODEL_INPUT_SIZE};
use crate::PipelineError;

/// Tract-based backend for ONNX inference.
///
/// Loads an ONNX export of the fall model. The graph takes one NHWC
/// `f32 (1, 150, 150, 3)` input and yields a single sigmoid score.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    mapping: ClassMapping,
}

impl TractBackend {
    /// Load and optimize the model. Any failure is a `ModelLoadFailure`.
    pub fn load<P: AsRef<Path>>(model_path: P, mapping: ClassMapping) -> Result<Self, PipelineError> {
        let model_path = model_path.as_ref();
        let model = build_plan(model_path)
            .map_err(|err| PipelineError::ModelLoadFailure(format!("{:#}", err)))?;
        log::info!("TractBackend: loaded model {}", model_path.display());
        Ok(Self { model, mapping })
    }

    fn run(&self, tensor: &InputTensor) -> Result<f32> {
        let [n, h, w, c] = tensor.shape();
        let input = tract_ndarray::Array4::from_shape_vec((n, h, w, c), tensor.as_slice().to_vec())
            .context("tensor does not match its declared shape")?;
        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .context("ONNX inference failed")?;
        extract_score(outputs)
    }
}

fn build_plan(model_path: &Path) -> Result<SimplePlan<TypedFact, Box<dyn TypedOp>>> {
    let size = MODEL_INPUT_SIZE as usize;
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, size, size, MODEL_INPUT_CHANNELS),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn extract_score(outputs: TVec<TValue>) -> Result<f32> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let scores = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    if scores.len() != 1 {
        return Err(anyhow!(
            "expected a single score, model produced {} values",
            scores.len()
        ));
    }
    scores
        .iter()
        .next()
        .copied()
        .ok_or_else(|| anyhow!("model output was empty"))
}

impl Classifier for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, tensor: &InputTensor) -> Result<Prediction, PipelineError> {
        let score = self
            .run(tensor)
            .map_err(|err| PipelineError::InferenceError(format!("{:#}", err)))?;
        self.mapping.predict(score)
    }

    fn warm_up(&mut self) -> Result<(), PipelineError> {
        let size = MODEL_INPUT_SIZE as usize;
        let blank = InputTensor::from_shape_vec(
            [1, size, size, MODEL_INPUT_CHANNELS],
            vec![0.0; size * size * MODEL_INPUT_CHANNELS],
        )?;
        self.infer(&blank).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_a_load_failure() {
        let result = TractBackend::load("/nonexistent/fall_detection_model.onnx", ClassMapping::default());
        assert!(matches!(result, Err(PipelineError::ModelLoadFailure(_))));
    }
}
