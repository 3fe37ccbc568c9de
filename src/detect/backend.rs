use crate::preprocess::Tensor;
use crate::PipelineError;

use super::prediction::Prediction;

/// Classifier backend trait.
///
/// Wraps a pre-trained binary fall model. Implementations receive one
/// preprocessed tensor per call and must report every failure as
/// `InferenceError` so the stream can skip the frame instead of aborting.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// False until a model is loaded. Sessions refuse to start otherwise.
    fn is_ready(&self) -> bool {
        true
    }

    /// Classify one `(1, 150, 150, 3)` tensor.
    fn infer(&mut self, tensor: &Tensor) -> Result<Prediction, PipelineError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<Prediction, PipelineError> {
        (**self).infer(tensor)
    }

    fn warm_up(&mut self) -> Result<(), PipelineError> {
        (**self).warm_up()
    }
}
