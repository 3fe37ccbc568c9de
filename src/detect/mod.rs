mod backend;
mod backends;
mod prediction;

pub use backend::Classifier;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use prediction::{
    ClassMapping, FallClass, Prediction, CLASS_LABELS, DEFAULT_FALL_CLASS_INDEX,
};

use crate::config::ModelSettings;
use crate::PipelineError;

/// Build the configured classifier backend.
///
/// Every failure maps to `ModelLoadFailure`: the daemon must not serve
/// frames without a usable model.
pub fn load_classifier(settings: &ModelSettings) -> Result<Box<dyn Classifier>, PipelineError> {
    let mapping = ClassMapping::with_fall_index(settings.fall_class_index)?;
    let mut classifier: Box<dyn Classifier> = match settings.backend.as_str() {
        "stub" => Box::new(StubBackend::luminance(mapping)),
        "tract" => load_tract(settings, mapping)?,
        other => {
            return Err(PipelineError::ModelLoadFailure(format!(
                "unknown classifier backend '{}'",
                other
            )))
        }
    };
    classifier.warm_up().map_err(|err| {
        PipelineError::ModelLoadFailure(format!("{} warm-up failed: {}", classifier.name(), err))
    })?;
    log::info!(
        "classifier '{}' ready (fall class index {})",
        classifier.name(),
        mapping.fall_index()
    );
    Ok(classifier)
}

#[cfg(feature = "backend-tract")]
fn load_tract(
    settings: &ModelSettings,
    mapping: ClassMapping,
) -> Result<Box<dyn Classifier>, PipelineError> {
    let path = settings.path.as_ref().ok_or_else(|| {
        PipelineError::ModelLoadFailure("tract backend requires a model path".into())
    })?;
    Ok(Box::new(TractBackend::load(path, mapping)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(
    _settings: &ModelSettings,
    _mapping: ClassMapping,
) -> Result<Box<dyn Classifier>, PipelineError> {
    Err(PipelineError::ModelLoadFailure(
        "tract backend requires the backend-tract feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> ModelSettings {
        ModelSettings {
            backend: backend.to_string(),
            ..ModelSettings::default()
        }
    }

    #[test]
    fn stub_backend_loads() {
        let classifier = load_classifier(&settings("stub")).unwrap();
        assert_eq!(classifier.name(), "stub");
        assert!(classifier.is_ready());
    }

    #[test]
    fn unknown_backend_is_a_load_failure() {
        assert!(matches!(
            load_classifier(&settings("keras")),
            Err(PipelineError::ModelLoadFailure(_))
        ));
    }

    #[test]
    fn tract_without_model_is_a_load_failure() {
        let mut cfg = settings("tract");
        cfg.path = None;
        assert!(matches!(
            load_classifier(&cfg),
            Err(PipelineError::ModelLoadFailure(_))
        ));
    }
}
