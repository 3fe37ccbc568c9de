//! Frame → model tensor.
//!
//! The classifier was trained on 150x150 RGB stills rescaled by 1/255, fed as
//! a single-element NHWC batch. `Preprocessor` reproduces that contract.

use image::imageops::{self, FilterType};

use crate::frame::Frame;
use crate::PipelineError;

/// Model input edge length. Fixed by the trained model.
pub const MODEL_INPUT_SIZE: u32 = 150;

/// Channel count of the model input.
pub const MODEL_INPUT_CHANNELS: usize = 3;

/// Normalized model input, shape `(1, height, width, 3)`, values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl Tensor {
    /// Wrap raw values. Fails if the length disagrees with the shape.
    pub fn from_shape_vec(shape: [usize; 4], data: Vec<f32>) -> Result<Self, PipelineError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PipelineError::InferenceError(format!(
                "tensor shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Mean of all values.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

/// Resizes and rescales frames for the classifier. Stateless.
#[derive(Clone, Copy, Debug)]
pub struct Preprocessor {
    size: u32,
    filter: FilterType,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// Bilinear (triangle) resampling to the model input size.
    pub fn new() -> Self {
        Self {
            size: MODEL_INPUT_SIZE,
            filter: FilterType::Triangle,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.size
    }

    pub fn expected_shape(&self) -> [usize; 4] {
        [1, self.size as usize, self.size as usize, MODEL_INPUT_CHANNELS]
    }

    pub fn process(&self, frame: &Frame) -> Result<Tensor, PipelineError> {
        let rgb = frame.to_rgb_image()?;
        let resized = if rgb.dimensions() == (self.size, self.size) {
            rgb
        } else {
            imageops::resize(&rgb, self.size, self.size, self.filter)
        };
        let data = resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();
        Tensor::from_shape_vec(self.expected_shape(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        Frame::from_rgb(image, 1)
    }

    #[test]
    fn output_has_model_shape() {
        let tensor = Preprocessor::new().process(&gradient_frame(640, 480)).unwrap();
        assert_eq!(tensor.shape(), [1, 150, 150, 3]);
        assert_eq!(tensor.as_slice().len(), 150 * 150 * 3);
    }

    #[test]
    fn values_are_unit_range() {
        let tensor = Preprocessor::new().process(&gradient_frame(320, 240)).unwrap();
        assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn rescales_by_255() {
        let image = RgbImage::from_pixel(150, 150, Rgb([255, 0, 51]));
        let tensor = Preprocessor::new().process(&Frame::from_rgb(image, 1)).unwrap();
        let px = &tensor.as_slice()[..3];
        assert_eq!(px[0], 1.0);
        assert_eq!(px[1], 0.0);
        assert!((px[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn repeated_processing_is_identical() {
        let preprocessor = Preprocessor::new();
        let frame = gradient_frame(333, 217);
        let first = preprocessor.process(&frame).unwrap();
        let second = preprocessor.process(&frame).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_zero_area() {
        let frame = Frame::from_raw(Vec::new(), 0, 0, 3, 1);
        assert!(matches!(
            Preprocessor::new().process(&frame),
            Err(PipelineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn rejects_two_channel_frames() {
        let frame = Frame::from_raw(vec![0u8; 8], 2, 2, 2, 1);
        assert!(matches!(
            Preprocessor::new().process(&frame),
            Err(PipelineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn tensor_shape_is_checked() {
        assert!(Tensor::from_shape_vec([1, 2, 2, 3], vec![0.0; 11]).is_err());
        assert!(Tensor::from_shape_vec([1, 2, 2, 3], vec![0.0; 12]).is_ok());
    }
}
