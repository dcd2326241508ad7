//! Generic `Classifier` trait for image-classification engines.

use iris_types::{ClassifierError, Prediction};

use crate::frame::ImageInput;

/// An image-classification engine.
///
/// The network behind it is opaque.  Latency is variable and callers impose
/// no timeout.
pub trait Classifier: Send + Sync {
    /// Classify `image` and return labels ranked by descending confidence.
    ///
    /// An empty list means "nothing recognised" and is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] when the engine cannot process the input.
    fn classify(&self, image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuffer, PixelFormat};

    /// Labels an image by its mean brightness.
    struct BrightnessClassifier;

    impl Classifier for BrightnessClassifier {
        fn classify(&self, image: &ImageInput) -> Result<Vec<Prediction>, ClassifierError> {
            if image.pixels().is_empty() {
                return Err(ClassifierError::InvalidInput("no pixels".to_string()));
            }
            let mean = image.pixels().iter().map(|&p| p as f32).sum::<f32>()
                / image.pixels().len() as f32;
            let bright = mean / 255.0;
            Ok(vec![
                Prediction::new("bright", bright),
                Prediction::new("dark", 1.0 - bright),
            ])
        }
    }

    #[test]
    fn mock_classifier_ranks_output() {
        let data = vec![255u8; 4];
        let frame = FrameBuffer::new(2, 2, 2, PixelFormat::Gray8, &data).unwrap();
        let image = ImageInput::from_frame(&frame, false);
        let ranked = BrightnessClassifier.classify(&image).unwrap();
        assert_eq!(ranked[0].label, "bright");
        assert!((ranked[0].confidence - 1.0).abs() < f32::EPSILON);
    }
}
