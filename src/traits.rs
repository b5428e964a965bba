use crate::completion::CompletionSink;
use crate::config::{ComputeUnits, ModelConfig};
use crate::errors::{Result, SubmissionError};
use crate::normalize::NormalizedImage;
use crate::pixel_buffer::PixelBuffer;

/// Image payload of a classification request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationInput {
    /// Already stretched to the model input size.
    Normalized(NormalizedImage),
    /// Device-ready frame; the backend fits it to its input itself.
    PixelBuffer(PixelBuffer),
}

impl ClassificationInput {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Normalized(image) => (image.width(), image.height()),
            Self::PixelBuffer(buffer) => (buffer.width(), buffer.height()),
        }
    }
}

/// One request handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    pub input: ClassificationInput,
    pub compute_units: ComputeUnits,
}

/// Abstraction over the classifier that actually scores an image.
///
/// The detector depends on this trait instead of a concrete runtime so that the
/// completion protocol can be driven by scripted backends in tests.
pub trait ClassificationBackend: Send + Sync + 'static {
    /// Build the backend from its model artifact.
    fn load(config: &ModelConfig) -> Result<Self>
    where
        Self: Sized;

    /// Run one request and report through `sink`.
    ///
    /// Candidates must be reported best-first. The sink may be completed on this thread
    /// or later from another one; extra completions are ignored. An `Err` means the
    /// request was refused before any work started.
    fn perform(
        &self,
        request: ClassificationRequest,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmissionError>;
}
