pub mod completion;
pub mod config;
pub mod errors;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pixel_buffer;
pub mod result;
pub mod traits;

pub mod mocks;

use std::sync::Arc;

use image::{imageops::FilterType, DynamicImage};
use parking_lot::RwLock;
use tokio::sync::oneshot;

pub use completion::{BackendOutcome, CompletionSink};
pub use config::{ComputeUnits, Config, ExecutionEnvironment, LabelStrategy, ModelConfig};
pub use errors::{DetectorError, ErrorKind, Result, SubmissionError};
pub use model::OnnxClassifier;
pub use normalize::NormalizedImage;
pub use pixel_buffer::{PixelBuffer, PixelFormat};
pub use result::{DetectionResult, Interpretation, Observation};
pub use traits::*;

/// Per-request settings captured from the model configuration.
#[derive(Debug, Clone)]
struct RequestSettings {
    input_width: u32,
    input_height: u32,
    resize_filter: FilterType,
    compute_units: ComputeUnits,
    interpretation: Interpretation,
}

impl RequestSettings {
    fn from_config(config: &ModelConfig) -> Self {
        Self {
            input_width: config.input_width,
            input_height: config.input_height,
            resize_filter: config.resize_filter,
            compute_units: config.compute_units,
            interpretation: Interpretation::from_config(config),
        }
    }
}

struct State<B> {
    backend: Option<Arc<B>>,
    settings: RequestSettings,
}

impl<B> Clone for State<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// Classifies images as safe or explicit, delivering exactly one result per request.
///
/// The detector owns the loaded backend for the lifetime of the process. Its state is
/// only touched behind a lock, so one instance can be shared (`Arc<Detector>`) between
/// tasks without external synchronization. Inference itself runs outside the lock.
pub struct Detector<B: ClassificationBackend = OnnxClassifier> {
    state: RwLock<State<B>>,
}

impl<B: ClassificationBackend> Detector<B> {
    /// An unloaded detector. Every request fails with [`ErrorKind::ModelNotLoaded`]
    /// until a model is loaded.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                backend: None,
                settings: RequestSettings::from_config(&ModelConfig::default()),
            }),
        }
    }

    /// A detector that starts out loaded with an already built backend.
    pub fn with_backend(backend: B, config: &ModelConfig) -> Self {
        let detector = Self::new();
        detector.install(backend, config);
        detector
    }

    /// Load the classifier described by `config`.
    ///
    /// Failure is logged and leaves the detector in whatever state it was in; it is
    /// observable only through [`is_loaded`](Self::is_loaded) and through
    /// `ModelNotLoaded` results.
    pub fn load_model(&self, config: &ModelConfig) {
        match B::load(config) {
            Ok(backend) => self.install(backend, config),
            Err(err) => {
                tracing::error!(
                    model = %config.model_path.display(),
                    error = %err,
                    "failed to load classifier"
                );
            }
        }
    }

    /// Make `backend` the classifier used by subsequent requests.
    pub fn install(&self, backend: B, config: &ModelConfig) {
        let mut state = self.state.write();
        if state.backend.is_some() {
            tracing::warn!("replacing an already loaded classifier");
        }
        state.backend = Some(Arc::new(backend));
        state.settings = RequestSettings::from_config(config);
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().backend.is_some()
    }

    /// Classify `image`, suspending until the backend produces its first outcome.
    ///
    /// An unloaded detector answers `ModelNotLoaded` before the image is looked at.
    ///
    /// The backend runs on the blocking thread pool, so this must be awaited inside a
    /// Tokio runtime.
    pub async fn check(&self, image: &DynamicImage) -> DetectionResult {
        let State { backend, settings } = self.state.read().clone();

        let Some(backend) = backend else {
            return DetectionResult::failure(ErrorKind::ModelNotLoaded);
        };

        let Some(normalized) = NormalizedImage::from_image(
            image,
            settings.input_width,
            settings.input_height,
            settings.resize_filter,
        ) else {
            return DetectionResult::failure(ErrorKind::InvalidImageFormat);
        };

        let (tx, rx) = oneshot::channel();
        let sink = CompletionSink::new(settings.interpretation, move |result| {
            let _ = tx.send(result);
        });
        let request = ClassificationRequest {
            input: ClassificationInput::Normalized(normalized),
            compute_units: settings.compute_units,
        };

        // detached; the sink resolves the request on every exit path of the task
        drop(tokio::task::spawn_blocking(move || {
            submit(backend.as_ref(), request, sink)
        }));

        rx.await
            .unwrap_or(DetectionResult::failure(ErrorKind::BackendError))
    }

    /// Classify a device-ready buffer and hand the result to `completion`.
    ///
    /// Normalization is skipped. The request is submitted on the calling thread;
    /// `completion` runs exactly once, on whichever thread resolves the request.
    pub fn check_pixel_buffer<F>(&self, buffer: PixelBuffer, completion: F)
    where
        F: FnOnce(DetectionResult) + Send + 'static,
    {
        let State { backend, settings } = self.state.read().clone();

        let Some(backend) = backend else {
            completion(DetectionResult::failure(ErrorKind::ModelNotLoaded));
            return;
        };

        let sink = CompletionSink::new(settings.interpretation, completion);
        let request = ClassificationRequest {
            input: ClassificationInput::PixelBuffer(buffer),
            compute_units: settings.compute_units,
        };
        submit(backend.as_ref(), request, sink);
    }
}

impl<B: ClassificationBackend> Default for Detector<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand one request to the backend, converting a refusal into `SubmissionError`.
fn submit<B: ClassificationBackend>(
    backend: &B,
    request: ClassificationRequest,
    sink: CompletionSink,
) {
    let request_id = sink.request_id();
    let (width, height) = request.input.dimensions();
    tracing::debug!(
        request_id,
        width,
        height,
        compute_units = ?request.compute_units,
        "submitting classification request"
    );

    if let Err(err) = backend.perform(request, sink.clone()) {
        tracing::warn!(request_id, error = %err, "classifier rejected request");
        sink.fail(ErrorKind::SubmissionError);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedBackend;
    use image::{Rgb, RgbImage};

    fn image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128, 64, 32])))
    }

    #[tokio::test]
    async fn test_unloaded_detector_fails_fast() {
        let detector: Detector<ScriptedBackend> = Detector::new();
        assert!(!detector.is_loaded());
        assert_eq!(
            detector.check(&image(10, 10)).await,
            DetectionResult::failure(ErrorKind::ModelNotLoaded)
        );
    }

    #[tokio::test]
    async fn test_backend_receives_normalized_image() {
        let backend = ScriptedBackend::returning("NSFW", 0.9);
        let recorder = backend.clone();
        let detector = Detector::with_backend(backend, &ModelConfig::default());

        detector.check(&image(640, 480)).await;

        let request = recorder.last_request().unwrap();
        assert_eq!(request.input.dimensions(), (224, 224));
        assert!(matches!(request.input, ClassificationInput::Normalized(_)));
    }

    #[tokio::test]
    async fn test_compute_units_are_carried_on_requests() {
        let backend = ScriptedBackend::returning("NSFW", 0.9);
        let recorder = backend.clone();
        let config = ModelConfig {
            compute_units: ComputeUnits::CpuOnly,
            ..ModelConfig::default()
        };
        let detector = Detector::with_backend(backend, &config);

        detector.check(&image(1, 1)).await;

        assert_eq!(
            recorder.last_request().unwrap().compute_units,
            ComputeUnits::CpuOnly
        );
    }

    #[test]
    fn test_install_replaces_backend() {
        let detector = Detector::with_backend(
            ScriptedBackend::returning("NSFW", 0.1),
            &ModelConfig::default(),
        );
        let second = ScriptedBackend::returning("NSFW", 0.7);
        let recorder = second.clone();
        detector.install(second, &ModelConfig::default());

        let buffer = PixelBuffer::new(1, 1, PixelFormat::Rgb8, vec![0, 0, 0]).unwrap();
        detector.check_pixel_buffer(buffer, |_| {});
        assert_eq!(recorder.calls(), 1);
    }
}
