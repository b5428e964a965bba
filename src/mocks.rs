use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::completion::CompletionSink;
use crate::config::ModelConfig;
use crate::errors::{DetectorError, Result, SubmissionError};
use crate::result::Observation;
use crate::traits::{ClassificationBackend, ClassificationRequest};

/// One completion a [`ScriptedBackend`] delivers.
#[derive(Debug, Clone)]
pub enum Step {
    Complete(Vec<Observation>),
    Fail(String),
}

/// Backend for tests that replays a fixed script of completions.
///
/// Clones share the call counter and the recorded request, so a test can keep a recorder
/// after handing the backend to a detector.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    steps: Vec<Step>,
    reject: Option<String>,
    on_thread: bool,
    calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<ClassificationRequest>>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            reject: None,
            on_thread: false,
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Reports a single candidate.
    pub fn returning(label: &str, confidence: f32) -> Self {
        Self::new(vec![Step::Complete(vec![Observation::new(label, confidence)])])
    }

    /// Reports an already ranked candidate list.
    pub fn ranked(observations: Vec<Observation>) -> Self {
        Self::new(vec![Step::Complete(observations)])
    }

    pub fn failing(message: &str) -> Self {
        Self::new(vec![Step::Fail(message.to_string())])
    }

    /// Refuses every request at submission time.
    pub fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Self::new(vec![])
        }
    }

    /// Accepts requests but never completes them.
    pub fn silent() -> Self {
        Self::new(vec![])
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.steps.push(Step::Fail(message.to_string()));
        self
    }

    pub fn then_return(mut self, label: &str, confidence: f32) -> Self {
        self.steps
            .push(Step::Complete(vec![Observation::new(label, confidence)]));
        self
    }

    /// Complete from a separate thread after `perform` has returned.
    pub const fn on_thread(mut self) -> Self {
        self.on_thread = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ClassificationRequest> {
        self.last_request.lock().clone()
    }

    fn replay(steps: &[Step], sink: &CompletionSink) {
        for step in steps {
            match step {
                Step::Complete(observations) => {
                    sink.complete(Ok(observations.clone()));
                }
                Step::Fail(message) => {
                    sink.complete(Err(DetectorError::validation(
                        "scripted backend",
                        message.clone(),
                    )));
                }
            }
        }
    }
}

impl ClassificationBackend for ScriptedBackend {
    /// Requires the model file to exist, then reports every configured label with equal
    /// confidence.
    fn load(config: &ModelConfig) -> Result<Self> {
        if !config.model_path.is_file() {
            return Err(DetectorError::FileSystem {
                path: config.model_path.clone(),
                operation: "model file lookup".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "model file does not exist",
                ),
            });
        }
        if config.labels.is_empty() {
            return Err(DetectorError::validation("labels", "must not be empty"));
        }
        let confidence = 1.0 / config.labels.len() as f32;
        Ok(Self::ranked(
            config
                .labels
                .iter()
                .map(|label| Observation::new(label.clone(), confidence))
                .collect(),
        ))
    }

    fn perform(
        &self,
        request: ClassificationRequest,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);

        if let Some(reason) = &self.reject {
            return Err(SubmissionError::new(reason.clone()));
        }

        if self.on_thread {
            let steps = self.steps.clone();
            thread::spawn(move || Self::replay(&steps, &sink));
        } else {
            Self::replay(&self.steps, &sink);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{DetectionResult, Interpretation};
    use std::sync::mpsc;

    #[test]
    fn test_scripted_backend_records_calls() {
        let backend = ScriptedBackend::returning("NSFW", 0.4);
        let recorder = backend.clone();
        let (tx, rx) = mpsc::channel();
        let sink = CompletionSink::new(Interpretation::default(), move |r| {
            tx.send(r).unwrap();
        });

        let request = ClassificationRequest {
            input: crate::traits::ClassificationInput::PixelBuffer(
                crate::pixel_buffer::PixelBuffer::new(
                    1,
                    1,
                    crate::pixel_buffer::PixelFormat::Rgb8,
                    vec![0; 3],
                )
                .unwrap(),
            ),
            compute_units: crate::config::ComputeUnits::All,
        };
        backend.perform(request, sink).unwrap();

        assert_eq!(recorder.calls(), 1);
        assert!(recorder.last_request().is_some());
        assert_eq!(rx.recv().unwrap(), DetectionResult::success(0.4));
    }

    #[test]
    fn test_load_requires_model_file() {
        let config = ModelConfig {
            model_path: "missing.onnx".into(),
            ..ModelConfig::default()
        };
        assert!(ScriptedBackend::load(&config).is_err());
    }
}
