//! Single-use completion slot shared by every path that can finish a request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{DetectorError, ErrorKind};
use crate::result::{DetectionResult, Interpretation, Observation};

/// What a backend reports for one request.
pub type BackendOutcome = std::result::Result<Vec<Observation>, DetectorError>;

type Deliver = Box<dyn FnOnce(DetectionResult) + Send>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct InFlightRequest {
    id: u64,
    resolved: AtomicBool,
    interpretation: Interpretation,
    deliver: Mutex<Option<Deliver>>,
}

impl InFlightRequest {
    /// First caller wins; everyone after it gets `None`.
    fn claim(&self) -> Option<Deliver> {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.deliver.lock().take()
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        if *self.resolved.get_mut() {
            return;
        }
        if let Some(deliver) = self.deliver.get_mut().take() {
            tracing::warn!(
                request_id = self.id,
                "classifier dropped the request without completing it"
            );
            deliver(DetectionResult::failure(ErrorKind::BackendError));
        }
    }
}

/// Handle a backend uses to finish a request.
///
/// Clones share one in-flight request. Only the first call to [`complete`](Self::complete)
/// or [`fail`](Self::fail) across all clones is delivered; later calls are discarded.
/// If every clone is dropped unresolved, the request fails with
/// [`ErrorKind::BackendError`].
#[derive(Clone)]
pub struct CompletionSink {
    request: Arc<InFlightRequest>,
}

impl CompletionSink {
    pub fn new<F>(interpretation: Interpretation, deliver: F) -> Self
    where
        F: FnOnce(DetectionResult) + Send + 'static,
    {
        Self {
            request: Arc::new(InFlightRequest {
                id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
                resolved: AtomicBool::new(false),
                interpretation,
                deliver: Mutex::new(Some(Box::new(deliver))),
            }),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request.id
    }

    pub fn is_resolved(&self) -> bool {
        self.request.resolved.load(Ordering::Acquire)
    }

    /// Report the backend's ranked candidates or its processing error.
    ///
    /// Returns `false` when the request had already been resolved.
    pub fn complete(&self, outcome: BackendOutcome) -> bool {
        let Some(deliver) = self.request.claim() else {
            tracing::debug!(
                request_id = self.request.id,
                "discarding duplicate completion"
            );
            return false;
        };

        let result = match outcome {
            Ok(observations) => self.request.interpretation.interpret(&observations),
            Err(err) => {
                tracing::warn!(request_id = self.request.id, error = %err, "classification failed");
                DetectionResult::failure(ErrorKind::BackendError)
            }
        };
        deliver(result);
        true
    }

    /// Resolve the request with a failure that did not come from the backend's results.
    pub fn fail(&self, reason: ErrorKind) -> bool {
        match self.request.claim() {
            Some(deliver) => {
                deliver(DetectionResult::failure(reason));
                true
            }
            None => {
                tracing::debug!(
                    request_id = self.request.id,
                    ?reason,
                    "discarding failure for resolved request"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSink")
            .field("request_id", &self.request.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn sink() -> (CompletionSink, mpsc::Receiver<DetectionResult>) {
        let (tx, rx) = mpsc::channel();
        let sink = CompletionSink::new(Interpretation::default(), move |result| {
            tx.send(result).unwrap();
        });
        (sink, rx)
    }

    #[test]
    fn test_first_completion_wins() {
        let (sink, rx) = sink();

        assert!(sink.complete(Ok(vec![Observation::new("NSFW", 0.9)])));
        assert!(!sink.complete(Err(DetectorError::validation("backend", "late error"))));
        assert!(!sink.fail(ErrorKind::SubmissionError));
        drop(sink);

        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].confidence(), Some(0.9));
    }

    #[test]
    fn test_error_then_success_keeps_error() {
        let (sink, rx) = sink();
        let other = sink.clone();

        sink.complete(Err(DetectorError::validation("backend", "broken")));
        other.complete(Ok(vec![Observation::new("NSFW", 0.9)]));
        drop((sink, other));

        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results, vec![DetectionResult::failure(ErrorKind::BackendError)]);
    }

    #[test]
    fn test_dropped_sink_fails_request() {
        let (sink, rx) = sink();
        let clone = sink.clone();
        drop(sink);
        assert!(rx.try_recv().is_err());
        drop(clone);

        assert_eq!(
            rx.recv().unwrap(),
            DetectionResult::failure(ErrorKind::BackendError)
        );
    }

    #[test]
    fn test_racing_completions_deliver_once() {
        for _ in 0..50 {
            let (sink, rx) = sink();
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let sink = sink.clone();
                    thread::spawn(move || {
                        if i % 2 == 0 {
                            sink.complete(Ok(vec![Observation::new("SFW", 0.5)]))
                        } else {
                            sink.complete(Err(DetectorError::validation("backend", "race")))
                        }
                    })
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            drop(sink);

            assert_eq!(wins, 1);
            assert_eq!(rx.iter().count(), 1);
        }
    }
}
