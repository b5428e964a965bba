use image::{imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::TensorRef,
};
use parking_lot::Mutex;

use crate::{
    completion::{BackendOutcome, CompletionSink},
    config::{ComputeUnits, ModelConfig},
    errors::{DetectorError, Result, SubmissionError},
    normalize::fit_rgb,
    result::Observation,
    traits::{ClassificationBackend, ClassificationInput, ClassificationRequest},
};

/// Image classifier backed by an ONNX Runtime session.
///
/// The model takes a `[1, 3, H, W]` float tensor and emits one score per label.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    labels: Vec<String>,
    input_name: String,
    output_name: String,
    input_width: u32,
    input_height: u32,
    mean: [f32; 3],
    std: [f32; 3],
    apply_softmax: bool,
    resize_filter: FilterType,
    compute_units: ComputeUnits,
}

impl OnnxClassifier {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        validate(config)?;

        let mut builder = SessionBuilder::new()
            .map_err(|e| DetectorError::model("session builder init", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectorError::model("optimization level", e))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| DetectorError::model("intra-op threads", e))?;

        builder = match config.compute_units {
            ComputeUnits::All => builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                ])
                .map_err(|e| DetectorError::model("execution providers", e))?,
            ComputeUnits::CpuOnly => builder,
        };

        let session = builder
            .with_memory_pattern(true)
            .map_err(|e| DetectorError::model("memory pattern", e))?
            .commit_from_file(&config.model_path)
            .map_err(|e| {
                DetectorError::model(
                    format!("model file load: {}", config.model_path.display()),
                    e,
                )
            })?;

        require_name(
            "input name",
            &config.input_name,
            session.inputs.iter().map(|input| input.name.as_str()),
        )?;
        require_name(
            "output name",
            &config.output_name,
            session.outputs.iter().map(|output| output.name.as_str()),
        )?;

        if let Some((width, height)) = declared_input_size(&session) {
            if (width, height) != (config.input_width, config.input_height) {
                return Err(DetectorError::validation(
                    "input size",
                    format!(
                        "is {}x{} but the model expects {}x{}",
                        config.input_width, config.input_height, width, height
                    ),
                ));
            }
        }

        let classifier = Self {
            session: Mutex::new(session),
            labels: config.labels.clone(),
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            input_width: config.input_width,
            input_height: config.input_height,
            mean: config.mean,
            std: config.std,
            apply_softmax: config.apply_softmax,
            resize_filter: config.resize_filter,
            compute_units: config.compute_units,
        };

        // warm up and check the output width against the label list
        let zeros = Array4::<f32>::zeros((
            1,
            3,
            config.input_height as usize,
            config.input_width as usize,
        ));
        let scores = classifier.run(zeros)?;
        if scores.len() != classifier.labels.len() {
            return Err(DetectorError::validation(
                "labels",
                format!(
                    "has {} entries but the model emits {} scores",
                    classifier.labels.len(),
                    scores.len()
                ),
            ));
        }

        tracing::info!(
            model = %config.model_path.display(),
            compute_units = ?config.compute_units,
            labels = ?classifier.labels,
            "classifier loaded"
        );
        Ok(classifier)
    }

    pub const fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Score an RGB image, best candidate first.
    pub fn classify(&self, image: RgbImage) -> BackendOutcome {
        let image = fit_rgb(image, self.input_width, self.input_height, self.resize_filter);
        let tensor = to_tensor(&image, self.mean, self.std);
        let mut scores = self.run(tensor)?;
        if self.apply_softmax {
            scores = softmax(&scores);
        }
        rank(&self.labels, &scores)
    }

    fn run(&self, tensor: Array4<f32>) -> Result<Vec<f32>> {
        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(tensor.view())?])?;
        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| missing_name("output name", &self.output_name))?;
        let scores: Vec<f32> = output
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        Ok(scores)
    }
}

impl ClassificationBackend for OnnxClassifier {
    fn load(config: &ModelConfig) -> Result<Self> {
        Self::new(config)
    }

    fn perform(
        &self,
        request: ClassificationRequest,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmissionError> {
        // execution providers are fixed when the session is built
        if request.compute_units == ComputeUnits::CpuOnly
            && self.compute_units == ComputeUnits::All
        {
            return Err(SubmissionError::new(
                "request requires CPU-only execution but the session uses hardware acceleration",
            ));
        }

        let image = match request.input {
            ClassificationInput::Normalized(image) => image.into_rgb(),
            ClassificationInput::PixelBuffer(buffer) => buffer.to_rgb(),
        };
        sink.complete(self.classify(image));
        Ok(())
    }
}

fn validate(config: &ModelConfig) -> Result<()> {
    if !config.model_path.is_file() {
        return Err(DetectorError::FileSystem {
            path: config.model_path.clone(),
            operation: "model file lookup".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "model file does not exist"),
        });
    }
    if config.labels.is_empty() {
        return Err(DetectorError::validation("labels", "must not be empty"));
    }
    if !config.labels.contains(&config.explicit_label) {
        tracing::warn!(
            explicit_label = %config.explicit_label,
            labels = ?config.labels,
            "explicit label is not one of the model labels; every result will be reported as 1 - confidence"
        );
    }
    if config.input_width == 0 || config.input_height == 0 {
        return Err(DetectorError::validation("input size", "must not be empty"));
    }
    if config.std.iter().any(|s| *s == 0.0) {
        return Err(DetectorError::validation("std", "must not contain zero"));
    }
    Ok(())
}

/// Fail unless `wanted` is one of the names the session declares.
fn require_name<'a>(
    field: &str,
    wanted: &str,
    available: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let available: Vec<&str> = available.into_iter().collect();
    if available.contains(&wanted) {
        Ok(())
    } else {
        Err(DetectorError::validation(
            field,
            format!("`{}` is not declared by the model (available: {:?})", wanted, available),
        ))
    }
}

fn missing_name(field: &str, wanted: &str) -> DetectorError {
    DetectorError::validation(field, format!("`{}` is not produced by the model", wanted))
}

/// Spatial size fixed by the model's first input, if it declares one.
fn declared_input_size(session: &Session) -> Option<(u32, u32)> {
    let shape = session.inputs.first()?.input_type.tensor_shape()?;
    if shape.len() != 4 || shape[2] <= 0 || shape[3] <= 0 {
        return None;
    }
    Some((shape[3] as u32, shape[2] as u32))
}

/// HWC bytes to a normalized `[1, 3, H, W]` tensor.
pub fn to_tensor(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Array4<f32> {
    let chw = image.as_ndarray3();
    let (height, width) = (image.height() as usize, image.width() as usize);
    Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
        (f32::from(chw[[c, y, x]]) / 255.0 - mean[c]) / std[c]
    })
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Pair scores with labels and sort best-first.
pub fn rank(labels: &[String], scores: &[f32]) -> BackendOutcome {
    if labels.len() != scores.len() {
        return Err(DetectorError::validation(
            "model output",
            format!("has {} scores for {} labels", scores.len(), labels.len()),
        ));
    }
    let mut observations: Vec<Observation> = labels
        .iter()
        .zip(scores)
        .map(|(label, score)| Observation::new(label.clone(), *score))
        .collect();
    observations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(observations)
}
