use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use nsfw_detector::{
    logging, Config, DetectionResult, Detector, ExecutionEnvironment, OnnxClassifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new();
    logging::setup_logging(config.log_format);

    ensure!(
        config.model_path.is_file(),
        "Model path does not exist: {}",
        config.model_path.display()
    );
    ensure!(
        (0.0..=1.0).contains(&config.threshold),
        "Threshold must be between 0 and 1"
    );

    let environment = ExecutionEnvironment::detect();
    tracing::debug!(?environment, "execution environment");

    let detector: Detector<OnnxClassifier> = Detector::new();
    detector.load_model(&config.model_config(environment));
    ensure!(
        detector.is_loaded(),
        "Failed to load model: {}",
        config.model_path.display()
    );

    let image_paths = collect_image_paths(&config.inputs)?;
    if image_paths.is_empty() {
        tracing::warn!("no supported images found");
        return Ok(());
    }

    let progress_bar = ProgressBar::new(image_paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let mut flagged = 0usize;
    for path in &image_paths {
        let line = match image::open(path) {
            Ok(image) => {
                let result = detector.check(&image).await;
                if matches!(result, DetectionResult::Success { confidence } if confidence >= config.threshold)
                {
                    flagged += 1;
                }
                describe(&result, config.threshold)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to open image");
                "Detection failed".to_string()
            }
        };
        progress_bar.println(format!("{}: {}", path.display(), line));
        progress_bar.inc(1);
    }

    progress_bar.finish_and_clear();
    tracing::info!(total = image_paths.len(), flagged, "check complete");
    Ok(())
}

fn describe(result: &DetectionResult, threshold: f32) -> String {
    match result {
        DetectionResult::Success { confidence } => format!(
            "{:.1} % explicit ({})",
            confidence * 100.0,
            if *confidence >= threshold { "NSFW" } else { "SFW" }
        ),
        DetectionResult::Failure { reason } => reason.to_string(),
    }
}

fn collect_image_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        ensure!(input.exists(), "Input does not exist: {}", input.display());
        if input.is_file() {
            paths.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input) {
            let entry =
                entry.with_context(|| format!("Failed to walk directory: {}", input.display()))?;
            if entry.file_type().is_file() && is_supported_image(entry.path()) {
                paths.push(entry.into_path());
            }
        }
    }
    Ok(paths)
}

fn is_supported_image(path: &Path) -> bool {
    ImageFormat::from_path(path).is_ok_and(|format| format.reading_enabled())
}
