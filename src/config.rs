use clap::{Parser, ValueEnum};
use image::imageops::FilterType;
use std::path::PathBuf;

/// Environment variable that marks the process as running on an emulated target.
pub const SIMULATED_ENV_VAR: &str = "NSFW_DETECTOR_SIMULATED";

/// Side length of the square tensor the bundled classifier expects.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image files or directories to check
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(short, long, env = "NSFW_DETECTOR_MODEL")]
    pub model_path: PathBuf,

    /// Class labels in the order the model emits its scores
    #[arg(short, long, value_delimiter = ',', default_values_t = default_labels())]
    pub labels: Vec<String>,

    /// Label that marks explicit content
    #[arg(short, long, default_value = "NSFW")]
    pub explicit_label: String,

    #[arg(long, default_value = "input")]
    pub input_name: String,

    #[arg(long, default_value = "output")]
    pub output_name: String,

    /// Apply softmax to the model output (for models that emit raw logits)
    #[arg(long, default_value_t = false)]
    pub softmax: bool,

    #[arg(long, value_enum, default_value_t = LabelStrategy::TopCandidate)]
    pub label_strategy: LabelStrategy,

    /// Never use hardware acceleration
    #[arg(long, default_value_t = false)]
    pub cpu_only: bool,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(long, default_value_t = 1)]
    pub intra_threads: usize,

    /// Confidence at or above which an image is reported as explicit
    #[arg(short, long, default_value_t = 0.5)]
    pub threshold: f32,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    /// Library-side model settings for a process running in `environment`.
    pub fn model_config(&self, environment: ExecutionEnvironment) -> ModelConfig {
        ModelConfig {
            model_path: self.model_path.clone(),
            labels: self.labels.clone(),
            explicit_label: self.explicit_label.clone(),
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            apply_softmax: self.softmax,
            label_strategy: self.label_strategy,
            compute_units: ComputeUnits::resolve(environment, self.cpu_only),
            device_id: self.device_id,
            intra_threads: self.intra_threads,
            ..ModelConfig::default()
        }
    }
}

fn default_labels() -> Vec<String> {
    vec!["NSFW".to_string(), "SFW".to_string()]
}

/// Everything needed to load a classifier and interpret what it reports.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub labels: Vec<String>,
    pub explicit_label: String,
    pub input_name: String,
    pub output_name: String,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub apply_softmax: bool,
    pub resize_filter: FilterType,
    pub label_strategy: LabelStrategy,
    pub compute_units: ComputeUnits,
    pub device_id: i32,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("nsfw.onnx"),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            labels: default_labels(),
            explicit_label: "NSFW".to_string(),
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            apply_softmax: false,
            resize_filter: FilterType::Triangle,
            label_strategy: LabelStrategy::TopCandidate,
            compute_units: ComputeUnits::All,
            device_id: 0,
            intra_threads: 1,
        }
    }
}

/// How the ranked candidates are turned into an explicit-content confidence.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LabelStrategy {
    /// Trust the highest-ranked candidate; a non-explicit winner reports `1 - confidence`.
    #[default]
    TopCandidate,
    /// Look up the explicit label among all candidates and report its confidence.
    NamedLabel,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where the process is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionEnvironment {
    Hardware,
    /// Emulated target whose acceleration stack cannot be trusted.
    Simulated,
}

impl ExecutionEnvironment {
    pub fn detect() -> Self {
        Self::from_flag(std::env::var(SIMULATED_ENV_VAR).ok().as_deref())
    }

    fn from_flag(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Self::Simulated,
            _ => Self::Hardware,
        }
    }
}

/// Which execution units a classification request may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeUnits {
    All,
    CpuOnly,
}

impl ComputeUnits {
    pub const fn resolve(environment: ExecutionEnvironment, cpu_only: bool) -> Self {
        match (environment, cpu_only) {
            (ExecutionEnvironment::Simulated, _) | (_, true) => Self::CpuOnly,
            (ExecutionEnvironment::Hardware, false) => Self::All,
        }
    }
}
