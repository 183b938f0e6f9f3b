use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MODEL_FILE: &str = "mobilenet_v2.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid confidence_threshold {value} in {path}: must be within [0, 1]")]
    Threshold { path: PathBuf, value: f32 },
}

/// Daemon configuration.
///
/// Layered as: built-in defaults, then the optional TOML file, then
/// `FACETOUCH_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// MobileNet feature-extractor ONNX file.
    pub model_path: PathBuf,
    /// Alert sound; a generated beep is used when unset.
    pub sound_path: Option<PathBuf>,
    /// Frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Examples collected per Train request.
    pub samples_per_label: usize,
    /// Pause between training samples.
    pub sample_interval: Duration,
    /// Pause between inference ticks.
    pub inference_interval: Duration,
    /// "touched" must score strictly above this to trigger feedback.
    pub confidence_threshold: f32,
    /// Minimum gap between desktop notifications.
    pub notify_cooldown: Duration,
    /// Neighbours consulted per prediction.
    pub knn_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_path: facetouch_core::default_model_dir().join(DEFAULT_MODEL_FILE),
            sound_path: None,
            warmup_frames: 4,
            samples_per_label: 200,
            sample_interval: Duration::from_millis(100),
            inference_interval: Duration::from_millis(200),
            confidence_threshold: 0.8,
            notify_cooldown: Duration::from_millis(3000),
            knn_k: facetouch_core::classifier::DEFAULT_K,
        }
    }
}

/// On-disk `facetouchd.toml` layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub model_path: Option<PathBuf>,
    pub sound_path: Option<PathBuf>,
    pub warmup_frames: Option<usize>,
    pub samples_per_label: Option<usize>,
    pub sample_interval_ms: Option<u64>,
    pub inference_interval_ms: Option<u64>,
    pub confidence_threshold: Option<f32>,
    pub notify_cooldown_ms: Option<u64>,
    pub knn_k: Option<usize>,
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let file: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(value) = file.confidence_threshold.filter(|&t| !valid_threshold(t)) {
            return Err(ConfigError::Threshold {
                path: path.to_path_buf(),
                value,
            });
        }
        Ok(file)
    }
}

impl Config {
    /// Load configuration from the config file and `FACETOUCH_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let file = match config_file_path(&env) {
            (path, explicit) if explicit || path.exists() => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "loading config file");
                Some(FileConfig::parse(&path, &text)?)
            }
            _ => None,
        };

        Ok(Self::from_sources(file, env))
    }

    /// Merge defaults, an optional parsed file, and an environment lookup.
    pub fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(dir) = env("FACETOUCH_MODEL_DIR") {
            cfg.model_path = PathBuf::from(dir).join(DEFAULT_MODEL_FILE);
        }

        if let Some(f) = file {
            if let Some(v) = f.camera_device {
                cfg.camera_device = v;
            }
            if let Some(v) = f.model_path {
                cfg.model_path = v;
            }
            cfg.sound_path = f.sound_path.or(cfg.sound_path);
            cfg.warmup_frames = f.warmup_frames.unwrap_or(cfg.warmup_frames);
            cfg.samples_per_label = f.samples_per_label.unwrap_or(cfg.samples_per_label);
            if let Some(ms) = f.sample_interval_ms {
                cfg.sample_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = f.inference_interval_ms {
                cfg.inference_interval = Duration::from_millis(ms);
            }
            cfg.confidence_threshold = f.confidence_threshold.unwrap_or(cfg.confidence_threshold);
            if let Some(ms) = f.notify_cooldown_ms {
                cfg.notify_cooldown = Duration::from_millis(ms);
            }
            cfg.knn_k = f.knn_k.unwrap_or(cfg.knn_k);
        }

        if let Some(v) = env("FACETOUCH_CAMERA_DEVICE") {
            cfg.camera_device = v;
        }
        if let Some(v) = env("FACETOUCH_MODEL_PATH") {
            cfg.model_path = PathBuf::from(v);
        }
        if let Some(v) = env("FACETOUCH_SOUND_PATH") {
            cfg.sound_path = Some(PathBuf::from(v));
        }
        cfg.warmup_frames = parse_or(&env, "FACETOUCH_WARMUP_FRAMES", cfg.warmup_frames);
        cfg.samples_per_label = parse_or(&env, "FACETOUCH_SAMPLES_PER_LABEL", cfg.samples_per_label);
        cfg.sample_interval = Duration::from_millis(parse_or(
            &env,
            "FACETOUCH_SAMPLE_INTERVAL_MS",
            cfg.sample_interval.as_millis() as u64,
        ));
        cfg.inference_interval = Duration::from_millis(parse_or(
            &env,
            "FACETOUCH_INFERENCE_INTERVAL_MS",
            cfg.inference_interval.as_millis() as u64,
        ));
        cfg.confidence_threshold = env("FACETOUCH_CONFIDENCE_THRESHOLD")
            .and_then(|v| v.parse::<f32>().ok())
            .filter(|&t| valid_threshold(t))
            .unwrap_or(cfg.confidence_threshold);
        cfg.notify_cooldown = Duration::from_millis(parse_or(
            &env,
            "FACETOUCH_NOTIFY_COOLDOWN_MS",
            cfg.notify_cooldown.as_millis() as u64,
        ));
        cfg.knn_k = parse_or(&env, "FACETOUCH_KNN_K", cfg.knn_k);

        cfg
    }

    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

/// Resolve the config file path. The flag is true when set explicitly.
fn config_file_path(env: &impl Fn(&str) -> Option<String>) -> (PathBuf, bool) {
    if let Some(p) = env("FACETOUCH_CONFIG") {
        return (PathBuf::from(p), true);
    }
    let base = env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    (base.join("facetouch/facetouchd.toml"), false)
}

/// Finite and within [0, 1]; NaN fails the range check.
fn valid_threshold(t: f32) -> bool {
    (0.0..=1.0).contains(&t)
}

fn parse_or<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
