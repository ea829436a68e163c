//! Shared configuration types for the BlazeFace workspace.
//!
//! These structures provide a common representation for detection parameters and
//! resize behavior that can be serialized to disk and reused by the CLI and the
//! core pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr};

/// Default location of the BlazeFace ONNX model, relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "models/blazeface_128.onnx";

/// Detection parameters forwarded to the model and re-applied while decoding.
///
/// The model graph runs its own score filtering and non-maximum suppression using
/// these values; the decoder re-checks the confidence threshold on the returned
/// detections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum confidence score for a detection to be kept.
    pub conf_threshold: f32,
    /// IoU threshold for the model's internal non-maximum suppression.
    pub iou_threshold: f32,
    /// The maximum number of detections the model may return.
    pub max_detections: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            iou_threshold: 0.3,
            max_detections: 25,
        }
    }
}

/// Trade-off between resize fidelity and throughput.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeQuality {
    /// Preserve visual quality when resizing (default, Triangle filter).
    #[default]
    Quality,
    /// Prioritize throughput (Nearest filter).
    Speed,
}

impl fmt::Display for ResizeQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ResizeQuality::Quality => "quality",
                ResizeQuality::Speed => "speed",
            }
        )
    }
}

impl FromStr for ResizeQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(ResizeQuality::Quality),
            "speed" => Ok(ResizeQuality::Speed),
            other => Err(format!(
                "invalid resize quality '{other}'; expected 'quality' or 'speed'"
            )),
        }
    }
}

/// Persisted application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Optional override for the BlazeFace ONNX model path.
    /// If `None`, [`DEFAULT_MODEL_PATH`] is used.
    pub model_path: Option<String>,
    /// The parameters forwarded to inference and decoding.
    pub detection: DetectionSettings,
    /// Choose between quality-focused or speed-focused resizing.
    pub resize_quality: ResizeQuality,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_path: Some(DEFAULT_MODEL_PATH.into()),
            detection: DetectionSettings::default(),
            resize_quality: ResizeQuality::default(),
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file.
    ///
    /// If the file does not exist or cannot be parsed, an error is returned.
    /// If the `model_path` is missing from the JSON, it falls back to the default.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;

        if settings.model_path.is_none() {
            settings.model_path = Some(DEFAULT_MODEL_PATH.into());
        }

        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// The model path to load, falling back to [`DEFAULT_MODEL_PATH`].
    pub fn resolved_model_path(&self) -> PathBuf {
        self.model_path
            .as_deref()
            .unwrap_or(DEFAULT_MODEL_PATH)
            .into()
    }
}
