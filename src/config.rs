//! Configuration parameters for phase picking

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PickerError, Result};
use crate::ml::inference::ComputeBackend;
use crate::preprocessing::resample::InterpolationMethod;

/// Picking configuration parameters
///
/// The window geometry and model rate are fixed by the trained classifier;
/// they live here so the closed-form relationships can be exercised with
/// other values in tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickerConfig {
    // Waveform preparation
    /// Sampling rate the classifier was trained on, in Hz (default: 100.0)
    pub model_sampling_rate: f64,

    /// Interpolation used when resampling to the model rate
    /// (default: WeightedAverageSlopes)
    pub interpolation: InterpolationMethod,

    // Windowing
    /// Samples per classifier window (default: 400)
    pub window_length: usize,

    /// Samples between consecutive window starts (default: 20)
    pub stride: usize,

    /// Zero margin added to both ends of every channel (default: 200)
    pub pad_width: usize,

    // Inference
    /// Windows per sub-batch; progress is reported once per sub-batch (default: 32)
    pub batch_size: usize,

    /// Where the weight artifact is read from at start-up
    pub weights_path: PathBuf,

    /// Compute path selection (default: Auto)
    pub backend: ComputeBackend,

    // Threshold filter
    /// Confidence threshold applied right after inference (default: 0.01)
    pub confidence_threshold: f32,

    /// Noise threshold applied right after inference (default: 0.80)
    pub noise_threshold: f32,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            model_sampling_rate: 100.0,
            interpolation: InterpolationMethod::WeightedAverageSlopes,
            window_length: 400,
            stride: 20,
            pad_width: 200,
            batch_size: 32,
            weights_path: PathBuf::from("resources/phase_model.json"),
            backend: ComputeBackend::Auto,
            confidence_threshold: 0.01,
            noise_threshold: 0.80,
        }
    }
}

impl PickerConfig {
    /// Parse a configuration from TOML; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PickerError::InvalidInput(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Reading picker configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that the parameters describe a usable pipeline
    pub fn validate(&self) -> Result<()> {
        if self.model_sampling_rate.is_nan() || self.model_sampling_rate <= 0.0 {
            return Err(PickerError::InvalidInput(format!(
                "Model sampling rate must be > 0, got {}",
                self.model_sampling_rate
            )));
        }
        if self.window_length == 0 {
            return Err(PickerError::InvalidInput(
                "Window length must be > 0".to_string(),
            ));
        }
        if self.stride == 0 {
            return Err(PickerError::InvalidInput("Stride must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(PickerError::InvalidInput(
                "Batch size must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("confidence", self.confidence_threshold),
            ("noise", self.noise_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PickerError::InvalidInput(format!(
                    "{} threshold must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_trained_contract() {
        let config = PickerConfig::default();
        assert_eq!(config.window_length, 400);
        assert_eq!(config.stride, 20);
        assert_eq!(config.pad_width, 200);
        assert_eq!(config.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PickerConfig::from_toml_str("stride = 40\nbackend = \"Sequential\"\n").unwrap();
        assert_eq!(config.stride, 40);
        assert_eq!(config.backend, ComputeBackend::Sequential);
        assert_eq!(config.window_length, 400);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PickerConfig::from_toml_str("stride = 0").is_err());
        assert!(PickerConfig::from_toml_str("noise_threshold = 1.5").is_err());
        assert!(PickerConfig::from_toml_str("stride = \"wide\"").is_err());
    }
}
