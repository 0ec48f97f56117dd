//! Classifier weight artifact
//!
//! Weights are stored as JSON: every convolution kernel in
//! `(kh, kw, cin, cout)` order, dense kernels in `(inputs, outputs)` order,
//! and batch-normalisation statistics per channel. The artifact is checked
//! against the fixed architecture before a network is built from it.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{PickerError, Result};
use crate::ml::resnet::{
    block_specs, flatten_dim, CLASS_COUNT, HIDDEN_UNITS, STEM_FILTERS, STEM_KERNEL,
    WINDOW_CHANNELS, WINDOW_SAMPLES,
};

/// Artifact format revision written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Convolution kernel and bias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvWeights {
    /// `[kh, kw, cin, cout]`
    pub kernel_shape: [usize; 4],
    /// Row-major kernel values
    pub kernel: Vec<f32>,
    /// One bias per output channel
    pub bias: Vec<f32>,
}

/// Batch normalisation parameters and running statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormWeights {
    /// Scale
    pub gamma: Vec<f32>,
    /// Offset
    pub beta: Vec<f32>,
    /// Running mean
    pub moving_mean: Vec<f32>,
    /// Running variance
    pub moving_variance: Vec<f32>,
}

/// Convolution followed by batch normalisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvBnWeights {
    /// Convolution
    pub conv: ConvWeights,
    /// Normalisation
    pub norm: BatchNormWeights,
}

/// One residual block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualBlockWeights {
    /// First 3×3 convolution
    pub first: ConvBnWeights,
    /// Second 3×3 convolution
    pub second: ConvBnWeights,
    /// 1×1 skip projection of stage-transition blocks
    #[serde(default)]
    pub projection: Option<ConvBnWeights>,
}

/// Dense kernel and bias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseWeights {
    /// Input features
    pub input_dim: usize,
    /// Output features
    pub output_dim: usize,
    /// Row-major `(input_dim, output_dim)` values
    pub kernel: Vec<f32>,
    /// One bias per output
    pub bias: Vec<f32>,
}

/// Complete weight set of the phase classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    /// Artifact format revision
    pub format_version: u32,
    /// `[samples, channels]` of one input window
    pub input_shape: [usize; 2],
    /// Stem convolution
    pub stem: ConvBnWeights,
    /// Residual blocks in network order
    pub blocks: Vec<ResidualBlockWeights>,
    /// Hidden dense layer
    pub hidden: DenseWeights,
    /// Output dense layer
    pub output: DenseWeights,
}

fn mismatch(what: &str, expected: impl std::fmt::Debug, got: impl std::fmt::Debug) -> PickerError {
    PickerError::ModelShapeMismatch(format!("{}: expected {:?}, got {:?}", what, expected, got))
}

impl ConvBnWeights {
    fn validate(&self, name: &str, shape: [usize; 4]) -> Result<()> {
        let conv = &self.conv;
        if conv.kernel_shape != shape {
            return Err(mismatch(&format!("{} kernel shape", name), shape, conv.kernel_shape));
        }
        let size: usize = shape.iter().product();
        if conv.kernel.len() != size {
            return Err(mismatch(&format!("{} kernel length", name), size, conv.kernel.len()));
        }
        let cout = shape[3];
        let norm = &self.norm;
        for (field, len) in [
            ("bias", conv.bias.len()),
            ("gamma", norm.gamma.len()),
            ("beta", norm.beta.len()),
            ("moving_mean", norm.moving_mean.len()),
            ("moving_variance", norm.moving_variance.len()),
        ] {
            if len != cout {
                return Err(mismatch(&format!("{} {}", name, field), cout, len));
            }
        }
        Ok(())
    }

    fn he_normal(shape: [usize; 4], rng: &mut StdRng) -> Self {
        let [kh, kw, cin, cout] = shape;
        Self {
            conv: ConvWeights {
                kernel_shape: shape,
                kernel: he_normal_values(kh * kw * cin, kh * kw * cin * cout, rng),
                bias: vec![0.0; cout],
            },
            norm: BatchNormWeights {
                gamma: vec![1.0; cout],
                beta: vec![0.0; cout],
                moving_mean: vec![0.0; cout],
                moving_variance: vec![1.0; cout],
            },
        }
    }
}

impl DenseWeights {
    fn validate(&self, name: &str, inputs: usize, outputs: usize) -> Result<()> {
        if (self.input_dim, self.output_dim) != (inputs, outputs) {
            return Err(mismatch(name, (inputs, outputs), (self.input_dim, self.output_dim)));
        }
        if self.kernel.len() != inputs * outputs || self.bias.len() != outputs {
            return Err(mismatch(
                &format!("{} value count", name),
                (inputs * outputs, outputs),
                (self.kernel.len(), self.bias.len()),
            ));
        }
        Ok(())
    }

    fn he_normal(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        Self {
            input_dim: inputs,
            output_dim: outputs,
            kernel: he_normal_values(inputs, inputs * outputs, rng),
            bias: vec![0.0; outputs],
        }
    }
}

fn he_normal_values(fan_in: usize, count: usize, rng: &mut StdRng) -> Vec<f32> {
    let std_dev = (2.0 / fan_in as f32).sqrt();
    match Normal::new(0.0f32, std_dev) {
        Ok(normal) => (0..count).map(|_| normal.sample(rng)).collect(),
        Err(_) => vec![0.0; count],
    }
}

impl ModelWeights {
    /// Read an artifact from disk
    ///
    /// # Errors
    ///
    /// `PickerError::WeightLoad` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PickerError::WeightLoad(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let weights = Self::from_json_str(&content)?;
        log::info!(
            "Loaded classifier weights from {} ({} parameters)",
            path.display(),
            weights.parameter_count()
        );
        Ok(weights)
    }

    /// Parse an artifact from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| PickerError::WeightLoad(format!("Invalid weight artifact: {}", e)))
    }

    /// Serialise to JSON text
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| PickerError::WeightLoad(format!("Cannot serialise weights: {}", e)))
    }

    /// Write the artifact to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Total number of stored values
    pub fn parameter_count(&self) -> usize {
        let conv_bn = |w: &ConvBnWeights| {
            w.conv.kernel.len() + w.conv.bias.len() + 4 * w.norm.gamma.len()
        };
        let blocks: usize = self
            .blocks
            .iter()
            .map(|b| conv_bn(&b.first) + conv_bn(&b.second) + b.projection.as_ref().map_or(0, conv_bn))
            .sum();
        conv_bn(&self.stem)
            + blocks
            + self.hidden.kernel.len()
            + self.hidden.bias.len()
            + self.output.kernel.len()
            + self.output.bias.len()
    }

    /// Check every layer against the fixed architecture
    ///
    /// # Errors
    ///
    /// `PickerError::ModelShapeMismatch` naming the first offending layer.
    pub fn validate(&self) -> Result<()> {
        let input = [WINDOW_SAMPLES, WINDOW_CHANNELS];
        if self.input_shape != input {
            return Err(mismatch("input shape", input, self.input_shape));
        }
        self.stem.validate(
            "stem",
            [STEM_KERNEL, STEM_KERNEL, WINDOW_CHANNELS, STEM_FILTERS],
        )?;

        let specs = block_specs();
        if self.blocks.len() != specs.len() {
            return Err(mismatch("residual block count", specs.len(), self.blocks.len()));
        }
        for (i, (spec, block)) in specs.iter().zip(&self.blocks).enumerate() {
            block
                .first
                .validate(&format!("block {} first", i), [3, 3, spec.in_channels, spec.filters])?;
            block
                .second
                .validate(&format!("block {} second", i), [3, 3, spec.filters, spec.filters])?;
            match (&block.projection, spec.projection) {
                (Some(p), true) => p.validate(
                    &format!("block {} projection", i),
                    [1, 1, spec.in_channels, spec.filters],
                )?,
                (None, false) => {}
                (p, expected) => {
                    return Err(mismatch(
                        &format!("block {} projection present", i),
                        expected,
                        p.is_some(),
                    ))
                }
            }
        }

        self.hidden.validate("hidden dense", flatten_dim(), HIDDEN_UNITS)?;
        self.output.validate("output dense", HIDDEN_UNITS, CLASS_COUNT)?;
        Ok(())
    }

    /// Seeded He-normal weights with identity batch normalisation
    ///
    /// Useful for exercising the pipeline without a trained artifact; the
    /// predictions carry no meaning.
    pub fn he_normal(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let stem = ConvBnWeights::he_normal(
            [STEM_KERNEL, STEM_KERNEL, WINDOW_CHANNELS, STEM_FILTERS],
            &mut rng,
        );
        let blocks = block_specs()
            .iter()
            .map(|spec| ResidualBlockWeights {
                first: ConvBnWeights::he_normal([3, 3, spec.in_channels, spec.filters], &mut rng),
                second: ConvBnWeights::he_normal([3, 3, spec.filters, spec.filters], &mut rng),
                projection: spec.projection.then(|| {
                    ConvBnWeights::he_normal([1, 1, spec.in_channels, spec.filters], &mut rng)
                }),
            })
            .collect();
        let hidden = DenseWeights::he_normal(flatten_dim(), HIDDEN_UNITS, &mut rng);
        let output = DenseWeights::he_normal(HIDDEN_UNITS, CLASS_COUNT, &mut rng);

        Self {
            format_version: FORMAT_VERSION,
            input_shape: [WINDOW_SAMPLES, WINDOW_CHANNELS],
            stem,
            blocks,
            hidden,
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_he_normal_is_valid_and_seeded() {
        let a = ModelWeights::he_normal(42);
        assert!(a.validate().is_ok());
        assert_eq!(a, ModelWeights::he_normal(42));
        assert_ne!(a.stem.conv.kernel, ModelWeights::he_normal(43).stem.conv.kernel);
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let mut weights = ModelWeights::he_normal(1);
        weights.input_shape = [300, 3];
        assert!(matches!(
            weights.validate(),
            Err(PickerError::ModelShapeMismatch(_))
        ));

        let mut weights = ModelWeights::he_normal(1);
        weights.blocks[3].projection = None;
        assert!(matches!(
            weights.validate(),
            Err(PickerError::ModelShapeMismatch(_))
        ));

        let mut weights = ModelWeights::he_normal(1);
        weights.hidden.kernel.pop();
        assert!(matches!(
            weights.validate(),
            Err(PickerError::ModelShapeMismatch(_))
        ));
    }

    #[test]
    fn test_bad_json_is_weight_load_error() {
        assert!(matches!(
            ModelWeights::from_json_str("{\"format_version\": 1"),
            Err(PickerError::WeightLoad(_))
        ));
        assert!(matches!(
            ModelWeights::load("/nonexistent/phase_model.json"),
            Err(PickerError::WeightLoad(_))
        ));
    }
}
