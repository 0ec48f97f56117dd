//! Residual convolutional phase classifier
//!
//! Architecture, for one `(400, 3)` window:
//!
//! 1. Spectrogram front end → `(22, 33, 3)` image in `[-1, 1]`
//! 2. Stem: zero-pad 2, conv 5×5×32 (valid), batch norm, ReLU, 2×2 max pool → `(11, 16, 32)`
//! 3. Stage 1: three identity blocks at 32 filters
//! 4. Stage 2: projection block (stride 2) + two identity blocks at 64 filters → `(6, 8, 64)`
//! 5. Stage 3: projection block (stride 2) + two identity blocks at 128 filters → `(3, 4, 128)`
//! 6. Flatten (1536) → dense 512 + ReLU → dense 3 → softmax
//!
//! Dropout layers of the trained network are the identity at inference and
//! are omitted.

use std::path::Path;

use ndarray::ArrayView2;

use crate::error::{PickerError, Result};
use crate::features::spectrogram::{frame_count, SpectrogramFrontEnd, BIN_COUNT};
use crate::ml::inference::{PhaseModel, Probabilities};
use crate::ml::layers::{relu, softmax, BatchNorm, Conv2d, Dense, FeatureMap, Padding};
use crate::ml::weights::{ConvBnWeights, DenseWeights, ModelWeights};

/// Samples per classifier window
pub const WINDOW_SAMPLES: usize = 400;

/// Channels per classifier window
pub const WINDOW_CHANNELS: usize = 3;

/// Zero border added around the spectrogram image
pub const STEM_PADDING: usize = 2;

/// Stem kernel size
pub const STEM_KERNEL: usize = 5;

/// Stem filter count
pub const STEM_FILTERS: usize = 32;

/// Units of the hidden dense layer
pub const HIDDEN_UNITS: usize = 512;

/// Output classes: P, S, noise
pub const CLASS_COUNT: usize = 3;

/// Batch normalisation epsilon
pub const BN_EPSILON: f32 = 1e-3;

/// Shape of one residual block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    /// Channels entering the block
    pub in_channels: usize,
    /// Filters of both 3×3 convolutions
    pub filters: usize,
    /// Stride of the first convolution and of the skip projection
    pub stride: usize,
    /// Whether the skip path goes through a 1×1 convolution
    pub projection: bool,
}

/// Residual blocks in network order
pub fn block_specs() -> Vec<BlockSpec> {
    let mut specs = Vec::with_capacity(9);
    let mut channels = STEM_FILTERS;
    for (filters, stride, blocks) in [(32, 1, 3), (64, 2, 3), (128, 2, 3)] {
        for i in 0..blocks {
            let projection = i == 0 && stride != 1;
            specs.push(BlockSpec {
                in_channels: channels,
                filters,
                stride: if projection { stride } else { 1 },
                projection,
            });
            channels = filters;
        }
    }
    specs
}

/// Length of the flattened feature vector
pub fn flatten_dim() -> usize {
    let stem = |n: usize| (n + 2 * STEM_PADDING - STEM_KERNEL + 1) / 2;
    let mut height = stem(frame_count(WINDOW_SAMPLES));
    let mut width = stem(BIN_COUNT);
    let mut channels = STEM_FILTERS;
    for spec in block_specs() {
        height = height.div_ceil(spec.stride);
        width = width.div_ceil(spec.stride);
        channels = spec.filters;
    }
    height * width * channels
}

#[derive(Debug, Clone)]
struct ConvBn {
    conv: Conv2d,
    norm: BatchNorm,
}

impl ConvBn {
    fn new(weights: &ConvBnWeights, stride: usize, padding: Padding) -> Self {
        let bn = &weights.norm;
        Self {
            conv: Conv2d::new(
                weights.conv.kernel.clone(),
                weights.conv.bias.clone(),
                weights.conv.kernel_shape,
                stride,
                padding,
            ),
            norm: BatchNorm::new(&bn.gamma, &bn.beta, &bn.moving_mean, &bn.moving_variance, BN_EPSILON),
        }
    }

    fn forward(&self, input: &FeatureMap) -> FeatureMap {
        let mut out = self.conv.forward(input);
        self.norm.apply(&mut out);
        out
    }
}

#[derive(Debug, Clone)]
struct ResidualBlock {
    first: ConvBn,
    second: ConvBn,
    projection: Option<ConvBn>,
}

impl ResidualBlock {
    fn forward(&self, input: &FeatureMap) -> FeatureMap {
        let mut x = self.first.forward(input);
        x.relu();
        let mut x = self.second.forward(&x);
        match &self.projection {
            Some(projection) => x.add(&projection.forward(input)),
            None => x.add(input),
        }
        x.relu();
        x
    }
}

fn dense(weights: &DenseWeights) -> Dense {
    Dense::new(
        weights.kernel.clone(),
        weights.bias.clone(),
        weights.input_dim,
        weights.output_dim,
    )
}

/// The residual phase classifier with loaded weights
#[derive(Debug, Clone)]
pub struct ResNetClassifier {
    front_end: SpectrogramFrontEnd,
    stem: ConvBn,
    blocks: Vec<ResidualBlock>,
    hidden: Dense,
    output: Dense,
}

impl ResNetClassifier {
    /// Build the network from validated weights
    ///
    /// # Errors
    ///
    /// Returns `PickerError::ModelShapeMismatch` if the weights do not fit
    /// the architecture.
    pub fn new(weights: &ModelWeights) -> Result<Self> {
        weights.validate()?;

        let blocks = block_specs()
            .iter()
            .zip(&weights.blocks)
            .map(|(spec, w)| ResidualBlock {
                first: ConvBn::new(&w.first, spec.stride, Padding::Same),
                second: ConvBn::new(&w.second, 1, Padding::Same),
                projection: w
                    .projection
                    .as_ref()
                    .map(|p| ConvBn::new(p, spec.stride, Padding::Valid)),
            })
            .collect();

        Ok(Self {
            front_end: SpectrogramFrontEnd::new(),
            stem: ConvBn::new(&weights.stem, 1, Padding::Valid),
            blocks,
            hidden: dense(&weights.hidden),
            output: dense(&weights.output),
        })
    }

    /// Load and build from a weight artifact
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&ModelWeights::load(path)?)
    }
}

impl PhaseModel for ResNetClassifier {
    fn predict_window(&self, window: ArrayView2<'_, f32>) -> Result<Probabilities> {
        if window.dim() != (WINDOW_SAMPLES, WINDOW_CHANNELS) {
            return Err(PickerError::ModelShapeMismatch(format!(
                "Expected a ({}, {}) window, got {:?}",
                WINDOW_SAMPLES,
                WINDOW_CHANNELS,
                window.dim()
            )));
        }

        let image = self.front_end.transform(window);
        let mut x = self.stem.forward(&FeatureMap::from_array(&image).zero_pad(STEM_PADDING));
        x.relu();
        let mut x = x.max_pool2();
        for block in &self.blocks {
            x = block.forward(&x);
        }

        let mut hidden = self.hidden.forward(x.as_slice());
        relu(&mut hidden);
        let mut logits = self.output.forward(&hidden);
        softmax(&mut logits);

        Ok([logits[0], logits[1], logits[2]])
    }
}
