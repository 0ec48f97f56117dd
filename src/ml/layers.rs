//! Inference-only network layers on height × width × channel feature maps
//!
//! Kernels use the `(kernel_h, kernel_w, in_channels, out_channels)` layout
//! and dense weights the `(inputs, outputs)` layout, both row-major, so a
//! trained artifact can be copied in without transposition.

use ndarray::Array3;

/// Dense `height × width × channels` tensor, channel fastest
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
}

impl FeatureMap {
    /// All-zero map
    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
            data: vec![0.0; height * width * channels],
        }
    }

    /// Copy a `(height, width, channels)` array
    pub fn from_array(array: &Array3<f32>) -> Self {
        let (height, width, channels) = array.dim();
        Self {
            height,
            width,
            channels,
            data: array.iter().copied().collect(),
        }
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    /// Flattened values in height, width, channel order
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    fn pixel(&self, y: usize, x: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Surround the map with `pad` rows and columns of zeros
    pub fn zero_pad(&self, pad: usize) -> Self {
        let mut out = Self::zeros(self.height + 2 * pad, self.width + 2 * pad, self.channels);
        for y in 0..self.height {
            let src = y * self.width * self.channels;
            let dst = ((y + pad) * out.width + pad) * self.channels;
            let row = self.width * self.channels;
            out.data[dst..dst + row].copy_from_slice(&self.data[src..src + row]);
        }
        out
    }

    /// Clamp negative values to zero
    pub fn relu(&mut self) {
        relu(&mut self.data);
    }

    /// Element-wise sum with a map of the same shape
    pub fn add(&mut self, other: &FeatureMap) {
        debug_assert_eq!(self.shape(), other.shape());
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }

    /// 2×2 max pooling with stride 2; a trailing odd row or column is dropped
    pub fn max_pool2(&self) -> Self {
        let mut out = Self::zeros(self.height / 2, self.width / 2, self.channels);
        for y in 0..out.height {
            for x in 0..out.width {
                let start = (y * out.width + x) * self.channels;
                let target = &mut out.data[start..start + self.channels];
                target.copy_from_slice(self.pixel(2 * y, 2 * x));
                for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                    for (t, &v) in target.iter_mut().zip(self.pixel(2 * y + dy, 2 * x + dx)) {
                        *t = t.max(v);
                    }
                }
            }
        }
        out
    }
}

/// Clamp negative values to zero
pub fn relu(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v = v.max(0.0);
    }
}

/// Numerically stable softmax in place
pub fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Spatial padding rule of a convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding; output is `(in - k) / stride + 1`
    Valid,
    /// Output is `ceil(in / stride)`; odd padding goes to the bottom/right
    Same,
}

impl Padding {
    /// Output length and leading padding along one axis
    fn geometry(&self, input: usize, kernel: usize, stride: usize) -> (usize, usize) {
        match self {
            Padding::Valid => ((input.saturating_sub(kernel)) / stride + 1, 0),
            Padding::Same => {
                let out = input.div_ceil(stride);
                let total = ((out - 1) * stride + kernel).saturating_sub(input);
                (out, total / 2)
            }
        }
    }
}

/// 2-D convolution with bias
#[derive(Debug, Clone)]
pub struct Conv2d {
    kernel: Vec<f32>,
    bias: Vec<f32>,
    kernel_size: (usize, usize),
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    padding: Padding,
}

impl Conv2d {
    /// Build from a `(kh, kw, cin, cout)` kernel and `cout` biases
    ///
    /// Shapes are checked by the weight loader before layers are built.
    pub fn new(
        kernel: Vec<f32>,
        bias: Vec<f32>,
        kernel_shape: [usize; 4],
        stride: usize,
        padding: Padding,
    ) -> Self {
        let [kh, kw, cin, cout] = kernel_shape;
        debug_assert_eq!(kernel.len(), kh * kw * cin * cout);
        debug_assert_eq!(bias.len(), cout);
        Self {
            kernel,
            bias,
            kernel_size: (kh, kw),
            in_channels: cin,
            out_channels: cout,
            stride,
            padding,
        }
    }

    /// Output `(height, width)` for an input of `(height, width)`
    pub fn output_size(&self, height: usize, width: usize) -> (usize, usize) {
        let (oh, _) = self.padding.geometry(height, self.kernel_size.0, self.stride);
        let (ow, _) = self.padding.geometry(width, self.kernel_size.1, self.stride);
        (oh, ow)
    }

    /// Apply the convolution
    pub fn forward(&self, input: &FeatureMap) -> FeatureMap {
        debug_assert_eq!(input.channels, self.in_channels);
        let (kh, kw) = self.kernel_size;
        let (oh, pad_top) = self.padding.geometry(input.height, kh, self.stride);
        let (ow, pad_left) = self.padding.geometry(input.width, kw, self.stride);
        let cout = self.out_channels;

        let mut out = FeatureMap::zeros(oh, ow, cout);
        for oy in 0..oh {
            for ox in 0..ow {
                let start = (oy * ow + ox) * cout;
                let acc = &mut out.data[start..start + cout];
                acc.copy_from_slice(&self.bias);

                for ky in 0..kh {
                    let Some(iy) = (oy * self.stride + ky).checked_sub(pad_top) else {
                        continue;
                    };
                    if iy >= input.height {
                        continue;
                    }
                    for kx in 0..kw {
                        let Some(ix) = (ox * self.stride + kx).checked_sub(pad_left) else {
                            continue;
                        };
                        if ix >= input.width {
                            continue;
                        }
                        let base = (ky * kw + kx) * self.in_channels * cout;
                        for (ci, &v) in input.pixel(iy, ix).iter().enumerate() {
                            if v == 0.0 {
                                continue;
                            }
                            let row = &self.kernel[base + ci * cout..base + (ci + 1) * cout];
                            for (a, &w) in acc.iter_mut().zip(row) {
                                *a += v * w;
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// Batch normalisation folded into a per-channel scale and shift
#[derive(Debug, Clone)]
pub struct BatchNorm {
    scale: Vec<f32>,
    shift: Vec<f32>,
}

impl BatchNorm {
    /// Fold `gamma * (x - mean) / sqrt(var + eps) + beta`
    pub fn new(gamma: &[f32], beta: &[f32], mean: &[f32], variance: &[f32], epsilon: f32) -> Self {
        let scale: Vec<f32> = gamma
            .iter()
            .zip(variance)
            .map(|(g, v)| g / (v + epsilon).sqrt())
            .collect();
        let shift = beta
            .iter()
            .zip(mean)
            .zip(&scale)
            .map(|((b, m), s)| b - m * s)
            .collect();
        Self { scale, shift }
    }

    /// Normalise every pixel in place
    pub fn apply(&self, map: &mut FeatureMap) {
        for px in map.data.chunks_exact_mut(self.scale.len()) {
            for ((x, s), b) in px.iter_mut().zip(&self.scale).zip(&self.shift) {
                *x = *x * s + b;
            }
        }
    }
}

/// Fully connected layer
#[derive(Debug, Clone)]
pub struct Dense {
    weights: Vec<f32>,
    bias: Vec<f32>,
    inputs: usize,
    outputs: usize,
}

impl Dense {
    /// Build from `(inputs, outputs)` row-major weights
    pub fn new(weights: Vec<f32>, bias: Vec<f32>, inputs: usize, outputs: usize) -> Self {
        debug_assert_eq!(weights.len(), inputs * outputs);
        debug_assert_eq!(bias.len(), outputs);
        Self {
            weights,
            bias,
            inputs,
            outputs,
        }
    }

    /// `input · W + b`
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.inputs);
        let mut out = self.bias.clone();
        for (i, &x) in input.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            let row = &self.weights[i * self.outputs..(i + 1) * self.outputs];
            for (o, &w) in out.iter_mut().zip(row) {
                *o += x * w;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(h: usize, w: usize, c: usize, data: Vec<f32>) -> FeatureMap {
        FeatureMap::from_array(&Array3::from_shape_vec((h, w, c), data).unwrap())
    }

    #[test]
    fn test_same_padding_geometry() {
        // TensorFlow puts the odd padding after the data
        assert_eq!(Padding::Same.geometry(11, 3, 2), (6, 1));
        assert_eq!(Padding::Same.geometry(16, 3, 2), (8, 0));
        assert_eq!(Padding::Same.geometry(5, 3, 1), (5, 1));
        assert_eq!(Padding::Valid.geometry(11, 1, 2), (6, 0));
        assert_eq!(Padding::Valid.geometry(26, 5, 1), (22, 0));
    }

    #[test]
    fn test_conv_valid_sum_kernel() {
        // 3x3 ones kernel over a 4x4 ramp, single channel
        let input = map(4, 4, 1, (0..16).map(|v| v as f32).collect());
        let conv = Conv2d::new(vec![1.0; 9], vec![0.5], [3, 3, 1, 1], 1, Padding::Valid);
        let out = conv.forward(&input);
        assert_eq!(out.shape(), (2, 2, 1));
        assert_eq!(out.as_slice(), &[45.5, 54.5, 81.5, 90.5]);
    }

    #[test]
    fn test_conv_same_stride_two() {
        let input = map(3, 3, 1, vec![1.0; 9]);
        let conv = Conv2d::new(vec![1.0; 9], vec![0.0], [3, 3, 1, 1], 2, Padding::Same);
        let out = conv.forward(&input);
        // pad_total = 2 per axis, one zero row/column on each side
        assert_eq!(out.shape(), (2, 2, 1));
        assert_eq!(out.as_slice(), &[4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_conv_channel_layout() {
        // 1x1 kernel mixing two input channels into three outputs
        let input = map(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let kernel = vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let conv = Conv2d::new(kernel, vec![0.0; 3], [1, 1, 2, 3], 1, Padding::Valid);
        let out = conv.forward(&input);
        assert_eq!(out.as_slice(), &[1.0, 2.0, 3.0, 3.0, 4.0, 7.0]);
    }

    #[test]
    fn test_batch_norm_fold() {
        let bn = BatchNorm::new(&[2.0], &[1.0], &[3.0], &[4.0 - 1e-3], 1e-3);
        let mut m = map(1, 2, 1, vec![3.0, 5.0]);
        bn.apply(&mut m);
        assert!((m.as_slice()[0] - 1.0).abs() < 1e-6);
        assert!((m.as_slice()[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_pool_pad_and_relu() {
        let mut m = map(3, 3, 1, vec![1.0, -2.0, 3.0, -4.0, 5.0, -6.0, 7.0, 8.0, 9.0]);
        assert_eq!(m.max_pool2().as_slice(), &[5.0]);
        let padded = m.zero_pad(1);
        assert_eq!(padded.shape(), (5, 5, 1));
        assert_eq!(padded.as_slice()[6], 1.0);
        m.relu();
        assert!(m.as_slice().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_dense_and_softmax() {
        let dense = Dense::new(vec![1.0, 2.0, 3.0, 4.0], vec![0.5, -0.5], 2, 2);
        assert_eq!(dense.forward(&[1.0, 1.0]), vec![4.5, 5.5]);

        let mut logits = vec![1000.0, 1000.0, -1000.0];
        softmax(&mut logits);
        assert!((logits[0] - 0.5).abs() < 1e-6);
        assert!((logits.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }
}
