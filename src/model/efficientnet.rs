//! EfficientNet-B4 backbone.
//!
//! Architecture:
//! - Input: 224x224x3
//! - Stem: Conv 3x3, stride 2
//! - 32 MBConv blocks with squeeze-and-excitation, in 7 stages
//! - Head: Conv 1x1, global average pooling, dropout, FC layer

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};

use super::scaled_channels;

/// Number of leading MBConv blocks kept frozen during fine-tuning
pub const FROZEN_BLOCKS: usize = 28;

const STEM_CHANNELS: usize = 48;
const HEAD_CHANNELS: usize = 1792;
const SE_RATIO: f64 = 0.25;

/// Per-stage layout: (kernel, stride, expand ratio, output channels, repeats)
const STAGES: [(usize, usize, usize, usize, usize); 7] = [
    (3, 1, 1, 24, 2),
    (3, 2, 6, 32, 4),
    (5, 2, 6, 56, 4),
    (3, 2, 6, 112, 6),
    (5, 1, 6, 160, 6),
    (5, 2, 6, 272, 8),
    (3, 1, 6, 448, 2),
];

/// Convolution followed by batch norm
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let pad = kernel / 2;
        Self {
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(pad, pad))
                .with_groups(groups)
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Channel attention: squeeze to a vector, excite back to a gate
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    fn new(channels: usize, squeezed: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let gate = self.pool.forward(x.clone());
        let gate = silu(self.reduce.forward(gate));
        let gate = sigmoid(self.expand.forward(gate));
        x * gate
    }
}

/// Mobile inverted bottleneck block
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    expand: Option<ConvBn<B>>,
    pub depthwise: ConvBn<B>,
    se: SqueezeExcitation<B>,
    project: ConvBn<B>,
    residual: bool,
}

impl<B: Backend> MBConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        expand_ratio: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let squeezed = ((in_channels as f64 * SE_RATIO) as usize).max(1);

        Self {
            expand: (expand_ratio != 1)
                .then(|| ConvBn::new([in_channels, hidden], 1, 1, 1, device)),
            depthwise: ConvBn::new([hidden, hidden], kernel, stride, hidden, device),
            se: SqueezeExcitation::new(hidden, squeezed, device),
            project: ConvBn::new([hidden, out_channels], 1, 1, 1, device),
            residual: stride == 1 && in_channels == out_channels,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => silu(expand.forward(input.clone())),
            None => input.clone(),
        };
        let x = silu(self.depthwise.forward(x));
        let x = self.se.forward(x);
        let x = self.project.forward(x);

        if self.residual {
            x + input
        } else {
            x
        }
    }
}

/// EfficientNet-B4 with a configurable classification head
#[derive(Module, Debug)]
pub struct EfficientNetB4<B: Backend> {
    pub stem: ConvBn<B>,
    pub blocks: Vec<MBConv<B>>,
    head: ConvBn<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    pub fc: Linear<B>,
}

impl<B: Backend> EfficientNetB4<B> {
    pub fn new(num_outputs: usize, width_scale: f64, dropout: f64, device: &B::Device) -> Self {
        let stem_channels = scaled_channels(STEM_CHANNELS, width_scale);
        let head_channels = scaled_channels(HEAD_CHANNELS, width_scale);

        let mut blocks = Vec::new();
        let mut in_channels = stem_channels;
        for (kernel, stride, expand_ratio, out, repeats) in STAGES {
            let out_channels = scaled_channels(out, width_scale);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(MBConv::new(
                    in_channels,
                    out_channels,
                    kernel,
                    stride,
                    expand_ratio,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        Self {
            stem: ConvBn::new([3, stem_channels], 3, 2, 1, device),
            blocks,
            head: ConvBn::new([in_channels, head_channels], 1, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(dropout).init(),
            fc: LinearConfig::new(head_channels, num_outputs).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = silu(self.stem.forward(input));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = silu(self.head.forward(x));

        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        let x = self.dropout.forward(x.reshape([batch, channels]));
        self.fc.forward(x)
    }

    /// Stop gradient flow into the stem and the first `FROZEN_BLOCKS` blocks
    pub fn freeze_pretrained_prefix(self) -> Self {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| if i < FROZEN_BLOCKS { block.no_grad() } else { block })
            .collect();

        Self {
            stem: self.stem.no_grad(),
            blocks,
            ..self
        }
    }

    pub fn frozen_groups() -> Vec<String> {
        vec![
            "stem".into(),
            format!("blocks[0..{}]", FROZEN_BLOCKS),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_block_count() {
        let device = Default::default();
        let model = EfficientNetB4::<TestBackend>::new(9, 0.125, 0.4, &device);
        assert_eq!(model.blocks.len(), 32);
        assert!(FROZEN_BLOCKS < model.blocks.len());
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = EfficientNetB4::<TestBackend>::new(9, 0.125, 0.4, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [2, 9]);
    }

    #[test]
    fn test_residual_only_when_shape_kept() {
        let device = Default::default();
        let model = EfficientNetB4::<TestBackend>::new(9, 0.125, 0.4, &device);

        // First block of each stage changes width or stride
        assert!(!model.blocks[0].residual);
        assert!(model.blocks[1].residual);
        assert!(!model.blocks[2].residual);
    }
}
