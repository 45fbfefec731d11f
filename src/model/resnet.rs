//! ResNet-18 backbone.
//!
//! Architecture:
//! - Input: 224x224x3
//! - Conv1: 7x7, stride 2, then 3x3 max pool, stride 2
//! - 4 residual stages (`layer1`..`layer4`) of 2 basic blocks each
//! - Global average pooling
//! - FC layer

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::scaled_channels;

const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];
const BLOCKS_PER_STAGE: usize = 2;

/// 1x1 projection on the skip path when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with a residual connection
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: Conv2dConfig::new([out_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.conv1.forward(input);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        self.activation.forward(x + identity)
    }
}

/// ResNet-18 with a configurable classification head
#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    maxpool: MaxPool2d,

    pub layer1: Vec<BasicBlock<B>>,
    pub layer2: Vec<BasicBlock<B>>,
    pub layer3: Vec<BasicBlock<B>>,
    pub layer4: Vec<BasicBlock<B>>,

    avgpool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ResNet18<B> {
    pub fn new(num_outputs: usize, width_scale: f64, device: &B::Device) -> Self {
        let widths = STAGE_WIDTHS.map(|c| scaled_channels(c, width_scale));

        let conv1 = Conv2dConfig::new([3, widths[0]], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(widths[0]).init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let stage = |in_channels: usize, out_channels: usize, stride: usize| {
            (0..BLOCKS_PER_STAGE)
                .map(|i| {
                    if i == 0 {
                        BasicBlock::new(in_channels, out_channels, stride, device)
                    } else {
                        BasicBlock::new(out_channels, out_channels, 1, device)
                    }
                })
                .collect::<Vec<_>>()
        };

        Self {
            conv1,
            bn1,
            maxpool,
            layer1: stage(widths[0], widths[0], 1),
            layer2: stage(widths[0], widths[1], 2),
            layer3: stage(widths[1], widths[2], 2),
            layer4: stage(widths[2], widths[3], 2),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(widths[3], num_outputs).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(input);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let mut x = self.maxpool.forward(x);

        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.fc.forward(x.reshape([batch, channels]))
    }

    /// Stop gradient flow into `layer1`, `layer2` and `layer3`
    pub fn freeze_pretrained_prefix(self) -> Self {
        Self {
            layer1: self.layer1.no_grad(),
            layer2: self.layer2.no_grad(),
            layer3: self.layer3.no_grad(),
            ..self
        }
    }

    pub fn frozen_groups() -> Vec<String> {
        vec!["layer1".into(), "layer2".into(), "layer3".into()]
    }
}
