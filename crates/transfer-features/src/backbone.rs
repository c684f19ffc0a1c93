//! Convolutional backbones with their classification heads removed.
//!
//! Implements:
//! - ResNet-18 (512-wide embedding)
//! - EfficientNet-B0 (1280-wide embedding)
//!
//! Both end in global average pooling, so `forward` returns the penultimate
//! activations `[batch, embedding_dim]` for any input resolution.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use transfer_core::BackboneArchitecture;

/// Frozen backbone selected by architecture
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    ResNet18(ResNet18Backbone<B>),
    EfficientNetB0(EfficientNetB0Backbone<B>),
}

impl<B: Backend> Backbone<B> {
    /// Builds an uninitialized backbone; weights come from a record file
    pub fn new(architecture: BackboneArchitecture, device: &B::Device) -> Self {
        match architecture {
            BackboneArchitecture::ResNet18 => Backbone::ResNet18(ResNet18Backbone::new(device)),
            BackboneArchitecture::EfficientNetB0 => {
                Backbone::EfficientNetB0(EfficientNetB0Backbone::new(device))
            }
        }
    }

    pub fn architecture(&self) -> BackboneArchitecture {
        match self {
            Backbone::ResNet18(_) => BackboneArchitecture::ResNet18,
            Backbone::EfficientNetB0(_) => BackboneArchitecture::EfficientNetB0,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.architecture().embedding_dim()
    }

    /// `[batch, 3, height, width]` -> `[batch, embedding_dim]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::ResNet18(model) => model.forward(input),
            Backbone::EfficientNetB0(model) => model.forward(input),
        }
    }
}

/// Convolution followed by batch normalization
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    fn new(channels: [usize; 2], kernel: usize, stride: usize, device: &B::Device) -> Self {
        Self::grouped(channels, kernel, stride, 1, device)
    }

    fn grouped(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// ResNet basic block: two 3x3 convolutions with an identity shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    first: ConvBn<B>,
    second: ConvBn<B>,
    downsample: Option<ConvBn<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new([in_channels, out_channels], 1, stride, device));
        Self {
            first: ConvBn::new([in_channels, out_channels], 3, stride, device),
            second: ConvBn::new([out_channels, out_channels], 3, 1, device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let x = self.activation.forward(self.first.forward(x));
        let x = self.second.forward(x);
        self.activation.forward(x.add(identity))
    }
}

/// ResNet-18 without the final fully connected layer
#[derive(Module, Debug)]
pub struct ResNet18Backbone<B: Backend> {
    stem: ConvBn<B>,
    maxpool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> ResNet18Backbone<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvBn::new([3, 64], 7, 2, device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // (in, out, stride of the first block); two blocks per stage
        let stages = [(64, 64, 1), (64, 128, 2), (128, 256, 2), (256, 512, 2)];
        let blocks = stages
            .iter()
            .flat_map(|&(in_ch, out_ch, stride)| {
                [
                    BasicBlock::new(in_ch, out_ch, stride, device),
                    BasicBlock::new(out_ch, out_ch, 1, device),
                ]
            })
            .collect();

        Self {
            stem,
            maxpool,
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.stem.forward(input));
        let x = self.maxpool.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}

/// Inverted residual block: 1x1 expand, depthwise conv, 1x1 project
#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
    residual: bool,
    activation: Relu,
}

impl<B: Backend> MbConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand =
            (expand_ratio != 1).then(|| ConvBn::new([in_channels, hidden], 1, 1, device));
        Self {
            expand,
            depthwise: ConvBn::grouped([hidden, hidden], kernel, stride, hidden, device),
            project: ConvBn::new([hidden, out_channels], 1, 1, device),
            residual: stride == 1 && in_channels == out_channels,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => self.activation.forward(expand.forward(input.clone())),
            None => input.clone(),
        };
        let x = self.activation.forward(self.depthwise.forward(x));
        let x = self.project.forward(x);
        if self.residual {
            x.add(input)
        } else {
            x
        }
    }
}

/// EfficientNet-B0 without the dropout and classification layers
#[derive(Module, Debug)]
pub struct EfficientNetB0Backbone<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<MbConv<B>>,
    head: ConvBn<B>,
    pool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> EfficientNetB0Backbone<B> {
    pub fn new(device: &B::Device) -> Self {
        // (expand ratio, kernel, stride, out channels, repeats)
        let stages = [
            (1, 3, 1, 16, 1),
            (6, 3, 2, 24, 2),
            (6, 5, 2, 40, 2),
            (6, 3, 2, 80, 3),
            (6, 5, 1, 112, 3),
            (6, 5, 2, 192, 4),
            (6, 3, 1, 320, 1),
        ];

        let mut blocks = Vec::new();
        let mut in_channels = 32;
        for (expand_ratio, kernel, stride, out_channels, repeats) in stages {
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(MbConv::new(
                    in_channels,
                    out_channels,
                    expand_ratio,
                    kernel,
                    stride,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        Self {
            stem: ConvBn::new([3, 32], 3, 2, device),
            blocks,
            head: ConvBn::new([in_channels, 1280], 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.stem.forward(input));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.activation.forward(self.head.forward(x));

        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}
