//! Candidate operations a cell edge can carry.
//!
//! Every operation maps `[B, C, H, W]` to `[B, C, H/stride, W/stride]` so the
//! cell can sum arbitrary pairs of branches. Spatial dims are assumed even
//! when a stride-2 operation is present.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

use crate::genotype::OpKind;

/// ReLU -> 1x1 conv -> BatchNorm. Also used as the stride-1 cell preprocessor.
#[derive(Module, Debug)]
pub struct ReluConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ReluConvBn<B> {
    pub fn new(c_in: usize, c_out: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([c_in, c_out], [1, 1])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(c_out).init(device);
        Self { conv, bn }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(relu(x)))
    }
}

/// Two stacked depthwise-separable blocks; the stride sits on the first one.
#[derive(Module, Debug)]
pub struct SepConv<B: Backend> {
    depthwise1: Conv2d<B>,
    pointwise1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    depthwise2: Conv2d<B>,
    pointwise2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
}

impl<B: Backend> SepConv<B> {
    pub fn new(channels: usize, kernel: usize, stride: usize, device: &B::Device) -> Self {
        let padding = kernel / 2;
        let depthwise = |s: usize| {
            Conv2dConfig::new([channels, channels], [kernel, kernel])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_groups(channels)
                .with_bias(false)
        };
        let pointwise = || {
            Conv2dConfig::new([channels, channels], [1, 1])
                .with_bias(false)
        };
        Self {
            depthwise1: depthwise(stride).init(device),
            pointwise1: pointwise().init(device),
            bn1: BatchNormConfig::new(channels).init(device),
            depthwise2: depthwise(1).init(device),
            pointwise2: pointwise().init(device),
            bn2: BatchNormConfig::new(channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(x);
        let x = self.bn1.forward(self.pointwise1.forward(self.depthwise1.forward(x)));
        let x = relu(x);
        self.bn2.forward(self.pointwise2.forward(self.depthwise2.forward(x)))
    }
}

/// ReLU -> dilated depthwise conv -> pointwise 1x1 -> BatchNorm.
#[derive(Module, Debug)]
pub struct DilConv<B: Backend> {
    depthwise: Conv2d<B>,
    pointwise: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> DilConv<B> {
    pub fn new(channels: usize, kernel: usize, stride: usize, device: &B::Device) -> Self {
        // Dilation 2 keeps the receptive field of a (2k-1) kernel.
        let padding = kernel - 1;
        let depthwise = Conv2dConfig::new([channels, channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_dilation([2, 2])
            .with_groups(channels)
            .with_bias(false)
            .init(device);
        let pointwise = Conv2dConfig::new([channels, channels], [1, 1])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels).init(device);
        Self {
            depthwise,
            pointwise,
            bn,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn
            .forward(self.pointwise.forward(self.depthwise.forward(relu(x))))
    }
}

/// Halves the spatial dims while remapping channels: ReLU, two parallel 1x1
/// stride-2 convs (the second on the one-pixel-shifted input), channel concat,
/// BatchNorm. Used for `skip_connect` at stride 2 and for preprocessing the
/// older input state after a reduction cell.
#[derive(Module, Debug)]
pub struct FactorizedReduce<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> FactorizedReduce<B> {
    pub fn new(c_in: usize, c_out: usize, device: &B::Device) -> Self {
        let half = |out: usize| {
            Conv2dConfig::new([c_in, out], [1, 1])
                .with_stride([2, 2])
                .with_bias(false)
        };
        Self {
            conv1: half(c_out / 2).init(device),
            conv2: half(c_out - c_out / 2).init(device),
            bn: BatchNormConfig::new(c_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(x);
        let [b, c, h, w] = x.dims();
        let shifted = x.clone().slice([0..b, 0..c, 1..h, 1..w]);
        let out = Tensor::cat(
            vec![self.conv1.forward(x), self.conv2.forward(shifted)],
            1,
        );
        self.bn.forward(out)
    }
}

/// One edge of a cell: dispatches to the module selected by its `OpKind`.
/// Identity (`skip_connect` at stride 1) and `none` carry no parameters.
#[derive(Module, Debug)]
pub struct CellOp<B: Backend> {
    kind: Ignored<OpKind>,
    stride: usize,
    sep: Option<SepConv<B>>,
    dil: Option<DilConv<B>>,
    max_pool: Option<MaxPool2d>,
    avg_pool: Option<AvgPool2d>,
    reduce: Option<FactorizedReduce<B>>,
}

impl<B: Backend> CellOp<B> {
    pub fn new(kind: OpKind, channels: usize, stride: usize, device: &B::Device) -> Self {
        let mut op = Self {
            kind: Ignored(kind),
            stride,
            sep: None,
            dil: None,
            max_pool: None,
            avg_pool: None,
            reduce: None,
        };
        match kind {
            OpKind::SepConv3x3 => op.sep = Some(SepConv::new(channels, 3, stride, device)),
            OpKind::SepConv5x5 => op.sep = Some(SepConv::new(channels, 5, stride, device)),
            OpKind::DilConv3x3 => op.dil = Some(DilConv::new(channels, 3, stride, device)),
            OpKind::DilConv5x5 => op.dil = Some(DilConv::new(channels, 5, stride, device)),
            OpKind::MaxPool3x3 => {
                op.max_pool = Some(
                    MaxPool2dConfig::new([3, 3])
                        .with_strides([stride, stride])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(),
                )
            }
            OpKind::AvgPool3x3 => {
                op.avg_pool = Some(
                    AvgPool2dConfig::new([3, 3])
                        .with_strides([stride, stride])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(),
                )
            }
            OpKind::SkipConnect => {
                if stride != 1 {
                    op.reduce = Some(FactorizedReduce::new(channels, channels, device));
                }
            }
            OpKind::NoOp => {}
        }
        op
    }

    pub fn kind(&self) -> OpKind {
        self.kind.0
    }

    /// Whether this edge is a parameter-free identity (exempt from drop-path).
    pub fn is_identity(&self) -> bool {
        self.kind.0 == OpKind::SkipConnect && self.stride == 1
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        // The constructor fills exactly one branch per kind; identity and
        // `none` fill nothing.
        if let Some(op) = &self.sep {
            op.forward(x)
        } else if let Some(op) = &self.dil {
            op.forward(x)
        } else if let Some(op) = &self.max_pool {
            op.forward(x)
        } else if let Some(op) = &self.avg_pool {
            op.forward(x)
        } else if let Some(op) = &self.reduce {
            op.forward(x)
        } else if self.kind.0 == OpKind::NoOp {
            let [b, c, h, w] = x.dims();
            if self.stride == 1 {
                x.zeros_like()
            } else {
                Tensor::zeros(
                    [b, c, h.div_ceil(self.stride), w.div_ceil(self.stride)],
                    &x.device(),
                )
            }
        } else {
            x
        }
    }
}

/// Per-sample stochastic branch drop: keeps each sample's activation with
/// probability `1 - prob` and rescales so the expectation is unchanged.
/// Identity when `prob <= 0`.
pub fn drop_path<B: Backend>(x: Tensor<B, 4>, prob: f64) -> Tensor<B, 4> {
    if prob <= 0.0 {
        return x;
    }
    let keep = (1.0 - prob).max(f64::MIN_POSITIVE);
    let [b, _, _, _] = x.dims();
    let mask = Tensor::<B, 4>::random([b, 1, 1, 1], Distribution::Bernoulli(keep), &x.device());
    x * mask.div_scalar(keep)
}
