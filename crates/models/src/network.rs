//! The searched-cell classifier assembled from a genotype.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::genotype::{Genotype, OpKind};
use crate::ops::{drop_path, CellOp, FactorizedReduce, ReluConvBn};

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub init_channels: usize,
    pub num_classes: usize,
    pub layers: usize,
    pub auxiliary: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            init_channels: 36,
            num_classes: 10,
            layers: 20,
            auxiliary: false,
        }
    }
}

/// One cell: preprocesses its two input states to a common channel count,
/// evaluates the genotype's nodes (two summed branches each), and
/// concatenates the states named by the concat list.
#[derive(Module, Debug)]
pub struct Cell<B: Backend> {
    pre0_reduce: Option<FactorizedReduce<B>>,
    pre0_conv: Option<ReluConvBn<B>>,
    pre1: ReluConvBn<B>,
    ops: Vec<CellOp<B>>,
    indices: Vec<usize>,
    concat: Vec<usize>,
}

impl<B: Backend> Cell<B> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        edges: &[(OpKind, usize)],
        concat: &[usize],
        c_prev_prev: usize,
        c_prev: usize,
        c: usize,
        reduction: bool,
        reduction_prev: bool,
        device: &B::Device,
    ) -> Self {
        let (pre0_reduce, pre0_conv) = if reduction_prev {
            (Some(FactorizedReduce::new(c_prev_prev, c, device)), None)
        } else {
            (None, Some(ReluConvBn::new(c_prev_prev, c, device)))
        };
        let pre1 = ReluConvBn::new(c_prev, c, device);

        let mut ops = Vec::with_capacity(edges.len());
        let mut indices = Vec::with_capacity(edges.len());
        for &(kind, index) in edges {
            // In a reduction cell only the edges reading the two input states
            // carry the stride.
            let stride = if reduction && index < 2 { 2 } else { 1 };
            ops.push(CellOp::new(kind, c, stride, device));
            indices.push(index);
        }

        Self {
            pre0_reduce,
            pre0_conv,
            pre1,
            ops,
            indices,
            concat: concat.to_vec(),
        }
    }

    /// Output channels are `concat.len() * c`.
    pub fn multiplier(&self) -> usize {
        self.concat.len()
    }

    pub fn forward(
        &self,
        s0: Tensor<B, 4>,
        s1: Tensor<B, 4>,
        drop_prob: f64,
    ) -> Tensor<B, 4> {
        let s0 = match (&self.pre0_reduce, &self.pre0_conv) {
            (Some(reduce), _) => reduce.forward(s0),
            (None, Some(conv)) => conv.forward(s0),
            (None, None) => s0,
        };
        let s1 = self.pre1.forward(s1);

        let steps = self.ops.len() / 2;
        let mut states = vec![s0, s1];
        for step in 0..steps {
            let (a, b) = (2 * step, 2 * step + 1);
            let mut h0 = self.ops[a].forward(states[self.indices[a]].clone());
            let mut h1 = self.ops[b].forward(states[self.indices[b]].clone());
            if drop_prob > 0.0 {
                if !self.ops[a].is_identity() {
                    h0 = drop_path(h0, drop_prob);
                }
                if !self.ops[b].is_identity() {
                    h1 = drop_path(h1, drop_prob);
                }
            }
            states.push(h0 + h1);
        }

        let outputs: Vec<_> = self
            .concat
            .iter()
            .map(|&i| states[i].clone())
            .collect();
        Tensor::cat(outputs, 1)
    }
}

/// Secondary classifier head attached after the second reduction. Its loss is
/// weighted and added to the primary loss during training.
#[derive(Module, Debug)]
pub struct AuxiliaryHead<B: Backend> {
    pool: AvgPool2d,
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    global_pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl<B: Backend> AuxiliaryHead<B> {
    pub fn new(c_in: usize, num_classes: usize, device: &B::Device) -> Self {
        // Expects 8x8 inputs on the standard 32x32 setting; the trailing
        // global pool keeps other sizes working.
        let pool = AvgPool2dConfig::new([5, 5]).with_strides([3, 3]).init();
        let conv1 = Conv2dConfig::new([c_in, 128], [1, 1])
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(128).init(device);
        let conv2 = Conv2dConfig::new([128, 768], [2, 2])
            .with_bias(false)
            .init(device);
        let bn2 = BatchNormConfig::new(768).init(device);
        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let classifier = LinearConfig::new(768, num_classes).init(device);
        Self {
            pool,
            conv1,
            bn1,
            conv2,
            bn2,
            global_pool,
            classifier,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(relu(x));
        let x = relu(self.bn1.forward(self.conv1.forward(x)));
        let x = relu(self.bn2.forward(self.conv2.forward(x)));
        let x = self.global_pool.forward(x);
        let [b, c, _, _] = x.dims();
        self.classifier.forward(x.reshape([b, c]))
    }
}

/// Fixed-topology classifier built once from a genotype and hyperparameters.
/// Parameters are mutated only by optimizer steps; inference runs on an
/// immutable borrow.
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    cells: Vec<Cell<B>>,
    aux_head: Option<AuxiliaryHead<B>>,
    aux_cell: Option<usize>,
    global_pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl<B: Backend> Network<B> {
    pub fn new(config: &NetworkConfig, genotype: &Genotype, device: &B::Device) -> Self {
        let stem_multiplier = 3;
        let c = config.init_channels;
        let c_stem = stem_multiplier * c;

        let stem_conv = Conv2dConfig::new([3, c_stem], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let stem_bn = BatchNormConfig::new(c_stem).init(device);

        let mut c_prev_prev = c_stem;
        let mut c_prev = c_stem;
        let mut c_curr = c;
        let mut reduction_prev = false;
        let mut cells = Vec::with_capacity(config.layers);
        let mut aux_head = None;
        let mut aux_cell = None;

        for i in 0..config.layers {
            let reduction = i == config.layers / 3 || i == 2 * config.layers / 3;
            if reduction {
                c_curr *= 2;
            }
            let (edges, concat) = if reduction {
                (&genotype.reduce, &genotype.reduce_concat)
            } else {
                (&genotype.normal, &genotype.normal_concat)
            };
            let cell = Cell::new(
                edges,
                concat,
                c_prev_prev,
                c_prev,
                c_curr,
                reduction,
                reduction_prev,
                device,
            );
            reduction_prev = reduction;
            c_prev_prev = c_prev;
            c_prev = cell.multiplier() * c_curr;
            cells.push(cell);

            if config.auxiliary && i == 2 * config.layers / 3 {
                aux_head = Some(AuxiliaryHead::new(c_prev, config.num_classes, device));
                aux_cell = Some(i);
            }
        }

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let classifier = LinearConfig::new(c_prev, config.num_classes).init(device);

        Self {
            stem_conv,
            stem_bn,
            cells,
            aux_head,
            aux_cell,
            global_pool,
            classifier,
        }
    }

    /// Forward pass returning `(logits, auxiliary_logits)`. The auxiliary
    /// logits are present only when the head was built. Inference callers
    /// pass `drop_path_prob = 0.0`.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        drop_path_prob: f64,
    ) -> (Tensor<B, 2>, Option<Tensor<B, 2>>) {
        let stem = self.stem_bn.forward(self.stem_conv.forward(input));
        let mut s0 = stem.clone();
        let mut s1 = stem;
        let mut aux_logits = None;

        for (i, cell) in self.cells.iter().enumerate() {
            let next = cell.forward(s0, s1.clone(), drop_path_prob);
            s0 = s1;
            s1 = next;
            if self.aux_cell == Some(i) {
                if let Some(head) = &self.aux_head {
                    aux_logits = Some(head.forward(s1.clone()));
                }
            }
        }

        let pooled = self.global_pool.forward(s1);
        let [b, c, _, _] = pooled.dims();
        let logits = self.classifier.forward(pooled.reshape([b, c]));
        (logits, aux_logits)
    }
}
