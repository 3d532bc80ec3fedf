use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{Genotype, Network, NetworkConfig};

type Backend = NdArray<f32>;

const GENOTYPE: &str = "Genotype(normal=[('sep_conv_3x3', 0), ('sep_conv_3x3', 1), \
    ('skip_connect', 0), ('dil_conv_3x3', 2), ('avg_pool_3x3', 1), ('none', 0)], \
    normal_concat=range(2, 5), \
    reduce=[('max_pool_3x3', 0), ('max_pool_3x3', 1), ('skip_connect', 2), \
    ('max_pool_3x3', 1), ('sep_conv_5x5', 0), ('skip_connect', 2)], \
    reduce_concat=range(2, 5))";

fn input(batch: usize, size: usize) -> Tensor<Backend, 4> {
    let device = Default::default();
    Tensor::random(
        [batch, 3, size, size],
        Distribution::Uniform(0.0, 1.0),
        &device,
    )
}

#[test]
fn forward_produces_class_logits() {
    let device = Default::default();
    let genotype = Genotype::parse(GENOTYPE).expect("genotype");
    let cfg = NetworkConfig {
        init_channels: 4,
        num_classes: 10,
        layers: 5,
        auxiliary: false,
    };
    let net = Network::<Backend>::new(&cfg, &genotype, &device);

    let (logits, aux) = net.forward(input(2, 32), 0.0);
    assert_eq!(logits.dims(), [2, 10]);
    assert!(aux.is_none());

    let values = logits.into_data().to_vec::<f32>().unwrap_or_default();
    assert!(values.iter().all(|v| v.is_finite()));
}

#[test]
fn auxiliary_head_emits_logits_after_second_reduction() {
    let device = Default::default();
    let genotype = Genotype::parse(GENOTYPE).expect("genotype");
    let cfg = NetworkConfig {
        init_channels: 4,
        num_classes: 7,
        layers: 6,
        auxiliary: true,
    };
    let net = Network::<Backend>::new(&cfg, &genotype, &device);

    let (logits, aux) = net.forward(input(2, 32), 0.0);
    assert_eq!(logits.dims(), [2, 7]);
    let aux = aux.expect("auxiliary logits");
    assert_eq!(aux.dims(), [2, 7]);
}

#[test]
fn drop_path_keeps_shapes() {
    let device = Default::default();
    let genotype = Genotype::parse(GENOTYPE).expect("genotype");
    let cfg = NetworkConfig {
        init_channels: 4,
        num_classes: 10,
        layers: 5,
        auxiliary: false,
    };
    let net = Network::<Backend>::new(&cfg, &genotype, &device);

    let (logits, _) = net.forward(input(3, 32), 0.5);
    assert_eq!(logits.dims(), [3, 10]);
}

#[test]
fn drop_path_zero_prob_is_identity() {
    let device = Default::default();
    let x = Tensor::<Backend, 4>::random([2, 3, 4, 4], Distribution::Uniform(0.0, 1.0), &device);
    let before = x.clone().into_data().to_vec::<f32>().unwrap_or_default();
    let after = models::drop_path(x, 0.0)
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default();
    assert_eq!(before, after);
}
