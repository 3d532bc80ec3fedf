use burn::nn::loss::CrossEntropyLossConfig;
use clap::Parser;
use evaluation::{infer_epoch, run_training, EvalArgs, SampleSet, TrainBackend};
use models::{Genotype, Network, NetworkConfig};
use std::fs;

const GENOTYPE: &str = "Genotype(normal=[('sep_conv_3x3', 0), ('skip_connect', 1), \
    ('dil_conv_3x3', 1), ('avg_pool_3x3', 0)], normal_concat=range(2, 4), \
    reduce=[('max_pool_3x3', 0), ('max_pool_3x3', 1), ('skip_connect', 2), \
    ('sep_conv_3x3', 0)], reduce_concat=range(2, 4))";

fn write_archs_config(dir: &std::path::Path) -> std::path::PathBuf {
    let config = dir.join("archs.yaml");
    fs::write(
        &config,
        format!("darts_cifar10:\n  0.0_0.0003:\n    1: \"{GENOTYPE}\"\n"),
    )
    .unwrap();
    config
}

fn smoke_args(dir: &std::path::Path, extra: &[&str]) -> EvalArgs {
    let config = write_archs_config(dir);
    let save = dir.join("save");
    let mut argv = vec![
        "train".to_string(),
        "--archs-config-file".to_string(),
        config.display().to_string(),
        "--save".to_string(),
        save.display().to_string(),
        "--epochs".to_string(),
        "2".to_string(),
        "--batch-size".to_string(),
        "4".to_string(),
        "--init-channels".to_string(),
        "2".to_string(),
        "--layers".to_string(),
        "2".to_string(),
        "--n-classes".to_string(),
        "4".to_string(),
        "--report-freq".to_string(),
        "1".to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    EvalArgs::parse_from(argv)
}

#[test]
fn two_epoch_run_persists_all_series() {
    let temp = tempfile::tempdir().unwrap();
    let args = smoke_args(temp.path(), &[]);
    let genotype = evaluation::resolve_genotype(&args).unwrap();

    let train_set = SampleSet::synthetic(8, args.n_classes, 16, 16, 3);
    let valid_set = SampleSet::synthetic(8, args.n_classes, 16, 16, 4);

    let errors = run_training(&args, &genotype, &train_set, &valid_set).unwrap();
    assert_eq!(errors.epochs(), 2);
    assert_eq!(errors.train_acc.len(), 2);
    assert_eq!(errors.train_loss.len(), 2);
    assert_eq!(errors.valid_acc.len(), 2);
    assert_eq!(errors.valid_loss.len(), 2);

    // Errors JSON: one object, four series, one value per epoch.
    let json_path = args.save.join(args.errors_file_name());
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
    for key in ["train_acc", "train_loss", "valid_acc", "valid_loss"] {
        assert_eq!(value[key].as_array().unwrap().len(), 2, "series {key}");
    }

    // Results YAML: final validation error nested under the run identifiers.
    let results: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(args.results_path()).unwrap()).unwrap();
    let recorded = results["darts_cifar10"]["0.0_0.0003"][1][1].as_f64().unwrap();
    assert_eq!(recorded, *errors.valid_acc.last().unwrap());
}

#[test]
fn auxiliary_loss_path_runs() {
    let temp = tempfile::tempdir().unwrap();
    // 32px inputs keep the auxiliary head's 5x5/stride-3 pool valid after the
    // second reduction.
    let args = smoke_args(
        temp.path(),
        &["--auxiliary", "--layers", "3", "--epochs", "1", "--debug"],
    );
    let genotype = evaluation::resolve_genotype(&args).unwrap();

    let train_set = SampleSet::synthetic(4, args.n_classes, 32, 32, 5);
    let valid_set = SampleSet::synthetic(4, args.n_classes, 32, 32, 6);

    let errors = run_training(&args, &genotype, &train_set, &valid_set).unwrap();
    assert_eq!(errors.epochs(), 1);
    assert!(errors.train_loss[0].is_finite());
}

#[test]
fn debug_stops_after_first_reporting_interval() {
    let temp = tempfile::tempdir().unwrap();
    let args = smoke_args(temp.path(), &["--debug", "--report-freq", "100"]);
    let genotype = evaluation::resolve_genotype(&args).unwrap();

    let device = Default::default();
    let net_config = NetworkConfig {
        init_channels: args.init_channels,
        num_classes: args.n_classes,
        layers: args.layers,
        auxiliary: false,
    };
    let model = Network::<TrainBackend>::new(&net_config, &genotype, &device);
    let criterion = CrossEntropyLossConfig::new().init(&device);

    // 16 batches available; debug cuts the pass at the first interval.
    let valid_set = SampleSet::synthetic(64, args.n_classes, 16, 16, 9);
    let stats = infer_epoch(&model, &valid_set, &criterion, &args, &device);
    assert_eq!(stats.steps, 1);

    let mut full = args.clone();
    full.debug = false;
    let stats = infer_epoch(&model, &valid_set, &criterion, &full, &device);
    assert_eq!(stats.steps, 16);
}

#[test]
fn infer_is_repeatable_and_leaves_the_model_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    let args = smoke_args(temp.path(), &[]);
    let genotype = evaluation::resolve_genotype(&args).unwrap();

    let device = Default::default();
    let net_config = NetworkConfig {
        init_channels: args.init_channels,
        num_classes: args.n_classes,
        layers: args.layers,
        auxiliary: false,
    };
    let model = Network::<TrainBackend>::new(&net_config, &genotype, &device);
    let criterion = CrossEntropyLossConfig::new().init(&device);
    let valid_set = SampleSet::synthetic(8, args.n_classes, 16, 16, 11);

    // Inference only borrows the model; two passes over the same queue must
    // produce bitwise-identical metrics.
    let first = infer_epoch(&model, &valid_set, &criterion, &args, &device);
    let second = infer_epoch(&model, &valid_set, &criterion, &args, &device);
    assert_eq!(first.loss, second.loss);
    assert_eq!(first.top1, second.top1);
    assert_eq!(first.top5, second.top5);
    assert_eq!(first.steps, second.steps);
}
