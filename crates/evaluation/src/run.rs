//! The epoch loop: training pass, evaluation pass, metrics accumulation.

use std::fs;
use std::path::Path;

use burn::backend::Autodiff;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{Genotype, Network, NetworkConfig};
use tracing::info;

use crate::config::EvalArgs;
use crate::data::SampleSet;
use crate::meters::{accuracy, RunningAverage};
use crate::metrics::{write_yaml_results, EpochMetrics, ErrorsLog};
use crate::schedule::{CosineAnnealing, DropPathSchedule};
use crate::TrainBackend;

pub type AdBackend = Autodiff<TrainBackend>;

/// Outcome of one pass over a queue.
#[derive(Debug, Clone, Copy)]
pub struct PassStats {
    pub loss: f64,
    pub top1: f64,
    pub top5: f64,
    /// Batches consumed; with `debug` set this stops at the first reporting
    /// interval regardless of queue length.
    pub steps: usize,
}

/// Train for `args.epochs` epochs, evaluating after each one, then persist
/// the errors JSON and the shared results line. Returns the accumulated
/// errors log.
pub fn run_training(
    args: &EvalArgs,
    genotype: &Genotype,
    train_set: &SampleSet,
    valid_set: &SampleSet,
) -> anyhow::Result<ErrorsLog> {
    fs::create_dir_all(&args.save)?;
    <AdBackend as Backend>::seed(args.seed);
    let device = <AdBackend as Backend>::Device::default();

    let net_config = NetworkConfig {
        init_channels: args.init_channels,
        num_classes: args.n_classes,
        layers: args.layers,
        auxiliary: args.auxiliary,
    };
    let mut model = Network::<AdBackend>::new(&net_config, genotype, &device);
    if let Some(path) = &args.model_path {
        model = load_checkpoint(model, path, &device)?;
    }
    info!("param size = {:.6}MB", model.num_params() as f64 / 1e6);

    // Gradient-norm clipping lives inside the optimizer, so it runs before
    // every parameter update.
    let mut optim = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(args.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(args.weight_decay as f32)))
        .with_gradient_clipping(Some(GradientClippingConfig::Norm(args.grad_clip as f32)))
        .init();

    let criterion = CrossEntropyLossConfig::new().init(&device);
    let valid_device = <TrainBackend as Backend>::Device::default();
    let valid_criterion = CrossEntropyLossConfig::new().init(&valid_device);

    let lr_schedule = CosineAnnealing::new(args.learning_rate, args.epochs);
    let drop_schedule = DropPathSchedule::new(args.drop_path_prob, args.epochs);
    let mut errors = ErrorsLog::default();

    for epoch in 0..args.epochs {
        let lr = lr_schedule.lr_at(epoch);
        let drop_prob = drop_schedule.prob_at(epoch);
        info!("epoch {} lr {:e}", epoch, lr);

        let (trained, train_stats) = train_epoch(
            model,
            train_set,
            &criterion,
            &mut optim,
            lr,
            drop_prob,
            args,
            &device,
        );
        model = trained;
        info!("train_acc {}", train_stats.top1);

        let eval_model = model.valid();
        let valid_stats = infer_epoch(&eval_model, valid_set, &valid_criterion, args, &valid_device);
        info!("valid_acc {}", valid_stats.top1);

        errors.append(EpochMetrics {
            train_err: 100.0 - train_stats.top1,
            train_loss: train_stats.loss,
            valid_err: 100.0 - valid_stats.top1,
            valid_loss: valid_stats.loss,
        });
    }

    let errors_path = args.save.join(args.errors_file_name());
    errors.write_json(&errors_path)?;

    let final_err = errors.final_valid_err().unwrap_or(100.0);
    write_yaml_results(
        &args.results_path(),
        &args.space_key(),
        &args.settings_key(),
        args.search_task_id,
        args.task_id,
        final_err,
    )?;
    info!("final valid error {}", final_err);

    Ok(errors)
}

/// One training pass: per batch — forward, primary loss plus weighted
/// auxiliary loss, backward, clipped SGD step, meter updates. The model moves
/// through the optimizer and is returned.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch(
    mut model: Network<AdBackend>,
    data: &SampleSet,
    criterion: &CrossEntropyLoss<AdBackend>,
    optim: &mut impl Optimizer<Network<AdBackend>, AdBackend>,
    lr: f64,
    drop_prob: f64,
    args: &EvalArgs,
    device: &<AdBackend as Backend>::Device,
) -> (Network<AdBackend>, PassStats) {
    let mut objs = RunningAverage::default();
    let mut top1 = RunningAverage::default();
    let mut top5 = RunningAverage::default();
    let mut steps = 0;

    for (step, batch) in data.batches::<AdBackend>(args.batch_size, device).enumerate() {
        let n = batch.images.dims()[0];
        let (logits, aux_logits) = model.forward(batch.images.clone(), drop_prob);

        let mut loss = criterion.forward(logits.clone(), batch.targets.clone());
        if args.auxiliary {
            if let Some(aux) = aux_logits {
                let aux_loss = criterion.forward(aux, batch.targets.clone());
                loss = loss + aux_loss.mul_scalar(args.auxiliary_weight);
            }
        }

        let loss_detached = loss.clone().detach();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);

        let loss_val = loss_detached
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default()
            .into_iter()
            .next()
            .unwrap_or(0.0) as f64;
        let accs = accuracy(&logits, &batch.targets, &[1, 5]);
        objs.update(loss_val, n);
        top1.update(accs[0], n);
        top5.update(accs[1], n);
        steps = step + 1;

        if step % args.report_freq.max(1) == 0 {
            info!("train {:03} {:e} {} {}", step, objs.avg(), top1.avg(), top5.avg());
            if args.debug {
                break;
            }
        }
    }

    let stats = PassStats {
        loss: objs.avg(),
        top1: top1.avg(),
        top5: top5.avg(),
        steps,
    };
    (model, stats)
}

/// One evaluation pass: the same metric pipeline with gradient tracking
/// disabled and no parameter updates. The model is only borrowed.
pub fn infer_epoch(
    model: &Network<TrainBackend>,
    data: &SampleSet,
    criterion: &CrossEntropyLoss<TrainBackend>,
    args: &EvalArgs,
    device: &<TrainBackend as Backend>::Device,
) -> PassStats {
    let mut objs = RunningAverage::default();
    let mut top1 = RunningAverage::default();
    let mut top5 = RunningAverage::default();
    let mut steps = 0;

    for (step, batch) in data
        .batches::<TrainBackend>(args.batch_size, device)
        .enumerate()
    {
        let n = batch.images.dims()[0];
        let (logits, _) = model.forward(batch.images.clone(), 0.0);
        let loss = criterion.forward(logits.clone(), batch.targets.clone());

        let loss_val = loss
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default()
            .into_iter()
            .next()
            .unwrap_or(0.0) as f64;
        let accs = accuracy(&logits, &batch.targets, &[1, 5]);
        objs.update(loss_val, n);
        top1.update(accs[0], n);
        top5.update(accs[1], n);
        steps = step + 1;

        if step % args.report_freq.max(1) == 0 {
            info!("valid {:03} {:e} {} {}", step, objs.avg(), top1.avg(), top5.avg());
            if args.debug {
                break;
            }
        }
    }

    PassStats {
        loss: objs.avg(),
        top1: top1.avg(),
        top5: top5.avg(),
        steps,
    }
}

/// Load pretrained weights into a freshly built network. The checkpoint must
/// match the genotype's topology; a mismatch fails the run.
fn load_checkpoint(
    model: Network<AdBackend>,
    path: &Path,
    device: &<AdBackend as Backend>::Device,
) -> anyhow::Result<Network<AdBackend>> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.load_file(path, &recorder, device).map_err(|e| {
        anyhow::anyhow!(
            "checkpoint {} does not match the resolved genotype topology: {e}",
            path.display()
        )
    })
}
