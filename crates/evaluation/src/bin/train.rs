use std::fs;

use clap::Parser;
use evaluation::{resolve_genotype, run_training, validate_backend_choice, EvalArgs, SampleSet};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Sample counts for the built-in synthetic queue, standing in for the
/// external data-loading collaborator.
#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    eval: EvalArgs,
    /// Synthetic training samples to generate.
    #[arg(long, default_value_t = 256)]
    train_samples: usize,
    /// Synthetic validation samples to generate.
    #[arg(long, default_value_t = 128)]
    valid_samples: usize,
    /// Side length of the synthetic images.
    #[arg(long, default_value_t = 32)]
    image_size: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    fs::create_dir_all(&args.eval.save)?;
    let log_file = fs::File::create(args.eval.save.join(args.eval.log_file_name()))?;
    let (file_writer, _guard) = tracing_appender::non_blocking(log_file);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    validate_backend_choice(args.eval.backend)?;
    info!("args = {:?}", args.eval);

    let genotype = resolve_genotype(&args.eval)?;
    info!("genotype = {}", genotype);

    let train_set = SampleSet::synthetic(
        args.train_samples,
        args.eval.n_classes,
        args.image_size,
        args.image_size,
        args.eval.seed,
    );
    let valid_set = SampleSet::synthetic(
        args.valid_samples,
        args.eval.n_classes,
        args.image_size,
        args.image_size,
        args.eval.seed.wrapping_add(1),
    );

    run_training(&args.eval, &genotype, &train_set, &valid_set)?;
    Ok(())
}
