//! Run configuration and genotype resolution.
//!
//! The run is configured entirely through CLI arguments; the parsed `EvalArgs`
//! value is the explicit run context passed to every stage. The archs config
//! file maps `{space}_{dataset}` / `{search_dp}_{search_wd}` /
//! `{search_task_id}` to a serialized genotype expression; resolution failures
//! are fatal for the run.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use models::Genotype;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    args_override_self = true,
    about = "Train and evaluate a searched cell architecture from an archs config file"
)]
pub struct EvalArgs {
    /// Search space the genotype came from.
    #[arg(long, default_value = "darts")]
    pub space: String,
    /// Dataset identifier (first half of the archs config key).
    #[arg(long, default_value = "cifar10")]
    pub dataset: String,
    /// Drop-path setting used during the search (kept verbatim in the key).
    #[arg(long, default_value = "0.0")]
    pub search_dp: String,
    /// Weight-decay setting used during the search (kept verbatim in the key).
    #[arg(long, default_value = "0.0003")]
    pub search_wd: String,
    /// Task id of the search run that produced the genotype.
    #[arg(long, default_value_t = 1)]
    pub search_task_id: usize,
    /// Task id of this evaluation run.
    #[arg(long, default_value_t = 1)]
    pub task_id: usize,
    /// YAML file holding the found architectures.
    #[arg(long, default_value = "archs.yaml")]
    pub archs_config_file: PathBuf,
    /// Directory receiving the log, errors JSON and results files.
    #[arg(long, default_value = "experiments/eval")]
    pub save: PathBuf,
    /// Results file name, relative to the save directory.
    #[arg(long, default_value = "results_eval.yaml")]
    pub results_file: PathBuf,
    /// Optional pretrained checkpoint matching the genotype.
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[arg(long, default_value_t = 600)]
    pub epochs: usize,
    #[arg(long, default_value_t = 96)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 0.025)]
    pub learning_rate: f64,
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    #[arg(long, default_value_t = 3e-4)]
    pub weight_decay: f64,
    /// Gradient-norm clipping threshold applied before every optimizer step.
    #[arg(long, default_value_t = 5.0)]
    pub grad_clip: f64,
    /// Maximum drop-path probability, reached linearly at the final epoch.
    #[arg(long, default_value_t = 0.2)]
    pub drop_path_prob: f64,
    /// Attach the auxiliary head and add its weighted loss.
    #[arg(long)]
    pub auxiliary: bool,
    #[arg(long, default_value_t = 0.4)]
    pub auxiliary_weight: f64,
    #[arg(long, default_value_t = 36)]
    pub init_channels: usize,
    #[arg(long, default_value_t = 20)]
    pub layers: usize,
    #[arg(long, default_value_t = 10)]
    pub n_classes: usize,
    /// Log the running meters every this many steps.
    #[arg(long, default_value_t = 50)]
    pub report_freq: usize,
    /// Stop each pass after the first reporting interval (smoke testing).
    #[arg(long)]
    pub debug: bool,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

impl EvalArgs {
    /// First archs config key: `{space}_{dataset}`.
    pub fn space_key(&self) -> String {
        format!("{}_{}", self.space, self.dataset)
    }

    /// Second archs config key: `{search_dp}_{search_wd}`.
    pub fn settings_key(&self) -> String {
        format!("{}_{}", self.search_dp, self.search_wd)
    }

    pub fn log_file_name(&self) -> String {
        format!("log_{}_{}.txt", self.search_task_id, self.task_id)
    }

    pub fn errors_file_name(&self) -> String {
        format!("errors_{}_{}.json", self.search_task_id, self.task_id)
    }

    pub fn results_path(&self) -> PathBuf {
        self.save.join(&self.results_file)
    }
}

/// Resolve the genotype this run should train. The composed key path is a
/// pure function of the run configuration; a missing file, malformed YAML or
/// an absent key is fatal.
pub fn resolve_genotype(args: &EvalArgs) -> anyhow::Result<Genotype> {
    let text = fs::read_to_string(&args.archs_config_file).with_context(|| {
        format!(
            "failed to read archs config file {}",
            args.archs_config_file.display()
        )
    })?;
    let root: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| {
        format!(
            "archs config file {} is not valid YAML",
            args.archs_config_file.display()
        )
    })?;

    let space_key = args.space_key();
    let settings_key = args.settings_key();
    let settings = lookup(&root, &serde_yaml::Value::String(space_key.clone()))
        .and_then(|v| lookup(v, &serde_yaml::Value::String(settings_key.clone())))
        .with_context(|| {
            format!("archs config has no entry for {space_key}/{settings_key}")
        })?;

    // Task ids appear as integer keys in some files and strings in others.
    let id_as_number = serde_yaml::Value::Number((args.search_task_id as u64).into());
    let id_as_string = serde_yaml::Value::String(args.search_task_id.to_string());
    let expr = lookup(settings, &id_as_number)
        .or_else(|| lookup(settings, &id_as_string))
        .and_then(serde_yaml::Value::as_str)
        .with_context(|| {
            format!(
                "archs config has no architecture for {space_key}/{settings_key}/{}",
                args.search_task_id
            )
        })?;

    Genotype::parse(expr).with_context(|| {
        format!(
            "failed to parse genotype for {space_key}/{settings_key}/{}",
            args.search_task_id
        )
    })
}

fn lookup<'a>(value: &'a serde_yaml::Value, key: &serde_yaml::Value) -> Option<&'a serde_yaml::Value> {
    value.as_mapping().and_then(|m| m.get(key))
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!(
                "built with backend-wgpu; the run will still use the WGPU backend despite --backend ndarray"
            );
        }
        _ => {}
    }
    Ok(())
}
