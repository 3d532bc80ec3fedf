#![recursion_limit = "256"]

//! Training and evaluation driver for a searched cell architecture: resolves
//! a genotype from the archs config file, builds the classifier, trains it
//! with SGD under a cosine-annealed learning rate, evaluates each epoch, and
//! persists the per-epoch error series.

pub mod config;
pub mod data;
pub mod meters;
pub mod metrics;
pub mod run;
pub mod schedule;

pub use config::{resolve_genotype, validate_backend_choice, BackendKind, EvalArgs};
pub use data::{Batch, Sample, SampleSet};
pub use meters::{accuracy, RunningAverage};
pub use metrics::{EpochMetrics, ErrorsLog};
pub use run::{infer_epoch, run_training, train_epoch, PassStats};
pub use schedule::{CosineAnnealing, DropPathSchedule};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
