//! Metrics persistence: the per-epoch errors log (JSON) and the shared
//! results file (YAML) consumed by the cross-run aggregation collaborator.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

/// Scalars appended after each completed epoch. Accuracies are stored as
/// errors (`100 - top1`).
#[derive(Debug, Clone, Copy)]
pub struct EpochMetrics {
    pub train_err: f64,
    pub train_loss: f64,
    pub valid_err: f64,
    pub valid_loss: f64,
}

/// Append-only record of four per-epoch series, serialized once at the end of
/// the run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ErrorsLog {
    pub train_acc: Vec<f64>,
    pub train_loss: Vec<f64>,
    pub valid_acc: Vec<f64>,
    pub valid_loss: Vec<f64>,
}

impl ErrorsLog {
    pub fn append(&mut self, metrics: EpochMetrics) {
        self.train_acc.push(metrics.train_err);
        self.train_loss.push(metrics.train_loss);
        self.valid_acc.push(metrics.valid_err);
        self.valid_loss.push(metrics.valid_loss);
    }

    /// Number of completed epochs recorded so far.
    pub fn epochs(&self) -> usize {
        self.train_acc.len()
    }

    /// Final validation error, if any epoch completed.
    pub fn final_valid_err(&self) -> Option<f64> {
        self.valid_acc.last().copied()
    }

    /// Compact JSON object with the four series.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create errors file {}", path.display()))?;
        serde_json::to_writer(file, self)
            .with_context(|| format!("failed to write errors file {}", path.display()))?;
        Ok(())
    }
}

/// Record the final validation error in the shared results file, nested under
/// `{space}_{dataset}` -> `{search_dp}_{search_wd}` -> search task id -> task
/// id. Read-modify-write: unrelated entries are preserved, the file is
/// created when absent.
pub fn write_yaml_results(
    path: &Path,
    space_key: &str,
    settings_key: &str,
    search_task_id: usize,
    task_id: usize,
    valid_err: f64,
) -> anyhow::Result<()> {
    let mut root: Mapping = if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read results file {}", path.display()))?;
        if text.trim().is_empty() {
            Mapping::new()
        } else {
            serde_yaml::from_str(&text)
                .with_context(|| format!("results file {} is not a YAML mapping", path.display()))?
        }
    } else {
        Mapping::new()
    };

    {
        let space = child(&mut root, Value::String(space_key.to_string()))?;
        let settings = child(space, Value::String(settings_key.to_string()))?;
        let search = child(settings, Value::Number((search_task_id as u64).into()))?;
        search.insert(
            Value::Number((task_id as u64).into()),
            Value::Number(serde_yaml::Number::from(valid_err)),
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_yaml::to_string(&root)?;
    fs::write(path, text)
        .with_context(|| format!("failed to write results file {}", path.display()))?;
    Ok(())
}

fn child(map: &mut Mapping, key: Value) -> anyhow::Result<&mut Mapping> {
    if !map.contains_key(&key) {
        map.insert(key.clone(), Value::Mapping(Mapping::new()));
    }
    match map.get_mut(&key) {
        Some(Value::Mapping(inner)) => Ok(inner),
        _ => anyhow::bail!("results entry {key:?} exists but is not a mapping"),
    }
}
