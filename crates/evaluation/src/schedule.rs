//! Learning-rate and drop-path schedules, advanced once per epoch.

use std::f64::consts::PI;

/// Cosine annealing from `base_lr` at epoch 0 to zero at `t_max`.
#[derive(Debug, Clone, Copy)]
pub struct CosineAnnealing {
    base_lr: f64,
    t_max: usize,
}

impl CosineAnnealing {
    pub fn new(base_lr: f64, t_max: usize) -> Self {
        Self { base_lr, t_max }
    }

    pub fn lr_at(&self, epoch: usize) -> f64 {
        if self.t_max == 0 {
            return self.base_lr;
        }
        0.5 * self.base_lr * (1.0 + (PI * epoch as f64 / self.t_max as f64).cos())
    }
}

/// Linear ramp of the drop-path probability across the run.
#[derive(Debug, Clone, Copy)]
pub struct DropPathSchedule {
    max_prob: f64,
    epochs: usize,
}

impl DropPathSchedule {
    pub fn new(max_prob: f64, epochs: usize) -> Self {
        Self { max_prob, epochs }
    }

    pub fn prob_at(&self, epoch: usize) -> f64 {
        if self.epochs == 0 {
            return 0.0;
        }
        self.max_prob * epoch as f64 / self.epochs as f64
    }
}
