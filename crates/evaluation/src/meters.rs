//! Per-epoch running meters and top-k accuracy.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Weighted running average of a scalar series. Reset at the start of each
/// epoch, discarded after logging.
#[derive(Debug, Default, Clone)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    pub fn update(&mut self, value: f64, n: usize) {
        self.sum += value * n as f64;
        self.count += n;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Top-k accuracy percentages, one per requested k. Computed host-side from
/// the tensor data.
pub fn accuracy<B: Backend>(
    logits: &Tensor<B, 2>,
    targets: &Tensor<B, 1, Int>,
    ks: &[usize],
) -> Vec<f64> {
    let [batch, classes] = logits.dims();
    let scores = logits
        .clone()
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default();
    let labels = targets
        .clone()
        .into_data()
        .to_vec::<i64>()
        .unwrap_or_default();

    let mut correct = vec![0usize; ks.len()];
    for (row, &label) in labels.iter().enumerate().take(batch) {
        let row_scores = &scores[row * classes..(row + 1) * classes];
        let mut order: Vec<usize> = (0..classes).collect();
        order.sort_unstable_by(|&a, &b| {
            row_scores[b]
                .partial_cmp(&row_scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (slot, &k) in ks.iter().enumerate() {
            if order[..k.min(classes)].contains(&(label as usize)) {
                correct[slot] += 1;
            }
        }
    }

    ks.iter()
        .enumerate()
        .map(|(slot, _)| {
            if batch == 0 {
                0.0
            } else {
                100.0 * correct[slot] as f64 / batch as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn running_average_weights_by_batch_size() {
        let mut meter = RunningAverage::default();
        meter.update(1.0, 2);
        meter.update(4.0, 1);
        assert!((meter.avg() - 2.0).abs() < 1e-12);
        assert_eq!(meter.count(), 3);

        meter.reset();
        assert_eq!(meter.avg(), 0.0);
        assert_eq!(meter.count(), 0);
    }

    #[test]
    fn accuracy_counts_top1_and_top5() {
        let device = Default::default();
        // Two samples, six classes. Sample 0's label ranks 1st, sample 1's
        // label ranks 3rd.
        let logits = Tensor::<Backend, 2>::from_data(
            TensorData::new(
                vec![
                    0.9f32, 0.1, 0.0, 0.0, 0.0, 0.0, //
                    0.5, 0.4, 0.3, 0.0, 0.0, 0.0,
                ],
                [2, 6],
            ),
            &device,
        );
        let targets = Tensor::<Backend, 1, Int>::from_data(
            TensorData::new(vec![0i64, 2], [2]),
            &device,
        );

        let accs = accuracy(&logits, &targets, &[1, 5]);
        assert!((accs[0] - 50.0).abs() < 1e-9);
        assert!((accs[1] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn accuracy_handles_empty_batch() {
        let device = Default::default();
        let logits =
            Tensor::<Backend, 2>::from_data(TensorData::new(Vec::<f32>::new(), [0, 4]), &device);
        let targets = Tensor::<Backend, 1, Int>::from_data(
            TensorData::new(Vec::<i64>::new(), [0]),
            &device,
        );
        assert_eq!(accuracy(&logits, &targets, &[1]), vec![0.0]);
    }
}
