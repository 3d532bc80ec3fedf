//! Batch contract for the training and evaluation queues.
//!
//! Building real data loaders (decoding, augmentation, prefetch) belongs to an
//! external collaborator; the loops only consume collated `Batch`es. The
//! `SampleSet` here holds host-side samples and collates them per epoch, with
//! a seeded synthetic constructor standing in for the collaborator in the
//! binary and the tests.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One collated batch: NCHW images plus integer class targets.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// A single host-side sample: CHW pixel data plus its class label.
#[derive(Debug, Clone)]
pub struct Sample {
    pub pixels: Vec<f32>,
    pub label: i64,
}

#[derive(Debug, Clone)]
pub struct SampleSet {
    samples: Vec<Sample>,
    channels: usize,
    height: usize,
    width: usize,
}

impl SampleSet {
    pub fn new(
        samples: Vec<Sample>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> anyhow::Result<Self> {
        let expected = channels * height * width;
        for (i, sample) in samples.iter().enumerate() {
            if sample.pixels.len() != expected {
                anyhow::bail!(
                    "sample {i} has {} pixel values, expected {expected}",
                    sample.pixels.len()
                );
            }
        }
        Ok(Self {
            samples,
            channels,
            height,
            width,
        })
    }

    /// Seeded synthetic stand-in for the external data collaborator. Pixels
    /// carry a class-dependent mean so a model can actually fit them.
    pub fn synthetic(count: usize, classes: usize, height: usize, width: usize, seed: u64) -> Self {
        let classes = classes.max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..count)
            .map(|i| {
                let label = (i % classes) as i64;
                let mean = (label as f32 + 0.5) / classes as f32;
                let pixels = (0..3 * height * width)
                    .map(|_| (mean + rng.gen_range(-0.1..0.1)).clamp(0.0, 1.0))
                    .collect();
                Sample { pixels, label }
            })
            .collect();
        Self {
            samples,
            channels: 3,
            height,
            width,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Collated batches for one pass over the set.
    pub fn batches<'a, B: Backend>(
        &'a self,
        batch_size: usize,
        device: &'a B::Device,
    ) -> impl Iterator<Item = Batch<B>> + 'a {
        let batch_size = batch_size.max(1);
        self.samples
            .chunks(batch_size)
            .map(move |chunk| self.collate(chunk, device))
    }

    fn collate<B: Backend>(&self, chunk: &[Sample], device: &B::Device) -> Batch<B> {
        let batch = chunk.len();
        let mut image_buf = Vec::with_capacity(batch * self.channels * self.height * self.width);
        let mut labels = Vec::with_capacity(batch);
        for sample in chunk {
            image_buf.extend_from_slice(&sample.pixels);
            labels.push(sample.label);
        }
        let images = Tensor::from_data(
            TensorData::new(image_buf, [batch, self.channels, self.height, self.width]),
            device,
        );
        let targets = Tensor::from_data(TensorData::new(labels, [batch]), device);
        Batch { images, targets }
    }
}
